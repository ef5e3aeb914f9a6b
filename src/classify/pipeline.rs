//! The two-pass parallel query pipeline.
//!
//! Pass 1 is a producer/worker/collector pipeline over bounded crossbeam
//! channels: one producer reads query batches, N workers classify them into
//! private buffers, and the collector, sole owner of the output streams and
//! the global maps, applies finished buffers strictly in batch input order.
//! Out-of-order arrivals wait in an index-keyed pending map, so per-read
//! output is deterministic for any thread count.
//!
//! When a coverage percentile is configured, pass 1 saves classifications
//! instead of writing them. After the coverage filter has pruned the
//! per-target index, pass 2 workers drain the saved batches from a lock-free
//! queue, re-classify against the surviving targets, and append their output
//! under a single mutex. Pass 2 batches stay contiguous but their order
//! follows dequeue completion, not input order.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use crossbeam::channel;
use crossbeam::queue::SegQueue;
use tracing::info;

use crate::index::Database;
use crate::io::fastx::QuerySource;
use crate::io::output::{
    render_alignment, show_abundance_estimates, show_abundances, show_matches_per_targets,
    show_query_mapping, show_query_mapping_header,
};

use super::abundance::{TaxonCountMap, count_taxon, estimate_abundance, merge_counts};
use super::coverage::filter_targets_by_coverage;
use super::evaluate::evaluate_classification;
use super::matches_per_target::MatchesPerTarget;
use super::options::{MapViewMode, QueryOptions};
use super::statistics::ClassificationStatistics;
use super::{Classification, SequenceQuery, classify, update_classification};

// ---------------------------------------------------------------------------
// Result sinks
// ---------------------------------------------------------------------------

/// Output streams and global statistics of one query run.
///
/// Owned by the caller; the pipeline is the only writer while it runs.
pub struct ClassificationResults<'a> {
    pub per_read_out: &'a mut (dyn Write + Send),
    pub per_target_out: &'a mut (dyn Write + Send),
    pub per_taxon_out: &'a mut (dyn Write + Send),
    pub status_out: &'a mut (dyn Write + Send),
    pub statistics: ClassificationStatistics,
}

// ---------------------------------------------------------------------------
// Per-batch state
// ---------------------------------------------------------------------------

/// A query held back for the second pass: header and id survive, the
/// sequences are dropped.
struct QueryMapping {
    query: SequenceQuery,
    cls: Classification,
}

/// Everything a worker accumulates for one batch.
#[derive(Default)]
struct MappingsBuffer {
    out: String,
    query_mappings: Vec<QueryMapping>,
    hits_per_target: MatchesPerTarget,
    tax_counts: TaxonCountMap,
    statistics: ClassificationStatistics,
    error_messages: Vec<String>,
}

enum Finalized {
    Batch { index: u64, buffer: MappingsBuffer },
    Note(String),
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Classify all reads of `infiles` against `db`.
///
/// Call `db.update_cached_lineages()` beforehand when ground-truth
/// evaluation is enabled; the pipeline itself never mutates the database.
pub fn map_queries_to_targets(
    infiles: &[PathBuf],
    db: &Database,
    opt: &QueryOptions,
    results: &mut ClassificationResults<'_>,
) -> Result<()> {
    opt.validate()?;

    if opt.output.format.map_view_mode != MapViewMode::None {
        let mut header = String::new();
        show_query_mapping_header(&mut header, &opt.output);
        results.per_read_out.write_all(header.as_bytes())?;
    }

    let mut tgt_matches = MatchesPerTarget::default();
    let mut all_tax_counts = TaxonCountMap::new();
    let mut saved_batches: Vec<Vec<QueryMapping>> = Vec::new();

    run_first_pass(
        infiles,
        db,
        opt,
        results,
        &mut tgt_matches,
        &mut all_tax_counts,
        &mut saved_batches,
    )?;

    if opt.classify.cov_percentile > 0.0 {
        let targets_before = tgt_matches.len();
        filter_targets_by_coverage(db, &mut tgt_matches, opt.classify.cov_percentile);
        info!(
            "coverage filter kept {}/{} targets",
            tgt_matches.len(),
            targets_before
        );
        run_second_pass(
            db,
            opt,
            saved_batches,
            &tgt_matches,
            results,
            &mut all_tax_counts,
        )?;
    }

    if opt.output.analysis.show_hits_per_target_list {
        tgt_matches.sort_match_lists();
        show_matches_per_targets(results.per_target_out, db, &tgt_matches, &opt.output)?;
    }
    if opt.output.analysis.show_tax_abundances {
        show_abundances(
            results.per_taxon_out,
            db,
            &opt.output,
            &all_tax_counts,
            &results.statistics,
        )?;
    }
    if let Some(rank) = opt.output.analysis.abundance_rank {
        estimate_abundance(db, &mut all_tax_counts, rank);
        show_abundance_estimates(results.per_taxon_out, db, &opt.output, rank, &all_tax_counts)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Pass 1
// ---------------------------------------------------------------------------

fn run_first_pass(
    infiles: &[PathBuf],
    db: &Database,
    opt: &QueryOptions,
    results: &mut ClassificationResults<'_>,
    tgt_matches: &mut MatchesPerTarget,
    all_tax_counts: &mut TaxonCountMap,
    saved_batches: &mut Vec<Vec<QueryMapping>>,
) -> Result<()> {
    let num_threads = opt.performance.num_threads.max(1);
    let mut source = QuerySource::open(infiles, opt.pairing, opt.performance.batch_size)?;

    // batch channel capacity bounds read-ahead to one batch per worker
    let (batch_tx, batch_rx) = channel::bounded::<(u64, Vec<SequenceQuery>)>(num_threads);
    let (done_tx, done_rx) = channel::bounded::<Finalized>(num_threads * 2);

    let outcome = crossbeam::scope(|scope| -> Result<()> {
        for _ in 0..num_threads {
            let batch_rx = batch_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move |_| {
                while let Ok((index, batch)) = batch_rx.recv() {
                    let mut buffer = MappingsBuffer::default();
                    for query in &batch {
                        process_query(db, opt, query, &mut buffer);
                    }
                    if done_tx.send(Finalized::Batch { index, buffer }).is_err() {
                        break;
                    }
                }
            });
        }

        let producer_tx = done_tx.clone();
        drop(batch_rx);
        drop(done_tx);

        scope.spawn(move |_| {
            let mut batch = Vec::new();
            let mut errors = Vec::new();
            let mut index = 0u64;
            loop {
                match source.next_batch(&mut batch, &mut errors) {
                    Ok(has_queries) => {
                        for msg in errors.drain(..) {
                            let _ = producer_tx.send(Finalized::Note(msg));
                        }
                        if !has_queries {
                            break;
                        }
                        if batch_tx
                            .send((index, std::mem::take(&mut batch)))
                            .is_err()
                        {
                            break;
                        }
                        index += 1;
                    }
                    Err(e) => {
                        let _ = producer_tx.send(Finalized::Note(format!("input error: {e}")));
                        break;
                    }
                }
            }
            // batch_tx drops here; workers drain the channel and exit
        });

        // collector: apply finished batches in input order
        let mut next_index = 0u64;
        let mut pending: BTreeMap<u64, MappingsBuffer> = BTreeMap::new();
        for msg in done_rx.iter() {
            match msg {
                Finalized::Note(note) => {
                    if opt.output.show_errors {
                        writeln!(
                            results.status_out,
                            "{}{note}",
                            opt.output.format.tokens.comment
                        )?;
                    }
                }
                Finalized::Batch { index, buffer } => {
                    pending.insert(index, buffer);
                    while let Some(buffer) = pending.remove(&next_index) {
                        finalize_batch(
                            opt,
                            buffer,
                            results,
                            tgt_matches,
                            all_tax_counts,
                            saved_batches,
                        )?;
                        next_index += 1;
                    }
                }
            }
        }
        Ok(())
    })
    .map_err(|e| anyhow!("classification worker panicked: {e:?}"))?;

    outcome
}

/// Classify one query into the batch buffer.
fn process_query(
    db: &Database,
    opt: &QueryOptions,
    query: &SequenceQuery,
    buf: &mut MappingsBuffer,
) {
    if query.is_empty() {
        return;
    }
    let coverage_mode = opt.classify.cov_percentile > 0.0;

    let allhits = db.query_locations(&query.seq1, &query.seq2);
    let mut cls = classify(db, &opt.classify, query, &allhits);

    if opt.output.analysis.show_hits_per_target_list || coverage_mode {
        buf.hits_per_target
            .insert(query.id, &allhits, &cls.candidates, opt.classify.hits_min);
    }

    if coverage_mode {
        // keep id and header for pass 2, drop the sequence data
        buf.query_mappings.push(QueryMapping {
            query: SequenceQuery {
                id: query.id,
                header: query.header.clone(),
                ..SequenceQuery::default()
            },
            cls,
        });
    } else {
        if opt.make_tax_counts() {
            if let Some(best) = cls.best {
                count_taxon(&mut buf.tax_counts, db, best);
            }
        }
        evaluate_classification(db, &opt.output.evaluate, query, &mut cls, &mut buf.statistics);

        let alignment = maybe_render_alignment(db, opt, query, &cls, buf);
        show_query_mapping(
            &mut buf.out,
            db,
            &opt.output,
            query,
            &cls,
            &allhits,
            alignment.as_deref(),
        );
    }
}

/// Alignment display is best-effort: failures are queued as status notes
/// and never affect the classification.
fn maybe_render_alignment(
    db: &Database,
    opt: &QueryOptions,
    query: &SequenceQuery,
    cls: &Classification,
    buf: &mut MappingsBuffer,
) -> Option<String> {
    if !opt.output.analysis.show_alignment || cls.best.is_none() {
        return None;
    }
    match render_alignment(db, &opt.output, query, &cls.candidates) {
        Ok(block) => block,
        Err(e) => {
            buf.error_messages
                .push(format!("alignment of query {} failed: {e}", query.id));
            None
        }
    }
}

/// Apply one finished batch on the serialized path.
fn finalize_batch(
    opt: &QueryOptions,
    buffer: MappingsBuffer,
    results: &mut ClassificationResults<'_>,
    tgt_matches: &mut MatchesPerTarget,
    all_tax_counts: &mut TaxonCountMap,
    saved_batches: &mut Vec<Vec<QueryMapping>>,
) -> Result<()> {
    let coverage_mode = opt.classify.cov_percentile > 0.0;

    if opt.output.analysis.show_hits_per_target_list || coverage_mode {
        tgt_matches.merge(buffer.hits_per_target);
    }

    if coverage_mode {
        if !buffer.query_mappings.is_empty() {
            saved_batches.push(buffer.query_mappings);
        }
    } else {
        if opt.make_tax_counts() {
            merge_counts(all_tax_counts, &buffer.tax_counts);
        }
        results.statistics.merge(&buffer.statistics);
        results.per_read_out.write_all(buffer.out.as_bytes())?;
    }

    if opt.output.show_errors {
        for msg in &buffer.error_messages {
            writeln!(
                results.status_out,
                "{}{msg}",
                opt.output.format.tokens.comment
            )?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pass 2
// ---------------------------------------------------------------------------

fn run_second_pass(
    db: &Database,
    opt: &QueryOptions,
    saved_batches: Vec<Vec<QueryMapping>>,
    tgt_matches: &MatchesPerTarget,
    results: &mut ClassificationResults<'_>,
    all_tax_counts: &mut TaxonCountMap,
) -> Result<()> {
    if saved_batches.is_empty() {
        return Ok(());
    }
    let num_threads = opt.performance.num_threads.max(1);
    info!(
        "re-classifying {} saved batches on {num_threads} threads",
        saved_batches.len()
    );

    let queue: SegQueue<Vec<QueryMapping>> = SegQueue::new();
    for batch in saved_batches {
        queue.push(batch);
    }

    let shared = Mutex::new((results, all_tax_counts));

    crossbeam::scope(|scope| {
        for _ in 0..num_threads {
            scope.spawn(|_| {
                while let Some(batch) = queue.pop() {
                    let mut out = String::new();
                    let mut tax_counts = TaxonCountMap::new();
                    let mut stats = ClassificationStatistics::new();

                    for mut mapping in batch {
                        update_classification(db, &opt.classify, &mut mapping.cls, tgt_matches);
                        evaluate_classification(
                            db,
                            &opt.output.evaluate,
                            &mapping.query,
                            &mut mapping.cls,
                            &mut stats,
                        );
                        show_query_mapping(
                            &mut out,
                            db,
                            &opt.output,
                            &mapping.query,
                            &mapping.cls,
                            &[],
                            None,
                        );
                        if opt.make_tax_counts() {
                            if let Some(best) = mapping.cls.best {
                                count_taxon(&mut tax_counts, db, best);
                            }
                        }
                    }

                    let mut guard = shared.lock().unwrap();
                    let (results, all_counts) = &mut *guard;
                    if opt.make_tax_counts() {
                        merge_counts(all_counts, &tax_counts);
                    }
                    results.statistics.merge(&stats);
                    results.per_read_out.write_all(out.as_bytes()).ok();
                }
            });
        }
    })
    .map_err(|e| anyhow!("re-classification worker panicked: {e:?}"))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DEFAULT_MAX_LOCATIONS_PER_FEATURE, Sketcher};
    use crate::taxonomy::{Rank, Taxonomy};
    use std::io::Write as _;

    fn random_seq(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                b"ACGT"[(state >> 33) as usize % 4]
            })
            .collect()
    }

    fn test_db() -> (Database, Vec<Vec<u8>>) {
        let mut tax = Taxonomy::new();
        tax.emplace(1, 1, Rank::Root, "root");
        tax.emplace(10, 1, Rank::Genus, "G");
        tax.emplace(101, 10, Rank::Species, "A");
        tax.emplace(102, 10, Rank::Species, "B");
        let mut db = Database::new(
            Sketcher::new(16, 16, 64, 64),
            tax,
            DEFAULT_MAX_LOCATIONS_PER_FEATURE,
        );
        let ref_a = random_seq(11, 512);
        let ref_b = random_seq(22, 512);
        db.add_target(&ref_a, "refA", 101, "refs.fa", 1);
        db.add_target(&ref_b, "refB", 102, "refs.fa", 2);
        (db, vec![ref_a, ref_b])
    }

    fn write_queries(dir: &std::path::Path, refs: &[Vec<u8>], n: usize) -> PathBuf {
        let path = dir.join("reads.fq");
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..n {
            let src = &refs[i % refs.len()];
            let off = (i * 17) % (src.len() - 80);
            let read = &src[off..off + 80];
            writeln!(
                f,
                "@q{i}\n{}\n+\n{}",
                String::from_utf8_lossy(read),
                "I".repeat(read.len())
            )
            .unwrap();
        }
        path
    }

    fn run(
        db: &Database,
        infile: &PathBuf,
        opt: &QueryOptions,
    ) -> (String, ClassificationStatistics) {
        let mut per_read: Vec<u8> = Vec::new();
        let mut per_target: Vec<u8> = Vec::new();
        let mut per_taxon: Vec<u8> = Vec::new();
        let mut status: Vec<u8> = Vec::new();
        let stats = {
            let mut results = ClassificationResults {
                per_read_out: &mut per_read,
                per_target_out: &mut per_target,
                per_taxon_out: &mut per_taxon,
                status_out: &mut status,
                statistics: ClassificationStatistics::new(),
            };
            map_queries_to_targets(std::slice::from_ref(infile), db, opt, &mut results)
                .unwrap();
            results.statistics
        };
        (String::from_utf8(per_read).unwrap(), stats)
    }

    #[test]
    fn test_pass1_output_is_in_input_order() {
        let (db, refs) = test_db();
        let dir = tempfile::tempdir().unwrap();
        let infile = write_queries(dir.path(), &refs, 64);

        let mut opt = QueryOptions::default();
        opt.performance.num_threads = 4;
        opt.performance.batch_size = 3;
        opt.output.format.show_query_ids = true;

        let (text, stats) = run(&db, &infile, &opt);
        assert_eq!(stats.total(), 64);

        let ids: Vec<u64> = text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.split("\t|\t").next().unwrap().parse().unwrap())
            .collect();
        let expected: Vec<u64> = (1..=64).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_output_is_deterministic_across_thread_counts() {
        let (db, refs) = test_db();
        let dir = tempfile::tempdir().unwrap();
        let infile = write_queries(dir.path(), &refs, 48);

        let mut texts = Vec::new();
        for threads in [1, 4] {
            let mut opt = QueryOptions::default();
            opt.performance.num_threads = threads;
            opt.performance.batch_size = 5;
            opt.output.analysis.show_top_hits = true;
            let (text, _) = run(&db, &infile, &opt);
            texts.push(text);
        }
        assert_eq!(texts[0], texts[1]);
    }

    #[test]
    fn test_coverage_pass_emits_all_reads_as_multiset() {
        let (db, refs) = test_db();
        let dir = tempfile::tempdir().unwrap();
        let infile = write_queries(dir.path(), &refs, 32);

        let mut opt = QueryOptions::default();
        opt.performance.num_threads = 4;
        opt.performance.batch_size = 4;
        opt.output.format.show_query_ids = true;
        opt.classify.cov_percentile = 0.1;

        let (text, stats) = run(&db, &infile, &opt);
        assert_eq!(stats.total(), 32);

        let mut ids: Vec<u64> = text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.split("\t|\t").next().unwrap().parse().unwrap())
            .collect();
        ids.sort_unstable();
        let expected: Vec<u64> = (1..=32).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_unclassified_suppressed_in_mapped_only_mode() {
        let (db, _refs) = test_db();
        let dir = tempfile::tempdir().unwrap();
        // queries unrelated to the references
        let junk = vec![random_seq(999, 512)];
        let infile = write_queries(dir.path(), &junk, 8);

        let mut opt = QueryOptions::default();
        opt.output.format.map_view_mode = MapViewMode::MappedOnly;

        let (text, stats) = run(&db, &infile, &opt);
        assert_eq!(stats.total(), 8);
        assert_eq!(stats.classified(), 0);
        assert!(text.lines().all(|l| l.starts_with('#')));
    }
}
