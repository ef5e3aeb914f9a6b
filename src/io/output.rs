//! Tabular report formatting.
//!
//! Per-read mapping lines are rendered into per-batch `String` buffers so
//! workers never touch the output streams; the pipeline writes whole
//! buffers on its serialized path. Per-target and per-taxon reports go to
//! their own streams at the end of the run.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::align;
use crate::classify::abundance::TaxonCountMap;
use crate::classify::{
    Classification, ClassificationCandidates, ClassificationStatistics, MapViewMode,
    MatchesPerTarget, OutputOptions, SequenceQuery,
};
use crate::index::{Database, Location};
use crate::taxonomy::{Rank, TaxonId};

// ---------------------------------------------------------------------------
// taxon rendering
// ---------------------------------------------------------------------------

/// Append one taxon as `rank:name(taxid)` subject to the print style;
/// absent taxa render as the none token.
pub fn show_taxon(
    out: &mut String,
    db: &Database,
    opt: &OutputOptions,
    tax: Option<TaxonId>,
) {
    let fmt = &opt.format;
    let Some(tax) = tax else {
        out.push_str(&fmt.tokens.none);
        return;
    };
    let taxon = db.taxon(tax);
    if fmt.taxon_style.show_rank {
        out.push_str(taxon.rank.name());
        out.push_str(&fmt.tokens.rank_suffix);
    }
    out.push_str(&taxon.name);
    if fmt.taxon_style.show_id {
        let _ = write!(
            out,
            "{}{}{}",
            fmt.tokens.taxid_prefix, taxon.taxid, fmt.tokens.taxid_suffix
        );
    }
}

fn show_taxon_header(out: &mut String, opt: &OutputOptions, prefix: &str) {
    let fmt = &opt.format;
    if fmt.taxon_style.show_rank {
        let _ = write!(out, "{prefix}rank{}taxname", fmt.tokens.rank_suffix);
    } else {
        let _ = write!(out, "{prefix}taxname");
    }
}

// ---------------------------------------------------------------------------
// per-read mapping table
// ---------------------------------------------------------------------------

/// Header line announcing the column layout of the mapping table.
pub fn show_query_mapping_header(out: &mut String, opt: &OutputOptions) {
    if opt.format.map_view_mode == MapViewMode::None {
        return;
    }
    let colsep = opt.format.tokens.column.clone();

    out.push_str(&opt.format.tokens.comment);
    out.push_str("TABLE_LAYOUT: ");

    if opt.format.show_query_ids {
        out.push_str("query_id");
        out.push_str(&colsep);
    }
    out.push_str("query_header");
    out.push_str(&colsep);

    if opt.evaluate.show_ground_truth {
        show_taxon_header(out, opt, "truth_");
        out.push_str(&colsep);
    }
    if opt.analysis.show_all_hits {
        out.push_str("all_hits");
        out.push_str(&colsep);
    }
    if opt.analysis.show_top_hits {
        out.push_str("top_hits");
        out.push_str(&colsep);
    }
    if opt.analysis.show_locations {
        out.push_str("candidate_locations");
        out.push_str(&colsep);
    }
    show_taxon_header(out, opt, "");
    out.push('\n');
}

/// All hits as `target/window:count` groups, in location order.
fn show_matches(out: &mut String, db: &Database, opt: &OutputOptions, allhits: &[Location]) {
    let tax_sep = &opt.format.tokens.tax_separator;
    let mut first = true;
    let mut i = 0;
    while i < allhits.len() {
        let l = allhits[i];
        let mut count = 1;
        while i + count < allhits.len() && allhits[i + count] == l {
            count += 1;
        }
        if !first {
            out.push_str(tax_sep);
        }
        first = false;
        let _ = write!(out, "{}/{}:{}", db.target_name(l.tgt), l.win, count);
        i += count;
    }
}

/// Top candidates as `taxname:hits`.
fn show_candidates(
    out: &mut String,
    db: &Database,
    opt: &OutputOptions,
    candidates: &ClassificationCandidates,
) {
    let mut first = true;
    for cand in candidates {
        if !first {
            out.push_str(&opt.format.tokens.tax_separator);
        }
        first = false;
        match cand.tax {
            Some(tax) => {
                let _ = write!(out, "{}:{}", db.taxon(tax).name, cand.hits);
            }
            None => out.push_str(&opt.format.tokens.none),
        }
    }
}

/// Candidate window ranges as `target:[beg,end]`.
fn show_candidate_ranges(
    out: &mut String,
    db: &Database,
    opt: &OutputOptions,
    candidates: &ClassificationCandidates,
) {
    let mut first = true;
    for cand in candidates {
        if !first {
            out.push_str(&opt.format.tokens.tax_separator);
        }
        first = false;
        let _ = write!(
            out,
            "{}:[{},{}]",
            db.target_name(cand.tgt),
            cand.pos.beg,
            cand.pos.end
        );
    }
}

/// One line of the mapping table.
///
/// `alignment` is a pre-rendered alignment block inserted between the
/// taxon column and the line terminator.
pub fn show_query_mapping(
    out: &mut String,
    db: &Database,
    opt: &OutputOptions,
    query: &SequenceQuery,
    cls: &Classification,
    allhits: &[Location],
    alignment: Option<&str>,
) {
    let fmt = &opt.format;
    if fmt.map_view_mode == MapViewMode::None
        || (fmt.map_view_mode == MapViewMode::MappedOnly && cls.best.is_none())
    {
        return;
    }
    let colsep = &fmt.tokens.column;

    if fmt.show_query_ids {
        let _ = write!(out, "{}{}", query.id, colsep);
    }

    // first contiguous token of the header only
    let header = query.header.split_whitespace().next().unwrap_or("");
    out.push_str(header);
    out.push_str(colsep);

    if opt.evaluate.show_ground_truth {
        show_taxon(out, db, opt, cls.ground_truth);
        out.push_str(colsep);
    }
    if opt.analysis.show_all_hits {
        show_matches(out, db, opt, allhits);
        out.push_str(colsep);
    }
    if opt.analysis.show_top_hits {
        show_candidates(out, db, opt, &cls.candidates);
        out.push_str(colsep);
    }
    if opt.analysis.show_locations {
        show_candidate_ranges(out, db, opt, &cls.candidates);
        out.push_str(colsep);
    }
    show_taxon(out, db, opt, cls.best);

    if let Some(block) = alignment {
        out.push_str(block);
    }
    out.push('\n');
}

// ---------------------------------------------------------------------------
// alignment display
// ---------------------------------------------------------------------------

/// Align the query against the top candidate's window range and render the
/// comment block shown beneath the mapping line.
///
/// Needs to re-open the reference file the candidate came from; any I/O
/// problem surfaces as an error that the caller may log, the mapping line
/// itself is unaffected.
pub fn render_alignment(
    db: &Database,
    opt: &OutputOptions,
    query: &SequenceQuery,
    candidates: &ClassificationCandidates,
) -> Result<Option<String>> {
    let Some(top) = candidates.first() else {
        return Ok(None);
    };
    let Some(tax) = top.tax else {
        return Ok(None);
    };
    let taxon = db.taxon(tax);
    if taxon.rank != Rank::Sequence || query.seq1.is_empty() {
        return Ok(None);
    }
    let Some(src) = taxon.source.as_ref() else {
        return Ok(None);
    };

    let target_seq = super::fastx::load_reference_record(Path::new(&src.filename), src.index)?;

    let stride = db.target_sketcher().window_stride() as usize;
    let size = db.target_sketcher().window_size() as usize;
    let beg = (stride * top.pos.beg as usize).min(target_seq.len());
    let end = (stride * top.pos.end as usize + size).min(target_seq.len());
    let subject = &target_seq[beg..end];

    // forward vs reverse-complement: align both, keep the better strand
    let fw = align::semi_global(&query.seq1, subject);
    let rc_query = align::reverse_complement(&query.seq1);
    let rc = align::semi_global(&rc_query, subject);
    let (mut score, mut score_rc) = (fw.score, rc.score);
    if !query.seq2.is_empty() {
        score += align::semi_global_score(&query.seq2, subject);
        let rc2 = align::reverse_complement(&query.seq2);
        score_rc += align::semi_global_score(&rc2, subject);
    }
    let (best, score) = if score >= score_rc {
        (fw, score)
    } else {
        (rc, score_rc)
    };

    let comment = &opt.format.tokens.comment;
    let w = stride;
    let mut block = String::new();
    let _ = write!(
        block,
        "\n{}score {} aligned to {} #{} in range [{},{}]",
        comment,
        score,
        src.filename,
        src.index,
        w * top.pos.beg as usize,
        w * top.pos.end as usize + w,
    );
    let _ = write!(block, "\n{}query  {}", comment, best.query);
    let _ = write!(block, "\n{}target {}", comment, best.subject);
    Ok(Some(block))
}

// ---------------------------------------------------------------------------
// per-target report
// ---------------------------------------------------------------------------

/// Per-target hit report; `sort_match_lists` must have run for the entry
/// order to be reproducible.
pub fn show_matches_per_targets(
    w: &mut dyn Write,
    db: &Database,
    tgt_matches: &MatchesPerTarget,
    opt: &OutputOptions,
) -> Result<()> {
    let tokens = &opt.format.tokens;
    let colsep = &tokens.column;
    writeln!(
        w,
        "{}TABLE_LAYOUT: target{colsep}windows{colsep}queries [query_id:window/hits ...]",
        tokens.comment
    )?;
    for tgt in tgt_matches.sorted_targets() {
        let Some(entries) = tgt_matches.get(tgt) else {
            continue;
        };
        write!(w, "{}{colsep}{}{colsep}", db.target_name(tgt), db.windows(tgt))?;
        let mut first_entry = true;
        for entry in entries {
            if !first_entry {
                write!(w, "{}", tokens.tax_separator)?;
            }
            first_entry = false;
            write!(w, "{}:", entry.query_id)?;
            let mut first_win = true;
            for wh in &entry.window_hits {
                if !first_win {
                    write!(w, " ")?;
                }
                first_win = false;
                write!(w, "{}/{}", wh.win, wh.hits)?;
            }
        }
        writeln!(w)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// abundance reports
// ---------------------------------------------------------------------------

fn show_taxon_counts(
    w: &mut dyn Write,
    db: &Database,
    opt: &OutputOptions,
    counts: &TaxonCountMap,
    total: f64,
) -> Result<()> {
    let colsep = &opt.format.tokens.column;
    for (key, &count) in counts {
        let mut label = String::new();
        show_taxon(&mut label, db, opt, Some(key.id));
        let pct = if total > 0.0 { count / total * 100.0 } else { 0.0 };
        writeln!(w, "{label}{colsep}{count}{colsep}{pct:.4}%")?;
    }
    Ok(())
}

/// Raw per-taxon read counts from both classification passes.
pub fn show_abundances(
    w: &mut dyn Write,
    db: &Database,
    opt: &OutputOptions,
    counts: &TaxonCountMap,
    stats: &ClassificationStatistics,
) -> Result<()> {
    let tokens = &opt.format.tokens;
    let colsep = &tokens.column;
    writeln!(w, "{}query summary: total reads = {}", tokens.comment, stats.total())?;
    writeln!(
        w,
        "{}TABLE_LAYOUT: taxon{colsep}reads{colsep}fraction",
        tokens.comment
    )?;
    let total: f64 = counts.values().sum();
    show_taxon_counts(w, db, opt, counts, total)
}

/// Counts after redistribution onto `rank`.
pub fn show_abundance_estimates(
    w: &mut dyn Write,
    db: &Database,
    opt: &OutputOptions,
    rank: Rank,
    counts: &TaxonCountMap,
) -> Result<()> {
    let tokens = &opt.format.tokens;
    let colsep = &tokens.column;
    writeln!(
        w,
        "{}estimated abundance per {} (reads distributed over the taxonomy)",
        tokens.comment,
        rank.name()
    )?;
    writeln!(
        w,
        "{}TABLE_LAYOUT: taxon{colsep}reads{colsep}fraction",
        tokens.comment
    )?;
    let total: f64 = counts.values().sum();
    show_taxon_counts(w, db, opt, counts, total)
}

// ---------------------------------------------------------------------------
// run summary
// ---------------------------------------------------------------------------

/// Closing summary written as comment lines.
pub fn show_summary(
    w: &mut dyn Write,
    opt: &OutputOptions,
    stats: &ClassificationStatistics,
) -> Result<()> {
    let comment = &opt.format.tokens.comment;
    let total = stats.total();
    let classified = stats.classified();
    let pct = if total > 0 {
        classified as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    writeln!(w, "{comment}queries: {total}")?;
    writeln!(w, "{comment}classified: {classified} ({pct:.2}%)")?;
    writeln!(w, "{comment}unclassified: {}", stats.unclassified())?;

    if opt.evaluate.precision {
        for rank in [
            Rank::Sequence,
            Rank::Species,
            Rank::Genus,
            Rank::Family,
            Rank::Order,
            Rank::Class,
            Rank::Phylum,
            Rank::Kingdom,
            Rank::Domain,
        ] {
            let known = stats.known_at(rank);
            let correct = stats.correct_at_or_below(rank);
            if known == 0 && correct == 0 {
                continue;
            }
            writeln!(
                w,
                "{comment}{}: known {known}, correct at or below {correct}",
                rank.name()
            )?;
        }
        if opt.evaluate.taxon_coverage {
            for rank in [Rank::Species, Rank::Genus, Rank::Family] {
                let cov = stats.coverage_at(rank);
                writeln!(
                    w,
                    "{comment}{} coverage: TP {} FP {} TN {} FN {}",
                    rank.name(),
                    cov.true_pos,
                    cov.false_pos,
                    cov.true_neg,
                    cov.false_neg
                )?;
            }
        }
    }
    Ok(())
}
