//! CLI command for classifying reads.

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use crate::classify::{
    ClassificationResults, ClassificationStatistics, MapViewMode, PairingMode, QueryOptions,
    map_queries_to_targets,
};
use crate::index::Database;
use crate::io::output::show_summary;
use crate::io::run_info::{RunInfoParams, write_run_info};
use crate::taxonomy::Rank;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Database path
    #[arg(short = 'd', long)]
    pub database: PathBuf,
    /// Read files (FASTA/FASTQ)
    #[arg(required = true)]
    pub reads: Vec<PathBuf>,
    /// Per-read output file; stdout when omitted
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// Treat consecutive file pairs as mate 1 / mate 2
    #[arg(long)]
    pub pair_files: bool,
    /// Treat consecutive records within one file as mates
    #[arg(long, conflicts_with = "pair_files")]
    pub pair_sequences: bool,

    /// Minimum hits of the top candidate
    #[arg(long, default_value = "2")]
    pub hits_min: u32,
    /// Hit-difference fraction in [0,1]
    #[arg(long, default_value = "1.0")]
    pub hits_diff: f32,
    /// Lowest rank to classify on (candidates merge below it)
    #[arg(long, default_value = "sequence")]
    pub lowest: Rank,
    /// Highest rank to classify on
    #[arg(long, default_value = "domain")]
    pub highest: Rank,
    /// Candidates kept per query
    #[arg(long, default_value = "2")]
    pub max_candidates: usize,
    /// Maximum insert size of read pairs
    #[arg(long, default_value = "0")]
    pub insert_size_max: usize,
    /// Coverage percentile in [0,1]; above 0 enables the second pass
    #[arg(long, default_value = "0.0")]
    pub cov_percentile: f32,

    /// Record per-rank precision against header-derived ground truth
    #[arg(long)]
    pub precision: bool,
    /// Record per-rank database-coverage confusion counts
    #[arg(long, requires = "precision")]
    pub taxon_coverage: bool,
    /// Resolve and print ground truth per read
    #[arg(long)]
    pub ground_truth: bool,

    /// Only print reads that were classified
    #[arg(long)]
    pub mapped_only: bool,
    /// Suppress the per-read mapping table entirely
    #[arg(long, conflicts_with = "mapped_only")]
    pub no_map: bool,
    /// Print query numbers
    #[arg(long)]
    pub show_ids: bool,
    /// Print every database hit per read
    #[arg(long)]
    pub show_all_hits: bool,
    /// Print the candidate list per read
    #[arg(long)]
    pub show_top_hits: bool,
    /// Print candidate window ranges per read
    #[arg(long)]
    pub show_locations: bool,
    /// Align each classified read to its top candidate and print it
    #[arg(long)]
    pub show_alignment: bool,
    /// Print taxids next to taxon names
    #[arg(long)]
    pub taxids: bool,
    /// Write the per-target hit table
    #[arg(long)]
    pub hits_per_target: bool,
    /// Write per-taxon read counts
    #[arg(long)]
    pub abundances: bool,
    /// Estimate abundance at this rank and write the estimates
    #[arg(long)]
    pub abundance_per: Option<Rank>,
    /// Suppress per-read error reporting
    #[arg(long)]
    pub no_errors: bool,

    /// Worker threads; hardware parallelism when omitted
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
    /// Queries per batch
    #[arg(short = 'b', long, default_value = "4096")]
    pub batch_size: usize,
}

fn assemble_options(args: &QueryArgs) -> Result<QueryOptions> {
    let mut opt = QueryOptions::default();

    opt.classify.hits_min = args.hits_min;
    opt.classify.hits_diff_fraction = args.hits_diff;
    opt.classify.lowest_rank = args.lowest;
    opt.classify.highest_rank = args.highest;
    opt.classify.max_candidates_per_query = args.max_candidates;
    opt.classify.insert_size_max = args.insert_size_max;
    opt.classify.cov_percentile = args.cov_percentile;

    opt.output.evaluate.precision = args.precision;
    opt.output.evaluate.taxon_coverage = args.taxon_coverage;
    opt.output.evaluate.determine_ground_truth = args.ground_truth;
    opt.output.evaluate.show_ground_truth = args.ground_truth;

    opt.output.analysis.show_all_hits = args.show_all_hits;
    opt.output.analysis.show_top_hits = args.show_top_hits;
    opt.output.analysis.show_locations = args.show_locations;
    opt.output.analysis.show_alignment = args.show_alignment;
    opt.output.analysis.show_hits_per_target_list = args.hits_per_target;
    opt.output.analysis.show_tax_abundances = args.abundances;
    opt.output.analysis.abundance_rank = args.abundance_per;

    opt.output.format.map_view_mode = if args.no_map {
        MapViewMode::None
    } else if args.mapped_only {
        MapViewMode::MappedOnly
    } else {
        MapViewMode::All
    };
    opt.output.format.show_query_ids = args.show_ids;
    opt.output.format.taxon_style.show_id = args.taxids;
    opt.output.show_errors = !args.no_errors;

    if let Some(threads) = args.threads {
        opt.performance.num_threads = threads;
    }
    opt.performance.batch_size = args.batch_size;

    opt.pairing = if args.pair_files {
        PairingMode::Files
    } else if args.pair_sequences {
        PairingMode::Sequences
    } else {
        PairingMode::None
    };

    opt.validate()?;
    Ok(opt)
}

type BoxedWriter = Box<dyn Write + Send>;

/// Per-read, per-target, and per-taxon sinks. File output derives sibling
/// files for the reports; stdout output shares the terminal.
fn open_outputs(args: &QueryArgs) -> Result<(BoxedWriter, BoxedWriter, BoxedWriter)> {
    match &args.out {
        Some(path) => {
            let per_read = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let with_suffix = |suffix: &str| -> Result<BoxedWriter> {
                let mut name = path.file_name().unwrap_or_default().to_os_string();
                name.push(suffix);
                let p = path.with_file_name(name);
                Ok(Box::new(std::io::BufWriter::new(
                    std::fs::File::create(&p)
                        .with_context(|| format!("failed to create {}", p.display()))?,
                )))
            };
            let per_target: BoxedWriter = if args.hits_per_target {
                with_suffix(".targets.tsv")?
            } else {
                Box::new(std::io::sink())
            };
            let per_taxon: BoxedWriter = if args.abundances || args.abundance_per.is_some() {
                with_suffix(".abundance.tsv")?
            } else {
                Box::new(std::io::sink())
            };
            Ok((
                Box::new(std::io::BufWriter::new(per_read)),
                per_target,
                per_taxon,
            ))
        }
        None => Ok((
            Box::new(std::io::stdout()),
            Box::new(std::io::stdout()),
            Box::new(std::io::stdout()),
        )),
    }
}

pub fn run(args: QueryArgs) -> Result<()> {
    let start = Instant::now();
    let opt = assemble_options(&args)?;

    if args.pair_files && args.reads.len() % 2 != 0 {
        bail!("--pair-files requires an even number of read files");
    }

    info!("loading database {}", args.database.display());
    let mut db = Database::load(&args.database)?;
    if opt.output.evaluate.wants_ground_truth() {
        // ground truth may sit outside target lineages
        db.update_cached_lineages();
    }

    let (mut per_read, mut per_target, mut per_taxon) = open_outputs(&args)?;
    let mut status = std::io::stderr();

    let mut results = ClassificationResults {
        per_read_out: &mut per_read,
        per_target_out: &mut per_target,
        per_taxon_out: &mut per_taxon,
        status_out: &mut status,
        statistics: ClassificationStatistics::new(),
    };

    map_queries_to_targets(&args.reads, &db, &opt, &mut results)?;

    show_summary(results.per_read_out, &opt.output, &results.statistics)?;

    let elapsed = start.elapsed().as_secs_f64();
    let (total, classified) = (results.statistics.total(), results.statistics.classified());
    info!(
        "classified {}/{} queries ({:.1}%) in {:.1}s",
        classified,
        total,
        if total > 0 {
            classified as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        elapsed,
    );

    per_read.flush()?;
    per_target.flush()?;
    per_taxon.flush()?;

    if let Some(out) = &args.out {
        let mut name = out.file_name().unwrap_or_default().to_os_string();
        name.push(".run_info.json");
        write_run_info(&RunInfoParams {
            path: &out.with_file_name(name),
            num_queries: total,
            num_classified: classified,
            elapsed_secs: elapsed,
            version: crate::VERSION,
            num_threads: opt.performance.num_threads,
            database_path: &args.database,
            num_targets: db.num_targets(),
            coverage_pass: opt.classify.cov_percentile > 0.0,
        })?;
    }

    Ok(())
}
