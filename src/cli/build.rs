//! CLI command for building a reference database.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::index::{Database, Sketcher};
use crate::io::fastx::for_each_reference_record;
use crate::taxonomy::{Rank, Taxonomy};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Reference sequence files (FASTA/FASTQ)
    #[arg(short = 'r', long = "refs", required = true, num_args = 1..)]
    pub refs: Vec<PathBuf>,
    /// Taxonomy dump: TSV with taxid, parent taxid, rank name, name
    #[arg(long)]
    pub taxonomy: PathBuf,
    /// TSV mapping sequence ids to taxids; headers with a `taxid|NNN` tag
    /// resolve without it
    #[arg(long = "seqid-map")]
    pub seqid_map: Option<PathBuf>,
    /// Output database path
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// K-mer length (max 32)
    #[arg(short = 'k', long, default_value = "16")]
    pub kmer_size: u8,
    /// Features kept per window
    #[arg(long, default_value = "16")]
    pub sketch_size: u16,
    /// Window length in bases
    #[arg(long, default_value = "128")]
    pub window_size: u32,
    /// Window stride in bases; 0 derives window_size - k + 1
    #[arg(long, default_value = "0")]
    pub window_stride: u32,
    /// Drop locations of features occurring more often than this
    #[arg(long, default_value = "254")]
    pub max_locations_per_feature: usize,
}

/// Parse a taxonomy dump: one node per line,
/// `taxid <TAB> parent_taxid <TAB> rank <TAB> name`.
fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut taxonomy = Taxonomy::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(taxid), Some(parent), Some(rank), Some(name)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            anyhow::bail!("{}:{}: expected 4 tab-separated fields", path.display(), lineno + 1);
        };
        let taxid: i64 = taxid
            .trim()
            .parse()
            .with_context(|| format!("{}:{}: bad taxid", path.display(), lineno + 1))?;
        let parent: i64 = parent
            .trim()
            .parse()
            .with_context(|| format!("{}:{}: bad parent taxid", path.display(), lineno + 1))?;
        taxonomy.emplace(taxid, parent, Rank::parse(rank), name.trim());
    }
    info!("taxonomy loaded: {} nodes", taxonomy.len());
    Ok(taxonomy)
}

/// Parse a `seqid <TAB> taxid` assignment file.
fn load_seqid_map(path: &Path) -> Result<HashMap<String, i64>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut map = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        if let (Some(seqid), Some(taxid)) = (fields.next(), fields.next()) {
            if let Ok(taxid) = taxid.parse::<i64>() {
                map.insert(seqid.to_string(), taxid);
            }
        }
    }
    Ok(map)
}

/// Taxid of a reference record: assignment file first, then an embedded
/// `taxid|NNN` tag. 0 leaves the target unlinked.
fn resolve_taxid(name: &str, header: &str, seqid_map: &HashMap<String, i64>) -> i64 {
    if let Some(&taxid) = seqid_map.get(name) {
        return taxid;
    }
    if let Some(pos) = header.find("taxid|") {
        let digits: String = header[pos + "taxid|".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(taxid) = digits.parse() {
            return taxid;
        }
    }
    0
}

pub fn run(args: BuildArgs) -> Result<()> {
    let start = Instant::now();

    let taxonomy = load_taxonomy(&args.taxonomy)?;
    let seqid_map = match &args.seqid_map {
        Some(path) => load_seqid_map(path)?,
        None => HashMap::new(),
    };

    let sketcher = Sketcher::new(
        args.kmer_size,
        args.sketch_size,
        args.window_size,
        args.window_stride,
    );
    info!(
        "sketching k={} sketch={} window={} stride={}",
        sketcher.kmer_size(),
        sketcher.sketch_size(),
        sketcher.window_size(),
        sketcher.window_stride(),
    );
    let mut db = Database::new(sketcher, taxonomy, args.max_locations_per_feature);

    let progress = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} ({pos} targets)")
            .expect("static template"),
    );
    for path in &args.refs {
        progress.set_message(format!("indexing {}", path.display()));
        let filename = path.display().to_string();
        for_each_reference_record(path, |index, header, seq| {
            let name = header.split_whitespace().next().unwrap_or(header);
            let taxid = resolve_taxid(name, header, &seqid_map);
            db.add_target(seq, name, taxid, &filename, index);
            progress.inc(1);
            Ok(())
        })?;
    }
    progress.finish_and_clear();

    info!(
        "indexed {} targets, {} features",
        db.num_targets(),
        db.num_features()
    );

    db.save(&args.output)?;
    info!(
        "database written to {} in {:.1}s",
        args.output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_load_taxonomy_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tax.tsv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "# comment\n1\t1\troot\troot\n10\t1\tgenus\tG\n101\t10\tspecies\tA")
            .unwrap();
        let tax = load_taxonomy(&path).unwrap();
        assert_eq!(tax.len(), 3);
        let a = tax.taxon_with_id(101).unwrap();
        assert_eq!(tax.rank(a), Rank::Species);
        assert_eq!(tax.name(a), "A");
    }

    #[test]
    fn test_resolve_taxid_priority() {
        let mut map = HashMap::new();
        map.insert("seq1".to_string(), 42i64);
        assert_eq!(resolve_taxid("seq1", "seq1 taxid|7", &map), 42);
        assert_eq!(resolve_taxid("seq2", "seq2 taxid|7", &map), 7);
        assert_eq!(resolve_taxid("seq3", "seq3 nothing", &map), 0);
    }
}
