//! Query-time option groups.
//!
//! The CLI assembles these from arguments and validates them before the run
//! starts; the pipeline and the report writers only read them.

use anyhow::{Result, bail};

use crate::taxonomy::Rank;

/// Options steering candidate generation and the consensus resolver.
#[derive(Debug, Clone)]
pub struct ClassificationOptions {
    /// Classify on this rank at the lowest; candidates whose LCA is at or
    /// below this rank are merged during aggregation.
    pub lowest_rank: Rank,
    /// Classifications above this rank are reported as unclassified.
    pub highest_rank: Rank,
    /// Minimum hits of the top candidate for a query to be classifiable.
    pub hits_min: u32,
    /// Fraction of `top.hits - hits_min` below which further candidates are
    /// ignored by the consensus.
    pub hits_diff_fraction: f32,
    /// Maximum insert size of paired reads, used to size the hit window.
    pub insert_size_max: usize,
    pub max_candidates_per_query: usize,
    /// Coverage percentile cutoff for the second pass; 0 disables pass 2.
    pub cov_percentile: f32,
}

impl Default for ClassificationOptions {
    fn default() -> Self {
        Self {
            lowest_rank: Rank::Sequence,
            highest_rank: Rank::Domain,
            hits_min: 2,
            hits_diff_fraction: 1.0,
            insert_size_max: 0,
            max_candidates_per_query: 2,
            cov_percentile: 0.0,
        }
    }
}

/// Ground-truth evaluation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationOptions {
    /// Resolve ground truth from query headers and print it.
    pub show_ground_truth: bool,
    /// Record per-rank precision statistics (implies ground truth).
    pub precision: bool,
    /// Record per-rank database-coverage confusion counts.
    pub taxon_coverage: bool,
    /// Resolve ground truth even when precision is off.
    pub determine_ground_truth: bool,
}

impl EvaluationOptions {
    pub fn wants_ground_truth(&self) -> bool {
        self.precision || self.determine_ground_truth || self.show_ground_truth
    }
}

/// Extra per-read and per-run analysis output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    pub show_all_hits: bool,
    pub show_top_hits: bool,
    pub show_locations: bool,
    pub show_alignment: bool,
    pub show_hits_per_target_list: bool,
    pub show_tax_abundances: bool,
    /// Estimate and report abundance at this rank.
    pub abundance_rank: Option<Rank>,
}

/// Which per-read mapping lines are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapViewMode {
    None,
    MappedOnly,
    #[default]
    All,
}

/// Separator and wrapper tokens of the tabular output.
#[derive(Debug, Clone)]
pub struct FormatTokens {
    pub comment: String,
    pub none: String,
    pub column: String,
    pub tax_separator: String,
    pub rank_suffix: String,
    pub taxid_prefix: String,
    pub taxid_suffix: String,
}

impl Default for FormatTokens {
    fn default() -> Self {
        Self {
            comment: "# ".into(),
            none: "--".into(),
            column: "\t|\t".into(),
            tax_separator: ",".into(),
            rank_suffix: ":".into(),
            taxid_prefix: "(".into(),
            taxid_suffix: ")".into(),
        }
    }
}

/// How taxa are rendered in output columns.
#[derive(Debug, Clone, Copy)]
pub struct TaxonPrintStyle {
    pub show_rank: bool,
    pub show_id: bool,
}

impl Default for TaxonPrintStyle {
    fn default() -> Self {
        Self {
            show_rank: true,
            show_id: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputFormatting {
    pub map_view_mode: MapViewMode,
    pub show_query_ids: bool,
    pub tokens: FormatTokens,
    pub taxon_style: TaxonPrintStyle,
}

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub format: OutputFormatting,
    pub analysis: AnalysisOptions,
    pub evaluate: EvaluationOptions,
    pub show_errors: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceOptions {
    pub num_threads: usize,
    pub batch_size: usize,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size: 4096,
        }
    }
}

/// How input reads are grouped into queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingMode {
    #[default]
    None,
    /// Consecutive file pairs hold mates 1 and 2.
    Files,
    /// Consecutive records within one file are mates.
    Sequences,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub classify: ClassificationOptions,
    pub output: OutputOptions,
    pub performance: PerformanceOptions,
    pub pairing: PairingMode,
}

impl QueryOptions {
    /// Whether any consumer needs the per-taxon count side channel.
    pub fn make_tax_counts(&self) -> bool {
        self.output.analysis.show_tax_abundances
            || self.output.analysis.abundance_rank.is_some()
    }

    /// Reject inconsistent configurations before any work starts.
    pub fn validate(&self) -> Result<()> {
        let c = &self.classify;
        if c.hits_min < 1 {
            bail!("hits-min must be at least 1");
        }
        if !(0.0..=1.0).contains(&c.hits_diff_fraction) {
            bail!("hits-diff fraction must be within [0,1]");
        }
        if !(0.0..=1.0).contains(&c.cov_percentile) {
            bail!("coverage percentile must be within [0,1]");
        }
        if c.max_candidates_per_query < 1 {
            bail!("max-candidates must be at least 1");
        }
        if c.lowest_rank > c.highest_rank {
            bail!(
                "lowest rank ({}) must not exceed highest rank ({})",
                c.lowest_rank,
                c.highest_rank
            );
        }
        if self.performance.num_threads < 1 {
            bail!("thread count must be at least 1");
        }
        if self.performance.batch_size < 1 {
            bail!("batch size must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(QueryOptions::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let mut opt = QueryOptions::default();
        opt.classify.hits_diff_fraction = 1.5;
        assert!(opt.validate().is_err());

        let mut opt = QueryOptions::default();
        opt.classify.cov_percentile = -0.1;
        assert!(opt.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_ranks() {
        let mut opt = QueryOptions::default();
        opt.classify.lowest_rank = Rank::Genus;
        opt.classify.highest_rank = Rank::Species;
        assert!(opt.validate().is_err());
    }
}
