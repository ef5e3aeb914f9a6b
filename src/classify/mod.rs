//! The classification engine.
//!
//! Per-read flow: database hit locations are aggregated into candidates
//! (`candidates`) and reduced to a taxonomic consensus
//! (`classify_candidates`). Cross-read flow: the per-target hit index
//! (`matches_per_target`) feeds the coverage filter (`coverage`), after
//! which retained reads are re-classified by the pipeline's second pass.
//! Per-taxon counts accumulate on the side and can be redistributed over
//! the taxonomy (`abundance`).

pub mod abundance;
pub mod candidates;
pub mod coverage;
pub mod evaluate;
pub mod matches_per_target;
pub mod options;
pub mod pipeline;
pub mod statistics;

pub use abundance::{TaxonCountKey, TaxonCountMap, estimate_abundance};
pub use candidates::{Candidate, CandidateRules, ClassificationCandidates, WindowRange};
pub use matches_per_target::MatchesPerTarget;
pub use options::{
    AnalysisOptions, ClassificationOptions, EvaluationOptions, FormatTokens, MapViewMode,
    OutputFormatting, OutputOptions, PairingMode, PerformanceOptions, QueryOptions,
    TaxonPrintStyle,
};
pub use pipeline::{ClassificationResults, map_queries_to_targets};
pub use statistics::ClassificationStatistics;

use crate::index::{Database, Location};
use crate::taxonomy::TaxonId;

/// One input read (or read pair) as seen by the classifier.
#[derive(Debug, Clone, Default)]
pub struct SequenceQuery {
    /// 1-based, monotonically increasing query number.
    pub id: u64,
    pub header: String,
    pub seq1: Vec<u8>,
    pub seq2: Vec<u8>,
}

impl SequenceQuery {
    pub fn is_empty(&self) -> bool {
        self.seq1.is_empty() && self.seq2.is_empty()
    }

    pub fn len(&self) -> usize {
        self.seq1.len() + self.seq2.len()
    }
}

/// Candidates plus the consensus taxon derived from them.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub candidates: ClassificationCandidates,
    pub best: Option<TaxonId>,
    pub ground_truth: Option<TaxonId>,
}

/// Generate candidates for one query from its sorted hit list.
pub fn make_classification_candidates(
    db: &Database,
    opt: &ClassificationOptions,
    query: &SequenceQuery,
    allhits: &[Location],
) -> ClassificationCandidates {
    let rules = CandidateRules::for_query(
        opt,
        db.target_sketcher().window_stride(),
        query.len(),
    );
    ClassificationCandidates::generate(db, allhits, &rules)
}

/// Reduce a candidate list to a single taxon.
///
/// Starting from the top candidate, every further candidate whose hits
/// exceed the difference threshold widens the consensus to the ranked LCA.
/// The LCA lives on the top candidate's lineage, so its rank can only grow;
/// once it would exceed `highest_rank` the query is unclassifiable and the
/// scan stops early.
pub fn classify_candidates(
    db: &Database,
    opt: &ClassificationOptions,
    cand: &ClassificationCandidates,
) -> Option<TaxonId> {
    let top = cand.first()?;
    let mut lca = top.tax?;

    if top.hits < opt.hits_min {
        return None;
    }

    let threshold = if top.hits > opt.hits_min {
        (top.hits - opt.hits_min) as f32 * opt.hits_diff_fraction
    } else {
        0.0
    };

    for c in cand.iter().skip(1) {
        if (c.hits as f32) <= threshold {
            break;
        }
        lca = db.ranked_lca_of_targets(top.tgt, c.tgt, db.rank(lca))?;
        if db.rank(lca) > opt.highest_rank {
            return None;
        }
    }

    (db.rank(lca) <= opt.highest_rank).then_some(lca)
}

/// Classify one query from its hit list.
pub fn classify(
    db: &Database,
    opt: &ClassificationOptions,
    query: &SequenceQuery,
    allhits: &[Location],
) -> Classification {
    let candidates = make_classification_candidates(db, opt, query, allhits);
    let best = classify_candidates(db, opt, &candidates);
    Classification {
        candidates,
        best,
        ground_truth: None,
    }
}

/// Re-derive a classification using only targets that survived filtering.
pub fn update_classification(
    db: &Database,
    opt: &ClassificationOptions,
    cls: &mut Classification,
    tgt_matches: &MatchesPerTarget,
) {
    cls.candidates.retain(|c| tgt_matches.contains(c.tgt));
    cls.best = classify_candidates(db, opt, &cls.candidates);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DEFAULT_MAX_LOCATIONS_PER_FEATURE, Sketcher, TargetId};
    use crate::taxonomy::{Rank, Taxonomy};

    /// Genus G over species A (target 0) and B (target 1); genus H with
    /// species C (target 2).
    fn test_db() -> Database {
        let mut tax = Taxonomy::new();
        tax.emplace(1, 1, Rank::Root, "root");
        tax.emplace(2, 1, Rank::Domain, "D");
        tax.emplace(10, 2, Rank::Genus, "G");
        tax.emplace(11, 2, Rank::Genus, "H");
        tax.emplace(101, 10, Rank::Species, "A");
        tax.emplace(102, 10, Rank::Species, "B");
        tax.emplace(103, 11, Rank::Species, "C");
        let mut db = Database::new(
            Sketcher::new(8, 8, 128, 128),
            tax,
            DEFAULT_MAX_LOCATIONS_PER_FEATURE,
        );
        db.add_target(b"", "tA", 101, "refs.fa", 1);
        db.add_target(b"", "tB", 102, "refs.fa", 2);
        db.add_target(b"", "tC", 103, "refs.fa", 3);
        db
    }

    fn cand(db: &Database, tgt: TargetId, hits: u32) -> Candidate {
        Candidate {
            tgt,
            tax: Some(db.taxon_of_target(tgt)),
            hits,
            pos: WindowRange::new(0, 0),
        }
    }

    fn opts() -> ClassificationOptions {
        ClassificationOptions {
            hits_min: 2,
            hits_diff_fraction: 0.5,
            ..ClassificationOptions::default()
        }
    }

    #[test]
    fn test_empty_candidates_unclassified() {
        let db = test_db();
        let cands = ClassificationCandidates::default();
        assert_eq!(classify_candidates(&db, &opts(), &cands), None);
    }

    #[test]
    fn test_top_hits_below_min_unclassified() {
        let db = test_db();
        let cands = ClassificationCandidates::from_vec(vec![cand(&db, 0, 1)]);
        assert_eq!(classify_candidates(&db, &opts(), &cands), None);
    }

    #[test]
    fn test_single_candidate_classifies_to_sequence() {
        let db = test_db();
        let cands = ClassificationCandidates::from_vec(vec![cand(&db, 0, 10)]);
        let best = classify_candidates(&db, &opts(), &cands).unwrap();
        assert_eq!(best, db.taxon_of_target(0));
    }

    #[test]
    fn test_close_siblings_resolve_to_genus() {
        let db = test_db();
        // both above threshold (10-2)*0.5 = 4
        let cands =
            ClassificationCandidates::from_vec(vec![cand(&db, 0, 10), cand(&db, 1, 10)]);
        let best = classify_candidates(&db, &opts(), &cands).unwrap();
        assert_eq!(best, db.taxon_with_id(10).unwrap());
        assert_eq!(db.rank(best), Rank::Genus);
    }

    #[test]
    fn test_suppressed_runner_up_keeps_species() {
        let db = test_db();
        // threshold 4, runner-up at 3 is ignored
        let cands =
            ClassificationCandidates::from_vec(vec![cand(&db, 0, 10), cand(&db, 1, 3)]);
        let best = classify_candidates(&db, &opts(), &cands).unwrap();
        assert_eq!(best, db.taxon_of_target(0));
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let db = test_db();
        // hits == threshold never widens the consensus
        let cands =
            ClassificationCandidates::from_vec(vec![cand(&db, 0, 10), cand(&db, 1, 4)]);
        let best = classify_candidates(&db, &opts(), &cands).unwrap();
        assert_eq!(best, db.taxon_of_target(0));
    }

    #[test]
    fn test_highest_rank_cap_returns_unclassified() {
        let db = test_db();
        let opt = ClassificationOptions {
            highest_rank: Rank::Genus,
            ..opts()
        };
        // A and C only share the domain, above the genus cap
        let cands =
            ClassificationCandidates::from_vec(vec![cand(&db, 0, 10), cand(&db, 2, 10)]);
        assert_eq!(classify_candidates(&db, &opt, &cands), None);
    }

    #[test]
    fn test_consensus_rank_is_monotone() {
        let db = test_db();
        let opt = ClassificationOptions {
            highest_rank: Rank::Domain,
            ..opts()
        };
        // sibling then cousin: genus first, then domain
        let cands = ClassificationCandidates::from_vec(vec![
            cand(&db, 0, 10),
            cand(&db, 1, 10),
            cand(&db, 2, 9),
        ]);
        let best = classify_candidates(&db, &opt, &cands).unwrap();
        assert_eq!(db.rank(best), Rank::Domain);
    }

    #[test]
    fn test_update_classification_drops_filtered_targets() {
        let db = test_db();
        let mut cls = Classification {
            candidates: ClassificationCandidates::from_vec(vec![
                cand(&db, 0, 10),
                cand(&db, 1, 10),
            ]),
            best: None,
            ground_truth: None,
        };
        let mut tgt_matches = MatchesPerTarget::default();
        tgt_matches.insert_raw(1, 1, vec![(0, 1)]);
        update_classification(&db, &opts(), &mut cls, &tgt_matches);
        assert_eq!(cls.candidates.len(), 1);
        assert_eq!(cls.candidates[0].tgt, 1);
        assert_eq!(cls.best, Some(db.taxon_of_target(1)));
    }
}
