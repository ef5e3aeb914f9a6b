//! Per-rank classification statistics.
//!
//! Counters are plain integers: workers accumulate into a private copy per
//! batch and the pipeline merges whole batches on its serialized path, so
//! no per-read synchronization is needed.

use crate::taxonomy::{NUM_RANKS, Rank};

/// Confusion counts of the database-coverage evaluation at one rank.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoverageCounts {
    pub true_pos: u64,
    pub false_pos: u64,
    pub true_neg: u64,
    pub false_neg: u64,
}

/// Aggregated per-rank counters over all evaluated queries.
///
/// `assigned` histograms the rank each query was classified on
/// (`Rank::None` slot = unclassified). `known` and `correct` are only
/// filled in precision mode: the rank the ground truth sits on, and the
/// lowest rank on which assignment and truth agree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassificationStatistics {
    assigned: [u64; NUM_RANKS],
    known: [u64; NUM_RANKS],
    correct: [u64; NUM_RANKS],
    coverage: [CoverageCounts; NUM_RANKS],
}

impl ClassificationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(rank: Option<Rank>) -> usize {
        rank.unwrap_or(Rank::None).index()
    }

    /// Record a classification without ground truth.
    pub fn assign(&mut self, assigned: Option<Rank>) {
        self.assigned[Self::slot(assigned)] += 1;
    }

    /// Record a classification together with its ground truth comparison.
    pub fn assign_known_correct(
        &mut self,
        assigned: Option<Rank>,
        known: Option<Rank>,
        lowest_correct: Option<Rank>,
    ) {
        self.assign(assigned);
        self.known[Self::slot(known)] += 1;
        self.correct[Self::slot(lowest_correct)] += 1;
    }

    pub fn count_coverage_true_pos(&mut self, rank: Rank) {
        self.coverage[rank.index()].true_pos += 1;
    }

    pub fn count_coverage_false_pos(&mut self, rank: Rank) {
        self.coverage[rank.index()].false_pos += 1;
    }

    pub fn count_coverage_true_neg(&mut self, rank: Rank) {
        self.coverage[rank.index()].true_neg += 1;
    }

    pub fn count_coverage_false_neg(&mut self, rank: Rank) {
        self.coverage[rank.index()].false_neg += 1;
    }

    /// Fold another batch of counters into this one.
    pub fn merge(&mut self, other: &ClassificationStatistics) {
        for i in 0..NUM_RANKS {
            self.assigned[i] += other.assigned[i];
            self.known[i] += other.known[i];
            self.correct[i] += other.correct[i];
            self.coverage[i].true_pos += other.coverage[i].true_pos;
            self.coverage[i].false_pos += other.coverage[i].false_pos;
            self.coverage[i].true_neg += other.coverage[i].true_neg;
            self.coverage[i].false_neg += other.coverage[i].false_neg;
        }
    }

    pub fn total(&self) -> u64 {
        self.assigned.iter().sum()
    }

    pub fn unclassified(&self) -> u64 {
        self.assigned[Rank::None.index()]
    }

    pub fn classified(&self) -> u64 {
        self.total() - self.unclassified()
    }

    pub fn assigned_at(&self, rank: Rank) -> u64 {
        self.assigned[rank.index()]
    }

    pub fn known_at(&self, rank: Rank) -> u64 {
        self.known[rank.index()]
    }

    pub fn correct_at(&self, rank: Rank) -> u64 {
        self.correct[rank.index()]
    }

    /// Queries whose lowest correct rank is at or below `rank`.
    pub fn correct_at_or_below(&self, rank: Rank) -> u64 {
        (0..=rank.index()).map(|i| self.correct[i]).sum()
    }

    pub fn coverage_at(&self, rank: Rank) -> CoverageCounts {
        self.coverage[rank.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_histograms() {
        let mut s = ClassificationStatistics::new();
        s.assign(Some(Rank::Species));
        s.assign(Some(Rank::Species));
        s.assign(Some(Rank::Genus));
        s.assign(None);
        assert_eq!(s.total(), 4);
        assert_eq!(s.classified(), 3);
        assert_eq!(s.unclassified(), 1);
        assert_eq!(s.assigned_at(Rank::Species), 2);
        assert_eq!(s.assigned_at(Rank::Genus), 1);
    }

    #[test]
    fn test_known_correct_counters() {
        let mut s = ClassificationStatistics::new();
        s.assign_known_correct(Some(Rank::Species), Some(Rank::Species), Some(Rank::Species));
        s.assign_known_correct(Some(Rank::Species), Some(Rank::Species), Some(Rank::Genus));
        s.assign_known_correct(None, Some(Rank::Species), None);
        assert_eq!(s.known_at(Rank::Species), 3);
        assert_eq!(s.correct_at(Rank::Species), 1);
        assert_eq!(s.correct_at_or_below(Rank::Genus), 2);
        assert_eq!(s.unclassified(), 1);
    }

    #[test]
    fn test_merge_adds_all_counters() {
        let mut a = ClassificationStatistics::new();
        a.assign(Some(Rank::Genus));
        a.count_coverage_true_pos(Rank::Genus);
        let mut b = ClassificationStatistics::new();
        b.assign(Some(Rank::Genus));
        b.assign(None);
        b.count_coverage_true_pos(Rank::Genus);
        b.count_coverage_false_neg(Rank::Species);
        a.merge(&b);
        assert_eq!(a.total(), 3);
        assert_eq!(a.assigned_at(Rank::Genus), 2);
        assert_eq!(a.coverage_at(Rank::Genus).true_pos, 2);
        assert_eq!(a.coverage_at(Rank::Species).false_neg, 1);
    }
}
