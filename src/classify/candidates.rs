//! Hit aggregation: raw hit locations → ranked classification candidates.
//!
//! For every target that shows up in a query's hit list, the aggregator
//! finds the contiguous window range (bounded by `max_windows_in_range`)
//! that contains the most hits and emits one candidate per target. The
//! candidate list is kept sorted by hits, bounded, and optionally merged
//! across targets that share a low-rank ancestor.

use crate::index::{Database, Location, TargetId, WindowId};
use crate::taxonomy::{Rank, TaxonId};

use super::options::ClassificationOptions;

/// Inclusive range of window indices on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRange {
    pub beg: WindowId,
    pub end: WindowId,
}

impl WindowRange {
    pub fn new(beg: WindowId, end: WindowId) -> Self {
        Self { beg, end }
    }

    /// Smallest range containing both inputs.
    pub fn union(self, other: WindowRange) -> WindowRange {
        WindowRange {
            beg: self.beg.min(other.beg),
            end: self.end.max(other.end),
        }
    }
}

/// One classification candidate: a target with its best hit-window range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub tgt: TargetId,
    pub tax: Option<TaxonId>,
    pub hits: u32,
    pub pos: WindowRange,
}

/// Rules for turning a hit list into candidates.
#[derive(Debug, Clone, Copy)]
pub struct CandidateRules {
    /// Merge candidates whose LCA is at or below this rank.
    pub merge_below_rank: Rank,
    /// Maximum number of consecutive windows a candidate range may span.
    pub max_windows_in_range: u32,
    pub max_candidates: usize,
}

impl Default for CandidateRules {
    fn default() -> Self {
        Self {
            merge_below_rank: Rank::Sequence,
            max_windows_in_range: 3,
            max_candidates: 2,
        }
    }
}

impl CandidateRules {
    /// Derive rules for one query: the window span covers the whole
    /// (possibly paired) read or the configured maximum insert size,
    /// whichever is larger.
    pub fn for_query(
        opt: &ClassificationOptions,
        window_stride: u32,
        query_len: usize,
    ) -> Self {
        let span = query_len.max(opt.insert_size_max);
        Self {
            merge_below_rank: opt.lowest_rank,
            max_windows_in_range: 2 + (span / window_stride as usize) as u32,
            max_candidates: opt.max_candidates_per_query,
        }
    }
}

/// Bounded, hits-descending list of candidates for one query.
#[derive(Debug, Clone, Default)]
pub struct ClassificationCandidates {
    list: Vec<Candidate>,
}

impl ClassificationCandidates {
    /// Aggregate a sorted hit-location list into candidates.
    ///
    /// `locations` must be sorted by `(target, window)`; an empty list
    /// yields an empty candidate set.
    pub fn generate(db: &Database, locations: &[Location], rules: &CandidateRules) -> Self {
        let mut builder = CandidateListBuilder::new(rules.max_candidates);

        let mut run_start = 0usize;
        for i in 0..locations.len() {
            let end_of_run =
                i + 1 == locations.len() || locations[i + 1].tgt != locations[i].tgt;
            if !end_of_run {
                continue;
            }
            let run = &locations[run_start..=i];
            run_start = i + 1;

            let cand = best_window_range(run, rules.max_windows_in_range);
            let cand = Candidate {
                tax: Some(db.taxon_of_target(cand.tgt)),
                ..cand
            };
            builder.insert(db, rules, cand);
        }

        Self {
            list: builder.finish(),
        }
    }

    pub fn from_vec(list: Vec<Candidate>) -> Self {
        Self { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn first(&self) -> Option<&Candidate> {
        self.list.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.list.iter()
    }

    /// Drop candidates that fail the predicate; used by the second pass to
    /// discard targets removed by the coverage filter.
    pub fn retain<F: FnMut(&Candidate) -> bool>(&mut self, f: F) {
        self.list.retain(f);
    }
}

impl std::ops::Index<usize> for ClassificationCandidates {
    type Output = Candidate;

    fn index(&self, i: usize) -> &Candidate {
        &self.list[i]
    }
}

impl<'a> IntoIterator for &'a ClassificationCandidates {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

/// Best contiguous window range for one target run of the hit list.
///
/// Two-pointer sweep: the first maximal window wins, so the result does not
/// depend on traversal accidents.
fn best_window_range(run: &[Location], max_windows: u32) -> Candidate {
    debug_assert!(!run.is_empty());
    let tgt = run[0].tgt;

    let mut best_hits = 0u32;
    let mut best = WindowRange::new(run[0].win, run[0].win);
    let mut j = 0usize;
    for i in 0..run.len() {
        if j < i {
            j = i;
        }
        while j < run.len() && run[j].win - run[i].win < max_windows {
            j += 1;
        }
        let hits = (j - i) as u32;
        if hits > best_hits {
            best_hits = hits;
            best = WindowRange::new(run[i].win, run[j - 1].win);
        }
    }

    Candidate {
        tgt,
        tax: None,
        hits: best_hits,
        pos: best,
    }
}

/// Bounded insertion-sorted candidate list. For merged candidates the hits
/// of the representative target are tracked separately so a later, stronger
/// target can take over the representative slot.
struct CandidateListBuilder {
    entries: Vec<(Candidate, u32)>,
    max_candidates: usize,
}

impl CandidateListBuilder {
    fn new(max_candidates: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_candidates + 1),
            max_candidates: max_candidates.max(1),
        }
    }

    fn insert(&mut self, db: &Database, rules: &CandidateRules, cand: Candidate) {
        if rules.merge_below_rank > Rank::Sequence {
            let mergeable = self.entries.iter().position(|(e, _)| {
                let lca_rank = db
                    .ranked_lca_of_targets(e.tgt, cand.tgt, Rank::Sequence)
                    .map(|l| db.rank(l));
                matches!(lca_rank, Some(r) if r <= rules.merge_below_rank)
            });
            if let Some(i) = mergeable {
                let entry = &mut self.entries[i];
                entry.0.hits += cand.hits;
                entry.0.pos = entry.0.pos.union(cand.pos);
                if cand.hits > entry.1 {
                    entry.0.tgt = cand.tgt;
                    entry.0.tax = cand.tax;
                    entry.1 = cand.hits;
                }
                self.resort();
                return;
            }
        }

        let pos = self
            .entries
            .iter()
            .position(|(e, _)| {
                cand.hits > e.hits || (cand.hits == e.hits && cand.tgt < e.tgt)
            })
            .unwrap_or(self.entries.len());
        if pos < self.max_candidates {
            self.entries.insert(pos, (cand, cand.hits));
            self.entries.truncate(self.max_candidates);
        }
    }

    fn resort(&mut self) {
        self.entries
            .sort_by(|(a, _), (b, _)| b.hits.cmp(&a.hits).then(a.tgt.cmp(&b.tgt)));
    }

    fn finish(self) -> Vec<Candidate> {
        self.entries.into_iter().map(|(c, _)| c).collect()
    }
}
