//! Cross-read hit index: target → per-query window-hit lists.
//!
//! Built across the whole first pass (each worker fills a partial index
//! that is merged in at batch finalization), consulted by the coverage
//! filter, and frozen during re-classification. `sort_match_lists` makes
//! the per-target report reproducible.

use std::collections::HashMap;

use crate::index::{Location, TargetId, WindowId};

use super::candidates::ClassificationCandidates;

/// Hit count of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHits {
    pub win: WindowId,
    pub hits: u32,
}

/// All window hits one query contributed to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatches {
    pub query_id: u64,
    /// Strictly increasing in `win`.
    pub window_hits: Vec<WindowHits>,
}

#[derive(Debug, Default)]
pub struct MatchesPerTarget {
    map: HashMap<TargetId, Vec<QueryMatches>>,
}

impl MatchesPerTarget {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn contains(&self, tgt: TargetId) -> bool {
        self.map.contains_key(&tgt)
    }

    pub fn get(&self, tgt: TargetId) -> Option<&[QueryMatches]> {
        self.map.get(&tgt).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &[QueryMatches])> {
        self.map.iter().map(|(&t, v)| (t, v.as_slice()))
    }

    /// Target ids in ascending order, for deterministic reporting.
    pub fn sorted_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self.map.keys().copied().collect();
        targets.sort_unstable();
        targets
    }

    pub fn erase(&mut self, tgt: TargetId) -> bool {
        self.map.remove(&tgt).is_some()
    }

    /// Record the hits of one query under every sufficiently strong
    /// candidate.
    ///
    /// For each candidate with at least `min_hits_per_candidate` hits the
    /// hit list is scanned within the candidate's window range and
    /// condensed to per-window counts.
    pub fn insert(
        &mut self,
        query_id: u64,
        locations: &[Location],
        candidates: &ClassificationCandidates,
        min_hits_per_candidate: u32,
    ) {
        for cand in candidates {
            if cand.tax.is_none() || cand.hits < min_hits_per_candidate {
                continue;
            }
            let first = Location {
                tgt: cand.tgt,
                win: cand.pos.beg,
            };
            let start = locations.partition_point(|l| *l < first);

            let mut window_hits: Vec<WindowHits> = Vec::new();
            for l in &locations[start..] {
                if l.tgt != cand.tgt || l.win > cand.pos.end {
                    break;
                }
                match window_hits.last_mut() {
                    Some(last) if last.win == l.win => last.hits += 1,
                    _ => window_hits.push(WindowHits {
                        win: l.win,
                        hits: 1,
                    }),
                }
            }
            if !window_hits.is_empty() {
                self.map.entry(cand.tgt).or_default().push(QueryMatches {
                    query_id,
                    window_hits,
                });
            }
        }
    }

    /// Insert a pre-built entry; used by tests and report plumbing.
    pub fn insert_raw(&mut self, tgt: TargetId, query_id: u64, window_hits: Vec<(WindowId, u32)>) {
        self.map.entry(tgt).or_default().push(QueryMatches {
            query_id,
            window_hits: window_hits
                .into_iter()
                .map(|(win, hits)| WindowHits { win, hits })
                .collect(),
        });
    }

    /// Move all entries of `other` into this index (per-target list
    /// concatenation). Called once per finalized batch.
    pub fn merge(&mut self, other: MatchesPerTarget) {
        for (tgt, mut entries) in other.map {
            self.map.entry(tgt).or_default().append(&mut entries);
        }
    }

    /// Sort every per-target list by (first window, last window, query id).
    pub fn sort_match_lists(&mut self) {
        for entries in self.map.values_mut() {
            entries.sort_by(|a, b| {
                let fa = a.window_hits.first().map(|w| w.win);
                let fb = b.window_hits.first().map(|w| w.win);
                let la = a.window_hits.last().map(|w| w.win);
                let lb = b.window_hits.last().map(|w| w.win);
                fa.cmp(&fb)
                    .then(la.cmp(&lb))
                    .then(a.query_id.cmp(&b.query_id))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::candidates::{Candidate, WindowRange};

    fn loc(tgt: TargetId, win: WindowId) -> Location {
        Location { tgt, win }
    }

    fn cand(tgt: TargetId, hits: u32, beg: WindowId, end: WindowId) -> Candidate {
        Candidate {
            tgt,
            tax: Some(crate::taxonomy::TaxonId(tgt)),
            hits,
            pos: WindowRange::new(beg, end),
        }
    }

    #[test]
    fn test_insert_counts_per_window() {
        let mut mpt = MatchesPerTarget::default();
        let locs = vec![loc(3, 1), loc(3, 1), loc(3, 2), loc(3, 5), loc(4, 0)];
        let cands = ClassificationCandidates::from_vec(vec![cand(3, 4, 1, 2)]);
        mpt.insert(7, &locs, &cands, 0);

        let entries = mpt.get(3).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query_id, 7);
        assert_eq!(
            entries[0].window_hits,
            vec![
                WindowHits { win: 1, hits: 2 },
                WindowHits { win: 2, hits: 1 }
            ]
        );
    }

    #[test]
    fn test_insert_window_hits_strictly_increasing() {
        let mut mpt = MatchesPerTarget::default();
        let locs: Vec<Location> =
            [0, 0, 1, 2, 2, 2, 4, 7, 7].iter().map(|&w| loc(1, w)).collect();
        let cands = ClassificationCandidates::from_vec(vec![cand(1, 9, 0, 7)]);
        mpt.insert(1, &locs, &cands, 0);
        let wins: Vec<WindowId> = mpt.get(1).unwrap()[0]
            .window_hits
            .iter()
            .map(|w| w.win)
            .collect();
        assert!(wins.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_insert_skips_weak_candidates_not_the_rest() {
        let mut mpt = MatchesPerTarget::default();
        let locs = vec![loc(1, 0), loc(2, 0), loc(2, 0)];
        let cands = ClassificationCandidates::from_vec(vec![
            cand(2, 2, 0, 0),
            cand(1, 1, 0, 0),
        ]);
        mpt.insert(1, &locs, &cands, 2);
        assert!(mpt.contains(2));
        assert!(!mpt.contains(1));
    }

    #[test]
    fn test_candidate_without_matching_locations_does_not_abort() {
        let mut mpt = MatchesPerTarget::default();
        // candidate for target 9 finds nothing, candidate for 1 must still
        // be recorded
        let locs = vec![loc(1, 0)];
        let cands = ClassificationCandidates::from_vec(vec![
            cand(9, 5, 100, 101),
            cand(1, 1, 0, 0),
        ]);
        mpt.insert(1, &locs, &cands, 0);
        assert!(mpt.contains(1));
        assert!(!mpt.contains(9));
    }

    #[test]
    fn test_merge_concatenates_lists() {
        let mut a = MatchesPerTarget::default();
        a.insert_raw(1, 1, vec![(0, 1)]);
        let mut b = MatchesPerTarget::default();
        b.insert_raw(1, 2, vec![(3, 2)]);
        b.insert_raw(5, 3, vec![(0, 1)]);
        a.merge(b);
        assert_eq!(a.get(1).unwrap().len(), 2);
        assert_eq!(a.get(5).unwrap().len(), 1);
    }

    #[test]
    fn test_sort_match_lists_order() {
        let mut mpt = MatchesPerTarget::default();
        mpt.insert_raw(1, 9, vec![(2, 1), (4, 1)]);
        mpt.insert_raw(1, 3, vec![(0, 1), (5, 1)]);
        mpt.insert_raw(1, 2, vec![(0, 1), (3, 1)]);
        mpt.insert_raw(1, 1, vec![(0, 1), (3, 1)]);
        mpt.sort_match_lists();
        let ids: Vec<u64> = mpt.get(1).unwrap().iter().map(|e| e.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 9]);
    }
}
