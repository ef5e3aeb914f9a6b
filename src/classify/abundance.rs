//! Per-taxon read counts and hierarchical abundance estimation.
//!
//! `TaxonCountMap` keeps taxa ordered root→leaf (rank descending), which is
//! what the estimator needs: the leaf→root weight pass is a reverse
//! iteration, the root→leaf redistribution a forward one. Counts switch to
//! fractional values once internal nodes are split over their children.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::index::Database;
use crate::taxonomy::{NUM_RANKS, Rank, TaxonId};

/// Map key ordering taxa root-first: higher rank before lower rank, ties by
/// arena id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonCountKey {
    pub rank: Rank,
    pub id: TaxonId,
}

impl TaxonCountKey {
    pub fn new(db: &Database, id: TaxonId) -> Self {
        Self {
            rank: db.rank(id),
            id,
        }
    }
}

impl Ord for TaxonCountKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for TaxonCountKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// taxon → (possibly fractional) read count, iterating root→leaf.
pub type TaxonCountMap = BTreeMap<TaxonCountKey, f64>;

/// Count one read for `tax`.
pub fn count_taxon(map: &mut TaxonCountMap, db: &Database, tax: TaxonId) {
    *map.entry(TaxonCountKey::new(db, tax)).or_insert(0.0) += 1.0;
}

/// Fold a batch's counts into the global map.
pub fn merge_counts(into: &mut TaxonCountMap, from: &TaxonCountMap) {
    for (&k, &v) in from {
        *into.entry(k).or_insert(0.0) += v;
    }
}

/// Estimate read abundance at `rank`.
///
/// Counts below `rank` are collapsed onto their first ancestor at or above
/// it. Counts sitting on internal nodes are then pushed down to the present
/// descendants, proportionally to each child's subtree weight. The total
/// count is conserved up to floating-point round-off.
pub fn estimate_abundance(db: &Database, map: &mut TaxonCountMap, rank: Rank) {
    if map.is_empty() {
        return;
    }

    // step 1: collapse taxa below the estimation rank
    if rank != Rank::Sequence {
        let below: Vec<TaxonCountKey> =
            map.keys().copied().filter(|k| k.rank < rank).collect();
        for key in below {
            let lineage = db.ranks(key.id);
            let ancestor = (rank.index()..NUM_RANKS).find_map(|i| lineage[i]);
            if let Some(anc) = ancestor {
                let count = map.remove(&key).unwrap_or(0.0);
                *map.entry(TaxonCountKey::new(db, anc)).or_insert(0.0) += count;
            }
        }
    }

    // step 2a: bottom-up subtree weights; each taxon reports to its closest
    // ancestor that is itself present in the map
    let mut weights: HashMap<TaxonId, f64> = map.keys().map(|k| (k.id, 0.0)).collect();
    let mut children: HashMap<TaxonId, Vec<TaxonId>> = HashMap::new();

    for (key, &count) in map.iter().rev() {
        let lineage = db.ranks(key.id);
        for i in (key.rank.index() + 1)..NUM_RANKS {
            let Some(parent) = lineage[i] else { continue };
            if parent != key.id && weights.contains_key(&parent) {
                let subtree = weights[&key.id] + count;
                *weights.get_mut(&parent).unwrap() += subtree;
                children.entry(parent).or_default().push(key.id);
                break;
            }
        }
    }

    // step 2b: distribute internal counts down, root first
    let order: Vec<TaxonCountKey> = map.keys().copied().collect();
    for key in order {
        let Some(kids) = children.get_mut(&key.id) else {
            continue;
        };
        kids.sort_unstable();
        let count = map[&key];
        let total_weight = weights[&key.id];
        if total_weight > 0.0 {
            for &child in kids.iter() {
                let child_key = TaxonCountKey::new(db, child);
                let share = count * (map[&child_key] + weights[&child]) / total_weight;
                *map.get_mut(&child_key).unwrap() += share;
            }
        } else {
            // all children weightless: split evenly so no counts are lost
            let share = count / kids.len() as f64;
            for &child in kids.iter() {
                *map.get_mut(&TaxonCountKey::new(db, child)).unwrap() += share;
            }
        }
        map.remove(&key);
    }
}
