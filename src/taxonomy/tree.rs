//! The taxonomy arena.
//!
//! All taxa live in one flat vector owned by the database; everything else
//! refers to them through `TaxonId` indices. Parent links are stored as
//! external taxids and resolved through a lookup map, so a partially loaded
//! taxonomy (parents missing from the dump) degrades to shorter lineages
//! instead of dangling references.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rank::{NUM_RANKS, Rank};

/// Index of a taxon in the arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaxonId(pub u32);

/// Origin of a `Sequence`-rank taxon: which reference file and record it
/// came from, and how many sketch windows the target has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSource {
    pub filename: String,
    /// 1-based record index within `filename`.
    pub index: u32,
    pub windows: u32,
}

/// One node of the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxon {
    /// External (e.g. NCBI) taxid. Sequence-rank taxa get synthetic negative
    /// ids so they never collide with dump ids.
    pub taxid: i64,
    /// External taxid of the parent; the root points at itself.
    pub parent: i64,
    pub name: String,
    pub rank: Rank,
    /// Present only for `Sequence`-rank taxa.
    pub source: Option<TargetSource>,
}

/// Lineage of one taxon as a fixed array indexed by rank ordinal.
///
/// `lineage[r.index()]` is the ancestor at rank `r`, absent when the lineage
/// has no node at that rank.
pub type RankedLineage = [Option<TaxonId>; NUM_RANKS];

/// Arena of taxonomy nodes with taxid lookup and lineage queries.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    taxa: Vec<Taxon>,
    by_taxid: HashMap<i64, TaxonId>,
    /// One lineage per taxon, filled by `update_cached_lineages`.
    #[serde(skip)]
    cached_lineages: Vec<RankedLineage>,
}

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    /// Insert a taxon; an existing node with the same taxid is replaced only
    /// in the lookup map, never removed from the arena.
    pub fn emplace(&mut self, taxid: i64, parent: i64, rank: Rank, name: &str) -> TaxonId {
        self.emplace_taxon(Taxon {
            taxid,
            parent,
            name: name.to_string(),
            rank,
            source: None,
        })
    }

    pub fn emplace_taxon(&mut self, taxon: Taxon) -> TaxonId {
        let id = TaxonId(self.taxa.len() as u32);
        self.by_taxid.insert(taxon.taxid, id);
        self.taxa.push(taxon);
        self.cached_lineages.clear();
        id
    }

    #[inline]
    pub fn taxon(&self, id: TaxonId) -> &Taxon {
        &self.taxa[id.0 as usize]
    }

    #[inline]
    pub fn rank(&self, id: TaxonId) -> Rank {
        self.taxon(id).rank
    }

    #[inline]
    pub fn name(&self, id: TaxonId) -> &str {
        &self.taxon(id).name
    }

    pub fn ids(&self) -> impl Iterator<Item = TaxonId> + '_ {
        (0..self.taxa.len() as u32).map(TaxonId)
    }

    /// Resolve an external taxid.
    pub fn taxon_with_id(&self, taxid: i64) -> Option<TaxonId> {
        self.by_taxid.get(&taxid).copied()
    }

    /// Parent node, absent for the root (self-parent) and for parents
    /// missing from the arena.
    pub fn parent(&self, id: TaxonId) -> Option<TaxonId> {
        let t = self.taxon(id);
        if t.parent == t.taxid {
            return None;
        }
        self.by_taxid.get(&t.parent).copied().filter(|&p| p != id)
    }

    /// Lowest ancestor (including `id` itself) whose rank is not `None`.
    pub fn next_ranked_ancestor(&self, id: TaxonId) -> Option<TaxonId> {
        let mut cur = Some(id);
        let mut steps = 0usize;
        while let Some(c) = cur {
            if self.rank(c) != Rank::None {
                return Some(c);
            }
            cur = self.parent(c);
            steps += 1;
            if steps > self.taxa.len() {
                break;
            }
        }
        None
    }

    fn compute_lineage(&self, id: TaxonId) -> RankedLineage {
        let mut lin: RankedLineage = [None; NUM_RANKS];
        let mut cur = Some(id);
        let mut steps = 0usize;
        while let Some(c) = cur {
            let r = self.rank(c);
            if r != Rank::None && lin[r.index()].is_none() {
                lin[r.index()] = Some(c);
            }
            cur = self.parent(c);
            steps += 1;
            if steps > self.taxa.len() {
                break;
            }
        }
        lin
    }

    /// Lineage of `id` as a rank-indexed array; served from the cache when
    /// `update_cached_lineages` has run.
    pub fn ranks(&self, id: TaxonId) -> RankedLineage {
        if let Some(lin) = self.cached_lineages.get(id.0 as usize) {
            *lin
        } else {
            self.compute_lineage(id)
        }
    }

    /// Precompute all lineages. Must not run concurrently with queries;
    /// the query pipeline calls this once up front when ground truth
    /// resolution is enabled.
    pub fn update_cached_lineages(&mut self) {
        self.cached_lineages = self
            .ids()
            .map(|id| self.compute_lineage(id))
            .collect();
    }

    /// Least common ancestor of `a` and `b` at rank `lowest` or above.
    pub fn ranked_lca_from(&self, a: TaxonId, b: TaxonId, lowest: Rank) -> Option<TaxonId> {
        let la = self.ranks(a);
        let lb = self.ranks(b);
        for i in lowest.index()..NUM_RANKS {
            if let (Some(x), Some(y)) = (la[i], lb[i]) {
                if x == y {
                    return Some(x);
                }
            }
        }
        None
    }

    /// Least common ancestor at any rank.
    pub fn ranked_lca(&self, a: TaxonId, b: TaxonId) -> Option<TaxonId> {
        self.ranked_lca_from(a, b, Rank::Sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// root -> genus G -> species A, B; A -> sequence seq_a.
    fn small_taxonomy() -> (Taxonomy, TaxonId, TaxonId, TaxonId, TaxonId) {
        let mut tax = Taxonomy::new();
        let _root = tax.emplace(1, 1, Rank::Root, "root");
        let g = tax.emplace(10, 1, Rank::Genus, "G");
        let a = tax.emplace(101, 10, Rank::Species, "A");
        let b = tax.emplace(102, 10, Rank::Species, "B");
        let seq_a = tax.emplace_taxon(Taxon {
            taxid: -1,
            parent: 101,
            name: "seq_a".into(),
            rank: Rank::Sequence,
            source: Some(TargetSource {
                filename: "refs.fa".into(),
                index: 1,
                windows: 100,
            }),
        });
        (tax, g, a, b, seq_a)
    }

    #[test]
    fn test_parent_walk_stops_at_root() {
        let (tax, g, a, _, _) = small_taxonomy();
        assert_eq!(tax.parent(a), Some(g));
        let root = tax.taxon_with_id(1).unwrap();
        assert_eq!(tax.parent(root), None);
    }

    #[test]
    fn test_next_ranked_ancestor_skips_unranked() {
        let mut tax = Taxonomy::new();
        tax.emplace(1, 1, Rank::Root, "root");
        tax.emplace(5, 1, Rank::None, "clade");
        let leaf = tax.emplace(6, 5, Rank::None, "subclade");
        let anc = tax.next_ranked_ancestor(leaf).unwrap();
        assert_eq!(tax.rank(anc), Rank::Root);
    }

    #[test]
    fn test_lineage_slots() {
        let (tax, g, a, _, seq_a) = small_taxonomy();
        let lin = tax.ranks(seq_a);
        assert_eq!(lin[Rank::Sequence.index()], Some(seq_a));
        assert_eq!(lin[Rank::Species.index()], Some(a));
        assert_eq!(lin[Rank::Genus.index()], Some(g));
        assert_eq!(lin[Rank::Family.index()], None);
    }

    #[test]
    fn test_ranked_lca_siblings() {
        let (tax, g, a, b, _) = small_taxonomy();
        assert_eq!(tax.ranked_lca(a, b), Some(g));
        assert_eq!(tax.ranked_lca_from(a, b, Rank::Genus), Some(g));
        assert_eq!(tax.ranked_lca(a, a), Some(a));
    }

    #[test]
    fn test_cached_lineages_match_computed() {
        let (mut tax, _, a, b, seq_a) = small_taxonomy();
        let before = (tax.ranks(seq_a), tax.ranks(a), tax.ranks(b));
        tax.update_cached_lineages();
        assert_eq!(before, (tax.ranks(seq_a), tax.ranks(a), tax.ranks(b)));
    }
}
