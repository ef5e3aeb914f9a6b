//! The reference database: feature multimap, target metadata, taxonomy.
//!
//! The database owns the taxonomy arena and the sketch index. Lookups answer
//! one question for the classifier: given a read, which `(target, window)`
//! locations share sketch features with it. Everything else here is
//! resolution of names/taxids to taxa and (de)serialization.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::taxonomy::{Rank, RankedLineage, TargetSource, Taxon, TaxonId, Taxonomy};

use super::sketch::{Feature, Sketcher};

/// Identifier of a reference target (a Sequence-rank taxon).
pub type TargetId = u32;

/// Index of a fixed-stride window within a target.
pub type WindowId = u32;

/// One database hit location. Ordering is `(tgt, win)`, the order in which
/// the classifier consumes hit lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Location {
    pub tgt: TargetId,
    pub win: WindowId,
}

/// Default cap on locations stored per feature; features more popular than
/// this carry almost no taxonomic signal.
pub const DEFAULT_MAX_LOCATIONS_PER_FEATURE: usize = 254;

#[derive(Debug, Serialize, Deserialize)]
pub struct Database {
    sketcher: Sketcher,
    taxonomy: Taxonomy,
    /// TargetId → its Sequence-rank taxon.
    targets: Vec<TaxonId>,
    name_to_target: HashMap<String, TargetId>,
    /// Accession without version suffix → target.
    similar_name_to_target: HashMap<String, TargetId>,
    features: HashMap<Feature, Vec<Location>>,
    max_locations_per_feature: usize,
    /// Taxa with at least one descendant target; rebuilt after load.
    #[serde(skip)]
    covered: HashSet<TaxonId>,
}

impl Database {
    pub fn new(sketcher: Sketcher, taxonomy: Taxonomy, max_locations_per_feature: usize) -> Self {
        Self {
            sketcher,
            taxonomy,
            targets: Vec::new(),
            name_to_target: HashMap::new(),
            similar_name_to_target: HashMap::new(),
            features: HashMap::new(),
            max_locations_per_feature: max_locations_per_feature.max(1),
            covered: HashSet::new(),
        }
    }

    pub fn target_sketcher(&self) -> &Sketcher {
        &self.sketcher
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        0..self.targets.len() as TargetId
    }

    #[inline]
    pub fn taxon_of_target(&self, tgt: TargetId) -> TaxonId {
        self.targets[tgt as usize]
    }

    /// Number of sketch windows of a target.
    pub fn windows(&self, tgt: TargetId) -> u32 {
        self.taxonomy
            .taxon(self.taxon_of_target(tgt))
            .source
            .as_ref()
            .map_or(0, |s| s.windows)
    }

    pub fn target_name(&self, tgt: TargetId) -> &str {
        self.taxonomy.name(self.taxon_of_target(tgt))
    }

    // ---- taxon resolution -------------------------------------------------

    pub fn taxon_with_name(&self, name: &str) -> Option<TaxonId> {
        self.name_to_target
            .get(name)
            .map(|&t| self.taxon_of_target(t))
    }

    /// Resolve a name ignoring a trailing `.N` version suffix.
    pub fn taxon_with_similar_name(&self, name: &str) -> Option<TaxonId> {
        let stripped = strip_version_suffix(name);
        self.similar_name_to_target
            .get(stripped)
            .map(|&t| self.taxon_of_target(t))
    }

    pub fn taxon_with_id(&self, taxid: i64) -> Option<TaxonId> {
        self.taxonomy.taxon_with_id(taxid)
    }

    pub fn taxon(&self, id: TaxonId) -> &Taxon {
        self.taxonomy.taxon(id)
    }

    pub fn rank(&self, id: TaxonId) -> Rank {
        self.taxonomy.rank(id)
    }

    pub fn next_ranked_ancestor(&self, id: TaxonId) -> Option<TaxonId> {
        self.taxonomy.next_ranked_ancestor(id)
    }

    pub fn ranks(&self, id: TaxonId) -> RankedLineage {
        self.taxonomy.ranks(id)
    }

    pub fn ranked_lca(&self, a: TaxonId, b: TaxonId) -> Option<TaxonId> {
        self.taxonomy.ranked_lca(a, b)
    }

    /// Least ancestor of two targets at rank `lowest` or above.
    pub fn ranked_lca_of_targets(
        &self,
        a: TargetId,
        b: TargetId,
        lowest: Rank,
    ) -> Option<TaxonId> {
        self.taxonomy
            .ranked_lca_from(self.taxon_of_target(a), self.taxon_of_target(b), lowest)
    }

    /// Whether the database holds any target descending from `tax`.
    pub fn covers(&self, tax: TaxonId) -> bool {
        self.covered.contains(&tax)
    }

    pub fn update_cached_lineages(&mut self) {
        self.taxonomy.update_cached_lineages();
    }

    // ---- construction -----------------------------------------------------

    /// Add one reference sequence as a new target.
    ///
    /// `assigned_taxid` links the target into the taxonomy; an id unknown to
    /// the taxonomy leaves the target's lineage at Sequence rank only.
    pub fn add_target(
        &mut self,
        seq: &[u8],
        name: &str,
        assigned_taxid: i64,
        filename: &str,
        record_index: u32,
    ) -> TargetId {
        let tgt = self.targets.len() as TargetId;
        let windows = self.sketcher.window_count(seq.len());

        // synthetic negative taxid, disjoint from dump ids
        let seq_taxid = -(tgt as i64) - 1;
        let tax = self.taxonomy.emplace_taxon(Taxon {
            taxid: seq_taxid,
            parent: assigned_taxid,
            name: name.to_string(),
            rank: Rank::Sequence,
            source: Some(TargetSource {
                filename: filename.to_string(),
                index: record_index,
                windows,
            }),
        });
        self.targets.push(tax);
        self.name_to_target.insert(name.to_string(), tgt);
        self.similar_name_to_target
            .insert(strip_version_suffix(name).to_string(), tgt);

        let cap = self.max_locations_per_feature;
        self.sketcher.for_each_window_sketch(seq, |win, sketch| {
            for &f in sketch {
                let locs = self.features.entry(f).or_default();
                if locs.len() < cap {
                    locs.push(Location { tgt, win });
                }
            }
        });

        self.mark_covered(tax);
        tgt
    }

    fn mark_covered(&mut self, tax: TaxonId) {
        let mut cur = Some(tax);
        while let Some(c) = cur {
            if !self.covered.insert(c) {
                break;
            }
            cur = self.taxonomy.parent(c);
        }
    }

    fn rebuild_covered(&mut self) {
        self.covered.clear();
        for tgt in 0..self.targets.len() {
            self.mark_covered(self.targets[tgt]);
        }
    }

    // ---- querying ---------------------------------------------------------

    /// All hit locations of a (possibly paired) read, sorted by
    /// `(target, window)`. Multiplicities are preserved: a feature shared by
    /// several query windows contributes several times.
    pub fn query_locations(&self, seq1: &[u8], seq2: &[u8]) -> Vec<Location> {
        let mut locations = Vec::new();
        let mut collect = |seq: &[u8]| {
            self.sketcher.for_each_window_sketch(seq, |_, sketch| {
                for f in sketch {
                    if let Some(locs) = self.features.get(f) {
                        locations.extend_from_slice(locs);
                    }
                }
            });
        };
        collect(seq1);
        if !seq2.is_empty() {
            collect(seq2);
        }
        locations.sort_unstable();
        locations
    }

    // ---- persistence ------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)
            .with_context(|| format!("failed to write database to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut db: Database = bincode::deserialize_from(reader)
            .with_context(|| format!("failed to read database {}", path.display()))?;
        db.rebuild_covered();
        info!(
            "database loaded: {} targets, {} features, {} taxa",
            db.num_targets(),
            db.num_features(),
            db.taxonomy.len(),
        );
        Ok(db)
    }
}

fn strip_version_suffix(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, ver)) if !ver.is_empty() && ver.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;

    fn test_db() -> Database {
        let mut tax = Taxonomy::new();
        tax.emplace(1, 1, Rank::Root, "root");
        tax.emplace(10, 1, Rank::Genus, "G");
        tax.emplace(101, 10, Rank::Species, "A");
        tax.emplace(102, 10, Rank::Species, "B");
        Database::new(Sketcher::new(16, 8, 32, 32), tax, DEFAULT_MAX_LOCATIONS_PER_FEATURE)
    }

    fn random_seq(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                b"ACGT"[(state >> 33) as usize % 4]
            })
            .collect()
    }

    #[test]
    fn test_add_target_links_taxonomy() {
        let mut db = test_db();
        let seq = random_seq(7, 96);
        let tgt = db.add_target(&seq, "tA.1", 101, "refs.fa", 1);
        let tax = db.taxon_of_target(tgt);
        assert_eq!(db.rank(tax), Rank::Sequence);
        let lin = db.ranks(tax);
        assert_eq!(
            lin[Rank::Species.index()],
            db.taxon_with_id(101),
        );
        assert_eq!(db.windows(tgt), 3);
    }

    #[test]
    fn test_query_finds_own_target() {
        let mut db = test_db();
        let seq_a = random_seq(1, 128);
        let seq_b = random_seq(2, 128);
        let ta = db.add_target(&seq_a, "tA.1", 101, "refs.fa", 1);
        db.add_target(&seq_b, "tB.1", 102, "refs.fa", 2);

        let hits = db.query_locations(&seq_a[..32], &[]);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|l| l.tgt == ta && l.win == 0));
        assert!(hits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_covers_marks_lineage() {
        let mut db = test_db();
        let seq = random_seq(3, 64);
        db.add_target(&seq, "tA.1", 101, "refs.fa", 1);
        assert!(db.covers(db.taxon_with_id(101).unwrap()));
        assert!(db.covers(db.taxon_with_id(10).unwrap()));
        assert!(!db.covers(db.taxon_with_id(102).unwrap()));
    }

    #[test]
    fn test_similar_name_lookup() {
        let mut db = test_db();
        let seq = random_seq(4, 64);
        db.add_target(&seq, "ACC_0001.2", 101, "refs.fa", 1);
        assert!(db.taxon_with_name("ACC_0001.2").is_some());
        assert!(db.taxon_with_name("ACC_0001.3").is_none());
        assert!(db.taxon_with_similar_name("ACC_0001.3").is_some());
        assert!(db.taxon_with_similar_name("ACC_0001").is_some());
    }
}
