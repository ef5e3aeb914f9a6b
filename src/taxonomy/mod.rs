//! Taxonomic ranks and the taxonomy arena.

pub mod rank;
pub mod tree;

pub use rank::{NUM_RANKS, Rank};
pub use tree::{RankedLineage, TargetSource, Taxon, TaxonId, Taxonomy};
