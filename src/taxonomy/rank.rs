//! Taxonomic ranks as a total order.
//!
//! `Rank` is an ordinal over the full lineage ladder: `Sequence` (a single
//! reference sequence) is the lowest rank, `Domain` the highest named one,
//! and `None` sits above everything as the "unranked" sentinel. Comparisons
//! on `Rank` compare ordinals, so `Rank::Species < Rank::Genus` holds.

use serde::{Deserialize, Serialize};

/// Taxonomic rank ordinal, lowest (`Sequence`) to highest (`None`).
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Rank {
    Sequence = 0,
    Form,
    Variety,
    Subspecies,
    Species,
    Subgenus,
    Genus,
    Subtribe,
    Tribe,
    Subfamily,
    Family,
    Suborder,
    Order,
    Subclass,
    Class,
    Subphylum,
    Phylum,
    Subkingdom,
    Kingdom,
    Domain,
    Root,
    #[default]
    None,
}

/// Number of rank ordinals, including `Root` and `None`.
pub const NUM_RANKS: usize = Rank::None as usize + 1;

impl Rank {
    /// All ranks in ascending ordinal order.
    pub const ALL: [Rank; NUM_RANKS] = [
        Rank::Sequence,
        Rank::Form,
        Rank::Variety,
        Rank::Subspecies,
        Rank::Species,
        Rank::Subgenus,
        Rank::Genus,
        Rank::Subtribe,
        Rank::Tribe,
        Rank::Subfamily,
        Rank::Family,
        Rank::Suborder,
        Rank::Order,
        Rank::Subclass,
        Rank::Class,
        Rank::Subphylum,
        Rank::Phylum,
        Rank::Subkingdom,
        Rank::Kingdom,
        Rank::Domain,
        Rank::Root,
        Rank::None,
    ];

    /// Ordinal index of this rank.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Rank with the given ordinal index; out-of-range maps to `None`.
    #[inline]
    pub fn from_index(i: usize) -> Rank {
        if i < NUM_RANKS {
            Rank::ALL[i]
        } else {
            Rank::None
        }
    }

    /// The next rank up the ladder (`None` stays `None`).
    #[inline]
    pub fn next(self) -> Rank {
        Rank::from_index(self.index() + 1)
    }

    /// Canonical lowercase name used in taxonomy dumps and CLI arguments.
    pub fn name(self) -> &'static str {
        match self {
            Rank::Sequence => "sequence",
            Rank::Form => "form",
            Rank::Variety => "variety",
            Rank::Subspecies => "subspecies",
            Rank::Species => "species",
            Rank::Subgenus => "subgenus",
            Rank::Genus => "genus",
            Rank::Subtribe => "subtribe",
            Rank::Tribe => "tribe",
            Rank::Subfamily => "subfamily",
            Rank::Family => "family",
            Rank::Suborder => "suborder",
            Rank::Order => "order",
            Rank::Subclass => "subclass",
            Rank::Class => "class",
            Rank::Subphylum => "subphylum",
            Rank::Phylum => "phylum",
            Rank::Subkingdom => "subkingdom",
            Rank::Kingdom => "kingdom",
            Rank::Domain => "domain",
            Rank::Root => "root",
            Rank::None => "none",
        }
    }

    /// Parse a rank name as found in taxonomy dumps.
    ///
    /// Accepts the common NCBI aliases (`superkingdom` for domain,
    /// `strain`/`varietas` for variety and so on); anything unrecognized
    /// maps to `None`, matching how unranked nodes are treated.
    pub fn parse(s: &str) -> Rank {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequence" => Rank::Sequence,
            "form" | "forma" => Rank::Form,
            "variety" | "varietas" | "strain" => Rank::Variety,
            "subspecies" => Rank::Subspecies,
            "species" => Rank::Species,
            "subgenus" => Rank::Subgenus,
            "genus" => Rank::Genus,
            "subtribe" => Rank::Subtribe,
            "tribe" => Rank::Tribe,
            "subfamily" => Rank::Subfamily,
            "family" => Rank::Family,
            "suborder" => Rank::Suborder,
            "order" => Rank::Order,
            "subclass" => Rank::Subclass,
            "class" => Rank::Class,
            "subphylum" => Rank::Subphylum,
            "phylum" | "division" => Rank::Phylum,
            "subkingdom" => Rank::Subkingdom,
            "kingdom" => Rank::Kingdom,
            "domain" | "superkingdom" => Rank::Domain,
            "root" => Rank::Root,
            _ => Rank::None,
        }
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = Rank::parse(s);
        if r == Rank::None && !matches!(s.trim().to_ascii_lowercase().as_str(), "none" | "") {
            Err(format!("unknown rank: {s}"))
        } else {
            Ok(r)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_total_order() {
        assert!(Rank::Sequence < Rank::Species);
        assert!(Rank::Species < Rank::Genus);
        assert!(Rank::Genus < Rank::Domain);
        assert!(Rank::Domain < Rank::Root);
        assert!(Rank::Root < Rank::None);
    }

    #[test]
    fn test_rank_index_roundtrip() {
        for r in Rank::ALL {
            assert_eq!(Rank::from_index(r.index()), r);
        }
        assert_eq!(Rank::from_index(999), Rank::None);
    }

    #[test]
    fn test_rank_next() {
        assert_eq!(Rank::Sequence.next(), Rank::Form);
        assert_eq!(Rank::Domain.next(), Rank::Root);
        assert_eq!(Rank::None.next(), Rank::None);
    }

    #[test]
    fn test_rank_parse_aliases() {
        assert_eq!(Rank::parse("superkingdom"), Rank::Domain);
        assert_eq!(Rank::parse("Species"), Rank::Species);
        assert_eq!(Rank::parse("no rank"), Rank::None);
    }
}
