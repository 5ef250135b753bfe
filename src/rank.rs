//! Code related to handling of taxonomic ranks
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A taxonomic rank. For example, a species or phylum.
///
/// We use this instead of a String/&str to allow stricter type-checking:
/// a rank that does not fall within the below categories (the ranks the
/// NCBI taxonomy uses) is rejected at parse time, so a `TaxRank` always
/// has a canonical lowercase form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxRank {
    Superkingdom,
    Kingdom,
    Subkingdom,
    Superphylum,
    Phylum,
    Subphylum,
    Superclass,
    Class,
    Subclass,
    Infraclass,
    Cohort,
    Superorder,
    Order,
    Suborder,
    Infraorder,
    Parvorder,
    Superfamily,
    Family,
    Subfamily,
    Tribe,
    Subtribe,
    Genus,
    Subgenus,
    #[serde(rename = "species group")]
    SpeciesGroup,
    #[serde(rename = "species subgroup")]
    SpeciesSubgroup,
    Species,
    Subspecies,
    Varietas,
    Forma,
    #[serde(rename = "no rank")]
    Unspecified,
}

impl TaxRank {
    /// The canonical lowercase rank string, as the NCBI taxonomy spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            TaxRank::Superkingdom => "superkingdom",
            TaxRank::Kingdom => "kingdom",
            TaxRank::Subkingdom => "subkingdom",
            TaxRank::Superphylum => "superphylum",
            TaxRank::Phylum => "phylum",
            TaxRank::Subphylum => "subphylum",
            TaxRank::Superclass => "superclass",
            TaxRank::Class => "class",
            TaxRank::Subclass => "subclass",
            TaxRank::Infraclass => "infraclass",
            TaxRank::Cohort => "cohort",
            TaxRank::Superorder => "superorder",
            TaxRank::Order => "order",
            TaxRank::Suborder => "suborder",
            TaxRank::Infraorder => "infraorder",
            TaxRank::Parvorder => "parvorder",
            TaxRank::Superfamily => "superfamily",
            TaxRank::Family => "family",
            TaxRank::Subfamily => "subfamily",
            TaxRank::Tribe => "tribe",
            TaxRank::Subtribe => "subtribe",
            TaxRank::Genus => "genus",
            TaxRank::Subgenus => "subgenus",
            TaxRank::SpeciesGroup => "species group",
            TaxRank::SpeciesSubgroup => "species subgroup",
            TaxRank::Species => "species",
            TaxRank::Subspecies => "subspecies",
            TaxRank::Varietas => "varietas",
            TaxRank::Forma => "forma",
            TaxRank::Unspecified => "no rank",
        }
    }
}

impl FromStr for TaxRank {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_ref() {
            "superkingdom" => Ok(TaxRank::Superkingdom),
            "kingdom" => Ok(TaxRank::Kingdom),
            "subkingdom" => Ok(TaxRank::Subkingdom),
            "superphylum" | "superphyla" => Ok(TaxRank::Superphylum),
            "phylum" | "phyla" => Ok(TaxRank::Phylum),
            "subphylum" | "subphyla" => Ok(TaxRank::Subphylum),
            "superclass" => Ok(TaxRank::Superclass),
            "class" => Ok(TaxRank::Class),
            "subclass" => Ok(TaxRank::Subclass),
            "infraclass" => Ok(TaxRank::Infraclass),
            "cohort" => Ok(TaxRank::Cohort),
            "superorder" => Ok(TaxRank::Superorder),
            "order" => Ok(TaxRank::Order),
            "suborder" => Ok(TaxRank::Suborder),
            "infraorder" => Ok(TaxRank::Infraorder),
            "parvorder" => Ok(TaxRank::Parvorder),
            "superfamily" => Ok(TaxRank::Superfamily),
            "family" => Ok(TaxRank::Family),
            "subfamily" => Ok(TaxRank::Subfamily),
            "tribe" => Ok(TaxRank::Tribe),
            "subtribe" => Ok(TaxRank::Subtribe),
            "genus" => Ok(TaxRank::Genus),
            "subgenus" => Ok(TaxRank::Subgenus),
            "species group" => Ok(TaxRank::SpeciesGroup),
            "species subgroup" => Ok(TaxRank::SpeciesSubgroup),
            "species" => Ok(TaxRank::Species),
            "subspecies" => Ok(TaxRank::Subspecies),
            "varietas" | "variety" => Ok(TaxRank::Varietas),
            "forma" => Ok(TaxRank::Forma),
            "no rank" => Ok(TaxRank::Unspecified),
            _ => Err(Error::UnrecognizedRank(s.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_str_round_trip() {
        for rank in [TaxRank::Species, TaxRank::Genus, TaxRank::Unspecified] {
            assert_eq!(TaxRank::from_str(rank.as_str()).unwrap(), rank);
        }
    }

    #[test]
    fn test_from_str_normalizes() {
        assert_eq!(TaxRank::from_str(" SPECIES ").unwrap(), TaxRank::Species);
        assert_eq!(TaxRank::from_str("Phyla").unwrap(), TaxRank::Phylum);
        assert!(TaxRank::from_str("quux").is_err());
    }
}
