//! The canonical taxonomy record attached to tree nodes and cached by
//! the resolver.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rank::TaxRank;

/// Identifier providers whose ids count as "appropriate" for direct
/// id-based lookups. Matched case-insensitively.
pub const RECOGNIZED_PROVIDERS: [&str; 3] = ["ncbi", "uniprot", "uniprotkb"];

/// Separator used when a lineage is flattened into a single cache key.
pub const LINEAGE_SEPARATOR: &str = ">";

/// An external identifier together with the database that issued it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdentifier {
    pub value: String,
    pub provider: String,
}

impl TaxIdentifier {
    pub fn new(value: impl Into<String>, provider: impl Into<String>) -> Self {
        TaxIdentifier {
            value: value.into(),
            provider: provider.into(),
        }
    }
}

/// A taxonomy record: the per-node taxonomic annotation and the unit
/// the cache and the external service trade in.
///
/// The `lineage` runs kingdom-ward root first and includes the taxon
/// itself as its last element; empty strings are dropped on set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Taxonomy {
    pub identifier: Option<TaxIdentifier>,
    pub scientific_name: String,
    pub code: String,
    pub common_name: String,
    pub rank: Option<TaxRank>,
    pub synonyms: Vec<String>,
    pub lineage: Vec<String>,
}

impl Taxonomy {
    /// A record carrying only a scientific name, the most common
    /// starting point for resolution.
    pub fn from_scientific_name(name: impl Into<String>) -> Self {
        Taxonomy {
            scientific_name: name.into(),
            ..Taxonomy::default()
        }
    }

    /// True iff the identifier is present, non-empty and issued by a
    /// recognized provider.
    pub fn has_appropriate_id(&self) -> bool {
        match &self.identifier {
            Some(id) if !id.value.is_empty() => {
                let provider = id.provider.to_lowercase();
                RECOGNIZED_PROVIDERS.contains(&provider.as_str())
            }
            _ => false,
        }
    }

    /// Set the rank from a free-form string. Unrecognized ranks leave
    /// the field empty rather than storing junk.
    pub fn set_rank(&mut self, rank: &str) {
        self.rank = TaxRank::from_str(rank).ok();
    }

    /// Append a synonym unless it is already present.
    pub fn add_synonym(&mut self, synonym: impl Into<String>) {
        let synonym = synonym.into();
        if !synonym.is_empty() && !self.synonyms.contains(&synonym) {
            self.synonyms.push(synonym);
        }
    }

    /// Replace the lineage, dropping empty segments.
    pub fn set_lineage<I, S>(&mut self, lineage: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lineage = lineage
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty())
            .collect();
    }

    /// The flattened lineage used as the lineage-facet cache key.
    pub fn lineage_path(&self) -> String {
        self.lineage.join(LINEAGE_SEPARATOR)
    }

    /// The display form used when reporting this record to a user:
    /// scientific name, else code, else common name, else the raw id.
    pub fn label(&self) -> String {
        if !self.scientific_name.is_empty() {
            self.scientific_name.clone()
        } else if !self.code.is_empty() {
            self.code.clone()
        } else if !self.common_name.is_empty() {
            self.common_name.clone()
        } else if let Some(id) = &self.identifier {
            id.value.clone()
        } else {
            String::new()
        }
    }

    /// True when no field carries any data worth resolving.
    pub fn is_empty(&self) -> bool {
        self.identifier.is_none()
            && self.scientific_name.is_empty()
            && self.code.is_empty()
            && self.common_name.is_empty()
    }
}

/// Equality is field-wise on identifier, scientific name, code, common
/// name, rank and lineage. Synonyms are bookkeeping and do not make two
/// records distinct.
impl PartialEq for Taxonomy {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.scientific_name == other.scientific_name
            && self.code == other.code
            && self.common_name == other.common_name
            && self.rank == other.rank
            && self.lineage == other.lineage
    }
}

impl Eq for Taxonomy {}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
