//! Reconciliation of gene trees against species trees, and resolution
//! of the taxonomic annotations that drive it.
//!
//! The crate has two halves sharing one tree/taxonomy data model:
//!
//! - [`resolver::TaxonomyResolver`] and
//!   [`ancestral::AncestralTaxonomyInferer`] fill in partial taxonomic
//!   annotations from an external [`service::TaxonomyService`], through
//!   a shared, five-way-keyed [`cache::TaxonomyCache`].
//! - [`mapper::SpeciesMapper`] and [`gsdi::Gsdi`] bind a gene tree's
//!   externals to a species tree and reconstruct, per internal gene
//!   node, the species-tree mapping and the speciation/duplication
//!   event behind it.
//!
//! Trees arrive from external parsers as the arena structures of
//! [`tree`]; file formats, transports and UIs stay outside the crate,
//! behind the narrow seams in [`service`].

pub mod ancestral;
pub mod cache;
pub mod errors;
pub mod gsdi;
pub mod mapper;
mod rank;
pub mod resolver;
pub mod service;
mod taxonomy;
pub mod tree;

pub use crate::ancestral::{AncestralTaxonomyInferer, MAX_RESULTS_ANCESTRAL};
pub use crate::cache::{Facet, TaxonomyCache, MAX_CACHE_ENTRIES};
pub use crate::errors::{Error, Result};
pub use crate::gsdi::{Gsdi, GsdiOptions, GsdiSummary};
pub use crate::mapper::{ComparisonBasis, MappingOptions, MappingReport, SpeciesMapper};
pub use crate::rank::TaxRank;
pub use crate::resolver::{EnrichOptions, TaxonomyResolver, MAX_RESULTS_DETAIL};
pub use crate::service::{CancelToken, NullNotifier, TaxonomyService, UserNotifier};
pub use crate::taxonomy::{TaxIdentifier, Taxonomy, LINEAGE_SEPARATOR, RECOGNIZED_PROVIDERS};
pub use crate::tree::{Event, Node, NodeData, NodeId, Tree};
