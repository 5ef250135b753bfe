use thiserror::Error;

/// The errors a reconciliation or resolution job can surface.
///
/// Per-node resolution failures (`Ambiguous`, `NotFound`) are non-fatal
/// inside `enrich_tree` and accumulate into its unresolved set; every
/// other consumer treats any variant as fatal for the whole job.
#[derive(Debug, Error)]
pub enum Error {
    /// The taxonomy service could not be reached at all.
    #[error("taxonomy service unreachable: {0}")]
    NetworkUnavailable(String),

    /// The taxonomy service answered with a non-success response.
    #[error("taxonomy service error: {0}")]
    Service(String),

    /// A query matched more than one record where exactly one was required.
    #[error("ambiguous query: {0}")]
    Ambiguous(String),

    /// A query matched nothing where a match was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// A node is missing the taxonomy an operation requires.
    #[error("node '{0}' has no usable taxonomy")]
    MissingTaxonomy(String),

    /// A canonical record carries no lineage to infer from.
    #[error("lineage unavailable for '{0}'")]
    LineageUnavailable(String),

    /// Descendant lineages share no common prefix.
    #[error("no common lineage: {0}")]
    NoCommonLineage(String),

    /// Fewer than two external nodes carry any taxonomic data.
    #[error("fewer than two external nodes carry taxonomic data")]
    InsufficientTaxonomy,

    /// Two species-tree externals project to the same comparison key.
    #[error("species key '{0}' is not unique in the species tree")]
    DuplicateSpeciesKey(String),

    /// The job was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// A string could not be parsed into a taxonomic rank.
    #[error("rank '{0}' is not supported")]
    UnrecognizedRank(String),

    /// An invariant violation that indicates a bug, not bad data.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// A wrapper type for reconciliation results.
pub type Result<T> = std::result::Result<T, Error>;
