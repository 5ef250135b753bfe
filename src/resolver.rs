//! Resolution of partial taxonomic annotations against the external
//! taxonomy database, through the shared cache.
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{Facet, TaxonomyCache};
use crate::errors::{Error, Result};
use crate::service::{
    truncated_label_list, CancelToken, NullNotifier, TaxonomyService, UserNotifier,
};
use crate::taxonomy::{Taxonomy, LINEAGE_SEPARATOR};
use crate::tree::{NodeId, Tree};

/// Most records a direct lookup asks the service for.
pub const MAX_RESULTS_DETAIL: usize = 10;

/// Knobs for [`TaxonomyResolver::enrich_tree`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrichOptions {
    /// Remove external nodes whose taxonomy could not be resolved, in
    /// one deferred pass after the traversal.
    pub delete_unresolved_externals: bool,
    /// Allow nodes carrying only a bare name (no taxonomy) to be
    /// resolved by that name.
    pub allow_bare_node_names: bool,
}

/// Orders lookup strategies by the identifiers a node carries, fills
/// missing taxonomy fields from the canonical record, and reports what
/// stayed unresolved.
pub struct TaxonomyResolver {
    cache: Arc<TaxonomyCache>,
    service: Arc<dyn TaxonomyService>,
    notifier: Arc<dyn UserNotifier>,
    cancel: CancelToken,
}

impl TaxonomyResolver {
    pub fn new(cache: Arc<TaxonomyCache>, service: Arc<dyn TaxonomyService>) -> Self {
        TaxonomyResolver {
            cache,
            service,
            notifier: Arc::new(NullNotifier),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cache-then-service lookup through one facet. A service answer is
    /// accepted only when it contains exactly one record; several
    /// records mean the query was ambiguous and the node stays
    /// unresolved.
    pub(crate) fn cached_search(&self, facet: Facet, query: &str) -> Result<Option<Taxonomy>> {
        if query.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.cache.get(facet, query) {
            return Ok(Some(hit));
        }
        self.check_cancelled()?;
        debug!(?facet, query, "taxonomy cache miss, querying service");
        let hits = self.service.search(facet, query, MAX_RESULTS_DETAIL)?;
        match hits.len() {
            1 => {
                let hit = hits.into_iter().next().unwrap();
                self.cache.maybe_evict();
                self.cache.put(&hit);
                Ok(Some(hit))
            }
            0 => Ok(None),
            n => {
                debug!(?facet, query, hits = n, "query matched several records");
                Ok(None)
            }
        }
    }

    /// Resolve a full lineage to its unique canonical record.
    ///
    /// Candidates are fetched by the last lineage element (a scientific
    /// name); a candidate matches when every element of the query
    /// lineage equals the candidate's element at the same index,
    /// case-insensitively. Exactly one match is cached and returned.
    pub(crate) fn resolve_by_lineage(
        &self,
        lineage: &[String],
        max_results: usize,
    ) -> Result<Taxonomy> {
        let path = lineage.join(LINEAGE_SEPARATOR);
        if let Some(hit) = self.cache.get(Facet::LineagePath, &path) {
            return Ok(hit);
        }
        let last = lineage
            .last()
            .ok_or_else(|| Error::NotFound("empty lineage".to_string()))?;
        self.check_cancelled()?;
        debug!(%path, "lineage cache miss, querying service");
        let candidates = self.service.search(Facet::ScientificName, last, max_results)?;
        let mut matches: Vec<Taxonomy> = candidates
            .into_iter()
            .filter(|c| lineage_matches(&c.lineage, lineage))
            .collect();
        match matches.len() {
            1 => {
                let hit = matches.pop().unwrap();
                self.cache.maybe_evict();
                self.cache.put(&hit);
                Ok(hit)
            }
            0 => Err(Error::NotFound(format!("lineage '{}' not found", path))),
            _ => Err(Error::Ambiguous(format!("lineage '{}' is not unique", path))),
        }
    }

    /// Resolve a node's taxonomy to its canonical record, trying the
    /// strategies in fixed priority: id, lineage, scientific name,
    /// code, common name. Returns the record together with the facet
    /// that produced it, so enrichment can leave that facet alone.
    pub fn resolve(&self, tax: &Taxonomy) -> Result<Option<(Taxonomy, Facet)>> {
        if tax.has_appropriate_id() {
            let id = tax.identifier.as_ref().unwrap();
            let hit = self.cached_search(Facet::Id, &id.value)?;
            return Ok(hit.map(|t| (t, Facet::Id)));
        }
        if !tax.scientific_name.is_empty() && !tax.lineage.is_empty() {
            let hit = self.resolve_by_lineage(&tax.lineage, MAX_RESULTS_DETAIL)?;
            return Ok(Some((hit, Facet::LineagePath)));
        }
        if !tax.scientific_name.is_empty() {
            let hit = self.cached_search(Facet::ScientificName, &tax.scientific_name)?;
            return Ok(hit.map(|t| (t, Facet::ScientificName)));
        }
        if !tax.code.is_empty() {
            let hit = self.cached_search(Facet::Code, &tax.code)?;
            return Ok(hit.map(|t| (t, Facet::Code)));
        }
        let hit = self.cached_search(Facet::CommonName, &tax.common_name)?;
        Ok(hit.map(|t| (t, Facet::CommonName)))
    }

    /// Resolve a bare node name: scientific name first, then code,
    /// then common name.
    pub fn resolve_bare_name(&self, name: &str) -> Result<Option<(Taxonomy, Facet)>> {
        for facet in [Facet::ScientificName, Facet::Code, Facet::CommonName] {
            if let Some(hit) = self.cached_search(facet, name)? {
                return Ok(Some((hit, facet)));
            }
        }
        Ok(None)
    }

    /// Walk `tree` in postorder resolving every node that carries a
    /// taxonomy (or, when allowed, a bare name) and enriching it in
    /// place from the canonical record.
    ///
    /// Per-node `Ambiguous`/`NotFound`/no-hit outcomes are non-fatal
    /// and accumulate into the returned sorted set of labels; network
    /// failures and cancellation abort the whole job. On completion
    /// the notifier receives either a success note or a truncated
    /// listing of what stayed unresolved.
    pub fn enrich_tree(&self, tree: &mut Tree, options: EnrichOptions) -> Result<BTreeSet<String>> {
        let mut unresolved = BTreeSet::new();
        let mut marked: Vec<NodeId> = Vec::new();
        let order: Vec<NodeId> = tree.postorder().collect();
        for id in order {
            self.check_cancelled()?;

            let node = tree.node(id);
            let carries_taxonomy = node
                .data
                .taxonomy
                .as_ref()
                .map(|t| !t.is_empty())
                .unwrap_or(false);
            let bare_name = if carries_taxonomy { None } else { Some(node.name.clone()) };

            let outcome = if carries_taxonomy {
                let tax = node.data.taxonomy.as_ref().unwrap();
                self.resolve(tax)
            } else if options.allow_bare_node_names && !node.name.is_empty() {
                self.resolve_bare_name(&node.name)
            } else {
                continue;
            };

            match outcome {
                Ok(Some((canonical, queried))) => {
                    let is_external = tree.is_external(id);
                    let node = tree.node_mut(id);
                    if let Some(name) = bare_name {
                        let mut fresh = Taxonomy::default();
                        match queried {
                            Facet::ScientificName => fresh.scientific_name = name,
                            Facet::Code => fresh.code = name,
                            Facet::CommonName => fresh.common_name = name,
                            _ => {}
                        }
                        node.data.taxonomy = Some(fresh);
                        node.name.clear();
                    }
                    // the taxonomy is always present here
                    let tax = node.data.taxonomy.as_mut().unwrap();
                    enrich(tax, &canonical, queried, is_external);
                }
                Ok(None) | Err(Error::Ambiguous(_)) | Err(Error::NotFound(_)) => {
                    unresolved.insert(tree.node_label(id));
                    if options.delete_unresolved_externals && tree.is_external(id) {
                        marked.push(id);
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => return Err(self.report_fatal(e)),
            }
        }

        if options.delete_unresolved_externals && !marked.is_empty() {
            tree.remove_externals(&marked);
        }

        info!(
            unresolved = unresolved.len(),
            deleted = marked.len(),
            "tree enrichment finished"
        );
        if unresolved.is_empty() {
            self.notifier
                .info("Taxonomy resolution", "all taxonomies were resolved");
        } else {
            warn!(count = unresolved.len(), "some taxonomies stayed unresolved");
            self.notifier.warn(
                "Taxonomy resolution",
                &format!(
                    "{} unresolved: {}",
                    unresolved.len(),
                    truncated_label_list(&unresolved)
                ),
            );
        }
        Ok(unresolved)
    }

    fn report_fatal(&self, e: Error) -> Error {
        self.notifier.error("Taxonomy resolution", &e.to_string());
        e
    }
}

/// True when every element of `query` equals `candidate`'s element at
/// the same index, case-insensitively. A candidate shorter than the
/// query never matches.
fn lineage_matches(candidate: &[String], query: &[String]) -> bool {
    if candidate.len() < query.len() {
        return false;
    }
    query
        .iter()
        .zip(candidate)
        .all(|(q, c)| q.eq_ignore_ascii_case(c))
}

/// Update `tax` in place from the canonical record `canonical`.
///
/// The facet that was queried is never overwritten; empty fields are
/// filled (the code only on external nodes); the rank is taken when
/// missing; synonyms are appended de-duplicated; the lineage is always
/// replaced, with empty segments dropped.
fn enrich(tax: &mut Taxonomy, canonical: &Taxonomy, queried: Facet, is_external: bool) {
    if queried != Facet::ScientificName && tax.scientific_name.is_empty() {
        tax.scientific_name = canonical.scientific_name.clone();
    }
    if queried != Facet::Code && is_external && tax.code.is_empty() {
        tax.code = canonical.code.clone();
    }
    if queried != Facet::CommonName && tax.common_name.is_empty() {
        tax.common_name = canonical.common_name.clone();
    }
    if queried != Facet::Id && tax.identifier.is_none() {
        tax.identifier = canonical.identifier.clone();
    }
    if tax.rank.is_none() {
        tax.rank = canonical.rank;
    }
    for synonym in &canonical.synonyms {
        tax.add_synonym(synonym.clone());
    }
    tax.set_lineage(canonical.lineage.iter().cloned());
}
