//! Assignment of taxonomies to internal gene-tree nodes from the
//! common lineage of their descendants.
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{Facet, TaxonomyCache};
use crate::errors::{Error, Result};
use crate::resolver::TaxonomyResolver;
use crate::service::{CancelToken, TaxonomyService, UserNotifier};
use crate::taxonomy::Taxonomy;
use crate::tree::{NodeId, Tree};

/// Most candidates a lineage disambiguation asks the service for
/// during ancestral inference.
pub const MAX_RESULTS_ANCESTRAL: usize = 100;

/// Walks a gene tree in postorder and gives every internal node the
/// taxonomy of its descendants' deepest common ancestor.
///
/// Unlike per-node enrichment, any failure here is fatal for the whole
/// job: the result is a single coherent reconstruction or nothing.
pub struct AncestralTaxonomyInferer {
    resolver: TaxonomyResolver,
}

impl AncestralTaxonomyInferer {
    pub fn new(cache: Arc<TaxonomyCache>, service: Arc<dyn TaxonomyService>) -> Self {
        AncestralTaxonomyInferer {
            resolver: TaxonomyResolver::new(cache, service),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.resolver = self.resolver.with_notifier(notifier);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.resolver = self.resolver.with_cancel_token(cancel);
        self
    }

    /// Canonical record for a descendant's taxonomy. Scientific-name
    /// oriented: id when appropriate, else scientific name, else code,
    /// else common name; never the lineage (the lineage is what we are
    /// reconstructing here).
    fn lookup_descendant(&self, tax: &Taxonomy) -> Result<Option<Taxonomy>> {
        if tax.has_appropriate_id() {
            let id = tax.identifier.as_ref().unwrap();
            return self.resolver.cached_search(Facet::Id, &id.value);
        }
        if !tax.scientific_name.is_empty() {
            return self
                .resolver
                .cached_search(Facet::ScientificName, &tax.scientific_name);
        }
        if !tax.code.is_empty() {
            return self.resolver.cached_search(Facet::Code, &tax.code);
        }
        self.resolver
            .cached_search(Facet::CommonName, &tax.common_name)
    }

    /// Infer taxonomies for every internal node of `tree`.
    pub fn infer(&self, tree: &mut Tree) -> Result<()> {
        let order: Vec<NodeId> = tree.postorder().collect();
        let mut assigned = 0usize;
        for id in order {
            self.resolver.check_cancelled()?;
            if tree.is_external(id) {
                continue;
            }

            // any prior annotation on the internal node is stale
            tree.node_mut(id).data.taxonomy = None;

            let children: Vec<NodeId> = tree.children(id).to_vec();
            let mut lineages: Vec<Vec<String>> = Vec::with_capacity(children.len());
            for child in &children {
                let label = tree.node_label(*child);
                let tax = tree
                    .node(*child)
                    .data
                    .taxonomy
                    .as_ref()
                    .filter(|t| !t.is_empty())
                    .ok_or(Error::MissingTaxonomy(label.clone()))?;
                let canonical = self
                    .lookup_descendant(tax)?
                    .ok_or_else(|| Error::LineageUnavailable(label.clone()))?;
                if canonical.lineage.is_empty() {
                    return Err(Error::LineageUnavailable(label));
                }
                lineages.push(canonical.lineage);
            }

            let prefix_len = common_prefix_len(&lineages);
            if prefix_len == 0 {
                return Err(Error::NoCommonLineage(format!(
                    "node '{}' descends from [{}]",
                    tree.node_label(id),
                    lineages
                        .iter()
                        .map(|l| l.join(" > "))
                        .collect::<Vec<_>>()
                        .join("; ")
                )));
            }
            let prefix = &lineages[0][..prefix_len];

            let mut tax = Taxonomy::from_scientific_name(prefix[prefix_len - 1].clone());
            match self
                .resolver
                .resolve_by_lineage(prefix, MAX_RESULTS_ANCESTRAL)
            {
                Ok(canonical) => {
                    tax.rank = canonical.rank;
                    tax.identifier = canonical.identifier.clone();
                    tax.common_name = canonical.common_name.clone();
                    for synonym in &canonical.synonyms {
                        tax.add_synonym(synonym.clone());
                    }
                    tax.set_lineage(canonical.lineage.iter().cloned());
                }
                Err(Error::NotFound(detail)) => {
                    debug!(%detail, "ancestor lineage has no canonical record");
                }
                Err(e) => return Err(e),
            }

            tree.node_mut(id).data.taxonomy = Some(tax.clone());
            assigned += 1;

            // identical inner taxonomies on an unbranched ancestral
            // line carry no information; keep only the deepest
            for child in children {
                if !tree.is_external(child)
                    && tree.node(child).data.taxonomy.as_ref() == Some(&tax)
                {
                    tree.node_mut(child).data.taxonomy = None;
                }
            }
        }
        info!(assigned, "ancestral taxonomies inferred");
        Ok(())
    }
}

/// Length of the longest prefix shared by every lineage.
fn common_prefix_len(lineages: &[Vec<String>]) -> usize {
    let min_len = lineages.iter().map(Vec::len).min().unwrap_or(0);
    let mut k = 0;
    while k < min_len {
        let first = &lineages[0][k];
        if lineages[1..].iter().any(|l| &l[k] != first) {
            break;
        }
        k += 1;
    }
    k
}
