//! Binding of gene-tree externals to species-tree externals ahead of
//! reconciliation.
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::taxonomy::Taxonomy;
use crate::tree::{NodeId, Tree};

/// The taxonomy facet used to key the gene-to-species mapping.
///
/// Elected per run by scanning the gene tree's externals: scientific
/// name when it is the best-covered facet, else id, else code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonBasis {
    ScientificName,
    Id,
    Code,
}

impl ComparisonBasis {
    /// The mapping key this basis extracts from a taxonomy, if any.
    fn project(self, tax: &Taxonomy) -> Option<String> {
        let key = match self {
            ComparisonBasis::ScientificName => tax.scientific_name.clone(),
            ComparisonBasis::Id => {
                if !tax.has_appropriate_id() {
                    return None;
                }
                tax.identifier.as_ref().unwrap().value.clone()
            }
            ComparisonBasis::Code => tax.code.clone(),
        };
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }
}

/// Knobs for [`SpeciesMapper::map`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MappingOptions {
    /// Remove gene-tree externals that cannot be mapped instead of
    /// failing on them.
    pub strip_gene_tree: bool,
    /// Remove species-tree externals no gene node mapped to.
    pub strip_species_tree: bool,
}

/// What a mapping run produced, besides the links themselves.
#[derive(Clone, Debug)]
pub struct MappingReport {
    pub basis: ComparisonBasis,
    /// Labels of the gene externals removed by `strip_gene_tree`.
    pub stripped_gene_labels: Vec<String>,
    /// Species nodes at least one gene external mapped to, by arena id
    /// (valid in the species tree as left behind by this run).
    pub mapped_species: Vec<NodeId>,
}

/// Links every external gene node to its species-tree node under the
/// elected comparison basis.
pub struct SpeciesMapper;

impl SpeciesMapper {
    /// Elect the comparison basis from the gene tree's externals.
    ///
    /// Counts how many externals carry an appropriate id, a code and a
    /// scientific name; the basis is the best-covered facet with ties
    /// broken scientific name first, then id. Fewer than two externals
    /// with any usable facet is an error.
    pub fn select_basis(gene: &Tree) -> Result<ComparisonBasis> {
        let mut id_count = 0usize;
        let mut code_count = 0usize;
        let mut sn_count = 0usize;
        let mut with_any = 0usize;
        for external in gene.externals_forward() {
            let Some(tax) = gene.node(external).data.taxonomy.as_ref() else {
                continue;
            };
            let id = ComparisonBasis::Id.project(tax).is_some();
            let code = ComparisonBasis::Code.project(tax).is_some();
            let sn = ComparisonBasis::ScientificName.project(tax).is_some();
            id_count += id as usize;
            code_count += code as usize;
            sn_count += sn as usize;
            with_any += (id || code || sn) as usize;
        }
        if with_any < 2 {
            return Err(Error::InsufficientTaxonomy);
        }
        let basis = if sn_count >= id_count && sn_count >= code_count {
            ComparisonBasis::ScientificName
        } else if id_count >= code_count {
            ComparisonBasis::Id
        } else {
            ComparisonBasis::Code
        };
        debug!(?basis, sn_count, id_count, code_count, "comparison basis elected");
        Ok(basis)
    }

    /// Link gene externals to species externals; optionally strip the
    /// unmappable gene nodes and the unmapped species nodes. Preorder
    /// ids and external counts of both trees are refreshed, so the
    /// trees leave this call ready for reconciliation.
    pub fn map(
        gene: &mut Tree,
        species: &mut Tree,
        options: MappingOptions,
    ) -> Result<MappingReport> {
        let basis = Self::select_basis(gene)?;

        let mut species_by_key: HashMap<String, NodeId> = HashMap::new();
        for external in species.externals_forward().collect::<Vec<_>>() {
            let Some(key) = species.node(external).data.taxonomy.as_ref().and_then(|t| basis.project(t))
            else {
                continue;
            };
            if species_by_key.insert(key.clone(), external).is_some() {
                return Err(Error::DuplicateSpeciesKey(key));
            }
        }

        let mut marked: Vec<NodeId> = Vec::new();
        let mut stripped_gene_labels: Vec<String> = Vec::new();
        let mut mapped: HashSet<NodeId> = HashSet::new();
        for external in gene.externals_forward().collect::<Vec<_>>() {
            let key = gene
                .node(external)
                .data
                .taxonomy
                .as_ref()
                .and_then(|t| basis.project(t));
            let target = match key {
                None => {
                    if options.strip_gene_tree {
                        stripped_gene_labels.push(gene.node_label(external));
                        marked.push(external);
                        continue;
                    }
                    return Err(Error::MissingTaxonomy(gene.node_label(external)));
                }
                Some(key) => match species_by_key.get(&key) {
                    Some(target) => *target,
                    None => {
                        if options.strip_gene_tree {
                            stripped_gene_labels.push(gene.node_label(external));
                            marked.push(external);
                            continue;
                        }
                        return Err(Error::NotFound(format!(
                            "species '{}' is not in the species tree",
                            key
                        )));
                    }
                },
            };
            gene.node_mut(external).data.link = Some(target);
            mapped.insert(target);
        }

        if options.strip_gene_tree && !marked.is_empty() {
            gene.remove_externals(&marked);
        } else {
            gene.assign_preorder_ids();
            gene.update_external_counts();
        }

        if options.strip_species_tree {
            let unmapped: Vec<NodeId> = species
                .externals_forward()
                .filter(|id| !mapped.contains(id))
                .collect();
            let remap = species.remove_externals(&unmapped);
            // gene links point into the species arena; follow the move
            for external in gene.externals_forward().collect::<Vec<_>>() {
                if let Some(link) = gene.node(external).data.link {
                    gene.node_mut(external).data.link = Some(remap[&link]);
                }
            }
            mapped = mapped.into_iter().map(|id| remap[&id]).collect();
        } else {
            species.assign_preorder_ids();
            species.update_external_counts();
        }

        let mut mapped_species: Vec<NodeId> = mapped.into_iter().collect();
        mapped_species.sort_unstable();
        info!(
            mapped = mapped_species.len(),
            stripped = stripped_gene_labels.len(),
            "gene tree mapped onto species tree"
        );
        Ok(MappingReport {
            basis,
            stripped_gene_labels,
            mapped_species,
        })
    }
}
