//! Generalized speciation/duplication inference.
//!
//! Given a gene tree whose externals are linked into a species tree,
//! the core walks the gene tree in postorder, maps every internal node
//! to its species-tree least common ancestor and classifies the node
//! as a speciation, a duplication, or (at unresolved multifurcations,
//! under the permissive model) an ambiguous speciation-or-duplication.
use std::collections::HashSet;

use tracing::info;

use crate::errors::{Error, Result};
use crate::mapper::{MappingOptions, MappingReport, SpeciesMapper};
use crate::service::CancelToken;
use crate::tree::{Event, NodeId, Tree};

/// Knobs for a reconciliation run.
#[derive(Clone, Copy, Debug, Default)]
pub struct GsdiOptions {
    /// Label the undecidable multifurcation cases `Duplication`
    /// instead of `SpeciationOrDuplication`.
    pub most_parsimonious_duplication: bool,
    /// Passed through to the mapper by [`Gsdi::reconcile`].
    pub strip_gene_tree: bool,
    /// Passed through to the mapper by [`Gsdi::reconcile`].
    pub strip_species_tree: bool,
}

/// What a reconciliation produced.
#[derive(Clone, Debug, Default)]
pub struct GsdiSummary {
    pub speciations: usize,
    pub duplications: usize,
    pub ambiguous: usize,
    /// Mapping cost L: the summed species-tree depth differences
    /// between each internal node's link and its children's links. A
    /// quality diagnostic, not a correctness guarantee.
    pub mapping_cost: usize,
    /// Labels of gene externals the mapper stripped.
    pub stripped_gene_labels: Vec<String>,
    /// Species nodes with at least one gene external mapped to them.
    pub mapped_species: Vec<NodeId>,
}

impl GsdiSummary {
    pub fn events_total(&self) -> usize {
        self.speciations + self.duplications + self.ambiguous
    }
}

/// The reconciliation runner.
pub struct Gsdi {
    options: GsdiOptions,
    cancel: CancelToken,
}

impl Gsdi {
    pub fn new(options: GsdiOptions) -> Self {
        Gsdi {
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Map the gene tree onto the species tree, then reconcile.
    pub fn reconcile(&self, gene: &mut Tree, species: &mut Tree) -> Result<GsdiSummary> {
        let mapping = MappingOptions {
            strip_gene_tree: self.options.strip_gene_tree,
            strip_species_tree: self.options.strip_species_tree,
        };
        let MappingReport {
            stripped_gene_labels,
            mapped_species,
            ..
        } = SpeciesMapper::map(gene, species, mapping)?;
        let mut summary = self.run(gene, species)?;
        summary.stripped_gene_labels = stripped_gene_labels;
        summary.mapped_species = mapped_species;
        Ok(summary)
    }

    /// Reconcile an already-mapped pair of trees.
    ///
    /// Preconditions: the species tree is preorder-numbered, every
    /// external gene node carries a link into it, and every internal
    /// gene node has exactly two children. Violations are bugs in the
    /// calling pipeline and surface as `InvalidState`.
    pub fn run(&self, gene: &mut Tree, species: &Tree) -> Result<GsdiSummary> {
        check_preconditions(gene, species)?;

        // depths are looked up once per child link, so precompute
        let depths = species_depths(species);

        let mut summary = GsdiSummary::default();
        let order: Vec<NodeId> = gene.postorder().collect();
        for g in order {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if gene.is_external(g) {
                continue;
            }
            let g1 = gene.children(g)[0];
            let g2 = gene.children(g)[1];
            let s1 = link_of(gene, g1)?;
            let s2 = link_of(gene, g2)?;

            let s = lca_by_preorder(species, s1, s2)?;
            gene.node_mut(g).data.link = Some(s);
            summary.mapping_cost += depths[s1] - depths[s] + depths[s2] - depths[s];

            let oyako = s1 == s || s2 == s;
            let event = if species.children(s).len() == 2 {
                if oyako {
                    Event::Duplication
                } else {
                    Event::Speciation
                }
            } else if !oyako {
                Event::Speciation
            } else {
                // unresolved multifurcation: a true duplication needs
                // both gene subtrees to reach into a shared species
                // subtree directly under s
                let under1 = species_children_reached(gene, species, g1, s);
                let under2 = species_children_reached(gene, species, g2, s);
                if under1.intersection(&under2).next().is_some()
                    || self.options.most_parsimonious_duplication
                {
                    Event::Duplication
                } else {
                    Event::SpeciationOrDuplication
                }
            };
            match event {
                Event::Speciation => summary.speciations += 1,
                Event::Duplication => summary.duplications += 1,
                Event::SpeciationOrDuplication => summary.ambiguous += 1,
            }
            gene.node_mut(g).data.event = Some(event);
        }

        info!(
            speciations = summary.speciations,
            duplications = summary.duplications,
            ambiguous = summary.ambiguous,
            mapping_cost = summary.mapping_cost,
            "reconciliation finished"
        );
        Ok(summary)
    }
}

fn link_of(gene: &Tree, g: NodeId) -> Result<NodeId> {
    gene.node(g)
        .data
        .link
        .ok_or_else(|| Error::InvalidState(format!("gene node '{}' has no link", gene.node_label(g))))
}

fn check_preconditions(gene: &Tree, species: &Tree) -> Result<()> {
    for id in species.preorder() {
        if let Some(parent) = species.parent(id) {
            if species.node(parent).id >= species.node(id).id {
                return Err(Error::InvalidState(
                    "species tree is not preorder numbered".to_string(),
                ));
            }
        }
    }
    for id in gene.preorder() {
        if gene.is_external(id) {
            let link = link_of(gene, id)?;
            if link >= species.len() {
                return Err(Error::InvalidState(format!(
                    "gene node '{}' links outside the species tree",
                    gene.node_label(id)
                )));
            }
        } else if gene.children(id).len() != 2 {
            return Err(Error::InvalidState(format!(
                "gene tree is not binary at '{}'",
                gene.node_label(id)
            )));
        }
    }
    Ok(())
}

/// Species-tree depth (edges from the root) per arena id.
fn species_depths(species: &Tree) -> Vec<usize> {
    let mut depths = vec![0usize; species.len()];
    for id in species.preorder() {
        if let Some(parent) = species.parent(id) {
            depths[id] = depths[parent] + 1;
        }
    }
    depths
}

/// Climb the species tree from `s1` and `s2` to their least common
/// ancestor. Whichever side currently has the larger preorder id is
/// deeper (ancestors are numbered before descendants), so it steps to
/// its parent.
fn lca_by_preorder(species: &Tree, s1: NodeId, s2: NodeId) -> Result<NodeId> {
    let mut a = s1;
    let mut b = s2;
    while a != b {
        let up = if species.node(a).id > species.node(b).id {
            &mut a
        } else {
            &mut b
        };
        *up = species.parent(*up).ok_or_else(|| {
            Error::InvalidState("species nodes share no common ancestor".to_string())
        })?;
    }
    Ok(a)
}

/// The direct children of `s` that the externals of the gene subtree
/// rooted at `g` reach: each external's link is walked upward until
/// its parent becomes `s` (or the walk runs out at the root). A link
/// equal to `s` itself reaches no child of `s`.
fn species_children_reached(
    gene: &Tree,
    species: &Tree,
    g: NodeId,
    s: NodeId,
) -> HashSet<NodeId> {
    let mut reached = HashSet::new();
    for external in gene.subtree_externals(g) {
        let Some(mut n) = gene.node(external).data.link else {
            continue;
        };
        while let Some(parent) = species.parent(n) {
            if parent == s {
                reached.insert(n);
                break;
            }
            n = parent;
        }
    }
    reached
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapper::test::leaf_with;
    use crate::taxonomy::Taxonomy;

    fn sn(name: &str) -> Taxonomy {
        Taxonomy::from_scientific_name(name)
    }

    /// Species tree (A,B)S.
    fn species_ab() -> (Tree, NodeId, NodeId) {
        let mut species = Tree::new("S");
        let root = species.root();
        let a = leaf_with(&mut species, root, sn("A"));
        let b = leaf_with(&mut species, root, sn("B"));
        species.assign_preorder_ids();
        species.update_external_counts();
        (species, a, b)
    }

    fn linked_leaf(gene: &mut Tree, parent: NodeId, link: NodeId) -> NodeId {
        let id = gene.add_child(parent, "");
        gene.node_mut(id).data.link = Some(link);
        id
    }

    #[test]
    fn test_simple_speciation() {
        // S1: (a1,b1)G over (A,B)S
        let (species, a, b) = species_ab();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        linked_leaf(&mut gene, g, b);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(gene.node(g).data.link, Some(species.root()));
        assert_eq!(gene.node(g).data.event, Some(Event::Speciation));
        assert_eq!(
            (summary.speciations, summary.duplications, summary.ambiguous),
            (1, 0, 0)
        );
    }

    #[test]
    fn test_simple_duplication() {
        // S2: (a1,a2)G over (A,B)S
        let (species, a, _) = species_ab();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        linked_leaf(&mut gene, g, a);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(gene.node(g).data.link, Some(a));
        assert_eq!(gene.node(g).data.event, Some(Event::Duplication));
        assert_eq!(
            (summary.speciations, summary.duplications, summary.ambiguous),
            (0, 1, 0)
        );
        // both children already map to a, so climbing cost is zero
        assert_eq!(summary.mapping_cost, 0);
    }

    #[test]
    fn test_lca_over_multiple_levels() {
        // S3: ((a,b)X,(c,d)Y)Z over ((A,B)S1,(C,D)S2)R
        let mut species = Tree::new("R");
        let r = species.root();
        let s1 = species.add_child(r, "S1");
        let a = leaf_with(&mut species, s1, sn("A"));
        let b = leaf_with(&mut species, s1, sn("B"));
        let s2 = species.add_child(r, "S2");
        let c = leaf_with(&mut species, s2, sn("C"));
        let d = leaf_with(&mut species, s2, sn("D"));
        species.assign_preorder_ids();

        let mut gene = Tree::new("Z");
        let z = gene.root();
        let x = gene.add_child(z, "X");
        linked_leaf(&mut gene, x, a);
        linked_leaf(&mut gene, x, b);
        let y = gene.add_child(z, "Y");
        linked_leaf(&mut gene, y, c);
        linked_leaf(&mut gene, y, d);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(gene.node(x).data.link, Some(s1));
        assert_eq!(gene.node(y).data.link, Some(s2));
        assert_eq!(gene.node(z).data.link, Some(r));
        for g in [x, y, z] {
            assert_eq!(gene.node(g).data.event, Some(Event::Speciation));
        }
        assert_eq!(
            (summary.speciations, summary.duplications, summary.ambiguous),
            (3, 0, 0)
        );
    }

    /// Trifurcating species tree (A,B,C)S.
    fn species_abc() -> (Tree, NodeId, NodeId, NodeId) {
        let mut species = Tree::new("S");
        let root = species.root();
        let a = leaf_with(&mut species, root, sn("A"));
        let b = leaf_with(&mut species, root, sn("B"));
        let c = leaf_with(&mut species, root, sn("C"));
        species.assign_preorder_ids();
        species.update_external_counts();
        (species, a, b, c)
    }

    #[test]
    fn test_multifurcation_speciation_when_no_child_maps_to_lca() {
        // S4, first half: (a,b)G over (A,B,C)S
        let (species, a, b, _) = species_abc();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        linked_leaf(&mut gene, g, b);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(gene.node(g).data.link, Some(species.root()));
        assert_eq!(gene.node(g).data.event, Some(Event::Speciation));
        assert_eq!(summary.events_total(), 1);
    }

    #[test]
    fn test_multifurcation_ambiguous_vs_parsimonious() {
        // S4, second half: (a,(b,c)x)G over (A,B,C)S. x maps to S, so
        // oyako holds at G, but the two gene subtrees reach disjoint
        // children of S.
        let (species, a, b, c) = species_abc();

        for (parsimonious, expected) in [
            (false, Event::SpeciationOrDuplication),
            (true, Event::Duplication),
        ] {
            let mut gene = Tree::new("G");
            let g = gene.root();
            linked_leaf(&mut gene, g, a);
            let x = gene.add_child(g, "x");
            linked_leaf(&mut gene, x, b);
            linked_leaf(&mut gene, x, c);
            gene.assign_preorder_ids();

            let options = GsdiOptions {
                most_parsimonious_duplication: parsimonious,
                ..GsdiOptions::default()
            };
            let summary = Gsdi::new(options).run(&mut gene, &species).unwrap();
            // x itself is a plain speciation; neither of its children
            // maps to S
            assert_eq!(gene.node(x).data.link, Some(species.root()));
            assert_eq!(gene.node(x).data.event, Some(Event::Speciation));
            assert_eq!(gene.node(g).data.link, Some(species.root()));
            assert_eq!(gene.node(g).data.event, Some(expected), "parsimonious={}", parsimonious);
            assert_eq!(summary.events_total(), 2);
        }
    }

    #[test]
    fn test_multifurcation_true_duplication_when_subtrees_share_species() {
        // ((a,b)x,(a',c)y)G over (A,B,C)S: both subtrees reach A
        let (species, a, b, c) = species_abc();
        let mut gene = Tree::new("G");
        let g = gene.root();
        let x = gene.add_child(g, "x");
        linked_leaf(&mut gene, x, a);
        linked_leaf(&mut gene, x, b);
        let y = gene.add_child(g, "y");
        linked_leaf(&mut gene, y, a);
        linked_leaf(&mut gene, y, c);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(gene.node(g).data.event, Some(Event::Duplication));
        assert_eq!(summary.duplications, 1);
    }

    #[test]
    fn test_lca_is_least_common_ancestor() {
        // law 4: g.link is a common ancestor of the children's links
        // and no strict descendant of it is
        let mut species = Tree::new("R");
        let r = species.root();
        let s1 = species.add_child(r, "S1");
        let a = leaf_with(&mut species, s1, sn("A"));
        let b = leaf_with(&mut species, s1, sn("B"));
        leaf_with(&mut species, r, sn("C"));
        species.assign_preorder_ids();

        assert_eq!(lca_by_preorder(&species, a, b).unwrap(), s1);
        assert_eq!(lca_by_preorder(&species, a, a).unwrap(), a);
        assert_eq!(lca_by_preorder(&species, s1, a).unwrap(), s1);
    }

    #[test]
    fn test_event_totals_match_internal_count() {
        // law 5 on a caterpillar gene tree
        let (species, a, b) = species_ab();
        let mut gene = Tree::new("");
        let mut cur = gene.root();
        for i in 0..5 {
            let next = gene.add_child(cur, "");
            linked_leaf(&mut gene, cur, if i % 2 == 0 { a } else { b });
            cur = next;
        }
        // bottom internal becomes a cherry
        linked_leaf(&mut gene, cur, a);
        linked_leaf(&mut gene, cur, b);
        gene.assign_preorder_ids();

        let internals = gene.postorder().filter(|id| !gene.is_external(*id)).count();
        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        assert_eq!(summary.events_total(), internals);
    }

    #[test]
    fn test_determinism() {
        // law 6: identical inputs give identical events and counters
        let (species, a, b) = species_ab();
        let build = || {
            let mut gene = Tree::new("");
            let g = gene.root();
            let x = gene.add_child(g, "");
            linked_leaf(&mut gene, x, a);
            linked_leaf(&mut gene, x, a);
            linked_leaf(&mut gene, g, b);
            gene.assign_preorder_ids();
            gene
        };
        let mut gene1 = build();
        let mut gene2 = build();
        let s1 = Gsdi::new(GsdiOptions::default()).run(&mut gene1, &species).unwrap();
        let s2 = Gsdi::new(GsdiOptions::default()).run(&mut gene2, &species).unwrap();
        assert_eq!(
            (s1.speciations, s1.duplications, s1.ambiguous, s1.mapping_cost),
            (s2.speciations, s2.duplications, s2.ambiguous, s2.mapping_cost)
        );
        for (n1, n2) in gene1.preorder().zip(gene2.preorder()) {
            assert_eq!(gene1.node(n1).data.event, gene2.node(n2).data.event);
        }
    }

    #[test]
    fn test_mapping_cost() {
        // S3 shape: every child link sits one level below its parent's
        // link at X and Y, two levels at Z
        let mut species = Tree::new("R");
        let r = species.root();
        let s1 = species.add_child(r, "S1");
        let a = leaf_with(&mut species, s1, sn("A"));
        let b = leaf_with(&mut species, s1, sn("B"));
        let s2 = species.add_child(r, "S2");
        let c = leaf_with(&mut species, s2, sn("C"));
        let d = leaf_with(&mut species, s2, sn("D"));
        species.assign_preorder_ids();

        let mut gene = Tree::new("Z");
        let z = gene.root();
        let x = gene.add_child(z, "X");
        linked_leaf(&mut gene, x, a);
        linked_leaf(&mut gene, x, b);
        let y = gene.add_child(z, "Y");
        linked_leaf(&mut gene, y, c);
        linked_leaf(&mut gene, y, d);
        gene.assign_preorder_ids();

        let summary = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species).unwrap();
        // X: (2-1)+(2-1)=2, Y likewise, Z: (1-0)+(1-0)=2
        assert_eq!(summary.mapping_cost, 6);
    }

    #[test]
    fn test_unlinked_external_is_invalid_state() {
        let (species, a, _) = species_ab();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        gene.add_child(g, "unlinked");
        gene.assign_preorder_ids();

        let result = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_non_binary_gene_tree_is_invalid_state() {
        let (species, a, b) = species_ab();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        linked_leaf(&mut gene, g, b);
        linked_leaf(&mut gene, g, a);
        gene.assign_preorder_ids();

        let result = Gsdi::new(GsdiOptions::default()).run(&mut gene, &species);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_cancellation() {
        let (species, a, b) = species_ab();
        let mut gene = Tree::new("G");
        let g = gene.root();
        linked_leaf(&mut gene, g, a);
        linked_leaf(&mut gene, g, b);
        gene.assign_preorder_ids();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Gsdi::new(GsdiOptions::default())
            .with_cancel_token(cancel)
            .run(&mut gene, &species);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_reconcile_maps_then_runs() {
        // end to end: unmapped gene tree with taxonomies, strip enabled
        let mut species = Tree::new("S");
        let root = species.root();
        leaf_with(&mut species, root, sn("A"));
        leaf_with(&mut species, root, sn("B"));
        species.assign_preorder_ids();

        let mut gene = Tree::new("");
        let g = gene.root();
        let x = gene.add_child(g, "");
        leaf_with(&mut gene, x, sn("A"));
        leaf_with(&mut gene, x, sn("Zz"));
        leaf_with(&mut gene, g, sn("B"));
        gene.assign_preorder_ids();

        let options = GsdiOptions {
            strip_gene_tree: true,
            ..GsdiOptions::default()
        };
        let summary = Gsdi::new(options).reconcile(&mut gene, &mut species).unwrap();
        assert_eq!(summary.stripped_gene_labels, vec!["Zz".to_string()]);
        assert_eq!(summary.mapped_species.len(), 2);
        assert_eq!(
            (summary.speciations, summary.duplications, summary.ambiguous),
            (1, 0, 0)
        );
    }
}
