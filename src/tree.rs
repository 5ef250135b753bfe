//! The arena-based rooted phylogeny shared by the gene and species
//! sides of a reconciliation.
//!
//! Nodes live in a `Vec` and are addressed by `NodeId` (their arena
//! index). Separately from the arena index, every node carries a
//! preorder id assigned by `assign_preorder_ids`; the reconciliation
//! core relies on the fact that after numbering, an ancestor's id is
//! always smaller than any of its descendants' ids.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::taxonomy::Taxonomy;

/// Index of a node in its owning tree's arena.
pub type NodeId = usize;

/// The evolutionary event reconstructed for an internal gene-tree node.
///
/// A plain tagged value; the per-run totals are kept on the GSDI
/// summary instead of the event itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Speciation,
    Duplication,
    SpeciationOrDuplication,
}

/// Per-node payload.
///
/// `link` is a back-reference into *another* tree's arena (gene node to
/// species node), never ownership. `visual` carries rendering
/// attributes opaquely; the core never interprets them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeData {
    pub taxonomy: Option<Taxonomy>,
    pub event: Option<Event>,
    pub link: Option<NodeId>,
    pub visual: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Preorder id, stable until the next `assign_preorder_ids`.
    pub id: usize,
    pub name: String,
    pub data: NodeData,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) external_count: usize,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Node {
            id: 0,
            name,
            data: NodeData::default(),
            parent,
            children: Vec::new(),
            external_count: 0,
        }
    }
}

/// A rooted tree with ordered descendants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut tree = Tree {
            nodes: vec![Node::new(root_name.into(), None)],
            root: 0,
        };
        tree.assign_preorder_ids();
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a child under `parent` and return its id. The new node is
    /// not preorder-numbered until the next `assign_preorder_ids`.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(name.into(), Some(parent)));
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn is_external(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    /// Number of external nodes under (and including) `id`, as last
    /// refreshed by `update_external_counts`.
    pub fn external_count(&self, id: NodeId) -> usize {
        self.nodes[id].external_count
    }

    /// Edges between `id` and the root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = id;
        while let Some(p) = self.nodes[cur].parent {
            depth += 1;
            cur = p;
        }
        depth
    }

    /// Display form for a node in diagnostics: its taxonomy label, else
    /// its name, else its preorder id.
    pub fn node_label(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        if let Some(tax) = &node.data.taxonomy {
            let label = tax.label();
            if !label.is_empty() {
                return label;
            }
        }
        if !node.name.is_empty() {
            return node.name.clone();
        }
        node.id.to_string()
    }

    /// Renumber every node so that a depth-first walk from the root
    /// sees strictly increasing ids (ancestors before descendants).
    pub fn assign_preorder_ids(&mut self) {
        let order: Vec<NodeId> = self.preorder().collect();
        for (ix, id) in order.into_iter().enumerate() {
            self.nodes[id].id = ix;
        }
    }

    /// Recompute the external-descendant count of every node.
    pub fn update_external_counts(&mut self) {
        let order: Vec<NodeId> = self.postorder().collect();
        for id in order {
            let count = if self.nodes[id].children.is_empty() {
                1
            } else {
                self.nodes[id]
                    .children
                    .iter()
                    .map(|c| self.nodes[*c].external_count)
                    .sum()
            };
            self.nodes[id].external_count = count;
        }
    }

    /// Generates an iterator that traces over the whole tree. During
    /// preorder traversal it yields `(id, true)` and during postorder
    /// traversal `(id, false)`; children are visited left to right.
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse {
            tree: self,
            nodes_left: vec![self.root],
            visited_nodes: Vec::new(),
        }
    }

    pub fn preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.traverse().filter(|(_, pre)| *pre).map(|(id, _)| id)
    }

    pub fn postorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.traverse().filter(|(_, pre)| !*pre).map(|(id, _)| id)
    }

    /// External nodes left to right.
    pub fn externals_forward(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder().filter(|id| self.is_external(*id))
    }

    /// External nodes under (and including) `id`, left to right.
    pub fn subtree_externals(&self, id: NodeId) -> Vec<NodeId> {
        let mut externals = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if self.is_external(cur) {
                externals.push(cur);
            } else {
                stack.extend(self.nodes[cur].children.iter().rev());
            }
        }
        externals
    }

    /// Remove the marked external nodes in one pass.
    ///
    /// An internal node left with a single child is spliced out (its
    /// remaining child reattaches to the grandparent) so a binary tree
    /// stays binary; an internal node left with no children disappears.
    /// If the root itself is reduced to one child, that child becomes
    /// the new root. The arena is compacted, preorder ids and external
    /// counts refreshed.
    ///
    /// Returns the mapping from surviving old ids to new ids so that
    /// links held by *other* trees into this arena can be remapped.
    pub fn remove_externals(&mut self, marked: &[NodeId]) -> HashMap<NodeId, NodeId> {
        let marked: HashSet<NodeId> = marked
            .iter()
            .copied()
            .filter(|id| self.is_external(*id))
            .collect();
        if marked.is_empty() {
            self.assign_preorder_ids();
            self.update_external_counts();
            return (0..self.nodes.len()).map(|id| (id, id)).collect();
        }

        // Postorder pass electing, for each surviving subtree, the old
        // node that represents it after splicing.
        let mut representative: HashMap<NodeId, NodeId> = HashMap::new();
        let mut kept_children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let order: Vec<NodeId> = self.postorder().collect();
        for id in order {
            if self.is_external(id) {
                if !marked.contains(&id) {
                    representative.insert(id, id);
                }
                continue;
            }
            let survivors: Vec<NodeId> = self.nodes[id]
                .children
                .iter()
                .filter_map(|c| representative.get(c).copied())
                .collect();
            match survivors.len() {
                0 => {}
                1 => {
                    representative.insert(id, survivors[0]);
                }
                _ => {
                    representative.insert(id, id);
                    kept_children.insert(id, survivors);
                }
            }
        }

        let new_root = representative.get(&self.root).copied().unwrap_or(self.root);

        // Rebuild the arena in preorder so index order matches id order.
        let mut old_nodes: Vec<Option<Node>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        let mut stack: Vec<(NodeId, Option<NodeId>)> = vec![(new_root, None)];
        while let Some((old_id, new_parent)) = stack.pop() {
            // each surviving node is visited exactly once
            let mut node = old_nodes[old_id].take().unwrap();
            let children = kept_children.remove(&old_id).unwrap_or_default();
            let new_id = self.nodes.len();
            remap.insert(old_id, new_id);
            node.parent = new_parent;
            node.children = Vec::new();
            self.nodes.push(node);
            if let Some(p) = new_parent {
                self.nodes[p].children.push(new_id);
            }
            for child in children.into_iter().rev() {
                stack.push((child, Some(new_id)));
            }
        }
        self.root = 0;

        self.assign_preorder_ids();
        self.update_external_counts();
        remap
    }
}

pub struct Traverse<'t> {
    tree: &'t Tree,
    nodes_left: Vec<NodeId>,
    visited_nodes: Vec<NodeId>,
}

impl Iterator for Traverse<'_> {
    type Item = (NodeId, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let cur_node = *self.nodes_left.last()?;
        let node_visited = self.visited_nodes.last() == Some(&cur_node);
        if node_visited {
            self.visited_nodes.pop();
            Some((self.nodes_left.pop().unwrap(), false))
        } else {
            self.visited_nodes.push(cur_node);
            // children pushed in reverse so the walk runs left to right
            self.nodes_left
                .extend(self.tree.children(cur_node).iter().rev());
            Some((cur_node, true))
        }
    }
}
