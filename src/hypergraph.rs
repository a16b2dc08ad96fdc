//! Packed derivation forest: or-nodes (`HGNode`), and-nodes (`HyperEdge`),
//! and the arena that owns them.
//!
//! Edges reference antecedents by `NodeId` and always point to strictly
//! smaller spans, so the structure is a DAG by construction; integer
//! handles sidestep ownership cycles and make antecedent lists cheap to
//! share.

use std::rc::Rc;

use crate::feature::FeatureState;
use crate::grammar::Rule;
use crate::symbol::Symbol;

/// Handle into a `NodeArena`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Equivalence signature of an HGNode: its LHS plus every stateful model's
/// state contribution. Nodes with equal signatures are merged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub lhs: Symbol,
    pub states: Vec<Option<FeatureState>>,
}

/// One rule application ("and" node). `rule` is `None` only for the
/// implicit goal transition.
#[derive(Clone, Debug)]
pub struct HyperEdge {
    pub rule: Option<Rc<Rule>>,
    pub antecedents: Vec<NodeId>,
    /// Cost contributed by this application alone, lattice cost included.
    pub transition_cost: f64,
    /// Best derivation cost through this edge.
    pub best_cost: f64,
}

/// One equivalence class of derivations ("or" node) for a span.
#[derive(Clone, Debug)]
pub struct HGNode {
    pub i: usize,
    pub j: usize,
    pub lhs: Symbol,
    pub states: Vec<Option<FeatureState>>,
    pub edges: Vec<HyperEdge>,
    /// Index into `edges` of the cheapest derivation.
    pub best_edge: usize,
    /// Best derivation cost through this node.
    pub best_cost: f64,
    /// `best_cost` plus the outside estimate; the pruning key.
    pub est_total_cost: f64,
}

impl HGNode {
    pub fn signature(&self) -> Signature {
        Signature {
            lhs: self.lhs,
            states: self.states.clone(),
        }
    }

    /// Attach an edge, keeping `best_edge`/`best_cost` current. Returns
    /// true if the edge improved the node.
    pub fn add_edge(&mut self, edge: HyperEdge) -> bool {
        let improved = edge.best_cost < self.best_cost;
        if improved {
            self.best_cost = edge.best_cost;
            self.best_edge = self.edges.len();
        }
        self.edges.push(edge);
        improved
    }
}

/// Arena owning every node of one sentence's forest.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<HGNode>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: HGNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &HGNode {
        &self.nodes[id.as_usize()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut HGNode {
        &mut self.nodes[id.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::ops::Index<NodeId> for NodeArena {
    type Output = HGNode;

    fn index(&self, id: NodeId) -> &HGNode {
        self.get(id)
    }
}

impl std::ops::IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut HGNode {
        self.get_mut(id)
    }
}

/// The parse result: an arena plus the goal node covering the whole input.
#[derive(Debug)]
pub struct HyperGraph {
    arena: NodeArena,
    root: NodeId,
    sent_id: usize,
    sent_len: usize,
}

impl HyperGraph {
    pub fn new(arena: NodeArena, root: NodeId, sent_id: usize, sent_len: usize) -> Self {
        HyperGraph {
            arena,
            root,
            sent_id,
            sent_len,
        }
    }

    pub fn root(&self) -> &HGNode {
        self.arena.get(self.root)
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &HGNode {
        self.arena.get(id)
    }

    pub fn sent_id(&self) -> usize {
        self.sent_id
    }

    pub fn sent_len(&self) -> usize {
        self.sent_len
    }

    /// Cost of the best complete derivation.
    pub fn best_cost(&self) -> f64 {
        self.root().best_cost
    }

    pub fn num_nodes(&self) -> usize {
        self.arena.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn leaf(i: usize, j: usize, lhs: Symbol, cost: f64) -> HGNode {
        HGNode {
            i,
            j,
            lhs,
            states: vec![],
            edges: vec![HyperEdge {
                rule: None,
                antecedents: vec![],
                transition_cost: cost,
                best_cost: cost,
            }],
            best_edge: 0,
            best_cost: cost,
            est_total_cost: cost,
        }
    }

    #[test]
    fn test_arena_handles() {
        let mut table = SymbolTable::new();
        let x = table.nonterminal("X");

        let mut arena = NodeArena::new();
        let a = arena.push(leaf(0, 1, x, 1.0));
        let b = arena.push(leaf(1, 2, x, 2.0));

        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[a].best_cost, 1.0);
        assert_eq!(arena[b].i, 1);
    }

    #[test]
    fn test_add_edge_tracks_best() {
        let mut table = SymbolTable::new();
        let x = table.nonterminal("X");

        let mut node = leaf(0, 2, x, 5.0);
        let improved = node.add_edge(HyperEdge {
            rule: None,
            antecedents: vec![],
            transition_cost: 3.0,
            best_cost: 3.0,
        });
        assert!(improved);
        assert_eq!(node.best_cost, 3.0);
        assert_eq!(node.best_edge, 1);

        let improved = node.add_edge(HyperEdge {
            rule: None,
            antecedents: vec![],
            transition_cost: 4.0,
            best_cost: 4.0,
        });
        assert!(!improved);
        assert_eq!(node.best_edge, 1);
        assert_eq!(node.edges.len(), 3);
    }

    #[test]
    fn test_signature_equality() {
        let mut table = SymbolTable::new();
        let x = table.nonterminal("X");
        let y = table.nonterminal("Y");

        let a = leaf(0, 1, x, 1.0);
        let b = leaf(2, 3, x, 9.0);
        let c = leaf(0, 1, y, 1.0);

        // signatures ignore span and cost
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }
}
