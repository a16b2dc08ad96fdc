//! Per-span bins: the cell-local half of the chart.
//!
//! A bin hosts the HGNodes of one cell `(i, j)`. Nodes with equal
//! signatures are merged, and a SuperItem indexes the nodes sharing an
//! LHS. Pruning happens here too: a beam cutoff with a fuzz band gates
//! newcomers, and a k-best cap evicts the worst survivors. Combination,
//! exhaustive Cartesian product or cube pruning, also lives here; the
//! driver only decides what to combine.

use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::rc::Rc;

use crate::chart::ChartStats;
use crate::config::ChartConfig;
use crate::feature::{FeatureFunction, FeatureState};
use crate::grammar::Rule;
use crate::hypergraph::{HGNode, HyperEdge, NodeArena, NodeId, Signature};
use crate::symbol::Symbol;

/// Identity of a SuperItem: dot items hold these keys and resolve the live
/// node list when the consuming cell is completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SuperItemKey {
    pub start: usize,
    pub end: usize,
    pub lhs: Symbol,
}

/// One antecedent slot resolved for combination: the SuperItem's LHS plus
/// a snapshot of its member nodes.
#[derive(Clone, Debug)]
pub(crate) struct AntSlot {
    pub lhs: Symbol,
    pub nodes: Vec<NodeId>,
}

/// Costs and states of one candidate rule application, as reported by the
/// feature functions. Lattice cost is not yet folded in.
#[derive(Clone, Debug)]
pub struct ComputeItemResult {
    pub transition_cost: f64,
    pub best_cost: f64,
    pub est_total_cost: f64,
    pub states: Vec<Option<FeatureState>>,
}

/// Run every model over one rule application.
pub(crate) fn compute_item(
    models: &[Box<dyn FeatureFunction>],
    arena: &NodeArena,
    rule: &Rule,
    ants: &[NodeId],
    stats: &mut ChartStats,
) -> ComputeItemResult {
    stats.n_called_compute_item += 1;
    let mut transition_cost = 0.0;
    let mut future_cost = 0.0;
    let mut states = Vec::with_capacity(models.len());
    for (m, model) in models.iter().enumerate() {
        let ant_states: Vec<Option<&FeatureState>> = ants
            .iter()
            .map(|&a| arena[a].states[m].as_ref())
            .collect();
        let t = model.transition(rule, &ant_states);
        transition_cost += t.cost;
        future_cost += t.future_cost;
        states.push(t.state);
    }
    let best_cost = transition_cost + ants.iter().map(|&a| arena[a].best_cost).sum::<f64>();
    ComputeItemResult {
        transition_cost,
        best_cost,
        est_total_cost: best_cost + future_cost,
        states,
    }
}

/// All HGNodes of one cell, indexed for merging and pruning.
#[derive(Debug)]
pub struct Bin {
    i: usize,
    j: usize,
    nodes_by_signature: FxHashMap<Signature, NodeId>,
    super_items: FxHashMap<Symbol, Vec<NodeId>>,
    /// Members in insertion order; the base for the stable sorted view.
    members: Vec<NodeId>,
    sorted: Vec<NodeId>,
    dirty: bool,
    best_est_total_cost: f64,
}

impl Bin {
    pub fn new(i: usize, j: usize) -> Self {
        Bin {
            i,
            j,
            nodes_by_signature: FxHashMap::default(),
            super_items: FxHashMap::default(),
            members: Vec::new(),
            sorted: Vec::new(),
            dirty: false,
            best_est_total_cost: f64::INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn num_items(&self) -> usize {
        self.members.len()
    }

    /// Member nodes of the SuperItem for `lhs`, if present.
    pub fn super_item(&self, lhs: Symbol) -> Option<&[NodeId]> {
        self.super_items.get(&lhs).map(|v| v.as_slice())
    }

    /// LHS symbols that have a SuperItem in this bin.
    pub fn super_lhs(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.super_items.keys().copied()
    }

    /// Nodes sorted ascending by `est_total_cost`, stable for ties.
    pub fn get_sorted_items(&mut self, arena: &NodeArena) -> &[NodeId] {
        if self.dirty {
            self.sorted = self.members.clone();
            self.sorted
                .sort_by_key(|&id| OrderedFloat(arena[id].est_total_cost));
            self.dirty = false;
        }
        &self.sorted
    }

    /// Add an arity-0 rule as an axiom.
    pub(crate) fn add_axiom(
        &mut self,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        rule: Rc<Rule>,
        lattice_cost: f64,
        config: &ChartConfig,
        stats: &mut ChartStats,
    ) -> Option<NodeId> {
        let result = compute_item(models, arena, &rule, &[], stats);
        self.add_deduction(arena, rule, Vec::new(), result, lattice_cost, config, stats)
    }

    /// Insert one candidate application: pre-prune against the cutoff,
    /// merge into an existing node with the same signature, or create a
    /// new node. Returns the node id only when a node was newly created
    /// and survived the cap (the contract unary closure relies on).
    pub(crate) fn add_deduction(
        &mut self,
        arena: &mut NodeArena,
        rule: Rc<Rule>,
        ants: Vec<NodeId>,
        result: ComputeItemResult,
        lattice_cost: f64,
        config: &ChartConfig,
        stats: &mut ChartStats,
    ) -> Option<NodeId> {
        let est_total_cost = result.est_total_cost + lattice_cost;
        let cutoff = config.cutoff(self.best_est_total_cost);
        if est_total_cost > cutoff + config.fuzz1 {
            stats.n_prepruned += 1;
            stats.n_prepruned_fuzz1 += 1;
            return None;
        }

        let lhs = rule.lhs;
        let best_cost = result.best_cost + lattice_cost;
        let edge = HyperEdge {
            rule: Some(rule),
            antecedents: ants,
            transition_cost: result.transition_cost + lattice_cost,
            best_cost,
        };
        let signature = Signature {
            lhs,
            states: result.states,
        };

        if let Some(&existing) = self.nodes_by_signature.get(&signature) {
            let node = &mut arena[existing];
            node.add_edge(edge);
            if est_total_cost < node.est_total_cost {
                node.est_total_cost = est_total_cost;
                self.dirty = true;
            }
            stats.n_merged += 1;
            self.best_est_total_cost = self.best_est_total_cost.min(est_total_cost);
            return None;
        }

        let states = signature.states.clone();
        let id = arena.push(HGNode {
            i: self.i,
            j: self.j,
            lhs,
            states,
            edges: vec![edge],
            best_edge: 0,
            best_cost,
            est_total_cost,
        });
        self.nodes_by_signature.insert(signature, id);
        self.super_items.entry(lhs).or_default().push(id);
        self.members.push(id);
        self.dirty = true;
        self.best_est_total_cost = self.best_est_total_cost.min(est_total_cost);
        stats.n_added += 1;

        if config.max_items > 0 && self.members.len() > config.max_items {
            let evicted = self.evict_worst(arena);
            stats.n_pruned += 1;
            if evicted == id {
                return None;
            }
        }
        Some(id)
    }

    /// Drop the worst member from every index. The node stays in the
    /// arena: edges built in wider cells may already reference it.
    fn evict_worst(&mut self, arena: &NodeArena) -> NodeId {
        let worst = *self
            .members
            .iter()
            .max_by_key(|&&id| OrderedFloat(arena[id].est_total_cost))
            .expect("evict_worst on empty bin");
        self.members.retain(|&id| id != worst);
        self.nodes_by_signature.remove(&arena[worst].signature());
        let lhs = arena[worst].lhs;
        let emptied = match self.super_items.get_mut(&lhs) {
            Some(nodes) => {
                nodes.retain(|&id| id != worst);
                nodes.is_empty()
            }
            None => false,
        };
        if emptied {
            self.super_items.remove(&lhs);
        }
        self.dirty = true;
        worst
    }

    /// Rules whose slot nonterminals line up with the antecedent slots.
    fn slot_compatible<'r>(rules: &'r [Rc<Rule>], slots: &[AntSlot]) -> Vec<&'r Rc<Rule>> {
        rules
            .iter()
            .filter(|rule| {
                rule.arity == slots.len()
                    && rule
                        .source_slots()
                        .zip(slots.iter())
                        .all(|(sym, slot)| sym == slot.lhs)
            })
            .collect()
    }

    /// Exhaustive combination: every rule crossed with every choice of one
    /// node per antecedent slot.
    pub(crate) fn complete_cell(
        &mut self,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        slots: &[AntSlot],
        rules: &[Rc<Rule>],
        arity: usize,
        lattice_cost: f64,
        config: &ChartConfig,
        stats: &mut ChartStats,
    ) {
        debug_assert_eq!(arity, slots.len());
        if slots.iter().any(|s| s.nodes.is_empty()) {
            return;
        }
        for rule in Self::slot_compatible(rules, slots) {
            let mut odometer = vec![0usize; slots.len()];
            loop {
                let ants: Vec<NodeId> = odometer
                    .iter()
                    .zip(slots)
                    .map(|(&k, slot)| slot.nodes[k])
                    .collect();
                let result = compute_item(models, arena, rule, &ants, stats);
                self.add_deduction(
                    arena,
                    Rc::clone(rule),
                    ants,
                    result,
                    lattice_cost,
                    config,
                    stats,
                );

                let mut pos = slots.len();
                loop {
                    if pos == 0 {
                        break;
                    }
                    pos -= 1;
                    odometer[pos] += 1;
                    if odometer[pos] < slots[pos].nodes.len() {
                        break;
                    }
                    odometer[pos] = 0;
                }
                if odometer.iter().all(|&k| k == 0) {
                    break;
                }
            }
        }
    }

    /// Cube pruning: treat the sorted rule list and each slot's sorted
    /// node list as axes of a grid, and pop candidate corners best-first
    /// from a heap, expanding each popped corner's neighbors. Stops at the
    /// pop limit or once a popped corner is past the cutoff's fuzz band;
    /// pops are cost-ordered, so nothing cheaper remains.
    pub(crate) fn complete_cell_cube_prune(
        &mut self,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        slots: &[AntSlot],
        rules: &[Rc<Rule>],
        lattice_cost: f64,
        config: &ChartConfig,
        stats: &mut ChartStats,
    ) {
        let rules = Self::slot_compatible(rules, slots);
        if rules.is_empty() || slots.iter().any(|s| s.nodes.is_empty()) {
            return;
        }

        // Sort each slot's snapshot so axis order is ascending cost.
        let mut sorted_slots: Vec<AntSlot> = slots.to_vec();
        for slot in &mut sorted_slots {
            slot.nodes
                .sort_by_key(|&id| OrderedFloat(arena[id].est_total_cost));
        }

        // corner[0] indexes the rule axis, corner[1..] the slot axes
        let mut heap: PriorityQueue<Vec<usize>, Reverse<(OrderedFloat<f64>, u64)>> =
            PriorityQueue::new();
        let mut computed: FxHashMap<Vec<usize>, ComputeItemResult> = FxHashMap::default();
        let mut seen: FxHashSet<Vec<usize>> = FxHashSet::default();
        let mut seq: u64 = 0;

        let origin = vec![0usize; 1 + sorted_slots.len()];
        Self::push_corner(
            origin,
            &rules,
            &sorted_slots,
            lattice_cost,
            models,
            arena,
            &mut heap,
            &mut computed,
            &mut seen,
            &mut seq,
            stats,
        );

        let mut pops: usize = 0;
        while let Some((corner, Reverse((OrderedFloat(cost), _)))) = heap.pop() {
            if cost > config.cutoff(self.best_est_total_cost) + config.fuzz2 {
                stats.n_prepruned += 1;
                stats.n_prepruned_fuzz2 += 1;
                break;
            }
            let result = computed
                .remove(&corner)
                .expect("popped corner was never computed");
            let rule = rules[corner[0]];
            let ants: Vec<NodeId> = corner[1..]
                .iter()
                .zip(&sorted_slots)
                .map(|(&k, slot)| slot.nodes[k])
                .collect();
            self.add_deduction(
                arena,
                Rc::clone(rule),
                ants,
                result,
                lattice_cost,
                config,
                stats,
            );
            pops += 1;
            if config.cube_prune_pop_limit > 0 && pops >= config.cube_prune_pop_limit {
                break;
            }

            for axis in 0..corner.len() {
                let mut neighbor = corner.clone();
                neighbor[axis] += 1;
                let bound = if axis == 0 {
                    rules.len()
                } else {
                    sorted_slots[axis - 1].nodes.len()
                };
                if neighbor[axis] < bound {
                    Self::push_corner(
                        neighbor,
                        &rules,
                        &sorted_slots,
                        lattice_cost,
                        models,
                        arena,
                        &mut heap,
                        &mut computed,
                        &mut seen,
                        &mut seq,
                        stats,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_corner(
        corner: Vec<usize>,
        rules: &[&Rc<Rule>],
        slots: &[AntSlot],
        lattice_cost: f64,
        models: &[Box<dyn FeatureFunction>],
        arena: &NodeArena,
        heap: &mut PriorityQueue<Vec<usize>, Reverse<(OrderedFloat<f64>, u64)>>,
        computed: &mut FxHashMap<Vec<usize>, ComputeItemResult>,
        seen: &mut FxHashSet<Vec<usize>>,
        seq: &mut u64,
        stats: &mut ChartStats,
    ) {
        if !seen.insert(corner.clone()) {
            return;
        }
        let rule = rules[corner[0]];
        let ants: Vec<NodeId> = corner[1..]
            .iter()
            .zip(slots)
            .map(|(&k, slot)| slot.nodes[k])
            .collect();
        let result = compute_item(models, arena, rule, &ants, stats);
        let priority = Reverse((OrderedFloat(result.est_total_cost + lattice_cost), *seq));
        *seq += 1;
        computed.insert(corner.clone(), result);
        heap.push(corner, priority);
    }

    /// Absorb the top cell into this (goal) bin: one edge per node whose
    /// LHS is the goal symbol, each carrying the models' finalization
    /// cost. Returns the single goal node, or `None` when nothing in the
    /// top cell has the goal LHS.
    pub(crate) fn transit_to_goal(
        &mut self,
        arena: &mut NodeArena,
        models: &[Box<dyn FeatureFunction>],
        top_items: &[NodeId],
        goal: Symbol,
    ) -> Option<NodeId> {
        let mut edges: Vec<HyperEdge> = Vec::new();
        for &id in top_items {
            if arena[id].lhs != goal {
                continue;
            }
            let final_cost: f64 = models
                .iter()
                .enumerate()
                .map(|(m, model)| model.final_cost(arena[id].states[m].as_ref()))
                .sum();
            edges.push(HyperEdge {
                rule: None,
                antecedents: vec![id],
                transition_cost: final_cost,
                best_cost: arena[id].best_cost + final_cost,
            });
        }
        if edges.is_empty() {
            return None;
        }

        let (best_edge, best_cost) = edges
            .iter()
            .enumerate()
            .map(|(k, e)| (k, e.best_cost))
            .min_by_key(|&(_, c)| OrderedFloat(c))
            .expect("goal bin edge list is non-empty");
        let node = HGNode {
            i: self.i,
            j: self.j,
            lhs: goal,
            states: vec![None; models.len()],
            edges,
            best_edge,
            best_cost,
            est_total_cost: best_cost,
        };
        let id = arena.push(node);
        self.super_items.entry(goal).or_default().push(id);
        self.members.push(id);
        self.dirty = true;
        self.best_est_total_cost = best_cost;
        Some(id)
    }
}

/// The chart's cell grid: `sent_len` rows by `sent_len + 1` columns, with
/// only cells `i < j` ever populated. Cells are created on first insert.
#[derive(Debug)]
pub(crate) struct CellGrid {
    cells: Vec<Vec<Option<Bin>>>,
}

impl CellGrid {
    pub fn new(sent_len: usize) -> Self {
        CellGrid {
            cells: (0..sent_len)
                .map(|_| (0..=sent_len).map(|_| None).collect())
                .collect(),
        }
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&Bin> {
        self.cells[i][j].as_ref()
    }

    pub fn get_mut(&mut self, i: usize, j: usize) -> Option<&mut Bin> {
        self.cells[i][j].as_mut()
    }

    pub fn ensure(&mut self, i: usize, j: usize) -> &mut Bin {
        self.cells[i][j].get_or_insert_with(|| Bin::new(i, j))
    }
}
