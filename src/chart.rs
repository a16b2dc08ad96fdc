//! The CKY-over-lattice driver.
//!
//! Seeds the chart (manual constraint axioms, then OOV axioms) and runs
//! the strict `(width, i)` schedule: advance dot charts, complete rules
//! into the bin, close under unary rules, seed new dot items. Finally the
//! top cell is transitioned into the goal bin. Combination and pruning
//! live in [`crate::bins`]; this module only decides what happens when.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bins::{compute_item, AntSlot, Bin, CellGrid, SuperItemKey};
use crate::config::ChartConfig;
use crate::constraint::{
    is_nonterminal_token, ConstraintRule, ConstraintSpan, FilterRule, FilterTable, HardSpans,
};
use crate::dotchart::DotChart;
use crate::feature::FeatureFunction;
use crate::grammar::{Grammar, Rule};
use crate::hypergraph::{HyperGraph, NodeArena};
use crate::lattice::{Lattice, LatticeError};
use crate::symbol::{Symbol, SymbolTable};

/// Why a parse failed. Anything that is normal pruning or a failed match
/// is not an error; those only move counters.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(
        "no complete item in cell (0, {sent_len}): either the grammars admit \
         no derivation covering the input, or pruning was too aggressive"
    )]
    NoDerivation { sent_len: usize },
    #[error("malformed constraint in span ({start}, {end}): {reason}")]
    MalformedConstraint {
        start: usize,
        end: usize,
        reason: String,
    },
    #[error(transparent)]
    Lattice(#[from] LatticeError),
    #[error("decoding was cancelled")]
    Cancelled,
}

/// Per-sentence diagnostics. Every counter is owned by one `Chart`, so
/// parallel sentences never race.
#[derive(Debug, Clone, Default)]
pub struct ChartStats {
    pub n_added: u64,
    pub n_merged: u64,
    pub n_pruned: u64,
    pub n_prepruned: u64,
    pub n_prepruned_fuzz1: u64,
    pub n_prepruned_fuzz2: u64,
    pub n_dotitem_added: u64,
    pub n_called_compute_item: u64,
}

/// One sentence's chart: cells, per-grammar dot charts, and the node arena
/// the final hypergraph is carved from.
pub struct Chart<'a> {
    lattice: &'a Lattice,
    models: &'a [Box<dyn FeatureFunction>],
    grammars: &'a [Grammar],
    config: ChartConfig,
    sent_len: usize,
    sent_id: usize,
    goal_symbol: Symbol,
    cells: CellGrid,
    goal_bin: Bin,
    dotcharts: Vec<DotChart<'a>>,
    arena: NodeArena,
    filters: FilterTable,
    hard_spans: HardSpans,
    stats: ChartStats,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Chart<'a> {
    /// Build and seed a chart: dot-chart seeds, manual constraint axioms,
    /// then OOV axioms. Fails on a malformed lattice or constraint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lattice: &'a Lattice,
        models: &'a [Box<dyn FeatureFunction>],
        grammars: &'a [Grammar],
        symbols: &mut SymbolTable,
        config: ChartConfig,
        goal: &str,
        constraints: &[ConstraintSpan],
        sent_id: usize,
    ) -> Result<Self, DecodeError> {
        lattice.validate()?;
        let sent_len = lattice.sent_len();
        for grammar in grammars {
            debug_assert!(
                grammar.is_sorted(),
                "grammars must be sorted (Grammar::sort_rules) before parsing"
            );
        }

        let goal_symbol = symbols.nonterminal(goal);
        let oov_symbol = symbols.nonterminal(&config.oov_nonterminal);

        let mut chart = Chart {
            lattice,
            models,
            grammars,
            sent_len,
            sent_id,
            goal_symbol,
            cells: CellGrid::new(sent_len),
            goal_bin: Bin::new(0, sent_len),
            dotcharts: grammars
                .iter()
                .map(|g| DotChart::new(g, sent_len))
                .collect(),
            arena: NodeArena::new(),
            filters: FilterTable::default(),
            hard_spans: HardSpans::default(),
            stats: ChartStats::default(),
            cancel: None,
            config,
        };
        for dotchart in &mut chart.dotcharts {
            dotchart.seed(&mut chart.stats);
        }
        chart.seed_constraints(symbols, constraints)?;
        chart.seed_oov(oov_symbol);
        tracing::debug!(sent_id, sent_len, "finished seeding chart");
        Ok(chart)
    }

    /// Install a cancellation token, polled once per cell.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn stats(&self) -> &ChartStats {
        &self.stats
    }

    /// Manual RULE constraints become axioms (feature values zeroed for
    /// hard spans); LHS/RHS constraints become filter entries. Constraint
    /// symbols are interned here so the table is untouched during expand.
    fn seed_constraints(
        &mut self,
        symbols: &mut SymbolTable,
        constraints: &[ConstraintSpan],
    ) -> Result<(), DecodeError> {
        for span in constraints {
            if span.start >= span.end || span.end > self.sent_len {
                return Err(DecodeError::MalformedConstraint {
                    start: span.start,
                    end: span.end,
                    reason: format!("span is not inside the {}-word input", self.sent_len),
                });
            }
            for rule in &span.rules {
                match rule {
                    ConstraintRule::Rule {
                        lhs,
                        source,
                        target,
                        features,
                    } => {
                        if let Some(token) = source.iter().find(|t| is_nonterminal_token(t)) {
                            return Err(DecodeError::MalformedConstraint {
                                start: span.start,
                                end: span.end,
                                reason: format!(
                                    "manual rule has nonterminal slot {token}; only arity-0 rules are allowed"
                                ),
                            });
                        }
                        if features.len() != self.models.len() {
                            return Err(DecodeError::MalformedConstraint {
                                start: span.start,
                                end: span.end,
                                reason: format!(
                                    "manual rule carries {} feature values but {} models are configured",
                                    features.len(),
                                    self.models.len()
                                ),
                            });
                        }
                        let features = if span.hard {
                            vec![0.0; features.len()]
                        } else {
                            features.clone()
                        };
                        if span.hard {
                            tracing::debug!(span.start, span.end, "hard rule constraint");
                            self.hard_spans.add(span.start, span.end);
                        }
                        let manual = Rc::new(Rule::manual(
                            symbols.nonterminal(lhs),
                            symbols.terminals(source),
                            symbols.terminals(target),
                            features,
                        ));
                        let bin = self.cells.ensure(span.start, span.end);
                        bin.add_axiom(
                            &mut self.arena,
                            self.models,
                            manual,
                            0.0,
                            &self.config,
                            &mut self.stats,
                        );
                    }
                    ConstraintRule::Lhs { lhs } => {
                        self.filters.insert(
                            span.start,
                            span.end,
                            FilterRule::Lhs(symbols.nonterminal(lhs)),
                        );
                    }
                    ConstraintRule::Rhs { target } => {
                        self.filters.insert(
                            span.start,
                            span.end,
                            FilterRule::Target(symbols.terminals(target)),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// One OOV axiom per lattice arc, except inside hard-rule spans.
    fn seed_oov(&mut self, oov_symbol: Symbol) {
        if !self.config.allow_oov {
            return;
        }
        for tail in 0..=self.sent_len {
            for arc in self.lattice.outgoing(tail) {
                if self.hard_spans.contains(tail, arc.head) {
                    tracing::trace!(
                        tail,
                        head = arc.head,
                        "hard rule constraint suppresses OOV axiom"
                    );
                    continue;
                }
                let rule = Rc::new(Rule::oov(oov_symbol, arc.label, self.models.len()));
                let cost = arc.cost;
                let head = arc.head;
                let bin = self.cells.ensure(tail, head);
                bin.add_axiom(
                    &mut self.arena,
                    self.models,
                    rule,
                    cost,
                    &self.config,
                    &mut self.stats,
                );
            }
        }
    }

    /// Build the hypergraph. Consumes the node arena, so a chart expands
    /// at most once.
    pub fn expand(&mut self) -> Result<HyperGraph, DecodeError> {
        let lattice = self.lattice;
        let grammars = self.grammars;

        for width in 1..=self.sent_len {
            for i in 0..=(self.sent_len - width) {
                if let Some(flag) = &self.cancel {
                    if flag.load(Ordering::Relaxed) {
                        return Err(DecodeError::Cancelled);
                    }
                }
                let j = i + width;
                tracing::trace!(i, j, "processing span");

                // (1) advance dot items into (i, j)
                for dotchart in &mut self.dotcharts {
                    dotchart.expand_cell(i, j, lattice, &self.cells, &mut self.stats);
                }

                // (2) complete matched rules into the bin
                for g in 0..grammars.len() {
                    if !grammars[g].has_rule_for_span(i, j, self.sent_len) {
                        continue;
                    }
                    let Some(dotbin) = self.dotcharts[g].bin(i, j) else {
                        continue;
                    };
                    let work: Vec<(Vec<Rc<Rule>>, usize, Vec<SuperItemKey>, f64)> = dotbin
                        .items()
                        .iter()
                        .filter_map(|dt| {
                            grammars[g].rules_at(dt.tnode).map(|rc| {
                                (
                                    rc.sorted_rules().to_vec(),
                                    rc.arity(),
                                    dt.ants.to_vec(),
                                    dt.lattice_cost,
                                )
                            })
                        })
                        .collect();
                    for (rules, arity, ant_keys, lattice_cost) in work {
                        let rules = self.filter_rules(i, j, rules);
                        if rules.is_empty() {
                            continue;
                        }
                        if arity == 0 {
                            self.add_axioms(i, j, &rules, lattice_cost);
                        } else {
                            self.complete_cell(i, j, &ant_keys, &rules, arity, lattice_cost);
                        }
                    }
                }

                // (3) unary closure
                for g in 0..grammars.len() {
                    if grammars[g].has_rule_for_span(i, j, self.sent_len) {
                        self.add_unary_items(g, i, j);
                    }
                }

                // (4) dot items that start with a nonterminal completed here
                for (g, dotchart) in self.dotcharts.iter_mut().enumerate() {
                    if grammars[g].has_rule_for_span(i, j, self.sent_len) {
                        dotchart.start_dotitems(i, j, &self.cells, &mut self.stats);
                    }
                }

                // (5) keep the sorted view current for pruning
                if let Some(bin) = self.cells.get_mut(i, j) {
                    let _ = bin.get_sorted_items(&self.arena);
                }

                // nothing wider reads dot bins starting at i once (i, N)
                // is done
                if j == self.sent_len {
                    for dotchart in &mut self.dotcharts {
                        dotchart.release_start(i);
                    }
                }
            }
        }

        tracing::debug!(
            n_added = self.stats.n_added,
            n_merged = self.stats.n_merged,
            n_pruned = self.stats.n_pruned,
            n_prepruned = self.stats.n_prepruned,
            n_prepruned_fuzz1 = self.stats.n_prepruned_fuzz1,
            n_prepruned_fuzz2 = self.stats.n_prepruned_fuzz2,
            n_dotitem_added = self.stats.n_dotitem_added,
            n_called_compute_item = self.stats.n_called_compute_item,
            "chart expansion finished"
        );
        tracing::info!(sent_id = self.sent_id, sent_len = self.sent_len, "parsed");

        if self.sent_len == 0 {
            return Err(DecodeError::NoDerivation { sent_len: 0 });
        }
        let top_items = match self.cells.get_mut(0, self.sent_len) {
            Some(bin) if !bin.is_empty() => bin.get_sorted_items(&self.arena).to_vec(),
            _ => {
                return Err(DecodeError::NoDerivation {
                    sent_len: self.sent_len,
                })
            }
        };
        let goal = self
            .goal_bin
            .transit_to_goal(&mut self.arena, self.models, &top_items, self.goal_symbol)
            .ok_or(DecodeError::NoDerivation {
                sent_len: self.sent_len,
            })?;

        let arena = std::mem::take(&mut self.arena);
        Ok(HyperGraph::new(arena, goal, self.sent_id, self.sent_len))
    }

    /// Apply the span's LHS/RHS constraint filter, if any.
    fn filter_rules(&self, i: usize, j: usize, rules: Vec<Rc<Rule>>) -> Vec<Rc<Rule>> {
        if !self.filters.is_filtered(i, j) {
            return rules;
        }
        rules
            .into_iter()
            .filter(|rule| self.filters.accepts(i, j, rule))
            .collect()
    }

    /// Grammar axioms for a cell, unless a hard span owns it.
    fn add_axioms(&mut self, i: usize, j: usize, rules: &[Rc<Rule>], lattice_cost: f64) {
        if self.hard_spans.contains(i, j) {
            tracing::trace!(i, j, "hard rule constraint suppresses grammar axioms");
            return;
        }
        let bin = self.cells.ensure(i, j);
        for rule in rules {
            bin.add_axiom(
                &mut self.arena,
                self.models,
                Rc::clone(rule),
                lattice_cost,
                &self.config,
                &mut self.stats,
            );
        }
    }

    /// Combine one dot item's rules with its antecedent SuperItems. The
    /// node lists are resolved here, at completion time, so pruning in
    /// narrower cells is already reflected.
    fn complete_cell(
        &mut self,
        i: usize,
        j: usize,
        ant_keys: &[SuperItemKey],
        rules: &[Rc<Rule>],
        arity: usize,
        lattice_cost: f64,
    ) {
        if self.hard_spans.contains(i, j) {
            tracing::trace!(i, j, "hard rule constraint suppresses completions");
            return;
        }
        let mut slots = Vec::with_capacity(ant_keys.len());
        for key in ant_keys {
            let nodes = self
                .cells
                .get(key.start, key.end)
                .and_then(|bin| bin.super_item(key.lhs))
                .map(|nodes| nodes.to_vec())
                .unwrap_or_default();
            if nodes.is_empty() {
                // every antecedent in this slot was pruned away
                return;
            }
            slots.push(AntSlot {
                lhs: key.lhs,
                nodes,
            });
        }
        let use_cube_prune = self.config.use_cube_prune;
        let bin = self.cells.ensure(i, j);
        if use_cube_prune {
            bin.complete_cell_cube_prune(
                &mut self.arena,
                self.models,
                &slots,
                rules,
                lattice_cost,
                &self.config,
                &mut self.stats,
            );
        } else {
            bin.complete_cell(
                &mut self.arena,
                self.models,
                &slots,
                rules,
                arity,
                lattice_cost,
                &self.config,
                &mut self.stats,
            );
        }
    }

    /// Agenda-based unary closure over one cell. Only newly created nodes
    /// re-enter the agenda; merges do not, which terminates the closure on
    /// acyclic unary rule sets.
    fn add_unary_items(&mut self, g: usize, i: usize, j: usize) {
        if self.hard_spans.contains(i, j) {
            return;
        }
        let grammars = self.grammars;
        let grammar = &grammars[g];
        let root = grammar.trie_root();
        let Some(bin) = self.cells.get_mut(i, j) else {
            return;
        };
        let mut agenda: VecDeque<_> = bin.get_sorted_items(&self.arena).iter().copied().collect();

        while let Some(node_id) = agenda.pop_front() {
            let lhs = self.arena[node_id].lhs;
            let Some(child) = grammar.match_one(root, lhs) else {
                continue;
            };
            let Some(collection) = grammar.rules_at(child) else {
                continue;
            };
            if collection.arity() != 1 {
                continue;
            }
            let rules = self.filter_rules(i, j, collection.sorted_rules().to_vec());
            for rule in rules {
                let ants = vec![node_id];
                let result = compute_item(self.models, &self.arena, &rule, &ants, &mut self.stats);
                let bin = self
                    .cells
                    .get_mut(i, j)
                    .expect("unary closure runs on an existing cell");
                if let Some(new_id) = bin.add_deduction(
                    &mut self.arena,
                    rule,
                    ants,
                    result,
                    0.0,
                    &self.config,
                    &mut self.stats,
                ) {
                    agenda.push_back(new_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureState, RuleScore, StateTransition};

    fn rule_score(weights: Vec<f64>) -> Vec<Box<dyn FeatureFunction>> {
        vec![Box::new(RuleScore::new(weights))]
    }

    fn grammar_from(rules: Vec<Rule>, models: &[Box<dyn FeatureFunction>]) -> Grammar {
        let mut grammar = Grammar::new();
        for rule in rules {
            grammar.add_rule(rule);
        }
        grammar.sort_rules(models);
        grammar
    }

    fn no_oov(mut config: ChartConfig) -> ChartConfig {
        config.allow_oov = false;
        config
    }

    #[test]
    fn test_single_terminal_single_rule() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let a = symbols.terminal("a");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![Rule::new(s, vec![a], vec![a], vec![1.0])],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            no_oov(ChartConfig::unpruned()),
            "S",
            &[],
            0,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        assert_eq!(hg.sent_len(), 1);
        assert_eq!(hg.best_cost(), 1.0);
        let root = hg.root();
        assert_eq!(root.edges.len(), 1);
        let top = hg.node(root.edges[0].antecedents[0]);
        assert_eq!(top.i, 0);
        assert_eq!(top.j, 1);
        assert_eq!(top.lhs, s);
    }

    #[test]
    fn test_unary_chain_closure() {
        let mut symbols = SymbolTable::new();
        let goal = symbols.nonterminal("GOAL");
        let s = symbols.nonterminal("S");
        let x = symbols.nonterminal("X");
        let a = symbols.terminal("a");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![
                Rule::new(x, vec![a], vec![a], vec![1.0]),
                Rule::new(s, vec![x], vec![x], vec![1.0]),
                Rule::new(goal, vec![s], vec![s], vec![1.0]),
            ],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            no_oov(ChartConfig::unpruned()),
            "GOAL",
            &[],
            7,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        assert_eq!(hg.sent_id(), 7);
        assert_eq!(hg.best_cost(), 3.0);

        // walk GOAL-root -> GOAL(0,1) -> S(0,1) -> X(0,1)
        let goal_node = hg.node(hg.root().edges[0].antecedents[0]);
        assert_eq!(goal_node.lhs, goal);
        let s_node = hg.node(goal_node.edges[0].antecedents[0]);
        assert_eq!(s_node.lhs, s);
        let x_node = hg.node(s_node.edges[0].antecedents[0]);
        assert_eq!(x_node.lhs, x);
        assert!(x_node.edges[0].antecedents.is_empty());

        // closure created X, S, and GOAL in the one cell
        assert_eq!(chart.stats().n_added, 3);
    }

    #[test]
    fn test_oov_fallback() {
        let mut symbols = SymbolTable::new();
        let b = symbols.terminal("b");

        let models = rule_score(vec![1.0]);
        let grammars: Vec<Grammar> = Vec::new();
        let lattice = Lattice::from_symbols(&[b]);

        let config = ChartConfig {
            oov_nonterminal: "GOAL".to_string(),
            ..ChartConfig::unpruned()
        };
        let mut chart = Chart::new(
            &lattice, &models, &grammars, &mut symbols, config, "GOAL", &[], 0,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        // the OOV rule passes the word through with zero feature cost
        assert_eq!(hg.best_cost(), 0.0);
        let oov_node = hg.node(hg.root().edges[0].antecedents[0]);
        let rule = oov_node.edges[0].rule.as_ref().unwrap();
        assert_eq!(rule.source, vec![b]);
        assert_eq!(rule.target, vec![b]);
        assert_eq!(rule.arity, 0);
    }

    #[test]
    fn test_hard_rule_constraint() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let a = symbols.terminal("a");
        let b = symbols.terminal("b");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![Rule::new(s, vec![a, b], vec![a, b], vec![5.0])],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a, b]);

        let constraints = vec![ConstraintSpan {
            start: 0,
            end: 2,
            hard: true,
            rules: vec![ConstraintRule::Rule {
                lhs: "S".to_string(),
                source: vec!["a".to_string(), "b".to_string()],
                target: vec!["a".to_string(), "b".to_string()],
                features: vec![5.0],
            }],
        }];

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            ChartConfig::unpruned(),
            "S",
            &constraints,
            0,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        // hard span zeroes the manual rule's features and suppresses the
        // grammar rule and both OOV axioms
        assert_eq!(hg.best_cost(), 0.0);
        assert_eq!(chart.stats().n_added, 1);
        assert_eq!(hg.root().edges.len(), 1);
        let top = hg.node(hg.root().edges[0].antecedents[0]);
        assert_eq!(top.edges.len(), 1);
    }

    #[test]
    fn test_cube_prune_exhaustive_parity_unpruned() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let x = symbols.nonterminal("X");
        let a = symbols.terminal("a");
        let b = symbols.terminal("b");
        let c = symbols.terminal("c");

        let models = rule_score(vec![1.0]);
        let rules = vec![
            Rule::new(x, vec![a], vec![a], vec![1.0]),
            Rule::new(x, vec![b], vec![b], vec![2.0]),
            Rule::new(x, vec![c], vec![c], vec![1.5]),
            Rule::new(x, vec![x, x], vec![x, x], vec![0.5]),
            Rule::new(x, vec![x, x], vec![x, x], vec![0.75]),
            Rule::new(s, vec![x], vec![x], vec![0.25]),
        ];
        let lattice = {
            let words = [a, b, c];
            Lattice::from_symbols(&words)
        };

        let mut run = |use_cube_prune: bool| {
            let grammars = vec![grammar_from(rules.clone(), &models)];
            let config = ChartConfig {
                use_cube_prune,
                ..no_oov(ChartConfig::unpruned())
            };
            let mut chart = Chart::new(
                &lattice,
                &models,
                &grammars,
                &mut symbols,
                config,
                "S",
                &[],
                0,
            )
            .unwrap();
            let hg = chart.expand().unwrap();
            (hg.best_cost(), chart.stats().n_added)
        };

        let (cost_cube, added_cube) = run(true);
        let (cost_exhaustive, added_exhaustive) = run(false);
        assert_eq!(cost_cube, cost_exhaustive);
        assert_eq!(added_cube, added_exhaustive);
    }

    #[test]
    fn test_no_derivation() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let a = symbols.terminal("a");
        let b = symbols.terminal("b");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![Rule::new(s, vec![b], vec![b], vec![1.0])],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            no_oov(ChartConfig::unpruned()),
            "S",
            &[],
            0,
        )
        .unwrap();
        assert!(matches!(
            chart.expand(),
            Err(DecodeError::NoDerivation { sent_len: 1 })
        ));
    }

    #[test]
    fn test_lhs_filter_soundness() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let x = symbols.nonterminal("X");
        let y = symbols.nonterminal("Y");
        let z = symbols.nonterminal("Z");
        let a = symbols.terminal("a");
        let b = symbols.terminal("b");

        let models = rule_score(vec![1.0]);
        let rules = vec![
            Rule::new(x, vec![a], vec![a], vec![1.0]),
            Rule::new(y, vec![a], vec![a], vec![1.0]),
            Rule::new(z, vec![b], vec![b], vec![1.0]),
            Rule::new(s, vec![x, z], vec![x, z], vec![1.0]),
        ];
        let lattice = Lattice::from_symbols(&[a, b]);

        let constraints = vec![ConstraintSpan {
            start: 0,
            end: 1,
            hard: false,
            rules: vec![ConstraintRule::Lhs {
                lhs: "X".to_string(),
            }],
        }];

        let mut run = |constraints: &[ConstraintSpan]| {
            let grammars = vec![grammar_from(rules.clone(), &models)];
            let mut chart = Chart::new(
                &lattice,
                &models,
                &grammars,
                &mut symbols,
                no_oov(ChartConfig::unpruned()),
                "S",
                constraints,
                0,
            )
            .unwrap();
            chart.expand().unwrap();
            chart.stats().n_added
        };

        // unconstrained: X, Y at (0,1); Z at (1,2); S at (0,2)
        assert_eq!(run(&[]), 4);
        // the LHS filter keeps Y out of (0,1)
        assert_eq!(run(&constraints), 3);
    }

    #[test]
    fn test_monotone_completeness_packs_all_derivations() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let x = symbols.nonterminal("X");
        let a = symbols.terminal("a");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![
                Rule::new(x, vec![a], vec![a], vec![1.0]),
                Rule::new(s, vec![x], vec![x], vec![1.0]),
                Rule::new(s, vec![s, s], vec![s, s], vec![1.0]),
            ],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a, a, a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            no_oov(ChartConfig::unpruned()),
            "S",
            &[],
            0,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        // S over (0,3) packs both bracketings: (S S)(0,1),(1,3) and
        // (S S)(0,2),(2,3)
        let top = hg.node(hg.root().edges[0].antecedents[0]);
        assert_eq!(top.edges.len(), 2);
    }

    #[test]
    fn test_malformed_constraints() {
        let mut symbols = SymbolTable::new();
        let a = symbols.terminal("a");

        let models = rule_score(vec![1.0]);
        let grammars: Vec<Grammar> = Vec::new();
        let lattice = Lattice::from_symbols(&[a]);

        let nonflat = vec![ConstraintSpan {
            start: 0,
            end: 1,
            hard: false,
            rules: vec![ConstraintRule::Rule {
                lhs: "S".to_string(),
                source: vec!["[X]".to_string()],
                target: vec!["a".to_string()],
                features: vec![0.0],
            }],
        }];
        let result = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            ChartConfig::default(),
            "S",
            &nonflat,
            0,
        );
        assert!(matches!(
            result,
            Err(DecodeError::MalformedConstraint { .. })
        ));

        let wrong_features = vec![ConstraintSpan {
            start: 0,
            end: 1,
            hard: false,
            rules: vec![ConstraintRule::Rule {
                lhs: "S".to_string(),
                source: vec!["a".to_string()],
                target: vec!["a".to_string()],
                features: vec![0.0, 0.0],
            }],
        }];
        let result = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            ChartConfig::default(),
            "S",
            &wrong_features,
            0,
        );
        assert!(matches!(
            result,
            Err(DecodeError::MalformedConstraint { .. })
        ));
    }

    #[test]
    fn test_cancellation() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let a = symbols.terminal("a");

        let models = rule_score(vec![1.0]);
        let grammars = vec![grammar_from(
            vec![Rule::new(s, vec![a], vec![a], vec![1.0])],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            ChartConfig::default(),
            "S",
            &[],
            0,
        )
        .unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        chart.set_cancel_flag(Arc::clone(&flag));
        assert!(matches!(chart.expand(), Err(DecodeError::Cancelled)));
    }

    /// A stateful toy model whose state distinguishes derivations by their
    /// first target word, exercising signature-based packing.
    struct FirstWordModel;

    impl FeatureFunction for FirstWordModel {
        fn name(&self) -> &str {
            "first-word"
        }
        fn stateful(&self) -> bool {
            true
        }
        fn estimate(&self, _rule: &Rule) -> f64 {
            0.0
        }
        fn transition(
            &self,
            rule: &Rule,
            ant_states: &[Option<&FeatureState>],
        ) -> StateTransition {
            let first = rule
                .target
                .first()
                .copied()
                .filter(|sym| sym.is_terminal())
                .or_else(|| {
                    ant_states
                        .first()
                        .and_then(|s| s.as_ref())
                        .and_then(|s| s.0.first().copied())
                });
            StateTransition {
                cost: 0.0,
                future_cost: 0.0,
                state: Some(FeatureState(first.into_iter().collect())),
            }
        }
    }

    #[test]
    fn test_stateful_model_splits_cells_by_signature() {
        let mut symbols = SymbolTable::new();
        let s = symbols.nonterminal("S");
        let x = symbols.nonterminal("X");
        let a = symbols.terminal("a");
        let t1 = symbols.terminal("uno");
        let t2 = symbols.terminal("dos");

        let models: Vec<Box<dyn FeatureFunction>> =
            vec![Box::new(RuleScore::new(vec![1.0])), Box::new(FirstWordModel)];
        let grammars = vec![grammar_from(
            vec![
                Rule::new(x, vec![a], vec![t1], vec![1.0]),
                Rule::new(x, vec![a], vec![t2], vec![2.0]),
                Rule::new(s, vec![x], vec![x], vec![0.0]),
            ],
            &models,
        )];
        let lattice = Lattice::from_symbols(&[a]);

        let mut chart = Chart::new(
            &lattice,
            &models,
            &grammars,
            &mut symbols,
            no_oov(ChartConfig::unpruned()),
            "S",
            &[],
            0,
        )
        .unwrap();
        let hg = chart.expand().unwrap();

        // two X signatures, two S signatures, and the goal absorbs both S
        // nodes as separate edges
        assert_eq!(chart.stats().n_added, 4);
        assert_eq!(hg.root().edges.len(), 2);
        assert_eq!(hg.best_cost(), 1.0);
    }
}
