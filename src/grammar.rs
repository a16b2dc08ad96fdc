//! SCFG rules and the source-side prefix trie that indexes them.
//!
//! A grammar is a trie keyed by source-RHS symbols; every node may carry a
//! `RuleCollection`, the rules whose source side spells the path to that
//! node. Dot items walk this trie one symbol at a time.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::feature::FeatureFunction;
use crate::symbol::Symbol;

/// A synchronous production: paired source and target right-hand sides
/// sharing nonterminal slots, plus a fixed-length feature-value vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub lhs: Symbol,
    pub source: Vec<Symbol>,
    pub target: Vec<Symbol>,
    pub arity: usize,
    pub features: Vec<f64>,
}

impl Rule {
    /// Create a rule; arity is the number of nonterminal slots on the
    /// source side.
    pub fn new(lhs: Symbol, source: Vec<Symbol>, target: Vec<Symbol>, features: Vec<f64>) -> Self {
        let arity = source.iter().filter(|s| s.is_nonterminal()).count();
        Rule {
            lhs,
            source,
            target,
            arity,
            features,
        }
    }

    /// Synthesize the OOV rule for a lattice arc terminal: the word passes
    /// through untranslated with an all-zero feature vector.
    pub fn oov(lhs: Symbol, terminal: Symbol, num_features: usize) -> Self {
        Rule {
            lhs,
            source: vec![terminal],
            target: vec![terminal],
            arity: 0,
            features: vec![0.0; num_features],
        }
    }

    /// Synthesize a manual (constraint) rule. Constraint rules are flat:
    /// callers validate that no source symbol is a nonterminal.
    pub fn manual(lhs: Symbol, source: Vec<Symbol>, target: Vec<Symbol>, features: Vec<f64>) -> Self {
        debug_assert!(source.iter().all(|s| s.is_terminal()));
        Rule {
            lhs,
            source,
            target,
            arity: 0,
            features,
        }
    }

    /// Nonterminal slots of the source side, in order.
    pub fn source_slots(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.source.iter().copied().filter(|s| s.is_nonterminal())
    }
}

/// Handle into a grammar's trie arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrieId(u32);

/// The rules sitting at one trie node. They share the same source RHS, so
/// the arity is a property of the collection.
#[derive(Clone, Debug, Default)]
pub struct RuleCollection {
    arity: usize,
    rules: Vec<Rc<Rule>>,
}

impl RuleCollection {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Rules sorted ascending by stateless estimated cost. Only valid
    /// after `Grammar::sort_rules`.
    pub fn sorted_rules(&self) -> &[Rc<Rule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: FxHashMap<Symbol, TrieId>,
    rules: Option<RuleCollection>,
}

/// An in-memory grammar: trie arena plus span policy.
#[derive(Debug)]
pub struct Grammar {
    nodes: Vec<TrieNode>,
    /// Widest span this grammar applies to; 0 = unlimited.
    span_limit: usize,
    sorted: bool,
    num_rules: usize,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    pub fn new() -> Self {
        Grammar {
            nodes: vec![TrieNode::default()],
            span_limit: 0,
            sorted: true,
            num_rules: 0,
        }
    }

    /// A grammar that only applies to spans of at most `limit` source
    /// positions.
    pub fn with_span_limit(limit: usize) -> Self {
        let mut g = Grammar::new();
        g.span_limit = limit;
        g
    }

    pub fn trie_root(&self) -> TrieId {
        TrieId(0)
    }

    /// Walk one symbol from `node`.
    pub fn match_one(&self, node: TrieId, symbol: Symbol) -> Option<TrieId> {
        self.nodes[node.0 as usize].children.get(&symbol).copied()
    }

    /// The rules at a trie node, if any.
    pub fn rules_at(&self, node: TrieId) -> Option<&RuleCollection> {
        self.nodes[node.0 as usize].rules.as_ref()
    }

    /// Whether this grammar may contribute rules to span `(i, j)`.
    pub fn has_rule_for_span(&self, i: usize, j: usize, _sent_len: usize) -> bool {
        self.span_limit == 0 || j - i <= self.span_limit
    }

    /// Insert a rule, extending the trie along its source side.
    pub fn add_rule(&mut self, rule: Rule) {
        let mut node = TrieId(0);
        for &symbol in &rule.source {
            node = match self.nodes[node.0 as usize].children.get(&symbol) {
                Some(&child) => child,
                None => {
                    let child = TrieId(self.nodes.len() as u32);
                    self.nodes.push(TrieNode::default());
                    self.nodes[node.0 as usize].children.insert(symbol, child);
                    child
                }
            };
        }
        let arity = rule.arity;
        let collection = self.nodes[node.0 as usize]
            .rules
            .get_or_insert_with(|| RuleCollection {
                arity,
                rules: Vec::new(),
            });
        debug_assert_eq!(collection.arity, arity);
        collection.rules.push(Rc::new(rule));
        self.num_rules += 1;
        self.sorted = false;
    }

    /// Sort every rule collection ascending by the models' stateless cost
    /// estimate. Must run before parsing; cube pruning and axiom order
    /// depend on it.
    pub fn sort_rules(&mut self, models: &[Box<dyn FeatureFunction>]) {
        for node in &mut self.nodes {
            if let Some(collection) = &mut node.rules {
                collection.rules.sort_by_cached_key(|rule| {
                    OrderedFloat(models.iter().map(|m| m.estimate(rule)).sum::<f64>())
                });
            }
        }
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn num_rules(&self) -> usize {
        self.num_rules
    }
}
