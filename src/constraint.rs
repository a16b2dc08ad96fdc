//! Per-span constraints: manual axioms, LHS/RHS filters, and hard spans.
//!
//! Constraints arrive with string symbols and are resolved against the
//! symbol table once, during seeding; the filter table the chart consults
//! while expanding holds interned ids only.

use rustc_hash::FxHashMap;

use crate::grammar::Rule;
use crate::symbol::Symbol;

/// One constraint inside a span.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintRule {
    /// A manual rule, added as an axiom over the span. Must be flat: a
    /// bracketed token like `[X]` in `source` marks a nonterminal slot and
    /// is rejected at seeding.
    Rule {
        lhs: String,
        source: Vec<String>,
        target: Vec<String>,
        features: Vec<f64>,
    },
    /// Keep only grammar rules with this left-hand side.
    Lhs { lhs: String },
    /// Keep only grammar rules with exactly this target side.
    Rhs { target: Vec<String> },
}

/// A span `[start, end]` with its constraints. A hard span zeroes the
/// feature values of its manual rules and suppresses every other rule
/// (OOV, grammar axiom, or completion) inside it.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintSpan {
    pub start: usize,
    pub end: usize,
    pub hard: bool,
    pub rules: Vec<ConstraintRule>,
}

/// Whether a constraint token denotes a nonterminal slot.
pub(crate) fn is_nonterminal_token(token: &str) -> bool {
    token.len() > 2 && token.starts_with('[') && token.ends_with(']')
}

/// A resolved LHS/RHS filter entry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FilterRule {
    Lhs(Symbol),
    Target(Vec<Symbol>),
}

impl FilterRule {
    fn accepts(&self, rule: &Rule) -> bool {
        match self {
            FilterRule::Lhs(lhs) => rule.lhs == *lhs,
            FilterRule::Target(target) => rule.target == *target,
        }
    }
}

/// Span-indexed filter entries. The key is the integer pair `(i, j)`.
#[derive(Debug, Default)]
pub(crate) struct FilterTable {
    entries: FxHashMap<(usize, usize), Vec<FilterRule>>,
}

impl FilterTable {
    pub fn insert(&mut self, i: usize, j: usize, filter: FilterRule) {
        self.entries.entry((i, j)).or_default().push(filter);
    }

    pub fn is_filtered(&self, i: usize, j: usize) -> bool {
        self.entries.contains_key(&(i, j))
    }

    /// A rule survives a filtered span iff at least one entry accepts it.
    /// Unfiltered spans accept everything.
    pub fn accepts(&self, i: usize, j: usize, rule: &Rule) -> bool {
        match self.entries.get(&(i, j)) {
            None => true,
            Some(filters) => filters.iter().any(|f| f.accepts(rule)),
        }
    }
}

/// Spans carrying hard RULE constraints. Containment suppresses all
/// non-manual additions in enclosed cells.
#[derive(Debug, Default)]
pub(crate) struct HardSpans {
    spans: Vec<(usize, usize)>,
}

impl HardSpans {
    pub fn add(&mut self, start: usize, end: usize) {
        self.spans.push((start, end));
    }

    pub fn contains(&self, i: usize, j: usize) -> bool {
        self.spans.iter().any(|&(s, e)| s <= i && j <= e)
    }
}
