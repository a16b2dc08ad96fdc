//! scfg-chart: the chart-parsing core of a synchronous context-free
//! grammar decoder.
//!
//! This crate provides:
//! - Symbol interning shared by terminals and nonterminals
//! - Source word lattices with weighted, terminal-labeled arcs
//! - SCFG rules indexed by a source-side prefix trie
//! - A feature-function seam for scoring rule applications
//! - Per-span bins with signature merging, beam/cap pruning, and cube
//!   pruning
//! - Earley-style dot charts advancing rule matches over lattice spans
//! - The CKY driver producing a packed hypergraph rooted at the goal
//!
//! ```
//! use scfg_chart::{
//!     Chart, ChartConfig, FeatureFunction, Grammar, Lattice, Rule, RuleScore, SymbolTable,
//! };
//!
//! let mut symbols = SymbolTable::new();
//! let s = symbols.nonterminal("S");
//! let a = symbols.terminal("a");
//!
//! let models: Vec<Box<dyn FeatureFunction>> = vec![Box::new(RuleScore::new(vec![1.0]))];
//! let mut grammar = Grammar::new();
//! grammar.add_rule(Rule::new(s, vec![a], vec![a], vec![1.0]));
//! grammar.sort_rules(&models);
//! let grammars = vec![grammar];
//!
//! let lattice = Lattice::from_symbols(&[a]);
//! let mut chart = Chart::new(
//!     &lattice,
//!     &models,
//!     &grammars,
//!     &mut symbols,
//!     ChartConfig::default(),
//!     "S",
//!     &[],
//!     0,
//! )
//! .unwrap();
//! let hypergraph = chart.expand().unwrap();
//! assert_eq!(hypergraph.best_cost(), 1.0);
//! ```

pub mod bins;
pub mod chart;
pub mod config;
pub mod constraint;
pub mod dotchart;
pub mod feature;
pub mod grammar;
pub mod hypergraph;
pub mod lattice;
pub mod symbol;

// Re-exports for convenience
pub use bins::{Bin, ComputeItemResult, SuperItemKey};
pub use chart::{Chart, ChartStats, DecodeError};
pub use config::ChartConfig;
pub use constraint::{ConstraintRule, ConstraintSpan};
pub use dotchart::{DotBin, DotChart, DotItem};
pub use feature::{FeatureFunction, FeatureState, RuleScore, StateTransition, WordPenalty};
pub use grammar::{Grammar, Rule, RuleCollection, TrieId};
pub use hypergraph::{HGNode, HyperEdge, HyperGraph, NodeArena, NodeId, Signature};
pub use lattice::{Lattice, LatticeArc, LatticeError};
pub use symbol::{Symbol, SymbolTable};
