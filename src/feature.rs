//! Feature functions: the scoring seam between the chart and its models.
//!
//! The chart never computes costs itself. Each model scores a rule
//! application given the antecedents' states, may contribute a state of its
//! own (which becomes part of the HGNode signature), and may estimate an
//! outside cost used for pruning. Stateful models (an n-gram LM) implement
//! the same trait; their implementations live outside this crate.

use crate::grammar::Rule;
use crate::symbol::Symbol;

/// Opaque, hashable state contribution of one model for one node. For an
/// n-gram LM this is the boundary-word vector; stateless models contribute
/// nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeatureState(pub Vec<Symbol>);

/// Result of scoring one rule application under one model.
#[derive(Clone, Debug, Default)]
pub struct StateTransition {
    /// Weighted cost of this application.
    pub cost: f64,
    /// Estimated outside (future) cost of the resulting item.
    pub future_cost: f64,
    /// State carried up to the consequent, if the model is stateful.
    pub state: Option<FeatureState>,
}

impl StateTransition {
    /// A stateless transition with no future-cost estimate.
    pub fn stateless(cost: f64) -> Self {
        StateTransition {
            cost,
            future_cost: 0.0,
            state: None,
        }
    }
}

/// One scoring model. All costs are weighted (lower is better).
pub trait FeatureFunction {
    fn name(&self) -> &str;

    /// Whether this model contributes a state to node signatures.
    fn stateful(&self) -> bool {
        false
    }

    /// Context-free cost estimate of a rule, used to sort rule collections
    /// and order cube-pruning axes.
    fn estimate(&self, rule: &Rule) -> f64;

    /// Score one application of `rule`. `ant_states` holds this model's
    /// state for each antecedent, in slot order.
    fn transition(&self, rule: &Rule, ant_states: &[Option<&FeatureState>]) -> StateTransition;

    /// Cost of finishing a derivation whose root carries `state`; applied
    /// during the goal transition (LM finalization hook).
    fn final_cost(&self, _state: Option<&FeatureState>) -> f64 {
        0.0
    }
}

/// Translation-model score: dot product of a weight vector with the rule's
/// feature values. Stateless.
#[derive(Clone, Debug)]
pub struct RuleScore {
    weights: Vec<f64>,
}

impl RuleScore {
    pub fn new(weights: Vec<f64>) -> Self {
        RuleScore { weights }
    }
}

impl FeatureFunction for RuleScore {
    fn name(&self) -> &str {
        "rule-score"
    }

    fn estimate(&self, rule: &Rule) -> f64 {
        self.weights
            .iter()
            .zip(&rule.features)
            .map(|(w, f)| w * f)
            .sum()
    }

    fn transition(&self, rule: &Rule, _ant_states: &[Option<&FeatureState>]) -> StateTransition {
        StateTransition::stateless(self.estimate(rule))
    }
}

/// Word penalty: weight times the number of target-side terminals a rule
/// emits. Stateless.
#[derive(Clone, Debug)]
pub struct WordPenalty {
    weight: f64,
}

impl WordPenalty {
    pub fn new(weight: f64) -> Self {
        WordPenalty { weight }
    }
}

impl FeatureFunction for WordPenalty {
    fn name(&self) -> &str {
        "word-penalty"
    }

    fn estimate(&self, rule: &Rule) -> f64 {
        self.weight * rule.target.iter().filter(|s| s.is_terminal()).count() as f64
    }

    fn transition(&self, rule: &Rule, _ant_states: &[Option<&FeatureState>]) -> StateTransition {
        StateTransition::stateless(self.estimate(rule))
    }
}
