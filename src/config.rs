//! Chart configuration: combiner choice and pruning knobs.

use serde::{Deserialize, Serialize};

/// Configuration of one `Chart`.
///
/// Pruning follows the zero-means-unlimited convention: `max_items: 0`
/// disables the per-cell cap and `cube_prune_pop_limit: 0` lets cube
/// pruning drain its heap. The beam is disabled by setting `beam_offset`
/// to infinity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    /// Use cube pruning for cells with nonterminal antecedents; otherwise
    /// enumerate the full Cartesian product.
    pub use_cube_prune: bool,
    /// Beam: a candidate is kept only if its estimated total cost is
    /// within `beam_offset` of the cell's best. Infinity disables.
    pub beam_offset: f64,
    /// Relaxation bands added to the beam cutoff before a candidate is
    /// pre-pruned; `fuzz2 >= fuzz1 >= 0`.
    pub fuzz1: f64,
    pub fuzz2: f64,
    /// Per-cell cap on surviving nodes; 0 = unlimited.
    pub max_items: usize,
    /// Maximum combinations popped per cube-pruning call; 0 = unlimited.
    pub cube_prune_pop_limit: usize,
    /// Nonterminal label given to synthesized OOV rules.
    pub oov_nonterminal: String,
    /// Whether OOV rules are synthesized at all. Disabling makes uncovered
    /// input fail with `NoDerivation` instead of passing words through.
    pub allow_oov: bool,
}

impl Default for ChartConfig {
    fn default() -> Self {
        ChartConfig {
            use_cube_prune: true,
            beam_offset: 10.0,
            fuzz1: 0.1,
            fuzz2: 0.2,
            max_items: 30,
            cube_prune_pop_limit: 1000,
            oov_nonterminal: "OOV".to_string(),
            allow_oov: true,
        }
    }
}

impl ChartConfig {
    /// A configuration with every pruning mechanism disabled; useful for
    /// exhaustive parses and parity checks.
    pub fn unpruned() -> Self {
        ChartConfig {
            beam_offset: f64::INFINITY,
            fuzz1: 0.0,
            fuzz2: 0.0,
            max_items: 0,
            cube_prune_pop_limit: 0,
            ..ChartConfig::default()
        }
    }

    pub(crate) fn cutoff(&self, best_est_total_cost: f64) -> f64 {
        best_est_total_cost + self.beam_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pruned() {
        let config = ChartConfig::default();
        assert!(config.use_cube_prune);
        assert!(config.beam_offset.is_finite());
        assert!(config.fuzz2 >= config.fuzz1);
        assert!(config.max_items > 0);
    }

    #[test]
    fn test_unpruned_disables_everything() {
        let config = ChartConfig::unpruned();
        assert!(config.beam_offset.is_infinite());
        assert_eq!(config.max_items, 0);
        assert_eq!(config.cube_prune_pop_limit, 0);
        assert!(config.cutoff(3.0).is_infinite());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ChartConfig {
            use_cube_prune: false,
            max_items: 7,
            ..ChartConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ChartConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
