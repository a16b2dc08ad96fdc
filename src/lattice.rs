//! Source-side word lattice: a DAG over positions with weighted,
//! terminal-labeled arcs.
//!
//! Positions index chart spans: cell `(i, j)` covers `[i, j)`, so a lattice
//! over `N + 1` positions yields a sentence length of `N`. Plain sentences
//! are the linear-chain special case with one zero-cost arc per word.

use crate::symbol::Symbol;

/// Lattice construction errors. A malformed lattice is fatal at seeding;
/// the chart never sees one.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LatticeError {
    #[error("arc {from} -> {to} is not monotone; lattice arcs must advance the position")]
    NonMonotone { from: usize, to: usize },
    #[error("arc endpoint {position} is outside the lattice ({num_positions} positions)")]
    OutOfRange {
        position: usize,
        num_positions: usize,
    },
    #[error("arc {from} -> {to} carries negative cost {cost}")]
    NegativeCost { from: usize, to: usize, cost: f64 },
}

/// One weighted arc. `head` is the position the arc leads to; arcs are
/// stored on their tail node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatticeArc {
    pub label: Symbol,
    pub cost: f64,
    pub head: usize,
}

/// Read-only view of the input: positions `0..=sent_len`, each with its
/// outgoing arcs. Monotonicity is enforced at construction, which also
/// rules out cycles.
#[derive(Clone, Debug, Default)]
pub struct Lattice {
    arcs: Vec<Vec<LatticeArc>>,
}

impl Lattice {
    /// Create a lattice with `num_positions` nodes and no arcs.
    pub fn new(num_positions: usize) -> Self {
        Lattice {
            arcs: vec![Vec::new(); num_positions],
        }
    }

    /// Build the linear-chain lattice for a plain sentence: one zero-cost
    /// arc per word.
    pub fn from_symbols(words: &[Symbol]) -> Self {
        let mut lattice = Lattice::new(words.len() + 1);
        for (i, &w) in words.iter().enumerate() {
            lattice.arcs[i].push(LatticeArc {
                label: w,
                cost: 0.0,
                head: i + 1,
            });
        }
        lattice
    }

    /// Add an arc `from -> to`. Rejects arcs that do not advance the
    /// position, leave the lattice, or carry negative cost.
    pub fn add_arc(
        &mut self,
        from: usize,
        to: usize,
        label: Symbol,
        cost: f64,
    ) -> Result<(), LatticeError> {
        let n = self.arcs.len();
        if from >= n {
            return Err(LatticeError::OutOfRange {
                position: from,
                num_positions: n,
            });
        }
        if to >= n {
            return Err(LatticeError::OutOfRange {
                position: to,
                num_positions: n,
            });
        }
        if to <= from {
            return Err(LatticeError::NonMonotone { from, to });
        }
        if cost < 0.0 {
            return Err(LatticeError::NegativeCost { from, to, cost });
        }
        self.arcs[from].push(LatticeArc {
            label,
            cost,
            head: to,
        });
        Ok(())
    }

    /// Sentence length: the number of positions minus one.
    pub fn sent_len(&self) -> usize {
        self.arcs.len().saturating_sub(1)
    }

    /// Number of positions (`sent_len + 1`).
    pub fn num_positions(&self) -> usize {
        self.arcs.len()
    }

    /// Outgoing arcs of a position.
    pub fn outgoing(&self, position: usize) -> &[LatticeArc] {
        &self.arcs[position]
    }

    /// Re-check the invariants `add_arc` maintains. Useful as a seeding
    /// guard when a lattice arrives from outside this module.
    pub fn validate(&self) -> Result<(), LatticeError> {
        for (tail, arcs) in self.arcs.iter().enumerate() {
            for arc in arcs {
                if arc.head >= self.arcs.len() {
                    return Err(LatticeError::OutOfRange {
                        position: arc.head,
                        num_positions: self.arcs.len(),
                    });
                }
                if arc.head <= tail {
                    return Err(LatticeError::NonMonotone {
                        from: tail,
                        to: arc.head,
                    });
                }
                if arc.cost < 0.0 {
                    return Err(LatticeError::NegativeCost {
                        from: tail,
                        to: arc.head,
                        cost: arc.cost,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_linear_chain() {
        let mut table = SymbolTable::new();
        let words = table.terminals(&["a", "b", "c"]);
        let lattice = Lattice::from_symbols(&words);

        assert_eq!(lattice.sent_len(), 3);
        assert_eq!(lattice.outgoing(0).len(), 1);
        assert_eq!(lattice.outgoing(0)[0].head, 1);
        assert_eq!(lattice.outgoing(3).len(), 0);
        assert!(lattice.validate().is_ok());
    }

    #[test]
    fn test_confusion_network_arcs() {
        let mut table = SymbolTable::new();
        let a = table.terminal("a");
        let b = table.terminal("b");

        let mut lattice = Lattice::new(3);
        lattice.add_arc(0, 1, a, 0.0).unwrap();
        lattice.add_arc(0, 1, b, 1.5).unwrap();
        lattice.add_arc(1, 2, a, 0.0).unwrap();
        // skip arc spanning two positions
        lattice.add_arc(0, 2, b, 0.25).unwrap();

        assert_eq!(lattice.outgoing(0).len(), 3);
        assert_eq!(lattice.sent_len(), 2);
    }

    #[test]
    fn test_rejects_non_monotone() {
        let mut table = SymbolTable::new();
        let a = table.terminal("a");

        let mut lattice = Lattice::new(3);
        assert_eq!(
            lattice.add_arc(2, 1, a, 0.0),
            Err(LatticeError::NonMonotone { from: 2, to: 1 })
        );
        assert_eq!(
            lattice.add_arc(1, 1, a, 0.0),
            Err(LatticeError::NonMonotone { from: 1, to: 1 })
        );
    }

    #[test]
    fn test_rejects_out_of_range_and_negative() {
        let mut table = SymbolTable::new();
        let a = table.terminal("a");

        let mut lattice = Lattice::new(2);
        assert!(matches!(
            lattice.add_arc(0, 5, a, 0.0),
            Err(LatticeError::OutOfRange { .. })
        ));
        assert!(matches!(
            lattice.add_arc(0, 1, a, -1.0),
            Err(LatticeError::NegativeCost { .. })
        ));
    }
}
