//! Earley-style dot chart: partial rule matches advancing through a
//! grammar's trie over lattice spans.
//!
//! One dot chart exists per grammar. A dot item is a trie position plus the
//! SuperItems consumed so far; antecedent lists grow by one per nonterminal
//! advance and are persistent `Rc`-linked chains, so memory stays linear in
//! the number of advances. Dot items are never pruned, only deduplicated.

use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::bins::{CellGrid, SuperItemKey};
use crate::chart::ChartStats;
use crate::grammar::{Grammar, TrieId};
use crate::lattice::Lattice;

/// Persistent antecedent list. Tail-appends share the whole prefix.
#[derive(Clone, Debug, Default)]
pub(crate) struct AntChain(Option<Rc<AntLink>>);

#[derive(Debug)]
struct AntLink {
    item: SuperItemKey,
    parent: AntChain,
    len: usize,
}

impl AntChain {
    pub fn empty() -> Self {
        AntChain(None)
    }

    pub fn push(&self, item: SuperItemKey) -> Self {
        AntChain(Some(Rc::new(AntLink {
            item,
            parent: self.clone(),
            len: self.len() + 1,
        })))
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |link| link.len)
    }

    /// Keys in slot order (oldest first).
    pub fn to_vec(&self) -> Vec<SuperItemKey> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = &self.0;
        while let Some(link) = cursor {
            out.push(link.item);
            cursor = &link.parent.0;
        }
        out.reverse();
        out
    }
}

impl PartialEq for AntChain {
    fn eq(&self, other: &Self) -> bool {
        let mut a = &self.0;
        let mut b = &other.0;
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Rc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.len != y.len || x.item != y.item {
                        return false;
                    }
                    a = &x.parent.0;
                    b = &y.parent.0;
                }
                _ => return false,
            }
        }
    }
}

impl Eq for AntChain {}

impl Hash for AntChain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        let mut cursor = &self.0;
        while let Some(link) = cursor {
            link.item.hash(state);
            cursor = &link.parent.0;
        }
    }
}

/// A partial match: trie position, consumed SuperItems, accumulated
/// terminal arc cost.
#[derive(Clone, Debug)]
pub struct DotItem {
    pub tnode: TrieId,
    pub(crate) ants: AntChain,
    pub lattice_cost: f64,
}

impl DotItem {
    /// Number of nonterminal slots matched so far.
    pub fn arity(&self) -> usize {
        self.ants.len()
    }
}

/// Dot items of one cell, deduplicated by
/// `(tnode, antecedents, lattice_cost)`.
#[derive(Debug, Default)]
pub struct DotBin {
    items: Vec<DotItem>,
    seen: FxHashSet<(TrieId, AntChain, OrderedFloat<f64>)>,
}

impl DotBin {
    fn add(&mut self, item: DotItem) -> bool {
        let key = (item.tnode, item.ants.clone(), OrderedFloat(item.lattice_cost));
        if !self.seen.insert(key) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn items(&self) -> &[DotItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Dot chart for one grammar: dot bins over `0 <= i <= j <= sent_len`.
#[derive(Debug)]
pub struct DotChart<'g> {
    grammar: &'g Grammar,
    bins: Vec<Vec<Option<DotBin>>>,
    sent_len: usize,
}

impl<'g> DotChart<'g> {
    pub(crate) fn new(grammar: &'g Grammar, sent_len: usize) -> Self {
        DotChart {
            grammar,
            bins: (0..=sent_len)
                .map(|_| (0..=sent_len).map(|_| None).collect())
                .collect(),
            sent_len,
        }
    }

    pub fn bin(&self, i: usize, j: usize) -> Option<&DotBin> {
        self.bins[i][j].as_ref()
    }

    fn add_item(&mut self, i: usize, j: usize, item: DotItem, stats: &mut ChartStats) {
        let bin = self.bins[i][j].get_or_insert_with(DotBin::default);
        if bin.add(item) {
            stats.n_dotitem_added += 1;
        }
    }

    /// Place the initial dot item at `(i, i)` for every lattice position.
    /// Deduplication makes re-seeding a no-op.
    pub(crate) fn seed(&mut self, stats: &mut ChartStats) {
        let root = self.grammar.trie_root();
        for i in 0..=self.sent_len {
            self.add_item(
                i,
                i,
                DotItem {
                    tnode: root,
                    ants: AntChain::empty(),
                    lattice_cost: 0.0,
                },
                stats,
            );
        }
    }

    /// Extend dot items into `(i, j)` by one symbol ending at `j`: lattice
    /// arcs `k -> j` for terminals, SuperItems over `(k, j)` for
    /// nonterminals.
    pub(crate) fn expand_cell(
        &mut self,
        i: usize,
        j: usize,
        lattice: &Lattice,
        cells: &CellGrid,
        stats: &mut ChartStats,
    ) {
        let mut fresh: Vec<DotItem> = Vec::new();

        // terminal advance
        for k in i..j {
            let Some(bin) = self.bins[i][k].as_ref() else {
                continue;
            };
            for arc in lattice.outgoing(k).iter().filter(|a| a.head == j) {
                for item in bin.items() {
                    if let Some(child) = self.grammar.match_one(item.tnode, arc.label) {
                        fresh.push(DotItem {
                            tnode: child,
                            ants: item.ants.clone(),
                            lattice_cost: item.lattice_cost + arc.cost,
                        });
                    }
                }
            }
        }

        // nonterminal advance over complete narrower cells
        for k in (i + 1)..j {
            let Some(cell) = cells.get(k, j) else {
                continue;
            };
            let Some(bin) = self.bins[i][k].as_ref() else {
                continue;
            };
            for lhs in cell.super_lhs() {
                for item in bin.items() {
                    if let Some(child) = self.grammar.match_one(item.tnode, lhs) {
                        fresh.push(DotItem {
                            tnode: child,
                            ants: item.ants.push(SuperItemKey {
                                start: k,
                                end: j,
                                lhs,
                            }),
                            lattice_cost: item.lattice_cost,
                        });
                    }
                }
            }
        }

        for item in fresh {
            self.add_item(i, j, item, stats);
        }
    }

    /// Seed dot items that begin with a nonterminal just completed over
    /// `(i, j)` itself.
    pub(crate) fn start_dotitems(
        &mut self,
        i: usize,
        j: usize,
        cells: &CellGrid,
        stats: &mut ChartStats,
    ) {
        let Some(cell) = cells.get(i, j) else {
            return;
        };
        let root = self.grammar.trie_root();
        let mut fresh: Vec<DotItem> = Vec::new();
        for lhs in cell.super_lhs() {
            if let Some(child) = self.grammar.match_one(root, lhs) {
                fresh.push(DotItem {
                    tnode: child,
                    ants: AntChain::empty().push(SuperItemKey {
                        start: i,
                        end: j,
                        lhs,
                    }),
                    lattice_cost: 0.0,
                });
            }
        }
        for item in fresh {
            self.add_item(i, j, item, stats);
        }
    }

    /// Drop every dot bin starting at `i`. Valid once `(i, sent_len)` has
    /// been processed: no wider span reads this row again.
    pub(crate) fn release_start(&mut self, i: usize) {
        for cell in &mut self.bins[i] {
            *cell = None;
        }
    }
}
