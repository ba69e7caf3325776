//! Deferred placement of constant loads.
//!
//! The first use of a constant that cannot be embedded loads it into a fresh
//! variable at the point of use. Later uses from other blocks move the record
//! to the common dominator; a moved load is detached from its original slot and
//! re-inserted by [`ConstantLoadTracker::finalize`].

use crate::lir::{LirInstruction, PlacedConstant, SlotId};
use crate::options::LoweringOptions;
use std::collections::{HashMap, HashSet};
use strata_core::{Constant, Variable};
use strata_graph::{BlockId, ControlFlowGraph};

#[derive(Debug, Clone)]
struct ConstantLoad {
    constant: Constant,
    variable: Variable,
    block: BlockId,
    /// Slot of the original load while it is still in place.
    pinned: Option<SlotId>,
    used_in: Vec<BlockId>,
}

/// A load that has to be inserted into `block` during finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingLoad {
    pub constant: Constant,
    pub variable: Variable,
    pub block: BlockId,
}

#[derive(Debug, Default)]
pub struct ConstantLoadTracker {
    index: HashMap<Constant, usize>,
    loads: Vec<ConstantLoad>,
    detached: HashSet<SlotId>,
}

impl ConstantLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The variable already holding `constant`, if any. Records the use from
    /// `block` and widens the load's block to a dominator of every use.
    pub fn lookup(
        &mut self,
        cfg: &ControlFlowGraph,
        constant: Constant,
        block: BlockId,
    ) -> Option<Variable> {
        let &i = self.index.get(&constant)?;
        let load = &mut self.loads[i];
        let dominator = cfg.common_dominator(load.block, block);
        if dominator != load.block {
            if let Some(slot) = load.pinned.take() {
                tracing::trace!(%constant, %slot, from = %load.block, to = %dominator, "detaching constant load");
                self.detached.insert(slot);
            }
            load.block = dominator;
        }
        if !load.used_in.contains(&block) {
            load.used_in.push(block);
        }
        Some(load.variable)
    }

    /// Records the load of `constant` emitted at `slot` in `block`.
    pub fn record(&mut self, constant: Constant, variable: Variable, block: BlockId, slot: SlotId) {
        self.index.insert(constant, self.loads.len());
        self.loads.push(ConstantLoad {
            constant,
            variable,
            block,
            pinned: Some(slot),
            used_in: vec![block],
        });
    }

    pub fn is_detached(&self, slot: SlotId) -> bool {
        self.detached.contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Hoists loads out of loops (if enabled) and returns the loads that need
    /// inserting, grouped by block in linear order.
    pub fn finalize(
        &mut self,
        cfg: &ControlFlowGraph,
        options: &LoweringOptions,
    ) -> Vec<(BlockId, Vec<FloatingLoad>)> {
        if options.place_constant_loads_outside_loops {
            for load in &mut self.loads {
                let mut block = load.block;
                while cfg.is_in_loop(block) {
                    match cfg.dominator(block) {
                        Some(dominator) => block = dominator,
                        None => break,
                    }
                }
                if block != load.block {
                    tracing::trace!(constant = %load.constant, from = %load.block, to = %block, "hoisting constant load out of loop");
                    if let Some(slot) = load.pinned.take() {
                        self.detached.insert(slot);
                    }
                    load.block = block;
                }
            }
        }

        let mut groups: HashMap<BlockId, Vec<FloatingLoad>> = HashMap::new();
        for load in self.loads.iter().filter(|l| l.pinned.is_none()) {
            groups.entry(load.block).or_default().push(FloatingLoad {
                constant: load.constant,
                variable: load.variable,
                block: load.block,
            });
        }
        let mut groups: Vec<_> = groups.into_iter().collect();
        groups.sort_by_key(|(block, _)| cfg.block(*block).order);
        groups
    }

    /// Final placement of every load, for diagnostics and the dump.
    pub fn placements(&self) -> Vec<PlacedConstant> {
        self.loads
            .iter()
            .map(|l| PlacedConstant {
                constant: l.constant,
                variable: l.variable,
                block: l.block,
                used_in: l.used_in.clone(),
            })
            .collect()
    }
}

/// Where loads go in a finished block: before the trailing control transfer,
/// or before the earliest instruction with an exception edge among the last
/// `lookback` instructions.
pub fn insertion_index(instructions: &[LirInstruction], lookback: usize) -> usize {
    let mut index = instructions.len();
    while index > 0 && instructions[index - 1].op.is_branch() {
        index -= 1;
    }
    let window = instructions.len().saturating_sub(lookback);
    for (i, inst) in instructions.iter().enumerate().skip(window) {
        if inst.has_exception_edge() {
            return i.min(index);
        }
    }
    index
}
