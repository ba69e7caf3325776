//! The block lowering driver.
//!
//! [`LirGenerator`] walks the blocks of a [`ControlFlowGraph`] in linear order and
//! hands every scheduled node to a [`NodeLowering`]. It owns everything the
//! lowering shares between nodes: the node-to-operand bindings, the variable
//! allocator and frame map, the constant-load tracker, the lock stack and the
//! last frame state seen in the current block.
//!
//! Instructions are emitted into provisional per-block lists; every instruction
//! gets a [`SlotId`] so constant loads can be detached without renumbering.
//! [`LirGenerator::finish`] rebuilds the final lists.

use crate::constant_load::{insertion_index, ConstantLoadTracker};
use crate::debug_info::{DebugInfoBuilder, LirFrameState, StateContext};
use crate::error::LowerError;
use crate::lir::{LabelRef, Lir, LirBlock, LirInstruction, LirOp, SlotId};
use crate::lowering::NodeLowering;
use crate::options::LoweringOptions;
use crate::phi::PhiResolver;
use crate::switch::{self, SwitchPlan};
use crate::target::TargetDescription;
use crate::variables::{FrameMap, VariableAllocator};
use crate::verify;
use strata_core::{Constant, EntityRef, Kind, SecondaryMap, Value, Variable};
use strata_graph::{
    BlockId, ControlFlowGraph, FrameStateId, Graph, LockEntry, NodeId, NodeKind,
};

pub struct LirGenerator<'a> {
    graph: &'a Graph,
    cfg: &'a ControlFlowGraph,
    target: &'a TargetDescription,
    options: &'a LoweringOptions,

    operands: SecondaryMap<NodeId, Value>,
    variables: VariableAllocator,
    frame_map: FrameMap,
    constant_loads: ConstantLoadTracker,
    debug_info: DebugInfoBuilder,
    has_arg_in_caller_frame: bool,

    blocks: SecondaryMap<BlockId, Vec<LirInstruction>>,
    next_slot: u32,
    current_block: Option<BlockId>,
    current: Vec<LirInstruction>,

    last_state: Option<FrameStateId>,
    block_exit_state: SecondaryMap<BlockId, Option<FrameStateId>>,
    locks: Vec<LockEntry>,
    block_entry_locks: SecondaryMap<BlockId, Vec<LockEntry>>,
    block_exit_locks: SecondaryMap<BlockId, Vec<LockEntry>>,

    /// Memory access that takes over a fused null check, with the check's state.
    pending_null_check: Option<(NodeId, Box<LirFrameState>)>,
}

impl<'a> LirGenerator<'a> {
    pub fn new(
        graph: &'a Graph,
        cfg: &'a ControlFlowGraph,
        target: &'a TargetDescription,
        options: &'a LoweringOptions,
    ) -> Self {
        LirGenerator {
            graph,
            cfg,
            target,
            options,
            operands: SecondaryMap::with_capacity(graph.node_count()),
            variables: VariableAllocator::new(),
            frame_map: FrameMap::new(),
            constant_loads: ConstantLoadTracker::new(),
            debug_info: DebugInfoBuilder::new(options.verify_debug_info),
            has_arg_in_caller_frame: false,
            blocks: SecondaryMap::with_capacity(cfg.block_count()),
            next_slot: 0,
            current_block: None,
            current: Vec::new(),
            last_state: None,
            block_exit_state: SecondaryMap::new(),
            locks: Vec::new(),
            block_entry_locks: SecondaryMap::new(),
            block_exit_locks: SecondaryMap::new(),
            pending_null_check: None,
        }
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    pub fn cfg(&self) -> &'a ControlFlowGraph {
        self.cfg
    }

    pub fn target(&self) -> &'a TargetDescription {
        self.target
    }

    pub fn options(&self) -> &'a LoweringOptions {
        self.options
    }

    /// Lowers every reachable block in linear order and assembles the result.
    pub fn generate(mut self, lowering: &mut dyn NodeLowering) -> Result<Lir, LowerError> {
        let span = tracing::debug_span!("generate_lir", method = %self.graph.name);
        let _enter = span.enter();
        let skipped = self.cfg.linear_order().len() - self.cfg.reachable_order().len();
        if skipped > 0 {
            tracing::debug!(skipped, "skipping unreachable blocks");
        }
        for &block in self.cfg.reachable_order() {
            self.do_block(block, lowering)?;
        }
        self.finish()
    }

    /// Lowers one block. A block is lowered at most once.
    pub fn do_block(
        &mut self,
        block: BlockId,
        lowering: &mut dyn NodeLowering,
    ) -> Result<(), LowerError> {
        let span = tracing::debug_span!("block", %block);
        let _enter = span.enter();
        self.do_block_inner(block, lowering)
            .map_err(|e| e.in_block(block))
    }

    fn do_block_inner(
        &mut self,
        block: BlockId,
        lowering: &mut dyn NodeLowering,
    ) -> Result<(), LowerError> {
        if self.blocks.contains_key(block) {
            return Err(LowerError::structural(format!(
                "block {} is already lowered",
                block
            )));
        }
        let cfg = self.cfg;
        let data = cfg.block(block);

        self.current_block = Some(block);
        self.current.clear();
        self.pending_null_check = None;
        self.emit(LirOp::Label { block });

        if block == cfg.start_block() {
            self.emit_prologue()?;
            self.last_state = None;
            self.locks.clear();
        } else {
            if data.predecessors.is_empty() {
                return Err(LowerError::structural(format!(
                    "block {} has no predecessors",
                    block
                )));
            }
            self.last_state = self.entry_state(block);
            self.locks = self.entry_locks(block)?;
        }
        self.block_entry_locks.insert(block, self.locks.clone());

        let nodes = &data.nodes;
        for (position, &node) in nodes.iter().enumerate() {
            if self.operands.contains_key(node) {
                tracing::trace!(node = %self.graph.describe(node), "already bound, skipping");
                continue;
            }
            self.lower_node(lowering, node, &nodes[position + 1..])
                .map_err(|e| e.in_node(node, self.graph.describe(node)))?;
            if let Some(state) = self.graph.node(node).state_after {
                self.last_state = Some(state);
            }
        }

        let ends_in_transfer = self
            .current
            .last()
            .map(|inst| inst.op.is_control_transfer())
            .unwrap_or(false);
        if !ends_in_transfer {
            match data.successors.len() {
                1 => {
                    let target = LabelRef {
                        from: block,
                        successor_index: 0,
                        target: data.successors[0],
                    };
                    tracing::trace!(%target, "synthesizing jump");
                    self.emit(LirOp::Jump { target });
                }
                0 => {
                    return Err(LowerError::structural(format!(
                        "block {} has no successor and does not end in a control transfer",
                        block
                    )))
                }
                n => {
                    return Err(LowerError::structural(format!(
                        "block {} has {} successors but no terminator",
                        block, n
                    )))
                }
            }
        }

        self.blocks.insert(block, std::mem::take(&mut self.current));
        self.block_exit_state.insert(block, self.last_state);
        self.block_exit_locks.insert(block, self.locks.clone());
        self.current_block = None;
        Ok(())
    }

    fn lower_node(
        &mut self,
        lowering: &mut dyn NodeLowering,
        node: NodeId,
        following: &[NodeId],
    ) -> Result<(), LowerError> {
        tracing::trace!(node = %self.graph.describe(node), "lowering");
        if !lowering.peephole(self, node, following)? {
            lowering.lower(self, node)?;
        }
        let data = self.graph.node(node);
        let lazily_bound = matches!(data.kind, NodeKind::Constant(_) | NodeKind::Phi { .. });
        if data.produces_value() && !lazily_bound && !self.operands.contains_key(node) {
            return Err(LowerError::structural(format!(
                "{} produces a value but no operand was bound",
                self.graph.describe(node)
            )));
        }
        Ok(())
    }

    /// Binds incoming parameter locations to fresh variables.
    fn emit_prologue(&mut self) -> Result<(), LowerError> {
        let cc = self
            .target
            .calling_convention(self.graph.parameter_kinds(), true);
        let params: Vec<Value> = cc
            .arguments
            .iter()
            .map(|location| {
                if let Value::StackSlot(slot) = location {
                    self.has_arg_in_caller_frame |= slot.in_caller_frame;
                    location.to_stack_kind()
                } else {
                    *location
                }
            })
            .collect();
        self.emit(LirOp::Parameters {
            params: params.clone(),
        });

        let graph = self.graph;
        for (node, data) in graph.nodes() {
            let NodeKind::Parameter { index } = data.kind else {
                continue;
            };
            let Some(&location) = params.get(index) else {
                return Err(LowerError::structural(format!(
                    "{} refers to parameter {} of {}",
                    graph.describe(node),
                    index,
                    params.len()
                )));
            };
            let variable = self.new_variable(data.value_kind);
            self.emit_move(variable, location);
            self.set_result(node, variable)?;
        }
        Ok(())
    }

    /// The last state of the lowered predecessors if all of them agree.
    /// Predecessors not lowered yet, such as loop back edges, are ignored.
    fn entry_state(&self, block: BlockId) -> Option<FrameStateId> {
        let mut entry = None;
        for &pred in &self.cfg.block(block).predecessors {
            let Some(&exit) = self.block_exit_state.get(pred) else {
                continue;
            };
            let state = exit?;
            match entry {
                Some(s) if s != state => return None,
                _ => entry = Some(state),
            }
        }
        entry
    }

    fn entry_locks(&self, block: BlockId) -> Result<Vec<LockEntry>, LowerError> {
        let mut entry: Option<&Vec<LockEntry>> = None;
        for &pred in &self.cfg.block(block).predecessors {
            let Some(exit) = self.block_exit_locks.get(pred) else {
                continue;
            };
            match entry {
                Some(locks) if locks != exit => {
                    return Err(LowerError::UnbalancedMonitors(format!(
                        "predecessors of block {} hold {} and {} locks",
                        block,
                        locks.len(),
                        exit.len()
                    )))
                }
                Some(_) => {}
                None => entry = Some(exit),
            }
        }
        Ok(entry.cloned().unwrap_or_default())
    }

    pub fn current_block(&self) -> Result<BlockId, LowerError> {
        self.current_block
            .ok_or_else(|| LowerError::structural("no block is being lowered"))
    }

    fn next_slot(&mut self) -> SlotId {
        let slot = SlotId::new(self.next_slot);
        self.next_slot += 1;
        slot
    }

    pub fn emit(&mut self, op: LirOp) -> SlotId {
        self.emit_with_state(op, None)
    }

    pub fn emit_with_state(&mut self, op: LirOp, state: Option<Box<LirFrameState>>) -> SlotId {
        let slot = self.next_slot();
        self.current.push(LirInstruction { slot, op, state });
        slot
    }

    pub fn is_bound(&self, node: NodeId) -> bool {
        self.operands.contains_key(node)
    }

    /// The operand for `node`. Constants are produced on demand: inline when
    /// the target allows, otherwise through the constant-load tracker. Phis get
    /// their variable on first reference.
    pub fn operand(&mut self, node: NodeId) -> Result<Value, LowerError> {
        if let Some(value) = self.operands.get(node) {
            return Ok(*value);
        }
        match &self.graph.node(node).kind {
            NodeKind::Constant(constant) => self.constant_operand(*constant),
            NodeKind::Phi { .. } => self.operand_for_phi(node),
            _ => Err(LowerError::structural(format!(
                "{} is used before it has an operand",
                self.graph.describe(node)
            ))),
        }
    }

    fn constant_operand(&mut self, constant: Constant) -> Result<Value, LowerError> {
        if self.target.can_inline_constant(&constant) {
            return Ok(Value::Constant(constant));
        }
        let block = self.current_block()?;
        if let Some(variable) = self.constant_loads.lookup(self.cfg, constant, block) {
            return Ok(Value::Variable(variable));
        }
        let variable = self.variables.new_variable(constant.kind());
        let slot = self.emit(LirOp::Move {
            result: Value::Variable(variable),
            input: Value::Constant(constant),
        });
        tracing::trace!(%constant, ?variable, %block, "loading constant");
        self.constant_loads.record(constant, variable, block, slot);
        Ok(Value::Variable(variable))
    }

    /// Binds `value` as the operand of `node`. A node is bound at most once.
    pub fn set_result(&mut self, node: NodeId, value: impl Into<Value>) -> Result<(), LowerError> {
        let value = value.into();
        let data = self.graph.node(node);
        if self.operands.contains_key(node) {
            return Err(LowerError::structural(format!(
                "operand of {} cannot be set twice",
                self.graph.describe(node)
            )));
        }
        if !value.is_legal() {
            return Err(LowerError::structural(format!(
                "illegal operand for {}",
                self.graph.describe(node)
            )));
        }
        if matches!(data.kind, NodeKind::VirtualObject { .. }) {
            return Err(LowerError::structural(format!(
                "virtual object {} cannot have an operand",
                self.graph.describe(node)
            )));
        }
        if value.kind().stack_kind() != data.value_kind.stack_kind() {
            return Err(LowerError::structural(format!(
                "operand {} does not match kind {} of {}",
                value,
                data.value_kind,
                self.graph.describe(node)
            )));
        }
        self.operands.insert(node, value);
        Ok(())
    }

    pub fn new_variable(&mut self, kind: Kind) -> Variable {
        self.variables.new_variable(kind)
    }

    pub fn emit_move(&mut self, result: impl Into<Value>, input: Value) {
        self.emit(LirOp::Move {
            result: result.into(),
            input,
        });
    }

    /// `value` as a variable, copying it into a fresh one if needed.
    pub fn load(&mut self, value: Value) -> Value {
        if value.is_variable() {
            return value;
        }
        let variable = self.new_variable(value.kind());
        self.emit_move(variable, value);
        Value::Variable(variable)
    }

    /// Like [`LirGenerator::load`] but leaves inlinable constants in place.
    pub fn load_non_constant(&mut self, value: Value) -> Value {
        match value.as_constant() {
            Some(constant) if self.target.can_inline_constant(&constant) => value,
            _ => self.load(value),
        }
    }

    /// Reference from the current block to the block beginning with `begin`.
    pub fn label_for(&self, begin: NodeId) -> Result<LabelRef, LowerError> {
        let from = self.current_block()?;
        let Some(target) = self.cfg.block_for(begin) else {
            return Err(LowerError::structural(format!(
                "{} does not begin a block",
                self.graph.describe(begin)
            )));
        };
        let Some(successor_index) = self
            .cfg
            .block(from)
            .successors
            .iter()
            .position(|s| *s == target)
        else {
            return Err(LowerError::structural(format!(
                "block {} is not a successor of {}",
                target, from
            )));
        };
        Ok(LabelRef {
            from,
            successor_index,
            target,
        })
    }

    /// The variable holding the value of `phi`, allocated on first request.
    pub fn operand_for_phi(&mut self, phi: NodeId) -> Result<Value, LowerError> {
        if let Some(value) = self.operands.get(phi) {
            return Ok(*value);
        }
        let variable = self.new_variable(self.graph.node(phi).value_kind);
        self.set_result(phi, variable)?;
        Ok(Value::Variable(variable))
    }

    /// Moves the values flowing along `end` into the phis of `merge`.
    pub fn move_to_phi(&mut self, merge: NodeId, end: NodeId) -> Result<(), LowerError> {
        let graph = self.graph;
        let Some(index) = graph.phi_predecessor_index(merge, end) else {
            return Err(LowerError::structural(format!(
                "{} is not an end of {}",
                graph.describe(end),
                graph.describe(merge)
            )));
        };
        let mut resolver = PhiResolver::new();
        for &phi in graph.phis(merge) {
            let NodeKind::Phi { values, .. } = graph.kind(phi) else {
                return Err(LowerError::structural(format!(
                    "{} is not a phi",
                    graph.describe(phi)
                )));
            };
            let Some(&value) = values.get(index) else {
                return Err(LowerError::structural(format!(
                    "{} has no input for {}",
                    graph.describe(phi),
                    graph.describe(end)
                )));
            };
            let dest = self.operand_for_phi(phi)?;
            let src = self.operand(value)?;
            resolver.add_move(dest, src)?;
        }
        let variables = &mut self.variables;
        let moves = resolver.resolve(|kind| variables.new_variable(kind))?;
        tracing::trace!(merge = %merge, moves = moves.len(), "resolved phi moves");
        for m in moves {
            self.emit_move(m.dest, m.src);
        }
        Ok(())
    }

    /// Checks that the lock stack at a back edge matches the loop header's.
    pub fn check_loop_end_locks(&self, merge: NodeId) -> Result<(), LowerError> {
        let Some(header) = self.cfg.block_for(merge) else {
            return Ok(());
        };
        match self.block_entry_locks.get(header) {
            Some(entry) if *entry != self.locks => Err(LowerError::UnbalancedMonitors(format!(
                "back edge to block {} holds {} locks, header entered with {}",
                header,
                self.locks.len(),
                entry.len()
            ))),
            _ => Ok(()),
        }
    }

    /// Branches to `true_target` if `condition` holds, else to `false_target`.
    pub fn emit_branch(
        &mut self,
        condition: NodeId,
        true_target: LabelRef,
        false_target: LabelRef,
    ) -> Result<(), LowerError> {
        match self.graph.kind(condition) {
            NodeKind::Compare {
                condition: cond,
                x,
                y,
                unordered_is_true,
            } => {
                let (cond, unordered_is_true, x, y) = (*cond, *unordered_is_true, *x, *y);
                let (cond, x, y) = self.compare_operands(cond, x, y)?;
                self.emit(LirOp::CompareBranch {
                    condition: cond.negate(),
                    unordered_is_true: !unordered_is_true,
                    x,
                    y,
                    target: false_target,
                });
                self.emit(LirOp::Jump {
                    target: true_target,
                });
            }
            NodeKind::IsNull { object } => {
                let object = *object;
                let object = self.operand(object)?;
                let object = self.load(object);
                self.emit(LirOp::CompareBranch {
                    condition: strata_graph::Condition::Ne,
                    unordered_is_true: false,
                    x: object,
                    y: Value::Constant(Constant::Null),
                    target: false_target,
                });
                self.emit(LirOp::Jump {
                    target: true_target,
                });
            }
            NodeKind::Constant(constant) => {
                let target = if constant_truth(constant)? {
                    true_target
                } else {
                    false_target
                };
                self.emit(LirOp::Jump { target });
            }
            _ => {
                return Err(LowerError::unsupported(format!(
                    "branch on {}",
                    self.graph.describe(condition)
                )))
            }
        }
        Ok(())
    }

    /// Operands for a comparison: `x` in a variable, `y` possibly inline. A
    /// constant `x` is swapped to the right.
    fn compare_operands(
        &mut self,
        condition: strata_graph::Condition,
        x: NodeId,
        y: NodeId,
    ) -> Result<(strata_graph::Condition, Value, Value), LowerError> {
        let mut x = self.operand(x)?;
        let mut y = self.operand(y)?;
        let mut condition = condition;
        if x.is_constant() && !y.is_constant() {
            std::mem::swap(&mut x, &mut y);
            condition = condition.mirror();
        }
        let x = self.load(x);
        let y = self.load_non_constant(y);
        Ok((condition, x, y))
    }

    /// Lowers a conditional value to a conditional move.
    pub fn emit_conditional(
        &mut self,
        node: NodeId,
        condition: NodeId,
        true_value: NodeId,
        false_value: NodeId,
    ) -> Result<(), LowerError> {
        let graph = self.graph;
        let result = Value::Variable(self.new_variable(graph.node(node).value_kind));
        match graph.kind(condition) {
            NodeKind::Constant(constant) => {
                let chosen = if constant_truth(constant)? {
                    true_value
                } else {
                    false_value
                };
                let value = self.operand(chosen)?;
                self.emit_move(result, value);
            }
            NodeKind::Compare {
                condition: cond,
                x,
                y,
                unordered_is_true,
            } => {
                let (cond, x, y) = self.compare_operands(*cond, *x, *y)?;
                let true_value = self.operand(true_value)?;
                let true_value = self.load_non_constant(true_value);
                let false_value = self.operand(false_value)?;
                let false_value = self.load_non_constant(false_value);
                self.emit(LirOp::CondMove {
                    result,
                    condition: cond,
                    unordered_is_true: *unordered_is_true,
                    x,
                    y,
                    true_value,
                    false_value,
                });
            }
            NodeKind::IsNull { object } => {
                let object = self.operand(*object)?;
                let object = self.load(object);
                let true_value = self.operand(true_value)?;
                let true_value = self.load_non_constant(true_value);
                let false_value = self.operand(false_value)?;
                let false_value = self.load_non_constant(false_value);
                self.emit(LirOp::CondMove {
                    result,
                    condition: strata_graph::Condition::Eq,
                    unordered_is_true: false,
                    x: object,
                    y: Value::Constant(Constant::Null),
                    true_value,
                    false_value,
                });
            }
            _ => {
                return Err(LowerError::unsupported(format!(
                    "conditional on {}",
                    graph.describe(condition)
                )))
            }
        }
        self.set_result(node, result)
    }

    /// Lowers a multi-way branch. `key_targets[i]` is the destination of
    /// `keys[i]`.
    pub fn emit_switch(
        &mut self,
        value: NodeId,
        keys: &[Constant],
        key_targets: &[LabelRef],
        key_probabilities: &[f64],
        default: LabelRef,
    ) -> Result<(), LowerError> {
        if keys.len() != key_targets.len() {
            return Err(LowerError::structural(format!(
                "switch has {} keys but {} key targets",
                keys.len(),
                key_targets.len()
            )));
        }
        match keys.len() {
            0 => {
                self.emit(LirOp::Jump { target: default });
            }
            1 => {
                let key = self.operand(value)?;
                let key = self.load(key);
                self.emit(LirOp::CompareBranch {
                    condition: strata_graph::Condition::Eq,
                    unordered_is_true: false,
                    x: key,
                    y: Value::Constant(keys[0]),
                    target: key_targets[0],
                });
                self.emit(LirOp::Jump { target: default });
            }
            _ => {
                let key = self.operand(value)?;
                let key = self.load(key);
                let target_ids: Vec<usize> =
                    key_targets.iter().map(|t| t.successor_index).collect();
                let plan = switch::choose(
                    keys,
                    key_probabilities,
                    &target_ids,
                    self.options.switch_effort_threshold,
                    self.options.max_table_switch_range,
                );
                match plan {
                    SwitchPlan::Strategy(strategy) => {
                        tracing::debug!(kind = ?strategy.kind, effort = strategy.average_effort, keys = keys.len(), "switch strategy");
                        self.emit(LirOp::StrategySwitch {
                            key,
                            strategy,
                            key_targets: key_targets.to_vec(),
                            default,
                        });
                    }
                    SwitchPlan::Table { low_key, slots } => {
                        tracing::debug!(low_key, range = slots.len(), keys = keys.len(), "table switch");
                        let targets = slots
                            .iter()
                            .map(|slot| slot.map(|i| key_targets[i]).unwrap_or(default))
                            .collect();
                        self.emit(LirOp::TableSwitch {
                            key,
                            low_key,
                            targets,
                            default,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The snapshot to describe a deoptimization at the current position:
    /// `explicit` if given, else the last state of the block.
    pub fn state_for(&self, explicit: Option<FrameStateId>) -> Option<FrameStateId> {
        explicit.or(self.last_state)
    }

    /// Builds the debug state for `state`. Every value the chain refers to must
    /// already have an operand.
    pub fn debug_state(
        &mut self,
        state: FrameStateId,
        exception_edge: Option<LabelRef>,
    ) -> Result<Box<LirFrameState>, LowerError> {
        self.check_state_ready(state)?;
        let mut ctx = StateContext {
            graph: self.graph,
            operands: &self.operands,
            frame_map: &mut self.frame_map,
        };
        let built = self.debug_info.build(&mut ctx, state, exception_edge)?;
        Ok(Box::new(built))
    }

    /// Debug state for the current position; fails if there is none.
    pub fn require_state(
        &mut self,
        explicit: Option<FrameStateId>,
        exception_edge: Option<LabelRef>,
    ) -> Result<Box<LirFrameState>, LowerError> {
        match self.state_for(explicit) {
            Some(state) => self.debug_state(state, exception_edge),
            None => Err(LowerError::structural("no frame state available")),
        }
    }

    fn check_state_ready(&self, top: FrameStateId) -> Result<(), LowerError> {
        let graph = self.graph;
        let mut visited = Vec::new();
        let mut current = Some(top);
        while let Some(id) = current {
            if visited.contains(&id) {
                return Err(LowerError::debug_state(format!(
                    "frame state {} is its own caller",
                    id
                )));
            }
            visited.push(id);
            let Some(state) = graph.try_frame_state(id) else {
                return Err(LowerError::debug_state(format!("unknown frame state {}", id)));
            };
            for value in state.slot_values() {
                let ready = self.operands.contains_key(value)
                    || matches!(
                        graph.try_node(value).map(|n| &n.kind),
                        Some(NodeKind::Constant(_) | NodeKind::VirtualObject { .. })
                    );
                if !ready {
                    return Err(LowerError::structural(format!(
                        "frame state {} refers to {} which has no operand yet",
                        id,
                        graph.describe(value)
                    )));
                }
            }
            current = state.outer;
        }
        Ok(())
    }

    /// Pushes a lock and returns its slot.
    pub fn enter_lock(&mut self, object: NodeId, eliminated: bool) -> strata_core::StackSlot {
        let slot = self.frame_map.lock_slot(self.locks.len());
        self.locks.push(LockEntry { object, eliminated });
        slot
    }

    /// Pops the innermost lock, which must be on `object`.
    pub fn exit_lock(&mut self, object: NodeId) -> Result<strata_core::StackSlot, LowerError> {
        match self.locks.last() {
            Some(top) if top.object == object => {
                self.locks.pop();
                Ok(self.frame_map.lock_slot(self.locks.len()))
            }
            Some(top) => Err(LowerError::UnbalancedMonitors(format!(
                "exit on {} while {} is the innermost lock",
                self.graph.describe(object),
                self.graph.describe(top.object)
            ))),
            None => Err(LowerError::UnbalancedMonitors(format!(
                "exit on {} without a held lock",
                self.graph.describe(object)
            ))),
        }
    }

    pub fn held_locks(&self) -> &[LockEntry] {
        &self.locks
    }

    pub fn reserve_outgoing(&mut self, size: i32) {
        self.frame_map.reserve_outgoing(size);
    }

    /// Marks `access` as the instruction doubling as a null check with `state`.
    pub fn fuse_null_check(&mut self, access: NodeId, state: Box<LirFrameState>) {
        self.pending_null_check = Some((access, state));
    }

    /// The fused null-check state for `access`, if one was recorded.
    pub fn take_null_check(&mut self, access: NodeId) -> Option<Box<LirFrameState>> {
        if self
            .pending_null_check
            .as_ref()
            .is_some_and(|(node, _)| *node == access)
        {
            self.pending_null_check.take().map(|(_, state)| state)
        } else {
            None
        }
    }

    /// Rebuilds the block lists, places floating constant loads and verifies
    /// the result.
    pub fn finish(mut self) -> Result<Lir, LowerError> {
        let groups = self.constant_loads.finalize(self.cfg, self.options);
        let mut blocks = Vec::with_capacity(self.blocks.count());
        for &id in self.cfg.linear_order() {
            let Some(provisional) = self.blocks.remove(id) else {
                continue;
            };
            let instructions: Vec<LirInstruction> = provisional
                .into_iter()
                .filter(|inst| !self.constant_loads.is_detached(inst.slot))
                .collect();
            blocks.push(LirBlock { id, instructions });
        }

        for (block, loads) in groups {
            let Some(lir_block) = blocks.iter_mut().find(|b| b.id == block) else {
                return Err(LowerError::structural(format!(
                    "constant loads placed in unlowered block {}",
                    block
                )));
            };
            let at = insertion_index(&lir_block.instructions, self.options.exception_edge_lookback);
            tracing::trace!(%block, count = loads.len(), at, "placing constant loads");
            let moves: Vec<LirInstruction> = loads
                .into_iter()
                .map(|load| {
                    let slot = SlotId::new(self.next_slot);
                    self.next_slot += 1;
                    LirInstruction {
                        slot,
                        op: LirOp::Move {
                            result: Value::Variable(load.variable),
                            input: Value::Constant(load.constant),
                        },
                        state: None,
                    }
                })
                .collect();
            lir_block.instructions.splice(at..at, moves);
        }

        let lir = Lir {
            method: self.graph.name.clone(),
            blocks,
            has_arg_in_caller_frame: self.has_arg_in_caller_frame,
            variable_count: self.variables.count(),
            frame_size: self.frame_map.frame_size(),
            constant_loads: self.constant_loads.placements(),
        };
        if self.options.verify_lir {
            verify::verify_lir(&lir, self.cfg)?;
        }
        tracing::debug!(
            method = %lir.method,
            blocks = lir.blocks.len(),
            instructions = lir.instruction_count(),
            variables = lir.variable_count,
            "lowered"
        );
        Ok(lir)
    }
}

fn constant_truth(constant: &Constant) -> Result<bool, LowerError> {
    constant
        .as_boolean()
        .or_else(|| constant.as_long().map(|v| v != 0))
        .ok_or_else(|| LowerError::unsupported(format!("{} as a condition", constant)))
}
