//! LIR: the linear, target-independent instruction form.
//!
//! Each block holds a list of [`LirInstruction`]s whose operands are
//! [`Value`]s: virtual registers, fixed registers, stack slots or constants.
//! Instructions that can deoptimize carry a [`LirFrameState`].

use crate::debug_info::LirFrameState;
use crate::switch::SwitchStrategy;
use serde::Serialize;
use std::fmt;
use strata_core::{Constant, StackSlot, Value, Variable};
use strata_graph::{ArithOp, BlockId, Condition, DeoptReason};

strata_core::define_entity!(SlotId, "s");

/// Reference to a successor of the block containing the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LabelRef {
    pub from: BlockId,
    pub successor_index: usize,
    pub target: BlockId,
}

impl fmt::Display for LabelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum LirOp {
    Label {
        block: BlockId,
    },
    /// Defines the incoming parameter locations.
    Parameters {
        params: Vec<Value>,
    },
    Move {
        result: Value,
        input: Value,
    },
    Arithmetic {
        op: ArithOp,
        result: Value,
        x: Value,
        y: Value,
    },
    Negate {
        result: Value,
        input: Value,
    },
    /// `result = (x condition y) ? true_value : false_value`
    CondMove {
        result: Value,
        condition: Condition,
        unordered_is_true: bool,
        x: Value,
        y: Value,
        true_value: Value,
        false_value: Value,
    },
    /// Jumps to `target` if `x condition y`, otherwise falls through.
    CompareBranch {
        condition: Condition,
        unordered_is_true: bool,
        x: Value,
        y: Value,
        target: LabelRef,
    },
    Jump {
        target: LabelRef,
    },
    /// Dense jump table over `low_key..low_key + targets.len()`.
    TableSwitch {
        key: Value,
        low_key: i32,
        targets: Vec<LabelRef>,
        default: LabelRef,
    },
    /// Compare-and-branch sequence described by `strategy`; `key_targets[i]` is
    /// the destination of the strategy's key `i`.
    StrategySwitch {
        key: Value,
        strategy: SwitchStrategy,
        key_targets: Vec<LabelRef>,
        default: LabelRef,
    },
    Return {
        input: Value,
    },
    Call {
        target: String,
        result: Value,
        arguments: Vec<Value>,
    },
    Load {
        result: Value,
        base: Value,
        displacement: i32,
        /// The access doubles as the null check of `base`.
        null_check: bool,
    },
    Store {
        base: Value,
        displacement: i32,
        input: Value,
        null_check: bool,
    },
    NullCheck {
        object: Value,
    },
    /// Address of a lock slot.
    LockAddress {
        result: Value,
        slot: StackSlot,
    },
    MonitorEnter {
        object: Value,
        lock: Value,
    },
    MonitorExit {
        object: Value,
        lock: Value,
    },
    DeoptimizeIf {
        condition: Condition,
        unordered_is_true: bool,
        x: Value,
        y: Value,
        reason: DeoptReason,
    },
    Deoptimize {
        reason: DeoptReason,
    },
}

impl LirOp {
    pub fn name(&self) -> &'static str {
        match self {
            LirOp::Label { .. } => "label",
            LirOp::Parameters { .. } => "parameters",
            LirOp::Move { .. } => "move",
            LirOp::Arithmetic { .. } => "arith",
            LirOp::Negate { .. } => "neg",
            LirOp::CondMove { .. } => "cmove",
            LirOp::CompareBranch { .. } => "branch",
            LirOp::Jump { .. } => "jump",
            LirOp::TableSwitch { .. } => "tableswitch",
            LirOp::StrategySwitch { .. } => "strategyswitch",
            LirOp::Return { .. } => "return",
            LirOp::Call { .. } => "call",
            LirOp::Load { .. } => "load",
            LirOp::Store { .. } => "store",
            LirOp::NullCheck { .. } => "nullcheck",
            LirOp::LockAddress { .. } => "lockaddr",
            LirOp::MonitorEnter { .. } => "monitorenter",
            LirOp::MonitorExit { .. } => "monitorexit",
            LirOp::DeoptimizeIf { .. } => "deoptif",
            LirOp::Deoptimize { .. } => "deopt",
        }
    }

    /// Whether control never falls through this instruction.
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self,
            LirOp::Jump { .. }
                | LirOp::TableSwitch { .. }
                | LirOp::StrategySwitch { .. }
                | LirOp::Return { .. }
                | LirOp::Deoptimize { .. }
        )
    }

    /// Whether this instruction belongs to a block's closing branch sequence.
    pub fn is_branch(&self) -> bool {
        self.is_control_transfer() || matches!(self, LirOp::CompareBranch { .. })
    }

    /// Values written by this instruction.
    pub fn outputs(&self) -> Vec<Value> {
        match self {
            LirOp::Parameters { params } => params.clone(),
            LirOp::Move { result, .. }
            | LirOp::Arithmetic { result, .. }
            | LirOp::Negate { result, .. }
            | LirOp::CondMove { result, .. }
            | LirOp::Call { result, .. }
            | LirOp::Load { result, .. }
            | LirOp::LockAddress { result, .. } => vec![*result],
            _ => Vec::new(),
        }
    }

    /// Values read by this instruction.
    pub fn inputs(&self) -> Vec<Value> {
        match self {
            LirOp::Move { input, .. } | LirOp::Negate { input, .. } => vec![*input],
            LirOp::Arithmetic { x, y, .. }
            | LirOp::CompareBranch { x, y, .. }
            | LirOp::DeoptimizeIf { x, y, .. } => vec![*x, *y],
            LirOp::CondMove {
                x,
                y,
                true_value,
                false_value,
                ..
            } => vec![*x, *y, *true_value, *false_value],
            LirOp::TableSwitch { key, .. } | LirOp::StrategySwitch { key, .. } => vec![*key],
            LirOp::Call { arguments, .. } => arguments.clone(),
            LirOp::Load { base, .. } => vec![*base],
            LirOp::Store { base, input, .. } => vec![*base, *input],
            LirOp::NullCheck { object } => vec![*object],
            LirOp::MonitorEnter { object, lock } | LirOp::MonitorExit { object, lock } => {
                vec![*object, *lock]
            }
            _ => Vec::new(),
        }
    }

    /// Branch targets named by this instruction.
    pub fn targets(&self) -> Vec<LabelRef> {
        match self {
            LirOp::CompareBranch { target, .. } | LirOp::Jump { target } => vec![*target],
            LirOp::TableSwitch {
                targets, default, ..
            } => targets.iter().copied().chain([*default]).collect(),
            LirOp::StrategySwitch {
                key_targets,
                default,
                ..
            } => key_targets.iter().copied().chain([*default]).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for LirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirOp::Label { block } => write!(f, "{}:", block),
            LirOp::Move { result, input } => write!(f, "{} = {}", result, input),
            LirOp::Arithmetic { op, result, x, y } => {
                write!(f, "{} = {} {}, {}", result, op, x, y)
            }
            LirOp::CompareBranch {
                condition,
                x,
                y,
                target,
                ..
            } => write!(f, "branch {} {}, {} -> {}", condition, x, y, target),
            LirOp::Jump { target } => write!(f, "jump {}", target),
            other => {
                let outputs = other.outputs();
                let inputs = other.inputs();
                if !outputs.is_empty() {
                    let outs: Vec<String> = outputs.iter().map(|v| v.to_string()).collect();
                    write!(f, "{} = ", outs.join(", "))?;
                }
                write!(f, "{}", other.name())?;
                let ins: Vec<String> = inputs.iter().map(|v| v.to_string()).collect();
                if !ins.is_empty() {
                    write!(f, " {}", ins.join(", "))?;
                }
                let targets = other.targets();
                if !targets.is_empty() {
                    let labels: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                    write!(f, " -> [{}]", labels.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LirInstruction {
    /// Stable identity of the instruction within its method.
    pub slot: SlotId,
    #[serde(flatten)]
    pub op: LirOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<LirFrameState>>,
}

impl LirInstruction {
    pub fn has_exception_edge(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.exception_edge.is_some())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LirBlock {
    pub id: BlockId,
    pub instructions: Vec<LirInstruction>,
}

/// Final placement of a shared constant load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedConstant {
    pub constant: Constant,
    pub variable: Variable,
    pub block: BlockId,
    /// Blocks that used the constant during lowering.
    pub used_in: Vec<BlockId>,
}

/// The lowered method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lir {
    pub method: String,
    /// Blocks in linear order.
    pub blocks: Vec<LirBlock>,
    /// Whether some parameter is passed in the caller's frame.
    pub has_arg_in_caller_frame: bool,
    pub variable_count: u32,
    pub frame_size: i32,
    pub constant_loads: Vec<PlacedConstant>,
}

impl Lir {
    pub fn block(&self, id: BlockId) -> Option<&LirBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Instructions of `id`, or an empty slice for unknown blocks.
    pub fn instructions(&self, id: BlockId) -> &[LirInstruction] {
        self.block(id)
            .map(|b| b.instructions.as_slice())
            .unwrap_or(&[])
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

impl fmt::Display for Lir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lir {}", self.method)?;
        for block in &self.blocks {
            for inst in &block.instructions {
                match inst.op {
                    LirOp::Label { .. } => writeln!(f, "{}", inst.op)?,
                    _ => writeln!(f, "  {}", inst.op)?,
                }
            }
        }
        Ok(())
    }
}
