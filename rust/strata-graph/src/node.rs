//! Node kinds.
//!
//! Every node is one variant of [`NodeKind`]; consumers match over it instead of
//! asking nodes what they are. Inputs are other nodes, referenced by id.

use crate::frame_state::FrameStateId;
use serde::{Deserialize, Serialize};
use strata_core::{Constant, Kind};
use strum_macros::{Display, IntoStaticStr};

strata_core::define_entity!(NodeId, "n");

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Kind of the value this node produces; `Void` for control and logic nodes.
    pub value_kind: Kind,
    /// State after a side effect, for nodes that have one.
    pub state_after: Option<FrameStateId>,
}

impl Node {
    /// Whether lowering must bind an operand for this node.
    pub fn produces_value(&self) -> bool {
        self.value_kind.is_value() && !matches!(self.kind, NodeKind::VirtualObject { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

/// Comparison conditions. Unsigned variants compare the operands as unsigned
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below.
    Bt,
    /// Unsigned below or equal.
    Be,
    /// Unsigned above.
    At,
    /// Unsigned above or equal.
    Ae,
}

impl Condition {
    pub fn negate(self) -> Condition {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Lt => Condition::Ge,
            Condition::Le => Condition::Gt,
            Condition::Gt => Condition::Le,
            Condition::Ge => Condition::Lt,
            Condition::Bt => Condition::Ae,
            Condition::Be => Condition::At,
            Condition::At => Condition::Be,
            Condition::Ae => Condition::Bt,
        }
    }

    /// The condition that holds for `(y, x)` whenever `self` holds for `(x, y)`.
    pub fn mirror(self) -> Condition {
        match self {
            Condition::Eq => Condition::Eq,
            Condition::Ne => Condition::Ne,
            Condition::Lt => Condition::Gt,
            Condition::Le => Condition::Ge,
            Condition::Gt => Condition::Lt,
            Condition::Ge => Condition::Le,
            Condition::Bt => Condition::At,
            Condition::Be => Condition::Ae,
            Condition::At => Condition::Bt,
            Condition::Ae => Condition::Be,
        }
    }

    /// Evaluates the condition on two integral values.
    pub fn fold(self, x: i64, y: i64) -> bool {
        match self {
            Condition::Eq => x == y,
            Condition::Ne => x != y,
            Condition::Lt => x < y,
            Condition::Le => x <= y,
            Condition::Gt => x > y,
            Condition::Ge => x >= y,
            Condition::Bt => (x as u64) < (y as u64),
            Condition::Be => (x as u64) <= (y as u64),
            Condition::At => (x as u64) > (y as u64),
            Condition::Ae => (x as u64) >= (y as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum DeoptReason {
    NullCheckException,
    BoundsCheckException,
    ClassCastException,
    UnreachedCode,
    TypeCheckedInliningViolated,
    Unresolved,
    RuntimeConstraint,
}

/// Type of an escape-analyzed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Instance { name: String, fields: Vec<Kind> },
    Array { component: Kind, length: usize },
}

impl ObjectType {
    pub fn entry_count(&self) -> usize {
        match self {
            ObjectType::Instance { fields, .. } => fields.len(),
            ObjectType::Array { length, .. } => *length,
        }
    }

    pub fn entry_kind(&self, index: usize) -> Option<Kind> {
        match self {
            ObjectType::Instance { fields, .. } => fields.get(index).copied(),
            ObjectType::Array { component, length } => (index < *length).then_some(*component),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ObjectType::Array { .. })
    }

    pub fn name(&self) -> String {
        match self {
            ObjectType::Instance { name, .. } => name.clone(),
            ObjectType::Array { component, .. } => format!("{}[]", component),
        }
    }
}

#[derive(Debug, Clone, IntoStaticStr)]
pub enum NodeKind {
    /// Entry of the method; begins the root block.
    Start,
    /// Begins a block with a single predecessor.
    Begin,
    /// Begins a join. `ends` are the incoming end nodes in phi-input order;
    /// for loop headers the forward ends come first, then the loop ends.
    Merge { ends: Vec<NodeId>, loop_header: bool },
    /// Forward edge into a merge.
    End { merge: NodeId },
    /// Back edge into a loop header.
    LoopEnd { merge: NodeId },

    Parameter { index: usize },
    Constant(Constant),
    /// `values[i]` flows in along `ends[i]` of `merge`.
    Phi { merge: NodeId, values: Vec<NodeId> },

    Arithmetic { op: ArithOp, x: NodeId, y: NodeId },
    Negate { value: NodeId },

    /// Logic node: not a value, consumed by branches, guards and conditionals.
    Compare {
        condition: Condition,
        x: NodeId,
        y: NodeId,
        unordered_is_true: bool,
    },
    /// Logic node testing a reference against null.
    IsNull { object: NodeId },
    Conditional {
        condition: NodeId,
        true_value: NodeId,
        false_value: NodeId,
    },

    If {
        condition: NodeId,
        true_successor: NodeId,
        false_successor: NodeId,
        true_probability: f64,
    },
    /// Multi-way branch. `key_successors[i]` indexes `successors` for `keys[i]`.
    Switch {
        value: NodeId,
        keys: Vec<Constant>,
        key_successors: Vec<usize>,
        key_probabilities: Vec<f64>,
        default_successor: usize,
        successors: Vec<NodeId>,
    },
    Return { result: Option<NodeId> },

    Invoke {
        target: String,
        arguments: Vec<NodeId>,
        state_during: Option<FrameStateId>,
        /// Normal successor when the invoke has an exception edge.
        next: Option<NodeId>,
        exception_edge: Option<NodeId>,
    },
    /// Deoptimizes unless `condition` (inverted when `negated`) holds.
    Guard {
        condition: NodeId,
        negated: bool,
        reason: DeoptReason,
    },
    Deoptimize { reason: DeoptReason },

    MonitorEnter { object: NodeId, eliminated: bool },
    MonitorExit { object: NodeId, eliminated: bool },

    Read { object: NodeId, displacement: i32 },
    Write {
        object: NodeId,
        displacement: i32,
        value: NodeId,
    },

    /// An allocation removed by escape analysis; appears only in frame states.
    VirtualObject { ty: ObjectType },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Data inputs of this node, in operand order.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Phi { values, .. } => values.clone(),
            NodeKind::Arithmetic { x, y, .. } | NodeKind::Compare { x, y, .. } => vec![*x, *y],
            NodeKind::Negate { value } => vec![*value],
            NodeKind::IsNull { object }
            | NodeKind::MonitorEnter { object, .. }
            | NodeKind::MonitorExit { object, .. }
            | NodeKind::Read { object, .. } => vec![*object],
            NodeKind::Conditional {
                condition,
                true_value,
                false_value,
            } => vec![*condition, *true_value, *false_value],
            NodeKind::If { condition, .. } | NodeKind::Guard { condition, .. } => {
                vec![*condition]
            }
            NodeKind::Switch { value, .. } => vec![*value],
            NodeKind::Return { result } => result.iter().copied().collect(),
            NodeKind::Invoke { arguments, .. } => arguments.clone(),
            NodeKind::Write { object, value, .. } => vec![*object, *value],
            _ => Vec::new(),
        }
    }

    /// Whether this is a boolean-valued logic node rather than a value.
    pub fn is_logic(&self) -> bool {
        matches!(self, NodeKind::Compare { .. } | NodeKind::IsNull { .. })
    }
}
