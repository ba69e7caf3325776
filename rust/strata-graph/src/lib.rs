//! Strata Graph
//!
//! The scheduled IR graph and control-flow graph consumed by the lowering engine.
//! Nodes live in an arena addressed by [`NodeId`]; blocks carry their node order
//! as produced by the scheduler, together with dominator and loop information.

pub mod cfg;
pub mod frame_state;
pub mod graph;
pub mod node;

pub use cfg::{Block, BlockId, BlockSpec, CfgError, ControlFlowGraph};
pub use frame_state::{
    EscapeObjectState, FrameState, FrameStateId, LockEntry, MethodRef, AFTER_BCI,
    AFTER_EXCEPTION_BCI, BEFORE_BCI, UNWIND_BCI,
};
pub use graph::Graph;
pub use node::{ArithOp, Condition, DeoptReason, Node, NodeId, NodeKind, ObjectType};
