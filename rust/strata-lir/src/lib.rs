//! Strata LIR
//!
//! Lowers a scheduled IR graph into LIR, one instruction list per block.
//!
//! The engine is made of four cooperating parts:
//!
//! - the block lowering driver ([`LirGenerator`]), which visits blocks in
//!   linear order and dispatches every node to a [`NodeLowering`];
//! - the constant-load tracker ([`constant_load`]), which places loads of
//!   non-embeddable constants at a dominator of all their uses;
//! - the move resolver ([`PhiResolver`]), which orders phi moves at block joins
//!   so that no value is overwritten before it is read;
//! - the debug-state builder ([`DebugInfoBuilder`]), which turns frame-state
//!   chains into frame descriptors for deoptimization.
//!
//! A compilation is single-threaded; separate compilations share nothing.

pub mod constant_load;
pub mod debug_info;
pub mod emit;
pub mod error;
pub mod generator;
pub mod lir;
pub mod lowering;
pub mod options;
pub mod phi;
pub mod switch;
pub mod target;
pub mod variables;
pub mod verify;

pub use debug_info::{
    DebugInfoBuilder, DebugValue, FrameDescriptor, LirFrameState, VirtualObjectDescriptor,
};
pub use error::LowerError;
pub use generator::LirGenerator;
pub use lir::{LabelRef, Lir, LirBlock, LirInstruction, LirOp, PlacedConstant, SlotId};
pub use lowering::{NodeLowering, StandardLowering};
pub use options::LoweringOptions;
pub use phi::{Move, PhiResolver};
pub use switch::{SwitchPlan, SwitchStrategy};
pub use target::{CallingConvention, TargetDescription};

use strata_graph::{ControlFlowGraph, Graph};

/// Lowers `graph` with the standard node lowering.
pub fn generate_lir(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    target: &TargetDescription,
    options: &LoweringOptions,
) -> Result<Lir, LowerError> {
    generate_lir_with(graph, cfg, target, options, &mut StandardLowering)
}

/// Lowers `graph`, dispatching nodes to `lowering`.
pub fn generate_lir_with(
    graph: &Graph,
    cfg: &ControlFlowGraph,
    target: &TargetDescription,
    options: &LoweringOptions,
    lowering: &mut dyn NodeLowering,
) -> Result<Lir, LowerError> {
    LirGenerator::new(graph, cfg, target, options).generate(lowering)
}
