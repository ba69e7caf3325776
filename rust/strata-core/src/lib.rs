//! Strata Core
//!
//! Value types shared by the graph model and the lowering engine: typed entity
//! arenas, value kinds, constants and the operand representation used by LIR.

pub mod constant;
pub mod entity;
pub mod kind;
pub mod value;

pub use constant::Constant;
pub use entity::{EntityRef, PrimaryMap, SecondaryMap};
pub use kind::Kind;
pub use value::{Register, RegisterCategory, RegisterValue, StackSlot, Value, Variable};
