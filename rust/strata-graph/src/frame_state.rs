//! Frame-state snapshots.
//!
//! A [`FrameState`] records the interpreter-visible state of one logical frame at
//! a program point: locals, operand stack and held locks. Inlined frames link to
//! the state of their caller through `outer`, innermost first. Objects removed by
//! escape analysis appear in slots as [`NodeKind::VirtualObject`](crate::NodeKind)
//! nodes whose field values are described by the chain's `virtual_mappings`.

use crate::node::NodeId;

strata_core::define_entity!(FrameStateId, "fs");

/// State before the first instruction of a method.
pub const BEFORE_BCI: i32 = -1;
/// State after the last instruction of a method, used for returns.
pub const AFTER_BCI: i32 = -2;
/// State at an unwind out of the method.
pub const UNWIND_BCI: i32 = -3;
/// State after an exception was thrown, before dispatch.
pub const AFTER_EXCEPTION_BCI: i32 = -4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub name: String,
    /// Length of the method's bytecode; valid program locations are `0..code_size`.
    pub code_size: i32,
}

impl MethodRef {
    pub fn new(name: impl Into<String>, code_size: i32) -> Self {
        MethodRef {
            name: name.into(),
            code_size,
        }
    }

    /// Whether `bci` is a real location in this method or one of the marker
    /// locations.
    pub fn is_valid_bci(&self, bci: i32) -> bool {
        (0..self.code_size).contains(&bci)
            || matches!(bci, BEFORE_BCI | AFTER_BCI | UNWIND_BCI | AFTER_EXCEPTION_BCI)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub object: NodeId,
    /// Lock elided by escape analysis; still recorded for deoptimization.
    pub eliminated: bool,
}

/// What escape analysis knows about a virtual object at this program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeObjectState {
    /// Still virtual; `field_values[i]` is the value of entry `i`. `None` marks
    /// the upper half of a preceding two-slot value.
    Virtual {
        object: NodeId,
        field_values: Vec<Option<NodeId>>,
    },
    /// Materialized after all; references to `object` resolve to the value.
    Materialized {
        object: NodeId,
        materialized_value: NodeId,
    },
}

impl EscapeObjectState {
    pub fn object(&self) -> NodeId {
        match self {
            EscapeObjectState::Virtual { object, .. }
            | EscapeObjectState::Materialized { object, .. } => *object,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameState {
    pub method: MethodRef,
    pub bci: i32,
    /// `None` is an unused slot, typically the upper half of a two-slot local.
    pub locals: Vec<Option<NodeId>>,
    pub stack: Vec<Option<NodeId>>,
    pub locks: Vec<LockEntry>,
    pub outer: Option<FrameStateId>,
    pub virtual_mappings: Vec<EscapeObjectState>,
    pub rethrow_exception: bool,
    pub during_call: bool,
}

impl FrameState {
    pub fn new(method: MethodRef, bci: i32) -> Self {
        FrameState {
            method,
            bci,
            locals: Vec::new(),
            stack: Vec::new(),
            locks: Vec::new(),
            outer: None,
            virtual_mappings: Vec::new(),
            rethrow_exception: false,
            during_call: false,
        }
    }

    pub fn with_locals(mut self, locals: Vec<Option<NodeId>>) -> Self {
        self.locals = locals;
        self
    }

    pub fn with_stack(mut self, stack: Vec<Option<NodeId>>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_locks(mut self, locks: Vec<LockEntry>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_outer(mut self, outer: FrameStateId) -> Self {
        self.outer = Some(outer);
        self
    }

    pub fn with_virtual_mapping(mut self, mapping: EscapeObjectState) -> Self {
        self.virtual_mappings.push(mapping);
        self
    }

    pub fn during_call(mut self) -> Self {
        self.during_call = true;
        self
    }

    /// Nodes referenced by the frame's own slots (locals, stack, lock owners).
    pub fn slot_values(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.locals
            .iter()
            .chain(self.stack.iter())
            .filter_map(|slot| *slot)
            .chain(self.locks.iter().map(|lock| lock.object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::EntityRef;

    #[test]
    fn test_bci_validity() {
        let method = MethodRef::new("m", 10);
        assert!(method.is_valid_bci(0));
        assert!(method.is_valid_bci(9));
        assert!(!method.is_valid_bci(10));
        assert!(method.is_valid_bci(BEFORE_BCI));
        assert!(method.is_valid_bci(AFTER_EXCEPTION_BCI));
        assert!(!method.is_valid_bci(-17));
    }

    #[test]
    fn test_slot_values_skip_holes() {
        let state = FrameState::new(MethodRef::new("m", 4), 1)
            .with_locals(vec![Some(NodeId::new(1)), None])
            .with_stack(vec![Some(NodeId::new(2))])
            .with_locks(vec![LockEntry {
                object: NodeId::new(1),
                eliminated: false,
            }]);
        let values: Vec<u32> = state.slot_values().map(|n| n.index()).collect();
        assert_eq!(values, vec![1, 2, 1]);
    }
}
