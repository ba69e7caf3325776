//! Virtual-register numbering and frame layout.
//!
//! Variables are numbered densely per method; the register allocator later maps
//! them onto machine registers and spill slots. The frame map hands out the
//! stack slots the lowering itself needs, currently one per lock nesting level.

use strata_core::{Kind, StackSlot, Variable};

/// Allocation state for the variables of one method.
#[derive(Debug, Default)]
pub struct VariableAllocator {
    kinds: Vec<Kind>,
}

impl VariableAllocator {
    pub fn new() -> Self {
        Self { kinds: Vec::new() }
    }

    /// Allocates a variable holding values of `kind`, widened to its stack kind.
    pub fn new_variable(&mut self, kind: Kind) -> Variable {
        let variable = Variable {
            index: self.kinds.len() as u32,
            kind: kind.stack_kind(),
        };
        self.kinds.push(variable.kind);
        variable
    }

    pub fn kind_of(&self, index: u32) -> Option<Kind> {
        self.kinds.get(index as usize).copied()
    }

    /// Number of variables allocated so far.
    pub fn count(&self) -> u32 {
        self.kinds.len() as u32
    }
}

/// Bytes reserved per lock slot: the displaced header plus the owner.
const LOCK_SLOT_SIZE: i32 = 16;

/// Stack slots reserved in the method's own frame.
#[derive(Debug, Default)]
pub struct FrameMap {
    lock_slots: Vec<StackSlot>,
    frame_size: i32,
    outgoing_size: i32,
}

impl FrameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for the lock at nesting `depth` (0 is outermost, counted across
    /// inlined frames). Slots are allocated on first request.
    pub fn lock_slot(&mut self, depth: usize) -> StackSlot {
        while self.lock_slots.len() <= depth {
            let slot = StackSlot::new(Kind::Long, self.frame_size);
            self.frame_size += LOCK_SLOT_SIZE;
            self.lock_slots.push(slot);
        }
        self.lock_slots[depth]
    }

    /// Reserves room for `size` bytes of outgoing call arguments.
    pub fn reserve_outgoing(&mut self, size: i32) {
        self.outgoing_size = self.outgoing_size.max(size);
    }

    /// Lock slots plus the outgoing argument area.
    pub fn frame_size(&self) -> i32 {
        self.frame_size + self.outgoing_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_basic() {
        let mut vars = VariableAllocator::new();
        let a = vars.new_variable(Kind::Int);
        let b = vars.new_variable(Kind::Char);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(b.kind, Kind::Int);
        assert_eq!(vars.kind_of(1), Some(Kind::Int));
        assert_eq!(vars.count(), 2);
    }

    #[test]
    fn test_lock_slots_are_stable() {
        let mut frame = FrameMap::new();
        let second = frame.lock_slot(1);
        let first = frame.lock_slot(0);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, LOCK_SLOT_SIZE);
        assert_eq!(frame.lock_slot(1), second);
        assert_eq!(frame.frame_size(), 2 * LOCK_SLOT_SIZE);
        assert!(!first.in_caller_frame);
    }

    #[test]
    fn test_outgoing_area_keeps_largest_call() {
        let mut frame = FrameMap::new();
        frame.reserve_outgoing(16);
        frame.reserve_outgoing(8);
        assert_eq!(frame.frame_size(), 16);
    }
}
