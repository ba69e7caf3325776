//! Target description: calling convention, return registers and the
//! constant-inlining policy.

use strata_core::{Constant, Kind, Register, StackSlot, Value};

/// Bytes per stack argument slot.
const STACK_SLOT_SIZE: i32 = 8;

#[derive(Debug, Clone)]
pub struct TargetDescription {
    pub name: String,
    pub cpu_parameters: Vec<Register>,
    pub fpu_parameters: Vec<Register>,
    pub cpu_return: Register,
    pub fpu_return: Register,
    /// Accesses below this displacement fault on a null base and can double as
    /// a null check.
    pub implicit_null_check_limit: i32,
}

/// Locations of a call's arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallingConvention {
    pub arguments: Vec<Value>,
    /// Bytes of stack used by arguments that did not fit in registers.
    pub stack_size: i32,
}

impl TargetDescription {
    /// A 64-bit target with six integer and eight floating-point argument
    /// registers.
    pub fn amd64() -> Self {
        TargetDescription {
            name: "amd64".to_string(),
            // rsi, rdx, rcx, r8, r9, rdi
            cpu_parameters: [6, 2, 1, 8, 9, 7].into_iter().map(Register::cpu).collect(),
            fpu_parameters: (0..8).map(Register::fpu).collect(),
            cpu_return: Register::cpu(0),
            fpu_return: Register::fpu(0),
            implicit_null_check_limit: 4096,
        }
    }

    /// Assigns argument locations for `kinds`. Incoming arguments that spill
    /// live in the caller's frame; outgoing ones in the reserved area of ours.
    pub fn calling_convention(&self, kinds: &[Kind], incoming: bool) -> CallingConvention {
        let mut cpu = self.cpu_parameters.iter();
        let mut fpu = self.fpu_parameters.iter();
        let mut stack_size = 0;
        let arguments = kinds
            .iter()
            .map(|&kind| {
                let register = if kind.is_numeric_float() {
                    fpu.next()
                } else {
                    cpu.next()
                };
                match register {
                    Some(reg) => reg.as_value(kind.stack_kind()),
                    None => {
                        let offset = stack_size;
                        stack_size += STACK_SLOT_SIZE;
                        let slot = if incoming {
                            StackSlot::incoming(kind, offset)
                        } else {
                            StackSlot::new(kind, offset)
                        };
                        Value::StackSlot(slot)
                    }
                }
            })
            .collect();
        CallingConvention {
            arguments,
            stack_size,
        }
    }

    /// Where a value of `kind` is returned; `Illegal` for `void`.
    pub fn return_location(&self, kind: Kind) -> Value {
        match kind.stack_kind() {
            Kind::Void | Kind::Illegal => Value::Illegal,
            k if k.is_numeric_float() => self.fpu_return.as_value(k),
            k => self.cpu_return.as_value(k),
        }
    }

    /// Whether `constant` can be an immediate operand instead of being loaded
    /// into a register first.
    pub fn can_inline_constant(&self, constant: &Constant) -> bool {
        match constant {
            Constant::Long(v) => i32::try_from(*v).is_ok(),
            Constant::Float(_) | Constant::Double(_) | Constant::Object(_) => false,
            _ => true,
        }
    }

    pub fn is_implicit_null_check_offset(&self, displacement: i32) -> bool {
        (0..self.implicit_null_check_limit).contains(&displacement)
    }
}

impl Default for TargetDescription {
    fn default() -> Self {
        Self::amd64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_parameters_use_stack_kind() {
        let target = TargetDescription::amd64();
        let cc = target.calling_convention(&[Kind::Byte, Kind::Double], true);
        assert_eq!(cc.arguments[0].kind(), Kind::Int);
        assert!(cc.arguments[0].is_register());
        assert_eq!(cc.arguments[1], Register::fpu(0).as_value(Kind::Double));
        assert_eq!(cc.stack_size, 0);
    }

    #[test]
    fn test_spilled_parameters_keep_declared_kind() {
        let target = TargetDescription::amd64();
        let kinds = vec![Kind::Short; 8];
        let cc = target.calling_convention(&kinds, true);
        let spilled: Vec<StackSlot> = cc
            .arguments
            .iter()
            .filter_map(|v| v.as_stack_slot())
            .collect();
        assert_eq!(spilled.len(), 2);
        assert!(spilled.iter().all(|s| s.in_caller_frame && s.kind == Kind::Short));
        assert_eq!(spilled[1].offset, 8);
        assert_eq!(cc.stack_size, 16);
    }

    #[test]
    fn test_constant_inlining_policy() {
        let target = TargetDescription::amd64();
        assert!(target.can_inline_constant(&Constant::Int(7)));
        assert!(target.can_inline_constant(&Constant::Null));
        assert!(target.can_inline_constant(&Constant::Long(-5)));
        assert!(!target.can_inline_constant(&Constant::Long(1 << 40)));
        assert!(!target.can_inline_constant(&Constant::double(1.0)));
    }
}
