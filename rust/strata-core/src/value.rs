//! LIR operands.
//!
//! Every operand of a LIR instruction is a [`Value`]: a virtual register
//! ([`Variable`]), a fixed machine register, a stack slot, an embedded constant,
//! or the `Illegal` sentinel for "no value".

use crate::constant::Constant;
use crate::kind::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterCategory {
    Cpu,
    Fpu,
}

/// A machine register, identified by its number within its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub number: u16,
    pub category: RegisterCategory,
}

impl Register {
    pub const fn cpu(number: u16) -> Self {
        Register {
            number,
            category: RegisterCategory::Cpu,
        }
    }

    pub const fn fpu(number: u16) -> Self {
        Register {
            number,
            category: RegisterCategory::Fpu,
        }
    }

    pub fn as_value(self, kind: Kind) -> Value {
        Value::Register(RegisterValue {
            register: self,
            kind,
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            RegisterCategory::Cpu => write!(f, "r{}", self.number),
            RegisterCategory::Fpu => write!(f, "xmm{}", self.number),
        }
    }
}

/// A virtual register. Variables are numbered densely per compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub index: u32,
    pub kind: Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterValue {
    pub register: Register,
    pub kind: Kind,
}

/// A slot in the current frame, or in the caller's frame for incoming stack
/// arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackSlot {
    pub kind: Kind,
    pub offset: i32,
    pub in_caller_frame: bool,
}

impl StackSlot {
    pub fn new(kind: Kind, offset: i32) -> Self {
        StackSlot {
            kind,
            offset,
            in_caller_frame: false,
        }
    }

    pub fn incoming(kind: Kind, offset: i32) -> Self {
        StackSlot {
            kind,
            offset,
            in_caller_frame: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "operand", rename_all = "lowercase")]
pub enum Value {
    Illegal,
    Variable(Variable),
    Register(RegisterValue),
    StackSlot(StackSlot),
    Constant(Constant),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Illegal => Kind::Illegal,
            Value::Variable(v) => v.kind,
            Value::Register(r) => r.kind,
            Value::StackSlot(s) => s.kind,
            Value::Constant(c) => c.kind(),
        }
    }

    pub fn is_legal(&self) -> bool {
        !matches!(self, Value::Illegal)
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Value::Variable(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Value::Register(_))
    }

    pub fn is_stack_slot(&self) -> bool {
        matches!(self, Value::StackSlot(_))
    }

    pub fn as_variable(&self) -> Option<Variable> {
        match self {
            Value::Variable(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<Constant> {
        match self {
            Value::Constant(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_stack_slot(&self) -> Option<StackSlot> {
        match self {
            Value::StackSlot(s) => Some(*s),
            _ => None,
        }
    }

    /// The same location described with the stack kind of its current kind.
    /// Constants keep their exact kind since the kind is part of their identity.
    pub fn to_stack_kind(self) -> Value {
        match self {
            Value::Variable(v) => Value::Variable(Variable {
                kind: v.kind.stack_kind(),
                ..v
            }),
            Value::Register(r) => Value::Register(RegisterValue {
                kind: r.kind.stack_kind(),
                ..r
            }),
            Value::StackSlot(s) => Value::StackSlot(StackSlot {
                kind: s.kind.stack_kind(),
                ..s
            }),
            other => other,
        }
    }
}

impl From<Variable> for Value {
    fn from(v: Variable) -> Self {
        Value::Variable(v)
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        Value::Constant(c)
    }
}

impl From<StackSlot> for Value {
    fn from(s: StackSlot) -> Self {
        Value::StackSlot(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Illegal => write!(f, "-"),
            Value::Variable(v) => write!(f, "v{}|{}", v.index, v.kind.type_char()),
            Value::Register(r) => write!(f, "{}|{}", r.register, r.kind.type_char()),
            Value::StackSlot(s) if s.in_caller_frame => {
                write!(f, "in:{}|{}", s.offset, s.kind.type_char())
            }
            Value::StackSlot(s) => write!(f, "stack:{}|{}", s.offset, s.kind.type_char()),
            Value::Constant(c) => write!(f, "{}", c),
        }
    }
}
