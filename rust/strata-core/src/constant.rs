//! Compile-time constants.

use crate::kind::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant value. Floating-point payloads are stored as raw bits so that
/// constants can key hash maps (`NaN` payloads and signed zeros stay distinct).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Constant {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    /// Opaque handle of a heap object known at compile time.
    Object(u64),
}

impl Constant {
    pub fn float(value: f32) -> Self {
        Constant::Float(value.to_bits())
    }

    pub fn double(value: f64) -> Self {
        Constant::Double(value.to_bits())
    }

    pub fn kind(&self) -> Kind {
        match self {
            Constant::Null | Constant::Object(_) => Kind::Object,
            Constant::Boolean(_) => Kind::Boolean,
            Constant::Byte(_) => Kind::Byte,
            Constant::Short(_) => Kind::Short,
            Constant::Char(_) => Kind::Char,
            Constant::Int(_) => Kind::Int,
            Constant::Long(_) => Kind::Long,
            Constant::Float(_) => Kind::Float,
            Constant::Double(_) => Kind::Double,
        }
    }

    /// The integral value of this constant, if it has one.
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Constant::Boolean(b) => Some(b as i64),
            Constant::Byte(v) => Some(v as i64),
            Constant::Short(v) => Some(v as i64),
            Constant::Char(v) => Some(v as i64),
            Constant::Int(v) => Some(v as i64),
            Constant::Long(v) => Some(v),
            _ => None,
        }
    }

    /// The value as an `i32`, if it is integral and in range.
    pub fn as_int(&self) -> Option<i32> {
        self.as_long().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match *self {
            Constant::Boolean(b) => Some(b),
            _ => self.as_long().map(|v| v != 0),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Constant::Null)
    }

    /// Whether every bit of the value is zero.
    pub fn is_default(&self) -> bool {
        match *self {
            Constant::Null => true,
            Constant::Float(bits) => bits == 0,
            Constant::Double(bits) => bits == 0,
            Constant::Object(_) => false,
            _ => self.as_long() == Some(0),
        }
    }

    /// The zero value of `kind`, or `None` for kinds without values.
    pub fn default_for_kind(kind: Kind) -> Option<Constant> {
        Some(match kind {
            Kind::Boolean => Constant::Boolean(false),
            Kind::Byte => Constant::Byte(0),
            Kind::Short => Constant::Short(0),
            Kind::Char => Constant::Char(0),
            Kind::Int => Constant::Int(0),
            Kind::Long => Constant::Long(0),
            Kind::Float => Constant::Float(0),
            Kind::Double => Constant::Double(0),
            Kind::Object => Constant::Null,
            Kind::Void | Kind::Illegal => return None,
        })
    }

    /// Integer constant of `kind` holding `value` truncated to the kind's width.
    pub fn for_integer_kind(kind: Kind, value: i64) -> Option<Constant> {
        Some(match kind {
            Kind::Boolean => Constant::Boolean(value != 0),
            Kind::Byte => Constant::Byte(value as i8),
            Kind::Short => Constant::Short(value as i16),
            Kind::Char => Constant::Char(value as u16),
            Kind::Int => Constant::Int(value as i32),
            Kind::Long => Constant::Long(value),
            _ => return None,
        })
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Boolean(b) => write!(f, "{}", b),
            Constant::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Constant::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Constant::Object(handle) => write!(f, "object@{:#x}", handle),
            Constant::Long(v) => write!(f, "{}L", v),
            other => match other.as_long() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "?"),
            },
        }
    }
}
