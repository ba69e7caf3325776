//! Value kinds.
//!
//! A [`Kind`] is the storage class of a value, not its source-level type. Sub-word
//! integer kinds exist so that parameters, fields and array components keep their
//! declared width; everything that lives in a register or an operand stack slot is
//! described by its *stack kind*.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
    Void,
    Illegal,
}

impl Kind {
    /// The kind a value of this kind occupies on the operand stack. Sub-word
    /// integers widen to `Int`; everything else is unchanged.
    pub fn stack_kind(self) -> Kind {
        match self {
            Kind::Boolean | Kind::Byte | Kind::Short | Kind::Char => Kind::Int,
            other => other,
        }
    }

    /// Whether a value of this kind takes two local/stack slots.
    pub fn needs_two_slots(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, Kind::Object | Kind::Void | Kind::Illegal)
    }

    pub fn is_numeric_integer(self) -> bool {
        matches!(
            self,
            Kind::Byte | Kind::Short | Kind::Char | Kind::Int | Kind::Long
        )
    }

    pub fn is_numeric_float(self) -> bool {
        matches!(self, Kind::Float | Kind::Double)
    }

    pub fn is_object(self) -> bool {
        self == Kind::Object
    }

    /// Whether this kind can hold a value at all.
    pub fn is_value(self) -> bool {
        !matches!(self, Kind::Void | Kind::Illegal)
    }

    /// Width in bits; 0 for kinds that carry no value.
    pub fn bit_count(self) -> u32 {
        match self {
            Kind::Boolean => 1,
            Kind::Byte => 8,
            Kind::Short | Kind::Char => 16,
            Kind::Int | Kind::Float => 32,
            Kind::Long | Kind::Double | Kind::Object => 64,
            Kind::Void | Kind::Illegal => 0,
        }
    }

    /// Single-character mnemonic used in LIR dumps.
    pub fn type_char(self) -> char {
        match self {
            Kind::Boolean => 'z',
            Kind::Byte => 'b',
            Kind::Short => 's',
            Kind::Char => 'c',
            Kind::Int => 'i',
            Kind::Long => 'j',
            Kind::Float => 'f',
            Kind::Double => 'd',
            Kind::Object => 'a',
            Kind::Void => 'v',
            Kind::Illegal => '-',
        }
    }
}
