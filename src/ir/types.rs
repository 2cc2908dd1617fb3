//! IR value types.

use strum::{Display, IntoStaticStr};

use crate::{
    method::{BasicType, ValueKind},
    Result,
};

/// The type of an IR value or memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum IrType {
    /// No value
    Void,
    /// Comparison result
    I1,
    /// Byte-sized memory access
    I8,
    /// Halfword memory access
    I16,
    /// `int`
    I32,
    /// `long`
    I64,
    /// `float`
    F32,
    /// `double`
    F64,
    /// Object reference or raw address
    Ptr,
}

impl IrType {
    /// Maps an operand-stack kind to the IR type its values carry.
    #[must_use]
    pub const fn from_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int => IrType::I32,
            ValueKind::Long => IrType::I64,
            ValueKind::Float => IrType::F32,
            ValueKind::Double => IrType::F64,
            ValueKind::Object => IrType::Ptr,
            ValueKind::Void => IrType::Void,
        }
    }

    /// The type used to access a field of declared type `ty` in memory.
    ///
    /// Sub-word integer fields are accessed with their natural width and widened or
    /// narrowed at the load or store.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Unsupported`] for types with no field layout.
    pub fn for_field(ty: BasicType) -> Result<Self> {
        Ok(match ty {
            BasicType::Boolean | BasicType::Byte => IrType::I8,
            BasicType::Char | BasicType::Short => IrType::I16,
            other => IrType::from_kind(other.kind()?),
        })
    }

    /// Returns `true` for types whose Java values occupy two slots.
    #[must_use]
    pub const fn is_double_word(self) -> bool {
        matches!(self, IrType::I64 | IrType::F64)
    }

    /// Returns `true` for the integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            IrType::I1 | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    /// Returns `true` for the floating-point types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }
}
