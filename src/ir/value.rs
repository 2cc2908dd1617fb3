//! Value and block handles.

use crate::ir::IrType;

/// Handle to an SSA value inside one [`crate::ir::IrFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Position of the value in its function's value table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Handle to a basic block inside one [`crate::ir::IrFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Position of the block in its function's block table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    /// Integer of any integer type, sign-extended into 64 bits
    Int(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// The null reference
    Null,
    /// An unspecified value of the value's type
    Undef,
}

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDef {
    /// Function parameter at this position
    Param(u16),
    /// Constant
    Constant(Constant),
    /// Named global holding a host object handle
    Global(String),
    /// Phi node in this block
    Phi(BlockId),
    /// Result of the instruction at `index` in `block`
    Inst {
        /// Defining block
        block: BlockId,
        /// Position of the instruction in the block
        index: usize,
    },
}

/// Type and definition of one value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueData {
    /// The value's type
    pub ty: IrType,
    /// Where it is defined
    pub def: ValueDef,
}
