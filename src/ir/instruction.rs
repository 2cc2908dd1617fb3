//! IR instructions and terminators.

use strum::{Display, IntoStaticStr};

use crate::{
    ir::{BlockId, CallKind, IrType, ValueId},
    method::MethodRef,
};

/// Two-operand arithmetic and logic.
///
/// Integer operations wrap. `SDiv` and `SRem` do not check for a zero divisor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// One-operand arithmetic.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    FNeg,
}

/// Integer comparison predicates; all orderings are signed.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sge,
    Sgt,
    Sle,
}

/// Ordered floating-point comparison predicates; any NaN operand yields false.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum FloatPredicate {
    Oeq,
    Olt,
    Ogt,
}

/// Value conversions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    SExt,
    ZExt,
    Trunc,
    SiToFp,
    FpExt,
    FpTrunc,
}

/// Calls into the host runtime that are not Java methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    /// Cooperative pause point; emitted before every backward branch
    SafepointPoll,
    /// Subtype check against the class at a constant pool index; returns `int` 0 or 1
    InstanceOf {
        /// Constant pool index of the class operand
        class_index: u16,
    },
}

impl RuntimeCall {
    /// Symbol the code generator binds this call to.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            RuntimeCall::SafepointPoll => "stacklift.safepoint_poll",
            RuntimeCall::InstanceOf { .. } => "stacklift.instanceof",
        }
    }

    /// Result type of the call.
    #[must_use]
    pub const fn ret_type(self) -> IrType {
        match self {
            RuntimeCall::SafepointPoll => IrType::Void,
            RuntimeCall::InstanceOf { .. } => IrType::I32,
        }
    }
}

/// A non-terminating IR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Two-operand arithmetic
    Binary {
        /// Operation
        op: BinaryOp,
        /// Left operand
        lhs: ValueId,
        /// Right operand
        rhs: ValueId,
    },
    /// One-operand arithmetic
    Unary {
        /// Operation
        op: UnaryOp,
        /// Operand
        operand: ValueId,
    },
    /// Integer compare producing `i1`
    ICmp {
        /// Predicate
        pred: IntPredicate,
        /// Left operand
        lhs: ValueId,
        /// Right operand
        rhs: ValueId,
    },
    /// Floating-point compare producing `i1`
    FCmp {
        /// Predicate
        pred: FloatPredicate,
        /// Left operand
        lhs: ValueId,
        /// Right operand
        rhs: ValueId,
    },
    /// `cond ? then_value : else_value`
    Select {
        /// `i1` condition
        cond: ValueId,
        /// Value when true
        then_value: ValueId,
        /// Value when false
        else_value: ValueId,
    },
    /// Conversion to `to`
    Cast {
        /// Conversion
        op: CastOp,
        /// Converted value
        value: ValueId,
        /// Result type
        to: IrType,
    },
    /// `base + offset` in bytes
    FieldAddress {
        /// Object or mirror reference
        base: ValueId,
        /// Byte offset
        offset: i32,
    },
    /// Typed memory read
    Load {
        /// Access type
        ty: IrType,
        /// Address
        address: ValueId,
    },
    /// Typed memory write
    Store {
        /// Address
        address: ValueId,
        /// Stored value; its type is the access type
        value: ValueId,
    },
    /// Java method call
    Call {
        /// Callee
        target: MethodRef,
        /// Direct or dynamically dispatched
        kind: CallKind,
        /// Arguments, receiver first
        args: Vec<ValueId>,
        /// Result type, [`IrType::Void`] for no result
        ret: IrType,
        /// Key into [`crate::ir::CodeInfo::call_sites`]
        call_id: u32,
        /// Bytes the code generator reserves for patching this call site
        patch_bytes: u32,
    },
    /// Host runtime call
    Runtime {
        /// Which runtime entry
        call: RuntimeCall,
        /// Arguments
        args: Vec<ValueId>,
    },
}

/// An instruction and its result, if it produces one.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    /// Result value, `None` for stores and void calls
    pub result: Option<ValueId>,
    /// The operation
    pub op: Op,
}

/// The single control transfer that ends every block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional branch
    Br(BlockId),
    /// Two-way branch on an `i1`
    CondBr {
        /// Condition
        cond: ValueId,
        /// Taken when true
        then_block: BlockId,
        /// Taken when false
        else_block: BlockId,
    },
    /// Multi-way branch on an `i32`
    Switch {
        /// Scrutinee
        value: ValueId,
        /// Taken when no case matches
        default: BlockId,
        /// Keys and targets
        cases: Vec<(i32, BlockId)>,
    },
    /// Return, with a value unless the function returns void
    Ret(Option<ValueId>),
}

impl Terminator {
    /// Successor edges in operand order; a target reached through several edges appears
    /// once per edge.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { default, cases, .. } => cases
                .iter()
                .map(|&(_, target)| target)
                .chain(std::iter::once(*default))
                .collect(),
            Terminator::Ret(_) => Vec::new(),
        }
    }
}
