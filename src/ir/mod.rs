//! The SSA intermediate representation produced by translation.
//!
//! # Key Components
//!
//! - [`IrFunction`] - arena of values and blocks with phi construction and a verifier
//! - [`Op`], [`Inst`], [`Terminator`] - instructions
//! - [`IrType`] - value types
//! - [`CodeInfo`] - call-site and object-handle side tables for the code generator

mod code;
mod function;
mod instruction;
mod types;
mod value;

pub use code::{CallKind, CallSiteInfo, CodeInfo};
pub use function::{IrBlock, IrFunction, Phi};
pub use instruction::{
    BinaryOp, CastOp, FloatPredicate, Inst, IntPredicate, Op, RuntimeCall, Terminator, UnaryOp,
};
pub use types::IrType;
pub use value::{BlockId, Constant, ValueData, ValueDef, ValueId};
