//! # stacklift Prelude
//!
//! The types most programs need to describe a method, translate it and inspect the
//! result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

pub use crate::{Error, ErrorKind, Result};

// ================================================================================================
// Main Entry Points
// ================================================================================================

pub use crate::translate::{translate, translate_all, Translation, TranslatorOptions};

// ================================================================================================
// Method Description
// ================================================================================================

pub use crate::method::{
    BasicType, ConstantValue, FieldRef, MethodBody, MethodRef, MethodSource, ObjectHandle,
    Signature, ValueKind,
};

pub use crate::bytecode::{Assembler, Instruction, Opcode};

pub use crate::BitSet;

// ================================================================================================
// Results
// ================================================================================================

pub use crate::analysis::{BasicBlock, BlockGraph};

pub use crate::ir::{
    BlockId, CallKind, CallSiteInfo, CodeInfo, IrFunction, IrType, Op, Terminator, ValueId,
};
