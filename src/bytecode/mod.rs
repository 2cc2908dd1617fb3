//! JVM bytecode: opcodes, decoding and assembly.
//!
//! # Key Components
//!
//! - [`Opcode`] - the complete single-byte opcode table
//! - [`Instruction`] / [`Operand`] / [`FlowType`] - decoded instructions with absolute
//!   branch targets
//! - [`decode_at`], [`decode_method`], [`BytecodeStream`] - decoding
//! - [`Assembler`] - label-resolving encoder used to build method bodies
//!
//! # Example
//!
//! ```rust
//! use stacklift::bytecode::{decode_method, Assembler, FlowType};
//!
//! let mut asm = Assembler::new();
//! asm.iload(0)?.iconst(1)?.iadd()?.ireturn()?;
//!
//! let instructions = decode_method(&asm.finish()?)?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[3].flow(), FlowType::Return);
//! # Ok::<(), stacklift::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod opcodes;

pub use decoder::{decode_at, decode_method, BytecodeStream};
pub use encoder::Assembler;
pub use instruction::{FlowType, Instruction, Operand};
pub use opcodes::Opcode;
