// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # stacklift
//!
//! Translates JVM stack bytecode method bodies into a typed SSA control-flow graph, the
//! front end of a method-at-a-time JIT.
//!
//! The translator abstractly interprets each basic block over an operand stack and a
//! locals array whose slots hold SSA values. Where control flow joins, slot values are
//! merged into phis. Loop headers keep their entry state so back-edges can be wired in
//! after the loop body is translated.
//!
//! ## Features
//!
//! - **Block graph** - basic blocks from branch targets or host-supplied starts, with loop
//!   headers and a reverse-postorder numbering
//! - **Abstract interpretation** - typed operand stack with two-slot `long`/`double`
//! - **Phi construction** - four income rules, including late back-edge wiring
//! - **Side tables** - a call-site table for the code generator and memoized class mirror
//!   handles for static field access
//! - **Self-checks** - optional stack depth verification and an IR verifier
//!
//! ## Quick Start
//!
//! ```rust
//! use stacklift::prelude::*;
//!
//! // static int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }
//! let mut asm = Assembler::new();
//! asm.iconst(0)?.istore(1)?.iconst(0)?.istore(2)?;
//! asm.label("head")?.iload(2)?.iload(0)?.branch(Opcode::IfIcmpge, "done")?;
//! asm.iload(1)?.iload(2)?.iadd()?.istore(1)?.iinc(2, 1)?.goto("head")?;
//! asm.label("done")?.iload(1)?.ireturn()?;
//!
//! let method = MethodBody::new("Demo", "sum", "(I)I")?
//!     .with_static(true)
//!     .with_code(asm.finish()?)
//!     .with_max_stack(2)
//!     .with_max_locals(3);
//!
//! let translation = translate(&method, &TranslatorOptions::strict())?;
//! assert!(translation.graph.blocks().iter().any(|b| b.is_loop_header()));
//! assert!(translation.function.phi_count() >= 2);
//! # Ok::<(), stacklift::Error>(())
//! ```
//!
//! ## Scope
//!
//! Methods with exception handlers, arrays, object allocation, monitors, `athrow` or
//! subroutines are rejected with [`Error::Unsupported`]. Each method is translated on its
//! own; [`translate_all`] fans a batch out over a thread pool.

#[macro_use]
pub(crate) mod error;

/// Bytecode opcodes, decoding and a small label-resolving assembler
///
/// # Key Types
///
/// - [`bytecode::Opcode`] - the opcode table with stack and flow properties
/// - [`bytecode::Instruction`] - a decoded instruction with resolved branch targets
/// - [`bytecode::Assembler`] - builds code arrays for tests and tooling
pub mod bytecode;

/// The host interface for method metadata and the constant pool
///
/// Implement [`method::MethodSource`] to hand methods to the translator, or use the
/// in-memory [`method::MethodBody`].
pub mod method;

/// The SSA intermediate representation produced by the translator
pub mod ir;

/// Bytecode analyses: block graph, loops, liveness and stack depths
pub mod analysis;

/// The translation driver
pub mod translate;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use stacklift::prelude::*;
///
/// let options = TranslatorOptions::default();
/// assert!(options.use_liveness);
/// ```
pub mod prelude;

pub(crate) mod utils;

/// `stacklift` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use error::{Error, ErrorKind};
pub use translate::{translate, translate_all, Translation, TranslatorOptions};
pub use utils::BitSet;
