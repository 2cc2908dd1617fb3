//! Control-flow and data-flow analyses over bytecode.
//!
//! # Key Components
//!
//! - [`BlockGraph`] - basic blocks, edges and per-block flags
//! - [`mark_loops`] - loop header detection and reverse-postorder numbering
//! - [`Liveness`] - live local slots at block starts
//! - [`compute_stack_depths`] - reference operand-stack depth on block entry
//!
//! [`BlockGraph::build`] runs the loop marker itself, so a freshly built graph already
//! carries loop headers and order numbers.

mod blocks;
mod liveness;
mod loops;
mod stack_depth;

pub use blocks::{find_block_starts, BasicBlock, BlockFlags, BlockGraph};
pub use liveness::Liveness;
pub use loops::mark_loops;
pub use stack_depth::{compute_stack_depths, stack_effect};
