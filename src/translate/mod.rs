//! Bytecode to SSA translation.
//!
//! [`translate`] turns one method into an [`IrFunction`] plus its [`CodeInfo`] side
//! tables. The steps are:
//!
//! 1. decode the code array and split it into basic blocks
//! 2. mark loop headers and number blocks in reverse postorder
//! 3. optionally compute liveness and reference stack depths
//! 4. walk the blocks through a work list ordered by reverse postorder, lowering each
//!    instruction against an abstract operand stack and locals array
//!
//! Control-flow joins become phis as described in the driver module. Any failure rejects
//! the whole method; no partial function is returned.
//!
//! # Examples
//!
//! ```rust
//! use stacklift::{bytecode::Assembler, method::MethodBody, translate, TranslatorOptions};
//!
//! let mut asm = Assembler::new();
//! asm.iload(0)?.iconst(1)?.iadd()?.ireturn()?;
//! let method = MethodBody::new("Demo", "inc", "(I)I")?
//!     .with_static(true)
//!     .with_code(asm.finish()?)
//!     .with_max_stack(2);
//!
//! let translation = translate(&method, &TranslatorOptions::default())?;
//! assert_eq!(translation.function.block_count(), 1);
//! assert_eq!(translation.function.phi_count(), 0);
//! # Ok::<(), stacklift::Error>(())
//! ```

mod ops;
mod options;
mod state;
mod translator;
mod worklist;

pub use options::{TranslatorOptions, DIRECT_CALL_PATCH_BYTES, DYNAMIC_CALL_PATCH_BYTES};
pub use state::AbstractState;

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, debug_span};

use crate::{
    analysis::{find_block_starts, BlockGraph},
    bytecode::decode_method,
    ir::{BlockId, CodeInfo, IrFunction},
    method::MethodSource,
    Result,
};

use translator::Translator;

/// The result of translating one method.
#[derive(Debug)]
pub struct Translation {
    /// The SSA function
    pub function: IrFunction,
    /// Call sites and static holder handles referenced by `function`
    pub code: CodeInfo,
    /// The bytecode block graph, with loop headers and reverse postorder filled in
    pub graph: BlockGraph,
    /// IR block of every bytecode block, indexed by block id; the entry block has none
    /// unless it shares block 0's IR block
    pub block_map: Vec<Option<BlockId>>,
    /// Block ids in the order they were translated
    pub order: Vec<usize>,
    /// Operand stack depth on entry to each translated block, keyed by start offset
    pub entry_depths: BTreeMap<u32, usize>,
}

impl Translation {
    /// IR block of the bytecode block starting at `bci`.
    #[must_use]
    pub fn ir_block_at(&self, bci: u32) -> Option<BlockId> {
        let block = self.graph.block_at(bci)?;
        self.block_map.get(block).copied().flatten()
    }

    /// Start offsets of the blocks in translation order.
    #[must_use]
    pub fn translated_offsets(&self) -> Vec<u32> {
        self.order
            .iter()
            .filter_map(|&id| self.graph.block(id).start_bci)
            .collect()
    }
}

/// Translates a single method.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] for constructs that are not lowered,
/// [`crate::Error::Malformed`] or [`crate::Error::MergeFailure`] for bytecode that cannot
/// be translated, and [`crate::Error::InvariantViolation`] when a self-check fails.
pub fn translate<M: MethodSource + ?Sized>(
    method: &M,
    options: &TranslatorOptions,
) -> Result<Translation> {
    let _span = debug_span!("translate", holder = method.holder(), method = method.name()).entered();

    let instructions = decode_method(method.code())?;
    let starts = match method.block_starts() {
        Some(list) => list.into_iter().collect(),
        None => find_block_starts(&instructions),
    };
    let graph = BlockGraph::from_instructions(&instructions, &starts)?;
    debug!(
        blocks = graph.len(),
        instructions = instructions.len(),
        "built block graph"
    );

    let output = Translator::new(method, options, &instructions, graph)?.run()?;
    Ok(Translation {
        function: output.function,
        code: output.code,
        graph: output.graph,
        block_map: output.block_map,
        order: output.order,
        entry_depths: output.entry_depths,
    })
}

/// Translates a batch of independent methods in parallel.
///
/// Results are returned in input order. A failure only affects its own method.
pub fn translate_all<M: MethodSource + Sync>(
    methods: &[M],
    options: &TranslatorOptions,
) -> Vec<Result<Translation>> {
    methods
        .par_iter()
        .map(|method| translate(method, options))
        .collect()
}
