//! Basic block partitioning and the block graph.
//!
//! The builder scans the decoded instruction stream once with a cursor that starts at the
//! pseudo entry block. Each block-start offset moves the cursor to the block at that
//! offset, linking it from the previous cursor when control can fall through. Control
//! transfers link every successor and close the cursor.
//!
//! Edges are kept with multiplicity: a switch with two cases jumping to the same target
//! produces two edges, and the translator later adds one phi incoming per edge.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;

use crate::{
    analysis::mark_loops,
    bytecode::{decode_method, FlowType, Instruction},
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    /// Per-block state bits
    pub struct BlockFlags: u8 {
        /// The block's instructions have been translated
        const COMPILED = 0x01;
        /// The block is queued on the translator's work list
        const ON_WORK_LIST = 0x02;
        /// The block is the target of a back-edge
        const LOOP_HEADER = 0x04;
    }
}

/// A basic block of bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Index of the block in [`BlockGraph::blocks`]
    pub id: usize,
    /// Offset of the first instruction, `None` for the pseudo entry block
    pub start_bci: Option<u32>,
    /// Offset one past the last instruction (the next block start or the code end)
    pub end_bci: u32,
    /// State bits
    pub flags: BlockFlags,
    /// Predecessor edges, one entry per edge
    pub predecessors: Vec<usize>,
    /// Successor edges in branch operand order, one entry per edge
    pub successors: Vec<usize>,
    /// Reverse-postorder number, `None` if unreachable from offset 0
    pub rpo: Option<u32>,
}

impl BasicBlock {
    fn new(id: usize, start_bci: Option<u32>) -> Self {
        Self {
            id,
            start_bci,
            end_bci: start_bci.unwrap_or(0),
            flags: BlockFlags::empty(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            rpo: None,
        }
    }

    /// Returns `true` if the block was reached through a back-edge during loop marking.
    #[must_use]
    pub fn is_loop_header(&self) -> bool {
        self.flags.contains(BlockFlags::LOOP_HEADER)
    }

    /// Returns `true` once the block has been translated.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.flags.contains(BlockFlags::COMPILED)
    }
}

/// The basic blocks of one method and the edges between them.
///
/// Block 0 is always the pseudo entry block. It has no instructions and a single edge to
/// the block at offset 0.
///
/// # Examples
///
/// ```rust
/// use stacklift::analysis::BlockGraph;
/// use stacklift::bytecode::Assembler;
///
/// let mut asm = Assembler::default();
/// asm.label("top")?;
/// asm.iinc(0, 1)?;
/// asm.goto("top")?;
/// let graph = BlockGraph::build(&asm.finish()?, None)?;
///
/// let top = graph.block_at(0).unwrap();
/// assert!(graph.block(top).is_loop_header());
/// assert_eq!(graph.block(top).predecessors, vec![BlockGraph::ENTRY, top]);
/// # Ok::<(), stacklift::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BlockGraph {
    blocks: Vec<BasicBlock>,
    by_bci: BTreeMap<u32, usize>,
    code_len: u32,
}

impl BlockGraph {
    /// Index of the pseudo entry block.
    pub const ENTRY: usize = 0;

    /// Decodes `code` and builds its block graph with loop headers and order numbers.
    ///
    /// `starts` lists the block-start offsets; when `None` they are derived with
    /// [`find_block_starts`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the code does not decode or control can
    /// reach an instruction that does not belong to any block.
    pub fn build(code: &[u8], starts: Option<Vec<u32>>) -> Result<Self> {
        let instructions = decode_method(code)?;
        let starts = match starts {
            Some(list) => list.into_iter().collect(),
            None => find_block_starts(&instructions),
        };
        Self::from_instructions(&instructions, &starts)
    }

    /// Builds the graph over already decoded instructions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if an instruction is reached with no open
    /// block, which happens when `starts` misses the offset after a control transfer, or
    /// if a block start or branch target is not the offset of a decoded instruction.
    pub fn from_instructions(instructions: &[Instruction], starts: &BTreeSet<u32>) -> Result<Self> {
        let code_len = instructions.last().map_or(0, Instruction::next_bci);
        for &bci in starts {
            if !is_boundary(instructions, bci) {
                return Err(malformed_error!(
                    "block start {} is not an instruction boundary",
                    bci
                ));
            }
        }
        let mut graph = BlockGraph {
            blocks: vec![BasicBlock::new(Self::ENTRY, None)],
            by_bci: BTreeMap::new(),
            code_len,
        };

        let mut current = Some(Self::ENTRY);
        for inst in instructions {
            if starts.contains(&inst.bci) {
                current = Some(graph.make_block_at(inst.bci, current));
            }
            let Some(block) = current else {
                return Err(malformed_error!(
                    "instruction at bci {} does not belong to any block",
                    inst.bci
                ));
            };

            match inst.flow() {
                FlowType::Return | FlowType::Throw => current = None,
                FlowType::Subroutine if inst.opcode == crate::bytecode::Opcode::Ret => {
                    current = None;
                }
                FlowType::ConditionalBranch => {
                    check_targets(instructions, inst)?;
                    if inst.next_bci() < code_len {
                        graph.make_block_at(inst.next_bci(), Some(block));
                    }
                    for target in inst.branch_targets() {
                        graph.make_block_at(target, Some(block));
                    }
                    current = None;
                }
                FlowType::UnconditionalBranch | FlowType::Switch => {
                    check_targets(instructions, inst)?;
                    for target in inst.branch_targets() {
                        graph.make_block_at(target, Some(block));
                    }
                    current = None;
                }
                FlowType::Sequential | FlowType::Subroutine => {}
            }
        }

        graph.assign_ranges();
        mark_loops(&mut graph);
        Ok(graph)
    }

    /// Looks up or creates the block starting at `bci` and links it from `from`.
    fn make_block_at(&mut self, bci: u32, from: Option<usize>) -> usize {
        let id = match self.by_bci.get(&bci) {
            Some(&id) => id,
            None => {
                let id = self.blocks.len();
                self.blocks.push(BasicBlock::new(id, Some(bci)));
                self.by_bci.insert(bci, id);
                id
            }
        };
        if let Some(from) = from {
            self.blocks[from].successors.push(id);
            self.blocks[id].predecessors.push(from);
        }
        id
    }

    fn assign_ranges(&mut self) {
        let starts: Vec<(u32, usize)> = self.by_bci.iter().map(|(&b, &id)| (b, id)).collect();
        for (i, &(_, id)) in starts.iter().enumerate() {
            let end = starts.get(i + 1).map_or(self.code_len, |&(next, _)| next);
            self.blocks[id].end_bci = end.max(self.blocks[id].end_bci);
        }
    }

    /// All blocks, indexed by id.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// The block with index `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    #[must_use]
    pub fn block(&self, id: usize) -> &BasicBlock {
        &self.blocks[id]
    }

    pub(crate) fn block_mut(&mut self, id: usize) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// The block starting exactly at `bci`.
    #[must_use]
    pub fn block_at(&self, bci: u32) -> Option<usize> {
        self.by_bci.get(&bci).copied()
    }

    /// Returns `true` if a block starts at `bci`.
    #[must_use]
    pub fn is_block_start(&self, bci: u32) -> bool {
        self.by_bci.contains_key(&bci)
    }

    /// Number of blocks, including the pseudo entry block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`; the entry block exists even for empty code.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Length of the code the graph was built from.
    #[must_use]
    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    /// Block-start offsets in ascending order with their block ids.
    pub fn starts(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.by_bci.iter().map(|(&bci, &id)| (bci, id))
    }

    /// Reachable blocks in ascending reverse-postorder.
    #[must_use]
    pub fn rpo_order(&self) -> Vec<usize> {
        let mut order: Vec<(u32, usize)> = self
            .blocks
            .iter()
            .filter_map(|b| b.rpo.map(|rpo| (rpo, b.id)))
            .collect();
        order.sort_unstable();
        order.into_iter().map(|(_, id)| id).collect()
    }

    /// The slice of `instructions` that belongs to `block`.
    ///
    /// `instructions` must be the sorted stream the graph was built from.
    #[must_use]
    pub fn instructions_of<'a>(&self, block: usize, instructions: &'a [Instruction]) -> &'a [Instruction] {
        let b = &self.blocks[block];
        let Some(start) = b.start_bci else {
            return &[];
        };
        let lo = instructions.partition_point(|i| i.bci < start);
        let hi = instructions.partition_point(|i| i.bci < b.end_bci);
        &instructions[lo..hi.max(lo)]
    }
}

fn is_boundary(instructions: &[Instruction], bci: u32) -> bool {
    instructions.binary_search_by_key(&bci, |i| i.bci).is_ok()
}

fn check_targets(instructions: &[Instruction], inst: &Instruction) -> Result<()> {
    for target in inst.branch_targets() {
        if !is_boundary(instructions, target) {
            return Err(malformed_error!(
                "branch at bci {} targets {}, which is not an instruction boundary",
                inst.bci,
                target
            ));
        }
    }
    Ok(())
}

/// Derives block-start offsets from the instruction stream.
///
/// Offset 0, every branch and switch target, and the offset after every control transfer
/// start a block. `jsr` targets are included so subroutine bodies get their own blocks.
#[must_use]
pub fn find_block_starts(instructions: &[Instruction]) -> BTreeSet<u32> {
    let mut starts = BTreeSet::new();
    let Some(last) = instructions.last() else {
        return starts;
    };
    let end = last.next_bci();
    starts.insert(0);
    for inst in instructions {
        starts.extend(inst.branch_targets());
        if inst.ends_block() && inst.next_bci() < end {
            starts.insert(inst.next_bci());
        }
    }
    starts
}
