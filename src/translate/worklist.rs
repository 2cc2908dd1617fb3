//! Pending blocks ordered by reverse-postorder number.

use crate::{
    analysis::{BlockFlags, BlockGraph},
    Result,
};

/// Blocks waiting for translation.
///
/// Kept sorted by descending order number so the block with the smallest number sits at
/// the back and is popped first. Membership is mirrored in the blocks'
/// [`BlockFlags::ON_WORK_LIST`] bit, which keeps the list free of duplicates.
#[derive(Debug, Default)]
pub(crate) struct WorkList {
    pending: Vec<(u32, usize)>,
}

impl WorkList {
    /// Queues `block` unless it is already queued. Returns `true` if it was added.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if the block has no order number.
    pub(crate) fn push(&mut self, graph: &mut BlockGraph, block: usize) -> Result<bool> {
        let entry = graph.block_mut(block);
        if entry.flags.contains(BlockFlags::ON_WORK_LIST) {
            return Ok(false);
        }
        let rpo = entry
            .rpo
            .ok_or_else(|| invariant_error!("block {} has no order number", block))?;
        entry.flags.insert(BlockFlags::ON_WORK_LIST);

        let at = self.pending.partition_point(|&(other, _)| other > rpo);
        self.pending.insert(at, (rpo, block));
        Ok(true)
    }

    /// Removes and returns the queued block with the smallest order number.
    pub(crate) fn pop(&mut self, graph: &mut BlockGraph) -> Option<usize> {
        let (_, block) = self.pending.pop()?;
        graph.block_mut(block).flags.remove(BlockFlags::ON_WORK_LIST);
        Some(block)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Assembler, Opcode};

    #[test]
    fn pops_in_ascending_order_without_duplicates() -> Result<()> {
        let mut asm = Assembler::default();
        asm.iload(0)?;
        asm.lookupswitch("d", &[(1, "a"), (2, "b"), (3, "c")])?;
        asm.label("a")?;
        asm.return_void()?;
        asm.label("b")?;
        asm.return_void()?;
        asm.label("c")?;
        asm.return_void()?;
        asm.label("d")?;
        asm.iload(0)?;
        asm.branch(Opcode::Ifeq, "a")?;
        asm.return_void()?;
        let mut graph = BlockGraph::build(&asm.finish()?, None)?;

        let head = graph.block_at(0).unwrap_or_default();
        let succs = graph.block(head).successors.clone();
        let mut list = WorkList::default();
        for &s in succs.iter().rev() {
            assert!(list.push(&mut graph, s)?);
        }
        assert!(!list.push(&mut graph, succs[0])?);

        let mut last = None;
        let mut popped = Vec::new();
        while let Some(block) = list.pop(&mut graph) {
            let rpo = graph.block(block).rpo;
            assert!(rpo >= last);
            assert!(!graph.block(block).flags.contains(BlockFlags::ON_WORK_LIST));
            last = rpo;
            popped.push(block);
        }
        assert_eq!(popped.len(), 4);
        assert!(list.is_empty());
        Ok(())
    }
}
