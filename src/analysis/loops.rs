//! Loop header detection and reverse-postorder numbering.
//!
//! A single depth-first traversal from the block at offset 0 does both jobs. Each block
//! carries transient *visited* and *active* bits; a successor that is visited and still
//! active sits on the current DFS path, so the edge to it is a back-edge and the successor
//! is a loop header. Blocks are numbered on exit, counting down from `count - 1`, which
//! yields a reverse postorder.
//!
//! For irreducible control flow the set of blocks classified as loop headers depends on
//! the order successors are visited in. This order is the successor list order of the
//! block graph.

use crate::{
    analysis::{BlockFlags, BlockGraph},
    utils::BitSet,
};

/// Flags loop headers and assigns reverse-postorder numbers in `graph`.
///
/// Previous numbering and loop-header flags are discarded. Blocks that cannot be reached
/// from offset 0 end up with no number.
///
/// The traversal keeps an explicit stack of `(block, next successor)` frames, which
/// visits and numbers blocks in exactly the order a recursive traversal would.
pub fn mark_loops(graph: &mut BlockGraph) {
    let count = graph.len();
    for id in 0..count {
        let block = graph.block_mut(id);
        block.rpo = None;
        block.flags.remove(BlockFlags::LOOP_HEADER);
    }

    let Some(root) = graph.block_at(0) else {
        return;
    };

    let mut visited = BitSet::new(count);
    let mut active = BitSet::new(count);
    // The pseudo entry block is never numbered.
    let mut next_order = u32::try_from(count.saturating_sub(2)).unwrap_or(u32::MAX);

    let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
    visited.insert(root);
    active.insert(root);

    while let Some(frame) = stack.last_mut() {
        let (id, next) = *frame;
        if let Some(&succ) = graph.block(id).successors.get(next) {
            frame.1 += 1;
            if visited.contains(succ) {
                if active.contains(succ) {
                    graph.block_mut(succ).flags.insert(BlockFlags::LOOP_HEADER);
                }
                continue;
            }
            visited.insert(succ);
            active.insert(succ);
            stack.push((succ, 0));
        } else {
            stack.pop();
            active.remove(id);
            graph.block_mut(id).rpo = Some(next_order);
            next_order = next_order.saturating_sub(1);
        }
    }
}
