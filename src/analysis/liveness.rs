//! Liveness of local variable slots.
//!
//! A backward data-flow analysis over the block graph:
//!
//! - `USE[B]` = slots read in B before any write
//! - `DEF[B]` = slots written in B
//! - `OUT[B]` = ∪{IN[S] | S is a successor of B}
//! - `IN[B]` = USE[B] ∪ (OUT[B] - DEF[B])
//!
//! A two-slot load reads both of its slots and a two-slot store writes both. The result
//! is reported at block-start offsets, which is where the translator asks for it.

use std::collections::BTreeMap;

use crate::{
    analysis::BlockGraph,
    bytecode::{Instruction, Opcode},
    utils::BitSet,
};

/// How an instruction touches a local slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalAccess {
    /// Reads `slots` consecutive locals starting at `index`
    Read { index: usize, slots: usize },
    /// Writes `slots` consecutive locals starting at `index`
    Write { index: usize, slots: usize },
    /// Reads then writes one local (`iinc`)
    Update { index: usize },
}

impl LocalAccess {
    /// Classifies the local variable access of `inst`, if any.
    fn of(inst: &Instruction) -> Option<Self> {
        use Opcode::*;
        let index = usize::from(inst.local_index()?);
        Some(match inst.opcode {
            Iload | Fload | Aload | Iload0 | Iload1 | Iload2 | Iload3 | Fload0 | Fload1
            | Fload2 | Fload3 | Aload0 | Aload1 | Aload2 | Aload3 | Ret => {
                LocalAccess::Read { index, slots: 1 }
            }
            Lload | Dload | Lload0 | Lload1 | Lload2 | Lload3 | Dload0 | Dload1 | Dload2
            | Dload3 => LocalAccess::Read { index, slots: 2 },
            Istore | Fstore | Astore | Istore0 | Istore1 | Istore2 | Istore3 | Fstore0
            | Fstore1 | Fstore2 | Fstore3 | Astore0 | Astore1 | Astore2 | Astore3 => {
                LocalAccess::Write { index, slots: 1 }
            }
            Lstore | Dstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 | Dstore0 | Dstore1
            | Dstore2 | Dstore3 => LocalAccess::Write { index, slots: 2 },
            Iinc => LocalAccess::Update { index },
            _ => return None,
        })
    }
}

/// Live-in sets of local slots at every block start.
#[derive(Debug, Clone, PartialEq)]
pub struct Liveness {
    live_in: BTreeMap<u32, BitSet>,
}

impl Liveness {
    /// Computes liveness for the blocks of `graph`.
    ///
    /// `instructions` is the decoded stream the graph was built from. Slots at or above
    /// `max_locals` are ignored.
    #[must_use]
    pub fn compute(graph: &BlockGraph, instructions: &[Instruction], max_locals: usize) -> Self {
        let count = graph.len();
        let mut uses = vec![BitSet::new(max_locals); count];
        let mut defs = vec![BitSet::new(max_locals); count];

        for block in graph.blocks() {
            let (use_set, def_set) = (&mut uses[block.id], &mut defs[block.id]);
            for inst in graph.instructions_of(block.id, instructions) {
                let read = |slot: usize, use_set: &mut BitSet, def_set: &BitSet| {
                    if slot < max_locals && !def_set.contains(slot) {
                        use_set.insert(slot);
                    }
                };
                match LocalAccess::of(inst) {
                    Some(LocalAccess::Read { index, slots }) => {
                        for slot in index..index + slots {
                            read(slot, use_set, def_set);
                        }
                    }
                    Some(LocalAccess::Write { index, slots }) => {
                        for slot in (index..index + slots).filter(|&s| s < max_locals) {
                            def_set.insert(slot);
                        }
                    }
                    Some(LocalAccess::Update { index }) => {
                        read(index, use_set, def_set);
                        if index < max_locals {
                            def_set.insert(index);
                        }
                    }
                    None => {}
                }
            }
        }

        // Reverse of the translation order converges in few rounds for reducible code.
        let mut order = graph.rpo_order();
        order.reverse();

        let mut live_in = vec![BitSet::new(max_locals); count];
        let mut changed = true;
        while changed {
            changed = false;
            for &id in &order {
                let mut live = BitSet::new(max_locals);
                for &succ in &graph.block(id).successors {
                    live.union_with(&live_in[succ]);
                }
                live.difference_with(&defs[id]);
                live.union_with(&uses[id]);
                if live != live_in[id] {
                    live_in[id] = live;
                    changed = true;
                }
            }
        }

        let live_in = graph
            .starts()
            .map(|(bci, id)| (bci, std::mem::replace(&mut live_in[id], BitSet::new(0))))
            .collect();
        Liveness { live_in }
    }

    /// Slots live on entry to the block starting at `bci`.
    #[must_use]
    pub fn live_at(&self, bci: u32) -> Option<&BitSet> {
        self.live_in.get(&bci)
    }
}
