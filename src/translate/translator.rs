//! The translation driver.
//!
//! Blocks are translated one at a time in ascending reverse-postorder, so every block
//! except a loop header is translated only after all of its predecessors. When a block is
//! done, its exit state flows into each successor through the income rules:
//!
//! 1. first income, single predecessor: copy the exit state, dropping dead locals
//! 2. first income, several predecessors: build phis for every occupied slot; loop
//!    headers also keep a snapshot of this state for their back-edges
//! 3. later income into an untranslated block: add incoming edges to its phis
//! 4. back-edge into a translated loop header: add incoming edges to the snapshot's phis
//!
//! Reaching a translated block any other way means the bytecode does not have the shape
//! this scheme relies on, and the method is rejected.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace, warn};

use crate::{
    analysis::{compute_stack_depths, BlockFlags, BlockGraph, Liveness},
    bytecode::Instruction,
    ir::{BlockId, CodeInfo, IrFunction, IrType, Terminator, ValueId},
    method::{MethodSource, ObjectHandle, ValueKind},
    translate::{
        state::{AbstractState, MergeEdge},
        worklist::WorkList,
        TranslatorOptions,
    },
    utils::BitSet,
    Error, Result,
};

/// Per-block translation data, indexed like the block graph.
#[derive(Debug, Default)]
struct BlockSlot {
    ir_block: Option<BlockId>,
    /// Entry state until the block is translated, exit state afterwards
    state: Option<AbstractState>,
    /// Entry state of a loop header, frozen for its back-edges
    loop_entry: Option<AbstractState>,
}

/// Everything the driver produced for one method.
pub(crate) struct Output {
    pub(crate) function: IrFunction,
    pub(crate) code: CodeInfo,
    pub(crate) graph: BlockGraph,
    pub(crate) block_map: Vec<Option<BlockId>>,
    pub(crate) order: Vec<usize>,
    pub(crate) entry_depths: BTreeMap<u32, usize>,
}

pub(crate) struct Translator<'a, M: MethodSource + ?Sized> {
    pub(super) method: &'a M,
    pub(super) options: &'a TranslatorOptions,
    instructions: &'a [Instruction],
    graph: BlockGraph,
    slots: Vec<BlockSlot>,
    pub(super) function: IrFunction,
    pub(super) code: CodeInfo,
    liveness: Option<Liveness>,
    reference_depths: Option<BTreeMap<u32, usize>>,
    entry_depths: BTreeMap<u32, usize>,
    work_list: WorkList,
    order: Vec<usize>,
    /// IR block receiving instructions
    pub(super) current: BlockId,
    /// State of the block being translated
    pub(super) state: AbstractState,
    next_call_id: u32,
    mirrors: HashMap<ObjectHandle, ValueId>,
}

impl<'a, M: MethodSource + ?Sized> Translator<'a, M> {
    pub(crate) fn new(
        method: &'a M,
        options: &'a TranslatorOptions,
        instructions: &'a [Instruction],
        graph: BlockGraph,
    ) -> Result<Self> {
        let signature = method.signature();
        let mut params = Vec::with_capacity(signature.params.len() + 1);
        if !method.is_static() {
            params.push(IrType::Ptr);
        }
        for param in &signature.params {
            params.push(IrType::from_kind(param.kind()?));
        }
        let ret = IrType::from_kind(signature.ret.kind()?);
        let name = format!("{}.{}{}", method.holder(), method.name(), signature);
        let function = IrFunction::new(&name, &params, ret);

        let liveness = options
            .use_liveness
            .then(|| Liveness::compute(&graph, instructions, usize::from(method.max_locals())));
        let reference_depths = if options.verify_stack_depths {
            Some(compute_stack_depths(&graph, instructions, method)?)
        } else {
            None
        };

        let slots = (0..graph.len()).map(|_| BlockSlot::default()).collect();
        Ok(Self {
            method,
            options,
            instructions,
            graph,
            slots,
            function,
            code: CodeInfo::default(),
            liveness,
            reference_depths,
            entry_depths: BTreeMap::new(),
            work_list: WorkList::default(),
            order: Vec::new(),
            current: BlockId(0),
            state: AbstractState::new(0, 0),
            next_call_id: 0,
            mirrors: HashMap::new(),
        })
    }

    /// Runs the translation to completion.
    pub(crate) fn run(mut self) -> Result<Output> {
        let first = self
            .graph
            .block_at(0)
            .ok_or_else(|| malformed_error!("method has no code"))?;
        self.create_ir_blocks(first);
        self.initialize_entry_state(first)?;

        self.income(first, BlockGraph::ENTRY)?;
        self.work_list.push(&mut self.graph, first)?;

        while let Some(block) = self.work_list.pop(&mut self.graph) {
            trace!(block, rpo = ?self.graph.block(block).rpo, "dequeued");
            self.translate_block(block)?;
        }

        if self.options.verify_ir {
            self.function.verify()?;
        }
        debug!(
            blocks = self.order.len(),
            phis = self.function.phi_count(),
            call_sites = self.code.call_sites.len(),
            "translated"
        );

        let block_map = self.slots.iter().map(|s| s.ir_block).collect();
        Ok(Output {
            function: self.function,
            code: self.code,
            graph: self.graph,
            block_map,
            order: self.order,
            entry_depths: self.entry_depths,
        })
    }

    /// Creates one IR block per reachable bytecode block.
    ///
    /// The pseudo entry block shares the IR block of offset 0 unless that block has
    /// predecessors besides the entry, in which case phis there need a distinct
    /// predecessor block.
    fn create_ir_blocks(&mut self, first: usize) {
        let shared = self.graph.block(first).predecessors == [BlockGraph::ENTRY];
        if !shared {
            self.slots[BlockGraph::ENTRY].ir_block = Some(self.function.create_block("entry"));
        }
        for id in self.graph.rpo_order() {
            let name = format!("bci_{}", self.graph.block(id).start_bci.unwrap_or(0));
            self.slots[id].ir_block = Some(self.function.create_block(&name));
        }
        if shared {
            self.slots[BlockGraph::ENTRY].ir_block = self.slots[first].ir_block;
        }
    }

    /// Materializes the receiver and arguments into the locals of the entry state.
    fn initialize_entry_state(&mut self, first: usize) -> Result<()> {
        let signature = self.method.signature();
        let max_locals = usize::from(self.method.max_locals());
        let receiver = usize::from(!self.method.is_static());
        if max_locals < signature.param_slots() + receiver {
            return Err(malformed_error!(
                "max_locals {} cannot hold {} argument slots",
                max_locals,
                signature.param_slots() + receiver
            ));
        }

        let mut state = AbstractState::new(usize::from(self.method.max_stack()), max_locals);
        let mut params = self.function.params().to_vec().into_iter();
        let mut slot = 0;
        if receiver == 1 {
            let this = params.next().ok_or_else(|| invariant_error!("missing receiver"))?;
            state.store(&self.function, ValueKind::Object, 0, this)?;
            slot = 1;
        }
        for ty in &signature.params {
            let kind = ty.kind()?;
            let value = params
                .next()
                .ok_or_else(|| invariant_error!("missing parameter for {}", ty))?;
            state.store(&self.function, kind, slot, value)?;
            slot += kind.slots();
        }
        self.slots[BlockGraph::ENTRY].state = Some(state);

        let entry_ir = self.ir_block_of(BlockGraph::ENTRY)?;
        let first_ir = self.ir_block_of(first)?;
        if entry_ir != first_ir {
            self.function.set_terminator(entry_ir, Terminator::Br(first_ir))?;
        }
        Ok(())
    }

    fn ir_block_of(&self, block: usize) -> Result<BlockId> {
        self.slots
            .get(block)
            .and_then(|s| s.ir_block)
            .ok_or_else(|| invariant_error!("block {} has no IR block", block))
    }

    /// The IR block starting at `bci`.
    pub(super) fn ir_block_at(&self, bci: u32) -> Result<BlockId> {
        let block = self
            .graph
            .block_at(bci)
            .ok_or_else(|| malformed_error!("bci {} is not a block start", bci))?;
        self.ir_block_of(block)
    }

    fn live_at(&self, bci: u32) -> Option<BitSet> {
        self.method
            .live_locals(bci)
            .or_else(|| self.liveness.as_ref().and_then(|l| l.live_at(bci).cloned()))
    }

    /// Flows the exit state of `from` into `target`.
    fn income(&mut self, target: usize, from: usize) -> Result<()> {
        let block = self.graph.block(target);
        let bci = block.start_bci.unwrap_or(0);
        let compiled = block.is_compiled();
        let loop_header = block.is_loop_header();
        let single = block.predecessors.len() == 1;

        let from_ir = self.ir_block_of(from)?;
        let target_ir = self.ir_block_of(target)?;
        let income = self.slots[from]
            .state
            .clone()
            .ok_or_else(|| invariant_error!("predecessor block {} has no state", from))?;

        if self.slots[target].state.is_none() {
            if compiled {
                return Err(Error::MergeFailure {
                    bci,
                    reason: "translated block has no state".to_string(),
                });
            }
            let live = self.live_at(bci);
            let entry = if single {
                income.copy_live(live.as_ref())
            } else {
                AbstractState::create_phi_from(&income, from_ir, target_ir, live.as_ref(), &mut self.function)?
            };
            let slot = &mut self.slots[target];
            if loop_header {
                slot.loop_entry = Some(entry.clone());
            }
            slot.state = Some(entry);
            return Ok(());
        }

        let (conflicts, edge) = if !compiled {
            let slot = &mut self.slots[target];
            let state = slot
                .state
                .as_mut()
                .ok_or_else(|| invariant_error!("block {} lost its state", target))?;
            let conflicts =
                state.merge(&income, from_ir, target_ir, MergeEdge::Forward, bci, &mut self.function)?;
            if loop_header && !conflicts.is_empty() {
                slot.loop_entry = Some(state.clone());
            }
            (conflicts, MergeEdge::Forward)
        } else if loop_header {
            let snapshot = self.slots[target].loop_entry.as_mut().ok_or_else(|| {
                invariant_error!("loop header at bci {} has no entry snapshot", bci)
            })?;
            let conflicts =
                snapshot.merge(&income, from_ir, target_ir, MergeEdge::BackEdge, bci, &mut self.function)?;
            (conflicts, MergeEdge::BackEdge)
        } else {
            return Err(Error::MergeFailure {
                bci,
                reason: "reached a translated block that is not a loop header".to_string(),
            });
        };

        for local in conflicts {
            warn!(bci, local, ?edge, "conflicting local invalidated at merge");
        }
        Ok(())
    }

    fn translate_block(&mut self, id: usize) -> Result<()> {
        let start = self
            .graph
            .block(id)
            .start_bci
            .ok_or_else(|| invariant_error!("pseudo entry block queued"))?;
        self.current = self.ir_block_of(id)?;
        self.state = self.slots[id]
            .state
            .take()
            .ok_or_else(|| invariant_error!("block at bci {} has no entry state", start))?;
        trace!(bci = start, depth = self.state.stack_depth(), "translating block");

        self.entry_depths.insert(start, self.state.stack_depth());
        if let Some(expected) = self.reference_depths.as_ref().and_then(|d| d.get(&start)) {
            if *expected != self.state.stack_depth() {
                return Err(invariant_error!(
                    "entry stack depth {} at bci {} differs from reference depth {}",
                    self.state.stack_depth(),
                    start,
                    expected
                ));
            }
        }

        for inst in self.graph.instructions_of(id, self.instructions) {
            self.lower(inst)?;
        }

        if !self.function.is_terminated(self.current) {
            let next = self.graph.block(id).end_bci;
            let target = self
                .graph
                .block_at(next)
                .ok_or_else(|| malformed_error!("control falls off the code at bci {}", next))?;
            let target_ir = self.ir_block_of(target)?;
            self.function.set_terminator(self.current, Terminator::Br(target_ir))?;
        }

        let exit = std::mem::replace(&mut self.state, AbstractState::new(0, 0));
        self.slots[id].state = Some(exit);
        self.graph.block_mut(id).flags.insert(BlockFlags::COMPILED);
        self.order.push(id);

        let successors = self.graph.block(id).successors.clone();
        for succ in successors {
            self.income(succ, id)?;
            if !self.graph.block(succ).is_compiled() && self.work_list.push(&mut self.graph, succ)? {
                trace!(block = succ, "queued");
            }
        }
        Ok(())
    }

    /// Allocates the next call-site identifier.
    pub(super) fn next_call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id += 1;
        id
    }

    /// The memoized global standing for the class mirror `handle`.
    pub(super) fn mirror_global(&mut self, handle: ObjectHandle) -> ValueId {
        if let Some(&global) = self.mirrors.get(&handle) {
            return global;
        }
        let name = format!("oop_handle_{}", self.mirrors.len());
        let global = self.function.global(&name);
        self.code.oop_handles.insert(name, handle);
        self.mirrors.insert(handle, global);
        global
    }
}
