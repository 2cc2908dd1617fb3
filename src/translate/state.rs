//! The abstract operand stack and locals of the method being translated.
//!
//! Every slot holds the IR value currently standing for it, or nothing. A two-slot value
//! occupies its own slot and leaves the following slot empty, both on the stack and in
//! the locals.
//!
//! States meet at control-flow joins through phi nodes. The first predecessor to reach a
//! multi-predecessor block creates one phi per occupied slot; every later predecessor
//! adds its incoming edge to those phis (see [`AbstractState::merge`]).

use crate::{
    bytecode::Opcode,
    ir::{BlockId, Constant, IrFunction, IrType, ValueDef, ValueId},
    method::ValueKind,
    utils::BitSet,
    Error, Result,
};

/// How an incoming edge relates to the block whose state it merges into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeEdge {
    /// The target has not been translated yet; its phis have no uses
    Forward,
    /// The target is an already translated loop header; its phis may be in use
    BackEdge,
}

/// Symbolic operand stack and local variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractState {
    stack: Vec<Option<ValueId>>,
    locals: Vec<Option<ValueId>>,
    max_stack: usize,
    /// Phis of locals invalidated on a back-edge; every later edge feeds them `undef`
    retired: Vec<ValueId>,
}

impl AbstractState {
    /// An empty state with room for `max_stack` stack slots and `max_locals` locals.
    #[must_use]
    pub fn new(max_stack: usize, max_locals: usize) -> Self {
        Self {
            stack: Vec::with_capacity(max_stack),
            locals: vec![None; max_locals],
            max_stack,
            retired: Vec::new(),
        }
    }

    /// Current stack depth in slots.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Stack slots, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[Option<ValueId>] {
        &self.stack
    }

    /// Local slots.
    #[must_use]
    pub fn locals(&self) -> &[Option<ValueId>] {
        &self.locals
    }

    fn check_type(function: &IrFunction, kind: ValueKind, value: ValueId, what: &str) -> Result<()> {
        let expected = IrType::from_kind(kind);
        let actual = function.value_type(value);
        if actual != expected {
            return Err(invariant_error!(
                "{} of {} has type {}, expected {}",
                what,
                value,
                actual,
                expected
            ));
        }
        Ok(())
    }

    /// Pushes a raw slot, which may be a two-slot marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the stack is full.
    pub fn raw_push(&mut self, slot: Option<ValueId>) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(malformed_error!(
                "operand stack overflow (max_stack {})",
                self.max_stack
            ));
        }
        self.stack.push(slot);
        Ok(())
    }

    /// Pops a raw slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the stack is empty.
    pub fn raw_pop(&mut self) -> Result<Option<ValueId>> {
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("operand stack underflow"))
    }

    /// Pushes `value` as a `kind`, followed by an empty marker for two-slot kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the value's type does not match `kind`,
    /// and [`Error::Malformed`] on overflow.
    pub fn push(&mut self, function: &IrFunction, kind: ValueKind, value: ValueId) -> Result<()> {
        Self::check_type(function, kind, value, "push")?;
        self.raw_push(Some(value))?;
        if kind.is_wide() {
            self.raw_push(None)?;
        }
        Ok(())
    }

    /// Pops a `kind`, consuming the empty marker first for two-slot kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the slots do not hold a `kind`, and
    /// [`Error::Malformed`] on underflow.
    pub fn pop(&mut self, function: &IrFunction, kind: ValueKind) -> Result<ValueId> {
        if kind.is_wide() && self.raw_pop()?.is_some() {
            return Err(invariant_error!("high slot of a {} value is not empty", kind));
        }
        let value = self
            .raw_pop()?
            .ok_or_else(|| invariant_error!("popped an empty slot as {}", kind))?;
        Self::check_type(function, kind, value, "pop")?;
        Ok(value)
    }

    fn check_local_range(&self, index: usize, kind: ValueKind) -> Result<()> {
        if index + kind.slots() > self.locals.len() {
            return Err(malformed_error!(
                "local {} ({}) out of range (max_locals {})",
                index,
                kind,
                self.locals.len()
            ));
        }
        Ok(())
    }

    /// Reads local `index` as a `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the slot is out of range or empty (dead or
    /// invalidated at a merge), and [`Error::InvariantViolation`] if it holds another
    /// type.
    pub fn load(&self, function: &IrFunction, kind: ValueKind, index: usize) -> Result<ValueId> {
        self.check_local_range(index, kind)?;
        if kind.is_wide() && self.locals[index + 1].is_some() {
            return Err(invariant_error!(
                "high slot {} of a {} local is not empty",
                index + 1,
                kind
            ));
        }
        let value = self.locals[index]
            .ok_or_else(|| malformed_error!("read of empty local {} as {}", index, kind))?;
        Self::check_type(function, kind, value, "load")?;
        Ok(value)
    }

    /// Writes `value` into local `index` as a `kind`.
    ///
    /// A two-slot value starting at `index - 1` is killed, as is whatever occupied
    /// `index + 1` when storing a two-slot value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the slot is out of range and
    /// [`Error::InvariantViolation`] if the value's type does not match `kind`.
    pub fn store(
        &mut self,
        function: &IrFunction,
        kind: ValueKind,
        index: usize,
        value: ValueId,
    ) -> Result<()> {
        Self::check_type(function, kind, value, "store")?;
        self.check_local_range(index, kind)?;
        if index > 0 {
            if let Some(prev) = self.locals[index - 1] {
                if function.value_type(prev).is_double_word() {
                    self.locals[index - 1] = None;
                }
            }
        }
        self.locals[index] = Some(value);
        if kind.is_wide() {
            self.locals[index + 1] = None;
        }
        Ok(())
    }

    /// Empties local `index`; later reads of it fail.
    pub fn invalidate_local(&mut self, index: usize) {
        if let Some(slot) = self.locals.get_mut(index) {
            *slot = None;
        }
    }

    /// Reorders raw stack slots for `pop`, `pop2`, `swap` and the `dup` family.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] for other opcodes and [`Error::Malformed`] on
    /// underflow or overflow.
    pub fn shuffle(&mut self, opcode: Opcode) -> Result<()> {
        // v1 is the top of the stack
        match opcode {
            Opcode::Pop => {
                self.raw_pop()?;
            }
            Opcode::Pop2 => {
                self.raw_pop()?;
                self.raw_pop()?;
            }
            Opcode::Dup => {
                let v1 = self.raw_pop()?;
                self.push_all(&[v1, v1])?;
            }
            Opcode::DupX1 => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                self.push_all(&[v1, v2, v1])?;
            }
            Opcode::DupX2 => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                let v3 = self.raw_pop()?;
                self.push_all(&[v1, v3, v2, v1])?;
            }
            Opcode::Dup2 => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                self.push_all(&[v2, v1, v2, v1])?;
            }
            Opcode::Dup2X1 => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                let v3 = self.raw_pop()?;
                self.push_all(&[v2, v1, v3, v2, v1])?;
            }
            Opcode::Dup2X2 => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                let v3 = self.raw_pop()?;
                let v4 = self.raw_pop()?;
                self.push_all(&[v2, v1, v4, v3, v2, v1])?;
            }
            Opcode::Swap => {
                let v1 = self.raw_pop()?;
                let v2 = self.raw_pop()?;
                self.push_all(&[v1, v2])?;
            }
            other => return Err(invariant_error!("'{}' is not a stack shuffle", other)),
        }
        Ok(())
    }

    fn push_all(&mut self, slots: &[Option<ValueId>]) -> Result<()> {
        slots.iter().try_for_each(|&slot| self.raw_push(slot))
    }

    /// A copy of this state with locals outside `live` emptied.
    ///
    /// Slots beyond the capacity of `live` are kept.
    #[must_use]
    pub fn copy_live(&self, live: Option<&BitSet>) -> Self {
        let mut copy = self.clone();
        if let Some(live) = live {
            for (i, slot) in copy.locals.iter_mut().enumerate() {
                if slot.is_some() && i < live.len() && !live.contains(i) {
                    *slot = None;
                }
            }
        }
        copy
    }

    /// Builds the entry state of `target` with one phi per occupied slot of `from`.
    ///
    /// Each phi gets its first incoming edge from `from_block`. Locals outside `live` are
    /// left empty.
    ///
    /// # Errors
    ///
    /// Propagates IR construction errors.
    pub fn create_phi_from(
        from: &AbstractState,
        from_block: BlockId,
        target: BlockId,
        live: Option<&BitSet>,
        function: &mut IrFunction,
    ) -> Result<Self> {
        let mut state = AbstractState::new(from.max_stack, from.locals.len());
        for (i, slot) in from.locals.iter().enumerate() {
            let Some(value) = *slot else {
                continue;
            };
            if live.is_some_and(|l| i < l.len() && !l.contains(i)) {
                continue;
            }
            state.locals[i] = Some(Self::new_phi(function, target, value, from_block)?);
        }
        for slot in &from.stack {
            let phi = match *slot {
                Some(value) => Some(Self::new_phi(function, target, value, from_block)?),
                None => None,
            };
            state.stack.push(phi);
        }
        Ok(state)
    }

    fn new_phi(function: &mut IrFunction, block: BlockId, value: ValueId, from: BlockId) -> Result<ValueId> {
        let phi = function.create_phi(block, function.value_type(value));
        function.add_incoming(phi, value, from)?;
        Ok(phi)
    }

    /// Returns `true` if both states have the same number of locals and their stacks agree
    /// slot by slot on occupancy and type.
    #[must_use]
    pub fn matches(&self, other: &AbstractState, function: &IrFunction) -> bool {
        self.locals.len() == other.locals.len()
            && self.stack.len() == other.stack.len()
            && self.stack.iter().zip(&other.stack).all(|pair| match pair {
                (None, None) => true,
                (Some(a), Some(b)) => function.value_type(*a) == function.value_type(*b),
                _ => false,
            })
    }

    /// Adds the edge from `from_block`, whose exit state is `income`, to the phis of this
    /// entry state of `target`.
    ///
    /// A local whose incoming slot is empty or of another type cannot be merged. On a
    /// forward edge its phi has no uses yet, so the phi is deleted and the local emptied.
    /// On a back-edge the phi may already be used; it stays in place but the local is
    /// emptied for good. The phi receives an undefined value of its own type for this edge
    /// and for every later edge into the same header.
    ///
    /// Returns the locals that could not be merged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MergeFailure`] if the stacks or the locals counts disagree, and
    /// [`Error::InvariantViolation`] if a slot of this state is not a phi of `target`.
    pub(crate) fn merge(
        &mut self,
        income: &AbstractState,
        from_block: BlockId,
        target: BlockId,
        edge: MergeEdge,
        bci: u32,
        function: &mut IrFunction,
    ) -> Result<Vec<usize>> {
        if !self.matches(income, function) {
            return Err(Error::MergeFailure {
                bci,
                reason: format!(
                    "incoming stack {} does not match stack {}",
                    describe(&income.stack, function),
                    describe(&self.stack, function)
                ),
            });
        }

        for &phi in &self.retired {
            let undef = function.constant(Constant::Undef, function.value_type(phi));
            function.add_incoming(phi, undef, from_block)?;
        }

        let mut conflicts = Vec::new();
        for i in 0..self.locals.len() {
            let Some(phi) = self.locals[i] else {
                continue;
            };
            Self::check_phi(function, phi, target)?;
            let incoming = income.locals[i]
                .filter(|&v| function.value_type(v) == function.value_type(phi));
            match (incoming, edge) {
                (Some(value), _) => function.add_incoming(phi, value, from_block)?,
                (None, MergeEdge::Forward) => {
                    function.remove_phi(phi)?;
                    self.locals[i] = None;
                    conflicts.push(i);
                }
                (None, MergeEdge::BackEdge) => {
                    let undef = function.constant(Constant::Undef, function.value_type(phi));
                    function.add_incoming(phi, undef, from_block)?;
                    self.locals[i] = None;
                    self.retired.push(phi);
                    conflicts.push(i);
                }
            }
        }

        for (slot, incoming) in self.stack.iter().zip(&income.stack) {
            if let (Some(phi), Some(value)) = (*slot, *incoming) {
                Self::check_phi(function, phi, target)?;
                function.add_incoming(phi, value, from_block)?;
            }
        }
        Ok(conflicts)
    }

    fn check_phi(function: &IrFunction, value: ValueId, block: BlockId) -> Result<()> {
        match function.value(value).def {
            ValueDef::Phi(owner) if owner == block => Ok(()),
            _ => Err(invariant_error!("{} is not a phi of {}", value, block)),
        }
    }
}

fn describe(stack: &[Option<ValueId>], function: &IrFunction) -> String {
    let slots: Vec<&str> = stack
        .iter()
        .map(|s| s.map_or("-", |v| function.value_type(v).into()))
        .collect();
    format!("[{}]", slots.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    fn function() -> (IrFunction, BlockId) {
        let mut f = IrFunction::new("t", &[], IrType::Void);
        let b = f.create_block("entry");
        (f, b)
    }

    #[test]
    fn wide_push_pop_round_trip() -> Result<()> {
        let (mut f, _) = function();
        let l = f.const_i64(7);
        let mut state = AbstractState::new(4, 0);
        state.push(&f, ValueKind::Long, l)?;
        assert_eq!(state.stack(), &[Some(l), None]);
        assert_eq!(state.pop(&f, ValueKind::Long)?, l);
        assert_eq!(state.stack_depth(), 0);
        Ok(())
    }

    #[test]
    fn discipline_violations() {
        let (mut f, _) = function();
        let i = f.const_i32(1);
        let mut state = AbstractState::new(1, 2);

        assert!(matches!(
            state.push(&f, ValueKind::Float, i),
            Err(Error::InvariantViolation { .. })
        ));
        state.push(&f, ValueKind::Int, i).unwrap();
        assert!(matches!(
            state.push(&f, ValueKind::Int, i),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            state.pop(&f, ValueKind::Long),
            Err(Error::InvariantViolation { .. })
        ));
        assert!(matches!(state.raw_pop(), Err(Error::Malformed { .. })));
        assert!(matches!(
            state.load(&f, ValueKind::Int, 1),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn stores_kill_overlapping_wide_locals() -> Result<()> {
        let (mut f, _) = function();
        let d = f.const_f64(1.5);
        let i = f.const_i32(3);
        let mut state = AbstractState::new(0, 4);

        state.store(&f, ValueKind::Double, 0, d)?;
        assert_eq!(state.load(&f, ValueKind::Double, 0)?, d);
        // writing the high half kills the double
        state.store(&f, ValueKind::Int, 1, i)?;
        assert_eq!(state.locals(), &[None, Some(i), None, None]);

        state.store(&f, ValueKind::Int, 3, i)?;
        state.store(&f, ValueKind::Double, 2, d)?;
        assert_eq!(state.locals()[3], None);
        assert!(state.store(&f, ValueKind::Double, 3, d).is_err());
        Ok(())
    }

    #[test]
    fn shuffle_post_conditions() -> Result<()> {
        let (mut f, _) = function();
        let v: Vec<Option<ValueId>> = (0..4).map(|n| Some(f.const_i32(n))).collect();
        let (a, b, c, d) = (v[0], v[1], v[2], v[3]);

        let cases: Vec<(Opcode, Vec<Option<ValueId>>, Vec<Option<ValueId>>)> = vec![
            (Opcode::Dup, vec![a], vec![a, a]),
            (Opcode::DupX1, vec![a, b], vec![b, a, b]),
            (Opcode::DupX2, vec![a, b, c], vec![c, a, b, c]),
            (Opcode::Dup2, vec![a, b], vec![a, b, a, b]),
            (Opcode::Dup2X1, vec![a, b, c], vec![b, c, a, b, c]),
            (Opcode::Dup2X2, vec![a, b, c, d], vec![c, d, a, b, c, d]),
            (Opcode::Swap, vec![a, b], vec![b, a]),
            (Opcode::Pop2, vec![a, b, c], vec![a]),
        ];
        for (op, before, after) in cases {
            let mut state = AbstractState::new(8, 0);
            for slot in before {
                state.raw_push(slot)?;
            }
            state.shuffle(op)?;
            assert_eq!(state.stack(), after.as_slice(), "{op}");
        }
        Ok(())
    }

    #[test]
    fn copy_live_prunes_dead_locals() -> Result<()> {
        let (mut f, _) = function();
        let i = f.const_i32(1);
        let mut state = AbstractState::new(0, 3);
        state.store(&f, ValueKind::Int, 0, i)?;
        state.store(&f, ValueKind::Int, 2, i)?;

        let mut live = BitSet::new(3);
        live.insert(2);
        let copy = state.copy_live(Some(&live));
        assert_eq!(copy.locals(), &[None, None, Some(i)]);
        assert_eq!(state.copy_live(None), state);
        Ok(())
    }

    #[test]
    fn phi_protocol_forward_merge() -> Result<()> {
        let mut f = IrFunction::new("t", &[], IrType::Void);
        let left = f.create_block("left");
        let right = f.create_block("right");
        let join = f.create_block("join");
        let (x, y) = (f.const_i32(1), f.const_f32(2.0));

        let mut from_left = AbstractState::new(2, 2);
        from_left.store(&f, ValueKind::Int, 0, x)?;
        from_left.store(&f, ValueKind::Int, 1, x)?;
        from_left.push(&f, ValueKind::Int, x)?;

        let mut from_right = AbstractState::new(2, 2);
        from_right.store(&f, ValueKind::Int, 0, x)?;
        from_right.store(&f, ValueKind::Float, 1, y)?;
        from_right.push(&f, ValueKind::Int, x)?;

        let mut entry = AbstractState::create_phi_from(&from_left, left, join, None, &mut f)?;
        assert_eq!(f.phi_count(), 3);

        let conflicts = entry.merge(&from_right, right, join, MergeEdge::Forward, 8, &mut f)?;
        assert_eq!(conflicts, vec![1]);
        assert_eq!(entry.locals()[1], None);
        assert_eq!(f.phi_count(), 2);

        f.set_terminator(left, Terminator::Br(join))?;
        f.set_terminator(right, Terminator::Br(join))?;
        f.set_terminator(join, Terminator::Ret(None))?;
        f.verify()
    }

    #[test]
    fn back_edge_conflict_retires_local() -> Result<()> {
        let mut f = IrFunction::new("t", &[], IrType::Void);
        let pre = f.create_block("pre");
        let header = f.create_block("header");
        let latch = f.create_block("latch");
        let x = f.const_i32(1);
        let y = f.const_f32(1.0);

        let mut before = AbstractState::new(0, 1);
        before.store(&f, ValueKind::Int, 0, x)?;
        let mut snapshot = AbstractState::create_phi_from(&before, pre, header, None, &mut f)?;
        let phi = snapshot.locals()[0].unwrap();

        let mut from_header = AbstractState::new(0, 1);
        from_header.store(&f, ValueKind::Float, 0, y)?;
        let conflicts = snapshot.merge(&from_header, header, header, MergeEdge::BackEdge, 0, &mut f)?;
        assert_eq!(conflicts, vec![0]);
        assert!(snapshot.locals()[0].is_none());

        // a later back-edge with a matching int still contributes only undef
        let mut from_latch = AbstractState::new(0, 1);
        from_latch.store(&f, ValueKind::Int, 0, x)?;
        let conflicts = snapshot.merge(&from_latch, latch, header, MergeEdge::BackEdge, 0, &mut f)?;
        assert!(conflicts.is_empty());
        let incoming = &f.block(header).phis[0].incoming;
        assert_eq!(f.block(header).phis[0].result, phi);
        assert_eq!(incoming.len(), 3);
        assert!(incoming.iter().all(|&(v, b)| b == pre || v != x));

        f.set_terminator(pre, Terminator::Br(header))?;
        let cond = f.constant(Constant::Int(1), IrType::I1);
        f.set_terminator(
            header,
            Terminator::CondBr {
                cond,
                then_block: header,
                else_block: latch,
            },
        )?;
        f.set_terminator(latch, Terminator::Br(header))?;
        f.verify()
    }

    #[test]
    fn stack_mismatch_is_merge_failure() -> Result<()> {
        let (mut f, b) = function();
        let x = f.const_i32(1);
        let l = f.const_i64(1);
        let mut a = AbstractState::new(2, 0);
        a.push(&f, ValueKind::Int, x)?;
        let mut other = AbstractState::new(2, 0);
        other.push(&f, ValueKind::Long, l)?;

        let mut entry = AbstractState::create_phi_from(&a, b, b, None, &mut f)?;
        let err = entry
            .merge(&other, b, b, MergeEdge::Forward, 12, &mut f)
            .unwrap_err();
        assert!(matches!(err, Error::MergeFailure { bci: 12, .. }));
        Ok(())
    }
}
