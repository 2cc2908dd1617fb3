//! The SSA function under construction.
//!
//! [`IrFunction`] is an index-addressed arena of values and blocks. Blocks hold their phi
//! nodes separately from ordinary instructions, so phis can be created and extended at
//! any time, including after the block body has been filled.

use crate::{
    ir::{BlockId, Constant, Inst, IrType, Op, Terminator, ValueData, ValueDef, ValueId},
    Result,
};

/// A phi node and its incoming `(value, predecessor)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// The value the phi defines
    pub result: ValueId,
    /// One entry per incoming control-flow edge
    pub incoming: Vec<(ValueId, BlockId)>,
}

/// A basic block of the IR function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IrBlock {
    /// Human-readable name, e.g. `bci_12`
    pub name: String,
    /// Phi nodes, evaluated on entry
    pub phis: Vec<Phi>,
    /// Body instructions in order
    pub insts: Vec<Inst>,
    /// The block's single terminator once set
    pub terminator: Option<Terminator>,
}

/// An SSA function: parameters, values and blocks.
///
/// Block 0 is the function entry.
///
/// # Examples
///
/// ```rust
/// use stacklift::ir::{IrFunction, IrType, Op, BinaryOp, Terminator};
///
/// let mut f = IrFunction::new("inc", &[IrType::I32], IrType::I32);
/// let entry = f.create_block("entry");
/// let one = f.const_i32(1);
/// let x = f.param(0).unwrap();
/// let sum = f
///     .append(entry, Op::Binary { op: BinaryOp::Add, lhs: x, rhs: one })?
///     .unwrap();
/// f.set_terminator(entry, Terminator::Ret(Some(sum)))?;
/// f.verify()?;
/// # Ok::<(), stacklift::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    name: String,
    params: Vec<ValueId>,
    ret: IrType,
    values: Vec<ValueData>,
    blocks: Vec<IrBlock>,
}

impl IrFunction {
    /// Creates a function with the given parameter and return types and no blocks.
    #[must_use]
    pub fn new(name: &str, param_types: &[IrType], ret: IrType) -> Self {
        let mut function = Self {
            name: name.to_string(),
            params: Vec::with_capacity(param_types.len()),
            ret,
            values: Vec::new(),
            blocks: Vec::new(),
        };
        for (i, &ty) in param_types.iter().enumerate() {
            let position = u16::try_from(i).unwrap_or(u16::MAX);
            let id = function.new_value(ty, ValueDef::Param(position));
            function.params.push(id);
        }
        function
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared return type.
    #[must_use]
    pub fn ret_type(&self) -> IrType {
        self.ret
    }

    /// The parameter value at `index`.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<ValueId> {
        self.params.get(index).copied()
    }

    /// All parameter values in order.
    #[must_use]
    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    fn new_value(&mut self, ty: IrType, def: ValueDef) -> ValueId {
        let id = ValueId(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData { ty, def });
        id
    }

    /// Type and definition of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not belong to this function.
    #[must_use]
    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value.index()]
    }

    /// Type of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not belong to this function.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> IrType {
        self.values[value.index()].ty
    }

    /// Appends an empty block.
    pub fn create_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(IrBlock {
            name: name.to_string(),
            ..IrBlock::default()
        });
        id
    }

    /// The block `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this function.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &IrBlock {
        &self.blocks[id.index()]
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterates blocks with their ids.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &IrBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockId(i as u32), b))
    }

    /// Total phi nodes across all blocks.
    #[must_use]
    pub fn phi_count(&self) -> usize {
        self.blocks.iter().map(|b| b.phis.len()).sum()
    }

    /// Total body instructions across all blocks, excluding phis and terminators.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    /// Materializes a constant of type `ty`.
    pub fn constant(&mut self, value: Constant, ty: IrType) -> ValueId {
        self.new_value(ty, ValueDef::Constant(value))
    }

    /// `i32` constant.
    pub fn const_i32(&mut self, value: i32) -> ValueId {
        self.constant(Constant::Int(i64::from(value)), IrType::I32)
    }

    /// `i64` constant.
    pub fn const_i64(&mut self, value: i64) -> ValueId {
        self.constant(Constant::Int(value), IrType::I64)
    }

    /// `f32` constant.
    pub fn const_f32(&mut self, value: f32) -> ValueId {
        self.constant(Constant::Float(value), IrType::F32)
    }

    /// `f64` constant.
    pub fn const_f64(&mut self, value: f64) -> ValueId {
        self.constant(Constant::Double(value), IrType::F64)
    }

    /// The null reference.
    pub fn null(&mut self) -> ValueId {
        self.constant(Constant::Null, IrType::Ptr)
    }

    /// A named global holding a host object reference.
    pub fn global(&mut self, name: &str) -> ValueId {
        self.new_value(IrType::Ptr, ValueDef::Global(name.to_string()))
    }

    fn expect_type(&self, value: ValueId, expected: IrType, what: &str) -> Result<()> {
        let actual = self.value_type(value);
        if actual != expected {
            return Err(invariant_error!(
                "{} operand {} has type {}, expected {}",
                what,
                value,
                actual,
                expected
            ));
        }
        Ok(())
    }

    fn same_type(&self, lhs: ValueId, rhs: ValueId, what: &str) -> Result<IrType> {
        let ty = self.value_type(lhs);
        self.expect_type(rhs, ty, what)?;
        Ok(ty)
    }

    /// Result type of `op`, checking operand types.
    fn result_type(&self, op: &Op) -> Result<IrType> {
        Ok(match op {
            Op::Binary { lhs, rhs, .. } => self.same_type(*lhs, *rhs, "binary")?,
            Op::Unary { operand, .. } => self.value_type(*operand),
            Op::ICmp { lhs, rhs, .. } => {
                let ty = self.same_type(*lhs, *rhs, "icmp")?;
                if !ty.is_integer() && ty != IrType::Ptr {
                    return Err(invariant_error!("icmp on {}", ty));
                }
                IrType::I1
            }
            Op::FCmp { lhs, rhs, .. } => {
                let ty = self.same_type(*lhs, *rhs, "fcmp")?;
                if !ty.is_float() {
                    return Err(invariant_error!("fcmp on {}", ty));
                }
                IrType::I1
            }
            Op::Select {
                cond,
                then_value,
                else_value,
            } => {
                self.expect_type(*cond, IrType::I1, "select condition")?;
                self.same_type(*then_value, *else_value, "select")?
            }
            Op::Cast { to, .. } => *to,
            Op::FieldAddress { base, .. } => {
                self.expect_type(*base, IrType::Ptr, "address base")?;
                IrType::Ptr
            }
            Op::Load { ty, address } => {
                self.expect_type(*address, IrType::Ptr, "load address")?;
                *ty
            }
            Op::Store { address, .. } => {
                self.expect_type(*address, IrType::Ptr, "store address")?;
                IrType::Void
            }
            Op::Call { ret, .. } => *ret,
            Op::Runtime { call, .. } => call.ret_type(),
        })
    }

    /// Appends `op` to `block`, returning its result value if it produces one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if the block is already terminated or
    /// the operand types do not fit the operation.
    pub fn append(&mut self, block: BlockId, op: Op) -> Result<Option<ValueId>> {
        if self.is_terminated(block) {
            return Err(invariant_error!(
                "appending to terminated block {}",
                self.blocks[block.index()].name
            ));
        }
        let ty = self.result_type(&op)?;
        let index = self.blocks[block.index()].insts.len();
        let result = (ty != IrType::Void).then(|| self.new_value(ty, ValueDef::Inst { block, index }));
        self.blocks[block.index()].insts.push(Inst { result, op });
        Ok(result)
    }

    /// Creates a phi of type `ty` at the top of `block` with no incoming edges yet.
    pub fn create_phi(&mut self, block: BlockId, ty: IrType) -> ValueId {
        let result = self.new_value(ty, ValueDef::Phi(block));
        self.blocks[block.index()].phis.push(Phi {
            result,
            incoming: Vec::new(),
        });
        result
    }

    fn phi_mut(&mut self, phi: ValueId) -> Result<&mut Phi> {
        let ValueDef::Phi(block) = self.values[phi.index()].def else {
            return Err(invariant_error!("{} is not a phi", phi));
        };
        self.blocks[block.index()]
            .phis
            .iter_mut()
            .find(|p| p.result == phi)
            .ok_or_else(|| invariant_error!("phi {} was removed", phi))
    }

    /// Adds the incoming edge `(value, from)` to `phi`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if `phi` is not a live phi or `value`
    /// has a different type.
    pub fn add_incoming(&mut self, phi: ValueId, value: ValueId, from: BlockId) -> Result<()> {
        self.expect_type(value, self.value_type(phi), "phi incoming")?;
        self.phi_mut(phi)?.incoming.push((value, from));
        Ok(())
    }

    /// Deletes a phi that has no uses.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if `phi` is not a live phi.
    pub fn remove_phi(&mut self, phi: ValueId) -> Result<()> {
        let ValueDef::Phi(block) = self.values[phi.index()].def else {
            return Err(invariant_error!("{} is not a phi", phi));
        };
        let phis = &mut self.blocks[block.index()].phis;
        let before = phis.len();
        phis.retain(|p| p.result != phi);
        if phis.len() == before {
            return Err(invariant_error!("phi {} was already removed", phi));
        }
        Ok(())
    }

    /// Returns `true` once `block` has a terminator.
    #[must_use]
    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.blocks[block.index()].terminator.is_some()
    }

    /// Ends `block` with `terminator`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] if the block already has one.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) -> Result<()> {
        let slot = &mut self.blocks[block.index()].terminator;
        if slot.is_some() {
            return Err(invariant_error!("block {} terminated twice", block));
        }
        *slot = Some(terminator);
        Ok(())
    }

    /// Predecessor edges of every block, one entry per edge, derived from terminators.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (id, block) in self.blocks() {
            if let Some(term) = &block.terminator {
                for succ in term.successors() {
                    if let Some(list) = preds.get_mut(succ.index()) {
                        list.push(id);
                    }
                }
            }
        }
        preds
    }

    /// Checks the structural well-formedness of the function.
    ///
    /// Every block must be terminated, every branch must target an existing block, and
    /// every phi must have exactly one incoming entry per control-flow edge into its
    /// block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvariantViolation`] describing the first problem found.
    pub fn verify(&self) -> Result<()> {
        for (id, block) in self.blocks() {
            let Some(term) = &block.terminator else {
                return Err(invariant_error!("block {} ({}) has no terminator", id, block.name));
            };
            if let Some(bad) = term.successors().into_iter().find(|s| s.index() >= self.blocks.len()) {
                return Err(invariant_error!("block {} branches to missing block {}", id, bad));
            }
        }

        for ((id, block), mut expected) in self.blocks().zip(self.predecessors()) {
            expected.sort_unstable();
            for phi in &block.phis {
                let mut actual: Vec<BlockId> = phi.incoming.iter().map(|&(_, b)| b).collect();
                actual.sort_unstable();
                if actual != expected {
                    return Err(invariant_error!(
                        "phi {} in block {} has incoming {:?}, expected {:?}",
                        phi.result,
                        id,
                        actual,
                        expected
                    ));
                }
            }
        }
        Ok(())
    }
}
