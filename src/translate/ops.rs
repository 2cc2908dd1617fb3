//! Lowering of individual bytecode instructions to IR.

use crate::{
    bytecode::{Instruction, Opcode, Operand},
    ir::{
        BinaryOp, CallKind, CallSiteInfo, CastOp, FloatPredicate, IntPredicate, IrType, Op,
        RuntimeCall, Terminator, UnaryOp, ValueId,
    },
    method::{BasicType, ConstantValue, MethodSource, ObjectHandle, ValueKind},
    translate::translator::Translator,
    Error, Result,
};

/// Typed local load and store opcodes with the kind they move.
fn local_kind(op: Opcode) -> Option<(ValueKind, bool)> {
    use Opcode::*;
    Some(match op {
        Iload | Iload0 | Iload1 | Iload2 | Iload3 => (ValueKind::Int, true),
        Lload | Lload0 | Lload1 | Lload2 | Lload3 => (ValueKind::Long, true),
        Fload | Fload0 | Fload1 | Fload2 | Fload3 => (ValueKind::Float, true),
        Dload | Dload0 | Dload1 | Dload2 | Dload3 => (ValueKind::Double, true),
        Aload | Aload0 | Aload1 | Aload2 | Aload3 => (ValueKind::Object, true),
        Istore | Istore0 | Istore1 | Istore2 | Istore3 => (ValueKind::Int, false),
        Lstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 => (ValueKind::Long, false),
        Fstore | Fstore0 | Fstore1 | Fstore2 | Fstore3 => (ValueKind::Float, false),
        Dstore | Dstore0 | Dstore1 | Dstore2 | Dstore3 => (ValueKind::Double, false),
        Astore | Astore0 | Astore1 | Astore2 | Astore3 => (ValueKind::Object, false),
        _ => return None,
    })
}

/// Two-operand arithmetic opcodes with their operand kind and IR operation.
fn arithmetic(op: Opcode) -> Option<(ValueKind, BinaryOp)> {
    use Opcode::*;
    use ValueKind::{Double, Float, Int, Long};
    Some(match op {
        Iadd => (Int, BinaryOp::Add),
        Ladd => (Long, BinaryOp::Add),
        Fadd => (Float, BinaryOp::FAdd),
        Dadd => (Double, BinaryOp::FAdd),
        Isub => (Int, BinaryOp::Sub),
        Lsub => (Long, BinaryOp::Sub),
        Fsub => (Float, BinaryOp::FSub),
        Dsub => (Double, BinaryOp::FSub),
        Imul => (Int, BinaryOp::Mul),
        Lmul => (Long, BinaryOp::Mul),
        Fmul => (Float, BinaryOp::FMul),
        Dmul => (Double, BinaryOp::FMul),
        Idiv => (Int, BinaryOp::SDiv),
        Ldiv => (Long, BinaryOp::SDiv),
        Fdiv => (Float, BinaryOp::FDiv),
        Ddiv => (Double, BinaryOp::FDiv),
        Irem => (Int, BinaryOp::SRem),
        Lrem => (Long, BinaryOp::SRem),
        Frem => (Float, BinaryOp::FRem),
        Drem => (Double, BinaryOp::FRem),
        Iand => (Int, BinaryOp::And),
        Land => (Long, BinaryOp::And),
        Ior => (Int, BinaryOp::Or),
        Lor => (Long, BinaryOp::Or),
        Ixor => (Int, BinaryOp::Xor),
        Lxor => (Long, BinaryOp::Xor),
        _ => return None,
    })
}

fn int_predicate(op: Opcode) -> IntPredicate {
    use Opcode::*;
    match op {
        Ifeq | IfIcmpeq | IfAcmpeq | Ifnull => IntPredicate::Eq,
        Ifne | IfIcmpne | IfAcmpne | Ifnonnull => IntPredicate::Ne,
        Iflt | IfIcmplt => IntPredicate::Slt,
        Ifge | IfIcmpge => IntPredicate::Sge,
        Ifgt | IfIcmpgt => IntPredicate::Sgt,
        _ => IntPredicate::Sle,
    }
}

impl<M: MethodSource + ?Sized> Translator<'_, M> {
    fn emit(&mut self, op: Op) -> Result<Option<ValueId>> {
        self.function.append(self.current, op)
    }

    fn emit_value(&mut self, op: Op) -> Result<ValueId> {
        self.emit(op)?
            .ok_or_else(|| invariant_error!("operation produced no value"))
    }

    fn push(&mut self, kind: ValueKind, value: ValueId) -> Result<()> {
        self.state.push(&self.function, kind, value)
    }

    fn pop(&mut self, kind: ValueKind) -> Result<ValueId> {
        self.state.pop(&self.function, kind)
    }

    fn push_const(&mut self, value: ConstantValue, bci: u32) -> Result<()> {
        let (kind, v) = match value {
            ConstantValue::Int(v) => (ValueKind::Int, self.function.const_i32(v)),
            ConstantValue::Long(v) => (ValueKind::Long, self.function.const_i64(v)),
            ConstantValue::Float(v) => (ValueKind::Float, self.function.const_f32(v)),
            ConstantValue::Double(v) => (ValueKind::Double, self.function.const_f64(v)),
            ConstantValue::String(_) => return Err(Error::unsupported("ldc of a string", bci)),
            ConstantValue::Class(_) => return Err(Error::unsupported("ldc of a class", bci)),
        };
        self.push(kind, v)
    }

    fn cast(&mut self, op: CastOp, value: ValueId, to: IrType) -> Result<ValueId> {
        self.emit_value(Op::Cast { op, value, to })
    }

    /// Lowers one instruction into the current block.
    pub(super) fn lower(&mut self, inst: &Instruction) -> Result<()> {
        use Opcode::*;
        let op = inst.opcode;

        if let Some((kind, is_load)) = local_kind(op) {
            let index = inst
                .local_index()
                .map(usize::from)
                .ok_or_else(|| invariant_error!("'{}' without a local index", op))?;
            if is_load {
                let value = self.state.load(&self.function, kind, index)?;
                return self.push(kind, value);
            }
            let value = self.pop(kind)?;
            return self.state.store(&self.function, kind, index, value);
        }
        if let Some((kind, binop)) = arithmetic(op) {
            let rhs = self.pop(kind)?;
            let lhs = self.pop(kind)?;
            let value = self.emit_value(Op::Binary { op: binop, lhs, rhs })?;
            return self.push(kind, value);
        }

        match op {
            Nop => {}

            AconstNull => {
                let null = self.function.null();
                self.push(ValueKind::Object, null)?;
            }
            IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5 => {
                let n = i32::from(op as u8) - i32::from(Iconst0 as u8);
                self.push_const(ConstantValue::Int(n), inst.bci)?;
            }
            Lconst0 | Lconst1 => {
                let n = i64::from(op as u8 - Lconst0 as u8);
                self.push_const(ConstantValue::Long(n), inst.bci)?;
            }
            Fconst0 | Fconst1 | Fconst2 => {
                let n = f32::from(op as u8 - Fconst0 as u8);
                self.push_const(ConstantValue::Float(n), inst.bci)?;
            }
            Dconst0 | Dconst1 => {
                let n = f64::from(op as u8 - Dconst0 as u8);
                self.push_const(ConstantValue::Double(n), inst.bci)?;
            }
            Bipush | Sipush => match inst.operand {
                Operand::Int(v) => self.push_const(ConstantValue::Int(v), inst.bci)?,
                _ => return Err(invariant_error!("'{}' without an immediate", op)),
            },
            Ldc | LdcW | Ldc2W => {
                let index = self.cp_index(inst)?;
                let constant = self.method.constant(index)?;
                self.push_const(constant, inst.bci)?;
            }

            Iinc => {
                let Operand::Iinc { index, delta } = inst.operand else {
                    return Err(invariant_error!("iinc without operands"));
                };
                let index = usize::from(index);
                let current = self.state.load(&self.function, ValueKind::Int, index)?;
                let delta = self.function.const_i32(i32::from(delta));
                let sum = self.emit_value(Op::Binary {
                    op: BinaryOp::Add,
                    lhs: current,
                    rhs: delta,
                })?;
                self.state.store(&self.function, ValueKind::Int, index, sum)?;
            }

            Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap => {
                self.state.shuffle(op)?;
            }

            Ineg | Lneg | Fneg | Dneg => {
                let (kind, unop) = match op {
                    Ineg => (ValueKind::Int, UnaryOp::Neg),
                    Lneg => (ValueKind::Long, UnaryOp::Neg),
                    Fneg => (ValueKind::Float, UnaryOp::FNeg),
                    _ => (ValueKind::Double, UnaryOp::FNeg),
                };
                let operand = self.pop(kind)?;
                let value = self.emit_value(Op::Unary { op: unop, operand })?;
                self.push(kind, value)?;
            }

            Ishl | Ishr | Iushr | Lshl | Lshr | Lushr => self.shift(op)?,

            I2l => self.convert(ValueKind::Int, CastOp::SExt, ValueKind::Long)?,
            L2i => self.convert(ValueKind::Long, CastOp::Trunc, ValueKind::Int)?,
            I2f => self.convert(ValueKind::Int, CastOp::SiToFp, ValueKind::Float)?,
            I2d => self.convert(ValueKind::Int, CastOp::SiToFp, ValueKind::Double)?,
            L2f => self.convert(ValueKind::Long, CastOp::SiToFp, ValueKind::Float)?,
            L2d => self.convert(ValueKind::Long, CastOp::SiToFp, ValueKind::Double)?,
            F2d => self.convert(ValueKind::Float, CastOp::FpExt, ValueKind::Double)?,
            D2f => self.convert(ValueKind::Double, CastOp::FpTrunc, ValueKind::Float)?,
            I2b | I2s | I2c => {
                let value = self.pop(ValueKind::Int)?;
                let (narrow, widen) = match op {
                    I2b => (IrType::I8, CastOp::SExt),
                    I2s => (IrType::I16, CastOp::SExt),
                    _ => (IrType::I16, CastOp::ZExt),
                };
                let truncated = self.cast(CastOp::Trunc, value, narrow)?;
                let result = self.cast(widen, truncated, IrType::I32)?;
                self.push(ValueKind::Int, result)?;
            }

            Lcmp => self.lcmp()?,
            Fcmpl | Fcmpg => self.fcmp(ValueKind::Float, op == Fcmpg)?,
            Dcmpl | Dcmpg => self.fcmp(ValueKind::Double, op == Dcmpg)?,

            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle => {
                let value = self.pop(ValueKind::Int)?;
                let zero = self.function.const_i32(0);
                self.branch_if(inst, int_predicate(op), value, zero)?;
            }
            Ifnull | Ifnonnull => {
                let value = self.pop(ValueKind::Object)?;
                let null = self.function.null();
                self.branch_if(inst, int_predicate(op), value, null)?;
            }
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple => {
                let rhs = self.pop(ValueKind::Int)?;
                let lhs = self.pop(ValueKind::Int)?;
                self.branch_if(inst, int_predicate(op), lhs, rhs)?;
            }
            IfAcmpeq | IfAcmpne => {
                let rhs = self.pop(ValueKind::Object)?;
                let lhs = self.pop(ValueKind::Object)?;
                self.branch_if(inst, int_predicate(op), lhs, rhs)?;
            }

            Goto | GotoW => {
                let target = self.target(inst)?;
                let block = self.ir_block_at(target)?;
                if target < inst.bci {
                    self.safepoint_poll()?;
                }
                self.terminate(Terminator::Br(block))?;
            }
            Tableswitch | Lookupswitch => self.switch(inst)?,

            Ireturn => self.ret(Some(ValueKind::Int))?,
            Lreturn => self.ret(Some(ValueKind::Long))?,
            Freturn => self.ret(Some(ValueKind::Float))?,
            Dreturn => self.ret(Some(ValueKind::Double))?,
            Areturn => self.ret(Some(ValueKind::Object))?,
            Return => self.ret(None)?,

            Getstatic | Putstatic | Getfield | Putfield => self.field_access(inst)?,

            Invokevirtual | Invokespecial | Invokestatic | Invokeinterface => self.invoke(inst)?,

            Instanceof => {
                let class_index = self.cp_index(inst)?;
                let object = self.pop(ValueKind::Object)?;
                let result = self.emit_value(Op::Runtime {
                    call: RuntimeCall::InstanceOf { class_index },
                    args: vec![object],
                })?;
                self.push(ValueKind::Int, result)?;
            }

            Iaload | Laload | Faload | Daload | Aaload | Baload | Caload | Saload | Iastore
            | Lastore | Fastore | Dastore | Aastore | Bastore | Castore | Sastore | New
            | Newarray | Anewarray | Arraylength | Multianewarray | Athrow | Checkcast
            | Monitorenter | Monitorexit | Jsr | JsrW | Ret | F2i | F2l | D2i | D2l
            | Invokedynamic => return Err(Error::unsupported(op.mnemonic(), inst.bci)),

            // Decoded instructions never carry the prefix as their opcode; the rest were
            // handled by the table lookups above.
            _ => return Err(invariant_error!("'{}' reached the opcode dispatch", op)),
        }
        Ok(())
    }

    fn cp_index(&self, inst: &Instruction) -> Result<u16> {
        inst.cp_index()
            .ok_or_else(|| invariant_error!("'{}' without a pool index", inst.opcode))
    }

    fn target(&self, inst: &Instruction) -> Result<u32> {
        inst.branch_target()
            .ok_or_else(|| invariant_error!("'{}' without a branch target", inst.opcode))
    }

    fn terminate(&mut self, terminator: Terminator) -> Result<()> {
        self.function.set_terminator(self.current, terminator)
    }

    fn safepoint_poll(&mut self) -> Result<()> {
        self.emit(Op::Runtime {
            call: RuntimeCall::SafepointPoll,
            args: Vec::new(),
        })?;
        Ok(())
    }

    fn convert(&mut self, from: ValueKind, op: CastOp, to: ValueKind) -> Result<()> {
        let value = self.pop(from)?;
        let result = self.cast(op, value, IrType::from_kind(to))?;
        self.push(to, result)
    }

    /// Shift amounts are masked to the width of the shifted value.
    fn shift(&mut self, op: Opcode) -> Result<()> {
        let binop = match op {
            Opcode::Ishl | Opcode::Lshl => BinaryOp::Shl,
            Opcode::Ishr | Opcode::Lshr => BinaryOp::AShr,
            _ => BinaryOp::LShr,
        };
        let is_long = matches!(op, Opcode::Lshl | Opcode::Lshr | Opcode::Lushr);

        let amount = self.pop(ValueKind::Int)?;
        let mask = self.function.const_i32(if is_long { 0x3F } else { 0x1F });
        let mut amount = self.emit_value(Op::Binary {
            op: BinaryOp::And,
            lhs: amount,
            rhs: mask,
        })?;
        let kind = if is_long {
            amount = self.cast(CastOp::ZExt, amount, IrType::I64)?;
            ValueKind::Long
        } else {
            ValueKind::Int
        };

        let operand = self.pop(kind)?;
        let value = self.emit_value(Op::Binary {
            op: binop,
            lhs: operand,
            rhs: amount,
        })?;
        self.push(kind, value)
    }

    /// `lcmp`: `l < r ? -1 : zext(l != r)`.
    fn lcmp(&mut self) -> Result<()> {
        let rhs = self.pop(ValueKind::Long)?;
        let lhs = self.pop(ValueKind::Long)?;
        let ne = self.emit_value(Op::ICmp {
            pred: IntPredicate::Ne,
            lhs,
            rhs,
        })?;
        let ne = self.cast(CastOp::ZExt, ne, IrType::I32)?;
        let lt = self.emit_value(Op::ICmp {
            pred: IntPredicate::Slt,
            lhs,
            rhs,
        })?;
        let minus_one = self.function.const_i32(-1);
        let result = self.emit_value(Op::Select {
            cond: lt,
            then_value: minus_one,
            else_value: ne,
        })?;
        self.push(ValueKind::Int, result)
    }

    /// `fcmp<l|g>` and `dcmp<l|g>`. Unordered operands produce -1 for the `l` forms and
    /// 1 for the `g` forms.
    fn fcmp(&mut self, kind: ValueKind, nan_is_greater: bool) -> Result<()> {
        let rhs = self.pop(kind)?;
        let lhs = self.pop(kind)?;
        let (first_pred, first, fallback) = if nan_is_greater {
            (FloatPredicate::Olt, -1, 1)
        } else {
            (FloatPredicate::Ogt, 1, -1)
        };

        let eq = self.emit_value(Op::FCmp {
            pred: FloatPredicate::Oeq,
            lhs,
            rhs,
        })?;
        let zero = self.function.const_i32(0);
        let fallback = self.function.const_i32(fallback);
        let inner = self.emit_value(Op::Select {
            cond: eq,
            then_value: zero,
            else_value: fallback,
        })?;

        let cond = self.emit_value(Op::FCmp {
            pred: first_pred,
            lhs,
            rhs,
        })?;
        let first = self.function.const_i32(first);
        let result = self.emit_value(Op::Select {
            cond,
            then_value: first,
            else_value: inner,
        })?;
        self.push(ValueKind::Int, result)
    }

    /// Ends the block with a two-way branch: taken to the target, else to the next
    /// instruction.
    fn branch_if(
        &mut self,
        inst: &Instruction,
        pred: IntPredicate,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<()> {
        let cond = self.emit_value(Op::ICmp { pred, lhs, rhs })?;
        let target = self.target(inst)?;
        let then_block = self.ir_block_at(target)?;
        let else_block = self.ir_block_at(inst.next_bci())?;
        if target < inst.bci {
            self.safepoint_poll()?;
        }
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        })
    }

    fn switch(&mut self, inst: &Instruction) -> Result<()> {
        let Operand::Switch { default, cases } = &inst.operand else {
            return Err(invariant_error!("'{}' without a table", inst.opcode));
        };
        let value = self.pop(ValueKind::Int)?;
        let default_block = self.ir_block_at(*default)?;
        let cases = cases
            .iter()
            .map(|&(key, target)| Ok((key, self.ir_block_at(target)?)))
            .collect::<Result<Vec<_>>>()?;

        if inst.branch_targets().iter().any(|&t| t < inst.bci) {
            self.safepoint_poll()?;
        }
        self.terminate(Terminator::Switch {
            value,
            default: default_block,
            cases,
        })
    }

    fn ret(&mut self, kind: Option<ValueKind>) -> Result<()> {
        let expected = self.function.ret_type();
        let value = match kind {
            Some(kind) => Some(self.pop(kind)?),
            None => None,
        };
        let actual = value.map_or(IrType::Void, |v| self.function.value_type(v));
        if actual != expected {
            return Err(malformed_error!(
                "return of {} from a method returning {}",
                actual,
                expected
            ));
        }
        self.terminate(Terminator::Ret(value))
    }

    fn field_access(&mut self, inst: &Instruction) -> Result<()> {
        let is_static = matches!(inst.opcode, Opcode::Getstatic | Opcode::Putstatic);
        let is_get = matches!(inst.opcode, Opcode::Getstatic | Opcode::Getfield);

        let field = self.method.field_ref(self.cp_index(inst)?)?;
        if !field.linked {
            return Err(Error::unsupported(
                format!("unlinked field {}.{}", field.holder, field.name),
                inst.bci,
            ));
        }
        if field.is_static != is_static {
            return Err(malformed_error!(
                "'{}' at bci {} on {} field {}.{}",
                inst.opcode,
                inst.bci,
                if field.is_static { "static" } else { "instance" },
                field.holder,
                field.name
            ));
        }
        if is_get
            && field.is_call_site_target
            && !(self.method.holder() == field.holder && self.method.is_object_initializer())
        {
            return Err(Error::unsupported("read of a call site target", inst.bci));
        }

        let kind = field.ty.kind()?;
        let memory = IrType::for_field(field.ty)?;
        let narrow = memory != IrType::from_kind(kind);

        if is_get {
            let base = self.field_base(is_static, field.holder_mirror)?;
            let address = self.emit_value(Op::FieldAddress {
                base,
                offset: field.offset,
            })?;
            let mut value = self.emit_value(Op::Load { ty: memory, address })?;
            if narrow {
                let widen = match field.ty {
                    BasicType::Boolean | BasicType::Char => CastOp::ZExt,
                    _ => CastOp::SExt,
                };
                value = self.cast(widen, value, IrType::I32)?;
            }
            self.push(kind, value)
        } else {
            let mut value = self.pop(kind)?;
            let base = self.field_base(is_static, field.holder_mirror)?;
            let address = self.emit_value(Op::FieldAddress {
                base,
                offset: field.offset,
            })?;
            if narrow {
                value = self.cast(CastOp::Trunc, value, memory)?;
            }
            self.emit(Op::Store { address, value })?;
            Ok(())
        }
    }

    fn field_base(&mut self, is_static: bool, mirror: ObjectHandle) -> Result<ValueId> {
        if is_static {
            Ok(self.mirror_global(mirror))
        } else {
            self.pop(ValueKind::Object)
        }
    }

    fn invoke(&mut self, inst: &Instruction) -> Result<()> {
        let target = self.method.method_ref(self.cp_index(inst)?)?;
        let (kind, has_receiver) = match inst.opcode {
            Opcode::Invokestatic => (CallKind::Direct, false),
            Opcode::Invokespecial => (CallKind::Direct, true),
            _ => (CallKind::Dynamic, true),
        };

        let mut args = Vec::with_capacity(target.signature.params.len() + 1);
        for param in target.signature.params.iter().rev() {
            args.push(self.pop(param.kind()?)?);
        }
        if has_receiver {
            args.push(self.pop(ValueKind::Object)?);
        }
        args.reverse();

        let ret_kind = target.signature.ret.kind()?;
        let id = self.next_call_id();
        self.code.call_sites.insert(
            id,
            CallSiteInfo {
                id,
                kind,
                target: target.clone(),
                bci: inst.bci,
            },
        );
        let patch_bytes = match kind {
            CallKind::Direct => self.options.direct_call_patch_bytes,
            CallKind::Dynamic => self.options.dynamic_call_patch_bytes,
        };

        let result = self.emit(Op::Call {
            target,
            kind,
            args,
            ret: IrType::from_kind(ret_kind),
            call_id: id,
            patch_bytes,
        })?;
        if let Some(result) = result {
            self.push(ret_kind, result)?;
        }
        Ok(())
    }
}
