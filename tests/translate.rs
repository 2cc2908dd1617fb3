//! Translation integration tests.
//!
//! Every test follows the same pipeline through the public API:
//! 1. Assemble bytecode with `Assembler`
//! 2. Describe the method with `MethodBody`
//! 3. Translate it
//! 4. Check the block graph, the IR and the side tables

use stacklift::{
    analysis::BlockGraph,
    bytecode::{Assembler, Opcode},
    ir::{
        BinaryOp, CallKind, CastOp, Constant, Inst, IrBlock, IrFunction, IrType, Op,
        RuntimeCall, Terminator, ValueDef,
    },
    method::{BasicType, ConstantValue, FieldRef, MethodBody, MethodRef, ObjectHandle},
    translate, translate_all, Error, ErrorKind, Result, Translation, TranslatorOptions,
};

/// A static method with the given code and frame sizes.
fn static_method(
    name: &str,
    descriptor: &str,
    asm: Assembler,
    max_stack: u16,
    max_locals: u16,
) -> Result<MethodBody> {
    Ok(MethodBody::new("Demo", name, descriptor)?
        .with_static(true)
        .with_code(asm.finish()?)
        .with_max_stack(max_stack)
        .with_max_locals(max_locals))
}

fn strict(method: &MethodBody) -> Result<Translation> {
    translate(method, &TranslatorOptions::strict())
}

fn all_insts(f: &IrFunction) -> impl Iterator<Item = &Inst> {
    f.blocks().flat_map(|(_, b)| b.insts.iter())
}

fn safepoint_polls(block: &IrBlock) -> usize {
    block
        .insts
        .iter()
        .filter(|i| {
            matches!(
                i.op,
                Op::Runtime {
                    call: RuntimeCall::SafepointPoll,
                    ..
                }
            )
        })
        .count()
}

fn total_polls(f: &IrFunction) -> usize {
    f.blocks().map(|(_, b)| safepoint_polls(b)).sum()
}

#[test]
fn test_straight_line() -> Result<()> {
    // static int add(int a, int b) { return a + b; }
    let mut asm = Assembler::new();
    asm.iload(0)?.iload(1)?.iadd()?.ireturn()?;
    let method = static_method("add", "(II)I", asm, 2, 2)?;

    let t = strict(&method)?;
    assert_eq!(t.graph.len(), 2, "pseudo entry plus one block");
    assert_eq!(t.function.block_count(), 1);
    assert_eq!(t.function.phi_count(), 0);
    assert_eq!(t.function.name(), "Demo.add(II)I");
    assert_eq!(t.order.len(), 1);

    let (_, block) = t.function.blocks().next().unwrap();
    let Some(Terminator::Ret(Some(sum))) = block.terminator else {
        panic!("expected a value return, got {:?}", block.terminator);
    };
    assert_eq!(t.function.value_type(sum), IrType::I32);
    assert_eq!(total_polls(&t.function), 0);
    Ok(())
}

#[test]
fn test_diamond_creates_one_phi() -> Result<()> {
    // static int pick(int x) { int r; if (x == 0) r = 2; else r = 1; return r; }
    let mut asm = Assembler::new();
    asm.iload(0)?.branch(Opcode::Ifeq, "else")?;
    asm.iconst(1)?.istore(1)?.goto("join")?;
    asm.label("else")?.iconst(2)?.istore(1)?;
    asm.label("join")?.iload(1)?.ireturn()?;
    let method = static_method("pick", "(I)I", asm, 1, 2)?;

    let t = strict(&method)?;
    assert_eq!(t.graph.len(), 5);
    assert_eq!(t.function.block_count(), 4);
    // x is dead at the join, so only r needs a phi
    assert_eq!(t.function.phi_count(), 1);

    let join = t.ir_block_at(t.translated_offsets()[3]).unwrap();
    let phi = &t.function.block(join).phis[0];
    assert_eq!(phi.incoming.len(), 2);
    assert_eq!(t.function.value_type(phi.result), IrType::I32);
    assert_eq!(total_polls(&t.function), 0);
    Ok(())
}

#[test]
fn test_without_liveness_dead_locals_get_phis() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iload(0)?.branch(Opcode::Ifeq, "else")?;
    asm.iconst(1)?.istore(1)?.goto("join")?;
    asm.label("else")?.iconst(2)?.istore(1)?;
    asm.label("join")?.iload(1)?.ireturn()?;
    let method = static_method("pick", "(I)I", asm, 1, 2)?;

    let options = TranslatorOptions::strict().with_liveness(false);
    let t = translate(&method, &options)?;
    assert_eq!(t.function.phi_count(), 2);
    Ok(())
}

#[test]
fn test_self_loop_gets_separate_entry() -> Result<()> {
    // static void spin(int n) { do { n--; } while (n != 0); }
    let mut asm = Assembler::new();
    asm.label("top")?.iinc(0, -1)?.iload(0)?.branch(Opcode::Ifne, "top")?;
    asm.return_void()?;
    let method = static_method("spin", "(I)V", asm, 1, 1)?;

    let t = strict(&method)?;
    let header = t.graph.block_at(0).unwrap();
    assert!(t.graph.block(header).is_loop_header());

    // block 0 has a back-edge, so the function needs its own entry block
    assert_eq!(t.function.block_count(), 3);
    let (entry_id, entry) = t.function.blocks().next().unwrap();
    assert_eq!(entry.name, "entry");
    assert!(matches!(entry.terminator, Some(Terminator::Br(_))));

    let top = t.ir_block_at(0).unwrap();
    assert_ne!(top, entry_id);
    let phis = &t.function.block(top).phis;
    assert_eq!(phis.len(), 1);
    let sources: Vec<_> = phis[0].incoming.iter().map(|&(_, b)| b).collect();
    assert!(sources.contains(&entry_id));
    assert!(sources.contains(&top));

    // the phi merges the parameter with the decremented value
    let (from_entry, _) = phis[0]
        .incoming
        .iter()
        .find(|&&(_, b)| b == entry_id)
        .copied()
        .unwrap();
    assert_eq!(from_entry, t.function.param(0).unwrap());

    assert_eq!(safepoint_polls(t.function.block(top)), 1);
    Ok(())
}

#[test]
fn test_counting_loop() -> Result<()> {
    // static int sum(int n) { int s = 0; for (int i = 0; i < n; i++) s += i; return s; }
    let mut asm = Assembler::new();
    asm.iconst(0)?.istore(1)?.iconst(0)?.istore(2)?;
    asm.label("head")?.iload(2)?.iload(0)?.branch(Opcode::IfIcmpge, "done")?;
    asm.iload(1)?.iload(2)?.iadd()?.istore(1)?.iinc(2, 1)?.goto("head")?;
    asm.label("done")?.iload(1)?.ireturn()?;
    let method = static_method("sum", "(I)I", asm, 2, 3)?;

    let t = strict(&method)?;
    let headers: Vec<_> = t
        .graph
        .blocks()
        .iter()
        .filter(|b| b.is_loop_header())
        .filter_map(|b| b.start_bci)
        .collect();
    assert_eq!(headers, vec![4]);

    // block 0 only has the entry as predecessor and shares its IR block
    let (entry_id, _) = t.function.blocks().next().unwrap();
    assert_eq!(t.ir_block_at(0), Some(entry_id));

    let head = t.ir_block_at(4).unwrap();
    assert_eq!(t.function.block(head).phis.len(), 3);
    for phi in &t.function.block(head).phis {
        assert_eq!(phi.incoming.len(), 2);
    }
    assert_eq!(total_polls(&t.function), 1);
    Ok(())
}

#[test]
fn test_nested_loops() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iconst(0)?.istore(1)?.iconst(0)?.istore(2)?;
    asm.label("outer")?.iload(2)?.iload(0)?.branch(Opcode::IfIcmpge, "done")?;
    asm.iconst(0)?.istore(3)?;
    asm.label("inner")?.iload(3)?.iload(0)?.branch(Opcode::IfIcmpge, "next")?;
    asm.iinc(1, 1)?.iinc(3, 1)?.goto("inner")?;
    asm.label("next")?.iinc(2, 1)?.goto("outer")?;
    asm.label("done")?.iload(1)?.ireturn()?;
    let method = static_method("nest", "(I)I", asm, 2, 4)?;

    let t = strict(&method)?;
    let headers = t.graph.blocks().iter().filter(|b| b.is_loop_header()).count();
    assert_eq!(headers, 2);
    assert_eq!(total_polls(&t.function), 2);
    assert!(t.function.phi_count() >= 5);
    assert_eq!(t.order.len(), t.graph.len() - 1);
    Ok(())
}

#[test]
fn test_translation_order_respects_predecessors() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iconst(0)?.istore(1)?;
    asm.label("loop")?.iload(0)?.branch(Opcode::Ifle, "exit")?;
    asm.iload(0)?.iconst(1)?.iand()?.branch(Opcode::Ifeq, "even")?;
    asm.iinc(1, 3)?.goto("step")?;
    asm.label("even")?.iinc(1, 1)?;
    asm.label("step")?.iinc(0, -1)?.goto("loop")?;
    asm.label("exit")?.iload(1)?.ireturn()?;
    let method = static_method("walk", "(I)I", asm, 2, 2)?;

    let t = strict(&method)?;
    let position = |id: usize| t.order.iter().position(|&o| o == id);
    for (i, &id) in t.order.iter().enumerate() {
        let block = t.graph.block(id);
        if block.is_loop_header() {
            continue;
        }
        for &pred in &block.predecessors {
            if pred == BlockGraph::ENTRY {
                continue;
            }
            let p = position(pred).expect("predecessor was translated");
            assert!(p < i, "block {} translated before predecessor {}", id, pred);
        }
    }

    let rpo: Vec<_> = t.order.iter().map(|&id| t.graph.block(id).rpo).collect();
    let mut sorted = rpo.clone();
    sorted.sort();
    assert_eq!(rpo, sorted, "blocks are dequeued in ascending reverse postorder");
    Ok(())
}

#[test]
fn test_switch_with_duplicate_targets() -> Result<()> {
    // static int sw(int x) { switch (x) { case 1: case 2: return x; default: return -x; } }
    let mut asm = Assembler::new();
    asm.iload(0)?
        .lookupswitch("other", &[(1, "one"), (2, "one"), (5, "other")])?;
    asm.label("one")?.iload(0)?.ireturn()?;
    asm.label("other")?.iload(0)?.ineg()?.ireturn()?;
    let method = static_method("sw", "(I)I", asm, 1, 1)?;

    let t = strict(&method)?;
    let switch_block = t.ir_block_at(0).unwrap();
    let Some(Terminator::Switch { cases, .. }) = &t.function.block(switch_block).terminator
    else {
        panic!("expected a switch terminator");
    };
    assert_eq!(cases.iter().map(|&(k, _)| k).collect::<Vec<_>>(), vec![1, 2, 5]);

    // each target is reached over two edges from the same block
    for (_, block) in t.function.blocks().skip(1) {
        assert_eq!(block.phis.len(), 1);
        let sources: Vec<_> = block.phis[0].incoming.iter().map(|&(_, b)| b).collect();
        assert_eq!(sources, vec![switch_block, switch_block]);
    }
    Ok(())
}

#[test]
fn test_tableswitch() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iload(0)?.tableswitch(10, "dflt", &["a", "b", "a"])?;
    asm.label("a")?.iconst(1)?.ireturn()?;
    asm.label("b")?.iconst(2)?.ireturn()?;
    asm.label("dflt")?.iconst(3)?.ireturn()?;
    let method = static_method("ts", "(I)I", asm, 1, 1)?;

    let t = strict(&method)?;
    let head = t.ir_block_at(0).unwrap();
    let Some(Terminator::Switch { cases, .. }) = &t.function.block(head).terminator else {
        panic!("expected a switch terminator");
    };
    assert_eq!(cases.iter().map(|&(k, _)| k).collect::<Vec<_>>(), vec![10, 11, 12]);
    assert_eq!(t.function.phi_count(), 0);
    Ok(())
}

#[test]
fn test_stack_values_merge_at_joins() -> Result<()> {
    // 1 + (x == 0 ? 3 : 2)
    let mut asm = Assembler::new();
    asm.iconst(1)?.iload(0)?.branch(Opcode::Ifeq, "three")?;
    asm.iconst(2)?.goto("join")?;
    asm.label("three")?.iconst(3)?;
    asm.label("join")?.iadd()?.ireturn()?;
    let method = static_method("cond", "(I)I", asm, 2, 1)?;

    let t = strict(&method)?;
    assert_eq!(t.entry_depths.get(&0), Some(&0));
    assert_eq!(t.entry_depths.get(&5), Some(&1));
    assert_eq!(t.entry_depths.get(&9), Some(&1));
    assert_eq!(t.entry_depths.get(&10), Some(&2));
    assert_eq!(t.function.phi_count(), 2);
    Ok(())
}

#[test]
fn test_stack_mismatch_is_merge_failure() {
    let mut asm = Assembler::new();
    asm.iload(0).unwrap().branch(Opcode::Ifeq, "skip").unwrap();
    asm.iconst(1).unwrap();
    asm.label("skip").unwrap().iconst(2).unwrap().ireturn().unwrap();
    let method = static_method("bad", "(I)I", asm, 2, 1).unwrap();

    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MergeFailure { bci: 5, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn test_unsupported_opcodes() {
    let mut asm = Assembler::new();
    asm.aconst_null().unwrap().athrow().unwrap();
    let method = static_method("boom", "()V", asm, 1, 0).unwrap();
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    match err {
        Error::Unsupported { construct, bci } => {
            assert_eq!(construct, "athrow");
            assert_eq!(bci, Some(1));
        }
        other => panic!("unexpected error {other}"),
    }

    let mut asm = Assembler::new();
    asm.aload(0)
        .unwrap()
        .emit(Opcode::Monitorenter)
        .unwrap()
        .return_void()
        .unwrap();
    let method = static_method("sync", "(Ljava/lang/Object;)V", asm, 1, 1).unwrap();
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);

    let mut asm = Assembler::new();
    asm.fconst(1.0).unwrap().emit(Opcode::F2i).unwrap().ireturn().unwrap();
    let method = static_method("f2i", "()I", asm, 1, 0).unwrap();
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_ldc_of_string_is_unsupported() {
    let mut asm = Assembler::new();
    asm.ldc(1).unwrap().areturn().unwrap();
    let method = static_method("s", "()Ljava/lang/String;", asm, 1, 0)
        .unwrap()
        .with_constant(1, ConstantValue::String("hi".into()));
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_numeric_ldc() -> Result<()> {
    let mut asm = Assembler::new();
    asm.ldc2_w(2)?.ldc(1)?.emit(Opcode::I2l)?.ladd()?.lreturn()?;
    let method = static_method("k", "()J", asm, 4, 0)?
        .with_constant(1, ConstantValue::Int(7))
        .with_constant(2, ConstantValue::Long(1 << 40));

    let t = strict(&method)?;
    let adds = all_insts(&t.function)
        .filter(|i| matches!(i.op, Op::Binary { op: BinaryOp::Add, .. }))
        .count();
    assert_eq!(adds, 1);
    Ok(())
}

#[test]
fn test_return_type_mismatch_is_malformed() {
    let mut asm = Assembler::new();
    asm.lconst(0).unwrap().lreturn().unwrap();
    let method = static_method("r", "()I", asm, 2, 0).unwrap();
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");
}

#[test]
fn test_lcmp_lowering() -> Result<()> {
    let mut asm = Assembler::new();
    asm.lload(0)?.lload(2)?.lcmp()?.ireturn()?;
    let method = static_method("cmp", "(JJ)I", asm, 4, 4)?;

    let t = strict(&method)?;
    assert_eq!(
        t.function.params().iter().map(|&p| t.function.value_type(p)).collect::<Vec<_>>(),
        vec![IrType::I64, IrType::I64]
    );
    let icmps = all_insts(&t.function)
        .filter(|i| matches!(i.op, Op::ICmp { .. }))
        .count();
    let selects = all_insts(&t.function)
        .filter(|i| matches!(i.op, Op::Select { .. }))
        .count();
    assert_eq!((icmps, selects), (2, 1));
    Ok(())
}

#[test]
fn test_float_compare_lowering() -> Result<()> {
    let mut asm = Assembler::new();
    asm.dload(0)?.dload(2)?.emit(Opcode::Dcmpg)?.ireturn()?;
    let method = static_method("dcmp", "(DD)I", asm, 4, 4)?;

    let t = strict(&method)?;
    let fcmps = all_insts(&t.function)
        .filter(|i| matches!(i.op, Op::FCmp { .. }))
        .count();
    let selects = all_insts(&t.function)
        .filter(|i| matches!(i.op, Op::Select { .. }))
        .count();
    assert_eq!((fcmps, selects), (2, 2));
    Ok(())
}

#[test]
fn test_long_shift_masks_and_widens() -> Result<()> {
    let mut asm = Assembler::new();
    asm.lload(0)?.iload(2)?.lshl()?.lreturn()?;
    let method = static_method("shl", "(JI)J", asm, 3, 3)?;

    let t = strict(&method)?;
    let insts: Vec<_> = all_insts(&t.function).collect();
    assert!(matches!(insts[0].op, Op::Binary { op: BinaryOp::And, .. }));
    assert!(matches!(
        insts[1].op,
        Op::Cast {
            op: CastOp::ZExt,
            to: IrType::I64,
            ..
        }
    ));
    assert!(matches!(insts[2].op, Op::Binary { op: BinaryOp::Shl, .. }));

    let Op::Binary { rhs: mask, .. } = insts[0].op else { unreachable!() };
    assert!(matches!(
        t.function.value(mask).def,
        ValueDef::Constant(Constant::Int(0x3F))
    ));
    Ok(())
}

#[test]
fn test_narrowing_conversions() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iload(0)?.emit(Opcode::I2c)?.ireturn()?;
    let method = static_method("c", "(I)I", asm, 1, 1)?;

    let t = strict(&method)?;
    let casts: Vec<_> = all_insts(&t.function)
        .filter_map(|i| match i.op {
            Op::Cast { op, to, .. } => Some((op, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        casts,
        vec![(CastOp::Trunc, IrType::I16), (CastOp::ZExt, IrType::I32)]
    );
    Ok(())
}

#[test]
fn test_call_site_table() -> Result<()> {
    // int call(int x) { return this.get(x) + Helper.twice(x); }
    let mut asm = Assembler::new();
    asm.aload(0)?.iload(1)?.invokevirtual(2)?;
    asm.iload(1)?.invokestatic(1)?;
    asm.iadd()?.ireturn()?;
    let method = MethodBody::new("Demo", "call", "(I)I")?
        .with_code(asm.finish()?)
        .with_max_stack(3)
        .with_max_locals(2)
        .with_method(1, MethodRef::new("Helper", "twice", "(I)I")?)
        .with_method(2, MethodRef::new("Demo", "get", "(I)I")?);

    let t = strict(&method)?;
    assert_eq!(t.function.params().len(), 2);
    assert_eq!(t.code.call_sites.len(), 2);

    let virtual_site = &t.code.call_sites[&0];
    assert_eq!(virtual_site.kind, CallKind::Dynamic);
    assert_eq!(virtual_site.target.name, "get");
    assert_eq!(virtual_site.bci, 2);

    let static_site = &t.code.call_sites[&1];
    assert_eq!(static_site.kind, CallKind::Direct);
    assert_eq!(static_site.target.holder, "Helper");

    let calls: Vec<_> = all_insts(&t.function)
        .filter_map(|i| match &i.op {
            Op::Call {
                args,
                call_id,
                patch_bytes,
                ..
            } => Some((args.len(), *call_id, *patch_bytes)),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec![(2, 0, 15), (1, 1, 5)]);
    Ok(())
}

#[test]
fn test_void_call_pushes_nothing() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iload(0)?.invokestatic(1)?.return_void()?;
    let method = static_method("v", "(I)V", asm, 1, 1)?
        .with_method(1, MethodRef::new("Log", "print", "(I)V")?);

    let options = TranslatorOptions::strict().with_patch_bytes(8, 24);
    let t = translate(&method, &options)?;
    let call = all_insts(&t.function).find(|i| matches!(i.op, Op::Call { .. })).unwrap();
    assert_eq!(call.result, None);
    assert!(matches!(call.op, Op::Call { patch_bytes: 8, .. }));
    Ok(())
}

#[test]
fn test_static_holders_are_memoized() -> Result<()> {
    let mut asm = Assembler::new();
    asm.getstatic(1)?.getstatic(2)?.iadd()?;
    asm.getstatic(3)?.iadd()?.ireturn()?;
    let method = static_method("statics", "()I", asm, 2, 0)?
        .with_field(1, FieldRef::new_static("A", "x", BasicType::Int, 16, ObjectHandle(7)))
        .with_field(2, FieldRef::new_static("A", "y", BasicType::Int, 20, ObjectHandle(7)))
        .with_field(3, FieldRef::new_static("B", "z", BasicType::Int, 16, ObjectHandle(9)));

    let t = strict(&method)?;
    assert_eq!(t.code.oop_handles.len(), 2);
    assert_eq!(t.code.oop_handles["oop_handle_0"], ObjectHandle(7));
    assert_eq!(t.code.oop_handles["oop_handle_1"], ObjectHandle(9));

    let bases: Vec<_> = all_insts(&t.function)
        .filter_map(|i| match i.op {
            Op::FieldAddress { base, offset } => Some((base, offset)),
            _ => None,
        })
        .collect();
    assert_eq!(bases.len(), 3);
    assert_eq!(bases[0].0, bases[1].0, "same holder, same global");
    assert_ne!(bases[0].0, bases[2].0);
    assert_eq!(bases[1].1, 20);
    Ok(())
}

#[test]
fn test_sub_word_fields() -> Result<()> {
    // void set(byte b) { this.flag = b; } then read it back as an int
    let mut asm = Assembler::new();
    asm.aload(0)?.iload(1)?.putfield(1)?;
    asm.aload(0)?.getfield(1)?.ireturn()?;
    let method = MethodBody::new("Demo", "set", "(B)I")?
        .with_code(asm.finish()?)
        .with_max_stack(2)
        .with_max_locals(2)
        .with_field(1, FieldRef::instance("Demo", "flag", BasicType::Byte, 12));

    let t = strict(&method)?;
    let casts: Vec<_> = all_insts(&t.function)
        .filter_map(|i| match i.op {
            Op::Cast { op, to, .. } => Some((op, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        casts,
        vec![(CastOp::Trunc, IrType::I8), (CastOp::SExt, IrType::I32)]
    );
    assert!(all_insts(&t.function).any(|i| matches!(i.op, Op::Load { ty: IrType::I8, .. })));
    assert!(t.code.oop_handles.is_empty());
    Ok(())
}

#[test]
fn test_field_access_errors() {
    let mut asm = Assembler::new();
    asm.getstatic(1).unwrap().ireturn().unwrap();
    let method = static_method("g", "()I", asm, 1, 0)
        .unwrap()
        .with_field(1, FieldRef::instance("A", "x", BasicType::Int, 12));
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");

    let mut asm = Assembler::new();
    asm.getstatic(1).unwrap().ireturn().unwrap();
    let mut field = FieldRef::new_static("A", "x", BasicType::Int, 12, ObjectHandle(1));
    field.linked = false;
    let method = static_method("g", "()I", asm, 1, 0)
        .unwrap()
        .with_field(1, field);
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_call_site_target_reads() -> Result<()> {
    let target = || {
        let mut field = FieldRef::instance("Site", "target", BasicType::Object, 8);
        field.is_call_site_target = true;
        field
    };

    let mut asm = Assembler::new();
    asm.aload(0)?.getfield(1)?.areturn()?;
    let method = MethodBody::new("Other", "peek", "()Ljava/lang/Object;")?
        .with_code(asm.finish()?)
        .with_max_stack(1)
        .with_field(1, target());
    let err = translate(&method, &TranslatorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);

    // the holder's own constructor may read it
    let mut asm = Assembler::new();
    asm.aload(0)?.getfield(1)?.emit(Opcode::Pop)?.return_void()?;
    let method = MethodBody::new("Site", "<init>", "()V")?
        .with_code(asm.finish()?)
        .with_max_stack(1)
        .with_field(1, target());
    strict(&method)?;
    Ok(())
}

#[test]
fn test_instanceof_is_a_runtime_call() -> Result<()> {
    let mut asm = Assembler::new();
    asm.aload(0)?.instanceof(3)?.ireturn()?;
    let method = static_method("is", "(Ljava/lang/Object;)I", asm, 1, 1)?;

    let t = strict(&method)?;
    let call = all_insts(&t.function).next().unwrap();
    assert!(matches!(
        call.op,
        Op::Runtime {
            call: RuntimeCall::InstanceOf { class_index: 3 },
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_null_checks() -> Result<()> {
    let mut asm = Assembler::new();
    asm.aload(0)?.branch(Opcode::Ifnull, "none")?;
    asm.iconst(1)?.ireturn()?;
    asm.label("none")?.iconst(0)?.ireturn()?;
    let method = static_method("present", "(Ljava/lang/Object;)I", asm, 1, 1)?;

    let t = strict(&method)?;
    let Op::ICmp { rhs, .. } = all_insts(&t.function).next().unwrap().op else {
        panic!("expected a comparison");
    };
    assert!(matches!(
        t.function.value(rhs).def,
        ValueDef::Constant(Constant::Null)
    ));
    Ok(())
}

#[test]
fn test_shuffles() -> Result<()> {
    // static int sub(int a, int b) { return b - a; } via swap
    let mut asm = Assembler::new();
    asm.iload(0)?.iload(1)?.swap()?.isub()?.ireturn()?;
    let method = static_method("swp", "(II)I", asm, 2, 2)?;

    let t = strict(&method)?;
    let Op::Binary { lhs, rhs, .. } = all_insts(&t.function).next().unwrap().op else {
        panic!("expected a subtraction");
    };
    assert_eq!(lhs, t.function.param(1).unwrap());
    assert_eq!(rhs, t.function.param(0).unwrap());

    // long doubling through dup2
    let mut asm = Assembler::new();
    asm.lload(0)?.dup2()?.ladd()?.lreturn()?;
    let method = static_method("twice", "(J)J", asm, 4, 2)?;
    let t = strict(&method)?;
    let Op::Binary { lhs, rhs, .. } = all_insts(&t.function).next().unwrap().op else {
        panic!("expected an addition");
    };
    assert_eq!(lhs, rhs);
    Ok(())
}

#[test]
fn test_wide_locals() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iload(0)?.istore(300)?.iload(300)?.ireturn()?;
    let method = static_method("w", "(I)I", asm, 1, 301)?;

    let t = strict(&method)?;
    let (_, block) = t.function.blocks().next().unwrap();
    assert_eq!(block.terminator, Some(Terminator::Ret(t.function.param(0))));
    Ok(())
}

#[test]
fn test_empty_local_read_is_malformed() {
    let mut asm = Assembler::new();
    asm.iload(1).unwrap().ireturn().unwrap();
    let method = static_method("e", "(I)I", asm, 1, 2).unwrap();
    let err = translate(&method, &TranslatorOptions::default().with_liveness(false)).unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");
}

#[test]
fn test_conflicting_local_is_unreadable_after_join() {
    // int in one arm, float in the other, then read as int at the join
    let mut asm = Assembler::new();
    asm.iload(0).unwrap().branch(Opcode::Ifeq, "else").unwrap();
    asm.iconst(1).unwrap().istore(1).unwrap().goto("join").unwrap();
    asm.label("else").unwrap().fconst(1.0).unwrap().fstore(1).unwrap();
    asm.label("join").unwrap().iload(1).unwrap().ireturn().unwrap();
    let method = static_method("mixed", "(I)I", asm, 1, 2).unwrap();

    let options = TranslatorOptions::strict().with_liveness(false);
    let err = translate(&method, &options).unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn test_forward_conflict_into_loop_header() -> Result<()> {
    // both arms enter the loop; local 1 is int on one and float on the other
    let mut asm = Assembler::new();
    asm.iload(0)?.branch(Opcode::Ifeq, "else")?;
    asm.iconst(1)?.istore(1)?.goto("head")?;
    asm.label("else")?.fconst(1.0)?.fstore(1)?;
    asm.label("head")?.iinc(0, -1)?.iload(0)?.branch(Opcode::Ifne, "head")?;
    asm.return_void()?;
    let method = static_method("spin", "(I)V", asm, 1, 2)?;

    let options = TranslatorOptions::strict().with_liveness(false);
    let t = translate(&method, &options)?;
    let head_bci = t
        .graph
        .blocks()
        .iter()
        .find(|b| b.is_loop_header())
        .and_then(|b| b.start_bci)
        .unwrap();
    let head = t.ir_block_at(head_bci).unwrap();

    // only local 0 survives; its phi sees both arms and the back-edge
    let phis = &t.function.block(head).phis;
    assert_eq!(phis.len(), 1);
    assert_eq!(phis[0].incoming.len(), 3);
    assert_eq!(t.function.value_type(phis[0].result), IrType::I32);
    assert_eq!(total_polls(&t.function), 1);
    Ok(())
}

#[test]
fn test_branch_past_code_end_is_malformed() -> Result<()> {
    // goto +100; return
    let method = MethodBody::new("Demo", "far", "()V")?
        .with_static(true)
        .with_code(vec![0xa7, 0x00, 0x64, 0xb1])
        .with_max_stack(0)
        .with_max_locals(0);

    for options in [TranslatorOptions::default(), TranslatorOptions::strict()] {
        let err = translate(&method, &options).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }), "{err}");
    }
    Ok(())
}

#[test]
fn test_branch_into_instruction_is_malformed() -> Result<()> {
    // goto 4 lands on the operand byte of bipush 5
    let method = MethodBody::new("Demo", "mid", "()V")?
        .with_static(true)
        .with_code(vec![0xa7, 0x00, 0x04, 0x10, 0x05, 0xb1])
        .with_max_stack(1)
        .with_max_locals(0);

    let err = strict(&method).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
    Ok(())
}

#[test]
fn test_host_block_start_inside_instruction_is_malformed() -> Result<()> {
    let mut asm = Assembler::new();
    asm.iconst(5)?.ireturn()?;
    let method = static_method("five", "()I", asm, 1, 0)?.with_block_starts(vec![0, 1]);

    let err = strict(&method).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
    Ok(())
}

#[test]
fn test_host_block_starts() -> Result<()> {
    // an extra start in straight-line code splits the block
    let mut asm = Assembler::new();
    asm.iload(0)?.iconst(1)?.iadd()?.ireturn()?;
    let method = static_method("inc", "(I)I", asm, 2, 1)?.with_block_starts(vec![0, 2]);

    let t = strict(&method)?;
    assert_eq!(t.function.block_count(), 2);
    assert_eq!(t.translated_offsets(), vec![0, 2]);
    assert_eq!(t.entry_depths.get(&2), Some(&2));
    Ok(())
}

#[test]
fn test_translate_all() {
    let ok = |name: &str| {
        let mut asm = Assembler::new();
        asm.iload(0).unwrap().ireturn().unwrap();
        static_method(name, "(I)I", asm, 1, 1).unwrap()
    };
    let mut asm = Assembler::new();
    asm.emit(Opcode::Monitorexit).unwrap().return_void().unwrap();
    let bad = static_method("bad", "()V", asm, 1, 0).unwrap();

    let methods = vec![ok("a"), bad, ok("c")];
    let results = translate_all(&methods, &TranslatorOptions::strict());
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().function.name(), "Demo.a(I)I");
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap().function.name(), "Demo.c(I)I");
}
