//! Reference operand-stack depths.
//!
//! Propagates the operand-stack depth in slots forward from depth 0 at offset 0, using
//! the stack effect of each instruction. Invokes, field accesses and `ldc` take their
//! slot counts from the constant pool. The result is the depth on entry to every
//! reachable block, which the translator can check its abstract state against.

use std::collections::{BTreeMap, VecDeque};

use crate::{
    analysis::BlockGraph,
    bytecode::{Instruction, Opcode},
    method::MethodSource,
    Result,
};

/// Slots popped and pushed by `inst`.
///
/// # Errors
///
/// Returns an error if a constant pool entry the effect depends on cannot be resolved.
pub fn stack_effect<M: MethodSource + ?Sized>(inst: &Instruction, method: &M) -> Result<(usize, usize)> {
    use Opcode::*;
    let cp = || {
        inst.cp_index()
            .ok_or_else(|| malformed_error!("'{}' at bci {} has no pool index", inst.opcode, inst.bci))
    };

    Ok(match inst.opcode {
        Nop | Iinc | Goto | GotoW | Ret | Return | Wide => (0, 0),
        AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5
        | Fconst0 | Fconst1 | Fconst2 | Bipush | Sipush | Iload | Fload | Aload | Iload0
        | Iload1 | Iload2 | Iload3 | Fload0 | Fload1 | Fload2 | Fload3 | Aload0 | Aload1
        | Aload2 | Aload3 | New | Jsr | JsrW => (0, 1),
        Lconst0 | Lconst1 | Dconst0 | Dconst1 | Lload | Dload | Lload0 | Lload1 | Lload2
        | Lload3 | Dload0 | Dload1 | Dload2 | Dload3 => (0, 2),
        Ldc | LdcW | Ldc2W => (0, method.constant(cp()?)?.slots()),

        Iaload | Faload | Aaload | Baload | Caload | Saload => (2, 1),
        Laload | Daload => (2, 2),
        Istore | Fstore | Astore | Istore0 | Istore1 | Istore2 | Istore3 | Fstore0
        | Fstore1 | Fstore2 | Fstore3 | Astore0 | Astore1 | Astore2 | Astore3 | Pop
        | Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | Ifnull | Ifnonnull | Tableswitch
        | Lookupswitch | Ireturn | Freturn | Areturn | Athrow | Monitorenter | Monitorexit => {
            (1, 0)
        }
        Lstore | Dstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 | Dstore0 | Dstore1
        | Dstore2 | Dstore3 | Pop2 | IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt
        | IfIcmple | IfAcmpeq | IfAcmpne | Lreturn | Dreturn => (2, 0),
        Iastore | Fastore | Aastore | Bastore | Castore | Sastore => (3, 0),
        Lastore | Dastore => (4, 0),

        Dup => (1, 2),
        DupX1 => (2, 3),
        DupX2 => (3, 4),
        Dup2 => (2, 4),
        Dup2X1 => (3, 5),
        Dup2X2 => (4, 6),
        Swap => (2, 2),

        Iadd | Isub | Imul | Idiv | Irem | Iand | Ior | Ixor | Ishl | Ishr | Iushr | Fadd
        | Fsub | Fmul | Fdiv | Frem | Fcmpl | Fcmpg => (2, 1),
        Ladd | Lsub | Lmul | Ldiv | Lrem | Land | Lor | Lxor | Dadd | Dsub | Dmul | Ddiv
        | Drem => (4, 2),
        Lshl | Lshr | Lushr => (3, 2),
        Lcmp | Dcmpl | Dcmpg => (4, 1),
        Ineg | Fneg | I2f | F2i | I2b | I2c | I2s | Newarray | Anewarray | Arraylength
        | Checkcast | Instanceof => (1, 1),
        Lneg | Dneg | L2d | D2l => (2, 2),
        I2l | I2d | F2l | F2d => (1, 2),
        L2i | L2f | D2i | D2f => (2, 1),

        Getstatic => (0, method.field_ref(cp()?)?.ty.slots()),
        Putstatic => (method.field_ref(cp()?)?.ty.slots(), 0),
        Getfield => (1, method.field_ref(cp()?)?.ty.slots()),
        Putfield => (1 + method.field_ref(cp()?)?.ty.slots(), 0),

        Invokevirtual | Invokespecial | Invokeinterface => {
            let sig = method.method_ref(cp()?)?.signature;
            (sig.param_slots() + 1, sig.ret.slots())
        }
        Invokestatic | Invokedynamic => {
            let sig = method.method_ref(cp()?)?.signature;
            (sig.param_slots(), sig.ret.slots())
        }
        Multianewarray => match inst.operand {
            crate::bytecode::Operand::MultiNewArray { dimensions, .. } => {
                (usize::from(dimensions), 1)
            }
            _ => return Err(malformed_error!("multianewarray at bci {} without dimensions", inst.bci)),
        },
    })
}

/// Operand-stack depth on entry to each reachable block, keyed by block-start offset.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the stack underflows or two paths reach a
/// block with different depths, and propagates constant pool resolution errors.
pub fn compute_stack_depths<M: MethodSource + ?Sized>(
    graph: &BlockGraph,
    instructions: &[Instruction],
    method: &M,
) -> Result<BTreeMap<u32, usize>> {
    let mut depths = BTreeMap::new();
    let Some(first) = graph.block_at(0) else {
        return Ok(depths);
    };

    depths.insert(0, 0usize);
    let mut queue = VecDeque::from([first]);
    while let Some(id) = queue.pop_front() {
        let block = graph.block(id);
        let Some(start) = block.start_bci else {
            continue;
        };
        let mut depth = depths[&start];
        for inst in graph.instructions_of(id, instructions) {
            let (pop, push) = stack_effect(inst, method)?;
            depth = depth.checked_sub(pop).ok_or_else(|| {
                malformed_error!("operand stack underflow at bci {} ({})", inst.bci, inst.opcode)
            })?;
            depth += push;
        }
        // `jsr` pushes its return address for the subroutine only.
        if graph
            .instructions_of(id, instructions)
            .last()
            .is_some_and(|i| matches!(i.opcode, Opcode::Jsr | Opcode::JsrW))
        {
            depth = depth.saturating_sub(1);
        }

        for &succ in &block.successors {
            let Some(succ_bci) = graph.block(succ).start_bci else {
                continue;
            };
            match depths.get(&succ_bci) {
                Some(&known) if known != depth => {
                    return Err(malformed_error!(
                        "stack depth {} from bci {} disagrees with {} at bci {}",
                        depth,
                        start,
                        known,
                        succ_bci
                    ));
                }
                Some(_) => {}
                None => {
                    depths.insert(succ_bci, depth);
                    queue.push_back(succ);
                }
            }
        }
    }
    Ok(depths)
}
