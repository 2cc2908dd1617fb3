//! Bytecode decoding.
//!
//! [`decode_at`] decodes the single instruction starting at an offset. [`BytecodeStream`]
//! walks a method body front to back and can be repositioned with
//! [`BytecodeStream::reset_to`]. [`decode_method`] collects a whole body.
//!
//! Branch offsets are resolved to absolute targets during decoding. A target that would
//! lie before offset zero is rejected here. Targets past the end of the code or inside an
//! instruction are rejected by [`crate::analysis::BlockGraph`].

use crate::{
    bytecode::{Instruction, Opcode, Operand},
    utils::io::read_be_at,
    Result,
};

/// Resolves a relative branch offset against the branching instruction's offset.
fn resolve(bci: u32, offset: i32) -> Result<u32> {
    u32::try_from(i64::from(bci) + i64::from(offset))
        .map_err(|_| malformed_error!("branch at bci {} jumps before method start", bci))
}

/// Decodes the instruction at `bci`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for undefined opcodes, a misplaced `wide` prefix,
/// truncated operands, empty or inverted switch tables, and branches resolving to a
/// negative offset.
pub fn decode_at(code: &[u8], bci: u32) -> Result<Instruction> {
    let start = bci as usize;
    let mut pos = start;

    let byte: u8 = read_be_at(code, &mut pos)?;
    let mut opcode = Opcode::from_repr(byte)
        .ok_or_else(|| malformed_error!("invalid opcode 0x{:02x} at bci {}", byte, bci))?;

    let wide = opcode == Opcode::Wide;
    if wide {
        let byte: u8 = read_be_at(code, &mut pos)?;
        opcode = Opcode::from_repr(byte)
            .filter(|op| op.accepts_wide())
            .ok_or_else(|| malformed_error!("invalid wide operand 0x{:02x} at bci {}", byte, bci))?;
    }

    let local = |pos: &mut usize| -> Result<u16> {
        if wide {
            read_be_at::<u16>(code, pos)
        } else {
            read_be_at::<u8>(code, pos).map(u16::from)
        }
    };

    use Opcode::*;
    let operand = match opcode {
        Bipush => Operand::Int(i32::from(read_be_at::<i8>(code, &mut pos)?)),
        Sipush => Operand::Int(i32::from(read_be_at::<i16>(code, &mut pos)?)),
        Newarray => Operand::Int(i32::from(read_be_at::<u8>(code, &mut pos)?)),

        Ldc => Operand::ConstantPool(u16::from(read_be_at::<u8>(code, &mut pos)?)),
        LdcW | Ldc2W | Getstatic | Putstatic | Getfield | Putfield | Invokevirtual
        | Invokespecial | Invokestatic | New | Anewarray | Checkcast | Instanceof => {
            Operand::ConstantPool(read_be_at::<u16>(code, &mut pos)?)
        }
        Invokeinterface | Invokedynamic => {
            let index = read_be_at::<u16>(code, &mut pos)?;
            // count/zero bytes carry no information beyond the descriptor
            read_be_at::<u16>(code, &mut pos)?;
            Operand::ConstantPool(index)
        }
        Multianewarray => Operand::MultiNewArray {
            index: read_be_at::<u16>(code, &mut pos)?,
            dimensions: read_be_at::<u8>(code, &mut pos)?,
        },

        Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore
        | Ret => Operand::Local(local(&mut pos)?),
        Iinc => {
            let index = local(&mut pos)?;
            let delta = if wide {
                read_be_at::<i16>(code, &mut pos)?
            } else {
                i16::from(read_be_at::<i8>(code, &mut pos)?)
            };
            Operand::Iinc { index, delta }
        }

        Goto | Jsr => Operand::Branch(resolve(
            bci,
            i32::from(read_be_at::<i16>(code, &mut pos)?),
        )?),
        op if op.is_conditional_branch() => Operand::Branch(resolve(
            bci,
            i32::from(read_be_at::<i16>(code, &mut pos)?),
        )?),
        GotoW | JsrW => Operand::Branch(resolve(bci, read_be_at::<i32>(code, &mut pos)?)?),

        Tableswitch => {
            pos = switch_operands_start(pos);
            let default = resolve(bci, read_be_at::<i32>(code, &mut pos)?)?;
            let low = read_be_at::<i32>(code, &mut pos)?;
            let high = read_be_at::<i32>(code, &mut pos)?;
            if high < low {
                return Err(malformed_error!(
                    "tableswitch at bci {} has low {} > high {}",
                    bci,
                    low,
                    high
                ));
            }
            let mut cases = Vec::new();
            for key in low..=high {
                cases.push((key, resolve(bci, read_be_at::<i32>(code, &mut pos)?)?));
            }
            Operand::Switch { default, cases }
        }
        Lookupswitch => {
            pos = switch_operands_start(pos);
            let default = resolve(bci, read_be_at::<i32>(code, &mut pos)?)?;
            let npairs = read_be_at::<i32>(code, &mut pos)?;
            if npairs < 0 {
                return Err(malformed_error!(
                    "lookupswitch at bci {} has negative pair count {}",
                    bci,
                    npairs
                ));
            }
            let mut cases = Vec::new();
            for _ in 0..npairs {
                let key = read_be_at::<i32>(code, &mut pos)?;
                cases.push((key, resolve(bci, read_be_at::<i32>(code, &mut pos)?)?));
            }
            Operand::Switch { default, cases }
        }

        Wide => return Err(malformed_error!("nested wide prefix at bci {}", bci)),
        _ => Operand::None,
    };

    let len = u32::try_from(pos - start)
        .map_err(|_| malformed_error!("instruction at bci {} is too long", bci))?;

    Ok(Instruction {
        bci,
        opcode,
        wide,
        len,
        operand,
    })
}

/// Switch operands start at the next offset that is a multiple of four.
fn switch_operands_start(after_opcode: usize) -> usize {
    after_opcode.next_multiple_of(4)
}

/// A cursor over the instructions of one method body.
///
/// # Examples
///
/// ```rust
/// use stacklift::bytecode::{BytecodeStream, Opcode};
///
/// // iconst_1; ireturn
/// let code = [0x04, 0xac];
/// let ops: Vec<_> = BytecodeStream::new(&code)
///     .map(|ins| ins.map(|i| i.opcode))
///     .collect::<Result<_, _>>()?;
/// assert_eq!(ops, vec![Opcode::Iconst1, Opcode::Ireturn]);
/// # Ok::<(), stacklift::Error>(())
/// ```
pub struct BytecodeStream<'a> {
    code: &'a [u8],
    next: u32,
    failed: bool,
}

impl<'a> BytecodeStream<'a> {
    /// Creates a stream positioned at offset zero.
    #[must_use]
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            next: 0,
            failed: false,
        }
    }

    /// Repositions the stream so that the next instruction decoded starts at `bci`.
    pub fn reset_to(&mut self, bci: u32) {
        self.next = bci;
        self.failed = false;
    }

    /// Offset of the next instruction to decode.
    #[must_use]
    pub fn next_bci(&self) -> u32 {
        self.next
    }

    /// Returns `true` once every byte has been consumed.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.next as usize >= self.code.len()
    }
}

impl Iterator for BytecodeStream<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at_end() {
            return None;
        }
        match decode_at(self.code, self.next) {
            Ok(ins) => {
                self.next = ins.next_bci();
                Some(Ok(ins))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decodes a complete method body into instructions ordered by offset.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the body is empty or any instruction fails to
/// decode.
pub fn decode_method(code: &[u8]) -> Result<Vec<Instruction>> {
    if code.is_empty() {
        return Err(malformed_error!("method has no bytecode"));
    }
    BytecodeStream::new(code).collect()
}
