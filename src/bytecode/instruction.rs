//! Decoded bytecode instructions.

use crate::bytecode::Opcode;

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Two-way branch: the target or the next instruction
    ConditionalBranch,
    /// Always transfers to the target (`goto`, `goto_w`)
    UnconditionalBranch,
    /// Multi-way dispatch (`tableswitch`, `lookupswitch`)
    Switch,
    /// Leaves the method normally
    Return,
    /// Leaves the method by throwing (`athrow`)
    Throw,
    /// Subroutine call or return (`jsr`, `jsr_w`, `ret`)
    Subroutine,
}

/// The decoded operand of an instruction.
///
/// Branch targets are stored as absolute bytecode offsets, already resolved against the
/// offset of the branching instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate integer (`bipush`, `sipush`, `newarray` element type)
    Int(i32),
    /// Local variable slot (`iload`, `astore`, `ret`, ...)
    Local(u16),
    /// `iinc` slot and signed increment
    Iinc {
        /// Local variable slot
        index: u16,
        /// Increment added to the slot
        delta: i16,
    },
    /// Constant pool index (`ldc`, field and method references, class operands)
    ConstantPool(u16),
    /// `multianewarray` class index and dimension count
    MultiNewArray {
        /// Constant pool index of the array class
        index: u16,
        /// Number of dimensions popped
        dimensions: u8,
    },
    /// Absolute branch target
    Branch(u32),
    /// Switch table; `tableswitch` is normalized to explicit `(key, target)` pairs
    Switch {
        /// Target taken when no key matches
        default: u32,
        /// Match keys and their targets, in table order
        cases: Vec<(i32, u32)>,
    },
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first byte of this instruction (the `wide` prefix, if any)
    pub bci: u32,
    /// Opcode, never [`Opcode::Wide`]
    pub opcode: Opcode,
    /// `true` if the instruction was prefixed by `wide`
    pub wide: bool,
    /// Encoded length in bytes, including prefix and switch padding
    pub len: u32,
    /// Decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Offset of the instruction that follows this one.
    #[must_use]
    pub fn next_bci(&self) -> u32 {
        self.bci + self.len
    }

    /// Classifies the control-flow behavior of this instruction.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        match self.opcode {
            op if op.is_conditional_branch() => FlowType::ConditionalBranch,
            op if op.is_return() => FlowType::Return,
            Opcode::Goto | Opcode::GotoW => FlowType::UnconditionalBranch,
            Opcode::Tableswitch | Opcode::Lookupswitch => FlowType::Switch,
            Opcode::Athrow => FlowType::Throw,
            Opcode::Jsr | Opcode::JsrW | Opcode::Ret => FlowType::Subroutine,
            _ => FlowType::Sequential,
        }
    }

    /// Returns `true` if this instruction ends a basic block.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        self.flow() != FlowType::Sequential
    }

    /// The explicit jump target of a branch instruction.
    #[must_use]
    pub fn branch_target(&self) -> Option<u32> {
        match self.operand {
            Operand::Branch(target) => Some(target),
            _ => None,
        }
    }

    /// All explicit targets, in successor order: switch cases first, then the default.
    ///
    /// Fall-through successors are not included.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::Switch { default, cases } => cases
                .iter()
                .map(|&(_, target)| target)
                .chain(std::iter::once(*default))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The local variable slot operand, including the implicit slot of `xload_<n>` and
    /// `xstore_<n>` forms.
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        use Opcode::*;
        let implicit = match self.opcode {
            Iload0 | Lload0 | Fload0 | Dload0 | Aload0 | Istore0 | Lstore0 | Fstore0 | Dstore0
            | Astore0 => Some(0),
            Iload1 | Lload1 | Fload1 | Dload1 | Aload1 | Istore1 | Lstore1 | Fstore1 | Dstore1
            | Astore1 => Some(1),
            Iload2 | Lload2 | Fload2 | Dload2 | Aload2 | Istore2 | Lstore2 | Fstore2 | Dstore2
            | Astore2 => Some(2),
            Iload3 | Lload3 | Fload3 | Dload3 | Aload3 | Istore3 | Lstore3 | Fstore3 | Dstore3
            | Astore3 => Some(3),
            _ => None,
        };
        implicit.or(match self.operand {
            Operand::Local(index) | Operand::Iinc { index, .. } => Some(index),
            _ => None,
        })
    }

    /// The constant pool index operand, if any.
    #[must_use]
    pub fn cp_index(&self) -> Option<u16> {
        match self.operand {
            Operand::ConstantPool(index) | Operand::MultiNewArray { index, .. } => Some(index),
            _ => None,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>5}: ", self.bci)?;
        if self.wide {
            write!(f, "wide ")?;
        }
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int(v) => write!(f, " {v}"),
            Operand::Local(index) => write!(f, " {index}"),
            Operand::Iinc { index, delta } => write!(f, " {index} {delta}"),
            Operand::ConstantPool(index) => write!(f, " #{index}"),
            Operand::MultiNewArray { index, dimensions } => write!(f, " #{index} {dimensions}"),
            Operand::Branch(target) => write!(f, " {target}"),
            Operand::Switch { default, cases } => {
                write!(f, " {{")?;
                for (key, target) in cases {
                    write!(f, " {key}: {target};")?;
                }
                write!(f, " default: {default} }}")
            }
        }
    }
}
