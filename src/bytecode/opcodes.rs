//! The JVM opcode table.
//!
//! Every opcode defined by the class file format (`0x00..=0xc9`) has a variant. The
//! [`Display`](std::fmt::Display) form is the mnemonic used in disassembly listings,
//! e.g. `iload_0` or `dup2_x1`.

use strum::{Display, FromRepr, IntoStaticStr};

/// A single-byte JVM opcode.
///
/// # Examples
///
/// ```rust
/// use stacklift::bytecode::Opcode;
///
/// let op = Opcode::from_repr(0x5a).unwrap();
/// assert_eq!(op, Opcode::DupX1);
/// assert_eq!(op.to_string(), "dup_x1");
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromRepr, IntoStaticStr, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    AconstNull = 0x01,
    #[strum(serialize = "iconst_m1")]
    IconstM1 = 0x02,
    #[strum(serialize = "iconst_0")]
    Iconst0 = 0x03,
    #[strum(serialize = "iconst_1")]
    Iconst1 = 0x04,
    #[strum(serialize = "iconst_2")]
    Iconst2 = 0x05,
    #[strum(serialize = "iconst_3")]
    Iconst3 = 0x06,
    #[strum(serialize = "iconst_4")]
    Iconst4 = 0x07,
    #[strum(serialize = "iconst_5")]
    Iconst5 = 0x08,
    #[strum(serialize = "lconst_0")]
    Lconst0 = 0x09,
    #[strum(serialize = "lconst_1")]
    Lconst1 = 0x0a,
    #[strum(serialize = "fconst_0")]
    Fconst0 = 0x0b,
    #[strum(serialize = "fconst_1")]
    Fconst1 = 0x0c,
    #[strum(serialize = "fconst_2")]
    Fconst2 = 0x0d,
    #[strum(serialize = "dconst_0")]
    Dconst0 = 0x0e,
    #[strum(serialize = "dconst_1")]
    Dconst1 = 0x0f,
    Bipush = 0x10,
    Sipush = 0x11,
    Ldc = 0x12,
    LdcW = 0x13,
    #[strum(serialize = "ldc2_w")]
    Ldc2W = 0x14,

    Iload = 0x15,
    Lload = 0x16,
    Fload = 0x17,
    Dload = 0x18,
    Aload = 0x19,
    #[strum(serialize = "iload_0")]
    Iload0 = 0x1a,
    #[strum(serialize = "iload_1")]
    Iload1 = 0x1b,
    #[strum(serialize = "iload_2")]
    Iload2 = 0x1c,
    #[strum(serialize = "iload_3")]
    Iload3 = 0x1d,
    #[strum(serialize = "lload_0")]
    Lload0 = 0x1e,
    #[strum(serialize = "lload_1")]
    Lload1 = 0x1f,
    #[strum(serialize = "lload_2")]
    Lload2 = 0x20,
    #[strum(serialize = "lload_3")]
    Lload3 = 0x21,
    #[strum(serialize = "fload_0")]
    Fload0 = 0x22,
    #[strum(serialize = "fload_1")]
    Fload1 = 0x23,
    #[strum(serialize = "fload_2")]
    Fload2 = 0x24,
    #[strum(serialize = "fload_3")]
    Fload3 = 0x25,
    #[strum(serialize = "dload_0")]
    Dload0 = 0x26,
    #[strum(serialize = "dload_1")]
    Dload1 = 0x27,
    #[strum(serialize = "dload_2")]
    Dload2 = 0x28,
    #[strum(serialize = "dload_3")]
    Dload3 = 0x29,
    #[strum(serialize = "aload_0")]
    Aload0 = 0x2a,
    #[strum(serialize = "aload_1")]
    Aload1 = 0x2b,
    #[strum(serialize = "aload_2")]
    Aload2 = 0x2c,
    #[strum(serialize = "aload_3")]
    Aload3 = 0x2d,
    Iaload = 0x2e,
    Laload = 0x2f,
    Faload = 0x30,
    Daload = 0x31,
    Aaload = 0x32,
    Baload = 0x33,
    Caload = 0x34,
    Saload = 0x35,

    Istore = 0x36,
    Lstore = 0x37,
    Fstore = 0x38,
    Dstore = 0x39,
    Astore = 0x3a,
    #[strum(serialize = "istore_0")]
    Istore0 = 0x3b,
    #[strum(serialize = "istore_1")]
    Istore1 = 0x3c,
    #[strum(serialize = "istore_2")]
    Istore2 = 0x3d,
    #[strum(serialize = "istore_3")]
    Istore3 = 0x3e,
    #[strum(serialize = "lstore_0")]
    Lstore0 = 0x3f,
    #[strum(serialize = "lstore_1")]
    Lstore1 = 0x40,
    #[strum(serialize = "lstore_2")]
    Lstore2 = 0x41,
    #[strum(serialize = "lstore_3")]
    Lstore3 = 0x42,
    #[strum(serialize = "fstore_0")]
    Fstore0 = 0x43,
    #[strum(serialize = "fstore_1")]
    Fstore1 = 0x44,
    #[strum(serialize = "fstore_2")]
    Fstore2 = 0x45,
    #[strum(serialize = "fstore_3")]
    Fstore3 = 0x46,
    #[strum(serialize = "dstore_0")]
    Dstore0 = 0x47,
    #[strum(serialize = "dstore_1")]
    Dstore1 = 0x48,
    #[strum(serialize = "dstore_2")]
    Dstore2 = 0x49,
    #[strum(serialize = "dstore_3")]
    Dstore3 = 0x4a,
    #[strum(serialize = "astore_0")]
    Astore0 = 0x4b,
    #[strum(serialize = "astore_1")]
    Astore1 = 0x4c,
    #[strum(serialize = "astore_2")]
    Astore2 = 0x4d,
    #[strum(serialize = "astore_3")]
    Astore3 = 0x4e,
    Iastore = 0x4f,
    Lastore = 0x50,
    Fastore = 0x51,
    Dastore = 0x52,
    Aastore = 0x53,
    Bastore = 0x54,
    Castore = 0x55,
    Sastore = 0x56,

    Pop = 0x57,
    Pop2 = 0x58,
    Dup = 0x59,
    #[strum(serialize = "dup_x1")]
    DupX1 = 0x5a,
    #[strum(serialize = "dup_x2")]
    DupX2 = 0x5b,
    Dup2 = 0x5c,
    #[strum(serialize = "dup2_x1")]
    Dup2X1 = 0x5d,
    #[strum(serialize = "dup2_x2")]
    Dup2X2 = 0x5e,
    Swap = 0x5f,

    Iadd = 0x60,
    Ladd = 0x61,
    Fadd = 0x62,
    Dadd = 0x63,
    Isub = 0x64,
    Lsub = 0x65,
    Fsub = 0x66,
    Dsub = 0x67,
    Imul = 0x68,
    Lmul = 0x69,
    Fmul = 0x6a,
    Dmul = 0x6b,
    Idiv = 0x6c,
    Ldiv = 0x6d,
    Fdiv = 0x6e,
    Ddiv = 0x6f,
    Irem = 0x70,
    Lrem = 0x71,
    Frem = 0x72,
    Drem = 0x73,
    Ineg = 0x74,
    Lneg = 0x75,
    Fneg = 0x76,
    Dneg = 0x77,
    Ishl = 0x78,
    Lshl = 0x79,
    Ishr = 0x7a,
    Lshr = 0x7b,
    Iushr = 0x7c,
    Lushr = 0x7d,
    Iand = 0x7e,
    Land = 0x7f,
    Ior = 0x80,
    Lor = 0x81,
    Ixor = 0x82,
    Lxor = 0x83,
    Iinc = 0x84,

    #[strum(serialize = "i2l")]
    I2l = 0x85,
    #[strum(serialize = "i2f")]
    I2f = 0x86,
    #[strum(serialize = "i2d")]
    I2d = 0x87,
    #[strum(serialize = "l2i")]
    L2i = 0x88,
    #[strum(serialize = "l2f")]
    L2f = 0x89,
    #[strum(serialize = "l2d")]
    L2d = 0x8a,
    #[strum(serialize = "f2i")]
    F2i = 0x8b,
    #[strum(serialize = "f2l")]
    F2l = 0x8c,
    #[strum(serialize = "f2d")]
    F2d = 0x8d,
    #[strum(serialize = "d2i")]
    D2i = 0x8e,
    #[strum(serialize = "d2l")]
    D2l = 0x8f,
    #[strum(serialize = "d2f")]
    D2f = 0x90,
    #[strum(serialize = "i2b")]
    I2b = 0x91,
    #[strum(serialize = "i2c")]
    I2c = 0x92,
    #[strum(serialize = "i2s")]
    I2s = 0x93,

    Lcmp = 0x94,
    Fcmpl = 0x95,
    Fcmpg = 0x96,
    Dcmpl = 0x97,
    Dcmpg = 0x98,
    Ifeq = 0x99,
    Ifne = 0x9a,
    Iflt = 0x9b,
    Ifge = 0x9c,
    Ifgt = 0x9d,
    Ifle = 0x9e,
    IfIcmpeq = 0x9f,
    IfIcmpne = 0xa0,
    IfIcmplt = 0xa1,
    IfIcmpge = 0xa2,
    IfIcmpgt = 0xa3,
    IfIcmple = 0xa4,
    IfAcmpeq = 0xa5,
    IfAcmpne = 0xa6,

    Goto = 0xa7,
    Jsr = 0xa8,
    Ret = 0xa9,
    Tableswitch = 0xaa,
    Lookupswitch = 0xab,
    Ireturn = 0xac,
    Lreturn = 0xad,
    Freturn = 0xae,
    Dreturn = 0xaf,
    Areturn = 0xb0,
    Return = 0xb1,

    Getstatic = 0xb2,
    Putstatic = 0xb3,
    Getfield = 0xb4,
    Putfield = 0xb5,
    Invokevirtual = 0xb6,
    Invokespecial = 0xb7,
    Invokestatic = 0xb8,
    Invokeinterface = 0xb9,
    Invokedynamic = 0xba,
    New = 0xbb,
    Newarray = 0xbc,
    Anewarray = 0xbd,
    Arraylength = 0xbe,
    Athrow = 0xbf,
    Checkcast = 0xc0,
    Instanceof = 0xc1,
    Monitorenter = 0xc2,
    Monitorexit = 0xc3,

    Wide = 0xc4,
    Multianewarray = 0xc5,
    Ifnull = 0xc6,
    Ifnonnull = 0xc7,
    GotoW = 0xc8,
    JsrW = 0xc9,
}

impl Opcode {
    /// Returns the mnemonic of this opcode.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for the two-way compare-and-branch family, including the reference
    /// and null compares.
    #[must_use]
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Opcode::Ifeq
                | Opcode::Ifne
                | Opcode::Iflt
                | Opcode::Ifge
                | Opcode::Ifgt
                | Opcode::Ifle
                | Opcode::IfIcmpeq
                | Opcode::IfIcmpne
                | Opcode::IfIcmplt
                | Opcode::IfIcmpge
                | Opcode::IfIcmpgt
                | Opcode::IfIcmple
                | Opcode::IfAcmpeq
                | Opcode::IfAcmpne
                | Opcode::Ifnull
                | Opcode::Ifnonnull
        )
    }

    /// Returns `true` for opcodes that return from the method.
    #[must_use]
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Opcode::Ireturn
                | Opcode::Lreturn
                | Opcode::Freturn
                | Opcode::Dreturn
                | Opcode::Areturn
                | Opcode::Return
        )
    }

    /// Returns `true` if a `wide` prefix may precede this opcode.
    #[must_use]
    pub fn accepts_wide(self) -> bool {
        matches!(
            self,
            Opcode::Iload
                | Opcode::Lload
                | Opcode::Fload
                | Opcode::Dload
                | Opcode::Aload
                | Opcode::Istore
                | Opcode::Lstore
                | Opcode::Fstore
                | Opcode::Dstore
                | Opcode::Astore
                | Opcode::Ret
                | Opcode::Iinc
        )
    }
}
