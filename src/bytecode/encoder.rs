//! A label-resolving bytecode assembler.
//!
//! [`Assembler`] produces raw JVM bytecode from fluent method calls. Branches refer to
//! named labels that may be defined before or after the branch; all references are
//! resolved in [`Assembler::finish`]. Local loads and stores pick the shortest encoding
//! (`iload_1`, `iload 7`, `wide iload 300`) automatically.
//!
//! # Usage Examples
//!
//! ```rust
//! use stacklift::bytecode::{Assembler, Opcode};
//!
//! // int countdown(int n) { while (n > 0) n--; return n; }
//! let mut asm = Assembler::new();
//! asm.label("head")?
//!     .iload(0)?
//!     .branch(Opcode::Ifle, "done")?
//!     .iinc(0, -1)?
//!     .goto("head")?
//!     .label("done")?
//!     .iload(0)?
//!     .ireturn()?;
//!
//! let code = asm.finish()?;
//! assert_eq!(code[1], Opcode::Ifle as u8);
//! # Ok::<(), stacklift::Error>(())
//! ```

use std::collections::HashMap;

use crate::{bytecode::Opcode, method::ValueKind, Error, Result};

/// A pending reference from an encoded offset field to a label.
#[derive(Debug, Clone)]
struct Fixup {
    label: String,
    /// Position of the offset field in the code buffer
    at: usize,
    /// Offset of the referring instruction; offsets are relative to it
    origin: u32,
    /// Width of the offset field: 2 or 4 bytes
    size: u8,
}

/// Fluent JVM bytecode assembler.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<Fixup>,
}

macro_rules! simple_ops {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            #[doc = concat!("Emits `", stringify!($name), "`.")]
            ///
            /// # Errors
            ///
            /// Never fails; returns `Result` for chaining.
            pub fn $name(&mut self) -> Result<&mut Self> {
                self.emit(Opcode::$op)
            }
        )*
    };
}

macro_rules! indexed_ops {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            #[doc = concat!("Emits `", stringify!($name), "` with a constant pool index.")]
            ///
            /// # Errors
            ///
            /// Never fails; returns `Result` for chaining.
            pub fn $name(&mut self, index: u16) -> Result<&mut Self> {
                self.with_index(Opcode::$op, index)
            }
        )*
    };
}

macro_rules! local_ops {
    ($($name:ident => ($load:expr, $kind:ident)),* $(,)?) => {
        $(
            #[doc = concat!("Emits the shortest `", stringify!($name), "` form for `index`.")]
            ///
            /// # Errors
            ///
            /// Never fails; returns `Result` for chaining.
            pub fn $name(&mut self, index: u16) -> Result<&mut Self> {
                if $load {
                    self.load(ValueKind::$kind, index)
                } else {
                    self.store(ValueKind::$kind, index)
                }
            }
        )*
    };
}

impl Assembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset at which the next instruction will be placed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] once the code no longer fits a 32-bit offset.
    pub fn position(&self) -> Result<u32> {
        u32::try_from(self.code.len()).map_err(|_| malformed_error!("method body too large"))
    }

    /// Emits an opcode that takes no operands.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `op` requires operands; use the dedicated method for
    /// those.
    pub fn emit(&mut self, op: Opcode) -> Result<&mut Self> {
        if has_operands(op) {
            return Err(malformed_error!("'{}' requires operands", op));
        }
        self.code.push(op as u8);
        Ok(self)
    }

    simple_ops! {
        nop => Nop, aconst_null => AconstNull,
        iadd => Iadd, ladd => Ladd, fadd => Fadd, dadd => Dadd,
        isub => Isub, lsub => Lsub, fsub => Fsub, dsub => Dsub,
        imul => Imul, lmul => Lmul, fmul => Fmul, dmul => Dmul,
        idiv => Idiv, ldiv => Ldiv, fdiv => Fdiv, ddiv => Ddiv,
        irem => Irem, lrem => Lrem, frem => Frem, drem => Drem,
        ineg => Ineg, lneg => Lneg, fneg => Fneg, dneg => Dneg,
        ishl => Ishl, lshl => Lshl, ishr => Ishr, lshr => Lshr, iushr => Iushr, lushr => Lushr,
        iand => Iand, land => Land, ior => Ior, lor => Lor, ixor => Ixor, lxor => Lxor,
        i2l => I2l, l2i => L2i, i2d => I2d, lcmp => Lcmp,
        pop => Pop, pop2 => Pop2, dup => Dup, dup_x1 => DupX1, dup_x2 => DupX2,
        dup2 => Dup2, dup2_x1 => Dup2X1, dup2_x2 => Dup2X2, swap => Swap,
        ireturn => Ireturn, lreturn => Lreturn, freturn => Freturn, dreturn => Dreturn,
        areturn => Areturn, return_void => Return, athrow => Athrow,
    }

    indexed_ops! {
        getstatic => Getstatic, putstatic => Putstatic,
        getfield => Getfield, putfield => Putfield,
        invokevirtual => Invokevirtual, invokespecial => Invokespecial,
        invokestatic => Invokestatic, instanceof => Instanceof,
        checkcast => Checkcast, new_object => New, ldc2_w => Ldc2W,
    }

    local_ops! {
        iload => (true, Int), lload => (true, Long), fload => (true, Float),
        dload => (true, Double), aload => (true, Object),
        istore => (false, Int), lstore => (false, Long), fstore => (false, Float),
        dstore => (false, Double), astore => (false, Object),
    }

    /// Pushes an `int` constant using `iconst_<n>`, `bipush` or `sipush`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `value` does not fit a signed 16-bit immediate;
    /// such constants must come from the constant pool via [`Assembler::ldc`].
    pub fn iconst(&mut self, value: i32) -> Result<&mut Self> {
        match value {
            -1..=5 => {
                let op = match value {
                    -1 => Opcode::IconstM1,
                    0 => Opcode::Iconst0,
                    1 => Opcode::Iconst1,
                    2 => Opcode::Iconst2,
                    3 => Opcode::Iconst3,
                    4 => Opcode::Iconst4,
                    _ => Opcode::Iconst5,
                };
                self.emit(op)
            }
            v if i8::try_from(v).is_ok() => {
                self.code.push(Opcode::Bipush as u8);
                self.code.extend_from_slice(&(v as i8).to_be_bytes());
                Ok(self)
            }
            v => {
                let short = i16::try_from(v)
                    .map_err(|_| malformed_error!("int constant {} needs the constant pool", v))?;
                self.code.push(Opcode::Sipush as u8);
                self.code.extend_from_slice(&short.to_be_bytes());
                Ok(self)
            }
        }
    }

    /// Pushes `0L` or `1L`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for any other value.
    pub fn lconst(&mut self, value: i64) -> Result<&mut Self> {
        match value {
            0 => self.emit(Opcode::Lconst0),
            1 => self.emit(Opcode::Lconst1),
            v => Err(malformed_error!("long constant {} needs the constant pool", v)),
        }
    }

    /// Pushes `0.0f`, `1.0f` or `2.0f`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for any other value.
    pub fn fconst(&mut self, value: f32) -> Result<&mut Self> {
        if value == 0.0 && value.is_sign_positive() {
            self.emit(Opcode::Fconst0)
        } else if value == 1.0 {
            self.emit(Opcode::Fconst1)
        } else if value == 2.0 {
            self.emit(Opcode::Fconst2)
        } else {
            Err(malformed_error!("float constant {} needs the constant pool", value))
        }
    }

    /// Pushes `0.0` or `1.0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for any other value.
    pub fn dconst(&mut self, value: f64) -> Result<&mut Self> {
        if value == 0.0 && value.is_sign_positive() {
            self.emit(Opcode::Dconst0)
        } else if value == 1.0 {
            self.emit(Opcode::Dconst1)
        } else {
            Err(malformed_error!("double constant {} needs the constant pool", value))
        }
    }

    /// Loads a one-slot constant, choosing `ldc` or `ldc_w` by index.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn ldc(&mut self, index: u16) -> Result<&mut Self> {
        match u8::try_from(index) {
            Ok(short) => {
                self.code.push(Opcode::Ldc as u8);
                self.code.push(short);
                Ok(self)
            }
            Err(_) => self.with_index(Opcode::LdcW, index),
        }
    }

    /// Emits the typed load of local `index` for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for [`ValueKind::Void`].
    pub fn load(&mut self, kind: ValueKind, index: u16) -> Result<&mut Self> {
        let (long_form, short_base) = match kind {
            ValueKind::Int => (Opcode::Iload, Opcode::Iload0),
            ValueKind::Long => (Opcode::Lload, Opcode::Lload0),
            ValueKind::Float => (Opcode::Fload, Opcode::Fload0),
            ValueKind::Double => (Opcode::Dload, Opcode::Dload0),
            ValueKind::Object => (Opcode::Aload, Opcode::Aload0),
            ValueKind::Void => return Err(malformed_error!("cannot load a void local")),
        };
        self.local_access(long_form, short_base, index)
    }

    /// Emits the typed store to local `index` for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for [`ValueKind::Void`].
    pub fn store(&mut self, kind: ValueKind, index: u16) -> Result<&mut Self> {
        let (long_form, short_base) = match kind {
            ValueKind::Int => (Opcode::Istore, Opcode::Istore0),
            ValueKind::Long => (Opcode::Lstore, Opcode::Lstore0),
            ValueKind::Float => (Opcode::Fstore, Opcode::Fstore0),
            ValueKind::Double => (Opcode::Dstore, Opcode::Dstore0),
            ValueKind::Object => (Opcode::Astore, Opcode::Astore0),
            ValueKind::Void => return Err(malformed_error!("cannot store a void local")),
        };
        self.local_access(long_form, short_base, index)
    }

    fn local_access(&mut self, long_form: Opcode, short_base: Opcode, index: u16) -> Result<&mut Self> {
        if index < 4 {
            // the four short forms of each family are consecutive opcodes
            self.code.push(short_base as u8 + index as u8);
        } else if let Ok(narrow) = u8::try_from(index) {
            self.code.push(long_form as u8);
            self.code.push(narrow);
        } else {
            self.code.push(Opcode::Wide as u8);
            self.code.push(long_form as u8);
            self.code.extend_from_slice(&index.to_be_bytes());
        }
        Ok(self)
    }

    /// Emits `iinc`, widening when the slot or increment does not fit a byte.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn iinc(&mut self, index: u16, delta: i16) -> Result<&mut Self> {
        match (u8::try_from(index), i8::try_from(delta)) {
            (Ok(narrow), Ok(small)) => {
                self.code.push(Opcode::Iinc as u8);
                self.code.push(narrow);
                self.code.extend_from_slice(&small.to_be_bytes());
            }
            _ => {
                self.code.push(Opcode::Wide as u8);
                self.code.push(Opcode::Iinc as u8);
                self.code.extend_from_slice(&index.to_be_bytes());
                self.code.extend_from_slice(&delta.to_be_bytes());
            }
        }
        Ok(self)
    }

    /// Emits an instruction whose only operand is a two-byte constant pool index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `op` does not take a constant pool index.
    pub fn with_index(&mut self, op: Opcode, index: u16) -> Result<&mut Self> {
        match op {
            Opcode::LdcW
            | Opcode::Ldc2W
            | Opcode::Getstatic
            | Opcode::Putstatic
            | Opcode::Getfield
            | Opcode::Putfield
            | Opcode::Invokevirtual
            | Opcode::Invokespecial
            | Opcode::Invokestatic
            | Opcode::New
            | Opcode::Anewarray
            | Opcode::Checkcast
            | Opcode::Instanceof => {
                self.code.push(op as u8);
                self.code.extend_from_slice(&index.to_be_bytes());
                Ok(self)
            }
            _ => Err(malformed_error!("'{}' does not take a constant pool index", op)),
        }
    }

    /// Emits `invokeinterface` with its argument slot count.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn invokeinterface(&mut self, index: u16, count: u8) -> Result<&mut Self> {
        self.code.push(Opcode::Invokeinterface as u8);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.code.push(count);
        self.code.push(0);
        Ok(self)
    }

    /// Emits `invokedynamic`.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn invokedynamic(&mut self, index: u16) -> Result<&mut Self> {
        self.code.push(Opcode::Invokedynamic as u8);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.code.extend_from_slice(&[0, 0]);
        Ok(self)
    }

    /// Emits `newarray` with a primitive element type code (`T_INT` is 10).
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn newarray(&mut self, atype: u8) -> Result<&mut Self> {
        self.code.push(Opcode::Newarray as u8);
        self.code.push(atype);
        Ok(self)
    }

    /// Binds `name` to the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if `name` is already bound.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        let here = self.position()?;
        self.labels.insert(name.to_string(), here);
        Ok(self)
    }

    /// Emits a branch instruction targeting `label`.
    ///
    /// `goto_w` and `jsr_w` get four-byte offsets; every other branch gets two.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `op` is not a branch.
    pub fn branch(&mut self, op: Opcode, label: &str) -> Result<&mut Self> {
        let size = match op {
            Opcode::GotoW | Opcode::JsrW => 4,
            Opcode::Goto | Opcode::Jsr => 2,
            op if op.is_conditional_branch() => 2,
            _ => return Err(malformed_error!("'{}' is not a branch instruction", op)),
        };
        let origin = self.position()?;
        self.code.push(op as u8);
        self.fixup(label, origin, size);
        Ok(self)
    }

    /// Emits `goto label`.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn goto(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(Opcode::Goto, label)
    }

    /// Emits `lookupswitch`; `cases` are sorted by key as the format requires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a key appears twice.
    pub fn lookupswitch(&mut self, default: &str, cases: &[(i32, &str)]) -> Result<&mut Self> {
        let mut sorted = cases.to_vec();
        sorted.sort_by_key(|&(key, _)| key);
        if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(malformed_error!("duplicate lookupswitch key"));
        }
        let count = i32::try_from(sorted.len())
            .map_err(|_| malformed_error!("too many lookupswitch cases"))?;

        let origin = self.switch_header(Opcode::Lookupswitch)?;
        self.fixup(default, origin, 4);
        self.code.extend_from_slice(&count.to_be_bytes());
        for (key, label) in sorted {
            self.code.extend_from_slice(&key.to_be_bytes());
            self.fixup(label, origin, 4);
        }
        Ok(self)
    }

    /// Emits `tableswitch` for keys `low..low + targets.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `targets` is empty or the key range overflows.
    pub fn tableswitch(&mut self, low: i32, default: &str, targets: &[&str]) -> Result<&mut Self> {
        let span = i32::try_from(targets.len())
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| malformed_error!("tableswitch needs at least one target"))?;
        let high = low
            .checked_add(span - 1)
            .ok_or_else(|| malformed_error!("tableswitch key range overflows"))?;

        let origin = self.switch_header(Opcode::Tableswitch)?;
        self.fixup(default, origin, 4);
        self.code.extend_from_slice(&low.to_be_bytes());
        self.code.extend_from_slice(&high.to_be_bytes());
        for label in targets {
            self.fixup(label, origin, 4);
        }
        Ok(self)
    }

    fn switch_header(&mut self, op: Opcode) -> Result<u32> {
        let origin = self.position()?;
        self.code.push(op as u8);
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
        Ok(origin)
    }

    /// Records a fixup at the current position and reserves its bytes.
    fn fixup(&mut self, label: &str, origin: u32, size: u8) {
        self.fixups.push(Fixup {
            label: label.to_string(),
            at: self.code.len(),
            origin,
            size,
        });
        self.code.extend(std::iter::repeat_n(0, usize::from(size)));
    }

    /// Resolves every label reference and returns the finished bytecode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] for a reference to an unbound label, or
    /// [`Error::Malformed`] if a two-byte branch cannot reach its target.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;
            let offset = i64::from(target) - i64::from(fixup.origin);

            if fixup.size == 2 {
                let short = i16::try_from(offset).map_err(|_| {
                    malformed_error!("branch to '{}' out of range for a short offset", fixup.label)
                })?;
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&short.to_be_bytes());
            } else {
                let long = i32::try_from(offset)
                    .map_err(|_| malformed_error!("branch to '{}' out of range", fixup.label))?;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&long.to_be_bytes());
            }
        }
        Ok(self.code)
    }
}

/// Returns `true` if `op` is followed by operand bytes.
fn has_operands(op: Opcode) -> bool {
    use Opcode::*;
    op.is_conditional_branch()
        || op.accepts_wide()
        || matches!(
            op,
            Bipush
                | Sipush
                | Ldc
                | LdcW
                | Ldc2W
                | Goto
                | GotoW
                | Jsr
                | JsrW
                | Tableswitch
                | Lookupswitch
                | Getstatic
                | Putstatic
                | Getfield
                | Putfield
                | Invokevirtual
                | Invokespecial
                | Invokestatic
                | Invokeinterface
                | Invokedynamic
                | New
                | Newarray
                | Anewarray
                | Checkcast
                | Instanceof
                | Wide
                | Multianewarray
        )
}
