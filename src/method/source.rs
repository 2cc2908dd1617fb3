//! The input side of translation: method metadata and constant pool resolution.
//!
//! A host runtime implements [`MethodSource`] over its own class and method
//! representations. The crate ships [`crate::method::MethodBody`] as a self-contained
//! implementation for tests, tools and benchmarks.

use crate::{
    method::{BasicType, Signature},
    utils::BitSet,
    Result,
};

/// An opaque reference to a host object, such as a class mirror.
///
/// The translator never dereferences it; it only records it in
/// [`crate::ir::CodeInfo::oop_handles`] so the code installer can patch the real address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

/// A loadable constant resolved from the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// `CONSTANT_Integer`
    Int(i32),
    /// `CONSTANT_Long`
    Long(i64),
    /// `CONSTANT_Float`
    Float(f32),
    /// `CONSTANT_Double`
    Double(f64),
    /// `CONSTANT_String`
    String(String),
    /// `CONSTANT_Class`
    Class(String),
}

impl ConstantValue {
    /// Number of operand-stack slots the constant occupies once loaded.
    #[must_use]
    pub fn slots(&self) -> usize {
        match self {
            ConstantValue::Long(_) | ConstantValue::Double(_) => 2,
            _ => 1,
        }
    }
}

/// A resolved method reference used by the `invoke*` family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Internal name of the declaring class
    pub holder: String,
    /// Method name
    pub name: String,
    /// Declared signature at the call site
    pub signature: Signature,
}

impl MethodRef {
    /// Creates a method reference, parsing `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor does not parse.
    pub fn new(holder: impl Into<String>, name: impl Into<String>, descriptor: &str) -> Result<Self> {
        Ok(Self {
            holder: holder.into(),
            name: name.into(),
            signature: Signature::parse(descriptor)?,
        })
    }
}

impl std::fmt::Display for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.signature)
    }
}

/// A resolved field reference together with the layout facts needed to access it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Internal name of the declaring class
    pub holder: String,
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: BasicType,
    /// Byte offset from the object base, or from the class mirror for statics
    pub offset: i32,
    /// `true` for static fields
    pub is_static: bool,
    /// Class mirror holding the static field storage
    pub holder_mirror: ObjectHandle,
    /// `false` if the reference could not be linked
    pub linked: bool,
    /// `true` for `CallSite.target`, whose reads need special treatment
    pub is_call_site_target: bool,
}

impl FieldRef {
    /// A linked instance field.
    #[must_use]
    pub fn instance(holder: &str, name: &str, ty: BasicType, offset: i32) -> Self {
        Self {
            holder: holder.to_string(),
            name: name.to_string(),
            ty,
            offset,
            is_static: false,
            holder_mirror: ObjectHandle(0),
            linked: true,
            is_call_site_target: false,
        }
    }

    /// A linked static field stored in `mirror`.
    #[must_use]
    pub fn new_static(
        holder: &str,
        name: &str,
        ty: BasicType,
        offset: i32,
        mirror: ObjectHandle,
    ) -> Self {
        Self {
            holder: holder.to_string(),
            name: name.to_string(),
            ty,
            offset,
            is_static: true,
            holder_mirror: mirror,
            linked: true,
            is_call_site_target: false,
        }
    }
}

/// Everything the translator needs to know about one method.
///
/// Implementations must be deterministic: the translator may query the same offset or
/// constant pool index more than once.
pub trait MethodSource {
    /// Method name, e.g. `<init>` or `hashCode`.
    fn name(&self) -> &str;

    /// Internal name of the declaring class.
    fn holder(&self) -> &str;

    /// The raw bytecode.
    fn code(&self) -> &[u8];

    /// Declared maximum operand-stack depth in slots.
    fn max_stack(&self) -> u16;

    /// Declared number of local variable slots, including arguments.
    fn max_locals(&self) -> u16;

    /// `true` for static methods (no receiver in local 0).
    fn is_static(&self) -> bool;

    /// The declared signature.
    fn signature(&self) -> &Signature;

    /// Offsets at which basic blocks begin, if the host has already computed them.
    ///
    /// Returning `None` makes the block graph builder derive them from branch targets.
    fn block_starts(&self) -> Option<Vec<u32>> {
        None
    }

    /// Locals live on entry to the block starting at `bci`, indexed by slot.
    ///
    /// Returning `None` means "no information"; the translator then either computes its
    /// own liveness or keeps every local, depending on
    /// [`crate::TranslatorOptions::use_liveness`].
    fn live_locals(&self, _bci: u32) -> Option<BitSet> {
        None
    }

    /// Resolves the loadable constant at `index`.
    ///
    /// # Errors
    ///
    /// Implementations report a bad index as [`crate::Error::Malformed`].
    fn constant(&self, index: u16) -> Result<ConstantValue>;

    /// Resolves the method reference at `index`.
    ///
    /// # Errors
    ///
    /// Implementations report a bad index as [`crate::Error::Malformed`].
    fn method_ref(&self, index: u16) -> Result<MethodRef>;

    /// Resolves the field reference at `index`.
    ///
    /// # Errors
    ///
    /// Implementations report a bad index as [`crate::Error::Malformed`].
    fn field_ref(&self, index: u16) -> Result<FieldRef>;

    /// `true` if this method is an object initializer (`<init>`).
    fn is_object_initializer(&self) -> bool {
        self.name() == "<init>"
    }
}
