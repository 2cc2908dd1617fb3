//! An in-memory [`MethodSource`].

use std::collections::HashMap;

use crate::{
    method::{ConstantValue, FieldRef, MethodRef, MethodSource, Signature},
    utils::BitSet,
    Result,
};

/// A self-contained method: bytecode, limits, signature and a sparse constant pool.
///
/// Built with chained `with_*` calls. `max_locals` defaults to the slots needed for the
/// arguments (plus the receiver) and `max_stack` to zero, so most callers set both.
///
/// # Examples
///
/// ```rust
/// use stacklift::bytecode::Assembler;
/// use stacklift::method::MethodBody;
///
/// let mut asm = Assembler::new();
/// asm.iload(0)?.iload(1)?.iadd()?.ireturn()?;
///
/// let method = MethodBody::new("Calc", "add", "(II)I")?
///     .with_static(true)
///     .with_code(asm.finish()?)
///     .with_max_stack(2);
/// # Ok::<(), stacklift::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MethodBody {
    holder: String,
    name: String,
    signature: Signature,
    is_static: bool,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: Option<u16>,
    constants: HashMap<u16, ConstantValue>,
    methods: HashMap<u16, MethodRef>,
    fields: HashMap<u16, FieldRef>,
    block_starts: Option<Vec<u32>>,
    liveness: Option<HashMap<u32, BitSet>>,
}

impl MethodBody {
    /// Creates an instance method with empty code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `descriptor` does not parse.
    pub fn new(holder: &str, name: &str, descriptor: &str) -> Result<Self> {
        Ok(Self {
            holder: holder.to_string(),
            name: name.to_string(),
            signature: Signature::parse(descriptor)?,
            is_static: false,
            code: Vec::new(),
            max_stack: 0,
            max_locals: None,
            constants: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            block_starts: None,
            liveness: None,
        })
    }

    /// Marks the method static or instance.
    #[must_use]
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Sets the bytecode.
    #[must_use]
    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Sets the declared operand-stack limit.
    #[must_use]
    pub fn with_max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Sets the declared locals count.
    #[must_use]
    pub fn with_max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = Some(max_locals);
        self
    }

    /// Adds a loadable constant at `index`.
    #[must_use]
    pub fn with_constant(mut self, index: u16, value: ConstantValue) -> Self {
        self.constants.insert(index, value);
        self
    }

    /// Adds a method reference at `index`.
    #[must_use]
    pub fn with_method(mut self, index: u16, method: MethodRef) -> Self {
        self.methods.insert(index, method);
        self
    }

    /// Adds a field reference at `index`.
    #[must_use]
    pub fn with_field(mut self, index: u16, field: FieldRef) -> Self {
        self.fields.insert(index, field);
        self
    }

    /// Supplies precomputed block start offsets.
    #[must_use]
    pub fn with_block_starts(mut self, starts: Vec<u32>) -> Self {
        self.block_starts = Some(starts);
        self
    }

    /// Supplies live locals for the block starting at `bci`.
    #[must_use]
    pub fn with_live_locals(mut self, bci: u32, live: BitSet) -> Self {
        self.liveness.get_or_insert_with(HashMap::new).insert(bci, live);
        self
    }

    fn receiver_slots(&self) -> usize {
        usize::from(!self.is_static)
    }
}

impl MethodSource for MethodBody {
    fn name(&self) -> &str {
        &self.name
    }

    fn holder(&self) -> &str {
        &self.holder
    }

    fn code(&self) -> &[u8] {
        &self.code
    }

    fn max_stack(&self) -> u16 {
        self.max_stack
    }

    fn max_locals(&self) -> u16 {
        self.max_locals.unwrap_or_else(|| {
            let slots = self.signature.param_slots() + self.receiver_slots();
            u16::try_from(slots).unwrap_or(u16::MAX)
        })
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn block_starts(&self) -> Option<Vec<u32>> {
        self.block_starts.clone()
    }

    fn live_locals(&self, bci: u32) -> Option<BitSet> {
        self.liveness.as_ref()?.get(&bci).cloned()
    }

    fn constant(&self, index: u16) -> Result<ConstantValue> {
        self.constants
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("no loadable constant at index {}", index))
    }

    fn method_ref(&self, index: u16) -> Result<MethodRef> {
        self.methods
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("no method reference at index {}", index))
    }

    fn field_ref(&self, index: u16) -> Result<FieldRef> {
        self.fields
            .get(&index)
            .cloned()
            .ok_or_else(|| malformed_error!("no field reference at index {}", index))
    }
}
