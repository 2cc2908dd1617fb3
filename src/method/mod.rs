//! Method metadata consumed by the translator.
//!
//! - `types` - declared types, value kinds and descriptor parsing
//! - `source` - the [`MethodSource`] trait and resolved constant pool entries
//! - `body` - [`MethodBody`], an in-memory [`MethodSource`]

mod body;
mod source;
mod types;

pub use body::MethodBody;
pub use source::{ConstantValue, FieldRef, MethodRef, MethodSource, ObjectHandle};
pub use types::{BasicType, Signature, ValueKind};
