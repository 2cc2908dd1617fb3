//! Side tables handed to the native code generator together with the IR.

use std::collections::BTreeMap;

use strum::{Display, IntoStaticStr};

use crate::method::{MethodRef, ObjectHandle};

/// How a Java call site is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CallKind {
    /// Statically bound (`invokestatic`, `invokespecial`)
    Direct,
    /// Resolved through an inline cache (`invokevirtual`, `invokeinterface`)
    Dynamic,
}

/// One recorded Java call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteInfo {
    /// Identifier, unique within one compilation; matches the `call_id` of the emitted call
    pub id: u32,
    /// Dispatch kind
    pub kind: CallKind,
    /// Callee as named at the call site
    pub target: MethodRef,
    /// Offset of the invoke instruction
    pub bci: u32,
}

/// Per-compilation metadata produced alongside the IR function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeInfo {
    /// Call sites keyed by call identifier
    pub call_sites: BTreeMap<u32, CallSiteInfo>,
    /// Host object handles keyed by the IR global name that stands for them
    pub oop_handles: BTreeMap<String, ObjectHandle>,
}
