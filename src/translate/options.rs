//! Translator configuration
//!
//! The knobs here never change the meaning of the produced IR. They select which
//! analyses run and how much self-checking the translator does, plus the call-site patch
//! sizes handed through to the code generator.

/// Patch area reserved for a statically bound call on x86-64.
pub const DIRECT_CALL_PATCH_BYTES: u32 = 5;

/// Patch area reserved for an inline-cache call on x86-64.
pub const DYNAMIC_CALL_PATCH_BYTES: u32 = 15;

/// Configuration for a translation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct TranslatorOptions {
    /// Compute local liveness from bytecode when the method source has none
    /// Dead locals are dropped at block entry, which avoids useless phis
    pub use_liveness: bool,

    /// Check every block's entry stack depth against the reference analysis
    pub verify_stack_depths: bool,

    /// Run the IR verifier on the finished function
    pub verify_ir: bool,

    /// Patch bytes recorded on direct calls (default: 5)
    pub direct_call_patch_bytes: u32,

    /// Patch bytes recorded on dynamically dispatched calls (default: 15)
    pub dynamic_call_patch_bytes: u32,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self::production()
    }
}

impl TranslatorOptions {
    /// Options for compiling in a running system
    ///
    /// Liveness pruning on, self-checks off.
    #[must_use]
    pub fn production() -> Self {
        Self {
            use_liveness: true,
            verify_stack_depths: false,
            verify_ir: false,
            direct_call_patch_bytes: DIRECT_CALL_PATCH_BYTES,
            dynamic_call_patch_bytes: DYNAMIC_CALL_PATCH_BYTES,
        }
    }

    /// Options with every self-check enabled, for tests and fuzzing
    #[must_use]
    pub fn strict() -> Self {
        Self {
            verify_stack_depths: true,
            verify_ir: true,
            ..Self::production()
        }
    }

    /// Sets [`TranslatorOptions::use_liveness`].
    #[must_use]
    pub fn with_liveness(mut self, enabled: bool) -> Self {
        self.use_liveness = enabled;
        self
    }

    /// Sets both call patch sizes.
    #[must_use]
    pub fn with_patch_bytes(mut self, direct: u32, dynamic: u32) -> Self {
        self.direct_call_patch_bytes = direct;
        self.dynamic_call_patch_bytes = dynamic;
        self
    }
}
