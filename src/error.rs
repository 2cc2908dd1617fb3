use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invariant_error {
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure aborts the translation of the current method only. The partially built IR
/// function is dropped together with the error, so callers never observe half-translated code.
///
/// # Error Categories
///
/// ## Unsupported constructs
/// - [`Error::Unsupported`] - An opcode or feature that is not lowered to IR
///
/// ## Malformed input
/// - [`Error::Malformed`] - Bad bytecode, bad branch targets, empty locals reads
/// - [`Error::MergeFailure`] - Two control-flow paths disagree about the operand stack
/// - [`Error::DuplicateLabel`], [`Error::UndefinedLabel`] - Assembler label misuse
///
/// ## Translator bugs
/// - [`Error::InvariantViolation`] - Stack or locals discipline broken by the translator
///
/// Use [`Error::kind`] to get the coarse classification.
///
/// # Examples
///
/// ```rust
/// use stacklift::{Error, ErrorKind};
///
/// let err = Error::Unsupported { construct: "athrow".into(), bci: Some(7) };
/// assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An instruction or feature that the translator does not lower.
    ///
    /// The method is rejected as a whole. `bci` is the offset of the offending instruction
    /// when one is known.
    #[error("Unsupported construct '{construct}'{}", at_bci(.bci))]
    Unsupported {
        /// Name of the instruction or feature
        construct: String,
        /// Offset of the instruction, if the construct is tied to one
        bci: Option<u32>,
    },

    /// The input is damaged and could not be translated.
    ///
    /// The error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Predecessor states could not be merged at a control-flow join.
    ///
    /// Raised when operand stacks differ in depth or slot types, or when a block that was
    /// already translated is reached again through an edge that is not a loop back-edge.
    #[error("Failed to create phi nodes at bci {bci}: {reason}")]
    MergeFailure {
        /// Start offset of the block whose income failed
        bci: u32,
        /// Why the merge failed
        reason: String,
    },

    /// The translator broke its own operand stack or locals discipline.
    ///
    /// This signals a bug in the translator rather than bad input. It is reported like any
    /// other error so the host can discard the method instead of aborting the process.
    #[error("Invariant violation - {file}:{line}: {message}")]
    InvariantViolation {
        /// Description of the broken invariant
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A label was defined twice in the bytecode assembler.
    #[error("Duplicate label '{0}'")]
    DuplicateLabel(String),

    /// A branch referenced a label that was never defined.
    #[error("Undefined label '{0}'")]
    UndefinedLabel(String),
}

fn at_bci(bci: &Option<u32>) -> String {
    bci.map(|b| format!(" at bci {b}")).unwrap_or_default()
}

/// Coarse classification of an [`Error`].
///
/// Hosts typically only need this to decide whether a failure is worth reporting as a
/// translator bug or simply means "do not compile this method".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Instruction or feature not yet lowered
    UnsupportedConstruct,
    /// Graph or merge inconsistency, bad jump target, bad operands
    MalformedInput,
    /// The translator broke its own stack or locals discipline
    InternalInvariantViolation,
}

impl Error {
    /// Shorthand for an [`Error::Unsupported`] tied to an instruction offset.
    pub(crate) fn unsupported(construct: impl Into<String>, bci: u32) -> Self {
        Error::Unsupported {
            construct: construct.into(),
            bci: Some(bci),
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unsupported { .. } => ErrorKind::UnsupportedConstruct,
            Error::Malformed { .. }
            | Error::MergeFailure { .. }
            | Error::DuplicateLabel(_)
            | Error::UndefinedLabel(_) => ErrorKind::MalformedInput,
            Error::InvariantViolation { .. } => ErrorKind::InternalInvariantViolation,
        }
    }
}
