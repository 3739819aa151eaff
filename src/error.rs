use thiserror::Error;

use crate::metadata::token::Token;

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

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two groups. Shape errors (`Malformed`, `GraphError`, `StackImbalance`)
/// describe a method body or block graph that cannot be processed safely; the engine catches
/// them at method granularity and keeps the original body. Builder errors (`InvalidBranch`,
/// `InvalidMnemonic`, `DuplicateLabel`, `UndefinedLabel`) come from
/// [`crate::assembly::BodyAssembler`] when a body is assembled by hand.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::{assembly::BodyAssembler, Error};
///
/// let mut asm = BodyAssembler::new();
/// asm.emit_branch("br", "missing").unwrap();
/// match asm.finalize() {
///     Err(Error::UndefinedLabel(name)) => assert_eq!(name, "missing"),
///     other => panic!("unexpected result: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is damaged and could not be processed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A block graph operation failed or an invariant of the graph was violated.
    #[error("{0}")]
    GraphError(String),

    /// The evaluation stack is inconsistent at some point of the method body.
    ///
    /// Raised by [`crate::metadata::method::MethodBody::compute_max_stack`] on underflow or
    /// when two control-flow paths join with different stack depths.
    #[error("Stack imbalance at instruction {index}: {message}")]
    StackImbalance {
        /// Index of the offending instruction in the body
        index: usize,
        /// Description of the imbalance
        message: String,
    },

    /// The mnemonic passed to the assembler is not a known opcode.
    #[error("Unknown instruction mnemonic - {0}")]
    InvalidMnemonic(String),

    /// A branch was emitted with an instruction that is not a branch, or with a bad target.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A label was defined twice.
    #[error("Label defined more than once - {0}")]
    DuplicateLabel(String),

    /// A branch or handler region references a label that was never defined.
    #[error("Label is not defined - {0}")]
    UndefinedLabel(String),

    /// The method has no body to work on.
    #[error("Method has no body - {0}")]
    NoBody(Token),

    /// Failed to lock target.
    ///
    /// This error occurs when a method body lock was poisoned by a panicking writer.
    #[error("Failed to lock target")]
    LockError,
}
