//! Exception handler clauses of CIL method bodies.
//!
//! Boundaries are expressed as [`InstrId`]s instead of byte offsets, so handler clauses stay
//! valid while the instructions they cover are rewritten. End boundaries are exclusive; `None`
//! means the region extends to the end of the body.

use bitflags::bitflags;

use crate::{assembly::InstrId, metadata::token::Token};

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The `catch_type` field contains the metadata token of the exception type
        /// that this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// Uses a filter block to determine whether to handle the exception.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a try block and its handling code within a method.
///
/// # Layout in IL
///
/// ```text
/// try {
///     // try_start .. try_end
/// }
/// filter {
///     // filter_start .. handler_start (filter clauses only)
/// }
/// catch / finally / fault {
///     // handler_start .. handler_end
/// }
/// ```
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the try block.
    pub try_start: InstrId,
    /// First instruction after the try block, `None` if it runs to the end of the body.
    pub try_end: Option<InstrId>,
    /// First instruction of the handler.
    pub handler_start: InstrId,
    /// First instruction after the handler, `None` if it runs to the end of the body.
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter block, for filter clauses.
    pub filter_start: Option<InstrId>,
    /// Caught exception type, for typed clauses.
    pub catch_type: Option<Token>,
}

impl ExceptionHandler {
    /// True if this is a filter clause.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// True if this is a finally or fault clause.
    #[must_use]
    pub fn is_finally_like(&self) -> bool {
        self.flags
            .intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT)
    }

    /// Evaluation stack depth on entry to the handler: the exception object for catch and
    /// filter handlers, nothing for finally and fault handlers.
    #[must_use]
    pub fn handler_entry_depth(&self) -> u16 {
        u16::from(!self.is_finally_like())
    }

    /// All boundary instructions of this clause.
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> + '_ {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
            self.filter_start,
        ]
        .into_iter()
        .flatten()
    }
}
