//! # dotscope-cflow Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits.
//! Import it to get quick access to the types needed to build method bodies and run the
//! deobfuscation engine on them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotscope-cflow operations
pub use crate::Error;

/// The result type used throughout dotscope-cflow
pub use crate::Result;

// ================================================================================================
// Engine
// ================================================================================================

pub use crate::deobfuscation::{
    BatchSummary, CflowConfig, CflowDeobfuscator, DeobfuscationState, DeobfuscatorFlags,
    MethodStateFlags,
};

// ================================================================================================
// Metadata
// ================================================================================================

pub use crate::metadata::{
    method::{
        ExceptionHandler, ExceptionHandlerFlags, MethodBody, MethodDef, MethodDefRc, MethodRef,
        MethodResolver, BOOLEAN_TYPE, VOID_TYPE,
    },
    module::Module,
    token::Token,
};

// ================================================================================================
// Instructions and Block Graph
// ================================================================================================

pub use crate::assembly::{BodyAssembler, Immediate, InstrId, Instruction, Opcode, Operand};

pub use crate::analysis::{rebuild, remove_dead_blocks, BlockGraph, BlockId, BlockKind};

// ================================================================================================
// Passes and Events
// ================================================================================================

pub use crate::compiler::{
    BlockPass, CallInliner, ConstantFolder, DerivedStats, EventKind, EventLog, PassContext,
    PassScheduler,
};
