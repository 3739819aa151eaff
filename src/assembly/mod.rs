//! CIL instruction model and body construction.
//!
//! This module defines the instruction stream the engine operates on:
//!
//! - [`Opcode`] - The full CIL opcode set with operand kinds, flow types and stack effects
//! - [`Instruction`] - One opcode/operand record with a stable [`InstrId`]
//! - [`BodyAssembler`] - Label-based builder producing [`crate::metadata::method::MethodBody`]
//!
//! Method bodies are expected to be decoded elsewhere; the assembler is the in-crate way of
//! producing bodies for tests, benchmarks and synthesized code.

mod assembler;
mod instruction;
mod opcode;

pub use assembler::{ldc_i4, BodyAssembler};
pub use instruction::{
    FieldRef, FlowType, Immediate, InstrId, Instruction, Operand, OperandType, StackBehavior,
};
pub use opcode::{Opcode, FE_PREFIX};
