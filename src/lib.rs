// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dotscope-cflow
//!
//! A control-flow deobfuscation engine for CIL method bodies.
//!
//! Obfuscators for .NET hide a method's real control flow behind constant predicates,
//! forwarding helpers and dead branches. `dotscope-cflow` takes one method at a time, rebuilds
//! its body as a graph of basic blocks, simplifies that graph until nothing changes and writes
//! a consistent body back, with branch forms, exception handler ranges and `max_stack` fixed
//! up.
//!
//! ## Features
//!
//! - **🔍 Block graph** - Basic blocks with explicit edges, handler regions and rebuild
//! - **⚡ Constant folding** - Literal arithmetic and branches on literals collapse to straight code
//! - **🧩 Call inlining** - Small side-effect-free forwarding helpers are spliced into callers
//! - **🔧 Equation simplifier** - `call; brtrue; pop` predicate idioms are resolved statically
//! - **🛡️ Fail-safe** - A method either gets a validated new body or keeps its original one
//! - **📊 Event tracking** - Every transformation is recorded for statistics and auditing
//!
//! ## Quick Start
//!
//! ```rust
//! use dotscope_cflow::prelude::*;
//!
//! let module = Module::new("sample");
//!
//! // static bool Guard::IsFeatureEnabled() => false
//! let mut asm = BodyAssembler::new();
//! asm.emit_ldc_i4(0)?;
//! asm.emit_instruction("ret", None)?;
//! let guard = module.insert(
//!     MethodDef::new(Token::method_def(1), "Guard", "IsFeatureEnabled")
//!         .with_signature(BOOLEAN_TYPE, 0, false)
//!         .with_body(asm.finalize()?),
//! );
//!
//! // if (IsFeatureEnabled()) ...; dispatched through a switch
//! let mut asm = BodyAssembler::new();
//! asm.emit_ldc_i4(1)?;
//! asm.emit_call("call", guard.method_ref())?;
//! asm.emit_branch("brtrue", "L1")?;
//! asm.emit_instruction("pop", None)?;
//! asm.emit_ldc_i4(2)?;
//! asm.define_label("L1")?;
//! asm.emit_switch(&["L2"])?;
//! asm.define_label("L2")?;
//! asm.emit_instruction("ret", None)?;
//! let method = module.insert(
//!     MethodDef::new(Token::method_def(2), "Program", "Main").with_body(asm.finalize()?),
//! );
//!
//! let engine = CflowDeobfuscator::default();
//! let summary = engine.deobfuscate_module(&module);
//! println!("{}", summary.summary());
//! assert_eq!(summary.failed, 0);
//! # Ok::<(), dotscope_cflow::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - Opcodes, instructions and the label-based [`assembly::BodyAssembler`]
//! - [`metadata`] - Method definitions, bodies, exception handlers and callee resolution
//! - [`analysis`] - The [`analysis::BlockGraph`] with construction, mutation and rebuild
//! - [`compiler`] - Block passes, the pass scheduler and the event log
//! - [`deobfuscation`] - The per-method engine, its configuration and batch driver
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Failures inside the pipeline of one method
//! never escape [`deobfuscation::CflowDeobfuscator::deobfuscate`]: the method keeps its
//! original body and a warning is emitted through `tracing`.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dotscope_cflow::prelude::*;
///
/// let engine = CflowDeobfuscator::new(CflowConfig::default().with_inlining(false));
/// assert!(engine.events().is_empty());
/// ```
pub mod prelude;

/// CIL opcodes, instructions and body construction.
pub mod assembly;

/// Method definitions, bodies, exception handlers and callee resolution.
pub mod metadata;

/// Block graph construction, mutation, dead-block elimination and rebuild.
pub mod analysis;

/// Block passes, their scheduling and transformation event tracking.
pub mod compiler;

/// The control-flow deobfuscation engine.
pub mod deobfuscation;

/// `dotscope-cflow` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `dotscope-cflow` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::{analysis::BlockGraph, metadata::method::MethodBody, Error};
///
/// match BlockGraph::from_body(&MethodBody::new(Vec::new(), Vec::new())) {
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub use error::Error;

pub use deobfuscation::{CflowConfig, CflowDeobfuscator};
