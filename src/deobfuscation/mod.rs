//! Control-flow deobfuscation of CIL method bodies.
//!
//! This module ties the block graph layer and the transform passes together into a
//! per-method pipeline with idempotency tracking and graceful failure handling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Deobfuscation Pipeline                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Input: MethodDef + MethodResolver                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  DeobfuscationState gate (HAS_DEOBFUSCATED)                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Equation simplifier       call; brtrue|brfalse; pop  (switch bodies)   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  BlockGraph → PassScheduler (inliner, constant folder) → dead blocks    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  rebuild → branch cleanup → max-stack validation → write-back           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`CflowDeobfuscator`] - Entry points for single methods and whole modules
//! - [`CflowConfig`] - Pass selection, iteration limits, inlining heuristics
//! - [`DeobfuscationState`] - Per-batch registry of processed methods
//! - [`BatchSummary`] - Outcome counts of a module run

mod config;
mod engine;
mod equations;
mod state;

pub use config::{CflowConfig, DeobfuscatorFlags};
pub use engine::{BatchSummary, CflowDeobfuscator};
pub use equations::{classify_call, simplify_equations, Classification};
pub use state::{DeobfuscationState, MethodStateFlags};
