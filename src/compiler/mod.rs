//! Transform infrastructure over method block graphs.
//!
//! This module provides the middle layer between analysis and the deobfuscation engine:
//!
//! - [`crate::analysis`] - CIL → block graph construction and rebuild
//! - [`compiler`](self) - Block passes, scheduling and event tracking
//! - [`crate::deobfuscation`] - Per-method orchestration and batch processing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Transform Pipeline                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PassContext                 Per-method shared state             │
//! │    ├─ MethodDef               (method being transformed)         │
//! │    ├─ MethodResolver          (callee lookup for inlining)       │
//! │    ├─ CflowConfig                                                │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler               Fixpoint execution                  │
//! │    ├─ CallInliner             (forwarding helper inlining)       │
//! │    ├─ ConstantFolder          (literal folding, branch decision) │
//! │    └─ normalize               (dead blocks, block merging)       │
//! │                                                                  │
//! │  EventLog                    Change tracking and diagnostics     │
//! │  DerivedStats                Counters derived from the log       │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod events;
mod pass;
mod passes;
mod scheduler;

pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::{BlockPass, PassContext};
pub use passes::{CallInliner, ConstantFolder};
pub use scheduler::PassScheduler;
