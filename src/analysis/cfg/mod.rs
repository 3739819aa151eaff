//! Block graph construction, mutation and serialization.
//!
//! This module turns a flat [`crate::metadata::method::MethodBody`] into a mutable graph of
//! basic blocks and back. Deobfuscation passes operate on the graph; the rebuilder
//! serializes the result into a body with regenerated branch operands and realigned
//! exception handlers.
//!
//! # Key Components
//!
//! - [`BlockGraph`] - Blocks, layout order and handler regions of one method
//! - [`BasicBlock`] - A straight-line run of instructions with its outgoing edges
//! - [`CfgEdge`] - Edge representation with control flow semantics
//! - [`HandlerRegion`] - An exception handler clause expressed over blocks
//! - [`remove_dead_blocks`] - Reachability based block elimination
//! - [`rebuild`] - Serialization back into a method body
//!
//! # Invariants
//!
//! - The entry block is first in layout and never removed
//! - Every branch target and handler boundary starts a block
//! - Edges are authoritative; branch operands inside the graph may be stale
//!
//! # Examples
//!
//! ```rust
//! use dotscope_cflow::{analysis::cfg::{rebuild, BlockGraph}, assembly::BodyAssembler};
//!
//! let mut asm = BodyAssembler::new();
//! asm.emit_instruction("ldarg.0", None)?;
//! asm.emit_branch("brtrue.s", "skip")?;
//! asm.emit_instruction("nop", None)?;
//! asm.define_label("skip")?;
//! asm.emit_instruction("ret", None)?;
//! let body = asm.finalize()?;
//!
//! let graph = BlockGraph::from_body(&body)?;
//! assert_eq!(graph.block_count(), 3);
//! assert_eq!(rebuild(&graph)?.instructions, body.instructions);
//! # Ok::<(), dotscope_cflow::Error>(())
//! ```

mod block;
mod builder;
mod deadblocks;
mod edge;
mod graph;
mod rebuild;
mod region;

pub use block::{BasicBlock, BlockId, BlockKind};
pub use deadblocks::{reachable_blocks, remove_dead_blocks};
pub use edge::{CfgEdge, CfgEdgeKind};
pub use graph::BlockGraph;
pub use rebuild::rebuild;
pub use region::HandlerRegion;
