//! Program analysis infrastructure for CIL method bodies.
//!
//! # Architecture
//!
//! - [`cfg`] - Block graph construction, mutation and serialization

pub mod cfg;

// Re-export primary types at module level
pub use cfg::{
    rebuild, remove_dead_blocks, BasicBlock, BlockGraph, BlockId, BlockKind, CfgEdge,
    CfgEdgeKind, HandlerRegion,
};
