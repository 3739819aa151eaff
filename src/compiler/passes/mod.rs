//! Block-level transformation passes.
//!
//! - [`CallInliner`] - Splices small forwarding helpers into their call sites
//! - [`ConstantFolder`] - Folds literal computations and decides branches on literals

mod constants;
mod inlining;

pub use constants::ConstantFolder;
pub use inlining::CallInliner;
