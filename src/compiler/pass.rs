//! Pass trait and per-method context for the block-level transform pipeline.

use crate::{
    analysis::cfg::BlockGraph,
    compiler::EventLog,
    deobfuscation::CflowConfig,
    metadata::method::{MethodDef, MethodResolver},
    Result,
};

/// Everything a pass may consult while transforming one method.
///
/// The context is shared: passes read the method definition, resolve callees and record
/// events, but the only thing they mutate is the [`BlockGraph`] handed to
/// [`BlockPass::run`].
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    /// The method being transformed; its body lock is not held during the pipeline
    pub method: &'a MethodDef,
    /// Resolution of call operands to callee definitions
    pub resolver: &'a dyn MethodResolver,
    /// Engine configuration
    pub config: &'a CflowConfig,
    /// Event sink for transformations
    pub events: &'a EventLog,
}

/// A transformation over the block graph of one method.
///
/// Passes run in a fixed order chosen by the [`crate::compiler::PassScheduler`], which
/// repeats the whole sequence until no pass reports a change.
pub trait BlockPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Run the pass on a method's block graph.
    ///
    /// Returns `true` if any change was applied. Events should be recorded directly to
    /// `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is inconsistent; the engine then leaves the method's
    /// body untouched.
    fn run(&mut self, graph: &mut BlockGraph, ctx: &PassContext<'_>) -> Result<bool>;
}
