//! Pass scheduler for the block-level transform pipeline.
//!
//! The `PassScheduler` runs its passes in order over one method's [`BlockGraph`], normalizes
//! the graph after every round and repeats until a fixpoint or the iteration limit.

use crate::{
    analysis::cfg::{remove_dead_blocks, BlockGraph},
    compiler::{
        pass::{BlockPass, PassContext},
        passes::{CallInliner, ConstantFolder},
        EventKind,
    },
    deobfuscation::CflowConfig,
    Result,
};

/// Orchestrates block pass execution for one method.
///
/// Each iteration:
///
/// 1. Runs every pass once, in registration order
/// 2. Removes blocks that became unreachable, together with handlers that lost their try
///    range or handler entry
/// 3. Merges straight-line block pairs
///
/// The loop stops as soon as an iteration changes nothing, or after `max_iterations`.
pub struct PassScheduler {
    /// Maximum iterations of the pipeline.
    max_iterations: usize,
    /// Registered passes, in execution order.
    passes: Vec<Box<dyn BlockPass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::with_defaults(&CflowConfig::default())
    }
}

impl PassScheduler {
    /// Creates an empty scheduler with the given iteration limit.
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            passes: Vec::new(),
        }
    }

    /// Creates the standard pipeline for a configuration: the call inliner followed by the
    /// constant folder, each only if enabled.
    #[must_use]
    pub fn with_defaults(config: &CflowConfig) -> Self {
        let mut scheduler = Self::new(config.max_iterations);
        if config.enable_inlining {
            scheduler.add_pass(Box::new(CallInliner::new()));
        }
        if config.enable_constant_folding {
            scheduler.add_pass(Box::new(ConstantFolder::new()));
        }
        scheduler
    }

    /// Appends a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn BlockPass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// Names of the registered passes, in execution order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs the pipeline on a block graph until nothing changes.
    ///
    /// # Returns
    ///
    /// The number of iterations performed.
    ///
    /// # Errors
    ///
    /// Propagates the first pass or normalization failure. The graph may be partially
    /// transformed in that case and must be discarded.
    pub fn run(&mut self, graph: &mut BlockGraph, ctx: &PassContext<'_>) -> Result<usize> {
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            let mut changed = false;

            for pass in &mut self.passes {
                if pass.run(graph, ctx)? {
                    tracing::trace!(pass = pass.name(), "pass changed graph");
                    changed = true;
                }
            }

            changed |= Self::normalize(graph, ctx)?;

            tracing::debug!(
                method = %ctx.method.full_name(),
                iteration = iterations,
                blocks = graph.block_count(),
                changed,
                "cflow iteration"
            );

            if !changed {
                break;
            }
        }

        Ok(iterations)
    }

    /// Removes dead blocks and merges straight-line chains.
    fn normalize(graph: &mut BlockGraph, ctx: &PassContext<'_>) -> Result<bool> {
        let regions_before = graph.regions().len();
        let removed = remove_dead_blocks(graph)?;
        let handlers_removed = regions_before.saturating_sub(graph.regions().len());
        let merged = graph.merge_blocks();

        for _ in 0..removed {
            ctx.events
                .record(EventKind::BlockRemoved)
                .method(ctx.method.token);
        }
        for _ in 0..handlers_removed {
            ctx.events
                .record(EventKind::HandlerRemoved)
                .method(ctx.method.token);
        }
        for _ in 0..merged {
            ctx.events
                .record(EventKind::BlocksMerged)
                .method(ctx.method.token);
        }

        Ok(removed > 0 || merged > 0)
    }
}
