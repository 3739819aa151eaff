//! Per-method control-flow deobfuscation engine.
//!
//! The [`CflowDeobfuscator`] drives one method through the full pipeline:
//!
//! ```text
//! gate (DeobfuscationState)
//!   → equation simplifier          (only if the body contains a switch)
//!   → BlockGraph::from_body
//!   → PassScheduler                (inliner, constant folder, normalize; to fixpoint)
//!   → remove_dead_blocks
//!   → rebuild → branch cleanup → stack validation
//!   → write-back
//! ```
//!
//! The pipeline works on a copy of the body. Any failure aborts the method before write-back:
//! the original body stays in place, a warning naming the method is logged and the batch moves
//! on.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::{
    analysis::cfg::{rebuild, remove_dead_blocks, BlockGraph},
    compiler::{DerivedStats, EventKind, EventLog, PassContext, PassScheduler},
    deobfuscation::{
        equations::simplify_equations,
        state::{DeobfuscationState, MethodStateFlags},
        CflowConfig,
    },
    metadata::{
        method::{MethodBody, MethodDef, MethodResolver},
        module::Module,
    },
    Error, Result,
};

/// Result of running the gated pipeline on one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// No body, empty body, or already processed
    Skipped,
    /// The rebuilt body was written back
    Transformed,
    /// The pipeline failed and the original body was kept
    Aborted,
}

/// Summary of a [`CflowDeobfuscator::deobfuscate_module`] run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Methods whose body was rebuilt and written back.
    pub processed: usize,
    /// Methods without a body or processed earlier.
    pub skipped: usize,
    /// Methods whose pipeline aborted; their bodies are unchanged.
    pub failed: usize,
    /// Statistics over all events recorded by the engine.
    pub stats: DerivedStats,
}

impl BatchSummary {
    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} processed, {} skipped, {} failed ({})",
            self.processed,
            self.skipped,
            self.failed,
            self.stats.summary()
        )
    }
}

/// Control-flow deobfuscator for CIL method bodies.
///
/// One instance serves one batch job: it owns the [`DeobfuscationState`] registry that makes
/// [`CflowDeobfuscator::deobfuscate`] idempotent, and the [`EventLog`] collecting every
/// transformation. All methods take `&self`, so the engine can be shared between workers.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::prelude::*;
///
/// let module = Module::new("sample");
/// let mut asm = BodyAssembler::new();
/// asm.emit_ldc_i4(0)?;
/// asm.emit_branch("brtrue", "dead")?;
/// asm.emit_instruction("ret", None)?;
/// asm.define_label("dead")?;
/// asm.emit_instruction("ret", None)?;
/// let method = module.insert(
///     MethodDef::new(Token::method_def(1), "Sample", "Run").with_body(asm.finalize()?),
/// );
///
/// let engine = CflowDeobfuscator::default();
/// assert!(engine.deobfuscate(&method, &module)?);
/// assert!(!engine.deobfuscate(&method, &module)?);
/// # Ok::<(), dotscope_cflow::Error>(())
/// ```
pub struct CflowDeobfuscator {
    /// Configuration.
    config: CflowConfig,
    /// Per-batch idempotency registry.
    state: DeobfuscationState,
    /// Events of all successfully processed methods, plus abort warnings.
    events: EventLog,
}

impl Default for CflowDeobfuscator {
    fn default() -> Self {
        Self::new(CflowConfig::default())
    }
}

impl CflowDeobfuscator {
    /// Creates a new engine with the given configuration.
    #[must_use]
    pub fn new(config: CflowConfig) -> Self {
        Self {
            config,
            state: DeobfuscationState::new(),
            events: EventLog::new(),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &CflowConfig {
        &self.config
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The idempotency registry.
    #[must_use]
    pub fn state(&self) -> &DeobfuscationState {
        &self.state
    }

    /// Runs the full pipeline on a method, at most once per engine.
    ///
    /// # Arguments
    ///
    /// * `method` - The method to deobfuscate; its body is replaced on success.
    /// * `resolver` - Resolution of call operands, used by the equation simplifier and the
    ///   call inliner.
    ///
    /// # Returns
    ///
    /// `false` if the method has no body, an empty body, or was already processed by this
    /// engine. `true` otherwise, including when the pipeline aborted and the original body was
    /// kept; the abort is reported through `tracing` and as a warning event.
    ///
    /// A `calli` must describe its call site as an [`Operand::Method`](crate::assembly::Operand)
    /// signature. With an opaque signature token its stack effect is unknown, stack validation
    /// fails and the method always keeps its original body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the method's body lock is poisoned. Pipeline failures
    /// are not errors of this call.
    pub fn deobfuscate(&self, method: &MethodDef, resolver: &dyn MethodResolver) -> Result<bool> {
        Ok(self.run(method, resolver)? != Outcome::Skipped)
    }

    /// Gate, run and report one method.
    fn run(&self, method: &MethodDef, resolver: &dyn MethodResolver) -> Result<Outcome> {
        let has_code = with_read!(method.body, |body: &Option<MethodBody>| {
            body.as_ref().is_some_and(|b| !b.is_empty())
        })?;
        if !has_code
            || !self
                .state
                .try_set(method.token, MethodStateFlags::HAS_DEOBFUSCATED)
        {
            return Ok(Outcome::Skipped);
        }

        let events = EventLog::new();
        match self.transform(method, resolver, &events) {
            Ok(body) => {
                *write_lock!(method.body)? = Some(body);
                events
                    .record(EventKind::CodeRegenerated)
                    .method(method.token);
                self.events.merge(&events);
                Ok(Outcome::Transformed)
            }
            Err(Error::LockError) => Err(Error::LockError),
            Err(error) => {
                tracing::warn!(
                    method = %method.full_name(),
                    %error,
                    "control-flow deobfuscation failed, keeping original body"
                );
                self.events
                    .record(EventKind::Warning)
                    .method(method.token)
                    .message(format!("{}: {error}", method.full_name()));
                Ok(Outcome::Aborted)
            }
        }
    }

    /// The pipeline proper, on a copy of the body.
    fn transform(
        &self,
        method: &MethodDef,
        resolver: &dyn MethodResolver,
        events: &EventLog,
    ) -> Result<MethodBody> {
        let mut body = read_lock!(method.body)?
            .clone()
            .ok_or(Error::NoBody(method.token))?;

        if self.config.enable_equations && body.has_switch() {
            let rewritten = simplify_equations(&mut body, resolver, method.token, events);
            if rewritten > 0 {
                tracing::debug!(method = %method.full_name(), rewritten, "equations simplified");
            }
        }

        let mut graph = BlockGraph::from_body(&body)?;
        let ctx = PassContext {
            method,
            resolver,
            config: &self.config,
            events,
        };
        let iterations = PassScheduler::with_defaults(&self.config).run(&mut graph, &ctx)?;
        remove_dead_blocks(&mut graph)?;

        tracing::debug!(
            method = %method.full_name(),
            iterations,
            blocks = graph.block_count(),
            "block pipeline finished"
        );

        Self::finish(&graph, method)
    }

    /// Rebuild a graph into a body with clean branch forms and a validated stack.
    fn finish(graph: &BlockGraph, method: &MethodDef) -> Result<MethodBody> {
        let mut body = rebuild(graph)?;
        body.simplify_branches();
        body.optimize_branches();
        body.compute_max_stack(method.returns_value())?;
        Ok(body)
    }

    /// Structural cleanup of a method: block construction, dead-block removal, repartition,
    /// rebuild and branch cleanup, written back on success.
    ///
    /// Unlike [`CflowDeobfuscator::deobfuscate`] this bypasses the idempotency gate and runs no
    /// transform passes, so it is safe to call repeatedly. A method without a body is left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns any failure of the cleanup, in which case the body is unchanged. Callers that
    /// want best-effort semantics discard the error explicitly.
    pub fn deobfuscate_blocks(&self, method: &MethodDef) -> Result<()> {
        let Some(body) = read_lock!(method.body)?.clone() else {
            return Ok(());
        };
        if body.is_empty() {
            return Ok(());
        }

        let mut graph = BlockGraph::from_body(&body)?;
        let removed = remove_dead_blocks(&mut graph)?;
        graph.repartition()?;
        let body = Self::finish(&graph, method)?;

        *write_lock!(method.body)? = Some(body);
        for _ in 0..removed {
            self.events
                .record(EventKind::BlockRemoved)
                .method(method.token);
        }
        Ok(())
    }

    /// Runs [`CflowDeobfuscator::deobfuscate`] over every method of a module in parallel.
    ///
    /// Methods of the module resolve each other's calls. A callee may be observed before or
    /// after its own deobfuscation, depending on scheduling.
    ///
    /// # Returns
    ///
    /// Counts of processed, skipped and failed methods together with statistics over the
    /// engine's events. A poisoned body lock counts as a failure.
    #[must_use]
    pub fn deobfuscate_module(&self, module: &Module) -> BatchSummary {
        let start = Instant::now();
        let methods: Vec<_> = module
            .methods()
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let outcomes: Vec<Outcome> = methods
            .par_iter()
            .map(|method| {
                self.run(method, module).unwrap_or_else(|error| {
                    tracing::warn!(method = %method.full_name(), %error, "method skipped");
                    Outcome::Aborted
                })
            })
            .collect();

        let count = |o: Outcome| outcomes.iter().filter(|x| **x == o).count();
        let elapsed: Duration = start.elapsed();
        let summary = BatchSummary {
            processed: count(Outcome::Transformed),
            skipped: count(Outcome::Skipped),
            failed: count(Outcome::Aborted),
            stats: DerivedStats::from_log(&self.events).with_time(elapsed),
        };

        tracing::info!(
            module = %module.name,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "module deobfuscated"
        );
        summary
    }
}
