//! Equation branch simplifier.
//!
//! Flattening obfuscators hide constant conditions behind calls to predicate stubs:
//!
//! ```text
//! call     bool Guard::IsFeatureEnabled()
//! brtrue   L1
//! pop
//! ```
//!
//! When the stub statically always returns the same boolean, the branch outcome is known.
//! This module rewrites such sites on the flat instruction stream, before block construction:
//! the call becomes a `nop` and the branch becomes either a `nop` (never taken) or a `br`
//! (always taken). The `pop` is left as is.

use crate::{
    assembly::{Instruction, Opcode, Operand},
    compiler::{EventKind, EventLog},
    metadata::{
        method::{MethodBody, MethodResolver},
        token::Token,
    },
};

/// Static outcome of a predicate stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The callee always returns `false`
    AlwaysFalse,
    /// The callee always returns `true`
    AlwaysTrue,
    /// The callee does not return a boolean
    Unknown,
}

/// What a site rewrite turns the conditional branch into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchRewrite {
    Nop,
    Br,
}

/// Rewrite of the branch for a branch kind and callee classification.
///
/// An unknown callee is treated like an always-false one.
fn rewrite_for(brtrue: bool, classification: Classification) -> BranchRewrite {
    match (brtrue, classification) {
        (true, Classification::AlwaysTrue)
        | (false, Classification::AlwaysFalse | Classification::Unknown) => BranchRewrite::Br,
        (true, Classification::AlwaysFalse | Classification::Unknown)
        | (false, Classification::AlwaysTrue) => BranchRewrite::Nop,
    }
}

/// Classify the callee of a `call` instruction.
///
/// Returns `None` when the site must be skipped: the operand does not resolve to a method
/// with a readable body, the call consumes stack arguments or pushes nothing, or a boolean
/// callee does not end with a literal load before its `ret`.
#[must_use]
pub fn classify_call(call: &Instruction, resolver: &dyn MethodResolver) -> Option<Classification> {
    if call.opcode != Opcode::Call {
        return None;
    }
    let target = call.method_operand()?;
    if target.params > 0 || target.has_this || !target.returns_value {
        return None;
    }

    let callee = resolver.resolve_method(target.token)?;
    let guard = callee.body.read().ok()?;
    let body = guard.as_ref()?;

    if !callee.returns_boolean() {
        return Some(Classification::Unknown);
    }

    let n = body.instructions.len();
    if n < 2 {
        return None;
    }
    match body.instructions[n - 2].int_literal()? {
        0 => Some(Classification::AlwaysFalse),
        _ => Some(Classification::AlwaysTrue),
    }
}

/// Rewrite every `call; brtrue|brfalse; pop` site whose callee can be classified.
///
/// # Arguments
///
/// * `body` - The body to rewrite in place.
/// * `resolver` - Resolution of call operands.
/// * `method` - Token of the method owning `body`, for events.
/// * `events` - Event sink; one [`EventKind::EquationSimplified`] per rewritten site.
///
/// # Returns
///
/// The number of rewritten sites.
pub fn simplify_equations(
    body: &mut MethodBody,
    resolver: &dyn MethodResolver,
    method: Token,
    events: &EventLog,
) -> usize {
    let mut rewritten = 0;

    for i in 1..body.instructions.len().saturating_sub(1) {
        let branch = body.instructions[i].opcode;
        if !(branch.is_brtrue() || branch.is_brfalse()) {
            continue;
        }
        if body.instructions[i + 1].opcode != Opcode::Pop {
            continue;
        }
        let Some(classification) = classify_call(&body.instructions[i - 1], resolver) else {
            continue;
        };

        let rewrite = rewrite_for(branch.is_brtrue(), classification);
        let call = &mut body.instructions[i - 1];
        call.opcode = Opcode::Nop;
        call.operand = Operand::None;

        let branch_instr = &mut body.instructions[i];
        branch_instr.opcode = match rewrite {
            BranchRewrite::Nop => Opcode::Nop,
            BranchRewrite::Br if branch.short_form() == branch => Opcode::BrS,
            BranchRewrite::Br => Opcode::Br,
        };
        if rewrite == BranchRewrite::Nop {
            branch_instr.operand = Operand::None;
        }

        tracing::debug!(index = i, ?classification, ?rewrite, "equation simplified");
        events
            .record(EventKind::EquationSimplified)
            .at(method, i)
            .message(format!("{classification:?} predicate, branch becomes {rewrite:?}"));
        rewritten += 1;
    }

    rewritten
}
