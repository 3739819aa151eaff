//! Block-local constant folding and branch decision.
//!
//! The folder simulates the evaluation stack of each block, tracking integer literals pushed
//! by `ldc.*` and by loads of locals that were assigned a literal earlier in the same block.
//! Each tracked value remembers the instructions that produced it, so that once a value is
//! consumed statically those producers can be neutralized into `nop`s.
//!
//! A `dup` turns one value into two that share their producers. The first of the two to be
//! consumed statically neutralizes the `dup` itself; only the second one may neutralize the
//! instructions the `dup` read from. A copy consumed by a kept instruction (`stloc`, a call)
//! therefore always keeps its producers alive.
//!
//! With this information the folder:
//!
//! - decides conditional branches whose operands are literals, turning them into `br` or a
//!   plain fall-through
//! - decides a `switch` on a literal, turning it into a `br` to the selected case
//! - collapses arithmetic and comparisons over literals into a single literal load
//! - replaces loads of locals with a known value by the literal
//!
//! The last two rewrites are skipped when
//! [`crate::deobfuscation::DeobfuscatorFlags::DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS`] is set.
//!
//! Nothing is known at block start; values flowing in from predecessors are unknown. Locals
//! whose address is taken anywhere in the method are never tracked.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::cfg::{BlockGraph, BlockId, BlockKind},
    assembly::{ldc_i4, Immediate, Instruction, Opcode, Operand},
    compiler::{BlockPass, EventKind, PassContext},
    Result,
};

/// Where a tracked value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Producer {
    /// The instruction at this index pushed it and has no other effect
    At(usize),
    /// One of the two values left by a `dup`, index into the block's [`DupGroup`]s
    Dup(usize),
}

/// The two values pushed by one `dup`.
#[derive(Debug)]
struct DupGroup {
    /// Index of the `dup`
    at: usize,
    /// Whether one of the two values already neutralized the `dup`
    claimed: bool,
    /// Producers of the value the `dup` read
    source: Vec<Producer>,
}

/// Resolve `producers` into instruction indices to neutralize, claiming `dup`s on the way.
///
/// Must only be called once the consumer of the values is removed for sure.
fn claim(groups: &mut [DupGroup], producers: Vec<Producer>, nops: &mut Vec<usize>) {
    let mut pending = producers;
    while let Some(producer) = pending.pop() {
        match producer {
            Producer::At(at) => nops.push(at),
            Producer::Dup(index) => {
                let Some(group) = groups.get_mut(index) else {
                    continue;
                };
                if group.claimed {
                    pending.extend(group.source.iter().copied());
                } else {
                    group.claimed = true;
                    nops.push(group.at);
                }
            }
        }
    }
}

/// An integer literal on the simulated stack.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Known {
    /// The value, sign-extended for `int32`
    value: i64,
    /// `int64` rather than `int32`
    wide: bool,
    /// What pushed the value
    producers: Vec<Producer>,
}

impl Known {
    fn new(value: i64, wide: bool, at: usize) -> Self {
        Known {
            value: if wide { value } else { i64::from(value as i32) },
            wide,
            producers: vec![Producer::At(at)],
        }
    }
}

type Slot = Option<Known>;

/// What the folder decided for one block.
#[derive(Debug, Default)]
struct BlockPlan {
    /// Instructions to turn into `nop`
    nops: Vec<usize>,
    /// Instructions to turn into a literal load
    literals: Vec<(usize, i64, bool)>,
    /// Decision for the terminator: `Some(Some(target))` branches, `Some(None)` falls through
    decision: Option<Option<BlockId>>,
}

impl BlockPlan {
    fn is_empty(&self) -> bool {
        self.nops.is_empty() && self.literals.is_empty() && self.decision.is_none()
    }
}

/// Folds literal computations and decides branches on literals.
pub struct ConstantFolder;

impl Default for ConstantFolder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantFolder {
    /// Creates a new constant folder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Locals whose address escapes through `ldloca`.
    fn address_taken(graph: &BlockGraph) -> HashSet<u16> {
        graph
            .blocks()
            .flat_map(|b| b.instructions.iter())
            .filter(|i| matches!(i.opcode, Opcode::Ldloca | Opcode::LdlocaS))
            .filter_map(|i| match i.operand {
                Operand::Local(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    /// Simulate one block and plan its rewrites.
    fn plan_block(
        graph: &BlockGraph,
        id: BlockId,
        pinned: &HashSet<u16>,
        fold_extra: bool,
    ) -> BlockPlan {
        let mut plan = BlockPlan::default();
        let Some(block) = graph.block(id) else {
            return plan;
        };

        let mut stack: Vec<Slot> = Vec::new();
        let mut groups: Vec<DupGroup> = Vec::new();
        let mut locals: HashMap<u16, (i64, bool)> = HashMap::new();
        let pop = |stack: &mut Vec<Slot>| stack.pop().flatten();

        for (at, instr) in block.instructions.iter().enumerate() {
            if let Some(value) = instr.int_literal() {
                stack.push(Some(Known::new(value, instr.opcode == Opcode::LdcI8, at)));
                continue;
            }
            if let Some(local) = instr.loaded_local() {
                match locals.get(&local) {
                    Some((value, wide)) => {
                        if fold_extra {
                            plan.literals.push((at, *value, *wide));
                        }
                        stack.push(Some(Known::new(*value, *wide, at)));
                    }
                    None => stack.push(None),
                }
                continue;
            }
            if let Some(local) = instr.stored_local() {
                match pop(&mut stack) {
                    Some(known) if !pinned.contains(&local) => {
                        locals.insert(local, (known.value, known.wide));
                    }
                    _ => {
                        locals.remove(&local);
                    }
                }
                continue;
            }

            match instr.opcode {
                Opcode::Nop => {}
                Opcode::Pop => {
                    stack.pop();
                }
                Opcode::Dup => match stack.pop().flatten() {
                    Some(top) => {
                        let shared = Known {
                            value: top.value,
                            wide: top.wide,
                            producers: vec![Producer::Dup(groups.len())],
                        };
                        groups.push(DupGroup {
                            at,
                            claimed: false,
                            source: top.producers,
                        });
                        stack.push(Some(shared.clone()));
                        stack.push(Some(shared));
                    }
                    None => {
                        stack.push(None);
                        stack.push(None);
                    }
                },
                Opcode::Neg | Opcode::Not => {
                    let folded = pop(&mut stack).map(|a| {
                        let value = if instr.opcode == Opcode::Neg {
                            a.value.wrapping_neg()
                        } else {
                            !a.value
                        };
                        (value, a.wide, a.producers)
                    });
                    stack.push(Self::fold(&mut plan, &mut groups, at, folded, fold_extra));
                }
                op if binary_op(op).is_some() => {
                    let b = pop(&mut stack);
                    let a = pop(&mut stack);
                    let folded = match (a, b) {
                        (Some(a), Some(b)) => evaluate(op, &a, &b).map(|(value, wide)| {
                            let mut producers = a.producers;
                            producers.extend(b.producers);
                            (value, wide, producers)
                        }),
                        _ => None,
                    };
                    stack.push(Self::fold(&mut plan, &mut groups, at, folded, fold_extra));
                }
                _ if at + 1 == block.instructions.len() && instr.is_terminal() => {
                    let decided = Self::decide(
                        block.kind(),
                        instr,
                        &mut stack,
                        &block.targets,
                        block.fall_through,
                    );
                    if let Some((producers, decision)) = decided {
                        claim(&mut groups, producers, &mut plan.nops);
                        plan.decision = Some(decision);
                    }
                }
                _ => {
                    let Some(effect) = instr.stack_behavior(true) else {
                        break;
                    };
                    for _ in 0..effect.pops {
                        stack.pop();
                    }
                    for _ in 0..effect.pushes {
                        stack.push(None);
                    }
                }
            }
        }

        plan
    }

    /// Push the result of a foldable operation at `at`.
    fn fold(
        plan: &mut BlockPlan,
        groups: &mut [DupGroup],
        at: usize,
        folded: Option<(i64, bool, Vec<Producer>)>,
        fold_extra: bool,
    ) -> Slot {
        let (value, wide, producers) = folded?;
        if fold_extra {
            claim(groups, producers, &mut plan.nops);
            plan.literals.push((at, value, wide));
            Some(Known::new(value, wide, at))
        } else {
            let mut known = Known::new(value, wide, at);
            known.producers.extend(producers);
            Some(known)
        }
    }

    /// Decide a terminator whose operands are literals.
    ///
    /// Returns the producers to neutralize and `Some(target)` for a taken edge or `None` for
    /// the fall-through.
    fn decide(
        kind: BlockKind,
        instr: &Instruction,
        stack: &mut Vec<Slot>,
        targets: &[BlockId],
        fall_through: Option<BlockId>,
    ) -> Option<(Vec<Producer>, Option<BlockId>)> {
        match kind {
            BlockKind::Conditional => {
                let op = instr.opcode.long_form();
                let taken_target = *targets.first()?;
                let (taken, producers) = if op.is_brtrue() || op.is_brfalse() {
                    let cond = stack.pop().flatten()?;
                    ((cond.value != 0) == op.is_brtrue(), cond.producers)
                } else {
                    let b = stack.pop().flatten()?;
                    let a = stack.pop().flatten()?;
                    if a.wide != b.wide {
                        return None;
                    }
                    let mut producers = a.producers.clone();
                    producers.extend(b.producers.iter().copied());
                    (compare_branch(op, &a, &b)?, producers)
                };
                Some((producers, taken.then_some(taken_target)))
            }
            BlockKind::Switch => {
                let index = stack.pop().flatten()?;
                fall_through?;
                let case = u32::try_from(index.value as i32)
                    .ok()
                    .and_then(|i| targets.get(i as usize).copied());
                Some((index.producers, case))
            }
            _ => None,
        }
    }

    /// Apply a plan to its block. Returns the number of folded literals and whether the
    /// terminator was decided.
    fn apply(graph: &mut BlockGraph, id: BlockId, plan: BlockPlan) -> Result<(usize, bool)> {
        if let Some(block) = graph.block_mut(id) {
            for at in &plan.nops {
                if let Some(instr) = block.instructions.get_mut(*at) {
                    instr.opcode = Opcode::Nop;
                    instr.operand = Operand::None;
                }
            }
            for (at, value, wide) in &plan.literals {
                // A folded value consumed by a decided branch was already neutralized
                if plan.nops.contains(at) {
                    continue;
                }
                if let Some(instr) = block.instructions.get_mut(*at) {
                    let (opcode, operand) = literal(*value, *wide);
                    instr.opcode = opcode;
                    instr.operand = operand;
                }
            }
        }

        let decided = match plan.decision {
            Some(Some(target)) => {
                graph.redirect_to(id, target)?;
                true
            }
            Some(None) => {
                graph.fall_through_only(id)?;
                true
            }
            None => false,
        };
        let folded = plan.literals.iter().filter(|(at, ..)| !plan.nops.contains(at)).count();
        Ok((folded, decided))
    }
}

/// True for the binary operators the folder evaluates.
fn binary_op(op: Opcode) -> Option<Opcode> {
    matches!(
        op,
        Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::DivUn
            | Opcode::Rem
            | Opcode::RemUn
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::ShrUn
            | Opcode::Ceq
            | Opcode::Cgt
            | Opcode::CgtUn
            | Opcode::Clt
            | Opcode::CltUn
    )
    .then_some(op)
}

/// Evaluate a binary operator on literals, with CLI wrap-around semantics.
///
/// Returns `None` when the operand widths do not match or the operation would throw.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn evaluate(op: Opcode, a: &Known, b: &Known) -> Option<(i64, bool)> {
    let shift = matches!(op, Opcode::Shl | Opcode::Shr | Opcode::ShrUn);
    if !shift && a.wide != b.wide {
        return None;
    }
    let wide = a.wide;
    let cmp = |v: bool| Some((i64::from(v), false));

    if wide {
        let (x, y) = (a.value, b.value);
        let (ux, uy) = (x as u64, y as u64);
        let amount = (b.value & 63) as u32;
        let value = match op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Sub => x.wrapping_sub(y),
            Opcode::Mul => x.wrapping_mul(y),
            Opcode::Div => x.checked_div(y)?,
            Opcode::Rem => x.checked_rem(y)?,
            Opcode::DivUn => ux.checked_div(uy)? as i64,
            Opcode::RemUn => ux.checked_rem(uy)? as i64,
            Opcode::And => x & y,
            Opcode::Or => x | y,
            Opcode::Xor => x ^ y,
            Opcode::Shl => x.wrapping_shl(amount),
            Opcode::Shr => x.wrapping_shr(amount),
            Opcode::ShrUn => ux.wrapping_shr(amount) as i64,
            Opcode::Ceq => return cmp(x == y),
            Opcode::Cgt => return cmp(x > y),
            Opcode::CgtUn => return cmp(ux > uy),
            Opcode::Clt => return cmp(x < y),
            Opcode::CltUn => return cmp(ux < uy),
            _ => return None,
        };
        Some((value, true))
    } else {
        let (x, y) = (a.value as i32, b.value as i32);
        let (ux, uy) = (x as u32, y as u32);
        let amount = (b.value & 31) as u32;
        let value = match op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Sub => x.wrapping_sub(y),
            Opcode::Mul => x.wrapping_mul(y),
            Opcode::Div => x.checked_div(y)?,
            Opcode::Rem => x.checked_rem(y)?,
            Opcode::DivUn => ux.checked_div(uy)? as i32,
            Opcode::RemUn => ux.checked_rem(uy)? as i32,
            Opcode::And => x & y,
            Opcode::Or => x | y,
            Opcode::Xor => x ^ y,
            Opcode::Shl => x.wrapping_shl(amount),
            Opcode::Shr => x.wrapping_shr(amount),
            Opcode::ShrUn => ux.wrapping_shr(amount) as i32,
            Opcode::Ceq => return cmp(x == y),
            Opcode::Cgt => return cmp(x > y),
            Opcode::CgtUn => return cmp(ux > uy),
            Opcode::Clt => return cmp(x < y),
            Opcode::CltUn => return cmp(ux < uy),
            _ => return None,
        };
        Some((i64::from(value), false))
    }
}

/// Outcome of a two-operand conditional branch on literals.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn compare_branch(op: Opcode, a: &Known, b: &Known) -> Option<bool> {
    let (x, y) = (a.value, b.value);
    let (ux, uy) = if a.wide {
        (x as u64, y as u64)
    } else {
        (u64::from(x as i32 as u32), u64::from(y as i32 as u32))
    };
    Some(match op {
        Opcode::Beq => x == y,
        Opcode::BneUn => x != y,
        Opcode::Bge => x >= y,
        Opcode::Bgt => x > y,
        Opcode::Ble => x <= y,
        Opcode::Blt => x < y,
        Opcode::BgeUn => ux >= uy,
        Opcode::BgtUn => ux > uy,
        Opcode::BleUn => ux <= uy,
        Opcode::BltUn => ux < uy,
        _ => return None,
    })
}

/// The shortest load of a literal.
#[allow(clippy::cast_possible_truncation)]
fn literal(value: i64, wide: bool) -> (Opcode, Operand) {
    if wide {
        (Opcode::LdcI8, Operand::Immediate(Immediate::Int64(value)))
    } else {
        ldc_i4(value as i32)
    }
}

impl BlockPass for ConstantFolder {
    fn name(&self) -> &'static str {
        "constant-folder"
    }

    fn description(&self) -> &'static str {
        "Fold literal computations and decide branches on literals"
    }

    fn run(&mut self, graph: &mut BlockGraph, ctx: &PassContext<'_>) -> Result<bool> {
        let pinned = Self::address_taken(graph);
        let fold_extra = ctx.config.fold_extra_instructions();
        let mut changed = false;

        for id in graph.layout().to_vec() {
            let plan = Self::plan_block(graph, id, &pinned, fold_extra);
            if plan.is_empty() {
                continue;
            }
            let (folded, decided) = Self::apply(graph, id, plan)?;

            for _ in 0..folded {
                ctx.events
                    .record(EventKind::ConstantFolded)
                    .at(ctx.method.token, id.0)
                    .pass(self.name());
            }
            if decided {
                ctx.events
                    .record(EventKind::BranchSimplified)
                    .at(ctx.method.token, id.0)
                    .pass(self.name());
            }
            changed |= folded > 0 || decided;
        }

        Ok(changed)
    }
}
