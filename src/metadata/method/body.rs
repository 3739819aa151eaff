//! Instruction-level representation of CIL method bodies.
//!
//! A [`MethodBody`] owns the flat instruction stream of one method together with its exception
//! handler clauses. Besides plain storage it provides the encoding-aware housekeeping needed
//! after the stream was rewritten:
//!
//! - [`MethodBody::update_offsets`] recomputes byte offsets from the ECMA-335 encoding sizes
//! - [`MethodBody::simplify_branches`] widens every short branch to its long form
//! - [`MethodBody::optimize_branches`] narrows long branches whose displacement fits in an `i8`
//! - [`MethodBody::compute_max_stack`] verifies stack consistency on all paths
//!
//! # References
//! - ECMA-335 6th Edition, Partition III, Section 1.7 - Instruction Variable Stack Depth

use std::collections::HashMap;

use crate::{
    assembly::{FlowType, InstrId, Instruction, Opcode, OperandType},
    metadata::method::ExceptionHandler,
    Error, Result,
};

/// The instruction stream and exception handlers of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Instructions in execution layout order
    pub instructions: Vec<Instruction>,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Number of local variables
    pub local_count: u16,
    /// Next unused instruction id
    next_id: u32,
}

impl MethodBody {
    /// Creates a body from instructions and handlers.
    ///
    /// Instruction ids must be unique; fresh ids are allocated above the largest one present.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>, exception_handlers: Vec<ExceptionHandler>) -> Self {
        let next_id = instructions
            .iter()
            .map(|i| i.id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        MethodBody {
            instructions,
            exception_handlers,
            max_stack: 8,
            local_count: 0,
            next_id,
        }
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if the body has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The first id that has not been handed out yet.
    #[must_use]
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Raise the id watermark, used when a body is rebuilt from a graph that allocated ids.
    pub fn reserve_ids(&mut self, next_id: u32) {
        self.next_id = self.next_id.max(next_id);
    }

    /// Allocate a fresh instruction id.
    pub fn alloc_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// True if the body contains at least one `switch`.
    #[must_use]
    pub fn has_switch(&self) -> bool {
        self.instructions.iter().any(|i| i.opcode == Opcode::Switch)
    }

    /// Maps each instruction id to its current index.
    #[must_use]
    pub fn index_map(&self) -> HashMap<InstrId, usize> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(index, instr)| (instr.id, index))
            .collect()
    }

    /// Index of the instruction with the given id.
    #[must_use]
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id == id)
    }

    /// Total encoded size of the instruction stream in bytes.
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.instructions.iter().map(Instruction::size).sum()
    }

    /// Recompute the byte offset of every instruction.
    pub fn update_offsets(&mut self) {
        let mut offset = 0u32;
        for instr in &mut self.instructions {
            instr.offset = offset;
            offset += instr.size();
        }
    }

    /// Convert all short branches to their long form and update offsets.
    ///
    /// Rewritten code may move branch targets out of the `i8` range; widening first keeps every
    /// branch encodable until [`MethodBody::optimize_branches`] narrows them again.
    pub fn simplify_branches(&mut self) {
        for instr in &mut self.instructions {
            instr.opcode = instr.opcode.long_form();
        }
        self.update_offsets();
    }

    /// Convert long branches to their short form wherever the displacement fits in an `i8`.
    ///
    /// Narrowing a branch can only bring other branches closer to their targets, so the pass is
    /// repeated until no more branches shrink. Offsets are up to date afterwards.
    pub fn optimize_branches(&mut self) {
        loop {
            self.update_offsets();
            let offsets: HashMap<InstrId, u32> =
                self.instructions.iter().map(|i| (i.id, i.offset)).collect();

            let mut changed = false;
            for instr in &mut self.instructions {
                if instr.opcode.operand_type() != OperandType::Branch {
                    continue;
                }
                let short = instr.opcode.short_form();
                if short == instr.opcode {
                    continue;
                }
                let Some(target) = instr.branch_targets().first().and_then(|t| offsets.get(t))
                else {
                    continue;
                };

                // Forward targets move together with the shrinking instruction
                let from = if *target > instr.offset {
                    i64::from(instr.offset) + i64::from(instr.size())
                } else {
                    i64::from(instr.offset) + 2
                };
                let displacement = i64::from(*target) - from;
                if i8::try_from(displacement).is_ok() {
                    instr.opcode = short;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Simulate the evaluation stack over all reachable paths and record the maximum depth.
    ///
    /// Execution starts at the first instruction with an empty stack and at every handler and
    /// filter entry with the depth the runtime provides there. `leave` empties the stack.
    ///
    /// # Arguments
    ///
    /// * `returns_value` - Whether the method's `ret` pops a return value
    ///
    /// # Returns
    ///
    /// The maximum stack depth, which is also stored in [`MethodBody::max_stack`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackImbalance`] on stack underflow, when two paths join with different
    /// depths, when `ret` leaves values behind, or when control runs off the end of the body.
    /// Returns [`Error::Malformed`] if a branch target is missing or the stack effect of an
    /// instruction cannot be determined.
    pub fn compute_max_stack(&mut self, returns_value: bool) -> Result<u16> {
        if self.instructions.is_empty() {
            self.max_stack = 0;
            return Ok(0);
        }

        let index = self.index_map();
        let mut depths: Vec<Option<u16>> = vec![None; self.instructions.len()];
        let mut worklist: Vec<(usize, u16)> = vec![(0, 0)];
        for eh in &self.exception_handlers {
            let start = *index
                .get(&eh.handler_start)
                .ok_or_else(|| malformed_error!("Handler start {} not in body", eh.handler_start))?;
            worklist.push((start, eh.handler_entry_depth()));
            if let Some(filter) = eh.filter_start {
                let start = *index
                    .get(&filter)
                    .ok_or_else(|| malformed_error!("Filter start {} not in body", filter))?;
                worklist.push((start, 1));
            }
        }

        let mut max = 0u16;
        while let Some((at, depth)) = worklist.pop() {
            match depths[at] {
                Some(seen) if seen == depth => continue,
                Some(seen) => {
                    return Err(Error::StackImbalance {
                        index: at,
                        message: format!("paths join with depths {seen} and {depth}"),
                    })
                }
                None => depths[at] = Some(depth),
            }
            max = max.max(depth);

            let instr = &self.instructions[at];
            let effect = instr.stack_behavior(returns_value).ok_or_else(|| {
                malformed_error!("Unknown stack effect for '{}' at {}", instr.opcode, at)
            })?;
            let after = depth.checked_sub(effect.pops).ok_or_else(|| Error::StackImbalance {
                index: at,
                message: format!("'{}' pops {} of {}", instr.opcode, effect.pops, depth),
            })?;
            let after = after + effect.pushes;
            max = max.max(after);

            let flow = instr.flow_type();
            if flow == FlowType::Return && instr.opcode == Opcode::Ret && after != 0 {
                return Err(Error::StackImbalance {
                    index: at,
                    message: format!("ret leaves {after} values on the stack"),
                });
            }

            let target_depth = if flow == FlowType::Leave { 0 } else { after };
            for target in instr.branch_targets() {
                let t = *index
                    .get(&target)
                    .ok_or_else(|| malformed_error!("Branch target {} not in body", target))?;
                worklist.push((t, target_depth));
            }

            if flow.falls_through() {
                if at + 1 >= self.instructions.len() {
                    return Err(Error::StackImbalance {
                        index: at,
                        message: "control falls off the end of the body".to_string(),
                    });
                }
                worklist.push((at + 1, after));
            }
        }

        self.max_stack = max;
        Ok(max)
    }
}
