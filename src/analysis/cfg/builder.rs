//! Partitioning of a method body into a [`BlockGraph`].
//!
//! Leaders are the first instruction, every branch target, every instruction following a
//! terminator, and every exception handler boundary. Each leader starts a block that runs up
//! to the next leader. Handler clauses become [`HandlerRegion`]s over the resulting blocks.

use std::collections::{BTreeSet, HashMap};

use crate::{
    analysis::cfg::{BasicBlock, BlockGraph, BlockId, BlockKind, HandlerRegion},
    assembly::InstrId,
    metadata::method::{ExceptionHandler, MethodBody},
    Result,
};

impl BlockGraph {
    /// Partition a method body into basic blocks.
    ///
    /// Block ids are assigned in body order starting at 0, so the entry block is `B0` and the
    /// initial layout is the identity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the body is empty, a branch target or handler
    /// boundary names an instruction that is not in the body, or the last instruction is a
    /// conditional branch or switch with nothing to fall through to.
    pub fn from_body(body: &MethodBody) -> Result<Self> {
        if body.is_empty() {
            return Err(malformed_error!("Cannot build a block graph from an empty body"));
        }

        let index = body.index_map();
        let resolve = |id: InstrId, what: &str| -> Result<usize> {
            index
                .get(&id)
                .copied()
                .ok_or_else(|| malformed_error!("{} {} not in body", what, id))
        };

        let len = body.len();
        let mut leaders = BTreeSet::from([0usize]);
        for (at, instr) in body.instructions.iter().enumerate() {
            for target in instr.branch_targets() {
                leaders.insert(resolve(target, "Branch target")?);
            }
            if instr.is_terminal() && at + 1 < len {
                leaders.insert(at + 1);
            }
        }
        for eh in &body.exception_handlers {
            for boundary in eh.boundaries() {
                leaders.insert(resolve(boundary, "Handler boundary")?);
            }
        }

        let starts: Vec<usize> = leaders.into_iter().collect();
        let block_of: HashMap<usize, BlockId> = starts
            .iter()
            .enumerate()
            .map(|(n, start)| (*start, BlockId(n)))
            .collect();

        let mut blocks = Vec::with_capacity(starts.len());
        for (n, start) in starts.iter().enumerate() {
            let end = starts.get(n + 1).copied().unwrap_or(len);
            let mut block = BasicBlock::new(BlockId(n), body.instructions[*start..end].to_vec());

            if let Some(last) = block.instructions.last() {
                for target in last.branch_targets() {
                    let at = resolve(target, "Branch target")?;
                    // Every branch target is a leader
                    if let Some(target_block) = block_of.get(&at) {
                        block.targets.push(*target_block);
                    }
                }
            }
            block.fall_through = (end < len).then(|| BlockId(n + 1));

            if block.fall_through.is_none()
                && matches!(block.kind(), BlockKind::Conditional | BlockKind::Switch)
            {
                return Err(malformed_error!(
                    "Conditional terminator at the end of the body has no fall-through"
                ));
            }
            blocks.push(Some(block));
        }

        let regions = body
            .exception_handlers
            .iter()
            .map(|eh| region_of(eh, &starts, len, &resolve))
            .collect::<Result<Vec<_>>>()?;

        Ok(BlockGraph {
            layout: (0..blocks.len()).map(BlockId).collect(),
            blocks,
            regions,
            entry: BlockId(0),
            next_instr_id: body.next_id(),
            local_count: body.local_count,
            max_stack: body.max_stack,
        })
    }
}

fn region_of(
    eh: &ExceptionHandler,
    starts: &[usize],
    len: usize,
    resolve: &impl Fn(InstrId, &str) -> Result<usize>,
) -> Result<HandlerRegion> {
    let end = |id: Option<InstrId>| id.map_or(Ok(len), |id| resolve(id, "Handler boundary"));
    let covered = |from: usize, to: usize| -> Vec<BlockId> {
        starts
            .iter()
            .enumerate()
            .filter(|(_, start)| **start >= from && **start < to)
            .map(|(n, _)| BlockId(n))
            .collect()
    };

    let try_start = resolve(eh.try_start, "Handler boundary")?;
    let handler_start = resolve(eh.handler_start, "Handler boundary")?;
    let filter_blocks = match eh.filter_start {
        Some(filter) => covered(resolve(filter, "Handler boundary")?, handler_start),
        None => Vec::new(),
    };

    Ok(HandlerRegion {
        flags: eh.flags,
        catch_type: eh.catch_type,
        try_blocks: covered(try_start, end(eh.try_end)?),
        handler_blocks: covered(handler_start, end(eh.handler_end)?),
        filter_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{BodyAssembler, Instruction, Opcode, Operand},
        metadata::{method::ExceptionHandlerFlags, token::Token},
        Error,
    };

    #[test]
    fn test_empty_body_is_malformed() {
        let body = MethodBody::new(Vec::new(), Vec::new());
        assert!(matches!(BlockGraph::from_body(&body), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let mut asm = BodyAssembler::new();
        asm.emit_ldc_i4(3).unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();
        assert_eq!(graph.block_count(), 1);
        assert!(graph.successors(graph.entry()).is_empty());
    }

    #[test]
    fn test_switch_partition() {
        let mut asm = BodyAssembler::new();
        asm.emit_instruction("ldarg.0", None).unwrap();
        asm.emit_switch(&["a", "b"]).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.define_label("a").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.define_label("b").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();

        assert_eq!(graph.block_count(), 4);
        assert_eq!(
            graph.successors(BlockId(0)),
            vec![BlockId(2), BlockId(3), BlockId(1)]
        );
    }

    #[test]
    fn test_missing_branch_target() {
        let instrs = vec![
            Instruction::new(InstrId(0), Opcode::Br, Operand::Target(InstrId(7))),
            Instruction::new(InstrId(1), Opcode::Ret, Operand::None),
        ];
        let body = MethodBody::new(instrs, Vec::new());
        assert!(matches!(BlockGraph::from_body(&body), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_trailing_conditional_is_malformed() {
        let instrs = vec![
            Instruction::new(InstrId(0), Opcode::Ldarg0, Operand::None),
            Instruction::new(InstrId(1), Opcode::Brtrue, Operand::Target(InstrId(0))),
        ];
        let body = MethodBody::new(instrs, Vec::new());
        assert!(matches!(BlockGraph::from_body(&body), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_handler_regions() {
        let mut asm = BodyAssembler::new();
        asm.define_label("try").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("catch").unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("exit").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.try_catch("try", "catch", "catch", "exit", Token::new(0x0100_0002));
        let graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();

        let region = &graph.regions()[0];
        assert_eq!(region.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(region.try_blocks, vec![BlockId(0)]);
        assert_eq!(region.handler_blocks, vec![BlockId(1)]);
        assert_eq!(region.handler_entry(), Some(BlockId(1)));
        assert_eq!(graph.successors(BlockId(0)), vec![BlockId(2)]);
    }
}
