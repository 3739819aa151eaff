//! Serialization of a [`BlockGraph`] back into a flat [`MethodBody`].
//!
//! Blocks are emitted in layout order. Because edges are authoritative inside a graph, the
//! operand of every terminator is regenerated from the block's targets, and an explicit `br`
//! is synthesized wherever a fall-through successor is not the next block in layout. Handler
//! regions are realigned to the first and last surviving block of each range.

use std::collections::HashMap;

use crate::{
    analysis::cfg::{BlockGraph, BlockId, BlockKind, HandlerRegion},
    assembly::{InstrId, Instruction, Opcode, Operand},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
    Error::GraphError,
    Result,
};

/// Operand to fill in once every block start is known.
enum Fixup {
    Target(BlockId),
    Switch(Vec<BlockId>),
}

/// Emit the graph as a method body.
///
/// The produced body keeps the graph's local count and declared maximum stack; offsets are
/// computed but branch forms are left as they are, callers normally follow up with
/// [`MethodBody::simplify_branches`] and [`MethodBody::optimize_branches`].
///
/// # Errors
///
/// Returns [`crate::Error::GraphError`] if a block's edges do not match its terminator: a
/// branch without target, a conditional or switch without fall-through, or a fall-through
/// block other than the last one with nowhere to go.
pub fn rebuild(graph: &BlockGraph) -> Result<MethodBody> {
    let mut next_id = graph.next_instr_id;
    let mut fresh = || {
        let id = InstrId(next_id);
        next_id += 1;
        id
    };

    let mut instructions: Vec<Instruction> = Vec::with_capacity(graph.instruction_count());
    let mut starts: HashMap<BlockId, usize> = HashMap::new();
    let mut ends: HashMap<BlockId, usize> = HashMap::new();
    let mut fixups: Vec<(usize, Fixup)> = Vec::new();

    let layout = graph.layout();
    for (pos, id) in layout.iter().enumerate() {
        let block = graph
            .block(*id)
            .ok_or_else(|| GraphError(format!("layout names dead block {id}")))?;
        let next = layout.get(pos + 1).copied();
        starts.insert(*id, instructions.len());
        instructions.extend(block.instructions.iter().cloned());
        let last = instructions.len().wrapping_sub(1);

        let kind = block.kind();
        match kind {
            BlockKind::Branch | BlockKind::Leave | BlockKind::Conditional => {
                let target = block.targets.first().copied().ok_or_else(|| {
                    GraphError(format!("branch in block {id} has no target edge"))
                })?;
                fixups.push((last, Fixup::Target(target)));
            }
            BlockKind::Switch => fixups.push((last, Fixup::Switch(block.targets.clone()))),
            BlockKind::FallThrough | BlockKind::Exit => {}
        }

        match (kind, block.fall_through) {
            (BlockKind::FallThrough | BlockKind::Conditional | BlockKind::Switch, Some(to))
                if Some(to) != next =>
            {
                fixups.push((instructions.len(), Fixup::Target(to)));
                instructions.push(Instruction::new(fresh(), Opcode::Br, Operand::None));
            }
            (BlockKind::Conditional | BlockKind::Switch, None) => {
                return Err(GraphError(format!(
                    "conditional block {id} has no fall-through edge"
                )));
            }
            (BlockKind::FallThrough, None) if next.is_some() => {
                return Err(GraphError(format!(
                    "block {id} falls through but has no successor"
                )));
            }
            _ => {}
        }
        ends.insert(*id, instructions.len());
    }

    // Labels of empty trailing blocks need an instruction to point at
    if starts.values().any(|start| *start >= instructions.len()) {
        instructions.push(Instruction::new(fresh(), Opcode::Nop, Operand::None));
    }
    let id_at = |index: usize| instructions.get(index).map(|i| i.id);
    let block_start = |block: BlockId| -> Result<InstrId> {
        starts
            .get(&block)
            .and_then(|start| id_at(*start))
            .ok_or_else(|| GraphError(format!("edge to block {block} outside the layout")))
    };

    let mut resolved = Vec::with_capacity(fixups.len());
    for (at, fixup) in fixups {
        let operand = match fixup {
            Fixup::Target(block) => Operand::Target(block_start(block)?),
            Fixup::Switch(blocks) => Operand::Switch(
                blocks
                    .into_iter()
                    .map(&block_start)
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        resolved.push((at, operand));
    }

    let mut handlers = Vec::with_capacity(graph.regions().len());
    for region in graph.regions() {
        if let Some(handler) = realign(region, layout, &starts, &ends, &id_at) {
            handlers.push(handler);
        }
    }

    for (at, operand) in resolved {
        if let Some(instr) = instructions.get_mut(at) {
            instr.operand = operand;
        }
    }

    let mut body = MethodBody::new(instructions, handlers);
    body.local_count = graph.local_count;
    body.max_stack = graph.max_stack;
    body.reserve_ids(next_id);
    body.update_offsets();
    Ok(body)
}

/// Express a region as a handler clause over the emitted instruction stream.
///
/// Returns `None` if the try or handler range is empty.
fn realign(
    region: &HandlerRegion,
    layout: &[BlockId],
    starts: &HashMap<BlockId, usize>,
    ends: &HashMap<BlockId, usize>,
    id_at: &impl Fn(usize) -> Option<InstrId>,
) -> Option<ExceptionHandler> {
    let span = |blocks: &[BlockId]| -> Option<(usize, usize)> {
        let positions: Vec<usize> = blocks
            .iter()
            .filter_map(|b| layout.iter().position(|l| l == b))
            .collect();
        let first = layout.get(*positions.iter().min()?)?;
        let last = layout.get(*positions.iter().max()?)?;
        let (start, end) = (*starts.get(first)?, *ends.get(last)?);
        (start < end).then_some((start, end))
    };

    let (try_start, try_end) = span(&region.try_blocks)?;
    let (handler_start, handler_end) = span(&region.handler_blocks)?;
    let filter_start = if region.flags.contains(ExceptionHandlerFlags::FILTER) {
        Some(id_at(span(&region.filter_blocks)?.0)?)
    } else {
        None
    };

    Some(ExceptionHandler {
        flags: region.flags,
        try_start: id_at(try_start)?,
        try_end: id_at(try_end),
        handler_start: id_at(handler_start)?,
        handler_end: id_at(handler_end),
        filter_start,
        catch_type: region.catch_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::BodyAssembler;

    fn conditional_body() -> MethodBody {
        let mut asm = BodyAssembler::new();
        asm.emit_instruction("ldarg.0", None).unwrap();
        asm.emit_branch("brfalse.s", "else").unwrap();
        asm.emit_ldc_i4(1).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.define_label("else").unwrap();
        asm.emit_ldc_i4(2).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.finalize().unwrap()
    }

    #[test]
    fn test_round_trip_preserves_body() {
        let body = conditional_body();
        let graph = BlockGraph::from_body(&body).unwrap();
        let rebuilt = rebuild(&graph).unwrap();
        assert_eq!(rebuilt.instructions, body.instructions);
        assert_eq!(rebuilt.exception_handlers, body.exception_handlers);
    }

    #[test]
    fn test_reordered_layout_synthesizes_branch() {
        let body = conditional_body();
        let mut graph = BlockGraph::from_body(&body).unwrap();
        // B0 falls through to B1; move B1 to the end
        graph.layout = vec![BlockId(0), BlockId(2), BlockId(1)];
        let mut rebuilt = rebuild(&graph).unwrap();

        let opcodes: Vec<Opcode> = rebuilt.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::Ldarg0,
                Opcode::BrfalseS,
                Opcode::Br,
                Opcode::LdcI42,
                Opcode::Ret,
                Opcode::LdcI41,
                Opcode::Ret
            ]
        );
        assert_eq!(
            rebuilt.instructions[2].operand,
            Operand::Target(rebuilt.instructions[5].id)
        );
        assert_eq!(
            rebuilt.instructions[1].operand,
            Operand::Target(rebuilt.instructions[3].id)
        );
        assert!(rebuilt.next_id() > rebuilt.instructions[2].id.0);
        assert_eq!(rebuilt.compute_max_stack(true).unwrap(), 1);
    }

    #[test]
    fn test_missing_fall_through_is_rejected() {
        let mut graph = BlockGraph::from_body(&conditional_body()).unwrap();
        if let Some(block) = graph.block_mut(BlockId(0)) {
            block.fall_through = None;
        }
        assert!(matches!(rebuild(&graph), Err(GraphError(_))));
    }

    #[test]
    fn test_regions_follow_blocks() {
        let mut asm = BodyAssembler::new();
        asm.define_label("try").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("finally").unwrap();
        asm.emit_instruction("endfinally", None).unwrap();
        asm.define_label("exit").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.try_finally("try", "finally", "finally", "exit");
        let body = asm.finalize().unwrap();

        let mut graph = BlockGraph::from_body(&body).unwrap();
        let tail = graph.split_block(BlockId(0), 1).unwrap();
        assert_eq!(graph.regions()[0].try_blocks, vec![BlockId(0), tail]);
        let rebuilt = rebuild(&graph).unwrap();
        assert_eq!(rebuilt.exception_handlers, body.exception_handlers);
    }
}
