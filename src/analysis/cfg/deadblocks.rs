//! Unreachable block elimination.

use std::collections::{HashSet, VecDeque};

use crate::{
    analysis::cfg::{BlockGraph, BlockId},
    Result,
};

/// Blocks reachable from the entry.
///
/// Handler and filter entries count as reachable once any block of their try range is, since
/// the runtime may transfer control there from anywhere inside the protected range.
#[must_use]
pub fn reachable_blocks(graph: &BlockGraph) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::from([graph.entry()]);

    loop {
        while let Some(id) = queue.pop_front() {
            if !graph.contains(id) || !reachable.insert(id) {
                continue;
            }
            queue.extend(graph.successors(id));
        }

        for region in graph.regions() {
            if !region.try_blocks.iter().any(|b| reachable.contains(b)) {
                continue;
            }
            for entry in region.handler_entry().into_iter().chain(region.filter_entry()) {
                if !reachable.contains(&entry) {
                    queue.push_back(entry);
                }
            }
        }
        if queue.is_empty() {
            break;
        }
    }
    reachable
}

/// Remove every block that cannot be reached from the entry.
///
/// Handler regions lose their unreachable blocks and are dropped entirely once their try
/// range or handler entry is gone.
///
/// # Returns
///
/// The number of removed blocks.
///
/// # Errors
///
/// Propagates [`BlockGraph::remove_blocks`] failures, which indicate an inconsistent graph.
pub fn remove_dead_blocks(graph: &mut BlockGraph) -> Result<usize> {
    let reachable = reachable_blocks(graph);
    let dead: HashSet<BlockId> = graph
        .layout()
        .iter()
        .copied()
        .filter(|id| !reachable.contains(id))
        .collect();
    if dead.is_empty() {
        return Ok(0);
    }
    graph.remove_blocks(&dead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::BodyAssembler, metadata::token::Token};

    #[test]
    fn test_removes_code_after_return() {
        let mut asm = BodyAssembler::new();
        asm.emit_instruction("ret", None).unwrap();
        asm.define_label("dead").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("br", "dead").unwrap();
        let mut graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();

        assert_eq!(remove_dead_blocks(&mut graph).unwrap(), 1);
        assert_eq!(graph.block_count(), 1);
        assert_eq!(remove_dead_blocks(&mut graph).unwrap(), 0);
    }

    #[test]
    fn test_handler_kept_while_try_reachable() {
        let mut asm = BodyAssembler::new();
        asm.define_label("try").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("catch").unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("exit").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.try_catch("try", "catch", "catch", "exit", Token::new(0x0100_0003));
        let mut graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();

        assert_eq!(remove_dead_blocks(&mut graph).unwrap(), 0);
        assert_eq!(graph.regions().len(), 1);
    }

    #[test]
    fn test_handler_dropped_with_unreachable_try() {
        let mut asm = BodyAssembler::new();
        asm.emit_instruction("ret", None).unwrap();
        asm.define_label("try").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("leave.s", "exit").unwrap();
        asm.define_label("finally").unwrap();
        asm.emit_instruction("endfinally", None).unwrap();
        asm.define_label("exit").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.try_finally("try", "finally", "finally", "exit");
        let mut graph = BlockGraph::from_body(&asm.finalize().unwrap()).unwrap();

        assert_eq!(remove_dead_blocks(&mut graph).unwrap(), 3);
        assert!(graph.regions().is_empty());
        assert_eq!(graph.block_count(), 1);
    }
}
