//! The mutable block graph of one method.
//!
//! [`BlockGraph`] owns the basic blocks of a method in an arena addressed by [`BlockId`], a
//! layout order that decides how the blocks are serialized, and the exception handler regions
//! expressed over blocks. Passes rewrite instructions inside blocks and adjust edges; the graph
//! offers the structural operations on top of that:
//!
//! - [`BlockGraph::split_block`] and [`BlockGraph::merge_blocks`]
//! - [`BlockGraph::remove_blocks`] with handler region pruning
//! - [`BlockGraph::repartition`], which re-derives blocks from the flat instruction order
//!
//! Construction is [`BlockGraph::from_body`], serialization is
//! [`crate::analysis::cfg::rebuild`].

use std::{
    collections::{HashMap, HashSet},
    fmt::Write,
};

use crate::{
    analysis::cfg::{
        rebuild::rebuild, BasicBlock, BlockId, BlockKind, CfgEdge, CfgEdgeKind, HandlerRegion,
    },
    assembly::{InstrId, Instruction, Opcode, Operand},
    Error::GraphError,
    Result,
};

/// Basic blocks, layout and handler regions of one method.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    /// Block arena; removed blocks leave a `None` slot behind
    pub(crate) blocks: Vec<Option<BasicBlock>>,
    /// Serialization order of the live blocks; the entry block is always first
    pub(crate) layout: Vec<BlockId>,
    /// Exception handler regions in clause order
    pub(crate) regions: Vec<HandlerRegion>,
    /// Entry block
    pub(crate) entry: BlockId,
    /// Next unused instruction id
    pub(crate) next_instr_id: u32,
    /// Declared local count, carried to the rebuilt body
    pub(crate) local_count: u16,
    /// Declared maximum stack, carried to the rebuilt body
    pub(crate) max_stack: u16,
}

impl BlockGraph {
    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Live blocks in layout order.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Exception handler regions.
    #[must_use]
    pub fn regions(&self) -> &[HandlerRegion] {
        &self.regions
    }

    /// Get a live block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0).and_then(Option::as_ref)
    }

    /// Get a live block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Live blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.layout.iter().filter_map(|id| self.block(*id))
    }

    /// True if the block is live.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.block(id).is_some()
    }

    /// Total number of instructions in live blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks().map(BasicBlock::len).sum()
    }

    /// Allocate a fresh instruction id for synthesized instructions.
    pub fn alloc_instr_id(&mut self) -> InstrId {
        let id = InstrId(self.next_instr_id);
        self.next_instr_id += 1;
        id
    }

    /// Successors of a block, see [`BasicBlock::successors`].
    #[must_use]
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).map(BasicBlock::successors).unwrap_or_default()
    }

    /// Distinct predecessors of a block, in layout order.
    #[must_use]
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks()
            .filter(|b| b.successors().contains(&id))
            .map(|b| b.id)
            .collect()
    }

    /// Predecessor lists of all live blocks.
    #[must_use]
    pub fn predecessor_map(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut map: HashMap<BlockId, Vec<BlockId>> =
            self.layout.iter().map(|id| (*id, Vec::new())).collect();
        for block in self.blocks() {
            let mut seen = HashSet::new();
            for succ in block.successors() {
                if seen.insert(succ) {
                    map.entry(succ).or_default().push(block.id);
                }
            }
        }
        map
    }

    /// All control flow edges between live blocks, with their semantics.
    #[must_use]
    pub fn edges(&self) -> Vec<CfgEdge> {
        let mut edges = Vec::new();
        for block in self.blocks() {
            let from = block.id;
            match block.kind() {
                BlockKind::FallThrough => {
                    if let Some(to) = block.fall_through {
                        edges.push(CfgEdge::new(from, to, CfgEdgeKind::Unconditional));
                    }
                }
                BlockKind::Branch => {
                    if let Some(to) = block.targets.first() {
                        edges.push(CfgEdge::new(from, *to, CfgEdgeKind::Unconditional));
                    }
                }
                BlockKind::Leave => {
                    if let Some(to) = block.targets.first() {
                        edges.push(CfgEdge::new(from, *to, CfgEdgeKind::Leave));
                    }
                }
                BlockKind::Conditional => {
                    if let Some(to) = block.targets.first() {
                        edges.push(CfgEdge::new(from, *to, CfgEdgeKind::ConditionalTrue));
                    }
                    if let Some(to) = block.fall_through {
                        edges.push(CfgEdge::new(from, to, CfgEdgeKind::ConditionalFalse));
                    }
                }
                BlockKind::Switch => {
                    for (case, to) in block.targets.iter().enumerate() {
                        let case_value = i32::try_from(case).ok();
                        edges.push(CfgEdge::new(from, *to, CfgEdgeKind::Switch { case_value }));
                    }
                    if let Some(to) = block.fall_through {
                        edges.push(CfgEdge::new(
                            from,
                            to,
                            CfgEdgeKind::Switch { case_value: None },
                        ));
                    }
                }
                BlockKind::Exit => {}
            }
        }
        edges
    }

    /// Rewrite the terminator of a block into `br target`.
    ///
    /// Used when a conditional branch or switch has been decided statically. The terminator
    /// keeps its instruction id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if either block is not live or the block has no
    /// terminator.
    pub fn redirect_to(&mut self, id: BlockId, target: BlockId) -> Result<()> {
        let target_first = self
            .block(target)
            .ok_or_else(|| GraphError(format!("redirect target {target} is not live")))?
            .first_id();
        let block = self
            .block_mut(id)
            .ok_or_else(|| GraphError(format!("block {id} is not live")))?;
        let terminator = block
            .terminator_mut()
            .ok_or_else(|| GraphError(format!("block {id} has no terminator")))?;

        terminator.opcode = Opcode::Br;
        terminator.operand = match target_first {
            Some(first) => Operand::Target(first),
            None => terminator.operand.clone(),
        };
        block.targets = vec![target];
        block.fall_through = None;
        Ok(())
    }

    /// Neutralize the terminator of a block into `nop`, leaving only the fall-through edge.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if the block is not live, has no terminator, or has
    /// no fall-through successor to continue with.
    pub fn fall_through_only(&mut self, id: BlockId) -> Result<()> {
        let block = self
            .block_mut(id)
            .ok_or_else(|| GraphError(format!("block {id} is not live")))?;
        if block.fall_through.is_none() {
            return Err(GraphError(format!("block {id} has no fall-through successor")));
        }
        let terminator = block
            .terminator_mut()
            .ok_or_else(|| GraphError(format!("block {id} has no terminator")))?;

        terminator.opcode = Opcode::Nop;
        terminator.operand = Operand::None;
        block.targets.clear();
        Ok(())
    }

    /// Split a block before the instruction at index `at`.
    ///
    /// The tail becomes a new block placed right after the original in layout. It takes over
    /// the original's edges and handler region memberships, and the original falls through
    /// into it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if the block is not live or `at` is not strictly
    /// inside the block.
    pub fn split_block(&mut self, id: BlockId, at: usize) -> Result<BlockId> {
        let new_id = BlockId(self.blocks.len());
        let block = self
            .block_mut(id)
            .ok_or_else(|| GraphError(format!("block {id} is not live")))?;
        if at == 0 || at >= block.instructions.len() {
            return Err(GraphError(format!(
                "cannot split block {id} at {at} of {}",
                block.instructions.len()
            )));
        }

        let tail = block.instructions.split_off(at);
        let mut new_block = BasicBlock::new(new_id, tail);
        new_block.targets = std::mem::take(&mut block.targets);
        new_block.fall_through = block.fall_through.replace(new_id);

        self.blocks.push(Some(new_block));
        let pos = self
            .layout
            .iter()
            .position(|b| *b == id)
            .ok_or_else(|| GraphError(format!("block {id} missing from layout")))?;
        self.layout.insert(pos + 1, new_id);
        for region in &mut self.regions {
            region.inherit(id, new_id);
        }
        Ok(new_id)
    }

    /// Remove a set of blocks and prune the handler regions.
    ///
    /// Regions lose the removed blocks; a region whose try range becomes empty or whose
    /// handler or filter entry was removed is dropped. The entry block can never be removed.
    ///
    /// # Returns
    ///
    /// The number of blocks that were removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GraphError`] if the set contains the entry block or if a
    /// surviving block still has an edge into the set.
    pub fn remove_blocks(&mut self, removed: &HashSet<BlockId>) -> Result<usize> {
        if removed.contains(&self.entry) {
            return Err(GraphError("the entry block cannot be removed".to_string()));
        }
        for block in self.blocks() {
            if removed.contains(&block.id) {
                continue;
            }
            if let Some(dangling) = block.successors().iter().find(|s| removed.contains(s)) {
                return Err(GraphError(format!(
                    "block {} still reaches removed block {dangling}",
                    block.id
                )));
            }
        }

        let mut count = 0;
        for id in removed {
            if let Some(slot) = self.blocks.get_mut(id.0) {
                if slot.take().is_some() {
                    count += 1;
                }
            }
        }
        self.layout.retain(|id| !removed.contains(id));
        self.regions.retain_mut(|region| region.retain_live(removed));

        // Edges of survivors that no longer match their kind may still name removed blocks
        for slot in self.blocks.iter_mut().flatten() {
            slot.targets.retain(|t| !removed.contains(t));
            if slot.fall_through.is_some_and(|f| removed.contains(&f)) {
                slot.fall_through = None;
            }
        }
        Ok(count)
    }

    fn same_regions(&self, a: BlockId, b: BlockId) -> bool {
        self.regions
            .iter()
            .all(|r| r.membership(a) == r.membership(b))
    }

    fn is_region_entry(&self, id: BlockId) -> bool {
        self.regions.iter().any(|r| r.is_entry(id))
    }

    /// Merge single-entry chains.
    ///
    /// A block is merged into its predecessor when the predecessor's only successor is that
    /// block through a fall-through or an unconditional `br`, the block has no other
    /// predecessor, is not the entry or a handler entry, and both belong to the same handler
    /// regions. The now redundant `br` is removed.
    ///
    /// # Returns
    ///
    /// The number of merges performed.
    pub fn merge_blocks(&mut self) -> usize {
        let mut merged = 0;
        loop {
            let preds = self.predecessor_map();
            let candidate = self.layout.iter().copied().find_map(|id| {
                if id == self.entry || self.is_region_entry(id) {
                    return None;
                }
                let [pred] = preds.get(&id)?.as_slice() else {
                    return None;
                };
                let pred_block = self.block(*pred)?;
                let chains = match pred_block.kind() {
                    BlockKind::FallThrough => pred_block.fall_through == Some(id),
                    BlockKind::Branch => pred_block.targets.first() == Some(&id),
                    _ => false,
                };
                (chains && *pred != id && self.same_regions(*pred, id)).then_some((*pred, id))
            });

            let Some((pred, id)) = candidate else {
                break;
            };
            let Some(Some(block)) = self.blocks.get_mut(id.0).map(Option::take) else {
                break;
            };
            self.layout.retain(|b| *b != id);
            for region in &mut self.regions {
                region.try_blocks.retain(|b| *b != id);
                region.handler_blocks.retain(|b| *b != id);
                region.filter_blocks.retain(|b| *b != id);
            }

            if let Some(pred_block) = self.block_mut(pred) {
                if pred_block.kind() == BlockKind::Branch {
                    pred_block.instructions.pop();
                }
                pred_block.instructions.extend(block.instructions);
                pred_block.targets = block.targets;
                pred_block.fall_through = block.fall_through;
            }
            merged += 1;
        }
        merged
    }

    /// Re-derive blocks and edges from the current flat instruction order.
    ///
    /// The graph is serialized and built again. Blocks whose edge became a plain fall-through
    /// merge, and instructions that became leaders after in-place edits start new blocks.
    /// Block ids are not preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the serialized body cannot be partitioned again.
    pub fn repartition(&mut self) -> Result<()> {
        let body = rebuild(self)?;
        *self = BlockGraph::from_body(&body)?;
        Ok(())
    }

    /// Render the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"CFG: {}\";", escape_dot(name));
        }
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for block in self.blocks() {
            let mut label = block.id.to_string();
            if block.id == self.entry {
                label.push_str(" (entry)");
            }
            label.push_str("\\l");
            for instr in &block.instructions {
                let _ = write!(label, "{}\\l", escape_dot(&render(instr)));
            }
            let _ = writeln!(dot, "    {} [label=\"{}\"];", block.id, label);
        }
        dot.push('\n');

        for edge in self.edges() {
            let style = match edge.kind() {
                CfgEdgeKind::Unconditional => String::new(),
                CfgEdgeKind::ConditionalTrue => " [label=\"T\", color=green]".to_string(),
                CfgEdgeKind::ConditionalFalse => " [label=\"F\", color=red]".to_string(),
                CfgEdgeKind::Switch { case_value: Some(v) } => format!(" [label=\"{v}\"]"),
                CfgEdgeKind::Switch { case_value: None } => " [label=\"default\"]".to_string(),
                CfgEdgeKind::Leave => " [style=dashed]".to_string(),
            };
            let _ = writeln!(dot, "    {} -> {}{};", edge.source(), edge.target(), style);
        }

        dot.push_str("}\n");
        dot
    }
}

fn render(instr: &Instruction) -> String {
    if matches!(instr.operand, Operand::None) {
        format!("{}: {}", instr.id, instr.opcode)
    } else {
        format!("{}: {} {}", instr.id, instr.opcode, instr.operand)
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::BodyAssembler, metadata::method::MethodBody};

    /// if (arg0) { a } else { b }; ret
    fn diamond() -> MethodBody {
        let mut asm = BodyAssembler::new();
        asm.emit_instruction("ldarg.0", None).unwrap();
        asm.emit_branch("brtrue", "then").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.emit_branch("br", "join").unwrap();
        asm.define_label("then").unwrap();
        asm.emit_instruction("nop", None).unwrap();
        asm.define_label("join").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        asm.finalize().unwrap()
    }

    #[test]
    fn test_edges_and_predecessors() {
        let graph = BlockGraph::from_body(&diamond()).unwrap();
        assert_eq!(graph.block_count(), 4);
        let edges = graph.edges();
        assert!(edges.contains(&CfgEdge::new(BlockId(0), BlockId(2), CfgEdgeKind::ConditionalTrue)));
        assert!(edges.contains(&CfgEdge::new(BlockId(0), BlockId(1), CfgEdgeKind::ConditionalFalse)));
        assert_eq!(graph.predecessors(BlockId(3)), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_split_block() {
        let mut graph = BlockGraph::from_body(&diamond()).unwrap();
        let new = graph.split_block(BlockId(0), 1).unwrap();
        assert_eq!(graph.layout()[1], new);
        assert_eq!(graph.successors(BlockId(0)), vec![new]);
        assert_eq!(graph.successors(new), vec![BlockId(2), BlockId(1)]);
        assert!(graph.split_block(BlockId(0), 0).is_err());
    }

    #[test]
    fn test_remove_rejects_entry_and_dangling() {
        let mut graph = BlockGraph::from_body(&diamond()).unwrap();
        assert!(graph.remove_blocks(&HashSet::from([BlockId(0)])).is_err());
        assert!(graph.remove_blocks(&HashSet::from([BlockId(3)])).is_err());
    }

    #[test]
    fn test_redirect_and_merge() {
        let mut graph = BlockGraph::from_body(&diamond()).unwrap();
        // Decide the condition as taken: B0 -> B2, B1 becomes unreachable
        graph.redirect_to(BlockId(0), BlockId(2)).unwrap();
        graph.remove_blocks(&HashSet::from([BlockId(1)])).unwrap();
        let merges = graph.merge_blocks();
        assert_eq!(merges, 2);
        assert_eq!(graph.block_count(), 1);

        let block = graph.block(graph.entry()).unwrap();
        let opcodes: Vec<Opcode> = block.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Ldarg0, Opcode::Nop, Opcode::Ret]);
    }

    #[test]
    fn test_fall_through_only() {
        let mut graph = BlockGraph::from_body(&diamond()).unwrap();
        graph.fall_through_only(BlockId(0)).unwrap();
        assert_eq!(graph.successors(BlockId(0)), vec![BlockId(1)]);
        assert!(graph.fall_through_only(BlockId(3)).is_err());
    }

    #[test]
    fn test_repartition_merges_fall_through() {
        let mut graph = BlockGraph::from_body(&diamond()).unwrap();
        graph.fall_through_only(BlockId(0)).unwrap();
        graph.repartition().unwrap();
        // ldarg.0 nop nop br | nop | ret : the neutralized branch no longer splits
        assert_eq!(graph.block_count(), 3);
    }

    #[test]
    fn test_to_dot() {
        let graph = BlockGraph::from_body(&diamond()).unwrap();
        let dot = graph.to_dot(Some("Sample::Method"));
        assert!(dot.starts_with("digraph CFG {"));
        assert!(dot.contains("B0 -> B2 [label=\"T\", color=green];"));
        assert!(dot.contains("(entry)"));
    }
}
