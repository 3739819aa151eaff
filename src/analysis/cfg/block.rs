//! Basic blocks of a [`crate::analysis::cfg::BlockGraph`].

use std::fmt;

use crate::assembly::{FlowType, InstrId, Instruction};

/// Stable identity of a block inside its graph.
///
/// Ids are arena slots; they stay valid until the block is removed and are never reused by
/// the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Classification of a block by its last instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// No terminator; control continues with `fall_through`
    FallThrough,
    /// `br`: single edge to `targets[0]`
    Branch,
    /// `leave`: single edge to `targets[0]`, exiting protected regions
    Leave,
    /// Conditional branch: true edge `targets[0]`, false edge `fall_through`
    Conditional,
    /// `switch`: one edge per case in `targets`, default edge `fall_through`
    Switch,
    /// `ret`, `throw`, `rethrow`, `endfinally`, `endfilter`, `jmp`: no edges
    Exit,
}

/// A maximal straight-line run of instructions.
///
/// The edges of a block live next to its instructions: `targets` lists the blocks named by the
/// terminator's operand in operand order, and `fall_through` is the block that follows when
/// the terminator does not transfer control (or there is no terminator). Branch operands of
/// instructions inside a graph are not authoritative; the edges are, and the rebuilder
/// rewrites the operands from them.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Identity of this block
    pub id: BlockId,
    /// Instructions of the block; a terminator, if any, is the last one
    pub instructions: Vec<Instruction>,
    /// Terminator operand targets, in operand order
    pub targets: Vec<BlockId>,
    /// Block reached when control does not branch
    pub fall_through: Option<BlockId>,
}

impl BasicBlock {
    /// Create a block without edges.
    #[must_use]
    pub fn new(id: BlockId, instructions: Vec<Instruction>) -> Self {
        BasicBlock {
            id,
            instructions,
            targets: Vec::new(),
            fall_through: None,
        }
    }

    /// The kind of the block, derived from its last instruction.
    ///
    /// Because the kind follows the opcode, rewriting a terminator in place (for example
    /// `brtrue` to `br` or to `nop`) reclassifies the block without further bookkeeping.
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self.instructions.last().map(Instruction::flow_type) {
            None | Some(FlowType::Sequential | FlowType::Call) => BlockKind::FallThrough,
            Some(FlowType::UnconditionalBranch) => BlockKind::Branch,
            Some(FlowType::Leave) => BlockKind::Leave,
            Some(FlowType::ConditionalBranch) => BlockKind::Conditional,
            Some(FlowType::Switch) => BlockKind::Switch,
            Some(
                FlowType::Return | FlowType::Throw | FlowType::EndFinally | FlowType::EndFilter,
            ) => BlockKind::Exit,
        }
    }

    /// The terminating instruction, if the block ends in one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminal())
    }

    /// Mutable access to the terminating instruction.
    pub fn terminator_mut(&mut self) -> Option<&mut Instruction> {
        self.instructions.last_mut().filter(|i| i.is_terminal())
    }

    /// Successor blocks in edge order: operand targets first, then the fall-through.
    ///
    /// Only edges that match the block kind are reported, and duplicates are kept (a
    /// conditional branch to its own fall-through has two edges to the same block).
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self.kind() {
            BlockKind::FallThrough => self.fall_through.into_iter().collect(),
            BlockKind::Branch | BlockKind::Leave => self.targets.first().copied().into_iter().collect(),
            BlockKind::Conditional => self
                .targets
                .first()
                .copied()
                .into_iter()
                .chain(self.fall_through)
                .collect(),
            BlockKind::Switch => self
                .targets
                .iter()
                .copied()
                .chain(self.fall_through)
                .collect(),
            BlockKind::Exit => Vec::new(),
        }
    }

    /// Id of the first instruction, `None` for an empty block.
    #[must_use]
    pub fn first_id(&self) -> Option<InstrId> {
        self.instructions.first().map(|i| i.id)
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if the block has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Opcode, Operand};

    fn block(opcodes: &[Opcode]) -> BasicBlock {
        let instructions = opcodes
            .iter()
            .enumerate()
            .map(|(i, op)| Instruction::new(InstrId(i as u32), *op, Operand::None))
            .collect();
        let mut block = BasicBlock::new(BlockId(0), instructions);
        block.targets = vec![BlockId(1)];
        block.fall_through = Some(BlockId(2));
        block
    }

    #[test]
    fn test_kind_follows_last_opcode() {
        assert_eq!(block(&[]).kind(), BlockKind::FallThrough);
        assert_eq!(block(&[Opcode::Nop, Opcode::Call]).kind(), BlockKind::FallThrough);
        assert_eq!(block(&[Opcode::BrS]).kind(), BlockKind::Branch);
        assert_eq!(block(&[Opcode::Brtrue]).kind(), BlockKind::Conditional);
        assert_eq!(block(&[Opcode::Switch]).kind(), BlockKind::Switch);
        assert_eq!(block(&[Opcode::LeaveS]).kind(), BlockKind::Leave);
        for exit in [Opcode::Ret, Opcode::Throw, Opcode::Rethrow, Opcode::Endfinally, Opcode::Endfilter] {
            assert_eq!(block(&[exit]).kind(), BlockKind::Exit);
        }
    }

    #[test]
    fn test_successors_by_kind() {
        assert_eq!(block(&[Opcode::Nop]).successors(), vec![BlockId(2)]);
        assert_eq!(block(&[Opcode::Br]).successors(), vec![BlockId(1)]);
        assert_eq!(
            block(&[Opcode::Brfalse]).successors(),
            vec![BlockId(1), BlockId(2)]
        );
        assert!(block(&[Opcode::Ret]).successors().is_empty());
    }

    #[test]
    fn test_in_place_rewrite_reclassifies() {
        let mut b = block(&[Opcode::Brtrue]);
        b.instructions[0].opcode = Opcode::Nop;
        assert_eq!(b.kind(), BlockKind::FallThrough);
        assert!(b.terminator().is_none());
        assert_eq!(b.successors(), vec![BlockId(2)]);
    }
}
