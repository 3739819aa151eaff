//! Control flow edge types for the block graph.
//!
//! Edges are not stored; [`crate::analysis::cfg::BlockGraph::edges`] derives them from the
//! blocks' targets and fall-through links and attaches the control flow semantics.

use crate::analysis::cfg::BlockId;

/// The kind of control flow represented by an edge.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::analysis::cfg::CfgEdgeKind;
///
/// let edge_kind = CfgEdgeKind::ConditionalTrue;
/// assert!(edge_kind.is_conditional());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgEdgeKind {
    /// Unconditional control flow (direct jump or fall-through).
    Unconditional,

    /// The "true" branch of a conditional, taken when the branch condition holds.
    ConditionalTrue,

    /// The "false" branch of a conditional (fall-through).
    ConditionalFalse,

    /// A switch case edge.
    ///
    /// Contains the case value or `None` for the default (fall-through) case.
    Switch {
        /// The case value that triggers this edge, or `None` for the default case.
        case_value: Option<i32>,
    },

    /// Edge from a `leave` instruction exiting a protected region.
    Leave,
}

impl CfgEdgeKind {
    /// Returns `true` if this is a conditional branch edge.
    #[must_use]
    pub const fn is_conditional(&self) -> bool {
        matches!(self, Self::ConditionalTrue | Self::ConditionalFalse)
    }

    /// Returns `true` if this is a switch case edge.
    #[must_use]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }
}

/// An edge in the block graph.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::analysis::cfg::{BlockId, CfgEdge, CfgEdgeKind};
///
/// let edge = CfgEdge::new(BlockId(0), BlockId(1), CfgEdgeKind::Unconditional);
/// assert_eq!(edge.target(), BlockId(1));
/// assert!(!edge.kind().is_conditional());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfgEdge {
    /// The source block of this edge.
    source: BlockId,
    /// The target block of this edge.
    target: BlockId,
    /// The kind of control flow this edge represents.
    kind: CfgEdgeKind,
}

impl CfgEdge {
    /// Creates a new CFG edge.
    ///
    /// # Arguments
    ///
    /// * `source` - The source block
    /// * `target` - The target block
    /// * `kind` - The kind of control flow
    #[must_use]
    pub const fn new(source: BlockId, target: BlockId, kind: CfgEdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }

    /// Returns the source block of this edge.
    #[must_use]
    pub const fn source(&self) -> BlockId {
        self.source
    }

    /// Returns the target block of this edge.
    #[must_use]
    pub const fn target(&self) -> BlockId {
        self.target
    }

    /// Returns the kind of control flow this edge represents.
    #[must_use]
    pub const fn kind(&self) -> CfgEdgeKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_kind_predicates() {
        assert!(CfgEdgeKind::ConditionalFalse.is_conditional());
        assert!(!CfgEdgeKind::Leave.is_conditional());
        assert!(CfgEdgeKind::Switch { case_value: None }.is_switch());
        assert!(!CfgEdgeKind::Unconditional.is_switch());
    }
}
