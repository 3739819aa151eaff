//! Exception handler regions expressed over blocks.

use std::collections::HashSet;

use crate::{
    analysis::cfg::BlockId,
    metadata::{method::ExceptionHandlerFlags, token::Token},
};

/// An exception handler clause whose ranges are sets of blocks.
///
/// Block lists are kept in layout order, so the first entry of each list is the block where the
/// range starts. The rebuilder realigns the clause to the first and last surviving block of
/// each list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegion {
    /// Handler kind
    pub flags: ExceptionHandlerFlags,
    /// Caught exception type, for typed clauses
    pub catch_type: Option<Token>,
    /// Protected blocks
    pub try_blocks: Vec<BlockId>,
    /// Handler blocks; the first one is the handler entry
    pub handler_blocks: Vec<BlockId>,
    /// Filter blocks; the first one is the filter entry
    pub filter_blocks: Vec<BlockId>,
}

impl HandlerRegion {
    /// First block of the handler.
    #[must_use]
    pub fn handler_entry(&self) -> Option<BlockId> {
        self.handler_blocks.first().copied()
    }

    /// First block of the filter, for filter clauses.
    #[must_use]
    pub fn filter_entry(&self) -> Option<BlockId> {
        self.filter_blocks.first().copied()
    }

    /// True if the block belongs to any range of this region.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.try_blocks.contains(&block)
            || self.handler_blocks.contains(&block)
            || self.filter_blocks.contains(&block)
    }

    /// True if the block starts the handler or the filter.
    #[must_use]
    pub fn is_entry(&self, block: BlockId) -> bool {
        self.handler_entry() == Some(block) || self.filter_entry() == Some(block)
    }

    /// Which ranges of this region contain the block, as `(try, handler, filter)`.
    #[must_use]
    pub fn membership(&self, block: BlockId) -> (bool, bool, bool) {
        (
            self.try_blocks.contains(&block),
            self.handler_blocks.contains(&block),
            self.filter_blocks.contains(&block),
        )
    }

    /// Record that `new` was split off `original` and follows it in layout.
    pub(crate) fn inherit(&mut self, original: BlockId, new: BlockId) {
        for list in [
            &mut self.try_blocks,
            &mut self.handler_blocks,
            &mut self.filter_blocks,
        ] {
            if let Some(pos) = list.iter().position(|b| *b == original) {
                list.insert(pos + 1, new);
            }
        }
    }

    /// Drop removed blocks from all ranges.
    ///
    /// Returns `false` if the region no longer describes a valid clause: the try range is
    /// empty, or the handler or filter entry was removed.
    pub(crate) fn retain_live(&mut self, removed: &HashSet<BlockId>) -> bool {
        let entry_lost = self.handler_entry().map_or(true, |b| removed.contains(&b))
            || self.filter_entry().is_some_and(|b| removed.contains(&b));

        self.try_blocks.retain(|b| !removed.contains(b));
        self.handler_blocks.retain(|b| !removed.contains(b));
        self.filter_blocks.retain(|b| !removed.contains(b));

        !entry_lost && !self.try_blocks.is_empty() && !self.handler_blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> HandlerRegion {
        HandlerRegion {
            flags: ExceptionHandlerFlags::FINALLY,
            catch_type: None,
            try_blocks: vec![BlockId(1), BlockId(2), BlockId(3)],
            handler_blocks: vec![BlockId(4), BlockId(5)],
            filter_blocks: Vec::new(),
        }
    }

    #[test]
    fn test_retain_shrinks_try() {
        let mut r = region();
        assert!(r.retain_live(&HashSet::from([BlockId(2)])));
        assert_eq!(r.try_blocks, vec![BlockId(1), BlockId(3)]);
    }

    #[test]
    fn test_retain_drops_on_empty_try_or_lost_entry() {
        let mut r = region();
        assert!(!r.retain_live(&HashSet::from([BlockId(1), BlockId(2), BlockId(3)])));
        let mut r = region();
        assert!(!r.retain_live(&HashSet::from([BlockId(4)])));
        let mut r = region();
        assert!(r.retain_live(&HashSet::from([BlockId(5)])));
    }

    #[test]
    fn test_inherit_after_split() {
        let mut r = region();
        r.inherit(BlockId(4), BlockId(9));
        assert_eq!(r.handler_blocks, vec![BlockId(4), BlockId(9), BlockId(5)]);
        assert_eq!(r.membership(BlockId(9)), (false, true, false));
    }
}
