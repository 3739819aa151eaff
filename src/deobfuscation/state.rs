//! Per-batch bookkeeping of which methods were already deobfuscated.

use bitflags::bitflags;
use dashmap::DashMap;

use crate::metadata::token::Token;

bitflags! {
    /// Processing state of one method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodStateFlags: u32 {
        /// The full pipeline has run on the method in this batch.
        const HAS_DEOBFUSCATED = 0x0000_0001;
    }
}

/// Registry mapping method tokens to their [`MethodStateFlags`].
///
/// Owned by one [`crate::deobfuscation::CflowDeobfuscator`] for the life of a batch. Entries
/// are added on first visit and never removed; updates are atomic per entry, so workers can
/// share the registry.
#[derive(Debug, Default)]
pub struct DeobfuscationState {
    methods: DashMap<Token, MethodStateFlags>,
}

impl DeobfuscationState {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Flags recorded for a method, empty if it was never visited.
    #[must_use]
    pub fn flags(&self, token: Token) -> MethodStateFlags {
        self.methods
            .get(&token)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// True if all of `flags` are set for the method.
    #[must_use]
    pub fn check(&self, token: Token, flags: MethodStateFlags) -> bool {
        self.flags(token).contains(flags)
    }

    /// Set `flags` for the method, keeping flags already present.
    pub fn set(&self, token: Token, flags: MethodStateFlags) {
        *self.methods.entry(token).or_default() |= flags;
    }

    /// Atomically set `flags`, returning `true` if they were not all set before.
    ///
    /// This is the gate of the deobfuscation entry point: of several concurrent callers for
    /// the same method exactly one observes `true`.
    pub fn try_set(&self, token: Token, flags: MethodStateFlags) -> bool {
        let mut entry = self.methods.entry(token).or_default();
        if entry.contains(flags) {
            return false;
        }
        *entry |= flags;
        true
    }

    /// Number of methods with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True if no method was visited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
