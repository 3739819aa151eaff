//! Configuration for the control-flow deobfuscation engine.
//!
//! This module provides the configuration type controlling pass selection, iteration limits
//! and inlining heuristics.

use bitflags::bitflags;

bitflags! {
    /// Behaviour switches of the deobfuscator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeobfuscatorFlags: u32 {
        /// Restrict the constant folder to deciding branches and switches.
        ///
        /// Without this flag the folder also collapses literal arithmetic and comparison
        /// sequences into a single load and replaces constant `ldloc`s with literals.
        const DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS = 0x0000_0002;
    }
}

/// Configuration for the deobfuscation engine.
///
/// # Examples
///
/// ```rust
/// use dotscope_cflow::deobfuscation::{CflowConfig, DeobfuscatorFlags};
///
/// let config = CflowConfig::default()
///     .with_flags(DeobfuscatorFlags::DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS)
///     .with_max_iterations(5);
/// assert!(!config.fold_extra_instructions());
/// assert_eq!(config.max_iterations, 5);
/// ```
#[derive(Debug, Clone)]
pub struct CflowConfig {
    /// Maximum iterations of the transform pipeline per method (default: 20).
    pub max_iterations: usize,

    /// Enable the call inliner pass.
    pub enable_inlining: bool,

    /// Enable the constant folder pass.
    pub enable_constant_folding: bool,

    /// Enable the equation branch simplifier for methods containing a `switch`.
    pub enable_equations: bool,

    /// Maximum instruction count of an inlining candidate, including its `ret` (default: 16).
    pub inline_max_instructions: usize,

    /// Inline instance methods as well as static ones (default: false).
    pub inline_instance_methods: bool,

    /// Behaviour switches.
    pub flags: DeobfuscatorFlags,
}

impl Default for CflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            enable_inlining: true,
            enable_constant_folding: true,
            enable_equations: true,
            inline_max_instructions: 16,
            inline_instance_methods: false,
            flags: DeobfuscatorFlags::empty(),
        }
    }
}

impl CflowConfig {
    /// Sets the behaviour flags.
    #[must_use]
    pub fn with_flags(mut self, flags: DeobfuscatorFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the iteration limit of the transform pipeline.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Enables or disables the call inliner.
    #[must_use]
    pub fn with_inlining(mut self, enabled: bool) -> Self {
        self.enable_inlining = enabled;
        self
    }

    /// Enables or disables the constant folder.
    #[must_use]
    pub fn with_constant_folding(mut self, enabled: bool) -> Self {
        self.enable_constant_folding = enabled;
        self
    }

    /// Enables or disables the equation branch simplifier.
    #[must_use]
    pub fn with_equations(mut self, enabled: bool) -> Self {
        self.enable_equations = enabled;
        self
    }

    /// True unless [`DeobfuscatorFlags::DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS`] is set.
    #[must_use]
    pub fn fold_extra_instructions(&self) -> bool {
        !self
            .flags
            .contains(DeobfuscatorFlags::DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CflowConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.inline_max_instructions, 16);
        assert!(!config.inline_instance_methods);
        assert!(config.fold_extra_instructions());
    }

    #[test]
    fn test_flag_bits() {
        assert_eq!(DeobfuscatorFlags::DISABLE_CONSTANTS_FOLDER_EXTRA_INSTRS.bits(), 2);
    }
}
