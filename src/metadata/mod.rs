//! Method-level metadata the engine consumes.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references identifying methods
//! - [`method`] - Method definitions, bodies, exception handlers and the resolver trait
//! - [`module`] - In-memory method collection implementing the resolver

/// Implementation of methods, their bodies and exception handlers
pub mod method;
/// In-memory module holding method definitions
pub mod module;
/// Commonly used metadata token type
pub mod token;
