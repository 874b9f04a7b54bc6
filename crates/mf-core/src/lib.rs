//! mf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other mf-* crates,
//! providing type-safe identifiers, a unified error type, the media format
//! allow-list, application configuration, metric helpers, and a broadcast
//! event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod formats;
pub mod ids;
pub mod metrics;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use formats::{ConversionOptions, MediaKind, OutputFormat};
pub use ids::*;
