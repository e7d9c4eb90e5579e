//! Cap Export Common Utilities
//!
//! Shared infrastructure for all Cap export crates:
//! - Error types and result aliases
//! - Debounce and lock helpers for async coordination
//! - Tracing/logging initialization
//! - Configuration and persisted settings loading

pub mod config;
pub mod error;
pub mod logging;
pub mod sync;

pub use config::*;
pub use error::*;
pub use sync::*;
