//! Cap Export Model
//!
//! Defines the data contracts for exporting a recording:
//! - **Settings:** Export format, frame rate, resolution, compression, and destination
//! - **Resolve:** Normalization of persisted settings into a legal combination
//! - **State:** The single-job export state machine and its observers
//!
//! Everything here is synchronous and free of I/O; the export engine drives it.

pub mod resolve;
pub mod settings;
pub mod state;

pub use resolve::*;
pub use settings::*;
pub use state::*;
