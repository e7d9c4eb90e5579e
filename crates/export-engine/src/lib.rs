//! Cap Export Engine
//!
//! Runs recording exports on top of an external media backend:
//! - **Preview:** Debounced single-frame previews with cached size/time estimates
//! - **Controller:** One export job at a time, with cooperative cancellation
//! - **Destination:** Save, clipboard, and upload post-processing
//! - **Persist:** Last-used export settings, resolved on load
//! - **Backend:** Traits for the render pipeline, media commands, and host UI

pub mod backend;
pub mod controller;
pub mod destination;
pub mod persist;
pub mod preview;

pub use backend::*;
pub use controller::{ExportController, ExportOutcome, JobReport};
pub use destination::{PostProcessOutput, PostProcessor};
pub use persist::ExportSettingsStore;
pub use preview::{PreviewEstimator, PreviewRequest, PreviewSnapshot, RenderEstimate};
