//! Core domain model types for clipflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage names and execution status
//! - The pipeline state record and its fields
//! - Stage outputs and per-stage traces

mod output;
mod state;
mod status;
mod trace;

pub use output::StageOutput;
pub use state::{PipelineState, StateField};
pub use status::{StageName, StageStatus};
pub use trace::StageTrace;
