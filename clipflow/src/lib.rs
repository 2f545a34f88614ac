//! # Clipflow
//!
//! Orchestration engine for a short-form talking-head video pipeline.
//!
//! A run moves through a fixed sequence of stages:
//!
//! - **topic**: pick a trending topic for the configured niche
//! - **content**: write the spoken script, caption and image prompt
//! - **voice** and **visual**: synthesize the voice-over and acquire a face
//!   image, concurrently
//! - **animation**: lip-sync the face to the voice-over
//! - **marketing**: hashtags, posting time and platform metadata
//! - **publishing**: hand the video to a publisher
//!
//! Each stage reads and extends an immutable [`core::PipelineState`].
//! Transient failures are retried with exponential backoff, text stages
//! degrade to deterministic fallback content, and every run can be
//! cancelled or bounded by a deadline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clipflow::prelude::*;
//!
//! let config = AppConfig::load(None)?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let report = orchestrator.produce_content(Some("quantum computing")).await;
//! println!("{:?}", report.state.script());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod records;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{
        ContentGenerator, FaceAnimator, GeneratedContent, ImageSource, MarketingOptimizer,
        Publisher, SpeechSynthesizer, TopicSource,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::AppConfig;
    pub use crate::core::{PipelineState, StageName, StageOutput, StageStatus, StageTrace, StateField};
    pub use crate::errors::{ClipflowError, ErrorKind, PipelineValidationError, StageError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::{EngagementReport, Orchestrator, OrchestratorBuilder};
    pub use crate::pipeline::{
        PipelineBuilder, PipelineRunner, Recovery, RetryConfig, RetryPolicy, RunReport,
        StageDescriptor,
    };
    pub use crate::records::RunRecord;
    pub use crate::stages::{RunScope, Stage, StageContext};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
