//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage descriptors and concurrent grouping
//! - The pipeline builder with build-time validation
//! - The single-stage executor and the fail-fast runner
//! - Retry with bounded backoff and fallback content

mod builder;
mod executor;
mod retry;
mod runner;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use executor::{StageAttempt, StageExecutor};
pub use retry::{
    BackoffStrategy, JitterStrategy, Resolution, RetryConfig, RetryContext, RetryDecision,
    RetryOutcome, RetryPolicy,
};
pub use runner::{PipelineRunner, RunReport};
pub use spec::{group_stages, Recovery, StageDescriptor, StageGroup};
