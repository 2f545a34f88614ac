//! Stage descriptors: what a stage reads, what it writes and how it recovers.

use crate::core::{StageName, StateField};
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What happens when a stage's primary action cannot produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Commit the stage's fallback output and mark it degraded.
    Degrade,
    /// Fail the run.
    #[default]
    Propagate,
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    /// The canonical stage name.
    pub name: StageName,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Fields that must be present and non-empty on entry.
    pub requires: Vec<StateField>,
    /// Fields the stage writes, all of them on success.
    pub produces: Vec<StateField>,
    /// Whether the stage runs concurrently with its predecessor.
    pub independent: bool,
    /// The recovery policy.
    pub recovery: Recovery,
}

impl StageDescriptor {
    /// Creates a descriptor named after `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn Stage>) -> Self {
        Self {
            name: runner.name(),
            runner,
            requires: Vec::new(),
            produces: Vec::new(),
            independent: false,
            recovery: Recovery::Propagate,
        }
    }

    /// Sets the required inputs.
    #[must_use]
    pub fn requires(mut self, fields: impl IntoIterator<Item = StateField>) -> Self {
        self.requires = fields.into_iter().collect();
        self
    }

    /// Sets the produced outputs.
    #[must_use]
    pub fn produces(mut self, fields: impl IntoIterator<Item = StateField>) -> Self {
        self.produces = fields.into_iter().collect();
        self
    }

    /// Groups the stage with its predecessor.
    #[must_use]
    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    /// Sets the recovery policy.
    #[must_use]
    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    /// Returns true if fallback content may replace a failure.
    #[must_use]
    pub fn degrades(&self) -> bool {
        self.recovery == Recovery::Degrade
    }
}

/// A group of stages that run concurrently from the same base state.
///
/// Single stages form a group of one.
#[derive(Debug, Clone)]
pub struct StageGroup {
    /// Members in descriptor order.
    pub members: Vec<StageDescriptor>,
}

impl StageGroup {
    /// Returns the member names.
    #[must_use]
    pub fn names(&self) -> Vec<StageName> {
        self.members.iter().map(|d| d.name).collect()
    }

    /// Returns true if the group runs more than one stage.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.members.len() > 1
    }
}

/// Splits descriptors into execution groups.
///
/// An independent stage joins the group of the stage before it.
#[must_use]
pub fn group_stages(descriptors: &[StageDescriptor]) -> Vec<StageGroup> {
    let mut groups: Vec<StageGroup> = Vec::new();
    for descriptor in descriptors {
        match groups.last_mut() {
            Some(group) if descriptor.independent => group.members.push(descriptor.clone()),
            _ => groups.push(StageGroup {
                members: vec![descriptor.clone()],
            }),
        }
    }
    groups
}
