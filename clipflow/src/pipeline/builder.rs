//! Pipeline builder with validation.

use super::executor::StageExecutor;
use super::retry::{RetryConfig, RetryPolicy};
use super::runner::PipelineRunner;
use super::spec::{group_stages, StageDescriptor};
use crate::core::{StageName, StateField};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::events::{EventSink, NoOpEventSink};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Every structural rule is checked in [`PipelineBuilder::build`]; a runner
/// that builds successfully can only fail at run time because of its
/// collaborators or its input state.
#[derive(Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDescriptor>,
    initial_fields: Vec<StateField>,
    retry: RetryConfig,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("initial_fields", &self.initial_fields)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            initial_fields: Vec::new(),
            retry: RetryConfig::default(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, descriptor: StageDescriptor) -> Self {
        self.stages.push(descriptor);
        self
    }

    /// Declares fields the initial state is expected to carry.
    #[must_use]
    pub fn with_initial_fields(mut self, fields: impl IntoIterator<Item = StateField>) -> Self {
        self.initial_fields = fields.into_iter().collect();
        self
    }

    /// Sets the retry configuration shared by every stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|d| d.name).collect()
    }

    /// Validates the stage list and builds the runner.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineValidationError`] carrying one of the
    /// `CONTRACT-004-*` codes when the stage list is empty, repeats a stage,
    /// breaks canonical order, reads a field nothing produced earlier, or
    /// groups stages that touch each other's fields.
    pub fn build(self) -> Result<PipelineRunner, PipelineValidationError> {
        self.validate()?;

        let groups = group_stages(&self.stages);
        let executor = StageExecutor::new(RetryPolicy::new(self.retry), self.sink.clone());
        Ok(PipelineRunner::new(self.name, groups, executor, self.sink))
    }

    fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage to the pipeline before building."),
            ));
        }

        self.check_order()?;
        self.check_groups()?;
        self.check_data_flow()
    }

    fn check_order(&self) -> Result<(), PipelineValidationError> {
        let mut seen = HashSet::new();
        for descriptor in &self.stages {
            if !seen.insert(descriptor.name) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' appears more than once",
                    descriptor.name
                ))
                .with_stages(vec![descriptor.name.to_string()])
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Duplicate stage '{}'", descriptor.name),
                )));
            }
        }

        for pair in self.stages.windows(2) {
            let (prev, next) = (pair[0].name, pair[1].name);
            if next.ordinal() <= prev.ordinal() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{next}' cannot follow '{prev}'"
                ))
                .with_stages(vec![prev.to_string(), next.to_string()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-ORDER", "Stages out of canonical order")
                        .with_fix_hint(
                            "Order stages as topic_selection, content, voice, visual, animation, marketing, publishing.",
                        ),
                ));
            }
        }

        if let Some(first) = self.stages.first().filter(|d| d.independent) {
            return Err(PipelineValidationError::new(format!(
                "First stage '{}' has no predecessor to run alongside",
                first.name
            ))
            .with_stages(vec![first.name.to_string()])
            .with_error_info(ContractErrorInfo::new(
                "CONTRACT-004-ORDER",
                "Independent stage without predecessor",
            )));
        }

        Ok(())
    }

    fn check_groups(&self) -> Result<(), PipelineValidationError> {
        for group in group_stages(&self.stages) {
            let mut owners: HashMap<StateField, StageName> = HashMap::new();
            for member in &group.members {
                for field in &member.produces {
                    if let Some(owner) = owners.insert(*field, member.name) {
                        return Err(overlap_error(owner, member.name, format!(
                            "Concurrent stages '{owner}' and '{}' both produce '{field}'",
                            member.name
                        )));
                    }
                }
            }
            for member in &group.members {
                for field in &member.requires {
                    if let Some(owner) = owners.get(field).filter(|o| **o != member.name) {
                        return Err(overlap_error(*owner, member.name, format!(
                            "Stage '{}' reads '{field}' produced by concurrent stage '{owner}'",
                            member.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_data_flow(&self) -> Result<(), PipelineValidationError> {
        let mut available: HashSet<StateField> = self.initial_fields.iter().copied().collect();

        for group in group_stages(&self.stages) {
            for member in &group.members {
                if let Some(field) = member.requires.iter().find(|f| !available.contains(f)) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' requires '{field}' but no earlier stage produces it",
                        member.name
                    ))
                    .with_stages(vec![member.name.to_string()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CONTRACT-004-MISSING_INPUT",
                            format!("Input '{field}' is never produced"),
                        )
                        .with_fix_hint(
                            "Add the producing stage earlier in the pipeline or declare it as an initial field.",
                        ),
                    ));
                }
            }

            for member in &group.members {
                for field in &member.produces {
                    if !available.insert(*field) && !field.is_accumulated() {
                        return Err(PipelineValidationError::new(format!(
                            "Stage '{}' produces '{field}', which is already set",
                            member.name
                        ))
                        .with_stages(vec![member.name.to_string()])
                        .with_error_info(ContractErrorInfo::new(
                            "CONTRACT-004-DUPLICATE",
                            format!("Field '{field}' has more than one producer"),
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn overlap_error(a: StageName, b: StageName, message: String) -> PipelineValidationError {
    PipelineValidationError::new(message)
        .with_stages(vec![a.to_string(), b.to_string()])
        .with_error_info(
            ContractErrorInfo::new(
                "CONTRACT-004-CONCURRENT_OVERLAP",
                "Concurrent stages must own disjoint fields",
            )
            .with_fix_hint("Remove the independent flag or split the shared field."),
        )
}
