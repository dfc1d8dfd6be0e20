//! Pipeline execution results

use super::work_item::WorkItem;
use crate::error::PipelineError;

/// Outcome of one work item
#[derive(Debug)]
pub struct StepResult {
    pub item: WorkItem,
    pub error: Option<PipelineError>,
}

impl StepResult {
    pub fn succeeded(item: WorkItem) -> Self {
        Self { item, error: None }
    }

    pub fn failed(item: WorkItem, error: PipelineError) -> Self {
        Self {
            item,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one pipeline execution
#[derive(Debug)]
pub struct PipelineResult {
    /// True when every item succeeded
    pub success: bool,
    pub results: Vec<StepResult>,
}

impl PipelineResult {
    pub fn builder() -> PipelineResultBuilder {
        PipelineResultBuilder::default()
    }

    /// Result of executing nothing
    pub fn empty() -> Self {
        Self {
            success: true,
            results: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Accumulates step results in completion order
#[derive(Debug, Default)]
pub struct PipelineResultBuilder {
    results: Vec<StepResult>,
}

impl PipelineResultBuilder {
    pub fn push(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// Record the outcome of executing `item`
    pub fn record(&mut self, item: WorkItem, outcome: Result<(), PipelineError>) {
        self.push(match outcome {
            Ok(()) => StepResult::succeeded(item),
            Err(e) => StepResult::failed(item, e),
        });
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn build(self) -> PipelineResult {
        PipelineResult {
            success: self.results.iter().all(StepResult::is_success),
            results: self.results,
        }
    }
}
