//! Deferred work pipeline
//!
//! Work items registered while a response streams are executed in priority
//! order by one of two strategies:
//! - [`QueuedPipeline`]: one item after the other, results in priority order
//! - [`ConcurrentPipeline`]: a fixed pool of worker threads, results in
//!   completion order, optional deadline
//!
//! A failing item never stops its siblings; failures are reported in the
//! [`PipelineResult`].

pub mod concurrent;
pub mod priority;
pub mod queued;
pub mod registry;
pub mod result;
pub mod step;
pub mod work_item;

pub use concurrent::ConcurrentPipeline;
pub use priority::{
    order_by_priority, resolve_priority, PriorityCache, DEFAULT_PRIORITY, HIGHER_PRIORITY,
    LOWER_PRIORITY,
};
pub use queued::QueuedPipeline;
pub use registry::{StepFactory, StepRegistry, StepRegistryBuilder, STEP_FACTORY_ATTRIBUTES};
pub use result::{PipelineResult, PipelineResultBuilder, StepResult};
pub use step::{AttributeTextStep, RequestInfo, StaticTextStep, Step, StepContext};
pub use work_item::WorkItem;

use crate::error::PipelineError;

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting work items
    Collecting,
    /// Running steps
    Executing,
    /// Executed, further items are rejected
    Done,
}

/// Collects work items and executes them once
pub trait Pipeline {
    /// Register an item. Fails once execution has started.
    fn include(&mut self, item: WorkItem) -> Result<(), PipelineError>;

    /// Number of items waiting for execution
    fn pending(&self) -> usize;

    fn state(&self) -> PipelineState;

    /// Execute every registered item against `ctx`.
    ///
    /// Never fails as a whole: per-item failures are in the result. A second
    /// call returns an empty result.
    fn execute(&mut self, ctx: &StepContext) -> PipelineResult;
}

/// Log the failures of an execution and a summary line
pub(crate) fn log_result(strategy: &str, result: &PipelineResult) {
    for failure in result.failures() {
        if let Some(error) = &failure.error {
            log::error!("{} pipeline: {}", strategy, error);
        }
    }
    log::info!(
        "{} pipeline executed {} work items, {} failed",
        strategy,
        result.len(),
        result.failures().count()
    );
}
