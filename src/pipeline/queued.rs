//! Sequential pipeline

use std::sync::Arc;

use log::warn;

use super::priority::order_by_priority;
use super::registry::StepRegistry;
use super::result::PipelineResult;
use super::step::StepContext;
use super::work_item::WorkItem;
use super::{log_result, Pipeline, PipelineState};
use crate::error::PipelineError;

/// Executes items one at a time in descending priority order, arrival
/// order between equal priorities. Results follow execution order.
pub struct QueuedPipeline {
    registry: Arc<StepRegistry>,
    items: Vec<WorkItem>,
    state: PipelineState,
}

impl QueuedPipeline {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            registry,
            items: Vec::new(),
            state: PipelineState::Collecting,
        }
    }
}

impl Pipeline for QueuedPipeline {
    fn include(&mut self, item: WorkItem) -> Result<(), PipelineError> {
        if self.state != PipelineState::Collecting {
            return Err(PipelineError::AlreadyExecuted);
        }
        self.items.push(item);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.items.len()
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn execute(&mut self, ctx: &StepContext) -> PipelineResult {
        if self.state != PipelineState::Collecting {
            warn!("Queued pipeline has already been executed");
            return PipelineResult::empty();
        }
        self.state = PipelineState::Executing;

        let items = order_by_priority(std::mem::take(&mut self.items), ctx, &self.registry);
        let mut builder = PipelineResult::builder();
        for item in items {
            let outcome = self.registry.execute(&item, ctx);
            builder.record(item, outcome);
        }

        self.state = PipelineState::Done;
        let result = builder.build();
        log_result("Queued", &result);
        result
    }
}
