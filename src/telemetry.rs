//! Telemetry Module for the BigPipe filter
//!
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

use crate::pipeline::PipelineResult;

/// Pipeline event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventType {
    /// Placeholder registered as a work item
    PlaceholderRegistered,
    /// Pipeline executed
    PipelineExecuted,
    /// A work item failed
    StepFailed,
    /// Response stream could not be filtered
    StreamFailed,
}

/// Pipeline event for logging
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    /// Event type
    pub event_type: PipelineEventType,
    /// Envoy HTTP context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<u32>,
    /// Request path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
    /// Work item id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Explicit item priority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Items executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<usize>,
    /// Items failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<usize>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PipelineEvent {
    /// Create a new pipeline event
    pub fn new(event_type: PipelineEventType) -> Self {
        Self {
            event_type,
            context_id: None,
            request_path: None,
            item_id: None,
            priority: None,
            items: None,
            failures: None,
            reason: None,
        }
    }

    pub fn with_context_id(mut self, context_id: u32) -> Self {
        self.context_id = Some(context_id);
        self
    }

    pub fn with_request_path(mut self, path: &str) -> Self {
        self.request_path = Some(path.to_string());
        self
    }

    pub fn with_item(mut self, id: &str) -> Self {
        self.item_id = Some(id.to_string());
        self
    }

    pub fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                PipelineEventType::StepFailed | PipelineEventType::StreamFailed => {
                    warn!("[BIGPIPE-AUDIT] {}", json);
                }
                _ => {
                    info!("[BIGPIPE-AUDIT] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize pipeline event: {}", e);
            }
        }
    }
}

/// Create a placeholder registered event
pub fn placeholder_registered(id: &str, priority: Option<i32>) -> PipelineEvent {
    PipelineEvent::new(PipelineEventType::PlaceholderRegistered)
        .with_item(id)
        .with_priority(priority)
}

/// Create a pipeline executed event summarizing `result`
pub fn pipeline_executed(result: &PipelineResult) -> PipelineEvent {
    let mut event = PipelineEvent::new(PipelineEventType::PipelineExecuted);
    event.items = Some(result.len());
    event.failures = Some(result.failures().count());
    event
}

/// Create a step failed event
pub fn step_failed(id: &str, reason: &str) -> PipelineEvent {
    PipelineEvent::new(PipelineEventType::StepFailed)
        .with_item(id)
        .with_reason(reason)
}

/// Create a stream failed event
pub fn stream_failed(reason: &str) -> PipelineEvent {
    PipelineEvent::new(PipelineEventType::StreamFailed).with_reason(reason)
}
