//! Configuration module for the BigPipe Wasm Filter
//!
//! CRITICAL: Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::streaming::{Charset, DEFAULT_BUFFER_LIMIT};

/// Pipeline strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// One item after the other, priority order
    #[default]
    Queued,
    /// Worker pool
    Concurrent,
}

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Charset of filtered response bodies
    #[serde(default = "default_charset")]
    pub charset: String,

    /// Flush the response after `</head>`
    #[serde(default = "default_true")]
    pub flush_after_head: bool,

    /// Execute the pipeline when `</body>` is seen
    #[serde(default = "default_true")]
    pub auto_execute_before_closing_body: bool,

    /// Register placeholder tags as work items
    #[serde(default = "default_true")]
    pub auto_detect_placeholders: bool,

    /// Characters a pending match may hold back
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,

    /// Name of the placeholder tag
    #[serde(default = "default_placeholder_tag")]
    pub placeholder_tag: String,

    /// Pipeline strategy
    #[serde(default)]
    pub pipeline: PipelineMode,

    /// Worker threads of the concurrent pipeline
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Deadline of the concurrent pipeline, unbounded when absent
    #[serde(default)]
    pub pipeline_timeout_ms: Option<u64>,

    /// Steps registered by work item id: id -> factory name
    #[serde(default)]
    pub steps: BTreeMap<String, String>,

    /// Static HTML fragments registered by work item id
    #[serde(default)]
    pub fragments: BTreeMap<String, String>,

    /// Emit structured pipeline events
    #[serde(default = "default_true")]
    pub log_events: bool,
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_true() -> bool {
    true
}

fn default_buffer_limit() -> usize {
    DEFAULT_BUFFER_LIMIT
}

fn default_placeholder_tag() -> String {
    "placeholder".to_string()
}

fn default_worker_threads() -> usize {
    4
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            charset: default_charset(),
            flush_after_head: true,
            auto_execute_before_closing_body: true,
            auto_detect_placeholders: true,
            buffer_limit: default_buffer_limit(),
            placeholder_tag: default_placeholder_tag(),
            pipeline: PipelineMode::default(),
            worker_threads: default_worker_threads(),
            pipeline_timeout_ms: None,
            steps: BTreeMap::new(),
            fragments: BTreeMap::new(),
            log_events: true,
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    /// Resolve the configured charset label
    pub fn charset(&self) -> Result<Charset, ConfigError> {
        Charset::for_label(&self.charset)
            .ok_or_else(|| ConfigError::UnknownCharset(self.charset.clone()))
    }

    pub fn pipeline_timeout(&self) -> Option<Duration> {
        self.pipeline_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Unknown charset '{0}'")]
    UnknownCharset(String),
    #[error("Step '{id}' uses unknown factory '{factory}'")]
    UnknownStepFactory { id: String, factory: String },
    #[error("Cannot instantiate step '{id}': {reason}")]
    StepInstantiation { id: String, reason: String },
}
