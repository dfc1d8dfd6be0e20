//! Error types shared by the streaming engine and the step pipeline.
//!
//! Streaming errors are fatal to the response being filtered: a broken
//! decode stream cannot be continued. Pipeline errors are isolated per work
//! item and surface through `PipelineResult`, never as a panic.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::WorkItem;
use crate::streaming::Charset;

/// Why a byte sequence could not be turned into a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    /// Sequence is not valid in the charset
    #[error("malformed input")]
    Malformed,
    /// Byte has no mapping in the charset
    #[error("unmappable character")]
    Unmappable,
    /// Maximum character size reached (or stream ended) without a character
    #[error("incomplete character sequence")]
    Incomplete,
}

/// Fatal decoding failure carrying the offending bytes and engine state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Error while decoding bytes {bytes:?} encoded in {charset}: {reason}. Current buffer is '{buffered}'."
)]
pub struct DecodeError {
    pub bytes: Vec<u8>,
    pub charset: Charset,
    pub buffered: String,
    pub reason: DecodeFailure,
}

/// Invalid matcher wiring, detected when an engine is built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchConfigError {
    #[error("text matcher pattern must not be empty")]
    EmptyPattern,
    #[error("invalid tag name '{0}'")]
    InvalidTagName(String),
    #[error("buffer limit must be greater than zero")]
    ZeroBufferLimit,
}

/// Failure while filtering a stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("output error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] MatchConfigError),
}

impl From<StreamError> for io::Error {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::Io(e) => e,
            StreamError::Decode(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            StreamError::Config(e) => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}

/// Boxed error raised by a step's own logic
pub type StepFailure = Box<dyn std::error::Error + Send + Sync>;

/// Failure to resolve or execute the step for a work item
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No step found to execute work item '{}'", .item.id())]
    NoHandler { item: WorkItem },

    #[error("Cannot find step factory '{name}' for work item '{}'", .item.id())]
    UnknownFactory { name: String, item: WorkItem },

    #[error("Cannot instantiate step '{name}': {source}")]
    Instantiation {
        name: String,
        item: WorkItem,
        #[source]
        source: StepFailure,
    },

    #[error("Exception when executing step for work item '{}': {source}", .item.id())]
    Execution {
        item: WorkItem,
        #[source]
        source: StepFailure,
    },

    #[error("Step for work item '{}' panicked: {message}", .item.id())]
    Panicked { message: String, item: WorkItem },

    #[error("Work item '{}' did not complete within {timeout:?}", .item.id())]
    TimedOut { timeout: Duration, item: WorkItem },

    #[error("Pipeline has already been executed")]
    AlreadyExecuted,
}

impl PipelineError {
    /// Work item that failed, if the error concerns one
    pub fn item(&self) -> Option<&WorkItem> {
        match self {
            PipelineError::NoHandler { item }
            | PipelineError::UnknownFactory { item, .. }
            | PipelineError::Instantiation { item, .. }
            | PipelineError::Execution { item, .. }
            | PipelineError::Panicked { item, .. }
            | PipelineError::TimedOut { item, .. } => Some(item),
            PipelineError::AlreadyExecuted => None,
        }
    }
}
