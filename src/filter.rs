//! BigPipe response filter
//!
//! Wires the default bindings onto a response stream:
//! 1. placeholder tags register work items (the tag itself passes through)
//! 2. `</body>` executes the pipeline, step output goes before `</body>`
//! 3. `</head>` flushes the response so the shell reaches the client early
//!
//! Items still pending when the response ends are executed at close and
//! their output is appended.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::{ConfigError, FilterConfig, PipelineMode};
use crate::error::{MatchConfigError, StreamError};
use crate::pipeline::{
    ConcurrentPipeline, Pipeline, PipelineResult, PipelineState, QueuedPipeline, RequestInfo,
    StaticTextStep, StepContext, StepRegistry, StepRegistryBuilder, WorkItem,
};
use crate::streaming::{
    Charset, DecodingOutputStream, EngineBuilder, HtmlCloseTagMatcher, HtmlTagMatcher, MatchContext,
    OutputSink, ParsedTag, SharedBuffer, SimpleTagParser, TagParser,
};
use crate::telemetry;

/// Placeholder attribute carrying an explicit priority
pub const PRIORITY_ATTRIBUTE: &str = "pipeline-priority";

type SharedPipeline = Rc<RefCell<Box<dyn Pipeline>>>;
type LastResult = Rc<RefCell<Option<PipelineResult>>>;

/// Build the work item for a placeholder tag.
///
/// `None` when the tag has no `id`. An invalid `pipeline-priority` is
/// logged and ignored.
pub fn work_item_from_tag(tag: &ParsedTag) -> Option<WorkItem> {
    let id = tag.attribute("id")?;
    let mut item = WorkItem::new(id);

    if let Some(raw) = tag.attribute(PRIORITY_ATTRIBUTE) {
        match raw.trim().parse::<i32>() {
            Ok(priority) => item = item.with_priority(priority),
            Err(e) => warn!(
                "Ignoring invalid {} '{}' on placeholder '{}': {}",
                PRIORITY_ATTRIBUTE, raw, id, e
            ),
        }
    }

    let attributes = tag
        .attributes
        .iter()
        .filter(|(name, _)| name != "id" && name != PRIORITY_ATTRIBUTE)
        .map(|(name, value)| (name.as_str(), value.as_str()));
    Some(item.with_attributes(attributes))
}

/// Execute `pipeline` and return what its steps wrote
fn run_pipeline(
    pipeline: &SharedPipeline,
    request: &Arc<RequestInfo>,
    log_events: bool,
) -> (String, PipelineResult) {
    let buffer = SharedBuffer::new();
    let ctx = StepContext::new(buffer.clone(), request.clone());
    let result = pipeline.borrow_mut().execute(&ctx);

    if log_events {
        for failure in result.failures() {
            if let Some(error) = &failure.error {
                telemetry::step_failed(failure.item.id(), &error.to_string())
                    .with_request_path(&request.path)
                    .emit();
            }
        }
        telemetry::pipeline_executed(&result)
            .with_request_path(&request.path)
            .emit();
    }
    (buffer.take(), result)
}

/// Filter factory holding the configuration and step registry shared by
/// all responses
pub struct BigPipeFilter {
    config: FilterConfig,
    charset: Charset,
    registry: Arc<StepRegistry>,
}

impl Default for BigPipeFilter {
    fn default() -> Self {
        Self {
            config: FilterConfig::default(),
            charset: Charset::default(),
            registry: Arc::new(StepRegistry::builder().with_builtin_factories().build()),
        }
    }
}

impl BigPipeFilter {
    /// Filter using an already built registry
    pub fn new(config: FilterConfig, registry: StepRegistry) -> Result<Self, ConfigError> {
        Ok(Self {
            charset: config.charset()?,
            config,
            registry: Arc::new(registry),
        })
    }

    /// Build the registry from the configured steps and fragments
    pub fn from_config(config: FilterConfig) -> Result<Self, ConfigError> {
        let mut builder = StepRegistry::builder().with_builtin_factories();
        for (id, html) in &config.fragments {
            builder = builder.step(id, StaticTextStep::new(html));
        }
        builder = register_configured_steps(builder, &config)?;
        Self::new(config, builder.build())
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Empty pipeline of the configured strategy
    pub fn new_pipeline(&self) -> Box<dyn Pipeline> {
        match self.config.pipeline {
            PipelineMode::Queued => Box::new(QueuedPipeline::new(self.registry.clone())),
            PipelineMode::Concurrent => Box::new(ConcurrentPipeline::new(
                self.registry.clone(),
                self.config.worker_threads,
                self.config.pipeline_timeout(),
            )),
        }
    }

    /// Start filtering a response written to `writer`
    pub fn filter<W: io::Write>(
        &self,
        writer: W,
        request: RequestInfo,
    ) -> Result<FilteredResponse<W>, MatchConfigError> {
        let pipeline: SharedPipeline = Rc::new(RefCell::new(self.new_pipeline()));
        let last_result: LastResult = Rc::new(RefCell::new(None));
        let request = Arc::new(request);
        let log_events = self.config.log_events;

        let mut bindings = EngineBuilder::new().buffer_limit(self.config.buffer_limit);

        if self.config.auto_detect_placeholders {
            let pipeline = pipeline.clone();
            let request = request.clone();
            let parser = SimpleTagParser::new();
            bindings = bindings.bind(
                HtmlTagMatcher::new(&self.config.placeholder_tag),
                move |ctx: &mut MatchContext<'_>| {
                    register_placeholder(ctx.content(), &parser, &pipeline, &request, log_events);
                    Ok(())
                },
            );
        }

        if self.config.auto_execute_before_closing_body {
            let pipeline = pipeline.clone();
            let request = request.clone();
            let last_result = last_result.clone();
            bindings = bindings.bind(
                HtmlCloseTagMatcher::new("body"),
                move |ctx: &mut MatchContext<'_>| {
                    if pipeline.borrow().state() != PipelineState::Collecting {
                        return Ok(());
                    }
                    let (output, result) = run_pipeline(&pipeline, &request, log_events);
                    ctx.prepend(&output);
                    *last_result.borrow_mut() = Some(result);
                    Ok(())
                },
            );
        }

        if self.config.flush_after_head {
            bindings = bindings.bind(
                HtmlCloseTagMatcher::new("head"),
                |ctx: &mut MatchContext<'_>| {
                    ctx.request_flush();
                    Ok(())
                },
            );
        }

        Ok(FilteredResponse {
            stream: DecodingOutputStream::new(bindings, writer, self.charset)?,
            pipeline,
            request,
            last_result,
            log_events,
        })
    }
}

fn register_configured_steps(
    mut builder: StepRegistryBuilder,
    config: &FilterConfig,
) -> Result<StepRegistryBuilder, ConfigError> {
    for (id, factory) in &config.steps {
        let step = match builder.instantiate(factory) {
            Some(Ok(step)) => step,
            Some(Err(e)) => {
                return Err(ConfigError::StepInstantiation {
                    id: id.clone(),
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(ConfigError::UnknownStepFactory {
                    id: id.clone(),
                    factory: factory.clone(),
                })
            }
        };
        builder = builder.shared_step(id, step);
    }
    Ok(builder)
}

fn register_placeholder(
    text: &str,
    parser: &SimpleTagParser,
    pipeline: &SharedPipeline,
    request: &RequestInfo,
    log_events: bool,
) {
    let Some(item) = parser.parse(text).as_ref().and_then(work_item_from_tag) else {
        warn!("Placeholder without id left untouched: {}", text);
        return;
    };

    let (id, priority) = (item.id().to_string(), item.priority());
    match pipeline.borrow_mut().include(item) {
        Ok(()) => {
            debug!("Registered work item '{}' (priority {:?})", id, priority);
            if log_events {
                telemetry::placeholder_registered(&id, priority)
                    .with_request_path(&request.path)
                    .emit();
            }
        }
        Err(e) => warn!("Placeholder '{}' not registered: {}", id, e),
    }
}

/// A response being filtered
pub struct FilteredResponse<W: io::Write> {
    stream: DecodingOutputStream<W>,
    pipeline: SharedPipeline,
    request: Arc<RequestInfo>,
    last_result: LastResult,
    log_events: bool,
}

impl<W: io::Write> FilteredResponse<W> {
    /// Feed response body bytes
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.stream.write_bytes(bytes)
    }

    /// Propagate a flush without writing held back text
    pub fn flush(&mut self) -> Result<(), StreamError> {
        io::Write::flush(&mut self.stream)?;
        Ok(())
    }

    /// Work items registered and not executed yet
    pub fn pending_items(&self) -> usize {
        self.pipeline.borrow().pending()
    }

    /// Text held back while a match is pending
    pub fn buffered(&self) -> &str {
        self.stream.buffered()
    }

    /// Input received and not written yet: held back text re-encoded,
    /// then the bytes of an incomplete character
    pub fn held_back(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.stream.charset().encode_into(self.stream.buffered(), &mut bytes);
        bytes.extend_from_slice(self.stream.pending_bytes());
        bytes
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn get_ref(&self) -> &W {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.stream.get_mut()
    }

    /// End the response: write held back text, execute pending work items,
    /// append their output and return the writer with the last pipeline
    /// result.
    pub fn finish(mut self) -> Result<(W, Option<PipelineResult>), StreamError> {
        self.stream.flush_buffer()?;

        let run = {
            let pipeline = self.pipeline.borrow();
            pipeline.state() == PipelineState::Collecting && pipeline.pending() > 0
        };
        if run {
            debug!("Executing {} pending work items at end of response", self.pending_items());
            let (output, result) = run_pipeline(&self.pipeline, &self.request, self.log_events);
            self.stream.output_mut().write_str(&output)?;
            *self.last_result.borrow_mut() = Some(result);
        }

        let writer = self.stream.close()?;
        let result = self.last_result.borrow_mut().take();
        Ok((writer, result))
    }
}
