//! BigPipe Wasm Filter for Envoy Proxy
//!
//! This filter rewrites HTML responses while they stream: placeholder tags
//! register deferred work items, which are rendered in priority order and
//! written before `</body>`. The page shell is flushed after `</head>` so
//! the browser can start rendering before slow regions are ready.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod streaming;
pub mod telemetry;

pub use config::{ConfigError, FilterConfig, PipelineMode};
pub use error::{DecodeError, MatchConfigError, PipelineError, StreamError};
pub use filter::{BigPipeFilter, FilteredResponse};

use log::{debug, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};
use std::cell::RefCell;
use std::rc::Rc;

use pipeline::RequestInfo;

// Thread-local storage for the configured filter
thread_local! {
    static FILTER: RefCell<Rc<BigPipeFilter>> = RefCell::new(Rc::new(BigPipeFilter::default()));
}

/// Whether a response content type is filtered
fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/html"))
}

/// Request data handed to steps, from the request headers
fn request_info(headers: Vec<(String, String)>) -> RequestInfo {
    let mut request = RequestInfo::default();
    for (name, value) in headers {
        match name.as_str() {
            ":method" => request.method = value,
            ":path" => request.path = value,
            _ if name.starts_with(':') => {}
            _ => request.headers.push((name, value)),
        }
    }
    request
}

/// Root context for filter lifecycle management
struct BigPipeRootContext;

impl Context for BigPipeRootContext {}

impl RootContext for BigPipeRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let filter = match self.get_plugin_configuration() {
            Some(config_bytes) => {
                match FilterConfig::from_bytes(&config_bytes).and_then(BigPipeFilter::from_config) {
                    Ok(filter) => filter,
                    Err(e) => {
                        warn!("Invalid filter configuration, using defaults: {}", e);
                        BigPipeFilter::default()
                    }
                }
            }
            None => BigPipeFilter::default(),
        };

        info!(
            "BigPipe Filter initialized: charset {}, {:?} pipeline, placeholder tag <{}>",
            filter.charset(),
            filter.config().pipeline,
            filter.config().placeholder_tag
        );

        // Store filter in thread-local for HTTP contexts to access
        FILTER.with(|f| {
            *f.borrow_mut() = Rc::new(filter);
        });

        true
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(BigPipeHttpContext::new(context_id)))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// HTTP context for per-request processing
struct BigPipeHttpContext {
    context_id: u32,
    filter: Rc<BigPipeFilter>,
    /// Captured from the request headers, moved into the response filter
    request: RequestInfo,
    /// Present while the response body is being filtered
    response: Option<FilteredResponse<Vec<u8>>>,
}

impl BigPipeHttpContext {
    fn new(context_id: u32) -> Self {
        let filter = FILTER.with(|f| f.borrow().clone());

        Self {
            context_id,
            filter,
            request: RequestInfo::default(),
            response: None,
        }
    }

    /// Run a body chunk through the filter and return the bytes to send.
    ///
    /// On failure filtering stops for the rest of the response: input held
    /// back from earlier chunks goes out followed by the raw chunk.
    fn process_chunk(&mut self, chunk: &[u8], end_of_stream: bool) -> Vec<u8> {
        let Some(response) = self.response.take() else {
            return chunk.to_vec();
        };
        let mut passthrough = response.held_back();

        match self.filter_chunk(response, chunk, end_of_stream) {
            Ok(produced) => produced,
            Err(e) => {
                warn!(
                    "[context_id={}] Response filtering failed, passing through: {}",
                    self.context_id, e
                );
                if self.filter.config().log_events {
                    telemetry::stream_failed(&e.to_string())
                        .with_context_id(self.context_id)
                        .emit();
                }
                passthrough.extend_from_slice(chunk);
                passthrough
            }
        }
    }

    fn filter_chunk(
        &mut self,
        mut response: FilteredResponse<Vec<u8>>,
        chunk: &[u8],
        end_of_stream: bool,
    ) -> Result<Vec<u8>, StreamError> {
        response.write(chunk)?;

        if !end_of_stream {
            let produced = std::mem::take(response.get_mut());
            self.response = Some(response);
            return Ok(produced);
        }

        let (produced, result) = response.finish()?;
        if let Some(result) = result {
            info!(
                "[context_id={}] Pipeline executed {} work items, success: {}",
                self.context_id,
                result.len(),
                result.success
            );
        }
        Ok(produced)
    }
}

impl Context for BigPipeHttpContext {}

impl HttpContext for BigPipeHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        self.request = request_info(self.get_http_request_headers());
        debug!(
            "[context_id={}] Request {} {}",
            self.context_id, self.request.method, self.request.path
        );
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let content_type = self.get_http_response_header("content-type").unwrap_or_default();
        if !is_html(&content_type) {
            debug!(
                "[context_id={}] Skipping non-HTML content-type: {}",
                self.context_id, content_type
            );
            return Action::Continue;
        }

        let request = std::mem::take(&mut self.request);
        match self.filter.filter(Vec::new(), request) {
            Ok(response) => {
                self.response = Some(response);
                // body length changes while filtering
                self.set_http_response_header("content-length", None);
                self.set_http_response_header("x-bigpipe-filtered", Some("true"));
            }
            Err(e) => {
                warn!(
                    "[context_id={}] Cannot filter response, passing through: {}",
                    self.context_id, e
                );
            }
        }
        Action::Continue
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.response.is_none() {
            return Action::Continue;
        }

        let chunk = self.get_http_response_body(0, body_size).unwrap_or_default();
        let produced = self.process_chunk(&chunk, end_of_stream);
        self.set_http_response_body(0, body_size, &produced);
        Action::Continue
    }

    fn on_log(&mut self) {
        debug!(
            "[context_id={}] Request processing complete",
            self.context_id
        );
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Debug);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(BigPipeRootContext)
    });
}}
