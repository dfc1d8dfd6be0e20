//! Steps: the executable handlers for work items

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::work_item::WorkItem;
use crate::error::StepFailure;
use crate::streaming::OutputSink;

/// Request data made available to steps. The pipeline never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestInfo {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Output and request handle shared by every step of one execution.
///
/// Cloning is cheap; all clones write to the same sink.
#[derive(Clone)]
pub struct StepContext {
    output: Arc<Mutex<Box<dyn OutputSink + Send>>>,
    request: Arc<RequestInfo>,
}

impl StepContext {
    pub fn new<S: OutputSink + Send + 'static>(output: S, request: Arc<RequestInfo>) -> Self {
        Self {
            output: Arc::new(Mutex::new(Box::new(output))),
            request,
        }
    }

    pub fn write(&self, text: &str) -> io::Result<()> {
        self.output.lock().write_str(text)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.output.lock().flush()
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }
}

/// Handler for work items
pub trait Step: Send + Sync {
    /// Render the item, writing through `ctx`
    fn execute(&self, item: &WorkItem, ctx: &StepContext) -> Result<(), StepFailure>;

    /// Priority to use when the item carries none. `None` means no opinion.
    fn default_priority(
        &self,
        _item: &WorkItem,
        _ctx: &StepContext,
    ) -> Result<Option<i32>, StepFailure> {
        Ok(None)
    }
}

/// Writes a fixed HTML fragment
#[derive(Debug, Clone)]
pub struct StaticTextStep {
    html: String,
}

impl StaticTextStep {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
        }
    }
}

impl Step for StaticTextStep {
    fn execute(&self, _item: &WorkItem, ctx: &StepContext) -> Result<(), StepFailure> {
        ctx.write(&self.html)?;
        Ok(())
    }
}

/// Writes the item's `text` attribute
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeTextStep;

impl AttributeTextStep {
    pub const ATTRIBUTE: &'static str = "text";
}

impl Step for AttributeTextStep {
    fn execute(&self, item: &WorkItem, ctx: &StepContext) -> Result<(), StepFailure> {
        let text = item
            .attribute(Self::ATTRIBUTE)
            .ok_or_else(|| {
                format!("work item '{}' has no '{}' attribute", item.id(), Self::ATTRIBUTE)
            })?;
        ctx.write(text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::SharedBuffer;

    fn context() -> (StepContext, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let ctx = StepContext::new(buffer.clone(), Arc::new(RequestInfo::new("GET", "/")));
        (ctx, buffer)
    }

    #[test]
    fn test_request_header_lookup() {
        let request = RequestInfo::new("GET", "/page").with_header("Accept", "text/html");
        assert_eq!(request.header("accept"), Some("text/html"));
        assert_eq!(request.header("cookie"), None);
    }

    #[test]
    fn test_static_text_step() {
        let (ctx, buffer) = context();
        StaticTextStep::new("<p>hi</p>")
            .execute(&WorkItem::new("a"), &ctx)
            .unwrap();
        assert_eq!(buffer.take(), "<p>hi</p>");
    }

    #[test]
    fn test_attribute_text_step() {
        let (ctx, buffer) = context();
        let item = WorkItem::new("a").with_attribute("text", "late content");
        AttributeTextStep.execute(&item, &ctx).unwrap();
        assert_eq!(buffer.take(), "late content");

        let error = AttributeTextStep.execute(&WorkItem::new("b"), &ctx).unwrap_err();
        assert!(error.to_string().contains("'b'"));
    }

    #[test]
    fn test_context_clones_share_output() {
        let (ctx, buffer) = context();
        let other = ctx.clone();
        ctx.write("a").unwrap();
        other.write("b").unwrap();
        assert_eq!(buffer.take(), "ab");
        assert_eq!(other.request().path, "/");
    }
}
