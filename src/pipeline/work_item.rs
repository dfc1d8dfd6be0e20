//! Deferred work registered while a response streams

use std::collections::BTreeMap;

/// A unit of deferred rendering work found in the stream.
///
/// Immutable once registered: a pipeline consumes each item exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    id: String,
    priority: Option<i32>,
    attributes: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            priority: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set an explicit priority, overriding any step default
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Explicit priority, if one was given
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
