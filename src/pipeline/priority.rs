//! Priority Resolution
//!
//! Effective priority of a work item:
//! 1. the priority carried by the item (`pipeline-priority`)
//! 2. the default reported by the item's step
//! 3. [`DEFAULT_PRIORITY`]
//!
//! Higher values execute first.

use std::collections::HashMap;

use log::warn;

use super::registry::StepRegistry;
use super::step::StepContext;
use super::work_item::WorkItem;

/// Executes after items with the default priority
pub const LOWER_PRIORITY: i32 = -1;
/// Neutral priority
pub const DEFAULT_PRIORITY: i32 = 0;
/// Executes before items with the default priority
pub const HIGHER_PRIORITY: i32 = 1;

/// Resolve the effective priority of `item`.
///
/// Failures to obtain a step default are logged and fall back to
/// [`DEFAULT_PRIORITY`].
pub fn resolve_priority(item: &WorkItem, ctx: &StepContext, registry: &StepRegistry) -> i32 {
    if let Some(priority) = item.priority() {
        return priority;
    }
    match registry.default_priority(item, ctx) {
        Ok(Some(priority)) => priority,
        Ok(None) => DEFAULT_PRIORITY,
        Err(e) => {
            warn!(
                "Cannot resolve default priority of work item '{}', using {}: {}",
                item.id(),
                DEFAULT_PRIORITY,
                e
            );
            DEFAULT_PRIORITY
        }
    }
}

/// Memoizes step default priorities by item id for one execution
#[derive(Debug, Default)]
pub struct PriorityCache {
    resolved: HashMap<String, i32>,
}

impl PriorityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, item: &WorkItem, ctx: &StepContext, registry: &StepRegistry) -> i32 {
        if let Some(priority) = item.priority() {
            return priority;
        }
        if let Some(priority) = self.resolved.get(item.id()) {
            return *priority;
        }
        let priority = resolve_priority(item, ctx, registry);
        self.resolved.insert(item.id().to_string(), priority);
        priority
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Sort items by descending effective priority, keeping arrival order
/// between equal priorities
pub fn order_by_priority(
    items: Vec<WorkItem>,
    ctx: &StepContext,
    registry: &StepRegistry,
) -> Vec<WorkItem> {
    let mut cache = PriorityCache::new();
    let mut ranked: Vec<(i32, WorkItem)> = items
        .into_iter()
        .map(|item| (cache.resolve(&item, ctx, registry), item))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().map(|(_, item)| item).collect()
}
