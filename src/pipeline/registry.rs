//! Step Registry
//!
//! Resolves the step for a work item:
//! 1. a step registered under the item id
//! 2. otherwise a factory named by the item's `step-class` (or
//!    `action-class`) attribute; the instance is cached by factory name and
//!    reused for later items
//!
//! Step failures and panics stop here and come back as [`PipelineError`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::step::{AttributeTextStep, Step, StepContext};
use super::work_item::WorkItem;
use crate::error::{PipelineError, StepFailure};

/// Attributes naming a step factory, in lookup order
pub const STEP_FACTORY_ATTRIBUTES: [&str; 2] = ["step-class", "action-class"];

/// Builds a step instance
pub type StepFactory = Arc<dyn Fn() -> Result<Arc<dyn Step>, StepFailure> + Send + Sync>;

/// Maps work items to steps
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
    factories: HashMap<String, StepFactory>,
    instances: Mutex<HashMap<String, Arc<dyn Step>>>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Find the step for `item`
    pub fn resolve(&self, item: &WorkItem) -> Result<Arc<dyn Step>, PipelineError> {
        if let Some(step) = self.steps.get(item.id()) {
            return Ok(step.clone());
        }

        let name = STEP_FACTORY_ATTRIBUTES
            .iter()
            .find_map(|attr| item.attribute(attr))
            .ok_or_else(|| PipelineError::NoHandler { item: item.clone() })?;

        if let Some(step) = self.instances.lock().get(name) {
            return Ok(step.clone());
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PipelineError::UnknownFactory {
                name: name.to_string(),
                item: item.clone(),
            })?;

        // built outside the lock: a factory may be slow
        let step = factory().map_err(|source| PipelineError::Instantiation {
            name: name.to_string(),
            item: item.clone(),
            source,
        })?;
        debug!("Instantiated step '{}' for work item '{}'", name, item.id());

        // concurrent resolution of the same name keeps the first instance
        let mut instances = self.instances.lock();
        Ok(instances.entry(name.to_string()).or_insert(step).clone())
    }

    /// Resolve and execute the step for `item`
    pub fn execute(&self, item: &WorkItem, ctx: &StepContext) -> Result<(), PipelineError> {
        let step = self.resolve(item)?;
        match panic::catch_unwind(AssertUnwindSafe(|| step.execute(item, ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(PipelineError::Execution {
                item: item.clone(),
                source,
            }),
            Err(payload) => Err(PipelineError::Panicked {
                message: panic_message(payload.as_ref()),
                item: item.clone(),
            }),
        }
    }

    /// Default priority the step for `item` reports
    pub fn default_priority(
        &self,
        item: &WorkItem,
        ctx: &StepContext,
    ) -> Result<Option<i32>, PipelineError> {
        let step = self.resolve(item)?;
        match panic::catch_unwind(AssertUnwindSafe(|| step.default_priority(item, ctx))) {
            Ok(Ok(priority)) => Ok(priority),
            Ok(Err(source)) => Err(PipelineError::Execution {
                item: item.clone(),
                source,
            }),
            Err(payload) => Err(PipelineError::Panicked {
                message: panic_message(payload.as_ref()),
                item: item.clone(),
            }),
        }
    }

    /// Number of factory-built instances cached
    pub fn cached_instances(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn has_step(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Populates a [`StepRegistry`] at startup
#[derive(Default)]
pub struct StepRegistryBuilder {
    steps: HashMap<String, Arc<dyn Step>>,
    factories: HashMap<String, StepFactory>,
}

impl StepRegistryBuilder {
    /// Register a step for the work item with this id
    pub fn step(mut self, id: &str, step: impl Step + 'static) -> Self {
        self.steps.insert(id.to_string(), Arc::new(step));
        self
    }

    /// Register a factory under a name usable in `step-class`
    pub fn factory<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Step>, StepFailure> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Register the factories shipped with the filter
    pub fn with_builtin_factories(self) -> Self {
        self.factory("attribute-text", || Ok(Arc::new(AttributeTextStep) as Arc<dyn Step>))
    }

    /// Build a step with a registered factory, for pre-registration by id
    pub fn instantiate(&self, name: &str) -> Option<Result<Arc<dyn Step>, StepFailure>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Register an already built step
    pub fn shared_step(mut self, id: &str, step: Arc<dyn Step>) -> Self {
        self.steps.insert(id.to_string(), step);
        self
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry {
            steps: self.steps,
            factories: self.factories,
            instances: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RequestInfo;
    use crate::streaming::SharedBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo(&'static str);

    impl Step for Echo {
        fn execute(&self, _item: &WorkItem, ctx: &StepContext) -> Result<(), StepFailure> {
            ctx.write(self.0)?;
            Ok(())
        }
    }

    struct Failing;

    impl Step for Failing {
        fn execute(&self, _item: &WorkItem, _ctx: &StepContext) -> Result<(), StepFailure> {
            Err("backend unavailable".into())
        }

        fn default_priority(
            &self,
            _item: &WorkItem,
            _ctx: &StepContext,
        ) -> Result<Option<i32>, StepFailure> {
            Err("no priority".into())
        }
    }

    struct Panicking;

    impl Step for Panicking {
        fn execute(&self, _item: &WorkItem, _ctx: &StepContext) -> Result<(), StepFailure> {
            panic!("step exploded");
        }
    }

    fn context() -> (StepContext, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let ctx = StepContext::new(buffer.clone(), Arc::new(RequestInfo::default()));
        (ctx, buffer)
    }

    #[test]
    fn test_resolve_by_id() {
        let registry = StepRegistry::builder().step("header", Echo("<h1/>")).build();
        let (ctx, buffer) = context();

        registry.execute(&WorkItem::new("header"), &ctx).unwrap();
        assert_eq!(buffer.take(), "<h1/>");
        assert!(registry.has_step("header"));
        assert!(!registry.has_factory("header"));
    }

    #[test]
    fn test_no_handler() {
        let registry = StepRegistry::default();
        let result = registry.resolve(&WorkItem::new("orphan"));
        assert!(matches!(result, Err(PipelineError::NoHandler { item }) if item.id() == "orphan"));
    }

    #[test]
    fn test_unknown_factory() {
        let registry = StepRegistry::default();
        let item = WorkItem::new("x").with_attribute("step-class", "com.example.Missing");
        match registry.resolve(&item) {
            Err(PipelineError::UnknownFactory { name, .. }) => {
                assert_eq!(name, "com.example.Missing")
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("resolved a missing factory"),
        }
    }

    #[test]
    fn test_factory_instances_cached() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let registry = StepRegistry::builder()
            .with_builtin_factories()
            .factory("echo", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Echo("e")) as Arc<dyn Step>)
            })
            .build();
        let (ctx, buffer) = context();

        assert!(registry.has_factory("echo"));
        assert!(registry.has_factory("attribute-text"));
        assert_eq!(registry.cached_instances(), 0);
        for id in ["a", "b", "c"] {
            let item = WorkItem::new(id).with_attribute("step-class", "echo");
            registry.execute(&item, &ctx).unwrap();
        }
        assert_eq!(registry.cached_instances(), 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let item = WorkItem::new("d")
            .with_attribute("action-class", "attribute-text")
            .with_attribute("text", "!");
        registry.execute(&item, &ctx).unwrap();
        assert_eq!(registry.cached_instances(), 2);
        assert_eq!(buffer.take(), "eee!");
    }

    #[test]
    fn test_step_class_before_action_class() {
        let registry = StepRegistry::builder()
            .factory("one", || Ok(Arc::new(Echo("1")) as Arc<dyn Step>))
            .factory("two", || Ok(Arc::new(Echo("2")) as Arc<dyn Step>))
            .build();
        let (ctx, buffer) = context();

        let item = WorkItem::new("x")
            .with_attribute("action-class", "two")
            .with_attribute("step-class", "one");
        registry.execute(&item, &ctx).unwrap();
        assert_eq!(buffer.take(), "1");
    }

    #[test]
    fn test_factory_failure() {
        let registry = StepRegistry::builder()
            .factory("broken", || Err("cannot connect".into()))
            .build();
        let item = WorkItem::new("x").with_attribute("step-class", "broken");

        let error = registry.resolve(&item).err().unwrap();
        assert!(matches!(error, PipelineError::Instantiation { .. }));
        assert!(error.to_string().contains("cannot connect"));
        assert_eq!(registry.cached_instances(), 0);
    }

    #[test]
    fn test_execution_error_wrapped() {
        let registry = StepRegistry::builder().step("x", Failing).build();
        let (ctx, _) = context();

        let error = registry.execute(&WorkItem::new("x"), &ctx).unwrap_err();
        assert!(matches!(error, PipelineError::Execution { .. }));
        assert_eq!(error.item().map(|i| i.id()), Some("x"));
        assert!(registry.default_priority(&WorkItem::new("x"), &ctx).is_err());
    }

    #[test]
    fn test_panic_caught() {
        let registry = StepRegistry::builder().step("boom", Panicking).build();
        let (ctx, _) = context();

        match registry.execute(&WorkItem::new("boom"), &ctx) {
            Err(PipelineError::Panicked { message, item }) => {
                assert_eq!(message, "step exploded");
                assert_eq!(item.id(), "boom");
            }
            other => panic!("expected a caught panic, got {:?}", other),
        }
    }

    #[test]
    fn test_default_priority_none() {
        let registry = StepRegistry::builder().step("a", Echo("")).build();
        let (ctx, _) = context();
        assert_eq!(registry.default_priority(&WorkItem::new("a"), &ctx).unwrap(), None);
    }
}
