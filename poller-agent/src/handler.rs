//! Handlers and the handler registry
//!
//! A handler performs the business logic for one named operation. It takes
//! the step's parameter values and returns the values to write back as the
//! step's returns.

use async_trait::async_trait;
use poller_core::Params;
use poller_core::protocol::NAMESPACE_SEPARATOR;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Business logic for one named operation
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the operation. An error marks the task failed with the error's
    /// message.
    async fn invoke(&self, params: Params) -> anyhow::Result<Params>;
}

/// Adapter running a synchronous closure as a handler
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Params) -> anyhow::Result<Params> + Send + Sync,
{
    async fn invoke(&self, params: Params) -> anyhow::Result<Params> {
        (self.0)(params)
    }
}

/// Adapter running an async closure as a handler
pub struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for AsyncFnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Params>> + Send,
{
    async fn invoke(&self, params: Params) -> anyhow::Result<Params> {
        (self.0)(params).await
    }
}

/// Wraps a synchronous closure as a handler
///
/// # Example
/// ```
/// use poller_agent::handler_fn;
/// use serde_json::json;
///
/// let add_one = handler_fn(|params| {
///     let input = params.get("input").and_then(|v| v.as_i64()).unwrap_or(0);
///     Ok([("output".to_string(), json!(input + 1))].into())
/// });
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(Params) -> anyhow::Result<Params> + Send + Sync,
{
    FnHandler(f)
}

/// Wraps an async closure as a handler
pub fn async_handler_fn<F, Fut>(f: F) -> AsyncFnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Params>> + Send,
{
    AsyncFnHandler(f)
}

/// Handlers keyed by the name they were registered under
///
/// Cloning shares the underlying map. Writes happen at registration time;
/// reads happen from every in-flight task.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name` exactly as given, replacing any
    /// previous handler with that name
    pub fn register(&self, name: impl Into<String>, handler: impl Handler + 'static) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.insert(name.into(), Arc::new(handler));
    }

    /// Removes a handler, returning true if one was registered
    pub fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.remove(name).is_some()
    }

    /// Finds the handler for a task name
    ///
    /// Tries the name as given, then for qualified names (`ns.Name`) the
    /// part after the last separator.
    pub fn find(&self, task_name: &str) -> Option<Arc<dyn Handler>> {
        self.resolve(task_name).map(|(_, handler)| handler)
    }

    /// Like `find`, also returning the name the handler is registered under
    pub fn resolve(&self, task_name: &str) -> Option<(String, Arc<dyn Handler>)> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(handler) = handlers.get(task_name) {
            return Some((task_name.to_string(), Arc::clone(handler)));
        }

        let (_, short) = task_name.rsplit_once(NAMESPACE_SEPARATOR)?;
        handlers
            .get(short)
            .map(|handler| (short.to_string(), Arc::clone(handler)))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tagged(tag: &'static str) -> impl Handler {
        handler_fn(move |_| Ok([("tag".to_string(), json!(tag))].into()))
    }

    async fn tag_of(registry: &HandlerRegistry, name: &str) -> Option<String> {
        let handler = registry.find(name)?;
        let out = handler.invoke(Params::new()).await.unwrap();
        out.get("tag").and_then(|v| v.as_str()).map(str::to_string)
    }

    #[tokio::test]
    async fn test_short_name_fallback() {
        let registry = HandlerRegistry::new();
        registry.register("Foo", tagged("short"));

        assert_eq!(tag_of(&registry, "Foo").await.as_deref(), Some("short"));
        assert_eq!(tag_of(&registry, "ns.Foo").await.as_deref(), Some("short"));
        assert_eq!(tag_of(&registry, "a.b.Foo").await.as_deref(), Some("short"));
        assert!(registry.find("ns.Bar").is_none());
        assert!(registry.find("Bar").is_none());
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_short_name() {
        let registry = HandlerRegistry::new();
        registry.register("Foo", tagged("short"));
        registry.register("ns.Foo", tagged("qualified"));

        assert_eq!(tag_of(&registry, "ns.Foo").await.as_deref(), Some("qualified"));
        assert_eq!(tag_of(&registry, "other.Foo").await.as_deref(), Some("short"));
    }

    #[test]
    fn test_resolve_reports_registered_name() {
        let registry = HandlerRegistry::new();
        registry.register("Foo", tagged("short"));
        registry.register("ns.Bar", tagged("qualified"));

        let name = |task: &str| registry.resolve(task).map(|(name, _)| name);
        assert_eq!(name("ns.Foo").as_deref(), Some("Foo"));
        assert_eq!(name("Foo").as_deref(), Some("Foo"));
        assert_eq!(name("ns.Bar").as_deref(), Some("ns.Bar"));
        assert_eq!(name("Baz"), None);
    }

    #[test]
    fn test_qualified_registration_does_not_match_short_task() {
        let registry = HandlerRegistry::new();
        registry.register("ns.Foo", tagged("qualified"));

        assert!(registry.find("Foo").is_none());
    }

    #[test]
    fn test_names_and_unregister() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register("b.Two", tagged("2"));
        registry.register("One", tagged("1"));
        assert_eq!(registry.names(), vec!["One".to_string(), "b.Two".to_string()]);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("One"));
        assert!(!registry.unregister("One"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_async_handler_adapter() {
        let handler = async_handler_fn(|params: Params| async move {
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>(params)
        });

        let mut params = Params::new();
        params.insert("x".to_string(), json!(1));
        let out = handler.invoke(params.clone()).await.unwrap();
        assert_eq!(out, params);
    }

    #[tokio::test]
    async fn test_handler_error_message() {
        let handler = handler_fn(|_| Err(anyhow::anyhow!("boom")));
        let err = handler.invoke(Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
