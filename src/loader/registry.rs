//! Route name to view module lookup
//!
//! Modules are registered statically at startup. Routes without a static
//! registration fall back to an optional resolver that maps the
//! conventional module path to a module.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use log::debug;
use serde_json::Value as JsonValue;

use crate::core::{RouterError, RouterResult};

use super::descriptor::ViewDescriptor;
use super::form::FormEvent;
use super::unit::ViewInstance;

/// Behavior of one view: its descriptor plus lifecycle and named hooks.
#[async_trait]
pub trait ViewModule: Send + Sync {
    fn descriptor(&self) -> ViewDescriptor;

    /// Runs after mount, before the view's data sources are fetched
    async fn mounted(&self, _view: &ViewInstance) -> RouterResult<()> {
        Ok(())
    }

    /// Computed property lookup
    fn computed(&self, _name: &str, _view: &ViewInstance) -> Option<JsonValue> {
        None
    }

    /// Named field validator; `None` when no validator has that name
    fn validate(&self, _validator: &str, _value: &str) -> Option<RouterResult<bool>> {
        None
    }

    /// Named form handler; returns whether a handler with that name exists
    fn handle_form_event(
        &self,
        _handler: &str,
        _event: &FormEvent<'_>,
        _view: &ViewInstance,
    ) -> bool {
        false
    }
}

pub type ModuleFuture = BoxFuture<'static, RouterResult<Arc<dyn ViewModule>>>;

type ModuleFactory = Arc<dyn Fn() -> ModuleFuture + Send + Sync>;

/// Maps a conventional module path to a module.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`
    async fn resolve(&self, path: &str) -> RouterResult<Option<Arc<dyn ViewModule>>>;
}

#[derive(Default)]
pub struct ViewRegistry {
    modules: DashMap<String, ModuleFactory>,
    resolver: Option<Arc<dyn ModuleResolver>>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register an already constructed module
    pub fn register(&self, route: impl Into<String>, module: Arc<dyn ViewModule>) {
        self.register_loader(route, move || {
            let module = module.clone();
            async move { Ok(module) }
        });
    }

    /// Register a lazy loader, invoked on every cache miss for the route
    pub fn register_loader<F, Fut>(&self, route: impl Into<String>, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouterResult<Arc<dyn ViewModule>>> + Send + 'static,
    {
        let route = route.into();
        debug!("Registering view module: {route}");
        let factory: ModuleFactory = Arc::new(move || -> ModuleFuture { Box::pin(loader()) });
        self.modules.insert(route, factory);
    }

    pub fn unregister(&self, route: &str) -> bool {
        debug!("Removing view module: {route}");
        self.modules.remove(route).is_some()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.modules.contains_key(route)
    }

    pub fn route_names(&self) -> Vec<String> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Load the module for `route`; a missing module is a not-found error.
    pub async fn load(&self, route: &str, conventional_path: &str) -> RouterResult<Arc<dyn ViewModule>> {
        let factory = self.modules.get(route).map(|entry| entry.value().clone());
        if let Some(factory) = factory {
            debug!("Loading registered route: {route}");
            return factory().await.map_err(|e| Self::not_found_or(route, e));
        }

        if let Some(resolver) = &self.resolver {
            debug!("Resolving route module: {conventional_path}");
            match resolver.resolve(conventional_path).await {
                Ok(Some(module)) => return Ok(module),
                Ok(None) => {}
                Err(e) => return Err(Self::not_found_or(route, e)),
            }
        }

        Err(Self::not_found(route))
    }

    fn not_found(route: &str) -> RouterError {
        RouterError::NotFound(format!("Route '{route}' not found - 404"))
    }

    /// Import failures that look like missing modules become not-found errors.
    fn not_found_or(route: &str, err: RouterError) -> RouterError {
        let message = err.to_string();
        if matches!(err, RouterError::NotFound(_))
            || message.contains("Failed to resolve")
            || message.contains("Failed to fetch")
            || message.contains("not found")
        {
            Self::not_found(route)
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain;

    impl ViewModule for Plain {
        fn descriptor(&self) -> ViewDescriptor {
            ViewDescriptor::new().with_name("Plain")
        }
    }

    struct PathResolver;

    #[async_trait]
    impl ModuleResolver for PathResolver {
        async fn resolve(&self, path: &str) -> RouterResult<Option<Arc<dyn ViewModule>>> {
            match path {
                "/src/logic/about" => Ok(Some(Arc::new(Plain))),
                "/src/logic/broken" => Err(RouterError::Network("Failed to fetch".into())),
                "/src/logic/flaky" => Err(RouterError::Network("connection reset".into())),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_static_registration() {
        let registry = ViewRegistry::new();
        registry.register("home", Arc::new(Plain));
        assert!(registry.contains("home"));
        assert_eq!(registry.len(), 1);

        let module = registry.load("home", "/src/logic/home").await.unwrap();
        assert_eq!(module.descriptor().name.as_deref(), Some("Plain"));

        assert!(registry.unregister("home"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_loader_runs_per_load() {
        let registry = ViewRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register_loader("lazy", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Arc::new(Plain) as Arc<dyn ViewModule>) }
        });
        registry.load("lazy", "").await.unwrap();
        registry.load("lazy", "").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_module_is_not_found() {
        let registry = ViewRegistry::new().with_resolver(Arc::new(PathResolver));
        assert!(registry.load("about", "/src/logic/about").await.is_ok());

        let err = registry.load("ghost", "/src/logic/ghost").await.err().unwrap();
        assert!(matches!(err, RouterError::NotFound(_)));
        assert_eq!(err.to_string(), "Route 'ghost' not found - 404");

        let err = registry.load("broken", "/src/logic/broken").await.err().unwrap();
        assert!(matches!(err, RouterError::NotFound(_)));

        let err = registry.load("flaky", "/src/logic/flaky").await.err().unwrap();
        assert!(matches!(err, RouterError::Network(_)));
    }
}
