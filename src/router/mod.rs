//! Navigation pipeline
//!
//! The router turns address changes into page transitions: parse the
//! location, gate it through the auth manager, build or reuse the route's
//! renderable unit, then swap it into a fresh page container. Only one
//! pipeline run is in flight at a time; a change arriving mid-run is dropped
//! and picked up by the next change event, which re-reads the location.

pub mod error_page;
pub mod path;
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::Serialize;
use validator::Validate;

use crate::auth::{AuthManager, AuthStats, AuthStores};
use crate::cache::{CacheManager, CacheStats};
use crate::config::{Config, Environment, RouterMode};
use crate::core::{
    AuthCheck, BrowserHost, Document, ErrorCode, Fetcher, MountHandle, NavigationGuard,
    NavigationPhase, NavigationStatus, Navigator, Renderer, RouterResult, RuntimeServices, Translator,
};
use crate::internal_error;
use crate::loader::{
    Artifact, LoaderConfig, LoaderStats, RenderableUnit, RouteLoader, ViewModule, ViewRegistry,
};
use crate::platform::{MemoryCookieJar, MemoryStore};
use crate::query::{params, QueryManager, QueryParams, QueryStats};

pub use path::{build_url, normalize_path, parse_location, resolve_path};

/// How one pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Neither the route nor its query changed
    Unchanged,
    Completed,
    /// Another navigation was in flight
    Dropped,
    /// Denied by the auth gate and sent to the login route
    Redirected,
    /// An error page (or the fallback page) was shown
    Failed(ErrorCode),
}

#[derive(Debug, Default)]
struct Mounts {
    current: Option<MountHandle>,
    previous: Option<MountHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub current_route: String,
    pub phase: &'static str,
    pub cache: CacheStats,
    pub loader: LoaderStats,
    pub query: QueryStats,
    pub auth: AuthStats,
}

pub struct Router {
    config: Config,
    host: Arc<dyn BrowserHost>,
    document: Arc<dyn Document>,
    renderer: Arc<dyn Renderer>,
    cache: Arc<CacheManager<Artifact>>,
    query: Arc<QueryManager>,
    auth: Arc<AuthManager>,
    loader: Arc<RouteLoader>,
    status: NavigationStatus,
    current_route: Mutex<String>,
    mounts: Mutex<Mounts>,
    container_seq: AtomicU64,
}

impl Router {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn query(&self) -> &Arc<QueryManager> {
        &self.query
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn cache(&self) -> &Arc<CacheManager<Artifact>> {
        &self.cache
    }

    pub fn loader(&self) -> &Arc<RouteLoader> {
        &self.loader
    }

    pub fn status(&self) -> &NavigationStatus {
        &self.status
    }

    pub fn current_route(&self) -> String {
        self.current_route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current_route(&self, route: &str) {
        *self
            .current_route
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = route.to_string();
    }

    fn mode_name(&self) -> &'static str {
        match self.config.router.mode {
            RouterMode::Hash => "hash",
            RouterMode::History => "history",
        }
    }

    /// Resolve the initial location and start background cache cleanup.
    pub async fn start(&self) -> NavigationOutcome {
        info!(
            "Router starting in {} mode with base path {}",
            self.mode_name(),
            self.config.router.base_path
        );
        if self.config.cache.auto_cleanup {
            if let Err(e) = self.cache.start_auto_cleanup() {
                warn!("Cache auto cleanup not started: {e}");
            }
        }

        let location = self.host.location();
        match self.config.router.mode {
            RouterMode::Hash if location.hash.is_empty() || location.hash == "#" => {
                self.host.set_hash("#/");
                self.handle_route_change().await
            }
            RouterMode::History => {
                let (route, _) = parse_location(
                    &location,
                    RouterMode::History,
                    &self.config.router.base_path,
                );
                let at_root = route == "home"
                    && location.pathname.trim_end_matches('/')
                        == self.config.router.base_path.trim_end_matches('/');
                if at_root {
                    self.navigate_to("home", QueryParams::new()).await
                } else {
                    self.handle_route_change().await
                }
            }
            RouterMode::Hash => self.handle_route_change().await,
        }
    }

    /// React to an address change.
    ///
    /// Does nothing unless the route or its query differs from the last
    /// resolution, so repeated identical events cost nothing.
    pub async fn handle_route_change(&self) -> NavigationOutcome {
        let location = self.host.location();
        let (route, raw_query) = parse_location(
            &location,
            self.config.router.mode,
            &self.config.router.base_path,
        );
        let params = self.query.parse_query_string(&raw_query);

        let previous_route = self.current_route();
        let query_changed = self.query.has_query_params_changed(&params);
        let route_changed = route != previous_route;
        if !route_changed && !query_changed {
            debug!("Route {route} unchanged, skipping");
            return NavigationOutcome::Unchanged;
        }

        let previous_query = self.query.get_query_params();
        self.query.set_current_query_params(params);
        self.set_current_route(&route);
        let outcome = self.load_route(&route).await;
        if outcome == NavigationOutcome::Dropped {
            // the next change event must see this location as new again
            self.set_current_route(&previous_route);
            self.query.set_current_query_params(previous_query);
        }
        outcome
    }

    /// Run the pipeline for `route`: authorize, build, transition.
    pub async fn load_route(&self, route: &str) -> NavigationOutcome {
        let Some(guard) = self.status.try_begin() else {
            warn!("Navigation to {route} dropped: another navigation is in progress");
            return NavigationOutcome::Dropped;
        };

        match self.auth.check_authentication(route).await {
            Ok(decision) if !decision.allowed => {
                let login = self.auth.config().login_route.clone();
                info!(
                    "Authentication required for {route} ({:?}), redirecting to {login}",
                    decision.reason
                );
                self.auth.emit_auth_required(route);
                drop(guard);
                let redirect = if route == login {
                    QueryParams::new()
                } else {
                    params([("redirect", route)])
                };
                self.navigate_to(&login, redirect).await;
                return NavigationOutcome::Redirected;
            }
            Ok(_) => {}
            Err(e) => {
                guard.advance(NavigationPhase::Error);
                return NavigationOutcome::Failed(self.handle_route_error(route, e).await);
            }
        }

        let result = self.run_pipeline(route, &guard).await;
        match result {
            Ok(()) => {
                debug!("Navigation to {route} completed");
                NavigationOutcome::Completed
            }
            Err(e) => {
                guard.advance(NavigationPhase::Error);
                NavigationOutcome::Failed(self.handle_route_error(route, e).await)
            }
        }
    }

    async fn run_pipeline(&self, route: &str, guard: &NavigationGuard<'_>) -> RouterResult<()> {
        if !self.document.has_root() {
            return Err(internal_error!("App element not found"));
        }
        guard.advance(NavigationPhase::Loading);
        let unit = self.loader.build_renderable_unit(route).await?;
        guard.advance(NavigationPhase::Transitioning);
        self.render_component_with_transition(unit, route).await
    }

    /// Mount `unit` into a fresh container and retire the previous one on
    /// the next frame.
    pub async fn render_component_with_transition(
        &self,
        unit: Arc<RenderableUnit>,
        route: &str,
    ) -> RouterResult<()> {
        if !self.document.has_root() {
            return Ok(());
        }

        self.document.mark_exiting();
        let seq = self.container_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let container_id = format!("page-{route}-{seq}");
        self.document
            .create_container(&container_id, "page-container page-entered")?;

        if self.config.router.environment != Environment::Production {
            if let Some(style) = unit.style() {
                self.document.apply_style(route, style);
            }
        }

        let handle = self.renderer.mount(unit, &container_id)?;
        let previous = {
            let mut mounts = self.mounts.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = mounts.current.replace(handle);
            mounts.previous = previous;
            previous
        };
        self.document.scroll_to_top();

        self.document.next_frame().await;
        self.document.remove_exiting();
        if let Some(previous) = previous {
            self.renderer.unmount(previous);
            let mut mounts = self.mounts.lock().unwrap_or_else(PoisonError::into_inner);
            if mounts.previous == Some(previous) {
                mounts.previous = None;
            }
        }
        Ok(())
    }

    /// Navigate to `route`, carrying `params` as route parameters.
    ///
    /// Query state is cleared when the route changes so keys never leak
    /// across distinct routes.
    pub fn navigate_to<'a>(
        &'a self,
        route: &'a str,
        params: QueryParams,
    ) -> BoxFuture<'a, NavigationOutcome> {
        Box::pin(async move {
            if route != self.current_route() {
                self.query.clear_query_params();
            }
            self.query.set_route_params(params.clone());
            let query = if params.is_empty() {
                self.query.get_query_params()
            } else {
                params
            };
            self.update_url(route, &query).await
        })
    }

    /// Write the canonical URL for `route`, then resolve it.
    ///
    /// History mode replaces the entry for the same route and pushes one for
    /// a new route, keeping query-only updates out of back navigation.
    pub async fn update_url(&self, route: &str, query: &QueryParams) -> NavigationOutcome {
        let query_string = self.query.build_query_string(query);
        let url = build_url(
            route,
            &query_string,
            self.config.router.mode,
            &self.config.router.base_path,
        );
        match self.config.router.mode {
            RouterMode::Hash => {
                if self.host.location().hash != url {
                    self.host.set_hash(&url);
                }
            }
            RouterMode::History => {
                if route == self.current_route() {
                    self.host.replace_state(&url);
                } else {
                    self.host.push_state(&url);
                }
            }
        }
        debug!("URL updated to {url}");
        self.handle_route_change().await
    }

    /// Merge (or replace) query parameters for the current route and reload it.
    pub async fn set_query_params(&self, params: QueryParams, replace: bool) -> NavigationOutcome {
        let staged = self.stage_query(|query| query.set_query_params(params, replace));
        let route = self.current_route();
        self.update_url(&route, &staged).await
    }

    pub async fn remove_query_params(&self, keys: &[&str]) -> NavigationOutcome {
        let staged = self.stage_query(|query| query.remove_query_params(keys));
        let route = self.current_route();
        self.update_url(&route, &staged).await
    }

    /// Apply `change` to a copy of the current query, leaving the live state
    /// for the change detection in `handle_route_change`.
    fn stage_query(&self, change: impl FnOnce(&QueryManager)) -> QueryParams {
        let current = self.query.get_query_params();
        change(&self.query);
        let staged = self.query.get_query_params();
        self.query.set_current_query_params(current);
        staged
    }

    /// Unmount everything, stop background work, and reset all state.
    pub fn destroy(&self) {
        let mounts = std::mem::take(&mut *self.mounts.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in [mounts.current, mounts.previous].into_iter().flatten() {
            self.renderer.unmount(handle);
        }
        self.cache.stop_auto_cleanup();
        self.cache.clear();
        self.document.clear();
        self.status.reset();
        self.query.reset();
        self.set_current_route("");
        info!("Router destroyed");
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            current_route: self.current_route(),
            phase: self.status.phase().as_str(),
            cache: self.cache.stats(),
            loader: self.loader.stats(),
            query: self.query.stats(),
            auth: self.auth.stats(),
        }
    }
}

#[async_trait]
impl Navigator for Router {
    async fn navigate(&self, route: &str, params: QueryParams) -> RouterResult<()> {
        let outcome = self.navigate_to(route, params).await;
        debug!("Delegated navigation to {route}: {outcome:?}");
        Ok(())
    }

    fn current_route(&self) -> String {
        Router::current_route(self)
    }
}

/// Assembles a [`Router`] from its configuration and collaborators.
pub struct RouterBuilder {
    config: Config,
    host: Arc<dyn BrowserHost>,
    document: Arc<dyn Document>,
    renderer: Arc<dyn Renderer>,
    fetcher: Arc<dyn Fetcher>,
    stores: Option<AuthStores>,
    translator: Option<Arc<dyn Translator>>,
    auth_check: Option<Arc<dyn AuthCheck>>,
    registry: Arc<ViewRegistry>,
}

impl RouterBuilder {
    pub fn new(
        config: Config,
        host: Arc<dyn BrowserHost>,
        document: Arc<dyn Document>,
        renderer: Arc<dyn Renderer>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            host,
            document,
            renderer,
            fetcher,
            stores: None,
            translator: None,
            auth_check: None,
            registry: Arc::new(ViewRegistry::new()),
        }
    }

    pub fn stores(mut self, stores: AuthStores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn auth_check(mut self, check: Arc<dyn AuthCheck>) -> Self {
        self.auth_check = Some(check);
        self
    }

    /// Replace the view registry, e.g. with one carrying a module resolver
    pub fn registry(mut self, registry: ViewRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn view(self, route: impl Into<String>, module: Arc<dyn ViewModule>) -> Self {
        self.registry.register(route, module);
        self
    }

    pub fn build(self) -> RouterResult<Arc<Router>> {
        self.config.validate()?;
        let mut config = self.config;

        let location = self.host.location();
        config.router.src_path =
            resolve_path(&config.router.src_path, &config.router.base_path, &location);
        config.router.routes_path =
            resolve_path(&config.router.routes_path, &config.router.base_path, &location);
        debug!(
            "Resolved source paths: src={}, routes={}",
            config.router.src_path, config.router.routes_path
        );

        let query = Arc::new(QueryManager::new(config.query.clone())?);
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let stores = self.stores.unwrap_or_else(|| AuthStores {
            local: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
            cookies: Arc::new(MemoryCookieJar::new()),
        });
        let secure_origin = location.is_secure();
        let mut auth = AuthManager::new(config.auth.clone(), stores, secure_origin)?;
        if let Some(check) = self.auth_check {
            auth = auth.with_auth_check(check);
        }
        let auth = Arc::new(auth);

        let registry = self.registry;
        let host = self.host;
        let document = self.document;
        let renderer = self.renderer;
        let fetcher = self.fetcher;
        let translator = self.translator;

        let router = Arc::new_cyclic(|weak: &Weak<Router>| {
            let navigator: Weak<dyn Navigator> = weak.clone();
            let services = RuntimeServices {
                navigator,
                query: query.clone(),
                auth: Some(auth.clone()),
                translator,
                fetcher,
                default_language: config.router.default_language.clone(),
                form_redirect_delay: Duration::from_millis(config.router.form_redirect_delay_ms),
            };
            let loader = Arc::new(RouteLoader::new(
                LoaderConfig::from_router(&config.router),
                registry,
                cache.clone(),
                services,
            ));
            Router {
                config,
                host,
                document,
                renderer,
                cache,
                query,
                auth,
                loader,
                status: NavigationStatus::new(),
                current_route: Mutex::new(String::new()),
                mounts: Mutex::new(Mounts::default()),
                container_seq: AtomicU64::new(0),
            }
        });
        info!("Router initialized");
        Ok(router)
    }
}
