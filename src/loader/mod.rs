//! Renderable unit assembly.
//!
//! A unit is built from a route's view module, its template, its style, and
//! an optional layout. Only the module is mandatory; the other artifacts
//! degrade to generated or empty defaults when they cannot be fetched.

pub mod data;
pub mod descriptor;
pub mod form;
pub mod registry;
pub mod unit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use validator::Validate;

use crate::cache::{ArtifactKind, CacheManager};
use crate::config::{Environment, RouterConfig};
use crate::core::{FetchRequest, RouterError, RouterResult, RuntimeContext, RuntimeServices};
use crate::utils::encoding::{page_title, to_pascal_case};

pub use descriptor::{DataSource, LayoutChoice, ViewDescriptor};
pub use form::{FieldKind, FormEvent, FormField, FormOutcome, FormSpec};
pub use registry::{ModuleResolver, ViewModule, ViewRegistry};
pub use unit::{FetchErrors, MultiFetchReport, RenderableUnit, ViewEvent, ViewInstance};

static MAIN_CONTENT: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"(?s)(<div class="container">).*?(</div>\s*</main>)"#));

/// Values held in the router's cache, one variant per artifact kind
#[derive(Clone)]
pub enum Artifact {
    Component(Arc<RenderableUnit>),
    Script(Arc<dyn ViewModule>),
    Template(String),
    Style(String),
    Layout(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LoaderConfig {
    pub environment: Environment,
    /// Absolute source root; views, styles, layouts, and logic live below it
    pub src_path: String,
    /// Absolute root of pre-built route modules
    pub routes_path: String,
    pub use_layout: bool,
    pub default_layout: String,
}

impl LoaderConfig {
    /// Loader settings from a router config whose paths are already resolved
    pub fn from_router(config: &RouterConfig) -> Self {
        Self {
            environment: config.environment,
            src_path: config.src_path.clone(),
            routes_path: config.routes_path.clone(),
            use_layout: config.use_layout,
            default_layout: config.default_layout.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoaderStats {
    pub environment: Environment,
    pub src_path: String,
    pub routes_path: String,
    pub use_layout: bool,
    pub registered_modules: usize,
    pub builds: usize,
}

type BuildResult = Result<Arc<RenderableUnit>, Arc<RouterError>>;
type SharedBuild = Shared<BoxFuture<'static, BuildResult>>;

pub struct RouteLoader {
    config: LoaderConfig,
    registry: Arc<ViewRegistry>,
    cache: Arc<CacheManager<Artifact>>,
    services: RuntimeServices,
    in_flight: Mutex<HashMap<String, SharedBuild>>,
    builds: AtomicUsize,
}

/// `<div class="route-R"><h1>Route: R</h1></div>`
pub fn generate_default_template(route: &str) -> String {
    format!("<div class=\"route-{route}\"><h1>Route: {route}</h1></div>")
}

/// Merge a layout and a template by the first rule that applies: the
/// `{{ content }}` placeholder, the main-content container, or plain
/// concatenation.
pub fn merge_layout_with_template(route: &str, layout: &str, template: &str) -> RouterResult<String> {
    if layout.contains("{{ content }}") {
        return Ok(layout.replacen("{{ content }}", template, 1));
    }
    if layout.contains(r#"class="main-content""#) {
        let re = MAIN_CONTENT
            .as_ref()
            .map_err(|e| RouterError::Build(format!("Invalid main-content pattern: {e}")))?;
        if re.is_match(layout) {
            debug!("Using main-content replacement for {route}");
            let merged = re.replace(layout, |caps: &Captures| {
                format!("{}{}{}", &caps[1], template, &caps[2])
            });
            return Ok(merged.into_owned());
        }
        debug!("Main-content container not found for {route}, wrapping template with layout");
    } else {
        debug!("Wrapping template with layout for {route}");
    }
    Ok(format!("{layout}\n{template}"))
}

impl RouteLoader {
    pub fn new(
        config: LoaderConfig,
        registry: Arc<ViewRegistry>,
        cache: Arc<CacheManager<Artifact>>,
        services: RuntimeServices,
    ) -> Self {
        debug!("RouteLoader initialized with config: {config:?}");
        Self {
            config,
            registry,
            cache,
            services,
            in_flight: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ViewRegistry> {
        &self.registry
    }

    fn is_production(&self) -> bool {
        self.config.environment == Environment::Production
    }

    /// Conventional module location for `route`
    pub fn module_path(&self, route: &str) -> String {
        if self.is_production() {
            format!("{}/{route}", self.config.routes_path)
        } else {
            format!("{}/logic/{route}", self.config.src_path)
        }
    }

    /// Build the unit for `route`, or return the cached one.
    ///
    /// Concurrent callers for the same uncached route share a single build.
    pub async fn build_renderable_unit(self: &Arc<Self>, route: &str) -> RouterResult<Arc<RenderableUnit>> {
        let key = ArtifactKind::Component.key(route);
        if let Some(Artifact::Component(unit)) = self.cache.get(&key) {
            debug!("Cache hit for {key}");
            return Ok(unit);
        }

        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(route) {
                Some(shared) => {
                    debug!("Joining in-flight build for {route}");
                    shared.clone()
                }
                None => {
                    let loader = Arc::clone(self);
                    let owned = route.to_string();
                    let build: BoxFuture<'static, BuildResult> =
                        Box::pin(async move { loader.build(&owned).await.map_err(Arc::new) });
                    let shared = build.shared();
                    in_flight.insert(route.to_string(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(route).is_some_and(|current| current.ptr_eq(&shared)) {
                in_flight.remove(route);
            }
        }
        result.map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|shared| shared.duplicate()))
    }

    async fn build(&self, route: &str) -> RouterResult<Arc<RenderableUnit>> {
        let module = self.load_script(route).await?;
        let descriptor = module.descriptor();
        descriptor
            .validate()
            .map_err(|e| RouterError::Build(format!("Invalid view descriptor for '{route}': {e}")))?;

        let (template, style) = if self.is_production() {
            let template = descriptor
                .template
                .clone()
                .unwrap_or_else(|| generate_default_template(route));
            (template, None)
        } else {
            let mut template = self.load_template(route).await;
            let style = self.load_style(route).await;
            let layout = match (&descriptor.layout, self.config.use_layout) {
                (_, false) | (LayoutChoice::None, _) => None,
                (LayoutChoice::Default, true) => self.load_layout(&self.config.default_layout).await,
                (LayoutChoice::Named(name), true) => self.load_layout(name).await,
            };
            if let Some(layout) = layout {
                template = merge_layout_with_template(route, &layout, &template)?;
            }
            (template, Some(style).filter(|s| !s.is_empty()))
        };

        let name = descriptor
            .name
            .clone()
            .unwrap_or_else(|| to_pascal_case(route));
        let context = Arc::new(RuntimeContext::new(route, self.services.clone()));
        let unit = Arc::new(RenderableUnit::new(
            route, name, template, style, descriptor, module, context,
        ));

        self.cache
            .set(ArtifactKind::Component.key(route), Artifact::Component(unit.clone()));
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!("Renderable unit built for route: {route}");
        Ok(unit)
    }

    /// The view module; the only mandatory artifact.
    pub async fn load_script(&self, route: &str) -> RouterResult<Arc<dyn ViewModule>> {
        let key = ArtifactKind::Script.key(route);
        if let Some(Artifact::Script(module)) = self.cache.get(&key) {
            return Ok(module);
        }
        let module = self.registry.load(route, &self.module_path(route)).await?;
        self.cache.set(key, Artifact::Script(module.clone()));
        Ok(module)
    }

    async fn fetch_text(&self, url: &str) -> RouterResult<String> {
        let response = self
            .services
            .fetcher
            .fetch(FetchRequest::new(Method::GET, url))
            .await?;
        if !response.is_success() {
            return Err(RouterError::http(response.status));
        }
        response.text()
    }

    /// Template markup, or the generated default when it cannot be fetched.
    pub async fn load_template(&self, route: &str) -> String {
        let key = ArtifactKind::Template.key(route);
        if let Some(Artifact::Template(template)) = self.cache.get(&key) {
            return template;
        }
        let url = format!("{}/views/{route}.html", self.config.src_path);
        match self.fetch_text(&url).await {
            Ok(template) => {
                debug!("Template '{route}' loaded successfully");
                self.cache.set(key, Artifact::Template(template.clone()));
                template
            }
            Err(e) => {
                warn!("Template '{route}' not found, using default: {e}");
                generate_default_template(route)
            }
        }
    }

    /// Stylesheet text, or empty when it cannot be fetched.
    pub async fn load_style(&self, route: &str) -> String {
        let key = ArtifactKind::Style.key(route);
        if let Some(Artifact::Style(style)) = self.cache.get(&key) {
            return style;
        }
        let url = format!("{}/styles/{route}.css", self.config.src_path);
        match self.fetch_text(&url).await {
            Ok(style) => {
                debug!("Style '{route}' loaded successfully");
                self.cache.set(key, Artifact::Style(style.clone()));
                style
            }
            Err(e) => {
                debug!("Style '{route}' not found, no styles applied: {e}");
                String::new()
            }
        }
    }

    pub async fn load_layout(&self, name: &str) -> Option<String> {
        let key = ArtifactKind::Layout.key(name);
        if let Some(Artifact::Layout(layout)) = self.cache.get(&key) {
            return Some(layout);
        }
        let url = format!("{}/layouts/{name}.html", self.config.src_path);
        match self.fetch_text(&url).await {
            Ok(layout) => {
                debug!("Layout '{name}' loaded successfully");
                self.cache.set(key, Artifact::Layout(layout.clone()));
                Some(layout)
            }
            Err(e) => {
                debug!("Layout '{name}' not found, no layout applied: {e}");
                None
            }
        }
    }

    pub async fn fetch_component_data(&self, url: &str) -> RouterResult<Map<String, JsonValue>> {
        data::fetch_component_data(self.services.fetcher.as_ref(), &self.services.query, url).await
    }

    /// Drop every cached artifact of `route`.
    pub fn invalidate_cache(&self, route: &str) {
        let removed = self.cache.invalidate_component_cache(route);
        debug!("Cache invalidated for route {route}: {removed} entries");
    }

    pub fn generate_page_title(&self, route: &str) -> String {
        page_title(route)
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            environment: self.config.environment,
            src_path: self.config.src_path.clone(),
            routes_path: self.config.routes_path.clone(),
            use_layout: self.config.use_layout,
            registered_modules: self.registry.len(),
            builds: self.builds.load(Ordering::SeqCst),
        }
    }
}
