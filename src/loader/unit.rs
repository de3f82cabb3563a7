use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use indexmap::IndexMap;
use log::{debug, error, warn};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::broadcast;

use crate::core::{RouterResult, RuntimeContext};
use crate::query::QueryParams;

use super::descriptor::{DataSource, ViewDescriptor};
use super::form::{self, FormEvent, FormOutcome, FormSpec};
use super::registry::ViewModule;

/// Fully assembled, mountable artifact for one route.
///
/// Units are built once per route and shared read-only; per-mount state
/// lives in [`ViewInstance`].
#[derive(Clone)]
pub struct RenderableUnit {
    route: String,
    name: String,
    template: String,
    style: Option<String>,
    descriptor: ViewDescriptor,
    overlay: Map<String, JsonValue>,
    module: Arc<dyn ViewModule>,
    context: Arc<RuntimeContext>,
}

impl fmt::Debug for RenderableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderableUnit")
            .field("route", &self.route)
            .field("name", &self.name)
            .field("template_len", &self.template.len())
            .field("has_style", &self.style.is_some())
            .finish()
    }
}

impl RenderableUnit {
    pub fn new(
        route: impl Into<String>,
        name: impl Into<String>,
        template: String,
        style: Option<String>,
        descriptor: ViewDescriptor,
        module: Arc<dyn ViewModule>,
        context: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            route: route.into(),
            name: name.into(),
            template,
            style,
            descriptor,
            overlay: Map::new(),
            module,
            context,
        }
    }

    /// Copy of this unit whose initial data carries `overlay` on top.
    pub fn with_overlay(&self, overlay: Map<String, JsonValue>) -> Self {
        let mut unit = self.clone();
        unit.overlay.extend(overlay);
        unit
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn style(&self) -> Option<&str> {
        self.style.as_deref()
    }

    pub fn descriptor(&self) -> &ViewDescriptor {
        &self.descriptor
    }

    pub fn module(&self) -> &Arc<dyn ViewModule> {
        &self.module
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Data for a fresh instance: the module's data, the injected common
    /// fields, then any overlay.
    pub fn initial_data(&self) -> Map<String, JsonValue> {
        let mut data = self.descriptor.data.clone();
        data.insert("currentRoute".into(), JsonValue::String(self.route.clone()));
        data.insert(
            "$query".into(),
            serde_json::to_value(self.context.get_query_params()).unwrap_or_default(),
        );
        data.insert("$lang".into(), JsonValue::String(self.context.language()));
        data.insert("$dataLoading".into(), JsonValue::Bool(false));
        data.extend(self.overlay.clone());
        data
    }

    pub fn instantiate(self: &Arc<Self>) -> ViewInstance {
        ViewInstance::new(self.clone())
    }
}

/// Signals emitted by a mounted instance
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    DataLoaded(Map<String, JsonValue>),
    DataError(FetchErrors),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchErrors {
    Single(String),
    /// Errors keyed by the data source that failed
    PerKey(IndexMap<String, String>),
}

/// Outcome of a multi-endpoint fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiFetchReport {
    pub loaded: Vec<String>,
    pub errors: IndexMap<String, String>,
}

/// Per-mount state of a renderable unit
pub struct ViewInstance {
    unit: Arc<RenderableUnit>,
    data: Mutex<Map<String, JsonValue>>,
    events: broadcast::Sender<ViewEvent>,
}

impl ViewInstance {
    pub fn new(unit: Arc<RenderableUnit>) -> Self {
        let data = unit.initial_data();
        let (events, _) = broadcast::channel(100);
        Self {
            unit,
            data: Mutex::new(data),
            events,
        }
    }

    pub fn unit(&self) -> &Arc<RenderableUnit> {
        &self.unit
    }

    pub fn module(&self) -> &Arc<dyn ViewModule> {
        self.unit.module()
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        self.unit.context()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut Map<String, JsonValue>) -> R) -> R {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut data)
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.with_data(|data| data.get(key).cloned())
    }

    pub fn set(&self, key: impl Into<String>, value: JsonValue) {
        self.with_data(|data| data.insert(key.into(), value));
    }

    pub fn data(&self) -> Map<String, JsonValue> {
        self.with_data(|data| data.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.get("$dataLoading")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn set_loading(&self, loading: bool) {
        self.set("$dataLoading", JsonValue::Bool(loading));
    }

    /// Unified route and query parameters
    pub fn params(&self) -> QueryParams {
        self.context().get_params()
    }

    /// Computed property; `params` is always available.
    pub fn computed(&self, name: &str) -> Option<JsonValue> {
        if name == "params" {
            return serde_json::to_value(self.params()).ok();
        }
        self.module().computed(name, self)
    }

    pub fn t(&self, key: &str, params: &Map<String, JsonValue>) -> String {
        self.context().t(key, params)
    }

    /// Mount lifecycle: the module hook, then the view's data sources.
    pub async fn mounted(&self) -> RouterResult<()> {
        self.module().mounted(self).await?;
        match &self.unit.descriptor().data_source {
            Some(DataSource::Single(_)) => self.fetch_data(None).await,
            Some(DataSource::Multi(_)) => {
                self.fetch_multiple_data().await;
            }
            None => {}
        }
        Ok(())
    }

    /// Fetch the single data source, or the named entry of a keyed one.
    ///
    /// Without a name a keyed source is fetched in full. Failures are
    /// reported as a data-error event rather than returned.
    pub async fn fetch_data(&self, api: Option<&str>) {
        let Some(source) = self.unit.descriptor().data_source.clone() else {
            return;
        };
        self.set_loading(true);
        match (source, api) {
            (DataSource::Single(url), _) => {
                match self.context().fetch_component_data(&url).await {
                    Ok(fetched) => {
                        debug!("Data fetched for {}", self.unit.route());
                        self.with_data(|data| data.extend(fetched.clone()));
                        self.emit(ViewEvent::DataLoaded(fetched));
                    }
                    Err(e) => {
                        warn!("Failed to fetch data for {}: {e}", self.unit.route());
                        self.emit(ViewEvent::DataError(FetchErrors::Single(e.to_string())));
                    }
                }
            }
            (DataSource::Multi(urls), Some(api)) => {
                if let Some(url) = urls.get(api) {
                    match self.context().fetch_component_data(url).await {
                        Ok(fetched) => {
                            debug!("Data fetched for {}.{api}", self.unit.route());
                            let value = JsonValue::Object(fetched);
                            self.set(api, value.clone());
                            let mut loaded = Map::new();
                            loaded.insert(api.to_string(), value);
                            self.emit(ViewEvent::DataLoaded(loaded));
                        }
                        Err(e) => {
                            warn!("Failed to fetch {api} for {}: {e}", self.unit.route());
                            self.emit(ViewEvent::DataError(FetchErrors::Single(e.to_string())));
                        }
                    }
                }
            }
            (DataSource::Multi(urls), None) => {
                self.load_multiple(&urls).await;
            }
        }
        self.set_loading(false);
    }

    /// Fetch every entry of a keyed data source concurrently.
    ///
    /// Successes are committed independently; one failing endpoint never
    /// rolls back or aborts another.
    pub async fn fetch_multiple_data(&self) -> MultiFetchReport {
        let Some(DataSource::Multi(urls)) = self.unit.descriptor().data_source.clone() else {
            return MultiFetchReport::default();
        };
        self.set_loading(true);
        let report = self.load_multiple(&urls).await;
        self.set_loading(false);
        report
    }

    async fn load_multiple(&self, urls: &IndexMap<String, String>) -> MultiFetchReport {
        let context = self.context().clone();
        let results = join_all(urls.iter().map(|(key, url)| {
            let context = context.clone();
            async move { (key.clone(), context.fetch_component_data(url).await) }
        }))
        .await;

        let mut loaded = Map::new();
        let mut report = MultiFetchReport::default();
        for (key, result) in results {
            match result {
                Ok(fetched) => {
                    let value = JsonValue::Object(fetched);
                    self.set(key.clone(), value.clone());
                    loaded.insert(key.clone(), value);
                    report.loaded.push(key);
                }
                Err(e) => {
                    warn!("Failed to fetch {key} for {}: {e}", self.unit.route());
                    report.errors.insert(key, e.to_string());
                }
            }
        }
        debug!(
            "Multiple data fetched for {}: {:?}",
            self.unit.route(),
            report.loaded
        );

        if !loaded.is_empty() {
            self.emit(ViewEvent::DataLoaded(loaded));
        }
        if !report.errors.is_empty() {
            self.emit(ViewEvent::DataError(FetchErrors::PerKey(report.errors.clone())));
        }
        report
    }

    pub async fn fetch_all_data(&self) {
        match &self.unit.descriptor().data_source {
            Some(DataSource::Single(_)) => self.fetch_data(None).await,
            Some(DataSource::Multi(_)) => {
                self.fetch_multiple_data().await;
            }
            None => {}
        }
    }

    fn call_handler(&self, handler: Option<&String>, event: FormEvent<'_>) -> bool {
        match handler {
            Some(name) => self.module().handle_form_event(name, &event, self),
            None => false,
        }
    }

    /// Intercept a submitted form: resolve its action, validate, submit,
    /// then notify the named handlers.
    pub async fn handle_form_submit(&self, form: &FormSpec) -> FormOutcome {
        if !form.is_intercepted() {
            return FormOutcome::NotIntercepted;
        }
        self.call_handler(form.loading_handler.as_ref(), FormEvent::Loading(true));
        let outcome = self.submit(form).await;
        self.call_handler(form.loading_handler.as_ref(), FormEvent::Loading(false));
        outcome
    }

    async fn submit(&self, form: &FormSpec) -> FormOutcome {
        let action = form::process_action_params(form.action.as_deref().unwrap_or(""), self);
        let invalid = form::validate_form(form, self);
        if !invalid.is_empty() {
            debug!("Form validation failed: {invalid:?}");
            return FormOutcome::Invalid(invalid);
        }

        let method = form.method.as_deref().unwrap_or("POST");
        debug!("Form submitting to: {action}");
        let token = self.context().get_token();
        let result = match form::build_submission(&action, method, form, token.as_deref()) {
            Ok(request) => form::submit_form_data(self.context().fetcher().as_ref(), request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                self.call_handler(form.success_handler.as_ref(), FormEvent::Success(&response));
                if let Some(redirect) = &form.redirect {
                    self.schedule_redirect(redirect.clone());
                }
                FormOutcome::Submitted(response)
            }
            Err(e) => {
                warn!("Form submission error: {e}");
                if !self.call_handler(form.error_handler.as_ref(), FormEvent::Error(&e)) {
                    error!("Form submission error: {e}");
                }
                FormOutcome::Failed(e)
            }
        }
    }

    fn schedule_redirect(&self, route: String) {
        let context = self.context().clone();
        let delay = context.form_redirect_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = context.navigate_to(&route, QueryParams::new()).await {
                warn!("Redirect after form submit to {route} failed: {e}");
            }
        });
    }
}
