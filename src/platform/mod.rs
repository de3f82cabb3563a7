//! In-memory implementations of every collaborator seam
//!
//! These back the test suite and any embedding without a browser: the
//! address bar is a plain [`Location`], the document tracks page containers
//! as records, and storage lives in maps.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::{header, HeaderValue, StatusCode};
use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::{Map, Value as JsonValue};

use crate::auth::AuthStores;
use crate::config::Config;
use crate::core::{
    BrowserHost, CookieJar, Document, FetchRequest, FetchResponse, Fetcher, KeyValueStore,
    Location, MountHandle, Renderer, RouterError, RouterResult, Translator,
};
use crate::loader::{RenderableUnit, ViewInstance};
use crate::router::RouterBuilder;
use crate::utils::cookie::SetCookie;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply an absolute or origin-relative URL to `location`.
fn apply_url(location: &mut Location, url: &str) {
    let (rest, hash) = match url.find('#') {
        Some(i) => (&url[..i], url[i..].to_string()),
        None => (url, String::new()),
    };
    location.hash = hash;
    if rest.is_empty() {
        return;
    }
    let (rest, search) = match rest.find('?') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, String::new()),
    };
    location.search = search;
    if rest.is_empty() {
        return;
    }
    let path = match rest.find("://") {
        Some(scheme_end) => {
            let after = scheme_end + 3;
            let path_start = rest[after..].find('/').map_or(rest.len(), |i| after + i);
            location.origin = rest[..path_start].to_string();
            &rest[path_start..]
        }
        None => rest,
    };
    location.pathname = if path.is_empty() { "/".to_string() } else { path.to_string() };
}

/// One recorded address bar change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Hash(String),
    Push(String),
    Replace(String),
}

pub struct HeadlessHost {
    location: Mutex<Location>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl HeadlessHost {
    /// Host whose address bar shows `url`
    pub fn from_url(url: &str) -> Self {
        let mut location = Location {
            origin: "http://localhost".to_string(),
            pathname: "/".to_string(),
            ..Location::default()
        };
        apply_url(&mut location, url);
        Self {
            location: Mutex::new(location),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Change the address bar without recording history, as a user typing would.
    pub fn set_url(&self, url: &str) {
        apply_url(&mut lock(&self.location), url);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).clone()
    }

    /// Current address as `pathname + search + hash`
    pub fn href(&self) -> String {
        let location = lock(&self.location);
        format!("{}{}{}", location.pathname, location.search, location.hash)
    }
}

impl BrowserHost for HeadlessHost {
    fn location(&self) -> Location {
        lock(&self.location).clone()
    }

    fn set_hash(&self, hash: &str) {
        let hash = if hash.starts_with('#') { hash.to_string() } else { format!("#{hash}") };
        lock(&self.location).hash = hash.clone();
        lock(&self.history).push(HistoryEntry::Hash(hash));
    }

    fn push_state(&self, url: &str) {
        apply_url(&mut lock(&self.location), url);
        lock(&self.history).push(HistoryEntry::Push(url.to_string()));
    }

    fn replace_state(&self, url: &str) {
        apply_url(&mut lock(&self.location), url);
        lock(&self.history).push(HistoryEntry::Replace(url.to_string()));
    }
}

/// A page container under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContainer {
    pub id: String,
    pub class: String,
    pub exiting: bool,
}

pub struct HeadlessDocument {
    root: AtomicBool,
    containers: Mutex<Vec<PageContainer>>,
    styles: DashMap<String, String>,
    fallback: Mutex<Option<String>>,
    scrolls: AtomicUsize,
    frames: AtomicUsize,
}

impl Default for HeadlessDocument {
    fn default() -> Self {
        Self {
            root: AtomicBool::new(true),
            containers: Mutex::new(Vec::new()),
            styles: DashMap::new(),
            fallback: Mutex::new(None),
            scrolls: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
        }
    }
}

impl HeadlessDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or remove the mount root
    pub fn set_root(&self, present: bool) {
        self.root.store(present, Ordering::SeqCst);
    }

    pub fn containers(&self) -> Vec<PageContainer> {
        lock(&self.containers).clone()
    }

    pub fn style(&self, route: &str) -> Option<String> {
        self.styles.get(route).map(|entry| entry.value().clone())
    }

    pub fn fallback(&self) -> Option<String> {
        lock(&self.fallback).clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Document for HeadlessDocument {
    fn has_root(&self) -> bool {
        self.root.load(Ordering::SeqCst)
    }

    fn scroll_to_top(&self) {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_exiting(&self) {
        for container in lock(&self.containers).iter_mut() {
            container.exiting = true;
            container.class = "page-container page-exiting".to_string();
        }
    }

    fn create_container(&self, id: &str, class: &str) -> RouterResult<()> {
        if !self.has_root() {
            return Err(RouterError::Internal(format!(
                "Cannot create container {id}: app element not found"
            )));
        }
        lock(&self.fallback).take();
        lock(&self.containers).push(PageContainer {
            id: id.to_string(),
            class: class.to_string(),
            exiting: false,
        });
        Ok(())
    }

    fn remove_exiting(&self) {
        lock(&self.containers).retain(|container| !container.exiting);
    }

    fn apply_style(&self, route: &str, css: &str) {
        self.styles.insert(route.to_string(), css.to_string());
    }

    fn render_fallback(&self, html: &str) {
        lock(&self.containers).clear();
        *lock(&self.fallback) = Some(html.to_string());
    }

    fn clear(&self) {
        lock(&self.containers).clear();
        lock(&self.fallback).take();
    }

    async fn next_frame(&self) {
        tokio::task::yield_now().await;
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

/// A unit mounted by the headless renderer
#[derive(Clone)]
pub struct MountedView {
    pub handle: MountHandle,
    pub container_id: String,
    pub instance: Arc<ViewInstance>,
}

impl MountedView {
    pub fn route(&self) -> &str {
        self.instance.unit().route()
    }
}

/// Renderer that instantiates units and runs their mount lifecycle on the
/// current tokio runtime.
#[derive(Default)]
pub struct HeadlessRenderer {
    next_handle: AtomicU64,
    mounts: DashMap<u64, MountedView>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live mounts, oldest first
    pub fn mounted(&self) -> Vec<MountedView> {
        let mut mounted: Vec<MountedView> = self
            .mounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        mounted.sort_by_key(|view| view.handle.0);
        mounted
    }

    pub fn mounted_routes(&self) -> Vec<String> {
        self.mounted()
            .iter()
            .map(|view| view.route().to_string())
            .collect()
    }

    pub fn instance(&self, handle: MountHandle) -> Option<Arc<ViewInstance>> {
        self.mounts
            .get(&handle.0)
            .map(|entry| entry.value().instance.clone())
    }

    /// Number of mounts ever performed
    pub fn mount_count(&self) -> u64 {
        self.next_handle.load(Ordering::SeqCst)
    }
}

impl Renderer for HeadlessRenderer {
    fn mount(&self, unit: Arc<RenderableUnit>, container_id: &str) -> RouterResult<MountHandle> {
        let handle = MountHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let instance = Arc::new(unit.instantiate());

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let lifecycle = instance.clone();
            runtime.spawn(async move {
                if let Err(e) = lifecycle.mounted().await {
                    warn!("Mounted hook failed for {}: {e}", lifecycle.unit().route());
                }
            });
        }

        debug!("Mounted {} into {container_id}", unit.route());
        self.mounts.insert(
            handle.0,
            MountedView {
                handle,
                container_id: container_id.to_string(),
                instance,
            },
        );
        Ok(handle)
    }

    fn unmount(&self, handle: MountHandle) {
        if let Some((_, view)) = self.mounts.remove(&handle.0) {
            debug!("Unmounted {} from {}", view.route(), view.container_id);
        }
    }
}

#[derive(Debug, Clone)]
enum Stub {
    Respond(FetchResponse),
    Fail(String),
}

/// Fetcher answering from a URL table; unknown URLs get a 404.
///
/// A URL with a query falls back to the entry registered without it.
#[derive(Default)]
pub struct MemoryFetcher {
    stubs: DashMap<String, Stub>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_response(&self, url: impl Into<String>, response: FetchResponse) {
        self.stubs.insert(url.into(), Stub::Respond(response));
    }

    pub fn insert_text(&self, url: impl Into<String>, body: impl Into<String>) {
        let body: String = body.into();
        self.insert_response(url, FetchResponse::new(StatusCode::OK, body));
    }

    pub fn insert_json(&self, url: impl Into<String>, body: &JsonValue) {
        let mut response = FetchResponse::new(StatusCode::OK, body.to_string());
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.insert_response(url, response);
    }

    pub fn insert_status(&self, url: impl Into<String>, status: StatusCode, body: impl Into<String>) {
        let body: String = body.into();
        self.insert_response(url, FetchResponse::new(status, body));
    }

    /// Make requests to `url` fail at the transport level
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.stubs.insert(url.into(), Stub::Fail(message.into()));
    }

    pub fn remove(&self, url: &str) {
        self.stubs.remove(url);
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    fn lookup(&self, url: &str) -> Option<Stub> {
        let base = url.split('?').next().unwrap_or(url);
        self.stubs
            .get(url)
            .or_else(|| self.stubs.get(base))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, request: FetchRequest) -> RouterResult<FetchResponse> {
        let stub = self.lookup(&request.url);
        lock(&self.requests).push(request);
        match stub {
            Some(Stub::Respond(response)) => Ok(response),
            Some(Stub::Fail(message)) => Err(RouterError::Network(message)),
            None => Ok(FetchResponse::new(StatusCode::NOT_FOUND, Bytes::from_static(b"Not Found"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Cookie jar honoring `Max-Age`/`Expires` removal; other attributes are recorded only.
#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<IndexMap<String, String>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw `Set-Cookie` strings in write order
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn last_set_cookie(&self) -> Option<String> {
        lock(&self.writes).last().cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header(&self) -> String {
        lock(&self.cookies)
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie(&self, cookie: &str) {
        lock(&self.writes).push(cookie.to_string());
        let Some(parsed) = SetCookie::parse(cookie) else {
            warn!("Ignoring malformed cookie: {cookie}");
            return;
        };
        let mut cookies = lock(&self.cookies);
        if parsed.is_removal() {
            cookies.shift_remove(&parsed.name);
        } else {
            cookies.insert(parsed.name, parsed.value);
        }
    }
}

/// Translator over a fixed key table; `{name}` placeholders take params.
pub struct StaticTranslator {
    language: String,
    messages: IndexMap<String, String>,
}

impl StaticTranslator {
    pub fn new<K, V, I>(language: impl Into<String>, messages: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            language: language.into(),
            messages: messages
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Translator for StaticTranslator {
    fn current_language(&self) -> String {
        self.language.clone()
    }

    fn translate(&self, key: &str, params: &Map<String, JsonValue>) -> RouterResult<String> {
        let message = self
            .messages
            .get(key)
            .ok_or_else(|| RouterError::NotFound(format!("Translation key '{key}' not found")))?;
        Ok(params.iter().fold(message.clone(), |text, (name, value)| {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.replace(&format!("{{{name}}}"), &value)
        }))
    }
}

/// Every headless backend, wired for one router
#[derive(Clone)]
pub struct Headless {
    pub host: Arc<HeadlessHost>,
    pub document: Arc<HeadlessDocument>,
    pub renderer: Arc<HeadlessRenderer>,
    pub fetcher: Arc<MemoryFetcher>,
    pub local: Arc<MemoryStore>,
    pub session: Arc<MemoryStore>,
    pub cookies: Arc<MemoryCookieJar>,
}

/// Headless backends with the address bar at `url`
pub fn headless(url: &str) -> Headless {
    Headless {
        host: Arc::new(HeadlessHost::from_url(url)),
        document: Arc::new(HeadlessDocument::new()),
        renderer: Arc::new(HeadlessRenderer::new()),
        fetcher: Arc::new(MemoryFetcher::new()),
        local: Arc::new(MemoryStore::new()),
        session: Arc::new(MemoryStore::new()),
        cookies: Arc::new(MemoryCookieJar::new()),
    }
}

impl Headless {
    pub fn stores(&self) -> AuthStores {
        AuthStores {
            local: self.local.clone(),
            session: self.session.clone(),
            cookies: self.cookies.clone(),
        }
    }

    /// Router builder over these backends
    pub fn router_builder(&self, config: Config) -> RouterBuilder {
        RouterBuilder::new(
            config,
            self.host.clone(),
            self.document.clone(),
            self.renderer.clone(),
            self.fetcher.clone(),
        )
        .stores(self.stores())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_host_url_handling() {
        let host = HeadlessHost::from_url("https://example.com/app/profile?tab=a#/x");
        let location = host.location();
        assert_eq!(location.origin, "https://example.com");
        assert_eq!(location.pathname, "/app/profile");
        assert_eq!(location.search, "?tab=a");
        assert_eq!(location.hash, "#/x");
        assert!(location.is_secure());

        host.set_hash("#/about");
        assert_eq!(host.location().hash, "#/about");
        assert_eq!(host.location().pathname, "/app/profile");

        host.push_state("/app/users?page=2");
        let location = host.location();
        assert_eq!(location.pathname, "/app/users");
        assert_eq!(location.search, "?page=2");
        assert_eq!(location.hash, "");

        host.replace_state("/app/users");
        assert_eq!(host.href(), "/app/users");
        assert_eq!(
            host.history(),
            vec![
                HistoryEntry::Hash("#/about".into()),
                HistoryEntry::Push("/app/users?page=2".into()),
                HistoryEntry::Replace("/app/users".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_document_containers() {
        let document = HeadlessDocument::new();
        document.create_container("page-a-1", "page-container page-entered").unwrap();
        document.mark_exiting();
        document.create_container("page-b-2", "page-container page-entered").unwrap();
        assert_eq!(document.containers().len(), 2);

        document.next_frame().await;
        document.remove_exiting();
        let containers = document.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].id, "page-b-2");
        assert_eq!(document.frame_count(), 1);

        document.set_root(false);
        assert!(document.create_container("page-c-3", "").is_err());
    }

    #[tokio::test]
    async fn test_fetcher_table() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_json("/api/items", &json!({ "n": 1 }));
        fetcher.fail("/api/down", "connection refused");

        let response = fetcher
            .fetch(FetchRequest::get_json("/api/items?page=2"))
            .await
            .unwrap();
        assert_eq!(response.json().unwrap(), json!({ "n": 1 }));

        let err = fetcher
            .fetch(FetchRequest::new(Method::GET, "/api/down"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Network(_)));

        let missing = fetcher
            .fetch(FetchRequest::new(Method::GET, "/nope"))
            .await
            .unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(fetcher.requests().len(), 3);
        assert_eq!(fetcher.request_count("/api/down"), 1);
    }

    #[test]
    fn test_cookie_jar() {
        let jar = MemoryCookieJar::new();
        jar.set_cookie("a=1; Path=/");
        jar.set_cookie("b=x=y; Path=/; Max-Age=60");
        assert_eq!(jar.cookie_header(), "a=1; b=x=y");

        jar.set_cookie("a=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(jar.cookie_header(), "b=x=y");
        assert_eq!(jar.writes().len(), 3);
    }

    #[test]
    fn test_static_translator() {
        let translator = StaticTranslator::new("en", [("hello", "Hello {name}")]);
        let mut params = Map::new();
        params.insert("name".into(), json!("kim"));
        assert_eq!(translator.translate("hello", &params).unwrap(), "Hello kim");
        assert!(translator.translate("missing", &params).is_err());
        assert_eq!(translator.current_language(), "en");
    }
}
