//! Collaborator seams for the navigation pipeline
//!
//! The router never touches the browser directly. Address bar, DOM,
//! rendering, network, and storage are reached through these traits so the
//! pipeline can be embedded in any host and driven headlessly in tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Map, Value as JsonValue};

use crate::loader::RenderableUnit;
use crate::query::QueryParams;

use super::error::{RouterError, RouterResult};

/// Snapshot of the host's address bar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Scheme and authority, e.g. `https://example.com`
    pub origin: String,
    pub pathname: String,
    /// Query part including the leading `?`, or empty
    pub search: String,
    /// Fragment including the leading `#`, or empty
    pub hash: String,
}

impl Location {
    pub fn is_secure(&self) -> bool {
        self.origin.starts_with("https:")
    }
}

/// Trait for address bar access and history manipulation
pub trait BrowserHost: Send + Sync {
    fn location(&self) -> Location;

    /// Set the fragment; `hash` carries its leading `#`
    fn set_hash(&self, hash: &str);

    fn push_state(&self, url: &str);

    fn replace_state(&self, url: &str);
}

/// Trait for the DOM operations used during a transition
#[async_trait]
pub trait Document: Send + Sync {
    /// Whether the mount root element exists
    fn has_root(&self) -> bool;

    fn scroll_to_top(&self);

    /// Mark every existing page container as exiting
    fn mark_exiting(&self);

    /// Append a new page container to the root
    fn create_container(&self, id: &str, class: &str) -> RouterResult<()>;

    /// Remove containers previously marked as exiting
    fn remove_exiting(&self);

    /// Install the stylesheet for a route, replacing any previous one
    fn apply_style(&self, route: &str, css: &str);

    /// Replace the root's content with raw markup
    fn render_fallback(&self, html: &str);

    /// Empty the root
    fn clear(&self);

    /// Resolve on the next paint frame
    async fn next_frame(&self);
}

/// Opaque reference to a mounted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MountHandle(pub u64);

/// Trait for the UI runtime that mounts renderable units
pub trait Renderer: Send + Sync {
    fn mount(&self, unit: Arc<RenderableUnit>, container_id: &str) -> RouterResult<MountHandle>;

    fn unmount(&self, handle: MountHandle);
}

/// Outbound HTTP request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// GET with JSON accept headers
    pub fn get_json(url: impl Into<String>) -> Self {
        let mut request = Self::new(Method::GET, url);
        request.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        request
            .headers
            .insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        request
    }
}

/// HTTP response as returned by a [`Fetcher`]
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> RouterResult<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| RouterError::Network(format!("Response body is not UTF-8: {e}")))
    }

    pub fn json(&self) -> RouterResult<JsonValue> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Trait for remote fetches
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Transport failures surface as [`RouterError::Network`]; any received
    /// response, whatever its status, is returned as `Ok`.
    async fn fetch(&self, request: FetchRequest) -> RouterResult<FetchResponse>;
}

/// Trait for string key/value storage (persistent or session scoped)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);
}

/// Trait for cookie access
pub trait CookieJar: Send + Sync {
    /// All visible cookies in `Cookie` header form (`a=1; b=2`)
    fn cookie_header(&self) -> String;

    /// Apply one `Set-Cookie` style string
    fn set_cookie(&self, cookie: &str);
}

/// Trait for the translation lookup provided by the i18n collaborator
pub trait Translator: Send + Sync {
    fn current_language(&self) -> String;

    fn translate(&self, key: &str, params: &Map<String, JsonValue>) -> RouterResult<String>;
}

/// Custom authentication check injected into the auth manager
#[async_trait]
pub trait AuthCheck: Send + Sync {
    async fn check(&self, route: &str) -> RouterResult<bool>;
}

/// Navigation delegation from mounted units back to the router
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, route: &str, params: QueryParams) -> RouterResult<()>;

    fn current_route(&self) -> String;
}
