//! Runtime context injected into every renderable unit
//!
//! A mounted unit reaches navigation, parameters, translation, and
//! authentication through this context instead of ambient globals. The
//! navigator is held weakly so a cached unit never keeps the router alive.

use std::sync::{Arc, Weak};
use std::time::Duration;

use log::warn;
use serde_json::{Map, Value as JsonValue};

use crate::auth::{AuthDecision, AuthManager, AuthReason, RemoveScope, TokenOptions};
use crate::internal_error;
use crate::loader::data::fetch_component_data;
use crate::query::{ParamValue, QueryManager, QueryParams};

use super::error::RouterResult;
use super::traits::{Fetcher, Navigator, Translator};

/// Router-wide services shared by the contexts of every route.
#[derive(Clone)]
pub struct RuntimeServices {
    pub navigator: Weak<dyn Navigator>,
    pub query: Arc<QueryManager>,
    pub auth: Option<Arc<AuthManager>>,
    pub translator: Option<Arc<dyn Translator>>,
    pub fetcher: Arc<dyn Fetcher>,
    pub default_language: String,
    pub form_redirect_delay: Duration,
}

/// Context bound to one route name
#[derive(Clone)]
pub struct RuntimeContext {
    route: String,
    services: RuntimeServices,
}

impl RuntimeContext {
    pub fn new(route: impl Into<String>, services: RuntimeServices) -> Self {
        Self {
            route: route.into(),
            services,
        }
    }

    /// Route this context was built for
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    fn navigator(&self) -> RouterResult<Arc<dyn Navigator>> {
        self.services
            .navigator
            .upgrade()
            .ok_or_else(|| internal_error!("Router is no longer available"))
    }

    pub async fn navigate_to(&self, route: &str, params: QueryParams) -> RouterResult<()> {
        self.navigator()?.navigate(route, params).await
    }

    /// Route currently resolved by the router
    pub fn current_route(&self) -> String {
        self.navigator()
            .map(|navigator| navigator.current_route())
            .unwrap_or_else(|_| self.route.clone())
    }

    pub fn get_params(&self) -> QueryParams {
        self.services.query.get_all_params()
    }

    pub fn get_param(&self, key: &str) -> Option<ParamValue> {
        self.services.query.get_param(key)
    }

    pub fn get_query_params(&self) -> QueryParams {
        self.services.query.get_query_params()
    }

    pub fn get_route_params(&self) -> QueryParams {
        self.services.query.get_route_params()
    }

    pub fn language(&self) -> String {
        self.services
            .translator
            .as_ref()
            .map(|t| t.current_language())
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| self.services.default_language.clone())
    }

    /// Translate `key`; any lookup failure yields the key itself.
    pub fn t(&self, key: &str, params: &Map<String, JsonValue>) -> String {
        let Some(translator) = &self.services.translator else {
            return key.to_string();
        };
        match translator.translate(key, params) {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => key.to_string(),
            Err(e) => {
                warn!("Translation failed, returning key {key}: {e}");
                key.to_string()
            }
        }
    }

    pub async fn fetch_component_data(&self, url: &str) -> RouterResult<Map<String, JsonValue>> {
        fetch_component_data(
            self.services.fetcher.as_ref(),
            &self.services.query,
            url,
        )
        .await
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.services.fetcher
    }

    pub fn form_redirect_delay(&self) -> Duration {
        self.services.form_redirect_delay
    }

    pub fn auth(&self) -> Option<&Arc<AuthManager>> {
        self.services.auth.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.services
            .auth
            .as_ref()
            .is_some_and(|auth| auth.is_authenticated())
    }

    pub async fn check_auth(&self, route: &str) -> RouterResult<AuthDecision> {
        match &self.services.auth {
            Some(auth) => auth.check_authentication(route).await,
            None => Ok(AuthDecision {
                allowed: true,
                reason: AuthReason::AuthDisabled,
                route: route.to_string(),
            }),
        }
    }

    pub async fn logout(&self) -> RouterResult<()> {
        if let Some(auth) = &self.services.auth {
            let login = auth.handle_logout();
            self.navigate_to(&login, QueryParams::new()).await?;
        }
        Ok(())
    }

    pub async fn login_success(&self, target: Option<&str>) -> RouterResult<()> {
        if let Some(auth) = &self.services.auth {
            let route = auth.handle_login_success(target);
            self.navigate_to(&route, QueryParams::new()).await?;
        }
        Ok(())
    }

    pub fn get_token(&self) -> Option<String> {
        self.services.auth.as_ref()?.get_access_token()
    }

    /// Store a token; `Ok(false)` when authentication is disabled.
    pub fn set_token(&self, token: &str, options: TokenOptions) -> RouterResult<bool> {
        match &self.services.auth {
            Some(auth) => auth.set_access_token(token, options).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn remove_token(&self, scope: RemoveScope) {
        if let Some(auth) = &self.services.auth {
            auth.remove_access_token(scope);
        }
    }

    pub fn get_auth_cookie(&self) -> Option<String> {
        self.services.auth.as_ref()?.get_auth_cookie()
    }

    pub fn get_cookie(&self, name: &str) -> Option<String> {
        self.services.auth.as_ref()?.get_cookie_value(name)
    }
}
