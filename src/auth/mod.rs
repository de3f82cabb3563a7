//! Route gating and token storage.
//!
//! The built-in inspection reads the persistent store, then the session
//! store, then the cookie jar, then the ambient flag. Tokens found expired
//! during inspection are purged from the backend that held them.

pub mod token;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{AuthConfig, CookieOptions, TokenStorage};
use crate::core::{AuthCheck, CookieJar, KeyValueStore, RouterError, RouterResult};
use crate::utils::cookie::{self, CookieAttributes};
use crate::utils::encoding::{decode_component, encode_component};

use token::{TokenState, TokenVerifier};

/// Which backends a token removal applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveScope {
    Local,
    Session,
    Cookie,
    All,
}

/// Notifications published on the auth channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    TokenSet {
        storage: TokenStorage,
        token_length: usize,
        has_expiration: bool,
    },
    TokenRemoved {
        scope: RemoveScope,
    },
    LoginSuccess {
        target_route: String,
    },
    Logout,
    AuthRequired {
        original_route: String,
        login_route: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthReason {
    AuthDisabled,
    PublicRoute,
    NotProtected,
    DefaultDeny,
    CustomAuthSuccess,
    CustomAuthFailed,
    Authenticated,
    NotAuthenticated,
}

/// Outcome of gating one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    pub allowed: bool,
    pub reason: AuthReason,
    pub route: String,
}

impl AuthDecision {
    fn new(allowed: bool, reason: AuthReason, route: &str) -> Self {
        Self {
            allowed,
            reason,
            route: route.to_string(),
        }
    }
}

/// Per-call overrides for [`AuthManager::set_access_token`]
#[derive(Debug, Clone, Default)]
pub struct TokenOptions {
    pub storage: Option<TokenStorage>,
    pub cookie: Option<CookieOptions>,
    pub skip_validation: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStats {
    pub enabled: bool,
    pub is_authenticated: bool,
    pub has_token: bool,
    pub protected_routes_count: usize,
    pub protected_prefixes_count: usize,
    pub public_routes_count: usize,
    pub storage: TokenStorage,
    pub login_route: String,
}

/// Storage primitives the manager reads and writes
#[derive(Clone)]
pub struct AuthStores {
    pub local: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
    pub cookies: Arc<dyn CookieJar>,
}

pub struct AuthManager {
    config: AuthConfig,
    stores: AuthStores,
    check: Option<Arc<dyn AuthCheck>>,
    verifier: Option<TokenVerifier>,
    ambient_authenticated: AtomicBool,
    secure_origin: bool,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthManager {
    pub fn new(config: AuthConfig, stores: AuthStores, secure_origin: bool) -> RouterResult<Self> {
        let verifier = config.jwt.as_ref().map(TokenVerifier::new).transpose()?;
        let (events, _) = broadcast::channel(100);
        info!("Auth manager initialized: enabled={}", config.enabled);
        Ok(Self {
            config,
            stores,
            check: None,
            verifier,
            ambient_authenticated: AtomicBool::new(false),
            secure_origin,
            events,
        })
    }

    /// Install the custom check consulted for protected routes.
    pub fn with_auth_check(mut self, check: Arc<dyn AuthCheck>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        debug!("Auth event emitted: {event:?}");
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn is_public_route(&self, route: &str) -> bool {
        self.config.is_public(route)
    }

    pub fn is_protected_route(&self, route: &str) -> bool {
        self.config.is_protected(route)
    }

    /// Gate navigation to `route`.
    ///
    /// Public routes always pass. Unlisted routes pass unless `default_deny`
    /// is set. Protected routes defer to the custom check when one is
    /// installed; its errors propagate to the caller.
    pub async fn check_authentication(&self, route: &str) -> RouterResult<AuthDecision> {
        if !self.config.enabled {
            return Ok(AuthDecision::new(true, AuthReason::AuthDisabled, route));
        }
        debug!("Checking authentication for route: {route}");

        if self.is_public_route(route) {
            return Ok(AuthDecision::new(true, AuthReason::PublicRoute, route));
        }
        if !self.is_protected_route(route) {
            if self.config.default_deny {
                return Ok(AuthDecision::new(false, AuthReason::DefaultDeny, route));
            }
            return Ok(AuthDecision::new(true, AuthReason::NotProtected, route));
        }

        if let Some(check) = &self.check {
            let allowed = check.check(route).await?;
            let reason = if allowed {
                AuthReason::CustomAuthSuccess
            } else {
                AuthReason::CustomAuthFailed
            };
            return Ok(AuthDecision::new(allowed, reason, route));
        }

        let authenticated = self.is_authenticated();
        let reason = if authenticated {
            AuthReason::Authenticated
        } else {
            AuthReason::NotAuthenticated
        };
        Ok(AuthDecision::new(authenticated, reason, route))
    }

    fn first_stored(&self, store: &dyn KeyValueStore) -> Option<String> {
        self.config
            .storage_keys
            .iter()
            .find_map(|key| store.get(key).filter(|v| !v.is_empty()))
    }

    fn clear_store(&self, store: &dyn KeyValueStore) {
        for key in &self.config.storage_keys {
            store.remove(key);
        }
    }

    /// Whether `token` may be used; expired tokens trigger `purge`.
    fn usable(&self, backend: &str, token: &str, purge: impl FnOnce()) -> bool {
        match token::inspect(token, self.verifier.as_ref()) {
            TokenState::Opaque | TokenState::Valid(_) => {
                debug!("Valid token found in {backend}");
                true
            }
            TokenState::Expired(_) => {
                debug!("{backend} token expired, removing");
                purge();
                false
            }
            TokenState::Invalid(reason) => {
                warn!("Invalid token in {backend}: {reason}");
                false
            }
        }
    }

    /// Built-in credential inspection.
    pub fn is_authenticated(&self) -> bool {
        if let Some(token) = self.first_stored(self.stores.local.as_ref()) {
            if self.usable("local storage", &token, || {
                self.clear_store(self.stores.local.as_ref())
            }) {
                return true;
            }
        }

        if let Some(token) = self.first_stored(self.stores.session.as_ref()) {
            if self.usable("session storage", &token, || {
                self.clear_store(self.stores.session.as_ref())
            }) {
                return true;
            }
        }

        if let Some(token) = self.get_auth_cookie() {
            if self.usable("cookie", &token, || self.remove_auth_cookie()) {
                return true;
            }
        }

        if self.ambient_authenticated.load(Ordering::SeqCst) {
            debug!("Ambient authentication flag set");
            return true;
        }

        debug!("No valid authentication found");
        false
    }

    /// Mark the session as authenticated without a stored token.
    pub fn set_ambient_authenticated(&self, authenticated: bool) {
        self.ambient_authenticated
            .store(authenticated, Ordering::SeqCst);
    }

    /// Decoded value of cookie `name`.
    pub fn get_cookie_value(&self, name: &str) -> Option<String> {
        let header = self.stores.cookies.cookie_header();
        let raw = cookie::get_cookie_value(&header, name)?;
        if raw.is_empty() {
            return None;
        }
        Some(decode_component(raw).unwrap_or_else(|_| raw.to_string()))
    }

    /// Token from the primary cookie, then the fallbacks in order.
    pub fn get_auth_cookie(&self) -> Option<String> {
        self.config.cookie_names().find_map(|name| {
            let value = self.get_cookie_value(name);
            if value.is_some() && name != self.config.cookie_name {
                debug!("Found auth token in fallback cookie: {name}");
            }
            value
        })
    }

    pub fn remove_auth_cookie(&self) {
        let options = &self.config.cookie;
        for name in self.config.cookie_names() {
            self.stores.cookies.set_cookie(&cookie::build_expired_cookie(
                name,
                &options.path,
                options.domain.as_deref(),
            ));
            if options.path != "/" {
                self.stores
                    .cookies
                    .set_cookie(&cookie::build_expired_cookie(name, "/", None));
            }
        }
        debug!("Auth cookies removed");
    }

    /// The stored token, regardless of expiry.
    pub fn get_access_token(&self) -> Option<String> {
        self.first_stored(self.stores.local.as_ref())
            .or_else(|| self.first_stored(self.stores.session.as_ref()))
            .or_else(|| self.get_auth_cookie())
    }

    /// Store `token` in the configured (or overridden) backend.
    ///
    /// Expired tokens are refused. Tokens whose claims cannot be read are
    /// stored with a warning unless `require_valid_claims` is set.
    pub fn set_access_token(&self, token: &str, options: TokenOptions) -> RouterResult<()> {
        if token.is_empty() {
            return Err(RouterError::Validation("Empty token provided".to_string()));
        }
        let storage = options.storage.unwrap_or(self.config.storage);
        let skip_validation = options
            .skip_validation
            .unwrap_or(self.config.skip_validation);

        let mut seconds_left = None;
        if !skip_validation {
            match token::inspect(token, self.verifier.as_ref()) {
                TokenState::Expired(_) => {
                    warn!("Token is expired");
                    return Err(RouterError::Validation("Token is expired".to_string()));
                }
                TokenState::Valid(claims) => {
                    seconds_left = claims.seconds_left();
                    debug!("Token claims validated");
                }
                TokenState::Opaque => {}
                TokenState::Invalid(reason) => {
                    if self.config.require_valid_claims || self.verifier.is_some() {
                        return Err(RouterError::Validation(format!(
                            "Token validation failed: {reason}"
                        )));
                    }
                    warn!("Token validation failed, but proceeding: {reason}");
                }
            }
        } else if let Ok(Some(claims)) = token::decode_claims(token) {
            seconds_left = claims.seconds_left();
        }

        match storage {
            TokenStorage::Local => self.stores.local.set(self.primary_key(), token),
            TokenStorage::Session => self.stores.session.set(self.primary_key(), token),
            TokenStorage::Cookie => {
                let cookie_options = options.cookie.as_ref().unwrap_or(&self.config.cookie);
                self.set_auth_cookie(token, cookie_options, seconds_left);
            }
        }
        debug!("Token saved to {} storage", storage.as_str());

        self.emit(AuthEvent::TokenSet {
            storage,
            token_length: token.len(),
            has_expiration: token.contains('.'),
        });
        Ok(())
    }

    fn primary_key(&self) -> &str {
        self.config
            .storage_keys
            .first()
            .map(String::as_str)
            .unwrap_or("authToken")
    }

    fn set_auth_cookie(&self, token: &str, options: &CookieOptions, seconds_left: Option<i64>) {
        let attrs = CookieAttributes {
            path: options.path.clone(),
            domain: options.domain.clone(),
            same_site: options.same_site,
            secure: options.secure.unwrap_or(self.secure_origin),
            max_age: seconds_left,
        };
        let cookie_string =
            cookie::build_set_cookie(&self.config.cookie_name, &encode_component(token), &attrs);
        self.stores.cookies.set_cookie(&cookie_string);
        debug!("Auth cookie set: {}", self.config.cookie_name);
    }

    pub fn remove_access_token(&self, scope: RemoveScope) {
        match scope {
            RemoveScope::Local => self.clear_store(self.stores.local.as_ref()),
            RemoveScope::Session => self.clear_store(self.stores.session.as_ref()),
            RemoveScope::Cookie => self.remove_auth_cookie(),
            RemoveScope::All => {
                self.clear_store(self.stores.local.as_ref());
                self.clear_store(self.stores.session.as_ref());
                self.remove_auth_cookie();
            }
        }
        self.emit(AuthEvent::TokenRemoved { scope });
        debug!("Token removed from: {scope:?}");
    }

    /// Record a successful login; returns the route to navigate to.
    pub fn handle_login_success(&self, target_route: Option<&str>) -> String {
        let redirect = target_route
            .filter(|r| !r.is_empty())
            .unwrap_or(self.config.redirect_after_login.as_str())
            .to_string();
        info!("Login success, redirecting to: {redirect}");
        self.emit(AuthEvent::LoginSuccess {
            target_route: redirect.clone(),
        });
        redirect
    }

    /// Drop every credential; returns the login route to navigate to.
    pub fn handle_logout(&self) -> String {
        info!("Logging out user");
        self.remove_access_token(RemoveScope::All);
        self.set_ambient_authenticated(false);
        self.emit(AuthEvent::Logout);
        self.config.login_route.clone()
    }

    pub(crate) fn emit_auth_required(&self, original_route: &str) {
        self.emit(AuthEvent::AuthRequired {
            original_route: original_route.to_string(),
            login_route: self.config.login_route.clone(),
        });
    }

    pub fn stats(&self) -> AuthStats {
        AuthStats {
            enabled: self.config.enabled,
            is_authenticated: self.is_authenticated(),
            has_token: self.get_access_token().is_some(),
            protected_routes_count: self.config.protected_routes.len(),
            protected_prefixes_count: self.config.protected_prefixes.len(),
            public_routes_count: self.config.public_routes.len(),
            storage: self.config.storage,
            login_route: self.config.login_route.clone(),
        }
    }
}
