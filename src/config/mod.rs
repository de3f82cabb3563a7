use std::fs;

use jsonwebtoken::Algorithm;
use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::{ErrorContext, RouterResult};
use crate::utils::cookie::SameSite;

#[derive(Default, Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_login_route"))]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub router: RouterConfig,

    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    #[serde(default)]
    #[validate(nested)]
    pub query: QueryConfig,

    #[serde(default)]
    #[validate(nested)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub log: LogConfig,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> RouterResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .with_context(&format!("Unable to read conf file from {path}"))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> RouterResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate()?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> RouterResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn is_production(&self) -> bool {
        self.router.environment == Environment::Production
    }

    fn validate_login_route(&self) -> Result<(), ValidationError> {
        if self.auth.enabled && self.auth.is_protected(&self.auth.login_route) {
            return Err(ValidationError::new("login_route_must_not_be_protected"));
        }
        Ok(())
    }
}

/// URL addressing mode
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    #[default]
    Hash,
    History,
}

/// Deployment mode; production expects pre-built view modules
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct RouterConfig {
    #[serde(default)]
    pub mode: RouterMode,
    #[serde(default = "RouterConfig::default_base_path")]
    #[validate(custom(function = "RouterConfig::validate_base_path"))]
    pub base_path: String,
    #[serde(default = "RouterConfig::default_src_path")]
    pub src_path: String,
    #[serde(default = "RouterConfig::default_routes_path")]
    pub routes_path: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_true")]
    pub use_layout: bool,
    #[serde(default = "RouterConfig::default_layout")]
    pub default_layout: String,
    #[serde(default = "RouterConfig::default_language")]
    pub default_language: String,
    #[serde(default = "default_true")]
    pub enable_error_reporting: bool,
    #[serde(default = "RouterConfig::default_form_redirect_delay_ms")]
    pub form_redirect_delay_ms: u64,
    /// Id of the element page containers are mounted into
    #[serde(default = "RouterConfig::default_root_id")]
    #[validate(length(min = 1))]
    pub root_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            base_path: Self::default_base_path(),
            src_path: Self::default_src_path(),
            routes_path: Self::default_routes_path(),
            environment: Environment::default(),
            use_layout: true,
            default_layout: Self::default_layout(),
            default_language: Self::default_language(),
            enable_error_reporting: true,
            form_redirect_delay_ms: Self::default_form_redirect_delay_ms(),
            root_id: Self::default_root_id(),
        }
    }
}

impl RouterConfig {
    fn default_base_path() -> String {
        "/".to_string()
    }

    fn default_src_path() -> String {
        "/src".to_string()
    }

    fn default_routes_path() -> String {
        "/routes".to_string()
    }

    fn default_layout() -> String {
        "default".to_string()
    }

    fn default_language() -> String {
        "ko".to_string()
    }

    fn default_form_redirect_delay_ms() -> u64 {
        1000
    }

    fn default_root_id() -> String {
        "app".to_string()
    }

    fn validate_base_path(base_path: &str) -> Result<(), ValidationError> {
        if base_path.starts_with('/') {
            Ok(())
        } else {
            Err(ValidationError::new("base_path_must_be_absolute"))
        }
    }
}

/// Cache eviction policy
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// TTL only
    #[default]
    Memory,
    /// TTL plus bounded size with least-recently-used eviction
    Lru,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default = "CacheConfig::default_ttl_ms")]
    #[validate(range(min = 1))]
    pub ttl_ms: u64,
    #[serde(default = "CacheConfig::default_max_size")]
    #[validate(range(min = 1))]
    pub max_size: usize,
    #[serde(default)]
    pub auto_cleanup: bool,
    #[serde(default = "CacheConfig::default_cleanup_interval_ms")]
    #[validate(range(min = 1))]
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            ttl_ms: Self::default_ttl_ms(),
            max_size: Self::default_max_size(),
            auto_cleanup: false,
            cleanup_interval_ms: Self::default_cleanup_interval_ms(),
        }
    }
}

impl CacheConfig {
    fn default_ttl_ms() -> u64 {
        300_000
    }

    fn default_max_size() -> usize {
        50
    }

    fn default_cleanup_interval_ms() -> u64 {
        60_000
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct QueryConfig {
    #[serde(default = "default_true")]
    pub enable_validation: bool,
    #[serde(default = "default_true")]
    pub log_security_warnings: bool,
    #[serde(default = "QueryConfig::default_max_parameter_length")]
    #[validate(range(min = 1))]
    pub max_parameter_length: usize,
    #[serde(default = "QueryConfig::default_max_array_size")]
    #[validate(range(min = 1))]
    pub max_array_size: usize,
    #[serde(default = "QueryConfig::default_max_parameter_count")]
    #[validate(range(min = 1))]
    pub max_parameter_count: usize,
    #[serde(default = "QueryConfig::default_max_key_length")]
    #[validate(range(min = 1))]
    pub max_key_length: usize,
    #[serde(default = "QueryConfig::default_allowed_key_pattern")]
    #[validate(custom(function = "QueryConfig::validate_key_pattern"))]
    pub allowed_key_pattern: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enable_validation: true,
            log_security_warnings: true,
            max_parameter_length: Self::default_max_parameter_length(),
            max_array_size: Self::default_max_array_size(),
            max_parameter_count: Self::default_max_parameter_count(),
            max_key_length: Self::default_max_key_length(),
            allowed_key_pattern: Self::default_allowed_key_pattern(),
        }
    }
}

impl QueryConfig {
    fn default_max_parameter_length() -> usize {
        1000
    }

    fn default_max_array_size() -> usize {
        100
    }

    fn default_max_parameter_count() -> usize {
        50
    }

    fn default_max_key_length() -> usize {
        50
    }

    fn default_allowed_key_pattern() -> String {
        "^[a-zA-Z0-9_-]+$".to_string()
    }

    fn validate_key_pattern(pattern: &str) -> Result<(), ValidationError> {
        Regex::new(pattern)
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_allowed_key_pattern"))
    }
}

/// Storage backend for the authentication token
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorage {
    Local,
    Session,
    #[default]
    Cookie,
}

impl TokenStorage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStorage::Local => "local",
            TokenStorage::Session => "session",
            TokenStorage::Cookie => "cookie",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "CookieOptions::default_path")]
    pub path: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub same_site: SameSite,
    /// Defaults to whether the host origin is https
    pub secure: Option<bool>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            domain: None,
            same_site: SameSite::default(),
            secure: None,
        }
    }
}

impl CookieOptions {
    fn default_path() -> String {
        "/".to_string()
    }
}

/// Signature verification for stored tokens
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "JwtConfig::validate_key_material"))]
pub struct JwtConfig {
    /// Symmetric secret key (or base64-encoded secret) for HMAC algorithms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    #[serde(default = "JwtConfig::default_algorithm")]
    pub algorithm: Algorithm,

    #[serde(default)]
    pub base64_secret: bool,

    /// Public key (PEM format) for RSA/ECDSA algorithms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Clock skew allowance in seconds
    #[serde(default)]
    pub leeway: u64,
}

impl JwtConfig {
    fn default_algorithm() -> Algorithm {
        Algorithm::HS256
    }

    fn validate_key_material(&self) -> Result<(), ValidationError> {
        match self.algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 if self.secret.is_none() => {
                Err(ValidationError::new("jwt_secret_required"))
            }
            Algorithm::RS256 | Algorithm::ES256 if self.public_key.is_none() => {
                Err(ValidationError::new("jwt_public_key_required"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "AuthConfig::default_login_route")]
    #[validate(length(min = 1))]
    pub login_route: String,
    #[serde(default)]
    pub protected_routes: Vec<String>,
    #[serde(default)]
    pub protected_prefixes: Vec<String>,
    #[serde(default = "AuthConfig::default_public_routes")]
    pub public_routes: Vec<String>,
    /// Deny routes that are neither public nor protected
    #[serde(default)]
    pub default_deny: bool,
    #[serde(default = "AuthConfig::default_redirect_after_login")]
    pub redirect_after_login: String,
    #[serde(default = "AuthConfig::default_cookie_name")]
    #[validate(length(min = 1))]
    pub cookie_name: String,
    #[serde(default = "AuthConfig::default_fallback_cookie_names")]
    pub fallback_cookie_names: Vec<String>,
    /// Keys read from local/session storage, in order; writes use the first
    #[serde(default = "AuthConfig::default_storage_keys")]
    #[validate(length(min = 1))]
    pub storage_keys: Vec<String>,
    #[serde(default)]
    pub storage: TokenStorage,
    #[serde(default)]
    pub cookie: CookieOptions,
    /// Store tokens without inspecting their claims
    #[serde(default)]
    pub skip_validation: bool,
    /// Refuse to store tokens whose claims cannot be parsed
    #[serde(default)]
    pub require_valid_claims: bool,
    #[validate(nested)]
    pub jwt: Option<JwtConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            login_route: Self::default_login_route(),
            protected_routes: Vec::new(),
            protected_prefixes: Vec::new(),
            public_routes: Self::default_public_routes(),
            default_deny: false,
            redirect_after_login: Self::default_redirect_after_login(),
            cookie_name: Self::default_cookie_name(),
            fallback_cookie_names: Self::default_fallback_cookie_names(),
            storage_keys: Self::default_storage_keys(),
            storage: TokenStorage::default(),
            cookie: CookieOptions::default(),
            skip_validation: false,
            require_valid_claims: false,
            jwt: None,
        }
    }
}

impl AuthConfig {
    fn default_login_route() -> String {
        "login".to_string()
    }

    fn default_public_routes() -> Vec<String> {
        vec!["login".to_string(), "register".to_string(), "home".to_string()]
    }

    fn default_redirect_after_login() -> String {
        "home".to_string()
    }

    fn default_cookie_name() -> String {
        "authToken".to_string()
    }

    fn default_fallback_cookie_names() -> Vec<String> {
        vec![
            "accessToken".to_string(),
            "token".to_string(),
            "jwt".to_string(),
        ]
    }

    fn default_storage_keys() -> Vec<String> {
        vec!["authToken".to_string(), "accessToken".to_string()]
    }

    pub fn is_public(&self, route: &str) -> bool {
        self.public_routes.iter().any(|r| r == route)
    }

    pub fn is_protected(&self, route: &str) -> bool {
        self.protected_routes.iter().any(|r| r == route)
            || self
                .protected_prefixes
                .iter()
                .any(|prefix| route.starts_with(prefix.as_str()))
    }

    /// Primary cookie name followed by the fallbacks
    pub fn cookie_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.cookie_name.as_str())
            .chain(self.fallback_cookie_names.iter().map(String::as_str))
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

fn default_true() -> bool {
    true
}
