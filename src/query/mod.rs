//! Query and route parameter state.
//!
//! Query parameters come from the URL and pass through two independent
//! filtering layers: validation rejects a pair outright, sanitization strips
//! whatever survives validation. Route parameters are supplied
//! programmatically at navigation time and are never parsed from the URL.

pub mod sanitize;

use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::config_error;
use crate::core::RouterResult;
use crate::utils::encoding::{decode_component, encode_component};

/// A single query value or an array collected from `key[]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Single(value) => Some(value),
            ParamValue::Multi(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Single(value) => value.is_empty(),
            ParamValue::Multi(values) => values.is_empty(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Single(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Single(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::Multi(values)
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Single(value) => write!(f, "{value}"),
            ParamValue::Multi(values) => write!(f, "{}", values.join(",")),
        }
    }
}

/// Ordered parameter map; insertion order is preserved.
pub type QueryParams = IndexMap<String, ParamValue>;

/// Build a [`QueryParams`] from literal pairs.
pub fn params<K, V, I>(pairs: I) -> QueryParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<ParamValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug, Clone, Default)]
struct ParamState {
    query: QueryParams,
    route: QueryParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub current_params: usize,
    pub current_route_params: usize,
    pub max_allowed: usize,
    pub validation_enabled: bool,
    pub current_query_string: String,
}

pub struct QueryManager {
    config: QueryConfig,
    key_pattern: Regex,
    state: ArcSwap<ParamState>,
}

impl QueryManager {
    pub fn new(config: QueryConfig) -> RouterResult<Self> {
        let key_pattern = Regex::new(&config.allowed_key_pattern).map_err(|e| {
            config_error!("Invalid allowed_key_pattern {}: {}", config.allowed_key_pattern, e)
        })?;
        debug!(
            "Query manager initialized: validation={}, max_params={}",
            config.enable_validation, config.max_parameter_count
        );
        Ok(Self {
            config,
            key_pattern,
            state: ArcSwap::from_pointee(ParamState::default()),
        })
    }

    fn security_warning(&self, msg: std::fmt::Arguments<'_>) {
        if self.config.log_security_warnings {
            warn!("{msg}");
        }
    }

    /// Strip markup, script, and SQL fragments, then truncate.
    ///
    /// Stripping repeats until the value is stable, so sanitizing the output
    /// again is a no-op.
    pub fn sanitize_parameter(&self, value: &str) -> String {
        let mut current = sanitize::sanitize(value, self.config.max_parameter_length);
        loop {
            let next = sanitize::sanitize(&current, self.config.max_parameter_length);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    /// Sanitize a value that already passed validation and check the result
    /// again, since stripping can join fragments into a dangerous pattern.
    fn clean_value(&self, key: &str, value: &str) -> Option<String> {
        let sanitized = self.sanitize_parameter(value);
        if self.config.enable_validation && sanitized != value {
            if let Some(pattern) = sanitize::find_dangerous(&sanitized) {
                self.security_warning(format_args!(
                    "Dangerous pattern {pattern} assembled by sanitizing parameter {key}"
                ));
                return None;
            }
        }
        Some(sanitized)
    }

    fn validate_key(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        if !self.key_pattern.is_match(key) {
            self.security_warning(format_args!("Invalid parameter key format: {key}"));
            return false;
        }
        if key.chars().count() > self.config.max_key_length {
            self.security_warning(format_args!("Parameter key too long: {key}"));
            return false;
        }
        true
    }

    fn validate_value(&self, key: &str, value: &str) -> bool {
        if value.chars().count() > self.config.max_parameter_length {
            self.security_warning(format_args!("Parameter value too long for key: {key}"));
            return false;
        }
        if let Some(pattern) = sanitize::find_dangerous(value) {
            self.security_warning(format_args!(
                "Dangerous pattern {pattern} detected in parameter {key}"
            ));
            return false;
        }
        true
    }

    /// Reject keys outside the allow-list and values carrying dangerous patterns.
    ///
    /// Array values are bounded by `max_array_size` and every element is
    /// checked under the same key.
    pub fn validate_parameter(&self, key: &str, value: &ParamValue) -> bool {
        if !self.config.enable_validation {
            return true;
        }
        if !self.validate_key(key) {
            return false;
        }
        match value {
            ParamValue::Single(value) => self.validate_value(key, value),
            ParamValue::Multi(values) => {
                if values.len() > self.config.max_array_size {
                    self.security_warning(format_args!("Parameter array too large for key: {key}"));
                    return false;
                }
                values.iter().all(|item| self.validate_value(key, item))
            }
        }
    }

    /// Parse a raw query string (without the leading `?`).
    ///
    /// Pairs that fail to decode or validate are dropped individually. `key[]`
    /// pairs accumulate into an array capped at `max_array_size`; keys beyond
    /// `max_parameter_count` are dropped, keeping the earlier ones in order.
    pub fn parse_query_string(&self, raw: &str) -> QueryParams {
        let mut params = QueryParams::new();
        let raw = raw.strip_prefix('?').unwrap_or(raw);

        for pair in raw.split('&') {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            if raw_key.is_empty() {
                continue;
            }
            let (key, value) = match (decode_component(raw_key), decode_component(raw_value)) {
                (Ok(key), Ok(value)) => (key, value),
                _ => {
                    warn!("Failed to decode URI component: {pair}");
                    continue;
                }
            };

            let is_array = key.ends_with("[]");
            let name = if is_array {
                key[..key.len() - 2].to_string()
            } else {
                key
            };
            if !self.validate_parameter(&name, &ParamValue::Single(value.clone())) {
                debug!("Parameter rejected by security filter: {name}");
                continue;
            }
            let Some(sanitized) = self.clean_value(&name, &value) else {
                continue;
            };

            if !params.contains_key(&name) && params.len() >= self.config.max_parameter_count {
                self.security_warning(format_args!(
                    "Too many parameters. Limiting to first {}.",
                    self.config.max_parameter_count
                ));
                continue;
            }

            if is_array {
                let entry = params
                    .entry(name.clone())
                    .or_insert_with(|| ParamValue::Multi(Vec::new()));
                match entry {
                    ParamValue::Multi(values) if values.len() < self.config.max_array_size => {
                        values.push(sanitized)
                    }
                    ParamValue::Multi(_) => self.security_warning(format_args!(
                        "Array parameter {name} size limit exceeded"
                    )),
                    single => *single = ParamValue::Multi(vec![sanitized]),
                }
            } else {
                params.insert(name, ParamValue::Single(sanitized));
            }
        }
        params
    }

    /// Encode parameters; arrays become repeated `key[]=value` pairs.
    pub fn build_query_string(&self, params: &QueryParams) -> String {
        let mut pairs = Vec::with_capacity(params.len());
        for (key, value) in params {
            let key = encode_component(key);
            match value {
                ParamValue::Single(value) => {
                    pairs.push(format!("{key}={}", encode_component(value)))
                }
                ParamValue::Multi(values) => {
                    for item in values {
                        pairs.push(format!("{key}[]={}", encode_component(item)));
                    }
                }
            }
        }
        pairs.join("&")
    }

    /// Structural comparison against the current query parameters.
    pub fn has_query_params_changed(&self, new_params: &QueryParams) -> bool {
        let state = self.state.load();
        let current = &state.query;
        current.len() != new_params.len()
            || current
                .iter()
                .any(|(key, value)| new_params.get(key) != Some(value))
    }

    pub fn get_query_params(&self) -> QueryParams {
        self.state.load().query.clone()
    }

    pub fn get_query_param(&self, key: &str) -> Option<ParamValue> {
        self.state.load().query.get(key).cloned()
    }

    /// Merge (or with `replace`, substitute) validated and sanitized values.
    ///
    /// Rejected pairs are skipped, empty values remove their key, and the
    /// result is capped at `max_parameter_count` keys.
    pub fn set_query_params(&self, params: QueryParams, replace: bool) {
        let mut sanitized = QueryParams::new();
        for (key, value) in params {
            if !self.validate_parameter(&key, &value) {
                warn!("Parameter {key} rejected by security filter");
                continue;
            }
            let value = match value {
                ParamValue::Single(v) => self.clean_value(&key, &v).map(ParamValue::Single),
                ParamValue::Multi(vs) => vs
                    .iter()
                    .map(|v| self.clean_value(&key, v))
                    .collect::<Option<Vec<_>>>()
                    .map(ParamValue::Multi),
            };
            match value {
                Some(value) => {
                    sanitized.insert(key, value);
                }
                None => warn!("Parameter {key} rejected after sanitization"),
            }
        }

        let max = self.config.max_parameter_count;
        self.state.rcu(|state| {
            let mut next = ParamState::clone(state);
            if replace {
                next.query.clear();
            }
            for (key, value) in &sanitized {
                next.query.insert(key.clone(), value.clone());
            }
            next.query.retain(|_, value| !value.is_empty());
            if next.query.len() > max {
                self.security_warning(format_args!(
                    "Too many parameters after update ({}). Keeping first {max}.",
                    next.query.len()
                ));
                next.query.truncate(max);
            }
            next
        });
    }

    pub fn remove_query_params(&self, keys: &[&str]) {
        self.state.rcu(|state| {
            let mut next = ParamState::clone(state);
            for key in keys {
                next.query.shift_remove(*key);
            }
            next
        });
    }

    pub fn clear_query_params(&self) {
        self.state.rcu(|state| ParamState {
            query: QueryParams::new(),
            route: state.route.clone(),
        });
    }

    /// Replace the query parameters with an already-parsed map.
    pub fn set_current_query_params(&self, params: QueryParams) {
        self.state.rcu(|state| ParamState {
            query: params.clone(),
            route: state.route.clone(),
        });
    }

    pub fn set_route_params(&self, params: QueryParams) {
        debug!("Route params set: {params:?}");
        self.state.rcu(|state| ParamState {
            query: state.query.clone(),
            route: params.clone(),
        });
    }

    pub fn get_route_params(&self) -> QueryParams {
        self.state.load().route.clone()
    }

    pub fn get_route_param(&self, key: &str) -> Option<ParamValue> {
        self.state.load().route.get(key).cloned()
    }

    /// Route parameters overlaid with query parameters; query wins.
    pub fn get_all_params(&self) -> QueryParams {
        let state = self.state.load();
        let mut all = state.route.clone();
        for (key, value) in &state.query {
            all.insert(key.clone(), value.clone());
        }
        all
    }

    pub fn get_param(&self, key: &str) -> Option<ParamValue> {
        let state = self.state.load();
        state
            .query
            .get(key)
            .or_else(|| state.route.get(key))
            .cloned()
    }

    pub fn stats(&self) -> QueryStats {
        let state = self.state.load();
        QueryStats {
            current_params: state.query.len(),
            current_route_params: state.route.len(),
            max_allowed: self.config.max_parameter_count,
            validation_enabled: self.config.enable_validation,
            current_query_string: self.build_query_string(&state.query),
        }
    }

    pub fn reset(&self) {
        self.state.store(Arc::new(ParamState::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> QueryManager {
        QueryManager::new(QueryConfig::default()).unwrap()
    }

    fn single(v: &str) -> ParamValue {
        ParamValue::Single(v.to_string())
    }

    #[test]
    fn test_parse_basic() {
        let qm = manager();
        let parsed = qm.parse_query_string("?tab=settings&page=2&flag");
        assert_eq!(parsed.get("tab"), Some(&single("settings")));
        assert_eq!(parsed.get("page"), Some(&single("2")));
        assert_eq!(parsed.get("flag"), Some(&single("")));
        assert_eq!(
            parsed.keys().collect::<Vec<_>>(),
            vec!["tab", "page", "flag"]
        );
    }

    #[test]
    fn test_parse_keeps_equals_in_value() {
        let qm = manager();
        let parsed = qm.parse_query_string("token=abc%3D%3D&x=a=b");
        assert_eq!(parsed.get("token"), Some(&single("abc==")));
        assert_eq!(parsed.get("x"), Some(&single("a=b")));
    }

    #[test]
    fn test_decode_failure_drops_only_that_pair() {
        let qm = manager();
        let parsed = qm.parse_query_string("a=1&b=%E0%A4%A&c=3");
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains_key("a"));
        assert!(parsed.contains_key("c"));
    }

    #[test]
    fn test_array_params_and_cap() {
        let qm = QueryManager::new(QueryConfig {
            max_array_size: 2,
            ..QueryConfig::default()
        })
        .unwrap();
        let parsed = qm.parse_query_string("tags[]=a&tags[]=b&tags[]=c");
        assert_eq!(
            parsed.get("tags"),
            Some(&ParamValue::Multi(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_parameter_count_cap_keeps_prefix() {
        let qm = QueryManager::new(QueryConfig {
            max_parameter_count: 2,
            ..QueryConfig::default()
        })
        .unwrap();
        let parsed = qm.parse_query_string("a=1&b=2&c=3&a=4");
        assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(parsed.get("a"), Some(&single("4")));
    }

    #[test]
    fn test_rejects_bad_keys_and_dangerous_values() {
        let qm = manager();
        let parsed = qm.parse_query_string(
            "ok=1&bad%20key=2&x=%3Cscript%3Ealert(1)%3C%2Fscript%3E&p=..%2F..%2Fetc&q=1%20union%20select%202",
        );
        assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["ok"]);

        let long_key = "k".repeat(51);
        assert!(!qm.validate_parameter(&long_key, &single("v")));
        assert!(!qm.validate_parameter("a", &single(&"v".repeat(1001))));
        assert!(!qm.validate_parameter(
            "tags",
            &ParamValue::Multi(vec!["fine".into(), "javascript:x".into()])
        ));
        assert!(qm.validate_parameter("tags", &ParamValue::Multi(vec!["fine".into()])));
    }

    #[test]
    fn test_validation_can_be_disabled() {
        let qm = QueryManager::new(QueryConfig {
            enable_validation: false,
            ..QueryConfig::default()
        })
        .unwrap();
        assert!(qm.validate_parameter("bad key!", &single("<script>")));
        let parsed = qm.parse_query_string("x=%3Cscript%3Ealert(1)%3C%2Fscript%3Ey");
        // sanitization still applies
        assert_eq!(parsed.get("x"), Some(&single("y")));
    }

    #[test]
    fn test_sanitized_values_never_contain_script() {
        let qm = QueryManager::new(QueryConfig {
            enable_validation: false,
            ..QueryConfig::default()
        })
        .unwrap();
        for input in [
            "<script>x</script>",
            "<scr<script>ipt>alert(1)</script>",
            "a<script",
            "<SCRIPT>",
        ] {
            assert!(!qm.sanitize_parameter(input).contains("<script"), "{input}");
        }
    }

    #[test]
    fn test_round_trip() {
        let qm = manager();
        let raw = "q=hello%20world&tags[]=rust&tags[]=web&lang=%ED%95%9C&empty=";
        let parsed = qm.parse_query_string(raw);
        let rebuilt = qm.build_query_string(&parsed);
        assert_eq!(qm.parse_query_string(&rebuilt), parsed);
        assert_eq!(
            rebuilt,
            "q=hello%20world&tags[]=rust&tags[]=web&lang=%ED%95%9C&empty="
        );
    }

    #[test]
    fn test_stripping_cannot_assemble_dangerous_values() {
        let qm = manager();
        let parsed = qm.parse_query_string("k=dat;a:x&p=.;./.;./etc/passwd&j=java;script:alert(1)");
        assert_eq!(parsed.get("k"), Some(&single("x")));
        assert_eq!(parsed.get("j"), Some(&single("alert(1)")));
        assert_eq!(parsed.get("p"), None);
        for value in parsed.values() {
            assert!(sanitize::find_dangerous(&value.to_string()).is_none());
        }

        let rebuilt = qm.build_query_string(&parsed);
        assert_eq!(qm.parse_query_string(&rebuilt), parsed);

        qm.set_query_params(
            params([("k", "dat;a:x"), ("p", ".;./.;./etc/passwd"), ("ok", "1")]),
            true,
        );
        assert_eq!(qm.get_query_params(), params([("k", "x"), ("ok", "1")]));
    }

    #[test]
    fn test_has_query_params_changed_is_structural() {
        let qm = manager();
        qm.set_current_query_params(params([("a", "1"), ("b", "2")]));
        assert!(!qm.has_query_params_changed(&params([("b", "2"), ("a", "1")])));
        assert!(qm.has_query_params_changed(&params([("a", "1")])));
        assert!(qm.has_query_params_changed(&params([("a", "1"), ("b", "3")])));
        assert!(qm.has_query_params_changed(&params([("a", "1"), ("c", "2")])));
    }

    #[test]
    fn test_set_remove_clear() {
        let qm = manager();
        qm.set_query_params(params([("a", "1"), ("b", "2")]), false);
        qm.set_query_params(params([("b", ""), ("c", "3"), ("bad key", "x")]), false);
        assert_eq!(
            qm.get_query_params().keys().collect::<Vec<_>>(),
            vec!["a", "c"]
        );

        qm.set_query_params(params([("z", "9")]), true);
        assert_eq!(qm.get_query_params(), params([("z", "9")]));

        qm.set_query_params(params([("y", "8")]), false);
        qm.remove_query_params(&["z"]);
        assert_eq!(qm.get_query_param("y"), Some(single("8")));
        assert_eq!(qm.get_query_param("z"), None);

        qm.clear_query_params();
        assert!(qm.get_query_params().is_empty());
    }

    #[test]
    fn test_set_caps_parameter_count() {
        let qm = QueryManager::new(QueryConfig {
            max_parameter_count: 2,
            ..QueryConfig::default()
        })
        .unwrap();
        qm.set_query_params(params([("a", "1"), ("b", "2"), ("c", "3")]), false);
        assert_eq!(qm.stats().current_params, 2);
    }

    #[test]
    fn test_unified_view_query_wins() {
        let qm = manager();
        qm.set_route_params(params([("id", "7"), ("tab", "info")]));
        qm.set_current_query_params(params([("tab", "settings")]));
        let all = qm.get_all_params();
        assert_eq!(all.get("id"), Some(&single("7")));
        assert_eq!(all.get("tab"), Some(&single("settings")));
        assert_eq!(qm.get_param("tab"), Some(single("settings")));
        assert_eq!(qm.get_param("id"), Some(single("7")));
        assert_eq!(qm.get_route_param("tab"), Some(single("info")));

        qm.clear_query_params();
        assert_eq!(qm.get_route_params().len(), 2);
    }

    #[test]
    fn test_stats() {
        let qm = manager();
        qm.set_current_query_params(params([("a", "b c")]));
        let stats = qm.stats();
        assert_eq!(stats.current_params, 1);
        assert_eq!(stats.max_allowed, 50);
        assert_eq!(stats.current_query_string, "a=b%20c");
    }
}
