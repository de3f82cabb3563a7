//! URL and route translation for both addressing modes

use crate::config::RouterMode;
use crate::core::Location;

/// Collapse repeated separators and resolve `.` and `..` without climbing
/// above the root. A trailing separator is kept.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    let mut normalized = format!("/{}", segments.join("/"));
    if path.ends_with('/') && normalized.len() > 1 {
        normalized.push('/');
    }
    normalized
}

/// Turn a relative, absolute, or base-relative path into an absolute URL.
///
/// URLs with a scheme are returned unchanged. Paths starting with `/` are
/// placed under `base_path`; anything else resolves against the directory of
/// the current location.
pub fn resolve_path(path: &str, base_path: &str, location: &Location) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let absolute = if path.starts_with('/') {
        if base_path == "/" {
            path.to_string()
        } else {
            format!("{}{path}", base_path.trim_end_matches('/'))
        }
    } else {
        let dir = match location.pathname.rfind('/') {
            Some(i) => &location.pathname[..=i],
            None => "/",
        };
        format!("{dir}{path}")
    };
    format!("{}{}", location.origin, normalize_path(&absolute))
}

/// Split the location into its route and raw query string.
///
/// Routes are lowercase, carry no leading slash, and default to `home`.
pub fn parse_location(location: &Location, mode: RouterMode, base_path: &str) -> (String, String) {
    let (path, query) = match mode {
        RouterMode::Hash => {
            let hash = location.hash.strip_prefix('#').unwrap_or(&location.hash);
            match hash.split_once('?') {
                Some((path, query)) => (path.to_string(), query.to_string()),
                None => (
                    hash.to_string(),
                    location.search.trim_start_matches('?').to_string(),
                ),
            }
        }
        RouterMode::History => {
            let base = base_path.trim_end_matches('/');
            let path = match location.pathname.strip_prefix(base) {
                Some(rest) if !base.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                    rest
                }
                _ => location.pathname.as_str(),
            };
            (
                path.to_string(),
                location.search.trim_start_matches('?').to_string(),
            )
        }
    };

    let route = path.trim_matches('/').to_lowercase();
    let route = if route.is_empty() {
        "home".to_string()
    } else {
        route
    };
    (route, query)
}

/// Canonical URL for `route` in the active addressing mode
pub fn build_url(route: &str, query_string: &str, mode: RouterMode, base_path: &str) -> String {
    let path = if route == "home" {
        "/".to_string()
    } else {
        format!("/{route}")
    };
    let mut url = match mode {
        RouterMode::Hash => format!("#{path}"),
        RouterMode::History if base_path == "/" => path,
        RouterMode::History => format!("{}{path}", base_path.trim_end_matches('/')),
    };
    if !query_string.is_empty() {
        url.push('?');
        url.push_str(query_string);
    }
    url
}
