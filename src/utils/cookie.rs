use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// `SameSite` cookie attribute.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes appended to a `Set-Cookie` string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieAttributes {
    pub path: String,
    pub domain: Option<String>,
    pub same_site: SameSite,
    pub secure: bool,
    /// Lifetime in seconds; `Some(0)` expires the cookie immediately
    pub max_age: Option<i64>,
}

const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Retrieves the value of a specific cookie from a `Cookie` header string.
///
/// Returns the first occurrence of the cookie's value, split on the first
/// `=` only so values containing `=` survive.
pub fn get_cookie_value<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    for item in cookie_header.split(';') {
        if let Some((k, v)) = item.trim().split_once('=') {
            if k.trim() == cookie_name {
                return Some(v.trim());
            }
        }
    }
    log::trace!("Cookie '{cookie_name}' not found within Cookie header");
    None
}

/// Build a `Set-Cookie` style string.
pub fn build_set_cookie(name: &str, value: &str, attrs: &CookieAttributes) -> String {
    let mut cookie = format!("{name}={value}; Path={}", attrs.path);
    if let Some(max_age) = attrs.max_age {
        let _ = write!(cookie, "; Max-Age={}", max_age.max(0));
        if max_age <= 0 {
            let _ = write!(cookie, "; Expires={EPOCH_EXPIRES}");
        }
    }
    if let Some(domain) = &attrs.domain {
        let _ = write!(cookie, "; Domain={domain}");
    }
    let _ = write!(cookie, "; SameSite={}", attrs.same_site.as_str());
    if attrs.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` string that removes `name` under the given path/domain.
pub fn build_expired_cookie(name: &str, path: &str, domain: Option<&str>) -> String {
    let mut cookie = format!("{name}=; Path={path}; Max-Age=0; Expires={EPOCH_EXPIRES}");
    if let Some(domain) = domain {
        let _ = write!(cookie, "; Domain={domain}");
    }
    cookie
}

/// Parsed form of a `Set-Cookie` string, as far as cookie jars need it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub path: Option<String>,
}

impl SetCookie {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.trim().split_once('=')?;
        if name.trim().is_empty() {
            return None;
        }
        let mut cookie = SetCookie {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            max_age: None,
            path: None,
        };
        for attr in parts {
            let (k, v) = attr.trim().split_once('=').unwrap_or((attr.trim(), ""));
            if k.eq_ignore_ascii_case("max-age") {
                cookie.max_age = v.trim().parse().ok();
            } else if k.eq_ignore_ascii_case("path") {
                cookie.path = Some(v.trim().to_string());
            } else if k.eq_ignore_ascii_case("expires") && v.contains("1970") {
                cookie.max_age.get_or_insert(0);
            }
        }
        Some(cookie)
    }

    pub fn is_removal(&self) -> bool {
        matches!(self.max_age, Some(age) if age <= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cookie_value() {
        let header = "theme=dark; authToken=abc.def.ghi; pad=a=b==";
        assert_eq!(get_cookie_value(header, "authToken"), Some("abc.def.ghi"));
        assert_eq!(get_cookie_value(header, "pad"), Some("a=b=="));
        assert_eq!(get_cookie_value(header, "missing"), None);
        assert_eq!(get_cookie_value("", "authToken"), None);
    }

    #[test]
    fn test_build_set_cookie() {
        let attrs = CookieAttributes {
            path: "/".into(),
            domain: Some("example.com".into()),
            same_site: SameSite::Strict,
            secure: true,
            max_age: Some(3600),
        };
        assert_eq!(
            build_set_cookie("authToken", "t", &attrs),
            "authToken=t; Path=/; Max-Age=3600; Domain=example.com; SameSite=Strict; Secure"
        );
    }

    #[test]
    fn test_expired_cookie_round_trip() {
        let raw = build_expired_cookie("jwt", "/", None);
        let parsed = SetCookie::parse(&raw).unwrap();
        assert_eq!(parsed.name, "jwt");
        assert!(parsed.is_removal());
    }

    #[test]
    fn test_parse_plain_cookie() {
        let parsed = SetCookie::parse("token=x; Path=/app; SameSite=Lax").unwrap();
        assert_eq!(parsed.value, "x");
        assert_eq!(parsed.path.as_deref(), Some("/app"));
        assert!(!parsed.is_removal());
        assert!(SetCookie::parse("garbage").is_none());
    }
}
