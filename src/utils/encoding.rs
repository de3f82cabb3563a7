use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::core::{RouterError, RouterResult};

/// Characters escaped by URI component encoding; everything except
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Strict URI component decoding.
///
/// A `%` not followed by two hex digits, or a decoded byte sequence that is
/// not UTF-8, is an error rather than being passed through.
pub fn decode_component(value: &str) -> RouterResult<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let well_formed = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !well_formed {
                return Err(RouterError::Validation(format!(
                    "Malformed percent escape in '{value}'"
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| RouterError::Validation(format!("Invalid UTF-8 in '{value}': {e}")))
}

/// `my-profile_page` -> `MyProfilePage`
pub fn to_pascal_case(value: &str) -> String {
    value
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `my-profile` -> `My Profile`
pub fn page_title(route: &str) -> String {
    let pascal = to_pascal_case(route);
    let mut title = String::with_capacity(pascal.len() + 4);
    for c in pascal.chars() {
        if c.is_uppercase() && !title.is_empty() {
            title.push(' ');
        }
        title.push(c);
    }
    title
}

pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(encode_component("it's-(ok)!~*._"), "it's-(ok)!~*._");
        assert_eq!(encode_component("한"), "%ED%95%9C");
    }

    #[test]
    fn test_decode_component() {
        assert_eq!(decode_component("a%20b").unwrap(), "a b");
        assert_eq!(decode_component("%ED%95%9C").unwrap(), "한");
        assert_eq!(decode_component("plus+stays").unwrap(), "plus+stays");
        assert!(decode_component("bad%zz").is_err());
        assert!(decode_component("trailing%2").is_err());
        assert!(decode_component("%FF").is_err());
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_pascal_case("home"), "Home");
        assert_eq!(to_pascal_case("user-profile"), "UserProfile");
        assert_eq!(to_pascal_case("ADMIN_panel list"), "AdminPanelList");
        assert_eq!(page_title("user-profile"), "User Profile");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b a="1">&'"#),
            "&lt;b a=&quot;1&quot;&gt;&amp;&#39;"
        );
    }
}
