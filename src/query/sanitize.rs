//! Pattern tables for the two filtering layers applied to parameter values.
//!
//! Detection rejects a value outright; sanitization strips a broader set of
//! markup, script, and SQL fragments from values that passed detection.

use once_cell::sync::Lazy;
use regex::Regex;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                log::error!("Invalid built-in pattern {p}: {e}");
                None
            }
        })
        .collect()
}

/// Markup and script fragments stripped from every value.
static MARKUP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?is)<script\b.*?</script\s*>",
        r"(?is)<iframe\b.*?</iframe\s*>",
        r"(?is)<object\b.*?</object\s*>",
        r"(?is)<embed\b.*?</embed\s*>",
        r"(?i)<link\b[^<]*>",
        r"(?i)<meta\b[^<]*>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)data:",
        r"(?i)on\w+\s*=",
        r"(?i)expression\s*\(",
        r"(?i)url\s*\(",
    ])
});

/// SQL keywords, operators, comments, and quoted fragments stripped after markup.
static SQL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(union|select|insert|update|delete|drop|create|alter|exec|execute|sp_|xp_)\b",
        r"(;|\||&|\*|%|<|>)",
        r"(--|/\*|\*/)",
        r"(?i)(\bor\b.*\b=\b|\band\b.*\b=\b)",
        r#"('.*'|".*")"#,
        r"(\\\w+)",
    ])
});

static SPECIAL_RUNS: Lazy<Vec<Regex>> = Lazy::new(|| compile(&[r#"[<>'"&]{2,}"#]));

/// Patterns that cause a value to be rejected.
static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)<script|<iframe|<object|<embed",
        r"(?i)javascript:|vbscript:|data:",
        r"(?i)union.*select|insert.*into|delete.*from",
        r"\.\./",
        r#"[<>'"&]{3,}"#,
    ])
});

/// Strip markup, script, and SQL fragments, then truncate to `max_len` characters.
pub fn sanitize(value: &str, max_len: usize) -> String {
    let mut sanitized = value.to_string();
    for pattern in MARKUP_PATTERNS
        .iter()
        .chain(SQL_PATTERNS.iter())
        .chain(SPECIAL_RUNS.iter())
    {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }

    if sanitized.chars().count() > max_len {
        sanitized = sanitized.chars().take(max_len).collect();
    }
    sanitized.trim().to_string()
}

/// First dangerous pattern matched by `value`, if any.
pub fn find_dangerous(value: &str) -> Option<&'static str> {
    DANGEROUS_PATTERNS
        .iter()
        .find(|p| p.is_match(value))
        .map(|p| p.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_blocks_removed() {
        let out = sanitize("hello<script>alert(1)</script>world", 1000);
        assert!(!out.contains("<script"));
        assert_eq!(out, "helloworld");

        let out = sanitize("<SCRIPT src=x>\nsteal()\n</SCRIPT>ok", 1000);
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_unterminated_script_is_neutralised() {
        let out = sanitize("<script>alert(1)", 1000);
        assert!(!out.contains("<script"));
    }

    #[test]
    fn test_schemes_and_handlers_removed() {
        assert_eq!(sanitize("javascript:run()", 1000), "run()");
        assert_eq!(sanitize("x onclick=go", 1000), "x go");
        assert_eq!(sanitize("url(evil)", 1000), "evil)");
    }

    #[test]
    fn test_sql_fragments_removed() {
        assert_eq!(sanitize("1 UNION SELECT pass", 1000), "1   pass");
        assert_eq!(sanitize("a;b|c", 1000), "abc");
        assert_eq!(sanitize("name -- comment", 1000), "name  comment");
        assert_eq!(sanitize("say 'hi' now", 1000), "say  now");
    }

    #[test]
    fn test_truncation_counts_chars() {
        let long = "한".repeat(20);
        assert_eq!(sanitize(&long, 5).chars().count(), 5);
    }

    #[test]
    fn test_plain_values_untouched() {
        assert_eq!(sanitize("settings", 1000), "settings");
        assert_eq!(sanitize("  spaced value ", 1000), "spaced value");
    }

    #[test]
    fn test_dangerous_detection() {
        assert!(find_dangerous("<iframe src=x>").is_some());
        assert!(find_dangerous("DATA:text/html").is_some());
        assert!(find_dangerous("union all select").is_some());
        assert!(find_dangerous("../../etc/passwd").is_some());
        assert!(find_dangerous("a<>'b").is_some());
        assert!(find_dangerous("profile").is_none());
        assert!(find_dangerous("a<b").is_none());
    }
}
