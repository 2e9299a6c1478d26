//! PII scrubbing applied to every event payload before it is stored.

use regex::Regex;
use std::sync::OnceLock;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .unwrap_or_else(|e| panic!("static regex: {e}"))
    })
}

fn bearer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+")
            .unwrap_or_else(|e| panic!("static regex: {e}"))
    })
}

fn home_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(/Users/[^/\s]+|/home/[^/\s]+)")
            .unwrap_or_else(|e| panic!("static regex: {e}"))
    })
}

/// Scrub one string: home directories, emails, bearer tokens.
pub fn scrub_str(input: &str) -> String {
    let out = home_re().replace_all(input, "~");
    let out = email_re().replace_all(&out, "<email>");
    bearer_re().replace_all(&out, "Bearer <redacted>").into_owned()
}

/// Recursively scrub every string in a JSON value.
pub fn scrub_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(scrub_str(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(scrub_value).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), scrub_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_home_paths() {
        assert_eq!(
            scrub_str("/Users/alice/project/src/main.rs"),
            "~/project/src/main.rs"
        );
        assert_eq!(scrub_str("/home/bob/.config"), "~/.config");
    }

    #[test]
    fn test_scrub_emails() {
        assert_eq!(
            scrub_str("contact alice@example.com for access"),
            "contact <email> for access"
        );
    }

    #[test]
    fn test_scrub_bearer_tokens() {
        assert_eq!(
            scrub_str("Authorization: Bearer abc.def-123"),
            "Authorization: Bearer <redacted>"
        );
    }

    #[test]
    fn test_scrub_nested_value() {
        let value = serde_json::json!({
            "path": "/home/carol/runs",
            "nested": {"emails": ["x@y.io"]},
            "count": 3,
        });
        let scrubbed = scrub_value(&value);
        assert_eq!(scrubbed["path"], "~/runs");
        assert_eq!(scrubbed["nested"]["emails"][0], "<email>");
        assert_eq!(scrubbed["count"], 3);
    }

    #[test]
    fn test_clean_string_untouched() {
        assert_eq!(scrub_str("plain message"), "plain message");
    }
}
