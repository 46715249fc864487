use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "passwd",
        "passphrase",
        "secret",
        "token",
        "credential",
        "credentials",
        "ciphertext",
        "encrypted_password",
        "encryption_key",
        "session_token",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"(?i)(ConvertTo-SecureString)\s+(?:"[^"]*"|'[^']*'|\S+)"#)
                .expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r#"(?i)\b(password|passwd|passphrase|secret|token|encryption[_-]?key)\b\s*([:=])\s*([^\s"'`]+)"#)
                .expect("inline redaction regex"),
            "$1$2***REDACTED***",
        ),
        (
            Regex::new(r"\b[0-9a-f]{24}:[0-9a-f]{32}:[0-9a-f]+\b").expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
    ]
});

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    if normalized.is_empty() {
        return false;
    }
    if SENSITIVE_KEYS.contains(normalized.as_str()) {
        return true;
    }
    normalized.contains("secret") || normalized.contains("password")
}

fn truncate_string(value: &str, max_length: usize) -> String {
    if max_length == usize::MAX || value.len() <= max_length {
        return value.to_string();
    }
    if max_length == 0 {
        return String::new();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

fn redact_inline_secrets(value: &str, extra: Option<&[String]>) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }

    if let Some(values) = extra {
        for raw in values {
            let needle = raw.trim();
            if needle.is_empty() {
                continue;
            }
            out = out.replace(needle, INLINE_REDACTION);
        }
    }

    out
}

pub fn redact_text(value: &str, max_string: usize, extra_secrets: Option<&[String]>) -> String {
    let redacted = redact_inline_secrets(value, extra_secrets);
    truncate_string(&redacted, max_string)
}

fn redact_map_values(value: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(map) = value.as_object() {
        for (key, _) in map.iter() {
            out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
        }
    }
    Value::Object(out)
}

pub fn redact_object(value: &Value, max_string: usize, extra_secrets: Option<&[String]>) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(text) => Value::String(redact_text(text, max_string, extra_secrets)),
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string, extra_secrets))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map.iter() {
                if normalize_key(key) == "env" && entry.is_object() {
                    out.insert(key.clone(), redact_map_values(entry));
                    continue;
                }
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(DEFAULT_REDACTION.to_string()));
                    continue;
                }
                out.insert(key.clone(), redact_object(entry, max_string, extra_secrets));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{redact_object, redact_text};
    use serde_json::Value;

    #[test]
    fn redact_object_masks_sensitive_keys() {
        let input = serde_json::json!({"host": "prod1", "password": "hunter2", "nested": {"secret": "x"}});
        let out = redact_object(&input, usize::MAX, None);
        assert_eq!(out["host"], Value::String("prod1".to_string()));
        assert_eq!(out["password"], Value::String("[REDACTED]".to_string()));
        assert_eq!(out["nested"]["secret"], Value::String("[REDACTED]".to_string()));
    }

    #[test]
    fn redact_object_redacts_env_map_values() {
        let input = serde_json::json!({"env": {"ENVGATE_REMOTE_USER": "ops", "FOO": "bar"}});
        let out = redact_object(&input, usize::MAX, None);
        assert_eq!(out["env"]["FOO"], Value::String("[REDACTED]".to_string()));
    }

    #[test]
    fn redact_text_masks_secure_string_literals() {
        let out = redact_text(
            r#"$p = ConvertTo-SecureString "s3cr3t" -AsPlainText -Force"#,
            usize::MAX,
            None,
        );
        assert!(!out.contains("s3cr3t"));
        assert!(out.contains("ConvertTo-SecureString ***REDACTED***"));
    }

    #[test]
    fn redact_text_masks_extra_secrets_of_any_length() {
        let extra = vec!["pw".to_string()];
        let out = redact_text("login failed for pw", usize::MAX, Some(&extra));
        assert_eq!(out, "login failed for ***REDACTED***");
    }
}
