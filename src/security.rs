//! Redaction policy, threaded explicitly through execution.
//!
//! No global state: each run builds one [`SecurityContext`] and passes it
//! wherever values may reach a trace or log, so concurrent runs hosted in
//! the same process can never contaminate each other's policy.

use serde_json::Value;
use std::collections::BTreeSet;

pub const REDACTED_MARKER: &str = "[redacted]";

/// Keys whose values are always replaced before persistence.
const SENSITIVE_KEYS: &[&str] = &[
    "input",
    "output",
    "content",
    "token",
    "transcript",
    "description",
    "text",
    "audio",
    "user_input",
];

#[derive(Debug, Clone)]
pub struct SecurityContext {
    enabled: bool,
    sensitive_keys: BTreeSet<String>,
}

impl SecurityContext {
    pub fn new(enabled: bool, extra_keys: &[String]) -> Self {
        let mut sensitive_keys: BTreeSet<String> =
            SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect();
        for key in extra_keys {
            sensitive_keys.insert(key.clone());
        }
        Self {
            enabled,
            sensitive_keys,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, &[])
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.contains(key)
    }

    /// Replace values under sensitive keys with the fixed marker,
    /// recursively, preserving key and nesting shape. A no-op when
    /// redaction is disabled.
    pub fn redact(&self, value: &Value) -> Value {
        if !self.enabled {
            return value.clone();
        }
        self.redact_inner(value)
    }

    fn redact_inner(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let redacted = map
                    .iter()
                    .map(|(key, inner)| {
                        let replacement = if self.is_sensitive(key) {
                            Value::String(REDACTED_MARKER.to_string())
                        } else {
                            self.redact_inner(inner)
                        };
                        (key.clone(), replacement)
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.redact_inner(item)).collect())
            }
            other => other.clone(),
        }
    }
}
