//! The shared key-value bag of one workflow execution.
//!
//! [`WorkflowContext`] is a concurrent map seeded with the task text under
//! [`CTX_INPUT`]. Steps communicate exclusively through it. Template
//! resolution substitutes `{{key}}` placeholders in a single pass — values
//! containing `{{...}}` are not re-expanded, and untrusted template
//! construction is the caller's responsibility.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::usage::Usage;

/// Reserved key holding the task text.
pub const CTX_INPUT: &str = "input";

/// Reserved key accumulating usage from agent steps.
pub const CTX_USAGE: &str = "workflow.usage";

/// Reserved key carrying the resume payload into a re-run DAG.
pub const CTX_RESUME: &str = "workflow.resume";

/// Concurrent mapping from string keys to JSON values.
#[derive(Debug, Default)]
pub struct WorkflowContext {
    values: RwLock<HashMap<String, Value>>,
}

impl WorkflowContext {
    /// Create a context seeded with `input`.
    #[must_use]
    pub fn new(input: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(CTX_INPUT.to_owned(), Value::String(input.to_owned()));
        Self {
            values: RwLock::new(values),
        }
    }

    /// Reconstruct a context from a snapshot.
    #[must_use]
    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    /// Write a value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value);
        }
    }

    /// All keys currently present.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values
            .read()
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy out every value (used for suspension snapshots).
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values
            .read()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    /// Accumulate usage under [`CTX_USAGE`].
    pub fn add_usage(&self, usage: Usage) {
        if let Ok(mut values) = self.values.write() {
            let current: Usage = values
                .get(CTX_USAGE)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            if let Ok(total) = serde_json::to_value(current + usage) {
                values.insert(CTX_USAGE.to_owned(), total);
            }
        }
    }

    /// The usage accumulated so far.
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.get(CTX_USAGE)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Substitute `{{key}}` placeholders with stringified values.
    ///
    /// Single pass: substituted values are not re-scanned. Unknown keys are
    /// left in place. String values substitute without quotes; other values
    /// substitute as JSON.
    #[must_use]
    pub fn resolve(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_owned();
        }
        let Ok(values) = self.values.read() else {
            return template.to_owned();
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = after[..end].trim();
                    match values.get(key) {
                        Some(value) => out.push_str(&stringify(value)),
                        None => {
                            out.push_str("{{");
                            out.push_str(&after[..end]);
                            out.push_str("}}");
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Typed resolution: a sole-placeholder template yields the structured
    /// value itself; anything else resolves to a JSON string.
    #[must_use]
    pub fn resolve_json(&self, template: &str) -> Value {
        let trimmed = template.trim();
        if let Some(inner) = trimmed
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            if !inner.contains("{{") && !inner.contains("}}") {
                if let Some(value) = self.get(inner.trim()) {
                    return value;
                }
            }
        }
        Value::String(self.resolve(template))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
