//! Explainability log.
//!
//! Append-only record of a run. Every entry gets a strictly increasing
//! `event_index` and a logical timestamp derived purely from that index,
//! never from the wall clock, so identical-input runs serialize to
//! byte-identical entries. A canonical SHA-256 hash over the ordered
//! entries lets a later replay detect any alteration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EngineError;
use crate::security::SecurityContext;

pub const SCHEMA_VERSION: u32 = 1;
pub const LAST_LOG_NAME: &str = "last_explain.json";

/// Logical milliseconds between consecutive events.
const TICK_MS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainEntry {
    pub event_index: u64,
    pub timestamp: u64,
    pub stage: String,
    pub event_type: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub metadata: Value,
}

/// Builder for one entry; the log assigns index and timestamp on append.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub stage: String,
    pub event_type: String,
    pub inputs: Value,
    pub seed: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub parameters: Value,
    pub outputs: Value,
    pub metadata: Value,
}

impl EventDraft {
    pub fn new(stage: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            event_type: event_type.into(),
            inputs: Value::Null,
            parameters: Value::Null,
            outputs: Value::Null,
            metadata: Value::Null,
            ..Default::default()
        }
    }

    pub fn inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    pub fn provider_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-run, single-writer log. Redaction happens at append, before a
/// value can ever reach the persisted form.
#[derive(Debug)]
pub struct ExplainLog {
    flow_name: String,
    entries: Vec<ExplainEntry>,
    security: SecurityContext,
}

impl ExplainLog {
    pub fn new(flow_name: impl Into<String>, security: SecurityContext) -> Self {
        Self {
            flow_name: flow_name.into(),
            entries: Vec::new(),
            security,
        }
    }

    pub fn append(&mut self, draft: EventDraft) -> u64 {
        let event_index = self.entries.len() as u64;
        self.entries.push(ExplainEntry {
            event_index,
            timestamp: event_index * TICK_MS,
            stage: draft.stage,
            event_type: draft.event_type,
            inputs: self.security.redact(&draft.inputs),
            seed: draft.seed,
            provider: draft.provider,
            model: draft.model,
            parameters: self.security.redact(&draft.parameters),
            outputs: self.security.redact(&draft.outputs),
            metadata: self.security.redact(&draft.metadata),
        });
        event_index
    }

    pub fn entries(&self) -> &[ExplainEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn replay_hash(&self) -> String {
        replay_hash(&self.entries)
    }

    /// Write the log to `<explain_dir>/last_explain.json` and a
    /// flow-named sibling. Returns the flow-named path.
    pub fn persist(&self, explain_dir: &Path) -> Result<PathBuf, EngineError> {
        std::fs::create_dir_all(explain_dir)?;
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "flow_name": self.flow_name,
            "entry_count": self.entries.len(),
            "generated_at": generated_at(),
            "replay_hash": self.replay_hash(),
            "entries": self.entries,
        });
        let rendered = serde_json::to_string_pretty(&payload)
            .map_err(|e| EngineError::Execution(format!("could not encode explain log: {e}")))?;
        let flow_path = explain_dir.join(format!("{}_explain.json", self.flow_name));
        std::fs::write(explain_dir.join(LAST_LOG_NAME), &rendered)?;
        std::fs::write(&flow_path, &rendered)?;
        debug!(flow = %self.flow_name, entries = self.entries.len(), "explain log persisted");
        Ok(flow_path)
    }
}

/// SHA-256 over the canonical JSON of the ordered entries. Canonical
/// form sorts every object's keys recursively, so the hash is stable
/// across serialization round trips.
pub fn replay_hash(entries: &[ExplainEntry]) -> String {
    let values: Vec<Value> = entries
        .iter()
        .map(|entry| canonicalize(&serde_json::to_value(entry).unwrap_or(Value::Null)))
        .collect();
    let canonical = serde_json::to_string(&Value::Array(values)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json::Map preserves insertion order; rebuild sorted.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Wall-clock stamp for the log envelope. Deliberately outside the
/// replay hash: it records when, not what.
fn generated_at() -> String {
    let seconds = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{seconds}")
}
