//! Replay verification of persisted explain logs.
//!
//! Loads a log written by [`crate::explain::ExplainLog::persist`],
//! recomputes the canonical hash from the entries, and summarizes the
//! run: distinct seeds in first-seen order plus retrieval-stage events.
//! A stored hash that does not match the recomputed one is fatal unless
//! verification is explicitly relaxed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::EngineError;
use crate::explain::{replay_hash, ExplainEntry, LAST_LOG_NAME};

pub const RETRIEVAL_STAGE: &str = "retrieval";

#[derive(Debug, Deserialize)]
struct PersistedLog {
    #[serde(default)]
    schema_version: u32,
    flow_name: String,
    #[serde(default)]
    entry_count: usize,
    #[serde(default)]
    replay_hash: Option<String>,
    entries: Vec<ExplainEntry>,
}

/// One retrieval event surfaced in the replay summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalEvent {
    pub event_index: u64,
    pub modality: String,
    pub selected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub flow_name: String,
    pub schema_version: u32,
    pub entry_count: usize,
    pub stored_hash: Option<String>,
    pub computed_hash: String,
    pub hash_verified: bool,
    pub seeds: Vec<String>,
    pub retrieval_events: Vec<RetrievalEvent>,
}

/// Load and summarize a persisted log. With `verify` set, a stored hash
/// that disagrees with the recomputed one is an error; without it the
/// summary still reports `hash_verified: false`.
pub fn replay(log_path: &Path, verify: bool) -> Result<ReplaySummary, EngineError> {
    if !log_path.exists() {
        return Err(EngineError::ReplayLogMissing {
            path: log_path.display().to_string(),
        });
    }
    let raw = std::fs::read_to_string(log_path)?;
    let log: PersistedLog =
        serde_json::from_str(&raw).map_err(|e| EngineError::ReplayLogInvalid {
            details: e.to_string(),
        })?;

    let computed_hash = replay_hash(&log.entries);
    let hash_verified = log
        .replay_hash
        .as_deref()
        .map(|stored| stored == computed_hash)
        .unwrap_or(false);
    if verify && log.replay_hash.is_some() && !hash_verified {
        return Err(EngineError::ReplayHashMismatch);
    }

    Ok(ReplaySummary {
        flow_name: log.flow_name,
        schema_version: log.schema_version,
        entry_count: if log.entry_count > 0 {
            log.entry_count
        } else {
            log.entries.len()
        },
        stored_hash: log.replay_hash,
        computed_hash,
        hash_verified,
        seeds: distinct_seeds(&log.entries),
        retrieval_events: retrieval_events(&log.entries),
    })
}

/// Locate the default log for a project: `<explain_dir>/last_explain.json`.
pub fn default_log_path(explain_dir: &Path) -> std::path::PathBuf {
    explain_dir.join(LAST_LOG_NAME)
}

/// Seeds in first-seen order, deduplicated.
fn distinct_seeds(entries: &[ExplainEntry]) -> Vec<String> {
    let mut seeds = Vec::new();
    for entry in entries {
        if let Some(seed) = &entry.seed {
            if !seeds.iter().any(|s| s == seed) {
                seeds.push(seed.clone());
            }
        }
    }
    seeds
}

fn retrieval_events(entries: &[ExplainEntry]) -> Vec<RetrievalEvent> {
    entries
        .iter()
        .filter(|entry| entry.stage == RETRIEVAL_STAGE)
        .map(|entry| RetrievalEvent {
            event_index: entry.event_index,
            modality: entry.metadata["modality"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            selected: entry.metadata["selected"].as_u64().unwrap_or(0),
        })
        .collect()
}

impl ReplaySummary {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
