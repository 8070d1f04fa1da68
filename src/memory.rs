//! Per-profile conversation memory.
//!
//! Backed by one JSON file per AI profile under `.lumen/memory/`.
//! Recall is deterministic: entries are scored by shared-word overlap
//! with the query and returned in (score, insertion order) so the same
//! store and query always select the same items. Failures here are
//! tagged as memory errors so they are never mistaken for provider
//! faults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// How many recalled items feed an AI call.
const RECALL_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub index: u64,
    pub input: String,
    pub output: String,
}

pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn profile_path(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{profile}.json"))
    }

    fn load(&self, profile: &str) -> Result<Vec<MemoryItem>, EngineError> {
        let path = self.profile_path(profile);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| EngineError::Memory {
            message: format!("cannot read memory for '{profile}': {e}"),
        })?;
        serde_json::from_str(&raw).map_err(|e| EngineError::Memory {
            message: format!("memory for '{profile}' is corrupt: {e}"),
        })
    }

    /// The highest-overlap items for a query, at most [`RECALL_LIMIT`],
    /// in a stable order. Zero-overlap items are never recalled.
    pub fn recall(&self, profile: &str, query: &str) -> Result<Vec<MemoryItem>, EngineError> {
        let items = self.load(profile)?;
        let query_words = words(query);
        let mut scored: Vec<(usize, MemoryItem)> = items
            .into_iter()
            .filter_map(|item| {
                let overlap = words(&item.input)
                    .intersection(&query_words)
                    .count();
                (overlap > 0).then_some((overlap, item))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.index.cmp(&b.1.index)));
        Ok(scored
            .into_iter()
            .take(RECALL_LIMIT)
            .map(|(_, item)| item)
            .collect())
    }

    /// Append one interaction to the profile's memory.
    pub fn record(&self, profile: &str, input: &str, output: &str) -> Result<u64, EngineError> {
        let mut items = self.load(profile)?;
        let index = items.last().map(|item| item.index + 1).unwrap_or(0);
        items.push(MemoryItem {
            index,
            input: input.to_string(),
            output: output.to_string(),
        });
        std::fs::create_dir_all(&self.dir).map_err(|e| EngineError::Memory {
            message: format!("cannot create memory dir: {e}"),
        })?;
        let rendered = serde_json::to_string_pretty(&items).map_err(|e| EngineError::Memory {
            message: format!("cannot encode memory for '{profile}': {e}"),
        })?;
        std::fs::write(self.profile_path(profile), rendered).map_err(|e| {
            EngineError::Memory {
                message: format!("cannot write memory for '{profile}': {e}"),
            }
        })?;
        Ok(index)
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

pub fn memory_dir(project_root: &Path) -> PathBuf {
    project_root.join(".lumen").join("memory")
}
