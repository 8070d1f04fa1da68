//! Per-run mutable state.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::explain::ExplainLog;
use crate::ir::Program;
use crate::memory::MemoryStore;
use crate::provider::ProviderCache;
use crate::sandbox::WorkerProcess;
use crate::security::SecurityContext;
use crate::store::RecordStore;

pub const ALLOWED_THEMES: &[&str] = &["light", "dark", "system"];

/// One step in the human-readable run trace. Coarser than the explain
/// log: this is what a run result shows, not what replay verifies.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceStep {
    pub kind: String,
    pub name: String,
    pub detail: Value,
}

/// A scope stack parked while a function body runs in isolation.
pub struct SavedScopes {
    values: Vec<HashMap<String, Value>>,
    constants: Vec<HashSet<String>>,
}

/// Everything a single run mutates: a scope stack of locals, the shared
/// state tree, parked async results, the record store, and the sinks.
/// Owned by one logical thread for the whole run.
pub struct ExecutionContext {
    pub program: Arc<Program>,
    pub config: AppConfig,
    pub project_root: PathBuf,
    scopes: Vec<HashMap<String, Value>>,
    /// Constant names, one set per scope frame, popped with the frame.
    constant_marks: Vec<HashSet<String>>,
    pub state: Map<String, Value>,
    pub async_tasks: HashMap<String, Value>,
    pub store: RecordStore,
    pub memory: MemoryStore,
    pub providers: ProviderCache,
    pub explain: ExplainLog,
    pub security: SecurityContext,
    pub worker: Box<dyn WorkerProcess>,
    pub traces: Vec<TraceStep>,
    pub theme: String,
    pub depth: usize,
    /// Set while a function body runs; functions may not touch state.
    pub in_function: bool,
    /// Set while a parallel task body runs; tasks may not touch state.
    pub in_parallel: bool,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program: Arc<Program>,
        config: AppConfig,
        project_root: PathBuf,
        store: RecordStore,
        memory: MemoryStore,
        providers: ProviderCache,
        explain: ExplainLog,
        security: SecurityContext,
        worker: Box<dyn WorkerProcess>,
    ) -> Self {
        let theme = config.theme.clone();
        Self {
            program,
            config,
            project_root,
            scopes: vec![HashMap::new()],
            constant_marks: vec![HashSet::new()],
            state: Map::new(),
            async_tasks: HashMap::new(),
            store,
            memory,
            providers,
            explain,
            security,
            worker,
            traces: Vec::new(),
            theme,
            depth: 0,
            in_function: false,
            in_parallel: false,
        }
    }

    pub fn trace(&mut self, kind: &str, name: &str, detail: Value) {
        self.traces.push(TraceStep {
            kind: kind.to_string(),
            name: name.to_string(),
            detail: self.security.redact(&detail),
        });
    }

    // ── locals ──────────────────────────────────────────────────────

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.constant_marks.push(HashSet::new());
    }

    pub fn pop_scope(&mut self) -> HashMap<String, Value> {
        if self.scopes.len() > 1 {
            self.constant_marks.pop();
            self.scopes.pop().unwrap_or_default()
        } else {
            HashMap::new()
        }
    }

    /// Swap in a fresh, isolated scope stack (used by function calls,
    /// which see only their arguments). Returns the previous stack.
    pub fn replace_scopes(&mut self, fresh: HashMap<String, Value>) -> SavedScopes {
        SavedScopes {
            values: std::mem::replace(&mut self.scopes, vec![fresh]),
            constants: std::mem::replace(&mut self.constant_marks, vec![HashSet::new()]),
        }
    }

    pub fn restore_scopes(&mut self, saved: SavedScopes) {
        self.scopes = saved.values;
        self.constant_marks = saved.constants;
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn declare(&mut self, name: &str, value: Value, constant: bool) -> Result<(), EngineError> {
        if self
            .constant_marks
            .last()
            .is_some_and(|marks| marks.contains(name))
        {
            return Err(EngineError::ConstantReassigned {
                name: name.to_string(),
            });
        }
        if constant {
            if let Some(marks) = self.constant_marks.last_mut() {
                marks.insert(name.to_string());
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Assign to an existing local wherever it lives, or create it in
    /// the current scope. The innermost binding wins, and its frame
    /// decides constness.
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        for (index, scope) in self.scopes.iter_mut().enumerate().rev() {
            if let Some(slot) = scope.get_mut(name) {
                if self.constant_marks[index].contains(name) {
                    return Err(EngineError::ConstantReassigned {
                        name: name.to_string(),
                    });
                }
                *slot = value;
                return Ok(());
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
        Ok(())
    }

    // ── state tree ──────────────────────────────────────────────────

    pub fn state_read(&self, path: &[String]) -> Option<Value> {
        let mut current = Value::Object(self.state.clone());
        for segment in path {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }

    pub fn state_write(&mut self, path: &[String], value: Value) -> Result<(), EngineError> {
        let (first, rest) = match path.split_first() {
            Some(parts) => parts,
            None => {
                return Err(EngineError::Execution("empty state path".to_string()));
            }
        };
        if rest.is_empty() {
            self.state.insert(first.clone(), value);
            return Ok(());
        }
        let slot = self
            .state
            .entry(first.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        write_nested(slot, rest, value);
        Ok(())
    }

    // ── depth guard ─────────────────────────────────────────────────

    pub fn enter(&mut self) -> Result<(), EngineError> {
        self.depth += 1;
        if self.depth > self.config.max_depth {
            return Err(EngineError::DepthExceeded {
                limit: self.config.max_depth as u32,
            });
        }
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

fn write_nested(slot: &mut Value, path: &[String], value: Value) {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
        match path.split_first() {
            Some((first, [])) => {
                map.insert(first.clone(), value);
            }
            Some((first, rest)) => {
                let next = map
                    .entry(first.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                write_nested(next, rest, value);
            }
            None => {}
        }
    }
}
