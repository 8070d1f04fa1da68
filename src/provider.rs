//! AI provider boundary.
//!
//! Providers are resolved by name from the AI profile and cached for the
//! lifetime of the engine. The built-in mock provider is fully
//! deterministic: the same request always produces the same response,
//! which keeps explain logs replay-stable without a live backend.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct AiRequest {
    pub profile: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub input: String,
    pub seed: String,
    /// Tools the profile exposes to the model.
    pub allowed_tools: Vec<String>,
    /// Results of tool calls already made in this agentic exchange.
    pub tool_results: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AiResponse {
    /// Final answer text.
    Text(String),
    /// The model wants a tool run before it can answer.
    ToolCall { tool: String, args: Value },
}

pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &AiRequest) -> Result<AiResponse, EngineError>;
}

/// Deterministic offline provider. Requests a tool call when the input
/// names an allowed tool and no result for it has arrived yet, otherwise
/// answers with a stable function of model, seed, and input.
pub struct MockProvider;

impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: &AiRequest) -> Result<AiResponse, EngineError> {
        for tool in &request.allowed_tools {
            let already_ran = request.tool_results.iter().any(|(name, _)| name == tool);
            if !already_ran && request.input.contains(tool.as_str()) {
                return Ok(AiResponse::ToolCall {
                    tool: tool.clone(),
                    args: Value::Object(serde_json::Map::new()),
                });
            }
        }

        let mut answer = format!("[{}] {}", request.model, request.input.trim());
        for (tool, result) in &request.tool_results {
            answer.push_str(&format!(" (with {tool}: {result})"));
        }
        Ok(AiResponse::Text(answer))
    }
}

/// Name-keyed provider cache. Lookup is lock-free; the first request for
/// a name constructs the provider, later requests share it.
pub struct ProviderCache {
    providers: DashMap<String, Arc<dyn AiProvider>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AiProvider>, EngineError> {
        if let Some(provider) = self.providers.get(name) {
            return Ok(Arc::clone(&provider));
        }
        let provider = build_provider(name)?;
        debug!(provider = name, "provider constructed");
        self.providers
            .insert(name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

fn build_provider(name: &str) -> Result<Arc<dyn AiProvider>, EngineError> {
    match name {
        "mock" => Ok(Arc::new(MockProvider)),
        other => Err(EngineError::Provider {
            provider: other.to_string(),
            message: "no such provider is registered".to_string(),
        }),
    }
}
