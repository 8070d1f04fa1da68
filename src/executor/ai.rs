//! The AI call sequence.
//!
//! resolve profile → format input → recall memory → seed → call the
//! provider → agentic tool loop → record memory → normalize → return.
//! Failures on the memory side surface as memory errors and provider
//! failures as provider errors, so the cause is never ambiguous.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::call_tool;
use super::context::ExecutionContext;
use crate::error::EngineError;
use crate::explain::EventDraft;
use crate::ir::AiProfile;
use crate::provider::{AiRequest, AiResponse};

/// Ceiling on provider→tool→provider rounds in one call.
const MAX_TOOL_ROUNDS: usize = 4;

pub fn ask_ai(
    ctx: &mut ExecutionContext,
    profile_name: &str,
    input: &Value,
) -> Result<String, EngineError> {
    let program = std::sync::Arc::clone(&ctx.program);
    let profile = program
        .ai_profile(profile_name)
        .ok_or_else(|| EngineError::UnknownAiProfile {
            name: profile_name.to_string(),
        })?
        .clone();

    let formatted = format_input(&profile, input);
    let recalled = if profile.memory {
        let items = ctx.memory.recall(&profile.name, &formatted)?;
        ctx.explain.append(
            EventDraft::new("retrieval", "memory_recall")
                .inputs(json!({"input": formatted}))
                .outputs(json!(items))
                .metadata(json!({
                    "modality": "conversation",
                    "selected": items.len(),
                    "profile": profile.name,
                })),
        );
        items
    } else {
        Vec::new()
    };

    let seed = derive_seed(&profile, &formatted);
    let mut request = AiRequest {
        profile: profile.name.clone(),
        model: profile.model.clone(),
        system_prompt: profile.system_prompt.clone(),
        input: contextualize(&formatted, &recalled),
        seed: seed.clone(),
        allowed_tools: profile.tools.clone(),
        tool_results: Vec::new(),
    };

    let provider = ctx.providers.get(&profile.provider)?;
    let mut answer = None;
    for round in 0..=MAX_TOOL_ROUNDS {
        match provider.complete(&request)? {
            AiResponse::Text(text) => {
                answer = Some(text);
                break;
            }
            AiResponse::ToolCall { tool, args } => {
                if round == MAX_TOOL_ROUNDS {
                    return Err(EngineError::Provider {
                        provider: profile.provider.clone(),
                        message: format!(
                            "tool loop exceeded {MAX_TOOL_ROUNDS} rounds without an answer"
                        ),
                    });
                }
                debug!(tool = %tool, round, "model requested a tool");
                let result = call_tool(ctx, &tool, args)?;
                ctx.explain.append(
                    EventDraft::new("ai_tool", "tool_result")
                        .outputs(json!({"tool": tool, "output": result}))
                        .metadata(json!({"profile": profile.name, "round": round})),
                );
                request.tool_results.push((tool, result));
            }
        }
    }
    let answer = answer.ok_or_else(|| EngineError::Provider {
        provider: profile.provider.clone(),
        message: "provider produced no final answer".to_string(),
    })?;

    let normalized = answer.trim().to_string();
    if profile.memory {
        ctx.memory.record(&profile.name, &formatted, &normalized)?;
    }

    ctx.explain.append(
        EventDraft::new("ai_call", "ai_response")
            .inputs(json!({"input": formatted}))
            .outputs(json!({"output": normalized}))
            .seed(seed)
            .provider_model(profile.provider.clone(), profile.model.clone())
            .parameters(json!({"input_mode": profile.input_mode, "tools": profile.tools})),
    );
    ctx.trace("ask_ai", &profile.name, json!({"input": input.clone()}));

    Ok(normalized)
}

/// Text mode passes strings through and stringifies the rest;
/// structured mode always sends canonical JSON.
fn format_input(profile: &AiProfile, input: &Value) -> String {
    match profile.input_mode.as_str() {
        "structured" => input.to_string(),
        _ => match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

fn contextualize(input: &str, recalled: &[crate::memory::MemoryItem]) -> String {
    if recalled.is_empty() {
        return input.to_string();
    }
    let mut prompt = String::from("Relevant history:\n");
    for item in recalled {
        prompt.push_str(&format!("- {} => {}\n", item.input, item.output));
    }
    prompt.push('\n');
    prompt.push_str(input);
    prompt
}

/// Deterministic per-call seed: a stable function of profile, model, and
/// formatted input, so identical runs log identical seeds.
fn derive_seed(profile: &AiProfile, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile.name.as_bytes());
    hasher.update(b"|");
    hasher.update(profile.model.as_bytes());
    hasher.update(b"|");
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}
