//! Flow execution.
//!
//! [`Engine`] owns a loaded program and runs flows against it. Every run
//! gets a fresh [`ExecutionContext`]; the static concurrency check runs
//! first, the record store wraps the run in a transaction, and the
//! explain log captures each step for later replay verification.

pub mod ai;
pub mod context;
pub mod expr;
pub mod stmt;

pub use context::{ExecutionContext, TraceStep};

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::binding;
use crate::capability;
use crate::concurrency;
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::explain::{EventDraft, ExplainLog};
use crate::ir::Program;
use crate::memory::{memory_dir, MemoryStore};
use crate::provider::ProviderCache;
use crate::sandbox::{SubprocessWorker, WorkerProcess};
use crate::schema::{self, Phase};
use crate::security::SecurityContext;
use crate::store::{storage_for, RecordStore};
use self::stmt::Control;

/// What a completed run hands back to the caller.
#[derive(Debug)]
pub struct RunResult {
    pub value: Value,
    pub state: Value,
    pub traces: Vec<TraceStep>,
    pub replay_hash: String,
    pub explain_path: Option<PathBuf>,
}

pub struct Engine {
    program: Arc<Program>,
    config: AppConfig,
    project_root: PathBuf,
}

impl Engine {
    pub fn new(program: Program, config: AppConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            program: Arc::new(program),
            config,
            project_root: project_root.into(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run one flow with the default subprocess worker.
    pub fn run_flow(
        &self,
        flow_name: &str,
        input: Value,
        persist_explain: bool,
    ) -> Result<RunResult, EngineError> {
        let worker = SubprocessWorker::new(
            self.project_root.clone(),
            self.project_root.join(&self.config.runners_dir),
        );
        self.run_flow_with_worker(flow_name, input, persist_explain, Box::new(worker))
    }

    /// Run one flow with a caller-supplied worker (the seam tests use).
    pub fn run_flow_with_worker(
        &self,
        flow_name: &str,
        input: Value,
        persist_explain: bool,
        worker: Box<dyn WorkerProcess>,
    ) -> Result<RunResult, EngineError> {
        let flow = self
            .program
            .flow(flow_name)
            .ok_or_else(|| EngineError::UnknownFlow {
                name: flow_name.to_string(),
            })?;

        // Contract violations are flagged before execution, never at
        // runtime.
        let violations = concurrency::check_flow(flow);
        if let Some(first) = violations.first() {
            return Err(EngineError::Execution(format!(
                "flow '{}' line {}: {} ({} finding{})",
                first.flow_name,
                first.line,
                first.reason,
                violations.len(),
                if violations.len() == 1 { "" } else { "s" }
            )));
        }

        let security = SecurityContext::new(true, &self.config.redact_keys);
        let store = RecordStore::open(storage_for(
            &self.project_root,
            &self.config.storage_path,
        ))?;
        let mut ctx = ExecutionContext::new(
            Arc::clone(&self.program),
            self.config.clone(),
            self.project_root.clone(),
            store,
            MemoryStore::new(memory_dir(&self.project_root)),
            ProviderCache::new(),
            ExplainLog::new(flow_name, security.clone()),
            security,
            worker,
        );

        info!(flow = flow_name, "flow started");
        ctx.declare("input", input.clone(), false)?;
        ctx.store.begin();
        ctx.explain.append(
            EventDraft::new("flow", "flow_started").inputs(json!({"input": input})),
        );

        let outcome = stmt::exec_block(&mut ctx, &flow.body);
        match outcome {
            Ok(control) => {
                let value = match control {
                    Control::Return(value) => value,
                    Control::Continue => Value::Null,
                };
                ctx.store.commit()?;
                ctx.explain.append(
                    EventDraft::new("flow", "flow_completed")
                        .outputs(json!({"output": value.clone()})),
                );
                let replay_hash = ctx.explain.replay_hash();
                let explain_path = if persist_explain {
                    Some(
                        ctx.explain
                            .persist(&self.project_root.join(&self.config.explain_dir))?,
                    )
                } else {
                    None
                };
                info!(flow = flow_name, "flow completed");
                Ok(RunResult {
                    value,
                    state: Value::Object(ctx.state),
                    traces: ctx.traces,
                    replay_hash,
                    explain_path,
                })
            }
            Err(error) => {
                ctx.store.rollback();
                ctx.explain.append(
                    EventDraft::new("flow", "flow_failed").metadata(json!({
                        "category": error.category().to_string(),
                        "boundary": error.boundary().to_string(),
                        "message": error.to_string(),
                    })),
                );
                if persist_explain {
                    let _ = ctx
                        .explain
                        .persist(&self.project_root.join(&self.config.explain_dir));
                }
                Err(error)
            }
        }
    }
}

/// The full tool path: gate → binding → input schema → worker → output
/// schema. A decision is produced (and logged) before any tool body runs.
pub fn call_tool(
    ctx: &mut ExecutionContext,
    tool_name: &str,
    payload: Value,
) -> Result<Value, EngineError> {
    let program = Arc::clone(&ctx.program);
    let decl = program
        .tool(tool_name)
        .ok_or_else(|| EngineError::UnknownTool {
            tool: tool_name.to_string(),
        })?;

    let decision = capability::evaluate(decl, &ctx.config.capabilities);
    ctx.explain.append(
        EventDraft::new("tool_gate", "tool_decision")
            .inputs(json!({"tool": tool_name}))
            .outputs(json!(decision))
            .metadata(json!({"kind": decl.kind.to_string()})),
    );
    if !decision.is_allowed() {
        let capability = decision.capability.clone().unwrap_or_default();
        debug!(tool = tool_name, %capability, "tool blocked");
        ctx.trace("tool_blocked", tool_name, json!(decision));
        return Err(EngineError::CapabilityDenied {
            tool: tool_name.to_string(),
            capability,
        });
    }

    // Re-resolved on every call so live config and pack edits apply.
    let binding = match binding::resolve(tool_name, &ctx.config, &ctx.project_root) {
        Ok(binding) => binding,
        Err(error) => {
            if let EngineError::PolicyDenied { tool, reason } = &error {
                let denied = capability::ToolDecision::policy_denied(tool, reason);
                ctx.explain.append(
                    EventDraft::new("tool_gate", "policy_denied").outputs(json!(denied)),
                );
                ctx.trace("tool_blocked", tool_name, json!(denied));
            }
            return Err(error);
        }
    };

    schema::validate_payload(tool_name, Phase::Input, &decl.input_fields, &payload)?;
    let result = ctx.worker.run(&binding, &payload)?;
    schema::validate_payload(tool_name, Phase::Output, &decl.output_fields, &result)?;

    ctx.explain.append(
        EventDraft::new("tool_call", "tool_completed")
            .inputs(json!({"tool": tool_name, "payload": payload}))
            .outputs(json!({"output": result.clone()}))
            .metadata(json!({"runner": binding.runner.to_string(), "entry": binding.entry})),
    );
    ctx.trace("tool_call", tool_name, json!({"payload": payload}));
    Ok(result)
}

/// Functions are pure: they see only their arguments and may not touch
/// state or records. Enforced here at runtime on top of the static pass.
pub fn call_function(
    ctx: &mut ExecutionContext,
    function_name: &str,
    args: Value,
) -> Result<Value, EngineError> {
    let program = Arc::clone(&ctx.program);
    let decl = program
        .function(function_name)
        .ok_or_else(|| EngineError::UnknownFunction {
            name: function_name.to_string(),
        })?;

    let mut frame = HashMap::new();
    let args_map = args.as_object().cloned().unwrap_or_else(Map::new);
    for param in &decl.params {
        frame.insert(
            param.clone(),
            args_map.get(param).cloned().unwrap_or(Value::Null),
        );
    }

    ctx.enter()?;
    let saved_scopes = ctx.replace_scopes(frame);
    let was_function = ctx.in_function;
    ctx.in_function = true;
    let outcome = stmt::exec_block(ctx, &decl.body);
    ctx.in_function = was_function;
    ctx.restore_scopes(saved_scopes);
    ctx.leave();

    match outcome? {
        Control::Return(value) => Ok(value),
        Control::Continue => Ok(Value::Null),
    }
}

/// A flow called as an expression shares state with its caller but gets
/// a fresh scope seeded with `input`.
pub fn call_flow(
    ctx: &mut ExecutionContext,
    flow_name: &str,
    args: Value,
) -> Result<Value, EngineError> {
    let program = Arc::clone(&ctx.program);
    let flow = program
        .flow(flow_name)
        .ok_or_else(|| EngineError::UnknownFlow {
            name: flow_name.to_string(),
        })?;

    ctx.enter()?;
    ctx.push_scope();
    let declared = ctx.declare("input", args, false);
    let outcome = declared.and_then(|_| stmt::exec_block(ctx, &flow.body));
    ctx.pop_scope();
    ctx.leave();

    match outcome? {
        Control::Return(value) => Ok(value),
        Control::Continue => Ok(Value::Null),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::{
        AiProfile, Expression, Flow, FunctionDecl, Pos, Statement, ToolDecl, ToolField, ToolKind,
    };
    use crate::store::NullStorage;
    use std::collections::BTreeMap;

    /// Worker that answers from a fixed table instead of spawning.
    pub struct TableWorker {
        pub responses: HashMap<String, Value>,
    }

    impl WorkerProcess for TableWorker {
        fn run(
            &self,
            binding: &crate::binding::ToolBinding,
            _payload: &Value,
        ) -> Result<Value, EngineError> {
            self.responses
                .get(&binding.tool)
                .cloned()
                .ok_or_else(|| EngineError::ToolProcess {
                    tool: binding.tool.clone(),
                    message: "no scripted response".to_string(),
                })
        }
    }

    pub fn test_program() -> Program {
        Program {
            name: "test".into(),
            flows: vec![],
            tools: vec![ToolDecl {
                name: "echo".into(),
                kind: ToolKind::Python,
                operation: None,
                capabilities: vec![],
                purity: None,
                input_fields: vec![ToolField {
                    name: "text".into(),
                    type_name: "text".into(),
                    required: true,
                }],
                output_fields: vec![],
            }],
            functions: vec![FunctionDecl {
                name: "double".into(),
                params: vec!["n".into()],
                body: vec![Statement::Return {
                    expression: Expression::Binary {
                        op: crate::ir::BinaryOp::Mul,
                        left: Box::new(Expression::Ref { name: "n".into() }),
                        right: Box::new(Expression::Literal { value: json!(2) }),
                    },
                    pos: Pos::default(),
                }],
            }],
            ai_profiles: vec![AiProfile {
                name: "writer".into(),
                provider: "mock".into(),
                model: "mock-small".into(),
                system_prompt: None,
                input_mode: "text".into(),
                tools: vec![],
                memory: false,
            }],
        }
    }

    pub fn test_context() -> ExecutionContext {
        test_context_with(test_program())
    }

    pub fn test_context_with(program: Program) -> ExecutionContext {
        let dir = std::env::temp_dir().join("lumen-exec-tests");
        let security = SecurityContext::disabled();
        ExecutionContext::new(
            Arc::new(program),
            AppConfig::default(),
            dir.clone(),
            RecordStore::open(Box::new(NullStorage)).unwrap(),
            MemoryStore::new(dir.join("memory")),
            ProviderCache::new(),
            ExplainLog::new("test", security.clone()),
            security,
            Box::new(TableWorker {
                responses: HashMap::new(),
            }),
        )
    }

    #[test]
    fn function_calls_are_isolated_and_pure() {
        let mut ctx = test_context();
        ctx.declare("outer", json!(1), false).unwrap();
        let result =
            call_function(&mut ctx, "double", json!({"n": 21})).unwrap();
        assert_eq!(result, json!(42));
        // The function frame is gone; outer locals are untouched.
        assert_eq!(ctx.lookup("outer"), Some(&json!(1)));
        assert_eq!(ctx.lookup("n"), None);
    }

    #[test]
    fn function_state_write_is_rejected() {
        let mut program = test_program();
        program.functions.push(FunctionDecl {
            name: "impure".into(),
            params: vec![],
            body: vec![Statement::Set {
                target: crate::ir::AssignTarget::StatePath {
                    path: vec!["x".into()],
                },
                expression: Expression::Literal { value: json!(1) },
                pos: Pos { line: 4, column: 3 },
            }],
        });
        let mut ctx = test_context_with(program);
        let err = call_function(&mut ctx, "impure", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::FunctionStateWrite { .. }));
    }

    #[test]
    fn blocked_tool_produces_a_capability_error() {
        let mut program = test_program();
        program.tools.push(ToolDecl {
            name: "fetch_page".into(),
            kind: ToolKind::Network,
            operation: None,
            capabilities: vec![],
            purity: None,
            input_fields: vec![],
            output_fields: vec![],
        });
        let mut ctx = test_context_with(program);
        let err = call_tool(&mut ctx, "fetch_page", json!({})).unwrap_err();
        match err {
            EngineError::CapabilityDenied { capability, .. } => {
                assert_eq!(capability, "network");
            }
            other => panic!("expected capability denial, got {other}"),
        }
        // The gate decision was logged before anything ran.
        assert_eq!(ctx.explain.entries()[0].stage, "tool_gate");
    }

    #[test]
    fn unknown_tool_never_reaches_the_gate() {
        let mut ctx = test_context();
        let err = call_tool(&mut ctx, "ghost", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTool { .. }));
        assert!(ctx.explain.is_empty());
    }

    #[test]
    fn flow_depth_is_bounded() {
        let mut program = test_program();
        program.flows.push(Flow {
            name: "loop".into(),
            body: vec![Statement::Return {
                expression: Expression::FlowCall {
                    flow: "loop".into(),
                    args: BTreeMap::new(),
                },
                pos: Pos::default(),
            }],
            line: 1,
            column: 1,
        });
        let mut ctx = test_context_with(program);
        ctx.config.max_depth = 8;
        let err = call_flow(&mut ctx, "loop", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::DepthExceeded { .. }));
    }
}
