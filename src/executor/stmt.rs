//! Statement interpretation.
//!
//! Everything executes sequentially in lexical order; `parallel` blocks
//! run their tasks one after another against task-local scopes whose
//! writes merge back only after every task finished. Runtime guards for
//! parallel/function state writes back up the static checks for programs
//! that skipped them.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::context::{ExecutionContext, ALLOWED_THEMES};
use super::expr::{as_text, evaluate, is_truthy};
use crate::error::EngineError;
use crate::explain::EventDraft;
use crate::ir::{AssignTarget, Expression, Statement};

/// Flow of control after a statement.
pub enum Control {
    Continue,
    Return(Value),
}

pub fn exec_block(
    ctx: &mut ExecutionContext,
    statements: &[Statement],
) -> Result<Control, EngineError> {
    for statement in statements {
        match exec_statement(ctx, statement)? {
            Control::Continue => {}
            returned => return Ok(returned),
        }
    }
    Ok(Control::Continue)
}

fn exec_statement(
    ctx: &mut ExecutionContext,
    statement: &Statement,
) -> Result<Control, EngineError> {
    match statement {
        Statement::Let {
            name,
            constant,
            expression,
            ..
        } => {
            let value = evaluate(ctx, expression)?;
            if matches!(expression, Expression::AsyncCall { .. }) {
                // Eagerly computed, parked until the matching await.
                ctx.async_tasks.insert(name.clone(), value);
            } else {
                ctx.declare(name, value, *constant)?;
            }
            Ok(Control::Continue)
        }
        Statement::Set {
            target, expression, ..
        } => {
            let value = evaluate(ctx, expression)?;
            match target {
                AssignTarget::Local { name } => ctx.assign(name, value)?,
                AssignTarget::StatePath { path } => {
                    guard_state_write(ctx, statement)?;
                    ctx.state_write(path, value)?;
                }
            }
            Ok(Control::Continue)
        }
        Statement::If {
            condition,
            then_body,
            else_body,
            ..
        } => {
            let branch = if is_truthy(&evaluate(ctx, condition)?) {
                then_body
            } else {
                else_body
            };
            scoped_block(ctx, branch)
        }
        Statement::Repeat { count, body, .. } => {
            let times = evaluate(ctx, count)?
                .as_u64()
                .ok_or_else(|| EngineError::Execution("repeat count must be a number".into()))?;
            for _ in 0..times {
                match scoped_block(ctx, body)? {
                    Control::Continue => {}
                    returned => return Ok(returned),
                }
            }
            Ok(Control::Continue)
        }
        Statement::RepeatWhile {
            condition, body, ..
        } => {
            while is_truthy(&evaluate(ctx, condition)?) {
                match scoped_block(ctx, body)? {
                    Control::Continue => {}
                    returned => return Ok(returned),
                }
            }
            Ok(Control::Continue)
        }
        Statement::ForEach {
            var,
            iterable,
            body,
            ..
        } => {
            let items = match evaluate(ctx, iterable)? {
                Value::Array(items) => items,
                other => {
                    return Err(EngineError::Execution(format!(
                        "for each needs a list, got {other}"
                    )))
                }
            };
            for item in items {
                ctx.push_scope();
                ctx.declare(var, item, false)?;
                let control = exec_nested(ctx, body);
                ctx.pop_scope();
                match control? {
                    Control::Continue => {}
                    returned => return Ok(returned),
                }
            }
            Ok(Control::Continue)
        }
        Statement::Match {
            expression,
            cases,
            otherwise,
            ..
        } => {
            let subject = evaluate(ctx, expression)?;
            for case in cases {
                if evaluate(ctx, &case.pattern)? == subject {
                    return scoped_block(ctx, &case.body);
                }
            }
            if let Some(body) = otherwise {
                return scoped_block(ctx, body);
            }
            Ok(Control::Continue)
        }
        Statement::TryCatch {
            try_body,
            catch_var,
            catch_body,
            ..
        } => match scoped_block(ctx, try_body) {
            Ok(control) => Ok(control),
            Err(error) => {
                let caught = json!({
                    "message": error.to_string(),
                    "category": error.category().to_string(),
                    "boundary": error.boundary().to_string(),
                    "retryable": error.is_retryable(),
                });
                debug!(category = %error.category(), "error caught by try block");
                ctx.trace("error_caught", catch_var, caught.clone());
                ctx.push_scope();
                ctx.declare(catch_var, caught, false)?;
                let control = exec_nested(ctx, catch_body);
                ctx.pop_scope();
                control
            }
        },
        Statement::Await { name, .. } => {
            let value = ctx.async_tasks.remove(name).ok_or_else(|| {
                EngineError::UnknownIdentifier { name: name.clone() }
            })?;
            ctx.declare(name, value, false)?;
            Ok(Control::Continue)
        }
        Statement::Return { expression, .. } => Ok(Control::Return(evaluate(ctx, expression)?)),
        Statement::Parallel { tasks, .. } => {
            // Sequential simulation: run each task against its own scope,
            // merge the scopes afterwards in task order, so a later task
            // wins a name collision deterministically.
            let mut outputs = Vec::with_capacity(tasks.len());
            for task in tasks {
                ctx.push_scope();
                let was_parallel = ctx.in_parallel;
                ctx.in_parallel = true;
                let control = exec_nested(ctx, &task.body);
                ctx.in_parallel = was_parallel;
                let task_locals = ctx.pop_scope();
                control?;
                outputs.push(task_locals);
            }
            for task_locals in outputs {
                for (name, value) in task_locals {
                    ctx.assign(&name, value)?;
                }
            }
            Ok(Control::Continue)
        }
        Statement::AskAi {
            profile,
            input,
            target,
            ..
        } => {
            let input_value = evaluate(ctx, input)?;
            let answer = super::ai::ask_ai(ctx, profile, &input_value)?;
            let name = target.as_deref().unwrap_or("last_ai_response");
            ctx.assign(name, Value::String(answer))?;
            Ok(Control::Continue)
        }
        Statement::Save {
            record, expression, ..
        }
        | Statement::Create {
            record, expression, ..
        }
        | Statement::Update {
            record, expression, ..
        }
        | Statement::Delete {
            record, expression, ..
        } => {
            guard_state_write(ctx, statement)?;
            let value = evaluate(ctx, expression)?;
            apply_record_op(ctx, statement, record, value)
        }
        Statement::ThemeChange { value, .. } => {
            guard_state_write(ctx, statement)?;
            if !ALLOWED_THEMES.contains(&value.as_str()) {
                return Err(EngineError::InvalidTheme {
                    allowed: ALLOWED_THEMES.join(", "),
                });
            }
            ctx.theme = value.clone();
            ctx.trace("theme", value, Value::Null);
            Ok(Control::Continue)
        }
        Statement::Log { level, message, .. } => {
            let text = as_text(&evaluate(ctx, message)?);
            match level.as_str() {
                "warn" => warn!("{text}"),
                "debug" => debug!("{text}"),
                _ => info!("{text}"),
            }
            ctx.trace("log", level, Value::String(text));
            Ok(Control::Continue)
        }
    }
}

fn scoped_block(
    ctx: &mut ExecutionContext,
    body: &[Statement],
) -> Result<Control, EngineError> {
    ctx.push_scope();
    let control = exec_nested(ctx, body);
    ctx.pop_scope();
    control
}

fn exec_nested(ctx: &mut ExecutionContext, body: &[Statement]) -> Result<Control, EngineError> {
    ctx.enter()?;
    let control = exec_block(ctx, body);
    ctx.leave();
    control
}

/// Runtime backstop for the static isolation checks.
fn guard_state_write(
    ctx: &ExecutionContext,
    statement: &Statement,
) -> Result<(), EngineError> {
    let line = Some(statement.pos().line);
    if ctx.in_parallel {
        return Err(EngineError::ParallelStateWrite { line });
    }
    if ctx.in_function {
        return Err(EngineError::FunctionStateWrite { line });
    }
    Ok(())
}

fn apply_record_op(
    ctx: &mut ExecutionContext,
    statement: &Statement,
    record: &str,
    value: Value,
) -> Result<Control, EngineError> {
    let op = statement.kind_name();
    match statement {
        Statement::Save { .. } => ctx.store.save_record(record, value.clone()),
        Statement::Create { .. } => ctx.store.create(record, value.clone()),
        Statement::Update { .. } => ctx.store.update(record, value.clone())?,
        Statement::Delete { .. } => ctx.store.delete(record, &value)?,
        _ => {}
    }
    let draft = EventDraft::new("store", op)
        .inputs(json!({"record": record, "value": value}))
        .metadata(json!({"record": record}));
    ctx.explain.append(draft);
    ctx.trace(op, record, value);
    Ok(Control::Continue)
}
