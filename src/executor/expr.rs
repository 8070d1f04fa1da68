//! Expression evaluation.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::context::ExecutionContext;
use super::{call_flow, call_function, call_tool};
use crate::error::EngineError;
use crate::ir::{BinaryOp, Expression, UnaryOp};

pub fn evaluate(ctx: &mut ExecutionContext, expr: &Expression) -> Result<Value, EngineError> {
    match expr {
        Expression::Literal { value } => Ok(value.clone()),
        Expression::Ref { name } => ctx
            .lookup(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownIdentifier { name: name.clone() }),
        Expression::StatePath { path } => Ok(ctx.state_read(path).unwrap_or(Value::Null)),
        Expression::Unary { op, operand } => {
            let value = evaluate(ctx, operand)?;
            apply_unary(*op, &value)
        }
        Expression::Binary { op, left, right } => {
            // Short-circuit the logical operators before evaluating the
            // right side.
            match op {
                BinaryOp::And => {
                    let lhs = evaluate(ctx, left)?;
                    if !is_truthy(&lhs) {
                        return Ok(lhs);
                    }
                    evaluate(ctx, right)
                }
                BinaryOp::Or => {
                    let lhs = evaluate(ctx, left)?;
                    if is_truthy(&lhs) {
                        return Ok(lhs);
                    }
                    evaluate(ctx, right)
                }
                _ => {
                    let lhs = evaluate(ctx, left)?;
                    let rhs = evaluate(ctx, right)?;
                    apply_binary(*op, &lhs, &rhs)
                }
            }
        }
        Expression::List { items } => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(ctx, item)?);
            }
            Ok(Value::Array(values))
        }
        Expression::Map { entries } => {
            let mut map = Map::new();
            for (key, value_expr) in entries {
                map.insert(key.clone(), evaluate(ctx, value_expr)?);
            }
            Ok(Value::Object(map))
        }
        Expression::ToolCall { tool, args } => {
            let payload = evaluate_args(ctx, args)?;
            call_tool(ctx, tool, payload)
        }
        Expression::FunctionCall { function, args } => {
            let arguments = evaluate_args(ctx, args)?;
            call_function(ctx, function, arguments)
        }
        Expression::FlowCall { flow, args } => {
            let arguments = evaluate_args(ctx, args)?;
            call_flow(ctx, flow, arguments)
        }
        // Async launches are eager under sequential execution: the value
        // is computed here and parked by the surrounding `let`.
        Expression::AsyncCall { expression } => evaluate(ctx, expression),
    }
}

fn evaluate_args(
    ctx: &mut ExecutionContext,
    args: &BTreeMap<String, Expression>,
) -> Result<Value, EngineError> {
    let mut payload = Map::new();
    for (name, expr) in args {
        payload.insert(name.clone(), evaluate(ctx, expr)?);
    }
    Ok(Value::Object(payload))
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, EngineError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!is_truthy(value))),
        UnaryOp::Neg => {
            let n = value.as_f64().ok_or_else(|| {
                EngineError::Execution(format!("cannot negate {}", kind_of(value)))
            })?;
            Ok(json!(-n))
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(a), b) => Ok(Value::String(format!("{a}{}", as_text(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{b}", as_text(a)))),
            (Value::Array(a), Value::Array(b)) => {
                let mut joined = a.clone();
                joined.extend(b.clone());
                Ok(Value::Array(joined))
            }
            _ => numeric(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => numeric(op, lhs, rhs),
        BinaryOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = both_numbers(op, lhs, rhs)?;
            let result = match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => {
            // Handled with short-circuiting in `evaluate`.
            Ok(Value::Bool(is_truthy(lhs) && is_truthy(rhs)))
        }
    }
}

fn numeric(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EngineError> {
    let (a, b) = both_numbers(op, lhs, rhs)?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(EngineError::Execution("division by zero".to_string()));
            }
            a / b
        }
        _ => {
            return Err(EngineError::Execution(format!(
                "operator {op:?} is not arithmetic"
            )))
        }
    };
    // Keep integers integral when the result is whole.
    if result.fract() == 0.0 && result.abs() < (i64::MAX as f64) {
        Ok(json!(result as i64))
    } else {
        Ok(json!(result))
    }
}

fn both_numbers(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<(f64, f64), EngineError> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EngineError::Execution(format!(
            "operator {op:?} needs numbers, got {} and {}",
            kind_of(lhs),
            kind_of(rhs)
        ))),
    }
}

pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::test_context;

    fn literal(value: Value) -> Expression {
        Expression::Literal { value }
    }

    #[test]
    fn arithmetic_keeps_whole_results_integral() {
        let mut ctx = test_context();
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(literal(json!(2))),
            right: Box::new(literal(json!(3))),
        };
        assert_eq!(evaluate(&mut ctx, &expr).unwrap(), json!(5));
    }

    #[test]
    fn string_addition_concatenates() {
        let mut ctx = test_context();
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(literal(json!("n="))),
            right: Box::new(literal(json!(4))),
        };
        assert_eq!(evaluate(&mut ctx, &expr).unwrap(), json!("n=4"));
    }

    #[test]
    fn unknown_reference_is_a_typed_error() {
        let mut ctx = test_context();
        let err = evaluate(&mut ctx, &Expression::Ref { name: "ghost".into() }).unwrap_err();
        assert!(matches!(err, EngineError::UnknownIdentifier { .. }));
    }

    #[test]
    fn and_short_circuits() {
        let mut ctx = test_context();
        // The right side references an unknown name; short-circuiting
        // means it is never evaluated.
        let expr = Expression::Binary {
            op: BinaryOp::And,
            left: Box::new(literal(json!(false))),
            right: Box::new(Expression::Ref { name: "ghost".into() }),
        };
        assert_eq!(evaluate(&mut ctx, &expr).unwrap(), json!(false));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut ctx = test_context();
        let expr = Expression::Binary {
            op: BinaryOp::Div,
            left: Box::new(literal(json!(1))),
            right: Box::new(literal(json!(0))),
        };
        assert!(evaluate(&mut ctx, &expr).is_err());
    }

    #[test]
    fn missing_state_path_reads_null() {
        let mut ctx = test_context();
        let expr = Expression::StatePath {
            path: vec!["nothing".into(), "here".into()],
        };
        assert_eq!(evaluate(&mut ctx, &expr).unwrap(), Value::Null);
    }

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([0])));
    }
}
