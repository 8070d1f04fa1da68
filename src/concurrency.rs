//! Static concurrency checks for flows.
//!
//! `async`/`await` and `parallel` are ordering and isolation contracts,
//! not real concurrency: the interpreter runs everything sequentially, so
//! this pass is the only enforcement point. It walks each flow's statement
//! tree, validates launch/await pairing, and flags shared-state writes and
//! governed side effects inside parallel task bodies. The walk never
//! fails; callers decide whether violations are fatal.

use serde::Serialize;
use std::collections::HashSet;

use crate::ir::{AssignTarget, Expression, Flow, ParallelTask, Program, Statement};

/// One finding, pinned to a source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub flow_name: String,
    pub line: u32,
    pub column: u32,
    pub reason: String,
    pub suggestion: String,
}

/// Check every flow and function body in a program. Output is sorted by
/// (flow_name, line, column, reason) so repeated runs are byte-identical.
pub fn check_program(program: &Program) -> Vec<Violation> {
    let mut violations = Vec::new();
    for flow in &program.flows {
        check_flow_into(flow, &mut violations);
    }
    for function in &program.functions {
        let mut launched = HashSet::new();
        walk(
            &function.body,
            &function.name,
            &mut launched,
            false,
            &mut violations,
        );
    }
    sort_violations(&mut violations);
    violations
}

pub fn check_flow(flow: &Flow) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_flow_into(flow, &mut violations);
    sort_violations(&mut violations);
    violations
}

fn check_flow_into(flow: &Flow, violations: &mut Vec<Violation>) {
    let mut launched = HashSet::new();
    walk(&flow.body, &flow.name, &mut launched, false, violations);
}

fn sort_violations(violations: &mut [Violation]) {
    violations.sort_by(|a, b| {
        (&a.flow_name, a.line, a.column, &a.reason).cmp(&(
            &b.flow_name,
            b.line,
            b.column,
            &b.reason,
        ))
    });
}

/// Recursive scope-carrying walk. `launched` is the set of async names
/// visible at this point; branches fork it and rejoin as the union, a
/// deliberately permissive treatment (a name counts as launched after a
/// conditional even if only one arm launched it).
fn walk(
    statements: &[Statement],
    flow_name: &str,
    launched: &mut HashSet<String>,
    in_parallel: bool,
    violations: &mut Vec<Violation>,
) {
    for statement in statements {
        let pos = statement.pos();
        if in_parallel && statement.is_governed_effect() {
            violations.push(Violation {
                flow_name: flow_name.to_string(),
                line: pos.line,
                column: pos.column,
                reason: format!(
                    "Parallel tasks cannot perform '{}': governed side effects are \
                     forbidden inside parallel blocks",
                    statement.kind_name()
                ),
                suggestion: "Collect the value in a local and apply the effect after the \
                             parallel block"
                    .to_string(),
            });
        }
        match statement {
            Statement::Let {
                name, expression, ..
            } => {
                if let Expression::AsyncCall { expression: inner } = expression {
                    if inner.is_single_call() {
                        launched.insert(name.clone());
                    } else {
                        violations.push(Violation {
                            flow_name: flow_name.to_string(),
                            line: pos.line,
                            column: pos.column,
                            reason: format!(
                                "Async binding '{name}' must launch exactly one tool, \
                                 function, or flow call"
                            ),
                            suggestion: "Move the surrounding computation out of the async \
                                         binding and launch the call alone"
                                .to_string(),
                        });
                    }
                }
            }
            Statement::Set { target, .. } => {
                if in_parallel {
                    if let AssignTarget::StatePath { .. } = target {
                        violations.push(Violation {
                            flow_name: flow_name.to_string(),
                            line: pos.line,
                            column: pos.column,
                            reason: format!(
                                "Parallel tasks cannot change state: '{}' is shared",
                                target.describe()
                            ),
                            suggestion: "Write to a local inside the task and merge into \
                                         state after the parallel block"
                                .to_string(),
                        });
                    }
                }
            }
            Statement::Await { name, .. } => {
                if !launched.contains(name) {
                    violations.push(Violation {
                        flow_name: flow_name.to_string(),
                        line: pos.line,
                        column: pos.column,
                        reason: format!(
                            "'await {name}' has no matching 'let {name} is async ...' in scope"
                        ),
                        suggestion: format!(
                            "Launch the call first: let {name} is async <call>"
                        ),
                    });
                }
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                fork_union(
                    &[then_body.as_slice(), else_body.as_slice()],
                    flow_name,
                    launched,
                    in_parallel,
                    violations,
                );
            }
            Statement::Repeat { body, .. }
            | Statement::RepeatWhile { body, .. }
            | Statement::ForEach { body, .. } => {
                fork_union(&[body.as_slice()], flow_name, launched, in_parallel, violations);
            }
            Statement::Match {
                cases, otherwise, ..
            } => {
                let mut branches: Vec<&[Statement]> =
                    cases.iter().map(|c| c.body.as_slice()).collect();
                if let Some(body) = otherwise {
                    branches.push(body.as_slice());
                }
                fork_union(&branches, flow_name, launched, in_parallel, violations);
            }
            Statement::TryCatch {
                try_body,
                catch_body,
                ..
            } => {
                fork_union(
                    &[try_body.as_slice(), catch_body.as_slice()],
                    flow_name,
                    launched,
                    in_parallel,
                    violations,
                );
            }
            Statement::Parallel { tasks, .. } => {
                check_parallel(tasks, flow_name, launched, violations);
            }
            Statement::Return { .. }
            | Statement::AskAi { .. }
            | Statement::Save { .. }
            | Statement::Create { .. }
            | Statement::Update { .. }
            | Statement::Delete { .. }
            | Statement::ThemeChange { .. }
            | Statement::Log { .. } => {}
        }
    }
}

fn fork_union(
    branches: &[&[Statement]],
    flow_name: &str,
    launched: &mut HashSet<String>,
    in_parallel: bool,
    violations: &mut Vec<Violation>,
) {
    let mut merged = launched.clone();
    for branch in branches {
        let mut forked = launched.clone();
        walk(branch, flow_name, &mut forked, in_parallel, violations);
        merged.extend(forked);
    }
    *launched = merged;
}

fn check_parallel(
    tasks: &[ParallelTask],
    flow_name: &str,
    launched: &mut HashSet<String>,
    violations: &mut Vec<Violation>,
) {
    let mut merged = launched.clone();
    for task in tasks {
        let mut task_local = launched.clone();
        walk(&task.body, flow_name, &mut task_local, true, violations);
        merged.extend(task_local);
    }
    *launched = merged;
}
