//! Static checker behavior over whole programs.

use lumen::{check_program, ir};

fn program(yaml: &str) -> ir::Program {
    ir::parse_program(yaml).expect("program should parse")
}

#[test]
fn clean_launch_await_program_has_no_findings() {
    let program = program(
        r#"
name: app
flows:
  - name: main
    body:
      - kind: let
        name: page
        expression:
          kind: async_call
          expression: { kind: tool_call, tool: fetch_page }
        line: 2
        column: 3
      - kind: await
        name: page
        line: 5
        column: 3
      - kind: return
        expression: { kind: ref, name: page }
        line: 6
        column: 3
"#,
    );
    assert!(check_program(&program).is_empty());
}

#[test]
fn unmatched_await_names_the_binding() {
    let program = program(
        r#"
name: app
flows:
  - name: main
    body:
      - kind: await
        name: page
        line: 3
        column: 5
"#,
    );
    let violations = check_program(&program);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].flow_name, "main");
    assert_eq!((violations[0].line, violations[0].column), (3, 5));
    assert!(violations[0].reason.contains("page"));
}

#[test]
fn findings_are_sorted_across_flows() {
    let program = program(
        r#"
name: app
flows:
  - name: zulu
    body:
      - kind: await
        name: a
        line: 2
        column: 3
  - name: alpha
    body:
      - kind: await
        name: b
        line: 9
        column: 1
      - kind: await
        name: c
        line: 4
        column: 1
"#,
    );
    let violations = check_program(&program);
    let order: Vec<(String, u32)> = violations
        .iter()
        .map(|v| (v.flow_name.clone(), v.line))
        .collect();
    assert_eq!(
        order,
        vec![
            ("alpha".to_string(), 4),
            ("alpha".to_string(), 9),
            ("zulu".to_string(), 2),
        ]
    );
}

#[test]
fn parallel_shared_state_write_is_one_finding() {
    let program = program(
        r#"
name: app
flows:
  - name: main
    body:
      - kind: parallel
        tasks:
          - name: writer
            body:
              - kind: set
                target: { kind: state_path, path: [counter] }
                expression: { kind: literal, value: 1 }
                line: 5
                column: 7
          - name: reader
            body:
              - kind: set
                target: { kind: local, name: copy }
                expression: { kind: state_path, path: [counter] }
                line: 9
                column: 7
        line: 3
        column: 3
"#,
    );
    let violations = check_program(&program);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].reason.contains("state"));
    assert_eq!(violations[0].line, 5);
}

#[test]
fn governed_effects_inside_parallel_are_flagged() {
    let program = program(
        r#"
name: app
flows:
  - name: main
    body:
      - kind: parallel
        tasks:
          - body:
              - kind: save
                record: notes
                expression: { kind: literal, value: {} }
                line: 5
                column: 7
              - kind: theme_change
                value: dark
                line: 6
                column: 7
        line: 3
        column: 3
"#,
    );
    let violations = check_program(&program);
    assert_eq!(violations.len(), 2);
    assert!(violations[0].reason.contains("save"));
    assert!(violations[1].reason.contains("theme"));
}

#[test]
fn function_bodies_are_checked_too() {
    let program = program(
        r#"
name: app
functions:
  - name: helper
    body:
      - kind: await
        name: never_launched
        line: 2
        column: 3
"#,
    );
    let violations = check_program(&program);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].flow_name, "helper");
}
