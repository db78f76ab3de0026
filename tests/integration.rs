//! Drives the full `compile` -> `call` pipeline against the end-to-end
//! scenario table (the language's user-visible behaviour), plus the
//! scanner's unterminated-string scenario.

use ember_lang::vm::value::Value;
use ember_lang::{compile, FrontendError, State, StateOptions};

fn run_ok(src: &str) -> (Value, State) {
    let mut state = State::new(StateOptions::default());
    let proto = compile(&mut state.heap, src, &[]).expect("compile should succeed");
    let result = state.call(&proto, &[]).expect("call should succeed");
    (result, state)
}

#[test]
fn arithmetic_expression_returns_integer() {
    let (value, _state) = run_ok("let x = 1 + 2; return x;");
    assert_eq!(value, Value::I64(3));
}

#[test]
fn string_concatenation_returns_joined_string() {
    let (value, state) = run_ok("let s = \"hi\" + \" there\"; return s;");
    assert_eq!(value.display(&state.heap), "hi there");
}

#[test]
fn if_else_takes_the_true_branch() {
    let (value, _state) = run_ok("let x = 5; if (x < 10) { return 1; } else { return 0; }");
    assert_eq!(value, Value::I64(1));
}

#[test]
fn single_shot_if_without_else_falls_through_to_outer_return() {
    let (value, _state) = run_ok("let n = 0; let i = 0; if (i < 3) { n = n + 1; } return n;");
    assert_eq!(value, Value::I64(1));
}

#[test]
fn single_shot_if_skips_body_when_condition_is_false() {
    let (value, _state) = run_ok("let n = 0; let i = 10; if (i < 3) { n = n + 1; } return n;");
    assert_eq!(value, Value::I64(0));
}

#[test]
fn bare_string_literal_statement_is_a_compile_error() {
    let mut state = State::new(StateOptions::default());
    let err = compile(&mut state.heap, "\"hi\";", &[]).unwrap_err();
    match err {
        FrontendError::Parse(e) => {
            assert_eq!(e.kind, ember_lang::parser::ParseErrorKind::UnusedEvaluation);
        }
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn unknown_local_identifier_is_a_compile_error() {
    let mut state = State::new(StateOptions::default());
    let err = compile(&mut state.heap, "return z;", &[]).unwrap_err();
    match err {
        FrontendError::Compile(e) => {
            assert_eq!(e.kind, ember_lang::vm::compiler::CompileErrorKind::UnknownLocal);
        }
        other => panic!("expected a compile error, got {:?}", other),
    }
}

#[test]
fn unterminated_string_is_a_scan_error_at_the_opening_quote() {
    let mut state = State::new(StateOptions::default());
    let err = compile(&mut state.heap, "\"abc", &[]).unwrap_err();
    match err {
        FrontendError::Scan(e) => {
            assert_eq!(e.line, 1);
            assert_eq!(e.col, 1);
        }
        other => panic!("expected a scan error, got {:?}", other),
    }
}

#[test]
fn boolean_condition_materializes_a_genuine_bool_value() {
    let (value, _state) = run_ok("let x = 5; let b = x < 10; if (b) { return 1; } else { return 0; }");
    assert_eq!(value, Value::I64(1));
}

#[test]
fn logical_and_evaluates_both_operands() {
    let (value, _state) = run_ok("let a = 1 < 2; let b = 3 < 4; let c = a and b; if (c) { return 1; } else { return 0; }");
    assert_eq!(value, Value::I64(1));
}

#[test]
fn unary_negation_and_not_round_trip() {
    let (value, _state) = run_ok("let x = 5; let y = 0 - x; return y;");
    assert_eq!(value, Value::I64(-5));
}

#[test]
fn integer_division_by_zero_is_a_runtime_error() {
    let mut state = State::new(StateOptions::default());
    let proto = compile(&mut state.heap, "let z = 0; return 1 / z;", &[]).unwrap();
    let err = state.call(&proto, &[]).unwrap_err();
    assert_eq!(err.kind, ember_lang::RuntimeErrorKind::TypeMismatch);
}

#[test]
fn host_function_registered_before_compile_is_callable() {
    fn double(state: &mut State) -> Result<Value, ember_lang::RuntimeError> {
        match state.get(0) {
            Value::I64(n) => Ok(Value::I64(n * 2)),
            _ => Ok(Value::Nil),
        }
    }

    let mut state = State::new(StateOptions::default());
    state.register_host("double", double, 1);
    let proto = compile(&mut state.heap, "return double(21);", &["double"]).unwrap();
    let result = state.call(&proto, &[]).unwrap();
    assert_eq!(result, Value::I64(42));
}
