//! AST → `Prototype` compiler (§4.E). Assigns registers to locals and
//! temporaries, interns the constant pool, and emits instructions with a
//! single forward pass over the tree.

use crate::parser::ast::{BinOp, Expr, ExprKind, Literal, Program, Stmt, StmtKind, UnaryOp};
use crate::vm::bytecode::{encode_a, encode_ab, encode_abc, OpCode, Prototype};
use crate::vm::heap::Heap;
use crate::vm::value::Value;

/// Fixed constant-pool indices pre-seeded before any user constant (§4.E):
/// integers `0`/`1` for comparison/materialisation bookkeeping, and the two
/// genuine `Bool` constants the corrected materialisation sequence needs
/// (§10.4 — a literal two-`LOAD` sequence double-executes on the false
/// branch, so this repository always threads through `Bool(true)`/`Bool(false)`).
pub const CONST_ZERO: u16 = 0;
pub const CONST_ONE: u16 = 1;
pub const CONST_FALSE: u16 = 2;
pub const CONST_TRUE: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    ExpectedBlock,
    UnknownLocal,
    UnknownOperation,
    UnusedEvaluation,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
    pub col: usize,
    pub detail: String,
}

impl CompileError {
    fn new(kind: CompileErrorKind, line: usize, col: usize, detail: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            col,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] compile error: {:?} ({})", self.line, self.col, self.kind, self.detail)
    }
}

impl std::error::Error for CompileError {}

struct Local {
    name: String,
    register: u8,
}

struct Compiler<'h, 'n> {
    proto: Prototype,
    heap: &'h mut Heap,
    locals: Vec<Local>,
    next_temp: u8,
    max_temps: u8,
    known_names: &'n [&'n str],
}

impl<'h, 'n> Compiler<'h, 'n> {
    fn new(heap: &'h mut Heap, known_names: &'n [&'n str]) -> Self {
        let mut proto = Prototype::new("<main>");
        // Pre-seed the fixed constants (§4.E) before any user constant is
        // interned, so their indices never shift.
        proto.constants.push(Value::I64(0));
        proto.constants.push(Value::I64(1));
        proto.constants.push(Value::Bool(false));
        proto.constants.push(Value::Bool(true));
        Self {
            proto,
            heap,
            locals: Vec::new(),
            next_temp: 0,
            max_temps: 0,
            known_names,
        }
    }

    fn alloc_temp(&mut self) -> u8 {
        let r = self.locals.len() as u8 + self.next_temp;
        self.next_temp += 1;
        if self.next_temp > self.max_temps {
            self.max_temps = self.next_temp;
        }
        r
    }

    /// Restore the temp watermark to `mark` temps above the current local
    /// count (§4.E's `free(n)`, expressed as "reset to" rather than "minus
    /// n" since callers always know the watermark they started from).
    fn free_to(&mut self, mark: u8) {
        self.next_temp = mark;
    }

    fn reserve_local(&mut self, name: &str) -> u8 {
        let r = self.locals.len() as u8;
        self.locals.push(Local {
            name: name.to_string(),
            register: r,
        });
        r
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| l.register)
    }

    fn emit(&mut self, ins: u32, line: usize) -> usize {
        self.proto.emit(ins, line)
    }

    /// Emit a placeholder `JMP` to be back-patched once its target is known.
    fn emit_jump(&mut self, line: usize) -> usize {
        self.emit(encode_a(OpCode::Jmp, 0), line)
    }

    fn patch_jump_here(&mut self, at: usize) {
        let target = self.proto.code_len();
        self.proto.patch_jump(at, target);
    }

    fn const_int(&mut self, n: i64) -> u16 {
        if let Some(i) = self.proto.constants.iter().position(|v| matches!(v, Value::I64(x) if *x == n)) {
            return i as u16;
        }
        self.proto.constants.push(Value::I64(n));
        (self.proto.constants.len() - 1) as u16
    }

    fn const_float(&mut self, n: f64) -> u16 {
        if let Some(i) = self.proto.constants.iter().position(|v| matches!(v, Value::F64(x) if x.to_bits() == n.to_bits())) {
            return i as u16;
        }
        self.proto.constants.push(Value::F64(n));
        (self.proto.constants.len() - 1) as u16
    }

    fn const_bool(&mut self, b: bool) -> u16 {
        if b { CONST_TRUE } else { CONST_FALSE }
    }

    fn const_nil(&mut self) -> u16 {
        if let Some(i) = self.proto.constants.iter().position(|v| matches!(v, Value::Nil)) {
            return i as u16;
        }
        self.proto.constants.push(Value::Nil);
        (self.proto.constants.len() - 1) as u16
    }

    /// Strings intern by byte equality (§4.E); the heap object backing a
    /// freshly-interned constant is marked `is_const` so its refcount never
    /// reaches zero through ordinary `drop` traffic (§3 invariant 3).
    fn const_str(&mut self, s: &str) -> u16 {
        for (i, v) in self.proto.constants.iter().enumerate() {
            if let Some(existing) = v.as_str(self.heap) {
                if existing == s {
                    return i as u16;
                }
            }
        }
        let r = self.heap.alloc_const_string(s.to_string());
        self.proto.constants.push(Value::Dyn(r));
        (self.proto.constants.len() - 1) as u16
    }
}

/// Compile a program into a `Prototype`. `known_names` is the set of names
/// already registered as host functions on the target `State`'s globals
/// (§10.3); an unresolved call callee is an `UnknownLocal` compile error only
/// when `known_names` is non-empty and does not contain it, so embedders that
/// register host functions before compiling still get early diagnostics.
pub fn compile(heap: &mut Heap, program: &Program, known_names: &[&str]) -> Result<Prototype, CompileError> {
    let mut c = Compiler::new(heap, known_names);
    for stmt in &program.statements {
        compile_stmt(&mut c, stmt)?;
    }
    // Implicit `nil` return on fallthrough (§4.E, §10.3).
    let nil_k = c.const_nil();
    let nil_reg = c.alloc_temp();
    c.emit(encode_ab(OpCode::Load, nil_reg, nil_k), 0);
    c.emit(encode_a(OpCode::Ret, nil_reg as i32), 0);
    c.proto.reg_count = c.locals.len() as u32 + c.max_temps as u32;
    Ok(c.proto)
}

fn compile_stmt(c: &mut Compiler, stmt: &Stmt) -> Result<(), CompileError> {
    let (line, col) = (stmt.line, stmt.col);
    match &stmt.kind {
        StmtKind::Let { name, value } => {
            let reg = c.reserve_local(name);
            compile_into(c, value, reg)?;
            Ok(())
        }

        StmtKind::Assign { name, value } => {
            let Some(reg) = c.resolve_local(name) else {
                return Err(CompileError::new(CompileErrorKind::UnknownLocal, line, col, name.clone()));
            };
            let saved = c.next_temp;
            let tmp = c.alloc_temp();
            compile_into(c, value, tmp)?;
            c.emit(encode_ab(OpCode::Move, reg, tmp as u16), line);
            c.free_to(saved);
            Ok(())
        }

        StmtKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let else_jump = compile_condition(c, condition)?;
            compile_stmt(c, then_branch)?;
            if let Some(else_branch) = else_branch {
                let end_jump = c.emit_jump(line);
                c.patch_jump_here(else_jump);
                compile_stmt(c, else_branch)?;
                c.patch_jump_here(end_jump);
            } else {
                c.patch_jump_here(else_jump);
            }
            Ok(())
        }

        StmtKind::Block(stmts) => {
            for s in stmts {
                compile_stmt(c, s)?;
            }
            Ok(())
        }

        StmtKind::Return(expr) => {
            let saved = c.next_temp;
            let reg = c.alloc_temp();
            compile_into(c, expr, reg)?;
            c.emit(encode_a(OpCode::Ret, reg as i32), line);
            c.free_to(saved);
            Ok(())
        }

        StmtKind::Expr(expr) => {
            if !matches!(expr.kind, ExprKind::Call { .. }) {
                return Err(CompileError::new(CompileErrorKind::UnusedEvaluation, expr.line, expr.col, "statement expression must be a call"));
            }
            let saved = c.next_temp;
            let reg = c.alloc_temp();
            compile_into(c, expr, reg)?;
            c.free_to(saved);
            Ok(())
        }
    }
}

/// Opcode + `inv` polarity for a comparison `BinOp` (§4.B, §10.3).
fn comparison(op: BinOp) -> Option<(OpCode, u8)> {
    match op {
        BinOp::Eq => Some((OpCode::Eq, 0)),
        BinOp::NotEq => Some((OpCode::Eq, 1)),
        BinOp::Lt => Some((OpCode::Lt, 0)),
        BinOp::GtEq => Some((OpCode::Lt, 1)),
        BinOp::LtEq => Some((OpCode::Le, 0)),
        BinOp::Gt => Some((OpCode::Le, 1)),
        _ => None,
    }
}

/// Compile `expr` so that the instruction immediately following this call's
/// emitted code is an unresolved `JMP`, taken exactly when `expr` is false.
/// Used directly by `if` (no materialised `Bool` value is needed to branch).
fn compile_condition(c: &mut Compiler, expr: &Expr) -> Result<usize, CompileError> {
    if let ExprKind::Binary { op, left, right } = &expr.kind {
        if let Some((opcode, inv)) = comparison(*op) {
            let saved = c.next_temp;
            let lr = c.alloc_temp();
            compile_into(c, left, lr)?;
            let rr = c.alloc_temp();
            compile_into(c, right, rr)?;
            c.emit(encode_abc(opcode, inv, lr, rr), expr.line);
            let jmp = c.emit_jump(expr.line);
            c.free_to(saved);
            return Ok(jmp);
        }
    }
    // Non-comparison condition: compile to a value, then check it against
    // the `true` constant with the same CMP/JMP pattern. `EQ` raises
    // `TypeMismatch` whenever exactly one operand is `bool`, which is how
    // the "only bool is a valid condition" rule (§9 Open Questions) is
    // enforced at runtime without a separate truthiness opcode.
    let saved = c.next_temp;
    let vr = c.alloc_temp();
    compile_into(c, expr, vr)?;
    let tr = c.alloc_temp();
    c.emit(encode_ab(OpCode::Load, tr, CONST_TRUE), expr.line);
    c.emit(encode_abc(OpCode::Eq, 0, vr, tr), expr.line);
    let jmp = c.emit_jump(expr.line);
    c.free_to(saved);
    Ok(jmp)
}

/// Compile a comparison into a genuine `Bool` value in `dst` (§10.4's
/// corrected four-instruction materialisation).
fn compile_comparison_value(c: &mut Compiler, opcode: OpCode, inv: u8, left: &Expr, right: &Expr, dst: u8, line: usize) -> Result<(), CompileError> {
    let saved = c.next_temp;
    let lr = c.alloc_temp();
    compile_into(c, left, lr)?;
    let rr = c.alloc_temp();
    compile_into(c, right, rr)?;
    c.emit(encode_abc(opcode, inv, lr, rr), line);
    c.free_to(saved);

    let to_false = c.emit_jump(line);
    c.emit(encode_ab(OpCode::Load, dst, CONST_TRUE), line);
    let past_false = c.emit_jump(line);
    c.patch_jump_here(to_false);
    c.emit(encode_ab(OpCode::Load, dst, CONST_FALSE), line);
    c.patch_jump_here(past_false);
    Ok(())
}

/// Compile `expr`, placing its value into `dst`. Mirrors §4.E's
/// `compile(node, dst)`; this front end has no "discard" sentinel because
/// every caller that would discard a value (statement, call) is required by
/// the grammar (§4.D) to route through `compile_stmt`'s `UnusedEvaluation`
/// check first.
fn compile_into(c: &mut Compiler, expr: &Expr, dst: u8) -> Result<(), CompileError> {
    let line = expr.line;
    match &expr.kind {
        ExprKind::Literal(lit) => {
            let k = match lit {
                Literal::Nil => c.const_nil(),
                Literal::Bool(b) => c.const_bool(*b),
                Literal::I64(n) => c.const_int(*n),
                Literal::F64(n) => c.const_float(*n),
                Literal::String(s) => c.const_str(s),
            };
            c.emit(encode_ab(OpCode::Load, dst, k), line);
            Ok(())
        }

        ExprKind::Identifier(name) => {
            let Some(reg) = c.resolve_local(name) else {
                return Err(CompileError::new(CompileErrorKind::UnknownLocal, line, expr.col, name.clone()));
            };
            if reg != dst {
                c.emit(encode_ab(OpCode::Move, dst, reg as u16), line);
            }
            Ok(())
        }

        ExprKind::Binary { op, left, right } => {
            if let Some((opcode, inv)) = comparison(*op) {
                return compile_comparison_value(c, opcode, inv, left, right, dst, line);
            }
            let saved = c.next_temp;
            let lr = c.alloc_temp();
            compile_into(c, left, lr)?;
            let rr = c.alloc_temp();
            compile_into(c, right, rr)?;
            let opcode = match op {
                BinOp::Add => OpCode::Add,
                BinOp::Sub => OpCode::Sub,
                BinOp::Mul => OpCode::Mul,
                BinOp::Div => OpCode::Div,
                BinOp::And => OpCode::And,
                BinOp::Or => OpCode::Or,
                _ => {
                    return Err(CompileError::new(CompileErrorKind::UnknownOperation, line, expr.col, format!("{:?}", op)));
                }
            };
            c.emit(encode_abc(opcode, dst, lr, rr), line);
            c.free_to(saved);
            Ok(())
        }

        ExprKind::Unary { op, expr: inner } => {
            let saved = c.next_temp;
            let sr = c.alloc_temp();
            compile_into(c, inner, sr)?;
            let opcode = match op {
                UnaryOp::Neg => OpCode::Neg,
                UnaryOp::Not => OpCode::Not,
            };
            c.emit(encode_ab(opcode, dst, sr as u16), line);
            c.free_to(saved);
            Ok(())
        }

        ExprKind::Call { callee, args } => {
            let saved = c.next_temp;
            let callee_reg = if let Some(local_reg) = c.resolve_local(callee) {
                local_reg
            } else {
                if !c.known_names.is_empty() && !c.known_names.contains(&callee.as_str()) {
                    return Err(CompileError::new(CompileErrorKind::UnknownLocal, line, expr.col, callee.clone()));
                }
                let name_k = c.const_str(callee);
                let r = c.alloc_temp();
                c.emit(encode_ab(OpCode::GetGlobal, r, name_k), line);
                r
            };
            let arg_base = c.next_temp + c.locals.len() as u8;
            for arg in args {
                let ar = c.alloc_temp();
                compile_into(c, arg, ar)?;
            }
            c.emit(encode_abc(OpCode::Call, dst, callee_reg, arg_base), line);
            c.free_to(saved);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::vm::bytecode::decode;

    fn compile_src(src: &str) -> Result<(Prototype, Heap), CompileError> {
        let tokens = Lexer::new(src).tokenize().expect("scan failed");
        let program = Parser::new(tokens).parse_program().expect("parse failed");
        let mut heap = Heap::new();
        let proto = compile(&mut heap, &program, &[])?;
        Ok((proto, heap))
    }

    #[test]
    fn pre_seeds_fixed_constants() {
        let (proto, _heap) = compile_src("return 1;").unwrap();
        assert_eq!(proto.constants[CONST_ZERO as usize], Value::I64(0));
        assert_eq!(proto.constants[CONST_ONE as usize], Value::I64(1));
        assert_eq!(proto.constants[CONST_FALSE as usize], Value::Bool(false));
        assert_eq!(proto.constants[CONST_TRUE as usize], Value::Bool(true));
    }

    #[test]
    fn every_register_index_is_in_bounds() {
        let (proto, _heap) = compile_src("let x = 1 + 2; let y = x * 3; return y;").unwrap();
        for &ins in &proto.code {
            match decode(ins).unwrap() {
                crate::vm::bytecode::Decoded::Ab { a, .. } => assert!((a as u32) < proto.reg_count),
                crate::vm::bytecode::Decoded::Abc { a, b, c, .. } => {
                    assert!((a as u32) < proto.reg_count);
                    assert!((b as u32) < proto.reg_count);
                    assert!((c as u32) < proto.reg_count);
                }
                crate::vm::bytecode::Decoded::A { .. } => {}
            }
        }
    }

    #[test]
    fn unknown_local_identifier_is_rejected() {
        let err = compile_src("return z;").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownLocal);
    }

    #[test]
    fn assign_to_undeclared_name_is_unknown_local() {
        let err = compile_src("x = 1;").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownLocal);
    }

    #[test]
    fn call_to_name_outside_known_names_is_rejected() {
        let tokens = Lexer::new("print(1);").tokenize().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let mut heap = Heap::new();
        let err = compile(&mut heap, &program, &["other"]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownLocal);
    }

    #[test]
    fn call_to_known_name_compiles() {
        let tokens = Lexer::new("print(1);").tokenize().unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let mut heap = Heap::new();
        assert!(compile(&mut heap, &program, &["print"]).is_ok());
    }

    #[test]
    fn locals_get_contiguous_registers_from_zero() {
        let (proto, _heap) = compile_src("let a = 1; let b = 2; return a;").unwrap();
        // Two locals occupy registers 0 and 1; reg_count must exceed both.
        assert!(proto.reg_count >= 2);
    }
}
