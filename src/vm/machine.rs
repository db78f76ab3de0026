//! The dispatch-loop interpreter: executes a `Prototype` against a `State`'s
//! value stack, call-frame array, and globals table.

use tracing::{debug, trace};

use super::bytecode::{decode, Decoded, OpCode, Prototype};
use super::frame::{Frame, MAX_CALL_DEPTH};
use super::heap::{Func, Heap, HeapObject, HeapRef, HostUserData, ObjKind};
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    UnknownOp,
    OobAccess,
    TypeMismatch,
    MemberNotFound,
    Assert,
    Panic,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub pc: u32,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at pc {}: {}", self.kind, self.pc, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A host-provided function. Registered on `globals` via `register_host`;
/// invoked like any script function through `CALL`.
pub type HostFn = fn(&mut State) -> Result<Value, RuntimeError>;

pub struct NativeFn {
    pub name: String,
    pub arg_count: u32,
    pub func: HostFn,
}

/// Tunables for a `State`. The whole configuration surface of the core (§10.6).
#[derive(Debug, Clone, Copy)]
pub struct StateOptions {
    pub initial_stack_capacity: usize,
    pub max_call_depth: usize,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            initial_stack_capacity: 256,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

/// `{ stack, frames, globals }` plus the heap arena backing every dyn value
/// reachable from them (§3).
pub struct State {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub globals: HeapRef,
    pub heap: Heap,
    options: StateOptions,
}

enum Callable {
    Script(Prototype),
    Host(HostFn, u32),
}

impl State {
    pub fn new(options: StateOptions) -> Self {
        let mut heap = Heap::new();
        let globals = heap.alloc_table();
        Self {
            stack: Vec::with_capacity(options.initial_stack_capacity),
            frames: Vec::new(),
            globals,
            heap,
            options,
        }
    }

    /// Insert a host function into `globals` under `name` (§6).
    pub fn register_host(&mut self, name: &str, func: HostFn, arg_count: u32) {
        let fn_ref = self.heap.alloc_function_host(NativeFn {
            name: name.to_string(),
            arg_count,
            func,
        });
        self.obj_set_str(self.globals, name, Value::Dyn(fn_ref));
    }

    fn obj_set_str(&mut self, table: HeapRef, key: &str, val: Value) {
        let old = match self.heap.get_mut(table) {
            Some(HeapObject {
                kind: ObjKind::Table(map),
                ..
            }) => map.insert(key.to_string(), val),
            _ => None,
        };
        if let Some(old_val) = old {
            self.heap.drop_value(old_val);
        }
    }

    /// Read register `i` relative to the active frame (§6). Out-of-range
    /// reads return `Nil` rather than panicking — a host mis-using the
    /// binding surface should see a silently-absent value, not a crash.
    pub fn get(&self, i: u32) -> Value {
        match self.frames.last() {
            Some(frame) => self
                .stack
                .get((frame.bottom + i) as usize)
                .copied()
                .unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    /// Write register `i` relative to the active frame (§6), dropping the
    /// previous occupant and duplicating the incoming value if it is `dyn`.
    pub fn set(&mut self, i: u32, v: Value) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let idx = (frame.bottom + i) as usize;
        if idx >= self.stack.len() {
            return;
        }
        let dup = self.heap.dup(v);
        let old = std::mem::replace(&mut self.stack[idx], dup);
        self.heap.drop_value(old);
    }

    /// Run `proto` with `args` as a fresh top-level call (embedding surface
    /// entry point, §6).
    pub fn call(&mut self, proto: &Prototype, args: &[Value]) -> Result<Value, RuntimeError> {
        self.call_script(proto, args)
    }

    fn call_script(&mut self, proto: &Prototype, args: &[Value]) -> Result<Value, RuntimeError> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::Panic,
                message: "call stack exhausted".to_string(),
                pc: proto.entry,
            });
        }
        debug!(name = %proto.name, arg_count = args.len(), "call enter");

        let bottom = self.stack.len() as u32;
        self.stack
            .resize(self.stack.len() + proto.reg_count as usize, Value::Nil);
        for (i, v) in args.iter().enumerate() {
            if i as u32 >= proto.arg_count {
                break;
            }
            let dup = self.heap.dup(*v);
            self.stack[bottom as usize + i] = dup;
        }
        self.frames.push(Frame::new(bottom, proto.reg_count, proto.entry));

        let result = self.run(proto);
        debug!(name = %proto.name, ok = result.is_ok(), "call exit");
        result
    }

    fn reg_index(&self, r: u8) -> usize {
        (self.frames.last().expect("active frame").bottom + r as u32) as usize
    }

    fn get_reg(&self, r: u8) -> Value {
        self.stack[self.reg_index(r)]
    }

    fn set_reg(&mut self, r: u8, v: Value) {
        let idx = self.reg_index(r);
        let old = std::mem::replace(&mut self.stack[idx], v);
        self.heap.drop_value(old);
    }

    fn unwind_current_frame(&mut self) {
        let frame = self.frames.pop().expect("frame to unwind");
        for i in frame.bottom..frame.bottom + frame.size {
            let v = self.stack[i as usize];
            self.heap.drop_value(v);
        }
        self.stack.truncate(frame.bottom as usize);
    }

    fn runtime_err(&self, kind: RuntimeErrorKind, message: impl Into<String>, pc: u32) -> RuntimeError {
        RuntimeError {
            kind,
            message: message.into(),
            pc,
        }
    }

    fn resolve_callable(&self, v: Value, pc: u32) -> Result<Callable, RuntimeError> {
        if let Value::Dyn(r) = v {
            if let Some(obj) = self.heap.get(r) {
                match &obj.kind {
                    ObjKind::Function(Func::Script(proto)) => return Ok(Callable::Script(proto.clone())),
                    ObjKind::Function(Func::Host(f)) => return Ok(Callable::Host(f.func, f.arg_count)),
                    _ => {}
                }
            }
        }
        Err(self.runtime_err(
            RuntimeErrorKind::TypeMismatch,
            "CALL target is not a function",
            pc,
        ))
    }

    fn run(&mut self, proto: &Prototype) -> Result<Value, RuntimeError> {
        loop {
            let frame_top = self.frames.len() - 1;
            let pc = self.frames[frame_top].pc;
            if pc as usize >= proto.code.len() {
                return self.do_return(Value::Nil);
            }
            let ins = proto.code[pc as usize];
            self.frames[frame_top].pc = pc + 1;

            let Some(decoded) = decode(ins) else {
                self.unwind_current_frame();
                return Err(self.runtime_err(RuntimeErrorKind::UnknownOp, "unrecognised instruction word", pc));
            };
            trace!(pc, ?decoded, "dispatch");

            match decoded {
                Decoded::Ab { op: OpCode::Load, a, b } => {
                    let Some(k) = proto.constants.get(b as usize) else {
                        self.unwind_current_frame();
                        return Err(self.runtime_err(RuntimeErrorKind::OobAccess, "constant index out of range", pc));
                    };
                    let dup = self.heap.dup(*k);
                    self.set_reg(a, dup);
                }
                Decoded::Ab { op: OpCode::Move, a, b } => {
                    let v = self.get_reg(b as u8);
                    let dup = self.heap.dup(v);
                    self.set_reg(a, dup);
                }
                Decoded::Ab { op: OpCode::StrFrom, a, b } => {
                    let v = self.get_reg(b as u8);
                    let s = v.display(&self.heap);
                    let r = self.heap.alloc_string(s);
                    self.set_reg(a, Value::Dyn(r));
                }
                Decoded::A { op: OpCode::Ret, a } => {
                    let v = self.get_reg(a as u8);
                    return self.do_return(v);
                }
                Decoded::A { op: OpCode::Jmp, a } => {
                    let frame = &mut self.frames[frame_top];
                    frame.pc = (frame.pc as i64 + a as i64) as u32;
                }
                Decoded::A { op: OpCode::ObjNew, a } => {
                    let r = self.heap.alloc_table();
                    self.set_reg(a as u8, Value::Dyn(r));
                }
                Decoded::A { op: OpCode::StrEcho, a } => {
                    let v = self.get_reg(a as u8);
                    let Some(s) = v.as_str(&self.heap) else {
                        self.unwind_current_frame();
                        return Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "STR_ECHO operand must be a string", pc));
                    };
                    print!("{}", s);
                }
                Decoded::A { op: OpCode::DbgDump, .. } => {
                    self.dump_stack(proto, pc);
                }
                Decoded::Ab { op: OpCode::GetGlobal, a, b } => {
                    let Some(key) = proto.constants.get(b as usize).and_then(|v| v.as_str(&self.heap).map(str::to_string)) else {
                        self.unwind_current_frame();
                        return Err(self.runtime_err(RuntimeErrorKind::OobAccess, "GET_GLOBAL name constant out of range or not a string", pc));
                    };
                    let found = match self.heap.get(self.globals) {
                        Some(HeapObject { kind: ObjKind::Table(map), .. }) => map.get(&key).copied(),
                        _ => None,
                    };
                    let v = found.map(|v| self.heap.dup(v)).unwrap_or(Value::Nil);
                    self.set_reg(a, v);
                }
                Decoded::Ab { op: OpCode::Neg, a, b } => {
                    let v = self.get_reg(b as u8);
                    match v {
                        Value::I64(n) => self.set_reg(a, Value::I64(n.wrapping_neg())),
                        Value::F64(n) => self.set_reg(a, Value::F64(-n)),
                        _ => {
                            self.unwind_current_frame();
                            return Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "NEG operand must be numeric", pc));
                        }
                    }
                }
                Decoded::Ab { op: OpCode::Not, a, b } => {
                    let v = self.get_reg(b as u8);
                    match v {
                        Value::Bool(b) => self.set_reg(a, Value::Bool(!b)),
                        _ => {
                            self.unwind_current_frame();
                            return Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "NOT operand must be bool", pc));
                        }
                    }
                }
                Decoded::Abc { op: op @ (OpCode::And | OpCode::Or), a, b, c } => {
                    match (self.get_reg(b), self.get_reg(c)) {
                        (Value::Bool(x), Value::Bool(y)) => {
                            let r = if op == OpCode::And { x && y } else { x || y };
                            self.set_reg(a, Value::Bool(r));
                        }
                        _ => {
                            self.unwind_current_frame();
                            return Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "AND/OR operands must be bool", pc));
                        }
                    }
                }
                Decoded::Abc { op: OpCode::Add, a, b, c } => {
                    match self.binop_add(self.get_reg(b), self.get_reg(c), pc) {
                        Ok(v) => self.set_reg(a, v),
                        Err(e) => {
                            self.unwind_current_frame();
                            return Err(e);
                        }
                    }
                }
                Decoded::Abc { op: op @ (OpCode::Sub | OpCode::Mul | OpCode::Div), a, b, c } => {
                    match self.binop_arith(op, self.get_reg(b), self.get_reg(c), pc) {
                        Ok(v) => self.set_reg(a, v),
                        Err(e) => {
                            self.unwind_current_frame();
                            return Err(e);
                        }
                    }
                }
                Decoded::Abc { op: op @ (OpCode::Eq | OpCode::Lt | OpCode::Le), a, b, c } => {
                    let raw = match self.compare(op, self.get_reg(b), self.get_reg(c), pc) {
                        Ok(v) => v,
                        Err(e) => {
                            self.unwind_current_frame();
                            return Err(e);
                        }
                    };
                    let cond = if a != 0 { !raw } else { raw };
                    if cond {
                        let frame = &mut self.frames[frame_top];
                        frame.pc += 1;
                    }
                }
                Decoded::Abc { op: OpCode::ObjSet, a, b, c } => {
                    let obj = self.get_reg(a);
                    let key = self.get_reg(b);
                    let val = self.get_reg(c);
                    if let Err(e) = self.obj_set(obj, key, val, pc) {
                        self.unwind_current_frame();
                        return Err(e);
                    }
                }
                Decoded::Abc { op: OpCode::ObjGet, a, b, c } => {
                    let obj = self.get_reg(b);
                    let key = self.get_reg(c);
                    match self.obj_get(obj, key, pc) {
                        Ok(v) => self.set_reg(a, v),
                        Err(e) => {
                            self.unwind_current_frame();
                            return Err(e);
                        }
                    }
                }
                Decoded::Abc { op: OpCode::Call, a, b, c } => {
                    if let Err(e) = self.do_call(a, b, c, pc) {
                        self.unwind_current_frame();
                        return Err(e);
                    }
                }
                _ => {
                    self.unwind_current_frame();
                    return Err(self.runtime_err(RuntimeErrorKind::UnknownOp, "opcode/encoding mismatch", pc));
                }
            }
        }
    }

    fn do_return(&mut self, v: Value) -> Result<Value, RuntimeError> {
        let result = self.heap.dup(v);
        self.unwind_current_frame();
        Ok(result)
    }

    fn do_call(&mut self, a: u8, b: u8, c: u8, pc: u32) -> Result<(), RuntimeError> {
        let frame = self.frames.last().copied().expect("active frame");
        let callee_val = self.get_reg(b);
        let callable = self.resolve_callable(callee_val, pc)?;
        let available = frame.size.saturating_sub(c as u32) as usize;
        let arg_base = frame.bottom + c as u32;

        match callable {
            Callable::Script(proto) => {
                let argc = proto.arg_count as usize;
                let take = available.min(argc);
                let mut args: Vec<Value> = (0..take)
                    .map(|i| self.stack[arg_base as usize + i])
                    .collect();
                args.resize(argc, Value::Nil);
                let result = self.call_script(&proto, &args)?;
                self.set_reg(a, result);
            }
            Callable::Host(func, argc) => {
                let window = available.min(argc as usize) as u32;
                self.frames.push(Frame::new(arg_base, window, 0));
                let outcome = func(self);
                self.frames.pop();
                let result = outcome?;
                self.set_reg(a, result);
            }
        }
        Ok(())
    }

    fn binop_add(&mut self, lhs: Value, rhs: Value, pc: u32) -> Result<Value, RuntimeError> {
        if let (Some(a), Some(b)) = (lhs.as_str(&self.heap), rhs.as_str(&self.heap)) {
            let joined = format!("{}{}", a, b);
            let r = self.heap.alloc_string(joined);
            return Ok(Value::Dyn(r));
        }
        self.binop_arith(OpCode::Add, lhs, rhs, pc)
    }

    fn binop_arith(&mut self, op: OpCode, lhs: Value, rhs: Value, pc: u32) -> Result<Value, RuntimeError> {
        use Value::*;
        match (lhs, rhs) {
            (I64(a), I64(b)) => match op {
                OpCode::Add => Ok(I64(a.wrapping_add(b))),
                OpCode::Sub => Ok(I64(a.wrapping_sub(b))),
                OpCode::Mul => Ok(I64(a.wrapping_mul(b))),
                OpCode::Div => {
                    if b == 0 {
                        Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "integer division by zero", pc))
                    } else {
                        Ok(I64(a.wrapping_div(b)))
                    }
                }
                _ => unreachable!("binop_arith called with non-arithmetic op"),
            },
            (I64(_) | F64(_), I64(_) | F64(_)) => {
                let a = as_f64(lhs).unwrap();
                let b = as_f64(rhs).unwrap();
                Ok(F64(match op {
                    OpCode::Add => a + b,
                    OpCode::Sub => a - b,
                    OpCode::Mul => a * b,
                    OpCode::Div => a / b,
                    _ => unreachable!("binop_arith called with non-arithmetic op"),
                }))
            }
            _ => Err(self.runtime_err(
                RuntimeErrorKind::TypeMismatch,
                format!(
                    "cannot apply {:?} to {} and {}",
                    op,
                    lhs.type_name(&self.heap),
                    rhs.type_name(&self.heap)
                ),
                pc,
            )),
        }
    }

    fn compare(&mut self, op: OpCode, lhs: Value, rhs: Value, pc: u32) -> Result<bool, RuntimeError> {
        use Value::*;
        match op {
            OpCode::Eq => match (lhs, rhs) {
                (Bool(a), Bool(b)) => Ok(a == b),
                (Bool(_), _) | (_, Bool(_)) => Err(self.runtime_err(
                    RuntimeErrorKind::TypeMismatch,
                    "bool can only be compared with bool",
                    pc,
                )),
                (Nil, Nil) => Ok(true),
                (I64(a), I64(b)) => Ok(a == b),
                (F64(a), F64(b)) => Ok(a == b),
                (I64(a), F64(b)) | (F64(b), I64(a)) => Ok(a as f64 == b),
                (Dyn(a), Dyn(b)) => Ok(string_eq(&self.heap, a, b)),
                _ => Ok(false),
            },
            OpCode::Lt | OpCode::Le => {
                let a = as_f64(lhs).ok_or_else(|| {
                    self.runtime_err(RuntimeErrorKind::TypeMismatch, "relational operands must be numeric", pc)
                })?;
                let b = as_f64(rhs).ok_or_else(|| {
                    self.runtime_err(RuntimeErrorKind::TypeMismatch, "relational operands must be numeric", pc)
                })?;
                Ok(if op == OpCode::Lt { a < b } else { a <= b })
            }
            _ => unreachable!("compare called with non-comparison op"),
        }
    }

    fn obj_set(&mut self, obj: Value, key: Value, val: Value, pc: u32) -> Result<(), RuntimeError> {
        let table_ref = self.expect_table(obj, pc)?;
        let key_str = key
            .as_str(&self.heap)
            .ok_or_else(|| self.runtime_err(RuntimeErrorKind::TypeMismatch, "table key must be a string", pc))?
            .to_string();
        let dup_val = self.heap.dup(val);
        let old = match self.heap.get_mut(table_ref) {
            Some(HeapObject {
                kind: ObjKind::Table(map),
                ..
            }) => map.insert(key_str, dup_val),
            _ => None,
        };
        if let Some(old_val) = old {
            self.heap.drop_value(old_val);
        }
        Ok(())
    }

    fn obj_get(&mut self, obj: Value, key: Value, pc: u32) -> Result<Value, RuntimeError> {
        let table_ref = self.expect_table(obj, pc)?;
        let key_str = key
            .as_str(&self.heap)
            .ok_or_else(|| self.runtime_err(RuntimeErrorKind::TypeMismatch, "table key must be a string", pc))?;
        let found = match self.heap.get(table_ref) {
            Some(HeapObject {
                kind: ObjKind::Table(map),
                ..
            }) => map.get(key_str).copied(),
            _ => None,
        };
        match found {
            Some(v) => Ok(self.heap.dup(v)),
            None => Ok(Value::Nil),
        }
    }

    fn expect_table(&self, v: Value, pc: u32) -> Result<HeapRef, RuntimeError> {
        if let Value::Dyn(r) = v {
            if matches!(self.heap.get(r).map(|o| &o.kind), Some(ObjKind::Table(_))) {
                return Ok(r);
            }
        }
        Err(self.runtime_err(RuntimeErrorKind::TypeMismatch, "operand is not a table", pc))
    }

    fn dump_stack(&self, proto: &Prototype, pc: u32) {
        let frame = self.frames.last().expect("active frame");
        tracing::debug!(
            proto = %proto.name,
            pc,
            bottom = frame.bottom,
            size = frame.size,
            "stack dump"
        );
        for i in 0..frame.size {
            let v = self.stack[(frame.bottom + i) as usize];
            tracing::debug!(reg = i, value = %v.display(&self.heap), "  reg");
        }
    }
}

fn as_f64(v: Value) -> Option<f64> {
    match v {
        Value::I64(n) => Some(n as f64),
        Value::F64(n) => Some(n),
        _ => None,
    }
}

fn string_eq(heap: &Heap, a: HeapRef, b: HeapRef) -> bool {
    match (heap.get(a).map(|o| &o.kind), heap.get(b).map(|o| &o.kind)) {
        (Some(ObjKind::String(x)), Some(ObjKind::String(y))) => x == y,
        _ => a == b,
    }
}

/// A minimal opaque host payload, useful for embedders that don't need a
/// custom `HostUserData` impl of their own.
pub struct OpaqueUserData {
    pub type_name: String,
    pub text: String,
}

impl HostUserData for OpaqueUserData {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn display(&self) -> String {
        self.text.clone()
    }
}
