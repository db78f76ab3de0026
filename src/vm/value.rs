//! The tagged `Value` union: `nil | bool | f64 | i64 | dyn`.

use super::heap::Heap;

/// A runtime value. Primitives are inline (plain-old-data); `Dyn` carries an
/// index into the owning `State`'s heap arena in place of a pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    I64(i64),
    F64(f64),
    Dyn(super::heap::HeapRef),
}

impl Value {
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Dyn(r) => heap.get(*r).map_or("freed", |o| o.type_name()),
        }
    }

    pub fn display(&self, heap: &Heap) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::I64(n) => n.to_string(),
            Value::F64(n) => n.to_string(),
            Value::Dyn(r) => heap.get(*r).map_or("<freed>".to_string(), |o| o.display()),
        }
    }

    pub fn as_str<'a>(&self, heap: &'a Heap) -> Option<&'a str> {
        if let Value::Dyn(r) = self {
            if let Some(obj) = heap.get(*r) {
                if let super::heap::ObjKind::String(s) = &obj.kind {
                    return Some(s.as_str());
                }
            }
        }
        None
    }

    pub fn is_callable(&self, heap: &Heap) -> bool {
        matches!(self, Value::Dyn(r) if matches!(
            heap.get(*r).map(|o| &o.kind),
            Some(super::heap::ObjKind::Function(_))
        ))
    }
}
