//! The reference-counted heap arena backing every `dyn`-tagged value.
//!
//! Every heap object in the language is conceptually preceded by a fixed
//! header (subtype tag, refcount, `is_const` flag). Rust has no safe way to
//! place such a header immediately before an arbitrary payload in memory, so
//! the header lives alongside the payload inside an arena slot, addressed by
//! an opaque index that stands in for the "pointer" the data model talks
//! about.

use indexmap::IndexMap;

use super::bytecode::Prototype;
use super::value::Value;

/// An index into a `Heap`'s arena. Stands in for the opaque pointer the data
/// model describes; never dereferenced directly by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjTag {
    String,
    Table,
    Function,
    Error,
    User,
}

pub struct Header {
    pub tag: ObjTag,
    pub refcount: u32,
    pub is_const: bool,
}

pub enum Func {
    Script(Prototype),
    Host(super::machine::NativeFn),
}

pub trait HostUserData {
    fn type_name(&self) -> &str;
    fn display(&self) -> String;
}

pub enum ObjKind {
    String(String),
    Table(IndexMap<String, Value>),
    Function(Func),
    Error(String),
    User(Box<dyn HostUserData>),
}

pub struct HeapObject {
    pub header: Header,
    pub kind: ObjKind,
}

impl HeapObject {
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ObjKind::String(_) => "string",
            ObjKind::Table(_) => "table",
            ObjKind::Function(_) => "function",
            ObjKind::Error(_) => "error",
            ObjKind::User(_) => "user",
        }
    }

    pub fn display(&self) -> String {
        match &self.kind {
            ObjKind::String(s) => s.clone(),
            ObjKind::Table(map) => format!("<table with {} entries>", map.len()),
            ObjKind::Function(Func::Script(p)) => format!("<function {}>", p.name),
            ObjKind::Function(Func::Host(f)) => format!("<native function {}>", f.name),
            ObjKind::Error(msg) => format!("<error: {}>", msg),
            ObjKind::User(u) => u.display(),
        }
    }
}

/// A refcounted arena of heap objects. Owned by exactly one `State`.
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free_list: Vec<usize>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            free_list: Vec::new(),
        }
    }

    fn insert(&mut self, kind: ObjKind, tag: ObjTag, is_const: bool) -> HeapRef {
        let obj = HeapObject {
            header: Header {
                tag,
                refcount: 1,
                is_const,
            },
            kind,
        };
        if let Some(idx) = self.free_list.pop() {
            self.objects[idx] = Some(obj);
            HeapRef(idx)
        } else {
            self.objects.push(Some(obj));
            HeapRef(self.objects.len() - 1)
        }
    }

    pub fn alloc_string(&mut self, s: String) -> HeapRef {
        self.insert(ObjKind::String(s), ObjTag::String, false)
    }

    /// Allocate a string whose refcount never reaches zero through normal
    /// `drop` traffic — used for constant-pool members (§3 invariant 3).
    pub fn alloc_const_string(&mut self, s: String) -> HeapRef {
        self.insert(ObjKind::String(s), ObjTag::String, true)
    }

    pub fn alloc_table(&mut self) -> HeapRef {
        self.insert(
            ObjKind::Table(IndexMap::new()),
            ObjTag::Table,
            false,
        )
    }

    pub fn alloc_error(&mut self, msg: String) -> HeapRef {
        self.insert(ObjKind::Error(msg), ObjTag::Error, false)
    }

    pub fn alloc_function_script(&mut self, proto: Prototype) -> HeapRef {
        self.insert(
            ObjKind::Function(Func::Script(proto)),
            ObjTag::Function,
            false,
        )
    }

    pub fn alloc_function_host(&mut self, f: super::machine::NativeFn) -> HeapRef {
        self.insert(ObjKind::Function(Func::Host(f)), ObjTag::Function, false)
    }

    pub fn alloc_user(&mut self, data: Box<dyn HostUserData>) -> HeapRef {
        self.insert(ObjKind::User(data), ObjTag::User, false)
    }

    pub fn get(&self, r: HeapRef) -> Option<&HeapObject> {
        self.objects.get(r.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, r: HeapRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(r.0).and_then(|slot| slot.as_mut())
    }

    /// Increment the refcount of `v` if it is a heap value. `is_const`
    /// objects never need bookkeeping — their count is meaningless.
    pub fn dup(&mut self, v: Value) -> Value {
        if let Value::Dyn(r) = v {
            if let Some(obj) = self.get_mut(r) {
                if !obj.header.is_const {
                    obj.header.refcount += 1;
                }
            }
        }
        v
    }

    /// Decrement the refcount of `v` if it is a heap value, destroying it
    /// (and recursively dropping anything it owns) once the count reaches
    /// zero.
    pub fn drop_value(&mut self, v: Value) {
        if let Value::Dyn(r) = v {
            self.release(r);
        }
    }

    fn release(&mut self, r: HeapRef) {
        let should_free = match self.get_mut(r) {
            Some(obj) if obj.header.is_const => false,
            Some(obj) => {
                debug_assert!(obj.header.refcount > 0, "refcount underflow on {:?}", r);
                obj.header.refcount -= 1;
                obj.header.refcount == 0
            }
            None => false,
        };
        if should_free {
            if let Some(slot) = self.objects.get_mut(r.0) {
                if let Some(obj) = slot.take() {
                    self.free_list.push(r.0);
                    self.destroy(obj);
                }
            }
        }
    }

    fn destroy(&mut self, obj: HeapObject) {
        match obj.kind {
            ObjKind::String(_) => {}
            ObjKind::Table(map) => {
                for (_, v) in map {
                    self.drop_value(v);
                }
            }
            ObjKind::Function(Func::Script(proto)) => {
                for c in proto.constants {
                    self.drop_value(c);
                }
            }
            ObjKind::Function(Func::Host(_)) => {}
            ObjKind::Error(_) => {}
            ObjKind::User(_) => {}
        }
    }

    /// Number of still-live (non-freed) heap objects. Used by tests asserting
    /// no leaks after a `State` finishes a program (§8 property 3).
    pub fn live_count(&self) -> usize {
        self.objects.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
