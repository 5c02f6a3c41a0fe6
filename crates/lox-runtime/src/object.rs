//! Heap object variants
//!
//! Every reference value lives in one of these shapes. Objects refer to each
//! other through `ObjRef` handles, never by ownership, so arbitrary cycles
//! (instance → class → method closure → upvalue → instance) are fine; the
//! collector terminates on mark bits.

use crate::bytecode::Chunk;
use crate::heap::ObjRef;
use crate::table::Table;
use crate::value::Value;

/// Host-provided callable
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A heap object
#[derive(Debug)]
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

/// Discriminant for dispatching without borrowing the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

impl Obj {
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Function(_) => ObjKind::Function,
            Obj::Native(_) => ObjKind::Native,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Upvalue(_) => ObjKind::Upvalue,
            Obj::Class(_) => ObjKind::Class,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
        }
    }

    /// Estimated heap footprint in bytes, used for collection pacing
    pub fn heap_size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.capacity()
                    + f.chunk.lines.capacity() * std::mem::size_of::<u32>()
                    + f.chunk.constants.capacity() * std::mem::size_of::<Value>()
            }
            Obj::Native(_) => 0,
            Obj::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            Obj::Upvalue(_) => 0,
            Obj::Class(c) => c.methods.capacity_bytes(),
            Obj::Instance(i) => i.fields.capacity_bytes(),
            Obj::BoundMethod(_) => 0,
        }
    }
}

/// Interned string: owned bytes plus the precomputed FNV-1a hash
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// Compiled function: the chunk plus its calling metadata
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: usize,
    /// Number of upvalues each closure over this function captures
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Interned name; `None` for the top-level script
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

#[derive(Debug)]
pub struct ObjNative {
    pub function: NativeFn,
}

/// Runtime function: shares its `ObjFunction` with every closure over it
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    /// One entry per declared upvalue of the function
    pub upvalues: Vec<ObjRef>,
}

/// Indirection cell for a captured variable
///
/// Open while the captured stack slot is live; closed once the value has
/// been copied into the cell's own storage.
#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

#[derive(Debug)]
pub enum UpvalueState {
    /// Index of the captured slot on the value stack
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    /// Method name → closure; flattened down the inheritance chain at
    /// declaration time
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method extracted from an instance, carrying its receiver
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/// FNV-1a, 32-bit
pub fn hash_string(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(hash_string(""), 2166136261);
        assert_eq!(hash_string("a"), 0xe40c292c);
        assert_eq!(hash_string("foobar"), 0xbf9cf968);
    }

    #[test]
    fn kind_matches_variant() {
        let s = Obj::String(ObjString {
            chars: "x".into(),
            hash: hash_string("x"),
        });
        assert_eq!(s.kind(), ObjKind::String);
    }
}
