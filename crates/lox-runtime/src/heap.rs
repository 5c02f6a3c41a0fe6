//! Object heap, string interner, and mark-sweep collector
//!
//! All heap objects live in one slot vector and are addressed by `ObjRef`
//! handles. A free list recycles vacated slots, so a live object occupies
//! exactly one slot and sweeping is a single walk over the vector.
//!
//! The heap tracks an estimated byte count through the single allocation
//! choke point; when it crosses the `next_gc` threshold the VM (which owns
//! the roots) runs a collection. Marking uses an explicit gray worklist:
//! `mark_*` turns an object gray, `trace_references` blackens until the
//! worklist is empty, and `sweep` frees everything still white.

use crate::object::{hash_string, Obj, ObjKind, ObjString};
use crate::table::Table;
use crate::value::{format_number, Value};

/// Collection threshold multiplier applied after every sweep
const HEAP_GROW_FACTOR: usize = 2;

/// First collection fires once this many bytes are live
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

/// Handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

#[derive(Debug)]
struct Slot {
    obj: Obj,
    marked: bool,
    /// Footprint recorded at allocation; freed symmetrically so the byte
    /// counter stays consistent even when an object grows afterwards
    size: usize,
}

/// Object heap with intern table and collector state
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    /// Interned strings, keyed by content hash; weak — unmarked entries are
    /// pruned before every sweep
    strings: Table,
    gray: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
    /// Print collection activity to stderr
    pub log_gc: bool,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            log_gc: false,
        }
    }

    // === Allocation ===

    /// Allocate a new object and return its handle
    ///
    /// This is the only way objects enter the heap. The caller is
    /// responsible for running a collection first if it wants one; by the
    /// time the object exists it is unreachable garbage until stored.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = obj.heap_size();
        self.bytes_allocated += size;
        let slot = Slot {
            obj,
            marked: false,
            size,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Intern a string: return the existing handle for this content or
    /// allocate and register a new one
    pub fn intern(&mut self, text: &str) -> ObjRef {
        let hash = hash_string(text);
        if let Some(existing) = self
            .strings
            .find_key_by(hash, |key| self.string(key).chars.as_ref() == text)
        {
            return existing;
        }
        let r = self.alloc(Obj::String(ObjString {
            chars: text.into(),
            hash,
        }));
        self.strings.set(r, hash, Value::Nil);
        r
    }

    /// True once the live estimate has crossed the collection threshold
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    // === Access ===

    pub fn get(&self, r: ObjRef) -> &Obj {
        &self.slot(r).obj
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        &mut self.slot_mut(r).obj
    }

    pub fn kind(&self, r: ObjRef) -> ObjKind {
        self.get(r).kind()
    }

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.get(r) {
            Obj::String(s) => s,
            other => unreachable!("expected string, found {:?}", other.kind()),
        }
    }

    pub fn function(&self, r: ObjRef) -> &crate::object::ObjFunction {
        match self.get(r) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, found {:?}", other.kind()),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjFunction {
        match self.get_mut(r) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, found {:?}", other.kind()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &crate::object::ObjClosure {
        match self.get(r) {
            Obj::Closure(c) => c,
            other => unreachable!("expected closure, found {:?}", other.kind()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjClosure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            other => unreachable!("expected closure, found {:?}", other.kind()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &crate::object::ObjUpvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("expected upvalue, found {:?}", other.kind()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjUpvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("expected upvalue, found {:?}", other.kind()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &crate::object::ObjClass {
        match self.get(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {:?}", other.kind()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjClass {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, found {:?}", other.kind()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &crate::object::ObjInstance {
        match self.get(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, found {:?}", other.kind()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut crate::object::ObjInstance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, found {:?}", other.kind()),
        }
    }

    pub fn bound_method(&self, r: ObjRef) -> &crate::object::ObjBoundMethod {
        match self.get(r) {
            Obj::BoundMethod(b) => b,
            other => unreachable!("expected bound method, found {:?}", other.kind()),
        }
    }

    pub fn native_fn(&self, r: ObjRef) -> crate::object::NativeFn {
        match self.get(r) {
            Obj::Native(n) => n.function,
            other => unreachable!("expected native, found {:?}", other.kind()),
        }
    }

    // === Statistics ===

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Iterate live objects; used by tooling and tests
    pub fn objects(&self) -> impl Iterator<Item = (ObjRef, &Obj)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|entry| (ObjRef(index as u32), &entry.obj))
            })
    }

    // === Marking ===

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        let slot = self.slot_mut(r);
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    /// Mark every key and value of an externally-owned table (the globals)
    pub fn mark_table(&mut self, table: &Table) {
        let entries: Vec<(ObjRef, Value)> = table.iter().map(|(k, _, v)| (k, v)).collect();
        for (key, value) in entries {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    /// Drain the gray worklist, blackening each object
    pub fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Mark everything an object refers to
    fn blacken(&mut self, r: ObjRef) {
        let mut children: Vec<Value> = Vec::new();
        match self.get(r) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    children.push(Value::Obj(name));
                }
                children.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                children.push(Value::Obj(c.function));
                children.extend(c.upvalues.iter().map(|&u| Value::Obj(u)));
            }
            // Safe while still open: `Closed` simply is not there yet.
            Obj::Upvalue(u) => {
                if let crate::object::UpvalueState::Closed(value) = u.state {
                    children.push(value);
                }
            }
            Obj::Class(c) => {
                children.push(Value::Obj(c.name));
                for (key, _, value) in c.methods.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::Instance(i) => {
                children.push(Value::Obj(i.class));
                for (key, _, value) in i.fields.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::BoundMethod(b) => {
                children.push(b.receiver);
                children.push(Value::Obj(b.method));
            }
        }
        for child in children {
            self.mark_value(child);
        }
    }

    // === Reclamation ===

    /// Drop intern-table entries whose strings were not marked
    ///
    /// Must run after tracing and before sweep: the table holds its keys
    /// weakly, and sweep would otherwise free strings it still points at.
    pub fn remove_unmarked_strings(&mut self) {
        let slots = &self.slots;
        self.strings.delete_where(|key| {
            !slots[key.0 as usize]
                .as_ref()
                .expect("interned string already freed")
                .marked
        });
    }

    /// Free every unmarked object, clear marks on survivors, and raise the
    /// collection threshold
    pub fn sweep(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.marked => entry.marked = false,
                Some(entry) => {
                    self.bytes_allocated -= entry.size;
                    *slot = None;
                    self.free.push(index as u32);
                }
                None => {}
            }
        }
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
    }

    // === Printing ===

    /// Canonical textual form of a value, resolving object handles
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(r) => self.format_object(r),
        }
    }

    fn format_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            Obj::String(s) => s.chars.to_string(),
            Obj::Function(f) => self.format_function_name(f.name),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Closure(c) => self.format_function_name(self.function(c.function).name),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => self.string(c.name).chars.to_string(),
            Obj::Instance(i) => {
                let class = self.class(i.class);
                format!("{} instance", self.string(class.name).chars)
            }
            Obj::BoundMethod(b) => {
                let closure = self.closure(b.method);
                self.format_function_name(self.function(closure.function).name)
            }
        }
    }

    /// `<fn name>`, or `<script>` for the top-level function
    pub fn format_function_name(&self, name: Option<ObjRef>) -> String {
        match name {
            Some(n) => format!("<fn {}>", self.string(n).chars),
            None => "<script>".to_string(),
        }
    }

    fn slot(&self, r: ObjRef) -> &Slot {
        self.slots[r.0 as usize]
            .as_ref()
            .expect("use of freed object")
    }

    fn slot_mut(&mut self, r: ObjRef) -> &mut Slot {
        self.slots[r.0 as usize]
            .as_mut()
            .expect("use of freed object")
    }
}
