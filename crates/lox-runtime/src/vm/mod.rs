//! Stack-based virtual machine
//!
//! Executes bytecode with a value stack and a stack of call frames. The
//! dispatch loop is a plain opcode match; the instruction pointer lives in
//! the current frame and is written back before anything that can push or
//! pop frames.
//!
//! Every allocation made while the loop runs is a collection safepoint:
//! values that must survive an allocation are pushed onto the value stack
//! (and so become roots) first.

mod frame;
mod gc;
mod natives;

pub use frame::CallFrame;

use std::fmt;
use std::io::{self, Write};

use crate::bytecode::{self, Opcode};
use crate::compiler::compile;
use crate::heap::{Heap, ObjRef};
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjKind, ObjNative,
    ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::Value;
use crate::LoxError;

/// Maximum call depth
pub const FRAMES_MAX: usize = 64;
/// Maximum value-stack depth: one full window of 256 slots per frame
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// Runtime configuration toggles
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Collect on every allocation instead of on threshold
    pub gc_stress: bool,
    /// Log collection activity to stderr
    pub gc_log: bool,
    /// Print each instruction and the stack before dispatching it
    pub trace_execution: bool,
}

/// A runtime failure: the message plus one trace entry per live frame,
/// innermost first
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

/// One stack-trace entry
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// `name()`, or `script` for the top level
    pub function: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.trace {
            write!(f, "\n[line {}] in {}", frame.line, frame.function)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Virtual machine state
///
/// Owns the heap, so globals and interned strings persist across
/// `interpret` calls; the value and frame stacks are re-initialized on each
/// entry.
pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Upvalues still pointing into the stack, sorted by descending slot;
    /// at most one per slot
    open_upvalues: Vec<ObjRef>,
    /// Interned `"init"`, looked up on every class call
    init_string: ObjRef,
    options: VmOptions,
    /// Where `print` writes; swappable so tests capture output
    output: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new();
        heap.log_gc = options.gc_log;
        let init_string = heap.intern("init");
        let mut vm = Self {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            options,
            output: Box::new(io::stdout()),
        };
        vm.define_native("clock", natives::clock);
        vm
    }

    /// Redirect `print` output (tests capture it; the CLI keeps stdout)
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Register a host callable under `name` in the globals table
    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name = self.intern(name);
        // Both objects are kept on the stack across the allocations so a
        // stress-mode collection cannot reclaim them mid-registration.
        self.stack.push(Value::Obj(name));
        let native = self.alloc(Obj::Native(ObjNative { function }));
        self.stack.push(Value::Obj(native));
        let hash = self.heap.string(name).hash;
        self.globals.set(name, hash, Value::Obj(native));
        self.stack.pop();
        self.stack.pop();
    }

    /// Compile and run a source string
    ///
    /// Globals and interned strings persist across calls; the stacks start
    /// fresh each time, so a runtime error in one call does not poison the
    /// next.
    pub fn interpret(&mut self, source: &str) -> Result<(), LoxError> {
        let function = compile(source, &mut self.heap).map_err(LoxError::Compile)?;

        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        self.stack.push(Value::Obj(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.pop();
        self.stack.push(Value::Obj(closure));
        self.call(closure, 0).map_err(LoxError::Runtime)?;
        self.run().map_err(LoxError::Runtime)
    }

    // === Introspection (tests and tooling) ===

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    // === Allocation safepoints ===

    fn maybe_collect(&mut self) {
        if self.options.gc_stress || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.maybe_collect();
        self.heap.alloc(obj)
    }

    fn intern(&mut self, text: &str) -> ObjRef {
        self.maybe_collect();
        self.heap.intern(text)
    }

    // === Stack and instruction-stream helpers ===

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let ip = frame.ip;
        frame.ip += 1;
        let function = frame.function;
        self.heap.function(function).chunk.code[ip]
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_op(&mut self) -> Opcode {
        let byte = self.read_byte();
        Opcode::try_from(byte).expect("corrupt bytecode: unknown opcode")
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let function = self.frames.last().expect("no active frame").function;
        self.heap.function(function).chunk.constants[index]
    }

    fn read_string_constant(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            other => unreachable!("name constant is not a string: {:?}", other),
        }
    }

    /// Build a runtime error carrying the current stack trace
    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.function(frame.function);
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => format!("{}()", self.heap.string(n).chars),
                None => "script".to_string(),
            };
            trace.push(TraceFrame {
                line,
                function: name,
            });
        }
        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // === Dispatch loop ===

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.stack.len() > STACK_MAX {
                return Err(self.runtime_error("Stack overflow."));
            }
            if self.options.trace_execution {
                self.trace_instruction();
            }

            let op = self.read_op();
            match op {
                Opcode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                Opcode::Nil => self.push(Value::Nil),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Pop => {
                    self.pop();
                }

                Opcode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active frame").slot_base;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                Opcode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no active frame").slot_base;
                    // Assignment is an expression; the value stays on top.
                    let value = self.peek(0);
                    self.stack[base + slot] = value;
                }
                Opcode::GetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let message =
                                format!("Undefined variable '{}'.", self.heap.string(name).chars);
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                Opcode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                Opcode::SetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    // Assignment never creates a binding; undo and fail if it
                    // turned out to be new.
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        let message =
                            format!("Undefined variable '{}'.", self.heap.string(name).chars);
                        return Err(self.runtime_error(message));
                    }
                }

                Opcode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[index];
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                Opcode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().expect("no active frame").closure;
                    let upvalue = self.heap.closure(closure).upvalues[index];
                    let value = self.peek(0);
                    let open_slot = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => Some(slot),
                        UpvalueState::Closed(_) => None,
                    };
                    match open_slot {
                        Some(slot) => self.stack[slot] = value,
                        None => self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value),
                    }
                }

                Opcode::GetProperty => {
                    let name = self.read_string_constant();
                    let instance = match self.peek(0) {
                        Value::Obj(r) if self.heap.kind(r) == ObjKind::Instance => r,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let hash = self.heap.string(name).hash;
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name)?;
                    }
                }
                Opcode::SetProperty => {
                    let name = self.read_string_constant();
                    let instance = match self.peek(1) {
                        Value::Obj(r) if self.heap.kind(r) == ObjKind::Instance => r,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let hash = self.heap.string(name).hash;
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                Opcode::GetSuper => {
                    let name = self.read_string_constant();
                    let superclass = match self.pop() {
                        Value::Obj(r) => r,
                        other => unreachable!("superclass is not an object: {:?}", other),
                    };
                    self.bind_method(superclass, name)?;
                }

                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Opcode::Greater
                | Opcode::Less
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide => {
                    self.numeric_binary(op)?;
                }
                Opcode::Add => {
                    self.add()?;
                }
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Opcode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    _ => return Err(self.runtime_error("Operand must be a number.")),
                },

                Opcode::Print => {
                    let value = self.pop();
                    let text = self.heap.format_value(value);
                    let _ = writeln!(self.output, "{}", text);
                }

                Opcode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("no active frame").ip += offset;
                }
                Opcode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("no active frame").ip += offset;
                    }
                }
                Opcode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("no active frame").ip -= offset;
                }

                Opcode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.peek(argc);
                    self.call_value(callee, argc)?;
                }
                Opcode::Invoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte() as usize;
                    self.invoke(name, argc)?;
                }
                Opcode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte() as usize;
                    let superclass = match self.pop() {
                        Value::Obj(r) => r,
                        other => unreachable!("superclass is not an object: {:?}", other),
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }

                Opcode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(r) => r,
                        other => unreachable!("closure constant is not a function: {:?}", other),
                    };
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    let closure = self.alloc(Obj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    // On the stack before the captures allocate, so a
                    // collection mid-capture sees it.
                    self.push(Value::Obj(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().expect("no active frame").slot_base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frames.last().expect("no active frame").closure;
                            self.heap.closure(enclosing).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                Opcode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                Opcode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return with no frame");
                    self.close_upvalues(frame.slot_base);
                    if self.frames.is_empty() {
                        // Pop the script closure; the stack is now empty.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }

                Opcode::Class => {
                    let name = self.read_string_constant();
                    let class = self.alloc(Obj::Class(ObjClass {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                Opcode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Obj(r) if self.heap.kind(r) == ObjKind::Class => r,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass = match self.peek(0) {
                        Value::Obj(r) => r,
                        other => unreachable!("subclass is not an object: {:?}", other),
                    };
                    // Flatten the parent's methods into the child now; later
                    // changes to the parent are invisible to the child.
                    let methods: Vec<(ObjRef, u32, Value)> =
                        self.heap.class(superclass).methods.iter().collect();
                    for (key, hash, value) in methods {
                        self.heap.class_mut(subclass).methods.set(key, hash, value);
                    }
                    self.pop();
                }
                Opcode::Method => {
                    let name = self.read_string_constant();
                    let method = self.peek(0);
                    let class = match self.peek(1) {
                        Value::Obj(r) => r,
                        other => unreachable!("method target is not a class: {:?}", other),
                    };
                    let hash = self.heap.string(name).hash;
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
            }
        }
    }

    fn numeric_binary(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.pop();
        self.pop();
        let result = match op {
            Opcode::Greater => Value::Bool(a > b),
            Opcode::Less => Value::Bool(a < b),
            Opcode::Subtract => Value::Number(a - b),
            Opcode::Multiply => Value::Number(a * b),
            Opcode::Divide => Value::Number(a / b),
            other => unreachable!("not a numeric binary op: {:?}", other),
        };
        self.push(result);
        Ok(())
    }

    /// `+` adds numbers or concatenates strings; the operand kinds must match
    fn add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b))
                if self.heap.kind(a) == ObjKind::String && self.heap.kind(b) == ObjKind::String =>
            {
                // Operands stay on the stack until after interning, which
                // can trigger a collection.
                let combined =
                    format!("{}{}", self.heap.string(a).chars, self.heap.string(b).chars);
                let result = self.intern(&combined);
                self.pop();
                self.pop();
                self.push(Value::Obj(result));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be two numbers or two strings.")),
        }
    }

    // === Call protocol ===

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeError> {
        if let Value::Obj(r) = callee {
            match self.heap.kind(r) {
                ObjKind::Closure => return self.call(r, argc),
                ObjKind::Native => {
                    let function = self.heap.native_fn(r);
                    let base = self.stack.len() - argc;
                    let result = function(&self.stack[base..])
                        .map_err(|message| self.runtime_error(message))?;
                    self.stack.truncate(base - 1);
                    self.push(result);
                    return Ok(());
                }
                ObjKind::Class => {
                    // The class is the callee at peek(argc), so it roots the
                    // fresh instance's class across this allocation.
                    let instance = self.alloc(Obj::Instance(ObjInstance {
                        class: r,
                        fields: Table::new(),
                    }));
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = Value::Obj(instance);

                    let init_hash = self.heap.string(self.init_string).hash;
                    let initializer = self.heap.class(r).methods.get(self.init_string, init_hash);
                    if let Some(Value::Obj(init)) = initializer {
                        return self.call(init, argc);
                    } else if argc != 0 {
                        let message = format!("Expected 0 arguments but got {}.", argc);
                        return Err(self.runtime_error(message));
                    }
                    return Ok(());
                }
                ObjKind::BoundMethod => {
                    let bound = self.heap.bound_method(r);
                    let (receiver, method) = (bound.receiver, bound.method);
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = receiver;
                    return self.call(method, argc);
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    /// Push a frame for a closure call
    fn call(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            let message = format!("Expected {} arguments but got {}.", arity, argc);
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slot_base: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    /// `receiver.name(args)` without materializing a bound method
    fn invoke(&mut self, name: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        let instance = match receiver {
            Value::Obj(r) if self.heap.kind(r) == ObjKind::Instance => r,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        // A field shadows a method of the same name.
        let hash = self.heap.string(name).hash;
        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => self.call(method, argc),
            _ => {
                let message = format!("Undefined property '{}'.", self.heap.string(name).chars);
                Err(self.runtime_error(message))
            }
        }
    }

    /// Look `name` up in a class's method table and leave a bound method on
    /// the stack in place of the receiver
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let hash = self.heap.string(name).hash;
        let method = match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => method,
            _ => {
                let message = format!("Undefined property '{}'.", self.heap.string(name).chars);
                return Err(self.runtime_error(message));
            }
        };
        let receiver = self.peek(0);
        let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    // === Upvalues ===

    /// Find or create the open upvalue for a stack slot
    ///
    /// The open list is kept sorted by descending slot with at most one
    /// entry per slot, so closures capturing the same variable share one
    /// cell.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            let open_slot = match self.heap.upvalue(upvalue).state {
                UpvalueState::Open(s) => s,
                UpvalueState::Closed(_) => unreachable!("closed upvalue in open list"),
            };
            if open_slot == slot {
                return upvalue;
            }
            if open_slot < slot {
                insert_at = i;
                break;
            }
        }
        let created = self.alloc(Obj::Upvalue(ObjUpvalue {
            state: UpvalueState::Open(slot),
        }));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Close every open upvalue at or above `from`: copy the stack value
    /// into the cell and drop it from the open list
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = match self.heap.upvalue(upvalue).state {
                UpvalueState::Open(s) => s,
                UpvalueState::Closed(_) => unreachable!("closed upvalue in open list"),
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // === Tracing ===

    fn trace_instruction(&self) {
        let mut line = String::from("          ");
        for value in &self.stack {
            line.push_str(&format!("[ {} ]", self.heap.format_value(*value)));
        }
        eprintln!("{}", line);
        let frame = self.frames.last().expect("no active frame");
        let (text, _) = bytecode::disassemble_instruction(&self.heap, frame.function, frame.ip);
        eprintln!("{}", text);
    }
}
