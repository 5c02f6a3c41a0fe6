//! Single-pass bytecode compiler
//!
//! A Pratt parser that emits bytecode directly as it parses: no AST is
//! built. The parser owns a stack of per-function compilation states (one
//! per nested `fun`), each tracking its locals, scope depth, and captured
//! upvalues; identifier resolution walks that stack outward and falls back
//! to a global access.
//!
//! Errors are collected rather than thrown: on a parse error the compiler
//! records a diagnostic, discards tokens until a statement boundary, and
//! keeps going so one compile reports as many errors as possible. No
//! bytecode from a failed compile is ever executed.

mod expr;
mod stmt;

use std::fmt;

use thiserror::Error;

use crate::bytecode::{Chunk, Opcode};
use crate::heap::{Heap, ObjRef};
use crate::lexer::Lexer;
use crate::object::{Obj, ObjFunction};
use crate::token::{Token, TokenKind};
use crate::value::Value;

/// Hard per-function limits imposed by single-byte operands
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_CONSTANTS: usize = 256;

/// Compile source to a top-level function of arity 0
///
/// The returned function's chunk runs at module scope. All strings and
/// functions the compiler creates are allocated on the given heap.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<CompileError>> {
    let mut parser = Parser::new(source, heap);
    parser.advance();
    while !parser.match_kind(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_function();
    if parser.errors.is_empty() {
        Ok(function)
    } else {
        Err(parser.errors)
    }
}

/// Where a compile error points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// At end of input
    End,
    /// At a source token
    Lexeme(String),
    /// The token itself was a lexical error; the message says it all
    None,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLocation::End => write!(f, " at end"),
            ErrorLocation::Lexeme(lexeme) => write!(f, " at '{}'", lexeme),
            ErrorLocation::None => Ok(()),
        }
    }
}

/// A compile-time diagnostic
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[line {line}] Error{at}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub at: ErrorLocation,
    pub message: String,
}

/// What kind of function body is being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    /// Synthetic top-level function
    Script,
    Function,
    Method,
    /// `init` methods: implicit return of `this`, explicit value forbidden
    Initializer,
}

/// A local variable slot
#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while declared but not yet initialized
    depth: i32,
    /// Set when a nested function captures this slot; scope exit then emits
    /// a close instead of a plain pop
    is_captured: bool,
}

/// Compile-time description of one captured variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    /// Captured from the enclosing function's locals, as opposed to
    /// relayed from the enclosing function's own upvalues
    is_local: bool,
}

/// Per-function compilation state, pushed when entering a nested function
#[derive(Debug)]
struct FunctionState<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 belongs to the closure itself, or to `this` in methods.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        Self {
            function: ObjFunction::new(name),
            kind,
            locals: vec![Local {
                name: slot_zero,
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Per-class compilation state, for `this`/`super` validity checks
#[derive(Debug)]
struct ClassState {
    has_superclass: bool,
}

/// Parser and code generator state
struct Parser<'src, 'h> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    heap: &'h mut Heap,
    /// Nested function states, innermost last
    functions: Vec<FunctionState<'src>>,
    /// Nested class declarations, innermost last
    classes: Vec<ClassState>,
    errors: Vec<CompileError>,
    /// Suppresses cascading diagnostics until the next synchronization point
    panic_mode: bool,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: Token::synthetic(""),
            previous: Token::synthetic(""),
            heap,
            functions: vec![FunctionState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            errors: Vec::new(),
            panic_mode: false,
        }
    }

    // === Token plumbing ===

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            match self.current.kind {
                TokenKind::Error(message) => self.error_at_current(message),
                _ => break,
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    // === Error reporting ===

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let at = match token.kind {
            TokenKind::Eof => ErrorLocation::End,
            TokenKind::Error(_) => ErrorLocation::None,
            _ => ErrorLocation::Lexeme(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            at,
            message: message.to_string(),
        });
    }

    /// Discard tokens until a likely statement boundary
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // === Code emission ===

    fn state(&self) -> &FunctionState<'src> {
        self.functions.last().expect("no active function state")
    }

    fn state_mut(&mut self) -> &mut FunctionState<'src> {
        self.functions.last_mut().expect("no active function state")
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    fn chunk_len(&self) -> usize {
        self.state().function.chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: Opcode) {
        self.emit_byte(op.into());
    }

    fn emit_ops(&mut self, first: Opcode, second: Opcode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_op_byte(&mut self, op: Opcode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    /// Emit a forward jump with a placeholder offset; returns the operand
    /// position for later patching
    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 accounts for the operand itself.
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.chunk_mut().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xFF) as u8);
    }

    /// Safety suffix for every function body; initializers return `this`
    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit_op_byte(Opcode::GetLocal, 0);
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.emit_op(Opcode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if self.state().function.chunk.constants.len() >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.chunk_mut().add_constant(value) as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_byte(Opcode::Constant, index);
    }

    /// Intern an identifier and install it in the constant pool
    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.intern(name);
        self.make_constant(Value::Obj(interned))
    }

    /// Seal the innermost function: emit its return suffix, pop its state,
    /// and allocate the finished function object
    fn end_function(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = self.functions.pop().expect("no active function state");
        let upvalues = state.upvalues;
        let function = self.heap.alloc(Obj::Function(state.function));
        (function, upvalues)
    }

    // === Scopes and variables ===

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    /// Pop locals belonging to the closed scope; captured slots are closed
    /// into their upvalues instead of plainly popped
    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;
        loop {
            let captured = {
                let state = self.state();
                match state.locals.last() {
                    Some(local) if local.depth > state.scope_depth => Some(local.is_captured),
                    _ => None,
                }
            };
            match captured {
                Some(true) => self.emit_op(Opcode::CloseUpvalue),
                Some(false) => self.emit_op(Opcode::Pop),
                None => break,
            }
            self.state_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    /// Reserve storage for the variable named by the previous token
    ///
    /// Globals are late-bound by name; locals claim a slot now but stay
    /// uninitialized (depth -1) until the initializer has run.
    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        {
            let state = self.state();
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        state
            .locals
            .last_mut()
            .expect("no local to mark initialized")
            .depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(Opcode::DefineGlobal, global);
    }

    /// Find `name` among the locals of the function at `function_index`
    fn resolve_local(&mut self, function_index: usize, name: &str) -> Option<u8> {
        let mut found = None;
        let mut in_initializer = false;
        for (slot, local) in self.functions[function_index]
            .locals
            .iter()
            .enumerate()
            .rev()
        {
            if local.name == name {
                in_initializer = local.depth == -1;
                found = Some(slot as u8);
                break;
            }
        }
        if in_initializer {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    /// Find `name` in an enclosing function, threading it inward as a chain
    /// of upvalues
    fn resolve_upvalue(&mut self, function_index: usize, name: &str) -> Option<u8> {
        if function_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(function_index - 1, name) {
            self.functions[function_index - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(function_index, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(function_index - 1, name) {
            return Some(self.add_upvalue(function_index, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, function_index: usize, index: u8, is_local: bool) -> u8 {
        let desc = UpvalueDesc { index, is_local };
        let state = &self.functions[function_index];
        if let Some(existing) = state.upvalues.iter().position(|&u| u == desc) {
            return existing as u8;
        }
        if state.upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let state = &mut self.functions[function_index];
        state.upvalues.push(desc);
        state.function.upvalue_count += 1;
        (state.upvalues.len() - 1) as u8
    }

    /// Compile a read of, or assignment to, a named variable
    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.functions.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, name) {
            (Opcode::GetLocal, Opcode::SetLocal, slot)
        } else if let Some(upvalue) = self.resolve_upvalue(top, name) {
            (Opcode::GetUpvalue, Opcode::SetUpvalue, upvalue)
        } else {
            let index = self.identifier_constant(name);
            (Opcode::GetGlobal, Opcode::SetGlobal, index)
        };

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // === Declarations ===

    fn declaration(&mut self) {
        if self.match_kind(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_kind(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_kind(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized eagerly so the body can recurse into itself.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a function body in a fresh compilation state and emit the
    /// closure that captures it
    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.functions.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.state_mut().function.arity += 1;
                if self.state().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let index = self.make_constant(Value::Obj(function));
        self.emit_op_byte(Opcode::Closure, index);
        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(self.previous.lexeme);
        self.declare_variable();

        self.emit_op_byte(Opcode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_kind(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.named_variable(self.previous.lexeme, false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // `super` lives in a synthetic scope around the class body so
            // each method captures it as an ordinary upvalue.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name.lexeme, false);
            self.emit_op(Opcode::Inherit);
            self.classes
                .last_mut()
                .expect("no active class state")
                .has_superclass = true;
        }

        self.named_variable(class_name.lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(Opcode::Pop);

        if self.classes.last().expect("no active class state").has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_op_byte(Opcode::Method, constant);
    }
}
