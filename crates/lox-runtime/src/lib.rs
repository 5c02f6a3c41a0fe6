//! Lox: a single-pass bytecode compiler and stack-based virtual machine
//!
//! Source text compiles directly to bytecode — no AST — and runs on a
//! register-less stack machine with call frames, closures, classes with
//! single inheritance, and a mark-sweep garbage collector.
//!
//! The two entry points mirror the pipeline: [`compile`] turns source into
//! a top-level function, and [`Vm::interpret`] compiles and runs in one
//! call. A [`Vm`] persists globals and interned strings across `interpret`
//! calls, which is what a REPL wants:
//!
//! ```
//! use lox_runtime::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("var greeting = \"hello\";").unwrap();
//! vm.interpret("print greeting;").unwrap();
//! ```

pub mod bytecode;
pub mod compiler;
pub mod heap;
pub mod lexer;
pub mod object;
pub mod table;
pub mod token;
pub mod value;
pub mod vm;

use thiserror::Error;

pub use compiler::{compile, CompileError};
pub use heap::{Heap, ObjRef};
pub use value::Value;
pub use vm::{RuntimeError, Vm, VmOptions};

/// Everything that can go wrong between source text and completed execution
#[derive(Debug, Error)]
pub enum LoxError {
    /// One or more compile-time diagnostics; nothing was executed
    #[error("{}", render_compile_errors(.0))]
    Compile(Vec<CompileError>),
    /// Execution failed; carries the message and stack trace
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn render_compile_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
