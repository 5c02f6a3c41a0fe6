//! Shared helpers for integration tests

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use lox_runtime::{CompileError, LoxError, RuntimeError, Vm, VmOptions};

/// `Write` sink backed by shared storage, so a test can hand the writer to
/// the VM and read back what `print` produced.
#[derive(Clone, Default)]
pub struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("print produced invalid UTF-8")
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run a program with the given options, returning its output and the VM
pub fn eval_vm(source: &str, options: VmOptions) -> (String, Vm) {
    let buffer = CaptureBuffer::default();
    let mut vm = Vm::with_options(options);
    vm.set_output(Box::new(buffer.clone()));
    if let Err(error) = vm.interpret(source) {
        panic!("program failed: {}\nsource:\n{}", error, source);
    }
    (buffer.contents(), vm)
}

/// Run a program and return its `print` output
pub fn eval(source: &str) -> String {
    eval_vm(source, VmOptions::default()).0
}

/// Run a program with the collector firing at every allocation
pub fn eval_stress(source: &str) -> String {
    eval_vm(
        source,
        VmOptions {
            gc_stress: true,
            ..VmOptions::default()
        },
    )
    .0
}

/// Run a program expected to fail at runtime; returns the error
pub fn runtime_error(source: &str) -> RuntimeError {
    let buffer = CaptureBuffer::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(buffer.clone()));
    match vm.interpret(source) {
        Err(LoxError::Runtime(error)) => error,
        Err(LoxError::Compile(errors)) => {
            panic!("expected runtime error, got compile errors: {:?}", errors)
        }
        Ok(()) => panic!("expected runtime error, program succeeded:\n{}", source),
    }
}

/// Compile a program expected to be rejected; returns the diagnostics
pub fn compile_errors(source: &str) -> Vec<CompileError> {
    let mut vm = Vm::new();
    match vm.interpret(source) {
        Err(LoxError::Compile(errors)) => errors,
        Err(LoxError::Runtime(error)) => {
            panic!("expected compile error, got runtime error: {}", error)
        }
        Ok(()) => panic!("expected compile error, program succeeded:\n{}", source),
    }
}

/// True if any diagnostic carries the given message
pub fn has_error(errors: &[CompileError], message: &str) -> bool {
    errors.iter().any(|e| e.message == message)
}
