//! Bytecode disassembler
//!
//! Renders chunks in a columnar listing: byte offset, source line (`|` when
//! unchanged), opcode name, operands, and resolved constant values.

use super::Opcode;
use crate::heap::{Heap, ObjRef};
use crate::value::Value;

/// Disassemble a function's chunk, then recurse into the functions in its
/// constant pool so a whole compiled script dumps in one call
pub fn disassemble(heap: &Heap, function: ObjRef) -> String {
    let mut out = String::new();
    let name = heap.format_function_name(heap.function(function).name);
    out.push_str(&format!("== {} ==\n", name));

    let mut offset = 0;
    while offset < heap.function(function).chunk.code.len() {
        let (line, next) = disassemble_instruction(heap, function, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }

    for &constant in &heap.function(function).chunk.constants {
        if let Value::Obj(r) = constant {
            if let crate::object::Obj::Function(_) = heap.get(r) {
                out.push('\n');
                out.push_str(&disassemble(heap, r));
            }
        }
    }
    out
}

/// Disassemble one instruction; returns the rendered line and the offset of
/// the next instruction
pub fn disassemble_instruction(heap: &Heap, function: ObjRef, offset: usize) -> (String, usize) {
    let chunk = &heap.function(function).chunk;
    let mut line = format!("{:04} ", offset);
    if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        line.push_str("   | ");
    } else {
        line.push_str(&format!("{:4} ", chunk.line_at(offset)));
    }

    let op = match Opcode::try_from(chunk.code[offset]) {
        Ok(op) => op,
        Err(_) => {
            line.push_str(&format!("Unknown opcode {}", chunk.code[offset]));
            return (line, offset + 1);
        }
    };

    match op {
        Opcode::Constant
        | Opcode::GetGlobal
        | Opcode::DefineGlobal
        | Opcode::SetGlobal
        | Opcode::GetProperty
        | Opcode::SetProperty
        | Opcode::GetSuper
        | Opcode::Class
        | Opcode::Method => {
            let index = chunk.code[offset + 1];
            let value = chunk.constants[index as usize];
            line.push_str(&format!(
                "{:<16} {:4} '{}'",
                op.name(),
                index,
                heap.format_value(value)
            ));
            (line, offset + 2)
        }
        Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::GetUpvalue
        | Opcode::SetUpvalue
        | Opcode::Call => {
            let slot = chunk.code[offset + 1];
            line.push_str(&format!("{:<16} {:4}", op.name(), slot));
            (line, offset + 2)
        }
        Opcode::Invoke | Opcode::SuperInvoke => {
            let index = chunk.code[offset + 1];
            let argc = chunk.code[offset + 2];
            let value = chunk.constants[index as usize];
            line.push_str(&format!(
                "{:<16} ({} args) {:4} '{}'",
                op.name(),
                argc,
                index,
                heap.format_value(value)
            ));
            (line, offset + 3)
        }
        Opcode::Jump | Opcode::JumpIfFalse => {
            let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
            line.push_str(&format!(
                "{:<16} {:4} -> {}",
                op.name(),
                offset,
                offset + 3 + jump as usize
            ));
            (line, offset + 3)
        }
        Opcode::Loop => {
            let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
            line.push_str(&format!(
                "{:<16} {:4} -> {}",
                op.name(),
                offset,
                offset + 3 - jump as usize
            ));
            (line, offset + 3)
        }
        Opcode::Closure => {
            let index = chunk.code[offset + 1];
            let value = chunk.constants[index as usize];
            line.push_str(&format!(
                "{:<16} {:4} {}",
                op.name(),
                index,
                heap.format_value(value)
            ));
            let mut next = offset + 2;
            if let Value::Obj(r) = value {
                for _ in 0..heap.function(r).upvalue_count {
                    let is_local = chunk.code[next];
                    let slot = chunk.code[next + 1];
                    line.push_str(&format!(
                        "\n{:04}    |   {:>10} {}",
                        next,
                        if is_local == 1 { "local" } else { "upvalue" },
                        slot
                    ));
                    next += 2;
                }
            }
            (line, next)
        }
        _ => {
            line.push_str(op.name());
            (line, offset + 1)
        }
    }
}
