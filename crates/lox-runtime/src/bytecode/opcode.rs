//! Bytecode opcodes

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Single-byte opcodes; operands follow immediately in the instruction stream
///
/// Jump offsets are big-endian 16-bit. `Closure` is variable length: the
/// constant operand is followed by one `(is_local, index)` byte pair per
/// upvalue of the referenced function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// Push `constants[u8]`
    Constant,
    Nil,
    True,
    False,
    /// Discard the top of the stack
    Pop,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,
    GetProperty,
    SetProperty,
    GetSuper,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,
    Print,
    Jump,
    /// Peeks at the condition; short-circuit operators rely on the value
    /// staying on the stack
    JumpIfFalse,
    /// Unconditional backward jump
    Loop,
    Call,
    /// Method-call fast path: `const8` names the method, `argc8` follows
    Invoke,
    SuperInvoke,
    Closure,
    CloseUpvalue,
    Return,
    Class,
    Inherit,
    Method,
}

impl Opcode {
    /// Human-readable name used by the disassembler
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Constant => "OP_CONSTANT",
            Opcode::Nil => "OP_NIL",
            Opcode::True => "OP_TRUE",
            Opcode::False => "OP_FALSE",
            Opcode::Pop => "OP_POP",
            Opcode::GetLocal => "OP_GET_LOCAL",
            Opcode::SetLocal => "OP_SET_LOCAL",
            Opcode::GetGlobal => "OP_GET_GLOBAL",
            Opcode::DefineGlobal => "OP_DEFINE_GLOBAL",
            Opcode::SetGlobal => "OP_SET_GLOBAL",
            Opcode::GetUpvalue => "OP_GET_UPVALUE",
            Opcode::SetUpvalue => "OP_SET_UPVALUE",
            Opcode::GetProperty => "OP_GET_PROPERTY",
            Opcode::SetProperty => "OP_SET_PROPERTY",
            Opcode::GetSuper => "OP_GET_SUPER",
            Opcode::Equal => "OP_EQUAL",
            Opcode::Greater => "OP_GREATER",
            Opcode::Less => "OP_LESS",
            Opcode::Add => "OP_ADD",
            Opcode::Subtract => "OP_SUBTRACT",
            Opcode::Multiply => "OP_MULTIPLY",
            Opcode::Divide => "OP_DIVIDE",
            Opcode::Not => "OP_NOT",
            Opcode::Negate => "OP_NEGATE",
            Opcode::Print => "OP_PRINT",
            Opcode::Jump => "OP_JUMP",
            Opcode::JumpIfFalse => "OP_JUMP_IF_FALSE",
            Opcode::Loop => "OP_LOOP",
            Opcode::Call => "OP_CALL",
            Opcode::Invoke => "OP_INVOKE",
            Opcode::SuperInvoke => "OP_SUPER_INVOKE",
            Opcode::Closure => "OP_CLOSURE",
            Opcode::CloseUpvalue => "OP_CLOSE_UPVALUE",
            Opcode::Return => "OP_RETURN",
            Opcode::Class => "OP_CLASS",
            Opcode::Inherit => "OP_INHERIT",
            Opcode::Method => "OP_METHOD",
        }
    }
}
