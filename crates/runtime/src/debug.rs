//! Bytecode Disassembler
//!
//! Renders a chunk instruction-by-instruction with offsets, source lines,
//! operands, and resolved constants. Used by tests and reachable through
//! trace-level logging when debugging the compiler.

use std::fmt::Write;

use ember_core::{BitOp, BuiltinModule, Chunk, Heap, OpCode, Value};

use crate::format::format_value;

pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str, id: u32) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ({id}) ==");
    let mut offset = 0;
    while offset < chunk.count() {
        offset = disassemble_instruction(heap, chunk, offset, &mut out);
    }
    out
}

pub fn disassemble_instruction(
    heap: &Heap,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{offset:04} ");
    let line = chunk.lines.line_for(offset as u32);
    if offset > 0 && line == chunk.lines.line_for(offset as u32 - 1) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{line:4} ");
    }

    let byte = chunk.code[offset];
    let Ok(op) = OpCode::try_from(byte) else {
        let _ = writeln!(out, "Unknown opcode {byte}");
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::NewProperty
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Class
        | OpCode::Method
        | OpCode::GetSuper => constant_instruction(heap, chunk, op, offset, out),
        OpCode::GetLocal | OpCode::SetLocal | OpCode::PopN | OpCode::NewArray => {
            u16_instruction(chunk, op, offset, out)
        }
        OpCode::GetUpvalue | OpCode::SetUpvalue | OpCode::Call => {
            byte_instruction(chunk, op, offset, out)
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfFalsePop | OpCode::JumpIfTrue => {
            jump_instruction(chunk, op, 1, offset, out)
        }
        OpCode::Loop => jump_instruction(chunk, op, -1, offset, out),
        OpCode::Bitwise => {
            let sub = chunk.code[offset + 1];
            let name = match BitOp::try_from(sub) {
                Ok(BitOp::Not) => "~",
                Ok(BitOp::And) => "&",
                Ok(BitOp::Or) => "|",
                Ok(BitOp::Xor) => "^",
                Ok(BitOp::Shl) => "<<",
                Ok(BitOp::Sar) => ">>",
                Ok(BitOp::Shr) => ">>>",
                Err(_) => "?",
            };
            let _ = writeln!(out, "{:<18} {name}", "Bitwise");
            offset + 2
        }
        OpCode::ModuleBuiltin => {
            let index = chunk.code[offset + 1];
            let name = match BuiltinModule::try_from(index) {
                Ok(BuiltinModule::Math) => "@math",
                Ok(BuiltinModule::Array) => "@array",
                Ok(BuiltinModule::Object) => "@object",
                Ok(BuiltinModule::String) => "@string",
                Ok(BuiltinModule::Time) => "@time",
                Ok(BuiltinModule::Ctor) => "@ctor",
                Ok(BuiltinModule::System) => "@system",
                Err(_) => "?",
            };
            let _ = writeln!(out, "{:<18} {name}", "ModuleBuiltin");
            offset + 2
        }
        OpCode::Invoke | OpCode::SuperInvoke => {
            let constant = read_u24(chunk, offset + 1);
            let arg_count = chunk.code[offset + 4];
            let name = format_value(heap, heap.constant(constant), false);
            let _ = writeln!(out, "{:<18} ({arg_count} args) {constant} '{name}'", op_name(op));
            offset + 5
        }
        OpCode::Closure => {
            let constant = read_u24(chunk, offset + 1);
            let function_value = heap.constant(constant);
            let name = format_value(heap, function_value, false);
            let _ = writeln!(out, "{:<18} {constant} {name}", "Closure");
            let mut next = offset + 4;
            let upvalue_count = function_value
                .as_function()
                .map_or(0, |f| usize::from(heap.function(f).upvalue_count));
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next];
                let index = u16::from(chunk.code[next + 1]) | (u16::from(chunk.code[next + 2]) << 8);
                let _ = writeln!(
                    out,
                    "{:04}    |                       {} {index}",
                    next,
                    if is_local != 0 { "local" } else { "upvalue" },
                );
                next += 3;
            }
            next
        }
        _ => {
            let _ = writeln!(out, "{}", op_name(op));
            offset + 1
        }
    }
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "Constant",
        OpCode::Nil => "Nil",
        OpCode::True => "True",
        OpCode::False => "False",
        OpCode::Pop => "Pop",
        OpCode::PopN => "PopN",
        OpCode::GetLocal => "GetLocal",
        OpCode::SetLocal => "SetLocal",
        OpCode::GetUpvalue => "GetUpvalue",
        OpCode::SetUpvalue => "SetUpvalue",
        OpCode::CloseUpvalue => "CloseUpvalue",
        OpCode::DefineGlobal => "DefineGlobal",
        OpCode::GetGlobal => "GetGlobal",
        OpCode::SetGlobal => "SetGlobal",
        OpCode::NewArray => "NewArray",
        OpCode::NewObject => "NewObject",
        OpCode::NewProperty => "NewProperty",
        OpCode::GetSubscript => "GetSubscript",
        OpCode::SetSubscript => "SetSubscript",
        OpCode::GetProperty => "GetProperty",
        OpCode::SetProperty => "SetProperty",
        OpCode::Add => "Add",
        OpCode::Subtract => "Subtract",
        OpCode::Multiply => "Multiply",
        OpCode::Divide => "Divide",
        OpCode::Modulus => "Modulus",
        OpCode::Negate => "Negate",
        OpCode::Not => "Not",
        OpCode::Bitwise => "Bitwise",
        OpCode::Equal => "Equal",
        OpCode::NotEqual => "NotEqual",
        OpCode::Less => "Less",
        OpCode::LessEqual => "LessEqual",
        OpCode::Greater => "Greater",
        OpCode::GreaterEqual => "GreaterEqual",
        OpCode::InstanceOf => "InstanceOf",
        OpCode::TypeOf => "TypeOf",
        OpCode::Jump => "Jump",
        OpCode::Loop => "Loop",
        OpCode::JumpIfFalse => "JumpIfFalse",
        OpCode::JumpIfFalsePop => "JumpIfFalsePop",
        OpCode::JumpIfTrue => "JumpIfTrue",
        OpCode::Call => "Call",
        OpCode::Invoke => "Invoke",
        OpCode::SuperInvoke => "SuperInvoke",
        OpCode::Return => "Return",
        OpCode::Closure => "Closure",
        OpCode::Class => "Class",
        OpCode::Inherit => "Inherit",
        OpCode::Method => "Method",
        OpCode::GetSuper => "GetSuper",
        OpCode::ModuleBuiltin => "ModuleBuiltin",
        OpCode::Print => "Print",
        OpCode::Throw => "Throw",
        OpCode::Import => "Import",
    }
}

fn read_u24(chunk: &Chunk, offset: usize) -> u32 {
    u32::from(chunk.code[offset])
        | (u32::from(chunk.code[offset + 1]) << 8)
        | (u32::from(chunk.code[offset + 2]) << 16)
}

fn constant_instruction(
    heap: &Heap,
    chunk: &Chunk,
    op: OpCode,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = read_u24(chunk, offset + 1);
    let rendered = render_constant(heap, heap.constant(constant));
    let _ = writeln!(out, "{:<18} {constant} '{rendered}'", op_name(op));
    offset + 4
}

/// Constants render re-scannable: strings keep their quotes.
fn render_constant(heap: &Heap, value: Value) -> String {
    if let Some(id) = value.as_string() {
        format!("\"{}\"", heap.string(id).as_str())
    } else {
        format_value(heap, value, false)
    }
}

fn byte_instruction(chunk: &Chunk, op: OpCode, offset: usize, out: &mut String) -> usize {
    let operand = chunk.code[offset + 1];
    let _ = writeln!(out, "{:<18} {operand}", op_name(op));
    offset + 2
}

fn u16_instruction(chunk: &Chunk, op: OpCode, offset: usize, out: &mut String) -> usize {
    let operand = u16::from(chunk.code[offset + 1]) | (u16::from(chunk.code[offset + 2]) << 8);
    let _ = writeln!(out, "{:<18} {operand}", op_name(op));
    offset + 3
}

fn jump_instruction(
    chunk: &Chunk,
    op: OpCode,
    sign: i64,
    offset: usize,
    out: &mut String,
) -> usize {
    let jump = i64::from(u16::from(chunk.code[offset + 1]) | (u16::from(chunk.code[offset + 2]) << 8));
    let target = offset as i64 + 3 + sign * jump;
    let _ = writeln!(out, "{:<18} {offset} -> {target}", op_name(op));
    offset + 3
}
