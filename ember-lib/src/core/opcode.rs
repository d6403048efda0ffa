//! This file defines the opcodes and their operand encodings.
//! There is a lot of code gen going on here by means of the OpCode derive-macro.
//! I consider the macro part of this crate, even though it is technically a sub-crate,
//! so the generated code refers to `crate::core::Operand` and `crate::vm::Vm` directly.

use proc_macros::OpCode;
use strum_macros::IntoStaticStr;

/// Representing Opcodes, all variants must have zero or one member.
///
/// In a chunk an opcode is stored as its one byte discriminant followed by the
/// encoded operand. Jump offsets are relative to the instruction following the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, OpCode, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpCode {
    /// push the constant with the given index
    Constant(u8),
    Nil,
    True,
    False,
    Pop,
    /// push a copy of the local in the given slot of the current frame
    GetLocal(u8),
    SetLocal(u8),
    /// the operand is the constant index of the variable name
    GetGlobal(u8),
    DefineGlobal(u8),
    SetGlobal(u8),
    GetUpvalue(u8),
    SetUpvalue(u8),
    /// `array[index]`, pops both and pushes the element
    GetIndex,
    /// `array[index] = value`, leaves the value on the stack
    SetIndex,
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
    Jump(u16),
    JumpIfFalse(u16),
    /// jumps backwards
    Loop(u16),
    /// the operand is the argument count
    Call(u8),
    /// the operand is the constant index of the function. Closure is followed by one
    /// Capture for each upvalue of the function
    Closure(u8),
    /// Just data that is consumed by the Closure that came before it
    Capture(Capture),
    CloseUpvalue,
    /// builds an array from the given number of stack values
    Array(u8),
    Return,
}

/// Describes where a closure finds one of its upvalues when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    /// true if the upvalue captures a local of the enclosing function, false if it
    /// forwards one of the enclosing function's own upvalues
    pub is_local: bool,
    pub index: u8,
}

/// An opcode operand with a fixed size byte encoding
pub trait Operand: Sized + Copy {
    const SIZE: usize;
    fn write_to(&self, buf: &mut Vec<u8>);
    /// reads the operand from the start of bytes, None if there are too few
    fn read_from(bytes: &[u8]) -> Option<Self>;
}

impl Operand for u8 {
    const SIZE: usize = 1;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(*self);
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        bytes.first().copied()
    }
}

impl Operand for u16 {
    const SIZE: usize = 2;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        let hi = *bytes.first()?;
        let lo = *bytes.get(1)?;
        Some(u16::from_be_bytes([hi, lo]))
    }
}

impl Operand for Capture {
    const SIZE: usize = 2;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.is_local as u8);
        buf.push(self.index);
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        Some(Capture {
            is_local: *bytes.first()? != 0,
            index: *bytes.get(1)?,
        })
    }
}

impl OpCode {
    /// the name used in disassembly listings
    pub fn name(&self) -> &'static str {
        self.into()
    }
}
