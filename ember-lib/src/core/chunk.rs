use std::fmt::Write;

use crate::core::memory::reserve;
use crate::core::*;

/// Represents the bytecode of one function
///
/// It's appended to while the function is compiled and read only afterwards.
#[derive(Debug, Default, Clone)]
pub struct Chunk {
    /// Basically the program
    pub code: Vec<u8>,
    /// Has one entry for each byte in code, the source line that produced it
    pub lines: Vec<usize>,
    /// the constant pool, addressed by a one byte index
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// appends an instruction, returns the offset it was written to
    pub fn write(&mut self, op: OpCode, line: usize) -> usize {
        let offset = self.code.len();
        let size = op.serialized_size();
        reserve(&mut self.code, size);
        reserve(&mut self.lines, size);
        op.write_bytes(&mut self.code);
        self.lines.resize(self.code.len(), line);
        offset
    }

    /// Adds a value to the constant pool, reusing an equal constant if there is one.
    /// Returns None once the pool is full.
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if let Some(idx) = self.constants.iter().position(|c| *c == value) {
            return u8::try_from(idx).ok();
        }
        if self.constants.len() >= UINT8_COUNT {
            return None;
        }
        reserve(&mut self.constants, 1);
        self.constants.push(value);
        u8::try_from(self.constants.len() - 1).ok()
    }

    /// overwrites the u16 operand of the jump instruction at offset
    pub fn patch_jump(&mut self, offset: usize, jump: u16) {
        let [hi, lo] = jump.to_be_bytes();
        self.code[offset + 1] = hi;
        self.code[offset + 2] = lo;
    }

    /// decodes the instruction at offset
    pub fn read(&self, offset: usize) -> Option<OpCode> {
        OpCode::from_bytes(self.code.get(offset..)?)
    }

    pub fn line_at(&self, offset: usize) -> Option<usize> {
        self.lines.get(offset).copied()
    }

    /// renders a listing of the whole chunk
    pub fn disassemble(&self, name: &str, heap: &Heap) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            let (line, next) = self.disassemble_instruction(offset, heap);
            out.push_str(&line);
            out.push('\n');
            offset = next;
        }
        out
    }

    /// renders a single instruction, returns it and the offset of the next instruction
    pub fn disassemble_instruction(&self, offset: usize, heap: &Heap) -> (String, usize) {
        let mut out = format!("{:04} ", offset);
        match (offset.checked_sub(1), self.line_at(offset)) {
            (Some(prev), Some(line)) if self.line_at(prev) == Some(line) => out.push_str("   | "),
            (_, Some(line)) => {
                let _ = write!(out, "{:4} ", line);
            }
            (_, None) => out.push_str("   ? "),
        }

        let Some(op) = self.read(offset) else {
            let _ = write!(out, "<bad byte {:?}>", self.code.get(offset));
            return (out, offset + 1);
        };
        let next = offset + op.serialized_size();
        let _ = match op {
            OpCode::Constant(idx)
            | OpCode::GetGlobal(idx)
            | OpCode::DefineGlobal(idx)
            | OpCode::SetGlobal(idx)
            | OpCode::Closure(idx) => write!(
                out,
                "{:<16} {:4} '{}'",
                op.name(),
                idx,
                self.constant_display(idx, heap)
            ),
            OpCode::GetLocal(n)
            | OpCode::SetLocal(n)
            | OpCode::GetUpvalue(n)
            | OpCode::SetUpvalue(n)
            | OpCode::Call(n)
            | OpCode::Array(n) => write!(out, "{:<16} {:4}", op.name(), n),
            OpCode::Jump(jump) | OpCode::JumpIfFalse(jump) => {
                write!(out, "{:<16} {:4} -> {}", op.name(), offset, next + jump as usize)
            }
            OpCode::Loop(jump) => write!(
                out,
                "{:<16} {:4} -> {}",
                op.name(),
                offset,
                next.saturating_sub(jump as usize)
            ),
            OpCode::Capture(Capture { is_local, index }) => write!(
                out,
                "{:<16} {} {}",
                op.name(),
                if is_local { "local" } else { "upvalue" },
                index
            ),
            _ => write!(out, "{}", op.name()),
        };
        (out, next)
    }

    fn constant_display(&self, idx: u8, heap: &Heap) -> String {
        match self.constants.get(idx as usize) {
            Some(value) => heap.display(*value).to_string(),
            None => String::from("<missing constant>"),
        }
    }
}

/// Disassembles a function and, recursively, every function in its constant pool
pub fn disassemble_function(function: ObjRef, heap: &Heap) -> String {
    let Some(f) = heap.as_function(function) else {
        return String::new();
    };
    let name = heap.display(Value::Obj(function)).to_string();
    let mut out = f.chunk.disassemble(&name, heap);
    for constant in &f.chunk.constants {
        if let Some(nested) = constant.as_obj().filter(|r| heap.as_function(*r).is_some()) {
            out.push('\n');
            out.push_str(&disassemble_function(nested, heap));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.add_constant(Value::Number(1.0)), Some(0));
        assert_eq!(chunk.add_constant(Value::Number(2.0)), Some(1));
        assert_eq!(chunk.add_constant(Value::Number(1.0)), Some(0));
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn constant_pool_is_limited() {
        let mut chunk = Chunk::new();
        for i in 0..UINT8_COUNT {
            assert!(chunk.add_constant(Value::Number(i as f64)).is_some());
        }
        assert_eq!(chunk.add_constant(Value::Number(-1.0)), None);
        // existing constants can still be referenced
        assert_eq!(chunk.add_constant(Value::Number(3.0)), Some(3));
    }

    #[test]
    fn lines_follow_every_byte() {
        let mut chunk = Chunk::new();
        chunk.write(OpCode::Constant(0), 1);
        let jump = chunk.write(OpCode::Jump(u16::MAX), 2);
        chunk.write(OpCode::Return, 3);
        assert_eq!(chunk.lines, vec![1, 1, 2, 2, 2, 3]);
        chunk.patch_jump(jump, 1);
        assert_eq!(chunk.read(jump), Some(OpCode::Jump(1)));
        assert_eq!(chunk.read(5), Some(OpCode::Return));
        assert_eq!(chunk.read(6), None);
    }

    #[test]
    fn disassembly_listing() {
        let mut heap = Heap::new();
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Number(1.5)).unwrap();
        chunk.write(OpCode::Constant(idx), 123);
        chunk.write(OpCode::Return, 123);
        let listing = chunk.disassemble("test", &heap);
        assert_eq!(
            listing,
            "== test ==\n0000  123 CONSTANT            0 '1.5'\n0002    | RETURN\n"
        );
        heap.free_objects();
    }
}
