//! contains the exec functions that correspond to the [OpCode](crate::core::OpCode) variants

use std::io::Write;

use super::{bail, rt_assert, rt_err, ExecOutcome, ExecResult, Vm};
use crate::core::*;

macro_rules! ok_continue {
    () => {
        Ok(ExecOutcome::Continue)
    };
}

impl<W: Write> Vm<W> {
    fn push(&mut self, value: impl Into<Value>) -> super::Result<()> {
        self.stack.push_value(value.into())
    }

    fn pop(&mut self) -> super::Result<Value> {
        self.stack.pop_value()
    }

    /// pops two numbers, the right operand is on top
    fn pop_numbers(&mut self, message: &'static str) -> super::Result<(f64, f64)> {
        match (self.stack.peek(1)?, self.stack.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => {
                let len = self.stack.len();
                self.stack.truncate(len - 2);
                Ok((a, b))
            }
            _ => Err(rt_err!("{}", message)),
        }
    }

    fn binary_number_op(&mut self, f: impl FnOnce(f64, f64) -> Value) -> ExecResult {
        let (a, b) = self.pop_numbers("Operands must be numbers.")?;
        self.push(f(a, b))?;
        ok_continue!()
    }

    fn upvalue_ref(&self, idx: u8) -> super::Result<ObjRef> {
        let closure = self.frame()?.closure;
        self.heap
            .as_closure(closure)
            .and_then(|c| c.upvalues.get(idx as usize).copied())
            .ok_or_else(|| super::Error::MalformedBytecode(format!("no upvalue {}", idx)))
    }

    pub(crate) fn exec_constant(&mut self, idx: u8) -> ExecResult {
        let value = self.read_constant(idx)?;
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_nil(&mut self) -> ExecResult {
        self.push(Value::Nil)?;
        ok_continue!()
    }

    pub(crate) fn exec_true(&mut self) -> ExecResult {
        self.push(true)?;
        ok_continue!()
    }

    pub(crate) fn exec_false(&mut self) -> ExecResult {
        self.push(false)?;
        ok_continue!()
    }

    pub(crate) fn exec_pop(&mut self) -> ExecResult {
        self.pop()?;
        ok_continue!()
    }

    pub(crate) fn exec_getlocal(&mut self, slot: u8) -> ExecResult {
        let base = self.frame()?.slots;
        let value = self.stack.slot(base + slot as usize)?;
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_setlocal(&mut self, slot: u8) -> ExecResult {
        let base = self.frame()?.slots;
        // assignment is an expression, the value stays on the stack
        let value = self.stack.peek(0)?;
        self.stack.set_slot(base + slot as usize, value)?;
        ok_continue!()
    }

    pub(crate) fn exec_getglobal(&mut self, idx: u8) -> ExecResult {
        let (name, hash) = self.read_name(idx)?;
        let Some(value) = self.globals.get(name, hash).copied() else {
            return Err(rt_err!("Undefined variable '{}'.", self.name_of(name)));
        };
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_defineglobal(&mut self, idx: u8) -> ExecResult {
        let (name, hash) = self.read_name(idx)?;
        let value = self.stack.peek(0)?;
        self.globals.set(name, hash, value);
        self.pop()?;
        ok_continue!()
    }

    pub(crate) fn exec_setglobal(&mut self, idx: u8) -> ExecResult {
        let (name, hash) = self.read_name(idx)?;
        let value = self.stack.peek(0)?;
        if self.globals.set(name, hash, value) {
            // assignment never defines a variable
            self.globals.delete(name, hash);
            return Err(rt_err!("Undefined variable '{}'.", self.name_of(name)));
        }
        ok_continue!()
    }

    pub(crate) fn exec_getupvalue(&mut self, idx: u8) -> ExecResult {
        let upvalue = self.upvalue_ref(idx)?;
        let value = match self.heap.as_upvalue(upvalue).map(|u| u.state) {
            Some(UpvalueState::Open(slot)) => self.stack.slot(slot)?,
            Some(UpvalueState::Closed(value)) => value,
            None => bail!(MalformedBytecode(format!("{} is not an upvalue", upvalue))),
        };
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_setupvalue(&mut self, idx: u8) -> ExecResult {
        let upvalue = self.upvalue_ref(idx)?;
        let value = self.stack.peek(0)?;
        match self.heap.as_upvalue_mut(upvalue) {
            Some(ObjUpvalue {
                state: UpvalueState::Open(slot),
            }) => {
                let slot = *slot;
                self.stack.set_slot(slot, value)?;
            }
            Some(ObjUpvalue {
                state: UpvalueState::Closed(closed),
            }) => *closed = value,
            None => bail!(MalformedBytecode(format!("{} is not an upvalue", upvalue))),
        }
        ok_continue!()
    }

    pub(crate) fn exec_getindex(&mut self) -> ExecResult {
        let index = self.pop()?;
        let target = self.pop()?;
        let array = target
            .as_obj()
            .and_then(|r| self.heap.as_array(r))
            .ok_or_else(|| rt_err!("Only arrays can be indexed."))?;
        let Some(index) = index.as_number() else {
            return Err(rt_err!("Array index must be a number."));
        };
        let value = array
            .position(index)
            .map(|pos| array.elements[pos])
            .map_err(|msg| rt_err!("{}", msg))?;
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_setindex(&mut self) -> ExecResult {
        let value = self.pop()?;
        let index = self.pop()?;
        let target = self.pop()?;
        let array = target
            .as_obj()
            .and_then(|r| self.heap.as_array_mut(r))
            .ok_or_else(|| rt_err!("Only arrays can be indexed."))?;
        let Some(index) = index.as_number() else {
            return Err(rt_err!("Array index must be a number."));
        };
        let pos = array.position(index).map_err(|msg| rt_err!("{}", msg))?;
        array.elements[pos] = value;
        self.push(value)?;
        ok_continue!()
    }

    pub(crate) fn exec_equal(&mut self) -> ExecResult {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(a == b)?;
        ok_continue!()
    }

    pub(crate) fn exec_greater(&mut self) -> ExecResult {
        self.binary_number_op(|a, b| Value::Bool(a > b))
    }

    pub(crate) fn exec_less(&mut self) -> ExecResult {
        self.binary_number_op(|a, b| Value::Bool(a < b))
    }

    pub(crate) fn exec_add(&mut self) -> ExecResult {
        let (a, b) = (self.stack.peek(1)?, self.stack.peek(0)?);
        let sum = match (a, b) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            _ => {
                let (Some(a), Some(b)) = (self.heap.value_as_str(a), self.heap.value_as_str(b))
                else {
                    return Err(rt_err!("Operands must be two numbers or two strings."));
                };
                let joined = [a, b].concat();
                Value::Obj(self.heap.take_string(joined))
            }
        };
        let len = self.stack.len();
        self.stack.truncate(len - 2);
        self.push(sum)?;
        ok_continue!()
    }

    pub(crate) fn exec_subtract(&mut self) -> ExecResult {
        self.binary_number_op(|a, b| Value::Number(a - b))
    }

    pub(crate) fn exec_multiply(&mut self) -> ExecResult {
        self.binary_number_op(|a, b| Value::Number(a * b))
    }

    pub(crate) fn exec_divide(&mut self) -> ExecResult {
        self.binary_number_op(|a, b| Value::Number(a / b))
    }

    pub(crate) fn exec_not(&mut self) -> ExecResult {
        let value = self.pop()?;
        self.push(value.is_falsey())?;
        ok_continue!()
    }

    pub(crate) fn exec_negate(&mut self) -> ExecResult {
        let Value::Number(n) = self.stack.peek(0)? else {
            return Err(rt_err!("Operand must be a number."));
        };
        self.pop()?;
        self.push(-n)?;
        ok_continue!()
    }

    pub(crate) fn exec_print(&mut self) -> ExecResult {
        let value = self.pop()?;
        writeln!(self.out, "{}", self.heap.display(value))?;
        ok_continue!()
    }

    pub(crate) fn exec_jump(&mut self, offset: u16) -> ExecResult {
        self.frame_mut()?.ip += offset as usize;
        ok_continue!()
    }

    pub(crate) fn exec_jumpiffalse(&mut self, offset: u16) -> ExecResult {
        // the condition stays on the stack, the compiler emits the pop
        if self.stack.peek(0)?.is_falsey() {
            self.frame_mut()?.ip += offset as usize;
        }
        ok_continue!()
    }

    pub(crate) fn exec_loop(&mut self, offset: u16) -> ExecResult {
        let frame = self.frame_mut()?;
        frame.ip = frame.ip.checked_sub(offset as usize).ok_or_else(|| {
            super::Error::MalformedBytecode(format!("loop of {} jumps before the chunk", offset))
        })?;
        ok_continue!()
    }

    pub(crate) fn exec_call(&mut self, arg_count: u8) -> ExecResult {
        let callee = self.stack.peek(arg_count as usize)?;
        self.call_value(callee, arg_count as usize)?;
        ok_continue!()
    }

    /// Creates a closure. The instruction is followed by one Capture per upvalue of the
    /// function, which are consumed here.
    pub(crate) fn exec_closure(&mut self, idx: u8) -> ExecResult {
        let function = self
            .read_constant(idx)?
            .as_obj()
            .filter(|r| self.heap.as_function(*r).is_some())
            .ok_or_else(|| super::Error::MalformedBytecode(format!("constant {} is not a function", idx)))?;
        let upvalue_count = self.heap.as_function(function).map_or(0, |f| f.upvalue_count);

        let frame = *self.frame()?;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        let mut ip = frame.ip;
        for _ in 0..upvalue_count {
            let Some(OpCode::Capture(capture)) = self.chunk()?.read(ip) else {
                bail!(MalformedBytecode(format!("expected a capture at offset {}", ip)));
            };
            ip += OpCode::Capture(capture).serialized_size();
            let upvalue = if capture.is_local {
                self.capture_upvalue(frame.slots + capture.index as usize)
            } else {
                self.heap
                    .as_closure(frame.closure)
                    .and_then(|c| c.upvalues.get(capture.index as usize).copied())
                    .ok_or_else(|| {
                        super::Error::MalformedBytecode(format!("no upvalue {}", capture.index))
                    })?
            };
            upvalues.push(upvalue);
        }
        self.frame_mut()?.ip = ip;

        let closure = self.heap.allocate(ObjClosure::new(function, upvalues));
        self.push(Value::Obj(closure))?;
        ok_continue!()
    }

    pub(crate) fn exec_capture(&mut self, _: Capture) -> ExecResult {
        bail!(NonExecutableOpCode)
    }

    pub(crate) fn exec_closeupvalue(&mut self) -> ExecResult {
        self.close_upvalues(self.stack.len().saturating_sub(1));
        self.pop()?;
        ok_continue!()
    }

    pub(crate) fn exec_array(&mut self, count: u8) -> ExecResult {
        let count = count as usize;
        rt_assert!(count <= self.stack.len(), "Stack underflow.");
        let start = self.stack.len() - count;
        let elements = self.stack.split_off(start);
        let array = self.heap.allocate(ObjArray::new(elements));
        self.push(Value::Obj(array))?;
        ok_continue!()
    }

    pub(crate) fn exec_return(&mut self) -> ExecResult {
        let result = self.pop()?;
        let frame = *self.frame()?;
        self.close_upvalues(frame.slots);
        self.frames.pop();
        // drops the callee and its locals
        self.stack.truncate(frame.slots);
        if self.frames.is_empty() {
            return Ok(ExecOutcome::Finished);
        }
        self.push(result)?;
        ok_continue!()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::*;
    use crate::vm::*;

    fn output(source: &str) -> String {
        let mut vm = Vm::with_output(Vec::new());
        if let Err(e) = vm.interpret(source) {
            panic!("{}", e);
        }
        String::from_utf8(vm.into_output()).unwrap()
    }

    fn runtime_message(source: &str) -> String {
        let mut vm = Vm::with_output(Vec::new());
        match vm.interpret(source) {
            Err(Error::Runtime(e)) => e.message,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn comparisons() {
        assert_eq!(
            output("print 1 < 2; print 2 <= 1; print 3 >= 3; print 1 != 1; print nil == false;"),
            "true\nfalse\ntrue\nfalse\nfalse\n"
        );
    }

    #[test]
    fn truthiness() {
        assert_eq!(
            output("print !nil; print !0; print !\"\"; print !false;"),
            "true\nfalse\nfalse\ntrue\n"
        );
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        assert_eq!(output("var n = 0/0; print n == n;"), "false\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(
            output("print nil or \"x\"; print 1 and 2; print false and undefined;"),
            "x\n2\nfalse\n"
        );
    }

    #[test]
    fn control_flow() {
        let source = "
            var sum = 0;
            for (var i = 0; i < 5; i = i + 1) {
                if (i == 2) sum = sum + 100; else sum = sum + i;
            }
            var n = 3;
            while (n > 0) n = n - 1;
            print sum;
            print n;";
        assert_eq!(output(source), "108\n0\n");
    }

    #[test]
    fn recursion() {
        let source = "
            fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
            print fib(15);";
        assert_eq!(output(source), "610\n");
    }

    #[test]
    fn functions_print_their_names() {
        assert_eq!(
            output("fun f() {} print f; print clock;"),
            "<fn f>\n<native fn>\n"
        );
    }

    #[test]
    fn arrays() {
        let source = "
            var a = [1, \"two\", [3]];
            a[0] = a[0] + 10;
            print a;
            print a[2][0];
            print len(a);";
        assert_eq!(output(source), "[11, two, [3]]\n3\n3\n");
    }

    #[test]
    fn array_index_errors() {
        assert_eq!(
            runtime_message("[1, 2][2];"),
            "Array index out of bounds."
        );
        assert_eq!(
            runtime_message("[1, 2][0.5];"),
            "Array index must be an integer."
        );
        assert_eq!(
            runtime_message("[1][\"a\"];"),
            "Array index must be a number."
        );
    }

    #[test]
    fn local_assignment_is_an_expression() {
        assert_eq!(output("{ var a; var b = a = 3; print a + b; }"), "6\n");
    }

    #[test]
    fn executing_a_capture_is_rejected() {
        let mut vm = Vm::with_output(Vec::new());
        assert!(matches!(
            vm.exec_capture(Capture {
                is_local: true,
                index: 0
            }),
            Err(Error::NonExecutableOpCode)
        ));
    }
}
