//! The virtual machine.
//!
//! A [`Vm`] owns the heap, the globals and the two stacks, and executes one instruction per
//! call to [`Vm::step`]. The `exec_` functions that implement the single instructions live
//! in the `exec` module, [`OpCode::dispatch`] routes each decoded instruction to its
//! function.

use std::fmt;
use std::io::{self, Stdout, Write};
use std::result::Result as StdResult;

use log::trace;
use thiserror::Error;

use crate::compiler::{self, CompileErrors};
use crate::core::*;

pub mod built_ins;
mod exec;
pub mod stack;
pub use stack::Stack;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileErrors),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Opcode at ip is Non-executable")]
    NonExecutableOpCode,

    #[error("Malformed bytecode: {0}")]
    MalformedBytecode(String),

    #[error("Could not write output: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> InterpretResult {
        match self {
            Error::Compile(_) => InterpretResult::CompileError,
            _ => InterpretResult::RuntimeError,
        }
    }
}

/// The coarse outcome of running a piece of source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// A fault raised by a running script, with the call stack at the time of the fault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}{}", render_trace(.trace))]
pub struct RuntimeError {
    pub message: String,
    /// innermost frame first
    pub trace: Vec<TraceLine>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            trace: vec![],
        }
    }
}

fn render_trace(trace: &[TraceLine]) -> String {
    trace.iter().map(|line| format!("\n{}", line)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub line: usize,
    /// None for the top level script
    pub function: Option<String>,
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// returned by all exec_ functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// there are more instructions to execute
    Continue,
    /// the script returned
    Finished,
}

pub type Result<T> = StdResult<T, Error>;
pub type ExecResult = Result<ExecOutcome>;

macro_rules! rt_err{
    ($msg:literal $(, $args:expr)*) => {
        $crate::vm::Error::Runtime($crate::vm::RuntimeError::new(format!($msg $(, $args)*)))
    };
}
pub(crate) use rt_err;

macro_rules! rt_assert{
    ($cond:expr, $msg:literal $(, $args:expr)*) => {
        if ! $cond { return Err($crate::vm::rt_err!($msg $(, $args)*)); }
    };
}
pub(crate) use rt_assert;

macro_rules! bail{
    ($($err:tt)*) => {
        return Err($crate::vm::Error::$($err)*)
    };
}
pub(crate) use bail;

/// An active function invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub closure: ObjRef,
    /// the function of the closure, cached so each instruction fetch needs one lookup less
    pub function: ObjRef,
    /// offset of the next instruction in the function's chunk
    pub ip: usize,
    /// index of the stack slot that holds the callee, the frame's locals follow it
    pub slots: usize,
}

pub struct Vm<W: Write = Stdout> {
    frames: Vec<CallFrame>,
    stack: Stack,
    globals: Table<Value>,
    /// upvalues that still point into the stack, ordered by their slot
    open_upvalues: Vec<ObjRef>,
    heap: Heap,
    out: W,
}

impl Vm<Stdout> {
    pub fn new() -> Self {
        Vm::with_output(io::stdout())
    }
}

impl Default for Vm<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Vm<W> {
    /// creates a vm whose print statements write to `out`
    pub fn with_output(out: W) -> Self {
        let mut vm = Vm {
            frames: Vec::with_capacity(FRAME_MAX),
            stack: Stack::default(),
            globals: Table::new(),
            open_upvalues: vec![],
            heap: Heap::new(),
            out,
        };
        built_ins::define_all(&mut vm);
        vm
    }

    /// registers a host function as a global
    pub fn define_native(&mut self, name: &'static str, arity: usize, function: NativeFn) {
        let key = self.heap.intern(name);
        let native = self.heap.allocate(ObjNative {
            name,
            arity,
            function,
        });
        self.globals.set(key, hash_string(name), Value::Obj(native));
    }

    /// Compiles and runs the source. Globals survive between calls, so consecutive calls
    /// behave like consecutive lines of one program.
    pub fn interpret(&mut self, source: &str) -> Result<()> {
        self.load(source)?;
        self.run()
    }

    /// like interpret, but reports errors on stderr and only returns their kind
    pub fn interpret_result(&mut self, source: &str) -> InterpretResult {
        match self.interpret(source) {
            Ok(()) => InterpretResult::Ok,
            Err(e) => {
                eprintln!("{}", e);
                e.kind()
            }
        }
    }

    /// compiles the source and sets up the call of the script, without executing anything
    pub fn load(&mut self, source: &str) -> Result<()> {
        let function = compiler::compile(source, &mut self.heap)?;
        let closure = self.heap.allocate(ObjClosure::new(function, vec![]));
        self.stack.push_value(Value::Obj(closure))?;
        self.call_closure(closure, 0)
    }

    /// executes instructions until the script returns or fails
    pub fn run(&mut self) -> Result<()> {
        while self.step()? == ExecOutcome::Continue {}
        Ok(())
    }

    /// Executes a single instruction. On error the stacks are reset, so the vm can be
    /// used again.
    pub fn step(&mut self) -> ExecResult {
        if self.frames.is_empty() {
            return Ok(ExecOutcome::Finished);
        }
        let result = match self.fetch() {
            Ok(op) => op.dispatch(self),
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(Error::Runtime(mut err)) => {
                err.trace = self.stack_trace();
                self.reset();
                Err(err.into())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn globals(&self) -> &Table<Value> {
        &self.globals
    }

    /// the value of a global variable, if it is defined
    pub fn global(&self, name: &str) -> Option<Value> {
        let key = self.heap.find_string(name)?;
        self.globals.get(key, hash_string(name)).copied()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// the source line of the instruction that executes next
    pub fn current_line(&self) -> Option<usize> {
        let frame = self.frames.last()?;
        self.heap
            .as_function(frame.function)?
            .chunk
            .line_at(frame.ip)
    }

    /// the chunk and offset of the instruction that executes next
    pub fn current_instruction(&self) -> Option<(&Chunk, usize)> {
        let frame = self.frames.last()?;
        let function = self.heap.as_function(frame.function)?;
        Some((&function.chunk, frame.ip))
    }

    // ==============================================================================
    // Internals, used by the exec functions
    // ==============================================================================

    fn frame(&self) -> Result<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| Error::MalformedBytecode(String::from("no active call frame")))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::MalformedBytecode(String::from("no active call frame")))
    }

    fn chunk(&self) -> Result<&Chunk> {
        let function = self.frame()?.function;
        self.heap
            .as_function(function)
            .map(|f| &f.chunk)
            .ok_or_else(|| Error::MalformedBytecode(format!("{} is not a function", function)))
    }

    /// decodes the next instruction and advances the ip past it
    fn fetch(&mut self) -> Result<OpCode> {
        let ip = self.frame()?.ip;
        let chunk = self.chunk()?;
        let op = chunk
            .read(ip)
            .ok_or_else(|| Error::MalformedBytecode(format!("no instruction at offset {}", ip)))?;
        trace!(
            "{:<40} {}",
            chunk.disassemble_instruction(ip, &self.heap).0,
            self.render_stack()
        );
        self.frame_mut()?.ip += op.serialized_size();
        Ok(op)
    }

    fn render_stack(&self) -> String {
        self.stack
            .iter()
            .map(|v| format!("[ {} ]", self.heap.display(*v)))
            .collect()
    }

    fn read_constant(&self, idx: u8) -> Result<Value> {
        self.chunk()?
            .constants
            .get(idx as usize)
            .copied()
            .ok_or_else(|| Error::MalformedBytecode(format!("no constant at index {}", idx)))
    }

    /// reads a constant that names a global, returns the name and its hash
    fn read_name(&self, idx: u8) -> Result<(ObjRef, u32)> {
        let value = self.read_constant(idx)?;
        value
            .as_obj()
            .and_then(|r| self.heap.as_string(r).map(|s| (r, s.hash)))
            .ok_or_else(|| Error::MalformedBytecode(format!("constant {} is not a name", idx)))
    }

    fn name_of(&self, name: ObjRef) -> &str {
        self.heap.as_string(name).map_or("?", ObjString::as_str)
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<()> {
        if let Some(obj) = callee.as_obj() {
            if self.heap.as_closure(obj).is_some() {
                return self.call_closure(obj, arg_count);
            }
            if self.heap.as_native(obj).is_some() {
                return self.call_native(obj, arg_count);
            }
        }
        Err(rt_err!("Can only call functions."))
    }

    fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> Result<()> {
        let function = self
            .heap
            .as_closure(closure)
            .map(|c| c.function)
            .ok_or_else(|| Error::MalformedBytecode(format!("{} is not a closure", closure)))?;
        let arity = self.heap.as_function(function).map_or(0, |f| f.arity);
        rt_assert!(
            arg_count == arity,
            "Expected {} arguments but got {}.",
            arity,
            arg_count
        );
        rt_assert!(self.frames.len() < FRAME_MAX, "Stack overflow.");
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slots: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, native: ObjRef, arg_count: usize) -> Result<()> {
        let (arity, function) = self
            .heap
            .as_native(native)
            .map(|n| (n.arity, n.function))
            .ok_or_else(|| Error::MalformedBytecode(format!("{} is not a native", native)))?;
        rt_assert!(
            arg_count == arity,
            "Expected {} arguments but got {}.",
            arity,
            arg_count
        );
        let args_start = self.stack.len() - arg_count;
        let result =
            function(&mut self.heap, &self.stack[args_start..]).map_err(|msg| rt_err!("{}", msg))?;
        // the arguments and the native itself
        self.stack.truncate(args_start - 1);
        self.stack.push_value(result)
    }

    /// returns the open upvalue for the slot, creating it if there is none yet
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let heap = &self.heap;
        let position = self
            .open_upvalues
            .binary_search_by_key(&slot, |u| heap.as_upvalue(*u).and_then(|u| u.slot()).unwrap_or(0));
        match position {
            Ok(idx) => self.open_upvalues[idx],
            Err(idx) => {
                let upvalue = self.heap.allocate(ObjUpvalue::open(slot));
                self.open_upvalues.insert(idx, upvalue);
                upvalue
            }
        }
    }

    /// closes every open upvalue that points at `last` or a slot above it
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let Some(slot) = self.heap.as_upvalue(upvalue).and_then(ObjUpvalue::slot) else {
                self.open_upvalues.pop();
                continue;
            };
            if slot < last {
                break;
            }
            let value = self.stack.get(slot).copied().unwrap_or_default();
            if let Some(u) = self.heap.as_upvalue_mut(upvalue) {
                u.close(value);
            }
            self.open_upvalues.pop();
        }
    }

    fn stack_trace(&self) -> Vec<TraceLine> {
        self.frames
            .iter()
            .rev()
            .filter_map(|frame| {
                let function = self.heap.as_function(frame.function)?;
                let line = function.chunk.line_at(frame.ip.saturating_sub(1))?;
                Some(TraceLine {
                    line,
                    function: function.name.map(|n| self.name_of(n).to_string()),
                })
            })
            .collect()
    }

    /// Empties both stacks. Upvalues still open are closed first, closures that escaped
    /// keep the values their variables had at the fault.
    fn reset(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Result<()>, String) {
        let mut vm = Vm::with_output(Vec::new());
        let result = vm.interpret(source);
        let out = String::from_utf8(vm.into_output()).unwrap();
        (result, out)
    }

    fn runtime_error(source: &str) -> RuntimeError {
        match run(source).0 {
            Err(Error::Runtime(e)) => e,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_and_print() {
        let (result, out) = run("print 1 + 2 * 3; print (1 + 2) * 3; print -4 / 2;");
        assert!(result.is_ok());
        assert_eq!(out, "7\n9\n-2\n");
    }

    #[test]
    fn string_concatenation_is_interned() {
        let (_, out) = run("var a = \"ab\"; var b = \"a\" + \"b\"; print a == b; print a + b;");
        assert_eq!(out, "true\nabab\n");
    }

    #[test]
    fn closures_share_captured_variables() {
        let source = "
            fun counter() {
                var n = 0;
                fun inc() { n = n + 1; return n; }
                return inc;
            }
            var c = counter();
            c(); c();
            print c();
            var d = counter();
            print d();";
        let (result, out) = run(source);
        assert!(result.is_ok());
        assert_eq!(out, "3\n1\n");
    }

    #[test]
    fn closed_upvalues_outlive_their_frame() {
        let source = "
            var get; var set;
            fun make() {
                var x = \"before\";
                fun g() { return x; }
                fun s(v) { x = v; }
                get = g; set = s;
            }
            make();
            set(\"after\");
            print get();";
        let (_, out) = run(source);
        assert_eq!(out, "after\n");
    }

    #[test]
    fn loop_variables_are_captured_per_scope() {
        let source = "
            var fns = [nil, nil];
            for (var i = 0; i < 2; i = i + 1) {
                var j = i;
                fun f() { return j; }
                fns[i] = f;
            }
            print fns[0]();
            print fns[1]();";
        let (result, out) = run(source);
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(out, "0\n1\n");
    }

    #[test]
    fn undefined_variable_trace() {
        let err = runtime_error("fun f() {\n  return missing;\n}\nf();");
        assert_eq!(err.message, "Undefined variable 'missing'.");
        assert_eq!(
            err.to_string(),
            "Undefined variable 'missing'.\n[line 2] in f()\n[line 4] in script"
        );
    }

    #[test]
    fn assigning_an_undefined_global_does_not_define_it() {
        let mut vm = Vm::with_output(Vec::new());
        assert!(vm.interpret("nope = 1;").is_err());
        assert_eq!(vm.global("nope"), None);
    }

    #[test]
    fn type_errors() {
        assert_eq!(runtime_error("-\"a\";").message, "Operand must be a number.");
        assert_eq!(runtime_error("1 < \"a\";").message, "Operands must be numbers.");
        assert_eq!(
            runtime_error("1 + \"a\";").message,
            "Operands must be two numbers or two strings."
        );
        assert_eq!(
            runtime_error("\"x\"();").message,
            "Can only call functions."
        );
        assert_eq!(runtime_error("1[0];").message, "Only arrays can be indexed.");
    }

    #[test]
    fn arity_is_checked() {
        let err = runtime_error("fun f(a, b) {}\nf(1);");
        assert_eq!(err.message, "Expected 2 arguments but got 1.");
    }

    #[test]
    fn deep_recursion_overflows() {
        let err = runtime_error("fun f() { f(); }\nf();");
        assert_eq!(err.message, "Stack overflow.");
        assert_eq!(err.trace.len(), FRAME_MAX);
    }

    #[test]
    fn vm_is_reusable_after_a_runtime_error() {
        let mut vm = Vm::with_output(Vec::new());
        assert!(vm.interpret("var a = 1; a();").is_err());
        assert!(vm.stack().is_empty());
        assert!(vm.frames().is_empty());
        assert!(vm.interpret("print a;").is_ok());
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "1\n");
    }

    #[test]
    fn escaped_closures_survive_a_runtime_error() {
        let mut vm = Vm::with_output(Vec::new());
        let source = "
            var g;
            fun outer() {
                var x = 1;
                fun inner() { return x; }
                g = inner;
                missing();
            }
            outer();";
        assert!(vm.interpret(source).is_err());
        assert!(vm.frames().is_empty());
        vm.interpret("{ var z = \"stack\"; print g(); }").unwrap();
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "1\n");
    }

    #[test]
    fn compile_errors_prevent_execution() {
        let (result, out) = run("print 1; print ;");
        assert_eq!(result.unwrap_err().kind(), InterpretResult::CompileError);
        assert_eq!(out, "");
    }

    #[test]
    fn stepping_reports_progress() {
        let mut vm = Vm::with_output(Vec::new());
        vm.load("print 1;").unwrap();
        assert_eq!(vm.current_line(), Some(1));
        let mut steps = 0;
        while vm.step().unwrap() == ExecOutcome::Continue {
            steps += 1;
        }
        // constant, print, nil
        assert_eq!(steps, 3);
        assert!(vm.stack().is_empty());
        assert_eq!(vm.step().unwrap(), ExecOutcome::Finished);
    }

    #[test]
    fn natives_are_callable() {
        let (result, out) = run("print len([1, 2, 3]); print max([3, 9, 2]); print clock() >= 0;");
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(out, "3\n9\ntrue\n");
    }

    #[test]
    fn custom_natives() {
        fn twice(_: &mut Heap, args: &[Value]) -> StdResult<Value, String> {
            let n = args[0].as_number().ok_or("not a number")?;
            Ok(Value::Number(n * 2.0))
        }
        let mut vm = Vm::with_output(Vec::new());
        vm.define_native("twice", 1, twice);
        vm.interpret("print twice(21);").unwrap();
        let err = vm.interpret("twice(nil);").unwrap_err();
        assert_eq!(err.to_string(), "not a number\n[line 1] in script");
        let err = vm.interpret("twice();").unwrap_err();
        assert_eq!(err.to_string(), "Expected 1 arguments but got 0.\n[line 1] in script");
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "42\n");
    }
}
