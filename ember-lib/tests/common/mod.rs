//! Helpers shared by the integration tests.

#![allow(dead_code)]

pub use ember_lib::vm::{Error, InterpretResult, Vm};

/// Runs `source` on a fresh vm and returns what it printed together with the result.
pub fn run(source: &str) -> (String, Result<(), Error>) {
    let mut vm = Vm::with_output(Vec::new());
    let res = vm.interpret(source);
    let out = String::from_utf8(vm.into_output()).expect("output is utf8");
    (out, res)
}

/// Runs `source` and panics if it fails.
pub fn output_of(source: &str) -> String {
    let (out, res) = run(source);
    if let Err(e) = res {
        panic!("script failed: {}\n{}", e, source);
    }
    out
}

/// The message of the runtime error `source` ends with.
pub fn runtime_error_of(source: &str) -> String {
    match run(source).1 {
        Err(Error::Runtime(e)) => e.message,
        other => panic!("expected a runtime error, got {:?}", other),
    }
}
