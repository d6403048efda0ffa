//! ember is a small dynamically typed scripting language, compiled to bytecode and run on
//! a stack based virtual machine.
//!
//! The pipeline has three stages:
//! 1. the [`scanner`] turns source text into tokens, on demand,
//! 1. the [`compiler`] parses the tokens in a single pass and emits one
//!    [`Chunk`](core::Chunk) of bytecode per function,
//! 1. the [`vm`] executes the bytecode.
//!
//! Usually you only need the vm:
//!
//! ```
//! use ember_lib::vm::Vm;
//!
//! let mut vm = Vm::with_output(Vec::new());
//! vm.interpret("var greeting = \"hello\"; print greeting + \" world\";").unwrap();
//! assert_eq!(vm.output().as_slice(), b"hello world\n");
//! ```
//!
//! Every object a script creates lives on the vm's [`Heap`](core::Heap) until the vm is
//! dropped.
pub mod compiler;
pub mod core;
pub mod scanner;
pub mod vm;
