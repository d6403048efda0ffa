//! contains all important data structures

/// Number of distinct values a one byte operand can address. Bounds the constants
/// and the locals of a single function
pub const UINT8_COUNT: usize = u8::MAX as usize + 1;

/// Maximum depth of the call stack
pub const FRAME_MAX: usize = 64;

/// Maximum number of live stack slots
pub const STACK_MAX: usize = FRAME_MAX * UINT8_COUNT;

pub mod chunk;
pub use chunk::*;

pub mod memory;
pub use memory::{Heap, ValueDisplay};

pub mod object;
pub use object::*;

pub mod opcode;
pub use opcode::*;

pub mod table;
pub use table::*;

pub mod value;
pub use value::*;
