use derive_more::{Deref, DerefMut};

use crate::core::{Value, STACK_MAX};
use crate::vm::{rt_assert, Error, Result};

/// type that is used at runtime to represent the value stack
#[derive(Debug, Default, Deref, DerefMut)]
pub struct Stack(Vec<Value>);

impl Stack {
    pub fn push_value(&mut self, value: Value) -> Result<()> {
        rt_assert!(self.0.len() < STACK_MAX, "Stack overflow.");
        self.0.push(value);
        Ok(())
    }

    pub fn pop_value(&mut self) -> Result<Value> {
        self.0.pop().ok_or_else(empty)
    }

    /// the value `distance` slots below the top, 0 is the top
    pub fn peek(&self, distance: usize) -> Result<Value> {
        self.0
            .len()
            .checked_sub(distance + 1)
            .map(|idx| self.0[idx])
            .ok_or_else(empty)
    }

    pub fn slot(&self, idx: usize) -> Result<Value> {
        self.0
            .get(idx)
            .copied()
            .ok_or_else(|| Error::MalformedBytecode(format!("stack slot {} does not exist", idx)))
    }

    pub fn set_slot(&mut self, idx: usize, value: Value) -> Result<()> {
        let slot = self
            .0
            .get_mut(idx)
            .ok_or_else(|| Error::MalformedBytecode(format!("stack slot {} does not exist", idx)))?;
        *slot = value;
        Ok(())
    }
}

fn empty() -> Error {
    Error::MalformedBytecode(String::from("The stack was empty unexpectedly"))
}
