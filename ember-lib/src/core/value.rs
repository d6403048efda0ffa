//! Deals with run-time data representation

use derive_more::From;

use crate::core::ObjRef;

/// A value as it lives on the stack, in a constant pool, or in the globals table.
///
/// Values are Copy. Heap data is shared through an [`ObjRef`], and since strings are
/// interned, comparing two refs is enough to compare two strings.
#[derive(Debug, Clone, Copy, PartialEq, Default, From)]
pub enum Value {
    Bool(bool),
    #[default]
    Nil,
    Number(f64),
    Obj(ObjRef),
}

impl Value {
    /// nil and false are falsey, everything else is truthy
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        if let Value::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        if let Value::Obj(r) = self {
            Some(*r)
        } else {
            None
        }
    }

    /// the name of the type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::Obj(_) => "object",
        }
    }
}
