//! The heap object variants. Objects are owned by the [`Heap`](crate::core::Heap) and
//! referenced through [`ObjRef`] handles.

use std::fmt;

use derive_more::Display;
use strum_macros::IntoStaticStr;

use crate::core::{memory, Chunk, Heap, Value};

/// A handle to an object on the heap. Two refs are equal iff they refer to the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display(fmt = "#{}", _0)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Object {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    Array(ObjArray),
}

macro_rules! impl_from_variant {
    ($($variant:ident => $t:ty,)+) => {
        $(
            impl From<$t> for Object {
                fn from(obj: $t) -> Self {
                    Object::$variant(obj)
                }
            }
        )*
    };
}

impl_from_variant! {
    String => ObjString,
    Function => ObjFunction,
    Closure => ObjClosure,
    Upvalue => ObjUpvalue,
    Native => ObjNative,
    Array => ObjArray,
}

impl Object {
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// approximate number of bytes owned by this object, including its own record
    pub fn heap_size(&self) -> usize {
        let owned = match self {
            Object::String(s) => s.chars.len(),
            Object::Function(f) => {
                f.chunk.code.capacity()
                    + f.chunk.lines.capacity() * std::mem::size_of::<usize>()
                    + f.chunk.constants.capacity() * std::mem::size_of::<Value>()
            }
            Object::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            Object::Array(a) => a.elements.capacity() * std::mem::size_of::<Value>(),
            Object::Upvalue(_) | Object::Native(_) => 0,
        };
        std::mem::size_of::<Object>() + owned
    }
}

/// An immutable, interned string
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(chars: impl Into<Box<str>>) -> Self {
        let chars = chars.into();
        let hash = hash_string(&chars);
        ObjString { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

/// FNV-1a, as used for every string key
pub fn hash_string(s: &str) -> u32 {
    s.bytes().fold(2166136261u32, |hash, b| {
        (hash ^ b as u32).wrapping_mul(16777619)
    })
}

/// A compiled function. Immutable once the compiler is done with it.
#[derive(Debug, Default)]
pub struct ObjFunction {
    /// None for the top level script
    pub name: Option<ObjRef>,
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> Self {
        ObjFunction {
            name,
            ..Default::default()
        }
    }
}

/// A function together with the upvalues it captured when it was created
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

impl ObjClosure {
    pub fn new(function: ObjRef, upvalues: Vec<ObjRef>) -> Self {
        ObjClosure { function, upvalues }
    }
}

/// The two states of a captured variable. A transition only ever goes from Open to Closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// the variable still lives in this slot of the vm stack
    Open(usize),
    /// the owning frame returned, the upvalue now owns the value
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

impl ObjUpvalue {
    pub fn open(slot: usize) -> Self {
        ObjUpvalue {
            state: UpvalueState::Open(slot),
        }
    }

    /// the stack slot, if the upvalue is still open
    pub fn slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn close(&mut self, value: Value) {
        self.state = UpvalueState::Closed(value);
    }
}

/// The calling convention for host functions. The slice holds exactly the arguments,
/// and must not be retained beyond the call. An Err is reported as a runtime error.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: &'static str,
    pub arity: usize,
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjNative")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ObjArray {
    pub elements: Vec<Value>,
}

impl ObjArray {
    pub fn new(elements: Vec<Value>) -> Self {
        ObjArray { elements }
    }

    pub fn push(&mut self, value: Value) {
        memory::reserve(&mut self.elements, 1);
        self.elements.push(value);
    }

    /// converts a script index into a position, if it is an integer within bounds
    pub fn position(&self, index: f64) -> Result<usize, &'static str> {
        if index.fract() != 0.0 || index.is_nan() {
            return Err("Array index must be an integer.");
        }
        if index < 0.0 || index >= self.elements.len() as f64 {
            return Err("Array index out of bounds.");
        }
        Ok(index as usize)
    }
}
