//! This Heap represents the interpreters Heap (as in memory area, not as in data structure).
//!
//! It is not any form of tree. Every object that is created is pushed onto one list, and
//! the index into that list is the handle the rest of the interpreter works with. Objects
//! are never removed individually: the whole list is released when the heap is torn down.
//! The downside is, that a long running script only ever grows its memory.

use std::fmt;

use log::{debug, trace};

use crate::core::*;

/// The capacity policy shared by every growable buffer: double, with a floor of 8
pub fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 {
        8
    } else {
        capacity * 2
    }
}

/// makes room for `additional` more elements, growing the buffer according to [`grow_capacity`]
pub fn reserve<T>(buf: &mut Vec<T>, additional: usize) {
    let needed = buf.len() + additional;
    if needed <= buf.capacity() {
        return;
    }
    let mut capacity = buf.capacity();
    while capacity < needed {
        capacity = grow_capacity(capacity);
    }
    buf.reserve_exact(capacity - buf.len());
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
    /// the intern table, every string on the heap is a key in here
    strings: Table<()>,
    bytes_allocated: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// moves an object onto the heap. This is the only way objects come into existence.
    pub fn allocate(&mut self, object: impl Into<Object>) -> ObjRef {
        let object = object.into();
        let obj_ref = ObjRef(self.objects.len() as u32);
        let size = object.heap_size();
        self.bytes_allocated += size;
        trace!("allocate {} bytes for {} {}", size, object.kind(), obj_ref);
        reserve(&mut self.objects, 1);
        self.objects.push(object);
        obj_ref
    }

    /// returns the interned string with the given content, creating it if necessary
    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(existing) = self.find_interned(chars, hash) {
            return existing;
        }
        self.insert_string(ObjString {
            chars: chars.into(),
            hash,
        })
    }

    /// like intern, but takes ownership of an already built string
    pub fn take_string(&mut self, chars: String) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(existing) = self.find_interned(&chars, hash) {
            return existing;
        }
        self.insert_string(ObjString {
            chars: chars.into_boxed_str(),
            hash,
        })
    }

    /// looks up an interned string without creating it
    pub fn find_string(&self, chars: &str) -> Option<ObjRef> {
        self.find_interned(chars, hash_string(chars))
    }

    fn find_interned(&self, chars: &str, hash: u32) -> Option<ObjRef> {
        self.strings.find_key(hash, |key| {
            self.as_string(key)
                .map(|s| s.as_str() == chars)
                .unwrap_or(false)
        })
    }

    fn insert_string(&mut self, string: ObjString) -> ObjRef {
        let hash = string.hash;
        let obj_ref = self.allocate(string);
        self.strings.set(obj_ref, hash, ());
        obj_ref
    }

    pub fn get(&self, obj_ref: ObjRef) -> Option<&Object> {
        self.objects.get(obj_ref.index())
    }

    pub fn get_mut(&mut self, obj_ref: ObjRef) -> Option<&mut Object> {
        self.objects.get_mut(obj_ref.index())
    }

    pub fn as_string(&self, obj_ref: ObjRef) -> Option<&ObjString> {
        match self.get(obj_ref)? {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// returns the string behind a value, if it is one
    pub fn value_as_str(&self, value: Value) -> Option<&str> {
        self.as_string(value.as_obj()?).map(ObjString::as_str)
    }

    pub fn as_function(&self, obj_ref: ObjRef) -> Option<&ObjFunction> {
        match self.get(obj_ref)? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self, obj_ref: ObjRef) -> Option<&ObjClosure> {
        match self.get(obj_ref)? {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue(&self, obj_ref: ObjRef) -> Option<&ObjUpvalue> {
        match self.get(obj_ref)? {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self, obj_ref: ObjRef) -> Option<&mut ObjUpvalue> {
        match self.get_mut(obj_ref)? {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_native(&self, obj_ref: ObjRef) -> Option<&ObjNative> {
        match self.get(obj_ref)? {
            Object::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self, obj_ref: ObjRef) -> Option<&ObjArray> {
        match self.get(obj_ref)? {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self, obj_ref: ObjRef) -> Option<&mut ObjArray> {
        match self.get_mut(obj_ref)? {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    /// the number of objects that are alive, which is every object ever allocated
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    /// like [`Value::type_name`], but refs are named by the kind of object they point to
    pub fn type_name(&self, value: Value) -> &'static str {
        match value.as_obj().and_then(|r| self.get(r)) {
            Some(object) => object.kind(),
            None => value.type_name(),
        }
    }

    /// returns something that prints a value the way the print statement does
    pub fn display(&self, value: Value) -> ValueDisplay<'_> {
        ValueDisplay {
            heap: self,
            value,
            depth: 0,
        }
    }

    /// Releases every object on the heap.
    ///
    /// Each variant releases its owned buffers before the record itself goes.
    /// Any ObjRef handed out before is dangling afterwards.
    pub fn free_objects(&mut self) {
        if self.objects.is_empty() {
            return;
        }
        debug!(
            "freeing {} objects ({} bytes)",
            self.objects.len(),
            self.bytes_allocated
        );
        for object in self.objects.drain(..).rev() {
            match object {
                Object::Closure(closure) => drop(closure.upvalues),
                Object::Function(function) => drop(function.chunk),
                Object::String(string) => drop(string.chars),
                Object::Array(array) => drop(array.elements),
                Object::Upvalue(_) | Object::Native(_) => {}
            }
        }
        self.strings = Table::default();
        self.bytes_allocated = 0;
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.free_objects();
    }
}

/// Formats a value the way the print statement shows it
pub struct ValueDisplay<'a> {
    heap: &'a Heap,
    value: Value,
    depth: usize,
}

/// arrays nested deeper than this are elided, which also stops self containing arrays
const MAX_DISPLAY_DEPTH: usize = 8;

impl<'a> fmt::Display for ValueDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obj_ref = match self.value {
            Value::Bool(b) => return write!(f, "{}", b),
            Value::Nil => return write!(f, "nil"),
            Value::Number(n) => return write!(f, "{}", n),
            Value::Obj(r) => r,
        };
        match self.heap.get(obj_ref) {
            None => write!(f, "<dangling {}>", obj_ref),
            Some(Object::String(s)) => write!(f, "{}", s.as_str()),
            Some(Object::Function(function)) => self.fmt_function(function, f),
            Some(Object::Closure(closure)) => match self.heap.as_function(closure.function) {
                Some(function) => self.fmt_function(function, f),
                None => write!(f, "<closure>"),
            },
            Some(Object::Upvalue(_)) => write!(f, "upvalue"),
            Some(Object::Native(_)) => write!(f, "<native fn>"),
            Some(Object::Array(array)) => {
                if self.depth >= MAX_DISPLAY_DEPTH {
                    return write!(f, "[...]");
                }
                write!(f, "[")?;
                for (i, element) in array.elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    let inner = ValueDisplay {
                        heap: self.heap,
                        value: *element,
                        depth: self.depth + 1,
                    };
                    write!(f, "{}", inner)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl<'a> ValueDisplay<'a> {
    fn fmt_function(&self, function: &ObjFunction, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match function.name.and_then(|n| self.heap.as_string(n)) {
            Some(name) => write!(f, "<fn {}>", name.as_str()),
            None => write!(f, "<script>"),
        }
    }
}
