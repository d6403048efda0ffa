//! The natives every vm starts with.
//!
//! All of them follow the [`NativeFn`] convention: they get the heap and exactly their
//! arguments, and report bad arguments as an `Err` which the vm turns into a runtime error.

use std::cell::Cell;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::core::*;
use crate::vm::Vm;

type NativeResult = Result<Value, String>;

pub(crate) fn define_all<W: Write>(vm: &mut Vm<W>) {
    vm.define_native("clock", 0, clock);
    vm.define_native("sleep", 1, sleep);
    vm.define_native("exists", 1, exists);
    vm.define_native("readFile", 1, read_file);
    vm.define_native("min", 1, min);
    vm.define_native("max", 1, max);
    vm.define_native("len", 1, len);
    vm.define_native("rand", 0, rand);
    vm.define_native("srand", 1, srand);
    vm.define_native("exit", 1, exit);
}

fn number_arg(name: &str, heap: &Heap, value: Value) -> Result<f64, String> {
    value
        .as_number()
        .ok_or_else(|| format!("{}: expected a number but got {}.", name, heap.type_name(value)))
}

fn string_arg<'h>(name: &str, heap: &'h Heap, value: Value) -> Result<&'h str, String> {
    heap.value_as_str(value)
        .ok_or_else(|| format!("{}: expected a string but got {}.", name, heap.type_name(value)))
}

fn array_arg<'h>(name: &str, heap: &'h Heap, value: Value) -> Result<&'h [Value], String> {
    value
        .as_obj()
        .and_then(|r| heap.as_array(r))
        .map(|a| a.elements.as_slice())
        .ok_or_else(|| format!("{}: expected an array but got {}.", name, heap.type_name(value)))
}

static START: Lazy<Instant> = Lazy::new(Instant::now);

/// seconds since the first call, as a float
fn clock(_: &mut Heap, _: &[Value]) -> NativeResult {
    Ok(Value::Number(START.elapsed().as_secs_f64()))
}

/// blocks the interpreter for the given number of microseconds
fn sleep(heap: &mut Heap, args: &[Value]) -> NativeResult {
    let micros = number_arg("sleep", heap, args[0])?;
    if micros > 0.0 {
        std::thread::sleep(Duration::from_micros(micros as u64));
    }
    Ok(Value::Nil)
}

fn exists(heap: &mut Heap, args: &[Value]) -> NativeResult {
    let path = string_arg("exists", heap, args[0])?;
    Ok(Value::Bool(Path::new(path).exists()))
}

/// the content of a file as a string, nil if it can't be read
fn read_file(heap: &mut Heap, args: &[Value]) -> NativeResult {
    let path = string_arg("readFile", heap, args[0])?;
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Value::Obj(heap.take_string(content))),
        Err(_) => Ok(Value::Nil),
    }
}

fn extremum(name: &str, heap: &Heap, value: Value, pick: fn(f64, f64) -> f64) -> NativeResult {
    let elements = array_arg(name, heap, value)?;
    let mut numbers = elements.iter().map(|v| number_arg(name, heap, *v));
    let first = numbers
        .next()
        .ok_or_else(|| format!("{}: the array is empty.", name))??;
    numbers
        .try_fold(first, |acc, n: Result<f64, String>| -> Result<f64, String> {
            Ok(pick(acc, n?))
        })
        .map(Value::Number)
}

fn min(heap: &mut Heap, args: &[Value]) -> NativeResult {
    extremum("min", heap, args[0], f64::min)
}

fn max(heap: &mut Heap, args: &[Value]) -> NativeResult {
    extremum("max", heap, args[0], f64::max)
}

/// number of elements of an array, or bytes of a string
fn len(heap: &mut Heap, args: &[Value]) -> NativeResult {
    if let Some(s) = heap.value_as_str(args[0]) {
        return Ok(Value::Number(s.len() as f64));
    }
    let elements = array_arg("len", heap, args[0])?;
    Ok(Value::Number(elements.len() as f64))
}

// LCG constants (same as used in glibc)
const LCG_MULTIPLIER: u64 = 6364136223846793005;
const LCG_INCREMENT: u64 = 1442695040888963407;

thread_local! {
    /// None until the generator is first used or seeded
    static RNG_STATE: Cell<Option<u64>> = const { Cell::new(None) };
}

fn next_random_u64() -> u64 {
    RNG_STATE.with(|state| {
        let current = state.get().unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64)
        });
        let next = current
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        state.set(Some(next));
        next
    })
}

/// a number in [0, 1)
fn rand(_: &mut Heap, _: &[Value]) -> NativeResult {
    // the high bits of an lcg are the random ones
    let bits = next_random_u64() >> 11;
    Ok(Value::Number(bits as f64 / (1u64 << 53) as f64))
}

fn srand(heap: &mut Heap, args: &[Value]) -> NativeResult {
    let seed = number_arg("srand", heap, args[0])?;
    RNG_STATE.with(|state| state.set(Some(seed as u64)));
    Ok(Value::Nil)
}

/// terminates the host process with the given exit code
fn exit(heap: &mut Heap, args: &[Value]) -> NativeResult {
    let code = number_arg("exit", heap, args[0])?;
    std::process::exit(code as i32)
}
