use proc_macro::TokenStream;
mod opcode;

/// Used on the OpCode enum.
///
/// An opcode is an id paired with at most one operand, and enums lend themselves naturally
/// to this. In a chunk however, opcodes exist as a dense byte sequence: one discriminant byte
/// followed by the encoding of the operand. Every operand type must implement
/// `crate::core::Operand`, which knows its encoded size and how to read and write itself.
///
/// This Macro generates the following:
/// * an associated `u8` const for each variant, named like the variant in upper case
/// * `Self::get_id(&self) -> u8`, to get from variant to discriminant
/// * `Self::write_bytes(&self, &mut Vec<u8>)` and `Self::to_bytes(&self) -> Vec<u8>`
/// * `Self::serialized_size(&self) -> usize`
/// * `Self::serialized_size_of(u8) -> Option<usize>`
/// * `Self::from_bytes(&[u8]) -> Option<Self>`, which returns None for an unknown
///   discriminant or a truncated operand
/// * `Self::dispatch(self, &mut vm::Vm<W>) -> vm::ExecResult`
///   Every Opcode will be executed at some point by the vm.
///   this function will call the associated method for an opcode. That method must be called
///   `exec_<opcode in lowercase>(&mut self, operand)` (the operand is omitted for variants
///   without one) and live in an `impl<W: Write> Vm<W>` block of the crate.
#[proc_macro_derive(OpCode)]
pub fn convert(tokens: TokenStream) -> TokenStream {
    opcode::opcode_impl(tokens)
}
