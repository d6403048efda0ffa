use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemEnum};

type VariantInfo<'a> = (&'a syn::Ident, Option<&'a syn::Type>);

pub fn opcode_impl(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as ItemEnum);
    let variants: Vec<_> = input.variants.iter().collect();
    assert!(variants.len() <= 256, "Too many variants for a one byte discriminant");
    let enum_name = input.ident;

    let const_names: Vec<_> = variants.iter().map(|v| ident_to_upper(&v.ident)).collect();
    let variant_infos: Vec<VariantInfo> = variants
        .iter()
        .map(|v| {
            (
                &v.ident,
                match v.fields {
                    syn::Fields::Unit => None,
                    syn::Fields::Named(_) => {
                        panic!("Only variants with zero or one unnamed field allowed")
                    }
                    syn::Fields::Unnamed(ref fields) => {
                        assert!(
                            fields.unnamed.iter().len() == 1,
                            "Only variants with zero or one unnamed field allowed"
                        );
                        fields.unnamed.iter().next().map(|f| &f.ty)
                    }
                },
            )
        })
        .collect();

    let consts = generate_u8_values_for_discriminants(&const_names);
    let get_id_fn_tokens = generate_get_id_fn(&const_names, &variant_infos);
    let serialize_tokens = generate_serialize_fn(&variant_infos);
    let size_tokens = generate_size_fn(&const_names, &variant_infos);
    let from_bytes_tokens = generate_from_bytes_fn(&const_names, &variant_infos);
    let dispatch_tokens = generate_dispatch_fn(&variant_infos);

    quote! {
        impl #enum_name {
            #consts
            #get_id_fn_tokens
            #serialize_tokens
            #size_tokens
            #from_bytes_tokens
            #dispatch_tokens
        }
    }
    .into()
}

/// generates tokens that define an associated const u8 for each variant
fn generate_u8_values_for_discriminants(const_names: &[syn::Ident]) -> TokenStream2 {
    const_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let i = i as u8;
            quote! { pub const #name: u8 = #i; }
        })
        .collect()
}

fn generate_get_id_fn(const_names: &[syn::Ident], variant_infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = const_names
        .iter()
        .zip(variant_infos)
        .map(|(c_name, (var_ident, ty))| {
            if ty.is_some() {
                quote! { Self::#var_ident(_) => Self::#c_name, }
            } else {
                quote! { Self::#var_ident => Self::#c_name, }
            }
        })
        .collect();
    quote! {
        pub fn get_id(&self) -> u8 {
            match self {
                #arms
            }
        }
    }
}

/// generates tokens for the functions that append a variant to a byte buffer
fn generate_serialize_fn(variant_infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = variant_infos
        .iter()
        .map(|(var_name, ty)| match ty {
            None => quote! { Self::#var_name => {} },
            Some(ty) => quote! {
                Self::#var_name(operand) => <#ty as crate::core::Operand>::write_to(operand, buf),
            },
        })
        .collect();

    quote! {
        pub fn write_bytes(&self, buf: &mut Vec<u8>) {
            buf.push(self.get_id());
            match self {
                #arms
            }
        }

        pub fn to_bytes(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(self.serialized_size());
            self.write_bytes(&mut buf);
            buf
        }
    }
}

/// generates tokens for the functions that return the serialized size of a variant
/// which is 1 + the size of the operand type
fn generate_size_fn(const_names: &[syn::Ident], variant_infos: &[VariantInfo]) -> TokenStream2 {
    let size_of = |ty: &Option<&syn::Type>| match ty {
        None => quote! { 0 },
        Some(ty) => quote! { <#ty as crate::core::Operand>::SIZE },
    };
    let (disc_arms, self_arms): (TokenStream2, TokenStream2) = itertools::multiunzip(
        const_names
            .iter()
            .zip(variant_infos)
            .map(|(const_name, (var_name, ty))| {
                let size = size_of(ty);
                let self_arm = if ty.is_some() {
                    quote! { Self::#var_name(_) => #size, }
                } else {
                    quote! { Self::#var_name => #size, }
                };
                (quote! { Self::#const_name => #size, }, self_arm)
            }),
    );

    quote! {
        pub fn serialized_size_of(disc: u8) -> Option<usize> {
            Some(1 + match disc {
                #disc_arms
                _ => return None,
            })
        }

        pub fn serialized_size(&self) -> usize {
            1 + match self {
                #self_arms
            }
        }
    }
}

/// generates a function that decodes the instruction at the start of a byte slice
fn generate_from_bytes_fn(
    const_names: &[syn::Ident],
    variant_infos: &[VariantInfo],
) -> TokenStream2 {
    let arms: TokenStream2 = const_names
        .iter()
        .zip(variant_infos.iter())
        .map(|(const_name, (var_name, var_type))| {
            let rhs = if let Some(ty) = var_type {
                quote! { Self::#var_name(<#ty as crate::core::Operand>::read_from(rest)?), }
            } else {
                quote! { Self::#var_name, }
            };
            quote! { Self::#const_name => #rhs }
        })
        .collect();
    quote! {
        pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
            let (disc, rest) = bytes.split_first()?;
            Some(match *disc {
                #arms
                _ => return None,
            })
        }
    }
}

/// generates the function that forwards a decoded instruction to its `exec_` method on the vm
fn generate_dispatch_fn(variant_infos: &[VariantInfo]) -> TokenStream2 {
    let arms: TokenStream2 = variant_infos
        .iter()
        .map(|(var_name, ty)| {
            let exec_fn = format_ident!("exec_{}", var_name.to_string().to_lowercase());
            if ty.is_some() {
                quote! { Self::#var_name(operand) => vm.#exec_fn(operand), }
            } else {
                quote! { Self::#var_name => vm.#exec_fn(), }
            }
        })
        .collect();
    quote! {
        pub fn dispatch<W: std::io::Write>(self, vm: &mut crate::vm::Vm<W>) -> crate::vm::ExecResult {
            match self {
                #arms
            }
        }
    }
}

fn ident_to_upper(i: &syn::Ident) -> syn::Ident {
    syn::Ident::new(&i.to_string().to_uppercase(), i.span())
}
