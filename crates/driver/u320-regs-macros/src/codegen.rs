//! Code generation for the `register_block!` macro.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::parse::{AccessMode, RegWidth, RegisterBlock, RegisterDef};

/// Generates the complete output for a register block definition.
pub fn generate(block: &RegisterBlock) -> TokenStream {
    let vis = &block.vis;
    let name = &block.name;
    let attrs = &block.attrs;

    let methods: Vec<TokenStream> = block.registers.iter().map(generate_methods).collect();

    quote! {
        #(#attrs)*
        #vis struct #name<'a, B: RegisterInterface + ?Sized> {
            bus: &'a mut B,
        }

        impl<'a, B: RegisterInterface + ?Sized> #name<'a, B> {
            /// Wraps a register interface. The caller selects the bank.
            #vis fn new(bus: &'a mut B) -> Self {
                Self { bus }
            }

            /// Returns the wrapped register interface.
            #vis fn bus(&mut self) -> &mut B {
                self.bus
            }

            #(#methods)*
        }
    }
}

fn generate_methods(reg: &RegisterDef) -> TokenStream {
    let mut methods = TokenStream::new();
    if let Some(m) = generate_read(reg) {
        methods.extend(m);
    }
    if let Some(m) = generate_write(reg) {
        methods.extend(m);
    }
    methods
}

/// Expression reading the raw value of `reg` from `self.bus`.
fn raw_read(reg: &RegisterDef) -> TokenStream {
    let offset = &reg.offset;
    match reg.width {
        RegWidth::U8 => quote! { self.bus.read8(#offset) },
        RegWidth::U16 => quote! {
            u16::from_le_bytes([self.bus.read8(#offset), self.bus.read8((#offset) + 1)])
        },
    }
}

/// Statements writing the raw value `raw` of `reg` to `self.bus`.
fn raw_write(reg: &RegisterDef) -> TokenStream {
    let offset = &reg.offset;
    match reg.width {
        RegWidth::U8 => quote! { self.bus.write8(#offset, raw); },
        RegWidth::U16 => quote! {
            let [lo, hi] = raw.to_le_bytes();
            self.bus.write8(#offset, lo);
            self.bus.write8((#offset) + 1, hi);
        },
    }
}

fn generate_read(reg: &RegisterDef) -> Option<TokenStream> {
    if reg.access == AccessMode::WriteOnly {
        return None;
    }

    let name = &reg.name;
    let attrs = &reg.attrs;
    let width_ty = width_type(reg);
    let read = raw_read(reg);

    Some(if let Some(ref flags) = reg.flags_type {
        quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&mut self) -> #flags {
                let raw: #width_ty = #read;
                #flags::from_bits_retain(raw)
            }
        }
    } else {
        quote! {
            #(#attrs)*
            #[inline]
            pub fn #name(&mut self) -> #width_ty {
                #read
            }
        }
    })
}

fn generate_write(reg: &RegisterDef) -> Option<TokenStream> {
    if reg.access == AccessMode::ReadOnly {
        return None;
    }

    let name = &reg.name;
    let setter_name = format_ident!("set_{}", name);
    let width_ty = width_type(reg);
    let write = raw_write(reg);
    let set_doc = format!("Writes the `{name}` register.");

    // Write-only registers carry their doc on the setter itself.
    let attrs = if reg.access == AccessMode::WriteOnly {
        let attrs = &reg.attrs;
        quote! { #(#attrs)* }
    } else {
        quote! { #[doc = #set_doc] }
    };

    Some(if let Some(ref flags) = reg.flags_type {
        quote! {
            #attrs
            #[inline]
            pub fn #setter_name(&mut self, value: #flags) {
                let raw: #width_ty = value.bits();
                #write
            }
        }
    } else {
        quote! {
            #attrs
            #[inline]
            pub fn #setter_name(&mut self, value: #width_ty) {
                let raw = value;
                #write
            }
        }
    })
}

fn width_type(reg: &RegisterDef) -> TokenStream {
    match reg.width {
        RegWidth::U8 => quote! { u8 },
        RegWidth::U16 => quote! { u16 },
    }
}
