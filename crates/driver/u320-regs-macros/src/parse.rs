//! Parsing logic for the `register_block!` DSL.

use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Expr, Ident, Path, Token, Visibility, braced, bracketed};

/// A complete register block definition.
pub struct RegisterBlock {
    /// Doc attributes on the struct.
    pub attrs: Vec<Attribute>,
    /// Visibility of the generated struct.
    pub vis: Visibility,
    /// Name of the generated struct.
    pub name: Ident,
    /// Register definitions.
    pub registers: Vec<RegisterDef>,
}

/// Access mode for a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only.
    ReadOnly,
    /// Write-only.
    WriteOnly,
    /// Read-write.
    ReadWrite,
}

/// Width of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegWidth {
    /// A single byte register.
    U8,
    /// Two consecutive byte registers, low byte first.
    U16,
}

/// A single register definition.
pub struct RegisterDef {
    /// Doc attributes on this register.
    pub attrs: Vec<Attribute>,
    /// Register number expression.
    pub offset: Expr,
    /// Value width.
    pub width: RegWidth,
    /// Access mode.
    pub access: AccessMode,
    /// Register name (used for method names).
    pub name: Ident,
    /// Optional bitflags type.
    pub flags_type: Option<Path>,
}

impl Parse for RegisterBlock {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let attrs = input.call(Attribute::parse_outer)?;
        let vis: Visibility = input.parse()?;
        let name: Ident = input.parse()?;

        let content;
        braced!(content in input);

        let mut registers = Vec::new();
        while !content.is_empty() {
            registers.push(content.call(parse_register)?);
        }

        Ok(Self {
            attrs,
            vis,
            name,
            registers,
        })
    }
}

/// Parses one `[offset; width; access] name => Type,` line.
fn parse_register(input: ParseStream) -> syn::Result<RegisterDef> {
    let attrs = input.call(Attribute::parse_outer)?;

    let bracket_content;
    bracketed!(bracket_content in input);

    let offset: Expr = bracket_content.parse()?;
    bracket_content.parse::<Token![;]>()?;

    let width_ident: Ident = bracket_content.parse()?;
    let width = match width_ident.to_string().as_str() {
        "u8" => RegWidth::U8,
        "u16" => RegWidth::U16,
        _ => {
            return Err(syn::Error::new(
                width_ident.span(),
                "expected register width: u8 or u16",
            ));
        }
    };

    bracket_content.parse::<Token![;]>()?;

    let access_ident: Ident = bracket_content.parse()?;
    let access = match access_ident.to_string().as_str() {
        "ro" => AccessMode::ReadOnly,
        "wo" => AccessMode::WriteOnly,
        "rw" => AccessMode::ReadWrite,
        _ => {
            return Err(syn::Error::new(
                access_ident.span(),
                "expected access mode: ro, wo, or rw",
            ));
        }
    };

    if !bracket_content.is_empty() {
        return Err(bracket_content.error("unexpected tokens after access mode"));
    }

    let name: Ident = input.parse()?;

    let flags_type = if input.peek(Token![=>]) {
        input.parse::<Token![=>]>()?;
        Some(input.parse::<Path>()?)
    } else {
        None
    };

    if !input.is_empty() {
        input.parse::<Token![,]>()?;
    }

    Ok(RegisterDef {
        attrs,
        offset,
        width,
        access,
        name,
        flags_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_with_flags_and_pairs() {
        let block: RegisterBlock = syn::parse_str(
            "/// Host registers.
             pub HostRegs {
                 /// Status.
                 [0x01; u8; ro] hstintstat => HstIntStat,
                 [off::QOUT_TAIL; u16; rw] qout_tail,
             }",
        )
        .unwrap();
        assert_eq!(block.name, "HostRegs");
        assert_eq!(block.registers.len(), 2);
        assert_eq!(block.registers[0].access, AccessMode::ReadOnly);
        assert!(block.registers[0].flags_type.is_some());
        assert_eq!(block.registers[1].width, RegWidth::U16);
        assert_eq!(block.registers[1].access, AccessMode::ReadWrite);
    }

    #[test]
    fn rejects_wide_registers() {
        let err = syn::parse_str::<RegisterBlock>("pub R { [0x00; u32; rw] wide, }");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unknown_access_mode() {
        let err = syn::parse_str::<RegisterBlock>("pub R { [0x00; u8; rx] bad, }");
        assert!(err.is_err());
    }
}
