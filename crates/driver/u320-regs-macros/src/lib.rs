//! Proc-macro crate for the `register_block!` register DSL.
//!
//! Generates typed accessors for a block of 8-bit adapter registers reached
//! through a `RegisterInterface` capability. No memory is touched directly:
//! every generated read and write is a call on the borrowed interface, so the
//! same block works against real hardware and against a simulator.

mod codegen;
mod parse;

use proc_macro::TokenStream;
use syn::parse_macro_input;

use crate::parse::RegisterBlock;

/// Generates a typed register block struct borrowing a `RegisterInterface`.
///
/// # Syntax
///
/// ```ignore
/// register_block! {
///     /// Doc comment for the struct.
///     pub StructName {
///         /// Doc comment for the register.
///         [offset; width; access_mode] name => OptionalFlagsType,
///     }
/// }
/// ```
///
/// - `offset`: register number, any `u16` constant expression
/// - `width`: `u8`, or `u16` for a little-endian pair at `offset`, `offset + 1`
/// - `access_mode`: `ro` (read-only), `wo` (write-only), `rw` (read-write)
/// - `name`: register name (generates method names)
/// - `=> Type`: optional bitflags type (must have `from_bits_retain`/`.bits()`)
///
/// # Generated Code
///
/// `struct StructName<'a, B: RegisterInterface + ?Sized>` with:
/// - `new(&'a mut B)` and `bus()` to reach the wrapped interface
/// - `ro`/`rw`: `fn name(&mut self) -> Type` (reader)
/// - `wo`/`rw`: `fn set_name(&mut self, value: Type)` (writer)
///
/// `RegisterInterface` must be in scope at the invocation site.
///
/// # Example
///
/// ```ignore
/// use u320_api::{RegisterInterface, register_block};
///
/// register_block! {
///     /// Host interrupt registers.
///     pub HostRegs {
///         /// Host interrupt status.
///         [0x01; u8; ro] hstintstat => HstIntStat,
///         /// Done-queue producer index.
///         [0x06; u16; ro] qout_head,
///     }
/// }
/// ```
#[proc_macro]
pub fn register_block(input: TokenStream) -> TokenStream {
    let block = parse_macro_input!(input as RegisterBlock);
    codegen::generate(&block).into()
}
