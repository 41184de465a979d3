//! Core support for the U320 host-bus-adapter driver crates.
//!
//! Everything here is `no_std`, allocation-free and callable from interrupt
//! context:
//!
//! - [`log`]: leveled, per-adapter log records routed to a registered sink.
//! - [`sync`]: the adapter lock that serializes dispatch cycles with
//!   out-of-band callers such as `abort()`.

#![cfg_attr(not(test), no_std)]

pub mod log;
pub mod sync;

pub use log::Level;
