//! Boundary of the U320 interrupt dispatch and recovery core.
//!
//! Everything the core consumes from, or produces for, the rest of the
//! driver lives here:
//!
//! - **Register access** -- [`RegisterInterface`] and [`Bank`], the only way
//!   the core touches hardware, plus the [`register_block!`] DSL built on it.
//! - **Requests** -- [`Request`] with its [`MgrState`] machine, [`HostStatus`]
//!   result codes and [`RequestFlags`].
//! - **Upper layer** -- [`CompletionSink`] and [`EventSink`], receiving
//!   terminated requests and [`AsyncEvent`] notifications.
//! - **Errors** -- [`HbaError`] for caller-facing failures.

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod event;
pub mod regio;
pub mod request;

pub use error::HbaError;
pub use event::{AsyncEvent, BadSeq, CompletionSink, EventSink, RecoveryReason, UpperLayer};
pub use regio::{Bank, RegisterInterface};
pub use request::{
    HostStatus, MAX_TARGETS, MgrState, NULL_SLOT, Request, RequestFlags, Slot, TargetStatus,
};
pub use u320_regs_macros::register_block;
