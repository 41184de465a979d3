//! Interrupt dispatch and exception recovery for Ultra320 SCSI host
//! adapters.
//!
//! The core sits between the chip (reached only through
//! [`RegisterInterface`](u320_api::RegisterInterface)) and the upper layer
//! that owns requests. An interrupt is split in two halves:
//!
//! - the **front end** ([`AdapterContext::front_end`]) classifies it and
//!   masks the adapter when anything beyond a completion is pending;
//! - the **back end** ([`AdapterContext::back_end`]) drains the done queue
//!   and runs one [`exception`] handler at a time by priority.
//!
//! Handlers settle their own request and report an [`Outcome`]. Anything
//! that needs the bus or chip reset goes through
//! [`AdapterContext::recover`], the only place that aborts every request.
//! Callers abort single requests with [`AdapterContext::abort`].
//! [`SharedAdapter`] puts all of it behind one context-tagged lock.

#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub mod abort;
pub mod backend;
mod chip;
pub mod completion;
pub mod config;
pub mod context;
pub mod exception;
pub mod frontend;
pub mod poll;
mod protocol;
pub mod recovery;
pub mod regs;
pub mod shared;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod table;

#[cfg(test)]
mod tests;

pub use abort::AbortOutcome;
pub use backend::DispatchReport;
pub use config::{AdapterConfig, ChipFeatures};
pub use context::{AdapterContext, AdapterStats, TargetSet};
pub use exception::{ExceptionCode, Outcome};
pub use frontend::InterruptClass;
pub use poll::{Timeout, poll_with_timeout};
pub use shared::SharedAdapter;
pub use table::RequestId;
