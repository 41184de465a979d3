//! Caller-facing error type.

use core::fmt;

use crate::{MgrState, Slot};

/// Errors returned to callers of the core's public operations.
///
/// Hardware and protocol faults never surface here; they terminate the
/// affected requests with a [`HostStatus`](crate::HostStatus) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbaError {
    /// The slot number is beyond the configured number of slots.
    SlotOutOfRange(Slot),
    /// The slot already holds a live request.
    SlotBusy(Slot),
    /// No live request occupies the slot.
    SlotEmpty(Slot),
    /// A manager-state change would move a request backwards.
    InvalidTransition {
        /// State before the attempted change.
        from: MgrState,
        /// Rejected successor.
        to: MgrState,
    },
    /// A bounded hardware wait ran out of iterations.
    Timeout,
    /// The adapter no longer responds (all-ones readback).
    DeviceGone,
}

impl fmt::Display for HbaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotOutOfRange(slot) => write!(f, "slot {slot} out of range"),
            Self::SlotBusy(slot) => write!(f, "slot {slot} already active"),
            Self::SlotEmpty(slot) => write!(f, "slot {slot} not active"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid request state change: {from} -> {to}")
            }
            Self::Timeout => f.write_str("hardware wait timed out"),
            Self::DeviceGone => f.write_str("adapter not responding"),
        }
    }
}

impl core::error::Error for HbaError {}
