//! In-flight request representation.
//!
//! A [`Request`] is built and submitted by the upper layer, owned by the
//! core's active table while the adapter works on it, and handed back
//! through [`CompletionSink::on_complete`](crate::CompletionSink::on_complete)
//! exactly once.

use core::fmt;

use bitflags::bitflags;

use crate::HbaError;

/// Hardware slot (SCB) number. Slot numbers are the only handle the chip
/// knows about.
pub type Slot = u16;

/// Slot value the chip uses for "no SCB".
pub const NULL_SLOT: Slot = 0xFFFF;

/// Number of SCSI target ids on a wide bus.
pub const MAX_TARGETS: usize = 16;

bitflags! {
    /// Per-request behaviour flags chosen by the submitter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u8 {
        /// Issued as a tagged (simple queue) command.
        const TAGGED = 1 << 0;
        /// The target may not disconnect.
        const DISALLOW_DISCONNECT = 1 << 1;
        /// Freeze the upper-layer queue when this request fails.
        const FREEZE_ON_ERROR = 1 << 2;
        /// Sense data is fetched automatically on check condition.
        const AUTO_SENSE = 1 << 3;
    }
}

// ---------------------------------------------------------------------------
// Host status
// ---------------------------------------------------------------------------

/// Adapter-side result of a request.
///
/// The discriminants are the codes reported to the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostStatus {
    /// No adapter-side error.
    NoStatus = 0x00,
    /// Aborted on request of the host.
    Aborted = 0x04,
    /// Aborted by the adapter.
    AbortedByAdapter = 0x05,
    /// Aborted by a bus reset issued by this adapter.
    AbortedBusReset = 0x06,
    /// Aborted by a reset asserted by another device on the bus.
    AbortedThirdPartyReset = 0x07,
    /// Aborted by a target reset.
    AbortedTargetReset = 0x08,
    /// Aborted because of an I/O mode (transceiver) change.
    AbortedIoError = 0x09,
    /// The target did not respond to selection.
    SelectionTimeout = 0x11,
    /// More or fewer bytes were transferred than requested.
    DataOverrunUnderrun = 0x12,
    /// The target released the bus unexpectedly.
    BusFree = 0x13,
    /// The target entered an unexpected bus phase.
    PhaseError = 0x14,
    /// Aborted because of a PCI transaction error.
    AbortedPciError = 0x15,
    /// Aborted because of a PCI-X split completion error.
    AbortedPcixSplitError = 0x16,
    /// Internal adapter hardware error.
    HardwareError = 0x20,
    /// Parity or CRC error detected by the initiator.
    DetectedError = 0x48,
    /// Aborted because the channel could not be brought back.
    AbortedChannelFailed = 0x61,
}

impl HostStatus {
    /// Returns `true` for the codes that mean "terminated by an abort".
    #[must_use]
    pub const fn is_abort(self) -> bool {
        matches!(
            self,
            Self::Aborted
                | Self::AbortedByAdapter
                | Self::AbortedBusReset
                | Self::AbortedThirdPartyReset
                | Self::AbortedTargetReset
                | Self::AbortedIoError
                | Self::AbortedPciError
                | Self::AbortedPcixSplitError
                | Self::AbortedChannelFailed
        )
    }
}

/// SCSI status byte returned by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStatus(pub u8);

impl TargetStatus {
    /// Command completed.
    pub const GOOD: Self = Self(0x00);
    /// Sense data is available.
    pub const CHECK_CONDITION: Self = Self(0x02);
    /// The target is busy.
    pub const BUSY: Self = Self(0x08);
}

// ---------------------------------------------------------------------------
// Manager state
// ---------------------------------------------------------------------------

/// Software view of where a request is in its life.
///
/// Normal progress is `Queued → Executing → {Disconnected, Completing} → Done`;
/// any non-terminal state may enter the abort path
/// `AbortRequested → AbortInProgress → AbortedDone`. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgrState {
    /// Handed to the adapter, not yet seen on the bus.
    Queued,
    /// Selecting or connected.
    Executing,
    /// The target disconnected and holds the command.
    Disconnected,
    /// Posted to the done queue, being finalized.
    Completing,
    /// Terminated normally.
    Done,
    /// An abort was asked for and the request is being located.
    AbortRequested,
    /// An abort is armed in hardware and will finish asynchronously.
    AbortInProgress,
    /// Terminated by an abort or a recovery.
    AbortedDone,
}

impl MgrState {
    /// Returns `true` once the request has been handed back.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::AbortedDone)
    }

    const fn normal_rank(self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Executing => Some(1),
            Self::Disconnected => Some(2),
            Self::Completing => Some(3),
            _ => None,
        }
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Queued => false,
            Self::Executing | Self::Disconnected | Self::Completing => {
                match (self.normal_rank(), next.normal_rank()) {
                    (Some(from), Some(to)) => to > from,
                    _ => false,
                }
            }
            Self::Done => self.normal_rank().is_some(),
            Self::AbortRequested => self.normal_rank().is_some(),
            Self::AbortInProgress => matches!(self, Self::AbortRequested),
            Self::AbortedDone => true,
        }
    }
}

impl fmt::Display for MgrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Disconnected => "disconnected",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::AbortRequested => "abort requested",
            Self::AbortInProgress => "abort in progress",
            Self::AbortedDone => "aborted",
        })
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One submitted SCSI command as seen by the interrupt and recovery core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Hardware slot the command occupies.
    pub slot: Slot,
    /// SCSI target id.
    pub target: u8,
    /// Logical unit.
    pub lun: u8,
    /// Submitter flags.
    pub flags: RequestFlags,
    /// Adapter-side result.
    pub host_status: HostStatus,
    /// Target status byte.
    pub target_status: TargetStatus,
    /// Bytes requested but not transferred.
    pub residual: u32,
    state: MgrState,
}

impl Request {
    /// Creates a queued request for `target`/`lun` in `slot`.
    #[must_use]
    pub const fn new(slot: Slot, target: u8, lun: u8, flags: RequestFlags) -> Self {
        Self {
            slot,
            target,
            lun,
            flags,
            host_status: HostStatus::NoStatus,
            target_status: TargetStatus::GOOD,
            residual: 0,
            state: MgrState::Queued,
        }
    }

    /// Current manager state.
    #[must_use]
    pub const fn state(&self) -> MgrState {
        self.state
    }

    /// Moves to `next`, refusing any transition that would go backwards.
    ///
    /// # Errors
    ///
    /// Returns [`HbaError::InvalidTransition`] and leaves the state untouched
    /// if `next` is not a legal successor.
    pub fn advance(&mut self, next: MgrState) -> Result<(), HbaError> {
        if self.state.can_advance_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err(HbaError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    /// Records `status` unless an earlier error is already recorded.
    pub fn set_status_if_clear(&mut self, status: HostStatus) {
        if self.host_status == HostStatus::NoStatus {
            self.host_status = status;
        }
    }
}
