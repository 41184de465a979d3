//! Upper-layer notifications.
//!
//! The core reports results through two sinks: [`CompletionSink`] receives
//! every terminated [`Request`] exactly once, [`EventSink`] receives
//! [`AsyncEvent`]s that bracket recovery actions.

use core::fmt;

use crate::{HostStatus, Request};

/// Diagnostic id of the place that detected a protocol-invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadSeq(pub u8);

impl BadSeq {
    /// Command complete for a slot with no live request.
    pub const CMDCMPLT_UNMAPPED: Self = Self(4);
    /// Selection timeout with no resolvable request.
    pub const SELTIMO_UNMAPPED: Self = Self(5);
    /// Parity/CRC error with no resolvable request.
    pub const PARITY_UNMAPPED: Self = Self(6);
    /// Phase mismatch with no resolvable request.
    pub const PHASEMIS_UNMAPPED: Self = Self(7);
    /// Check condition reported for a slot with no live request.
    pub const STATUS_UNMAPPED: Self = Self(8);
    /// Reselection without an identify message.
    pub const NO_IDENTIFY: Self = Self(9);
    /// Sequencer interrupt code the core does not know.
    pub const UNKNOWN_SEQINT: Self = Self(10);
    /// Abort-target interrupt for a slot with no live request.
    pub const ABORT_TARGET_UNMAPPED: Self = Self(11);
    /// Overrun reported for a slot with no live request.
    pub const OVERRUN_UNMAPPED: Self = Self(12);
    /// CDB transfer kept failing after a retry.
    pub const CDB_RETRY_EXHAUSTED: Self = Self(13);
    /// Message-out phase never arrived.
    pub const MSGOUT_TIMEOUT: Self = Self(15);
    /// Bus never went free after an abort-class message.
    pub const BUSFREE_TIMEOUT: Self = Self(16);
    /// Bit-bucketing an overrun never left the data phase.
    pub const BITBUCKET_TIMEOUT: Self = Self(17);
    /// Unexpected bus-free while nothing was connected.
    pub const BUSFREE_UNMAPPED: Self = Self(18);
    /// The sequencer never acknowledged a pause.
    pub const PAUSE_TIMEOUT: Self = Self(33);
    /// A DMA engine never acknowledged being disabled.
    pub const DMA_QUIESCE_TIMEOUT: Self = Self(39);
    /// The bus stayed hung after a reset.
    pub const BUS_HUNG: Self = Self(40);
}

impl fmt::Display for BadSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad sequence #{}", self.0)
    }
}

/// Why the recovery coordinator was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// A protocol-invariant violation was detected.
    BadSequence(BadSeq),
    /// Too many exceptions in a single dispatch cycle.
    Spurious,
    /// PCI transaction error.
    PciError,
    /// PCI-X split completion error.
    PcixSplitError,
    /// Unrecoverable internal hardware fault.
    HardwareError,
    /// Another device reset the bus.
    ThirdPartyReset,
    /// The host asked for a reset.
    HostRequested,
    /// The adapter could not be brought back even by a chip reset.
    ChannelFailed,
}

impl RecoveryReason {
    /// Host status given to every request aborted for this reason.
    #[must_use]
    pub const fn host_status(self) -> HostStatus {
        match self {
            Self::BadSequence(_) | Self::Spurious | Self::HostRequested => {
                HostStatus::AbortedBusReset
            }
            Self::PciError => HostStatus::AbortedPciError,
            Self::PcixSplitError => HostStatus::AbortedPcixSplitError,
            Self::HardwareError => HostStatus::HardwareError,
            Self::ThirdPartyReset => HostStatus::AbortedThirdPartyReset,
            Self::ChannelFailed => HostStatus::AbortedChannelFailed,
        }
    }
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSequence(id) => write!(f, "{id}"),
            Self::Spurious => f.write_str("exception storm"),
            Self::PciError => f.write_str("PCI error"),
            Self::PcixSplitError => f.write_str("PCI-X split error"),
            Self::HardwareError => f.write_str("hardware error"),
            Self::ThirdPartyReset => f.write_str("third-party reset"),
            Self::HostRequested => f.write_str("host requested"),
            Self::ChannelFailed => f.write_str("channel failed"),
        }
    }
}

/// Asynchronous notification for the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEvent {
    /// Stop submitting: a recovery action is starting.
    Freeze(RecoveryReason),
    /// Submission may resume.
    Unfreeze,
    /// The SCSI bus was reset.
    BusReset {
        /// `true` if another device asserted the reset.
        third_party: bool,
    },
    /// A host-side I/O error was detected.
    IoError,
    /// Transfer parameters of the target must be renegotiated.
    DeviceNeedsNegotiation(u8),
}

/// Receives every terminated request exactly once.
pub trait CompletionSink {
    /// Takes back ownership of a terminated request.
    fn on_complete(&mut self, request: Request);
}

/// Receives asynchronous adapter events.
pub trait EventSink {
    /// Handles one event.
    fn on_event(&mut self, event: AsyncEvent);
}

/// Both sinks together, as held by an adapter.
pub trait UpperLayer: CompletionSink + EventSink {}

impl<T: CompletionSink + EventSink + ?Sized> UpperLayer for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_abort_codes() {
        assert_eq!(
            RecoveryReason::BadSequence(BadSeq::CMDCMPLT_UNMAPPED).host_status(),
            HostStatus::AbortedBusReset
        );
        assert_eq!(RecoveryReason::PciError.host_status(), HostStatus::AbortedPciError);
        assert_eq!(
            RecoveryReason::ThirdPartyReset.host_status(),
            HostStatus::AbortedThirdPartyReset
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            RecoveryReason::BadSequence(BadSeq(4)).to_string(),
            "bad sequence #4"
        );
        assert_eq!(RecoveryReason::PcixSplitError.to_string(), "PCI-X split error");
    }
}
