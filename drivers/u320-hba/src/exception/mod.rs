//! Exception handlers.
//!
//! Each handler owns one exception class: it clears the status bits it is
//! responsible for, settles the affected request (if any) and reports an
//! [`Outcome`]. A handler never resets the adapter for its own condition;
//! the back end is the only place that turns an outcome into a reset.
//!
//! Requests are passed as the slot resolved from the hardware register
//! that names them, so a handler can both update and terminate the request
//! through the context.

mod busfree;
mod hwerr;
mod overrun;
mod parity;
mod pci;
mod phase;
mod reset;
mod selto;
mod seqint;

use u320_api::{
    AsyncEvent, HostStatus, MAX_TARGETS, RecoveryReason, RegisterInterface, Slot, UpperLayer,
};
use u320_core::{hdebug, hwarn};

use crate::context::AdapterContext;
use crate::regs::{HstIntStat, Lqistat1, Sstat0, Sstat1};

/// Result of one exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The condition was dealt with locally.
    Handled,
    /// The condition was cleared but the adapter needs a full recovery.
    HandledNeedsReset(RecoveryReason),
    /// A bounded wait failed or state is inconsistent; recover immediately.
    Fatal(RecoveryReason),
}

impl Outcome {
    /// Recovery reason, unless the outcome is [`Outcome::Handled`].
    #[must_use]
    pub const fn reset_reason(self) -> Option<RecoveryReason> {
        match self {
            Self::Handled => None,
            Self::HandledNeedsReset(reason) | Self::Fatal(reason) => Some(reason),
        }
    }
}

/// Exception classes a handler can be invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// The target did not answer selection.
    SelectionTimeout,
    /// The bus went free unexpectedly.
    BusFree,
    /// SCSI parity error, or a packetized CRC error when `crc` is set.
    Parity {
        /// CRC rather than parity.
        crc: bool,
    },
    /// Data overrun or underrun; `after_bus_free` if the target already
    /// released the bus.
    Overrun {
        /// The connection is already gone.
        after_bus_free: bool,
    },
    /// Phase mismatch the sequencer could not handle.
    PhaseMismatch,
    /// Transceiver mode changed.
    IoError,
    /// Internal hardware fault.
    HardwareError,
    /// PCI or PCI-X transaction error.
    PciError,
    /// Another device reset the bus.
    ThirdPartyReset,
    /// Sequencer interrupt with the raw `SEQINTCODE` value.
    Sequencer(u8),
}

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Runs the handler for `code` against the request in `slot`.
    pub fn handle(&mut self, code: ExceptionCode, slot: Option<Slot>) -> Outcome {
        hdebug!(self.config.unit, "exception {:?} slot {:?}", code, slot);
        match code {
            ExceptionCode::SelectionTimeout => self.handle_selection_timeout(slot),
            ExceptionCode::BusFree => self.handle_bus_free(slot),
            ExceptionCode::Parity { crc } => self.handle_parity(slot, crc),
            ExceptionCode::Overrun { after_bus_free } => self.handle_overrun(slot, after_bus_free),
            ExceptionCode::PhaseMismatch => self.handle_phase_mismatch(slot),
            ExceptionCode::IoError => self.handle_io_error(),
            ExceptionCode::HardwareError => self.handle_hardware_error(),
            ExceptionCode::PciError => self.handle_pci_error(),
            ExceptionCode::ThirdPartyReset => self.handle_third_party_reset(),
            ExceptionCode::Sequencer(raw) => self.handle_seqint(raw),
        }
    }

    /// Decodes the highest-priority SCSI bus condition and handles it.
    pub(crate) fn handle_scsi_exception(&mut self) -> Outcome {
        let mut scsi = self.scsi();
        let sstat0 = scsi.sstat0();
        let sstat1 = scsi.sstat1();
        let lqi = scsi.lqistat1();

        let outcome = if sstat1.contains(Sstat1::SCSIRSTI) {
            self.handle(ExceptionCode::ThirdPartyReset, None)
        } else if sstat1.contains(Sstat1::SCSIPERR) || lqi.intersects(Lqistat1::CRC) {
            let slot = self.active_slot();
            let crc = !sstat1.contains(Sstat1::SCSIPERR);
            self.handle(ExceptionCode::Parity { crc }, slot)
        } else if sstat1.contains(Sstat1::SELTIMO) {
            let slot = self.waiting_slot();
            self.handle(ExceptionCode::SelectionTimeout, slot)
        } else if sstat1.contains(Sstat1::BUSFREE) {
            self.handle(ExceptionCode::BusFree, None)
        } else if sstat1.contains(Sstat1::PHASEMIS) {
            let slot = self.active_slot();
            self.handle(ExceptionCode::PhaseMismatch, slot)
        } else if sstat0.contains(Sstat0::IOERR) {
            self.handle(ExceptionCode::IoError, None)
        } else if sstat0.contains(Sstat0::OVERRUN) {
            let slot = self.active_slot();
            self.scsi().set_clrsint0(Sstat0::OVERRUN);
            self.handle(ExceptionCode::Overrun { after_bus_free: false }, slot)
        } else {
            hwarn!(
                self.config.unit,
                "SCSI interrupt without status: {:?} {:?}",
                sstat0,
                sstat1
            );
            Outcome::Handled
        };
        // Sources still latched re-assert the summary bit.
        self.host().set_clrhstint(HstIntStat::SCSIINT);
        outcome
    }

    /// Transceiver mode change: everything in flight is lost.
    fn handle_io_error(&mut self) -> Outcome {
        hwarn!(self.config.unit, "transceiver mode changed");
        self.scsi().set_clrsint0(Sstat0::IOERR);
        self.upper.on_event(AsyncEvent::IoError);
        self.drain_completions();
        if self.reset_channel().is_err() {
            return Outcome::HandledNeedsReset(RecoveryReason::HardwareError);
        }
        self.abort_all(HostStatus::AbortedIoError);
        self.restart_sequencer();
        for target in 0..MAX_TARGETS as u8 {
            self.flag_renegotiation(target);
        }
        Outcome::Handled
    }
}
