//! Selection timeout.

use u320_api::{BadSeq, HostStatus, MgrState, NULL_SLOT, RecoveryReason, RegisterInterface, Slot, UpperLayer};
use u320_core::{hdebug, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{ScsiSeq0, Sstat1};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_selection_timeout(&mut self, slot: Option<Slot>) -> Outcome {
        let mut scsi = self.scsi();
        let seq = scsi.scsiseq0();
        scsi.set_scsiseq0(seq - ScsiSeq0::ENSELO);
        scsi.set_clrsint1(Sstat1::SELTIMO);
        self.seq().set_waiting_scb(NULL_SLOT);

        let Some(slot) = slot else {
            hwarn!(self.config.unit, "selection timeout with nothing selecting");
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::SELTIMO_UNMAPPED,
            ));
        };
        let Some(target) = self.table.get(slot).map(|r| r.target) else {
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::SELTIMO_UNMAPPED,
            ));
        };
        hdebug!(self.config.unit, "selection timeout, slot {} target {}", slot, target);
        self.clear_busy_target(target);
        // Parameters agreed with a device that vanished are stale.
        if self.negotiated.contains(target) {
            self.flag_renegotiation(target);
        }
        self.terminate(slot, MgrState::Done, Some(HostStatus::SelectionTimeout));
        Outcome::Handled
    }
}
