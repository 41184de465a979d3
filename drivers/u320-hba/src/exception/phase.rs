//! Phase errors: the target went somewhere the sequencer cannot follow.

use u320_api::{
    BadSeq, HostStatus, MgrState, RecoveryReason, RegisterInterface, RequestFlags, Slot,
    UpperLayer,
};
use u320_core::hwarn;

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{Sstat1, msg};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_phase_mismatch(&mut self, slot: Option<Slot>) -> Outcome {
        self.scsi().set_clrsint1(Sstat1::PHASEMIS);
        let Some(slot) = slot.filter(|&s| self.table.get(s).is_some()) else {
            hwarn!(self.config.unit, "phase error with no connected request");
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::PHASEMIS_UNMAPPED,
            ));
        };
        let phase = self.scsi().scsisigi().phase();
        hwarn!(self.config.unit, "slot {} phase error in {:?}", slot, phase);
        self.drop_connection(slot, HostStatus::PhaseError)
    }

    /// Aborts the connected task of `slot` and terminates it with `status`.
    pub(crate) fn drop_connection(&mut self, slot: Slot, status: HostStatus) -> Outcome {
        let tagged = self
            .table
            .get(slot)
            .is_some_and(|r| r.flags.contains(RequestFlags::TAGGED));
        if let Some(request) = self.table.get_mut(slot) {
            request.set_status_if_clear(status);
        }
        let message = if tagged { msg::ABORT_TASK } else { msg::ABORT_TASK_SET };
        let sent = self.abort_connection(message);
        self.clear_active();
        self.terminate(slot, MgrState::Done, None);
        match sent {
            Ok(()) => Outcome::Handled,
            Err(id) => Outcome::Fatal(RecoveryReason::BadSequence(id)),
        }
    }
}
