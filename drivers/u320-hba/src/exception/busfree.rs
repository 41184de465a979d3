//! Unexpected bus free.

use u320_api::{
    BadSeq, HostStatus, MgrState, RecoveryReason, RegisterInterface, Slot, UpperLayer,
};
use u320_core::{hdebug, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{Phase, ScbRegs, Sstat1, bus_free_channel};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_bus_free(&mut self, slot: Option<Slot>) -> Outcome {
        let mut scsi = self.scsi();
        let channel = bus_free_channel(scsi.sstat2());
        scsi.set_clrsint1(Sstat1::BUSFREE);

        let slot = match (slot, channel) {
            (Some(slot), _) => self.resolve(slot),
            (None, Some(bank)) => {
                self.select_bank(bank);
                let raw = ScbRegs::new(&mut self.regs).scbptr();
                self.resolve(raw)
            }
            (None, None) => self.active_slot(),
        };
        if let Some(bank) = channel {
            self.reclaim_channel(bank);
        }
        let last_phase = self.seq().lastphase().phase();

        let Some(slot) = slot else {
            if channel.is_some() {
                hwarn!(self.config.unit, "bus free on a channel with no request");
                return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                    BadSeq::BUSFREE_UNMAPPED,
                ));
            }
            hdebug!(self.config.unit, "bus free with nothing connected");
            return Outcome::Handled;
        };
        self.clear_active();

        let target = self.table.get(slot).map_or(0, |r| r.target);
        if last_phase == Phase::MsgOut && self.table.take_retry(slot) {
            // The target dropped a message exchange; run the command again
            // once with fresh negotiation.
            hdebug!(self.config.unit, "slot {} bus free in message-out, retrying", slot);
            self.requeue_front(slot);
            self.flag_renegotiation(target);
            return Outcome::Handled;
        }

        hwarn!(self.config.unit, "unexpected bus free, slot {} target {}", slot, target);
        if let Some(request) = self.table.get_mut(slot) {
            request.set_status_if_clear(HostStatus::BusFree);
        }
        self.terminate(slot, MgrState::Done, None);
        Outcome::Handled
    }
}
