//! SCSI parity and packetized CRC errors.
//!
//! The initiator tells the target what went wrong with a single message
//! chosen from the phase the error was seen in, then either lets the
//! exchange continue or waits for the target to drop the connection.

use u320_api::{
    BadSeq, HostStatus, MgrState, RecoveryReason, RegisterInterface, RequestFlags, Slot,
    UpperLayer,
};
use u320_core::{hdebug, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{Lqistat1, Phase, Sstat1, Sxfrctl1, msg};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_parity(&mut self, slot: Option<Slot>, crc: bool) -> Outcome {
        // Parity checking stays off until the latch is handled.
        let mut scsi = self.scsi();
        let xfr = scsi.sxfrctl1();
        scsi.set_sxfrctl1(xfr - Sxfrctl1::ENSPCHK);
        scsi.set_clrsint1(Sstat1::SCSIPERR);
        if crc {
            scsi.set_clrlqiint1(Lqistat1::CRC);
        }

        let outcome = self.report_parity(slot, crc);

        let mut scsi = self.scsi();
        let xfr = scsi.sxfrctl1();
        scsi.set_sxfrctl1(xfr | Sxfrctl1::ENSPCHK);
        outcome
    }

    fn report_parity(&mut self, slot: Option<Slot>, crc: bool) -> Outcome {
        let Some((slot, target, tagged)) = slot
            .and_then(|s| self.table.get(s))
            .map(|r| (r.slot, r.target, r.flags.contains(RequestFlags::TAGGED)))
        else {
            hwarn!(self.config.unit, "parity error with no connected request");
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::PARITY_UNMAPPED,
            ));
        };

        let phase = self.seq().lastphase().phase();
        let message = match phase {
            Phase::MsgIn => msg::MESSAGE_PARITY_ERROR,
            Phase::DataIn | Phase::Status => msg::INITIATOR_DETECTED_ERROR,
            _ if crc => msg::INITIATOR_DETECTED_ERROR,
            _ if tagged => msg::ABORT_TASK,
            _ => msg::ABORT_TASK_SET,
        };
        hwarn!(
            self.config.unit,
            "{} error in {:?}, slot {}, sending {:#04x}",
            if crc { "CRC" } else { "parity" },
            phase,
            slot,
            message
        );

        if let Some(request) = self.table.get_mut(slot) {
            request.set_status_if_clear(HostStatus::DetectedError);
        }
        self.flag_renegotiation(target);

        if let Err(id) = self.abort_connection(message) {
            return Outcome::Fatal(RecoveryReason::BadSequence(id));
        }
        if msg::ends_connection(message) {
            hdebug!(self.config.unit, "slot {} dropped after parity error", slot);
            self.clear_active();
            self.terminate(slot, MgrState::Done, None);
        }
        Outcome::Handled
    }
}
