//! Data overrun and underrun.

use u320_api::{
    BadSeq, HostStatus, MgrState, RecoveryReason, RegisterInterface, Slot, UpperLayer,
};
use u320_core::{hdebug, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::poll::{Timeout, poll_with_timeout};
use crate::regs::{SgStatus, Sxfrctl1};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_overrun(&mut self, slot: Option<Slot>, after_bus_free: bool) -> Outcome {
        let Some(slot) = slot.filter(|&s| self.table.get(s).is_some()) else {
            hwarn!(self.config.unit, "overrun with no connected request");
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::OVERRUN_UNMAPPED,
            ));
        };

        let mut scb = self.scb(slot);
        let sg = scb.scb_sgstatus();
        let resid = u32::from(scb.scb_resid_lo()) | (u32::from(scb.scb_resid_hi()) << 16);
        let overrun = sg.contains(SgStatus::OVERRUN);
        let residual = if overrun { 0 } else { resid };
        if let Some(request) = self.table.get_mut(slot) {
            request.residual = residual;
            request.set_status_if_clear(HostStatus::DataOverrunUnderrun);
        }
        hdebug!(
            self.config.unit,
            "slot {} {}, residual {}",
            slot,
            if overrun { "overrun" } else { "underrun" },
            residual
        );

        if overrun && !after_bus_free && self.bit_bucket().is_err() {
            hwarn!(self.config.unit, "slot {} kept sending data", slot);
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::BITBUCKET_TIMEOUT,
            ));
        }
        if after_bus_free {
            self.clear_active();
            self.terminate(slot, MgrState::Done, None);
        }
        Outcome::Handled
    }

    /// Throws away incoming data until the target leaves the data phase.
    fn bit_bucket(&mut self) -> Result<(), Timeout> {
        let mut scsi = self.scsi();
        let xfr = scsi.sxfrctl1();
        scsi.set_sxfrctl1(xfr | Sxfrctl1::BITBUCKET);

        let ceiling = self.config.bitbucket_poll;
        let result = poll_with_timeout(|| !self.scsi().scsisigi().in_data_phase(), ceiling);

        let mut scsi = self.scsi();
        let xfr = scsi.sxfrctl1();
        scsi.set_sxfrctl1(xfr - Sxfrctl1::BITBUCKET);
        result
    }
}
