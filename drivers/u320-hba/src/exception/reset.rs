//! SCSI bus reset asserted by another device.

use u320_api::{
    AsyncEvent, BadSeq, HostStatus, RecoveryReason, RegisterInterface, UpperLayer,
};
use u320_core::{herr, hinfo, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::poll::poll_with_timeout;
use crate::regs::HstIntStat;

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_third_party_reset(&mut self) -> Outcome {
        hwarn!(self.config.unit, "bus reset by another device");
        self.reset_in_progress = true;
        self.upper
            .on_event(AsyncEvent::Freeze(RecoveryReason::ThirdPartyReset));

        self.drain_completions();
        let channel = self.reset_channel();
        let aborted = self.abort_all(HostStatus::AbortedThirdPartyReset);

        let ceiling = self.config.bus_settle_poll;
        let alive = channel.is_ok() && poll_with_timeout(|| self.bus_quiet(), ceiling).is_ok();
        if !alive {
            hwarn!(self.config.unit, "bus did not settle, driving a reset");
            self.bus_hung = true;
            if self.reset_bus().is_err() {
                herr!(self.config.unit, "bus hung after third-party reset");
                self.reset_in_progress = false;
                self.upper.on_event(AsyncEvent::Unfreeze);
                return Outcome::Fatal(RecoveryReason::BadSequence(BadSeq::BUS_HUNG));
            }
            self.bus_hung = false;
        }

        self.renegotiate_all();
        self.restart_sequencer();
        self.host().set_clrhstint(HstIntStat::SCSIINT);
        self.upper.on_event(AsyncEvent::Unfreeze);
        self.upper
            .on_event(AsyncEvent::BusReset { third_party: true });
        self.reset_in_progress = false;
        hinfo!(
            self.config.unit,
            "third-party reset handled, {} requests aborted",
            aborted
        );
        Outcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AdapterConfig;
    use crate::context::AdapterContext;
    use crate::exception::Outcome;
    use crate::regs::{ScsiSig, Sstat1};
    use crate::sim::{Recorder, SimBus};
    use u320_api::{
        AsyncEvent, BadSeq, HostStatus, MgrState, RecoveryReason, Request, RequestFlags,
    };

    fn ctx() -> AdapterContext<SimBus, Recorder> {
        let mut ctx = AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(16).with_poll_ceiling(30),
        );
        for slot in [1, 4] {
            ctx.activate(Request::new(slot, 2, 0, RequestFlags::empty()))
                .unwrap();
        }
        ctx.set_negotiated(2, true);
        ctx
    }

    #[test]
    fn aborts_everything_between_freeze_and_unfreeze() {
        let mut ctx = ctx();
        ctx.regs_mut().raise_scsi(Sstat1::SCSIRSTI);
        assert_eq!(ctx.handle_scsi_exception(), Outcome::Handled);

        let completions = &ctx.upper().completions;
        assert_eq!(completions.len(), 2);
        assert!(completions.iter().all(|r| {
            r.state() == MgrState::AbortedDone
                && r.host_status == HostStatus::AbortedThirdPartyReset
        }));
        assert_eq!(
            ctx.upper().events,
            [
                AsyncEvent::Freeze(RecoveryReason::ThirdPartyReset),
                AsyncEvent::DeviceNeedsNegotiation(2),
                AsyncEvent::Unfreeze,
                AsyncEvent::BusReset { third_party: true },
            ]
        );
        assert!(!ctx.reset_in_progress);
        assert!(!ctx.bus_hung());
    }

    #[test]
    fn dead_bus_is_fatal() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().bus_stuck = true;
        ctx.regs_mut().set_signals(ScsiSig::BSYI | ScsiSig::SELI);
        ctx.regs_mut().raise_scsi(Sstat1::SCSIRSTI);
        assert_eq!(
            ctx.handle_scsi_exception(),
            Outcome::Fatal(RecoveryReason::BadSequence(BadSeq::BUS_HUNG))
        );
        assert!(ctx.bus_hung());
        assert_eq!(ctx.upper().events.last(), Some(&AsyncEvent::Unfreeze));
        assert_eq!(ctx.upper().completions.len(), 2);
    }
}
