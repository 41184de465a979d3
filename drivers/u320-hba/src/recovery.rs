//! Recovery coordinator.
//!
//! The only place that resets the bus and the channel and the only place
//! that aborts every outstanding request. Handlers report what went wrong;
//! this module decides how far to escalate: bus and channel reset first,
//! then a full chip reset, then giving up on the channel.

use u320_api::{AsyncEvent, HostStatus, RecoveryReason, RegisterInterface, UpperLayer};
use u320_core::{hdebug, herr, hfatal, hinfo, hwarn};

use crate::config::ChipFeatures;
use crate::context::AdapterContext;
use crate::poll::Timeout;
use crate::regs::HstIntStat;

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Brings the adapter back to a known state after `reason`.
    ///
    /// Every live request is handed back with the status derived from the
    /// reason. A call made while a recovery is already running does
    /// nothing; during a third-party reset it only resynchronizes.
    pub fn recover(&mut self, reason: RecoveryReason) {
        if self.in_recovery {
            hdebug!(self.config.unit, "nested recovery ({}) ignored", reason);
            return;
        }
        self.in_recovery = true;
        if let RecoveryReason::BadSequence(id) = reason {
            self.last_bad_seq = Some(id);
        }

        if self.device_gone {
            hwarn!(self.config.unit, "adapter gone, failing all requests");
            self.abort_all(HostStatus::AbortedChannelFailed);
            self.in_recovery = false;
            return;
        }

        let was_paused = match self.pause() {
            Ok(was_paused) => was_paused,
            Err(_) => {
                if self.chip_reset().is_err() {
                    self.fail_channel();
                }
                true
            }
        };

        if self.reset_in_progress {
            // The reset handler is already cleaning up the bus.
            hdebug!(self.config.unit, "recovery ({}) folded into bus reset", reason);
            self.stats.resyncs += 1;
            if !was_paused {
                self.unpause();
            }
            self.in_recovery = false;
            return;
        }

        herr!(self.config.unit, "recovering adapter: {}", reason);
        self.stats.recoveries += 1;
        self.recovery_epoch = self.recovery_epoch.wrapping_add(1);
        self.last_recovery = Some(reason);
        self.upper.on_event(AsyncEvent::Freeze(reason));
        if matches!(reason, RecoveryReason::PciError | RecoveryReason::PcixSplitError) {
            self.upper.on_event(AsyncEvent::IoError);
        }

        // Whatever the chip already finished is delivered normally. An
        // unmapped entry cannot nest a recovery while this one runs.
        if !self.failed {
            self.drain_completions();
        }
        let probe = self.config.features.contains(ChipFeatures::BUS_HANG_CHECK) && !self.failed;
        if let Some(slot) = probe.then(|| self.data_bus_hang()).flatten() {
            hwarn!(self.config.unit, "slot {} held the data bus", slot);
        }

        let mut status = reason.host_status();
        if !self.failed && self.reset_bus_and_channel().is_err() {
            hwarn!(self.config.unit, "bus reset failed, resetting chip");
            let retried = self
                .chip_reset()
                .and_then(|()| self.reset_bus_and_channel());
            if retried.is_err() {
                self.fail_channel();
            }
        }
        if self.failed {
            status = HostStatus::AbortedChannelFailed;
        }

        let aborted = self.abort_all(status);
        self.discard_done_queue();
        self.clear_config_status();
        if !self.failed {
            self.restart_sequencer();
        }
        self.renegotiate_all();
        self.upper.on_event(AsyncEvent::Unfreeze);
        self.upper.on_event(AsyncEvent::BusReset { third_party: false });

        self.host().set_clrhstint(HstIntStat::all());
        self.pending = HstIntStat::empty();
        self.outstanding = 0;
        if !self.failed {
            self.unpause();
            // The back end re-enables on its way out.
            if !self.in_back_end {
                self.enable_interrupts();
            }
        }
        hinfo!(
            self.config.unit,
            "recovery complete, {} requests aborted with {:?}",
            aborted,
            status
        );
        self.in_recovery = false;
    }

    /// Resets the adapter on behalf of the host, clearing a previous
    /// channel failure first.
    pub fn reset_hardware(&mut self) {
        hinfo!(self.config.unit, "host-requested reset");
        self.failed = false;
        self.bus_hung = false;
        self.clear_config_status();
        self.recover(RecoveryReason::HostRequested);
    }

    fn reset_bus_and_channel(&mut self) -> Result<(), Timeout> {
        self.reset_bus()?;
        self.reset_channel()
    }

    fn fail_channel(&mut self) {
        hfatal!(self.config.unit, "channel failed, adapter out of service");
        self.failed = true;
        self.bus_hung = true;
        self.upper.on_event(AsyncEvent::IoError);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AdapterConfig;
    use crate::context::AdapterContext;
    use crate::regs::{Hcntrl, HstIntStat, ScsiSig};
    use crate::sim::{Recorder, SimBus};
    use u320_api::{
        AsyncEvent, BadSeq, HostStatus, MgrState, RecoveryReason, Request, RequestFlags,
    };

    fn ctx() -> AdapterContext<SimBus, Recorder> {
        let mut ctx = AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(32).with_poll_ceiling(30),
        );
        for slot in [2, 7, 11] {
            ctx.activate(Request::new(slot, 4, 0, RequestFlags::empty()))
                .unwrap();
        }
        ctx.set_negotiated(4, true);
        ctx
    }

    #[test]
    fn recovery_aborts_everything_once() {
        let mut ctx = ctx();
        let reason = RecoveryReason::BadSequence(BadSeq::PARITY_UNMAPPED);
        ctx.recover(reason);
        assert_eq!(ctx.active_count(), 0);
        let done = &ctx.upper().completions;
        assert_eq!(done.len(), 3);
        assert!(done.iter().all(|r| r.state() == MgrState::AbortedDone
            && r.host_status == HostStatus::AbortedBusReset));
        assert_eq!(
            ctx.upper().events,
            [
                AsyncEvent::Freeze(reason),
                AsyncEvent::DeviceNeedsNegotiation(4),
                AsyncEvent::Unfreeze,
                AsyncEvent::BusReset { third_party: false },
            ]
        );
        assert_eq!(ctx.stats().recoveries, 1);
        assert_eq!(ctx.last_recovery(), Some(reason));
        assert_eq!(ctx.last_bad_seq(), Some(BadSeq::PARITY_UNMAPPED));
        assert_eq!(ctx.regs().bus_resets(), 1);
        assert!(!ctx.host().hcntrl().contains(Hcntrl::PAUSE));
        assert!(ctx.check_host_idle());
    }

    #[test]
    fn finished_work_is_delivered_before_the_reset() {
        let mut ctx = ctx();
        ctx.regs_mut().post_completion(7);
        ctx.recover(RecoveryReason::Spurious);
        let done = &ctx.upper().completions;
        assert_eq!(done[0].slot, 7);
        assert_eq!(done[0].state(), MgrState::Done);
        assert!(done[1..].iter().all(|r| r.state() == MgrState::AbortedDone));
    }

    #[test]
    fn nested_recovery_is_a_no_op() {
        let mut ctx = ctx();
        ctx.in_recovery = true;
        ctx.recover(RecoveryReason::PciError);
        assert_eq!(ctx.active_count(), 3);
        assert!(ctx.upper().events.is_empty());
        assert_eq!(ctx.stats().recoveries, 0);
    }

    #[test]
    fn recovery_during_bus_reset_only_resyncs() {
        let mut ctx = ctx();
        ctx.reset_in_progress = true;
        ctx.recover(RecoveryReason::Spurious);
        assert_eq!(ctx.active_count(), 3);
        assert_eq!(ctx.stats().resyncs, 1);
        assert_eq!(ctx.stats().recoveries, 0);
        assert!(!ctx.host().hcntrl().contains(Hcntrl::PAUSE));
    }

    #[test]
    fn stuck_bus_escalates_to_chip_reset() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().bus_stuck = true;
        ctx.regs_mut().set_signals(ScsiSig::BSYI);
        ctx.recover(RecoveryReason::HardwareError);
        // The bus never quiets, so even the chip reset cannot save it.
        assert!(ctx.failed());
        assert!(ctx.bus_hung());
        assert_eq!(ctx.stats().escalations, 1);
        assert!(ctx.upper().completions.iter().all(|r| r.host_status
            == HostStatus::AbortedChannelFailed));
        assert!(ctx.upper().events.contains(&AsyncEvent::IoError));
        assert!(ctx.host().hcntrl().contains(Hcntrl::PAUSE));

        ctx.regs_mut().faults().bus_stuck = false;
        ctx.activate(Request::new(3, 1, 0, RequestFlags::empty())).unwrap();
        ctx.reset_hardware();
        assert!(!ctx.failed());
        assert_eq!(ctx.last_recovery(), Some(RecoveryReason::HostRequested));
        assert_eq!(
            ctx.upper().completions.last().map(|r| r.host_status),
            Some(HostStatus::AbortedBusReset)
        );
        assert!(!ctx.host().hcntrl().contains(Hcntrl::PAUSE));
    }

    #[test]
    fn stuck_pause_is_cured_by_chip_reset() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().pause_stuck = true;
        ctx.recover(RecoveryReason::Spurious);
        assert!(!ctx.failed());
        assert_eq!(ctx.stats().escalations, 1);
        assert_eq!(ctx.active_count(), 0);
    }

    #[test]
    fn dead_chip_fails_the_channel() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().pause_stuck = true;
        ctx.regs_mut().faults().chip_dead = true;
        ctx.recover(RecoveryReason::Spurious);
        assert!(ctx.failed());
        assert_eq!(ctx.regs().bus_resets(), 0);
        assert!(ctx.upper().completions.iter().all(|r| r.host_status
            == HostStatus::AbortedChannelFailed));
    }

    #[test]
    fn removed_device_fails_requests_without_touching_registers() {
        let mut ctx = ctx();
        ctx.regs_mut().set_gone(true);
        let _ = ctx.front_end();
        ctx.regs_mut().reset_read_counts();
        ctx.recover(RecoveryReason::Spurious);
        assert_eq!(ctx.active_count(), 0);
        assert_eq!(ctx.regs().reads_of(crate::regs::off::HCNTRL), 0);
        assert!(ctx.upper().events.is_empty());
    }

    #[test]
    fn latched_interrupts_are_cleared() {
        let mut ctx = ctx();
        ctx.regs_mut().raise_seqint(0x0A);
        ctx.pending = HstIntStat::SEQINT;
        ctx.recover(RecoveryReason::Spurious);
        assert!(ctx.pending.is_empty());
        assert!(!ctx.poll_pending());
    }
}
