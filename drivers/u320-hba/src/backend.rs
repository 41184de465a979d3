//! Interrupt back end.
//!
//! Runs once per long interrupt, outside interrupt context. Completions are
//! drained first, then exceptions are handled one at a time by priority,
//! re-reading the status after each. The loop ends when nothing is pending,
//! when a handler asks for a reset, or when the spurious ceiling is hit.

use u320_api::{RecoveryReason, RegisterInterface, UpperLayer};
use u320_core::{hdebug, herr, hwarn};

use crate::context::AdapterContext;
use crate::exception::{ExceptionCode, Outcome};
use crate::regs::{HstIntStat, off};

const GONE: u8 = 0xFF;

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Requests delivered through the done queue.
    pub completed: usize,
    /// Exceptions dispatched to a handler.
    pub exceptions: u32,
    /// Reason of the recovery that ended the cycle, if any.
    pub recovered: Option<RecoveryReason>,
}

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Processes everything the front end handed off, then re-enables
    /// interrupts.
    pub fn back_end(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.device_gone || self.in_back_end {
            return report;
        }
        self.in_back_end = true;
        self.save_bank();
        let epoch = self.recovery_epoch;
        self.pending = HstIntStat::empty();
        report.completed += self.drain_completions();

        let mut spurious = 0u32;
        while self.recovery_epoch == epoch {
            let raw = self.regs.read8(off::HSTINTSTAT);
            if raw == GONE {
                herr!(self.config.unit, "adapter vanished during dispatch");
                self.device_gone = true;
                break;
            }
            let status = HstIntStat::from_bits_retain(raw);
            if status.contains(HstIntStat::CMDCMPLT) {
                self.host().set_clrhstint(HstIntStat::CMDCMPLT);
                self.outstanding = self.outstanding.saturating_add(1);
                report.completed += self.drain_completions();
                if self.recovery_epoch != epoch {
                    break;
                }
            }
            let exceptions = status & HstIntStat::EXCEPTIONS;
            if exceptions.is_empty() {
                break;
            }

            spurious += 1;
            if spurious > self.config.spurious_ceiling {
                hwarn!(
                    self.config.unit,
                    "{} exceptions in one cycle, still {:?}",
                    spurious - 1,
                    exceptions
                );
                self.stats.spurious_trips += 1;
                self.recover(RecoveryReason::Spurious);
                break;
            }
            self.exception_loops = self.exception_loops.wrapping_add(1);
            self.stats.exceptions += 1;
            report.exceptions += 1;

            let outcome = self.dispatch_exception(exceptions);
            if let Some(reason) = outcome.reset_reason() {
                if matches!(outcome, Outcome::Fatal(_)) {
                    herr!(self.config.unit, "fatal exception: {}", reason);
                }
                self.recover(reason);
                break;
            }
        }
        if self.recovery_epoch != epoch {
            report.recovered = self.last_recovery;
        }

        self.enable_interrupts();
        self.restore_bank();
        self.in_back_end = false;
        report
    }

    /// Runs the handler for the highest-priority exception in `status`.
    fn dispatch_exception(&mut self, status: HstIntStat) -> Outcome {
        if status.contains(HstIntStat::HWERRINT) {
            self.handle(ExceptionCode::HardwareError, None)
        } else if status.intersects(HstIntStat::PCIINT | HstIntStat::SPLTINT) {
            self.handle(ExceptionCode::PciError, None)
        } else if status.contains(HstIntStat::SEQINT) {
            let code = self.host().seqintcode();
            self.handle(ExceptionCode::Sequencer(code), None)
        } else if status.contains(HstIntStat::SCSIINT) {
            self.handle_scsi_exception()
        } else {
            let diag = status & (HstIntStat::BRKADRINT | HstIntStat::SWTMINT);
            hdebug!(self.config.unit, "diagnostic interrupt {:?}", diag);
            self.host().set_clrhstint(diag);
            Outcome::Handled
        }
    }

    /// Runs whatever the front end left pending: the full back end for an
    /// exception, a plain drain for completions only.
    pub fn service(&mut self) -> DispatchReport {
        if self.pending.intersects(HstIntStat::EXCEPTIONS) {
            return self.back_end();
        }
        let completed = self.drain_completions();
        DispatchReport {
            completed,
            ..DispatchReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::frontend::InterruptClass;
    use crate::regs::{Hcntrl, HwError, SeqIntCode, Sstat1};
    use crate::sim::{Recorder, SimBus};
    use u320_api::{Bank, BadSeq, HostStatus, MgrState, Request, RequestFlags};

    fn ctx() -> AdapterContext<SimBus, Recorder> {
        AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(32).with_poll_ceiling(40),
        )
    }

    #[test]
    fn completions_then_sequencer_interrupt() {
        let mut ctx = ctx();
        for slot in [1, 2] {
            ctx.activate(Request::new(slot, 0, 0, RequestFlags::empty()))
                .unwrap();
        }
        ctx.regs_mut().post_completion(2);
        ctx.regs_mut().raise_seqint(SeqIntCode::IdleLoopBreak as u8);
        assert_eq!(ctx.front_end(), InterruptClass::Long);

        let report = ctx.service();
        assert_eq!(report.completed, 1);
        assert_eq!(report.exceptions, 1);
        assert_eq!(report.recovered, None);
        assert_eq!(ctx.upper().completions[0].slot, 2);
        assert!(ctx.host().hcntrl().contains(Hcntrl::INTEN));
        assert!(!ctx.is_paused());
        assert_eq!(ctx.exception_loops(), 1);
    }

    #[test]
    fn priority_hardware_error_first() {
        let mut ctx = ctx();
        ctx.regs_mut().raise_scsi(Sstat1::SELTIMO);
        ctx.regs_mut().raise_hw_error(HwError::ILLOPCODE);
        ctx.front_end();
        let report = ctx.back_end();
        // The illegal opcode is fatal, so the selection timeout is never seen.
        assert_eq!(report.exceptions, 1);
        assert_eq!(report.recovered, Some(RecoveryReason::HardwareError));
        assert_eq!(ctx.stats().recoveries, 1);
    }

    #[test]
    fn handled_exceptions_are_all_processed() {
        let mut ctx = ctx();
        ctx.activate(Request::new(6, 3, 0, RequestFlags::empty()))
            .unwrap();
        ctx.regs_mut().set_waiting(6);
        ctx.regs_mut().raise_scsi(Sstat1::SELTIMO);
        ctx.regs_mut().raise_hw_error(HwError::DSCTMOUT);
        ctx.front_end();
        let report = ctx.back_end();
        assert_eq!(report.exceptions, 2);
        assert_eq!(report.recovered, None);
        assert_eq!(
            ctx.upper().completions[0].host_status,
            HostStatus::SelectionTimeout
        );
        assert!(!ctx.poll_pending());
    }

    #[test]
    fn spurious_storm_hits_the_ceiling() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().stuck_intstat = HstIntStat::SWTMINT;
        ctx.regs_mut().raise_intstat(HstIntStat::SWTMINT);
        assert_eq!(ctx.front_end(), InterruptClass::Long);
        let report = ctx.back_end();
        assert_eq!(report.exceptions, 10);
        assert_eq!(report.recovered, Some(RecoveryReason::Spurious));
        assert_eq!(ctx.stats().spurious_trips, 1);
        assert_eq!(ctx.stats().recoveries, 1);
    }

    #[test]
    fn needs_reset_stops_the_cycle() {
        let mut ctx = ctx();
        ctx.activate(Request::new(3, 1, 0, RequestFlags::empty()))
            .unwrap();
        // Parity error with nobody connected.
        ctx.regs_mut().raise_scsi(Sstat1::SCSIPERR);
        ctx.front_end();
        let report = ctx.back_end();
        assert_eq!(report.exceptions, 1);
        assert_eq!(
            report.recovered,
            Some(RecoveryReason::BadSequence(BadSeq::PARITY_UNMAPPED))
        );
        assert_eq!(ctx.stats().recoveries, 1);
        let done = ctx.upper().completions[0];
        assert_eq!(done.state(), MgrState::AbortedDone);
        assert_eq!(done.host_status, HostStatus::AbortedBusReset);
    }

    #[test]
    fn bank_is_restored() {
        let mut ctx = ctx();
        ctx.regs_mut().select_bank(Bank::Dff1);
        ctx.regs_mut().raise_scsi(Sstat1::BUSFREE);
        ctx.front_end();
        ctx.back_end();
        assert_eq!(ctx.regs_mut().get_bank(), Bank::Dff1);
    }

    #[test]
    fn nothing_runs_once_the_device_is_gone() {
        let mut ctx = ctx();
        ctx.regs_mut().raise_seqint(SeqIntCode::IdleLoopBreak as u8);
        ctx.front_end();
        ctx.regs_mut().set_gone(true);
        let report = ctx.back_end();
        assert_eq!(report, DispatchReport::default());
        assert!(ctx.device_gone());
    }

    #[test]
    fn completion_only_service_drains() {
        let mut ctx = ctx();
        ctx.activate(Request::new(9, 0, 0, RequestFlags::empty()))
            .unwrap();
        ctx.regs_mut().post_completion(9);
        assert_eq!(ctx.front_end(), InterruptClass::Normal);
        let report = ctx.service();
        assert_eq!(report.completed, 1);
        assert_eq!(report.exceptions, 0);
        assert_eq!(ctx.outstanding_completions(), 0);
    }
}
