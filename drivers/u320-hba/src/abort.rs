//! Active abort engine.
//!
//! An abort pauses the sequencer, looks for the request in every place the
//! chip can hold it and removes it from there. Requests already on the bus
//! or held by a disconnected target cannot be pulled back; they are marked
//! in their SCB and finished when the chip next reaches them.

use u320_api::{
    BadSeq, HostStatus, MgrState, NULL_SLOT, RecoveryReason, RegisterInterface,
    RequestFlags, Slot, UpperLayer,
};
use u320_core::{hdebug, hinfo, hwarn};

use crate::context::AdapterContext;
use crate::exception::Outcome;
use crate::regs::{ScbControl, msg};
use crate::table::RequestId;

/// Result of [`AdapterContext::abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The request had already terminated; nothing was changed.
    AlreadyDone,
    /// The request was terminated with [`HostStatus::Aborted`].
    AbortedNow,
    /// The abort is armed and finishes when the chip reaches the request.
    AbortPending,
}

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Aborts the request `id` refers to.
    pub fn abort(&mut self, id: RequestId) -> AbortOutcome {
        let Some(state) = self.table.resolve(id).map(|r| r.state()) else {
            return AbortOutcome::AlreadyDone;
        };
        match state {
            MgrState::AbortRequested | MgrState::AbortInProgress => {
                return AbortOutcome::AbortPending;
            }
            MgrState::Done | MgrState::AbortedDone => return AbortOutcome::AlreadyDone,
            _ => {}
        }
        self.stats.aborts += 1;
        let slot = id.slot;
        let epoch = self.recovery_epoch;
        let bank = self.regs.get_bank();

        let was_paused = match self.pause() {
            Ok(was_paused) => was_paused,
            Err(_) => {
                self.recover(RecoveryReason::BadSequence(BadSeq::PAUSE_TIMEOUT));
                self.select_bank(bank);
                return if self.table.resolve(id).is_some() {
                    AbortOutcome::AbortPending
                } else {
                    AbortOutcome::AbortedNow
                };
            }
        };

        // A completion posted before the pause wins the race.
        self.drain_completions();
        let outcome = if self.table.resolve(id).is_some() {
            self.abort_located(slot)
        } else {
            hdebug!(self.config.unit, "slot {} finished before the abort", slot);
            AbortOutcome::AlreadyDone
        };

        if self.recovery_epoch == epoch && !was_paused {
            self.unpause();
        }
        self.select_bank(bank);
        outcome
    }

    fn abort_located(&mut self, slot: Slot) -> AbortOutcome {
        if let Some(request) = self.table.get_mut(slot) {
            let _ = request.advance(MgrState::AbortRequested);
        }
        let mut seq = self.seq();
        let on_bus = seq.waiting_scb() == slot || seq.active_scb() == slot;

        if on_bus {
            hinfo!(self.config.unit, "slot {} on the bus, abort armed", slot);
            self.arm_abort(slot);
            return AbortOutcome::AbortPending;
        }
        if self.unlink_queued(slot) {
            hinfo!(self.config.unit, "slot {} removed from the execution queue", slot);
            self.terminate(slot, MgrState::AbortedDone, Some(HostStatus::Aborted));
            return AbortOutcome::AbortedNow;
        }
        if self.scb(slot).scb_control().contains(ScbControl::DISCONNECTED) {
            hinfo!(self.config.unit, "slot {} disconnected, abort queued", slot);
            self.arm_abort(slot);
            if self.abort_msgs.try_push(slot).is_err() {
                hwarn!(self.config.unit, "abort message queue full");
            }
            return AbortOutcome::AbortPending;
        }
        hinfo!(self.config.unit, "slot {} not held by the chip", slot);
        self.terminate(slot, MgrState::AbortedDone, Some(HostStatus::Aborted));
        AbortOutcome::AbortedNow
    }

    /// Marks the SCB so the chip stops at the next bus contact with it.
    fn arm_abort(&mut self, slot: Slot) {
        let mut scb = self.scb(slot);
        let control = scb.scb_control();
        scb.set_scb_control(control | ScbControl::ABORT);
        if let Some(request) = self.table.get_mut(slot) {
            let _ = request.advance(MgrState::AbortInProgress);
        }
    }

    fn disarm_abort(&mut self, slot: Slot) {
        let mut scb = self.scb(slot);
        let control = scb.scb_control();
        scb.set_scb_control(control - ScbControl::ABORT - ScbControl::DISCONNECTED);
    }

    /// Finishes an armed abort once the target is connected again.
    pub(crate) fn finish_abort_target(&mut self, slot: Option<Slot>) -> Outcome {
        let Some((slot, tagged)) = slot
            .and_then(|s| self.table.get(s))
            .map(|r| (r.slot, r.flags.contains(RequestFlags::TAGGED)))
        else {
            hwarn!(self.config.unit, "abort target with no request");
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::ABORT_TARGET_UNMAPPED,
            ));
        };
        let message = if tagged {
            msg::ABORT_TASK
        } else {
            msg::ABORT_TASK_SET
        };
        let sent = self.abort_connection(message);
        self.clear_active();
        let mut seq = self.seq();
        if seq.waiting_scb() == slot {
            seq.set_waiting_scb(NULL_SLOT);
        }
        self.disarm_abort(slot);
        self.terminate(slot, MgrState::AbortedDone, Some(HostStatus::Aborted));
        match sent {
            Ok(()) => Outcome::Handled,
            Err(id) => Outcome::Fatal(RecoveryReason::BadSequence(id)),
        }
    }

    /// Finishes an armed abort whose request was posted complete.
    pub(crate) fn finish_posted_abort(&mut self, slot: Slot) {
        self.disarm_abort(slot);
        self.terminate(slot, MgrState::AbortedDone, Some(HostStatus::Aborted));
    }

    /// Aborts every live request addressed to `target`.
    ///
    /// Returns the number of requests whose abort was started or finished.
    pub fn abort_task_set(&mut self, target: u8) -> usize {
        hinfo!(self.config.unit, "aborting task set of target {}", target);
        let mut touched = 0;
        let mut from = 0;
        while let Some(slot) = self.table.next_live(from) {
            from = usize::from(slot) + 1;
            let id = match self.table.get(slot) {
                Some(r) if r.target == target => self.table.id_of(slot),
                _ => None,
            };
            match id.map(|id| self.abort(id)) {
                None | Some(AbortOutcome::AlreadyDone) => {}
                Some(_) => touched += 1,
            }
        }
        if touched != 0 {
            self.flag_renegotiation(target);
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::regs::SeqIntCode;
    use crate::sim::{Recorder, SimBus};
    use u320_api::Request;

    fn ctx() -> AdapterContext<SimBus, Recorder> {
        AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(32).with_poll_ceiling(50),
        )
    }

    fn submit(ctx: &mut AdapterContext<SimBus, Recorder>, slot: Slot, target: u8) -> RequestId {
        ctx.activate(Request::new(slot, target, 0, RequestFlags::TAGGED))
            .unwrap()
    }

    #[test]
    fn queued_request_is_spliced_out() {
        let mut ctx = ctx();
        let ids: Vec<_> = [4, 5, 6].iter().map(|&s| submit(&mut ctx, s, 1)).collect();
        ctx.regs_mut().queue_for_execution(&[4, 5, 6]);
        assert_eq!(ctx.abort(ids[1]), AbortOutcome::AbortedNow);
        assert_eq!(ctx.regs().exe_queue(), [4, 6]);
        let done = ctx.upper().completions[0];
        assert_eq!(done.state(), MgrState::AbortedDone);
        assert_eq!(done.host_status, HostStatus::Aborted);
        assert!(!ctx.is_paused());
    }

    #[test]
    fn disconnected_request_waits_for_reselection() {
        let mut ctx = ctx();
        let id = submit(&mut ctx, 8, 2);
        ctx.regs_mut().set_disconnected(8);
        assert_eq!(ctx.abort(id), AbortOutcome::AbortPending);
        assert!(ctx.has_abort_message(8));
        assert!(ctx.scb(8).scb_control().contains(ScbControl::ABORT));
        assert_eq!(ctx.abort(id), AbortOutcome::AbortPending);

        // Reselection: the sequencer asks for message-out.
        ctx.regs_mut().set_active(8);
        let code = SeqIntCode::HandleMsgOut as u8;
        ctx.regs_mut().raise_seqint(code);
        assert_eq!(
            ctx.handle(crate::exception::ExceptionCode::Sequencer(code), None),
            Outcome::Handled
        );
        assert_eq!(ctx.regs().messages(), [msg::ABORT_TASK]);
        assert!(!ctx.has_abort_message(8));
        assert_eq!(ctx.upper().completions[0].host_status, HostStatus::Aborted);
    }

    #[test]
    fn every_disconnected_slot_gets_its_abort_message() {
        let mut ctx = AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(64).with_poll_ceiling(50),
        );
        for slot in 0..48 {
            let id = submit(&mut ctx, slot, (slot % 16) as u8);
            ctx.regs_mut().set_disconnected(slot);
            assert_eq!(ctx.abort(id), AbortOutcome::AbortPending);
        }
        assert_eq!(ctx.abort_msgs.len(), 48);
        assert!(ctx.has_abort_message(0));
        assert!(ctx.has_abort_message(47));
    }

    #[test]
    fn completion_racing_the_abort_wins() {
        let mut ctx = ctx();
        let id = submit(&mut ctx, 3, 0);
        ctx.regs_mut().post_completion(3);
        assert_eq!(ctx.abort(id), AbortOutcome::AlreadyDone);
        assert_eq!(ctx.upper().completions[0].state(), MgrState::Done);
        assert_eq!(ctx.abort(id), AbortOutcome::AlreadyDone);
        assert_eq!(ctx.upper().completions.len(), 1);
    }

    #[test]
    fn posted_completion_of_armed_abort_is_finalized_as_aborted() {
        let mut ctx = ctx();
        let id = submit(&mut ctx, 9, 0);
        ctx.regs_mut().set_active(9);
        assert_eq!(ctx.abort(id), AbortOutcome::AbortPending);
        ctx.regs_mut().post_completion(9);
        assert_eq!(ctx.drain_completions(), 0);
        let done = ctx.upper().completions[0];
        assert_eq!(done.state(), MgrState::AbortedDone);
        assert_eq!(done.host_status, HostStatus::Aborted);
    }

    #[test]
    fn stuck_pause_escalates_to_recovery() {
        let mut ctx = ctx();
        let id = submit(&mut ctx, 1, 0);
        ctx.regs_mut().faults().pause_stuck = true;
        assert_eq!(ctx.abort(id), AbortOutcome::AbortedNow);
        assert_eq!(ctx.last_bad_seq(), Some(BadSeq::PAUSE_TIMEOUT));
        assert_eq!(
            ctx.upper().completions[0].host_status,
            HostStatus::AbortedBusReset
        );
    }

    #[test]
    fn task_set_abort_touches_only_the_target() {
        let mut ctx = ctx();
        submit(&mut ctx, 1, 5);
        submit(&mut ctx, 2, 6);
        submit(&mut ctx, 3, 5);
        assert_eq!(ctx.abort_task_set(5), 2);
        assert_eq!(ctx.active_count(), 1);
        assert!(ctx.check_device_idle(5));
        assert!(!ctx.check_device_idle(6));
    }
}
