//! Sequencer interrupts.
//!
//! The sequencer pauses itself and posts a code whenever the microcode
//! needs the host. The request involved is the one connected on the bus.

use u320_api::{
    BadSeq, MgrState, RecoveryReason, RegisterInterface, Slot, TargetStatus,
    UpperLayer,
};
use u320_core::{hdebug, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{HstIntStat, SeqIntCode, msg};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_seqint(&mut self, raw: u8) -> Outcome {
        let outcome = match SeqIntCode::from_raw(raw) {
            Some(code) => {
                let slot = self.active_slot();
                hdebug!(self.config.unit, "sequencer interrupt {:?} slot {:?}", code, slot);
                self.dispatch_seqint(code, slot)
            }
            None => {
                hwarn!(self.config.unit, "unknown sequencer interrupt {:#04x}", raw);
                Outcome::HandledNeedsReset(RecoveryReason::BadSequence(BadSeq::UNKNOWN_SEQINT))
            }
        };
        self.host().set_clrhstint(HstIntStat::SEQINT);
        if outcome == Outcome::Handled {
            self.unpause();
        }
        outcome
    }

    fn dispatch_seqint(&mut self, code: SeqIntCode, slot: Option<Slot>) -> Outcome {
        match code {
            SeqIntCode::SyncNegoNeeded => {
                if let Some(target) = slot.and_then(|s| self.table.get(s)).map(|r| r.target) {
                    self.flag_renegotiation(target);
                }
                Outcome::Handled
            }
            SeqIntCode::CdbXferProblem => self.retry_cdb(slot),
            SeqIntCode::HandleMsgOut => self.handle_msg_out(slot),
            SeqIntCode::DataOverrun => self.handle_overrun(slot, false),
            SeqIntCode::DataOverrunBusFree => self.handle_overrun(slot, true),
            SeqIntCode::UnknownMsg => self.reject_message(),
            SeqIntCode::ExtendedMsg => {
                // Negotiation messages are answered by the upper layer.
                if let Some(target) = slot.and_then(|s| self.table.get(s)).map(|r| r.target) {
                    self.flag_renegotiation(target);
                }
                self.reject_message()
            }
            SeqIntCode::CheckCondition => self.check_condition(slot),
            SeqIntCode::PhaseError => self.handle_phase_mismatch(slot),
            SeqIntCode::AbortTarget => {
                let slot = slot.or_else(|| self.waiting_slot());
                self.finish_abort_target(slot)
            }
            SeqIntCode::NoIdentify => {
                hwarn!(self.config.unit, "reselection without identify");
                Outcome::HandledNeedsReset(RecoveryReason::BadSequence(BadSeq::NO_IDENTIFY))
            }
            SeqIntCode::IdleLoopBreak
            | SeqIntCode::ExpanderBreak
            | SeqIntCode::DvTimeout
            | SeqIntCode::SpecialFunction => Outcome::Handled,
            SeqIntCode::HwErrDetected => self.handle_hardware_error(),
        }
    }

    fn retry_cdb(&mut self, slot: Option<Slot>) -> Outcome {
        match slot {
            Some(slot) if self.table.take_retry(slot) => {
                hdebug!(self.config.unit, "slot {} CDB transfer failed, retrying", slot);
                self.clear_active();
                self.requeue_front(slot);
                Outcome::Handled
            }
            _ => Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::CDB_RETRY_EXHAUSTED,
            )),
        }
    }

    fn handle_msg_out(&mut self, slot: Option<Slot>) -> Outcome {
        if let Some(slot) = slot {
            let aborting = self.table.state(slot) == Some(MgrState::AbortInProgress);
            if aborting || self.has_abort_message(slot) {
                return self.finish_abort_target(Some(slot));
            }
        }
        match self.abort_connection(msg::NOP) {
            Ok(()) => Outcome::Handled,
            Err(id) => Outcome::Fatal(RecoveryReason::BadSequence(id)),
        }
    }

    fn reject_message(&mut self) -> Outcome {
        match self.abort_connection(msg::MESSAGE_REJECT) {
            Ok(()) => Outcome::Handled,
            Err(id) => Outcome::Fatal(RecoveryReason::BadSequence(id)),
        }
    }

    fn check_condition(&mut self, slot: Option<Slot>) -> Outcome {
        let Some(request) = slot.and_then(|s| self.table.get_mut(s)) else {
            return Outcome::HandledNeedsReset(RecoveryReason::BadSequence(
                BadSeq::STATUS_UNMAPPED,
            ));
        };
        request.target_status = TargetStatus::CHECK_CONDITION;
        let slot = request.slot;
        self.clear_active();
        self.terminate(slot, MgrState::Done, None);
        Outcome::Handled
    }
}
