//! Command completion tracking.
//!
//! The chip posts finished slots into a ring in host-visible memory and
//! advances `QOUT_HEAD`; software consumes from `QOUT_TAIL`. The
//! `outstanding` counter tracks command-complete interrupts acknowledged
//! by the front end; a surplus after draining means an acknowledge raced a
//! new completion and the edge has to be re-armed.

use u320_api::{BadSeq, MgrState, RecoveryReason, RegisterInterface, UpperLayer};
use u320_core::{herr, htrace};

use crate::context::AdapterContext;
use crate::regs::HstIntStat;

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Delivers every posted completion in posting order.
    ///
    /// Returns the number of requests handed to the completion sink. A
    /// posted slot without a live request stops the drain and triggers a
    /// recovery.
    pub fn drain_completions(&mut self) -> usize {
        let depth = self.config.qout_depth;
        let mut completed = 0;
        let mut unmapped = None;
        loop {
            let mut host = self.host();
            let tail = host.qout_tail();
            if tail == host.qout_head() {
                break;
            }
            let slot = host.qout_scb();
            host.set_qout_tail((tail + 1) % depth);
            self.outstanding = self.outstanding.saturating_sub(1);

            match self.table.state(slot) {
                None => {
                    herr!(self.config.unit, "completion for idle slot {}", slot);
                    unmapped = Some(slot);
                    break;
                }
                Some(MgrState::AbortInProgress) => {
                    htrace!(self.config.unit, "slot {} completed under abort", slot);
                    self.finish_posted_abort(slot);
                }
                Some(_) => {
                    if self.terminate(slot, MgrState::Done, None) {
                        completed += 1;
                    }
                }
            }
        }
        self.stats.completions += completed as u64;

        if self.outstanding != 0 {
            if self.config.lost_behind_clear.contains(HstIntStat::CMDCMPLT) {
                htrace!(
                    self.config.unit,
                    "{} completion edges unmatched, re-arming",
                    self.outstanding
                );
                self.host().set_clrhstint(HstIntStat::CMDCMPLT);
            }
            self.outstanding = 0;
        }
        self.pending.remove(HstIntStat::CMDCMPLT);

        if unmapped.is_some() {
            self.recover(RecoveryReason::BadSequence(BadSeq::CMDCMPLT_UNMAPPED));
        }
        completed
    }
}
