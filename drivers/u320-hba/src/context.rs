//! Adapter context: the single owner of per-adapter mutable state.
//!
//! Every component of the core is an `impl` block on [`AdapterContext`] in
//! its own module and receives the context by exclusive reference. Nothing
//! in the core is global.

use planck_noalloc::ringbuf::RingBuf;
use u320_api::{
    AsyncEvent, Bank, BadSeq, HbaError, HostStatus, MAX_TARGETS, MgrState, NULL_SLOT,
    RecoveryReason, RegisterInterface, Request, Slot, UpperLayer,
};
use u320_core::{herr, htrace};

use crate::config::AdapterConfig;
use crate::regs::{CfgRegs, DmaRegs, HostRegs, ScbRegs, ScsiRegs, SeqRegs, off, slot_or_none};
use crate::table::{ActiveTable, MAX_SLOTS, RequestId};

/// Backing size of the pending abort-message queue: one entry per slot,
/// plus the one a ring buffer cannot use.
pub(crate) const ABORT_QUEUE_LEN: usize = MAX_SLOTS + 1;

// ---------------------------------------------------------------------------
// Target sets
// ---------------------------------------------------------------------------

/// A set of SCSI target ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetSet(u16);

impl TargetSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Adds `target`; ids beyond the bus width are ignored.
    pub fn insert(&mut self, target: u8) {
        if usize::from(target) < MAX_TARGETS {
            self.0 |= 1 << target;
        }
    }

    /// Removes `target`.
    pub fn remove(&mut self, target: u8) {
        if usize::from(target) < MAX_TARGETS {
            self.0 &= !(1 << target);
        }
    }

    /// Returns `true` if `target` is in the set.
    #[must_use]
    pub fn contains(self, target: u8) -> bool {
        usize::from(target) < MAX_TARGETS && self.0 & (1 << target) != 0
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over member ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..MAX_TARGETS as u8).filter(move |&t| self.contains(t))
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// Requests completed through the done queue.
    pub completions: u64,
    /// Exception iterations run by the back end.
    pub exceptions: u64,
    /// Full recoveries performed.
    pub recoveries: u32,
    /// Recoveries reduced to a resynchronization during a third-party reset.
    pub resyncs: u32,
    /// Dispatch cycles cut short by the spurious ceiling.
    pub spurious_trips: u32,
    /// Escalations to a chip reset.
    pub escalations: u32,
    /// Abort requests accepted.
    pub aborts: u32,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// All mutable state of one adapter.
pub struct AdapterContext<R: RegisterInterface, U: UpperLayer> {
    pub(crate) regs: R,
    pub(crate) upper: U,
    pub(crate) config: AdapterConfig,
    pub(crate) table: ActiveTable,
    /// Interrupt classes latched by the front end for the back end.
    pub(crate) pending: crate::regs::HstIntStat,
    pub(crate) saved_bank: Option<Bank>,
    /// Command-complete interrupts acknowledged but not yet matched by
    /// done-queue entries.
    pub(crate) outstanding: u32,
    pub(crate) bus_hung: bool,
    pub(crate) reset_in_progress: bool,
    pub(crate) in_recovery: bool,
    pub(crate) in_back_end: bool,
    /// Bumped on every full recovery; lets callers notice a nested reset.
    pub(crate) recovery_epoch: u32,
    pub(crate) needs_negotiation: TargetSet,
    pub(crate) negotiated: TargetSet,
    pub(crate) suppressed: TargetSet,
    pub(crate) last_bad_seq: Option<BadSeq>,
    pub(crate) last_recovery: Option<RecoveryReason>,
    pub(crate) exception_loops: u32,
    /// Disconnected slots waiting to be sent an abort message on reselection.
    pub(crate) abort_msgs: RingBuf<Slot, ABORT_QUEUE_LEN>,
    pub(crate) device_gone: bool,
    pub(crate) failed: bool,
    pub(crate) stats: AdapterStats,
}

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Creates the context for a freshly attached adapter.
    pub fn new(regs: R, upper: U, config: AdapterConfig) -> Self {
        Self {
            regs,
            upper,
            table: ActiveTable::new(config.num_slots),
            config,
            pending: crate::regs::HstIntStat::empty(),
            saved_bank: None,
            outstanding: 0,
            bus_hung: false,
            reset_in_progress: false,
            in_recovery: false,
            in_back_end: false,
            recovery_epoch: 0,
            needs_negotiation: TargetSet::EMPTY,
            negotiated: TargetSet::EMPTY,
            suppressed: TargetSet::EMPTY,
            last_bad_seq: None,
            last_recovery: None,
            exception_loops: 0,
            abort_msgs: RingBuf::new(),
            device_gone: false,
            failed: false,
            stats: AdapterStats::default(),
        }
    }

    // -- accessors ---------------------------------------------------------

    /// Adapter configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Register interface.
    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Register interface.
    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Upper-layer sinks.
    #[must_use]
    pub fn upper(&self) -> &U {
        &self.upper
    }

    /// Upper-layer sinks.
    pub fn upper_mut(&mut self) -> &mut U {
        &mut self.upper
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Commands signalled complete but not yet drained.
    #[must_use]
    pub fn outstanding_completions(&self) -> u32 {
        self.outstanding
    }

    /// Id recorded by the last protocol-invariant violation.
    #[must_use]
    pub fn last_bad_seq(&self) -> Option<BadSeq> {
        self.last_bad_seq
    }

    /// Reason of the last full recovery.
    #[must_use]
    pub fn last_recovery(&self) -> Option<RecoveryReason> {
        self.last_recovery
    }

    /// Free-running count of back-end exception iterations.
    #[must_use]
    pub fn exception_loops(&self) -> u32 {
        self.exception_loops
    }

    /// Targets flagged for renegotiation.
    #[must_use]
    pub fn needs_negotiation(&self) -> TargetSet {
        self.needs_negotiation
    }

    /// Returns `true` once a reset could not bring the bus back.
    #[must_use]
    pub fn bus_hung(&self) -> bool {
        self.bus_hung
    }

    /// Returns `true` once even a chip reset failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Returns `true` after an all-ones status read.
    #[must_use]
    pub fn device_gone(&self) -> bool {
        self.device_gone
    }

    /// Live request in `slot`.
    #[must_use]
    pub fn request(&self, slot: Slot) -> Option<&Request> {
        self.table.get(slot)
    }

    /// Number of live requests.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.table.len()
    }

    /// Hands a submitted request to the core.
    ///
    /// # Errors
    ///
    /// [`HbaError::DeviceGone`] once the adapter has stopped answering,
    /// otherwise see [`ActiveTable::insert`].
    pub fn activate(&mut self, request: Request) -> Result<RequestId, HbaError> {
        if self.device_gone {
            return Err(HbaError::DeviceGone);
        }
        self.table.insert(request)
    }

    /// Records a manager-state change made by the submission path, such as
    /// `Executing` once the request is queued to the sequencer.
    ///
    /// # Errors
    ///
    /// [`HbaError::SlotEmpty`] if `id` no longer names a live request,
    /// [`HbaError::InvalidTransition`] if `next` would move it backwards.
    pub fn advance(&mut self, id: RequestId, next: MgrState) -> Result<(), HbaError> {
        self.table
            .resolve(id)
            .ok_or(HbaError::SlotEmpty(id.slot))?
            .advance(next)
    }

    /// Handle of the live request in `slot`.
    #[must_use]
    pub fn request_id(&self, slot: Slot) -> Option<RequestId> {
        self.table.id_of(slot)
    }

    /// Consumes the context, returning the register interface and sinks.
    pub fn into_parts(self) -> (R, U) {
        (self.regs, self.upper)
    }

    // -- register blocks ----------------------------------------------------

    pub(crate) fn host(&mut self) -> HostRegs<'_, R> {
        HostRegs::new(&mut self.regs)
    }

    pub(crate) fn seq(&mut self) -> SeqRegs<'_, R> {
        SeqRegs::new(&mut self.regs)
    }

    /// SCB window of the current bank, pointed at `slot`.
    pub(crate) fn scb(&mut self, slot: Slot) -> ScbRegs<'_, R> {
        let mut scb = ScbRegs::new(&mut self.regs);
        scb.set_scbptr(slot);
        scb
    }

    pub(crate) fn scsi(&mut self) -> ScsiRegs<'_, R> {
        self.select_bank(Bank::Scsi);
        ScsiRegs::new(&mut self.regs)
    }

    pub(crate) fn dma(&mut self, bank: Bank) -> DmaRegs<'_, R> {
        self.select_bank(bank);
        DmaRegs::new(&mut self.regs)
    }

    pub(crate) fn cfg(&mut self) -> CfgRegs<'_, R> {
        self.select_bank(Bank::Config);
        CfgRegs::new(&mut self.regs)
    }

    /// Selects `bank`, reading it back on chips that need it.
    pub(crate) fn select_bank(&mut self, bank: Bank) {
        self.regs.select_bank(bank);
        if self
            .config
            .features
            .contains(crate::config::ChipFeatures::MODE_PTR_VERIFY)
            && self.regs.get_bank() != bank
        {
            htrace!(self.config.unit, "bank select to {:?} needed a retry", bank);
            self.regs.select_bank(bank);
        }
    }

    // -- slot resolution ----------------------------------------------------

    /// Maps a raw slot from a hardware register to a live request.
    pub(crate) fn resolve(&self, raw: Slot) -> Option<Slot> {
        slot_or_none(raw).filter(|&slot| self.table.get(slot).is_some())
    }

    /// Slot connected on the bus, if it has a live request.
    pub(crate) fn active_slot(&mut self) -> Option<Slot> {
        let raw = self.seq().active_scb();
        self.resolve(raw)
    }

    /// Slot being selected, if it has a live request.
    pub(crate) fn waiting_slot(&mut self) -> Option<Slot> {
        let raw = self.seq().waiting_scb();
        self.resolve(raw)
    }

    /// Clears the connected-SCB scratch location.
    pub(crate) fn clear_active(&mut self) {
        self.seq().set_active_scb(NULL_SLOT);
    }

    /// Releases the busy marker of `target`.
    pub(crate) fn clear_busy_target(&mut self, target: u8) {
        if usize::from(target) < MAX_TARGETS {
            self.regs.write8(off::BUSY_TARGETS + u16::from(target), 0);
        }
    }

    // -- execution queue ----------------------------------------------------

    /// Puts `slot` at the head of the execution queue.
    pub(crate) fn requeue_front(&mut self, slot: Slot) {
        let head = self.seq().qexe_head();
        self.scb(slot).set_scb_next(head);
        self.seq().set_qexe_head(slot);
    }

    /// Unlinks `slot` from the execution queue; returns `false` if it was
    /// not queued.
    pub(crate) fn unlink_queued(&mut self, slot: Slot) -> bool {
        let mut prev = None;
        let mut cur = self.seq().qexe_head();
        // Bounded by the slot count in case the chain is corrupt.
        for _ in 0..=self.config.num_slots {
            if cur == NULL_SLOT {
                return false;
            }
            let next = self.scb(cur).scb_next();
            if cur == slot {
                match prev {
                    None => self.seq().set_qexe_head(next),
                    Some(prev) => self.scb(prev).set_scb_next(next),
                }
                self.scb(slot).set_scb_next(NULL_SLOT);
                return true;
            }
            prev = Some(cur);
            cur = next;
        }
        herr!(self.config.unit, "execution queue does not terminate");
        false
    }

    // -- termination --------------------------------------------------------

    /// Hands the request in `slot` back to the upper layer.
    ///
    /// `state` must be `Done` or `AbortedDone`; a request already on the
    /// abort path always ends `AbortedDone`. `status`, if given, overrides
    /// the recorded host status. Returns `false` if the slot was not live.
    pub(crate) fn terminate(
        &mut self,
        slot: Slot,
        state: MgrState,
        status: Option<HostStatus>,
    ) -> bool {
        let Some(mut request) = self.table.remove(slot) else {
            return false;
        };
        let state = if request.state().can_advance_to(MgrState::Done) {
            state
        } else {
            MgrState::AbortedDone
        };
        if state == MgrState::Done && request.state() != MgrState::Completing {
            // Completing is skipped when the request ends in an exception.
            let _ = request.advance(MgrState::Completing);
        }
        if let Err(err) = request.advance(state) {
            herr!(self.config.unit, "slot {}: {}", slot, err);
        }
        if let Some(status) = status {
            request.host_status = status;
        }
        self.forget_abort_message(slot);
        htrace!(
            self.config.unit,
            "slot {} terminated: {} host={:?}",
            slot,
            request.state(),
            request.host_status
        );
        self.upper.on_complete(request);
        true
    }

    /// Terminates every live request with `status`.
    pub(crate) fn abort_all(&mut self, status: HostStatus) -> usize {
        let mut count = 0;
        let mut from = 0;
        while let Some(slot) = self.table.next_live(from) {
            self.terminate(slot, MgrState::AbortedDone, Some(status));
            count += 1;
            from = usize::from(slot) + 1;
        }
        while self.abort_msgs.pop().is_some() {}
        count
    }

    pub(crate) fn forget_abort_message(&mut self, slot: Slot) {
        let mut remaining = self.abort_msgs.len();
        while remaining > 0 {
            remaining -= 1;
            match self.abort_msgs.pop() {
                Some(queued) if queued != slot => {
                    let _ = self.abort_msgs.try_push(queued);
                }
                _ => {}
            }
        }
    }

    pub(crate) fn has_abort_message(&mut self, slot: Slot) -> bool {
        let mut found = false;
        let mut remaining = self.abort_msgs.len();
        while remaining > 0 {
            remaining -= 1;
            if let Some(queued) = self.abort_msgs.pop() {
                found |= queued == slot;
                let _ = self.abort_msgs.try_push(queued);
            }
        }
        found
    }

    // -- negotiation flags --------------------------------------------------

    /// Marks `target` for renegotiation and tells the upper layer, unless
    /// negotiation is suppressed for it.
    pub(crate) fn flag_renegotiation(&mut self, target: u8) {
        if self.needs_negotiation.contains(target) {
            return;
        }
        self.needs_negotiation.insert(target);
        self.negotiated.remove(target);
        if !self.suppressed.contains(target) {
            self.upper.on_event(AsyncEvent::DeviceNeedsNegotiation(target));
        }
    }

    /// Records that `target` runs with negotiated (non-default) parameters.
    pub fn set_negotiated(&mut self, target: u8, negotiated: bool) {
        if negotiated {
            self.negotiated.insert(target);
            self.needs_negotiation.remove(target);
        } else {
            self.negotiated.remove(target);
        }
    }

    /// Requests renegotiation of `target` and lifts any suppression.
    pub fn force_negotiation(&mut self, target: u8) {
        self.suppressed.remove(target);
        self.needs_negotiation.remove(target);
        self.flag_renegotiation(target);
    }

    /// Stops renegotiation notifications for `target`.
    pub fn suppress_negotiation(&mut self, target: u8) {
        self.suppressed.insert(target);
    }

    /// Flags every negotiated target after the bus lost its agreements.
    pub(crate) fn renegotiate_all(&mut self) {
        for target in self.negotiated.iter() {
            self.flag_renegotiation(target);
        }
    }

    // -- idle checks --------------------------------------------------------

    /// Returns `true` if the adapter holds no work at all.
    pub fn check_host_idle(&mut self) -> bool {
        if !self.table.is_empty() {
            return false;
        }
        let mut seq = self.seq();
        if seq.qexe_head() != NULL_SLOT
            || seq.waiting_scb() != NULL_SLOT
            || seq.active_scb() != NULL_SLOT
        {
            return false;
        }
        let mut host = self.host();
        host.qout_head() == host.qout_tail()
    }

    /// Returns `true` if no live request addresses `target`.
    #[must_use]
    pub fn check_device_idle(&self, target: u8) -> bool {
        !self
            .table
            .slots()
            .filter_map(|slot| self.table.get(slot))
            .any(|r| r.target == target)
    }
}
