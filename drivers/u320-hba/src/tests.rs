//! End-to-end dispatch scenarios against the simulated adapter.

use u320_api::{
    AsyncEvent, Bank, BadSeq, HbaError, HostStatus, MgrState, RecoveryReason, Request,
    RequestFlags, Slot,
};

use crate::abort::AbortOutcome;
use crate::config::AdapterConfig;
use crate::context::AdapterContext;
use crate::frontend::InterruptClass;
use crate::regs::{
    Hcntrl, PciStat, PcixStat, Phase, ScbControl, ScsiSig, SeqIntCode, SplitStat, Sstat1, msg, off,
};
use crate::shared::SharedAdapter;
use crate::sim::{Recorder, SimBus};
use crate::table::RequestId;

type Ctx = AdapterContext<SimBus, Recorder>;

fn adapter() -> Ctx {
    AdapterContext::new(
        SimBus::new(),
        Recorder::default(),
        AdapterConfig::new(0).with_slots(64).with_poll_ceiling(64),
    )
}

fn submit(ctx: &mut Ctx, slot: Slot, target: u8) -> RequestId {
    ctx.activate(Request::new(slot, target, 0, RequestFlags::TAGGED))
        .unwrap()
}

/// One interrupt: front end, then whatever it deferred.
fn interrupt(ctx: &mut Ctx) -> InterruptClass {
    let class = ctx.front_end();
    if class != InterruptClass::Nothing {
        ctx.service();
    }
    class
}

fn completions_of(ctx: &Ctx, slot: Slot) -> usize {
    ctx.upper().completions.iter().filter(|r| r.slot == slot).count()
}

#[test]
fn completions_arrive_in_posting_order() {
    let mut ctx = adapter();
    submit(&mut ctx, 1, 0);
    submit(&mut ctx, 3, 0);
    ctx.regs_mut().post_completion(3);
    ctx.regs_mut().post_completion(1);

    assert_eq!(interrupt(&mut ctx), InterruptClass::Normal);
    let order: Vec<_> = ctx.upper().completions.iter().map(|r| r.slot).collect();
    assert_eq!(order, [3, 1]);
    assert_eq!(ctx.outstanding_completions(), 0);
    assert_eq!(ctx.active_count(), 0);
    assert!(!ctx.poll_pending());
}

#[test]
fn completion_counter_balances_across_cycles() {
    let mut ctx = adapter();
    for slot in 0..6 {
        submit(&mut ctx, slot, 1);
    }
    for slot in 0..6 {
        ctx.regs_mut().post_completion(slot);
        if slot % 2 == 1 {
            ctx.regs_mut().raise_seqint(SeqIntCode::IdleLoopBreak as u8);
        }
        interrupt(&mut ctx);
        assert_eq!(ctx.outstanding_completions(), 0);
    }
    assert_eq!(ctx.stats().completions, 6);
    assert_eq!(ctx.stats().recoveries, 0);
    assert!(ctx.host().hcntrl().contains(Hcntrl::INTEN));
}

#[test]
fn recovery_empties_the_done_queue() {
    let mut ctx = adapter();
    submit(&mut ctx, 2, 0);
    for slot in [40, 41, 2] {
        ctx.regs_mut().post_completion(slot);
    }

    interrupt(&mut ctx);
    assert_eq!(ctx.stats().recoveries, 1);
    assert_eq!(ctx.last_bad_seq(), Some(BadSeq::CMDCMPLT_UNMAPPED));
    assert_eq!(completions_of(&ctx, 2), 1);
    assert_eq!(ctx.upper().completions[0].host_status, HostStatus::AbortedBusReset);
    let (head, tail) = {
        let mut host = ctx.host();
        (host.qout_head(), host.qout_tail())
    };
    assert_eq!(head, tail);

    // The slot is reused; only what the chip posts now may complete.
    submit(&mut ctx, 2, 0);
    submit(&mut ctx, 5, 0);
    ctx.regs_mut().post_completion(5);
    assert_eq!(interrupt(&mut ctx), InterruptClass::Normal);
    assert_eq!(completions_of(&ctx, 2), 1);
    assert_eq!(completions_of(&ctx, 5), 1);
    assert_eq!(ctx.request(2).map(|r| r.state()), Some(MgrState::Queued));
    assert_eq!(ctx.stats().recoveries, 1);
}

#[test]
fn pci_error_aborts_everything_inside_a_freeze() {
    let mut ctx = adapter();
    submit(&mut ctx, 1, 0);
    submit(&mut ctx, 2, 4);
    ctx.regs_mut().raise_pci(PciStat::RMA, PcixStat::empty());

    assert_eq!(interrupt(&mut ctx), InterruptClass::Long);
    let done: Vec<_> = ctx
        .upper()
        .completions
        .iter()
        .map(|r| (r.slot, r.state(), r.host_status))
        .collect();
    assert_eq!(
        done,
        [
            (1, MgrState::AbortedDone, HostStatus::AbortedPciError),
            (2, MgrState::AbortedDone, HostStatus::AbortedPciError),
        ]
    );
    assert_eq!(
        ctx.upper().events,
        [
            AsyncEvent::Freeze(RecoveryReason::PciError),
            AsyncEvent::IoError,
            AsyncEvent::Unfreeze,
            AsyncEvent::BusReset { third_party: false },
        ]
    );
    assert_eq!(ctx.config_status(), (PciStat::empty(), PcixStat::empty()));
    assert!(ctx.host().hcntrl().contains(Hcntrl::INTEN));
}

#[test]
fn split_error_aborts_with_its_own_status() {
    let mut ctx = adapter();
    submit(&mut ctx, 7, 1);
    ctx.regs_mut().raise_split(Bank::Dff1, SplitStat::SCADERR);

    assert_eq!(interrupt(&mut ctx), InterruptClass::Long);
    assert_eq!(ctx.upper().completions.len(), 1);
    assert_eq!(
        ctx.upper().completions[0].host_status,
        HostStatus::AbortedPcixSplitError
    );
    assert_eq!(
        ctx.upper().events.first(),
        Some(&AsyncEvent::Freeze(RecoveryReason::PcixSplitError))
    );
    assert_eq!(ctx.upper().events.get(1), Some(&AsyncEvent::IoError));
    assert!(ctx.split_status().is_empty());
    assert!(!ctx.poll_pending());
}

#[test]
fn parity_error_with_nobody_connected_recovers_exactly_once() {
    let mut ctx = adapter();
    for slot in [2, 4, 6] {
        submit(&mut ctx, slot, 3);
    }
    ctx.regs_mut().raise_scsi(Sstat1::SCSIPERR);

    assert_eq!(interrupt(&mut ctx), InterruptClass::Long);
    assert_eq!(ctx.stats().recoveries, 1);
    assert_eq!(ctx.last_bad_seq(), Some(BadSeq::PARITY_UNMAPPED));
    for slot in [2, 4, 6] {
        assert_eq!(completions_of(&ctx, slot), 1);
    }
    assert!(ctx.upper().completions.iter().all(|r| {
        r.state() == MgrState::AbortedDone && r.host_status == HostStatus::AbortedBusReset
    }));
    let freezes = ctx
        .upper()
        .events
        .iter()
        .filter(|e| matches!(e, AsyncEvent::Freeze(_)))
        .count();
    assert_eq!(freezes, 1);

    // Nothing is left latched for the next interrupt.
    assert_eq!(ctx.front_end(), InterruptClass::Nothing);
    assert!(ctx.host().hcntrl().contains(Hcntrl::INTEN));
}

#[test]
fn abort_during_selection_finishes_on_the_abort_interrupt() {
    let mut ctx = adapter();
    let id = submit(&mut ctx, 5, 2);
    submit(&mut ctx, 9, 2);
    ctx.regs_mut().set_waiting(5);

    assert_eq!(ctx.abort(id), AbortOutcome::AbortPending);
    assert_eq!(ctx.request(5).map(|r| r.state()), Some(MgrState::AbortInProgress));
    assert!(ctx.regs().scb_control(5).contains(ScbControl::ABORT));
    assert!(ctx.upper().completions.is_empty());

    // The target answers selection; the sequencer sees the abort bit.
    ctx.regs_mut()
        .set_signals(Phase::MsgIn.signals() | ScsiSig::BSYI);
    ctx.regs_mut().raise_seqint(SeqIntCode::AbortTarget as u8);
    assert_eq!(interrupt(&mut ctx), InterruptClass::Long);

    assert_eq!(ctx.regs().messages(), [msg::ABORT_TASK]);
    let done = ctx.upper().completions[0];
    assert_eq!(done.slot, 5);
    assert_eq!(done.state(), MgrState::AbortedDone);
    assert_eq!(done.host_status, HostStatus::Aborted);
    assert_eq!(ctx.regs().peek16(off::WAITING_SCB), u320_api::NULL_SLOT);
    assert!(!ctx.regs().scb_control(5).contains(ScbControl::ABORT));
    assert_eq!(ctx.request(9).map(|r| r.state()), Some(MgrState::Queued));
    assert_eq!(ctx.stats().recoveries, 0);
    assert_eq!(ctx.abort(id), AbortOutcome::AlreadyDone);
}

#[test]
fn completion_never_overtakes_a_finished_abort() {
    let mut ctx = adapter();
    let id = submit(&mut ctx, 12, 0);
    ctx.regs_mut().queue_for_execution(&[12]);
    assert_eq!(ctx.abort(id), AbortOutcome::AbortedNow);
    assert!(ctx.regs().exe_queue().is_empty());

    // A stale posting for the freed slot is a sequencing error, not a
    // second completion.
    ctx.regs_mut().post_completion(12);
    interrupt(&mut ctx);
    assert_eq!(completions_of(&ctx, 12), 1);
    assert_eq!(ctx.last_bad_seq(), Some(BadSeq::CMDCMPLT_UNMAPPED));
}

#[test]
fn stale_handle_cannot_reach_a_reused_slot() {
    let mut ctx = adapter();
    let old = submit(&mut ctx, 7, 1);
    ctx.regs_mut().post_completion(7);
    interrupt(&mut ctx);

    let new = submit(&mut ctx, 7, 1);
    assert_ne!(old, new);
    assert_eq!(ctx.abort(old), AbortOutcome::AlreadyDone);
    assert_eq!(ctx.request(7).map(|r| r.state()), Some(MgrState::Queued));
    assert_eq!(ctx.abort(new), AbortOutcome::AbortedNow);
}

#[test]
fn nested_recovery_request_during_recovery_is_ignored() {
    let mut ctx = adapter();
    submit(&mut ctx, 1, 0);
    // A completion for an idle slot is found by the drain inside recovery.
    ctx.regs_mut().post_completion(40);
    ctx.recover(RecoveryReason::HostRequested);
    assert_eq!(ctx.stats().recoveries, 1);
    assert_eq!(ctx.last_recovery(), Some(RecoveryReason::HostRequested));
    assert_eq!(completions_of(&ctx, 1), 1);
}

#[test]
fn third_party_reset_returns_everything_with_its_own_status() {
    let mut ctx = adapter();
    for slot in [0, 1] {
        submit(&mut ctx, slot, 5);
    }
    ctx.set_negotiated(5, true);
    ctx.regs_mut().raise_scsi(Sstat1::SCSIRSTI);

    assert_eq!(interrupt(&mut ctx), InterruptClass::Long);
    assert!(ctx.upper().completions.iter().all(|r| {
        r.state() == MgrState::AbortedDone && r.host_status == HostStatus::AbortedThirdPartyReset
    }));
    assert!(ctx
        .upper()
        .events
        .contains(&AsyncEvent::BusReset { third_party: true }));
    assert_eq!(ctx.stats().recoveries, 0);
    assert_eq!(ctx.regs().bus_resets(), 0);
    assert!(!ctx.poll_pending());
}

#[test]
fn channel_failure_keeps_interrupts_off_until_reset() {
    let mut ctx = adapter();
    submit(&mut ctx, 2, 0);
    ctx.regs_mut().faults().pause_stuck = true;
    ctx.regs_mut().faults().chip_dead = true;
    ctx.regs_mut().raise_scsi(Sstat1::SCSIPERR);

    interrupt(&mut ctx);
    assert!(ctx.failed());
    assert_eq!(
        ctx.upper().completions[0].host_status,
        HostStatus::AbortedChannelFailed
    );
    assert!(ctx.upper().events.contains(&AsyncEvent::IoError));
    assert!(!ctx.host().hcntrl().contains(Hcntrl::INTEN));

    ctx.regs_mut().faults().chip_dead = false;
    ctx.reset_hardware();
    assert!(!ctx.failed());
    assert!(ctx.host().hcntrl().contains(Hcntrl::INTEN));
    submit(&mut ctx, 2, 0);
    ctx.regs_mut().post_completion(2);
    assert_eq!(interrupt(&mut ctx), InterruptClass::Normal);
    assert_eq!(ctx.upper().completions.last().map(|r| r.state()), Some(MgrState::Done));
}

#[test]
fn removed_adapter_goes_quiet() {
    let mut ctx = adapter();
    let id = submit(&mut ctx, 4, 0);
    ctx.regs_mut().set_gone(true);
    assert_eq!(interrupt(&mut ctx), InterruptClass::Nothing);
    assert!(ctx.device_gone());
    ctx.recover(RecoveryReason::Spurious);
    assert_eq!(
        ctx.upper().completions[0].host_status,
        HostStatus::AbortedChannelFailed
    );
    assert_eq!(ctx.abort(id), AbortOutcome::AlreadyDone);
    assert_eq!(
        ctx.activate(Request::new(5, 0, 0, RequestFlags::empty())),
        Err(HbaError::DeviceGone)
    );
}

#[test]
fn shared_adapter_runs_a_full_cycle() {
    let shared = SharedAdapter::new(adapter());
    let id = shared
        .activate(Request::new(3, 1, 0, RequestFlags::TAGGED))
        .unwrap();
    shared.activate(Request::new(4, 1, 0, RequestFlags::TAGGED)).unwrap();
    shared.with(|ctx| {
        ctx.regs_mut().post_completion(4);
        ctx.regs_mut().raise_seqint(SeqIntCode::IdleLoopBreak as u8);
    });

    assert_eq!(shared.interrupt(), Some(InterruptClass::Long));
    let report = shared.service();
    assert_eq!(report.completed, 1);
    assert_eq!(report.exceptions, 1);
    assert_eq!(shared.abort(id), AbortOutcome::AbortedNow);

    let ctx = shared.into_inner();
    let slots: Vec<_> = ctx.upper().completions.iter().map(|r| r.slot).collect();
    assert_eq!(slots, [4, 3]);
}
