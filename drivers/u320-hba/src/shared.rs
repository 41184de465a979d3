//! Adapter shared between interrupt context, the deferred back end and
//! out-of-band callers.
//!
//! Every entry point takes the [`AdapterLock`] for its own [`Context`], so a
//! dispatch cycle and an abort never interleave. The front end only tries
//! the lock: if the back end or a caller holds it, interrupts are already
//! masked or the holder will see the status itself.

use u320_api::{HbaError, RegisterInterface, Request, UpperLayer};
use u320_core::sync::{AdapterLock, Context};

use crate::abort::AbortOutcome;
use crate::backend::DispatchReport;
use crate::context::AdapterContext;
use crate::frontend::InterruptClass;
use crate::table::RequestId;

/// An [`AdapterContext`] behind its lock.
pub struct SharedAdapter<R: RegisterInterface, U: UpperLayer> {
    lock: AdapterLock<AdapterContext<R, U>>,
}

impl<R: RegisterInterface, U: UpperLayer> SharedAdapter<R, U> {
    /// Wraps `ctx`.
    pub const fn new(ctx: AdapterContext<R, U>) -> Self {
        Self {
            lock: AdapterLock::new(ctx),
        }
    }

    /// Interrupt entry point.
    ///
    /// Returns `None` if another context holds the adapter.
    pub fn interrupt(&self) -> Option<InterruptClass> {
        let mut ctx = self.lock.try_lock(Context::FrontEnd)?;
        Some(ctx.front_end())
    }

    /// Deferred entry point, run after the interrupt returned.
    pub fn service(&self) -> DispatchReport {
        self.lock.lock(Context::BackEnd).service()
    }

    /// Aborts a request on behalf of the caller.
    pub fn abort(&self, id: RequestId) -> AbortOutcome {
        self.lock.lock(Context::Caller).abort(id)
    }

    /// Registers a request handed to the chip by the submission path.
    pub fn activate(&self, request: Request) -> Result<RequestId, HbaError> {
        self.lock.lock(Context::Caller).activate(request)
    }

    /// Runs `f` with exclusive access to the adapter.
    pub fn with<T>(&self, f: impl FnOnce(&mut AdapterContext<R, U>) -> T) -> T {
        f(&mut self.lock.lock(Context::Caller))
    }

    /// Context currently holding the adapter, if any.
    #[must_use]
    pub fn holder(&self) -> Option<Context> {
        self.lock.holder()
    }

    /// Unwraps the adapter.
    pub fn into_inner(self) -> AdapterContext<R, U> {
        self.lock.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::regs::SeqIntCode;
    use crate::sim::{Recorder, SimBus};
    use std::sync::Arc;
    use u320_api::{MgrState, RequestFlags};

    fn shared() -> SharedAdapter<SimBus, Recorder> {
        SharedAdapter::new(AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(1).with_slots(64).with_poll_ceiling(50),
        ))
    }

    #[test]
    fn front_end_backs_off_while_held() {
        let adapter = shared();
        adapter.with(|ctx| {
            ctx.regs_mut().raise_seqint(SeqIntCode::IdleLoopBreak as u8);
        });
        let guard = adapter.lock.lock(Context::BackEnd);
        assert!(adapter.interrupt().is_none());
        assert_eq!(adapter.holder(), Some(Context::BackEnd));
        drop(guard);
        assert_eq!(adapter.interrupt(), Some(InterruptClass::Long));
        assert_eq!(adapter.service().exceptions, 1);
        assert_eq!(adapter.holder(), None);
    }

    #[test]
    fn concurrent_abort_and_dispatch_never_double_complete() {
        let adapter = Arc::new(shared());
        let ids: Vec<_> = (0..32)
            .map(|slot| {
                adapter
                    .activate(Request::new(slot, (slot % 4) as u8, 0, RequestFlags::empty()))
                    .unwrap()
            })
            .collect();
        adapter.with(|ctx| {
            for slot in (0..32).step_by(2) {
                ctx.regs_mut().post_completion(slot);
            }
        });

        let aborter = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                ids.iter()
                    .filter(|&&id| adapter.abort(id) == AbortOutcome::AbortedNow)
                    .count()
            })
        };
        let dispatcher = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                while adapter.interrupt() != Some(InterruptClass::Normal) {
                    std::hint::spin_loop();
                }
                adapter.service().completed
            })
        };
        let aborted = aborter.join().unwrap();
        dispatcher.join().unwrap();

        let ctx = Arc::into_inner(adapter).map(SharedAdapter::into_inner).unwrap();
        let done = &ctx.upper().completions;
        assert_eq!(done.len(), 32);
        for slot in 0..32u16 {
            assert_eq!(done.iter().filter(|r| r.slot == slot).count(), 1);
        }
        let finished = done.iter().filter(|r| r.state() == MgrState::Done).count();
        assert_eq!(finished + aborted, 32);
        assert_eq!(ctx.active_count(), 0);
    }
}
