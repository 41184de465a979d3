//! Bounded busy-wait polling.
//!
//! Every hardware wait in the core goes through [`poll_with_timeout`], so a
//! bit that never changes turns into a [`Timeout`] after exactly the
//! configured number of checks instead of a hang.

use core::fmt;

/// A bounded wait ran out of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    /// Number of times the condition was checked.
    pub iterations: u32,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition not met after {} polls", self.iterations)
    }
}

/// Evaluates `predicate` until it returns `true`, at most `max_iters` times.
///
/// # Errors
///
/// Returns [`Timeout`] if the predicate never held. A ceiling of zero times
/// out without evaluating the predicate.
pub fn poll_with_timeout(
    mut predicate: impl FnMut() -> bool,
    max_iters: u32,
) -> Result<(), Timeout> {
    for _ in 0..max_iters {
        if predicate() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(Timeout {
        iterations: max_iters,
    })
}

impl From<Timeout> for u320_api::HbaError {
    fn from(_: Timeout) -> Self {
        Self::Timeout
    }
}
