//! Interrupt front end.
//!
//! Runs in interrupt context: classifies the interrupt, acknowledges plain
//! command completions, and masks the adapter before handing anything else
//! to the back end. It never touches a request.

use u320_api::{RegisterInterface, UpperLayer};
use u320_core::{herr, htrace};

use crate::context::AdapterContext;
use crate::regs::{Hcntrl, HstIntStat, off};

/// Classification returned by [`AdapterContext::front_end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptClass {
    /// Not ours, or the adapter is gone.
    Nothing,
    /// Only command completions are pending.
    Normal,
    /// Exceptions are pending; interrupts are now disabled.
    Long,
}

/// All-ones status read back from a removed device.
const GONE: u8 = 0xFF;

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Classifies the adapter interrupt.
    pub fn front_end(&mut self) -> InterruptClass {
        let raw = self.regs.read8(off::HSTINTSTAT);
        if raw == GONE {
            if !self.device_gone {
                herr!(self.config.unit, "adapter returned all-ones, assuming removal");
            }
            self.device_gone = true;
            return InterruptClass::Nothing;
        }
        let status = HstIntStat::from_bits_retain(raw);
        if status.is_empty() {
            return InterruptClass::Nothing;
        }
        if status == HstIntStat::CMDCMPLT {
            self.host().set_clrhstint(HstIntStat::CMDCMPLT);
            self.outstanding = self.outstanding.saturating_add(1);
            self.pending |= HstIntStat::CMDCMPLT;
            return InterruptClass::Normal;
        }
        self.disable_interrupts();
        if status.contains(HstIntStat::CMDCMPLT) {
            self.host().set_clrhstint(HstIntStat::CMDCMPLT);
            self.outstanding = self.outstanding.saturating_add(1);
        }
        self.pending |= status;
        htrace!(self.config.unit, "long interrupt {:?}", status);
        InterruptClass::Long
    }

    /// Clears INTEN and reads the control register back so the write has
    /// reached the chip before anything else happens.
    pub fn disable_interrupts(&mut self) {
        let mut host = self.host();
        let hcntrl = host.hcntrl();
        host.set_hcntrl(hcntrl - Hcntrl::INTEN - Hcntrl::CHIPRST);
        let _ = host.hcntrl();
    }

    /// Sets INTEN.
    pub fn enable_interrupts(&mut self) {
        if self.device_gone || self.failed {
            return;
        }
        let mut host = self.host();
        let hcntrl = host.hcntrl();
        host.set_hcntrl((hcntrl | Hcntrl::INTEN) - Hcntrl::CHIPRST);
    }

    /// Returns `true` if the adapter has an interrupt condition latched.
    ///
    /// Reads status only; nothing is acknowledged.
    pub fn poll_pending(&mut self) -> bool {
        let raw = self.regs.read8(off::HSTINTSTAT);
        raw != GONE && raw != 0
    }
}
