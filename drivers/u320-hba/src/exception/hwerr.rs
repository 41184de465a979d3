//! Internal hardware errors.

use u320_api::{RecoveryReason, RegisterInterface, UpperLayer};
use u320_core::{herr, hwarn};

use super::Outcome;
use crate::context::AdapterContext;
use crate::regs::{HstIntStat, HwError};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_hardware_error(&mut self) -> Outcome {
        let mut host = self.host();
        let error = host.error();
        host.set_clrerr(error);
        host.set_clrhstint(HstIntStat::HWERRINT);

        if error.intersects(HwError::PARITY_CLASS) {
            herr!(self.config.unit, "internal parity error {:?}", error);
            Outcome::HandledNeedsReset(RecoveryReason::HardwareError)
        } else if error.contains(HwError::ILLOPCODE) {
            herr!(self.config.unit, "sequencer hit an illegal opcode");
            Outcome::Fatal(RecoveryReason::HardwareError)
        } else {
            if !error.is_empty() {
                hwarn!(self.config.unit, "hardware error {:?} cleared", error);
            }
            Outcome::Handled
        }
    }
}
