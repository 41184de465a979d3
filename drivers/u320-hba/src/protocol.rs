//! Manual SCSI protocol steps driven by the host while the sequencer is
//! paused: sending a single message byte and waiting for the target to
//! release the bus.

use u320_api::{BadSeq, RegisterInterface, Slot, UpperLayer};
use u320_core::{hdebug, hwarn};

use crate::context::AdapterContext;
use crate::poll::{Timeout, poll_with_timeout};
use crate::regs::{Phase, ScsiSig, Sstat1, msg};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    /// Raises ATN, waits for message-out and hands `byte` to the target.
    pub(crate) fn send_message(&mut self, byte: u8) -> Result<(), Timeout> {
        let mut scsi = self.scsi();
        let sigo = scsi.scsisigo();
        scsi.set_scsisigo(sigo | ScsiSig::ATNI);
        scsi.bus().barrier();
        let ceiling = self.config.register_poll;
        poll_with_timeout(
            || {
                let sig = self.scsi().scsisigi();
                sig.phase() == Phase::MsgOut && sig.contains(ScsiSig::REQI)
            },
            ceiling,
        )?;
        let mut scsi = self.scsi();
        // Single-byte message: ATN drops before the byte is acknowledged.
        scsi.set_clrsint1(Sstat1::ATNTARG);
        scsi.set_scsisigo(sigo - ScsiSig::ATNI);
        scsi.set_scsidatl(byte);
        hdebug!(self.config.unit, "sent message {:#04x}", byte);
        Ok(())
    }

    /// Waits for the bus to go free (or be reset) and clears the latch.
    pub(crate) fn wait_bus_free(&mut self) -> Result<(), Timeout> {
        let ceiling = self.config.bus_settle_poll;
        poll_with_timeout(
            || {
                self.scsi()
                    .sstat1()
                    .intersects(Sstat1::BUSFREE | Sstat1::SCSIRSTI)
            },
            ceiling,
        )?;
        self.scsi().set_clrsint1(Sstat1::BUSFREE);
        Ok(())
    }

    /// Sends `byte` and, for messages that end the nexus, waits for the
    /// target to leave the bus.
    pub(crate) fn abort_connection(&mut self, byte: u8) -> Result<(), BadSeq> {
        self.send_message(byte).map_err(|t| {
            hwarn!(self.config.unit, "message-out never came: {}", t);
            BadSeq::MSGOUT_TIMEOUT
        })?;
        if msg::ends_connection(byte) {
            self.wait_bus_free().map_err(|t| {
                hwarn!(self.config.unit, "target kept the bus: {}", t);
                BadSeq::BUSFREE_TIMEOUT
            })?;
        }
        Ok(())
    }

    /// Checks whether the bus is stuck in a data phase.
    ///
    /// Returns the connected slot if the data phase does not end within the
    /// bus-settle ceiling, `None` if the bus is idle or moves on.
    pub fn data_bus_hang(&mut self) -> Option<Slot> {
        if !self.scsi().scsisigi().in_data_phase() {
            return None;
        }
        let ceiling = self.config.bus_settle_poll;
        let hung =
            poll_with_timeout(|| !self.scsi().scsisigi().in_data_phase(), ceiling).is_err();
        if !hung {
            return None;
        }
        let slot = self.active_slot();
        hwarn!(self.config.unit, "data phase hung, slot {:?}", slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AdapterConfig;
    use crate::context::AdapterContext;
    use crate::regs::{Phase, ScsiSig, msg};
    use crate::sim::{Recorder, SimBus};
    use u320_api::{BadSeq, Request, RequestFlags};

    fn ctx() -> AdapterContext<SimBus, Recorder> {
        AdapterContext::new(
            SimBus::new(),
            Recorder::default(),
            AdapterConfig::new(0).with_slots(16).with_poll_ceiling(20),
        )
    }

    #[test]
    fn abort_message_ends_connection() {
        let mut ctx = ctx();
        ctx.regs_mut().set_signals(Phase::DataIn.signals() | ScsiSig::BSYI);
        assert_eq!(ctx.abort_connection(msg::ABORT_TASK), Ok(()));
        assert_eq!(ctx.regs().messages(), [msg::ABORT_TASK]);
        assert!(ctx.bus_quiet());
    }

    #[test]
    fn absent_target_times_out_message_out() {
        let mut ctx = ctx();
        ctx.regs_mut().faults().target_absent = true;
        assert_eq!(
            ctx.abort_connection(msg::ABORT_TASK_SET),
            Err(BadSeq::MSGOUT_TIMEOUT)
        );
        assert!(ctx.regs().messages().is_empty());
    }

    #[test]
    fn non_abort_message_does_not_wait_for_bus_free() {
        let mut ctx = ctx();
        ctx.regs_mut().set_signals(Phase::MsgIn.signals() | ScsiSig::BSYI);
        assert_eq!(ctx.abort_connection(msg::MESSAGE_REJECT), Ok(()));
        assert!(!ctx.bus_quiet());
    }

    #[test]
    fn hung_data_phase_names_the_slot() {
        let mut ctx = ctx();
        ctx.activate(Request::new(5, 2, 0, RequestFlags::empty())).unwrap();
        ctx.regs_mut().set_active(5);
        ctx.regs_mut()
            .set_signals(Phase::DataOut.signals() | ScsiSig::BSYI | ScsiSig::REQI);
        assert_eq!(ctx.data_bus_hang(), Some(5));
        ctx.regs_mut().set_signals(Phase::Status.signals() | ScsiSig::BSYI);
        assert_eq!(ctx.data_bus_hang(), None);
    }
}
