//! Chip-level primitives: pause, reset, DMA quiesce and bus reset.
//!
//! Every wait here is bounded by a ceiling from [`AdapterConfig`](crate::config::AdapterConfig)
//! and reports [`Timeout`] instead of spinning forever.

use u320_api::{Bank, NULL_SLOT, RegisterInterface, UpperLayer};
use u320_core::{hdebug, herr, htrace, hwarn};

use crate::config::ChipFeatures;
use crate::context::AdapterContext;
use crate::poll::{Timeout, poll_with_timeout};
use crate::regs::{
    Dfcntrl, Hcntrl, HstIntStat, Lqistat1, PciStat, PcixStat, ScsiSeq0, ScsiSig, SplitStat,
    Sstat0, Sstat1,
};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    // -- sequencer pause ----------------------------------------------------

    /// Returns `true` if the sequencer acknowledges being paused.
    pub(crate) fn is_paused(&mut self) -> bool {
        self.host().hcntrl().contains(Hcntrl::PAUSE)
    }

    /// Pauses the sequencer and waits for the acknowledge.
    ///
    /// Returns whether it was already paused, so the caller knows whether
    /// to unpause afterwards.
    pub(crate) fn pause(&mut self) -> Result<bool, Timeout> {
        let hcntrl = self.host().hcntrl();
        if hcntrl.contains(Hcntrl::PAUSE) {
            return Ok(true);
        }
        self.host().set_hcntrl(hcntrl | Hcntrl::PAUSE);
        self.regs.barrier();
        let ceiling = self.config.pause_poll;
        poll_with_timeout(|| self.is_paused(), ceiling).inspect_err(|t| {
            hwarn!(self.config.unit, "sequencer ignored pause: {}", t);
        })?;
        Ok(false)
    }

    /// Lets the sequencer run again.
    pub(crate) fn unpause(&mut self) {
        if self.device_gone || self.failed {
            return;
        }
        let hcntrl = self.host().hcntrl();
        self.host().set_hcntrl(hcntrl - Hcntrl::PAUSE - Hcntrl::CHIPRST);
    }

    /// Resets the whole chip, leaving it paused with interrupts off.
    pub(crate) fn chip_reset(&mut self) -> Result<(), Timeout> {
        herr!(self.config.unit, "resetting chip");
        self.stats.escalations += 1;
        self.host().set_hcntrl(Hcntrl::CHIPRST | Hcntrl::PAUSE);
        self.regs.barrier();
        let ceiling = self.config.register_poll;
        poll_with_timeout(
            || self.host().hcntrl().contains(Hcntrl::CHIPRST),
            ceiling,
        )?;
        // Writing without CHIPRST releases the acknowledge.
        self.host().set_hcntrl(Hcntrl::PAUSE);
        self.saved_bank = None;
        Ok(())
    }

    // -- banks --------------------------------------------------------------

    /// Remembers the bank selected by the interrupted code, once per cycle.
    pub(crate) fn save_bank(&mut self) {
        if self.saved_bank.is_none() {
            self.saved_bank = Some(self.regs.get_bank());
        }
    }

    /// Reselects the bank recorded by [`save_bank`](Self::save_bank).
    pub(crate) fn restore_bank(&mut self) {
        if let Some(bank) = self.saved_bank.take() {
            self.select_bank(bank);
        }
    }

    // -- DMA ----------------------------------------------------------------

    /// Stops and flushes every DMA engine and waits for them to go idle.
    pub(crate) fn quiesce_dma(&mut self) -> Result<(), Timeout> {
        for bank in Bank::DMA_CHANNELS {
            let mut dma = self.dma(bank);
            let ctl = dma.dfcntrl();
            if ctl.intersects(Dfcntrl::ACTIVE) {
                dma.set_dfcntrl((ctl - Dfcntrl::ACTIVE) | Dfcntrl::FIFOFLUSH);
            }
        }
        self.regs.barrier();
        let ceiling = self.config.register_poll;
        for bank in Bank::DMA_CHANNELS {
            poll_with_timeout(
                || !self.dma(bank).dfcntrl().intersects(Dfcntrl::ACTIVE),
                ceiling,
            )
            .inspect_err(|_| {
                herr!(self.config.unit, "{:?} DMA did not stop", bank);
            })?;
        }
        Ok(())
    }

    /// Stops the DMA engine of `bank` and flushes its FIFO.
    pub(crate) fn reclaim_channel(&mut self, bank: Bank) {
        let mut dma = self.dma(bank);
        let ctl = dma.dfcntrl();
        dma.set_dfcntrl((ctl - Dfcntrl::ACTIVE) | Dfcntrl::FIFOFLUSH);
    }

    /// Clears every write-one-to-clear channel status register.
    pub(crate) fn clear_channel_status(&mut self) {
        for bank in Bank::DMA_CHANNELS {
            let mut dma = self.dma(bank);
            let split = dma.dchspltstat();
            if !split.is_empty() {
                dma.set_dchspltstat(split);
            }
        }
        let mut cfg = self.cfg();
        let pci = cfg.pcistat();
        if !pci.is_empty() {
            cfg.set_pcistat(pci);
        }
        let pcix = cfg.pcixstat();
        if !pcix.is_empty() {
            cfg.set_pcixstat(pcix);
        }
        self.host()
            .set_clrhstint(HstIntStat::PCIINT | HstIntStat::SPLTINT);
    }

    /// Error bits currently latched in configuration space.
    pub(crate) fn config_status(&mut self) -> (PciStat, PcixStat) {
        let mut cfg = self.cfg();
        (cfg.pcistat(), cfg.pcixstat())
    }

    /// Split status of every DMA channel, OR-ed together.
    pub(crate) fn split_status(&mut self) -> SplitStat {
        Bank::DMA_CHANNELS
            .into_iter()
            .fold(SplitStat::empty(), |acc, bank| acc | self.dma(bank).dchspltstat())
    }

    // -- SCSI bus -----------------------------------------------------------

    /// Returns `true` once no device drives any bus signal.
    pub(crate) fn bus_quiet(&mut self) -> bool {
        self.scsi().scsisigi().is_empty()
    }

    /// Drives a SCSI bus reset and waits for the bus to settle.
    pub(crate) fn reset_bus(&mut self) -> Result<(), Timeout> {
        hwarn!(self.config.unit, "resetting SCSI bus");
        let mut scsi = self.scsi();
        let seq = scsi.scsiseq0() - ScsiSeq0::ENSELO;
        scsi.set_scsiseq0(seq | ScsiSeq0::SCSIRSTO);
        scsi.bus().barrier();
        scsi.set_scsiseq0(seq - ScsiSeq0::SCSIRSTO);
        let ceiling = self.config.bus_settle_poll;
        poll_with_timeout(|| self.bus_quiet(), ceiling).inspect_err(|_| {
            herr!(self.config.unit, "bus still driven after reset");
        })?;
        // Our own reset latches as a detected reset.
        self.scsi().set_clrsint1(Sstat1::SCSIRSTI);
        self.host().set_clrhstint(HstIntStat::SCSIINT);
        Ok(())
    }

    /// Returns the channel to its idle state: no selection, no connection,
    /// empty queues and no latched SCSI status.
    pub(crate) fn reset_channel(&mut self) -> Result<(), Timeout> {
        hdebug!(self.config.unit, "resetting channel state");
        let quiesced = self.quiesce_dma();
        let mut scsi = self.scsi();
        let seq = scsi.scsiseq0();
        scsi.set_scsiseq0(seq - ScsiSeq0::ENSELO);
        scsi.set_scsisigo(ScsiSig::empty());
        scsi.set_clrsint0(Sstat0::all());
        scsi.set_clrsint1(Sstat1::all());
        scsi.set_clrlqiint1(Lqistat1::all());
        let mut seq = self.seq();
        seq.set_waiting_scb(NULL_SLOT);
        seq.set_active_scb(NULL_SLOT);
        seq.set_qexe_head(NULL_SLOT);
        for target in 0..u320_api::MAX_TARGETS as u8 {
            self.clear_busy_target(target);
        }
        while self.abort_msgs.pop().is_some() {}
        self.discard_done_queue();
        quiesced
    }

    /// Drops every posted entry still in the done queue.
    ///
    /// Callers drain first; whatever is left names requests that are about
    /// to be aborted or never existed.
    pub(crate) fn discard_done_queue(&mut self) {
        let mut host = self.host();
        let head = host.qout_head();
        let tail = host.qout_tail();
        if head != tail {
            let depth = self.config.qout_depth;
            let dropped = (head + depth - tail) % depth;
            hdebug!(self.config.unit, "discarding {} done-queue entries", dropped);
            self.host().set_qout_tail(head);
        }
    }

    /// Points the sequencer back at its idle loop.
    pub(crate) fn restart_sequencer(&mut self) {
        let entry = self.config.idle_loop_entry;
        htrace!(self.config.unit, "sequencer restart at {:#06x}", entry);
        self.host().set_prgmcnt(entry);
    }

    /// Clears PCI status through the config bank when the chip needs it.
    pub(crate) fn clear_config_status(&mut self) {
        if self.config.features.contains(ChipFeatures::CLEAR_CONFIG_STATUS) {
            self.clear_channel_status();
        }
    }
}
