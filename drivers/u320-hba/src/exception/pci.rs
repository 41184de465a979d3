//! PCI and PCI-X transaction errors.
//!
//! DMA is stopped before any status is read so the picture does not change
//! underneath the classification.

use u320_api::{BadSeq, RecoveryReason, RegisterInterface, UpperLayer};
use u320_core::{herr, hwarn};

use super::Outcome;
use crate::config::ChipFeatures;
use crate::context::AdapterContext;
use crate::regs::{PciStat, PcixStat, SplitStat};

impl<R: RegisterInterface, U: UpperLayer> AdapterContext<R, U> {
    pub(crate) fn handle_pci_error(&mut self) -> Outcome {
        let quiesced = self.quiesce_dma();
        let split = self.split_status();
        let (pci, pcix) = self.config_status();
        self.clear_channel_status();
        let pcix = if self.config.features.contains(ChipFeatures::PCIX) {
            pcix
        } else {
            PcixStat::empty()
        };
        hwarn!(
            self.config.unit,
            "host bus error: pci {:?} pcix {:?} split {:?}",
            pci,
            pcix,
            split
        );

        if quiesced.is_err() {
            return Outcome::Fatal(RecoveryReason::BadSequence(BadSeq::DMA_QUIESCE_TIMEOUT));
        }
        let reason = if pci.intersects(PciStat::FATAL) {
            Some(RecoveryReason::PciError)
        } else if pcix.contains(PcixStat::RSCEM) || split.intersects(SplitStat::FATAL) {
            Some(RecoveryReason::PcixSplitError)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                herr!(self.config.unit, "{}: aborting the channel", reason);
                Outcome::HandledNeedsReset(reason)
            }
            None => Outcome::Handled,
        }
    }
}
