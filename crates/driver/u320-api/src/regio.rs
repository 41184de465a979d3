//! Register access capability.
//!
//! The adapter exposes a byte-wide register file split into banks (the chip
//! calls them "modes"): two data FIFOs, the command channel, the SCSI block
//! and configuration space. Registers outside the banked windows are visible
//! from every bank.

/// Register bank selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    /// Data FIFO 0.
    Dff0 = 0,
    /// Data FIFO 1.
    Dff1 = 1,
    /// Command channel (SCB and S/G fetch).
    CmdChannel = 2,
    /// SCSI bus control and status.
    Scsi = 3,
    /// Configuration space mirror.
    Config = 4,
}

impl Bank {
    /// Banks owning a DMA engine.
    pub const DMA_CHANNELS: [Bank; 3] = [Bank::Dff0, Bank::Dff1, Bank::CmdChannel];

    /// Converts a raw mode number.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Dff0),
            1 => Some(Self::Dff1),
            2 => Some(Self::CmdChannel),
            3 => Some(Self::Scsi),
            4 => Some(Self::Config),
            _ => None,
        }
    }
}

/// Byte-register access to one adapter.
///
/// Implementations own whatever mapping (port I/O, MMIO, simulator) reaches
/// the chip. Every method may have hardware side effects, hence `&mut self`.
pub trait RegisterInterface {
    /// Reads register `reg` in the current bank.
    fn read8(&mut self, reg: u16) -> u8;

    /// Writes `value` to register `reg` in the current bank.
    fn write8(&mut self, reg: u16, value: u8);

    /// Selects the bank subsequent accesses go to.
    fn select_bank(&mut self, bank: Bank);

    /// Returns the currently selected bank.
    fn get_bank(&mut self) -> Bank;

    /// Orders all previous register writes before any later access.
    fn barrier(&mut self);
}

impl<T: RegisterInterface + ?Sized> RegisterInterface for &mut T {
    fn read8(&mut self, reg: u16) -> u8 {
        (**self).read8(reg)
    }

    fn write8(&mut self, reg: u16, value: u8) {
        (**self).write8(reg, value);
    }

    fn select_bank(&mut self, bank: Bank) {
        (**self).select_bank(bank);
    }

    fn get_bank(&mut self) -> Bank {
        (**self).get_bank()
    }

    fn barrier(&mut self) {
        (**self).barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_round_trip_and_range() {
        for raw in 0..5 {
            assert_eq!(Bank::from_raw(raw).map(|b| b as u8), Some(raw));
        }
        assert_eq!(Bank::from_raw(5), None);
        assert_eq!(Bank::from_raw(0xFF), None);
    }

    #[test]
    fn dma_channels_exclude_scsi_and_config() {
        assert!(!Bank::DMA_CHANNELS.contains(&Bank::Scsi));
        assert!(!Bank::DMA_CHANNELS.contains(&Bank::Config));
    }
}
