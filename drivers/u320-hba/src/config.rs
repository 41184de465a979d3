//! Per-adapter configuration.
//!
//! Chip-revision differences are carried as capability flags consumed by
//! one unified set of handlers. Every bounded hardware wait takes its
//! iteration ceiling from here.

use bitflags::bitflags;

use crate::regs::HstIntStat;
use crate::table::MAX_SLOTS;

bitflags! {
    /// Capabilities and errata of the attached chip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChipFeatures: u16 {
        /// Packetized (information unit) transfers; CRC errors are
        /// reported through `LQISTAT1`.
        const PACKETIZED = 1 << 0;
        /// The host bus is PCI-X; split completion errors are possible.
        const PCIX = 1 << 1;
        /// Bank selection must be read back before it is trusted.
        const MODE_PTR_VERIFY = 1 << 2;
        /// Clearing one interrupt may drop a command-complete edge latched
        /// in the same cycle.
        const LOST_CMDCMPLT_BEHIND_CLEAR = 1 << 3;
        /// Probe for a hung data phase before a bus reset.
        const BUS_HANG_CHECK = 1 << 4;
        /// PCI status must be cleared through the config bank after errors.
        const CLEAR_CONFIG_STATUS = 1 << 5;
    }
}

/// Default number of exception iterations per dispatch cycle.
pub const DEFAULT_SPURIOUS_CEILING: u32 = 10;

/// Default iteration ceiling for register handshakes.
pub const DEFAULT_REGISTER_POLL: u32 = 10_000;

/// Configuration of one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Unit number used to tag log records.
    pub unit: u8,
    /// Number of usable hardware slots, at most [`MAX_SLOTS`].
    pub num_slots: u16,
    /// Number of entries in the done queue ring.
    pub qout_depth: u16,
    /// Exception iterations tolerated in one dispatch cycle.
    pub spurious_ceiling: u32,
    /// Ceiling for pause, DMA and message handshakes.
    pub register_poll: u32,
    /// Ceiling for discarding overrun data.
    pub bitbucket_poll: u32,
    /// Ceiling for the bus to settle after a reset.
    pub bus_settle_poll: u32,
    /// Ceiling for the sequencer to acknowledge a pause.
    pub pause_poll: u32,
    /// Sequencer address of the idle loop.
    pub idle_loop_entry: u16,
    /// Interrupt classes that may be lost when another class is cleared.
    pub lost_behind_clear: HstIntStat,
    /// Chip capabilities.
    pub features: ChipFeatures,
}

impl AdapterConfig {
    /// Conservative defaults for an adapter with every slot usable.
    #[must_use]
    pub const fn new(unit: u8) -> Self {
        Self {
            unit,
            num_slots: MAX_SLOTS as u16,
            qout_depth: MAX_SLOTS as u16,
            spurious_ceiling: DEFAULT_SPURIOUS_CEILING,
            register_poll: DEFAULT_REGISTER_POLL,
            bitbucket_poll: 100_000,
            bus_settle_poll: 50_000,
            pause_poll: DEFAULT_REGISTER_POLL,
            idle_loop_entry: 0,
            lost_behind_clear: HstIntStat::empty(),
            features: ChipFeatures::empty(),
        }
    }

    /// Sets the chip capabilities, deriving the lost-interrupt classes.
    #[must_use]
    pub const fn with_features(mut self, features: ChipFeatures) -> Self {
        self.features = features;
        if features.contains(ChipFeatures::LOST_CMDCMPLT_BEHIND_CLEAR) {
            self.lost_behind_clear = self.lost_behind_clear.union(HstIntStat::CMDCMPLT);
        }
        self
    }

    /// Sets the number of usable slots, clamped to [`MAX_SLOTS`].
    #[must_use]
    pub const fn with_slots(mut self, num_slots: u16) -> Self {
        self.num_slots = if num_slots as usize > MAX_SLOTS {
            MAX_SLOTS as u16
        } else {
            num_slots
        };
        self
    }

    /// Sets the done queue depth; zero is treated as one.
    #[must_use]
    pub const fn with_qout_depth(mut self, depth: u16) -> Self {
        self.qout_depth = if depth == 0 { 1 } else { depth };
        self
    }

    /// Sets every bounded wait to the same ceiling.
    #[must_use]
    pub const fn with_poll_ceiling(mut self, iterations: u32) -> Self {
        self.register_poll = iterations;
        self.bitbucket_poll = iterations;
        self.bus_settle_poll = iterations;
        self.pause_poll = iterations;
        self
    }

    /// Sets the sequencer idle loop address.
    #[must_use]
    pub const fn with_idle_loop(mut self, entry: u16) -> Self {
        self.idle_loop_entry = entry;
        self
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AdapterConfig::default();
        assert_eq!(cfg.spurious_ceiling, 10);
        assert_eq!(usize::from(cfg.num_slots), MAX_SLOTS);
        assert!(cfg.lost_behind_clear.is_empty());
    }

    #[test]
    fn lost_interrupt_classes_follow_features() {
        let cfg = AdapterConfig::new(1).with_features(ChipFeatures::LOST_CMDCMPLT_BEHIND_CLEAR);
        assert!(cfg.lost_behind_clear.contains(HstIntStat::CMDCMPLT));
        let cfg = AdapterConfig::new(1).with_features(ChipFeatures::PCIX);
        assert!(cfg.lost_behind_clear.is_empty());
    }

    #[test]
    fn builders_clamp() {
        let cfg = AdapterConfig::new(0).with_slots(u16::MAX).with_qout_depth(0);
        assert_eq!(usize::from(cfg.num_slots), MAX_SLOTS);
        assert_eq!(cfg.qout_depth, 1);
        let cfg = cfg.with_poll_ceiling(7);
        assert_eq!((cfg.register_poll, cfg.bitbucket_poll, cfg.pause_poll), (7, 7, 7));
    }
}
