//! Simulated adapter for tests and host tools.
//!
//! [`SimBus`] implements [`RegisterInterface`] over an in-memory register
//! file that behaves like the consolidated register map: banked channel
//! registers, write-one-to-clear status, a done-queue ring, SCB RAM behind
//! the `SCBPTR` window, a sequencer that can be paused, and a SCSI bus that
//! answers message-out and resets. Faults can be injected through
//! [`Faults`]. [`Recorder`] is an upper layer that keeps everything it is
//! given.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;

use u320_api::{
    AsyncEvent, Bank, CompletionSink, EventSink, NULL_SLOT, RegisterInterface, Request, Slot,
};

use crate::regs::{
    Dfcntrl, Hcntrl, HstIntStat, HwError, Lqistat1, PciStat, PcixStat, Phase, ScbControl,
    ScsiSeq0, ScsiSig, SgStatus, SplitStat, Sstat0, Sstat1, msg, off,
};
use crate::table::MAX_SLOTS;

const REG_SPACE: usize = 0x200;
const SCB_WINDOW: u16 = off::SCB_CONTROL;
const SCB_BYTES: usize = 0x40;
const BANKS: usize = 5;

/// Per-bank copies of the banked registers.
#[derive(Clone, Copy)]
struct Banked {
    dfcntrl: u8,
    split: u8,
    scbptr: [u8; 2],
}

impl Banked {
    const RESET: Self = Self {
        dfcntrl: 0,
        split: 0,
        scbptr: NULL_SLOT.to_le_bytes(),
    };
}

/// Injectable hardware faults.
#[derive(Debug, Clone, Copy)]
pub struct Faults {
    /// The sequencer never acknowledges a pause. Cleared by a chip reset.
    pub pause_stuck: bool,
    /// DMA engines ignore stop requests. Cleared by a chip reset.
    pub dma_stuck: bool,
    /// A device keeps driving the bus through resets.
    pub bus_stuck: bool,
    /// Nobody answers ATN.
    pub target_absent: bool,
    /// The chip ignores reset.
    pub chip_dead: bool,
    /// Interrupt classes that re-assert after every clear.
    pub stuck_intstat: HstIntStat,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            pause_stuck: false,
            dma_stuck: false,
            bus_stuck: false,
            target_absent: false,
            chip_dead: false,
            stuck_intstat: HstIntStat::empty(),
        }
    }
}

/// In-memory adapter.
pub struct SimBus {
    mem: [u8; REG_SPACE],
    banked: [Banked; BANKS],
    bank: Bank,
    scb_ram: Vec<[u8; SCB_BYTES]>,
    done_ring: Vec<Slot>,
    qout_head: u16,
    qout_tail: u16,
    intstat: HstIntStat,
    inten: bool,
    pause_requested: bool,
    seq_paused: bool,
    reset_ack: bool,
    sig: ScsiSig,
    pre_atn_sig: ScsiSig,
    script: VecDeque<ScsiSig>,
    messages: Vec<u8>,
    bus_resets: u32,
    reads: BTreeMap<u16, u32>,
    clears: [u32; 8],
    gone: bool,
    faults: Faults,
}

impl SimBus {
    /// An idle adapter: interrupts enabled, sequencer running, empty
    /// queues and a free bus.
    #[must_use]
    pub fn new() -> Self {
        let mut scb = [0u8; SCB_BYTES];
        let next = usize::from(off::SCB_NEXT - SCB_WINDOW);
        scb[next..next + 2].copy_from_slice(&NULL_SLOT.to_le_bytes());
        let mut sim = Self {
            mem: [0; REG_SPACE],
            banked: [Banked::RESET; BANKS],
            bank: Bank::Scsi,
            scb_ram: vec![scb; MAX_SLOTS],
            done_ring: vec![NULL_SLOT; MAX_SLOTS],
            qout_head: 0,
            qout_tail: 0,
            intstat: HstIntStat::empty(),
            inten: true,
            pause_requested: false,
            seq_paused: false,
            reset_ack: false,
            sig: ScsiSig::empty(),
            pre_atn_sig: ScsiSig::empty(),
            script: VecDeque::new(),
            messages: Vec::new(),
            bus_resets: 0,
            reads: BTreeMap::new(),
            clears: [0; 8],
            gone: false,
            faults: Faults::default(),
        };
        for reg in [off::WAITING_SCB, off::ACTIVE_SCB, off::QEXE_HEAD] {
            sim.store16(reg, NULL_SLOT);
        }
        sim
    }

    // -- scenario setup -----------------------------------------------------

    /// Fault injection switches.
    pub fn faults(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Makes every read return all-ones, as after hot removal.
    pub fn set_gone(&mut self, gone: bool) {
        self.gone = gone;
    }

    /// Resizes the done queue ring and empties it.
    pub fn set_qout_depth(&mut self, depth: u16) {
        self.done_ring = vec![NULL_SLOT; usize::from(depth.max(1))];
        self.qout_head = 0;
        self.qout_tail = 0;
    }

    /// The chip posts `slot` to the done queue.
    pub fn post_completion(&mut self, slot: Slot) {
        let depth = self.done_ring.len();
        self.done_ring[usize::from(self.qout_head)] = slot;
        self.qout_head = ((usize::from(self.qout_head) + 1) % depth) as u16;
        self.intstat |= HstIntStat::CMDCMPLT;
    }

    /// The sequencer stops and posts `code`.
    pub fn raise_seqint(&mut self, code: u8) {
        self.mem[usize::from(off::SEQINTCODE)] = code;
        self.seq_paused = true;
        self.intstat |= HstIntStat::SEQINT;
    }

    /// Latches SCSI status 1 conditions.
    pub fn raise_scsi(&mut self, status: Sstat1) {
        self.mem[usize::from(off::SSTAT1)] |= status.bits();
        self.intstat |= HstIntStat::SCSIINT;
    }

    /// Latches SCSI status 0 conditions.
    pub fn raise_scsi0(&mut self, status: Sstat0) {
        self.mem[usize::from(off::SSTAT0)] |= status.bits();
        self.intstat |= HstIntStat::SCSIINT;
    }

    /// Latches packetized CRC conditions.
    pub fn raise_lqi(&mut self, status: Lqistat1) {
        self.mem[usize::from(off::LQISTAT1)] |= status.bits();
        self.intstat |= HstIntStat::SCSIINT;
    }

    /// Latches internal hardware errors.
    pub fn raise_hw_error(&mut self, error: HwError) {
        self.mem[usize::from(off::ERROR)] |= error.bits();
        self.intstat |= HstIntStat::HWERRINT;
    }

    /// Latches PCI and PCI-X status.
    pub fn raise_pci(&mut self, pci: PciStat, pcix: PcixStat) {
        self.mem[usize::from(off::PCISTAT)] |= pci.bits();
        self.mem[usize::from(off::PCIXSTAT)] |= pcix.bits();
        self.intstat |= HstIntStat::PCIINT;
    }

    /// Latches split completion status on one DMA channel.
    pub fn raise_split(&mut self, bank: Bank, status: SplitStat) {
        self.banked[bank as usize].split |= status.bits();
        self.intstat |= HstIntStat::SPLTINT;
    }

    /// Sets arbitrary interrupt status bits.
    pub fn raise_intstat(&mut self, status: HstIntStat) {
        self.intstat |= status;
    }

    /// Sets the channel reported in `SSTAT2`.
    pub fn set_sstat2(&mut self, value: u8) {
        self.mem[usize::from(off::SSTAT2)] = value;
    }

    /// Signals the bus shows from now on.
    pub fn set_signals(&mut self, sig: ScsiSig) {
        self.sig = sig;
        self.script.clear();
    }

    /// Signals returned by the next reads, one per read, before the steady
    /// state resumes.
    pub fn script_signals(&mut self, sigs: &[ScsiSig]) {
        self.script.extend(sigs.iter().copied());
    }

    /// Last phase recorded by the sequencer.
    pub fn set_lastphase(&mut self, sig: ScsiSig) {
        self.mem[usize::from(off::LASTPHASE)] = sig.bits();
    }

    /// The sequencer is selecting `slot`.
    pub fn set_waiting(&mut self, slot: Slot) {
        self.store16(off::WAITING_SCB, slot);
    }

    /// `slot` is connected on the bus.
    pub fn set_active(&mut self, slot: Slot) {
        self.store16(off::ACTIVE_SCB, slot);
    }

    /// Marks `target` busy.
    pub fn set_busy_target(&mut self, target: u8) {
        self.mem[usize::from(off::BUSY_TARGETS + u16::from(target))] = 1;
    }

    /// Points the SCB window of the current bank at `slot`.
    pub fn set_scbptr(&mut self, slot: Slot) {
        self.banked[self.bank as usize].scbptr = slot.to_le_bytes();
    }

    /// Chains `slots` into the execution queue, first to last.
    pub fn queue_for_execution(&mut self, slots: &[Slot]) {
        let mut next = NULL_SLOT;
        for &slot in slots.iter().rev() {
            self.set_scb_next(slot, next);
            next = slot;
        }
        self.store16(off::QEXE_HEAD, next);
    }

    /// Slots in the execution queue, head first.
    #[must_use]
    pub fn exe_queue(&self) -> Vec<Slot> {
        let mut out = Vec::new();
        let mut cur = self.load16(off::QEXE_HEAD);
        while cur != NULL_SLOT && out.len() < MAX_SLOTS {
            out.push(cur);
            cur = self.scb_next(cur);
        }
        out
    }

    /// The target disconnected holding `slot`.
    pub fn set_disconnected(&mut self, slot: Slot) {
        if let Some(scb) = self.scb_ram.get_mut(usize::from(slot)) {
            scb[0] |= ScbControl::DISCONNECTED.bits();
        }
    }

    /// Target id stored in the SCB of `slot`.
    pub fn set_scb_target(&mut self, slot: Slot, target: u8) {
        if let Some(scb) = self.scb_ram.get_mut(usize::from(slot)) {
            scb[usize::from(off::SCB_TARGET - SCB_WINDOW)] = target;
        }
    }

    /// Residual count and scatter/gather status of `slot`.
    pub fn set_residual(&mut self, slot: Slot, residual: u32, sg: SgStatus) {
        if let Some(scb) = self.scb_ram.get_mut(usize::from(slot)) {
            let at = usize::from(off::SCB_RESID - SCB_WINDOW);
            scb[at..at + 3].copy_from_slice(&residual.to_le_bytes()[..3]);
            scb[usize::from(off::SCB_SGSTATUS - SCB_WINDOW)] = sg.bits();
        }
    }

    /// Control byte of the SCB of `slot`.
    #[must_use]
    pub fn scb_control(&self, slot: Slot) -> ScbControl {
        self.scb_ram
            .get(usize::from(slot))
            .map_or(ScbControl::empty(), |scb| ScbControl::from_bits_retain(scb[0]))
    }

    // -- observation --------------------------------------------------------

    /// Message bytes the initiator sent, in order.
    #[must_use]
    pub fn messages(&self) -> &[u8] {
        &self.messages
    }

    /// Number of reads of `reg` since the last reset of the counters.
    #[must_use]
    pub fn reads_of(&self, reg: u16) -> u32 {
        self.reads.get(&reg).copied().unwrap_or(0)
    }

    /// Zeroes every read counter.
    pub fn reset_read_counts(&mut self) {
        self.reads.clear();
    }

    /// Number of `CLRHSTINT` writes that included `bit`.
    #[must_use]
    pub fn clears_of(&self, bit: HstIntStat) -> u32 {
        let index = bit.bits().trailing_zeros() as usize;
        self.clears.get(index).copied().unwrap_or(0)
    }

    /// Number of bus resets driven by the initiator.
    #[must_use]
    pub fn bus_resets(&self) -> u32 {
        self.bus_resets
    }

    /// Register byte without side effects or counting.
    #[must_use]
    pub fn peek(&self, reg: u16) -> u8 {
        self.mem.get(usize::from(reg)).copied().unwrap_or(0)
    }

    /// Little-endian register pair without side effects or counting.
    #[must_use]
    pub fn peek16(&self, reg: u16) -> u16 {
        self.load16(reg)
    }

    // -- internals ----------------------------------------------------------

    fn load16(&self, reg: u16) -> u16 {
        u16::from_le_bytes([self.peek(reg), self.peek(reg + 1)])
    }

    fn store16(&mut self, reg: u16, value: u16) {
        let at = usize::from(reg);
        self.mem[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn scb_next(&self, slot: Slot) -> Slot {
        let at = usize::from(off::SCB_NEXT - SCB_WINDOW);
        self.scb_ram
            .get(usize::from(slot))
            .map_or(NULL_SLOT, |scb| u16::from_le_bytes([scb[at], scb[at + 1]]))
    }

    fn set_scb_next(&mut self, slot: Slot, next: Slot) {
        let at = usize::from(off::SCB_NEXT - SCB_WINDOW);
        if let Some(scb) = self.scb_ram.get_mut(usize::from(slot)) {
            scb[at..at + 2].copy_from_slice(&next.to_le_bytes());
        }
    }

    fn scb_byte(&mut self, reg: u16) -> Option<&mut u8> {
        let slot = u16::from_le_bytes(self.banked[self.bank as usize].scbptr);
        self.scb_ram
            .get_mut(usize::from(slot))
            .map(|scb| &mut scb[usize::from(reg - SCB_WINDOW)])
    }

    fn hcntrl(&self) -> Hcntrl {
        let mut value = Hcntrl::empty();
        if (self.pause_requested || self.seq_paused) && !self.faults.pause_stuck {
            value |= Hcntrl::PAUSE;
        }
        if self.inten {
            value |= Hcntrl::INTEN;
        }
        if self.reset_ack {
            value |= Hcntrl::CHIPRST;
        }
        value
    }

    fn write_hcntrl(&mut self, value: Hcntrl) {
        if value.contains(Hcntrl::CHIPRST) {
            if !self.faults.chip_dead {
                self.chip_reset();
            }
            return;
        }
        self.reset_ack = false;
        self.inten = value.contains(Hcntrl::INTEN);
        self.pause_requested = value.contains(Hcntrl::PAUSE);
        if !self.pause_requested {
            self.seq_paused = false;
        }
    }

    fn chip_reset(&mut self) {
        self.faults.pause_stuck = false;
        self.faults.dma_stuck = false;
        self.intstat = HstIntStat::empty();
        self.mem[usize::from(off::ERROR)] = 0;
        self.inten = false;
        self.pause_requested = true;
        self.seq_paused = true;
        self.reset_ack = true;
    }

    /// Status bits that keep their summary interrupt asserted.
    fn latched_sources(&self) -> HstIntStat {
        let mut out = self.faults.stuck_intstat;
        let sstat0 = Sstat0::from_bits_retain(self.peek(off::SSTAT0));
        let sstat1 = Sstat1::from_bits_retain(self.peek(off::SSTAT1));
        let lqi = Lqistat1::from_bits_retain(self.peek(off::LQISTAT1));
        if sstat1.intersects(
            Sstat1::SELTIMO | Sstat1::SCSIRSTI | Sstat1::PHASEMIS | Sstat1::BUSFREE | Sstat1::SCSIPERR,
        ) || sstat0.intersects(Sstat0::IOERR | Sstat0::OVERRUN)
            || lqi.intersects(Lqistat1::CRC)
        {
            out |= HstIntStat::SCSIINT;
        }
        if self.peek(off::ERROR) != 0 {
            out |= HstIntStat::HWERRINT;
        }
        if self.peek(off::PCISTAT) | self.peek(off::PCIXSTAT) != 0 {
            out |= HstIntStat::PCIINT;
        }
        if self.banked.iter().any(|b| b.split != 0) {
            out |= HstIntStat::SPLTINT;
        }
        out
    }

    fn clear_intstat(&mut self, value: HstIntStat) {
        for (index, count) in self.clears.iter_mut().enumerate() {
            if value.bits() & (1 << index) != 0 {
                *count += 1;
            }
        }
        self.intstat -= value;
        self.intstat |= self.latched_sources();
    }

    fn write_sigo(&mut self, value: ScsiSig) {
        self.mem[usize::from(off::SCSISIGO)] = value.bits();
        if value.contains(ScsiSig::ATNI) && !self.faults.target_absent {
            self.pre_atn_sig = self.sig;
            self.script.clear();
            self.sig = Phase::MsgOut.signals() | ScsiSig::BSYI | ScsiSig::REQI;
        }
    }

    fn write_data(&mut self, byte: u8) {
        if self.sig.phase() != Phase::MsgOut || !self.sig.contains(ScsiSig::BSYI) {
            return;
        }
        self.messages.push(byte);
        if msg::ends_connection(byte) {
            self.sig = ScsiSig::empty();
            self.mem[usize::from(off::SSTAT1)] |= Sstat1::BUSFREE.bits();
        } else {
            self.sig = self.pre_atn_sig;
        }
    }

    fn write_scsiseq0(&mut self, value: ScsiSeq0) {
        self.mem[usize::from(off::SCSISEQ0)] = value.bits();
        if !value.contains(ScsiSeq0::SCSIRSTO) {
            return;
        }
        self.bus_resets += 1;
        if !self.faults.bus_stuck {
            self.sig = ScsiSig::empty();
            self.script.clear();
        }
        self.mem[usize::from(off::SSTAT1)] |= Sstat1::SCSIRSTI.bits();
        self.intstat |= HstIntStat::SCSIINT;
    }

    fn read_qout(&self, reg: u16) -> u8 {
        let value = match reg & !1 {
            off::QOUT_HEAD => self.qout_head,
            off::QOUT_TAIL => self.qout_tail,
            _ => self
                .done_ring
                .get(usize::from(self.qout_tail))
                .copied()
                .unwrap_or(NULL_SLOT),
        };
        value.to_le_bytes()[usize::from(reg & 1)]
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterInterface for SimBus {
    fn read8(&mut self, reg: u16) -> u8 {
        *self.reads.entry(reg).or_insert(0) += 1;
        if self.gone {
            return 0xFF;
        }
        match reg {
            off::HSTINTSTAT => self.intstat.bits(),
            off::HCNTRL => self.hcntrl().bits(),
            r if (off::QOUT_HEAD..off::QOUT_SCB + 2).contains(&r) => self.read_qout(r),
            off::DFCNTRL => self.banked[self.bank as usize].dfcntrl,
            off::DCHSPLTSTAT => self.banked[self.bank as usize].split,
            off::SCBPTR => self.banked[self.bank as usize].scbptr[0],
            r if r == off::SCBPTR + 1 => self.banked[self.bank as usize].scbptr[1],
            off::SCSISIGI => self.script.pop_front().unwrap_or(self.sig).bits(),
            r if r >= SCB_WINDOW && usize::from(r) < REG_SPACE => {
                self.scb_byte(r).map_or(0xFF, |b| *b)
            }
            r => self.peek(r),
        }
    }

    fn write8(&mut self, reg: u16, value: u8) {
        if self.gone {
            return;
        }
        match reg {
            off::CLRHSTINT => self.clear_intstat(HstIntStat::from_bits_retain(value)),
            off::HCNTRL => self.write_hcntrl(Hcntrl::from_bits_retain(value)),
            r if r & !1 == off::QOUT_TAIL => {
                let mut bytes = self.qout_tail.to_le_bytes();
                bytes[usize::from(reg & 1)] = value;
                self.qout_tail = u16::from_le_bytes(bytes);
            }
            off::DFCNTRL => {
                let channel = &mut self.banked[self.bank as usize];
                let mut next = Dfcntrl::from_bits_retain(value) - Dfcntrl::FIFOFLUSH;
                if self.faults.dma_stuck {
                    next |= Dfcntrl::from_bits_retain(channel.dfcntrl) & Dfcntrl::ACTIVE;
                }
                channel.dfcntrl = next.bits();
            }
            off::DCHSPLTSTAT => self.banked[self.bank as usize].split &= !value,
            off::SCBPTR => self.banked[self.bank as usize].scbptr[0] = value,
            r if r == off::SCBPTR + 1 => self.banked[self.bank as usize].scbptr[1] = value,
            off::SSTAT0
            | off::SSTAT1
            | off::LQISTAT1
            | off::ERROR
            | off::PCISTAT
            | off::PCIXSTAT => self.mem[usize::from(reg)] &= !value,
            off::SCSISIGO => self.write_sigo(ScsiSig::from_bits_retain(value)),
            off::SCSIDATL => self.write_data(value),
            off::SCSISEQ0 => self.write_scsiseq0(ScsiSeq0::from_bits_retain(value)),
            off::HSTINTSTAT | off::SEQINTCODE | off::SCSISIGI | off::SSTAT2 => {}
            r if r >= SCB_WINDOW && usize::from(r) < REG_SPACE => {
                if let Some(byte) = self.scb_byte(r) {
                    *byte = value;
                }
            }
            r => {
                if let Some(byte) = self.mem.get_mut(usize::from(r)) {
                    *byte = value;
                }
            }
        }
    }

    fn select_bank(&mut self, bank: Bank) {
        self.bank = bank;
    }

    fn get_bank(&mut self) -> Bank {
        self.bank
    }

    fn barrier(&mut self) {}
}

/// Upper layer that records everything in delivery order.
#[derive(Debug, Default)]
pub struct Recorder {
    /// Terminated requests.
    pub completions: Vec<Request>,
    /// Asynchronous events.
    pub events: Vec<AsyncEvent>,
}

impl CompletionSink for Recorder {
    fn on_complete(&mut self, request: Request) {
        self.completions.push(request);
    }
}

impl EventSink for Recorder {
    fn on_event(&mut self, event: AsyncEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_registers_are_write_one_to_clear() {
        let mut sim = SimBus::new();
        sim.raise_scsi(Sstat1::SELTIMO | Sstat1::BUSFREE);
        sim.write8(off::SSTAT1, Sstat1::SELTIMO.bits());
        assert_eq!(sim.read8(off::SSTAT1), Sstat1::BUSFREE.bits());
        // BUSFREE still latched keeps SCSIINT asserted.
        sim.write8(off::CLRHSTINT, HstIntStat::SCSIINT.bits());
        assert_eq!(sim.read8(off::HSTINTSTAT), HstIntStat::SCSIINT.bits());
        sim.write8(off::SSTAT1, 0xFF);
        sim.write8(off::CLRHSTINT, HstIntStat::SCSIINT.bits());
        assert_eq!(sim.read8(off::HSTINTSTAT), 0);
    }

    #[test]
    fn scb_window_follows_the_bank_pointer() {
        let mut sim = SimBus::new();
        sim.select_bank(Bank::Dff0);
        sim.set_scbptr(3);
        sim.write8(off::SCB_CONTROL, ScbControl::TAG_ENB.bits());
        sim.select_bank(Bank::Dff1);
        assert_eq!(sim.read8(off::SCB_CONTROL), 0xFF);
        sim.set_scbptr(3);
        assert_eq!(sim.read8(off::SCB_CONTROL), ScbControl::TAG_ENB.bits());
        assert_eq!(sim.scb_control(3), ScbControl::TAG_ENB);
    }

    #[test]
    fn message_out_handshake() {
        let mut sim = SimBus::new();
        sim.set_signals(Phase::MsgIn.signals() | ScsiSig::BSYI);
        sim.write8(off::SCSISIGO, ScsiSig::ATNI.bits());
        assert_eq!(ScsiSig::from_bits_retain(sim.read8(off::SCSISIGI)).phase(), Phase::MsgOut);
        sim.write8(off::SCSISIGO, 0);
        sim.write8(off::SCSIDATL, msg::NOP);
        assert_eq!(ScsiSig::from_bits_retain(sim.read8(off::SCSISIGI)).phase(), Phase::MsgIn);
        assert_eq!(sim.messages(), [msg::NOP]);
    }

    #[test]
    fn done_queue_window() {
        let mut sim = SimBus::new();
        sim.post_completion(0x0102);
        assert_eq!(sim.read8(off::QOUT_HEAD), 1);
        assert_eq!(sim.read8(off::QOUT_SCB), 0x02);
        assert_eq!(sim.read8(off::QOUT_SCB + 1), 0x01);
        sim.write8(off::QOUT_TAIL, 1);
        sim.write8(off::QOUT_TAIL + 1, 0);
        assert_eq!(sim.read8(off::QOUT_TAIL), 1);
    }
}
