//! Consolidated adapter register map.
//!
//! One logical layout covers every supported chip revision; revision
//! differences are expressed through [`ChipFeatures`](crate::config::ChipFeatures)
//! instead of separate maps. Registers are 8 bits wide, 16-bit values are a
//! little-endian byte pair.

use bitflags::bitflags;
use u320_api::{Bank, RegisterInterface, Slot, register_block};

/// Register numbers.
pub mod off {
    /// Host interrupt status.
    pub const HSTINTSTAT: u16 = 0x01;
    /// Sequencer interrupt code.
    pub const SEQINTCODE: u16 = 0x02;
    /// Host interrupt clear.
    pub const CLRHSTINT: u16 = 0x03;
    /// Hardware error status (read) / clear (write).
    pub const ERROR: u16 = 0x04;
    /// Host control.
    pub const HCNTRL: u16 = 0x05;
    /// Done-queue producer index.
    pub const QOUT_HEAD: u16 = 0x06;
    /// Done-queue consumer index.
    pub const QOUT_TAIL: u16 = 0x08;
    /// Done-queue entry at the consumer index.
    pub const QOUT_SCB: u16 = 0x0A;
    /// Data channel control (banked, DMA banks).
    pub const DFCNTRL: u16 = 0x19;
    /// SCSI sequence control 0.
    pub const SCSISEQ0: u16 = 0x3A;
    /// SCSI transfer control 1.
    pub const SXFRCTL1: u16 = 0x3D;
    /// SCSI signals out.
    pub const SCSISIGO: u16 = 0x40;
    /// SCSI signals in.
    pub const SCSISIGI: u16 = 0x41;
    /// SCSI data latch.
    pub const SCSIDATL: u16 = 0x44;
    /// SCSI status 0 (read) / clear (write).
    pub const SSTAT0: u16 = 0x4B;
    /// SCSI status 1 (read) / clear (write).
    pub const SSTAT1: u16 = 0x4C;
    /// SCSI status 2.
    pub const SSTAT2: u16 = 0x4D;
    /// Packetized input status 1 (read) / clear (write).
    pub const LQISTAT1: u16 = 0x51;
    /// PCI status mirror (config bank).
    pub const PCISTAT: u16 = 0x84;
    /// PCI-X status mirror (config bank).
    pub const PCIXSTAT: u16 = 0x85;
    /// Split completion status (banked, DMA banks).
    pub const DCHSPLTSTAT: u16 = 0x96;
    /// SCB window pointer (banked).
    pub const SCBPTR: u16 = 0xA8;
    /// Sequencer program counter.
    pub const PRGMCNT: u16 = 0xDE;
    /// Scratch: SCB being selected.
    pub const WAITING_SCB: u16 = 0x120;
    /// Scratch: SCB connected on the bus.
    pub const ACTIVE_SCB: u16 = 0x122;
    /// Scratch: head of the execution queue.
    pub const QEXE_HEAD: u16 = 0x124;
    /// Scratch: last bus phase seen by the sequencer.
    pub const LASTPHASE: u16 = 0x126;
    /// Scratch: per-target busy markers, one byte per target.
    pub const BUSY_TARGETS: u16 = 0x130;
    /// SCB window: control byte.
    pub const SCB_CONTROL: u16 = 0x1C0;
    /// SCB window: next SCB in the execution queue.
    pub const SCB_NEXT: u16 = 0x1C2;
    /// SCB window: target id.
    pub const SCB_TARGET: u16 = 0x1C4;
    /// SCB window: 24-bit residual count.
    pub const SCB_RESID: u16 = 0x1C5;
    /// SCB window: scatter/gather status.
    pub const SCB_SGSTATUS: u16 = 0x1C8;
}

// ---------------------------------------------------------------------------
// Register blocks
// ---------------------------------------------------------------------------

register_block! {
    /// Host interface registers, visible in every bank.
    pub HostRegs {
        /// Host interrupt status.
        [off::HSTINTSTAT; u8; ro] hstintstat => HstIntStat,
        /// Sequencer interrupt code, valid while `SEQINT` is set.
        [off::SEQINTCODE; u8; ro] seqintcode,
        /// Host interrupt clear.
        [off::CLRHSTINT; u8; wo] clrhstint => HstIntStat,
        /// Internal hardware error latch.
        [off::ERROR; u8; ro] error => HwError,
        /// Hardware error clear.
        [off::ERROR; u8; wo] clrerr => HwError,
        /// Host control.
        [off::HCNTRL; u8; rw] hcntrl => Hcntrl,
        /// Done-queue producer index, advanced by the chip.
        [off::QOUT_HEAD; u16; ro] qout_head,
        /// Done-queue consumer index, advanced by software.
        [off::QOUT_TAIL; u16; rw] qout_tail,
        /// Slot posted at the consumer index.
        [off::QOUT_SCB; u16; ro] qout_scb,
        /// Sequencer program counter.
        [off::PRGMCNT; u16; rw] prgmcnt,
    }
}

register_block! {
    /// Sequencer scratch locations shared with the host.
    pub SeqRegs {
        /// SCB the sequencer is selecting, `NULL_SLOT` if none.
        [off::WAITING_SCB; u16; rw] waiting_scb,
        /// SCB connected on the bus, `NULL_SLOT` if none.
        [off::ACTIVE_SCB; u16; rw] active_scb,
        /// First SCB of the execution queue, `NULL_SLOT` if empty.
        [off::QEXE_HEAD; u16; rw] qexe_head,
        /// Last phase the sequencer observed.
        [off::LASTPHASE; u8; rw] lastphase => ScsiSig,
    }
}

register_block! {
    /// SCB window; the slot shown is selected by `SCBPTR` of the current bank.
    pub ScbRegs {
        /// Window pointer.
        [off::SCBPTR; u16; rw] scbptr,
        /// Control byte.
        [off::SCB_CONTROL; u8; rw] scb_control => ScbControl,
        /// Next SCB in the execution queue.
        [off::SCB_NEXT; u16; rw] scb_next,
        /// Target id.
        [off::SCB_TARGET; u8; ro] scb_target,
        /// Residual count, low 16 bits.
        [off::SCB_RESID; u16; ro] scb_resid_lo,
        /// Residual count, high 8 bits.
        [off::SCB_RESID + 2; u8; ro] scb_resid_hi,
        /// Scatter/gather status.
        [off::SCB_SGSTATUS; u8; ro] scb_sgstatus => SgStatus,
    }
}

register_block! {
    /// Per-channel DMA registers (data FIFO and command channel banks).
    pub DmaRegs {
        /// Channel control; reading returns the acknowledged state.
        [off::DFCNTRL; u8; rw] dfcntrl => Dfcntrl,
        /// Split completion status, write one to clear.
        [off::DCHSPLTSTAT; u8; rw] dchspltstat => SplitStat,
    }
}

register_block! {
    /// SCSI bus control and status (SCSI bank).
    pub ScsiRegs {
        /// Sequence control 0.
        [off::SCSISEQ0; u8; rw] scsiseq0 => ScsiSeq0,
        /// Transfer control 1.
        [off::SXFRCTL1; u8; rw] sxfrctl1 => Sxfrctl1,
        /// Signals driven by the initiator.
        [off::SCSISIGO; u8; rw] scsisigo => ScsiSig,
        /// Signals sampled on the bus.
        [off::SCSISIGI; u8; ro] scsisigi => ScsiSig,
        /// Data latch for manual (PIO) transfers.
        [off::SCSIDATL; u8; rw] scsidatl,
        /// Status 0.
        [off::SSTAT0; u8; ro] sstat0 => Sstat0,
        /// Status 0 clear.
        [off::SSTAT0; u8; wo] clrsint0 => Sstat0,
        /// Status 1.
        [off::SSTAT1; u8; ro] sstat1 => Sstat1,
        /// Status 1 clear.
        [off::SSTAT1; u8; wo] clrsint1 => Sstat1,
        /// Status 2; bits 7:6 name the channel active at bus free.
        [off::SSTAT2; u8; ro] sstat2,
        /// Packetized input status 1.
        [off::LQISTAT1; u8; ro] lqistat1 => Lqistat1,
        /// Packetized input status 1 clear.
        [off::LQISTAT1; u8; wo] clrlqiint1 => Lqistat1,
    }
}

register_block! {
    /// Configuration space status mirror (config bank).
    pub CfgRegs {
        /// PCI status, write one to clear.
        [off::PCISTAT; u8; rw] pcistat => PciStat,
        /// PCI-X status, write one to clear.
        [off::PCIXSTAT; u8; rw] pcixstat => PcixStat,
    }
}

// ---------------------------------------------------------------------------
// Bitflags
// ---------------------------------------------------------------------------

bitflags! {
    /// Host interrupt status (`HSTINTSTAT`) and clear (`CLRHSTINT`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HstIntStat: u8 {
        /// Internal hardware error.
        const HWERRINT = 1 << 7;
        /// Sequencer breakpoint.
        const BRKADRINT = 1 << 6;
        /// Software timer expired.
        const SWTMINT = 1 << 5;
        /// PCI error.
        const PCIINT = 1 << 4;
        /// SCSI bus exception.
        const SCSIINT = 1 << 3;
        /// Sequencer interrupt; `SEQINTCODE` says why.
        const SEQINT = 1 << 2;
        /// Command complete.
        const CMDCMPLT = 1 << 1;
        /// PCI-X split completion error.
        const SPLTINT = 1 << 0;
    }
}

impl HstIntStat {
    /// Every class that needs the exception back end.
    pub const EXCEPTIONS: Self = Self::CMDCMPLT.complement();
}

bitflags! {
    /// Internal hardware error latch (`ERROR` / `CLRERR`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HwError: u8 {
        /// CIO bus parity error.
        const CIOPARERR = 1 << 7;
        /// Scratch/SCB RAM parity error.
        const MPARERR = 1 << 5;
        /// Data path parity error.
        const DPARERR = 1 << 4;
        /// Sequencer RAM parity error.
        const SQPARERR = 1 << 3;
        /// Sequencer fetched an illegal opcode.
        const ILLOPCODE = 1 << 2;
        /// PCI-X discard timer expired.
        const DSCTMOUT = 1 << 1;
    }
}

impl HwError {
    /// Parity/ECC faults with no in-place recovery.
    pub const PARITY_CLASS: Self = Self::CIOPARERR
        .union(Self::MPARERR)
        .union(Self::DPARERR)
        .union(Self::SQPARERR);
}

bitflags! {
    /// Host control (`HCNTRL`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hcntrl: u8 {
        /// Power down.
        const POWRDN = 1 << 6;
        /// Raise a software interrupt.
        const SWINT = 1 << 4;
        /// Write: pause request. Read: pause acknowledged.
        const PAUSE = 1 << 2;
        /// Interrupt enable.
        const INTEN = 1 << 1;
        /// Write: chip reset. Read: reset complete.
        const CHIPRST = 1 << 0;
    }
}

bitflags! {
    /// SCB control byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScbControl: u8 {
        /// Disconnects are allowed.
        const DISCENB = 1 << 6;
        /// Tagged command.
        const TAG_ENB = 1 << 5;
        /// The target disconnected with this SCB.
        const DISCONNECTED = 1 << 2;
        /// Abort on next selection or reselection.
        const ABORT = 1 << 0;
    }
}

bitflags! {
    /// Scatter/gather status of an SCB.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SgStatus: u8 {
        /// The target asked for more data than the list describes.
        const OVERRUN = 1 << 2;
        /// Nothing was transferred; the residual is the full length.
        const FULL_RESID = 1 << 1;
        /// The list is exhausted.
        const LIST_NULL = 1 << 0;
    }
}

bitflags! {
    /// Data channel control (`DFCNTRL`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dfcntrl: u8 {
        /// SCSI side of the FIFO enabled.
        const SCSIEN = 1 << 5;
        /// Host DMA enabled.
        const HDMAEN = 1 << 3;
        /// Flush the FIFO.
        const FIFOFLUSH = 1 << 1;
    }
}

impl Dfcntrl {
    /// Bits that must read back clear before the channel is idle.
    pub const ACTIVE: Self = Self::SCSIEN.union(Self::HDMAEN);
}

bitflags! {
    /// Split completion status of one DMA channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SplitStat: u8 {
        /// Split completion error message received.
        const RXSCEMSG = 1 << 7;
        /// Split completion overrun.
        const RXOVRUN = 1 << 6;
        /// Split completion address error.
        const SCADERR = 1 << 5;
        /// Split completion data sent to the bit bucket.
        const SCDATBUCKET = 1 << 4;
        /// Byte count not complete.
        const CNTNOTCMPLT = 1 << 3;
        /// Split response received.
        const RXSPLTRSP = 1 << 1;
    }
}

impl SplitStat {
    /// Conditions that corrupt the transfer of the owning request.
    pub const FATAL: Self = Self::RXSCEMSG
        .union(Self::RXOVRUN)
        .union(Self::SCADERR)
        .union(Self::SCDATBUCKET);
}

bitflags! {
    /// SCSI sequence control 0 (`SCSISEQ0`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScsiSeq0: u8 {
        /// Selection out enabled.
        const ENSELO = 1 << 6;
        /// Drive SCSI bus reset.
        const SCSIRSTO = 1 << 0;
    }
}

bitflags! {
    /// SCSI transfer control 1 (`SXFRCTL1`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sxfrctl1: u8 {
        /// Discard incoming data.
        const BITBUCKET = 1 << 7;
        /// SCSI parity checking enabled.
        const ENSPCHK = 1 << 5;
    }
}

bitflags! {
    /// SCSI bus signals (`SCSISIGO` / `SCSISIGI` / `LASTPHASE`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScsiSig: u8 {
        /// Command/data.
        const CDI = 1 << 7;
        /// Input/output.
        const IOI = 1 << 6;
        /// Message.
        const MSGI = 1 << 5;
        /// Attention.
        const ATNI = 1 << 4;
        /// Select.
        const SELI = 1 << 3;
        /// Busy.
        const BSYI = 1 << 2;
        /// Request.
        const REQI = 1 << 1;
        /// Acknowledge.
        const ACKI = 1 << 0;
    }
}

impl ScsiSig {
    /// Signals that encode the bus phase.
    pub const PHASE_MASK: Self = Self::CDI.union(Self::IOI).union(Self::MSGI);

    /// Decodes the information-transfer phase.
    #[must_use]
    pub fn phase(self) -> Phase {
        Phase::from_bits((self & Self::PHASE_MASK).bits())
    }

    /// Returns `true` while a target holds the bus in a data phase.
    #[must_use]
    pub fn in_data_phase(self) -> bool {
        self.contains(Self::BSYI) && self.phase().is_data()
    }
}

/// SCSI information-transfer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Data out.
    DataOut,
    /// Data in.
    DataIn,
    /// Command.
    Command,
    /// Status.
    Status,
    /// Message out.
    MsgOut,
    /// Message in.
    MsgIn,
    /// Reserved encoding.
    Illegal,
}

impl Phase {
    const fn from_bits(bits: u8) -> Self {
        const CD: u8 = ScsiSig::CDI.bits();
        const IO: u8 = ScsiSig::IOI.bits();
        const MSG: u8 = ScsiSig::MSGI.bits();
        match bits {
            0 => Self::DataOut,
            IO => Self::DataIn,
            CD => Self::Command,
            x if x == CD | IO => Self::Status,
            x if x == CD | MSG => Self::MsgOut,
            x if x == CD | IO | MSG => Self::MsgIn,
            _ => Self::Illegal,
        }
    }

    /// Signal encoding of the phase.
    #[must_use]
    pub const fn signals(self) -> ScsiSig {
        match self {
            Self::DataOut => ScsiSig::empty(),
            Self::DataIn => ScsiSig::IOI,
            Self::Command => ScsiSig::CDI,
            Self::Status => ScsiSig::CDI.union(ScsiSig::IOI),
            Self::MsgOut => ScsiSig::CDI.union(ScsiSig::MSGI),
            Self::MsgIn => ScsiSig::CDI.union(ScsiSig::IOI).union(ScsiSig::MSGI),
            Self::Illegal => ScsiSig::MSGI,
        }
    }

    /// Returns `true` for data-in and data-out.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::DataOut | Self::DataIn)
    }
}

bitflags! {
    /// SCSI status 0 (`SSTAT0` / `CLRSINT0`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sstat0: u8 {
        /// Selection out done.
        const SELDO = 1 << 6;
        /// Selected as a target.
        const SELDI = 1 << 5;
        /// Selection in progress.
        const SELINGO = 1 << 4;
        /// Transceiver mode changed.
        const IOERR = 1 << 3;
        /// SCSI offset overrun.
        const OVERRUN = 1 << 2;
    }
}

bitflags! {
    /// SCSI status 1 (`SSTAT1` / `CLRSINT1`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sstat1: u8 {
        /// Selection timeout.
        const SELTIMO = 1 << 7;
        /// Read: ATN asserted by target. Write: deassert ATN.
        const ATNTARG = 1 << 6;
        /// SCSI reset detected.
        const SCSIRSTI = 1 << 5;
        /// Phase mismatch.
        const PHASEMIS = 1 << 4;
        /// Bus free.
        const BUSFREE = 1 << 3;
        /// SCSI parity error.
        const SCSIPERR = 1 << 2;
        /// REQ/ACK too fast.
        const STRB2FAST = 1 << 1;
        /// REQ asserted.
        const REQINIT = 1 << 0;
    }
}

bitflags! {
    /// Packetized input status 1 (`LQISTAT1` / `CLRLQIINT1`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lqistat1: u8 {
        /// Phase error in an LQ packet.
        const LQIPHASE_LQ = 1 << 7;
        /// Phase error in a non-LQ packet.
        const LQIPHASE_NLQ = 1 << 6;
        /// CRC error in an LQ packet.
        const LQICRCI_LQ = 1 << 4;
        /// CRC error in a non-LQ packet.
        const LQICRCI_NLQ = 1 << 3;
    }
}

impl Lqistat1 {
    /// CRC error bits.
    pub const CRC: Self = Self::LQICRCI_LQ.union(Self::LQICRCI_NLQ);
}

bitflags! {
    /// PCI status mirror (`PCISTAT`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PciStat: u8 {
        /// Detected parity error.
        const DPE = 1 << 7;
        /// Signaled system error.
        const SSE = 1 << 6;
        /// Received master abort.
        const RMA = 1 << 5;
        /// Received target abort.
        const RTA = 1 << 4;
        /// Signaled target abort.
        const STA = 1 << 3;
        /// Data parity error reported.
        const DPR = 1 << 0;
    }
}

impl PciStat {
    /// Conditions after which in-flight DMA cannot be trusted.
    pub const FATAL: Self = Self::DPE.union(Self::SSE).union(Self::RMA).union(Self::RTA);
}

bitflags! {
    /// PCI-X status mirror (`PCIXSTAT`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PcixStat: u8 {
        /// Received split completion error message.
        const RSCEM = 1 << 5;
        /// Unexpected split completion.
        const UNEXPSC = 1 << 3;
        /// Split completion discarded.
        const SCDISCARD = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Decoded values
// ---------------------------------------------------------------------------

/// Channel that owned the bus when it went free, from `SSTAT2` bits 7:6.
#[must_use]
pub const fn bus_free_channel(sstat2: u8) -> Option<Bank> {
    match sstat2 >> 6 {
        0b11 => Some(Bank::Dff1),
        0b10 => Some(Bank::Dff0),
        0b01 => Some(Bank::CmdChannel),
        _ => None,
    }
}

/// Sequencer interrupt codes (`SEQINTCODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SeqIntCode {
    /// A target needs transfer negotiation.
    SyncNegoNeeded = 0x00,
    /// The CDB could not be transferred.
    CdbXferProblem = 0x01,
    /// The sequencer wants the host to drive message-out.
    HandleMsgOut = 0x02,
    /// The target asked for more data than described.
    DataOverrun = 0x03,
    /// An unsupported message arrived.
    UnknownMsg = 0x04,
    /// The target returned check condition.
    CheckCondition = 0x05,
    /// An unexpected phase was entered.
    PhaseError = 0x06,
    /// An extended message arrived.
    ExtendedMsg = 0x07,
    /// An SCB marked for abort reached the bus.
    AbortTarget = 0x08,
    /// Reselection without an identify message.
    NoIdentify = 0x09,
    /// Idle loop breakpoint.
    IdleLoopBreak = 0x0A,
    /// Expander breakpoint.
    ExpanderBreak = 0x0B,
    /// Domain validation timeout.
    DvTimeout = 0x0F,
    /// Overrun detected after the target went bus free.
    DataOverrunBusFree = 0x10,
    /// Special function request.
    SpecialFunction = 0x11,
    /// The sequencer detected a hardware error.
    HwErrDetected = 0x12,
}

impl SeqIntCode {
    /// Decodes a raw code.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x00 => Self::SyncNegoNeeded,
            0x01 => Self::CdbXferProblem,
            0x02 => Self::HandleMsgOut,
            0x03 => Self::DataOverrun,
            0x04 => Self::UnknownMsg,
            0x05 => Self::CheckCondition,
            0x06 => Self::PhaseError,
            0x07 => Self::ExtendedMsg,
            0x08 => Self::AbortTarget,
            0x09 => Self::NoIdentify,
            0x0A => Self::IdleLoopBreak,
            0x0B => Self::ExpanderBreak,
            0x0F => Self::DvTimeout,
            0x10 => Self::DataOverrunBusFree,
            0x11 => Self::SpecialFunction,
            0x12 => Self::HwErrDetected,
            _ => return None,
        })
    }
}

/// SCSI message bytes sent by the exception handlers.
pub mod msg {
    /// Initiator detected error.
    pub const INITIATOR_DETECTED_ERROR: u8 = 0x05;
    /// Abort task set.
    pub const ABORT_TASK_SET: u8 = 0x06;
    /// Message reject.
    pub const MESSAGE_REJECT: u8 = 0x07;
    /// No operation.
    pub const NOP: u8 = 0x08;
    /// Message parity error.
    pub const MESSAGE_PARITY_ERROR: u8 = 0x09;
    /// Abort task.
    pub const ABORT_TASK: u8 = 0x0D;

    /// Returns `true` if the target answers `msg` by going bus free.
    #[must_use]
    pub const fn ends_connection(msg: u8) -> bool {
        matches!(msg, ABORT_TASK_SET | ABORT_TASK)
    }
}

/// Splits a slot read from a scratch register into a live slot number.
#[must_use]
pub const fn slot_or_none(raw: Slot) -> Option<Slot> {
    if raw == u320_api::NULL_SLOT { None } else { Some(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_decoding() {
        assert_eq!(ScsiSig::empty().phase(), Phase::DataOut);
        assert_eq!((ScsiSig::IOI | ScsiSig::REQI).phase(), Phase::DataIn);
        assert_eq!((ScsiSig::CDI | ScsiSig::MSGI | ScsiSig::BSYI).phase(), Phase::MsgOut);
        assert_eq!(
            (ScsiSig::CDI | ScsiSig::IOI | ScsiSig::MSGI).phase(),
            Phase::MsgIn
        );
        assert_eq!(ScsiSig::MSGI.phase(), Phase::Illegal);
        assert!(!ScsiSig::empty().in_data_phase());
        assert!((ScsiSig::IOI | ScsiSig::BSYI).in_data_phase());
        for phase in [Phase::DataIn, Phase::Status, Phase::MsgOut, Phase::Command] {
            assert_eq!(phase.signals().phase(), phase);
        }
    }

    #[test]
    fn exception_mask_excludes_completion() {
        assert!(!HstIntStat::EXCEPTIONS.contains(HstIntStat::CMDCMPLT));
        assert!(HstIntStat::EXCEPTIONS.contains(HstIntStat::HWERRINT | HstIntStat::SPLTINT));
    }

    #[test]
    fn bus_free_channel_decoding() {
        assert_eq!(bus_free_channel(0xC0), Some(Bank::Dff1));
        assert_eq!(bus_free_channel(0x80), Some(Bank::Dff0));
        assert_eq!(bus_free_channel(0x40), Some(Bank::CmdChannel));
        assert_eq!(bus_free_channel(0x3F), None);
    }

    #[test]
    fn seqint_codes() {
        assert_eq!(SeqIntCode::from_raw(0x08), Some(SeqIntCode::AbortTarget));
        assert_eq!(SeqIntCode::from_raw(0x12), Some(SeqIntCode::HwErrDetected));
        assert_eq!(SeqIntCode::from_raw(0x0C), None);
        assert!(msg::ends_connection(msg::ABORT_TASK));
        assert!(!msg::ends_connection(msg::INITIATOR_DETECTED_ERROR));
    }
}
