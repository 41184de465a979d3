//! Scenario files and the replay engine.
//!
//! A scenario is a TOML file with an optional `[adapter]` table and a list
//! of `[[step]]` tables. Each step either changes the simulated hardware
//! (posts a completion, latches a status bit, injects a fault), drives the
//! core (an interrupt, an abort, a reset) or checks what the upper layer has
//! seen so far.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use bitflags::Flags;
use serde::Deserialize;
use u320_api::{Bank, Request, RequestFlags, Slot};
use u320_hba::regs::{HwError, PciStat, PcixStat, Phase, ScsiSig, SplitStat, Sstat0, Sstat1};
use u320_hba::sim::{Recorder, SimBus};
use u320_hba::{AdapterConfig, AdapterContext, ChipFeatures, InterruptClass, RequestId};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// A parsed scenario file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Adapter configuration.
    #[serde(default)]
    pub adapter: AdapterSection,
    /// Steps, in order.
    #[serde(rename = "step", default)]
    pub steps: Vec<Step>,
}

/// The `[adapter]` table.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterSection {
    /// Unit number used in log records.
    pub unit: u8,
    /// Usable hardware slots.
    pub slots: u16,
    /// Done queue depth.
    pub qout_depth: u16,
    /// Ceiling applied to every bounded wait.
    pub poll_ceiling: Option<u32>,
    /// Exception iterations tolerated per dispatch cycle.
    pub spurious_ceiling: Option<u32>,
    /// Chip feature names, as in `ChipFeatures`.
    pub features: Vec<String>,
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            unit: 0,
            slots: 64,
            qout_depth: 64,
            poll_ceiling: Some(1_000),
            spurious_ceiling: None,
            features: Vec::new(),
        }
    }
}

/// Bus phases a step can put on the simulated bus.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
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
}

impl From<PhaseName> for Phase {
    fn from(name: PhaseName) -> Self {
        match name {
            PhaseName::DataOut => Self::DataOut,
            PhaseName::DataIn => Self::DataIn,
            PhaseName::Command => Self::Command,
            PhaseName::Status => Self::Status,
            PhaseName::MsgOut => Self::MsgOut,
            PhaseName::MsgIn => Self::MsgIn,
        }
    }
}

/// Injectable faults.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultName {
    /// The sequencer ignores pause.
    PauseStuck,
    /// DMA ignores stop.
    DmaStuck,
    /// The bus stays driven through resets.
    BusStuck,
    /// Nobody answers ATN.
    TargetAbsent,
    /// The chip ignores reset.
    ChipDead,
}

/// What the upper layer should have seen after a step.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Expect {
    /// Total completions delivered so far.
    pub completed: Option<usize>,
    /// Requests still owned by the core.
    pub active: Option<usize>,
    /// Full recoveries so far.
    pub recoveries: Option<u32>,
    /// Whether the channel is failed.
    pub failed: Option<bool>,
    /// Host status of the most recent completion, by variant name.
    pub last_status: Option<String>,
}

/// One scenario step.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Hand a request to the core.
    Submit {
        /// Hardware slot.
        slot: Slot,
        /// Target id.
        target: u8,
        /// Logical unit.
        #[serde(default)]
        lun: u8,
        /// Tagged command.
        #[serde(default)]
        tagged: bool,
    },
    /// The chip posts `slot` to the done queue.
    Complete {
        /// Hardware slot.
        slot: Slot,
    },
    /// The sequencer posts an interrupt code.
    Seqint {
        /// Raw `SEQINTCODE` value.
        code: u8,
    },
    /// Latch SCSI status 1 bits.
    Scsi {
        /// Flag names.
        status: Vec<String>,
    },
    /// Latch SCSI status 0 bits.
    Scsi0 {
        /// Flag names.
        status: Vec<String>,
    },
    /// Latch hardware error bits.
    HwError {
        /// Flag names.
        error: Vec<String>,
    },
    /// Latch PCI and PCI-X status.
    Pci {
        /// PCI status flag names.
        #[serde(default)]
        pci: Vec<String>,
        /// PCI-X status flag names.
        #[serde(default)]
        pcix: Vec<String>,
    },
    /// Latch split completion status on a DMA channel (0, 1 or 2).
    Split {
        /// Channel index.
        channel: u8,
        /// Flag names.
        status: Vec<String>,
    },
    /// Put the bus into a phase, or release it.
    Bus {
        /// Phase; omitted means bus free.
        phase: Option<PhaseName>,
    },
    /// The sequencer is selecting `slot`.
    Waiting {
        /// Hardware slot.
        slot: Slot,
    },
    /// `slot` is connected.
    Active {
        /// Hardware slot.
        slot: Slot,
    },
    /// The target of `slot` disconnected.
    Disconnected {
        /// Hardware slot.
        slot: Slot,
    },
    /// Chain slots into the execution queue.
    Queue {
        /// Slots, head first.
        slots: Vec<Slot>,
    },
    /// Switch a fault on or off.
    Fault {
        /// Which fault.
        fault: FaultName,
        /// New state.
        #[serde(default = "default_on")]
        on: bool,
    },
    /// The adapter disappears from the bus.
    Remove,
    /// Take one interrupt: front end, then the deferred work.
    Interrupt,
    /// Abort the request last submitted in `slot`.
    Abort {
        /// Hardware slot.
        slot: Slot,
    },
    /// Abort every request for `target`.
    AbortTaskSet {
        /// Target id.
        target: u8,
    },
    /// Host-requested reset.
    Reset,
    /// Check what the upper layer has seen.
    Expect(Expect),
}

fn default_on() -> bool {
    true
}

impl Step {
    /// Short name used in error context.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Complete { .. } => "complete",
            Self::Seqint { .. } => "seqint",
            Self::Scsi { .. } => "scsi",
            Self::Scsi0 { .. } => "scsi0",
            Self::HwError { .. } => "hw_error",
            Self::Pci { .. } => "pci",
            Self::Split { .. } => "split",
            Self::Bus { .. } => "bus",
            Self::Waiting { .. } => "waiting",
            Self::Active { .. } => "active",
            Self::Disconnected { .. } => "disconnected",
            Self::Queue { .. } => "queue",
            Self::Fault { .. } => "fault",
            Self::Remove => "remove",
            Self::Interrupt => "interrupt",
            Self::Abort { .. } => "abort",
            Self::AbortTaskSet { .. } => "abort_task_set",
            Self::Reset => "reset",
            Self::Expect(_) => "expect",
        }
    }
}

impl Scenario {
    /// Reads and parses a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses scenario text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Combines flag names into a flag value.
fn flags<F: Flags>(names: &[String]) -> Result<F> {
    names.iter().try_fold(F::empty(), |acc, name| {
        F::from_name(name)
            .map(|flag| acc.union(flag))
            .with_context(|| format!("unknown flag `{name}`"))
    })
}

// ---------------------------------------------------------------------------
// Replay engine
// ---------------------------------------------------------------------------

/// A simulated adapter driven by scenario steps.
pub struct Replay {
    ctx: AdapterContext<SimBus, Recorder>,
    ids: HashMap<Slot, RequestId>,
    seen_completions: usize,
    seen_events: usize,
    verbose: bool,
    /// Failed expectations, in order.
    pub failures: Vec<String>,
}

impl Replay {
    /// Builds the adapter described by `section`.
    pub fn new(section: &AdapterSection, verbose: bool) -> Result<Self> {
        let features: ChipFeatures = flags(&section.features)?;
        let mut config = AdapterConfig::new(section.unit)
            .with_slots(section.slots)
            .with_qout_depth(section.qout_depth)
            .with_features(features);
        if let Some(ceiling) = section.poll_ceiling {
            config = config.with_poll_ceiling(ceiling);
        }
        if let Some(ceiling) = section.spurious_ceiling {
            config.spurious_ceiling = ceiling;
        }
        let mut sim = SimBus::new();
        sim.set_qout_depth(section.qout_depth);
        Ok(Self {
            ctx: AdapterContext::new(sim, Recorder::default(), config),
            ids: HashMap::new(),
            seen_completions: 0,
            seen_events: 0,
            verbose,
            failures: Vec::new(),
        })
    }

    /// Runs one step.
    pub fn step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Submit {
                slot,
                target,
                lun,
                tagged,
            } => {
                let flags = if *tagged {
                    RequestFlags::TAGGED
                } else {
                    RequestFlags::empty()
                };
                let id = self
                    .ctx
                    .activate(Request::new(*slot, *target, *lun, flags))
                    .with_context(|| format!("submitting slot {slot}"))?;
                self.ids.insert(*slot, id);
            }
            Step::Complete { slot } => self.ctx.regs_mut().post_completion(*slot),
            Step::Seqint { code } => self.ctx.regs_mut().raise_seqint(*code),
            Step::Scsi { status } => self.ctx.regs_mut().raise_scsi(flags::<Sstat1>(status)?),
            Step::Scsi0 { status } => self.ctx.regs_mut().raise_scsi0(flags::<Sstat0>(status)?),
            Step::HwError { error } => self.ctx.regs_mut().raise_hw_error(flags::<HwError>(error)?),
            Step::Pci { pci, pcix } => {
                let pci = flags::<PciStat>(pci)?;
                let pcix = flags::<PcixStat>(pcix)?;
                self.ctx.regs_mut().raise_pci(pci, pcix);
            }
            Step::Split { channel, status } => {
                let Some(&bank) = Bank::DMA_CHANNELS.get(usize::from(*channel)) else {
                    bail!("no DMA channel {channel}");
                };
                self.ctx.regs_mut().raise_split(bank, flags::<SplitStat>(status)?);
            }
            Step::Bus { phase } => {
                let sig = phase.map_or(ScsiSig::empty(), |p| {
                    Phase::from(p).signals() | ScsiSig::BSYI | ScsiSig::REQI
                });
                self.ctx.regs_mut().set_signals(sig);
            }
            Step::Waiting { slot } => self.ctx.regs_mut().set_waiting(*slot),
            Step::Active { slot } => self.ctx.regs_mut().set_active(*slot),
            Step::Disconnected { slot } => self.ctx.regs_mut().set_disconnected(*slot),
            Step::Queue { slots } => self.ctx.regs_mut().queue_for_execution(slots),
            Step::Fault { fault, on } => {
                let faults = self.ctx.regs_mut().faults();
                let switch = match fault {
                    FaultName::PauseStuck => &mut faults.pause_stuck,
                    FaultName::DmaStuck => &mut faults.dma_stuck,
                    FaultName::BusStuck => &mut faults.bus_stuck,
                    FaultName::TargetAbsent => &mut faults.target_absent,
                    FaultName::ChipDead => &mut faults.chip_dead,
                };
                *switch = *on;
            }
            Step::Remove => self.ctx.regs_mut().set_gone(true),
            Step::Interrupt => self.interrupt(),
            Step::Abort { slot } => {
                let id = *self
                    .ids
                    .get(slot)
                    .with_context(|| format!("nothing was submitted in slot {slot}"))?;
                let outcome = self.ctx.abort(id);
                println!("abort slot {slot}: {outcome:?}");
            }
            Step::AbortTaskSet { target } => {
                let touched = self.ctx.abort_task_set(*target);
                println!("abort task set of target {target}: {touched} requests");
            }
            Step::Reset => self.ctx.reset_hardware(),
            Step::Expect(expect) => self.check(expect),
        }
        self.report_new();
        Ok(())
    }

    fn interrupt(&mut self) {
        let class = self.ctx.front_end();
        if class == InterruptClass::Nothing {
            println!("interrupt: nothing pending");
            return;
        }
        let report = self.ctx.service();
        println!(
            "interrupt ({class:?}): {} completed, {} exceptions{}",
            report.completed,
            report.exceptions,
            report
                .recovered
                .map(|r| format!(", recovered from {r}"))
                .unwrap_or_default()
        );
    }

    fn check(&mut self, expect: &Expect) {
        let done = &self.ctx.upper().completions;
        let stats = *self.ctx.stats();
        let mut fail = |what: &str, want: String, got: String| {
            self.failures
                .push(format!("{what}: expected {want}, got {got}"));
        };
        if let Some(want) = expect.completed {
            if done.len() != want {
                fail("completed", want.to_string(), done.len().to_string());
            }
        }
        if let Some(want) = expect.active {
            let got = self.ctx.active_count();
            if got != want {
                fail("active", want.to_string(), got.to_string());
            }
        }
        if let Some(want) = expect.recoveries {
            if stats.recoveries != want {
                fail("recoveries", want.to_string(), stats.recoveries.to_string());
            }
        }
        if let Some(want) = expect.failed {
            let got = self.ctx.failed();
            if got != want {
                fail("failed", want.to_string(), got.to_string());
            }
        }
        if let Some(want) = &expect.last_status {
            let got = done
                .last()
                .map_or_else(|| "nothing".to_owned(), |r| format!("{:?}", r.host_status));
            if &got != want {
                fail("last_status", want.clone(), got);
            }
        }
    }

    fn report_new(&mut self) {
        let upper = self.ctx.upper();
        if self.verbose {
            for request in &upper.completions[self.seen_completions..] {
                println!(
                    "  completed slot {} target {}: {:?} {:?}",
                    request.slot,
                    request.target,
                    request.state(),
                    request.host_status
                );
            }
            for event in &upper.events[self.seen_events..] {
                println!("  event {event:?}");
            }
        }
        self.seen_completions = upper.completions.len();
        self.seen_events = upper.events.len();
    }

    /// Prints the final counters.
    pub fn summary(&self) {
        let stats = self.ctx.stats();
        println!(
            "{} completed, {} aborts, {} exceptions, {} recoveries, {} escalations, {} still active",
            self.ctx.upper().completions.len(),
            stats.aborts,
            stats.exceptions,
            stats.recoveries,
            stats.escalations,
            self.ctx.active_count()
        );
    }
}
