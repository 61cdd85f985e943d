//! Tick-driven bring-up and measurement script.
//!
//! The sequencer issues one [`TransferRequest`] per step to a bus master and
//! advances only when the master reports the transfer as finished. It never
//! drives the bus itself: each tick it is told whether the master is ready and
//! which transfer, if any, finished on the previous tick.

use bitbang_i2c::{BusError, RegisterAddress, TransferRequest, TransferResult};
use device_descriptor::Register;

use crate::{
    ll::{
        Age, Config, DesignCap, FStat, FullCapRep, HibCfg, ModelCfg, RepCap, RepSOC, SoftWakeup,
        Status, Temp, DEVICE_ADDR,
    },
    Telemetry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerError {
    Bus(BusError),
    /// FStat.DNR did not clear within the poll limit.
    DataNotReadyStall,
    /// ModelCfg.Refresh did not clear within the poll limit.
    ConfigRefreshStall,
    /// Status.POR was still set after the configured number of bring-up passes.
    PowerOnResetLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequencerConfig {
    /// Design capacity in mAh (with a 10 mΩ sense resistor). Doubled into
    /// register units before it is written.
    pub nominal_capacity: u16,
    /// Repeat the measurement pass forever instead of once per start pulse.
    pub continuous: bool,
    /// Ticks to wait between clearing Status.POR and reading it back.
    pub settle_ticks: u32,
    /// Reads of FStat or ModelCfg before giving up. `None` polls forever.
    pub poll_limit: Option<u16>,
    /// Bring-up passes repeated because Status.POR stayed set. `None` retries
    /// forever.
    pub por_retry_limit: Option<u8>,
}

impl SequencerConfig {
    /// About 1 ms at the default 400 kHz tick.
    pub const DEFAULT_SETTLE_TICKS: u32 = 400;

    pub const fn new(nominal_capacity: u16, continuous: bool) -> Self {
        Self {
            nominal_capacity,
            continuous,
            settle_ticks: Self::DEFAULT_SETTLE_TICKS,
            poll_limit: None,
            por_retry_limit: None,
        }
    }
}

/// Packs a nominal capacity into the DesignCap register.
///
/// ```rust
/// # use max17055::sequencer::design_capacity;
/// # use device_descriptor::Register;
/// assert_eq!(design_capacity(0x0D16).to_le_bytes(), [0x2C, 0x1A]);
/// ```
pub fn design_capacity(nominal_capacity: u16) -> DesignCap {
    DesignCap::default().capacity().write(nominal_capacity << 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Measurement {
    FullCapRep,
    RepSoc,
    RepCap,
    Age,
    Temp,
}

impl Measurement {
    fn next(self) -> Option<Self> {
        match self {
            Measurement::FullCapRep => Some(Measurement::RepSoc),
            Measurement::RepSoc => Some(Measurement::RepCap),
            Measurement::RepCap => Some(Measurement::Age),
            Measurement::Age => Some(Measurement::Temp),
            Measurement::Temp => None,
        }
    }

    fn request(self) -> TransferRequest {
        match self {
            Measurement::FullCapRep => read::<FullCapRep>(),
            Measurement::RepSoc => read::<RepSOC>(),
            Measurement::RepCap => read::<RepCap>(),
            Measurement::Age => read::<Age>(),
            Measurement::Temp => read::<Temp>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Waiting for a start pulse.
    AwaitStart,
    ReadStatus,
    PollFStat { polls: u16 },
    ReadHibCfg,
    Wake,
    ClearWake,
    ReadConfig,
    WriteDesignCap,
    WriteConfig,
    WriteModelCfg,
    PollModelCfg { polls: u16 },
    RestoreHibCfg,
    ClearPor,
    Settle { remaining: u32 },
    VerifyStatus,
    Measure(Measurement),
    /// Left only by the next start pulse.
    Faulted(SequencerError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SequencerInput<'a> {
    pub start: bool,
    /// The bus master can accept a request this tick.
    pub bus_ready: bool,
    /// Transfer finished on the previous tick.
    pub completion: Option<&'a TransferResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequencerOutput {
    pub request: Option<TransferRequest>,
    /// One-tick pulse after a measurement pass was published.
    pub measurement_done: bool,
    /// One-tick pulse when the sequencer faults.
    pub error: Option<SequencerError>,
}

pub struct Sequencer {
    config: SequencerConfig,
    step: Step,
    pending: bool,
    por_retries: u8,
    status: Status,
    hib_cfg: HibCfg,
    gauge_config: Config,
    staged: Telemetry,
    telemetry: Telemetry,
}

impl Sequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self {
            config,
            step: Step::AwaitStart,
            pending: false,
            por_retries: 0,
            status: Status::default(),
            hib_cfg: HibCfg::default(),
            gauge_config: Config::default(),
            staged: Telemetry::default(),
            telemetry: Telemetry::default(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// The last completely read measurement pass.
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    /// The request issued on this tick was not accepted by the bus master.
    /// It is issued again once the master is ready.
    pub fn retract(&mut self) {
        self.pending = false;
    }

    pub fn tick(&mut self, input: SequencerInput<'_>) -> SequencerOutput {
        let mut output = SequencerOutput::default();

        if input.start && matches!(self.step, Step::AwaitStart | Step::Faulted(_)) {
            info!("Fuel gauge sequence started");
            self.step = Step::ReadStatus;
            self.pending = false;
            self.por_retries = 0;
        }

        match self.step {
            Step::AwaitStart | Step::Faulted(_) => return output,
            Step::Settle { remaining } => {
                self.step = match remaining.checked_sub(1) {
                    Some(remaining) => Step::Settle { remaining },
                    None => Step::VerifyStatus,
                };
                return output;
            }
            _ => {}
        }

        if self.pending {
            let Some(result) = input.completion else {
                return output;
            };
            self.pending = false;

            if let Some(error) = result.outcome.error() {
                warn!("Bus error in {:?}: {:?}", self.step, error);
                self.fault(SequencerError::Bus(error), &mut output);
                return output;
            }

            let word = result.word().unwrap_or(0);
            if let Err(error) = self.advance(word, &mut output) {
                self.fault(error, &mut output);
                return output;
            }
        }

        if !self.pending && input.bus_ready {
            if let Some(request) = self.request() {
                trace!("Issuing {:?}", self.step);
                self.pending = true;
                output.request = Some(request);
            }
        }

        output
    }

    fn fault(&mut self, error: SequencerError, output: &mut SequencerOutput) {
        warn!("Fuel gauge sequence stopped: {:?}", error);
        self.step = Step::Faulted(error);
        output.error = Some(error);
    }

    /// Request for the current step, if it talks to the device.
    fn request(&self) -> Option<TransferRequest> {
        let request = match self.step {
            Step::AwaitStart | Step::Settle { .. } | Step::Faulted(_) => return None,

            Step::ReadStatus | Step::VerifyStatus => read::<Status>(),
            Step::PollFStat { .. } => read::<FStat>(),
            Step::ReadHibCfg => read::<HibCfg>(),
            Step::Wake => write(SoftWakeup::default().command().write(SoftWakeup::WAKE)),
            Step::ClearWake => write(SoftWakeup::default().command().write(SoftWakeup::CLEAR)),
            Step::ReadConfig => read::<Config>(),
            Step::WriteDesignCap => write(design_capacity(self.config.nominal_capacity)),
            Step::WriteConfig => write(self.gauge_config.ten().set(true)),
            Step::WriteModelCfg => write(ModelCfg::default().refresh().set(true)),
            Step::PollModelCfg { .. } => read::<ModelCfg>(),
            Step::RestoreHibCfg => write(self.hib_cfg),
            Step::ClearPor => write(self.status.por().set(false)),
            Step::Measure(measurement) => measurement.request(),
        };

        Some(request)
    }

    /// Moves past a step whose transfer completed with `word` read back.
    fn advance(&mut self, word: u16, output: &mut SequencerOutput) -> Result<(), SequencerError> {
        self.step = match self.step {
            Step::ReadStatus => {
                self.status = Status::from_bits(word);
                if self.status.por().is_set() {
                    info!("Power-on reset detected, loading configuration");
                    Step::PollFStat { polls: 0 }
                } else {
                    Step::Measure(Measurement::FullCapRep)
                }
            }
            Step::PollFStat { polls } => {
                if FStat::from_bits(word).dnr().is_set() {
                    Step::PollFStat {
                        polls: self.poll(polls, SequencerError::DataNotReadyStall)?,
                    }
                } else {
                    Step::ReadHibCfg
                }
            }
            Step::ReadHibCfg => {
                self.hib_cfg = HibCfg::from_bits(word);
                Step::Wake
            }
            Step::Wake => Step::ClearWake,
            Step::ClearWake => Step::ReadConfig,
            Step::ReadConfig => {
                self.gauge_config = Config::from_bits(word);
                Step::WriteDesignCap
            }
            Step::WriteDesignCap => Step::WriteConfig,
            Step::WriteConfig => Step::WriteModelCfg,
            Step::WriteModelCfg => Step::PollModelCfg { polls: 0 },
            Step::PollModelCfg { polls } => {
                if ModelCfg::from_bits(word).refresh().is_set() {
                    Step::PollModelCfg {
                        polls: self.poll(polls, SequencerError::ConfigRefreshStall)?,
                    }
                } else {
                    Step::RestoreHibCfg
                }
            }
            Step::RestoreHibCfg => Step::ClearPor,
            Step::ClearPor => Step::Settle {
                remaining: self.config.settle_ticks,
            },
            Step::VerifyStatus => {
                if Status::from_bits(word).por().is_set() {
                    self.por_retries = self.por_retries.saturating_add(1);
                    if let Some(limit) = self.config.por_retry_limit {
                        if self.por_retries > limit {
                            return Err(SequencerError::PowerOnResetLoop);
                        }
                    }
                    warn!("POR still set, repeating configuration");
                    Step::PollFStat { polls: 0 }
                } else {
                    Step::Measure(Measurement::FullCapRep)
                }
            }
            Step::Measure(measurement) => {
                self.stage(measurement, word);
                match measurement.next() {
                    Some(next) => Step::Measure(next),
                    None => {
                        self.telemetry = self.staged;
                        output.measurement_done = true;
                        debug!("Telemetry: {:?}", self.telemetry);

                        if self.config.continuous {
                            Step::Measure(Measurement::FullCapRep)
                        } else {
                            Step::AwaitStart
                        }
                    }
                }
            }
            step @ (Step::AwaitStart | Step::Settle { .. } | Step::Faulted(_)) => step,
        };

        Ok(())
    }

    fn poll(&self, polls: u16, stall: SequencerError) -> Result<u16, SequencerError> {
        let polls = polls.saturating_add(1);
        match self.config.poll_limit {
            Some(limit) if polls >= limit => Err(stall),
            _ => Ok(polls),
        }
    }

    fn stage(&mut self, measurement: Measurement, word: u16) {
        match measurement {
            Measurement::FullCapRep => self.staged.full_capacity = word,
            Measurement::RepSoc => self.staged.state_of_charge = word,
            Measurement::RepCap => self.staged.remaining_capacity = word,
            Measurement::Age => self.staged.age = word,
            Measurement::Temp => self.staged.temperature = word,
        }
    }
}

fn read<R: Register>() -> TransferRequest {
    TransferRequest::read_word(DEVICE_ADDR, RegisterAddress::U8(R::ADDRESS))
}

fn write<R: Register>(reg: R) -> TransferRequest {
    TransferRequest::write_word(DEVICE_ADDR, RegisterAddress::U8(R::ADDRESS), reg.bits())
}
