//! Bus master state machine.
//!
//! The master is advanced once per scheduler tick. It owns the clock line
//! while a transfer is in flight and shares the data line with the addressed
//! peer: it drives data during address and write bytes and during the
//! acknowledge bit of read bytes, and releases it everywhere else.

use core::mem;

use heapless::Vec;

use crate::{
    line::{Drive, LineLevels},
    request::{Outcome, TransferRequest, TransferResult},
    timebase::{Edge, Timebase},
    BusConfig, BusError, ConfigError, NackSource,
};

/// Position within a byte: eight data bits, most significant first, followed
/// by the acknowledge bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    Bit(u8),
    Acknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BytePhase {
    Address { read: bool },
    RegisterAddress { index: u8 },
    WriteData { index: u16 },
    ReadData { index: u16 },
}

impl BytePhase {
    fn transmits(self) -> bool {
        !matches!(self, BytePhase::ReadData { .. })
    }

    fn nack_source(self) -> NackSource {
        match self {
            BytePhase::Address { .. } => NackSource::Address,
            BytePhase::RegisterAddress { .. } => NackSource::RegisterAddress,
            BytePhase::WriteData { .. } | BytePhase::ReadData { .. } => NackSource::Data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Bus recovery time, counted in bus periods.
    Idle { periods: u8 },
    Ready,
    Start { repeated: bool },
    Byte { phase: BytePhase, slot: Slot },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    Started { repeated: bool },
    ByteWritten { byte: u8, acked: bool },
    ByteRead { byte: u8, acked: bool },
    /// Raised on the tick the stop condition completes.
    Finished(TransferResult),
}

/// Line drives and the event produced by one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterOutput {
    pub scl: Drive,
    pub sda: Drive,
    pub event: Option<BusEvent>,
}

impl MasterOutput {
    pub fn completion(&self) -> Option<&TransferResult> {
        match &self.event {
            Some(BusEvent::Finished(result)) => Some(result),
            _ => None,
        }
    }

    /// One-tick "transfer complete" pulse.
    pub fn done(&self) -> bool {
        self.completion()
            .map(|result| result.is_completed())
            .unwrap_or(false)
    }

    /// One-tick error pulse.
    pub fn error(&self) -> Option<BusError> {
        self.completion().and_then(|result| result.outcome.error())
    }
}

/// A request handed back by [`BusMaster::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// The master is not ready. The request may be submitted again later.
    Busy(TransferRequest),
    /// The request reads more than [`MAX_TRANSFER`](crate::MAX_TRANSFER)
    /// bytes.
    TooLong(TransferRequest),
}

pub struct BusMaster {
    timebase: Timebase,
    idle_guard_periods: u8,
    timeout_periods: Option<u32>,
    state: State,
    request: TransferRequest,
    received: Vec<u8, { crate::MAX_TRANSFER }>,
    shift: u8,
    sda: Drive,
    elapsed: u32,
    deadline: Option<u32>,
    aborted: Option<Outcome>,
}

impl BusMaster {
    pub fn new(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            timebase: Timebase::new(config.tick_rate, config.bus_rate)?,
            idle_guard_periods: config.idle_guard_periods,
            timeout_periods: config.timeout_periods,
            // recover the bus after power-up like after any other transfer
            state: State::Idle { periods: 0 },
            request: TransferRequest::default(),
            received: Vec::new(),
            shift: 0,
            sda: Drive::Released,
            elapsed: 0,
            deadline: None,
            aborted: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    fn in_transfer(&self) -> bool {
        !matches!(self.state, State::Idle { .. } | State::Ready)
    }

    /// Accepts a request if the master is ready. Requests arriving at any
    /// other time are handed back untouched.
    pub fn submit(&mut self, request: TransferRequest) -> Result<(), Rejected> {
        if request.read_len > crate::MAX_TRANSFER {
            warn!("Read of {} bytes rejected", request.read_len);
            return Err(Rejected::TooLong(request));
        }

        if !self.is_ready() {
            debug!("Bus busy, request to {:#x} rejected", request.address);
            return Err(Rejected::Busy(request));
        }

        let period = self.timebase.period();
        self.deadline = self.timeout_periods.map(|slack| {
            nominal_periods(&request)
                .saturating_add(slack)
                .saturating_mul(period)
        });
        self.request = request;
        self.received.clear();
        self.elapsed = 0;
        self.aborted = None;
        self.state = State::Start { repeated: false };

        Ok(())
    }

    pub fn tick(&mut self, observed: LineLevels) -> MasterOutput {
        if self.state == State::Ready {
            self.timebase.reset();
            self.sda = Drive::Released;
            return self.output(Drive::Released, None);
        }

        if self.in_transfer() {
            self.check_deadline();
        }

        let phase = self.timebase.phase();
        let scl = if self.in_transfer() && !phase.clock_high {
            Drive::Driving(false)
        } else {
            Drive::Released
        };

        // A peer holding the clock low past our release stretches the bit.
        if phase.edge == Some(Edge::Sample)
            && self.in_transfer()
            && self.aborted.is_none()
            && !observed.scl
        {
            return self.output(scl, None);
        }

        let event = match phase.edge {
            Some(edge) => self.on_edge(edge, observed),
            None => None,
        };

        self.timebase.advance();
        self.output(scl, event)
    }

    fn output(&self, scl: Drive, event: Option<BusEvent>) -> MasterOutput {
        MasterOutput {
            scl,
            sda: self.sda,
            event,
        }
    }

    fn check_deadline(&mut self) {
        self.elapsed = self.elapsed.saturating_add(1);

        let Some(deadline) = self.deadline else {
            return;
        };

        if self.elapsed > deadline && self.aborted.is_none() {
            warn!("Transfer deadline expired after {} ticks", self.elapsed);
            self.aborted = Some(Outcome::TimedOut);
            self.state = State::Stop;
        }
    }

    fn on_edge(&mut self, edge: Edge, observed: LineLevels) -> Option<BusEvent> {
        match (self.state, edge) {
            (State::Idle { periods }, Edge::Sample) => {
                let periods = periods.saturating_add(1);
                self.state = if periods >= self.idle_guard_periods {
                    State::Ready
                } else {
                    State::Idle { periods }
                };
                None
            }
            (State::Idle { .. } | State::Ready, _) => None,

            (State::Start { .. }, Edge::Drive) => {
                self.sda = Drive::Released;
                None
            }
            (State::Start { repeated }, Edge::Sample) => {
                trace!("Start (repeated: {})", repeated);
                self.sda = Drive::Driving(false);
                self.state = State::Byte {
                    phase: BytePhase::Address {
                        read: repeated || self.request.reads_directly(),
                    },
                    slot: Slot::Bit(0),
                };
                Some(BusEvent::Started { repeated })
            }

            (State::Byte { phase, slot }, Edge::Drive) => {
                self.sda = self.setup(phase, slot);
                None
            }
            (State::Byte { phase, slot: Slot::Bit(bit) }, Edge::Sample) => {
                if !phase.transmits() {
                    self.shift = (self.shift << 1) | observed.sda as u8;
                }
                let slot = if bit == 7 {
                    Slot::Acknowledge
                } else {
                    Slot::Bit(bit + 1)
                };
                self.state = State::Byte { phase, slot };
                None
            }
            (State::Byte { phase, slot: Slot::Acknowledge }, Edge::Sample) => {
                Some(self.acknowledge(phase, observed))
            }

            (State::Stop, Edge::Drive) => {
                self.sda = Drive::Driving(false);
                None
            }
            (State::Stop, Edge::Sample) => {
                self.sda = Drive::Released;
                Some(self.finish())
            }
        }
    }

    fn tx_byte(&self, phase: BytePhase) -> u8 {
        match phase {
            BytePhase::Address { read } => self.request.address_byte(read),
            BytePhase::RegisterAddress { index } => {
                self.request.register.byte(index as usize).unwrap_or(0xFF)
            }
            BytePhase::WriteData { index } => {
                self.request.write.get(index as usize).copied().unwrap_or(0xFF)
            }
            BytePhase::ReadData { .. } => 0xFF,
        }
    }

    fn is_last_read(&self, index: u16) -> bool {
        index as usize + 1 >= self.request.read_len
    }

    /// Data line drive for the low half of a bit.
    fn setup(&self, phase: BytePhase, slot: Slot) -> Drive {
        match (phase, slot) {
            (BytePhase::ReadData { index }, Slot::Acknowledge) => {
                if self.is_last_read(index) {
                    Drive::Released
                } else {
                    Drive::Driving(false)
                }
            }
            (BytePhase::ReadData { .. }, Slot::Bit(_)) | (_, Slot::Acknowledge) => Drive::Released,
            (_, Slot::Bit(bit)) => Drive::Driving((self.tx_byte(phase) >> (7 - bit)) & 1 != 0),
        }
    }

    fn acknowledge(&mut self, phase: BytePhase, observed: LineLevels) -> BusEvent {
        match phase {
            BytePhase::ReadData { index } => {
                let byte = self.shift;
                let acked = !self.is_last_read(index);
                trace!("Read {:#x}", byte);

                if self.received.push(byte).is_ok() {
                    self.state = self.after(phase);
                } else {
                    warn!("Read buffer full");
                    self.aborted = Some(Outcome::Overrun);
                    self.state = State::Stop;
                }

                BusEvent::ByteRead { byte, acked }
            }
            _ => {
                let byte = self.tx_byte(phase);
                let acked = !observed.sda;

                if acked {
                    trace!("Wrote {:#x}", byte);
                    self.state = self.after(phase);
                } else {
                    let source = phase.nack_source();
                    warn!("{:#x} not acknowledged ({:?})", byte, source);
                    self.aborted = Some(Outcome::Nacked(source));
                    self.state = State::Stop;
                }

                BusEvent::ByteWritten { byte, acked }
            }
        }
    }

    /// State following an acknowledged byte.
    fn after(&self, phase: BytePhase) -> State {
        match phase {
            BytePhase::Address { read: true } => self.read_or_stop(0),
            BytePhase::ReadData { index } => self.read_or_stop(index + 1),
            BytePhase::Address { read: false } => self.register_or_data(0),
            BytePhase::RegisterAddress { index } => self.register_or_data(index + 1),
            BytePhase::WriteData { index } => self.data_or_restart(index + 1),
        }
    }

    fn read_or_stop(&self, index: u16) -> State {
        if (index as usize) < self.request.read_len {
            State::Byte {
                phase: BytePhase::ReadData { index },
                slot: Slot::Bit(0),
            }
        } else {
            State::Stop
        }
    }

    fn register_or_data(&self, index: u8) -> State {
        if (index as usize) < self.request.register.len() {
            State::Byte {
                phase: BytePhase::RegisterAddress { index },
                slot: Slot::Bit(0),
            }
        } else {
            self.data_or_restart(0)
        }
    }

    fn data_or_restart(&self, index: u16) -> State {
        if (index as usize) < self.request.write.len() {
            State::Byte {
                phase: BytePhase::WriteData { index },
                slot: Slot::Bit(0),
            }
        } else if self.request.read_len > 0 {
            State::Start { repeated: true }
        } else {
            State::Stop
        }
    }

    fn finish(&mut self) -> BusEvent {
        let outcome = self.aborted.take().unwrap_or(Outcome::Completed);
        let mut read = mem::take(&mut self.received);
        if outcome != Outcome::Completed {
            read.clear();
        }

        trace!("Stop ({:?})", outcome);

        self.state = State::Idle { periods: 0 };
        self.deadline = None;

        BusEvent::Finished(TransferResult { outcome, read })
    }
}

/// Bus periods a request takes without clock stretching.
fn nominal_periods(request: &TransferRequest) -> u32 {
    const BYTE: usize = 9;

    let periods = if request.reads_directly() {
        // start, address, data, stop
        1 + BYTE * (1 + request.read_len) + 1
    } else {
        let mut periods = 1 + BYTE * (1 + request.register.len() + request.write.len()) + 1;
        if request.read_len > 0 {
            periods += 1 + BYTE * (1 + request.read_len);
        }
        periods
    };

    periods as u32
}
