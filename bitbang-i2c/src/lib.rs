#![cfg_attr(not(any(test, feature = "sim")), no_std)]

//! Tick-driven, bit-banged two-wire bus master.
//!
//! [`BusMaster`] is a pure state machine: each call to [`BusMaster::tick`]
//! takes the observed line levels and returns the drive for both lines plus an
//! optional [`BusEvent`]. [`BitbangI2c`] wraps it around two open-drain pins
//! and a delay source and implements the `embedded-hal` I2C traits.

#[macro_use]
extern crate logger;

use fugit::{HertzU32, RateExtU32};

mod driver;
pub mod line;
pub mod master;
pub mod request;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod timebase;

pub use driver::BitbangI2c;
pub use line::{Drive, LineLevels};
pub use master::{BusEvent, BusMaster, MasterOutput, Rejected};
pub use request::{Outcome, RegisterAddress, TransferRequest, TransferResult, MAX_TRANSFER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Fewer than four ticks per bus period.
    DividerTooSmall,
    DividerNotEven,
    /// The bus must stay idle for at least two periods between transfers.
    IdleGuardTooShort,
}

/// Which part of a transfer was not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NackSource {
    Address,
    RegisterAddress,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    Nack(NackSource),
    Timeout,
    Overrun,
}

/// Errors reported by [`BitbangI2c`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Bus(BusError),
    /// A pin could not be read or driven.
    Pin,
    /// The operation list interleaves reads and writes in an order a single
    /// request can't express.
    Unsupported,
    /// More than [`MAX_TRANSFER`] bytes in one direction.
    Overflow,
}

impl From<BusError> for Error {
    fn from(error: BusError) -> Self {
        Error::Bus(error)
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            Error::Bus(BusError::Nack(NackSource::Address)) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            Error::Bus(BusError::Nack(_)) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::Bus(BusError::Overrun) => ErrorKind::Overrun,
            Error::Bus(BusError::Timeout) | Error::Pin | Error::Unsupported | Error::Overflow => {
                ErrorKind::Other
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Rate at which [`BusMaster::tick`] is called.
    pub tick_rate: HertzU32,
    /// Clock frequency on the bus. `tick_rate / bus_rate` must be even and at
    /// least 4.
    pub bus_rate: HertzU32,
    /// Bus periods spent idle after power-up and after every stop condition.
    pub idle_guard_periods: u8,
    /// Bus periods a transfer may overrun its nominal length, for example
    /// because a peer stretches the clock. `None` waits forever.
    pub timeout_periods: Option<u32>,
}

impl BusConfig {
    pub const MIN_IDLE_GUARD_PERIODS: u8 = 2;

    pub fn validate(&self) -> Result<(), ConfigError> {
        timebase::Timebase::new(self.tick_rate, self.bus_rate)?;

        if self.idle_guard_periods < Self::MIN_IDLE_GUARD_PERIODS {
            return Err(ConfigError::IdleGuardTooShort);
        }

        Ok(())
    }

    /// Duration of one tick in nanoseconds.
    pub fn tick_ns(&self) -> u32 {
        1_000_000_000 / self.tick_rate.to_Hz().max(1)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            tick_rate: 400.kHz(),
            bus_rate: 100.kHz(),
            idle_guard_periods: 2,
            timeout_periods: Some(64),
        }
    }
}
