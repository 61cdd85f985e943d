#![cfg_attr(not(any(test, feature = "sim")), no_std)]

#[macro_use]
extern crate logger;

use core::fmt;

use embedded_hal_async::{
    delay::DelayNs as AsyncDelayNs,
    i2c::{ErrorType, I2c as AsyncI2c},
};
use register_access::{AsyncRegisterReader, AsyncRegisterWriter};

mod descriptors;
pub mod ll;
pub mod sequencer;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use sequencer::{Sequencer, SequencerConfig, SequencerError};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError<I>
where
    I: ErrorType,
{
    Transfer(I::Error),
    /// Status.POR could not be cleared.
    Verify,
}

impl<I> fmt::Debug for ConfigError<I>
where
    I: ErrorType,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Transfer(error) => f.debug_tuple("Transfer").field(error).finish(),
            ConfigError::Verify => f.write_str("Verify"),
        }
    }
}

/// One measurement pass in raw register units.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    /// FullCapRep, LSB = 0.5 mAh
    pub full_capacity: u16,
    /// RepCap, LSB = 0.5 mAh
    pub remaining_capacity: u16,
    /// RepSOC, LSB = 1/256 %
    pub state_of_charge: u16,
    /// Age, LSB = 1/256 %
    pub age: u16,
    /// Temp, two's complement, LSB = 1/256 °C
    pub temperature: u16,
}

impl Telemetry {
    /// Returns the reported full capacity in mAh.
    ///
    /// ```rust
    /// # use max17055::Telemetry;
    /// let telemetry = Telemetry {
    ///     full_capacity: 0x1A2C,
    ///     ..Default::default()
    /// };
    ///
    /// assert_eq!(telemetry.full_capacity_mah(), 0x0D16);
    /// ```
    pub fn full_capacity_mah(&self) -> u16 {
        self.full_capacity / 2
    }

    /// Returns the reported remaining capacity in mAh.
    pub fn remaining_capacity_mah(&self) -> u16 {
        self.remaining_capacity / 2
    }

    /// Returns the reported state of charge in %.
    pub fn state_of_charge_percent(&self) -> u8 {
        (self.state_of_charge >> 8) as u8
    }

    /// Returns the cell age in %.
    pub fn age_percent(&self) -> u8 {
        (self.age >> 8) as u8
    }

    /// Returns the die temperature in °C, truncated toward zero.
    ///
    /// ```rust
    /// # use max17055::Telemetry;
    /// let mut telemetry = Telemetry::default();
    ///
    /// telemetry.temperature = 0x1980;
    /// assert_eq!(telemetry.temperature_celsius(), 25);
    ///
    /// telemetry.temperature = 0xF600;
    /// assert_eq!(telemetry.temperature_celsius(), -10);
    /// ```
    pub fn temperature_celsius(&self) -> i8 {
        (self.temperature as i16 / 256) as i8
    }
}

pub struct Max17055<I> {
    iface: ll::Max17055I2cInterface<I>,
    nominal_capacity: u16,
}

impl<I> Max17055<I> {
    /// `nominal_capacity` is the cell's design capacity in mAh.
    pub const fn new(i2c: I, nominal_capacity: u16) -> Self {
        Self {
            iface: ll::Max17055I2cInterface { i2c },
            nominal_capacity,
        }
    }

    pub fn release(self) -> I {
        self.iface.i2c
    }
}

impl<I> Max17055<I>
where
    I: AsyncI2c,
{
    const POR_RETRIES: usize = 3;

    /// Loads the cell configuration after a power-on reset. Does nothing if
    /// the device kept its configuration.
    pub async fn load_initial_config_async(
        &mut self,
        delay: &mut impl AsyncDelayNs,
    ) -> Result<(), ConfigError<I>> {
        let status = ll::Status::read_async(&mut self.iface)
            .await
            .map_err(ConfigError::Transfer)?;

        if !status.por().is_set() {
            return Ok(());
        }

        info!("Power-on reset detected, loading configuration");

        for _ in 0..Self::POR_RETRIES {
            self.configure(status, delay)
                .await
                .map_err(ConfigError::Transfer)?;

            delay.delay_ms(1).await;

            if !ll::Status::read_async(&mut self.iface)
                .await
                .map_err(ConfigError::Transfer)?
                .por()
                .is_set()
            {
                return Ok(());
            }

            warn!("POR still set, repeating configuration");
        }

        Err(ConfigError::Verify)
    }

    async fn configure(
        &mut self,
        status: ll::Status,
        delay: &mut impl AsyncDelayNs,
    ) -> Result<(), I::Error> {
        while ll::FStat::read_async(&mut self.iface)
            .await?
            .dnr()
            .is_set()
        {
            delay.delay_ms(10).await;
        }

        let hib_cfg = self.force_exit_hiberation().await?;
        let config = ll::Config::read_async(&mut self.iface).await?;

        sequencer::design_capacity(self.nominal_capacity)
            .write_async(&mut self.iface)
            .await?;
        config.ten().set(true).write_async(&mut self.iface).await?;

        ll::ModelCfg::default()
            .refresh()
            .set(true)
            .write_async(&mut self.iface)
            .await?;

        while ll::ModelCfg::read_async(&mut self.iface)
            .await?
            .refresh()
            .is_set()
        {
            delay.delay_ms(10).await;
        }

        hib_cfg.write_async(&mut self.iface).await?;

        status.por().set(false).write_async(&mut self.iface).await
    }

    async fn force_exit_hiberation(&mut self) -> Result<ll::HibCfg, I::Error> {
        let hib_cfg = ll::HibCfg::read_async(&mut self.iface).await?;

        for command in [ll::SoftWakeup::WAKE, ll::SoftWakeup::CLEAR] {
            ll::SoftWakeup::default()
                .command()
                .write(command)
                .write_async(&mut self.iface)
                .await?;
        }

        Ok(hib_cfg)
    }

    /// Reads FullCapRep, RepSOC, RepCap, Age and Temp, in this order.
    pub async fn read_telemetry_async(&mut self) -> Result<Telemetry, I::Error> {
        let full_capacity = ll::FullCapRep::read_async(&mut self.iface).await?;
        let state_of_charge = ll::RepSOC::read_async(&mut self.iface).await?;
        let remaining_capacity = ll::RepCap::read_async(&mut self.iface).await?;
        let age = ll::Age::read_async(&mut self.iface).await?;
        let temperature = ll::Temp::read_async(&mut self.iface).await?;

        Ok(Telemetry {
            full_capacity: full_capacity.capacity().read(),
            remaining_capacity: remaining_capacity.capacity().read(),
            state_of_charge: state_of_charge.percentage().read(),
            age: age.percentage().read(),
            temperature: temperature.temperature().read(),
        })
    }

    /// Returns the reported state of charge in %.
    pub async fn read_reported_soc(&mut self) -> Result<u8, I::Error> {
        let reg = ll::RepSOC::read_async(&mut self.iface).await?;
        Ok((reg.percentage().read() >> 8) as u8)
    }
}
