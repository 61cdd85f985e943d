use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    i2c::{ErrorType, I2c, Operation},
};
use embedded_hal_async::{delay::DelayNs as AsyncDelayNs, i2c::I2c as AsyncI2c};

use crate::{
    line::{Drive, LineLevels},
    master::{BusEvent, BusMaster, Rejected},
    request::{TransferRequest, TransferResult, MAX_TRANSFER},
    BusConfig, ConfigError, Error,
};

/// I2C master on two open-drain GPIOs.
///
/// Both pins must be configured as open-drain outputs whose level can be read
/// back. Every tick samples the pins, advances the [`BusMaster`], applies its
/// drive and then waits one tick period on `delay`.
pub struct BitbangI2c<SCL, SDA, D> {
    scl: SCL,
    sda: SDA,
    delay: D,
    master: BusMaster,
    tick_ns: u32,
}

impl<SCL, SDA, D> BitbangI2c<SCL, SDA, D>
where
    SCL: InputPin + OutputPin,
    SDA: InputPin + OutputPin,
{
    pub fn new(scl: SCL, sda: SDA, delay: D, config: BusConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            scl,
            sda,
            delay,
            master: BusMaster::new(config)?,
            tick_ns: config.tick_ns(),
        })
    }

    pub fn release(self) -> (SCL, SDA, D) {
        (self.scl, self.sda, self.delay)
    }

    fn step(&mut self) -> Result<Option<BusEvent>, Error> {
        let observed = LineLevels {
            scl: self.scl.is_high().map_err(|_| Error::Pin)?,
            sda: self.sda.is_high().map_err(|_| Error::Pin)?,
        };

        let output = self.master.tick(observed);

        apply(&mut self.scl, output.scl)?;
        apply(&mut self.sda, output.sda)?;

        Ok(output.event)
    }

    fn tick(&mut self) -> Result<Option<BusEvent>, Error>
    where
        D: DelayNs,
    {
        let event = self.step()?;
        DelayNs::delay_ns(&mut self.delay, self.tick_ns);
        Ok(event)
    }

    async fn tick_async(&mut self) -> Result<Option<BusEvent>, Error>
    where
        D: AsyncDelayNs,
    {
        let event = self.step()?;
        AsyncDelayNs::delay_ns(&mut self.delay, self.tick_ns).await;
        Ok(event)
    }

    /// Runs one request to completion.
    pub fn execute(&mut self, mut request: TransferRequest) -> Result<TransferResult, Error>
    where
        D: DelayNs,
    {
        loop {
            match self.master.submit(request) {
                Ok(()) => break,
                Err(Rejected::Busy(rejected)) => request = rejected,
                Err(Rejected::TooLong(_)) => return Err(Error::Overflow),
            }
            self.tick()?;
        }

        loop {
            if let Some(BusEvent::Finished(result)) = self.tick()? {
                return finished(result);
            }
        }
    }

    pub async fn execute_async(
        &mut self,
        mut request: TransferRequest,
    ) -> Result<TransferResult, Error>
    where
        D: AsyncDelayNs,
    {
        loop {
            match self.master.submit(request) {
                Ok(()) => break,
                Err(Rejected::Busy(rejected)) => request = rejected,
                Err(Rejected::TooLong(_)) => return Err(Error::Overflow),
            }
            self.tick_async().await?;
        }

        loop {
            if let Some(BusEvent::Finished(result)) = self.tick_async().await? {
                return finished(result);
            }
        }
    }
}

fn apply<P: OutputPin>(pin: &mut P, drive: Drive) -> Result<(), Error> {
    if drive.pulls_low() {
        pin.set_low()
    } else {
        pin.set_high()
    }
    .map_err(|_| Error::Pin)
}

fn finished(result: TransferResult) -> Result<TransferResult, Error> {
    match result.outcome.error() {
        Some(error) => Err(Error::Bus(error)),
        None => Ok(result),
    }
}

/// Folds an operation list into a single request. All writes must come
/// before the first read.
fn request_for(address: u8, operations: &[Operation<'_>]) -> Result<TransferRequest, Error> {
    let mut request = TransferRequest {
        address,
        ..TransferRequest::default()
    };

    let mut reading = false;
    for operation in operations {
        match operation {
            Operation::Write(bytes) => {
                if reading {
                    return Err(Error::Unsupported);
                }
                request
                    .write
                    .extend_from_slice(bytes)
                    .map_err(|_| Error::Overflow)?;
            }
            Operation::Read(buffer) => {
                reading = true;
                request.read_len += buffer.len();
            }
        }
    }

    if request.read_len > MAX_TRANSFER {
        return Err(Error::Overflow);
    }

    Ok(request)
}

fn scatter(mut read: &[u8], operations: &mut [Operation<'_>]) {
    for operation in operations {
        if let Operation::Read(buffer) = operation {
            let (head, tail) = read.split_at(buffer.len().min(read.len()));
            buffer[..head.len()].copy_from_slice(head);
            read = tail;
        }
    }
}

impl<SCL, SDA, D> ErrorType for BitbangI2c<SCL, SDA, D> {
    type Error = Error;
}

impl<SCL, SDA, D> I2c for BitbangI2c<SCL, SDA, D>
where
    SCL: InputPin + OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }

        let request = request_for(address, operations)?;
        let result = self.execute(request)?;
        scatter(&result.read, operations);

        Ok(())
    }
}

impl<SCL, SDA, D> AsyncI2c for BitbangI2c<SCL, SDA, D>
where
    SCL: InputPin + OutputPin,
    SDA: InputPin + OutputPin,
    D: AsyncDelayNs,
{
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if operations.is_empty() {
            return Ok(());
        }

        let request = request_for(address, operations)?;
        let result = self.execute_async(request).await?;
        scatter(&result.read, operations);

        Ok(())
    }
}
