use device_descriptor::Register;
use embedded_hal_async::i2c::{I2c as AsyncI2c, Operation};
use register_access::AsyncRegisterAccess;

pub use crate::descriptors::*;

/// 7-bit bus address of the fuel gauge.
pub const DEVICE_ADDR: u8 = 0x36;

pub struct Max17055I2cInterface<I> {
    pub i2c: I,
}

impl<I> AsyncRegisterAccess for Max17055I2cInterface<I>
where
    I: AsyncI2c,
{
    type Error = I::Error;

    async fn read_register_async<R>(&mut self) -> Result<R, Self::Error>
    where
        R: Register,
    {
        let mut buffer = [0; 2];
        self.i2c
            .transaction(
                DEVICE_ADDR,
                &mut [Operation::Write(&[R::ADDRESS]), Operation::Read(&mut buffer)],
            )
            .await?;

        trace!("Read {} = {:#x}", R::NAME, u16::from_le_bytes(buffer));

        Ok(R::from_le_bytes(buffer))
    }

    async fn write_register_async<R>(&mut self, reg: R) -> Result<(), Self::Error>
    where
        R: Register,
    {
        trace!("Write {} = {:#x}", R::NAME, reg.bits());

        self.i2c
            .transaction(
                DEVICE_ADDR,
                &mut [
                    Operation::Write(&[R::ADDRESS]),
                    Operation::Write(&reg.to_le_bytes()),
                ],
            )
            .await
    }
}
