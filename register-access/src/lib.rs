#![no_std]

use device_descriptor::Register;

/// Reads and writes whole registers described by [`Register`].
#[allow(async_fn_in_trait)]
pub trait AsyncRegisterAccess {
    type Error;

    async fn read_register_async<R>(&mut self) -> Result<R, Self::Error>
    where
        R: Register;

    async fn write_register_async<R>(&mut self, reg: R) -> Result<(), Self::Error>
    where
        R: Register;
}

#[allow(async_fn_in_trait)]
pub trait AsyncRegisterReader: Register {
    async fn read_async<A>(iface: &mut A) -> Result<Self, A::Error>
    where
        A: AsyncRegisterAccess;
}

#[allow(async_fn_in_trait)]
pub trait AsyncRegisterWriter: Register {
    async fn write_async<A>(self, iface: &mut A) -> Result<(), A::Error>
    where
        A: AsyncRegisterAccess;
}

impl<T: Register> AsyncRegisterReader for T {
    async fn read_async<A>(iface: &mut A) -> Result<Self, A::Error>
    where
        A: AsyncRegisterAccess,
    {
        iface.read_register_async().await
    }
}

impl<T: Register> AsyncRegisterWriter for T {
    async fn write_async<A>(self, iface: &mut A) -> Result<(), A::Error>
    where
        A: AsyncRegisterAccess,
    {
        iface.write_register_async(self).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use device_descriptor::device;

    device! {
        Control(0x02) {
            enable @ 0,
            mode @ 4..6
        }
    }

    struct RegisterFile {
        words: [u16; 8],
        writes: usize,
    }

    impl AsyncRegisterAccess for RegisterFile {
        type Error = ();

        async fn read_register_async<R: Register>(&mut self) -> Result<R, ()> {
            self.words
                .get(R::ADDRESS as usize)
                .map(|word| R::from_bits(*word))
                .ok_or(())
        }

        async fn write_register_async<R: Register>(&mut self, reg: R) -> Result<(), ()> {
            let word = self.words.get_mut(R::ADDRESS as usize).ok_or(())?;
            *word = reg.bits();
            self.writes += 1;
            Ok(())
        }
    }

    #[async_std::test]
    async fn test_read_and_write_through_extension_traits() {
        let mut file = RegisterFile {
            words: [0; 8],
            writes: 0,
        };

        Control::default()
            .enable()
            .set(true)
            .write_async(&mut file)
            .await
            .unwrap();

        let control = Control::read_async(&mut file).await.unwrap();
        assert!(control.enable().is_set());
        assert_eq!(control.mode().read(), 0);
        assert_eq!(file.words[2], 0x0001);
        assert_eq!(file.writes, 1);
    }
}
