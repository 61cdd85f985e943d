//! Simulated fuel gauge for host-side tests.

use bitbang_i2c::sim::Device;
use device_descriptor::Register;

use crate::ll::{
    Age, Config, FStat, FullCapRep, HibCfg, ModelCfg, RepCap, RepSOC, Status, Temp, DEVICE_ADDR,
};

/// A completed register access, as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(u8, u16),
    Write(u8, u16),
}

/// Register-level model of the fuel gauge.
///
/// The first byte of every write selects the register, then each register is
/// transferred low byte first. A write takes effect when its high byte
/// arrives. Reads start at the selected register and continue with the next
/// one.
pub struct FakeGauge {
    registers: [u16; 256],
    present: bool,
    pointer: u8,
    expect_pointer: bool,
    low_byte: Option<u8>,
    high_byte: Option<u8>,
    dnr_reads: u16,
    refresh_polls: u16,
    refresh_reads: u16,
    sticky_por: bool,
    log: Vec<Access>,
}

impl Default for FakeGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGauge {
    /// A freshly powered device with a half charged cell at 25 °C.
    pub fn new() -> Self {
        let mut registers = [0; 256];

        for (address, value) in [
            (Status::ADDRESS, Status::default().bits()),
            (HibCfg::ADDRESS, HibCfg::default().bits()),
            (Config::ADDRESS, Config::default().bits()),
            (FullCapRep::ADDRESS, 0x1A2C),
            (RepCap::ADDRESS, 0x0D16),
            (RepSOC::ADDRESS, 0x3200),
            (Age::ADDRESS, 0x6400),
            (Temp::ADDRESS, 0x1900),
        ] {
            registers[address as usize] = value;
        }

        Self {
            registers,
            present: true,
            pointer: 0,
            expect_pointer: false,
            low_byte: None,
            high_byte: None,
            dnr_reads: 0,
            refresh_polls: 0,
            refresh_reads: 0,
            sticky_por: false,
            log: Vec::new(),
        }
    }

    /// FStat.DNR reads back set for the next `reads` reads.
    pub fn with_data_not_ready(mut self, reads: u16) -> Self {
        self.dnr_reads = reads;
        self
    }

    /// ModelCfg.Refresh reads back set for `reads` reads after each refresh
    /// command.
    pub fn with_refresh_polls(mut self, reads: u16) -> Self {
        self.refresh_polls = reads;
        self
    }

    /// Status.POR can't be cleared.
    pub fn with_sticky_por(mut self, sticky: bool) -> Self {
        self.sticky_por = sticky;
        self
    }

    /// An absent device does not acknowledge its address.
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn register(&self, address: u8) -> u16 {
        self.registers[address as usize]
    }

    pub fn set_register(&mut self, address: u8, value: u16) {
        self.registers[address as usize] = value;
    }

    pub fn log(&self) -> &[Access] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn fetch(&mut self, address: u8) -> u16 {
        let mut value = self.registers[address as usize];

        if address == FStat::ADDRESS {
            let busy = self.dnr_reads > 0;
            self.dnr_reads = self.dnr_reads.saturating_sub(1);
            value = FStat::from_bits(value).dnr().set(busy).bits();
        } else if address == ModelCfg::ADDRESS {
            let busy = self.refresh_reads > 0;
            self.refresh_reads = self.refresh_reads.saturating_sub(1);
            value = ModelCfg::from_bits(value).refresh().set(busy).bits();
        }

        self.log.push(Access::Read(address, value));
        value
    }

    fn commit(&mut self, address: u8, value: u16) {
        self.log.push(Access::Write(address, value));

        let stored = if address == Status::ADDRESS && self.sticky_por {
            Status::from_bits(value).por().set(true).bits()
        } else {
            value
        };

        if address == ModelCfg::ADDRESS && ModelCfg::from_bits(value).refresh().is_set() {
            self.refresh_reads = self.refresh_polls;
        }

        self.registers[address as usize] = stored;
    }
}

impl Device for FakeGauge {
    fn address(&self) -> u8 {
        DEVICE_ADDR
    }

    fn begin(&mut self, read: bool) -> bool {
        if !read {
            self.expect_pointer = true;
        }
        self.low_byte = None;
        self.high_byte = None;
        self.present
    }

    fn write(&mut self, byte: u8) -> bool {
        if self.expect_pointer {
            self.expect_pointer = false;
            self.pointer = byte;
            return true;
        }

        match self.low_byte.take() {
            None => self.low_byte = Some(byte),
            Some(low) => {
                self.commit(self.pointer, u16::from_le_bytes([low, byte]));
                self.pointer = self.pointer.wrapping_add(1);
            }
        }
        true
    }

    fn read(&mut self) -> u8 {
        if let Some(high) = self.high_byte.take() {
            self.pointer = self.pointer.wrapping_add(1);
            return high;
        }

        let [low, high] = self.fetch(self.pointer).to_le_bytes();
        self.high_byte = Some(high);
        low
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_word(gauge: &mut FakeGauge, address: u8, value: u16) {
        assert!(gauge.begin(false));
        assert!(gauge.write(address));
        for byte in value.to_le_bytes() {
            assert!(gauge.write(byte));
        }
        gauge.end();
    }

    fn read_word(gauge: &mut FakeGauge, address: u8) -> u16 {
        assert!(gauge.begin(false));
        assert!(gauge.write(address));
        assert!(gauge.begin(true));
        let low = gauge.read();
        let high = gauge.read();
        gauge.end();
        u16::from_le_bytes([low, high])
    }

    #[test]
    fn test_word_access() {
        let mut gauge = FakeGauge::new();

        write_word(&mut gauge, 0x18, 0x1A2C);
        assert_eq!(gauge.register(0x18), 0x1A2C);
        assert_eq!(read_word(&mut gauge, 0x18), 0x1A2C);
        assert_eq!(
            gauge.log(),
            &[Access::Write(0x18, 0x1A2C), Access::Read(0x18, 0x1A2C)]
        );
    }

    #[test]
    fn test_busy_flags_clear_after_polls() {
        let mut gauge = FakeGauge::new()
            .with_data_not_ready(2)
            .with_refresh_polls(1);

        assert_eq!(read_word(&mut gauge, FStat::ADDRESS) & 1, 1);
        assert_eq!(read_word(&mut gauge, FStat::ADDRESS) & 1, 1);
        assert_eq!(read_word(&mut gauge, FStat::ADDRESS) & 1, 0);

        assert_eq!(read_word(&mut gauge, ModelCfg::ADDRESS), 0);
        write_word(&mut gauge, ModelCfg::ADDRESS, 0x8000);
        assert_eq!(read_word(&mut gauge, ModelCfg::ADDRESS), 0x8000);
        assert_eq!(read_word(&mut gauge, ModelCfg::ADDRESS), 0x0000);
    }

    #[test]
    fn test_por_handling() {
        let mut gauge = FakeGauge::new();
        assert_eq!(read_word(&mut gauge, Status::ADDRESS), 0x0002);
        write_word(&mut gauge, Status::ADDRESS, 0x0000);
        assert_eq!(read_word(&mut gauge, Status::ADDRESS), 0x0000);

        let mut gauge = FakeGauge::new().with_sticky_por(true);
        write_word(&mut gauge, Status::ADDRESS, 0x0000);
        assert_eq!(read_word(&mut gauge, Status::ADDRESS), 0x0002);
    }

    #[test]
    fn test_absent_device_does_not_acknowledge() {
        let mut gauge = FakeGauge::new();
        gauge.set_present(false);
        assert!(!gauge.begin(false));
    }
}
