//! Byte-level request/response contract of the bus master.

use heapless::Vec;

use crate::{BusError, Error, NackSource};

/// Largest number of bytes written or read by a single request.
pub const MAX_TRANSFER: usize = 256;

/// Register address sent right after the write-mode device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterAddress {
    #[default]
    None,
    U8(u8),
    /// Sent most significant byte first.
    U16(u16),
}

impl RegisterAddress {
    pub fn len(&self) -> usize {
        match self {
            RegisterAddress::None => 0,
            RegisterAddress::U8(_) => 1,
            RegisterAddress::U16(_) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`th byte on the wire.
    pub fn byte(&self, index: usize) -> Option<u8> {
        match (self, index) {
            (RegisterAddress::U8(address), 0) => Some(*address),
            (RegisterAddress::U16(address), 0) => Some((*address >> 8) as u8),
            (RegisterAddress::U16(address), 1) => Some(*address as u8),
            _ => None,
        }
    }
}

/// One bus transaction.
///
/// The master sends the write-mode address, the register address bytes and
/// the write data. If `read_len` is non-zero it then issues a repeated start,
/// re-addresses the device in read mode and reads `read_len` bytes. A request
/// with neither register address nor write data addresses the device in read
/// mode straight away.
///
/// Byte counts are plain lengths: `write.len()` and `read_len` are the number
/// of data bytes. Together with the address byte, a request writing N bytes
/// puts N + 1 bytes on the wire in that direction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferRequest {
    /// 7-bit device address
    pub address: u8,
    pub register: RegisterAddress,
    pub write: Vec<u8, MAX_TRANSFER>,
    pub read_len: usize,
}

impl TransferRequest {
    pub fn write(address: u8, register: RegisterAddress, bytes: &[u8]) -> Result<Self, Error> {
        Self::write_read(address, register, bytes, 0)
    }

    pub fn read(address: u8, register: RegisterAddress, len: usize) -> Result<Self, Error> {
        Self::write_read(address, register, &[], len)
    }

    pub fn write_read(
        address: u8,
        register: RegisterAddress,
        bytes: &[u8],
        read_len: usize,
    ) -> Result<Self, Error> {
        if read_len > MAX_TRANSFER {
            return Err(Error::Overflow);
        }

        Ok(Self {
            address,
            register,
            write: Vec::from_slice(bytes).map_err(|_| Error::Overflow)?,
            read_len,
        })
    }

    /// Writes a 16-bit register, low byte first.
    pub fn write_word(address: u8, register: RegisterAddress, value: u16) -> Self {
        let mut write = Vec::new();
        // two bytes always fit
        let _ = write.extend_from_slice(&value.to_le_bytes());

        Self {
            address,
            register,
            write,
            read_len: 0,
        }
    }

    /// Reads a 16-bit register.
    pub fn read_word(address: u8, register: RegisterAddress) -> Self {
        Self {
            address,
            register,
            write: Vec::new(),
            read_len: 2,
        }
    }

    /// The address byte on the wire: the 7-bit address followed by the
    /// direction bit (0 = write, 1 = read).
    pub fn address_byte(&self, read: bool) -> u8 {
        (self.address << 1) | read as u8
    }

    /// Whether the first address phase is already in read mode.
    pub fn reads_directly(&self) -> bool {
        self.register.is_empty() && self.write.is_empty() && self.read_len > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Completed,
    Nacked(NackSource),
    /// The transfer deadline expired, usually because a peer kept the clock
    /// stretched.
    TimedOut,
    /// More bytes were read than the result can hold.
    Overrun,
}

impl Outcome {
    pub fn error(self) -> Option<BusError> {
        match self {
            Outcome::Completed => None,
            Outcome::Nacked(source) => Some(BusError::Nack(source)),
            Outcome::TimedOut => Some(BusError::Timeout),
            Outcome::Overrun => Some(BusError::Overrun),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferResult {
    pub outcome: Outcome,
    /// Received bytes; empty unless the request read and completed.
    pub read: Vec<u8, MAX_TRANSFER>,
}

impl TransferResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    /// The first two received bytes as a little-endian word.
    pub fn word(&self) -> Option<u16> {
        match self.read.as_slice() {
            [low, high, ..] => Some(u16::from_le_bytes([*low, *high])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_address_framing() {
        let request = TransferRequest::read_word(0x36, RegisterAddress::U8(0x00));
        assert_eq!(request.address_byte(false), 0x6C);
        assert_eq!(request.address_byte(true), 0x6D);
    }

    #[test]
    fn test_register_bytes_are_msb_first() {
        let register = RegisterAddress::U16(0x1234);
        assert_eq!(register.len(), 2);
        assert_eq!(register.byte(0), Some(0x12));
        assert_eq!(register.byte(1), Some(0x34));
        assert_eq!(register.byte(2), None);

        assert_eq!(RegisterAddress::U8(0xBA).byte(0), Some(0xBA));
        assert!(RegisterAddress::None.is_empty());
    }

    #[test]
    fn test_word_helpers() {
        let request = TransferRequest::write_word(0x36, RegisterAddress::U8(0x18), 0x1A2C);
        assert_eq!(request.write.as_slice(), &[0x2C, 0x1A]);
        assert_eq!(request.read_len, 0);

        let mut read = Vec::new();
        read.extend_from_slice(&[0x2C, 0x1A]).unwrap();
        let result = TransferResult {
            outcome: Outcome::Completed,
            read,
        };
        assert_eq!(result.word(), Some(0x1A2C));
    }

    #[test]
    fn test_rejects_oversized_requests() {
        let bytes = [0u8; MAX_TRANSFER + 1];
        assert_eq!(
            TransferRequest::write(0x50, RegisterAddress::None, &bytes),
            Err(Error::Overflow)
        );
        assert_eq!(
            TransferRequest::read(0x50, RegisterAddress::None, MAX_TRANSFER + 1),
            Err(Error::Overflow)
        );
    }

    #[test]
    fn test_direct_read_detection() {
        let request = TransferRequest::read(0x50, RegisterAddress::None, 4).unwrap();
        assert!(request.reads_directly());

        let request = TransferRequest::read(0x50, RegisterAddress::U8(0), 4).unwrap();
        assert!(!request.reads_directly());
    }
}
