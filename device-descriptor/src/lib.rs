#![no_std]

//! Typed descriptions of 16-bit device registers.
//!
//! A register map is declared with [`device!`]. Each register becomes a
//! `Copy` newtype over its raw bits that knows its bus address and exposes its
//! fields as [`Field`] accessors:
//!
//! ```rust
//! use device_descriptor::*;
//!
//! device! {
//!     /// Example status register
//!     Status(0x00, default = 0x0002) {
//!         /// Power-on reset flag
//!         por @ 1,
//!         /// Alert threshold nibble
//!         threshold @ 4..8
//!     }
//! }
//!
//! let status = Status::default();
//! assert!(status.por().is_set());
//!
//! let status = status.por().set(false).threshold().write(0xA);
//! assert_eq!(status.bits(), 0x00A0);
//! assert_eq!(Status::ADDRESS, 0x00);
//! assert_eq!(Status::NAME, "Status");
//! ```

/// A 16-bit register located at an 8-bit address.
pub trait Register: Copy {
    const ADDRESS: u8;
    const NAME: &'static str;

    fn bits(&self) -> u16;
    fn from_bits(bits: u16) -> Self;

    /// Decodes the register from its wire representation (low byte first).
    fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self::from_bits(u16::from_le_bytes(bytes))
    }

    /// Encodes the register in its wire representation (low byte first).
    fn to_le_bytes(&self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }
}

/// A `WIDTH` bit wide field starting at bit `POS` of register `R`.
pub struct Field<const POS: u8, const WIDTH: u8, R> {
    reg: R,
}

impl<const POS: u8, const WIDTH: u8, R> Field<POS, WIDTH, R>
where
    R: Register,
{
    const _CONST_CHECK: () = assert!(WIDTH > 0 && POS + WIDTH <= 16);

    const MASK: u16 = (((1u32 << WIDTH) - 1) & 0xFFFF) as u16;

    #[inline(always)]
    pub const fn new(reg: R) -> Self {
        Field { reg }
    }

    #[inline(always)]
    pub fn read(&self) -> u16 {
        let () = Self::_CONST_CHECK;
        (self.reg.bits() >> POS) & Self::MASK
    }

    #[inline(always)]
    pub fn write(self, value: u16) -> R {
        let () = Self::_CONST_CHECK;
        // make sure value fits into field
        debug_assert!(value <= Self::MASK);

        let cleared = self.reg.bits() & !(Self::MASK << POS);
        R::from_bits(cleared | ((value & Self::MASK) << POS))
    }
}

impl<const POS: u8, R> Field<POS, 1, R>
where
    R: Register,
{
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.read() != 0
    }

    #[inline(always)]
    pub fn set(self, on: bool) -> R {
        self.write(on as u16)
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_width {
    ($pos:literal) => {
        1
    };
    ($pos:literal, $end:literal) => {
        $end - $pos
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __default_bits {
    () => {
        0x0000
    };
    ($default:literal) => {
        $default
    };
}

#[macro_export]
macro_rules! register {
    (
        $(#[$meta:meta])*
        $reg:ident($addr:literal $(, default = $default:literal)?) {
            $( $(#[$field_meta:meta])* $field:ident @ $pos:literal $(.. $end:literal)? ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[must_use]
        pub struct $reg {
            value: u16,
        }

        impl $crate::Register for $reg {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = stringify!($reg);

            #[inline(always)]
            fn bits(&self) -> u16 {
                self.value
            }

            #[inline(always)]
            fn from_bits(bits: u16) -> Self {
                Self { value: bits }
            }
        }

        impl Default for $reg {
            #[inline(always)]
            fn default() -> Self {
                Self {
                    value: $crate::__default_bits!($($default)?),
                }
            }
        }

        impl $reg {
            $(
                $(#[$field_meta])*
                #[inline(always)]
                pub fn $field(self) -> $crate::Field<$pos, { $crate::__field_width!($pos $(, $end)?) }, Self> {
                    $crate::Field::new(self)
                }
            )*
        }
    };
}

#[macro_export]
macro_rules! device {
    (
        $(
            $(#[$meta:meta])*
            $reg:ident($($proto:tt)*) {
                $($fields:tt)*
            }
        )+
    ) => {
        $(
            $crate::register! {
                $(#[$meta])*
                $reg($($proto)*) {
                    $($fields)*
                }
            }
        )+
    };
}

#[cfg(test)]
mod test {
    use super::*;

    device! {
        Sample(0x3D, default = 0x8001) {
            low @ 0,
            nibble @ 4..8,
            high @ 15
        }
        Plain(0x10) {
            value @ 0..16
        }
    }

    #[test]
    fn test_defaults_and_addresses() {
        assert_eq!(Sample::ADDRESS, 0x3D);
        assert_eq!(Sample::NAME, "Sample");
        assert_eq!(Sample::default().bits(), 0x8001);
        assert_eq!(Plain::default().bits(), 0);
    }

    #[test]
    fn test_single_bit_fields() {
        let reg = Sample::default();
        assert!(reg.low().is_set());
        assert!(reg.high().is_set());

        let reg = reg.high().set(false);
        assert_eq!(reg.bits(), 0x0001);
        assert!(!reg.high().is_set());
    }

    #[test]
    fn test_multi_bit_fields_preserve_neighbours() {
        let reg = Sample::from_bits(0xFFFF).nibble().write(0x5);
        assert_eq!(reg.bits(), 0xFF5F);
        assert_eq!(reg.nibble().read(), 0x5);

        let reg = Plain::default().value().write(0xBEEF);
        assert_eq!(reg.value().read(), 0xBEEF);
    }

    #[test]
    fn test_wire_order_is_little_endian() {
        let reg = Plain::from_bits(0x1A2C);
        assert_eq!(reg.to_le_bytes(), [0x2C, 0x1A]);
        assert_eq!(Plain::from_le_bytes([0x2C, 0x1A]), reg);
    }
}
