//! Host-side bus simulation.
//!
//! [`Target`] is a bit-level peer that watches the resolved bus lines and
//! forwards whole bytes to a byte-level [`Device`]. [`Wire`] resolves the
//! master's and the target's drives into line levels once per tick, and
//! [`SimBus`] exposes the same wire as `embedded-hal` pins and a delay source
//! so that [`crate::BitbangI2c`] can run against it.

use core::{cell::RefCell, convert::Infallible, mem};
use std::rc::Rc;

use crate::{
    line::{resolve, Drive, LineLevels},
    master::{BusEvent, BusMaster},
};

/// A peer as seen at byte level.
pub trait Device {
    /// 7-bit bus address.
    fn address(&self) -> u8;

    /// Called when the device is addressed. Returning `false` leaves the
    /// address unacknowledged.
    fn begin(&mut self, read: bool) -> bool {
        let _ = read;
        true
    }

    /// A byte written by the master. Returning `false` does not acknowledge it.
    fn write(&mut self, byte: u8) -> bool;

    /// The next byte to send to the master.
    fn read(&mut self) -> u8;

    /// Stop condition after the device was addressed.
    fn end(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Then {
    Receive,
    Transmit,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    /// Not addressed, waiting for a start condition.
    Idle,
    Receive { byte: u8, bits: u8, addressing: bool },
    /// All eight bits received, the acknowledge bit starts at the next falling
    /// clock edge.
    Decided { ack: bool, then: Then },
    Acknowledge { then: Then },
    Transmit { byte: u8, sent: u8 },
    MasterAck { acked: Option<bool> },
}

pub struct Target<D> {
    device: D,
    state: TargetState,
    addressed: bool,
    previous: LineLevels,
    sda: Drive,
    hold_requested: bool,
    holding: bool,
}

impl<D: Device> Target<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: TargetState::Idle,
            addressed: false,
            previous: LineLevels::IDLE,
            sda: Drive::Released,
            hold_requested: false,
            holding: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Keeps the clock line low, starting with the next low clock phase.
    pub fn set_clock_hold(&mut self, hold: bool) {
        self.hold_requested = hold;
    }

    pub fn scl(&self) -> Drive {
        if self.holding {
            Drive::Driving(false)
        } else {
            Drive::Released
        }
    }

    pub fn sda(&self) -> Drive {
        self.sda
    }

    pub fn tick(&mut self, levels: LineLevels) {
        let previous = mem::replace(&mut self.previous, levels);

        self.holding = self.hold_requested && (self.holding || !levels.scl);

        if previous.scl && levels.scl {
            if previous.sda && !levels.sda {
                self.start();
                return;
            }
            if !previous.sda && levels.sda {
                self.stop();
                return;
            }
        }

        match (previous.scl, levels.scl) {
            (false, true) => self.on_rise(levels.sda),
            (true, false) => self.on_fall(),
            _ => {}
        }
    }

    fn start(&mut self) {
        self.sda = Drive::Released;
        self.state = TargetState::Receive {
            byte: 0,
            bits: 0,
            addressing: true,
        };
    }

    fn stop(&mut self) {
        if mem::take(&mut self.addressed) {
            self.device.end();
        }
        self.sda = Drive::Released;
        self.state = TargetState::Idle;
    }

    fn on_rise(&mut self, sda: bool) {
        match self.state {
            TargetState::Receive {
                byte,
                bits,
                addressing,
            } => {
                let byte = (byte << 1) | sda as u8;
                let bits = bits + 1;
                self.state = if bits < 8 {
                    TargetState::Receive {
                        byte,
                        bits,
                        addressing,
                    }
                } else {
                    self.decide(byte, addressing)
                };
            }
            TargetState::MasterAck { .. } => {
                self.state = TargetState::MasterAck { acked: Some(!sda) };
            }
            _ => {}
        }
    }

    fn decide(&mut self, byte: u8, addressing: bool) -> TargetState {
        if addressing {
            let read = byte & 1 != 0;
            if byte >> 1 == self.device.address() && self.device.begin(read) {
                self.addressed = true;
                let then = if read { Then::Transmit } else { Then::Receive };
                return TargetState::Decided { ack: true, then };
            }

            TargetState::Decided {
                ack: false,
                then: Then::Release,
            }
        } else {
            let ack = self.device.write(byte);
            let then = if ack { Then::Receive } else { Then::Release };
            TargetState::Decided { ack, then }
        }
    }

    fn on_fall(&mut self) {
        match self.state {
            TargetState::Idle | TargetState::Receive { .. } => self.sda = Drive::Released,
            TargetState::Decided { ack, then } => {
                self.sda = if ack {
                    Drive::Driving(false)
                } else {
                    Drive::Released
                };
                self.state = TargetState::Acknowledge { then };
            }
            TargetState::Acknowledge { then } => {
                self.sda = Drive::Released;
                match then {
                    Then::Receive => {
                        self.state = TargetState::Receive {
                            byte: 0,
                            bits: 0,
                            addressing: false,
                        }
                    }
                    Then::Transmit => self.transmit_next(),
                    Then::Release => self.state = TargetState::Idle,
                }
            }
            TargetState::Transmit { byte, sent } if sent < 8 => {
                self.sda = data_bit(byte, sent);
                self.state = TargetState::Transmit {
                    byte,
                    sent: sent + 1,
                };
            }
            TargetState::Transmit { .. } => {
                self.sda = Drive::Released;
                self.state = TargetState::MasterAck { acked: None };
            }
            TargetState::MasterAck { acked: Some(true) } => self.transmit_next(),
            TargetState::MasterAck { .. } => {
                self.sda = Drive::Released;
                self.state = TargetState::Idle;
            }
        }
    }

    fn transmit_next(&mut self) {
        let byte = self.device.read();
        self.sda = data_bit(byte, 0);
        self.state = TargetState::Transmit { byte, sent: 1 };
    }
}

/// Open-drain drive for bit `index` of `byte`, most significant first.
fn data_bit(byte: u8, index: u8) -> Drive {
    if (byte >> (7 - index)) & 1 != 0 {
        Drive::Released
    } else {
        Drive::Driving(false)
    }
}

/// Byte-addressed memory behind a 1 or 2 byte pointer, like a serial EEPROM.
///
/// A write sets the pointer from its first bytes and stores the rest; reads
/// continue from the pointer. The pointer wraps at the end of the memory.
pub struct Memory {
    address: u8,
    pointer_bytes: usize,
    pending: usize,
    pointer: usize,
    data: Vec<u8>,
}

impl Memory {
    pub fn new(address: u8, pointer_bytes: usize, size: usize) -> Self {
        Self {
            address,
            pointer_bytes,
            pending: 0,
            pointer: 0,
            data: vec![0; size.max(1)],
        }
    }

    pub fn load(&mut self, offset: usize, bytes: &[u8]) {
        for (index, byte) in bytes.iter().enumerate() {
            let len = self.data.len();
            self.data[(offset + index) % len] = *byte;
        }
    }

    pub fn peek(&self, offset: usize) -> u8 {
        self.data[offset % self.data.len()]
    }
}

impl Device for Memory {
    fn address(&self) -> u8 {
        self.address
    }

    fn begin(&mut self, read: bool) -> bool {
        if !read && self.pointer_bytes > 0 {
            self.pending = self.pointer_bytes;
            self.pointer = 0;
        }
        true
    }

    fn write(&mut self, byte: u8) -> bool {
        let len = self.data.len();
        if self.pending > 0 {
            self.pending -= 1;
            self.pointer = ((self.pointer << 8) | byte as usize) % len;
        } else {
            self.data[self.pointer] = byte;
            self.pointer = (self.pointer + 1) % len;
        }
        true
    }

    fn read(&mut self) -> u8 {
        let byte = self.data[self.pointer];
        self.pointer = (self.pointer + 1) % self.data.len();
        byte
    }
}

/// The two bus lines shared by a master and one [`Target`].
pub struct Wire<D> {
    pub target: Target<D>,
    scl: Drive,
    sda: Drive,
    levels: LineLevels,
}

impl<D: Device> Wire<D> {
    pub fn new(device: D) -> Self {
        Self {
            target: Target::new(device),
            scl: Drive::Released,
            sda: Drive::Released,
            levels: LineLevels::IDLE,
        }
    }

    /// Levels resolved at the end of the last tick.
    pub fn levels(&self) -> LineLevels {
        self.levels
    }

    fn resolve(&self) -> LineLevels {
        LineLevels {
            scl: resolve(&[self.scl, self.target.scl()]),
            sda: resolve(&[self.sda, self.target.sda()]),
        }
    }

    /// Lets the target react to the master's current drive.
    pub fn settle(&mut self) -> LineLevels {
        let observed = self.resolve();
        self.target.tick(observed);
        self.levels = self.resolve();
        self.levels
    }

    pub fn step(&mut self, scl: Drive, sda: Drive) -> LineLevels {
        self.scl = scl;
        self.sda = sda;
        self.settle()
    }

    /// Advances `master` by one tick against this wire.
    pub fn tick(&mut self, master: &mut BusMaster) -> Option<BusEvent> {
        let output = master.tick(self.levels);
        self.step(output.scl, output.sda);
        output.event
    }
}

/// A [`Wire`] shared between pin and delay adapters.
pub struct SimBus<D> {
    wire: Rc<RefCell<Wire<D>>>,
}

impl<D: Device> SimBus<D> {
    pub fn new(device: D) -> Self {
        Self {
            wire: Rc::new(RefCell::new(Wire::new(device))),
        }
    }

    pub fn scl(&self) -> SimPin<D> {
        SimPin {
            wire: self.wire.clone(),
            line: Line::Scl,
        }
    }

    pub fn sda(&self) -> SimPin<D> {
        SimPin {
            wire: self.wire.clone(),
            line: Line::Sda,
        }
    }

    /// Every delay call is one tick of the simulated bus.
    pub fn delay(&self) -> SimDelay<D> {
        SimDelay {
            wire: self.wire.clone(),
        }
    }

    pub fn with_wire<R>(&self, f: impl FnOnce(&mut Wire<D>) -> R) -> R {
        f(&mut self.wire.borrow_mut())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line {
    Scl,
    Sda,
}

/// Open-drain master pin: setting it high releases the line.
pub struct SimPin<D> {
    wire: Rc<RefCell<Wire<D>>>,
    line: Line,
}

impl<D: Device> SimPin<D> {
    fn drive(&mut self, drive: Drive) {
        let mut wire = self.wire.borrow_mut();
        match self.line {
            Line::Scl => wire.scl = drive,
            Line::Sda => wire.sda = drive,
        }
    }

    fn level(&self) -> bool {
        let levels = self.wire.borrow().resolve();
        match self.line {
            Line::Scl => levels.scl,
            Line::Sda => levels.sda,
        }
    }
}

impl<D> embedded_hal::digital::ErrorType for SimPin<D> {
    type Error = Infallible;
}

impl<D: Device> embedded_hal::digital::OutputPin for SimPin<D> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(Drive::Driving(false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(Drive::Released);
        Ok(())
    }
}

impl<D: Device> embedded_hal::digital::InputPin for SimPin<D> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}

pub struct SimDelay<D> {
    wire: Rc<RefCell<Wire<D>>>,
}

impl<D: Device> embedded_hal::delay::DelayNs for SimDelay<D> {
    fn delay_ns(&mut self, _ns: u32) {
        self.wire.borrow_mut().settle();
    }
}

impl<D: Device> embedded_hal_async::delay::DelayNs for SimDelay<D> {
    async fn delay_ns(&mut self, _ns: u32) {
        self.wire.borrow_mut().settle();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Drives the lines by hand, one settled tick per level change.
    struct Bench {
        wire: Wire<Memory>,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                wire: Wire::new(Memory::new(0x50, 1, 16)),
            }
        }

        fn set(&mut self, scl: bool, sda: bool) -> LineLevels {
            let drive = |level| {
                if level {
                    Drive::Released
                } else {
                    Drive::Driving(false)
                }
            };
            self.wire.step(drive(scl), drive(sda))
        }

        fn start(&mut self) {
            self.set(true, true);
            self.set(true, false);
            self.set(false, false);
        }

        fn stop(&mut self) {
            self.set(false, false);
            self.set(true, false);
            self.set(true, true);
        }

        /// Clocks out one byte and returns whether the target acknowledged it.
        fn send(&mut self, byte: u8) -> bool {
            for bit in (0..8).rev() {
                let level = (byte >> bit) & 1 != 0;
                self.set(false, level);
                self.set(true, level);
                self.set(false, level);
            }
            self.set(false, true);
            let ack = !self.set(true, true).sda;
            self.set(false, true);
            ack
        }

        fn receive(&mut self, ack: bool) -> u8 {
            let mut byte = 0;
            for _ in 0..8 {
                self.set(false, true);
                byte = (byte << 1) | self.set(true, true).sda as u8;
                self.set(false, true);
            }
            self.set(false, !ack);
            self.set(true, !ack);
            self.set(false, !ack);
            byte
        }
    }

    #[test]
    fn test_target_acknowledges_own_address_only() {
        let mut bench = Bench::new();

        bench.start();
        assert!(!bench.send(0x51 << 1));
        bench.stop();

        bench.start();
        assert!(bench.send(0x50 << 1));
        bench.stop();
    }

    #[test]
    fn test_target_write_then_read() {
        let mut bench = Bench::new();

        bench.start();
        assert!(bench.send(0x50 << 1));
        assert!(bench.send(0x03));
        assert!(bench.send(0xC3));
        assert!(bench.send(0x5A));
        bench.stop();

        assert_eq!(bench.wire.target.device().peek(3), 0xC3);
        assert_eq!(bench.wire.target.device().peek(4), 0x5A);

        bench.start();
        assert!(bench.send(0x50 << 1));
        assert!(bench.send(0x03));
        // repeated start
        bench.set(false, true);
        bench.start();
        assert!(bench.send((0x50 << 1) | 1));
        assert_eq!(bench.receive(true), 0xC3);
        assert_eq!(bench.receive(false), 0x5A);
        bench.stop();

        // the target let go of the data line after the final byte
        assert_eq!(bench.wire.target.sda(), Drive::Released);
    }

    #[test]
    fn test_clock_hold_waits_for_low_clock() {
        let mut bench = Bench::new();
        bench.wire.target.set_clock_hold(true);

        assert!(bench.set(true, true).scl);
        assert!(!bench.set(false, true).scl);
        // released by the master, still held by the target
        assert!(!bench.set(true, true).scl);

        bench.wire.target.set_clock_hold(false);
        assert!(bench.set(true, true).scl);
    }
}
