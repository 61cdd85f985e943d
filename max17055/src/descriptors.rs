use device_descriptor::*;

device! {
    /// The Status register maintains all flags related to alert thresholds and
    /// battery insertion or removal.
    Status(0x00, default = 0x0002) {
        /// Set when the device detects a software or hardware power-on reset.
        /// Must be cleared by the host after the configuration was loaded.
        por @ 1
    }
    RepCap(0x05) {
        /// Reported remaining capacity. LSB = 0.5 mAh with a 10 mΩ sense resistor.
        capacity @ 0..16
    }
    RepSOC(0x06) {
        /// Reported state of charge. LSB = 1/256 %.
        percentage @ 0..16
    }
    Age(0x07) {
        /// 100% x (FullCapRep/DesignCap). LSB = 1/256 %.
        percentage @ 0..16
    }
    Temp(0x08) {
        /// Two's complement, LSB = 1/256 °C.
        temperature @ 0..16
    }
    FullCapRep(0x10) {
        /// Reported full capacity. LSB = 0.5 mAh with a 10 mΩ sense resistor.
        capacity @ 0..16
    }
    DesignCap(0x18) {
        /// Expected capacity of the cell, in the same units as RepCap.
        capacity @ 0..16
    }
    Config(0x1D, default = 0x2210) {
        /// Enable temperature channel
        ten @ 9
    }
    FStat(0x3D, default = 0x0001) {
        /// Data not ready. Set after power-up until the first conversion
        /// results are available.
        dnr @ 0
    }
    SoftWakeup(0x60) {
        command @ 0..16
    }
    /// Hibernate configuration. Saved before waking the device and restored
    /// unchanged afterwards.
    HibCfg(0xBA, default = 0x870C) {}
    ModelCfg(0xDB) {
        /// Set to load the new model. Cleared by the device when the model
        /// refresh completed.
        refresh @ 15
    }
}

impl SoftWakeup {
    /// Wakes the device from hibernation.
    pub const WAKE: u16 = 0x0090;
    pub const CLEAR: u16 = 0x0000;
}
