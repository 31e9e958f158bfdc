//! Peripheral registry and I²C autodetect.
//!
//! The registry is built once at boot: each detected peripheral is
//! registered behind its capability trait together with a [`HardwareItem`]
//! describing it for the hardware-config block. Slots without a device fall
//! back to the null implementation.

use core::fmt::Write;

use crate::hal::I2cProbe;
use crate::opl::MAX_HW_IDENTIFIER;

use super::{Accel, Gyro, GpsSource, Mag, NullSensor, Rtc};

// ── Hardware inventory ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwType {
    Accelerometer = 0,
    Gps = 1,
    Rtc = 2,
    SdCard = 3,
    Display = 4,
    Imu = 5,
    Magnetometer = 6,
    Radio = 7,
}

impl HwType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Accelerometer),
            1 => Some(Self::Gps),
            2 => Some(Self::Rtc),
            3 => Some(Self::SdCard),
            4 => Some(Self::Display),
            5 => Some(Self::Imu),
            6 => Some(Self::Magnetometer),
            7 => Some(Self::Radio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnType {
    I2c = 0,
    Spi = 1,
    Uart = 2,
    Onboard = 3,
}

impl ConnType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::I2c),
            1 => Some(Self::Spi),
            2 => Some(Self::Uart),
            3 => Some(Self::Onboard),
            _ => None,
        }
    }
}

/// One detected peripheral, as written into the hardware-config block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareItem {
    pub hw_type: HwType,
    pub conn: ConnType,
    pub identifier: heapless::String<MAX_HW_IDENTIFIER>,
}

impl HardwareItem {
    pub fn new(hw_type: HwType, conn: ConnType, identifier: &str) -> Self {
        let mut ident = heapless::String::new();
        for ch in identifier.chars() {
            if ident.push(ch).is_err() {
                break;
            }
        }
        Self { hw_type, conn, identifier: ident }
    }

    /// Item for an I²C device found at `addr`, e.g. `lis3dh@0x19`.
    pub fn detected(hw_type: HwType, model: SensorModel, addr: u8) -> Self {
        let mut ident: heapless::String<MAX_HW_IDENTIFIER> = heapless::String::new();
        let _ = write!(ident, "{}@0x{addr:02X}", model.label());
        Self { hw_type, conn: ConnType::I2c, identifier: ident }
    }
}

// ── Autodetect ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorModel {
    Lis3dh,
    Lsm6dsox,
    Mpu6050,
    Icm20948,
    Pa1010d,
    Pcf8523,
}

impl SensorModel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Lis3dh => "lis3dh",
            Self::Lsm6dsox => "lsm6dsox",
            Self::Mpu6050 => "mpu6050",
            Self::Icm20948 => "icm20948",
            Self::Pa1010d => "pa1010d",
            Self::Pcf8523 => "pcf8523",
        }
    }
}

/// Probe order per slot. First responder wins, so put the likelier parts
/// (and their alternate strap addresses) first.
pub const ACCEL_CANDIDATES: &[(SensorModel, u8)] =
    &[(SensorModel::Lis3dh, 0x18), (SensorModel::Lis3dh, 0x19)];

pub const IMU_CANDIDATES: &[(SensorModel, u8)] = &[
    (SensorModel::Lsm6dsox, 0x6A),
    (SensorModel::Lsm6dsox, 0x6B),
    (SensorModel::Mpu6050, 0x68),
    (SensorModel::Icm20948, 0x69),
];

pub const GPS_I2C_CANDIDATES: &[(SensorModel, u8)] = &[(SensorModel::Pa1010d, 0x10)];

pub const RTC_CANDIDATES: &[(SensorModel, u8)] = &[(SensorModel::Pcf8523, 0x68)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Detection {
    pub model: SensorModel,
    pub address: u8,
    /// False when the configured device was absent and a fallback answered.
    pub at_configured: bool,
}

/// Tries the configured model/address first, then walks the candidate list.
pub fn detect_slot(
    probe: &mut dyn I2cProbe,
    configured: Option<(SensorModel, u8)>,
    candidates: &[(SensorModel, u8)],
) -> Option<Detection> {
    if let Some((model, address)) = configured {
        if probe.probe(address) {
            return Some(Detection { model, address, at_configured: true });
        }
    }
    for &(model, address) in candidates {
        if configured == Some((model, address)) {
            continue;
        }
        if probe.probe(address) {
            return Some(Detection { model, address, at_configured: false });
        }
    }
    None
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub const MAX_HARDWARE_ITEMS: usize = 8;

/// Holds every enabled peripheral behind its capability trait. Unfilled
/// slots answer through the shared null implementation.
pub struct Registry<'a> {
    accel: Option<&'a mut dyn Accel>,
    gyro: Option<&'a mut dyn Gyro>,
    mag: Option<&'a mut dyn Mag>,
    gps: Option<&'a mut dyn GpsSource>,
    rtc: Option<&'a mut dyn Rtc>,
    null: NullSensor,
    items: heapless::Vec<HardwareItem, MAX_HARDWARE_ITEMS>,
}

impl<'a> Registry<'a> {
    pub fn new() -> Self {
        Self {
            accel: None,
            gyro: None,
            mag: None,
            gps: None,
            rtc: None,
            null: NullSensor,
            items: heapless::Vec::new(),
        }
    }

    /// Records a peripheral in the inventory without binding a trait slot
    /// (SD card, display, radio).
    pub fn add_item(&mut self, item: HardwareItem) {
        let _ = self.items.push(item);
    }

    pub fn set_accel(&mut self, dev: &'a mut dyn Accel, item: HardwareItem) {
        self.accel = Some(dev);
        self.add_item(item);
    }

    pub fn set_gyro(&mut self, dev: &'a mut dyn Gyro) {
        self.gyro = Some(dev);
    }

    pub fn set_mag(&mut self, dev: &'a mut dyn Mag) {
        self.mag = Some(dev);
    }

    pub fn set_gps(&mut self, dev: &'a mut dyn GpsSource, item: HardwareItem) {
        self.gps = Some(dev);
        self.add_item(item);
    }

    pub fn set_rtc(&mut self, dev: &'a mut dyn Rtc, item: HardwareItem) {
        self.rtc = Some(dev);
        self.add_item(item);
    }

    pub fn accel(&mut self) -> &mut dyn Accel {
        match self.accel.as_deref_mut() {
            Some(dev) => dev,
            None => &mut self.null,
        }
    }

    pub fn gyro(&mut self) -> &mut dyn Gyro {
        match self.gyro.as_deref_mut() {
            Some(dev) => dev,
            None => &mut self.null,
        }
    }

    pub fn mag(&mut self) -> &mut dyn Mag {
        match self.mag.as_deref_mut() {
            Some(dev) => dev,
            None => &mut self.null,
        }
    }

    pub fn gps(&mut self) -> &mut dyn GpsSource {
        match self.gps.as_deref_mut() {
            Some(dev) => dev,
            None => &mut self.null,
        }
    }

    pub fn rtc(&mut self) -> &mut dyn Rtc {
        match self.rtc.as_deref_mut() {
            Some(dev) => dev,
            None => &mut self.null,
        }
    }

    pub fn has_gyro(&self) -> bool {
        self.gyro.is_some()
    }

    pub fn has_mag(&self) -> bool {
        self.mag.is_some()
    }

    pub fn has_rtc(&self) -> bool {
        self.rtc.is_some()
    }

    /// Inventory for the hardware-config block.
    pub fn items(&self) -> &[HardwareItem] {
        &self.items
    }
}

impl<'a> Default for Registry<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Vec3;
    use crate::sensors::Accel;

    struct FakeBus(&'static [u8]);

    impl I2cProbe for FakeBus {
        fn probe(&mut self, addr: u8) -> bool {
            self.0.contains(&addr)
        }
    }

    #[test]
    fn configured_address_wins() {
        let mut bus = FakeBus(&[0x18, 0x19]);
        let det =
            detect_slot(&mut bus, Some((SensorModel::Lis3dh, 0x18)), ACCEL_CANDIDATES).unwrap();
        assert_eq!(det.address, 0x18);
        assert!(det.at_configured);
    }

    #[test]
    fn falls_back_to_candidate_list() {
        // Configured at 0x18 but strapped to 0x19 on the bench.
        let mut bus = FakeBus(&[0x19]);
        let det =
            detect_slot(&mut bus, Some((SensorModel::Lis3dh, 0x18)), ACCEL_CANDIDATES).unwrap();
        assert_eq!(det.model, SensorModel::Lis3dh);
        assert_eq!(det.address, 0x19);
        assert!(!det.at_configured);

        let item = HardwareItem::detected(HwType::Accelerometer, det.model, det.address);
        assert_eq!(item.identifier.as_str(), "lis3dh@0x19");
        assert_eq!(item.conn, ConnType::I2c);
    }

    #[test]
    fn silent_bus_detects_nothing() {
        let mut bus = FakeBus(&[]);
        assert!(detect_slot(&mut bus, Some((SensorModel::Lis3dh, 0x18)), ACCEL_CANDIDATES)
            .is_none());
    }

    #[test]
    fn empty_registry_answers_through_nulls() {
        let mut reg = Registry::new();
        assert_eq!(reg.accel().read_g().unwrap(), Vec3::ZERO);
        assert!(reg.gps().poll(0).is_none());
        assert!(!reg.has_gyro());
        assert!(reg.items().is_empty());
    }

    struct FixedAccel(Vec3);

    impl Accel for FixedAccel {
        fn read_g(&mut self) -> Result<Vec3, crate::sensors::SensorError> {
            Ok(self.0)
        }
    }

    #[test]
    fn registered_device_replaces_null() {
        let mut dev = FixedAccel(Vec3::new(0.0, 0.0, 1.0));
        let mut reg = Registry::new();
        reg.set_accel(
            &mut dev,
            HardwareItem::detected(HwType::Accelerometer, SensorModel::Lis3dh, 0x18),
        );
        assert_eq!(reg.accel().read_g().unwrap().z, 1.0);
        assert_eq!(reg.items().len(), 1);
    }
}
