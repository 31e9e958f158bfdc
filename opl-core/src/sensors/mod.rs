//! Sensor capability traits.
//!
//! Drivers implement the narrow trait for each capability they have; the
//! registry hands them out as trait objects. [`NullSensor`] implements every
//! trait with benign defaults so callers never branch on presence.

pub mod registry;

use time::PrimitiveDateTime;

use crate::sample::{FixType, GpsFix, SatInfo, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Bus transaction failed.
    Bus,
    /// Device responded but the data is unusable.
    InvalidData,
    /// Device needs more time.
    NotReady,
}

/// Accelerometer: per-axis specific force in g.
pub trait Accel {
    fn read_g(&mut self) -> Result<Vec3, SensorError>;
}

/// Gyroscope: angular rate in degrees/second.
pub trait Gyro {
    fn read_dps(&mut self) -> Result<Vec3, SensorError>;
}

/// Magnetometer: field in microtesla.
pub trait Mag {
    fn read_ut(&mut self) -> Result<Vec3, SensorError>;
}

/// One parsed position update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsUpdate {
    pub has_fix: bool,
    pub fix: GpsFix,
    pub fix_type: FixType,
    pub sats_in_use: u8,
    /// UTC seconds when the receiver decoded a valid date.
    pub epoch_seconds: Option<i64>,
}

/// Position source. `poll` drains whatever the receiver produced since the
/// last call and reports a consolidated update when one is available.
pub trait GpsSource {
    fn poll(&mut self, now_us: u64) -> Option<GpsUpdate>;

    /// Latest satellites-in-view details.
    fn satellites(&self) -> &[SatInfo];
}

/// Battery-backed wallclock.
pub trait Rtc {
    fn now_utc(&mut self) -> Result<PrimitiveDateTime, SensorError>;
    fn set_utc(&mut self, datetime: PrimitiveDateTime) -> Result<(), SensorError>;
}

/// Stand-in for any absent or disabled peripheral.
#[derive(Debug, Default)]
pub struct NullSensor;

impl Accel for NullSensor {
    fn read_g(&mut self) -> Result<Vec3, SensorError> {
        Ok(Vec3::ZERO)
    }
}

impl Gyro for NullSensor {
    fn read_dps(&mut self) -> Result<Vec3, SensorError> {
        Ok(Vec3::ZERO)
    }
}

impl Mag for NullSensor {
    fn read_ut(&mut self) -> Result<Vec3, SensorError> {
        Ok(Vec3::ZERO)
    }
}

impl GpsSource for NullSensor {
    fn poll(&mut self, _now_us: u64) -> Option<GpsUpdate> {
        None
    }

    fn satellites(&self) -> &[SatInfo] {
        &[]
    }
}

impl Rtc for NullSensor {
    fn now_utc(&mut self) -> Result<PrimitiveDateTime, SensorError> {
        Ok(PrimitiveDateTime::MIN)
    }

    fn set_utc(&mut self, _datetime: PrimitiveDateTime) -> Result<(), SensorError> {
        Ok(())
    }
}
