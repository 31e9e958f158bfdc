//! LSM6DSOX 6-DOF IMU, I²C.
//!
//! The accel and gyro capabilities are registered as two instances sharing
//! the bus (one configures the chip, the other only reads), so each slot of
//! the registry gets its own exclusive driver.

use embedded_hal::i2c::I2c;
use opl_core::sample::Vec3;
use opl_core::sensors::{Accel, Gyro, SensorError};

pub const LSM6DSOX_ADDR_DEFAULT: u8 = 0x6A;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL1_XL: u8 = 0x10;
const REG_CTRL2_G: u8 = 0x11;
const REG_OUTX_L_G: u8 = 0x22;
const REG_OUTX_L_A: u8 = 0x28;

const WHO_AM_I: u8 = 0x6C;

/// ±4 g in mg/LSB.
const ACCEL_SCALE: f32 = 0.000_122;
/// ±2000 dps in mdps/LSB.
const GYRO_SCALE: f32 = 0.070;

pub struct Lsm6dsox<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C: I2c> Lsm6dsox<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.addr, &[REG_WHO_AM_I], &mut id)
            .map_err(|_| SensorError::Bus)?;
        if id[0] != WHO_AM_I {
            return Err(SensorError::InvalidData);
        }
        // Accel 104 Hz, ±4 g.
        self.i2c
            .write(self.addr, &[REG_CTRL1_XL, 0x48])
            .map_err(|_| SensorError::Bus)?;
        // Gyro 104 Hz, ±2000 dps.
        self.i2c
            .write(self.addr, &[REG_CTRL2_G, 0x4C])
            .map_err(|_| SensorError::Bus)
    }

    fn read_vec(&mut self, reg: u8, scale: f32) -> Result<Vec3, SensorError> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.addr, &[reg], &mut raw)
            .map_err(|_| SensorError::Bus)?;
        let axis = |lo: u8, hi: u8| i16::from_le_bytes([lo, hi]) as f32 * scale;
        Ok(Vec3::new(
            axis(raw[0], raw[1]),
            axis(raw[2], raw[3]),
            axis(raw[4], raw[5]),
        ))
    }
}

impl<I2C: I2c> Accel for Lsm6dsox<I2C> {
    fn read_g(&mut self) -> Result<Vec3, SensorError> {
        self.read_vec(REG_OUTX_L_A, ACCEL_SCALE)
    }
}

impl<I2C: I2c> Gyro for Lsm6dsox<I2C> {
    fn read_dps(&mut self) -> Result<Vec3, SensorError> {
        self.read_vec(REG_OUTX_L_G, GYRO_SCALE)
    }
}
