//! LIS3DH 3-axis accelerometer, I²C, high-resolution mode.

use embedded_hal::i2c::I2c;
use opl_core::sample::Vec3;
use opl_core::sensors::{Accel, SensorError};

pub const LIS3DH_ADDR_DEFAULT: u8 = 0x18;
pub const LIS3DH_ADDR_ALT: u8 = 0x19;

const REG_WHO_AM_I: u8 = 0x0F;
const REG_CTRL1: u8 = 0x20;
const REG_CTRL4: u8 = 0x23;
const REG_OUT_X_L: u8 = 0x28;

const WHO_AM_I: u8 = 0x33;
/// Auto-increment flag for multi-byte reads.
const AUTO_INC: u8 = 0x80;

pub struct Lis3dh<I2C> {
    i2c: I2C,
    addr: u8,
    /// g per LSB of the left-justified 12-bit sample.
    scale: f32,
    range_g: u8,
}

impl<I2C: I2c> Lis3dh<I2C> {
    pub fn new(i2c: I2C, addr: u8, range_g: u8) -> Self {
        let scale = match range_g {
            2 => 0.001,
            4 => 0.002,
            16 => 0.012,
            _ => 0.004, // ±8 g
        };
        Self { i2c, addr, scale, range_g }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.addr, &[REG_WHO_AM_I], &mut id)
            .map_err(|_| SensorError::Bus)?;
        if id[0] != WHO_AM_I {
            return Err(SensorError::InvalidData);
        }

        // 100 Hz ODR, XYZ enabled.
        self.i2c.write(self.addr, &[REG_CTRL1, 0x57]).map_err(|_| SensorError::Bus)?;

        // High-resolution mode + full-scale range.
        let fs = match self.range_g {
            2 => 0x00,
            4 => 0x10,
            16 => 0x30,
            _ => 0x20,
        };
        self.i2c
            .write(self.addr, &[REG_CTRL4, fs | 0x08])
            .map_err(|_| SensorError::Bus)
    }
}

impl<I2C: I2c> Accel for Lis3dh<I2C> {
    fn read_g(&mut self) -> Result<Vec3, SensorError> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.addr, &[REG_OUT_X_L | AUTO_INC], &mut raw)
            .map_err(|_| SensorError::Bus)?;
        // 12-bit left-justified in 16.
        let axis = |lo: u8, hi: u8| (i16::from_le_bytes([lo, hi]) >> 4) as f32 * self.scale;
        Ok(Vec3::new(
            axis(raw[0], raw[1]),
            axis(raw[2], raw[3]),
            axis(raw[4], raw[5]),
        ))
    }
}
