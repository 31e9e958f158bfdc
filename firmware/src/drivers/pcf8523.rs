//! PCF8523 real-time clock, I²C, BCD registers.

use embedded_hal::i2c::I2c;
use opl_core::sensors::{Rtc, SensorError};
use time::{Date, Month, PrimitiveDateTime, Time};

pub const PCF8523_ADDR_DEFAULT: u8 = 0x68;

const REG_CONTROL_1: u8 = 0x00;
const REG_SECONDS: u8 = 0x03;

/// Oscillator-stopped flag in the seconds register.
const OS_FLAG: u8 = 0x80;

fn bcd_to_bin(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

fn bin_to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

pub struct Pcf8523<I2C> {
    i2c: I2C,
    addr: u8,
}

impl<I2C: I2c> Pcf8523<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr }
    }

    pub fn init(&mut self) -> Result<(), SensorError> {
        // 24-hour mode, no interrupts.
        self.i2c
            .write(self.addr, &[REG_CONTROL_1, 0x00])
            .map_err(|_| SensorError::Bus)
    }
}

impl<I2C: I2c> Rtc for Pcf8523<I2C> {
    fn now_utc(&mut self) -> Result<PrimitiveDateTime, SensorError> {
        let mut raw = [0u8; 7];
        self.i2c
            .write_read(self.addr, &[REG_SECONDS], &mut raw)
            .map_err(|_| SensorError::Bus)?;
        if raw[0] & OS_FLAG != 0 {
            // Battery ran out; the time is not trustworthy.
            return Err(SensorError::NotReady);
        }
        let second = bcd_to_bin(raw[0] & 0x7F);
        let minute = bcd_to_bin(raw[1] & 0x7F);
        let hour = bcd_to_bin(raw[2] & 0x3F);
        let day = bcd_to_bin(raw[3] & 0x3F);
        // raw[4] is the weekday; derived, not stored.
        let month = bcd_to_bin(raw[5] & 0x1F);
        let year = 2000 + bcd_to_bin(raw[6]) as i32;

        let month = Month::try_from(month).map_err(|_| SensorError::InvalidData)?;
        let date = Date::from_calendar_date(year, month, day)
            .map_err(|_| SensorError::InvalidData)?;
        let tod =
            Time::from_hms(hour, minute, second).map_err(|_| SensorError::InvalidData)?;
        Ok(PrimitiveDateTime::new(date, tod))
    }

    fn set_utc(&mut self, datetime: PrimitiveDateTime) -> Result<(), SensorError> {
        let year = datetime.year();
        if !(2000..=2099).contains(&year) {
            return Err(SensorError::InvalidData);
        }
        let frame = [
            REG_SECONDS,
            bin_to_bcd(datetime.second()),
            bin_to_bcd(datetime.minute()),
            bin_to_bcd(datetime.hour()),
            bin_to_bcd(datetime.day()),
            datetime.weekday().number_days_from_sunday(),
            bin_to_bcd(datetime.month() as u8),
            bin_to_bcd((year - 2000) as u8),
        ];
        self.i2c.write(self.addr, &frame).map_err(|_| SensorError::Bus)
    }
}
