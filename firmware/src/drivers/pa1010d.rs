//! PA1010D GPS, I²C transport.
//!
//! The module streams NMEA over I²C in 32-byte windows, padding idle space
//! with newlines; the reader just keeps pulling and feeds the parser.

use embedded_hal::i2c::I2c;
use opl_core::nmea::NmeaParser;
use opl_core::sample::SatInfo;
use opl_core::sensors::{GpsSource, GpsUpdate, SensorError};

pub const PA1010D_ADDR_DEFAULT: u8 = 0x10;

const CHUNK: usize = 32;
/// Windows pulled per poll; 4 × 32 B covers a full 100 ms sentence burst.
const CHUNKS_PER_POLL: usize = 4;

pub struct Pa1010d<I2C> {
    i2c: I2C,
    addr: u8,
    parser: NmeaParser,
}

impl<I2C: I2c> Pa1010d<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { i2c, addr, parser: NmeaParser::new() }
    }

    /// One command write proves the device is listening.
    pub fn init(&mut self) -> Result<(), SensorError> {
        // PMTK channel query; the reply drains with the NMEA stream.
        self.i2c
            .write(self.addr, b"$PMTK000*32\r\n")
            .map_err(|_| SensorError::Bus)
    }
}

impl<I2C: I2c> GpsSource for Pa1010d<I2C> {
    fn poll(&mut self, _now_us: u64) -> Option<GpsUpdate> {
        let mut buf = [0u8; CHUNK];
        for _ in 0..CHUNKS_PER_POLL {
            if self.i2c.read(self.addr, &mut buf).is_err() {
                return None;
            }
            for &b in buf.iter().filter(|&&b| b != 0x00 && b != 0xFF) {
                self.parser.push_data(&[b]);
            }
        }

        if !self.parser.take_fix_update() {
            return None;
        }
        let data = &self.parser.data;
        Some(GpsUpdate {
            has_fix: data.has_fix,
            fix: data.fix,
            fix_type: data.fix_type,
            sats_in_use: data.sats_in_use,
            epoch_seconds: data.epoch_seconds(),
        })
    }

    fn satellites(&self) -> &[SatInfo] {
        &self.parser.data.sats
    }
}
