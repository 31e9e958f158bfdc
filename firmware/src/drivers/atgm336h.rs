//! ATGM336H-class GPS on a UART.
//!
//! Same NMEA stream as the I²C receiver, different transport: the buffered
//! UART accumulates between polls and `poll` drains whatever arrived.

use embedded_io::{Read, ReadReady};
use opl_core::nmea::NmeaParser;
use opl_core::sample::SatInfo;
use opl_core::sensors::{GpsSource, GpsUpdate};

pub struct UartGps<R> {
    rx: R,
    parser: NmeaParser,
}

impl<R: Read + ReadReady> UartGps<R> {
    pub fn new(rx: R) -> Self {
        Self { rx, parser: NmeaParser::new() }
    }
}

impl<R: Read + ReadReady> GpsSource for UartGps<R> {
    fn poll(&mut self, _now_us: u64) -> Option<GpsUpdate> {
        let mut buf = [0u8; 64];
        while self.rx.read_ready().unwrap_or(false) {
            match self.rx.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => self.parser.push_data(&buf[..n]),
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
