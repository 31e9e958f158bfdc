//! NMEA 0183 sentence parser.
//!
//! Byte-fed: UART or I²C GPS tasks push raw chunks with `push_data` and the
//! parser assembles sentences, verifies the XOR checksum and updates
//! [`GpsState`]. GGA carries position/quality, RMC speed/course/date,
//! GSA the fix dimension, GSV the per-satellite details.

use core::str::FromStr;

use crate::sample::{FixType, GpsFix, SatInfo, MAX_SATS};

const KNOTS_TO_MS: f32 = 0.514_444;

/// Accumulated view of the receiver, merged across sentence types.
#[derive(Debug, Clone, Default)]
pub struct GpsState {
    pub fix: GpsFix,
    pub has_fix: bool,
    pub fix_type: FixType,
    pub sats_in_use: u8,
    /// Satellites in view, committed when a GSV group completes.
    pub sats: heapless::Vec<SatInfo, MAX_SATS>,
    /// UTC calendar date from RMC: (year, month, day).
    pub date: Option<(u16, u8, u8)>,
    /// UTC time of day from RMC: (hour, minute, second).
    pub time: Option<(u8, u8, u8)>,
}

/// The RTC is only synced from a date the receiver plausibly decoded.
pub fn gps_date_valid(year: u16, month: u8, day: u8) -> bool {
    year >= 2000 && (1..=12).contains(&month) && (1..=31).contains(&day)
}

impl GpsState {
    /// Seconds since the Unix epoch, when both date and time are known and
    /// pass validation.
    pub fn epoch_seconds(&self) -> Option<i64> {
        let (year, month, day) = self.date?;
        let (hour, minute, second) = self.time?;
        if !gps_date_valid(year, month, day) {
            return None;
        }
        let month = time::Month::try_from(month).ok()?;
        let date = time::Date::from_calendar_date(year as i32, month, day).ok()?;
        let tod = time::Time::from_hms(hour, minute, second).ok()?;
        Some(time::PrimitiveDateTime::new(date, tod).assume_utc().unix_timestamp())
    }
}

pub struct NmeaParser {
    buffer: heapless::String<128>,
    pub data: GpsState,
    gsv_pending: heapless::Vec<SatInfo, MAX_SATS>,
    fix_dirty: bool,
    sats_dirty: bool,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self {
            buffer: heapless::String::new(),
            data: GpsState::default(),
            gsv_pending: heapless::Vec::new(),
            fix_dirty: false,
            sats_dirty: false,
        }
    }

    /// Process incoming bytes from the receiver.
    pub fn push_data(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'$' {
                self.buffer.clear();
            }

            if self.buffer.push(b as char).is_err() {
                // Buffer full, reset
                self.buffer.clear();
                continue;
            }

            if b == b'\n' {
                self.parse_sentence();
                self.buffer.clear();
            }
        }
    }

    /// True once since the last call if a position sentence was parsed.
    pub fn take_fix_update(&mut self) -> bool {
        core::mem::take(&mut self.fix_dirty)
    }

    /// True once since the last call if a GSV group completed.
    pub fn take_sats_update(&mut self) -> bool {
        core::mem::take(&mut self.sats_dirty)
    }

    fn parse_sentence(&mut self) {
        let buf = self.buffer.clone();
        let s = buf.as_str().trim();
        if !verify_checksum(s) {
            return;
        }
        // Talker id ($GP/$GN/$GL/...) varies per constellation; dispatch on
        // the three-letter sentence id.
        if s.len() < 7 || !s.is_char_boundary(3) {
            return;
        }
        match &s[3..6] {
            "GGA" => self.parse_gga(s),
            "RMC" => self.parse_rmc(s),
            "GSA" => self.parse_gsa(s),
            "GSV" => self.parse_gsv(s),
            _ => {}
        }
    }

    fn parse_gga(&mut self, s: &str) {
        // $__GGA,time,lat,NS,lon,EW,qual,sats,hdop,alt,M,...
        let mut parts = s.split(',');
        parts.next(); // id
        parts.next(); // time

        let lat_raw = parts.next().unwrap_or("");
        let ns = parts.next().unwrap_or("");
        let lon_raw = parts.next().unwrap_or("");
        let ew = parts.next().unwrap_or("");
        let qual = parts.next().unwrap_or("0");
        let sats = parts.next().unwrap_or("0");
        let hdop = parts.next().unwrap_or("");
        let alt = parts.next().unwrap_or("0.0");

        if let (Ok(lat), Ok(lon), Ok(alt), Ok(sats), Ok(qual)) = (
            f64::from_str(lat_raw),
            f64::from_str(lon_raw),
            f32::from_str(alt),
            u8::from_str(sats),
            u8::from_str(qual),
        ) {
            self.data.fix.lat = ddmm_to_degrees(lat, ns == "S");
            self.data.fix.lon = ddmm_to_degrees(lon, ew == "W");
            self.data.fix.alt_m = alt;
            self.data.sats_in_use = sats;
            self.data.has_fix = qual > 0;
            if let Ok(h) = f32::from_str(hdop) {
                self.data.fix.hdop = h;
            }
            self.fix_dirty = true;
        } else if qual == "0" {
            // Empty position fields while searching; still note the state.
            self.data.has_fix = false;
        }
    }

    fn parse_rmc(&mut self, s: &str) {
        // $__RMC,time,status,lat,NS,lon,EW,speed,course,date,...*CS
        let mut parts = s.split(',');
        parts.next(); // id
        let time_raw = parts.next().unwrap_or("");
        for _ in 0..5 {
            parts.next(); // status, lat, NS, lon, EW
        }
        let speed_raw = parts.next().unwrap_or("0.0");
        let course_raw = parts.next().unwrap_or("0.0");
        let date_raw = parts.next().unwrap_or("");

        if let (Ok(speed_kts), Ok(course)) = (f32::from_str(speed_raw), f32::from_str(course_raw))
        {
            self.data.fix.speed_ms = speed_kts * KNOTS_TO_MS;
            self.data.fix.heading_deg = course;
            self.fix_dirty = true;
        }

        // ddmmyy → (year, month, day); hhmmss.sss → (h, m, s)
        if date_raw.len() == 6 {
            if let (Ok(day), Ok(month), Ok(year)) = (
                u8::from_str(&date_raw[0..2]),
                u8::from_str(&date_raw[2..4]),
                u16::from_str(&date_raw[4..6]),
            ) {
                self.data.date = Some((2000 + year, month, day));
            }
        }
        if time_raw.len() >= 6 {
            if let (Ok(hour), Ok(minute), Ok(second)) = (
                u8::from_str(&time_raw[0..2]),
                u8::from_str(&time_raw[2..4]),
                u8::from_str(&time_raw[4..6]),
            ) {
                self.data.time = Some((hour, minute, second));
            }
        }
    }

    fn parse_gsa(&mut self, s: &str) {
        // $__GSA,mode1,mode2,id1..id12,pdop,hdop,vdop*CS
        let mut parts = s.split(',');
        parts.next(); // id
        parts.next(); // mode1
        let mode2 = parts.next().unwrap_or("1");
        self.data.fix_type = match mode2 {
            "2" => FixType::Fix2d,
            "3" => FixType::Fix3d,
            _ => FixType::NoFix,
        };
        for _ in 0..13 {
            parts.next(); // sat ids + pdop
        }
        if let Some(hdop) = parts.next() {
            if let Ok(h) = f32::from_str(hdop) {
                self.data.fix.hdop = h;
            }
        }
    }

    fn parse_gsv(&mut self, s: &str) {
        // $__GSV,total_msgs,msg_num,sats_in_view,{prn,elev,az,snr}×≤4*CS
        let body = s.split('*').next().unwrap_or(s);
        let mut parts = body.split(',');
        parts.next(); // id
        let total: u8 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let msg_num: u8 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        parts.next(); // sats in view
        if total == 0 || msg_num == 0 {
            return;
        }
        if msg_num == 1 {
            self.gsv_pending.clear();
        }

        loop {
            let Some(prn) = parts.next() else { break };
            let elev = parts.next().unwrap_or("");
            let az = parts.next().unwrap_or("");
            let snr = parts.next().unwrap_or("");
            let Ok(prn) = u8::from_str(prn) else { continue };
            let sat = SatInfo {
                prn,
                elevation_deg: i8::from_str(elev).unwrap_or(0),
                azimuth_deg: u16::from_str(az).unwrap_or(0),
                // Empty SNR means not tracked.
                snr_db: i8::from_str(snr).unwrap_or(-1),
            };
            let _ = self.gsv_pending.push(sat);
        }

        if msg_num == total {
            self.data.sats.clear();
            let _ = self.data.sats.extend_from_slice(&self.gsv_pending);
            self.sats_dirty = true;
        }
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// DDMM.MMMM → decimal degrees. e.g. 4807.038 => 48° + 7.038′.
fn ddmm_to_degrees(raw: f64, negative: bool) -> f64 {
    let deg = (raw / 100.0) as u32 as f64;
    let minutes = raw - deg * 100.0;
    let out = deg + minutes / 60.0;
    if negative {
        -out
    } else {
        out
    }
}

fn verify_checksum(s: &str) -> bool {
    if let Some((content, check_str)) = s.split_once('*') {
        let content = content.strip_prefix('$').unwrap_or(content);
        let mut calc = 0u8;
        for b in content.bytes() {
            calc ^= b;
        }
        if let Ok(val) = u8::from_str_radix(check_str, 16) {
            return calc == val;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(body: &str) -> std::string::String {
        let crc = body.bytes().fold(0u8, |acc, b| acc ^ b);
        std::format!("${body}*{crc:02X}\r\n")
    }

    fn feed(parser: &mut NmeaParser, body: &str) {
        parser.push_data(sentence(body).as_bytes());
    }

    #[test]
    fn gga_position_and_quality() {
        let mut parser = NmeaParser::new();
        // Canonical example sentence; checksum verified as-is.
        parser.push_data(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n");
        assert!(parser.take_fix_update());
        let d = &parser.data;
        assert!(d.has_fix);
        assert_eq!(d.sats_in_use, 8);
        assert!((d.fix.lat - 48.1173).abs() < 1e-4);
        assert!((d.fix.lon - 11.5166).abs() < 1e-3);
        assert!((d.fix.alt_m - 545.4).abs() < 1e-3);
        assert!((d.fix.hdop - 0.9).abs() < 1e-6);
    }

    #[test]
    fn southern_western_hemispheres_negate() {
        let mut parser = NmeaParser::new();
        feed(&mut parser, "GPGGA,123519,3345.000,S,15112.000,W,1,05,1.1,10.0,M,,M,,");
        assert!(parser.data.fix.lat < 0.0);
        assert!(parser.data.fix.lon < 0.0);
    }

    #[test]
    fn rmc_speed_course_and_date() {
        let mut parser = NmeaParser::new();
        feed(&mut parser, "GPRMC,172814,A,4807.038,N,01131.000,E,10.0,084.4,230324,003.1,W");
        let d = &parser.data;
        assert!((d.fix.speed_ms - 10.0 * 0.514_444).abs() < 1e-4);
        assert!((d.fix.heading_deg - 84.4).abs() < 1e-3);
        assert_eq!(d.date, Some((2024, 3, 23)));
        assert_eq!(d.time, Some((17, 28, 14)));
        let epoch = d.epoch_seconds().unwrap();
        assert_eq!(epoch, 1_711_214_894); // 2024-03-23T17:28:14Z
    }

    #[test]
    fn gsa_sets_fix_dimension() {
        let mut parser = NmeaParser::new();
        feed(&mut parser, "GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1");
        assert_eq!(parser.data.fix_type, FixType::Fix3d);
        assert!((parser.data.fix.hdop - 1.3).abs() < 1e-6);
        feed(&mut parser, "GPGSA,A,1,,,,,,,,,,,,,99.9,99.9,99.9");
        assert_eq!(parser.data.fix_type, FixType::NoFix);
    }

    #[test]
    fn gsv_group_commits_on_last_message() {
        let mut parser = NmeaParser::new();
        feed(&mut parser, "GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45");
        assert!(!parser.take_sats_update());
        feed(&mut parser, "GPGSV,2,2,08,16,20,342,41,19,23,321,42,22,59,100,51,24,82,203,48");
        assert!(parser.take_sats_update());
        assert_eq!(parser.data.sats.len(), 8);
        assert_eq!(parser.data.sats[0].prn, 1);
        assert_eq!(parser.data.sats[0].elevation_deg, 40);
        assert_eq!(parser.data.sats[0].azimuth_deg, 83);
        assert_eq!(parser.data.sats[0].snr_db, 46);
        assert_eq!(parser.data.sats[7].prn, 24);
    }

    #[test]
    fn untracked_satellite_has_empty_snr() {
        let mut parser = NmeaParser::new();
        feed(&mut parser, "GPGSV,1,1,02,03,12,100,,07,45,200,33");
        assert!(parser.take_sats_update());
        assert_eq!(parser.data.sats[0].snr_db, -1);
        assert_eq!(parser.data.sats[1].snr_db, 33);
    }

    #[test]
    fn bad_checksum_is_ignored() {
        let mut parser = NmeaParser::new();
        parser.push_data(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00\r\n");
        assert!(!parser.take_fix_update());
        assert!(!parser.data.has_fix);
    }

    #[test]
    fn invalid_gps_dates_are_rejected() {
        assert!(gps_date_valid(2024, 3, 23));
        assert!(!gps_date_valid(1999, 3, 23));
        assert!(!gps_date_valid(2024, 0, 23));
        assert!(!gps_date_valid(2024, 13, 1));
        assert!(!gps_date_valid(2024, 3, 0));
        assert!(!gps_date_valid(2024, 3, 32));
    }
}
