//! Live telemetry: the snapshot the display and the WiFi link consume, and
//! its single-line JSON form.
//!
//! Telemetry is decoupled from logging on purpose: it reads the latest
//! snapshot and may run ahead of or behind the file by up to one period.

use core::fmt::{self, Write};

use crate::sample::{FixType, GpsFix, SatInfo, Vec3};

/// Single-pole IIR on each axis; the raw 100 Hz stream is too jumpy for a
/// dashboard gauge.
#[derive(Debug, Clone, Copy)]
pub struct GForceSmoother {
    alpha: f32,
    state: Vec3,
    primed: bool,
}

impl GForceSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: Vec3::ZERO, primed: false }
    }

    pub fn update(&mut self, raw: Vec3) -> Vec3 {
        if !self.primed {
            self.state = raw;
            self.primed = true;
            return raw;
        }
        self.state.x += self.alpha * (raw.x - self.state.x);
        self.state.y += self.alpha * (raw.y - self.state.y);
        self.state.z += self.alpha * (raw.z - self.state.z);
        self.state
    }

    pub fn value(&self) -> Vec3 {
        self.state
    }
}

/// Latest-wins view assembled by the telemetry task from its caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetrySnapshot {
    /// Wallclock seconds, once a time sync happened.
    pub epoch_s: Option<f64>,
    pub has_fix: bool,
    pub fix: GpsFix,
    pub fix_type: FixType,
    pub sats_in_use: u8,
    /// Smoothed, g.
    pub accel_g: Vec3,
    /// Present only when a gyro-capable IMU was detected.
    pub gyro_dps: Option<Vec3>,
}

struct JsonLine<'a, const N: usize> {
    out: &'a mut heapless::String<N>,
    first: bool,
}

impl<'a, const N: usize> JsonLine<'a, N> {
    fn new(out: &'a mut heapless::String<N>) -> Result<Self, fmt::Error> {
        out.push('{').map_err(|_| fmt::Error)?;
        Ok(Self { out, first: true })
    }

    fn key(&mut self, key: &str) -> fmt::Result {
        if !self.first {
            self.out.push(',').map_err(|_| fmt::Error)?;
        }
        self.first = false;
        write!(self.out, "\"{key}\":")
    }

    fn finish(self) -> fmt::Result {
        self.out.push('}').map_err(|_| fmt::Error)
    }
}

/// Writes the flat one-line JSON object. `sats` adds the periodic
/// `satellite_details` array. The result always fits one link line.
pub fn write_json<const N: usize>(
    out: &mut heapless::String<N>,
    snap: &TelemetrySnapshot,
    sats: Option<&[SatInfo]>,
) -> fmt::Result {
    let mut json = JsonLine::new(out)?;

    if let Some(epoch) = snap.epoch_s {
        json.key("timestamp")?;
        write!(json.out, "{epoch:.3}")?;
    }
    if snap.has_fix {
        json.key("lat")?;
        write!(json.out, "{:.6}", snap.fix.lat)?;
        json.key("lon")?;
        write!(json.out, "{:.6}", snap.fix.lon)?;
        json.key("alt")?;
        write!(json.out, "{:.1}", snap.fix.alt_m)?;
        json.key("speed")?;
        write!(json.out, "{:.2}", snap.fix.speed_ms)?;
        json.key("track")?;
        write!(json.out, "{:.1}", snap.fix.heading_deg)?;
        json.key("hdop")?;
        write!(json.out, "{:.1}", snap.fix.hdop)?;
    }
    json.key("satellites")?;
    write!(json.out, "{}", snap.sats_in_use)?;
    json.key("fix_type")?;
    write!(json.out, "\"{}\"", snap.fix_type.label())?;

    json.key("gx")?;
    write!(json.out, "{:.3}", snap.accel_g.x)?;
    json.key("gy")?;
    write!(json.out, "{:.3}", snap.accel_g.y)?;
    json.key("gz")?;
    write!(json.out, "{:.3}", snap.accel_g.z)?;

    if let Some(rot) = snap.gyro_dps {
        json.key("rx")?;
        write!(json.out, "{:.2}", rot.x)?;
        json.key("ry")?;
        write!(json.out, "{:.2}", rot.y)?;
        json.key("rz")?;
        write!(json.out, "{:.2}", rot.z)?;
    }

    if let Some(sats) = sats {
        json.key("satellite_details")?;
        json.out.push('[').map_err(|_| fmt::Error)?;
        for (i, sat) in sats.iter().enumerate() {
            if i > 0 {
                json.out.push(',').map_err(|_| fmt::Error)?;
            }
            write!(
                json.out,
                "{{\"prn\":{},\"elevation\":{},\"azimuth\":{},\"snr\":{}}}",
                sat.prn, sat.elevation_deg, sat.azimuth_deg, sat.snr_db
            )?;
        }
        json.out.push(']').map_err(|_| fmt::Error)?;
    }

    json.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_fix() -> TelemetrySnapshot {
        TelemetrySnapshot {
            epoch_s: Some(1_711_214_894.5),
            has_fix: true,
            fix: GpsFix {
                lat: 48.1173,
                lon: 11.5166,
                alt_m: 545.4,
                speed_ms: 12.3,
                heading_deg: 84.4,
                hdop: 0.9,
            },
            fix_type: FixType::Fix3d,
            sats_in_use: 8,
            accel_g: Vec3::new(0.012, -0.004, 1.002),
            gyro_dps: None,
        }
    }

    #[test]
    fn fix_line_has_canonical_keys() {
        let mut line: heapless::String<512> = heapless::String::new();
        write_json(&mut line, &snapshot_with_fix(), None).unwrap();
        let s = line.as_str();
        assert!(s.starts_with("{\"timestamp\":1711214894.500,"));
        assert!(s.contains("\"lat\":48.117300"));
        assert!(s.contains("\"lon\":11.516600"));
        assert!(s.contains("\"speed\":12.30"));
        assert!(s.contains("\"track\":84.4"));
        assert!(s.contains("\"satellites\":8"));
        assert!(s.contains("\"fix_type\":\"3D\""));
        assert!(s.contains("\"gz\":1.002"));
        assert!(!s.contains("rx"));
        assert!(s.ends_with('}'));
        assert!(!s.contains('\n'));
    }

    #[test]
    fn no_fix_omits_position() {
        let mut snap = snapshot_with_fix();
        snap.has_fix = false;
        snap.fix_type = FixType::NoFix;
        snap.epoch_s = None;
        let mut line: heapless::String<512> = heapless::String::new();
        write_json(&mut line, &snap, None).unwrap();
        let s = line.as_str();
        assert!(s.starts_with("{\"satellites\":"));
        assert!(!s.contains("\"lat\""));
        assert!(s.contains("\"fix_type\":\"No Fix\""));
    }

    #[test]
    fn satellite_details_array() {
        let sats = [
            SatInfo { prn: 1, elevation_deg: 40, azimuth_deg: 83, snr_db: 46 },
            SatInfo { prn: 22, elevation_deg: 59, azimuth_deg: 100, snr_db: -1 },
        ];
        let mut line: heapless::String<512> = heapless::String::new();
        write_json(&mut line, &snapshot_with_fix(), Some(&sats)).unwrap();
        assert!(line.as_str().contains(
            "\"satellite_details\":[{\"prn\":1,\"elevation\":40,\"azimuth\":83,\"snr\":46},"
        ));
        assert!(line.as_str().contains("{\"prn\":22,\"elevation\":59,\"azimuth\":100,\"snr\":-1}]"));
    }

    #[test]
    fn smoother_converges() {
        let mut smoother = GForceSmoother::new(0.2);
        assert_eq!(smoother.update(Vec3::new(1.0, 0.0, 0.0)).x, 1.0);
        for _ in 0..50 {
            smoother.update(Vec3::new(0.0, 0.0, 1.0));
        }
        assert!(smoother.value().x < 0.01);
        assert!((smoother.value().z - 1.0).abs() < 0.01);
    }
}
