//! Sample types carried through the acquisition → storage pipeline.
//!
//! All types are `Copy` so they can cross the ring and the snapshot channels
//! without borrowing.

use micromath::F32Ext;

/// Most satellites a single snapshot keeps. GSV rarely reports more than
/// 16 usable birds on a single constellation receiver.
pub const MAX_SATS: usize = 16;

// ── Vectors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean magnitude. For accel samples this is total g-force.
    pub fn magnitude(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

// ── GPS ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixType {
    #[default]
    NoFix,
    Fix2d,
    Fix3d,
}

impl FixType {
    /// Label used on the telemetry link.
    pub fn label(self) -> &'static str {
        match self {
            FixType::NoFix => "No Fix",
            FixType::Fix2d => "2D",
            FixType::Fix3d => "3D",
        }
    }
}

/// A position solution. Units: degrees, meters, m/s, degrees true.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
    pub speed_ms: f32,
    pub heading_deg: f32,
    pub hdop: f32,
}

/// One satellite as reported by GSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SatInfo {
    pub prn: u8,
    pub elevation_deg: i8,
    pub azimuth_deg: u16,
    /// dB-Hz; -1 when the receiver is not tracking the bird.
    pub snr_db: i8,
}

/// Fixed-capacity satellite snapshot (`Copy`, unlike a heapless Vec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatSnapshot {
    pub count: u8,
    pub sats: [SatInfo; MAX_SATS],
}

impl Default for SatSnapshot {
    fn default() -> Self {
        Self { count: 0, sats: [SatInfo::default(); MAX_SATS] }
    }
}

impl SatSnapshot {
    pub fn from_slice(sats: &[SatInfo]) -> Self {
        let mut snap = Self::default();
        for sat in sats.iter().take(MAX_SATS) {
            snap.sats[snap.count as usize] = *sat;
            snap.count += 1;
        }
        snap
    }

    pub fn as_slice(&self) -> &[SatInfo] {
        &self.sats[..self.count as usize]
    }
}

// ── The sample union ──────────────────────────────────────────────────────────

/// Payload variants. Accel, GPS fix and satellite snapshots are persisted to
/// the OPL container; gyro and mag feed the telemetry link only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplePayload {
    /// g per axis
    Accel(Vec3),
    /// degrees/second per axis
    Gyro(Vec3),
    /// microtesla per axis
    Mag(Vec3),
    GpsFix(GpsFix),
    GpsSats(SatSnapshot),
}

/// One timestamped sample. `ts_us` is the monotonic µs counter, not wallclock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ts_us: u64,
    pub payload: SamplePayload,
}

impl Sample {
    pub const fn accel(ts_us: u64, g: Vec3) -> Self {
        Self { ts_us, payload: SamplePayload::Accel(g) }
    }

    pub const fn gps_fix(ts_us: u64, fix: GpsFix) -> Self {
        Self { ts_us, payload: SamplePayload::GpsFix(fix) }
    }

    pub fn gps_sats(ts_us: u64, sats: &[SatInfo]) -> Self {
        Self { ts_us, payload: SamplePayload::GpsSats(SatSnapshot::from_slice(sats)) }
    }

    /// True for payloads the overflow policy is allowed to sacrifice.
    /// Position fixes are parked and retried instead of dropped.
    pub fn droppable(&self) -> bool {
        !matches!(self.payload, SamplePayload::GpsFix(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_of_unit_gravity() {
        let g = Vec3::new(0.0, 0.0, 1.0);
        assert!((g.magnitude() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_truncates_to_capacity() {
        let many = [SatInfo { prn: 7, elevation_deg: 10, azimuth_deg: 90, snr_db: 30 }; 32];
        let snap = SatSnapshot::from_slice(&many);
        assert_eq!(snap.count as usize, MAX_SATS);
        assert_eq!(snap.as_slice().len(), MAX_SATS);
    }
}
