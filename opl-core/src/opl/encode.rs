//! Block and sample-record builders.
//!
//! Builders append to a caller-supplied `heapless::Vec` and never touch
//! storage; the writer owns assembly order and flushing.

use heapless::Vec;

use crate::sample::{Sample, SamplePayload};
use crate::sensors::registry::HardwareItem;

use super::{
    BlockType, EncodeError, SampleType, SessionId, SessionMetadata, FORMAT_MAJOR, FORMAT_MINOR,
    MAGIC,
};

/// Everything the session header block carries.
pub struct SessionInfo<'a> {
    pub meta: &'a SessionMetadata,
    pub id: SessionId,
    /// µs since the Unix epoch at session start.
    pub start_wall_us: u64,
    pub hw_version: (u8, u8),
}

fn put<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<(), EncodeError> {
    buf.extend_from_slice(bytes).map_err(|_| EncodeError::Overflow)
}

fn put_u8<const N: usize>(buf: &mut Vec<u8, N>, v: u8) -> Result<(), EncodeError> {
    buf.push(v).map_err(|_| EncodeError::Overflow)
}

fn put_str<const N: usize>(buf: &mut Vec<u8, N>, s: &str) -> Result<(), EncodeError> {
    put_u8(buf, s.len() as u8)?;
    put(buf, s.as_bytes())
}

/// Starts a block: magic then type byte.
pub fn begin_block<const N: usize>(
    buf: &mut Vec<u8, N>,
    block_type: BlockType,
) -> Result<(), EncodeError> {
    put(buf, &MAGIC)?;
    put_u8(buf, block_type as u8)
}

/// Terminates a block with the CRC32 of everything appended so far.
pub fn finish_block<const N: usize>(buf: &mut Vec<u8, N>) -> Result<(), EncodeError> {
    let crc = crc32fast::hash(buf.as_slice());
    put(buf, &crc.to_le_bytes())
}

/// Session header block (type 0x01), complete with CRC.
pub fn session_header<const N: usize>(
    buf: &mut Vec<u8, N>,
    info: &SessionInfo<'_>,
) -> Result<(), EncodeError> {
    begin_block(buf, BlockType::SessionHeader)?;
    put(buf, &[FORMAT_MAJOR, FORMAT_MINOR, info.hw_version.0, info.hw_version.1])?;
    put(buf, &info.start_wall_us.to_le_bytes())?;
    put(buf, &info.id.hi.to_le_bytes())?;
    put(buf, &info.id.lo.to_le_bytes())?;
    put_str(buf, info.meta.name.as_str())?;
    put_str(buf, info.meta.driver.as_str())?;
    put_str(buf, info.meta.vehicle.as_str())?;
    put_u8(buf, info.meta.weather as u8)?;
    put(buf, &info.meta.ambient_temp_dc.to_le_bytes())?;
    put(buf, &info.meta.config_crc.to_le_bytes())?;
    finish_block(buf)
}

/// Hardware config block (type 0x04), complete with CRC.
pub fn hardware_config<const N: usize>(
    buf: &mut Vec<u8, N>,
    items: &[HardwareItem],
) -> Result<(), EncodeError> {
    begin_block(buf, BlockType::HardwareConfig)?;
    put_u8(buf, items.len() as u8)?;
    for item in items {
        put_u8(buf, item.hw_type as u8)?;
        put_u8(buf, item.conn as u8)?;
        put_str(buf, item.identifier.as_str())?;
    }
    finish_block(buf)
}

/// Session end block (type 0x03), complete with CRC.
pub fn session_end<const N: usize>(
    buf: &mut Vec<u8, N>,
    id: SessionId,
) -> Result<(), EncodeError> {
    begin_block(buf, BlockType::SessionEnd)?;
    put(buf, &id.to_bytes())?;
    finish_block(buf)
}

/// Fields of a data block header, in wire order after magic and type.
pub struct DataHeader {
    pub id: SessionId,
    pub sequence: u32,
    pub ts_start_us: u64,
    pub ts_end_us: u64,
    pub flush_flags: u8,
    pub sample_count: u16,
    pub data_size: u16,
}

/// Data block header (type 0x02). The caller appends the payload bytes and
/// then `finish_block`.
pub fn data_header<const N: usize>(
    buf: &mut Vec<u8, N>,
    header: &DataHeader,
) -> Result<(), EncodeError> {
    begin_block(buf, BlockType::Data)?;
    put(buf, &header.id.to_bytes())?;
    put(buf, &header.sequence.to_le_bytes())?;
    put(buf, &header.ts_start_us.to_le_bytes())?;
    put(buf, &header.ts_end_us.to_le_bytes())?;
    put_u8(buf, header.flush_flags)?;
    put(buf, &header.sample_count.to_le_bytes())?;
    put(buf, &header.data_size.to_le_bytes())
}

// ── Sample records ────────────────────────────────────────────────────────────

/// Encoded length of the record a payload produces, header bytes included.
/// `None` for telemetry-only payloads (gyro, mag) that have no wire form.
pub fn sample_record_len(payload: &SamplePayload) -> Option<usize> {
    // type + offset_ms + payload_len prefix = 4 bytes
    match payload {
        SamplePayload::Accel(_) => Some(4 + 12),
        SamplePayload::GpsFix(_) => Some(4 + 32),
        SamplePayload::GpsSats(snap) => Some(4 + 1 + 5 * snap.count as usize),
        SamplePayload::Gyro(_) | SamplePayload::Mag(_) => None,
    }
}

/// Millisecond offset of a sample into its block, saturating at the u16 cap.
pub fn offset_ms(ts_us: u64, block_start_us: u64) -> u16 {
    (ts_us.saturating_sub(block_start_us) / 1000).min(u16::MAX as u64) as u16
}

/// Appends one sample record. Telemetry-only payloads are skipped and
/// report `Ok(false)`.
pub fn sample_record<const N: usize>(
    buf: &mut Vec<u8, N>,
    sample: &Sample,
    block_start_us: u64,
) -> Result<bool, EncodeError> {
    let offset = offset_ms(sample.ts_us, block_start_us);
    match &sample.payload {
        SamplePayload::Accel(g) => {
            put_u8(buf, SampleType::Accel as u8)?;
            put(buf, &offset.to_le_bytes())?;
            put_u8(buf, 12)?;
            put(buf, &g.x.to_le_bytes())?;
            put(buf, &g.y.to_le_bytes())?;
            put(buf, &g.z.to_le_bytes())?;
            Ok(true)
        }
        SamplePayload::GpsFix(fix) => {
            put_u8(buf, SampleType::GpsFix as u8)?;
            put(buf, &offset.to_le_bytes())?;
            put_u8(buf, 32)?;
            put(buf, &fix.lat.to_le_bytes())?;
            put(buf, &fix.lon.to_le_bytes())?;
            put(buf, &fix.alt_m.to_le_bytes())?;
            put(buf, &fix.speed_ms.to_le_bytes())?;
            put(buf, &fix.heading_deg.to_le_bytes())?;
            put(buf, &fix.hdop.to_le_bytes())?;
            Ok(true)
        }
        SamplePayload::GpsSats(snap) => {
            put_u8(buf, SampleType::GpsSatSnapshot as u8)?;
            put(buf, &offset.to_le_bytes())?;
            put_u8(buf, 1 + 5 * snap.count)?;
            put_u8(buf, snap.count)?;
            for sat in snap.as_slice() {
                put_u8(buf, sat.prn)?;
                put(buf, &sat.elevation_deg.to_le_bytes())?;
                put(buf, &sat.azimuth_deg.to_le_bytes())?;
                put(buf, &sat.snr_db.to_le_bytes())?;
            }
            Ok(true)
        }
        SamplePayload::Gyro(_) | SamplePayload::Mag(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Vec3;

    #[test]
    fn accel_record_is_sixteen_bytes() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let s = Sample::accel(2_000, Vec3::new(0.0, 0.0, 1.0));
        assert!(sample_record(&mut buf, &s, 0).unwrap());
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[0], SampleType::Accel as u8);
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 2);
        assert_eq!(buf[3], 12);
    }

    #[test]
    fn offset_saturates_past_65_seconds() {
        assert_eq!(offset_ms(70_000_000, 0), 0xFFFF);
        assert_eq!(offset_ms(65_535_000, 0), 0xFFFF);
        assert_eq!(offset_ms(65_534_999, 0), 0xFFFE);
        // A sample stamped before its block start clamps to zero rather than
        // wrapping.
        assert_eq!(offset_ms(5, 10), 0);
    }

    #[test]
    fn gyro_has_no_wire_form() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let s = Sample { ts_us: 0, payload: SamplePayload::Gyro(Vec3::ZERO) };
        assert!(!sample_record(&mut buf, &s, 0).unwrap());
        assert!(buf.is_empty());
        assert_eq!(sample_record_len(&s.payload), None);
    }

    #[test]
    fn block_crc_matches_reference_vector() {
        // CRC32("123456789") = 0xCBF43926 for the IEEE reflected polynomial.
        let mut buf: Vec<u8, 16> = Vec::new();
        buf.extend_from_slice(b"123456789").unwrap();
        finish_block(&mut buf).unwrap();
        assert_eq!(&buf[9..], &0xCBF4_3926u32.to_le_bytes());
    }
}
