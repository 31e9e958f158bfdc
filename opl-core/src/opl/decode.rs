//! OPL readers: block walking, CRC validation, sample-record walking.
//!
//! The host-side converters and the integrity tests both consume this; the
//! firmware itself never reads blocks back.

use crate::sample::{GpsFix, SatInfo, SatSnapshot, Vec3};
use crate::sensors::registry::{ConnType, HardwareItem, HwType};

use super::{BlockType, DecodeError, FlushFlags, SampleType, SessionId, Weather, MAGIC};

// ── Cursor ────────────────────────────────────────────────────────────────────

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        if end > self.data.len() {
            return Err(DecodeError::Truncated);
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn session_id(&mut self) -> Result<SessionId, DecodeError> {
        let b = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(b);
        Ok(SessionId::from_bytes(&raw))
    }

    fn str_prefixed(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes).map_err(|_| DecodeError::BadPayloadLength)
    }
}

// ── Blocks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SessionHeaderBlock<'a> {
    pub format_version: (u8, u8),
    pub hw_version: (u8, u8),
    pub start_wall_us: u64,
    pub id: SessionId,
    pub name: &'a str,
    pub driver: &'a str,
    pub vehicle: &'a str,
    pub weather: Weather,
    pub ambient_temp_dc: i16,
    pub config_crc: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock<'a> {
    pub id: SessionId,
    pub sequence: u32,
    pub ts_start_us: u64,
    pub ts_end_us: u64,
    pub flush_flags: FlushFlags,
    pub sample_count: u16,
    pub payload: &'a [u8],
}

impl<'a> DataBlock<'a> {
    pub fn samples(&self) -> SampleIter<'a> {
        SampleIter { cursor: Cursor::new(self.payload) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block<'a> {
    SessionHeader(SessionHeaderBlock<'a>),
    Data(DataBlock<'a>),
    SessionEnd { id: SessionId },
    HardwareConfig(heapless::Vec<HardwareItem, 16>),
}

/// Parses exactly one block at the start of `data`, returning it and the
/// number of bytes it occupied (CRC included).
pub fn parse_block(data: &[u8]) -> Result<(Block<'_>, usize), DecodeError> {
    let mut cur = Cursor::new(data);
    if cur.take(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let type_byte = cur.u8()?;
    let block_type = BlockType::from_u8(type_byte).ok_or(DecodeError::UnknownBlockType(type_byte))?;

    let block = match block_type {
        BlockType::SessionHeader => {
            let fmt = (cur.u8()?, cur.u8()?);
            let hw = (cur.u8()?, cur.u8()?);
            let start_wall_us = cur.u64()?;
            let hi = cur.u64()?;
            let lo = cur.u64()?;
            let name = cur.str_prefixed()?;
            let driver = cur.str_prefixed()?;
            let vehicle = cur.str_prefixed()?;
            let weather = Weather::from_u8(cur.u8()?);
            let ambient_temp_dc = cur.i16()?;
            let config_crc = cur.u32()?;
            Block::SessionHeader(SessionHeaderBlock {
                format_version: fmt,
                hw_version: hw,
                start_wall_us,
                id: SessionId { hi, lo },
                name,
                driver,
                vehicle,
                weather,
                ambient_temp_dc,
                config_crc,
            })
        }
        BlockType::Data => {
            let id = cur.session_id()?;
            let sequence = cur.u32()?;
            let ts_start_us = cur.u64()?;
            let ts_end_us = cur.u64()?;
            let flush_flags = FlushFlags(cur.u8()?);
            let sample_count = cur.u16()?;
            let data_size = cur.u16()?;
            let payload = cur.take(data_size as usize)?;
            Block::Data(DataBlock {
                id,
                sequence,
                ts_start_us,
                ts_end_us,
                flush_flags,
                sample_count,
                payload,
            })
        }
        BlockType::SessionEnd => {
            let id = cur.session_id()?;
            Block::SessionEnd { id }
        }
        BlockType::HardwareConfig => {
            let count = cur.u8()?;
            let mut items = heapless::Vec::new();
            for _ in 0..count {
                let hw_type = HwType::from_u8(cur.u8()?).ok_or(DecodeError::BadPayloadLength)?;
                let conn = ConnType::from_u8(cur.u8()?).ok_or(DecodeError::BadPayloadLength)?;
                let ident = cur.str_prefixed()?;
                items
                    .push(HardwareItem::new(hw_type, conn, ident))
                    .map_err(|_| DecodeError::BadPayloadLength)?;
            }
            Block::HardwareConfig(items)
        }
    };

    let body_end = cur.pos;
    let stored_crc = cur.u32()?;
    let computed = crc32fast::hash(&data[..body_end]);
    if stored_crc != computed {
        return Err(DecodeError::CrcMismatch);
    }
    Ok((block, cur.pos))
}

/// Walks a byte stream, yielding every block that validates. Garbage between
/// blocks is skipped by scanning for the next magic; `valid_len()` reports
/// how far the clean prefix reached.
pub struct BlockIter<'a> {
    data: &'a [u8],
    pos: usize,
    valid_len: usize,
}

impl<'a> BlockIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, valid_len: 0 }
    }

    /// Bytes covered by blocks that parsed and CRC-checked, from the start of
    /// the stream to the end of the last good block.
    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    fn find_magic(&self, from: usize) -> Option<usize> {
        let data = self.data;
        (from..data.len().saturating_sub(3)).find(|&i| data[i..i + 4] == MAGIC)
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.find_magic(self.pos)?;
            match parse_block(&self.data[start..]) {
                Ok((block, consumed)) => {
                    self.pos = start + consumed;
                    self.valid_len = self.pos;
                    return Some(block);
                }
                Err(_) => {
                    // Resync one byte past this candidate magic.
                    self.pos = start + 1;
                }
            }
        }
    }
}

// ── Sample records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleBody {
    Accel(Vec3),
    GpsFix(GpsFix),
    Sats(SatSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub sample_type: SampleType,
    pub offset_ms: u16,
    pub body: SampleBody,
}

pub struct SampleIter<'a> {
    cursor: Cursor<'a>,
}

impl<'a> SampleIter<'a> {
    fn parse_one(&mut self) -> Result<SampleRecord, DecodeError> {
        let cur = &mut self.cursor;
        let type_byte = cur.u8()?;
        let sample_type =
            SampleType::from_u8(type_byte).ok_or(DecodeError::UnknownSampleType(type_byte))?;
        let offset_ms = cur.u16()?;
        let payload_len = cur.u8()?;
        let body = match sample_type {
            SampleType::Accel => {
                if payload_len != 12 {
                    return Err(DecodeError::BadPayloadLength);
                }
                SampleBody::Accel(Vec3::new(cur.f32()?, cur.f32()?, cur.f32()?))
            }
            SampleType::GpsFix => {
                if payload_len != 32 {
                    return Err(DecodeError::BadPayloadLength);
                }
                SampleBody::GpsFix(GpsFix {
                    lat: cur.f64()?,
                    lon: cur.f64()?,
                    alt_m: cur.f32()?,
                    speed_ms: cur.f32()?,
                    heading_deg: cur.f32()?,
                    hdop: cur.f32()?,
                })
            }
            SampleType::GpsSatSnapshot => {
                let count = cur.u8()?;
                if payload_len as usize != 1 + 5 * count as usize {
                    return Err(DecodeError::BadPayloadLength);
                }
                let mut snap = SatSnapshot::default();
                for i in 0..count {
                    let sat = SatInfo {
                        prn: cur.u8()?,
                        elevation_deg: cur.u8()? as i8,
                        azimuth_deg: cur.u16()?,
                        snr_db: cur.u8()? as i8,
                    };
                    // Snapshots wider than the in-memory cap keep the first
                    // MAX_SATS entries; the wire count is preserved above.
                    if (i as usize) < snap.sats.len() {
                        snap.sats[i as usize] = sat;
                        snap.count = i + 1;
                    }
                }
                SampleBody::Sats(snap)
            }
        };
        Ok(SampleRecord { sample_type, offset_ms, body })
    }
}

impl<'a> Iterator for SampleIter<'a> {
    type Item = Result<SampleRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.pos >= self.cursor.data.len() {
            return None;
        }
        Some(self.parse_one())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::encode;
    use crate::opl::SessionMetadata;

    fn header_bytes() -> heapless::Vec<u8, 256> {
        let meta = SessionMetadata::new("Track Day", "John", "Ciara", Weather::Clear, 18.5);
        let info = encode::SessionInfo {
            meta: &meta,
            id: SessionId::derive(1_700_000_000_000_000, 0xDEAD_BEEF),
            start_wall_us: 1_700_000_000_000_000,
            hw_version: (2, 1),
        };
        let mut buf = heapless::Vec::new();
        encode::session_header(&mut buf, &info).unwrap();
        buf
    }

    #[test]
    fn header_round_trips() {
        let buf = header_bytes();
        let (block, consumed) = parse_block(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        match block {
            Block::SessionHeader(h) => {
                assert_eq!(h.name, "Track Day");
                assert_eq!(h.driver, "John");
                assert_eq!(h.vehicle, "Ciara");
                assert_eq!(h.weather, Weather::Clear);
                assert_eq!(h.ambient_temp_dc, 185);
                assert_eq!(h.id.lo, 0xDEAD_BEEF);
            }
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn corrupt_byte_fails_crc() {
        let mut buf = header_bytes();
        buf[10] ^= 0x01;
        assert_eq!(parse_block(&buf).unwrap_err(), DecodeError::CrcMismatch);
    }

    #[test]
    fn iterator_resyncs_over_garbage() {
        let block = header_bytes();
        let mut stream: std::vec::Vec<u8> = std::vec::Vec::new();
        stream.extend_from_slice(b"noise");
        stream.extend_from_slice(&block);
        stream.extend_from_slice(b"OPNYtrailing garbage");
        let mut iter = BlockIter::new(&stream);
        assert!(matches!(iter.next(), Some(Block::SessionHeader(_))));
        assert!(iter.next().is_none());
        assert_eq!(iter.valid_len(), 5 + block.len());
    }

    #[test]
    fn end_block_round_trips() {
        let id = SessionId::derive(42, 43);
        let mut buf: heapless::Vec<u8, 32> = heapless::Vec::new();
        encode::session_end(&mut buf, id).unwrap();
        let (block, consumed) = parse_block(&buf).unwrap();
        assert_eq!(consumed, 25);
        assert_eq!(block, Block::SessionEnd { id });
    }
}
