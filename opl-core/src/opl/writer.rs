//! Session writer: owns the current data block, decides when it flushes,
//! and drives a storage sink.
//!
//! All timing comes in through `now_us` parameters so the writer is clock-
//! agnostic; the storage task feeds it the monotonic µs counter.

use heapless::Vec;

use crate::sample::{Sample, SamplePayload};
use crate::sensors::registry::HardwareItem;

use super::encode::{self, DataHeader, SessionInfo};
use super::{
    EncodeError, FlushFlags, SessionId, MAX_BLOCK_LEN, MAX_PAYLOAD,
};

/// Storage abstraction the writer appends finished blocks to. The firmware
/// implements it on an open SD file; tests use a RAM buffer.
pub trait BlockSink {
    type Error;

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Durability point. Called after every block so a crash loses at most
    /// the open block.
    fn sync(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    /// TIME trigger interval.
    pub interval_us: u64,
    /// EVENT trigger: total-g threshold.
    pub event_threshold_g: f32,
    /// Minimum spacing between EVENT flushes.
    pub event_rate_limit_us: u64,
    /// Payload capacity of one block, at most [`MAX_PAYLOAD`].
    pub max_payload: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            interval_us: 300_000_000,
            event_threshold_g: 3.0,
            event_rate_limit_us: 1_000_000,
            max_payload: MAX_PAYLOAD,
        }
    }
}

impl FlushPolicy {
    fn capacity(&self) -> usize {
        self.max_payload.min(MAX_PAYLOAD)
    }

    fn size_watermark(&self) -> usize {
        self.capacity() * 9 / 10
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriterState {
    Idle,
    Collecting,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteError<E> {
    /// Operation is not legal in the current state.
    WrongState,
    /// The record can never fit a block payload.
    SampleTooLarge,
    Encode(EncodeError),
    Storage(E),
}

impl<E> From<EncodeError> for WriteError<E> {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

struct OpenBlock {
    payload: Vec<u8, MAX_PAYLOAD>,
    ts_start_us: u64,
    ts_end_us: u64,
    sample_count: u16,
}

impl OpenBlock {
    fn new() -> Self {
        Self { payload: Vec::new(), ts_start_us: 0, ts_end_us: 0, sample_count: 0 }
    }

    fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

struct ActiveSession {
    id: SessionId,
    sequence: u32,
    last_flush_us: u64,
    last_event_flush_us: Option<u64>,
    block: OpenBlock,
}

pub struct OplWriter<S: BlockSink> {
    sink: S,
    policy: FlushPolicy,
    state: WriterState,
    session: Option<ActiveSession>,
    scratch: Vec<u8, MAX_BLOCK_LEN>,
    blocks_written: u32,
    bytes_written: u64,
    discarded: u32,
}

impl<S: BlockSink> OplWriter<S> {
    pub fn new(sink: S, policy: FlushPolicy) -> Self {
        Self {
            sink,
            policy,
            state: WriterState::Idle,
            session: None,
            scratch: Vec::new(),
            blocks_written: 0,
            bytes_written: 0,
            discarded: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn blocks_written(&self) -> u32 {
        self.blocks_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Samples dropped because the session was `Faulted` when they arrived.
    pub fn samples_discarded(&self) -> u32 {
        self.discarded
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Runtime adjustment of the event threshold (the one policy knob that
    /// is operator-tunable mid-run).
    pub fn set_event_threshold(&mut self, threshold_g: f32) {
        self.policy.event_threshold_g = threshold_g;
    }

    /// Releases the sink on the shutdown path.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Writes the session header (and the hardware block when any items were
    /// detected) and enters `Collecting`.
    pub fn start_session(
        &mut self,
        info: &SessionInfo<'_>,
        hw_items: &[HardwareItem],
        now_us: u64,
    ) -> Result<(), WriteError<S::Error>> {
        if self.state != WriterState::Idle {
            return Err(WriteError::WrongState);
        }

        self.scratch.clear();
        encode::session_header(&mut self.scratch, info)?;
        self.write_scratch()?;

        if !hw_items.is_empty() {
            self.scratch.clear();
            encode::hardware_config(&mut self.scratch, hw_items)?;
            self.write_scratch()?;
        }

        self.sink.sync().map_err(|e| self.fault(e))?;

        self.session = Some(ActiveSession {
            id: info.id,
            sequence: 0,
            last_flush_us: now_us,
            last_event_flush_us: None,
            block: OpenBlock::new(),
        });
        self.state = WriterState::Collecting;
        Ok(())
    }

    /// Appends one sample to the open block, flushing on the SIZE and EVENT
    /// triggers. Returns whether the sample was persisted: telemetry-only
    /// payloads report `Ok(false)`, as does any push while not `Collecting`
    /// (a faulted session discards silently per the failure policy).
    pub fn push_sample(
        &mut self,
        sample: &Sample,
        now_us: u64,
    ) -> Result<bool, WriteError<S::Error>> {
        if self.state != WriterState::Collecting {
            if self.state == WriterState::Faulted {
                self.discarded += 1;
            }
            return Ok(false);
        }
        let Some(record_len) = encode::sample_record_len(&sample.payload) else {
            return Ok(false);
        };
        if record_len > self.policy.capacity() {
            return Err(WriteError::SampleTooLarge);
        }

        // Roll over when the record does not fit the space left.
        let remaining = {
            let session = self.session.as_ref().ok_or(WriteError::WrongState)?;
            self.policy.capacity() - session.block.payload.len()
        };
        if record_len > remaining {
            self.flush_block(FlushFlags::SIZE, now_us)?;
        }

        let session = self.session.as_mut().ok_or(WriteError::WrongState)?;
        if session.block.is_empty() {
            session.block.ts_start_us = sample.ts_us;
        }
        let written = encode::sample_record(
            &mut session.block.payload,
            sample,
            session.block.ts_start_us,
        )?;
        if !written {
            return Ok(false);
        }
        session.block.ts_end_us = sample.ts_us;
        session.block.sample_count += 1;

        // EVENT and SIZE are evaluated together: one sample can trip both
        // and the flushed block records every cause. The triggering accel
        // sample is the last record of the flushed block.
        let mut cause = FlushFlags::empty();
        if let SamplePayload::Accel(g) = sample.payload {
            if g.magnitude() >= self.policy.event_threshold_g {
                let armed = match session.last_event_flush_us {
                    None => true,
                    Some(last) => now_us.saturating_sub(last) >= self.policy.event_rate_limit_us,
                };
                if armed {
                    cause.set(FlushFlags::EVENT);
                }
            }
        }
        if session.block.payload.len() >= self.policy.size_watermark() {
            cause.set(FlushFlags::SIZE);
        }

        if cause.0 != 0 {
            self.flush_block(cause.0, now_us)?;
            if cause.contains(FlushFlags::EVENT) {
                if let Some(session) = self.session.as_mut() {
                    session.last_event_flush_us = Some(now_us);
                }
            }
        }
        Ok(true)
    }

    /// TIME trigger; the storage task calls this at 1 Hz. An empty block just
    /// restarts the interval, no empty blocks are written.
    pub fn poll_time_flush(&mut self, now_us: u64) -> Result<(), WriteError<S::Error>> {
        if self.state != WriterState::Collecting {
            return Ok(());
        }
        let session = self.session.as_mut().ok_or(WriteError::WrongState)?;
        if now_us.saturating_sub(session.last_flush_us) < self.policy.interval_us {
            return Ok(());
        }
        if session.block.is_empty() {
            session.last_flush_us = now_us;
            return Ok(());
        }
        self.flush_block(FlushFlags::TIME, now_us)
    }

    /// Flushes the open block (no cause bits) and writes the end marker.
    /// From `Faulted` the close is best-effort: the end block is attempted
    /// and errors are swallowed.
    pub fn stop_session(&mut self, now_us: u64) -> Result<(), WriteError<S::Error>> {
        match self.state {
            WriterState::Idle => Err(WriteError::WrongState),
            WriterState::Collecting => {
                let session = self.session.as_ref().ok_or(WriteError::WrongState)?;
                let id = session.id;
                if !session.block.is_empty() {
                    self.flush_block(0, now_us)?;
                }
                self.scratch.clear();
                encode::session_end(&mut self.scratch, id)?;
                self.write_scratch()?;
                self.sink.sync().map_err(|e| self.fault(e))?;
                self.session = None;
                self.state = WriterState::Idle;
                Ok(())
            }
            WriterState::Faulted => {
                if let Some(session) = self.session.take() {
                    self.scratch.clear();
                    if encode::session_end(&mut self.scratch, session.id).is_ok() {
                        let _ = self.sink.append(&self.scratch);
                        let _ = self.sink.sync();
                    }
                }
                self.state = WriterState::Idle;
                Ok(())
            }
        }
    }

    fn fault(&mut self, err: S::Error) -> WriteError<S::Error> {
        self.state = WriterState::Faulted;
        WriteError::Storage(err)
    }

    fn write_scratch(&mut self) -> Result<(), WriteError<S::Error>> {
        let len = self.scratch.len();
        match self.sink.append(&self.scratch) {
            Ok(()) => {
                self.bytes_written += len as u64;
                Ok(())
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Assembles and appends the open block. On storage failure the payload
    /// is retained in memory and the writer faults.
    fn flush_block(&mut self, cause: u8, now_us: u64) -> Result<(), WriteError<S::Error>> {
        let session = self.session.as_mut().ok_or(WriteError::WrongState)?;
        if session.block.is_empty() {
            return Ok(());
        }

        let mut flags = FlushFlags::empty();
        flags.set(cause);

        let header = DataHeader {
            id: session.id,
            sequence: session.sequence,
            ts_start_us: session.block.ts_start_us,
            ts_end_us: session.block.ts_end_us,
            flush_flags: flags.0,
            sample_count: session.block.sample_count,
            data_size: session.block.payload.len() as u16,
        };
        self.scratch.clear();
        encode::data_header(&mut self.scratch, &header)?;
        self.scratch
            .extend_from_slice(&session.block.payload)
            .map_err(|_| WriteError::Encode(EncodeError::Overflow))?;
        encode::finish_block(&mut self.scratch)?;

        self.write_scratch()?;
        self.sink.sync().map_err(|e| self.fault(e))?;

        let session = self.session.as_mut().ok_or(WriteError::WrongState)?;
        session.block = OpenBlock::new();
        session.sequence += 1;
        session.last_flush_us = now_us;
        self.blocks_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::decode::{Block, BlockIter, SampleBody};
    use crate::opl::{SessionMetadata, Weather};
    use crate::sample::Vec3;

    pub(crate) struct MemSink {
        pub data: std::vec::Vec<u8>,
        pub syncs: usize,
        pub fail_appends: bool,
    }

    impl MemSink {
        pub(crate) fn new() -> Self {
            Self { data: std::vec::Vec::new(), syncs: 0, fail_appends: false }
        }
    }

    impl BlockSink for MemSink {
        type Error = ();

        fn append(&mut self, bytes: &[u8]) -> Result<(), ()> {
            if self.fail_appends {
                return Err(());
            }
            self.data.extend_from_slice(bytes);
            Ok(())
        }

        fn sync(&mut self) -> Result<(), ()> {
            self.syncs += 1;
            Ok(())
        }
    }

    fn meta() -> SessionMetadata {
        SessionMetadata::new("Track Day", "John", "Ciara", Weather::Clear, 18.5)
    }

    fn start(writer: &mut OplWriter<MemSink>) -> SessionId {
        let meta = meta();
        let id = SessionId::derive(1_000_000, 7);
        let info = SessionInfo { meta: &meta, id, start_wall_us: 1_000_000, hw_version: (2, 0) };
        writer.start_session(&info, &[], 0).unwrap();
        id
    }

    #[test]
    fn ten_samples_then_stop() {
        let mut writer = OplWriter::new(MemSink::new(), FlushPolicy::default());
        let id = start(&mut writer);
        for i in 0..10u64 {
            let s = Sample::accel(i * 10_000, Vec3::new(0.0, 0.0, 1.0));
            assert!(writer.push_sample(&s, i * 10_000).unwrap());
        }
        writer.stop_session(100_000).unwrap();
        assert_eq!(writer.state(), WriterState::Idle);

        let sink_data = writer.into_sink().data;
        let blocks: std::vec::Vec<_> = BlockIter::new(&sink_data).collect();
        assert_eq!(blocks.len(), 3);
        assert!(matches!(blocks[0], Block::SessionHeader(_)));
        match &blocks[1] {
            Block::Data(d) => {
                assert_eq!(d.sample_count, 10);
                assert_eq!(d.sequence, 0);
                assert_eq!(d.flush_flags.0, 0);
                assert_eq!(d.samples().count(), 10);
                assert_eq!(d.ts_start_us, 0);
                assert_eq!(d.ts_end_us, 90_000);
            }
            other => panic!("expected data block, got {other:?}"),
        }
        assert_eq!(blocks[2], Block::SessionEnd { id });
    }

    #[test]
    fn event_flush_is_rate_limited() {
        let mut writer = OplWriter::new(MemSink::new(), FlushPolicy::default());
        start(&mut writer);

        let quiet = Vec3::new(0.0, 0.0, 1.0);
        let spike = Vec3::new(3.5, 0.1, 0.1);
        let mut now = 0u64;
        for _ in 0..50 {
            now += 10_000;
            writer.push_sample(&Sample::accel(now, quiet), now).unwrap();
        }
        now += 10_000;
        writer.push_sample(&Sample::accel(now, spike), now).unwrap();
        assert_eq!(writer.blocks_written(), 1);

        // A second spike 0.3 s later stays inside the rate limit.
        now += 300_000;
        writer.push_sample(&Sample::accel(now, spike), now).unwrap();
        assert_eq!(writer.blocks_written(), 1);

        writer.stop_session(now).unwrap();
        let sink_data = writer.into_sink().data;
        let mut data_blocks = BlockIter::new(&sink_data).filter_map(|b| match b {
            Block::Data(d) => Some(d),
            _ => None,
        });

        let event_block = data_blocks.next().unwrap();
        assert!(event_block.flush_flags.contains(FlushFlags::EVENT));
        assert_eq!(event_block.sample_count, 51);
        // The triggering sample closes the block.
        let last = event_block.samples().last().unwrap().unwrap();
        match last.body {
            SampleBody::Accel(g) => assert!(g.magnitude() >= 3.0),
            other => panic!("expected accel, got {other:?}"),
        }

        // The rate-limited spike rides in the final block with no EVENT bit.
        let tail_block = data_blocks.next().unwrap();
        assert_eq!(tail_block.flush_flags.0, 0);
        assert_eq!(tail_block.sample_count, 1);
    }

    #[test]
    fn size_flush_and_contiguous_sequences() {
        let mut writer = OplWriter::new(MemSink::new(), FlushPolicy::default());
        start(&mut writer);
        // 1000 accel records at 16 B = 16000 B; the watermark is 3686 B, so
        // several SIZE blocks come out.
        for i in 0..1000u64 {
            let s = Sample::accel(i * 10_000, Vec3::new(0.0, 1.0, 0.0));
            writer.push_sample(&s, i * 10_000).unwrap();
        }
        writer.stop_session(10_000_000).unwrap();

        let sink_data = writer.into_sink().data;
        let mut total = 0usize;
        let mut expected_seq = 0u32;
        for block in BlockIter::new(&sink_data) {
            if let Block::Data(d) = block {
                assert_eq!(d.sequence, expected_seq);
                expected_seq += 1;
                total += d.sample_count as usize;
                let mut last_offset = 0u16;
                for rec in d.samples() {
                    let rec = rec.unwrap();
                    assert!(rec.offset_ms >= last_offset);
                    last_offset = rec.offset_ms;
                }
            }
        }
        assert_eq!(total, 1000);
        assert!(expected_seq > 1);
    }

    #[test]
    fn coincident_event_and_size_record_both_causes() {
        // 160 B payload cap puts the watermark at 144 B = 9 accel records.
        let policy = FlushPolicy { max_payload: 160, ..FlushPolicy::default() };
        let mut writer = OplWriter::new(MemSink::new(), policy);
        start(&mut writer);

        let mut now = 0u64;
        for _ in 0..8 {
            now += 10_000;
            writer
                .push_sample(&Sample::accel(now, Vec3::new(0.0, 0.0, 1.0)), now)
                .unwrap();
        }
        assert_eq!(writer.blocks_written(), 0);

        // The ninth sample crosses the watermark and the g threshold at once.
        now += 10_000;
        writer
            .push_sample(&Sample::accel(now, Vec3::new(3.5, 0.1, 0.1)), now)
            .unwrap();
        assert_eq!(writer.blocks_written(), 1);

        writer.stop_session(now).unwrap();
        let sink_data = writer.into_sink().data;
        let block = BlockIter::new(&sink_data)
            .find_map(|b| match b {
                Block::Data(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert!(block.flush_flags.contains(FlushFlags::EVENT));
        assert!(block.flush_flags.contains(FlushFlags::SIZE));
        assert_eq!(block.sample_count, 9);
    }

    #[test]
    fn time_flush_only_after_interval() {
        let policy = FlushPolicy { interval_us: 300_000_000, ..FlushPolicy::default() };
        let mut writer = OplWriter::new(MemSink::new(), policy);
        start(&mut writer);
        writer.push_sample(&Sample::accel(0, Vec3::new(0.0, 0.0, 1.0)), 0).unwrap();

        writer.poll_time_flush(299_000_000).unwrap();
        assert_eq!(writer.blocks_written(), 0);
        writer.poll_time_flush(300_000_001).unwrap();
        assert_eq!(writer.blocks_written(), 1);

        writer.stop_session(300_100_000).unwrap();
        let sink_data = writer.into_sink().data;
        let time_block = BlockIter::new(&sink_data)
            .find_map(|b| match b {
                Block::Data(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert!(time_block.flush_flags.contains(FlushFlags::TIME));
    }

    #[test]
    fn storage_failure_faults_and_discards_silently() {
        let mut writer = OplWriter::new(MemSink::new(), FlushPolicy::default());
        start(&mut writer);
        writer.push_sample(&Sample::accel(0, Vec3::new(0.0, 0.0, 1.0)), 0).unwrap();

        writer.sink.fail_appends = true;
        let spike = Sample::accel(1_000, Vec3::new(5.0, 0.0, 0.0));
        assert!(matches!(
            writer.push_sample(&spike, 1_000),
            Err(WriteError::Storage(()))
        ));
        assert_eq!(writer.state(), WriterState::Faulted);

        // Later samples are discarded without error, but each one is counted
        // so the loss stays observable.
        assert_eq!(writer.samples_discarded(), 0);
        assert!(!writer.push_sample(&Sample::accel(2_000, Vec3::ZERO), 2_000).unwrap());
        assert!(!writer.push_sample(&Sample::accel(3_000, Vec3::ZERO), 3_000).unwrap());
        assert_eq!(writer.samples_discarded(), 2);

        // Best-effort close returns to Idle even though appends still fail.
        writer.stop_session(4_000).unwrap();
        assert_eq!(writer.state(), WriterState::Idle);
    }

    #[test]
    fn oversized_record_rejected_without_corrupting_block() {
        let policy = FlushPolicy { max_payload: 32, ..FlushPolicy::default() };
        let mut writer = OplWriter::new(MemSink::new(), policy);
        start(&mut writer);
        writer.push_sample(&Sample::accel(0, Vec3::new(0.0, 0.0, 1.0)), 0).unwrap();

        // A full satellite snapshot is 85 B, which can never fit a 32 B
        // payload cap.
        let sats = [crate::sample::SatInfo::default(); 16];
        let too_big = Sample::gps_sats(1_000, &sats);
        assert!(matches!(
            writer.push_sample(&too_big, 1_000),
            Err(WriteError::SampleTooLarge)
        ));

        // The open block is intact and flushes normally.
        writer.stop_session(2_000).unwrap();
        let sink_data = writer.into_sink().data;
        let data = BlockIter::new(&sink_data)
            .find_map(|b| match b {
                Block::Data(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(data.sample_count, 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut writer = OplWriter::new(MemSink::new(), FlushPolicy::default());
        start(&mut writer);
        let meta = meta();
        let info = SessionInfo {
            meta: &meta,
            id: SessionId::derive(2, 2),
            start_wall_us: 2,
            hw_version: (2, 0),
        };
        assert!(matches!(
            writer.start_session(&info, &[], 0),
            Err(WriteError::WrongState)
        ));
    }
}
