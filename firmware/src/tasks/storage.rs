//! Storage task, pinned to core 1: drains the ring into the session file.
//!
//! Owns the SD card and the codec outright; the rest of the system talks to
//! it through the status cell (commands), the ring (samples) and the file
//! request channel (listings and downloads for the link task).

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Instant, Timer};
use rand_core::RngCore;

use opl_core::config::{AppConfig, LogFormat};
use opl_core::csv;
use opl_core::opl::encode::SessionInfo;
use opl_core::opl::writer::{BlockSink, OplWriter, WriteError, WriterState};
use opl_core::opl::{SessionId, SessionMetadata};
use opl_core::ring::SampleRing;
use opl_core::sample::{GpsFix, Sample, SamplePayload};
use opl_core::scheduler::{periods, Periodic};
use opl_core::sensors::registry::HardwareItem;
use opl_core::session::{session_file_name, MAX_SESSION_NUMBER};
use opl_core::status::{SessionCommand, SessionState, SessionStatus};

use crate::drivers::sdcard::{SdError, SdStorage, SessionEntry};
use crate::tasks::SharedMeta;

pub const RING_DEPTH: usize = 128;
pub type Ring = SampleRing<Sample, RING_DEPTH>;

pub type FileName = heapless::String<32>;

pub enum FileRequest {
    List,
    Read(FileName),
}

pub enum FileReply {
    List(heapless::Vec<SessionEntry, 16>),
    ReadBegin { size: u32 },
    Chunk(heapless::Vec<u8, 64>),
    ReadEnd,
    NotFound,
}

pub type FileReqChannel = Channel<CriticalSectionRawMutex, FileRequest, 1>;
pub type FileReplyChannel = Channel<CriticalSectionRawMutex, FileReply, 2>;

/// Writer-facing view of the open session file.
pub struct SessionSink<'a> {
    sd: &'a RefCell<SdStorage>,
    file: embedded_sdmmc::RawFile,
}

impl BlockSink for SessionSink<'_> {
    type Error = SdError;

    fn append(&mut self, bytes: &[u8]) -> Result<(), SdError> {
        self.sd.borrow_mut().append(self.file, bytes)
    }

    fn sync(&mut self) -> Result<(), SdError> {
        self.sd.borrow_mut().flush(self.file)
    }
}

/// Rolling join state for the CSV sheet.
#[derive(Default)]
struct CsvLatest {
    fix: GpsFix,
    sats: u8,
}

enum Recorder<'a> {
    Idle,
    Opl(OplWriter<SessionSink<'a>>),
    Csv { sink: SessionSink<'a>, latest: CsvLatest, discarded: u32 },
}

#[embassy_executor::task]
pub async fn storage_task(
    sd: Option<SdStorage>,
    ring: &'static Ring,
    status: &'static SessionStatus,
    meta: &'static SharedMeta,
    app: AppConfig,
    hw_items: heapless::Vec<HardwareItem, 8>,
    file_req: Receiver<'static, CriticalSectionRawMutex, FileRequest, 1>,
    file_reply: Sender<'static, CriticalSectionRawMutex, FileReply, 2>,
) {
    let Some(sd) = sd else {
        // No card: the session can never start. Samples drain to nowhere so
        // the ring does not sit full forever.
        defmt::error!("storage: no SD card, sessions disabled");
        status.set_state(SessionState::Faulted);
        loop {
            while ring.pop().is_some() {}
            crate::STORAGE_ALIVE.store(true, portable_atomic::Ordering::Relaxed);
            Timer::after_millis(100).await;
        }
    };

    let sd = RefCell::new(sd);
    let mut recorder = Recorder::Idle;
    let mut housekeeping = Periodic::new(periods::STATUS_LOG, Instant::now().as_micros());

    // A session starts as soon as the logger is up; the link can stop or
    // restart it later.
    start_session(&sd, &mut recorder, status, meta, &app, &hw_items);

    loop {
        crate::STORAGE_ALIVE.store(true, portable_atomic::Ordering::Relaxed);
        let now = Instant::now().as_micros();

        if status.shutdown_requested() {
            shutdown(&sd, &mut recorder, ring, status).await;
            break;
        }

        if let Some(command) = status.take_command() {
            match command {
                SessionCommand::Start => {
                    if matches!(recorder, Recorder::Idle) {
                        start_session(&sd, &mut recorder, status, meta, &app, &hw_items);
                    }
                }
                SessionCommand::Stop => stop_session(&sd, &mut recorder, status, now),
                SessionCommand::Restart => {
                    stop_session(&sd, &mut recorder, status, now);
                    start_session(&sd, &mut recorder, status, meta, &app, &hw_items);
                }
            }
        }

        drain_ring(ring, &mut recorder, status);

        if housekeeping.due(now) {
            match &mut recorder {
                Recorder::Opl(writer) => {
                    if let Err(e) = writer.poll_time_flush(now) {
                        report_write_error(status, &e);
                    }
                    status.record_progress(
                        writer.blocks_written(),
                        writer.bytes_written() as u32,
                    );
                    status.record_discards(writer.samples_discarded());
                }
                Recorder::Csv { discarded, .. } => status.record_discards(*discarded),
                Recorder::Idle => {}
            }
            defmt::debug!(
                "storage: state={} ring_drops={} fault_drops={}",
                status.state(),
                ring.drops(),
                status.discards()
            );
        }

        if let Ok(request) = file_req.try_receive() {
            serve_file_request(&sd, request, &file_reply, ring, &mut recorder, status).await;
        }

        Timer::after_millis(2).await;
    }
}

fn now_us() -> u64 {
    Instant::now().as_micros()
}

fn start_session<'a>(
    sd: &'a RefCell<SdStorage>,
    recorder: &mut Recorder<'a>,
    status: &'static SessionStatus,
    meta: &'static SharedMeta,
    app: &AppConfig,
    hw_items: &heapless::Vec<HardwareItem, 8>,
) {
    let number = sd.borrow_mut().next_session_number().min(MAX_SESSION_NUMBER);
    let format = app.log_format;
    let name = session_file_name(number, format);

    let file = match sd.borrow_mut().create(name.as_str()) {
        Ok(file) => file,
        Err(e) => {
            defmt::error!("storage: open {} failed: {}", name.as_str(), defmt::Debug2Format(&e));
            status.set_state(SessionState::Faulted);
            return;
        }
    };
    let mut sink = SessionSink { sd, file };

    let mut session_meta: SessionMetadata =
        meta.lock(|m| m.borrow().clone());
    session_meta.config_crc = app.fingerprint();

    let now = now_us();
    let wall_us = status.wallclock_us(now).unwrap_or(now);
    let mut rng = embassy_rp::clocks::RoscRng;
    let id = SessionId::derive(wall_us, rng.next_u64());

    *recorder = match format {
        LogFormat::Binary => {
            let info = SessionInfo {
                meta: &session_meta,
                id,
                start_wall_us: wall_us,
                hw_version: crate::HW_VERSION,
            };
            let mut writer = OplWriter::new(sink, app.flush_policy());
            match writer.start_session(&info, hw_items, now) {
                Ok(()) => Recorder::Opl(writer),
                Err(e) => {
                    report_write_error(status, &e);
                    let sink = writer.into_sink();
                    sd.borrow_mut().close(sink.file);
                    return;
                }
            }
        }
        LogFormat::Csv => {
            let start_epoch = (wall_us / 1_000_000) as i64;
            if let Err(e) = csv::write_header(&mut sink, &session_meta, start_epoch) {
                defmt::error!("storage: csv header failed: {}", defmt::Debug2Format(&e));
                sd.borrow_mut().close(sink.file);
                status.set_state(SessionState::Faulted);
                return;
            }
            Recorder::Csv { sink, latest: CsvLatest::default(), discarded: 0 }
        }
    };

    status.set_session_number(number);
    status.record_progress(0, 0);
    status.record_discards(0);
    status.set_state(SessionState::Recording);
    defmt::info!("storage: session {} -> {}", number, name.as_str());
}

fn stop_session<'a>(
    sd: &RefCell<SdStorage>,
    recorder: &mut Recorder<'a>,
    status: &'static SessionStatus,
    now: u64,
) {
    match core::mem::replace(recorder, Recorder::Idle) {
        Recorder::Idle => {}
        Recorder::Opl(mut writer) => {
            if writer.state() != WriterState::Idle {
                if let Err(e) = writer.stop_session(now) {
                    defmt::error!("storage: stop failed: {}", defmt::Debug2Format(&e));
                }
            }
            let sink = writer.into_sink();
            sd.borrow_mut().close(sink.file);
            status.set_state(SessionState::Idle);
            defmt::info!("storage: session {} closed", status.session_number());
        }
        Recorder::Csv { mut sink, .. } => {
            let _ = sink.sync();
            sd.borrow_mut().close(sink.file);
            status.set_state(SessionState::Idle);
        }
    }
}

fn drain_ring(ring: &Ring, recorder: &mut Recorder<'_>, status: &'static SessionStatus) {
    while let Some(sample) = ring.pop() {
        match recorder {
            Recorder::Idle => {}
            Recorder::Opl(writer) => {
                if let Err(e) = writer.push_sample(&sample, now_us()) {
                    report_write_error(status, &e);
                }
            }
            Recorder::Csv { sink, latest, discarded } => match sample.payload {
                SamplePayload::Accel(g) => {
                    if status.state() == SessionState::Faulted {
                        *discarded += 1;
                        continue;
                    }
                    let ts = status
                        .wallclock_us(sample.ts_us)
                        .unwrap_or(sample.ts_us) as f64
                        / 1_000_000.0;
                    let row = csv::CsvRow {
                        timestamp_s: ts,
                        accel_g: g,
                        lat: latest.fix.lat,
                        lon: latest.fix.lon,
                        alt_m: latest.fix.alt_m,
                        speed_ms: latest.fix.speed_ms,
                        sats: latest.sats,
                        hdop: latest.fix.hdop,
                    };
                    if csv::write_row(sink, &row).is_err() {
                        status.set_state(SessionState::Faulted);
                        *discarded += 1;
                    }
                }
                SamplePayload::GpsFix(fix) => latest.fix = fix,
                _ => {}
            },
        }
    }
}

fn report_write_error(status: &SessionStatus, err: &WriteError<SdError>) {
    match err {
        WriteError::Storage(e) => {
            defmt::error!("storage: write failed: {}", defmt::Debug2Format(e));
            status.set_state(SessionState::Faulted);
        }
        WriteError::SampleTooLarge => defmt::warn!("storage: sample too large, skipped"),
        WriteError::Encode(_) | WriteError::WrongState => {
            defmt::warn!("storage: codec error: {}", defmt::Debug2Format(err));
        }
    }
}

/// Cooperative shutdown: give the ring a bounded window to drain, then close
/// the session whatever state it reached.
async fn shutdown<'a>(
    sd: &RefCell<SdStorage>,
    recorder: &mut Recorder<'a>,
    ring: &'static Ring,
    status: &'static SessionStatus,
) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !ring.is_empty() && Instant::now() < deadline {
        drain_ring(ring, recorder, status);
        Timer::after_millis(5).await;
    }
    stop_session(sd, recorder, status, now_us());
    defmt::info!("storage: shut down");
}

async fn serve_file_request<'a>(
    sd: &RefCell<SdStorage>,
    request: FileRequest,
    reply: &Sender<'static, CriticalSectionRawMutex, FileReply, 2>,
    ring: &'static Ring,
    recorder: &mut Recorder<'a>,
    status: &'static SessionStatus,
) {
    match request {
        FileRequest::List => {
            let entries = sd.borrow_mut().list_sessions();
            reply.send(FileReply::List(entries)).await;
        }
        FileRequest::Read(name) => {
            let file = match sd.borrow_mut().open_read(name.as_str()) {
                Ok(file) => file,
                Err(_) => {
                    reply.send(FileReply::NotFound).await;
                    return;
                }
            };
            let size = sd.borrow_mut().file_size(file).unwrap_or(0);
            reply.send(FileReply::ReadBegin { size }).await;

            let mut buf = [0u8; 64];
            loop {
                let n = match sd.borrow_mut().read(file, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut chunk = heapless::Vec::new();
                let _ = chunk.extend_from_slice(&buf[..n]);
                reply.send(FileReply::Chunk(chunk)).await;
                // Keep the recorder fed while a download streams.
                drain_ring(ring, recorder, status);
            }
            sd.borrow_mut().close(file);
            reply.send(FileReply::ReadEnd).await;
        }
    }
}
