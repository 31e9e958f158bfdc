//! Link task, core 0: speaks the line protocol with the WiFi co-processor
//! over UART1.
//!
//! Requests are answered inline; telemetry lines drain from the shared
//! queue between requests. File listings and downloads are fetched from the
//! storage core over the request channel, with the protocol's 5 s ceiling
//! enforced here — a late storage core turns into a plain `404` for the
//! peer rather than a hung connection.

use embassy_futures::select::{select, Either};
use embassy_rp::peripherals::UART1;
use embassy_rp::uart::{BufferedUartRx, BufferedUartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{with_timeout, Duration, Timer};
use embedded_io_async::{Read, Write};

use opl_core::config::AppConfig;
use opl_core::link::{
    self, LineAssembler, LinkIdentity, Request, NOT_FOUND, OK, RESPONSE_TIMEOUT_US,
};
use opl_core::status::{SessionCommand, SessionStatus};

use crate::tasks::storage::{FileName, FileReply, FileRequest};
use crate::tasks::{SharedMeta, WsLines};

/// Built-in pages served to the co-processor; the real UI lives with the
/// peer, this is the fallback when it asks the logger.
const PAGES: &[(&str, &str)] = &[
    ("/", STATUS_PAGE),
    ("/index.html", STATUS_PAGE),
];

const STATUS_PAGE: &str =
    "<!doctype html><title>OpenPonyLogger</title><p>Logger online; telemetry is on the WebSocket feed.</p>";

const IDENTITY: LinkIdentity = LinkIdentity {
    version: env!("CARGO_PKG_VERSION"),
    git: "unreleased",
};

type FileReqTx = Sender<'static, CriticalSectionRawMutex, FileRequest, 1>;
type FileReplyRx = Receiver<'static, CriticalSectionRawMutex, FileReply, 2>;

#[embassy_executor::task]
pub async fn esp_link_task(
    mut rx: BufferedUartRx<'static, UART1>,
    mut tx: BufferedUartTx<'static, UART1>,
    status: &'static SessionStatus,
    meta: &'static SharedMeta,
    ws_lines: &'static WsLines,
    file_req: FileReqTx,
    file_reply: FileReplyRx,
    app: AppConfig,
) {
    let mut assembler = LineAssembler::new();
    let mut buf = [0u8; 64];

    loop {
        match select(rx.read(&mut buf), Timer::after_millis(20)).await {
            Either::First(Ok(n)) => {
                for &byte in &buf[..n] {
                    match assembler.push_byte(byte) {
                        Ok(Some(line)) => {
                            if let Some(request) = link::parse_request(line.as_str()) {
                                handle_request(
                                    request, &mut tx, status, meta, &file_req, &file_reply,
                                    &app,
                                )
                                .await;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => defmt::warn!("link: bad line: {}", e),
                    }
                }
            }
            Either::First(Err(_)) | Either::Second(_) => {}
        }

        // At most one telemetry line per pass keeps requests responsive.
        let pending = ws_lines.lock(|q| q.borrow_mut().pop());
        if let Some(line) = pending {
            let _ = tx.write_all(line.as_bytes()).await;
            let _ = tx.write_all(b"\n").await;
        }
    }
}

async fn send_line(tx: &mut BufferedUartTx<'static, UART1>, line: &str) {
    let _ = tx.write_all(line.as_bytes()).await;
    let _ = tx.write_all(b"\n").await;
}

async fn handle_request(
    request: Request<'_>,
    tx: &mut BufferedUartTx<'static, UART1>,
    status: &'static SessionStatus,
    meta: &'static SharedMeta,
    file_req: &FileReqTx,
    file_reply: &FileReplyRx,
    app: &AppConfig,
) {
    let timeout = Duration::from_micros(RESPONSE_TIMEOUT_US);
    match request {
        Request::Config => {
            let mut block: heapless::String<256> = heapless::String::new();
            if link::write_config_response(&mut block, &app.wifi, &IDENTITY).is_ok() {
                let _ = tx.write_all(block.as_bytes()).await;
            }
        }
        Request::Serving => {
            defmt::info!("link: peer serving");
        }
        Request::Get(path) => {
            match PAGES.iter().find(|(name, _)| *name == path) {
                Some((name, body)) => {
                    let mut header: heapless::String<64> = heapless::String::new();
                    if link::write_file_header(&mut header, name, body.len() as u32).is_ok()
                    {
                        send_line(tx, header.as_str()).await;
                        let _ = tx.write_all(body.as_bytes()).await;
                        let _ = tx.write_all(b"\nEND\n").await;
                    }
                }
                None => send_line(tx, NOT_FOUND).await,
            }
        }
        Request::List => {
            file_req.send(FileRequest::List).await;
            match with_timeout(timeout, file_reply.receive()).await {
                Ok(FileReply::List(entries)) => {
                    let mut line: heapless::String<64> = heapless::String::new();
                    if link::write_filelist_header(&mut line, entries.len()).is_ok() {
                        send_line(tx, line.as_str()).await;
                    }
                    for entry in &entries {
                        line.clear();
                        if link::write_filelist_entry(
                            &mut line,
                            entry.name.as_str(),
                            entry.size,
                            entry.number,
                        )
                        .is_ok()
                        {
                            send_line(tx, line.as_str()).await;
                        }
                    }
                    send_line(tx, "END").await;
                }
                _ => send_line(tx, NOT_FOUND).await,
            }
        }
        Request::Download(name) => {
            let mut file_name = FileName::new();
            if file_name.push_str(name).is_err() {
                send_line(tx, NOT_FOUND).await;
                return;
            }
            file_req.send(FileRequest::Read(file_name)).await;
            match with_timeout(timeout, file_reply.receive()).await {
                Ok(FileReply::ReadBegin { size }) => {
                    let mut header: heapless::String<64> = heapless::String::new();
                    if link::write_file_header(&mut header, name, size).is_ok() {
                        send_line(tx, header.as_str()).await;
                    }
                    loop {
                        match with_timeout(timeout, file_reply.receive()).await {
                            Ok(FileReply::Chunk(data)) => {
                                let _ = tx.write_all(&data).await;
                            }
                            _ => break,
                        }
                    }
                    let _ = tx.write_all(b"\nEND\n").await;
                }
                _ => send_line(tx, NOT_FOUND).await,
            }
        }
        Request::SessionStart => {
            status.request(SessionCommand::Start);
            send_line(tx, OK).await;
        }
        Request::SessionStop => {
            status.request(SessionCommand::Stop);
            send_line(tx, OK).await;
        }
        Request::SessionRestart => {
            status.request(SessionCommand::Restart);
            send_line(tx, OK).await;
        }
        Request::SessionInfo => {
            let (blocks, bytes) = status.progress();
            let mut line: heapless::String<64> = heapless::String::new();
            if link::write_session_info(
                &mut line,
                status.session_number(),
                status.state().label(),
                blocks,
                bytes,
                status.discards(),
            )
            .is_ok()
            {
                send_line(tx, line.as_str()).await;
            }
        }
        Request::SessionUpdate(kv) => {
            let applied = match kv.split_once('=') {
                Some((key, value)) => meta.lock(|m| m.borrow_mut().set_field(key, value)),
                None => false,
            };
            if applied {
                send_line(tx, OK).await;
            } else {
                let mut line: heapless::String<64> = heapless::String::new();
                if link::write_error(&mut line, "bad_field").is_ok() {
                    send_line(tx, line.as_str()).await;
                }
            }
        }
        Request::Status { clients, uptime_s, rssi } => {
            defmt::debug!(
                "link: peer clients={} uptime={}s rssi={}",
                clients,
                uptime_s,
                rssi.unwrap_or(0)
            );
        }
    }
}
