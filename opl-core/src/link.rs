//! Line protocol spoken with the WiFi co-processor.
//!
//! Everything on the wire is printable ASCII, one message per `\n`-terminated
//! line of at most 512 bytes. The peer drives requests (`ESP:...`); the
//! logger answers with framed responses and pushes one `WS:<json>` telemetry
//! line per telemetry tick at most.

use core::fmt::{self, Write};

use crate::config::WifiConfig;

pub const MAX_LINE: usize = 512;

/// Production link rate; the software-serial debug rig runs the slow one.
/// Fixed at build time.
pub const RADIO_BAUD: u32 = 115_200;
pub const RADIO_BAUD_DEBUG: u32 = 9_600;

/// A request that produced no response within this window is answered with
/// `404` / abandoned.
pub const RESPONSE_TIMEOUT_US: u64 = 5_000_000;

pub type Line = heapless::String<MAX_LINE>;

// ── Receive side: line assembly ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    /// Line exceeded 512 bytes before its terminator.
    Overflow,
    /// Non-printable byte inside a line.
    Garbled,
}

/// Reassembles `\n`-framed lines from raw UART chunks. A poisoned line
/// (overflow or garbage) is reported once at its terminator and discarded
/// whole; the buffer resets and no peer state is inferred from it.
pub struct LineAssembler {
    buf: heapless::Vec<u8, MAX_LINE>,
    poisoned: Option<LineError>,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self { buf: heapless::Vec::new(), poisoned: None }
    }

    pub fn push_byte(&mut self, byte: u8) -> Result<Option<Line>, LineError> {
        match byte {
            b'\n' => {
                let result = match self.poisoned.take() {
                    Some(err) => Err(err),
                    None if self.buf.is_empty() => Ok(None),
                    None => {
                        let mut line = Line::new();
                        // Bytes were filtered to printable ASCII on the way in.
                        for &b in self.buf.iter() {
                            let _ = line.push(b as char);
                        }
                        Ok(Some(line))
                    }
                };
                self.buf.clear();
                result
            }
            b'\r' => Ok(None),
            0x20..=0x7E => {
                if self.poisoned.is_none() && self.buf.push(byte).is_err() {
                    self.poisoned = Some(LineError::Overflow);
                }
                Ok(None)
            }
            _ => {
                self.poisoned = Some(LineError::Garbled);
                Ok(None)
            }
        }
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Peer asks for the CONFIG block at boot.
    Config,
    /// Peer reports its servers are up.
    Serving,
    /// Page fetch for the HTTP front end.
    Get(&'a str),
    /// Session file listing.
    List,
    /// Session file download.
    Download(&'a str),
    SessionStart,
    SessionStop,
    SessionRestart,
    SessionInfo,
    /// `key=value` metadata update, raw tail of the line.
    SessionUpdate(&'a str),
    /// Periodic peer health report.
    Status { clients: u8, uptime_s: u32, rssi: Option<i8> },
}

/// Parses one peer line. Unknown or malformed requests come back as `None`
/// and are ignored by the link task.
pub fn parse_request(line: &str) -> Option<Request<'_>> {
    let body = line.strip_prefix("ESP:")?;
    let (command, rest) = match body.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (body, ""),
    };
    match command {
        "config" => Some(Request::Config),
        "serving" => Some(Request::Serving),
        "get" if !rest.is_empty() => Some(Request::Get(rest)),
        "list" => Some(Request::List),
        "download" if !rest.is_empty() => Some(Request::Download(rest)),
        "session_start" => Some(Request::SessionStart),
        "session_stop" => Some(Request::SessionStop),
        "session_restart" => Some(Request::SessionRestart),
        "session_info" => Some(Request::SessionInfo),
        "session_update" if !rest.is_empty() => Some(Request::SessionUpdate(rest)),
        "status" => {
            let mut clients = 0u8;
            let mut uptime_s = 0u32;
            let mut rssi = None;
            for field in rest.split_whitespace() {
                let (key, value) = field.split_once('=')?;
                match key {
                    "clients" => clients = value.parse().ok()?,
                    "uptime" => uptime_s = value.parse().ok()?,
                    "rssi" => rssi = value.parse().ok(),
                    _ => {}
                }
            }
            Some(Request::Status { clients, uptime_s, rssi })
        }
        _ => None,
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Firmware identity reported in the CONFIG block.
#[derive(Debug, Clone, Copy)]
pub struct LinkIdentity {
    pub version: &'static str,
    pub git: &'static str,
}

/// The multi-line CONFIG…END handshake response.
pub fn write_config_response<const N: usize>(
    out: &mut heapless::String<N>,
    wifi: &WifiConfig,
    identity: &LinkIdentity,
) -> fmt::Result {
    write!(
        out,
        "CONFIG\nmode={}\nssid={}\npassword={}\naddress={}\nnetmask={}\ngateway={}\npico_version={}\npico_git={}\nEND\n",
        wifi.mode.label(),
        wifi.ssid,
        wifi.password,
        wifi.address,
        wifi.netmask,
        wifi.gateway,
        identity.version,
        identity.git,
    )
}

pub const NOT_FOUND: &str = "404";
pub const OK: &str = "OK";

/// `FILE:<name>:<size>` header preceding the body bytes; `size == 0` means
/// the sender streams until `END`.
pub fn write_file_header<const N: usize>(
    out: &mut heapless::String<N>,
    name: &str,
    size: u32,
) -> fmt::Result {
    write!(out, "FILE:{name}:{size}")
}

pub fn write_filelist_header<const N: usize>(
    out: &mut heapless::String<N>,
    count: usize,
) -> fmt::Result {
    write!(out, "FILELIST:{count}")
}

pub fn write_filelist_entry<const N: usize>(
    out: &mut heapless::String<N>,
    name: &str,
    size: u32,
    session_number: u32,
) -> fmt::Result {
    write!(out, "{name}|{size}|{session_number}")
}

pub fn write_session_info<const N: usize>(
    out: &mut heapless::String<N>,
    session_number: u32,
    state: &str,
    blocks: u32,
    bytes: u32,
    discarded: u32,
) -> fmt::Result {
    write!(out, "SESSION:{session_number}|{state}|{blocks}|{bytes}|{discarded}")
}

pub fn write_error<const N: usize>(out: &mut heapless::String<N>, reason: &str) -> fmt::Result {
    write!(out, "ERR:{reason}")
}

/// `WS:` telemetry prefix.
pub fn write_ws_prefix<const N: usize>(out: &mut heapless::String<N>) -> fmt::Result {
    write!(out, "WS:")
}

// ── Transmit side: bounded queue ──────────────────────────────────────────────

/// Outbound line queue. When the UART cannot drain fast enough the oldest
/// unsent line is dropped; telemetry is only useful fresh.
pub struct TxQueue<const N: usize> {
    lines: heapless::Deque<Line, N>,
    dropped: u32,
}

impl<const N: usize> TxQueue<N> {
    pub const fn new() -> Self {
        Self { lines: heapless::Deque::new(), dropped: 0 }
    }

    pub fn push(&mut self, line: Line) {
        if self.lines.is_full() {
            let _ = self.lines.pop_front();
            self.dropped += 1;
        }
        // Cannot fail: a slot was just guaranteed.
        let _ = self.lines.push_back(line);
    }

    pub fn pop(&mut self) -> Option<Line> {
        self.lines.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl<const N: usize> Default for TxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn assemble(assembler: &mut LineAssembler, bytes: &[u8]) -> Option<Line> {
        let mut out = None;
        for &b in bytes {
            if let Ok(Some(line)) = assembler.push_byte(b) {
                out = Some(line);
            }
        }
        out
    }

    #[test]
    fn assembles_crlf_lines() {
        let mut asm = LineAssembler::new();
        let line = assemble(&mut asm, b"ESP:config\r\n").unwrap();
        assert_eq!(line.as_str(), "ESP:config");
        // Next line is independent.
        let line = assemble(&mut asm, b"ESP:serving\n").unwrap();
        assert_eq!(line.as_str(), "ESP:serving");
    }

    #[test]
    fn garbled_line_is_discarded_whole() {
        let mut asm = LineAssembler::new();
        for &b in b"ESP:con\x01fig" {
            assert_eq!(asm.push_byte(b), Ok(None));
        }
        assert_eq!(asm.push_byte(b'\n'), Err(LineError::Garbled));
        // The assembler recovered.
        let line = assemble(&mut asm, b"ESP:list\n").unwrap();
        assert_eq!(line.as_str(), "ESP:list");
    }

    #[test]
    fn oversized_line_reports_overflow() {
        let mut asm = LineAssembler::new();
        for _ in 0..600 {
            let _ = asm.push_byte(b'a');
        }
        assert_eq!(asm.push_byte(b'\n'), Err(LineError::Overflow));
        assert!(assemble(&mut asm, b"ESP:list\n").is_some());
    }

    #[test]
    fn parses_requests() {
        assert_eq!(parse_request("ESP:config"), Some(Request::Config));
        assert_eq!(parse_request("ESP:serving"), Some(Request::Serving));
        assert_eq!(parse_request("ESP:get /index.html"), Some(Request::Get("/index.html")));
        assert_eq!(parse_request("ESP:list"), Some(Request::List));
        assert_eq!(
            parse_request("ESP:download session_00003.opl"),
            Some(Request::Download("session_00003.opl"))
        );
        assert_eq!(parse_request("ESP:session_start"), Some(Request::SessionStart));
        assert_eq!(parse_request("ESP:session_stop"), Some(Request::SessionStop));
        assert_eq!(parse_request("ESP:session_restart"), Some(Request::SessionRestart));
        assert_eq!(parse_request("ESP:session_info"), Some(Request::SessionInfo));
        assert_eq!(
            parse_request("ESP:session_update driver=John"),
            Some(Request::SessionUpdate("driver=John"))
        );
        assert_eq!(
            parse_request("ESP:status clients=2 uptime=65 rssi=-41"),
            Some(Request::Status { clients: 2, uptime_s: 65, rssi: Some(-41) })
        );
        assert_eq!(
            parse_request("ESP:status clients=0 uptime=5"),
            Some(Request::Status { clients: 0, uptime_s: 5, rssi: None })
        );
        assert_eq!(parse_request("WS:{}"), None);
        assert_eq!(parse_request("ESP:reboot"), None);
        assert_eq!(parse_request("ESP:get "), None);
    }

    #[test]
    fn config_block_framing() {
        let cfg = AppConfig::default();
        let identity = LinkIdentity { version: "0.3.0", git: "deadbee" };
        let mut out: heapless::String<256> = heapless::String::new();
        write_config_response(&mut out, &cfg.wifi, &identity).unwrap();
        let expected = "CONFIG\nmode=ap\nssid=openpony\npassword=ponyride\n\
                        address=192.168.4.1\nnetmask=255.255.255.0\ngateway=192.168.4.1\n\
                        pico_version=0.3.0\npico_git=deadbee\nEND\n";
        assert_eq!(out.as_str(), expected);
    }

    #[test]
    fn response_lines() {
        let mut out: heapless::String<64> = heapless::String::new();
        write_file_header(&mut out, "/index.html", 200).unwrap();
        assert_eq!(out.as_str(), "FILE:/index.html:200");

        out.clear();
        write_filelist_header(&mut out, 3).unwrap();
        assert_eq!(out.as_str(), "FILELIST:3");

        out.clear();
        write_filelist_entry(&mut out, "session_00002.opl", 40_960, 2).unwrap();
        assert_eq!(out.as_str(), "session_00002.opl|40960|2");

        out.clear();
        write_session_info(&mut out, 7, "recording", 12, 49_800, 0).unwrap();
        assert_eq!(out.as_str(), "SESSION:7|recording|12|49800|0");

        out.clear();
        write_session_info(&mut out, 8, "faulted", 3, 12_288, 451).unwrap();
        assert_eq!(out.as_str(), "SESSION:8|faulted|3|12288|451");

        out.clear();
        write_error(&mut out, "busy").unwrap();
        assert_eq!(out.as_str(), "ERR:busy");
    }

    #[test]
    fn tx_queue_drops_oldest() {
        let mut queue: TxQueue<2> = TxQueue::new();
        let mk = |s: &str| {
            let mut line = Line::new();
            line.push_str(s).unwrap();
            line
        };
        queue.push(mk("one"));
        queue.push(mk("two"));
        queue.push(mk("three"));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().unwrap().as_str(), "two");
        assert_eq!(queue.pop().unwrap().as_str(), "three");
        assert!(queue.pop().is_none());
    }
}
