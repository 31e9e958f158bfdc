//! Cross-core shared state.
//!
//! One cell, sequentially-consistent atomics throughout: the storage core
//! owns the session state machine, the acquisition core reads it for LEDs
//! and telemetry, and the link task files start/stop requests through the
//! command slot. Everything else stays core-local.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle = 0,
    Recording = 1,
    Faulted = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Recording,
            2 => Self::Faulted,
            _ => Self::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Faulted => "faulted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionCommand {
    Start = 1,
    Stop = 2,
    Restart = 3,
}

pub struct SessionStatus {
    state: AtomicU8,
    command: AtomicU8,
    session_number: AtomicU32,
    blocks_written: AtomicU32,
    bytes_written: AtomicU32,
    samples_discarded: AtomicU32,
    shutdown: AtomicBool,
    /// Wallclock µs minus monotonic µs; 0 until the first RTC/GPS sync.
    wall_offset_us: AtomicU64,
}

impl SessionStatus {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
            command: AtomicU8::new(0),
            session_number: AtomicU32::new(0),
            blocks_written: AtomicU32::new(0),
            bytes_written: AtomicU32::new(0),
            samples_discarded: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            wall_offset_us: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Files a session command; a pending one is replaced (latest wins).
    pub fn request(&self, command: SessionCommand) {
        self.command.store(command as u8, Ordering::SeqCst);
    }

    pub fn take_command(&self) -> Option<SessionCommand> {
        match self.command.swap(0, Ordering::SeqCst) {
            1 => Some(SessionCommand::Start),
            2 => Some(SessionCommand::Stop),
            3 => Some(SessionCommand::Restart),
            _ => None,
        }
    }

    pub fn session_number(&self) -> u32 {
        self.session_number.load(Ordering::SeqCst)
    }

    pub fn set_session_number(&self, n: u32) {
        self.session_number.store(n, Ordering::SeqCst);
    }

    pub fn record_progress(&self, blocks: u32, bytes: u32) {
        self.blocks_written.store(blocks, Ordering::SeqCst);
        self.bytes_written.store(bytes, Ordering::SeqCst);
    }

    pub fn progress(&self) -> (u32, u32) {
        (
            self.blocks_written.load(Ordering::SeqCst),
            self.bytes_written.load(Ordering::SeqCst),
        )
    }

    /// Samples lost to a faulted session, mirrored from the recorder so the
    /// link and display can report the loss.
    pub fn record_discards(&self, discarded: u32) {
        self.samples_discarded.store(discarded, Ordering::SeqCst);
    }

    pub fn discards(&self) -> u32 {
        self.samples_discarded.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown flag; once set it stays set.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Anchors wallclock to the monotonic counter after an RTC or GPS sync.
    pub fn set_wallclock(&self, wall_us: u64, now_us: u64) {
        self.wall_offset_us.store(wall_us.saturating_sub(now_us).max(1), Ordering::SeqCst);
    }

    /// Wallclock µs for a monotonic timestamp, once a sync happened.
    pub fn wallclock_us(&self, now_us: u64) -> Option<u64> {
        match self.wall_offset_us.load(Ordering::SeqCst) {
            0 => None,
            offset => Some(offset + now_us),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_slot_is_take_once() {
        let status = SessionStatus::new();
        assert_eq!(status.take_command(), None);
        status.request(SessionCommand::Start);
        status.request(SessionCommand::Restart);
        assert_eq!(status.take_command(), Some(SessionCommand::Restart));
        assert_eq!(status.take_command(), None);
    }

    #[test]
    fn wallclock_unknown_until_synced() {
        let status = SessionStatus::new();
        assert_eq!(status.wallclock_us(5_000_000), None);
        status.set_wallclock(1_700_000_000_000_000, 5_000_000);
        let wall = status.wallclock_us(6_000_000).unwrap();
        assert_eq!(wall, 1_700_000_000_000_000 + 1_000_000);
    }

    #[test]
    fn discards_are_reported() {
        let status = SessionStatus::new();
        assert_eq!(status.discards(), 0);
        status.record_discards(17);
        assert_eq!(status.discards(), 17);
    }

    #[test]
    fn state_round_trips() {
        let status = SessionStatus::new();
        assert_eq!(status.state(), SessionState::Idle);
        status.set_state(SessionState::Recording);
        assert_eq!(status.state(), SessionState::Recording);
        assert_eq!(status.state().label(), "recording");
    }
}
