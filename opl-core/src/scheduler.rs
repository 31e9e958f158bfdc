//! Periodic task timing.
//!
//! Each task keeps a [`Periodic`] and runs when `due(now)` reports true.
//! A task that falls more than one period behind re-aligns to a fresh
//! period instead of replaying the backlog, so a long SD write never causes
//! a burst of catch-up samples.

/// Default task periods, µs.
pub mod periods {
    pub const ACCEL_SAMPLE: u64 = 10_000;
    pub const GPS_UPDATE: u64 = 100_000;
    pub const DISPLAY_REFRESH: u64 = 200_000;
    pub const LED_HEARTBEAT: u64 = 1_000_000;
    pub const RTC_SYNC: u64 = 60_000_000;
    pub const TELEMETRY_LINE: u64 = 100_000;
    pub const STATUS_LOG: u64 = 1_000_000;
    /// Must stay well under the watchdog timeout.
    pub const WATCHDOG_FEED: u64 = 500_000;
}

#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period_us: u64,
    next_due_us: u64,
}

impl Periodic {
    pub fn new(period_us: u64, now_us: u64) -> Self {
        debug_assert!(period_us > 0);
        Self { period_us, next_due_us: now_us + period_us }
    }

    /// Starts due immediately rather than one period from now.
    pub fn new_due(period_us: u64, now_us: u64) -> Self {
        Self { period_us, next_due_us: now_us }
    }

    pub const fn period_us(&self) -> u64 {
        self.period_us
    }

    /// True when the deadline has passed; advances the deadline by one
    /// period, or re-aligns when the backlog is more than one period deep.
    pub fn due(&mut self, now_us: u64) -> bool {
        if now_us < self.next_due_us {
            return false;
        }
        self.next_due_us += self.period_us;
        if self.next_due_us <= now_us {
            self.next_due_us = now_us + self.period_us;
        }
        true
    }

    /// Time to sleep until the next deadline.
    pub fn until_next(&self, now_us: u64) -> u64 {
        self.next_due_us.saturating_sub(now_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_cadence() {
        let mut p = Periodic::new(10_000, 0);
        assert!(!p.due(5_000));
        assert!(p.due(10_000));
        assert!(!p.due(15_000));
        assert!(p.due(20_000));
        assert_eq!(p.until_next(20_000), 10_000);
    }

    #[test]
    fn small_slip_keeps_alignment() {
        let mut p = Periodic::new(10_000, 0);
        // 3 ms late but less than one period behind: the grid is kept.
        assert!(p.due(13_000));
        assert_eq!(p.until_next(13_000), 7_000);
    }

    #[test]
    fn deep_backlog_realigns_without_burst() {
        let mut p = Periodic::new(10_000, 0);
        assert!(p.due(10_000));
        // Stalled for 75 ms: fires once, then waits a whole fresh period.
        assert!(p.due(95_000));
        assert!(!p.due(96_000));
        assert!(!p.due(104_999));
        assert!(p.due(105_000));
    }

    #[test]
    fn new_due_fires_immediately() {
        let mut p = Periodic::new_due(10_000, 500);
        assert!(p.due(500));
        assert!(!p.due(501));
    }
}
