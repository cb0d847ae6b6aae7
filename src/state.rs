// state.rs

use std::time::Duration;

use crate::{display::DisplayMode, measure::Reading, storage::SystemSnapshot, MyConfig};

/// Fixed-period timer keyed on uptime. Due immediately after boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub period: Duration,
    pub next_due: Duration,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Interval {
            period,
            next_due: Duration::ZERO,
        }
    }

    pub fn is_due(&self, now: Duration) -> bool {
        now >= self.next_due
    }

    pub fn reset(&mut self, now: Duration) {
        self.next_due = now + self.period;
    }

    /// True and rearmed if due.
    pub fn fire(&mut self, now: Duration) -> bool {
        if self.is_due(now) {
            self.reset(now);
            true
        } else {
            false
        }
    }
}

/// Everything the main loop carries from one iteration to the next.
pub struct AppState {
    pub config: MyConfig,
    pub mode_idx: usize,
    pub wifi_check: Interval,
    pub ntp_sync: Interval,
    pub remote_sync: Interval,
    pub led_on: bool,
    pub reading: Option<Reading>,
    /// A reading from this boot sits in the pending slot, not yet uploaded.
    pub upload_pending: bool,
    pub snapshot: Option<SystemSnapshot>,
}

impl AppState {
    pub fn new(config: MyConfig) -> Self {
        AppState {
            wifi_check: Interval::new(Duration::from_secs(config.wifi_retry)),
            ntp_sync: Interval::new(Duration::from_secs(config.ntp_interval)),
            remote_sync: Interval::new(Duration::from_secs(config.sync_interval)),
            config,
            mode_idx: 0,
            led_on: false,
            reading: None,
            upload_pending: false,
            snapshot: None,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        DisplayMode::from_index(self.mode_idx)
    }

    pub fn next_mode(&mut self) {
        self.mode_idx = (self.mode_idx + 1) % DisplayMode::ALL.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_due_at_boot_then_periodic() {
        let mut i = Interval::new(Duration::from_secs(60));
        assert!(i.fire(Duration::from_secs(0)));
        assert!(!i.fire(Duration::from_secs(59)));
        assert!(i.fire(Duration::from_secs(60)));
        assert!(!i.fire(Duration::from_secs(61)));
        // late tick rearms from when it fired
        assert!(i.fire(Duration::from_secs(200)));
        assert_eq!(i.next_due, Duration::from_secs(260));
    }

    #[test]
    fn mode_rotates() {
        let mut s = AppState::new(MyConfig::default());
        assert_eq!(s.mode(), DisplayMode::AirTemp);
        s.next_mode();
        assert_eq!(s.mode(), DisplayMode::HumPress);
        s.next_mode();
        assert_eq!(s.mode(), DisplayMode::AirTemp);
    }
}

// EOF
