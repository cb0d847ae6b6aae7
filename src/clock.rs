// clock.rs

use std::fmt;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDateTime, Utc};
use log::*;

/// Standard time offset (EET), hours east of UTC.
pub const STD_OFFSET_HOURS: i64 = 2;
/// Summer time offset (EEST).
pub const DST_OFFSET_HOURS: i64 = 3;

pub fn is_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Day of week, 0 = Sunday (Sakamoto).
pub fn weekday(year: i32, month: u32, day: u32) -> u32 {
    const T: [i32; 12] = [0, 3, 2, 5, 0, 3, 5, 1, 4, 6, 2, 4];
    let y = if month < 3 { year - 1 } else { year };
    (y + y / 4 - y / 100 + y / 400 + T[(month - 1) as usize] + day as i32).rem_euclid(7) as u32
}

pub fn last_sunday(year: i32, month: u32) -> u32 {
    let last = days_in_month(year, month);
    last - weekday(year, month, last)
}

/// Whole-day rule on the UTC date: DST runs from the last Sunday of March
/// through the last Sunday of October, both inclusive.
pub fn is_dst(utc: &NaiveDateTime) -> bool {
    let (year, month, day) = (utc.year(), utc.month(), utc.day());
    match month {
        4..=9 => true,
        3 => day >= last_sunday(year, 3),
        10 => day <= last_sunday(year, 10),
        _ => false,
    }
}

pub fn utc_offset_hours(utc: &NaiveDateTime) -> i64 {
    if is_dst(utc) {
        DST_OFFSET_HOURS
    } else {
        STD_OFFSET_HOURS
    }
}

pub fn to_local(utc: &NaiveDateTime) -> NaiveDateTime {
    *utc + ChronoDuration::hours(utc_offset_hours(utc))
}

/// Hardware clock seam: read, set and network-sync the system time.
pub trait Rtc {
    fn now(&self) -> DateTime<Utc>;
    fn set(&mut self, t: DateTime<Utc>) -> Result<(), ClockError>;
    fn sync(&mut self) -> Result<(), ClockError>;
}

#[derive(Debug)]
pub enum ClockError {
    Parse(String),
    Set(String),
    SyncTimeout,
    Sync(String),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Parse(s) => write!(f, "cannot parse saved time {s:?}"),
            ClockError::Set(e) => write!(f, "cannot set clock: {e}"),
            ClockError::SyncTimeout => write!(f, "time sync timed out"),
            ClockError::Sync(e) => write!(f, "time sync failed: {e}"),
        }
    }
}

impl std::error::Error for ClockError {}

pub struct LocalClock<R> {
    rtc: R,
}

impl<R: Rtc> LocalClock<R> {
    pub fn new(rtc: R) -> Self {
        LocalClock { rtc }
    }

    /// Seed from a saved `DD-MM-YYYY` date and `HH:MM:SS` UTC time.
    pub fn seed(&mut self, date: &str, time_sec: &str) -> Result<DateTime<Utc>, ClockError> {
        let s = format!("{date} {time_sec}");
        let t = NaiveDateTime::parse_from_str(&s, "%d-%m-%Y %H:%M:%S")
            .map_err(|_| ClockError::Parse(s))?
            .and_utc();
        self.rtc.set(t)?;
        info!("Restored time: {t}");
        Ok(t)
    }

    pub fn utc(&self) -> NaiveDateTime {
        self.rtc.now().naive_utc()
    }

    #[cfg(test)]
    pub(crate) fn rtc(&self) -> &R {
        &self.rtc
    }

    #[cfg(test)]
    pub(crate) fn rtc_mut(&mut self) -> &mut R {
        &mut self.rtc
    }

    pub fn sync(&mut self) -> Result<(), ClockError> {
        self.rtc.sync()?;
        info!("RTC synced (UTC): {}", self.utc());
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub use esp::*;

#[cfg(target_os = "espidf")]
mod esp {
    use std::time::SystemTime;

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf, SyncMode, SyncStatus};

    use super::*;

    const SYNC_TIMEOUT_MS: u32 = 15_000;
    const POLL_INTERVAL_MS: u32 = 250;

    /// System time backed RTC, synced by a short-lived SNTP client.
    pub struct EspRtc {
        pub server: String,
    }

    impl Rtc for EspRtc {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from(SystemTime::now())
        }

        fn set(&mut self, t: DateTime<Utc>) -> Result<(), ClockError> {
            let tv = esp_idf_sys::timeval {
                tv_sec: t.timestamp() as _,
                tv_usec: 0,
            };
            let rc = unsafe { esp_idf_sys::settimeofday(&tv, std::ptr::null()) };
            if rc != 0 {
                return Err(ClockError::Set(format!("settimeofday returned {rc}")));
            }
            Ok(())
        }

        fn sync(&mut self) -> Result<(), ClockError> {
            let mut conf = SntpConf {
                sync_mode: SyncMode::Immediate,
                operating_mode: OperatingMode::Poll,
                ..Default::default()
            };
            conf.servers[0] = self.server.as_str();
            let sntp = EspSntp::new(&conf).map_err(|e| ClockError::Sync(format!("{e:?}")))?;

            let mut elapsed_ms = 0u32;
            while elapsed_ms < SYNC_TIMEOUT_MS {
                if sntp.get_sync_status() == SyncStatus::Completed {
                    return Ok(());
                }
                FreeRtos::delay_ms(POLL_INTERVAL_MS);
                elapsed_ms += POLL_INTERVAL_MS;
            }
            // dropping sntp stops the client
            Err(ClockError::SyncTimeout)
        }
    }
}


// EOF
