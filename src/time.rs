//! Wall-clock access and calendar formatting.
//!
//! Token claims and telemetry timestamps need unix time, which an MCU only has
//! after something (SNTP, an RTC, a GPS fix) has told it. [`Clock`] is that
//! seam. [`SyncedClock`] is a ready-made implementation that anchors a unix
//! time received once to the monotonic `embassy_time` clock.
//!
//! Calendar conversion uses Howard Hinnant's `civil_from_days` algorithm:
//! O(1), proleptic Gregorian, correct across leap years.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;

/// Any wall clock reading below this (2017-11-14) is treated as "never synced".
pub const SYNC_THRESHOLD: u64 = 1_510_644_967;

const SECONDS_PER_DAY: i64 = 86_400;

/// Source of unix time in seconds.
pub trait Clock {
    fn now(&self) -> u64;

    /// Whether `now()` can be trusted for token claims.
    fn is_synchronized(&self) -> bool {
        self.now() >= SYNC_THRESHOLD
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> u64 {
        (**self).now()
    }

    fn is_synchronized(&self) -> bool {
        (**self).is_synchronized()
    }
}

/// A unix time anchored to a monotonic instant.
#[derive(Clone, Copy)]
struct Anchor {
    unix_secs: u64,
    at: Instant,
}

/// [`Clock`] that reports uptime until [`SyncedClock::synchronize`] is called
/// and unix time afterwards.
///
/// Shareable between the task that syncs time and the tasks that read it.
pub struct SyncedClock<M: RawMutex> {
    anchor: Mutex<M, Cell<Option<Anchor>>>,
}

impl<M: RawMutex> SyncedClock<M> {
    pub fn new() -> Self {
        Self {
            anchor: Mutex::new(Cell::new(None)),
        }
    }

    /// Records that it is `unix_secs` right now.
    pub fn synchronize(&self, unix_secs: u64) {
        info!("wall clock synchronized to {}", unix_secs);
        let anchor = Anchor {
            unix_secs,
            at: Instant::now(),
        };
        self.anchor.lock(|cell| cell.set(Some(anchor)));
    }
}

impl<M: RawMutex> Default for SyncedClock<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Clock for SyncedClock<M> {
    fn now(&self) -> u64 {
        match self.anchor.lock(|cell| cell.get()) {
            Some(anchor) => anchor.unix_secs + anchor.at.elapsed().as_secs(),
            None => Instant::now().as_secs(),
        }
    }
}

/// Broken-down local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalDateTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl LocalDateTime {
    /// Converts a unix timestamp to local time at a fixed offset from UTC.
    pub fn from_unix(unix_secs: u64, utc_offset_secs: i32) -> Self {
        let local = unix_secs as i64 + i64::from(utc_offset_secs);
        let days = local.div_euclid(SECONDS_PER_DAY);
        let secs_today = local.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS`
impl fmt::Display for LocalDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Days since 1970-01-01 to (year, month, day).
fn civil_from_days(days_since_epoch: i64) -> (i32, u8, u8) {
    // Shift the epoch to 0000-03-01 so the leap day ends the year.
    let z = days_since_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // March = 0
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);

    (year as i32, month, day)
}
