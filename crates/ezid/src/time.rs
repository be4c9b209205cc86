use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock time in whole Unix seconds.
///
/// Every timestamp the core records (create/update times, queue enqueue and
/// submit times, link-check times) comes from one of these, so tests can drive
/// retry intervals and sweeper windows without sleeping.
///
/// # Example
///
/// ```
/// use ezid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn now_secs(&self) -> u64 {
///         1_700_000_000
///     }
/// }
///
/// assert_eq!(FixedTime.now_secs(), 1_700_000_000);
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current time in seconds since the Unix epoch.
    fn now_secs(&self) -> u64;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub const fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, secs: u64) -> u64 {
        self.now.fetch_add(secs, Ordering::Relaxed) + secs
    }
}

impl TimeSource for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now_secs(&self) -> u64 {
        (**self).now_secs()
    }
}
