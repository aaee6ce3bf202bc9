//! Reading progress of a table.
//!
//! Every input slice reader is wrapped in a [`Meter`] counting the bytes read
//! into one shared counter. The [`ProgressLogger`] reports the percentage read
//! at exponentially growing intervals, which suits both small and very large
//! tables.
//!
//! ```
//! use std::io::Read;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use table_slicer::config::LogIntervalConfig;
//! use table_slicer::log::MemoryLogger;
//! use table_slicer::progress::{MockClock, ProgressLogger};
//!
//! let clock = MockClock::new();
//! let logger = MemoryLogger::default();
//! let interval = LogIntervalConfig {
//!     initial: Duration::from_secs(1),
//!     maximum: Duration::from_secs(10),
//!     multiplier: 2.0,
//! };
//! let progress = ProgressLogger::new(
//!     Arc::new(clock.clone()),
//!     Arc::new(logger.clone()),
//!     &interval,
//!     8,
//!     "Slicing \"orders\":",
//! );
//!
//! let mut meter = progress.meter(&b"abcd"[..]);
//! std::io::copy(&mut meter, &mut std::io::sink())?;
//! clock.advance(Duration::from_secs(1));
//! progress.stop();
//!
//! assert_eq!(logger.lines(), vec!["INFO  Slicing \"orders\": 50.00%".to_string()]);
//! # Ok::<(), std::io::Error>(())
//! ```

mod clock;

pub use clock::{Callback, Clock, MockClock, SystemClock, Timer};

use crate::config::LogIntervalConfig;
use crate::log::Logger;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Exponential backoff without randomization.
#[derive(Clone, Debug)]
pub struct Backoff {
    current: Duration,
    maximum: Duration,
    multiplier: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(interval: &LogIntervalConfig) -> Self {
        Self {
            current: interval.initial,
            maximum: interval.maximum,
            multiplier: interval.multiplier,
        }
    }

    /// Returns the current interval and grows it for the next call.
    pub fn next_interval(&mut self) -> Duration {
        let interval = self.current;
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.maximum);
        self.current = grown.min(self.maximum);
        interval
    }
}

struct Schedule {
    timer: Option<Timer>,
    backoff: Backoff,
    stopped: bool,
}

struct Inner {
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    message: String,
    total: u64,
    read: AtomicU64,
    schedule: Mutex<Schedule>,
}

/// Shared byte counter with a periodic percentage report.
///
/// Clones share the counter and the schedule.
#[derive(Clone)]
pub struct ProgressLogger {
    inner: Arc<Inner>,
}

impl ProgressLogger {
    /// Starts reporting; the first message is due after `interval.initial`.
    pub fn new(
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        interval: &LogIntervalConfig,
        total: u64,
        message: impl Into<String>,
    ) -> Self {
        let inner = Arc::new(Inner {
            clock,
            logger,
            message: message.into(),
            total,
            read: AtomicU64::new(0),
            schedule: Mutex::new(Schedule {
                timer: None,
                backoff: Backoff::new(interval),
                stopped: false,
            }),
        });

        {
            // Held until the timer is stored, an early tick waits for it.
            let mut schedule = inner.schedule.lock();
            schedule.timer = Some(schedule_tick(&inner, interval.initial));
        }
        Self { inner }
    }

    /// Wraps `reader`, counting every byte read from it.
    pub fn meter<R: Read>(&self, reader: R) -> Meter<R> {
        Meter {
            inner: reader,
            progress: Arc::clone(&self.inner),
        }
    }

    /// Bytes read so far through all meters.
    #[must_use]
    pub fn read_bytes(&self) -> u64 {
        self.inner.read.load(Ordering::Relaxed)
    }

    /// Stops reporting. No message is logged once this returns.
    pub fn stop(&self) {
        let mut schedule = self.inner.schedule.lock();
        schedule.stopped = true;
        if let Some(timer) = schedule.timer.take() {
            timer.stop();
        }
    }
}

fn schedule_tick(inner: &Arc<Inner>, delay: Duration) -> Timer {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.clock.after(
        delay,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                tick(&inner);
            }
        }),
    )
}

fn tick(inner: &Arc<Inner>) {
    let mut schedule = inner.schedule.lock();
    if schedule.stopped {
        return;
    }

    let read = inner.read.load(Ordering::Relaxed);
    let percent = if inner.total == 0 {
        100.0
    } else {
        read as f64 * 100.0 / inner.total as f64
    };
    inner.logger.info(&format!("{} {percent:05.2}%", inner.message));

    let next = schedule.backoff.next_interval();
    schedule.timer = Some(schedule_tick(inner, next));
}

/// Reader counting the bytes read into a [`ProgressLogger`].
pub struct Meter<R> {
    inner: R,
    progress: Arc<Inner>,
}

impl<R: Read> Read for Meter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n != 0 {
            self.progress.read.fetch_add(n as u64, Ordering::Relaxed);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLogger;

    const MINUTE: Duration = Duration::from_secs(60);

    fn interval(initial: Duration, maximum: Duration, multiplier: f64) -> LogIntervalConfig {
        LogIntervalConfig {
            initial,
            maximum,
            multiplier,
        }
    }

    #[test]
    fn test_backoff_grows_to_maximum() {
        let mut backoff = Backoff::new(&interval(
            Duration::from_secs(5),
            Duration::from_secs(60),
            2.0,
        ));
        let got: Vec<u64> = (0..6).map(|_| backoff.next_interval().as_secs()).collect();
        assert_eq!(got, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_backoff_overflow_is_clamped() {
        let mut backoff = Backoff::new(&interval(Duration::from_secs(5), MINUTE, 1e300));
        let got: Vec<Duration> = (0..3).map(|_| backoff.next_interval()).collect();
        assert_eq!(got, vec![Duration::from_secs(5), MINUTE, MINUTE]);
    }

    #[test]
    fn test_progress_messages() -> anyhow::Result<()> {
        let clock = MockClock::new();
        let logger = MemoryLogger::default();
        let progress = ProgressLogger::new(
            Arc::new(clock.clone()),
            Arc::new(logger.clone()),
            &interval(MINUTE, 10 * MINUTE, 1.5),
            1000,
            "Progress:",
        );

        // Two meters share the counter.
        let data = vec![0u8; 100];
        let mut first = progress.meter(data.as_slice());
        let mut second = progress.meter(data.as_slice());
        io::copy(&mut first, &mut io::sink())?;

        clock.advance(MINUTE);
        assert_eq!(logger.take(), vec!["INFO  Progress: 10.00%"]);

        io::copy(&mut second, &mut io::sink())?;
        assert_eq!(progress.read_bytes(), 200);

        // Due at 2, 3.5 and 5.75 minutes.
        clock.advance(5 * MINUTE);
        assert_eq!(logger.take(), vec!["INFO  Progress: 20.00%"; 3]);

        progress.stop();
        clock.advance(60 * MINUTE);
        assert!(logger.lines().is_empty());
        assert_eq!(clock.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_huge_multiplier_keeps_reporting() {
        let config = crate::config::SlicerConfig {
            log_interval: interval(Duration::from_secs(5), MINUTE, 1e300),
            ..crate::config::SlicerConfig::default()
        };
        assert!(config.validate().is_ok());

        let clock = MockClock::new();
        let logger = MemoryLogger::default();
        let progress = ProgressLogger::new(
            Arc::new(clock.clone()),
            Arc::new(logger.clone()),
            &config.log_interval,
            0,
            "Huge:",
        );
        clock.advance(Duration::from_secs(5));
        clock.advance(MINUTE);
        clock.advance(MINUTE);
        progress.stop();
        assert_eq!(logger.lines(), vec!["INFO  Huge: 100.00%"; 3]);
    }

    #[test]
    fn test_zero_total_is_complete() {
        let clock = MockClock::new();
        let logger = MemoryLogger::default();
        let progress = ProgressLogger::new(
            Arc::new(clock.clone()),
            Arc::new(logger.clone()),
            &interval(MINUTE, MINUTE, 1.0),
            0,
            "Empty:",
        );
        clock.advance(MINUTE);
        progress.stop();
        assert_eq!(logger.lines(), vec!["INFO  Empty: 100.00%"]);
    }
}
