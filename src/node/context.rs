// src/node/context.rs

use core::fmt;
use core::time::Duration;

use embedded_hal::delay::DelayNs;

use super::diagnostics::{DiagnosticsReporter, EventSink, Severity};
use crate::common::{Fault, Timer, Timestamp, Watchdog};

/// Running fault and activity counters.
///
/// Owned by the cycle and lent to each component as part of the
/// [`NodeContext`]; nothing else keeps a copy.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FaultCounters {
    pub consecutive_bus_faults: u32,
    pub total_bus_faults: u32,
    pub consecutive_upload_failures: u32,
    pub total_upload_failures: u32,
    pub total_uploads_ok: u32,
    pub total_samples: u32,
    pub recovery_attempts: u32,
    pub failed_recoveries: u32,
    pub rejected_readings: u32,
}

/// Watchdog-aware waiting.
///
/// Every wait is cut into slices no longer than `max_slice` and the
/// watchdog is fed before each one, so no wait can starve it. The pacer
/// also serves as the [`DelayNs`] given to the driver.
#[derive(Debug)]
pub struct Pacer<T, W> {
    timer: T,
    watchdog: W,
    max_slice: Duration,
}

impl<T: Timer, W: Watchdog> Pacer<T, W> {
    pub fn new(timer: T, watchdog: W, max_slice: Duration) -> Self {
        Self {
            timer,
            watchdog,
            max_slice: max_slice.max(Duration::from_millis(1)),
        }
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.timer.now()
    }

    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.timer.now(), self.timer.unix_time())
    }

    #[inline]
    pub fn feed(&mut self) {
        self.watchdog.feed();
    }

    /// Blocks for `duration`, feeding the watchdog at least every `max_slice`.
    pub fn wait(&mut self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.watchdog.feed();
            let slice = remaining.min(self.max_slice);
            let micros = slice.as_micros().min(u128::from(u32::MAX)) as u32;
            self.timer.delay_us(micros);
            remaining -= slice;
        }
        self.watchdog.feed();
    }

    /// Blocks until the monotonic clock reaches `deadline`.
    pub fn wait_until(&mut self, deadline: Duration) {
        let now = self.timer.now();
        if deadline > now {
            self.wait(deadline - now);
        }
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }
}

impl<T: Timer, W: Watchdog> DelayNs for Pacer<T, W> {
    fn delay_ns(&mut self, ns: u32) {
        self.wait(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        self.wait(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.wait(Duration::from_millis(u64::from(ms)));
    }
}

/// What every component borrows while it runs: time, counters and the
/// diagnostics channel.
pub struct NodeContext<T, W, S> {
    pub pacer: Pacer<T, W>,
    pub counters: FaultCounters,
    pub diagnostics: DiagnosticsReporter<S>,
}

impl<T: Timer, W: Watchdog, S: EventSink> NodeContext<T, W, S> {
    pub fn new(pacer: Pacer<T, W>, diagnostics: DiagnosticsReporter<S>) -> Self {
        Self {
            pacer,
            counters: FaultCounters::default(),
            diagnostics,
        }
    }

    /// Emits a diagnostic event stamped with the current uptime and counters.
    pub fn report(&mut self, severity: Severity, fault: Option<Fault>, message: fmt::Arguments<'_>) {
        let uptime = self.pacer.now();
        self.diagnostics
            .emit(severity, fault, message, uptime, &self.counters);
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, MockWatchdog};

    #[test]
    fn test_wait_feeds_every_slice() {
        let clock = ManualClock::new();
        let dog = MockWatchdog::new(&clock);
        let mut pacer = Pacer::new(clock.clone(), dog.clone(), Duration::from_secs(1));

        pacer.wait(Duration::from_millis(5_500));

        assert_eq!(clock.elapsed(), Duration::from_millis(5_500));
        // six slices plus the closing feed
        assert_eq!(dog.feeds(), 7);
        assert!(dog.max_gap() <= Duration::from_secs(1));
    }

    #[test]
    fn test_delay_ns_goes_through_slices() {
        let clock = ManualClock::new();
        let dog = MockWatchdog::new(&clock);
        let mut pacer = Pacer::new(clock.clone(), dog.clone(), Duration::from_millis(100));

        pacer.delay_ms(450);
        assert_eq!(clock.elapsed(), Duration::from_millis(450));
        assert!(dog.max_gap() <= Duration::from_millis(100));
    }

    #[test]
    fn test_wait_until_past_deadline_returns() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let mut pacer = Pacer::new(clock.clone(), MockWatchdog::new(&clock), Duration::from_secs(1));
        pacer.wait_until(Duration::from_secs(3));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        pacer.wait_until(Duration::from_secs(12));
        assert_eq!(clock.elapsed(), Duration::from_secs(12));
    }
}
