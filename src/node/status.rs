// src/node/status.rs

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Local operator signals.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusSignal {
    /// Calibration hold accepted, warmup starting.
    CalibrationAcknowledged,
    /// A warmup sample was taken.
    WarmupReading,
    /// A warmup sample failed.
    WarmupError,
    /// Warmup finished, about to issue the recalibration.
    CalibrationCommitting,
    CalibrationSucceeded,
    CalibrationFailed,
}

/// `count` flashes of `on_ms` separated by `off_ms`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlinkPattern {
    pub count: u8,
    pub on_ms: u32,
    pub off_ms: u32,
}

impl StatusSignal {
    pub const fn pattern(&self) -> BlinkPattern {
        let (count, on_ms, off_ms) = match self {
            StatusSignal::CalibrationAcknowledged => (5, 150, 150),
            StatusSignal::WarmupReading => (1, 100, 0),
            StatusSignal::WarmupError => (2, 50, 50),
            StatusSignal::CalibrationCommitting => (3, 400, 300),
            StatusSignal::CalibrationSucceeded => (2, 400, 300),
            StatusSignal::CalibrationFailed => (10, 80, 80),
        };
        BlinkPattern { count, on_ms, off_ms }
    }
}

/// Something that can show a [`StatusSignal`] to a person standing nearby.
pub trait StatusIndicator {
    fn indicate(&mut self, signal: StatusSignal);
}

/// No indicator fitted.
impl StatusIndicator for () {
    fn indicate(&mut self, _signal: StatusSignal) {}
}

/// Blinks an LED wired to `pin` (active high).
///
/// Patterns are short (under two seconds) and run to completion.
pub struct BlinkingLed<P, D> {
    pin: P,
    delay: D,
}

impl<P: OutputPin, D: DelayNs> BlinkingLed<P, D> {
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }
}

impl<P: OutputPin, D: DelayNs> StatusIndicator for BlinkingLed<P, D> {
    fn indicate(&mut self, signal: StatusSignal) {
        let pattern = signal.pattern();
        for i in 0..pattern.count {
            if self.pin.set_high().is_err() {
                log::debug!("status LED unavailable");
                return;
            }
            self.delay.delay_ms(pattern.on_ms);
            let _ = self.pin.set_low();
            if i + 1 < pattern.count {
                self.delay.delay_ms(pattern.off_ms);
            }
        }
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, RecordingPin};
    use core::time::Duration;

    #[test]
    fn test_acknowledge_pattern_timing() {
        let clock = ManualClock::new();
        let pin = RecordingPin::new();
        let mut led = BlinkingLed::new(pin.clone(), clock.clone());

        led.indicate(StatusSignal::CalibrationAcknowledged);

        assert_eq!(pin.rising_edges(), 5);
        assert!(!pin.is_set());
        // 5 on phases, 4 gaps
        assert_eq!(clock.elapsed(), Duration::from_millis(5 * 150 + 4 * 150));
    }

    #[test]
    fn test_failure_is_ten_rapid_flashes() {
        let clock = ManualClock::new();
        let pin = RecordingPin::new();
        let mut led = BlinkingLed::new(pin.clone(), clock.clone());

        led.indicate(StatusSignal::CalibrationFailed);

        assert_eq!(pin.rising_edges(), 10);
        assert_eq!(clock.elapsed(), Duration::from_millis(10 * 80 + 9 * 80));
    }
}
