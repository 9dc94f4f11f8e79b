// src/node/trigger.rs

use core::time::Duration;

use embedded_hal::digital::InputPin;

use super::context::Pacer;
use crate::common::{timing, Timer, Watchdog};

/// The calibration trigger: a single active-low input (a push button to
/// ground with a pull-up).
#[derive(Debug)]
pub struct Trigger<P> {
    pin: P,
}

impl<P: InputPin> Trigger<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Raw, undebounced level. A pin that cannot be read counts as released.
    pub fn is_asserted_raw(&mut self) -> bool {
        match self.pin.is_low() {
            Ok(low) => low,
            Err(e) => {
                log::debug!("trigger pin read failed: {:?}", e);
                false
            }
        }
    }

    /// Debounced check: asserted now and still asserted a moment later.
    pub fn is_asserted<T: Timer, W: Watchdog>(&mut self, pacer: &mut Pacer<T, W>) -> bool {
        if !self.is_asserted_raw() {
            return false;
        }
        pacer.wait(timing::INPUT_DEBOUNCE);
        self.is_asserted_raw()
    }

    /// Blocks until the input is released, then waits `settle` so the
    /// release bounce is not seen as a new press.
    pub fn wait_release<T: Timer, W: Watchdog>(&mut self, pacer: &mut Pacer<T, W>, settle: Duration) {
        while self.is_asserted_raw() {
            pacer.wait(timing::INPUT_POLL_INTERVAL);
        }
        pacer.wait(settle);
    }
}
