// src/common/hal_traits.rs

use core::fmt::Debug;
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::i2c::I2c;

/// Abstraction for the monotonic clock and delays the node relies on.
///
/// Delays come from `embedded_hal::delay::DelayNs`; `now` must never go
/// backwards and should keep counting across blocking delays.
pub trait Timer: DelayNs {
    /// Time elapsed since boot.
    fn now(&self) -> Duration;

    /// Seconds since the Unix epoch, if wall-clock time has been synchronised.
    ///
    /// Time synchronisation lives outside this crate; the default reports
    /// that no wall-clock is available.
    fn unix_time(&self) -> Option<u64> {
        None
    }
}

/// The hardware watchdog. It restarts the device if not fed in time.
pub trait Watchdog {
    /// Resets the watchdog countdown.
    fn feed(&mut self);
}

/// Hands the two-wire bus back and forth between the I2C peripheral driver
/// and raw pin control.
///
/// `release` must fully tear down the peripheral before returning the pins,
/// and `reclaim` must fully reconstruct it. The two sides never hold the
/// lines at the same time.
pub trait BusProvider {
    /// The protocol driver for the bus.
    type I2c: I2c;
    /// Clock line, driven as an output during recovery.
    type Scl: OutputPin;
    /// Data line, open-drain so it can be both driven and sampled.
    type Sda: OutputPin + InputPin;

    /// Destroys the I2C driver and yields the raw clock and data pins.
    fn release(&mut self, i2c: Self::I2c) -> (Self::Scl, Self::Sda);

    /// Rebuilds the I2C driver from the raw pins.
    fn reclaim(&mut self, scl: Self::Scl, sda: Self::Sda) -> Self::I2c;
}

/// Abstraction for the link to the remote collector.
///
/// Network association and the wire format below `post` are external; any
/// transport that can deliver a JSON document and report a status fits.
pub trait Transport {
    /// Associated error type for connectivity or transmission failures.
    type Error: Debug;

    /// Checks connectivity and attempts to re-establish it if it was lost.
    ///
    /// Called immediately before each send attempt.
    fn ensure_connected(&mut self) -> Result<(), Self::Error>;

    /// Delivers `body` to `endpoint` and returns the response status code.
    fn post(&mut self, endpoint: &str, body: &str) -> Result<u16, Self::Error>;
}
