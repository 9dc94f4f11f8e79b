// src/node/bus_recovery.rs

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::common::timing::{RECOVERY_HALF_PERIOD_US, RECOVERY_PULSES};

/// State of the data line after the pulse train.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineState {
    /// SDA reads high: nobody is holding the bus.
    Released,
    /// SDA is still low, a peripheral is stuck mid-transfer.
    HeldLow,
}

/// Pin-level failure while driving the lines by hand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("bus line pin could not be driven or sampled")]
    Pin,
    #[error("data line still held low after recovery pulses")]
    LineHeld,
    #[error("sensor did not answer after bus recovery")]
    NoResponse,
    #[error("sensor identity changed across recovery: expected {expected:#014x}, found {found:#014x}")]
    IdentityMismatch { expected: u64, found: u64 },
}

/// Clocks a wedged peripheral out of a half-finished byte.
///
/// With the I2C peripheral torn down, SCL is toggled by hand nine times with
/// SDA released, then a STOP condition (SDA rising while SCL is high) is
/// generated. Nine clocks are enough for any slave to finish the byte it is
/// shifting out and see a NACK.
#[derive(Debug, Copy, Clone)]
pub struct BusRecovery {
    pulses: u8,
    half_period_us: u32,
}

impl Default for BusRecovery {
    fn default() -> Self {
        Self::new()
    }
}

impl BusRecovery {
    pub const fn new() -> Self {
        Self {
            pulses: RECOVERY_PULSES,
            half_period_us: RECOVERY_HALF_PERIOD_US,
        }
    }

    pub fn run<SCL, SDA, D>(&self, scl: &mut SCL, sda: &mut SDA, delay: &mut D) -> Result<LineState, RecoveryError>
    where
        SCL: OutputPin,
        SDA: OutputPin + InputPin,
        D: DelayNs,
    {
        let half = self.half_period_us;

        sda.set_high().map_err(|_| RecoveryError::Pin)?;
        scl.set_high().map_err(|_| RecoveryError::Pin)?;
        delay.delay_us(half);

        for _ in 0..self.pulses {
            scl.set_low().map_err(|_| RecoveryError::Pin)?;
            delay.delay_us(half);
            scl.set_high().map_err(|_| RecoveryError::Pin)?;
            delay.delay_us(half);
        }
        log::trace!("bus recovery: {} clock pulses sent", self.pulses);

        // STOP: SDA low while SCL low, raise SCL, then release SDA
        scl.set_low().map_err(|_| RecoveryError::Pin)?;
        delay.delay_us(half);
        sda.set_low().map_err(|_| RecoveryError::Pin)?;
        delay.delay_us(half);
        scl.set_high().map_err(|_| RecoveryError::Pin)?;
        delay.delay_us(half);
        sda.set_high().map_err(|_| RecoveryError::Pin)?;
        delay.delay_us(half);

        let released = sda.is_high().map_err(|_| RecoveryError::Pin)?;
        Ok(if released {
            LineState::Released
        } else {
            LineState::HeldLow
        })
    }
}
