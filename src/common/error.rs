// src/common/error.rs

use core::fmt;

/// Errors raised while talking to the SCD4x peripheral.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Scd4xError<E = ()>
where
    E: core::fmt::Debug,
{
    /// Underlying I2C error from the HAL implementation.
    #[error("I2C error: {0:?}")]
    I2c(E),

    /// A received word failed its CRC-8 check.
    #[error("CRC mismatch: expected {expected:#04x}, calculated {calculated:#04x}")]
    Crc { expected: u8, calculated: u8 },

    /// The peripheral did not produce data within the allowed time.
    #[error("Operation timed out")]
    Timeout,

    /// The driver has been torn down (bus recovery in progress).
    #[error("Driver not attached to the bus")]
    NotAttached,
}

impl<E: core::fmt::Debug> Scd4xError<E> {
    /// Drops the HAL error payload, keeping only the kind of failure.
    pub fn erase(&self) -> Scd4xError<()> {
        match self {
            Scd4xError::I2c(_) => Scd4xError::I2c(()),
            Scd4xError::Crc { expected, calculated } => Scd4xError::Crc {
                expected: *expected,
                calculated: *calculated,
            },
            Scd4xError::Timeout => Scd4xError::Timeout,
            Scd4xError::NotAttached => Scd4xError::NotAttached,
        }
    }
}

/// Failure classes surfaced to diagnostics.
///
/// Every diagnostic event carries one of these (or none for plain status
/// messages) so the collector can group them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Communication failure with the sensor.
    BusFault,
    /// Periodic mode polled before a new measurement was available. Benign.
    DataNotReady,
    /// Physically implausible CO2 value. The reading is still delivered.
    RangeFault,
    /// The bus recovery procedure did not restore communication.
    RecoveryFailed,
    /// The forced recalibration was rejected or could not be issued.
    CalibrationFailed,
    /// The transport returned non-success or was unreachable.
    UploadFailed,
    /// The delivery backlog exceeded capacity after a failed flush.
    BufferFull,
}

impl Fault {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Fault::BusFault => "bus_fault",
            Fault::DataNotReady => "data_not_ready",
            Fault::RangeFault => "range_fault",
            Fault::RecoveryFailed => "recovery_failed",
            Fault::CalibrationFailed => "calibration_failed",
            Fault::UploadFailed => "upload_failed",
            Fault::BufferFull => "buffer_full",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
