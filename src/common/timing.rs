// src/common/timing.rs

use core::time::Duration;

// Note: execution times are the datasheet maxima for the SCD4x family. A
// command's response may only be read once its execution time has elapsed.

// === Command Execution Times ===

/// Time the sensor needs after `wake_up` before it accepts commands.
/// The wake command itself is not acknowledged.
pub const WAKE_UP_TIME: Duration = Duration::from_millis(30);
/// Settle time after `stop_periodic_measurement`.
pub const STOP_PERIODIC_TIME: Duration = Duration::from_millis(500);
/// Settle time after `reinit`.
pub const REINIT_TIME: Duration = Duration::from_millis(30);
/// Time for a single-shot measurement to complete.
pub const SINGLE_SHOT_TIME: Duration = Duration::from_millis(5000);
/// Time for the forced recalibration to produce its correction word.
pub const FORCED_RECALIBRATION_TIME: Duration = Duration::from_millis(400);
/// Execution time of short read commands (serial, data ready, measurement).
pub const READ_COMMAND_TIME: Duration = Duration::from_millis(1);
/// Execution time of the setter commands.
pub const SET_COMMAND_TIME: Duration = Duration::from_millis(1);

/// Extra time allowed for data-ready after a single-shot has completed.
pub const DATA_READY_GRACE: Duration = Duration::from_millis(1000);
/// Spacing of data-ready polls within that grace period.
pub const DATA_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Internal update period of the periodic measurement mode.
pub const PERIODIC_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

// === Bus Recovery Timing ===

/// Half period of the manual recovery clock (100 kHz standard mode).
pub const RECOVERY_HALF_PERIOD_US: u32 = 5;
/// Number of clock pulses that lets any wedged peripheral finish its byte.
pub const RECOVERY_PULSES: u8 = 9;

// === Input Timing ===

/// Spacing of input samples while waiting on the trigger line.
pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Second-look delay used to debounce the trigger line.
pub const INPUT_DEBOUNCE: Duration = Duration::from_millis(20);
