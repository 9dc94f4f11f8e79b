//! Node configuration.
//!
//! Loading these values from storage is the application's job; this module
//! only defines them, their defaults and their consistency rules.

use core::time::Duration;

use heapless::String;

use super::payload::max_batch_len;
use crate::common::timing::PERIODIC_UPDATE_INTERVAL;

/// Maximum length of the device name sent with every payload.
pub const DEVICE_NAME_LEN: usize = 32;

/// Device name as reported to the collector.
pub type DeviceName = String<DEVICE_NAME_LEN>;

/// Error type for configuration validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("device name is empty or longer than {DEVICE_NAME_LEN} bytes")]
    InvalidDeviceName,
    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
    #[error("watchdog wait slice must be shorter than the watchdog timeout")]
    SliceExceedsWatchdog,
    #[error("calibration reference {0} ppm is outside 400..=2000")]
    ReferenceOutOfRange(u16),
    #[error("warmup interval is longer than the warmup itself")]
    WarmupIntervalTooLong,
    #[error("buffer flush margin {margin} leaves no room in a buffer of {capacity}")]
    FlushMarginTooLarge { margin: usize, capacity: usize },
    #[error("a full buffer of {capacity} readings does not fit one upload (max {max})")]
    BufferExceedsPayload { capacity: usize, max: usize },
    #[error("escalation thresholds must be strictly ascending")]
    EscalationOrder,
    #[error("bus fault threshold must be at least 1")]
    BusFaultThreshold,
    #[error("periodic sampling cannot be faster than the sensor's 5 s update")]
    SampleIntervalTooShort,
}

/// How the sensor is driven between samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Wake, measure once, power down. Lowest power.
    SingleShot,
    /// Continuous internal sampling; the node polls for new data.
    Periodic,
}

/// Sensor behaviour and one-time settings applied at startup.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SensorSettings {
    pub mode: AcquisitionMode,
    /// Altitude compensation in metres.
    pub altitude_m: Option<u16>,
    /// Self-heating compensation in degrees Celsius.
    pub temperature_offset_c: Option<f32>,
    /// Automatic self-calibration; `None` leaves the sensor's setting alone.
    pub automatic_self_calibration: Option<bool>,
    /// Identity the sensor must report at startup, if known.
    pub expected_serial: Option<u64>,
    /// Consecutive bus faults that trigger a bus recovery.
    pub bus_fault_threshold: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Periodic,
            altitude_m: None,
            temperature_offset_c: None,
            automatic_self_calibration: None,
            expected_serial: None,
            bus_fault_threshold: 3,
        }
    }
}

/// Parameters of the button-triggered forced recalibration.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// True concentration of the reference air (fresh outdoor air).
    pub reference_ppm: u16,
    /// How long the trigger must be held to start.
    pub hold_time: Duration,
    /// Total warmup before the correction is issued.
    pub warmup_duration: Duration,
    /// Spacing of warmup samples.
    pub warmup_interval: Duration,
    /// Warn when the warmup mean is further than this from the reference.
    pub max_deviation_ppm: f32,
    /// Allow a new press during warmup to abort the procedure.
    pub warmup_cancellable: bool,
    /// Settle time after the trigger has been released.
    pub release_debounce: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reference_ppm: 440,
            hold_time: Duration::from_secs(3),
            warmup_duration: Duration::from_secs(5 * 60),
            warmup_interval: Duration::from_secs(30),
            max_deviation_ppm: 100.0,
            warmup_cancellable: false,
            release_debounce: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Flush at least this often.
    pub flush_interval: Duration,
    /// Request an early flush once fewer than this many slots remain.
    pub flush_margin: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10 * 60),
            flush_margin: 2,
        }
    }
}

/// Consecutive upload failures at which diagnostics escalate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub warning_after: u32,
    pub error_after: u32,
    pub critical_after: u32,
    /// After the critical tier, re-fire every this many further failures (0 = never).
    pub rearm_every: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            warning_after: 3,
            error_after: 5,
            critical_after: 10,
            rearm_every: 10,
        }
    }
}

/// Collector endpoints.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub single: &'static str,
    pub batch: &'static str,
    pub events: &'static str,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            single: "/api/sensor",
            batch: "/api/sensor/batch",
            events: "/api/sensor/log",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct UploadConfig {
    pub endpoints: Endpoints,
    pub escalation: EscalationPolicy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Hardware timeout; nothing may block longer than this.
    pub timeout: Duration,
    /// Longest single wait between two feeds.
    pub max_slice: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_slice: Duration::from_secs(1),
        }
    }
}

/// Everything the node needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub device: DeviceName,
    /// Spacing of regular samples.
    pub sample_interval: Duration,
    /// Idle time between two scheduler ticks (also the trigger poll rate).
    pub tick_interval: Duration,
    /// Interval of the status heartbeat event, `None` to disable.
    pub heartbeat_interval: Option<Duration>,
    pub sensor: SensorSettings,
    pub calibration: CalibrationConfig,
    pub buffer: BufferConfig,
    pub upload: UploadConfig,
    pub watchdog: WatchdogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut device = DeviceName::new();
        // fits: well under DEVICE_NAME_LEN
        let _ = device.push_str("co2-node");
        Self {
            device,
            sample_interval: Duration::from_secs(60),
            tick_interval: Duration::from_millis(250),
            heartbeat_interval: Some(Duration::from_secs(60 * 60)),
            sensor: SensorSettings::default(),
            calibration: CalibrationConfig::default(),
            buffer: BufferConfig::default(),
            upload: UploadConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create config for battery operation: single-shot samples every 5 minutes.
    pub fn low_power() -> Self {
        Self {
            sample_interval: Duration::from_secs(5 * 60),
            sensor: SensorSettings {
                mode: AcquisitionMode::SingleShot,
                ..SensorSettings::default()
            },
            ..Self::default()
        }
    }

    /// Replaces the device name.
    pub fn with_device(mut self, name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::InvalidDeviceName);
        }
        let mut device = DeviceName::new();
        device
            .push_str(name)
            .map_err(|_| ConfigError::InvalidDeviceName)?;
        self.device = device;
        Ok(self)
    }

    /// Checks the configuration for a buffer of `capacity` readings.
    pub fn validate(&self, capacity: usize) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::InvalidDeviceName);
        }
        let intervals = [
            ("sample_interval", self.sample_interval),
            ("tick_interval", self.tick_interval),
            ("flush_interval", self.buffer.flush_interval),
            ("warmup_interval", self.calibration.warmup_interval),
            ("watchdog max_slice", self.watchdog.max_slice),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.watchdog.max_slice >= self.watchdog.timeout {
            return Err(ConfigError::SliceExceedsWatchdog);
        }
        if !(400..=2000).contains(&self.calibration.reference_ppm) {
            return Err(ConfigError::ReferenceOutOfRange(self.calibration.reference_ppm));
        }
        if self.calibration.warmup_interval > self.calibration.warmup_duration {
            return Err(ConfigError::WarmupIntervalTooLong);
        }
        if self.buffer.flush_margin >= capacity {
            return Err(ConfigError::FlushMarginTooLarge {
                margin: self.buffer.flush_margin,
                capacity,
            });
        }
        let max = max_batch_len(&self.device);
        if capacity > max {
            return Err(ConfigError::BufferExceedsPayload { capacity, max });
        }
        let e = self.upload.escalation;
        if !(e.warning_after > 0 && e.warning_after < e.error_after && e.error_after < e.critical_after) {
            return Err(ConfigError::EscalationOrder);
        }
        if self.sensor.bus_fault_threshold == 0 {
            return Err(ConfigError::BusFaultThreshold);
        }
        if self.sensor.mode == AcquisitionMode::Periodic
            && self.sample_interval < PERIODIC_UPDATE_INTERVAL
        {
            return Err(ConfigError::SampleIntervalTooShort);
        }
        Ok(())
    }
}
