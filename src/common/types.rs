// src/common/types.rs

use core::fmt;
use core::ops::RangeInclusive;
use core::time::Duration;

/// CO2 values outside this window are physically implausible for ambient air.
pub const PLAUSIBLE_CO2_PPM: RangeInclusive<u16> = 300..=10_000;

/// Raw value the forced recalibration returns when the sensor refused it.
pub const FRC_FAILED_SENTINEL: u16 = 0xFFFF;
/// Offset applied to the forced recalibration correction word.
const FRC_CORRECTION_OFFSET: i32 = 0x8000;

// --- Measurement ---

/// One decoded measurement as delivered by the sensor.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Measurement {
    pub co2_ppm: u16,
    pub temperature_c: f32,
    pub relative_humidity_pct: f32,
}

impl Measurement {
    /// Decodes the three words of `read_measurement`.
    pub fn from_words(words: [u16; 3]) -> Self {
        let [co2, raw_t, raw_rh] = words;
        Self {
            co2_ppm: co2,
            temperature_c: -45.0 + 175.0 * f32::from(raw_t) / 65535.0,
            relative_humidity_pct: 100.0 * f32::from(raw_rh) / 65535.0,
        }
    }
}

/// Converts a temperature offset in degrees Celsius to sensor ticks.
pub fn temperature_offset_ticks(offset_c: f32) -> u16 {
    let ticks = offset_c.max(0.0) * 65535.0 / 175.0;
    if ticks >= 65535.0 {
        u16::MAX
    } else {
        // round half up, offsets are non-negative
        (ticks + 0.5) as u16
    }
}

// --- Timestamp ---

/// When a reading was captured.
///
/// Uptime is always known; wall-clock seconds only once the external time
/// synchronisation has succeeded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub uptime: Duration,
    pub unix_secs: Option<u64>,
}

impl Timestamp {
    pub const fn new(uptime: Duration, unix_secs: Option<u64>) -> Self {
        Self { uptime, unix_secs }
    }
}

// --- Reading ---

/// An immutable CO2/temperature/humidity sample with its capture time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reading {
    co2_ppm: u16,
    temperature_c: f32,
    relative_humidity_pct: f32,
    captured_at: Timestamp,
}

impl Reading {
    pub fn new(measurement: Measurement, captured_at: Timestamp) -> Self {
        Self {
            co2_ppm: measurement.co2_ppm,
            temperature_c: measurement.temperature_c,
            relative_humidity_pct: measurement.relative_humidity_pct,
            captured_at,
        }
    }

    #[inline]
    pub const fn co2_ppm(&self) -> u16 {
        self.co2_ppm
    }

    #[inline]
    pub const fn temperature_c(&self) -> f32 {
        self.temperature_c
    }

    #[inline]
    pub const fn relative_humidity_pct(&self) -> f32 {
        self.relative_humidity_pct
    }

    #[inline]
    pub const fn captured_at(&self) -> Timestamp {
        self.captured_at
    }

    /// `false` flags a range fault; the reading is still kept and delivered.
    pub fn is_plausible(&self) -> bool {
        PLAUSIBLE_CO2_PPM.contains(&self.co2_ppm)
    }
}

// --- Serial Number ---

/// The 48-bit identity of the sensor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SerialNumber(u64);

impl SerialNumber {
    pub fn from_words(words: [u16; 3]) -> Self {
        let [a, b, c] = words;
        Self((u64::from(a) << 32) | (u64::from(b) << 16) | u64::from(c))
    }

    pub const fn new(raw: u64) -> Self {
        Self(raw & 0xFFFF_FFFF_FFFF)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// An all-zero or all-one serial means nothing answered sensibly.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0 && self.0 != 0xFFFF_FFFF_FFFF
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012X}", self.0)
    }
}

// --- Forced Recalibration Result ---

/// Outcome reported by the sensor for a forced recalibration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrcCorrection {
    /// The correction (in ppm) that the sensor applied.
    Applied(i16),
    /// The sentinel: the sensor was not in a state to recalibrate.
    Rejected,
}

impl FrcCorrection {
    pub fn from_word(word: u16) -> Self {
        if word == FRC_FAILED_SENTINEL {
            return FrcCorrection::Rejected;
        }
        let correction = i32::from(word) - FRC_CORRECTION_OFFSET;
        // correction spans -32768..=32766 so the cast cannot truncate
        FrcCorrection::Applied(correction as i16)
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Timestamp {
        Timestamp::new(Duration::from_secs(secs), None)
    }

    #[test]
    fn test_measurement_conversion() {
        // Datasheet example: 0x01F4 ppm, 0x6667 -> ~25 C, 0x5EB9 -> ~37 %RH
        let m = Measurement::from_words([0x01F4, 0x6667, 0x5EB9]);
        assert_eq!(m.co2_ppm, 500);
        assert!((m.temperature_c - 25.0).abs() < 0.1);
        assert!((m.relative_humidity_pct - 37.0).abs() < 0.1);
    }

    #[test]
    fn test_plausibility_window() {
        let make = |ppm| {
            Reading::new(
                Measurement { co2_ppm: ppm, temperature_c: 20.0, relative_humidity_pct: 40.0 },
                at(1),
            )
        };
        assert!(!make(250).is_plausible());
        assert!(make(300).is_plausible());
        assert!(make(10_000).is_plausible());
        assert!(!make(10_001).is_plausible());
    }

    #[test]
    fn test_serial_number() {
        let serial = SerialNumber::from_words([0xF896, 0x9F07, 0x3BB3]);
        assert_eq!(serial.value(), 0xF896_9F07_3BB3);
        assert!(serial.is_valid());
        assert!(!SerialNumber::new(0).is_valid());
        assert!(!SerialNumber::from_words([0xFFFF, 0xFFFF, 0xFFFF]).is_valid());
    }

    #[test]
    fn test_frc_correction_decoding() {
        assert_eq!(FrcCorrection::from_word(0xFFFF), FrcCorrection::Rejected);
        assert_eq!(FrcCorrection::from_word(0x8000), FrcCorrection::Applied(0));
        assert_eq!(FrcCorrection::from_word(0x801E), FrcCorrection::Applied(30));
        assert_eq!(FrcCorrection::from_word(0x7FCE), FrcCorrection::Applied(-50));
    }

    #[test]
    fn test_temperature_offset_ticks() {
        // 4 C default offset -> 1498 ticks per datasheet
        assert_eq!(temperature_offset_ticks(4.0), 1498);
        assert_eq!(temperature_offset_ticks(-1.0), 0);
    }
}
