//! SCD4x command definitions.
//!
//! Every command is a 16-bit opcode sent MSB first, optionally followed by a
//! single argument word with its CRC. Some commands answer with one or more
//! CRC-protected words once their execution time has elapsed.

use core::fmt;
use core::time::Duration;

use arrayvec::ArrayVec;

use super::{crc::encode_word, timing};

/// Largest frame we ever write: opcode (2) + one argument word (3).
pub const MAX_FRAME_LEN: usize = 5;

/// A command understood by the SCD4x.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// Wake from power-down. The sensor does not acknowledge this one.
    WakeUp,
    /// Leave periodic measurement mode and return to idle.
    StopPeriodicMeasurement,
    /// Reload user settings from EEPROM.
    Reinit,
    /// Read the 48-bit serial number (three words).
    GetSerialNumber,
    /// Enter periodic measurement mode (new data every 5 s).
    StartPeriodicMeasurement,
    /// Ask whether a new measurement is waiting.
    GetDataReadyStatus,
    /// Read CO2, temperature and humidity (three words).
    ReadMeasurement,
    /// Trigger one on-demand measurement.
    MeasureSingleShot,
    /// Power the sensor down until the next `WakeUp`.
    PowerDown,
    /// Altitude compensation in metres above sea level.
    SetSensorAltitude(u16),
    /// Temperature offset, already converted to the raw sensor ticks.
    SetTemperatureOffset(u16),
    /// Enable or disable automatic self-calibration.
    SetAutomaticSelfCalibration(bool),
    /// Tell the sensor the true ambient concentration right now.
    PerformForcedRecalibration(u16),
}

impl Command {
    /// The 16-bit opcode.
    pub const fn opcode(&self) -> u16 {
        match self {
            Command::WakeUp => 0x36F6,
            Command::StopPeriodicMeasurement => 0x3F86,
            Command::Reinit => 0x3646,
            Command::GetSerialNumber => 0x3682,
            Command::StartPeriodicMeasurement => 0x21B1,
            Command::GetDataReadyStatus => 0xE4B8,
            Command::ReadMeasurement => 0xEC05,
            Command::MeasureSingleShot => 0x219D,
            Command::PowerDown => 0x36E0,
            Command::SetSensorAltitude(_) => 0x2427,
            Command::SetTemperatureOffset(_) => 0x241D,
            Command::SetAutomaticSelfCalibration(_) => 0x2416,
            Command::PerformForcedRecalibration(_) => 0x362F,
        }
    }

    /// Argument word sent after the opcode, if any.
    pub const fn argument(&self) -> Option<u16> {
        match self {
            Command::SetSensorAltitude(v)
            | Command::SetTemperatureOffset(v)
            | Command::PerformForcedRecalibration(v) => Some(*v),
            Command::SetAutomaticSelfCalibration(enabled) => Some(*enabled as u16),
            _ => None,
        }
    }

    /// How long to wait before the response may be read (or the next command sent).
    pub const fn execution_time(&self) -> Duration {
        match self {
            Command::WakeUp => timing::WAKE_UP_TIME,
            Command::StopPeriodicMeasurement => timing::STOP_PERIODIC_TIME,
            Command::Reinit => timing::REINIT_TIME,
            Command::MeasureSingleShot => timing::SINGLE_SHOT_TIME,
            Command::PerformForcedRecalibration(_) => timing::FORCED_RECALIBRATION_TIME,
            Command::GetSerialNumber | Command::GetDataReadyStatus | Command::ReadMeasurement => {
                timing::READ_COMMAND_TIME
            }
            Command::StartPeriodicMeasurement => Duration::ZERO,
            Command::PowerDown
            | Command::SetSensorAltitude(_)
            | Command::SetTemperatureOffset(_)
            | Command::SetAutomaticSelfCalibration(_) => timing::SET_COMMAND_TIME,
        }
    }

    /// Number of words the sensor answers with.
    pub const fn response_words(&self) -> usize {
        match self {
            Command::GetSerialNumber | Command::ReadMeasurement => 3,
            Command::GetDataReadyStatus | Command::PerformForcedRecalibration(_) => 1,
            _ => 0,
        }
    }

    /// Whether the sensor accepts this command while in periodic measurement mode.
    pub const fn allowed_while_measuring(&self) -> bool {
        matches!(
            self,
            Command::ReadMeasurement
                | Command::GetDataReadyStatus
                | Command::StopPeriodicMeasurement
        )
    }

    /// Builds the bytes to put on the wire.
    pub fn encode(&self) -> ArrayVec<u8, MAX_FRAME_LEN> {
        let mut frame = ArrayVec::new();
        for byte in self.opcode().to_be_bytes() {
            frame.push(byte);
        }
        if let Some(arg) = self.argument() {
            for byte in encode_word(arg) {
                frame.push(byte);
            }
        }
        frame
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::WakeUp => "wake_up",
            Command::StopPeriodicMeasurement => "stop_periodic_measurement",
            Command::Reinit => "reinit",
            Command::GetSerialNumber => "get_serial_number",
            Command::StartPeriodicMeasurement => "start_periodic_measurement",
            Command::GetDataReadyStatus => "get_data_ready_status",
            Command::ReadMeasurement => "read_measurement",
            Command::MeasureSingleShot => "measure_single_shot",
            Command::PowerDown => "power_down",
            Command::SetSensorAltitude(_) => "set_sensor_altitude",
            Command::SetTemperatureOffset(_) => "set_temperature_offset",
            Command::SetAutomaticSelfCalibration(_) => "set_automatic_self_calibration_enabled",
            Command::PerformForcedRecalibration(_) => "perform_forced_recalibration",
        };
        write!(f, "{} (0x{:04X})", name, self.opcode())
    }
}
