// src/driver/mod.rs

mod io_helpers;

use crate::common::{
    command::Command,
    error::Scd4xError,
    types::{FrcCorrection, Measurement, SerialNumber},
};
use core::time::Duration;
use embedded_hal::{delay::DelayNs, i2c::I2c};
use nb::Result as NbResult;

use io_helpers::wait;

/// Fixed I2C address of the SCD4x family.
pub const SCD4X_ADDRESS: u8 = 0x62;

/// Blocking SCD4x driver.
///
/// The driver owns the bus while attached; [`Scd4x::release`] hands it back
/// (for example to tear it down during bus recovery). Every method takes the
/// delay provider explicitly so long execution times can be served by a
/// watchdog-aware delay.
#[derive(Debug)]
pub struct Scd4x<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> Scd4x<I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, SCD4X_ADDRESS)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Scd4x { i2c, address }
    }

    /// Gives the bus back, destroying the driver.
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    // --- Public Blocking Methods ---

    /// Sends `wake_up`. The sensor never acknowledges it, so a NACK is
    /// expected and ignored; the caller must verify the wake separately.
    pub fn wake_up<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Scd4xError<I2C::Error>> {
        let frame = Command::WakeUp.encode();
        if let Err(e) = self.i2c.write(self.address, &frame) {
            log::trace!("wake_up not acknowledged (expected): {:?}", e);
        }
        wait(delay, Command::WakeUp.execution_time());
        Ok(())
    }

    pub fn stop_periodic_measurement<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::StopPeriodicMeasurement, delay)
    }

    pub fn reinit<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::Reinit, delay)
    }

    /// Reads the identity register.
    pub fn serial_number<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<SerialNumber, Scd4xError<I2C::Error>> {
        let words = self.execute_read::<D, 3>(Command::GetSerialNumber, delay)?;
        Ok(SerialNumber::from_words(words))
    }

    pub fn start_periodic_measurement<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::StartPeriodicMeasurement, delay)
    }

    /// `true` once a measurement is waiting to be read.
    pub fn data_ready<D: DelayNs>(&mut self, delay: &mut D) -> Result<bool, Scd4xError<I2C::Error>> {
        let [status] = self.execute_read::<D, 1>(Command::GetDataReadyStatus, delay)?;
        Ok(status & 0x07FF != 0)
    }

    /// Reads the measurement registers unconditionally.
    pub fn read_measurement<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<Measurement, Scd4xError<I2C::Error>> {
        let words = self.execute_read::<D, 3>(Command::ReadMeasurement, delay)?;
        Ok(Measurement::from_words(words))
    }

    /// Polls for a measurement: `WouldBlock` while the sensor has nothing new.
    pub fn measurement<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> NbResult<Measurement, Scd4xError<I2C::Error>> {
        if !self.data_ready(delay)? {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.read_measurement(delay)?)
    }

    /// Triggers a single-shot measurement and waits out its execution time.
    pub fn measure_single_shot<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::MeasureSingleShot, delay)
    }

    /// Waits for data to become ready, polling every `interval` for at most `timeout`.
    pub fn wait_for_measurement<D: DelayNs>(
        &mut self,
        delay: &mut D,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Measurement, Scd4xError<I2C::Error>> {
        self.execute_blocking_with_timeout(delay, timeout, interval, |drv, d| drv.measurement(d))
    }

    pub fn power_down<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::PowerDown, delay)
    }

    pub fn set_sensor_altitude<D: DelayNs>(
        &mut self,
        altitude_m: u16,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::SetSensorAltitude(altitude_m), delay)
    }

    pub fn set_temperature_offset<D: DelayNs>(
        &mut self,
        offset_c: f32,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        let ticks = crate::common::types::temperature_offset_ticks(offset_c);
        self.send(Command::SetTemperatureOffset(ticks), delay)
    }

    pub fn set_automatic_self_calibration<D: DelayNs>(
        &mut self,
        enabled: bool,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        self.send(Command::SetAutomaticSelfCalibration(enabled), delay)
    }

    /// Issues the forced recalibration against `reference_ppm`.
    ///
    /// A sensor that was not measuring answers with the sentinel, reported
    /// as [`FrcCorrection::Rejected`] rather than an error.
    pub fn perform_forced_recalibration<D: DelayNs>(
        &mut self,
        reference_ppm: u16,
        delay: &mut D,
    ) -> Result<FrcCorrection, Scd4xError<I2C::Error>> {
        let [word] =
            self.execute_read::<D, 1>(Command::PerformForcedRecalibration(reference_ppm), delay)?;
        Ok(FrcCorrection::from_word(word))
    }
}
