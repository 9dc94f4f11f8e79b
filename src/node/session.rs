// src/node/session.rs

use core::fmt::Debug;

use embedded_hal::delay::DelayNs;
use nb::Result as NbResult;

use super::bus_recovery::{BusRecovery, LineState, RecoveryError};
use super::config::{AcquisitionMode, SensorSettings};
use super::context::NodeContext;
use super::diagnostics::{EventSink, Severity};
use crate::common::{
    timing, BusProvider, Fault, FrcCorrection, Measurement, Reading, Scd4xError, SerialNumber,
    Timer, Watchdog,
};
use crate::driver::Scd4x;

/// Power/measurement state of the sensor as far as the session knows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SensorMode {
    PoweredDown,
    /// Idle and accepting commands.
    Awake,
    /// In periodic measurement mode.
    Measuring,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Communication with the sensor failed.
    #[error("sensor bus fault: {0}")]
    BusFault(Scd4xError),
    /// Periodic mode was polled before fresh data was available.
    #[error("no new measurement available")]
    DataNotReady,
    #[error("sensor reported invalid identity {0}")]
    InvalidIdentity(SerialNumber),
    #[error("found sensor {found}, expected {expected}")]
    IdentityMismatch {
        expected: SerialNumber,
        found: SerialNumber,
    },
}

impl<E: Debug> From<Scd4xError<E>> for SessionError {
    fn from(e: Scd4xError<E>) -> Self {
        SessionError::BusFault(e.erase())
    }
}

/// Owns the sensor and the bus it sits on.
///
/// Produces one [`Reading`] per [`sample`](Self::sample) call or a typed
/// fault, counts consecutive bus faults and runs the bus recovery each time
/// the count reaches a multiple of the configured threshold.
pub struct SensorSession<B: BusProvider> {
    bus: B,
    driver: Option<Scd4x<B::I2c>>,
    recovery: BusRecovery,
    settings: SensorSettings,
    mode: SensorMode,
    last_serial: Option<SerialNumber>,
    suspended: bool,
    suspensions: u32,
}

impl<B: BusProvider> SensorSession<B> {
    pub fn new(bus: B, i2c: B::I2c, settings: SensorSettings) -> Self {
        Self {
            bus,
            driver: Some(Scd4x::new(i2c)),
            recovery: BusRecovery::new(),
            settings,
            mode: SensorMode::PoweredDown,
            last_serial: None,
            suspended: false,
            suspensions: 0,
        }
    }

    pub fn mode(&self) -> SensorMode {
        self.mode
    }

    /// Identity read at startup, `None` before [`start`](Self::start) succeeded.
    pub fn serial(&self) -> Option<SerialNumber> {
        self.last_serial
    }

    pub fn acquisition(&self) -> AcquisitionMode {
        self.settings.mode
    }

    /// `true` while calibration holds periodic sampling.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Number of times periodic sampling has been suspended since boot.
    pub fn suspensions(&self) -> u32 {
        self.suspensions
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn driver(&mut self) -> Result<&mut Scd4x<B::I2c>, SessionError> {
        self.driver
            .as_mut()
            .ok_or(SessionError::BusFault(Scd4xError::NotAttached))
    }

    // --- Lifecycle ---

    /// Brings the sensor into a known state and verifies its identity.
    ///
    /// A sensor that is missing, reports a blank serial or a serial other than
    /// the expected one is a startup fault.
    pub fn start<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<SerialNumber, SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let serial = match self.read_identity(&mut ctx.pacer) {
            Ok(serial) => serial,
            Err(e) => {
                ctx.counters.total_bus_faults += 1;
                ctx.report(
                    Severity::Critical,
                    Some(Fault::BusFault),
                    format_args!("Sensor not found on I2C bus: {}", e),
                );
                return Err(e);
            }
        };
        if !serial.is_valid() {
            ctx.report(
                Severity::Critical,
                Some(Fault::BusFault),
                format_args!("Sensor reported invalid serial {}", serial),
            );
            return Err(SessionError::InvalidIdentity(serial));
        }
        if let Some(expected) = self.settings.expected_serial.map(SerialNumber::new) {
            if expected != serial {
                ctx.report(
                    Severity::Critical,
                    Some(Fault::BusFault),
                    format_args!("Unexpected sensor {} (expected {})", serial, expected),
                );
                return Err(SessionError::IdentityMismatch { expected, found: serial });
            }
        }
        self.last_serial = Some(serial);
        self.mode = SensorMode::Awake;

        self.apply_settings(ctx);

        match self.settings.mode {
            AcquisitionMode::Periodic => {
                let started = self.driver()?.start_periodic_measurement(&mut ctx.pacer);
                if let Err(e) = started {
                    let err = self.on_bus_fault(ctx, e);
                    ctx.report(
                        Severity::Error,
                        Some(Fault::BusFault),
                        format_args!("Starting periodic measurement failed: {}", err),
                    );
                    return Err(err);
                }
                self.mode = SensorMode::Measuring;
            }
            AcquisitionMode::SingleShot => self.power_down(ctx),
        }
        ctx.report(
            Severity::Info,
            None,
            format_args!("Sensor {} started ({:?} mode)", serial, self.settings.mode),
        );
        Ok(serial)
    }

    fn read_identity<D: DelayNs>(&mut self, delay: &mut D) -> Result<SerialNumber, SessionError> {
        let drv = self.driver()?;
        drv.wake_up(delay)?;
        // a soft reset can leave it measuring
        if let Err(e) = drv.stop_periodic_measurement(delay) {
            log::debug!("stop_periodic_measurement at startup: {}", e);
        }
        drv.reinit(delay)?;
        Ok(drv.serial_number(delay)?)
    }

    fn apply_settings<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>)
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let settings = self.settings;
        let Some(drv) = self.driver.as_mut() else {
            return;
        };
        if let Some(altitude) = settings.altitude_m {
            if let Err(e) = drv.set_sensor_altitude(altitude, &mut ctx.pacer) {
                ctx.report(
                    Severity::Warning,
                    Some(Fault::BusFault),
                    format_args!("Setting altitude {} m failed: {}", altitude, e),
                );
            }
        }
        if let Some(offset) = settings.temperature_offset_c {
            if let Err(e) = drv.set_temperature_offset(offset, &mut ctx.pacer) {
                ctx.report(
                    Severity::Warning,
                    Some(Fault::BusFault),
                    format_args!("Setting temperature offset {:.1} C failed: {}", offset, e),
                );
            }
        }
        if let Some(enabled) = settings.automatic_self_calibration {
            if let Err(e) = drv.set_automatic_self_calibration(enabled, &mut ctx.pacer) {
                ctx.report(
                    Severity::Warning,
                    Some(Fault::BusFault),
                    format_args!("Setting automatic self-calibration failed: {}", e),
                );
            }
        }
    }

    /// PoweredDown -> Awake. The wake itself is never acknowledged, so the
    /// sensor is probed afterwards; no answer is a bus fault.
    pub fn wake<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<(), SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        if self.mode != SensorMode::PoweredDown {
            return Ok(());
        }
        let probe = {
            let drv = self.driver()?;
            drv.wake_up(&mut ctx.pacer)
                .and_then(|()| drv.data_ready(&mut ctx.pacer).map(|_| ()))
        };
        match probe {
            Ok(()) => {
                self.mode = SensorMode::Awake;
                Ok(())
            }
            Err(e) => Err(self.on_bus_fault(ctx, e)),
        }
    }

    /// Takes one reading.
    ///
    /// In single-shot mode the sensor is woken and a measurement triggered;
    /// in periodic mode the latest measurement is polled. An implausible CO2
    /// value still yields a reading, flagged with a range-fault diagnostic.
    pub fn sample<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<Reading, SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        match self.settings.mode {
            AcquisitionMode::SingleShot => self.wake(ctx)?,
            AcquisitionMode::Periodic if self.mode != SensorMode::Measuring => self.resume(ctx)?,
            AcquisitionMode::Periodic => {}
        }

        match self.acquire(&mut ctx.pacer) {
            Ok(measurement) => {
                self.on_success(ctx);
                ctx.counters.total_samples += 1;
                let reading = Reading::new(measurement, ctx.pacer.timestamp());
                log::debug!(
                    "CO2 {} ppm, {:.1} C, {:.1} %RH",
                    reading.co2_ppm(),
                    reading.temperature_c(),
                    reading.relative_humidity_pct()
                );
                if !reading.is_plausible() {
                    ctx.report(
                        Severity::Warning,
                        Some(Fault::RangeFault),
                        format_args!("CO2 reading out of range: {} ppm", reading.co2_ppm()),
                    );
                }
                Ok(reading)
            }
            Err(nb::Error::WouldBlock) => {
                log::debug!("measurement not ready yet");
                Err(SessionError::DataNotReady)
            }
            Err(nb::Error::Other(e)) => Err(self.on_bus_fault(ctx, e)),
        }
    }

    fn acquire<D: DelayNs>(&mut self, delay: &mut D) -> NbResult<Measurement, Scd4xError> {
        let mode = self.settings.mode;
        let drv = self
            .driver
            .as_mut()
            .ok_or(nb::Error::Other(Scd4xError::NotAttached))?;
        match mode {
            AcquisitionMode::SingleShot => {
                drv.measure_single_shot(delay)
                    .map_err(|e| nb::Error::Other(e.erase()))?;
                drv.wait_for_measurement(
                    delay,
                    timing::DATA_READY_GRACE,
                    timing::DATA_READY_POLL_INTERVAL,
                )
                .map_err(|e| match e {
                    Scd4xError::Timeout => nb::Error::WouldBlock,
                    e => nb::Error::Other(e.erase()),
                })
            }
            AcquisitionMode::Periodic => drv.measurement(delay).map_err(|e| e.map(|e| e.erase())),
        }
    }

    /// Best effort; a failure is logged and the session carries on.
    pub fn power_down<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>)
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        if self.mode == SensorMode::Measuring {
            log::debug!("power_down skipped, sensor is measuring");
            return;
        }
        let Some(drv) = self.driver.as_mut() else {
            return;
        };
        match drv.power_down(&mut ctx.pacer) {
            Ok(()) => self.mode = SensorMode::PoweredDown,
            Err(e) => log::warn!("Sensor power down failed: {}", e),
        }
    }

    /// Leaves periodic mode so the sensor accepts single-shot and
    /// recalibration commands. Bus faults here are not counted.
    pub fn suspend_periodic<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<(), SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        self.suspended = true;
        self.suspensions += 1;
        let drv = self.driver()?;
        drv.wake_up(&mut ctx.pacer)?;
        drv.stop_periodic_measurement(&mut ctx.pacer)?;
        self.mode = SensorMode::Awake;
        log::info!("Periodic sampling suspended");
        Ok(())
    }

    /// Returns to the configured acquisition mode after a suspension.
    pub fn resume<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<(), SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        self.suspended = false;
        if self.settings.mode != AcquisitionMode::Periodic || self.mode == SensorMode::Measuring {
            return Ok(());
        }
        self.wake(ctx)?;
        let started = self.driver()?.start_periodic_measurement(&mut ctx.pacer);
        match started {
            Ok(()) => {
                self.mode = SensorMode::Measuring;
                log::info!("Periodic measurement running");
                Ok(())
            }
            Err(e) => Err(self.on_bus_fault(ctx, e)),
        }
    }

    /// One single-shot measurement outside the regular cadence. Not counted
    /// as a sample.
    pub fn measure_single_shot<T, W, S>(
        &mut self,
        ctx: &mut NodeContext<T, W, S>,
    ) -> Result<Measurement, SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let drv = self.driver()?;
        drv.measure_single_shot(&mut ctx.pacer)?;
        Ok(drv.wait_for_measurement(
            &mut ctx.pacer,
            timing::DATA_READY_GRACE,
            timing::DATA_READY_POLL_INTERVAL,
        )?)
    }

    pub fn forced_recalibration<T, W, S>(
        &mut self,
        ctx: &mut NodeContext<T, W, S>,
        reference_ppm: u16,
    ) -> Result<FrcCorrection, SessionError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        Ok(self
            .driver()?
            .perform_forced_recalibration(reference_ppm, &mut ctx.pacer)?)
    }

    // --- Fault accounting ---

    fn on_success<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>)
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let prior = ctx.counters.consecutive_bus_faults;
        if prior > 0 {
            ctx.counters.consecutive_bus_faults = 0;
            ctx.report(
                Severity::Info,
                None,
                format_args!("Sensor communication restored after {} failed attempts", prior),
            );
        }
    }

    fn on_bus_fault<E, T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>, err: Scd4xError<E>) -> SessionError
    where
        E: Debug,
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let err = err.erase();
        ctx.counters.consecutive_bus_faults += 1;
        ctx.counters.total_bus_faults += 1;
        let count = ctx.counters.consecutive_bus_faults;
        log::warn!("Sensor bus fault ({} in a row): {}", count, err);

        if count % self.settings.bus_fault_threshold.max(1) == 0 {
            ctx.report(
                Severity::Warning,
                Some(Fault::BusFault),
                format_args!("{} consecutive I2C faults ({}), recovering bus", count, err),
            );
            // outcome is reported by recover()
            let _ = self.recover(ctx);
        }
        SessionError::BusFault(err)
    }

    // --- Bus recovery ---

    /// Tears the I2C driver down, clocks the bus free, rebuilds the driver
    /// and checks the sensor still answers with the same identity.
    ///
    /// On success the consecutive fault count is cleared and periodic
    /// measurement restarted if it was running. On failure the session is
    /// left powered down so the next sample starts again from a wake.
    pub fn recover<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Result<(), RecoveryError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        ctx.counters.recovery_attempts += 1;
        log::warn!("Starting I2C bus recovery");

        let outcome = match self.cycle_bus(&mut ctx.pacer) {
            Ok(()) => self.reattach(&mut ctx.pacer),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(serial) => {
                ctx.counters.consecutive_bus_faults = 0;
                ctx.report(
                    Severity::Info,
                    None,
                    format_args!("I2C bus recovered, sensor {} responding", serial),
                );
                Ok(())
            }
            Err(e) => {
                ctx.counters.failed_recoveries += 1;
                self.mode = SensorMode::PoweredDown;
                ctx.report(
                    Severity::Critical,
                    Some(Fault::RecoveryFailed),
                    format_args!("I2C bus recovery failed: {}", e),
                );
                Err(e)
            }
        }
    }

    fn cycle_bus<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), RecoveryError> {
        let driver = self.driver.take().ok_or(RecoveryError::NoResponse)?;
        let address = driver.address();
        let (mut scl, mut sda) = self.bus.release(driver.release());
        let line = self.recovery.run(&mut scl, &mut sda, delay);
        // the peripheral comes back whatever the pins did
        self.driver = Some(Scd4x::with_address(self.bus.reclaim(scl, sda), address));

        match line? {
            LineState::Released => Ok(()),
            LineState::HeldLow => Err(RecoveryError::LineHeld),
        }
    }

    fn reattach<D: DelayNs>(&mut self, delay: &mut D) -> Result<SerialNumber, RecoveryError> {
        let restart_periodic = self.settings.mode == AcquisitionMode::Periodic && !self.suspended;
        let drv = self.driver.as_mut().ok_or(RecoveryError::NoResponse)?;

        drv.wake_up(delay).map_err(|_| RecoveryError::NoResponse)?;
        if let Err(e) = drv.stop_periodic_measurement(delay) {
            log::debug!("stop_periodic_measurement after recovery: {}", e);
        }
        let serial = drv.serial_number(delay).map_err(|e| {
            log::debug!("identity read after recovery failed: {}", e);
            RecoveryError::NoResponse
        })?;
        if let Some(expected) = self.last_serial {
            if expected != serial {
                return Err(RecoveryError::IdentityMismatch {
                    expected: expected.value(),
                    found: serial.value(),
                });
            }
        }

        if restart_periodic {
            drv.start_periodic_measurement(delay)
                .map_err(|_| RecoveryError::NoResponse)?;
            self.mode = SensorMode::Measuring;
        } else {
            self.mode = SensorMode::Awake;
        }
        Ok(serial)
    }
}
