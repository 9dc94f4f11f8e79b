// src/node/calibration.rs

//! Button-triggered forced recalibration.
//!
//! Holding the trigger for the hold time starts a warmup in which the sensor
//! takes single-shot readings of the reference air (normally fresh outdoor
//! air). At the end the sensor is told the reference concentration and
//! returns the correction it applied. The whole procedure blocks the main
//! cycle; every wait goes through the [`Pacer`](super::context::Pacer) so the
//! watchdog stays fed.
//!
//! ```text
//! Idle --held--> Arming --hold time--> Warmup --duration--> Committing
//!   ^              | released              |  failure / cancel   |
//!   +--------------+                       +------> cleanup <-----+
//! ```
//!
//! Cleanup (power down, wait for the trigger to be released) runs on every
//! exit from Warmup or Committing and never on a cancelled hold.

use core::time::Duration;

use embedded_hal::digital::InputPin;

use super::config::CalibrationConfig;
use super::context::NodeContext;
use super::diagnostics::{EventSink, Severity};
use super::session::{SensorSession, SessionError};
use super::status::{StatusIndicator, StatusSignal};
use super::trigger::Trigger;
use crate::common::{timing, BusProvider, Fault, FrcCorrection, Timer, Watchdog};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    /// Trigger held, hold time not yet reached.
    Arming,
    /// Taking reference readings.
    Warmup,
    /// Issuing the recalibration.
    Committing,
}

/// Transient state of one calibration attempt.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationSession {
    pub held_since: Option<Duration>,
    pub phase: CalibrationPhase,
    pub readings_taken: u32,
    pub running_average_ppm: f32,
}

impl CalibrationSession {
    pub const IDLE: Self = Self {
        held_since: None,
        phase: CalibrationPhase::Idle,
        readings_taken: 0,
        running_average_ppm: 0.0,
    };

    fn record(&mut self, ppm: u16) {
        self.readings_taken += 1;
        let n = self.readings_taken as f32;
        self.running_average_ppm += (f32::from(ppm) - self.running_average_ppm) / n;
    }

    pub fn mean_ppm(&self) -> Option<f32> {
        (self.readings_taken > 0).then_some(self.running_average_ppm)
    }
}

/// Snapshot passed to a [`ProgressSink`] after every warmup sample.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalibrationProgress {
    pub remaining_ms: u64,
    pub total_ms: u64,
    pub readings_taken: u32,
    pub latest_ppm: Option<u16>,
    pub running_mean_ppm: Option<f32>,
}

/// Observer of a running calibration, typically a display.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: &CalibrationProgress);

    fn on_phase(&mut self, _phase: CalibrationPhase) {}
}

impl ProgressSink for () {
    fn on_progress(&mut self, _progress: &CalibrationProgress) {}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalibrationError {
    #[error("sensor could not be prepared: {0}")]
    SensorUnavailable(SessionError),
    /// The sensor answered with the "not measuring" sentinel.
    #[error("sensor rejected the recalibration")]
    Rejected,
    #[error("recalibration command failed: {0}")]
    Command(SessionError),
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CalibrationOutcome {
    /// The trigger is not held; nothing happened.
    NotTriggered,
    /// Released before the hold time, or aborted during a cancellable warmup.
    Cancelled,
    Completed {
        correction_ppm: i16,
        /// Mean of the warmup readings, `None` if none succeeded.
        mean_ppm: Option<f32>,
    },
    Failed(CalibrationError),
}

enum Step {
    Enter(CalibrationPhase),
    Finish(CalibrationOutcome),
}

pub struct CalibrationWorkflow<I> {
    trigger: Trigger<I>,
    config: CalibrationConfig,
    state: CalibrationSession,
}

impl<I: InputPin> CalibrationWorkflow<I> {
    pub fn new(trigger: I, config: CalibrationConfig) -> Self {
        Self {
            trigger: Trigger::new(trigger),
            config,
            state: CalibrationSession::IDLE,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.state.phase
    }

    pub fn session_state(&self) -> &CalibrationSession {
        &self.state
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Checks the trigger and, if it is held, runs the whole procedure.
    ///
    /// Returns [`CalibrationOutcome::NotTriggered`] straight away when the
    /// trigger is not asserted. Otherwise returns once the procedure has
    /// ended and the trigger has been released; the caller then resumes
    /// normal sampling.
    pub fn poll<B, T, W, S, G, L>(
        &mut self,
        sensor: &mut SensorSession<B>,
        ctx: &mut NodeContext<T, W, S>,
        progress: &mut G,
        status: &mut L,
    ) -> CalibrationOutcome
    where
        B: BusProvider,
        T: Timer,
        W: Watchdog,
        S: EventSink,
        G: ProgressSink,
        L: StatusIndicator,
    {
        loop {
            let step = match self.state.phase {
                CalibrationPhase::Idle => {
                    if !self.trigger.is_asserted(&mut ctx.pacer) {
                        return CalibrationOutcome::NotTriggered;
                    }
                    self.state.held_since = Some(ctx.pacer.now());
                    log::info!(
                        "Calibration trigger held, keep holding for {} ms",
                        self.config.hold_time.as_millis()
                    );
                    Step::Enter(CalibrationPhase::Arming)
                }
                CalibrationPhase::Arming => self.arm(ctx),
                CalibrationPhase::Warmup => self.warm_up(sensor, ctx, progress, status),
                CalibrationPhase::Committing => Step::Finish(self.commit(sensor, ctx, status)),
            };

            match step {
                Step::Enter(phase) => {
                    log::debug!("calibration {:?} -> {:?}", self.state.phase, phase);
                    self.state.phase = phase;
                    progress.on_phase(phase);
                }
                Step::Finish(outcome) => {
                    if self.state.phase != CalibrationPhase::Arming {
                        self.clean_up(sensor, ctx);
                    }
                    self.state = CalibrationSession::IDLE;
                    progress.on_phase(CalibrationPhase::Idle);
                    return outcome;
                }
            }
        }
    }

    fn arm<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>) -> Step
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let held_since = self.state.held_since.unwrap_or_else(|| ctx.pacer.now());
        loop {
            let held = ctx.pacer.now().saturating_sub(held_since);
            if !self.trigger.is_asserted_raw() {
                log::info!("Calibration cancelled, trigger released after {} ms", held.as_millis());
                return Step::Finish(CalibrationOutcome::Cancelled);
            }
            if held >= self.config.hold_time {
                return Step::Enter(CalibrationPhase::Warmup);
            }
            ctx.pacer.wait(timing::INPUT_POLL_INTERVAL);
        }
    }

    fn warm_up<B, T, W, S, G, L>(
        &mut self,
        sensor: &mut SensorSession<B>,
        ctx: &mut NodeContext<T, W, S>,
        progress: &mut G,
        status: &mut L,
    ) -> Step
    where
        B: BusProvider,
        T: Timer,
        W: Watchdog,
        S: EventSink,
        G: ProgressSink,
        L: StatusIndicator,
    {
        let cfg = self.config;
        ctx.report(
            Severity::Info,
            None,
            format_args!(
                "FRC started - {} s warmup, {} ppm reference",
                cfg.warmup_duration.as_secs(),
                cfg.reference_ppm
            ),
        );
        status.indicate(StatusSignal::CalibrationAcknowledged);

        if let Err(e) = sensor.suspend_periodic(ctx) {
            ctx.report(
                Severity::Error,
                Some(Fault::CalibrationFailed),
                format_args!("FRC aborted, sensor not responding: {}", e),
            );
            status.indicate(StatusSignal::CalibrationFailed);
            return Step::Finish(CalibrationOutcome::Failed(CalibrationError::SensorUnavailable(e)));
        }

        let start = ctx.pacer.now();
        let total = cfg.warmup_duration;
        let end = start + total;
        let mut latest = None;
        let mut released = false;
        let mut slot: u32 = 0;

        while ctx.pacer.now() < end {
            if self.cancel_requested(&mut released) {
                ctx.report(Severity::Info, None, format_args!("FRC cancelled during warmup"));
                return Step::Finish(CalibrationOutcome::Cancelled);
            }

            match sensor.measure_single_shot(ctx) {
                Ok(m) if m.co2_ppm > 0 => {
                    self.state.record(m.co2_ppm);
                    latest = Some(m.co2_ppm);
                    status.indicate(StatusSignal::WarmupReading);
                    log::info!(
                        "Warmup reading {}: {} ppm (mean {:.0} ppm)",
                        self.state.readings_taken,
                        m.co2_ppm,
                        self.state.running_average_ppm
                    );
                }
                Ok(_) => log::debug!("warmup reading of 0 ppm ignored"),
                Err(e) => {
                    log::warn!("Warmup measurement failed: {}", e);
                    status.indicate(StatusSignal::WarmupError);
                }
            }

            let remaining = end.saturating_sub(ctx.pacer.now());
            progress.on_progress(&CalibrationProgress {
                remaining_ms: remaining.as_millis() as u64,
                total_ms: total.as_millis() as u64,
                readings_taken: self.state.readings_taken,
                latest_ppm: latest,
                running_mean_ppm: self.state.mean_ppm(),
            });

            slot += 1;
            let next = (start + cfg.warmup_interval * slot).min(end);
            if self.pause_until(ctx, next, &mut released) {
                ctx.report(Severity::Info, None, format_args!("FRC cancelled during warmup"));
                return Step::Finish(CalibrationOutcome::Cancelled);
            }
        }

        match self.state.mean_ppm() {
            Some(mean) => {
                let diff = mean - f32::from(cfg.reference_ppm);
                let deviation = if diff < 0.0 { -diff } else { diff };
                if deviation > cfg.max_deviation_ppm {
                    ctx.report(
                        Severity::Warning,
                        None,
                        format_args!(
                            "FRC warmup avg {:.0} ppm vs reference {} ppm (diff: {:.0})",
                            mean, cfg.reference_ppm, diff
                        ),
                    );
                }
            }
            None => log::warn!("No valid warmup readings, recalibrating anyway"),
        }
        Step::Enter(CalibrationPhase::Committing)
    }

    /// A fresh press (seen released, now asserted) cancels a cancellable warmup.
    fn cancel_requested(&mut self, released: &mut bool) -> bool {
        if !self.config.warmup_cancellable {
            return false;
        }
        if self.trigger.is_asserted_raw() {
            *released
        } else {
            *released = true;
            false
        }
    }

    /// Waits until `deadline`, watching for a cancelling press if allowed.
    fn pause_until<T, W, S>(&mut self, ctx: &mut NodeContext<T, W, S>, deadline: Duration, released: &mut bool) -> bool
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        if !self.config.warmup_cancellable {
            ctx.pacer.wait_until(deadline);
            return false;
        }
        loop {
            let now = ctx.pacer.now();
            if now >= deadline {
                return false;
            }
            if self.cancel_requested(released) {
                return true;
            }
            ctx.pacer.wait((deadline - now).min(timing::INPUT_POLL_INTERVAL));
        }
    }

    fn commit<B, T, W, S, L>(
        &mut self,
        sensor: &mut SensorSession<B>,
        ctx: &mut NodeContext<T, W, S>,
        status: &mut L,
    ) -> CalibrationOutcome
    where
        B: BusProvider,
        T: Timer,
        W: Watchdog,
        S: EventSink,
        L: StatusIndicator,
    {
        status.indicate(StatusSignal::CalibrationCommitting);
        let reference = self.config.reference_ppm;

        match sensor.forced_recalibration(ctx, reference) {
            Ok(FrcCorrection::Applied(correction)) => {
                ctx.report(
                    Severity::Info,
                    None,
                    format_args!(
                        "FRC successful! Correction: {} ppm, reference: {} ppm",
                        correction, reference
                    ),
                );
                status.indicate(StatusSignal::CalibrationSucceeded);
                CalibrationOutcome::Completed {
                    correction_ppm: correction,
                    mean_ppm: self.state.mean_ppm(),
                }
            }
            Ok(FrcCorrection::Rejected) => {
                ctx.report(
                    Severity::Error,
                    Some(Fault::CalibrationFailed),
                    format_args!("FRC failed - sensor returned 0xFFFF (not measuring)"),
                );
                status.indicate(StatusSignal::CalibrationFailed);
                CalibrationOutcome::Failed(CalibrationError::Rejected)
            }
            Err(e) => {
                ctx.report(
                    Severity::Error,
                    Some(Fault::CalibrationFailed),
                    format_args!("FRC command failed: {}", e),
                );
                status.indicate(StatusSignal::CalibrationFailed);
                CalibrationOutcome::Failed(CalibrationError::Command(e))
            }
        }
    }

    fn clean_up<B, T, W, S>(&mut self, sensor: &mut SensorSession<B>, ctx: &mut NodeContext<T, W, S>)
    where
        B: BusProvider,
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        sensor.power_down(ctx);
        self.trigger
            .wait_release(&mut ctx.pacer, self.config.release_debounce);
        log::info!("Calibration finished, returning to normal operation");
    }
}
