// src/node/cycle.rs

use core::time::Duration;

use embedded_hal::digital::InputPin;

use super::buffer::{PushOutcome, ReadingBuffer};
use super::calibration::{CalibrationOutcome, CalibrationWorkflow, ProgressSink};
use super::config::{AcquisitionMode, ConfigError, NodeConfig};
use super::context::{FaultCounters, NodeContext, Pacer};
use super::diagnostics::{DiagnosticsReporter, EventSink, Severity};
use super::session::{SensorSession, SessionError};
use super::status::StatusIndicator;
use super::upload::{UploadDispatcher, UploadError};
use crate::common::{BusProvider, Fault, Reading, SerialNumber, Timer, Transport, Watchdog};

/// Everything the cycle needs from the board.
pub struct Peripherals<B: BusProvider, I, X, T, W, S, G, L> {
    pub bus: B,
    pub i2c: B::I2c,
    /// Calibration trigger, active low.
    pub trigger: I,
    pub transport: X,
    pub timer: T,
    pub watchdog: W,
    pub events: S,
    pub progress: G,
    pub status: L,
}

/// What a single [`MainCycle::tick`] did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub calibration: Option<CalibrationOutcome>,
    pub sample: Option<Result<Reading, SessionError>>,
    pub push: Option<PushOutcome>,
    pub flush: Option<Result<usize, UploadError>>,
}

/// The node's scheduler.
///
/// Each tick: calibration trigger, then (if no calibration ran) the sample
/// due check, sample, buffer, flush due check, upload and the heartbeat.
/// [`run`](Self::run) ticks forever; only a reset ends it.
pub struct MainCycle<B: BusProvider, I, X, T, W, S, G, L, const C: usize> {
    config: NodeConfig,
    ctx: NodeContext<T, W, S>,
    session: SensorSession<B>,
    calibration: CalibrationWorkflow<I>,
    buffer: ReadingBuffer<C>,
    dispatcher: UploadDispatcher<X>,
    progress: G,
    status: L,
    next_sample: Duration,
    next_heartbeat: Option<Duration>,
}

impl<B, I, X, T, W, S, G, L, const C: usize> MainCycle<B, I, X, T, W, S, G, L, C>
where
    B: BusProvider,
    I: InputPin,
    X: Transport,
    T: Timer,
    W: Watchdog,
    S: EventSink,
    G: ProgressSink,
    L: StatusIndicator,
{
    pub fn new(config: NodeConfig, peripherals: Peripherals<B, I, X, T, W, S, G, L>) -> Result<Self, ConfigError> {
        config.validate(C)?;
        let Peripherals {
            bus,
            i2c,
            trigger,
            transport,
            timer,
            watchdog,
            events,
            progress,
            status,
        } = peripherals;

        let pacer = Pacer::new(timer, watchdog, config.watchdog.max_slice);
        let now = pacer.now();
        let diagnostics = DiagnosticsReporter::new(config.device.clone(), events);

        Ok(Self {
            ctx: NodeContext::new(pacer, diagnostics),
            session: SensorSession::new(bus, i2c, config.sensor),
            calibration: CalibrationWorkflow::new(trigger, config.calibration),
            buffer: ReadingBuffer::new(config.buffer),
            dispatcher: UploadDispatcher::new(transport, config.upload, config.device.clone()),
            progress,
            status,
            next_sample: now,
            next_heartbeat: config.heartbeat_interval.map(|interval| now + interval),
            config,
        })
    }

    /// Brings the sensor up. A failure is reported and left to the regular
    /// samples to retry.
    pub fn start(&mut self) -> Result<SerialNumber, SessionError> {
        self.ctx.pacer.feed();
        self.ctx.report(
            Severity::Info,
            None,
            format_args!(
                "Node booted, sampling every {} s",
                self.config.sample_interval.as_secs()
            ),
        );
        self.session.start(&mut self.ctx)
    }

    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.ctx.pacer.feed();

        let outcome = self.calibration.poll(
            &mut self.session,
            &mut self.ctx,
            &mut self.progress,
            &mut self.status,
        );
        if outcome != CalibrationOutcome::NotTriggered {
            if let Err(e) = self.session.resume(&mut self.ctx) {
                log::error!("Could not resume sampling after calibration: {}", e);
            }
            report.calibration = Some(outcome);
            return report;
        }

        let now = self.ctx.pacer.now();
        if now >= self.next_sample {
            let result = self.session.sample(&mut self.ctx);
            match &result {
                Ok(reading) => {
                    report.push = Some(self.store(*reading));
                    self.schedule_next_sample(now);
                }
                // retried on the next tick
                Err(SessionError::DataNotReady) => {}
                Err(_) => self.schedule_next_sample(now),
            }
            if self.session.acquisition() == AcquisitionMode::SingleShot {
                self.session.power_down(&mut self.ctx);
            }
            report.sample = Some(result);
        }

        if self.buffer.flush_due(self.ctx.pacer.now()) {
            report.flush = Some(self.flush());
        }

        self.heartbeat();
        report
    }

    /// Ticks forever, idling `tick_interval` between ticks.
    pub fn run(&mut self) -> ! {
        if let Err(e) = self.start() {
            log::error!("Sensor startup failed, will keep retrying: {}", e);
        }
        loop {
            self.tick();
            self.ctx.pacer.wait(self.config.tick_interval);
        }
    }

    fn schedule_next_sample(&mut self, now: Duration) {
        self.next_sample += self.config.sample_interval;
        if self.next_sample <= now {
            // fell behind (calibration, recovery): restart the cadence
            self.next_sample = now + self.config.sample_interval;
        }
    }

    fn store(&mut self, reading: Reading) -> PushOutcome {
        let outcome = self.buffer.push(reading);
        match outcome {
            PushOutcome::Rejected => {
                self.ctx.counters.rejected_readings += 1;
                self.ctx.report(
                    Severity::Error,
                    Some(Fault::BufferFull),
                    format_args!(
                        "Buffer full, dropped {} ppm reading ({} dropped so far)",
                        reading.co2_ppm(),
                        self.buffer.rejected()
                    ),
                );
            }
            PushOutcome::AcceptedAndFlushRequested => {
                log::debug!("buffer at {}/{}, flush requested", self.buffer.len(), C);
            }
            PushOutcome::Accepted => {}
        }
        outcome
    }

    fn flush(&mut self) -> Result<usize, UploadError> {
        let batch = self.buffer.drain();
        self.buffer.record_attempt(self.ctx.pacer.now());

        let sent = match batch.readings() {
            [single] => self.dispatcher.send_single(single, &mut self.ctx),
            readings => self.dispatcher.send_batch(readings, &mut self.ctx),
        };
        match sent {
            Ok(()) => match self.buffer.commit(batch) {
                Ok(delivered) => Ok(delivered),
                Err(e) => {
                    log::error!("Delivered batch could not be committed: {}", e);
                    Ok(0)
                }
            },
            Err(e) => {
                self.buffer.mark_flush_failed();
                Err(e)
            }
        }
    }

    fn heartbeat(&mut self) {
        let (Some(due), Some(interval)) = (self.next_heartbeat, self.config.heartbeat_interval) else {
            return;
        };
        let now = self.ctx.pacer.now();
        if now < due {
            return;
        }
        let c = self.ctx.counters;
        self.ctx.report(
            Severity::Info,
            None,
            format_args!(
                "Heartbeat: {} samples, {} uploads ok, {} upload failures, {} bus faults, {} buffered",
                c.total_samples,
                c.total_uploads_ok,
                c.total_upload_failures,
                c.total_bus_faults,
                self.buffer.len()
            ),
        );
        self.next_heartbeat = Some(now + interval);
    }

    // --- Accessors ---

    pub fn counters(&self) -> &FaultCounters {
        &self.ctx.counters
    }

    pub fn buffer(&self) -> &ReadingBuffer<C> {
        &self.buffer
    }

    pub fn session(&self) -> &SensorSession<B> {
        &self.session
    }

    pub fn calibration(&self) -> &CalibrationWorkflow<I> {
        &self.calibration
    }

    pub fn dispatcher(&self) -> &UploadDispatcher<X> {
        &self.dispatcher
    }

    pub fn context(&self) -> &NodeContext<T, W, S> {
        &self.ctx
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
