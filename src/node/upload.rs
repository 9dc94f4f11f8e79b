// src/node/upload.rs

use core::fmt;

use super::config::{DeviceName, EscalationPolicy, UploadConfig};
use super::context::NodeContext;
use super::diagnostics::{EventSink, Severity};
use super::payload::{self, PayloadError};
use crate::common::{Fault, Reading, Timer, Transport, Watchdog};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// The transport could not (re)establish connectivity.
    #[error("not connected")]
    NotConnected,
    /// The collector answered with a non-success status.
    #[error("collector returned HTTP {0}")]
    Status(u16),
    /// The request failed below the status level.
    #[error("transport error")]
    Transport,
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl EscalationPolicy {
    /// Severity to report after `failures` consecutive failures, if any.
    pub fn tier_for(&self, failures: u32) -> Option<Severity> {
        if failures == self.warning_after {
            Some(Severity::Warning)
        } else if failures == self.error_after {
            Some(Severity::Error)
        } else if failures == self.critical_after {
            Some(Severity::Critical)
        } else if failures > self.critical_after
            && self.rearm_every > 0
            && (failures - self.critical_after) % self.rearm_every == 0
        {
            Some(Severity::Critical)
        } else {
            None
        }
    }
}

/// Turns readings into delivery attempts and keeps the failure chain.
///
/// Connectivity is checked right before every attempt; a failed check is
/// part of the same failure chain as a failed send. The dispatcher never
/// touches the buffer, so nothing is lost when a send fails.
pub struct UploadDispatcher<X> {
    transport: X,
    config: UploadConfig,
    device: DeviceName,
}

impl<X: Transport> UploadDispatcher<X> {
    pub fn new(transport: X, config: UploadConfig, device: DeviceName) -> Self {
        Self {
            transport,
            config,
            device,
        }
    }

    pub fn send_single<T, W, S>(&mut self, reading: &Reading, ctx: &mut NodeContext<T, W, S>) -> Result<(), UploadError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let result = payload::single(&self.device, reading)
            .map_err(UploadError::from)
            .and_then(|body| self.deliver(self.config.endpoints.single, &body));
        self.settle(result, 1, ctx)
    }

    pub fn send_batch<T, W, S>(&mut self, readings: &[Reading], ctx: &mut NodeContext<T, W, S>) -> Result<(), UploadError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        let result = payload::batch(&self.device, readings)
            .map_err(UploadError::from)
            .and_then(|body| self.deliver(self.config.endpoints.batch, &body));
        self.settle(result, readings.len(), ctx)
    }

    fn deliver(&mut self, endpoint: &str, body: &str) -> Result<(), UploadError> {
        if let Err(e) = self.transport.ensure_connected() {
            log::debug!("reconnect failed: {:?}", e);
            return Err(UploadError::NotConnected);
        }
        match self.transport.post(endpoint, body) {
            Ok(status) if (200..300).contains(&status) => Ok(()),
            Ok(status) => Err(UploadError::Status(status)),
            Err(e) => {
                log::debug!("POST {} failed: {:?}", endpoint, e);
                Err(UploadError::Transport)
            }
        }
    }

    fn settle<T, W, S>(
        &mut self,
        result: Result<(), UploadError>,
        count: usize,
        ctx: &mut NodeContext<T, W, S>,
    ) -> Result<(), UploadError>
    where
        T: Timer,
        W: Watchdog,
        S: EventSink,
    {
        match result {
            Ok(()) => {
                let chain = ctx.counters.consecutive_upload_failures;
                ctx.counters.consecutive_upload_failures = 0;
                ctx.counters.total_uploads_ok += 1;
                log::info!("Uploaded {} reading(s)", count);
                if chain >= self.config.escalation.warning_after {
                    ctx.report(
                        Severity::Info,
                        None,
                        format_args!("Uploads recovered after {} failures", chain),
                    );
                }
                Ok(())
            }
            Err(e) => {
                ctx.counters.consecutive_upload_failures += 1;
                ctx.counters.total_upload_failures += 1;
                let chain = ctx.counters.consecutive_upload_failures;
                log::warn!("Upload of {} reading(s) failed ({} in a row): {}", count, chain, e);
                if let Some(severity) = self.config.escalation.tier_for(chain) {
                    ctx.report(
                        severity,
                        Some(Fault::UploadFailed),
                        format_args!("Upload failed {} times in a row (last: {})", chain, Last(e)),
                    );
                }
                Err(e)
            }
        }
    }

    pub fn escalation(&self) -> &EscalationPolicy {
        &self.config.escalation
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }
}

/// Short form of an upload error for event messages.
struct Last(UploadError);

impl fmt::Display for Last {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            UploadError::Status(code) => write!(f, "HTTP {}", code),
            UploadError::NotConnected => f.write_str("no connection"),
            UploadError::Transport => f.write_str("transport error"),
            UploadError::Payload(_) => f.write_str("payload too large"),
        }
    }
}
