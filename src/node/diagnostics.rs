// src/node/diagnostics.rs

use core::fmt::{self, Write};
use core::time::Duration;

use heapless::String;

use super::config::DeviceName;
use super::context::FaultCounters;
use super::payload;
use crate::common::{Fault, Transport};

/// Longest message text carried by an event. Longer messages are truncated.
pub const MAX_MESSAGE_LEN: usize = 160;

pub type Message = String<MAX_MESSAGE_LEN>;

/// Event severity, as understood by the collector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent<'a> {
    pub device: &'a str,
    pub severity: Severity,
    pub fault: Option<Fault>,
    pub message: &'a str,
    pub uptime: Duration,
    /// Free heap, when the platform can tell.
    pub heap: Option<u32>,
    pub total_measurements: Option<u32>,
    pub i2c_errors: Option<u32>,
}

/// Receives diagnostic events.
///
/// Implementations must not block for long and must not emit diagnostics
/// themselves.
pub trait EventSink {
    fn emit(&mut self, event: &DiagnosticEvent<'_>);
}

/// Local logging only.
impl EventSink for () {
    fn emit(&mut self, _event: &DiagnosticEvent<'_>) {}
}

/// Forwards events to the collector's events endpoint.
///
/// Best effort: a failed delivery is logged and dropped.
pub struct PostingEventSink<X> {
    transport: X,
    endpoint: &'static str,
    heap_probe: Option<fn() -> u32>,
}

impl<X: Transport> PostingEventSink<X> {
    pub fn new(transport: X, endpoint: &'static str) -> Self {
        Self {
            transport,
            endpoint,
            heap_probe: None,
        }
    }

    /// Attaches a function reporting free heap, included with every event.
    pub fn with_heap_probe(mut self, probe: fn() -> u32) -> Self {
        self.heap_probe = Some(probe);
        self
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }
}

impl<X: Transport> EventSink for PostingEventSink<X> {
    fn emit(&mut self, event: &DiagnosticEvent<'_>) {
        let mut event = event.clone();
        if event.heap.is_none() {
            event.heap = self.heap_probe.map(|probe| probe());
        }
        let body = match payload::event(&event) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Dropping {} event: {}", event.severity, e);
                return;
            }
        };
        if let Err(e) = self.transport.ensure_connected() {
            log::debug!("Event not sent, no connectivity: {:?}", e);
            return;
        }
        match self.transport.post(self.endpoint, &body) {
            Ok(status) if (200..300).contains(&status) => {}
            Ok(status) => log::debug!("Event rejected with status {}", status),
            Err(e) => log::debug!("Event delivery failed: {:?}", e),
        }
    }
}

/// Writer that keeps whatever fits and silently drops the rest.
struct Truncating<'a>(&'a mut Message);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Renders, logs and forwards diagnostic events.
pub struct DiagnosticsReporter<S> {
    device: DeviceName,
    sink: S,
    emitted: [u32; 4],
}

impl<S: EventSink> DiagnosticsReporter<S> {
    pub fn new(device: DeviceName, sink: S) -> Self {
        Self {
            device,
            sink,
            emitted: [0; 4],
        }
    }

    pub fn emit(
        &mut self,
        severity: Severity,
        fault: Option<Fault>,
        message: fmt::Arguments<'_>,
        uptime: Duration,
        counters: &FaultCounters,
    ) {
        let mut text = Message::new();
        // Truncating never fails
        let _ = Truncating(&mut text).write_fmt(message);

        match severity {
            Severity::Info => log::info!("{}", text),
            Severity::Warning => log::warn!("{}", text),
            Severity::Error => log::error!("{}", text),
            Severity::Critical => log::error!("CRITICAL: {}", text),
        }

        let event = DiagnosticEvent {
            device: self.device.as_str(),
            severity,
            fault,
            message: text.as_str(),
            uptime,
            heap: None,
            total_measurements: Some(counters.total_samples),
            i2c_errors: Some(counters.total_bus_faults),
        };
        self.sink.emit(&event);
        self.emitted[severity.index()] += 1;
    }

    /// Number of events emitted at `severity` since boot.
    pub fn count(&self, severity: Severity) -> u32 {
        self.emitted[severity.index()]
    }

    pub fn device(&self) -> &str {
        self.device.as_str()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
