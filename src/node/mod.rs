// src/node/mod.rs

//! The sensor node: sampling, buffering, upload, calibration and the
//! resilience around them, driven by [`MainCycle`].

pub mod buffer;
pub mod bus_recovery;
pub mod calibration;
pub mod config;
pub mod context;
pub mod cycle;
pub mod diagnostics;
pub mod payload;
pub mod session;
pub mod status;
pub mod trigger;
pub mod upload;

pub use buffer::{Batch, BufferError, PushOutcome, ReadingBuffer};
pub use bus_recovery::{BusRecovery, LineState, RecoveryError};
pub use calibration::{
    CalibrationError, CalibrationOutcome, CalibrationPhase, CalibrationProgress,
    CalibrationWorkflow, ProgressSink,
};
pub use config::{AcquisitionMode, ConfigError, NodeConfig};
pub use context::{FaultCounters, NodeContext, Pacer};
pub use cycle::{MainCycle, Peripherals, TickReport};
pub use diagnostics::{DiagnosticEvent, DiagnosticsReporter, EventSink, PostingEventSink, Severity};
pub use session::{SensorMode, SensorSession, SessionError};
pub use status::{BlinkingLed, StatusIndicator, StatusSignal};
pub use upload::{UploadDispatcher, UploadError};
