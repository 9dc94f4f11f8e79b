// src/mock.rs

//! Test doubles: a simulated SCD4x on a simulated two-wire bus, a manual
//! clock, and recording sinks for everything the node reports.
//!
//! All doubles share their state through `Rc<RefCell<..>>`, so a test keeps
//! a clone to inspect what the code under test did with the other one.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::time::Duration;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation, SevenBitAddress};

use crate::common::crc::{encode_word, word_crc};
use crate::common::{timing, BusProvider, Fault, Timer, Transport, Watchdog};
use crate::driver::SCD4X_ADDRESS;
use crate::node::calibration::{CalibrationPhase, CalibrationProgress, ProgressSink};
use crate::node::config::DeviceName;
use crate::node::context::{NodeContext, Pacer};
use crate::node::diagnostics::{DiagnosticEvent, DiagnosticsReporter, EventSink, Severity};
use crate::node::status::{StatusIndicator, StatusSignal};

// --- Simulated sensor ---

const WAKE_UP: u16 = 0x36F6;
const STOP_PERIODIC: u16 = 0x3F86;
const REINIT: u16 = 0x3646;
const GET_SERIAL: u16 = 0x3682;
const START_PERIODIC: u16 = 0x21B1;
const DATA_READY: u16 = 0xE4B8;
const READ_MEASUREMENT: u16 = 0xEC05;
const SINGLE_SHOT: u16 = 0x219D;
const POWER_DOWN: u16 = 0x36E0;
const SET_ALTITUDE: u16 = 0x2427;
const SET_TEMPERATURE_OFFSET: u16 = 0x241D;
const SET_ASC: u16 = 0x2416;
const FORCED_RECALIBRATION: u16 = 0x362F;

/// Accepted while the sensor is in periodic mode.
const MEASURING_WHITELIST: [u16; 3] = [READ_MEASUREMENT, DATA_READY, STOP_PERIODIC];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SensorState {
    PoweredDown,
    Idle,
    Measuring,
}

#[derive(Debug)]
struct SimState {
    sensor: SensorState,
    serial: u64,
    co2: u16,
    raw_t: u16,
    raw_rh: u16,
    scripted_co2: VecDeque<u16>,
    data_ready: bool,
    frc_response: u16,
    pending: Option<Vec<u16>>,
    corrupt_next: bool,
    fail_next: u32,
    fail_command: Option<u16>,
    commands: Vec<u16>,
    last_argument: Option<u16>,

    wedged: bool,
    unrecoverable: bool,
    scl_high: bool,
    sda_high: bool,
    clock_pulses: u32,
    pulses_since_wedge: u32,
    stop_seen: bool,
    releases: u32,
    reclaims: u32,
}

impl SimState {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SimI2cError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SimI2cError::Nack);
        }
        if self.wedged {
            return Err(SimI2cError::Bus);
        }
        let (opcode, argument) = match *bytes {
            [hi, lo] => (u16::from_be_bytes([hi, lo]), None),
            [hi, lo, msb, lsb, crc] => {
                if word_crc([msb, lsb]) != crc {
                    return Err(SimI2cError::Nack);
                }
                (u16::from_be_bytes([hi, lo]), Some(u16::from_be_bytes([msb, lsb])))
            }
            _ => return Err(SimI2cError::Nack),
        };
        if self.fail_command == Some(opcode) {
            self.fail_command = None;
            return Err(SimI2cError::Nack);
        }
        self.commands.push(opcode);
        if argument.is_some() {
            self.last_argument = argument;
        }
        self.pending = None;

        if opcode == WAKE_UP {
            if self.sensor == SensorState::PoweredDown {
                self.sensor = SensorState::Idle;
            }
            // the real part never acknowledges the wake
            return Err(SimI2cError::Nack);
        }
        match self.sensor {
            SensorState::PoweredDown => return Err(SimI2cError::Nack),
            SensorState::Measuring if !MEASURING_WHITELIST.contains(&opcode) => {
                return Err(SimI2cError::Nack)
            }
            _ => {}
        }

        match opcode {
            STOP_PERIODIC => self.sensor = SensorState::Idle,
            START_PERIODIC => self.sensor = SensorState::Measuring,
            POWER_DOWN => self.sensor = SensorState::PoweredDown,
            REINIT | SINGLE_SHOT | SET_ALTITUDE | SET_TEMPERATURE_OFFSET | SET_ASC => {}
            GET_SERIAL => {
                let s = self.serial;
                self.pending = Some(vec![(s >> 32) as u16, (s >> 16) as u16, s as u16]);
            }
            DATA_READY => {
                let status = if self.data_ready { 0x0006 } else { 0x8000 };
                self.pending = Some(vec![status]);
            }
            READ_MEASUREMENT => {
                let co2 = self.scripted_co2.pop_front().unwrap_or(self.co2);
                self.pending = Some(vec![co2, self.raw_t, self.raw_rh]);
            }
            FORCED_RECALIBRATION => self.pending = Some(vec![self.frc_response]),
            _ => return Err(SimI2cError::Nack),
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimI2cError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SimI2cError::Nack);
        }
        if self.wedged {
            return Err(SimI2cError::Bus);
        }
        let words = self.pending.take().ok_or(SimI2cError::Nack)?;
        if buf.len() != words.len() * 3 {
            return Err(SimI2cError::Nack);
        }
        for (chunk, word) in buf.chunks_exact_mut(3).zip(words) {
            chunk.copy_from_slice(&encode_word(word));
        }
        if self.corrupt_next {
            self.corrupt_next = false;
            buf[2] ^= 0xFF;
        }
        Ok(())
    }
}

/// An SCD4x and the two bus lines it sits on.
#[derive(Debug, Clone)]
pub struct SimBus(Rc<RefCell<SimState>>);

impl SimBus {
    pub fn new() -> Self {
        let bus = SimBus(Rc::new(RefCell::new(SimState {
            sensor: SensorState::Idle,
            serial: 0x0102_0304_0506,
            co2: 400,
            raw_t: 0,
            raw_rh: 0,
            scripted_co2: VecDeque::new(),
            data_ready: true,
            frc_response: 0x8000,
            pending: None,
            corrupt_next: false,
            fail_next: 0,
            fail_command: None,
            commands: Vec::new(),
            last_argument: None,
            wedged: false,
            unrecoverable: false,
            scl_high: true,
            sda_high: true,
            clock_pulses: 0,
            pulses_since_wedge: 0,
            stop_seen: false,
            releases: 0,
            reclaims: 0,
        })));
        bus.set_measurement(400, 20.0, 50.0);
        bus
    }

    pub fn i2c(&self) -> SimI2c {
        SimI2c(self.clone())
    }

    pub fn pins(&self) -> (SimScl, SimSda) {
        (SimScl(self.clone()), SimSda(self.clone()))
    }

    // --- Sensor behaviour ---

    pub fn set_serial(&self, serial: u64) {
        self.0.borrow_mut().serial = serial & 0xFFFF_FFFF_FFFF;
    }

    pub fn set_measurement(&self, co2: u16, temperature_c: f32, humidity_pct: f32) {
        let mut s = self.0.borrow_mut();
        s.co2 = co2;
        s.raw_t = ((temperature_c + 45.0) * 65535.0 / 175.0 + 0.5) as u16;
        s.raw_rh = (humidity_pct * 65535.0 / 100.0 + 0.5) as u16;
    }

    /// CO2 values for the next measurement reads, before falling back to
    /// the fixed measurement.
    pub fn script_co2(&self, values: &[u16]) {
        self.0.borrow_mut().scripted_co2.extend(values.iter().copied());
    }

    pub fn set_data_ready(&self, ready: bool) {
        self.0.borrow_mut().data_ready = ready;
    }

    pub fn set_frc_response(&self, word: u16) {
        self.0.borrow_mut().frc_response = word;
    }

    pub fn corrupt_next_read(&self) {
        self.0.borrow_mut().corrupt_next = true;
    }

    /// Fails the next `n` transfers with a NACK.
    pub fn fail_next(&self, n: u32) {
        self.0.borrow_mut().fail_next = n;
    }

    /// NACKs the next write of `opcode`, once.
    pub fn fail_command(&self, opcode: u16) {
        self.0.borrow_mut().fail_command = Some(opcode);
    }

    pub fn power_down_sensor(&self) {
        self.0.borrow_mut().sensor = SensorState::PoweredDown;
    }

    pub fn sensor_awake(&self) -> bool {
        self.0.borrow().sensor != SensorState::PoweredDown
    }

    pub fn is_measuring(&self) -> bool {
        self.0.borrow().sensor == SensorState::Measuring
    }

    pub fn commands(&self) -> Vec<u16> {
        self.0.borrow().commands.clone()
    }

    pub fn command_count(&self, opcode: u16) -> usize {
        self.0.borrow().commands.iter().filter(|&&c| c == opcode).count()
    }

    pub fn last_command(&self) -> Option<u16> {
        self.0.borrow().commands.last().copied()
    }

    pub fn last_argument(&self) -> Option<u16> {
        self.0.borrow().last_argument
    }

    // --- Line behaviour ---

    /// The sensor stops mid-byte holding SDA low; every transfer fails
    /// until nine clocks and a STOP free it.
    pub fn wedge(&self) {
        let mut s = self.0.borrow_mut();
        s.wedged = true;
        s.pulses_since_wedge = 0;
        s.stop_seen = false;
    }

    pub fn is_wedged(&self) -> bool {
        self.0.borrow().wedged
    }

    /// Keeps SDA low whatever the recovery does.
    pub fn set_unrecoverable(&self, stuck: bool) {
        self.0.borrow_mut().unrecoverable = stuck;
    }

    /// SCL rising edges with SDA released.
    pub fn clock_pulses(&self) -> u32 {
        self.0.borrow().clock_pulses
    }

    pub fn stop_seen(&self) -> bool {
        self.0.borrow().stop_seen
    }

    pub fn releases(&self) -> u32 {
        self.0.borrow().releases
    }

    pub fn reclaims(&self) -> u32 {
        self.0.borrow().reclaims
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimI2cError {
    Nack,
    Bus,
}

impl i2c::Error for SimI2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimI2cError::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            SimI2cError::Bus => ErrorKind::Bus,
        }
    }
}

#[derive(Debug)]
pub struct SimI2c(SimBus);

impl i2c::ErrorType for SimI2c {
    type Error = SimI2cError;
}

impl i2c::I2c<SevenBitAddress> for SimI2c {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        if address != SCD4X_ADDRESS {
            return Err(SimI2cError::Nack);
        }
        let mut state = self.0 .0.borrow_mut();
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => state.write(&bytes[..])?,
                Operation::Read(buf) => state.read(&mut buf[..])?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimScl(SimBus);

impl digital::ErrorType for SimScl {
    type Error = Infallible;
}

impl OutputPin for SimScl {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0 .0.borrow_mut().scl_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut s = self.0 .0.borrow_mut();
        if !s.scl_high {
            s.scl_high = true;
            if s.sda_high {
                s.clock_pulses += 1;
                s.pulses_since_wedge += 1;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimSda(SimBus);

impl digital::ErrorType for SimSda {
    type Error = Infallible;
}

impl OutputPin for SimSda {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0 .0.borrow_mut().sda_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut s = self.0 .0.borrow_mut();
        if !s.sda_high {
            s.sda_high = true;
            if s.scl_high {
                // STOP condition
                s.stop_seen = true;
                if s.wedged
                    && !s.unrecoverable
                    && s.pulses_since_wedge >= u32::from(timing::RECOVERY_PULSES)
                {
                    s.wedged = false;
                }
            }
        }
        Ok(())
    }
}

impl InputPin for SimSda {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        let s = self.0 .0.borrow();
        Ok(s.sda_high && !s.wedged)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

/// Hands the simulated bus between driver and pins, counting each swap.
#[derive(Debug)]
pub struct SimBusProvider(SimBus);

impl SimBusProvider {
    pub fn new(bus: &SimBus) -> Self {
        SimBusProvider(bus.clone())
    }
}

impl BusProvider for SimBusProvider {
    type I2c = SimI2c;
    type Scl = SimScl;
    type Sda = SimSda;

    fn release(&mut self, i2c: SimI2c) -> (SimScl, SimSda) {
        drop(i2c);
        self.0 .0.borrow_mut().releases += 1;
        self.0.pins()
    }

    fn reclaim(&mut self, scl: SimScl, sda: SimSda) -> SimI2c {
        drop((scl, sda));
        self.0 .0.borrow_mut().reclaims += 1;
        self.0.i2c()
    }
}

// --- Time ---

/// Time only moves when something waits on it (or the test advances it).
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<Duration>>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.0.get()
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl DelayNs for ManualClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(Duration::from_millis(u64::from(ms)));
    }
}

impl Timer for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed()
    }
}

#[derive(Debug)]
struct WatchdogState {
    clock: ManualClock,
    last_feed: Duration,
    feeds: u32,
    max_gap: Duration,
}

/// Records how long it went unfed.
#[derive(Debug, Clone)]
pub struct MockWatchdog(Rc<RefCell<WatchdogState>>);

impl MockWatchdog {
    pub fn new(clock: &ManualClock) -> Self {
        MockWatchdog(Rc::new(RefCell::new(WatchdogState {
            clock: clock.clone(),
            last_feed: clock.elapsed(),
            feeds: 0,
            max_gap: Duration::ZERO,
        })))
    }

    pub fn feeds(&self) -> u32 {
        self.0.borrow().feeds
    }

    /// Longest stretch between two feeds (or creation and the first feed).
    pub fn max_gap(&self) -> Duration {
        self.0.borrow().max_gap
    }
}

impl Watchdog for MockWatchdog {
    fn feed(&mut self) {
        let mut s = self.0.borrow_mut();
        let now = s.clock.elapsed();
        let gap = now.saturating_sub(s.last_feed);
        s.max_gap = s.max_gap.max(gap);
        s.last_feed = now;
        s.feeds += 1;
    }
}

// --- Pins ---

/// Active-low input that reads as pressed during the scripted windows.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    clock: ManualClock,
    presses: Vec<(Duration, Duration)>,
}

impl ScriptedInput {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            presses: Vec::new(),
        }
    }

    /// Pressed from `from` (inclusive) until `until` (exclusive).
    pub fn pressed(mut self, from: Duration, until: Duration) -> Self {
        self.presses.push((from, until));
        self
    }

    fn held(&self) -> bool {
        let now = self.clock.elapsed();
        self.presses.iter().any(|&(from, until)| now >= from && now < until)
    }
}

impl digital::ErrorType for ScriptedInput {
    type Error = Infallible;
}

impl InputPin for ScriptedInput {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.held())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.held())
    }
}

#[derive(Debug, Default)]
struct PinState {
    high: bool,
    rising_edges: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingPin(Rc<RefCell<PinState>>);

impl RecordingPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rising_edges(&self) -> u32 {
        self.0.borrow().rising_edges
    }

    pub fn is_set(&self) -> bool {
        self.0.borrow().high
    }
}

impl digital::ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut s = self.0.borrow_mut();
        if !s.high {
            s.rising_edges += 1;
        }
        s.high = true;
        Ok(())
    }
}

// --- Transport ---

#[derive(Debug)]
struct TransportState {
    connected: bool,
    status: u16,
    posts: Vec<(String, String)>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Offline;

/// Collector stand-in: records every post and answers with a fixed status.
#[derive(Debug, Clone)]
pub struct MockTransport(Rc<RefCell<TransportState>>);

impl MockTransport {
    pub fn new() -> Self {
        MockTransport(Rc::new(RefCell::new(TransportState {
            connected: true,
            status: 200,
            posts: Vec::new(),
        })))
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.borrow_mut().connected = connected;
    }

    pub fn respond_with_status(&self, status: u16) {
        self.0.borrow_mut().status = status;
    }

    /// `(endpoint, body)` of every post that reached the collector.
    pub fn posts(&self) -> Vec<(String, String)> {
        self.0.borrow().posts.clone()
    }
}

impl Transport for MockTransport {
    type Error = Offline;

    fn ensure_connected(&mut self) -> Result<(), Offline> {
        if self.0.borrow().connected {
            Ok(())
        } else {
            Err(Offline)
        }
    }

    fn post(&mut self, endpoint: &str, body: &str) -> Result<u16, Offline> {
        let mut s = self.0.borrow_mut();
        if !s.connected {
            return Err(Offline);
        }
        s.posts.push((endpoint.to_string(), body.to_string()));
        Ok(s.status)
    }
}

// --- Recorders ---

/// Owned copy of a [`DiagnosticEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub device: String,
    pub severity: Severity,
    pub fault: Option<Fault>,
    pub message: String,
    pub uptime: Duration,
    pub heap: Option<u32>,
    pub total_measurements: Option<u32>,
    pub i2c_errors: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Rc<RefCell<Vec<RecordedEvent>>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.0.borrow().clone()
    }

    pub fn count(&self, severity: Severity) -> u32 {
        self.0.borrow().iter().filter(|e| e.severity == severity).count() as u32
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &DiagnosticEvent<'_>) {
        self.0.borrow_mut().push(RecordedEvent {
            device: event.device.to_string(),
            severity: event.severity,
            fault: event.fault,
            message: event.message.to_string(),
            uptime: event.uptime,
            heap: event.heap,
            total_measurements: event.total_measurements,
            i2c_errors: event.i2c_errors,
        });
    }
}

#[derive(Debug, Default)]
struct ProgressLog {
    updates: Vec<CalibrationProgress>,
    phases: Vec<CalibrationPhase>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingProgress(Rc<RefCell<ProgressLog>>);

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<CalibrationProgress> {
        self.0.borrow().updates.clone()
    }

    pub fn phases(&self) -> Vec<CalibrationPhase> {
        self.0.borrow().phases.clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&mut self, progress: &CalibrationProgress) {
        self.0.borrow_mut().updates.push(*progress);
    }

    fn on_phase(&mut self, phase: CalibrationPhase) {
        self.0.borrow_mut().phases.push(phase);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator(Rc<RefCell<Vec<StatusSignal>>>);

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<StatusSignal> {
        self.0.borrow().clone()
    }
}

impl StatusIndicator for RecordingIndicator {
    fn indicate(&mut self, signal: StatusSignal) {
        self.0.borrow_mut().push(signal);
    }
}

// --- Context ---

pub type TestContext = NodeContext<ManualClock, MockWatchdog, RecordingSink>;

/// A context on a fresh manual clock with 1 s wait slices.
pub fn context() -> (TestContext, RecordingSink) {
    let clock = ManualClock::new();
    let sink = RecordingSink::new();
    let pacer = Pacer::new(clock.clone(), MockWatchdog::new(&clock), Duration::from_secs(1));
    let mut device = DeviceName::new();
    let _ = device.push_str("test-node");
    let ctx = NodeContext::new(pacer, DiagnosticsReporter::new(device, sink.clone()));
    (ctx, sink)
}
