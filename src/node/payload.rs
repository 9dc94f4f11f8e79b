// src/node/payload.rs

//! JSON documents sent to the collector.
//!
//! Everything is rendered into a fixed-capacity string; a document that does
//! not fit is an error rather than a truncated payload.

use core::fmt::{self, Write};

use heapless::String;
use time::OffsetDateTime;

use super::diagnostics::DiagnosticEvent;
use crate::common::Reading;

/// Capacity of a rendered payload.
pub const PAYLOAD_CAPACITY: usize = 2048;

/// Longest batch entry a sensor reading can render to, separator included:
/// `,{"co2":65535,"temp":-45.0,"humidity":100.0,"ts":"YYYY-MM-DDTHH:MM:SSZ"}`
pub const MAX_BATCH_ENTRY_LEN: usize = 72;

pub type Payload = String<PAYLOAD_CAPACITY>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload does not fit in {PAYLOAD_CAPACITY} bytes")]
    Overflow,
    #[error("no readings to send")]
    Empty,
}

impl From<fmt::Error> for PayloadError {
    fn from(_: fmt::Error) -> Self {
        PayloadError::Overflow
    }
}

/// `{"device":..,"co2":..,"temp":..,"humidity":..,"timestamp":..}`
pub fn single(device: &str, reading: &Reading) -> Result<Payload, PayloadError> {
    let mut out = Payload::new();
    out.write_str("{\"device\":")?;
    write_json_str(&mut out, device)?;
    out.write_char(',')?;
    write_reading_fields(&mut out, reading)?;
    if let Some(secs) = reading.captured_at().unix_secs {
        out.write_str(",\"timestamp\":")?;
        write_iso8601(&mut out, secs)?;
    }
    out.write_char('}')?;
    Ok(out)
}

/// `{"device":..,"readings":[{"co2":..,"temp":..,"humidity":..,"ts":..},..]}`
///
/// `ts` is left out for readings captured before wall-clock time was known;
/// the collector then stamps them on arrival.
pub fn batch(device: &str, readings: &[Reading]) -> Result<Payload, PayloadError> {
    if readings.is_empty() {
        return Err(PayloadError::Empty);
    }
    let mut out = Payload::new();
    out.write_str("{\"device\":")?;
    write_json_str(&mut out, device)?;
    out.write_str(",\"readings\":[")?;
    for (i, reading) in readings.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        out.write_char('{')?;
        write_reading_fields(&mut out, reading)?;
        if let Some(secs) = reading.captured_at().unix_secs {
            out.write_str(",\"ts\":")?;
            write_iso8601(&mut out, secs)?;
        }
        out.write_char('}')?;
    }
    out.write_str("]}")?;
    Ok(out)
}

/// Largest number of readings a batch for `device` is guaranteed to fit.
pub fn max_batch_len(device: &str) -> usize {
    let envelope = "{\"device\":".len() + json_str_len(device) + ",\"readings\":[".len() + "]}".len();
    PAYLOAD_CAPACITY.saturating_sub(envelope) / MAX_BATCH_ENTRY_LEN
}

/// `{"device":..,"event_type":..,"message":..,"uptime":..}` plus the optional
/// fault class and counters.
pub fn event(event: &DiagnosticEvent<'_>) -> Result<Payload, PayloadError> {
    let mut out = Payload::new();
    out.write_str("{\"device\":")?;
    write_json_str(&mut out, event.device)?;
    write!(out, ",\"event_type\":\"{}\"", event.severity)?;
    out.write_str(",\"message\":")?;
    write_json_str(&mut out, event.message)?;
    write!(out, ",\"uptime\":{}", event.uptime.as_secs())?;
    if let Some(fault) = event.fault {
        write!(out, ",\"fault\":\"{}\"", fault)?;
    }
    if let Some(heap) = event.heap {
        write!(out, ",\"heap\":{}", heap)?;
    }
    if let Some(total) = event.total_measurements {
        write!(out, ",\"total_measurements\":{}", total)?;
    }
    if let Some(errors) = event.i2c_errors {
        write!(out, ",\"i2c_errors\":{}", errors)?;
    }
    out.write_char('}')?;
    Ok(out)
}

fn write_reading_fields<W: Write>(out: &mut W, reading: &Reading) -> fmt::Result {
    write!(
        out,
        "\"co2\":{},\"temp\":{:.1},\"humidity\":{:.1}",
        reading.co2_ppm(),
        reading.temperature_c(),
        reading.relative_humidity_pct()
    )
}

/// Writes `"YYYY-MM-DDTHH:MM:SSZ"` (quoted).
fn write_iso8601<W: Write>(out: &mut W, unix_secs: u64) -> fmt::Result {
    let secs = i64::try_from(unix_secs).map_err(|_| fmt::Error)?;
    let dt = OffsetDateTime::from_unix_timestamp(secs).map_err(|_| fmt::Error)?;
    write!(
        out,
        "\"{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z\"",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

/// Rendered length of `s` as written by [`write_json_str`].
fn json_str_len(s: &str) -> usize {
    let body: usize = s
        .chars()
        .map(|c| match c {
            '"' | '\\' | '\n' | '\r' | '\t' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        })
        .sum();
    body + 2
}

fn write_json_str<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}
