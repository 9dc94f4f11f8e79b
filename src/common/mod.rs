// src/common/mod.rs

// --- Declare all public modules within common ---
pub mod command;
pub mod crc;
pub mod error;
pub mod hal_traits;
pub mod timing;
pub mod types;

// --- Re-export key types/traits/functions for easier access ---

// From command.rs
pub use command::Command;

// From crc.rs
pub use crc::{decode_word, encode_word, word_crc};

// From error.rs
pub use error::{Fault, Scd4xError};

// From hal_traits.rs
pub use hal_traits::{BusProvider, Timer, Transport, Watchdog};

// From types.rs
pub use types::{
    FrcCorrection, Measurement, Reading, SerialNumber, Timestamp, PLAUSIBLE_CO2_PPM,
};

// Timing constants are reached through `common::timing::*`.
