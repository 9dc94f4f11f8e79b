// src/driver/io_helpers.rs

use super::Scd4x;
use crate::common::{command::Command, crc::decode_word, error::Scd4xError};
use core::time::Duration;
use embedded_hal::{delay::DelayNs, i2c::I2c};
use nb::Result as NbResult;

/// Largest response we ever read: three words of three bytes.
const MAX_RESPONSE_LEN: usize = 9;

/// Blocks for `duration` using the given delay provider.
pub fn wait<D: DelayNs>(delay: &mut D, duration: Duration) {
    let micros = duration.as_micros();
    if micros > 0 {
        delay.delay_us(micros.min(u128::from(u32::MAX)) as u32);
    }
}

// Implementation block for I/O related helpers
impl<I2C> Scd4x<I2C>
where
    I2C: I2c,
{
    /// Writes a command frame and waits out its execution time.
    pub(super) fn send<D: DelayNs>(
        &mut self,
        command: Command,
        delay: &mut D,
    ) -> Result<(), Scd4xError<I2C::Error>> {
        let frame = command.encode();
        log::trace!("scd4x <- {}", command);
        self.i2c
            .write(self.address, &frame)
            .map_err(Scd4xError::I2c)?;
        wait(delay, command.execution_time());
        Ok(())
    }

    /// Sends a command, waits, then reads and CRC-checks `N` response words.
    pub(super) fn execute_read<D: DelayNs, const N: usize>(
        &mut self,
        command: Command,
        delay: &mut D,
    ) -> Result<[u16; N], Scd4xError<I2C::Error>> {
        debug_assert_eq!(command.response_words(), N);
        self.send(command, delay)?;

        let mut raw = [0u8; MAX_RESPONSE_LEN];
        let len = (N * 3).min(MAX_RESPONSE_LEN);
        let buffer = &mut raw[..len];
        self.i2c
            .read(self.address, buffer)
            .map_err(Scd4xError::I2c)?;

        let mut words = [0u16; N];
        for (word, chunk) in words.iter_mut().zip(buffer.chunks_exact(3)) {
            *word = decode_word([chunk[0], chunk[1], chunk[2]])?;
        }
        Ok(words)
    }

    /// Executes a non-blocking operation (`f`) repeatedly until it stops
    /// returning `WouldBlock`, returning the final result or a timeout error.
    ///
    /// Elapsed time is accounted from the poll interval plus whatever the
    /// operation itself waited, so no clock is needed.
    pub(super) fn execute_blocking_with_timeout<D, T, F>(
        &mut self,
        delay: &mut D,
        timeout: Duration,
        interval: Duration,
        mut f: F,
    ) -> Result<T, Scd4xError<I2C::Error>>
    where
        D: DelayNs,
        F: FnMut(&mut Self, &mut D) -> NbResult<T, Scd4xError<I2C::Error>>,
    {
        let step = interval.max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;
        loop {
            match f(self, delay) {
                Ok(result) => return Ok(result),
                Err(nb::Error::WouldBlock) => {
                    if waited >= timeout {
                        return Err(Scd4xError::Timeout);
                    }
                    wait(delay, step);
                    waited += step;
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }
}
