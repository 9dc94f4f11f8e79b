// src/node/buffer.rs

use core::time::Duration;

use heapless::Vec;

use super::config::BufferConfig;
use crate::common::Reading;

/// Result of [`ReadingBuffer::push`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted, and the buffer is close enough to full that it should be
    /// flushed now.
    AcceptedAndFlushRequested,
    /// Dropped: the buffer is full and could not be flushed.
    Rejected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The batch was drained before the last commit and no longer
    /// describes the buffer head.
    #[error("batch generation {batch} is stale, buffer is at {current}")]
    StaleBatch { batch: u32, current: u32 },
}

/// Readings handed out by [`ReadingBuffer::drain`].
///
/// The only way to clear readings from the buffer is to give the batch back
/// through [`ReadingBuffer::commit`], so a commit without a matching drain
/// cannot be written.
#[derive(Debug)]
pub struct Batch<const C: usize> {
    readings: Vec<Reading, C>,
    generation: u32,
}

impl<const C: usize> Batch<C> {
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Bounded FIFO of readings waiting for delivery.
///
/// Never grows past `C`. Data is never evicted: pressure near the top
/// requests an early flush, and only a full buffer drops new readings.
#[derive(Debug)]
pub struct ReadingBuffer<const C: usize> {
    readings: Vec<Reading, C>,
    generation: u32,
    config: BufferConfig,
    last_flush: Duration,
    flush_requested: bool,
    flush_failed: bool,
    rejected: u32,
}

impl<const C: usize> ReadingBuffer<C> {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            readings: Vec::new(),
            generation: 0,
            config,
            last_flush: Duration::ZERO,
            flush_requested: false,
            flush_failed: false,
            rejected: 0,
        }
    }

    pub fn push(&mut self, reading: Reading) -> PushOutcome {
        let before = self.readings.len();
        if self.readings.push(reading).is_err() {
            self.rejected += 1;
            self.flush_requested = true;
            if !self.flush_failed {
                // flush triggers should have emptied it before now
                log::warn!("reading buffer full without a failed flush");
            }
            return PushOutcome::Rejected;
        }
        if before + self.config.flush_margin >= C {
            self.flush_requested = true;
            PushOutcome::AcceptedAndFlushRequested
        } else {
            PushOutcome::Accepted
        }
    }

    /// Copies out everything buffered, oldest first. Nothing is removed
    /// until the batch is committed.
    pub fn drain(&self) -> Batch<C> {
        Batch {
            readings: self.readings.clone(),
            generation: self.generation,
        }
    }

    /// Removes the readings of a delivered batch. Readings pushed after the
    /// drain stay buffered.
    pub fn commit(&mut self, batch: Batch<C>) -> Result<usize, BufferError> {
        if batch.generation != self.generation {
            return Err(BufferError::StaleBatch {
                batch: batch.generation,
                current: self.generation,
            });
        }
        // the batch is a prefix: nothing is removed while a generation is live
        let delivered = batch.len().min(self.readings.len());
        self.readings.rotate_left(delivered);
        self.readings.truncate(self.readings.len() - delivered);
        self.generation = self.generation.wrapping_add(1);
        self.flush_failed = false;
        self.flush_requested = self.readings.len() + self.config.flush_margin >= C;
        Ok(delivered)
    }

    /// Records that a flush was attempted at `now`, whatever its outcome.
    pub fn record_attempt(&mut self, now: Duration) {
        self.last_flush = now;
        self.flush_requested = false;
    }

    /// The last drained batch could not be delivered; it stays buffered and
    /// is retried on the next flush trigger.
    pub fn mark_flush_failed(&mut self) {
        self.flush_failed = true;
    }

    pub fn flush_due(&self, now: Duration) -> bool {
        if self.readings.is_empty() {
            return false;
        }
        self.flush_requested || now.saturating_sub(self.last_flush) >= self.config.flush_interval
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        C
    }

    /// Readings dropped because the buffer was full.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn flush_failed(&self) -> bool {
        self.flush_failed
    }
}
