//! Write buffer that coalesces pixel writes into atomic flushes.

use std::collections::BTreeMap;
use std::time::Duration;

// Use web-time on WASM, std::time otherwise
#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

use crate::palette::BACKGROUND_INDEX;
use crate::pixel::{CellKey, Pixel};

/// Final intent per key: `Some` writes the pixel, `None` deletes the key.
pub type PixelWrites = BTreeMap<CellKey, Option<Pixel>>;

/// One generation of staged writes handed to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushBatch {
    pub id: u64,
    pub writes: PixelWrites,
}

impl FlushBatch {
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// What happened when a flush completion was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The batch landed; its overlay entries were dropped.
    Committed { keys: usize },
    /// The batch failed and was folded back into the staged writes.
    Restored { keys: usize },
    /// The completion does not match the in-flight batch (reset or unknown).
    Stale,
}

/// Staged writes plus at most one in-flight flush.
///
/// Writes staged while a flush is in flight go to the next generation. A
/// failed flush is merged back underneath anything staged since, so newer
/// intents for the same key still win.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    pending: PixelWrites,
    in_flight: Option<FlushBatch>,
    next_id: u64,
    /// A flush was requested while another was in flight.
    flush_requested: bool,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write. Later stages for the same key replace earlier ones.
    pub fn stage(&mut self, key: CellKey, intent: Option<Pixel>) {
        self.pending.insert(key, intent);
    }

    /// Writes staged but not yet sent.
    pub fn staged(&self) -> &PixelWrites {
        &self.pending
    }

    pub fn in_flight(&self) -> Option<&FlushBatch> {
        self.in_flight.as_ref()
    }

    pub fn is_flushing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Nothing staged and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_none()
    }

    /// Whether a flush was requested while another was in flight and writes
    /// are still waiting.
    pub fn wants_flush(&self) -> bool {
        self.flush_requested && !self.pending.is_empty() && self.in_flight.is_none()
    }

    /// Take the staged writes as a new in-flight batch.
    ///
    /// Returns `None` when nothing is staged or when a flush is already in
    /// flight; in the latter case the request is remembered.
    pub fn begin_flush(&mut self) -> Option<FlushBatch> {
        if self.in_flight.is_some() {
            self.flush_requested = !self.pending.is_empty();
            return None;
        }
        if self.pending.is_empty() {
            return None;
        }
        self.flush_requested = false;
        self.next_id += 1;
        let batch = FlushBatch {
            id: self.next_id,
            writes: std::mem::take(&mut self.pending),
        };
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Report the result of the batch with the given id.
    pub fn complete_flush(&mut self, id: u64, succeeded: bool) -> FlushOutcome {
        let Some(batch) = self.in_flight.take_if(|b| b.id == id) else {
            return FlushOutcome::Stale;
        };
        let keys = batch.writes.len();
        if succeeded {
            return FlushOutcome::Committed { keys };
        }
        for (key, intent) in batch.writes {
            self.pending.entry(key).or_insert(intent);
        }
        FlushOutcome::Restored { keys }
    }

    /// Drop everything staged and forget the in-flight batch.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_flight = None;
        self.flush_requested = false;
    }

    /// Pixel-shaped view of every unconfirmed write.
    ///
    /// Deletes become background pixels so they shadow remote records.
    pub fn overlay(&self) -> Vec<Pixel> {
        let mut merged: BTreeMap<CellKey, &Option<Pixel>> = BTreeMap::new();
        if let Some(batch) = &self.in_flight {
            merged.extend(batch.writes.iter().map(|(k, v)| (*k, v)));
        }
        merged.extend(self.pending.iter().map(|(k, v)| (*k, v)));
        merged
            .into_iter()
            .map(|(key, intent)| match intent {
                Some(pixel) => pixel.clone(),
                None => Pixel::new(key, BACKGROUND_INDEX, String::new(), 0),
            })
            .collect()
    }
}

/// Fixed-cadence deadline that only runs while a drawing session is active.
#[derive(Debug, Clone)]
pub struct FlushTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl FlushTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking from `now`. Restarting an active timer keeps its deadline.
    pub fn start(&mut self, now: Instant) {
        if self.next_due.is_none() {
            self.next_due = Some(now + self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Returns true once per elapsed interval.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
