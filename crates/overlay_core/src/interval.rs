//! Escalating list of idle waits with a saturating cursor.

use shared::{OverlayError, OverlayResult};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSequence {
    durations: Vec<Duration>,
    cursor: usize,
}

impl IntervalSequence {
    /// Rejects an empty list and zero-length waits.
    pub fn new(durations: Vec<Duration>) -> OverlayResult<Self> {
        if durations.is_empty() {
            return Err(OverlayError::Config(
                "interval sequence needs at least one duration".into(),
            ));
        }
        if durations.iter().any(Duration::is_zero) {
            return Err(OverlayError::Config(
                "interval durations must be positive".into(),
            ));
        }
        Ok(Self {
            durations,
            cursor: 0,
        })
    }

    pub fn from_secs(secs: &[u64]) -> OverlayResult<Self> {
        Self::new(secs.iter().map(|&s| Duration::from_secs(s)).collect())
    }

    pub fn current(&self) -> Duration {
        self.durations[self.cursor]
    }

    /// Move to the next interval; the last one repeats indefinitely.
    pub fn advance(&mut self) {
        if self.cursor + 1 < self.durations.len() {
            self.cursor += 1;
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn durations(&self) -> &[Duration] {
        &self.durations
    }
}
