//! The stage clock: a ramp profile, its cumulative boundaries, and the
//! queries that map elapsed run time to a stage and back to wall-clock time.
//!
//! A [`StageTable`] is built once from configuration and never mutated, so it
//! can be shared behind an `Arc` by any number of workers without locking.

use crate::utils::parse_duration_ms;

pub mod label;
pub mod projection;
pub mod resolve;

pub use label::{request_id, StageLabel, WorkUnit};
pub use projection::{RunWindow, StageStart};

/// One segment of the load profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub target_rate: u64,
    /// Duration token as configured (e.g. "2m").
    pub duration: String,
    /// Parsed duration, 0 when the token was not recognized.
    pub duration_ms: u64,
}

impl Stage {
    pub fn new(target_rate: u64, duration: impl Into<String>) -> Self {
        let duration = duration.into();
        let duration_ms = parse_duration_ms(&duration);
        Self {
            target_rate,
            duration,
            duration_ms,
        }
    }
}

/// Ordered stages plus their derived cumulative boundaries.
///
/// `boundaries[i]` is the elapsed millisecond at which stage `i` ends and
/// stage `i + 1` begins. Stages are kept in configuration order, duplicates
/// included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTable {
    stages: Vec<Stage>,
    boundaries: Vec<u64>,
}

impl StageTable {
    pub fn new(stages: Vec<Stage>) -> Self {
        let boundaries = stages
            .iter()
            .scan(0u64, |acc, stage| {
                *acc = acc.saturating_add(stage.duration_ms);
                Some(*acc)
            })
            .collect();
        Self { stages, boundaries }
    }

    /// Build from `(target_rate, duration_token)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u64, &'a str)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(target, duration)| Stage::new(target, duration))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn boundaries(&self) -> &[u64] {
        &self.boundaries
    }

    pub fn boundary(&self, index: usize) -> Option<u64> {
        self.boundaries.get(index).copied()
    }

    pub fn target_rate(&self, index: usize) -> Option<u64> {
        self.stages.get(index).map(|s| s.target_rate)
    }

    /// Elapsed millisecond at which stage `index` begins (`boundaries[index - 1]`, or 0).
    pub fn start_offset_ms(&self, index: usize) -> Option<u64> {
        match index {
            _ if index >= self.stages.len() => None,
            0 => Some(0),
            _ => Some(self.boundaries[index - 1]),
        }
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.boundaries.last().copied().unwrap_or(0)
    }

    /// Instantaneous offered rate for a ramping arrival-rate executor.
    ///
    /// Within stage `i` the rate moves linearly from the previous stage's
    /// target (`start_rate` before stage 0) to `target(i)`. Returns `None`
    /// outside `[0, total_duration_ms)`.
    pub fn rate_at(&self, elapsed_ms: f64, start_rate: u64) -> Option<f64> {
        let index = self.resolve(elapsed_ms)?;
        let previous = match index {
            0 => start_rate,
            _ => self.stages[index - 1].target_rate,
        } as f64;
        let stage = &self.stages[index];
        // resolve() never lands on a zero-length stage
        let offset = self.start_offset_ms(index).unwrap_or(0) as f64;
        let progress = (elapsed_ms - offset) / stage.duration_ms as f64;
        Some(previous + (stage.target_rate as f64 - previous) * progress)
    }
}
