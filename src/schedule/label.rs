//! Stage labels attached to each unit of work.

use super::StageTable;

const UNKNOWN: &str = "unknown";

/// Which virtual user is running which of its iterations.
///
/// Passed explicitly into labeling and request construction so nothing reads
/// shared counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub vu: u32,
    pub iteration: u64,
}

/// Tag values derived from a stage resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLabel {
    pub stage_index: Option<usize>,
    /// `rps-<target>` or `rps-unknown`.
    pub tag: String,
    /// The target rate as text, or `unknown`.
    pub target: String,
}

impl StageLabel {
    pub fn from_resolution(table: &StageTable, stage_index: Option<usize>) -> Self {
        match stage_index.and_then(|i| table.target_rate(i).map(|t| (i, t))) {
            Some((index, target)) => Self {
                stage_index: Some(index),
                tag: format!("rps-{}", target),
                target: target.to_string(),
            },
            None => Self::unknown(),
        }
    }

    pub fn for_elapsed(table: &StageTable, elapsed_ms: f64) -> Self {
        Self::from_resolution(table, table.resolve(elapsed_ms))
    }

    pub fn unknown() -> Self {
        Self {
            stage_index: None,
            tag: format!("rps-{}", UNKNOWN),
            target: UNKNOWN.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.stage_index.is_none()
    }
}

/// Request identifier unique per VU, iteration and nonce.
pub fn request_id(work: WorkUnit, nonce: u32) -> String {
    format!("REQ-{}-{}-{}", work.vu, work.iteration, nonce)
}
