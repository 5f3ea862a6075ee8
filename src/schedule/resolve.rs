//! Elapsed time -> active stage.

use std::time::Duration;

use super::StageTable;
use crate::utils::duration_to_ms;

impl StageTable {
    /// Index of the stage active at `elapsed_ms`, or `None`.
    ///
    /// Stage `i` owns `[boundaries[i-1], boundaries[i])` with
    /// `boundaries[-1] = 0`, so the instant of a transition belongs to the
    /// later stage. Negative, non-finite, and past-the-end input resolve to
    /// `None`; so does every input against an empty table.
    pub fn resolve(&self, elapsed_ms: f64) -> Option<usize> {
        if !elapsed_ms.is_finite() || elapsed_ms < 0.0 {
            return None;
        }
        let boundaries = self.boundaries();
        // first boundary strictly greater than elapsed
        let index = boundaries.partition_point(|&b| (b as f64) <= elapsed_ms);
        (index < boundaries.len()).then_some(index)
    }

    pub fn resolve_elapsed(&self, elapsed: Duration) -> Option<usize> {
        self.resolve(duration_to_ms(elapsed))
    }
}
