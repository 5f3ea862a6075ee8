//! Post-run projection of stage boundaries onto wall-clock time.

use serde::{Deserialize, Serialize};

use super::StageTable;

/// Wall-clock start of one configured stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStart {
    pub stage_index: usize,
    pub target_rate: u64,
    pub start_epoch_ms: i64,
}

impl StageTable {
    /// One entry per configured stage, in stage order, whether or not the run
    /// reached it. Filtering by reach is left to the reporter.
    pub fn project_starts(&self, run_start_epoch_ms: i64) -> Vec<StageStart> {
        self.stages()
            .iter()
            .zip(self.boundaries())
            .enumerate()
            .map(|(stage_index, (stage, &boundary))| StageStart {
                stage_index,
                target_rate: stage.target_rate,
                start_epoch_ms: run_start_epoch_ms
                    .saturating_add(boundary.saturating_sub(stage.duration_ms) as i64),
            })
            .collect()
    }
}

/// The wall-clock span of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
}

impl RunWindow {
    /// Derive the window from the run's end time.
    ///
    /// The runtime's own duration accounting wins over wall-clock subtraction;
    /// `fallback_duration_ms` (usually the profile total) is used only when
    /// the runtime reported nothing usable.
    pub fn from_end(
        end_epoch_ms: i64,
        reported_duration_ms: Option<f64>,
        fallback_duration_ms: u64,
    ) -> Self {
        let duration_ms = reported_duration_ms
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| ms.round() as i64)
            .unwrap_or(fallback_duration_ms as i64);
        Self {
            start_epoch_ms: end_epoch_ms.saturating_sub(duration_ms),
            end_epoch_ms,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_epoch_ms - self.start_epoch_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_760_000_000_000;

    #[test]
    fn test_project_two_stages() {
        let table = StageTable::from_pairs([(10, "2m"), (20, "2m")]);
        assert_eq!(table.total_duration_ms(), 240_000);
        assert_eq!(
            table.project_starts(T),
            vec![
                StageStart {
                    stage_index: 0,
                    target_rate: 10,
                    start_epoch_ms: T
                },
                StageStart {
                    stage_index: 1,
                    target_rate: 20,
                    start_epoch_ms: T + 120_000
                },
            ]
        );
    }

    #[test]
    fn test_project_matches_start_offsets() {
        let table = StageTable::from_pairs([(5, "3m"), (10, "1m"), (10, "bad"), (20, "90s")]);
        for start in table.project_starts(T) {
            let offset = table.start_offset_ms(start.stage_index).unwrap() as i64;
            assert_eq!(start.start_epoch_ms, T + offset);
        }
    }

    #[test]
    fn test_project_empty_table() {
        assert!(StageTable::default().project_starts(T).is_empty());
    }

    #[test]
    fn test_window_prefers_reported_duration() {
        let window = RunWindow::from_end(T, Some(61_500.0), 240_000);
        assert_eq!(window.start_epoch_ms, T - 61_500);
        assert_eq!(window.duration_ms(), 61_500);
    }

    #[test]
    fn test_window_falls_back_to_profile_total() {
        assert_eq!(RunWindow::from_end(T, None, 240_000).start_epoch_ms, T - 240_000);
        assert_eq!(
            RunWindow::from_end(T, Some(f64::NAN), 240_000).start_epoch_ms,
            T - 240_000
        );
        assert_eq!(RunWindow::from_end(T, Some(0.0), 1_000).start_epoch_ms, T - 1_000);
    }

    #[test]
    fn test_early_termination_still_projects_every_stage() {
        let table = StageTable::from_pairs([(5, "3m"), (10, "1m")]);
        let window = RunWindow::from_end(T, Some(60_000.0), table.total_duration_ms());
        let starts = table.project_starts(window.start_epoch_ms);
        assert_eq!(starts.len(), 2);
        assert!(starts[1].start_epoch_ms >= window.end_epoch_ms);
    }
}
