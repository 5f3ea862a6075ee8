//! End-of-run stage report: which wall-clock instant each stage began at.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schedule::{RunWindow, StageTable};
use crate::stats::ReportStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStartRecord {
    pub stage_index: usize,
    pub target_rps: u64,
    pub start_epoch_ms: i64,
    /// ISO-8601, UTC, millisecond precision
    pub timestamp: String,
    /// Whether the run was still going when this stage was due to start
    pub reached: bool,
}

/// Project every stage onto the run window and mark the ones the run reached.
pub fn stage_start_records(table: &StageTable, window: &RunWindow) -> Vec<StageStartRecord> {
    table
        .project_starts(window.start_epoch_ms)
        .into_iter()
        .map(|start| StageStartRecord {
            stage_index: start.stage_index,
            target_rps: start.target_rate,
            start_epoch_ms: start.start_epoch_ms,
            timestamp: iso_timestamp(start.start_epoch_ms),
            reached: start.start_epoch_ms < window.end_epoch_ms,
        })
        .collect()
}

/// `2026-10-19T08:56:00.000Z`; out-of-range epochs fall back to the raw number.
pub fn iso_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

pub fn format_stage_start_line(record: &StageStartRecord) -> String {
    let mut line = format!(
        "[STAGE_START] stage_index={} target_rps={} timestamp={}",
        record.stage_index, record.target_rps, record.timestamp
    );
    if !record.reached {
        line.push_str(" reached=false");
    }
    line
}

pub fn print_stage_starts(records: &[StageStartRecord]) {
    for record in records {
        println!("{}", format_stage_start_line(record));
    }
}

/// Everything `--export-json` writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub window: RunWindow,
    pub start: String,
    pub end: String,
    pub tags: BTreeMap<String, String>,
    pub summary: ReportStats,
    pub stages: Vec<StageStartRecord>,
    pub threshold_failures: Vec<String>,
}

impl RunReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
