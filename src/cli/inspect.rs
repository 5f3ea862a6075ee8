//! Offline commands: look at a profile without sending traffic.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::schedule::{RunWindow, StageLabel, StageTable};
use crate::stats::report::{
    format_stage_start_line, iso_timestamp, stage_start_records, StageStartRecord,
};
use crate::utils::{parse_elapsed_ms, ElapsedInput};

#[derive(Debug, Serialize, PartialEq)]
pub struct StageRow {
    pub index: usize,
    pub target: u64,
    pub duration: String,
    pub duration_ms: u64,
    pub start_ms: u64,
    pub boundary_ms: u64,
}

pub fn stage_rows(table: &StageTable) -> Vec<StageRow> {
    table
        .stages()
        .iter()
        .zip(table.boundaries())
        .enumerate()
        .map(|(index, (stage, &boundary_ms))| StageRow {
            index,
            target: stage.target_rate,
            duration: stage.duration.clone(),
            duration_ms: stage.duration_ms,
            start_ms: boundary_ms.saturating_sub(stage.duration_ms),
            boundary_ms,
        })
        .collect()
}

pub fn print_stages(table: &StageTable, json: bool) -> Result<()> {
    let rows = stage_rows(table);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!(
        "{:>5}  {:>8}  {:>10}  {:>12}  {:>12}",
        "stage", "target", "duration", "start_ms", "boundary_ms"
    );
    for row in &rows {
        println!(
            "{:>5}  {:>8}  {:>10}  {:>12}  {:>12}",
            row.index, row.target, row.duration, row.start_ms, row.boundary_ms
        );
    }
    println!("total: {} ms", table.total_duration_ms());
    Ok(())
}

/// Numbers are milliseconds; anything else is read as duration tokens.
pub fn parse_elapsed_arg(arg: &str) -> f64 {
    match arg.trim().parse::<f64>() {
        Ok(ms) => parse_elapsed_ms(ElapsedInput::Millis(ms)),
        Err(_) => parse_elapsed_ms(arg),
    }
}

pub fn resolve_label(table: &StageTable, elapsed_arg: &str) -> (f64, StageLabel) {
    let elapsed_ms = parse_elapsed_arg(elapsed_arg);
    (elapsed_ms, StageLabel::for_elapsed(table, elapsed_ms))
}

pub fn print_resolution(table: &StageTable, elapsed_arg: &str) {
    let (elapsed_ms, label) = resolve_label(table, elapsed_arg);
    match label.stage_index {
        Some(index) => println!(
            "elapsed={}ms stage_index={} tag={} target_rps={}",
            elapsed_ms, index, label.tag, label.target
        ),
        None => println!("elapsed={}ms stage_index=none tag={}", elapsed_ms, label.tag),
    }
}

/// `now`, epoch milliseconds, or an RFC 3339 timestamp.
pub fn parse_end_arg(arg: &str) -> Result<i64> {
    let arg = arg.trim();
    if arg.eq_ignore_ascii_case("now") {
        return Ok(chrono::Utc::now().timestamp_millis());
    }
    if let Ok(ms) = arg.parse::<i64>() {
        return Ok(ms);
    }
    chrono::DateTime::parse_from_rfc3339(arg)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| anyhow!("Invalid end time '{}': {}", arg, e))
}

pub fn project_records(
    table: &StageTable,
    end_arg: &str,
    duration_arg: Option<&str>,
) -> Result<(RunWindow, Vec<StageStartRecord>)> {
    let end = parse_end_arg(end_arg)?;
    let reported = duration_arg.map(parse_elapsed_arg);
    let window = RunWindow::from_end(end, reported, table.total_duration_ms());
    Ok((window, stage_start_records(table, &window)))
}

pub fn print_projection(
    table: &StageTable,
    end_arg: &str,
    duration_arg: Option<&str>,
    json: bool,
) -> Result<()> {
    let (window, records) = project_records(table, end_arg, duration_arg)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    println!(
        "run: {} .. {} ({} ms)",
        iso_timestamp(window.start_epoch_ms),
        iso_timestamp(window.end_epoch_ms),
        window.duration_ms()
    );
    for record in &records {
        println!("{}", format_stage_start_line(record));
    }
    Ok(())
}
