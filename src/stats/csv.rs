use crate::stats::report::StageStartRecord;
use crate::stats::ReportStats;

/// Generate CSV output from ReportStats and the stage start records
pub fn generate_csv(report: &ReportStats, stages: &[StageStartRecord]) -> String {
    let mut out = String::from("metric_name,metric_type,value\n");

    out.push_str(&format!("http_req_count,counter,{}\n", report.total_requests));
    out.push_str(&format!("http_req_failed,counter,{}\n", report.failed_requests));
    out.push_str(&format!("dropped_iterations,counter,{}\n", report.dropped_iterations));
    out.push_str(&format!("check_fail_rate,rate,{:.6}\n", report.check_fail_rate));
    out.push_str(&format!("http_req_duration_avg,gauge,{:.3}\n", report.avg_latency_ms));
    out.push_str(&format!("http_req_duration_min,gauge,{:.3}\n", report.min_latency_ms));
    out.push_str(&format!("http_req_duration_max,gauge,{:.3}\n", report.max_latency_ms));
    out.push_str(&format!("http_req_duration_p50,gauge,{:.3}\n", report.p50_latency_ms));
    out.push_str(&format!("http_req_duration_p90,gauge,{:.3}\n", report.p90_latency_ms));
    out.push_str(&format!("http_req_duration_p95,gauge,{:.3}\n", report.p95_latency_ms));
    out.push_str(&format!("http_req_duration_p99,gauge,{:.3}\n", report.p99_latency_ms));

    for (code, count) in &report.status_codes {
        out.push_str(&format!("http_req_status_{},counter,{}\n", code, count));
    }

    // Per stage tag
    for stage in &report.stages {
        let name = stage.stage.replace('-', "_");
        out.push_str(&format!("{}_count,counter,{}\n", name, stage.total_requests));
        out.push_str(&format!("{}_failed,counter,{}\n", name, stage.failed_requests));
        out.push_str(&format!("{}_dropped,counter,{}\n", name, stage.dropped_iterations));
        out.push_str(&format!("{}_p95,gauge,{:.3}\n", name, stage.p95_latency_ms));
    }

    out.push('\n');
    out.push_str(&stage_starts_csv(stages));
    out
}

pub fn stage_starts_csv(stages: &[StageStartRecord]) -> String {
    let mut out = String::from("stage_index,target_rps,start_epoch_ms,start_timestamp,reached\n");
    for s in stages {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            s.stage_index, s.target_rps, s.start_epoch_ms, s.timestamp, s.reached
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StageReport;

    fn sample_report() -> ReportStats {
        let mut report = ReportStats {
            total_requests: 120,
            failed_requests: 2,
            p95_latency_ms: 42.5,
            ..Default::default()
        };
        report.status_codes.insert(201, 118);
        report.status_codes.insert(503, 2);
        report.stages.push(StageReport {
            stage: "rps-10".to_string(),
            target: "10".to_string(),
            total_requests: 120,
            failed_requests: 2,
            p95_latency_ms: 42.5,
            ..Default::default()
        });
        report
    }

    #[test]
    fn test_generate_csv_header_and_metrics() {
        let csv = generate_csv(&sample_report(), &[]);
        assert!(csv.starts_with("metric_name,metric_type,value\n"));
        assert!(csv.contains("http_req_count,counter,120\n"));
        assert!(csv.contains("http_req_status_503,counter,2\n"));
        assert!(csv.contains("http_req_duration_p95,gauge,42.500\n"));
        assert!(csv.contains("rps_10_count,counter,120\n"));
        assert!(csv.contains("stage_index,target_rps,start_epoch_ms,start_timestamp,reached\n"));
    }

    #[test]
    fn test_stage_starts_section() {
        let stages = vec![
            StageStartRecord {
                stage_index: 0,
                target_rps: 5,
                start_epoch_ms: 1_767_225_600_000,
                timestamp: "2026-01-01T00:00:00.000Z".to_string(),
                reached: true,
            },
            StageStartRecord {
                stage_index: 1,
                target_rps: 10,
                start_epoch_ms: 1_767_225_780_000,
                timestamp: "2026-01-01T00:03:00.000Z".to_string(),
                reached: false,
            },
        ];
        let csv = stage_starts_csv(&stages);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "0,5,1767225600000,2026-01-01T00:00:00.000Z,true");
        assert_eq!(lines[2], "1,10,1767225780000,2026-01-01T00:03:00.000Z,false");
    }
}
