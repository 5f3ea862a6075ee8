use hdrhistogram::Histogram;
use parking_lot::RwLock as ParkingLotRwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;

pub mod csv;
pub mod report;

/// Sharded aggregator for reduced lock contention at high concurrency
/// Metrics are distributed across N shards based on vu % num_shards
pub struct ShardedAggregator {
    shards: Vec<ParkingLotRwLock<StatsAggregator>>,
    num_shards: usize,
}

impl ShardedAggregator {
    pub fn new(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        let shards = (0..num_shards)
            .map(|_| ParkingLotRwLock::new(StatsAggregator::new()))
            .collect();
        Self { shards, num_shards }
    }

    /// Add a metric to the shard owned by `vu`
    pub fn add(&self, vu: u32, metric: Metric) {
        let shard_idx = vu as usize % self.num_shards;
        self.shards[shard_idx].write().add(metric);
    }

    /// Merge all shards into a single aggregator for final reporting
    pub fn merge(&self) -> StatsAggregator {
        let mut merged = StatsAggregator::new();
        for shard in &self.shards {
            merged.absorb(&shard.read());
        }
        merged
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone)]
pub enum Metric {
    Request {
        /// Stage tag (`rps-10`, `rps-unknown`)
        stage: String,
        /// Stage target as text (`10`, `unknown`)
        target: String,
        duration: Duration,
        /// HTTP status, `None` when no response arrived
        status: Option<u16>,
        error: Option<String>,
    },
    /// An arrival was due but every VU was busy.
    DroppedIteration { stage: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub stage: String,
    pub target: String,
    pub total_requests: usize,
    pub failed_requests: usize,
    pub dropped_iterations: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub max_latency_ms: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReportStats {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub dropped_iterations: usize,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// Share of iterations whose 2xx check failed
    pub check_fail_rate: f64,
    pub status_codes: BTreeMap<u16, usize>,
    pub errors: BTreeMap<String, usize>,
    /// Per stage tag, ordered by tag
    pub stages: Vec<StageReport>,
}

fn new_histogram() -> Histogram<u64> {
    // 1us .. 1h, 2 significant figures; bounds are constant so this cannot fail
    Histogram::<u64>::new_with_bounds(1, 60 * 60 * 1000 * 1000, 2)
        .expect("constant histogram bounds")
}

fn micros(d: Duration) -> u64 {
    (d.as_micros() as u64).max(1)
}

fn quantile_ms(h: &Histogram<u64>, q: f64) -> f64 {
    if h.is_empty() {
        0.0
    } else {
        h.value_at_quantile(q) as f64 / 1000.0
    }
}

pub struct StageStats {
    pub target: String,
    pub total_requests: usize,
    pub failed_requests: usize,
    pub dropped_iterations: usize,
    pub total_duration: Duration,
    pub histogram: Histogram<u64>,
}

impl StageStats {
    fn new(target: String) -> Self {
        Self {
            target,
            total_requests: 0,
            failed_requests: 0,
            dropped_iterations: 0,
            total_duration: Duration::ZERO,
            histogram: new_histogram(),
        }
    }
}

pub struct StatsAggregator {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub dropped_iterations: usize,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Duration,
    pub status_codes: BTreeMap<u16, usize>,
    pub errors: BTreeMap<String, usize>,
    pub histogram: Histogram<u64>,
    pub stages: BTreeMap<String, StageStats>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            dropped_iterations: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: Duration::ZERO,
            status_codes: BTreeMap::new(),
            errors: BTreeMap::new(),
            histogram: new_histogram(),
            stages: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, metric: Metric) {
        match metric {
            Metric::Request {
                stage,
                target,
                duration,
                status,
                error,
            } => {
                let failed = !status.is_some_and(|s| (200..300).contains(&s));
                self.total_requests += 1;
                self.total_duration += duration;
                if self.min_duration.is_none_or(|min| duration < min) {
                    self.min_duration = Some(duration);
                }
                if duration > self.max_duration {
                    self.max_duration = duration;
                }
                self.histogram.saturating_record(micros(duration));
                if let Some(code) = status {
                    *self.status_codes.entry(code).or_insert(0) += 1;
                }
                if let Some(err) = error {
                    *self.errors.entry(err).or_insert(0) += 1;
                }
                if failed {
                    self.failed_requests += 1;
                }

                let stage_stats = self
                    .stages
                    .entry(stage)
                    .or_insert_with(|| StageStats::new(target));
                stage_stats.total_requests += 1;
                stage_stats.total_duration += duration;
                stage_stats.histogram.saturating_record(micros(duration));
                if failed {
                    stage_stats.failed_requests += 1;
                }
            }
            Metric::DroppedIteration { stage } => {
                self.dropped_iterations += 1;
                let target = stage.trim_start_matches("rps-").to_string();
                self.stages
                    .entry(stage)
                    .or_insert_with(|| StageStats::new(target))
                    .dropped_iterations += 1;
            }
        }
    }

    fn absorb(&mut self, other: &StatsAggregator) {
        self.total_requests += other.total_requests;
        self.failed_requests += other.failed_requests;
        self.dropped_iterations += other.dropped_iterations;
        self.total_duration += other.total_duration;
        if let Some(other_min) = other.min_duration {
            if self.min_duration.is_none_or(|min| other_min < min) {
                self.min_duration = Some(other_min);
            }
        }
        if other.max_duration > self.max_duration {
            self.max_duration = other.max_duration;
        }
        for (code, count) in &other.status_codes {
            *self.status_codes.entry(*code).or_insert(0) += count;
        }
        for (err, count) in &other.errors {
            *self.errors.entry(err.clone()).or_insert(0) += count;
        }
        let _ = self.histogram.add(&other.histogram);
        for (tag, theirs) in &other.stages {
            let ours = self
                .stages
                .entry(tag.clone())
                .or_insert_with(|| StageStats::new(theirs.target.clone()));
            ours.total_requests += theirs.total_requests;
            ours.failed_requests += theirs.failed_requests;
            ours.dropped_iterations += theirs.dropped_iterations;
            ours.total_duration += theirs.total_duration;
            let _ = ours.histogram.add(&theirs.histogram);
        }
    }

    pub fn to_report(&self) -> ReportStats {
        let avg_ms = |total: Duration, count: usize| {
            if count > 0 {
                total.as_secs_f64() * 1000.0 / count as f64
            } else {
                0.0
            }
        };

        let stages = self
            .stages
            .iter()
            .map(|(tag, s)| StageReport {
                stage: tag.clone(),
                target: s.target.clone(),
                total_requests: s.total_requests,
                failed_requests: s.failed_requests,
                dropped_iterations: s.dropped_iterations,
                avg_latency_ms: avg_ms(s.total_duration, s.total_requests),
                p95_latency_ms: quantile_ms(&s.histogram, 0.95),
                p99_latency_ms: quantile_ms(&s.histogram, 0.99),
                max_latency_ms: if s.histogram.is_empty() {
                    0.0
                } else {
                    s.histogram.max() as f64 / 1000.0
                },
            })
            .collect();

        ReportStats {
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            dropped_iterations: self.dropped_iterations,
            avg_latency_ms: avg_ms(self.total_duration, self.total_requests),
            min_latency_ms: self
                .min_duration
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0),
            max_latency_ms: self.max_duration.as_secs_f64() * 1000.0,
            p50_latency_ms: quantile_ms(&self.histogram, 0.50),
            p90_latency_ms: quantile_ms(&self.histogram, 0.90),
            p95_latency_ms: quantile_ms(&self.histogram, 0.95),
            p99_latency_ms: quantile_ms(&self.histogram, 0.99),
            check_fail_rate: if self.total_requests > 0 {
                self.failed_requests as f64 / self.total_requests as f64
            } else {
                0.0
            },
            status_codes: self.status_codes.clone(),
            errors: self.errors.clone(),
            stages,
        }
    }

    pub fn report(&self) {
        let report = self.to_report();
        println!("\n--- Test Summary ---");
        if report.total_requests == 0 && report.dropped_iterations == 0 {
            println!("No metrics collected.");
            println!("--------------------\n");
            return;
        }

        println!("Total Requests:     {}", report.total_requests);
        println!(
            "Failed Checks:      {} ({:.2}%)",
            report.failed_requests,
            report.check_fail_rate * 100.0
        );
        println!("Dropped Iterations: {}", report.dropped_iterations);
        println!("Avg Latency:        {:.2} ms", report.avg_latency_ms);
        println!("Min Latency:        {:.2} ms", report.min_latency_ms);
        println!("Max Latency:        {:.2} ms", report.max_latency_ms);
        println!("P50 Latency:        {:.2} ms", report.p50_latency_ms);
        println!("P90 Latency:        {:.2} ms", report.p90_latency_ms);
        println!("P95 Latency:        {:.2} ms", report.p95_latency_ms);
        println!("P99 Latency:        {:.2} ms", report.p99_latency_ms);

        if !report.status_codes.is_empty() {
            println!("\nStatus Codes:");
            for (code, count) in &report.status_codes {
                println!("  {}: {}", code, count);
            }
        }

        if !report.stages.is_empty() {
            println!("\nStages:");
            for s in &report.stages {
                println!("  {}", s.stage);
                println!("    Requests: {}", s.total_requests);
                println!("    P95:      {:.2} ms", s.p95_latency_ms);
                if s.failed_requests > 0 {
                    println!("    Failed:   {}", s.failed_requests);
                }
                if s.dropped_iterations > 0 {
                    println!("    Dropped:  {}", s.dropped_iterations);
                }
            }
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for (err, count) in &report.errors {
                println!("  {}: {}", err, count);
            }
        }
        println!("--------------------\n");
    }
}

static THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-z]+)(?:\s*\(\s*(\d+(?:\.\d+)?)\s*\)|(\d+(?:\.\d+)?))?\s*(<=|>=|==|<|>)\s*(-?\d+(?:\.\d+)?)\s*$")
        .expect("valid threshold regex")
});

/// Evaluate pass/fail criteria against a report.
///
/// Expressions accept both `p(95)<500` and `p95 < 500`. Every unmet or
/// unreadable expression produces one failure line.
pub fn validate_thresholds(
    report: &ReportStats,
    criteria: &HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut failures = Vec::new();
    let mut metrics: Vec<_> = criteria.iter().collect();
    metrics.sort_by_key(|(name, _)| name.as_str());

    for (metric_name, thresholds) in metrics {
        for threshold in thresholds {
            let Some(caps) = THRESHOLD.captures(threshold) else {
                failures.push(format!(
                    "Threshold INVALID: {} '{}' (expected e.g. 'p(95)<500' or 'rate<0.01')",
                    metric_name, threshold
                ));
                continue;
            };
            let aggregation = &caps[1];
            let percentile = caps
                .get(2)
                .or_else(|| caps.get(3))
                .and_then(|m| m.as_str().parse::<f64>().ok());
            let operator = &caps[4];
            let Ok(limit) = caps[5].parse::<f64>() else {
                failures.push(format!("Threshold INVALID: {} '{}'", metric_name, threshold));
                continue;
            };

            let Some(actual) = metric_value(report, metric_name, aggregation, percentile) else {
                failures.push(format!(
                    "Threshold INVALID: {} '{}' (unsupported metric or aggregation)",
                    metric_name, threshold
                ));
                continue;
            };

            let pass = match operator {
                "<" => actual < limit,
                "<=" => actual <= limit,
                ">" => actual > limit,
                ">=" => actual >= limit,
                _ => (actual - limit).abs() < f64::EPSILON,
            };
            if !pass {
                failures.push(format!(
                    "Threshold FAILED: {} {} (actual: {:.4})",
                    metric_name, threshold, actual
                ));
            }
        }
    }
    failures
}

fn metric_value(
    report: &ReportStats,
    metric: &str,
    aggregation: &str,
    percentile: Option<f64>,
) -> Option<f64> {
    let rate = |failed: usize| {
        if report.total_requests > 0 {
            failed as f64 / report.total_requests as f64
        } else {
            0.0
        }
    };
    match (metric, aggregation, percentile) {
        ("http_req_duration", "avg", None) => Some(report.avg_latency_ms),
        ("http_req_duration", "min", None) => Some(report.min_latency_ms),
        ("http_req_duration", "max", None) => Some(report.max_latency_ms),
        ("http_req_duration", "med", None) => Some(report.p50_latency_ms),
        ("http_req_duration", "p", Some(p)) if p.fract() == 0.0 => match p as u32 {
            50 => Some(report.p50_latency_ms),
            90 => Some(report.p90_latency_ms),
            95 => Some(report.p95_latency_ms),
            99 => Some(report.p99_latency_ms),
            _ => None,
        },
        ("http_req_failed", "rate", None) => {
            let ok: usize = report
                .status_codes
                .iter()
                .filter(|(code, _)| (200..400).contains(*code))
                .map(|(_, n)| n)
                .sum();
            Some(rate(report.total_requests.saturating_sub(ok)))
        }
        ("check_fail_rate", "rate", None) => Some(report.check_fail_rate),
        ("dropped_iterations", "count", None) => Some(report.dropped_iterations as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(stage: &str, ms: u64, status: Option<u16>) -> Metric {
        Metric::Request {
            stage: stage.to_string(),
            target: stage.trim_start_matches("rps-").to_string(),
            duration: Duration::from_millis(ms),
            status,
            error: status.is_none().then(|| "connection refused".to_string()),
        }
    }

    #[test]
    fn test_aggregator_math() {
        let mut agg = StatsAggregator::new();
        agg.add(request("rps-5", 100, Some(200)));
        agg.add(request("rps-5", 200, Some(500)));
        agg.add(request("rps-10", 300, None));

        let report = agg.to_report();
        assert_eq!(report.total_requests, 3);
        assert_eq!(report.failed_requests, 2);
        assert!((report.avg_latency_ms - 200.0).abs() < 0.001);
        assert!((report.min_latency_ms - 100.0).abs() < 0.001);
        assert!((report.max_latency_ms - 300.0).abs() < 0.001);
        assert_eq!(report.status_codes.get(&200), Some(&1));
        assert_eq!(report.status_codes.get(&500), Some(&1));
        assert_eq!(report.errors.get("connection refused"), Some(&1));
        assert!((report.check_fail_rate - 2.0 / 3.0).abs() < 1e-9);

        let tags: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(tags, vec!["rps-10", "rps-5"]);
        assert_eq!(report.stages[1].total_requests, 2);
        assert_eq!(report.stages[1].failed_requests, 1);
        assert_eq!(report.stages[1].target, "5");
    }

    #[test]
    fn test_latency_above_histogram_bound_is_kept() {
        let mut agg = StatsAggregator::new();
        agg.add(request("rps-5", 2 * 60 * 60 * 1000, Some(200)));
        agg.add(request("rps-5", 10, Some(200)));
        assert_eq!(agg.histogram.len(), 2);
        assert_eq!(agg.stages["rps-5"].histogram.len(), 2);

        let report = agg.to_report();
        // clamped to the 1h upper bound instead of dropped
        assert!(report.p99_latency_ms >= 59.0 * 60.0 * 1000.0);
        assert!(report.stages[0].max_latency_ms >= 59.0 * 60.0 * 1000.0);
    }

    #[test]
    fn test_dropped_iterations() {
        let mut agg = StatsAggregator::new();
        agg.add(Metric::DroppedIteration {
            stage: "rps-80".to_string(),
        });
        let report = agg.to_report();
        assert_eq!(report.dropped_iterations, 1);
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.stages[0].dropped_iterations, 1);
        assert_eq!(report.stages[0].target, "80");
    }

    #[test]
    fn test_sharded_merge() {
        let sharded = ShardedAggregator::new(4);
        for vu in 0..8u32 {
            sharded.add(vu, request("rps-20", 10 + vu as u64, Some(201)));
        }
        sharded.add(
            3,
            Metric::DroppedIteration {
                stage: "rps-20".to_string(),
            },
        );
        let merged = sharded.merge().to_report();
        assert_eq!(merged.total_requests, 8);
        assert_eq!(merged.dropped_iterations, 1);
        assert!((merged.min_latency_ms - 10.0).abs() < 0.001);
        assert!((merged.max_latency_ms - 17.0).abs() < 0.001);
        assert_eq!(merged.stages.len(), 1);
        assert_eq!(merged.stages[0].total_requests, 8);
        assert_eq!(merged.stages[0].dropped_iterations, 1);
    }

    #[test]
    fn test_empty_report() {
        let report = StatsAggregator::new().to_report();
        assert_eq!(report.total_requests, 0);
        assert_eq!(report.p95_latency_ms, 0.0);
        assert_eq!(report.check_fail_rate, 0.0);
    }

    #[test]
    fn test_thresholds_pass_and_fail() {
        let mut agg = StatsAggregator::new();
        for i in 1..=100 {
            agg.add(request("rps-5", i, Some(if i <= 99 { 200 } else { 503 })));
        }
        let report = agg.to_report();

        let mut criteria = HashMap::new();
        criteria.insert(
            "http_req_duration".to_string(),
            vec!["p(95)<500".to_string(), "avg < 100".to_string()],
        );
        criteria.insert("check_fail_rate".to_string(), vec!["rate<0.02".to_string()]);
        criteria.insert("http_req_failed".to_string(), vec!["rate<=0.01".to_string()]);
        assert!(
            validate_thresholds(&report, &criteria).is_empty(),
            "{:?}",
            validate_thresholds(&report, &criteria)
        );

        let mut failing = HashMap::new();
        failing.insert("http_req_duration".to_string(), vec!["p95 < 50".to_string()]);
        failing.insert("http_req_failed".to_string(), vec!["rate<0.002".to_string()]);
        failing.insert("dropped_iterations".to_string(), vec!["count>0".to_string()]);
        let failures = validate_thresholds(&report, &failing);
        assert_eq!(failures.len(), 3, "{:?}", failures);
        assert!(failures.iter().all(|f| f.starts_with("Threshold FAILED")));
    }

    #[test]
    fn test_thresholds_invalid_expressions_fail() {
        let report = StatsAggregator::new().to_report();
        let mut criteria = HashMap::new();
        criteria.insert(
            "http_req_duration".to_string(),
            vec!["fast please".to_string(), "p(42)<10".to_string()],
        );
        criteria.insert("custom_metric".to_string(), vec!["rate<1".to_string()]);
        let failures = validate_thresholds(&report, &criteria);
        assert_eq!(failures.len(), 3, "{:?}", failures);
        assert!(failures.iter().all(|f| f.starts_with("Threshold INVALID")));
    }
}
