//! Runs short ramp profiles against a local axum server.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rampclock::cli::config::{Config, RunSettings, ScheduleStep};
use rampclock::engine::Engine;
use rampclock::stats::report::stage_start_records;
use rampclock::stats::validate_thresholds;

#[derive(Debug, Clone)]
struct Seen {
    stage: String,
    target: String,
    lt_name: String,
    auth: Option<String>,
    request_id: Option<String>,
}

#[derive(Clone)]
struct AppState {
    seen: Arc<Mutex<Vec<Seen>>>,
    status: StatusCode,
}

async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: String) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let request_id = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("requestId").and_then(|id| id.as_str()).map(str::to_string));
    state.seen.lock().push(Seen {
        stage: header("x-lt-stage").unwrap_or_default(),
        target: header("x-lt-target-rps").unwrap_or_default(),
        lt_name: header("x-lt-name").unwrap_or_default(),
        auth: header("authorization"),
        request_id,
    });
    state.status
}

async fn start_server(status: StatusCode) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/events", post(ingest))
        .with_state(AppState {
            seen: seen.clone(),
            status,
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

fn config(base_url: &str, steps: &[(u64, &str)]) -> Config {
    Config {
        name: Some("LT-002".to_string()),
        base_url: Some(base_url.to_string()),
        path: Some("/api/events".to_string()),
        auth_token: Some("secret".to_string()),
        start_rate: Some(steps.first().map(|s| s.0).unwrap_or(0)),
        pre_allocated_vus: Some(5),
        max_vus: Some(20),
        stop: Some("2s".to_string()),
        timeout: Some("2s".to_string()),
        payload: Some(serde_json::json!({ "source": "engine_run" })),
        stages: Some(
            steps
                .iter()
                .map(|(target, duration)| ScheduleStep {
                    duration: duration.to_string(),
                    target: *target,
                })
                .collect(),
        ),
        ..Default::default()
    }
}

fn engine_for(config: &Config) -> Engine {
    let settings = RunSettings::from_config(config).unwrap();
    Engine::new(settings, config.stage_table()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_carry_stage_labels() {
    let (base_url, seen) = start_server(StatusCode::CREATED).await;
    let config = config(&base_url, &[(20, "500ms"), (40, "500ms")]);
    let engine = engine_for(&config);

    let outcome = engine.run(std::future::pending()).await.unwrap();
    assert!(!outcome.interrupted);

    let seen = seen.lock().clone();
    let report = outcome.stats.to_report();
    assert!(!seen.is_empty());
    assert_eq!(report.total_requests, seen.len());
    assert_eq!(report.failed_requests, 0);
    assert_eq!(report.status_codes.get(&201), Some(&seen.len()));

    let mut by_stage: HashMap<&str, usize> = HashMap::new();
    for s in &seen {
        *by_stage.entry(s.stage.as_str()).or_insert(0) += 1;
        assert_eq!(s.lt_name, "LT-002");
        assert_eq!(s.auth.as_deref(), Some("Bearer secret"));
        match s.stage.as_str() {
            "rps-20" => assert_eq!(s.target, "20"),
            "rps-40" => assert_eq!(s.target, "40"),
            // an iteration dispatched just before the end may start after it
            "rps-unknown" => assert_eq!(s.target, "unknown"),
            other => panic!("unexpected stage label {}", other),
        }
    }
    assert!(by_stage.get("rps-20").copied().unwrap_or(0) > 0, "{:?}", by_stage);
    assert!(by_stage.get("rps-40").copied().unwrap_or(0) > 0, "{:?}", by_stage);

    let ids: HashSet<&str> = seen.iter().filter_map(|s| s.request_id.as_deref()).collect();
    assert_eq!(ids.len(), seen.len());
    assert!(ids.iter().all(|id| id.starts_with("REQ-")));

    let stages = stage_start_records(engine.table(), &outcome.window);
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0].start_epoch_ms, outcome.window.start_epoch_ms);
    assert_eq!(stages[1].start_epoch_ms - stages[0].start_epoch_ms, 500);
    assert!(stages.iter().all(|s| s.reached));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_target_breaks_thresholds() {
    let (base_url, seen) = start_server(StatusCode::SERVICE_UNAVAILABLE).await;
    let mut config = config(&base_url, &[(20, "300ms")]);
    config.criteria = Some(HashMap::from([
        ("http_req_failed".to_string(), vec!["rate<0.002".to_string()]),
        ("check_fail_rate".to_string(), vec!["rate<0.01".to_string()]),
    ]));
    let settings = RunSettings::from_config(&config).unwrap();
    let criteria = settings.criteria.clone();
    let engine = Engine::new(settings, config.stage_table()).unwrap();

    let outcome = engine.run(std::future::pending()).await.unwrap();
    let report = outcome.stats.to_report();
    assert!(report.total_requests > 0);
    assert_eq!(report.total_requests, seen.lock().len());
    assert_eq!(report.failed_requests, report.total_requests);
    assert!((report.check_fail_rate - 1.0).abs() < f64::EPSILON);

    let failures = validate_thresholds(&report, &criteria);
    assert_eq!(failures.len(), 2, "{:?}", failures);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_stop_leaves_later_stages_unreached() {
    let (base_url, _seen) = start_server(StatusCode::OK).await;
    let config = config(&base_url, &[(5, "1s"), (5, "10s"), (5, "10s")]);
    let engine = engine_for(&config);

    let outcome = engine
        .run(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();
    assert!(outcome.interrupted);
    assert!(outcome.window.duration_ms() < 5_000);

    let stages = stage_start_records(engine.table(), &outcome.window);
    assert!(stages[0].reached);
    assert!(!stages[1].reached);
    assert!(!stages[2].reached);
}
