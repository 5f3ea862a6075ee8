//! Ramping arrival-rate executor driven by the stage clock.

use anyhow::{Context, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};

pub mod request;
pub mod vu;

use crate::cli::config::RunSettings;
use crate::schedule::{RunWindow, StageLabel, StageTable};
use crate::stats::{Metric, ShardedAggregator, StatsAggregator};
use crate::utils::duration_to_ms;
use request::{RequestPlan, RequestTemplate};
use vu::{VuPool, VuSlot};

/// Longest the dispatcher sleeps before re-reading the rate.
const MAX_TICK: Duration = Duration::from_millis(10);
/// Failures are logged only for each VU's first iterations.
const LOGGED_ITERATIONS: u64 = 10;
const MAX_LOGGED_BODY: usize = 500;

pub struct RunOutcome {
    pub stats: StatsAggregator,
    pub window: RunWindow,
    pub elapsed: Duration,
    /// The stop signal fired before the profile finished
    pub interrupted: bool,
    pub vus_created: u32,
}

pub struct Engine {
    settings: RunSettings,
    table: Arc<StageTable>,
    template: Arc<RequestTemplate>,
    client: reqwest::Client,
}

/// State every in-flight iteration needs.
struct Shared {
    client: reqwest::Client,
    template: Arc<RequestTemplate>,
    table: Arc<StageTable>,
    aggregator: ShardedAggregator,
    vus: VuPool,
    start: Instant,
}

impl Engine {
    pub fn new(settings: RunSettings, table: StageTable) -> Result<Self> {
        let template = RequestTemplate::from_settings(&settings)?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_vus)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            settings,
            table: Arc::new(table),
            template: Arc::new(template),
            client,
        })
    }

    pub fn table(&self) -> &StageTable {
        &self.table
    }

    /// Run the whole profile, or until `stop` resolves.
    ///
    /// Arrivals accumulate as `rate * dt / time_unit` credit; every whole
    /// credit starts one iteration on a free VU or counts a dropped iteration.
    /// Each iteration resolves its own stage from the elapsed time at the
    /// moment it starts.
    pub async fn run<F>(&self, stop: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let total_ms = self.table.total_duration_ms();
        let total = Duration::from_millis(total_ms);
        let shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let shared = Arc::new(Shared {
            client: self.client.clone(),
            template: self.template.clone(),
            table: self.table.clone(),
            aggregator: ShardedAggregator::new(shards),
            vus: VuPool::new(self.settings.pre_allocated_vus, self.settings.max_vus),
            start: Instant::now(),
        });
        let start = shared.start;
        let per_unit = self.settings.time_unit.as_secs_f64();

        tracing::info!(
            name = %self.settings.name,
            url = %self.template.url,
            stages = self.table.len(),
            total_ms,
            "starting ramp"
        );

        let mut inflight: JoinSet<()> = JoinSet::new();
        let mut credit = 0.0f64;
        let mut last = start;
        let mut current_stage: Option<usize> = None;
        let mut interrupted = false;
        tokio::pin!(stop);

        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(start);
            let elapsed_ms = duration_to_ms(elapsed);
            let Some(rate) = self.table.rate_at(elapsed_ms, self.settings.start_rate) else {
                break;
            };

            let stage = self.table.resolve(elapsed_ms);
            if stage != current_stage {
                if let Some(index) = stage {
                    tracing::info!(
                        stage_index = index,
                        target = self.table.target_rate(index).unwrap_or(0),
                        elapsed_ms = elapsed_ms as u64,
                        "stage started"
                    );
                }
                current_stage = stage;
            }

            credit += rate * now.duration_since(last).as_secs_f64() / per_unit;
            last = now;
            while credit >= 1.0 {
                credit -= 1.0;
                self.dispatch(&shared, &mut inflight, elapsed_ms);
            }
            while inflight.try_join_next().is_some() {}

            let max_wait = MAX_TICK.min(total.saturating_sub(elapsed)).as_secs_f64();
            let wait = if rate > 0.0 {
                ((1.0 - credit) * per_unit / rate).clamp(0.0, max_wait)
            } else {
                max_wait
            };

            tokio::select! {
                biased;
                _ = &mut stop => {
                    interrupted = true;
                    tracing::warn!(elapsed_ms = elapsed_ms as u64, "stop requested, ending ramp early");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
            }
        }

        self.drain(&mut inflight).await;

        let elapsed = start.elapsed();
        let window = RunWindow::from_end(
            chrono::Utc::now().timestamp_millis(),
            Some(duration_to_ms(elapsed)),
            total_ms,
        );
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, vus = shared.vus.created(), "ramp finished");

        Ok(RunOutcome {
            stats: shared.aggregator.merge(),
            window,
            elapsed,
            interrupted,
            vus_created: shared.vus.created(),
        })
    }

    fn dispatch(&self, shared: &Arc<Shared>, inflight: &mut JoinSet<()>, elapsed_ms: f64) {
        match shared.vus.acquire() {
            Some(slot) => {
                let shared = shared.clone();
                inflight.spawn(async move { shared.iterate(slot).await });
            }
            None => {
                let label = StageLabel::for_elapsed(&shared.table, elapsed_ms);
                tracing::debug!(
                    stage = %label.tag,
                    max_vus = shared.vus.max(),
                    "no free VU, dropping iteration"
                );
                shared
                    .aggregator
                    .add(0, Metric::DroppedIteration { stage: label.tag });
            }
        }
    }

    /// Let in-flight iterations finish within the graceful stop window.
    async fn drain(&self, inflight: &mut JoinSet<()>) {
        if inflight.is_empty() {
            return;
        }
        let grace = self.settings.graceful_stop;
        tracing::info!(in_flight = inflight.len(), "graceful stop: waiting up to {:?}", grace);
        let drained = tokio::time::timeout(grace, async {
            while inflight.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(
                remaining = inflight.len(),
                "graceful stop expired, aborting in-flight requests"
            );
            inflight.shutdown().await;
        }
    }
}

impl Shared {
    async fn iterate(&self, slot: VuSlot) {
        let work = slot.work_unit();
        let elapsed_ms = duration_to_ms(self.start.elapsed());
        let label = StageLabel::for_elapsed(&self.table, elapsed_ms);
        let nonce = rand::thread_rng().gen_range(100_000..=999_999);
        let plan = self.template.plan(&label, work, nonce);

        let started = Instant::now();
        let outcome = send(&self.client, plan).await;
        let duration = started.elapsed();
        let log_failure = work.iteration < LOGGED_ITERATIONS;

        let (status, error) = match outcome {
            Ok((status, body)) => {
                if !(200..300).contains(&status) && log_failure {
                    tracing::warn!(
                        vu = work.vu,
                        iteration = work.iteration,
                        stage = %label.tag,
                        status,
                        body = %truncate(&body, MAX_LOGGED_BODY),
                        "request failed"
                    );
                }
                (Some(status), None)
            }
            Err(e) => {
                if log_failure {
                    tracing::warn!(
                        vu = work.vu,
                        iteration = work.iteration,
                        stage = %label.tag,
                        error = %e,
                        "request error"
                    );
                }
                (None, Some(describe_error(&e).to_string()))
            }
        };

        self.aggregator.add(
            work.vu,
            Metric::Request {
                stage: label.tag,
                target: label.target,
                duration,
                status,
                error,
            },
        );
        self.vus.release(slot);
    }
}

async fn send(client: &reqwest::Client, plan: RequestPlan) -> Result<(u16, String), reqwest::Error> {
    let response = plan.into_builder(client).send().await?;
    let status = response.status().as_u16();
    // Read the body so the connection goes back to the pool
    let body = response.text().await.unwrap_or_default();
    Ok((status, body))
}

fn describe_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "request timeout"
    } else if e.is_connect() {
        "connection error"
    } else if e.is_body() || e.is_decode() {
        "body error"
    } else {
        "request error"
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
