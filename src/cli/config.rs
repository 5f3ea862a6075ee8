use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::schedule::{Stage, StageTable};
use crate::utils::{parse_duration_ms, parse_duration_str};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ScheduleStep {
    /// Stage length (e.g., "3m", "90s", "500ms")
    pub duration: String,
    /// Target arrival rate for the stage (iterations per time unit)
    pub target: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct Config {
    /// Load test name, sent as X-LT-Name and the `lt` tag (e.g., "LT-002")
    pub name: Option<String>,
    /// Base URL of the system under test (env: BASE_URL)
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    /// Request path appended to the base URL
    pub path: Option<String>,
    /// HTTP method (default POST)
    pub method: Option<String>,
    /// Extra request headers
    pub headers: Option<HashMap<String, String>>,
    /// Bearer token (env: AUTH_TOKEN)
    #[serde(alias = "authToken")]
    pub auth_token: Option<String>,
    /// Application name sent as X-App-Name (env: APP_NAME)
    #[serde(alias = "appName")]
    pub app_name: Option<String>,
    /// Environment name sent as X-Env (env: ENV)
    pub env: Option<String>,
    /// Ramp profile (k6: stages)
    #[serde(alias = "schedule")]
    pub stages: Option<Vec<ScheduleStep>>,
    /// Rate before the first stage starts ramping
    #[serde(alias = "startRate")]
    pub start_rate: Option<u64>,
    /// Time unit the stage targets are expressed in (default "1s")
    #[serde(alias = "timeUnit")]
    pub time_unit: Option<String>,
    /// Virtual users created before the run starts
    #[serde(alias = "preAllocatedVUs", alias = "preAllocatedVus")]
    pub pre_allocated_vus: Option<usize>,
    /// Upper bound on virtual users
    #[serde(alias = "maxVUs", alias = "maxVus")]
    pub max_vus: Option<usize>,
    /// Graceful stop: how long in-flight requests may finish after the profile ends
    #[serde(alias = "gracefulStop")]
    pub stop: Option<String>,
    /// Per-request timeout
    pub timeout: Option<String>,
    /// Pass/Fail criteria (thresholds)
    #[serde(alias = "thresholds")]
    pub criteria: Option<HashMap<String, Vec<String>>>,
    /// Tags added to every request metric
    pub tags: Option<HashMap<String, String>>,
    /// Request body. A JSON object gets a unique `requestId` field per request.
    pub payload: Option<serde_json::Value>,
    /// Reject unrecognized durations and other config problems instead of warning
    pub strict: Option<bool>,
}

/// A problem found while checking a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("stage {index}: unrecognized duration '{token}' (expected <n>ms, <n>s, <n>m or <n>h)")]
    UnrecognizedDuration { index: usize, token: String },
    #[error("stage {index}: target rate is 0")]
    ZeroTarget { index: usize },
    #[error("no stages configured")]
    NoStages,
    #[error("{field}: '{value}' is not a valid duration")]
    InvalidDuration { field: &'static str, value: String },
    #[error("max_vus ({max}) is lower than pre_allocated_vus ({pre})")]
    VuBounds { pre: usize, max: usize },
    #[error("base_url is not set (config or BASE_URL)")]
    MissingBaseUrl,
}

impl ConfigError {
    /// Problems that permissive mode tolerates, keeping the schedule total.
    pub fn is_tolerated(&self) -> bool {
        matches!(
            self,
            ConfigError::UnrecognizedDuration { .. } | ConfigError::ZeroTarget { .. }
        )
    }

    /// Whether the problem stops a run. Invalid option durations fall back to
    /// their defaults unless strict.
    pub fn is_fatal(&self, strict: bool) -> bool {
        strict || !(self.is_tolerated() || matches!(self, ConfigError::InvalidDuration { .. }))
    }
}

impl Config {
    /// Load a YAML or JSON config file, picked by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = if ext == "json" {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML config {}", path.display()))?
        };
        Ok(config)
    }

    /// Apply BASE_URL, AUTH_TOKEN, APP_NAME and ENV from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = non_empty("BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = non_empty("AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = non_empty("APP_NAME") {
            self.app_name = Some(v);
        }
        if let Some(v) = non_empty("ENV") {
            self.env = Some(v);
        }
    }

    pub fn stage_table(&self) -> StageTable {
        let stages = self
            .stages
            .iter()
            .flatten()
            .map(|step| Stage::new(step.target, step.duration.as_str()))
            .collect();
        StageTable::new(stages)
    }

    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(false)
    }

    /// Every problem in the config, in a stable order.
    pub fn diagnose(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        match self.stages.as_deref() {
            None | Some([]) => problems.push(ConfigError::NoStages),
            Some(steps) => {
                for (index, step) in steps.iter().enumerate() {
                    // "0s" is a valid token, so check the shape, not the value
                    if parse_duration_ms(&step.duration) == 0 && !is_zero_token(&step.duration) {
                        problems.push(ConfigError::UnrecognizedDuration {
                            index,
                            token: step.duration.clone(),
                        });
                    }
                    if step.target == 0 {
                        problems.push(ConfigError::ZeroTarget { index });
                    }
                }
            }
        }

        let durations = [
            ("time_unit", &self.time_unit),
            ("stop", &self.stop),
            ("timeout", &self.timeout),
        ];
        for (field, value) in durations {
            if let Some(value) = value {
                if parse_duration_str(value).is_none() {
                    problems.push(ConfigError::InvalidDuration {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }

        if let (Some(pre), Some(max)) = (self.pre_allocated_vus, self.max_vus) {
            if max < pre {
                problems.push(ConfigError::VuBounds { pre, max });
            }
        }

        if self.base_url.as_deref().is_none_or(str::is_empty) {
            problems.push(ConfigError::MissingBaseUrl);
        }

        problems
    }
}

/// `KEY=value` pairs from a `.env` file. Comments and blank lines are skipped,
/// surrounding quotes stripped.
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let key = key.trim().trim_start_matches("export ").trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.to_string(), value.to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn is_zero_token(token: &str) -> bool {
    let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &token[digits.len()..];
    !digits.is_empty()
        && digits.bytes().all(|b| b == b'0')
        && matches!(unit, "ms" | "s" | "m" | "h")
}

/// Fully resolved settings for a run, defaults applied.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub auth_token: Option<String>,
    pub app_name: String,
    pub env: String,
    pub start_rate: u64,
    pub time_unit: Duration,
    pub pre_allocated_vus: usize,
    pub max_vus: usize,
    pub graceful_stop: Duration,
    pub timeout: Duration,
    pub criteria: HashMap<String, Vec<String>>,
    pub tags: HashMap<String, String>,
    pub payload: Option<serde_json::Value>,
}

pub const DEFAULT_PRE_ALLOCATED_VUS: usize = 10;

impl RunSettings {
    /// Apply defaults. Fails only on problems that make a run impossible;
    /// in strict mode every diagnosed problem is fatal.
    pub fn from_config(config: &Config) -> Result<Self> {
        let problems = config.diagnose();
        let fatal: Vec<&ConfigError> = problems
            .iter()
            .filter(|p| p.is_fatal(config.is_strict()))
            .collect();
        if !fatal.is_empty() {
            let lines: Vec<String> = fatal.iter().map(|p| p.to_string()).collect();
            anyhow::bail!("Invalid configuration:\n  {}", lines.join("\n  "));
        }
        for problem in problems.iter().filter(|p| p.is_tolerated()) {
            tracing::warn!("{}", problem);
        }

        let base_url = config.base_url.clone().unwrap_or_default();
        let path = config.path.clone().unwrap_or_else(|| "/".to_string());
        let pre_allocated_vus = config.pre_allocated_vus.unwrap_or(DEFAULT_PRE_ALLOCATED_VUS);

        Ok(Self {
            name: config.name.clone().unwrap_or_else(|| "rampclock".to_string()),
            url: join_url(&base_url, &path),
            method: config
                .method
                .clone()
                .unwrap_or_else(|| "POST".to_string())
                .to_uppercase(),
            headers: config.headers.clone().unwrap_or_default(),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            app_name: config
                .app_name
                .clone()
                .unwrap_or_else(|| "rampclock".to_string()),
            env: config.env.clone().unwrap_or_else(|| "local".to_string()),
            start_rate: config.start_rate.unwrap_or(0),
            time_unit: duration_or_default(&config.time_unit, Duration::from_secs(1), "time_unit"),
            pre_allocated_vus,
            max_vus: config
                .max_vus
                .unwrap_or(pre_allocated_vus.max(DEFAULT_PRE_ALLOCATED_VUS))
                .max(pre_allocated_vus)
                .max(1),
            graceful_stop: duration_or_default(&config.stop, Duration::from_secs(30), "stop"),
            timeout: duration_or_default(&config.timeout, Duration::from_secs(60), "timeout"),
            criteria: config.criteria.clone().unwrap_or_default(),
            tags: config.tags.clone().unwrap_or_default(),
            payload: config.payload.clone(),
        })
    }

    /// Run-level tags: `lt`, `app`, `env`, then configured tags on top.
    pub fn run_tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::from([
            ("lt".to_string(), self.name.clone()),
            ("app".to_string(), self.app_name.clone()),
            ("env".to_string(), self.env.clone()),
        ]);
        tags.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags
    }
}

fn duration_or_default(value: &Option<String>, default: Duration, context: &str) -> Duration {
    value
        .as_deref()
        .map(|v| crate::utils::parse_duration_str_or_warn(v, default, context))
        .unwrap_or(default)
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        return format!("{}/", base);
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
