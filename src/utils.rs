//! Shared utility functions used across the crate.
//!
//! Duration tokens are the compact `<n><unit>` form used by stage
//! configuration (`"3m"`, `"90s"`, `"500ms"`, `"1h"`). Parsing is permissive:
//! anything that is not a recognized token is worth zero milliseconds and
//! never an error, so schedule construction stays total.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static SINGLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(ms|s|m|h)$").expect("valid token regex"));

static EMBEDDED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(ms|s|m|h)").expect("valid token regex"));

fn unit_factor(unit: &str) -> u64 {
    match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => 0,
    }
}

fn token_ms(magnitude: &str, unit: &str) -> u64 {
    magnitude
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit_factor(unit)))
        .unwrap_or(0)
}

/// Parse a single duration token (e.g. "3m", "90s", "500ms", "1h") into milliseconds.
///
/// The whole input must be one token: no whitespace, sign, fraction or second
/// unit. Anything else yields `0`, which callers must read as "not a
/// recognized duration" rather than a valid zero-length span.
pub fn parse_duration_ms(token: &str) -> u64 {
    match SINGLE_TOKEN.captures(token) {
        Some(caps) => token_ms(&caps[1], &caps[2]),
        None => 0,
    }
}

/// Elapsed time as reported by a runtime: either already numeric
/// milliseconds or a composite string such as `"1m30s"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElapsedInput<'a> {
    Millis(f64),
    Text(&'a str),
}

impl From<f64> for ElapsedInput<'_> {
    fn from(ms: f64) -> Self {
        ElapsedInput::Millis(ms)
    }
}

impl From<u64> for ElapsedInput<'_> {
    fn from(ms: u64) -> Self {
        ElapsedInput::Millis(ms as f64)
    }
}

impl<'a> From<&'a str> for ElapsedInput<'a> {
    fn from(text: &'a str) -> Self {
        ElapsedInput::Text(text)
    }
}

impl<'a> From<&'a String> for ElapsedInput<'a> {
    fn from(text: &'a String) -> Self {
        ElapsedInput::Text(text.as_str())
    }
}

/// Parse a runtime-reported elapsed value into milliseconds.
///
/// Finite numbers pass through unchanged. Text is scanned left to right for
/// every embedded token and the parts are summed, so `"1m30s"` is 90000.
/// Unrecognized fragments contribute nothing and do not disturb the tokens
/// around them.
pub fn parse_elapsed_ms<'a>(value: impl Into<ElapsedInput<'a>>) -> f64 {
    match value.into() {
        ElapsedInput::Millis(ms) if ms.is_finite() => ms,
        ElapsedInput::Millis(_) => 0.0,
        ElapsedInput::Text(text) => EMBEDDED_TOKEN
            .captures_iter(text)
            .map(|caps| token_ms(&caps[1], &caps[2]))
            .fold(0u64, u64::saturating_add) as f64,
    }
}

/// Parse a duration token into `std::time::Duration`, `None` when unrecognized.
///
/// Used for settings where zero is not meaningful (time unit, timeouts).
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    match parse_duration_ms(s.trim()) {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

/// Parse a duration string, logging a warning and falling back to a default.
pub fn parse_duration_str_or_warn(s: &str, default: Duration, context: &str) -> Duration {
    match parse_duration_str(s) {
        Some(d) => d,
        None => {
            tracing::warn!(
                "Invalid duration '{}' for {}, using default {:?}",
                s,
                context,
                default
            );
            default
        }
    }
}

/// Milliseconds in `d` as `f64`, exact for whole-millisecond durations.
///
/// `as_secs_f64() * 1000.0` can land one ulp below the true value (1001 ms
/// becomes 1000.9999999999999), which would put a stage boundary in the
/// earlier stage.
pub fn duration_to_ms(d: Duration) -> f64 {
    d.as_secs() as f64 * 1000.0 + d.subsec_nanos() as f64 / 1_000_000.0
}
