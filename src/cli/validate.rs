use anyhow::Result;
use std::path::Path;

use crate::cli::config::{Config, ConfigError};

/// A diagnosed problem and whether it would stop a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub problem: ConfigError,
    pub fatal: bool,
}

pub fn check_config(config: &Config, strict: bool) -> Vec<Finding> {
    let strict = strict || config.is_strict();
    config
        .diagnose()
        .into_iter()
        .map(|problem| Finding {
            fatal: problem.is_fatal(strict),
            problem,
        })
        .collect()
}

/// Validate a ramp configuration without running it.
/// Checks for:
/// - YAML/JSON syntax
/// - Stage durations and targets
/// - Option durations, VU bounds and the target URL
pub fn run_validate(config_path: &Path, strict: bool) -> Result<()> {
    println!("Validating {}...", config_path.display());

    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ {:#}", e);
            return Err(e);
        }
    };
    config.apply_env();
    println!("  ✓ Configuration parsed");

    let table = config.stage_table();
    println!(
        "    stages: {} stage(s), {} ms total",
        table.len(),
        table.total_duration_ms()
    );

    let findings = check_config(&config, strict);
    for finding in &findings {
        let mark = if finding.fatal { "✗" } else { "⚠" };
        println!("  {} {}", mark, finding.problem);
    }

    let fatal = findings.iter().filter(|f| f.fatal).count();
    if fatal > 0 {
        anyhow::bail!("Config validation failed: {} problem(s)", fatal);
    }
    println!("  ✓ Ready to run");
    Ok(())
}
