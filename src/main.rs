use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use rampclock::cli::config::{parse_env_file, Config, RunSettings};
use rampclock::cli::{inspect, Cli, Commands};
use rampclock::engine::Engine;
use rampclock::stats::csv::generate_csv;
use rampclock::stats::report::{iso_timestamp, print_stage_starts, stage_start_records, RunReport};
use rampclock::stats::validate_thresholds;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the first `.env` found (config directory, then current directory).
/// Variables already set in the environment win.
fn load_dotenv(config_path: &Path) {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    for env_path in [config_dir.join(".env"), PathBuf::from(".env")] {
        let Ok(contents) = std::fs::read_to_string(&env_path) else {
            continue;
        };
        for (key, value) in parse_env_file(&contents) {
            if std::env::var_os(&key).is_none() {
                std::env::set_var(key, value);
            }
        }
        tracing::debug!("loaded {}", env_path.display());
        break;
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Returns whether every threshold passed.
fn run_ramp(
    config_path: &Path,
    base_url: Option<String>,
    strict: bool,
    json: bool,
    export_json: Option<PathBuf>,
    out: Option<String>,
) -> Result<bool> {
    load_dotenv(config_path);
    let mut config = Config::load(config_path)?;
    config.apply_env();
    if let Some(url) = base_url {
        config.base_url = Some(url);
    }
    if strict {
        config.strict = Some(true);
    }

    let settings = RunSettings::from_config(&config)?;
    let criteria = settings.criteria.clone();
    let tags = settings.run_tags();
    let name = settings.name.clone();
    let engine = Engine::new(settings, config.stage_table())?;

    let rt = Runtime::new().context("Failed to start async runtime")?;
    let outcome = rt.block_on(engine.run(ctrl_c()))?;

    let summary = outcome.stats.to_report();
    let stages = stage_start_records(engine.table(), &outcome.window);
    let threshold_failures = validate_thresholds(&summary, &criteria);
    let passed = threshold_failures.is_empty();

    let report = RunReport {
        name,
        window: outcome.window,
        start: iso_timestamp(outcome.window.start_epoch_ms),
        end: iso_timestamp(outcome.window.end_epoch_ms),
        tags,
        summary,
        stages,
        threshold_failures,
    };

    if json {
        println!("{}", report.to_json());
    } else {
        outcome.stats.report();
        print_stage_starts(&report.stages);
        if outcome.interrupted {
            println!("Run interrupted after {:.1}s", outcome.elapsed.as_secs_f64());
        }
        for failure in &report.threshold_failures {
            println!("{}", failure);
        }
    }

    if let Some(path) = export_json {
        std::fs::write(&path, report.to_json())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("summary exported to {}", path.display());
    }

    if let Some(out_config) = out {
        if let Some(path) = out_config.strip_prefix("csv=") {
            std::fs::write(path, generate_csv(&report.summary, &report.stages))
                .with_context(|| format!("Failed to write {}", path))?;
            tracing::info!("metrics exported to {}", path);
        } else {
            tracing::warn!("unsupported --out '{}' (expected csv=<path>)", out_config);
        }
    }

    Ok(passed)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            base_url,
            strict,
            json,
            export_json,
            out,
        } => {
            let passed = run_ramp(&config, base_url, strict, json, export_json, out)?;
            return Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Stages { config, json } => {
            let config = Config::load(&config)?;
            inspect::print_stages(&config.stage_table(), json)?;
        }
        Commands::Resolve { config, elapsed } => {
            let config = Config::load(&config)?;
            inspect::print_resolution(&config.stage_table(), &elapsed);
        }
        Commands::Project {
            config,
            end,
            duration,
            json,
        } => {
            let config = Config::load(&config)?;
            inspect::print_projection(&config.stage_table(), &end, duration.as_deref(), json)?;
        }
        Commands::Validate { config, strict } => {
            load_dotenv(&config);
            rampclock::cli::validate::run_validate(&config, strict)?;
        }
        Commands::Init { output, env } => {
            rampclock::cli::init::run_init(output.as_deref(), env)?;
        }
        Commands::Schema { output } => {
            let schema = schemars::schema_for!(Config);
            let schema_json = serde_json::to_string_pretty(&schema)?;
            if let Some(out_path) = output {
                std::fs::write(&out_path, schema_json)?;
                println!("JSON Schema written to {:?}", out_path);
            } else {
                println!("{}", schema_json);
            }
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rampclock", &mut std::io::stdout());
        }
    }
    Ok(ExitCode::SUCCESS)
}
