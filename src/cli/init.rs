use anyhow::Result;
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"# rampclock configuration
# Run with: rampclock run rampclock.yaml

name: LT-002
base_url: http://localhost:8080 # overridden by BASE_URL
path: /api/v1/events
method: POST
app_name: my-app
env: local

# Ramping arrival rate: targets are iterations per time_unit
start_rate: 5
time_unit: 1s
pre_allocated_vus: 80
max_vus: 500
stop: 30s
timeout: 60s

stages:
  - { target: 5, duration: 3m }
  - { target: 10, duration: 1m }
  - { target: 10, duration: 2m }
  - { target: 20, duration: 1m }
  - { target: 20, duration: 2m }
  - { target: 40, duration: 1m }
  - { target: 40, duration: 2m }
  - { target: 0, duration: 30s }

# Request body; objects get a unique requestId per request
payload:
  source: rampclock

# Pass/fail criteria
criteria:
  http_req_failed:
    - rate<0.002
  http_req_duration:
    - p(95)<500
  check_fail_rate:
    - rate<0.01
"#;

const DEFAULT_ENV: &str = r#"# Loaded by rampclock run; existing environment variables win
BASE_URL=http://localhost:8080
AUTH_TOKEN=
APP_NAME=my-app
ENV=local
"#;

/// Write a starter ramp configuration, and optionally a `.env` template next to it.
pub fn run_init(output: Option<&Path>, with_env: bool) -> Result<()> {
    let config_path = output.unwrap_or(Path::new("rampclock.yaml"));

    if config_path.exists() {
        anyhow::bail!(
            "File already exists: {:?}. Remove it first or choose a different output path.",
            config_path
        );
    }

    let parent = config_path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(config_path, DEFAULT_CONFIG)?;
    println!("✓ Created {}", config_path.display());

    if with_env {
        let env_path = parent.unwrap_or(Path::new(".")).join(".env");
        if env_path.exists() {
            println!("⚠ {} already exists, leaving it alone", env_path.display());
        } else {
            fs::write(&env_path, DEFAULT_ENV)?;
            println!("✓ Created {}", env_path.display());
        }
    }

    println!("\nRun your test with:");
    println!("  rampclock run {}", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_run_init_creates_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ramp.yaml");

        run_init(Some(&path), false).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.name.as_deref(), Some("LT-002"));
        assert!(!temp_dir.path().join(".env").exists());
    }

    #[test]
    fn test_run_init_with_env() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("ramp.yaml");

        run_init(Some(&path), true).unwrap();

        let env = fs::read_to_string(temp_dir.path().join("nested").join(".env")).unwrap();
        assert!(env.contains("BASE_URL="));
        assert!(env.contains("AUTH_TOKEN="));
    }

    #[test]
    fn test_run_init_fails_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ramp.yaml");
        fs::write(&path, "existing content").unwrap();
        assert!(run_init(Some(&path), false).is_err());
    }

    #[test]
    fn test_default_config_is_runnable() {
        let config: Config = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        let table = config.stage_table();
        assert_eq!(table.len(), 8);
        assert_eq!(table.total_duration_ms(), 750_000);
        // only the final ramp-down to 0 is flagged
        let problems = config.diagnose();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].is_tolerated());
    }
}
