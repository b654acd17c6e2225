//! Configuration loader: merges .env, an optional TOML file, and env vars.

use common::config::{ServiceConfig, MIN_REFRESH_INTERVAL_MINUTES};
use common::Error;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = parse_u64(raw, env_name)
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_usize(raw: &str, env_name: &str) -> Result<usize, Error> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn validate_config(config: &ServiceConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.timing.refresh_interval_minutes < MIN_REFRESH_INTERVAL_MINUTES {
        issues.push(format!(
            "timing.refresh_interval_minutes must be >= {}",
            MIN_REFRESH_INTERVAL_MINUTES
        ));
    }
    if config.timing.lightweight_interval_minutes == 0 {
        issues.push("timing.lightweight_interval_minutes must be > 0".into());
    }
    if config.timing.lightweight_interval_minutes > config.timing.refresh_interval_minutes {
        issues.push(
            "timing.lightweight_interval_minutes must be <= timing.refresh_interval_minutes".into(),
        );
    }
    if config.timing.heartbeat_secs == 0 {
        issues.push("timing.heartbeat_secs must be > 0".into());
    }

    if config.network.timeout_secs == 0 {
        issues.push("network.timeout_secs must be > 0".into());
    }
    if config.network.retry_attempts == 0 {
        issues.push("network.retry_attempts must be > 0".into());
    }
    if config.network.region_build_concurrency == 0 {
        issues.push("network.region_build_concurrency must be > 0".into());
    }

    if config.storage.region_snapshot_path.trim().is_empty() {
        issues.push("storage.region_snapshot_path must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply overrides from `var` (the process environment in production).
fn apply_env_overrides(
    config: &mut ServiceConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    if let Some(raw) = var("REFRESH_RATE") {
        config.timing.set_refresh_interval(parse_u64(&raw, "REFRESH_RATE")?);
    }
    if let Some(raw) = var("CACHE_CAPACITY") {
        config.cache.capacity = parse_usize(&raw, "CACHE_CAPACITY")?;
    }
    if let Some(raw) = var("FORECAST_CACHE_CAPACITY") {
        config.cache.forecast_capacity = parse_usize(&raw, "FORECAST_CACHE_CAPACITY")?;
    }
    if let Some(path) = var("REGION_SNAPSHOT_PATH") {
        config.storage.region_snapshot_path = path;
    }
    if let Some(raw) = var("HTTP_TIMEOUT_SECS") {
        config.network.timeout_secs = parse_positive_u64(&raw, "HTTP_TIMEOUT_SECS")?;
    }
    if let Some(raw) = var("REGION_BUILD_CONCURRENCY") {
        config.network.region_build_concurrency =
            parse_usize(&raw, "REGION_BUILD_CONCURRENCY")?;
    }
    Ok(())
}

fn parse_config_file(path: &Path) -> Result<ServiceConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load service configuration from the environment and an optional file.
///
/// An explicit `path` must exist; otherwise `config.toml` is read when present.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced by the config file if there is one.
    let mut config = match path {
        Some(path) => parse_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                parse_config_file(default_path)?
            } else {
                ServiceConfig::default()
            }
        }
    };

    // 3. Environment variables take priority.
    finalize_config(config, |name| std::env::var(name).ok())
}

/// Clamp the file's refresh interval, apply env overrides, then validate.
fn finalize_config(
    mut config: ServiceConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig, Error> {
    let minutes = config.timing.refresh_interval_minutes;
    config.timing.set_refresh_interval(minutes);
    apply_env_overrides(&mut config, var)?;
    validate_config(&config)?;
    Ok(config)
}
