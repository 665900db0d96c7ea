//! Environment configuration envelope.

use std::env;
use std::time::Duration;

use snafu::Snafu;

const DEFAULT_DEDUP_WINDOW_SECONDS: u64 = 60;
const DEFAULT_DEDUP_MAX_SIZE: usize = 10_000;
const DEFAULT_OBSERVATION_TTL_DAYS: i64 = 1;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("{var} must be a positive integer, got {value:?}"))]
    InvalidInteger { var: &'static str, value: String },
}

/// Process-wide configuration, parsed once from the environment at startup.
/// Everything here is read-only after construction; sources that need it
/// receive a clone or a shared reference.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub watch_namespace: Option<String>,
    pub allowed_gvrs: Vec<String>,
    pub allowed_namespaces: Vec<String>,
    pub allowed_cluster_scoped_gvrs: Vec<String>,
    pub dedup_window: Duration,
    pub dedup_max_size: usize,
    pub observation_ttl_seconds: i64,
}

impl RuntimeConfig {
    /// Parse from the process environment, applying documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let watch_namespace = non_empty_env("WATCH_NAMESPACE");
        let allowed_gvrs = csv_env("ALLOWED_GVRS");
        let mut allowed_namespaces = csv_env("ALLOWED_NAMESPACES");
        if allowed_namespaces.is_empty() {
            if let Some(ns) = &watch_namespace {
                allowed_namespaces.push(ns.clone());
            }
        }
        let allowed_cluster_scoped_gvrs = csv_env("ALLOWED_CLUSTER_SCOPED_GVRS");

        let dedup_window_seconds = parse_positive_u64("DEDUP_WINDOW_SECONDS", DEFAULT_DEDUP_WINDOW_SECONDS)?;
        let dedup_max_size = parse_positive_u64("DEDUP_MAX_SIZE", DEFAULT_DEDUP_MAX_SIZE as u64)? as usize;

        // Seconds wins if both OBSERVATION_TTL_SECONDS and
        // OBSERVATION_TTL_DAYS are present.
        let observation_ttl_seconds = match env::var("OBSERVATION_TTL_SECONDS").ok() {
            Some(raw) => parse_positive_i64("OBSERVATION_TTL_SECONDS", &raw)?,
            None => match env::var("OBSERVATION_TTL_DAYS").ok() {
                Some(raw) => parse_positive_i64("OBSERVATION_TTL_DAYS", &raw)? * 86_400,
                None => DEFAULT_OBSERVATION_TTL_DAYS * 86_400,
            },
        };

        Ok(Self {
            watch_namespace,
            allowed_gvrs,
            allowed_namespaces,
            allowed_cluster_scoped_gvrs,
            dedup_window: Duration::from_secs(dedup_window_seconds),
            dedup_max_size,
            observation_ttl_seconds,
        })
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.is_empty())
}

fn csv_env(var: &str) -> Vec<String> {
    env::var(var)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_positive_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var).ok() {
        None => Ok(default),
        Some(raw) => raw.parse::<u64>().ok().filter(|v| *v > 0).ok_or(ConfigError::InvalidInteger {
            var,
            value: raw,
        }),
    }
}

fn parse_positive_i64(var: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.parse::<i64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidInteger {
            var,
            value: raw.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "WATCH_NAMESPACE",
            "ALLOWED_GVRS",
            "ALLOWED_NAMESPACES",
            "ALLOWED_CLUSTER_SCOPED_GVRS",
            "DEDUP_WINDOW_SECONDS",
            "DEDUP_MAX_SIZE",
            "OBSERVATION_TTL_SECONDS",
            "OBSERVATION_TTL_DAYS",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_apply_with_empty_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.dedup_window, Duration::from_secs(60));
        assert_eq!(config.dedup_max_size, 10_000);
        assert_eq!(config.observation_ttl_seconds, 86_400);
    }

    #[test]
    fn seconds_wins_over_days_when_both_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("OBSERVATION_TTL_SECONDS", "120");
        env::set_var("OBSERVATION_TTL_DAYS", "30");
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.observation_ttl_seconds, 120);
        clear_all();
    }

    #[test]
    fn watch_namespace_seeds_namespace_allowlist_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("WATCH_NAMESPACE", "zen-system");
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.allowed_namespaces, vec!["zen-system".to_string()]);
        clear_all();
    }
}
