use std::str::FromStr;
use std::time::Duration;

use crate::errors::{HarvestError, HarvestResult};
use crate::sandbox::SandboxLimits;
use crate::services::harvester::DEFAULT_MAX_CONCURRENT;
use crate::services::RetryPolicy;

pub const DEFAULT_LOG_FILTER: &str = "harvest=info";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub gate_capacity: usize,
    pub sandbox: SandboxLimits,
    pub retry: RetryPolicy,
    pub log_filter: String,
}

impl Config {
    /// Get the directory where the executable is located
    fn exe_dir() -> Option<std::path::PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn from_env() -> HarvestResult<Self> {
        let exe_dir = Self::exe_dir();

        // Try to load .env from executable's directory first
        if let Some(ref dir) = exe_dir {
            let env_path = dir.join(".env");
            if env_path.exists() {
                dotenvy::from_path(&env_path).ok();
            }
        }
        // Fall back to current directory
        dotenvy::dotenv().ok();

        let default_db = exe_dir
            .map(|d| d.join("harvest.db").to_string_lossy().into_owned())
            .unwrap_or_else(|| "./harvest.db".to_string());

        Self::from_lookup(|key| std::env::var(key).ok(), default_db)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        default_db: String,
    ) -> HarvestResult<Self> {
        let memory_mb: usize = parse_or(&lookup, "HARVEST_SANDBOX_MEMORY_MB", 32)?;
        let timeout_secs: u64 = parse_or(&lookup, "HARVEST_SANDBOX_TIMEOUT_SECS", 30)?;
        let max_fetches: u32 = parse_or(&lookup, "HARVEST_SANDBOX_MAX_FETCHES", 20)?;
        let max_response_kb: usize = parse_or(&lookup, "HARVEST_SANDBOX_MAX_RESPONSE_KB", 5120)?;
        let fetch_timeout_secs: u64 = parse_or(&lookup, "HARVEST_FETCH_TIMEOUT_SECS", 15)?;

        if memory_mb == 0 || timeout_secs == 0 {
            return Err(HarvestError::Config(
                "sandbox memory and timeout must be positive".to_string(),
            ));
        }

        let gate_capacity: usize =
            parse_or(&lookup, "HARVEST_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT)?;
        if gate_capacity == 0 {
            return Err(HarvestError::Config(
                "HARVEST_MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }

        let retry = match lookup("HARVEST_RETRY_DELAYS_SECS") {
            Some(raw) => retry_policy(&raw)?,
            None => RetryPolicy::default(),
        };

        Ok(Self {
            db_path: lookup("HARVEST_DB_PATH").unwrap_or(default_db),
            gate_capacity,
            sandbox: SandboxLimits {
                memory_limit_bytes: memory_mb * 1024 * 1024,
                timeout: Duration::from_secs(timeout_secs),
                max_fetch_calls: max_fetches,
                max_response_bytes: max_response_kb * 1024,
                fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            },
            retry,
            log_filter: lookup("HARVEST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> HarvestResult<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| HarvestError::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

/// `"5,30,60"` becomes three attempts with those delays in seconds.
fn retry_policy(raw: &str) -> HarvestResult<RetryPolicy> {
    let delays = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                HarvestError::Config(format!("HARVEST_RETRY_DELAYS_SECS has an invalid delay: {s}"))
            })
        })
        .collect::<HarvestResult<Vec<_>>>()?;

    if delays.is_empty() {
        return Err(HarvestError::Config(
            "HARVEST_RETRY_DELAYS_SECS must list at least one delay".to_string(),
        ));
    }

    Ok(RetryPolicy {
        max_attempts: delays.len() as u32,
        delays,
    })
}
