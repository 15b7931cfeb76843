// Configuration read from the environment (.env is loaded by main)
pub mod database;

use anyhow::anyhow;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8010;
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub port: u16,
    pub database_url: String,
    /// When unset every protected route is open.
    pub api_key: Option<String>,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Period of the background sync and budget pass; `None` disables it.
    pub scheduler_interval: Option<Duration>,
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match non_empty(lookup("NIMBUS_API_PORT")) {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| anyhow!("NIMBUS_API_PORT must be a port number, got '{}'", raw))?,
            None => DEFAULT_PORT,
        };
        let database_url = secret(&lookup, "DATABASE_URL")
            .ok_or_else(|| anyhow!("DATABASE_URL (or DATABASE_URL_FILE) must be set"))?;
        let scheduler_secs = match non_empty(lookup("NIMBUS_SCHEDULER_INTERVAL_SECS")) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                anyhow!("NIMBUS_SCHEDULER_INTERVAL_SECS must be a number of seconds, got '{}'", raw)
            })?,
            None => DEFAULT_SCHEDULER_INTERVAL_SECS,
        };
        Ok(Self {
            port,
            database_url,
            api_key: secret(&lookup, "NIMBUS_API_KEY"),
            cors_origins: parse_origins(&lookup("NIMBUS_CORS_ORIGINS").unwrap_or_default()),
            // 0 turns the scheduler off
            scheduler_interval: (scheduler_secs > 0).then_some(Duration::from_secs(scheduler_secs)),
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn read_secret_file(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `NAME` wins, otherwise the content of the file named by `NAME_FILE`.
fn secret(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    non_empty(lookup(name)).or_else(|| {
        non_empty(lookup(&format!("{}_FILE", name))).and_then(|path| read_secret_file(&path))
    })
}

/// Comma separated list; `*` alone means any origin.
pub fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if origins.iter().any(|o| o == "*") {
        return vec![];
    }
    origins
}
