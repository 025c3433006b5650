use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};

/// SQS caps a single receive at ten messages.
const SQS_MAX_BATCH: i32 = 10;

/// Log output format, from `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// Only `DATABASE_URL` is always required. The LMS and student-records
/// URLs are needed by commands that touch activities or rosters; a queue
/// consumer starts only for each queue URL that is set.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub raa_queue_url: Option<String>,
    pub ec_queue_url: Option<String>,
    pub queue_batch_size: i32,
    pub queue_max_batches: u32,
    pub queue_poll_interval: Duration,
    pub task_poll_interval: Duration,
    pub sits_api_url: Option<String>,
    pub sits_api_token: Option<String>,
    pub sits_api_attempts: u32,
    pub sits_cache_ttl: Duration,
    pub lms_api_url: Option<String>,
    pub lms_api_token: Option<String>,
    pub scan_batch_size: i64,
    pub enrolment_batch_size: i64,
    pub enrolment_max_attempts: i32,
    pub enrolment_retry_delay: Duration,
    pub worker_identity: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default            |
    /// |----------------------------|--------------------|
    /// | `DATABASE_URL`             | required           |
    /// | `RAA_QUEUE_URL`            | unset              |
    /// | `EC_QUEUE_URL`             | unset              |
    /// | `QUEUE_BATCH_SIZE`         | `10` (max `10`)    |
    /// | `QUEUE_MAX_BATCHES`        | `50`               |
    /// | `QUEUE_POLL_INTERVAL_SECS` | `60`               |
    /// | `TASK_POLL_INTERVAL_SECS`  | `30`               |
    /// | `SITS_API_URL`             | unset              |
    /// | `SITS_API_TOKEN`           | unset              |
    /// | `SITS_API_ATTEMPTS`        | `3`                |
    /// | `SITS_CACHE_TTL_SECS`      | `300`              |
    /// | `LMS_API_URL`              | unset              |
    /// | `LMS_API_TOKEN`            | unset              |
    /// | `SCAN_BATCH_SIZE`          | `100`              |
    /// | `ENROLMENT_BATCH_SIZE`     | `500`              |
    /// | `ENROLMENT_MAX_ATTEMPTS`   | `3`                |
    /// | `ENROLMENT_RETRY_DELAY_SECS` | `3600`         |
    /// | `WORKER_IDENTITY`          | `extension-worker` |
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let queue_batch_size: i32 = env_or("QUEUE_BATCH_SIZE", 10)?;

        Ok(Self {
            database_url,
            raa_queue_url: optional("RAA_QUEUE_URL"),
            ec_queue_url: optional("EC_QUEUE_URL"),
            queue_batch_size: queue_batch_size.clamp(1, SQS_MAX_BATCH),
            queue_max_batches: env_or("QUEUE_MAX_BATCHES", 50)?,
            queue_poll_interval: Duration::from_secs(env_or("QUEUE_POLL_INTERVAL_SECS", 60)?),
            task_poll_interval: Duration::from_secs(env_or("TASK_POLL_INTERVAL_SECS", 30)?),
            sits_api_url: optional("SITS_API_URL"),
            sits_api_token: optional("SITS_API_TOKEN"),
            sits_api_attempts: env_or("SITS_API_ATTEMPTS", 3)?,
            sits_cache_ttl: Duration::from_secs(env_or("SITS_CACHE_TTL_SECS", 300)?),
            lms_api_url: optional("LMS_API_URL"),
            lms_api_token: optional("LMS_API_TOKEN"),
            scan_batch_size: env_or("SCAN_BATCH_SIZE", 100)?,
            enrolment_batch_size: env_or("ENROLMENT_BATCH_SIZE", 500)?,
            enrolment_max_attempts: env_or("ENROLMENT_MAX_ATTEMPTS", 3)?,
            enrolment_retry_delay: Duration::from_secs(env_or("ENROLMENT_RETRY_DELAY_SECS", 3600)?),
            worker_identity: optional("WORKER_IDENTITY")
                .unwrap_or_else(|| "extension-worker".into()),
        })
    }

    pub fn lms_api_url(&self) -> anyhow::Result<&str> {
        self.lms_api_url
            .as_deref()
            .ok_or_else(|| anyhow!("LMS_API_URL must be set"))
    }

    pub fn sits_api_url(&self) -> anyhow::Result<&str> {
        self.sits_api_url
            .as_deref()
            .ok_or_else(|| anyhow!("SITS_API_URL must be set"))
    }
}

/// A set, non-blank variable.
fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(name, optional(name), default)
}

fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{name} must be a valid number, got {raw:?}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_value_uses_default() {
        let value: u64 = parse_value("SCAN_BATCH_SIZE", None, 100).unwrap();
        assert_eq!(value, 100);
    }

    #[test]
    fn set_value_overrides_default() {
        let value: i64 = parse_value("SCAN_BATCH_SIZE", Some("25".into()), 100).unwrap();
        assert_eq!(value, 25);
    }

    #[test]
    fn unparseable_value_names_the_variable() {
        let err = parse_value::<u32>("SITS_API_ATTEMPTS", Some("lots".into()), 3).unwrap_err();
        assert!(err.to_string().contains("SITS_API_ATTEMPTS"));
    }

    #[test]
    fn log_format_is_case_insensitive() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }
}
