use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use teetime_storage::{HttpClientConfig, TokenBucketConfig};
use thiserror::Error;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_COURSE_CONCURRENCY: usize = 4;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_WEB_PORT: u16 = 8080;
pub const DEFAULT_USER_AGENT: &str = "teetime-ingest/0.1";
const MAX_WINDOW_DAYS: u32 = 31;
const MAX_REQUESTS_PER_SECOND: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("reading {path}: {source}")]
    ReadCourses {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {origin}: {source}")]
    ParseCourses {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("course {key}: {reason}")]
    InvalidCourse { key: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub courses_path: PathBuf,
    pub window_days: u32,
    pub course_concurrency: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub requests_per_second: Option<u32>,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            courses_path: PathBuf::from("courses.yaml"),
            window_days: DEFAULT_WINDOW_DAYS,
            course_concurrency: DEFAULT_COURSE_CONCURRENCY,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_second: None,
            web_port: DEFAULT_WEB_PORT,
        }
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidVar {
            var,
            value,
            reason: err.to_string(),
        }),
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            courses_path: lookup("TEETIME_COURSES_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.courses_path),
            window_days: parse_var("TEETIME_WINDOW_DAYS", lookup("TEETIME_WINDOW_DAYS"), defaults.window_days)?,
            course_concurrency: parse_var(
                "TEETIME_COURSE_CONCURRENCY",
                lookup("TEETIME_COURSE_CONCURRENCY"),
                defaults.course_concurrency,
            )?,
            http_timeout_secs: parse_var(
                "TEETIME_HTTP_TIMEOUT_SECS",
                lookup("TEETIME_HTTP_TIMEOUT_SECS"),
                defaults.http_timeout_secs,
            )?,
            user_agent: lookup("TEETIME_USER_AGENT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            requests_per_second: match lookup("TEETIME_REQUESTS_PER_SECOND") {
                Some(raw) if !raw.trim().is_empty() => {
                    Some(parse_var("TEETIME_REQUESTS_PER_SECOND", Some(raw), 0u32)?)
                }
                _ => None,
            },
            web_port: parse_var("TEETIME_WEB_PORT", lookup("TEETIME_WEB_PORT"), defaults.web_port)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_days == 0 || self.window_days > MAX_WINDOW_DAYS {
            return Err(ConfigError::InvalidVar {
                var: "TEETIME_WINDOW_DAYS",
                value: self.window_days.to_string(),
                reason: format!("must be between 1 and {MAX_WINDOW_DAYS}"),
            });
        }
        if self.course_concurrency == 0 {
            return Err(ConfigError::InvalidVar {
                var: "TEETIME_COURSE_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidVar {
                var: "TEETIME_HTTP_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if let Some(rps) = self.requests_per_second {
            if rps == 0 || rps > MAX_REQUESTS_PER_SECOND {
                return Err(ConfigError::InvalidVar {
                    var: "TEETIME_REQUESTS_PER_SECOND",
                    value: rps.to_string(),
                    reason: format!("must be between 1 and {MAX_REQUESTS_PER_SECOND} when set"),
                });
            }
        }
        Ok(())
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            global_concurrency: self.course_concurrency.saturating_mul(2).max(2),
            token_bucket: self.requests_per_second.map(|rps| TokenBucketConfig {
                capacity: rps,
                refill_every: Duration::from_secs(1) / rps.max(1),
            }),
            ..HttpClientConfig::default()
        }
    }
}
