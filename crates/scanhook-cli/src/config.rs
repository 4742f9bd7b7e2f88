//! AppConfig - 環境変数からの設定読み込み
//!
//! 空文字は未設定扱い。数値・真偽値が読めなければ起動時に失敗させる。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use scanhook_core::app::QueueConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// String that is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Ticketing REST API.
#[derive(Debug, Clone)]
pub struct AlmConfig {
    pub base: String,
    pub user: String,
    pub pass: Secret,
}

/// Fixed fields of created defects.
#[derive(Debug, Clone)]
pub struct DefectConfig {
    pub detected_by: String,
    pub name_prefix: String,
}

/// Scan CLI invocation settings.
#[derive(Debug, Clone)]
pub struct FcliConfig {
    pub bin: String,
    pub ssc_url: String,
    pub user: String,
    pub pass: Secret,
    pub session: String,
    pub insecure: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub sqlite_path: PathBuf,
    pub log_level: String,
    pub queue: QueueConfig,

    /// Per external call (CLI run or HTTP request).
    pub job_timeout: Duration,

    pub alm: AlmConfig,
    pub defect: DefectConfig,
    pub fcli: FcliConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let queue = QueueConfig {
            poll_interval: env.millis("WORKER_POLL_MS", 2_000)?,
            max_attempts: env.positive("MAX_ATTEMPTS", 5)?,
            stuck_threshold: env.millis("STUCK_MS", 600_000)?,
            watchdog_interval: env.millis("STUCK_CHECK_MS", 300_000)?,
        };

        Ok(Self {
            port: env.parse("PORT", 3000)?,
            sqlite_path: PathBuf::from(env.string("SQLITE_PATH", "data/queue.db")),
            log_level: env.string("LOG_LEVEL", "info"),
            queue,
            job_timeout: env.millis("JOB_TIMEOUT_MS", 120_000)?,
            alm: AlmConfig {
                base: env
                    .string("ALM_BASE", "http://localhost:8080")
                    .trim_end_matches('/')
                    .to_string(),
                user: env.string("ALM_USER", "admin"),
                pass: Secret::new(env.string("ALM_PASS", "admin")),
            },
            defect: DefectConfig {
                detected_by: env.string("DEFECT_DETECTED_BY", "admin"),
                name_prefix: env.string("DEFECT_NAME_PREFIX", "Resumen de vulnerabilidades"),
            },
            fcli: FcliConfig {
                bin: env.string("FCLI_BIN", "fcli"),
                ssc_url: env.string("FCLI_SSC_URL", "http://localhost:8080/ssc"),
                user: env.string("FCLI_USER", "admin"),
                pass: Secret::new(env.string("FCLI_PASS", "admin")),
                session: env.string("FCLI_SESSION", "scanhook"),
                insecure: env.flag("FCLI_INSECURE", false)?,
            },
        })
    }
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.raw(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive(&self, var: &'static str, default: u32) -> Result<u32, ConfigError> {
        match self.parse(var, default)? {
            0 => Err(ConfigError::Zero { var }),
            n => Ok(n),
        }
    }

    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.parse(var, default)? {
            0 => Err(ConfigError::Zero { var }),
            ms => Ok(Duration::from_millis(ms)),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.raw(var) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected true/false".to_string(),
            }),
        }
    }
}
