//! Runtime settings for the store, logging and the registration sweeper.
//!
//! Values start from `AccordConfig::default()` (or a deserialized document)
//! and are overlaid with `ACCORD_*` environment variables.

use crate::clock::HOUR_MS;
use crate::logging::normalize_level;
use crate::service::{BcryptPasswordHasher, SweeperSettings};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const DATABASE_PATH_ENV: &str = "ACCORD_DATABASE_PATH";
pub const LOG_LEVEL_ENV: &str = "ACCORD_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "ACCORD_LOG_DIR";
pub const SWEEP_INTERVAL_SECS_ENV: &str = "ACCORD_SWEEP_INTERVAL_SECS";
pub const REGISTRATION_TTL_HOURS_ENV: &str = "ACCORD_REGISTRATION_TTL_HOURS";
pub const BCRYPT_COST_ENV: &str = "ACCORD_BCRYPT_COST";

const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Source of configuration variables.
///
/// Tests supply their own map instead of mutating the process environment.
pub trait ConfigEnv {
    fn string(&self, name: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigEnv for ProcessEnv {
    fn string(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<F> ConfigEnv for F
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        self(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue {
                variable,
                value,
                reason,
            } => write!(f, "invalid {variable}=`{value}`: {reason}"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccordConfig {
    pub database_path: PathBuf,
    pub log_level: String,
    /// `None` keeps logging disabled.
    pub log_dir: Option<PathBuf>,
    pub sweep_interval_secs: u64,
    pub registration_ttl_hours: u64,
    pub bcrypt_cost: u32,
}

impl Default for AccordConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("accord.sqlite3"),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            sweep_interval_secs: 60 * 60,
            registration_ttl_hours: 24,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl AccordConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_from(&ProcessEnv)
    }

    /// Replaces every field whose `ACCORD_*` variable is set in `env`.
    pub fn overlay_from(mut self, env: &impl ConfigEnv) -> Result<Self, ConfigError> {
        if let Some(path) = non_empty(env, DATABASE_PATH_ENV) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(level) = non_empty(env, LOG_LEVEL_ENV) {
            let normalized = normalize_level(&level).map_err(|err| ConfigError::InvalidValue {
                variable: LOG_LEVEL_ENV,
                value: level.clone(),
                reason: err.to_string(),
            })?;
            self.log_level = normalized.to_string();
        }
        if let Some(dir) = non_empty(env, LOG_DIR_ENV) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = parse_positive(env, SWEEP_INTERVAL_SECS_ENV)? {
            self.sweep_interval_secs = secs;
        }
        if let Some(hours) = parse_positive(env, REGISTRATION_TTL_HOURS_ENV)? {
            self.registration_ttl_hours = hours;
        }
        if let Some(raw) = non_empty(env, BCRYPT_COST_ENV) {
            self.bcrypt_cost = match raw.parse::<u32>() {
                Ok(cost) if (MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) => cost,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        variable: BCRYPT_COST_ENV,
                        value: raw,
                        reason: format!("expected {MIN_BCRYPT_COST}..={MAX_BCRYPT_COST}"),
                    })
                }
            };
        }
        Ok(self)
    }

    pub fn password_hasher(&self) -> BcryptPasswordHasher {
        BcryptPasswordHasher::new(self.bcrypt_cost)
    }

    pub fn sweeper_settings(&self) -> SweeperSettings {
        let ttl_hours = i64::try_from(self.registration_ttl_hours).unwrap_or(i64::MAX);
        SweeperSettings {
            interval: Duration::from_secs(self.sweep_interval_secs),
            retention_ms: ttl_hours.saturating_mul(HOUR_MS),
        }
    }
}

fn non_empty(env: &impl ConfigEnv, name: &str) -> Option<String> {
    env.string(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive(env: &impl ConfigEnv, name: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = non_empty(env, name) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::InvalidValue {
            variable: name,
            value: raw,
            reason: "expected a positive integer".to_string(),
        }),
    }
}
