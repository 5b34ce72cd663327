use crate::approval::{ApprovalPolicy, DayStatus};
use anyhow::Context;
use std::{env, path::PathBuf};

const DEFAULT_DB_PATH: &str = "catering_orders.db";
const DEFAULT_CACHE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_FLUSH_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub cache_capacity: u64,
    pub flush_every_ms: Option<u64>, // None disables periodic flushing
    pub empty_day_status: DayStatus,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            cache_capacity: DEFAULT_CACHE_BYTES,
            flush_every_ms: Some(DEFAULT_FLUSH_MS),
            empty_day_status: DayStatus::Approved,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key).ok().filter(|s| !s.is_empty()))
    }

    /// Builds a config from any key lookup; unset keys fall back to defaults.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("CATERING_ORDERS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let cache_capacity = match lookup("CATERING_ORDERS_CACHE_BYTES") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("CATERING_ORDERS_CACHE_BYTES={raw}"))?,
            None => defaults.cache_capacity,
        };
        let flush_every_ms = match lookup("CATERING_ORDERS_FLUSH_MS") {
            Some(raw) => {
                let ms = raw
                    .parse::<u64>()
                    .with_context(|| format!("CATERING_ORDERS_FLUSH_MS={raw}"))?;
                (ms > 0).then_some(ms)
            }
            None => defaults.flush_every_ms,
        };
        let empty_day_status = match lookup("CATERING_ORDERS_EMPTY_DAY_STATUS") {
            Some(raw) => raw
                .parse::<DayStatus>()
                .with_context(|| format!("CATERING_ORDERS_EMPTY_DAY_STATUS={raw}"))?,
            None => defaults.empty_day_status,
        };

        Ok(Self {
            db_path,
            cache_capacity,
            flush_every_ms,
            empty_day_status,
        })
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            empty_day_status: self.empty_day_status,
        }
    }

    pub fn open_db(&self) -> anyhow::Result<sled::Db> {
        sled::Config::new()
            .path(&self.db_path)
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms)
            .open()
            .with_context(|| format!("opening sled database at {}", self.db_path.display()))
    }
}
