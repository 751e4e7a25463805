use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::calendar::google::GOOGLE_CALENDAR_API_BASE;
use crate::limits::DEFAULT_DEDUP_CAPACITY;

/// Process settings, read once from `SLOTGUARD_*` environment variables.
/// Unset or unparsable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub hold_ttl: Duration,
    pub dedup_capacity: usize,
    /// Zero disables the sweeper.
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub calendar_api_base: String,
    /// Without a token the in-memory calendar is used.
    pub calendar_token: Option<String>,
    pub calendar_timeout: Duration,
    pub time_zone: Tz,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            hold_ttl: Duration::from_secs(300),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            sweep_interval: Duration::from_secs(30),
            compact_threshold: 1000,
            calendar_api_base: GOOGLE_CALENDAR_API_BASE.to_string(),
            calendar_token: None,
            calendar_timeout: Duration::from_secs(10),
            time_zone: chrono_tz::UTC,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let time_zone = parsed(&lookup, "SLOTGUARD_TIMEZONE").unwrap_or(defaults.time_zone);
        Self {
            data_dir: lookup("SLOTGUARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "SLOTGUARD_METRICS_PORT"),
            hold_ttl: parsed(&lookup, "SLOTGUARD_HOLD_TTL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.hold_ttl),
            dedup_capacity: parsed(&lookup, "SLOTGUARD_DEDUP_CAPACITY")
                .filter(|c: &usize| *c > 0)
                .unwrap_or(defaults.dedup_capacity),
            sweep_interval: parsed(&lookup, "SLOTGUARD_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: parsed(&lookup, "SLOTGUARD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            calendar_api_base: lookup("SLOTGUARD_CALENDAR_API_BASE").unwrap_or(defaults.calendar_api_base),
            calendar_token: lookup("SLOTGUARD_CALENDAR_TOKEN").filter(|t| !t.trim().is_empty()),
            calendar_timeout: defaults.calendar_timeout,
            time_zone,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotguard.wal")
    }

    pub fn hold_ttl_ms(&self) -> i64 {
        i64::try_from(self.hold_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable setting");
            None
        }
    }
}
