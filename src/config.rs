//! Daemon configuration, read from `STUDIOBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MAX_ADVANCE_DAYS;
use crate::policy::{BookingPolicy, DepositPolicy, DurationRounding};

/// A deposit deadline never needs to reach past the booking horizon.
const MAX_DEPOSIT_WINDOW_HOURS: i64 = MAX_ADVANCE_DAYS * 24;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must be between {min} and {max}")]
    OutOfRange { key: &'static str, min: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Journal directory. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    /// Journal appends after which the store is compacted.
    pub compact_threshold: u64,
    pub policy: BookingPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = get("STUDIOBOOK_DATA_DIR").map(PathBuf::from);
        let metrics_port = parse_opt::<u16>(&get, "STUDIOBOOK_METRICS_PORT")?;
        let sweep_secs = parse_opt::<u64>(&get, "STUDIOBOOK_SWEEP_INTERVAL_SECS")?.unwrap_or(60);
        if sweep_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "STUDIOBOOK_SWEEP_INTERVAL_SECS",
                min: 1,
                max: u64::MAX,
            });
        }

        let compact_threshold =
            parse_opt::<u64>(&get, "STUDIOBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000);

        let defaults = BookingPolicy::default();
        let deposit_enabled = parse_opt::<bool>(&get, "STUDIOBOOK_DEPOSIT_ENABLED")?.unwrap_or(true);
        let deposit = if deposit_enabled {
            let percent = percent(&get, "STUDIOBOOK_DEPOSIT_PERCENT", 30)?;
            let hours = parse_opt::<i64>(&get, "STUDIOBOOK_DEPOSIT_WINDOW_HOURS")?.unwrap_or(24);
            let out_of_range = ConfigError::OutOfRange {
                key: "STUDIOBOOK_DEPOSIT_WINDOW_HOURS",
                min: 1,
                max: MAX_DEPOSIT_WINDOW_HOURS as u64,
            };
            if !(1..=MAX_DEPOSIT_WINDOW_HOURS).contains(&hours) {
                return Err(out_of_range);
            }
            let window = chrono::Duration::try_hours(hours).ok_or(out_of_range)?;
            DepositPolicy::Enabled { percent, window }
        } else {
            DepositPolicy::Disabled
        };

        let rounding = match get("STUDIOBOOK_DURATION_ROUNDING").as_deref() {
            None | Some("round_up") => DurationRounding::RoundUp,
            Some("strict") => DurationRounding::Strict,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "STUDIOBOOK_DURATION_ROUNDING",
                    value: other.to_string(),
                });
            }
        };

        let policy = BookingPolicy {
            deposit,
            rounding,
            refund_percent: percent(&get, "STUDIOBOOK_REFUND_PERCENT", defaults.refund_percent)?,
            min_cancel_reason_len: parse_opt(&get, "STUDIOBOOK_MIN_CANCEL_REASON_LEN")?
                .unwrap_or(defaults.min_cancel_reason_len),
            reopen_cancelled: parse_opt(&get, "STUDIOBOOK_REOPEN_CANCELLED")?
                .unwrap_or(defaults.reopen_cancelled),
            reopen_expired: parse_opt(&get, "STUDIOBOOK_REOPEN_EXPIRED")?
                .unwrap_or(defaults.reopen_expired),
        };

        Ok(Self {
            data_dir,
            metrics_port,
            sweep_interval: Duration::from_secs(sweep_secs),
            compact_threshold,
            policy,
        })
    }
}

fn parse_opt<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn percent(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    let value = parse_opt::<u32>(get, key)?.unwrap_or(default);
    if value > 100 {
        return Err(ConfigError::OutOfRange { key, min: 0, max: 100 });
    }
    Ok(value)
}
