use std::env;

use crate::engine::EngineConfig;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub handoff_sweep_interval_secs: u64,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = EngineConfig::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            handoff_sweep_interval_secs: parse_or_default("HANDOFF_SWEEP_INTERVAL_SECS", 30)?,
            engine: EngineConfig {
                reserve_window: parse_or_default("RESERVE_WINDOW", defaults.reserve_window)?,
                reserve_max_attempts: parse_or_default(
                    "RESERVE_MAX_ATTEMPTS",
                    defaults.reserve_max_attempts,
                )?,
                average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
                low_battery_threshold: parse_or_default(
                    "LOW_BATTERY_THRESHOLD",
                    defaults.low_battery_threshold,
                )?,
                rescue_min_battery: parse_or_default(
                    "RESCUE_MIN_BATTERY",
                    defaults.rescue_min_battery,
                )?,
                handoff_resume_in_transit: parse_or_default(
                    "HANDOFF_RESUME_IN_TRANSIT",
                    defaults.handoff_resume_in_transit,
                )?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
