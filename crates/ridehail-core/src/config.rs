// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Ridehail engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Pings buffered before a flush is forced
    pub location_batch_size: usize,
    /// Max age of the oldest buffered ping before a flush is forced
    pub location_batch_interval: Duration,
    /// Buffer size above which oldest same-driver pings are dropped
    pub location_high_water: usize,
    /// Matching attempts before a ride is failed
    pub match_max_attempts: u32,
    /// Pause between empty matching attempts
    pub match_backoff: Duration,
    /// Candidate search radius around the pickup point, in kilometers
    pub search_radius_km: f64,
    /// Age beyond which an indexed driver position is evicted
    pub geo_staleness: Duration,
    /// Deadline for a single PSP charge call
    pub psp_timeout: Duration,
    /// Base fare used when no pricing config row matches
    pub default_base_fare: f64,
    /// Per-kilometer rate used when no pricing config row matches
    pub default_per_km_rate: f64,
    /// Per-minute rate used when no pricing config row matches
    pub default_per_min_rate: f64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RIDEHAIL_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `LOCATION_BATCH_SIZE`: pings per persisted batch (default: 100)
    /// - `LOCATION_BATCH_INTERVAL_MS`: max buffer age in ms (default: 10000)
    /// - `RIDEHAIL_LOCATION_HIGH_WATER`: buffer cap (default: 10x batch size)
    /// - `RIDEHAIL_MATCH_MAX_ATTEMPTS`: matching attempts (default: 3)
    /// - `RIDEHAIL_MATCH_BACKOFF_MS`: pause between attempts (default: 5000)
    /// - `RIDEHAIL_SEARCH_RADIUS_KM`: candidate radius (default: 5.0)
    /// - `RIDEHAIL_GEO_STALENESS_SECS`: position eviction age (default: 300)
    /// - `RIDEHAIL_PSP_TIMEOUT_MS`: charge deadline (default: 10000)
    /// - `RIDEHAIL_DEFAULT_BASE_FARE` (default: 50)
    /// - `RIDEHAIL_DEFAULT_PER_KM_RATE` (default: 12)
    /// - `RIDEHAIL_DEFAULT_PER_MIN_RATE` (default: 2)
    ///
    /// The lock service, update bus and idempotency store run in-process;
    /// no external cache connection string is consumed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RIDEHAIL_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("RIDEHAIL_DATABASE_URL"))?;

        let location_batch_size: usize = parse_var("LOCATION_BATCH_SIZE", "100")?;
        if location_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "LOCATION_BATCH_SIZE",
                "must be a positive integer",
            ));
        }

        let location_batch_interval_ms: u64 = parse_var("LOCATION_BATCH_INTERVAL_MS", "10000")?;

        let default_high_water = (location_batch_size * 10).to_string();
        let location_high_water: usize =
            parse_var("RIDEHAIL_LOCATION_HIGH_WATER", &default_high_water)?;

        let match_max_attempts: u32 = parse_var("RIDEHAIL_MATCH_MAX_ATTEMPTS", "3")?;
        let match_backoff_ms: u64 = parse_var("RIDEHAIL_MATCH_BACKOFF_MS", "5000")?;
        let search_radius_km: f64 = parse_var("RIDEHAIL_SEARCH_RADIUS_KM", "5.0")?;
        let geo_staleness_secs: u64 = parse_var("RIDEHAIL_GEO_STALENESS_SECS", "300")?;
        let psp_timeout_ms: u64 = parse_var("RIDEHAIL_PSP_TIMEOUT_MS", "10000")?;

        let default_base_fare: f64 = parse_var("RIDEHAIL_DEFAULT_BASE_FARE", "50")?;
        let default_per_km_rate: f64 = parse_var("RIDEHAIL_DEFAULT_PER_KM_RATE", "12")?;
        let default_per_min_rate: f64 = parse_var("RIDEHAIL_DEFAULT_PER_MIN_RATE", "2")?;

        Ok(Self {
            database_url,
            location_batch_size,
            location_batch_interval: Duration::from_millis(location_batch_interval_ms),
            location_high_water,
            match_max_attempts,
            match_backoff: Duration::from_millis(match_backoff_ms),
            search_radius_km,
            geo_staleness: Duration::from_secs(geo_staleness_secs),
            psp_timeout: Duration::from_millis(psp_timeout_ms),
            default_base_fare,
            default_per_km_rate,
            default_per_min_rate,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            location_batch_size: 100,
            location_batch_interval: Duration::from_secs(10),
            location_high_water: 1000,
            match_max_attempts: 3,
            match_backoff: Duration::from_secs(5),
            search_radius_km: 5.0,
            geo_staleness: Duration::from_secs(300),
            psp_timeout: Duration::from_secs(10),
            default_base_fare: 50.0,
            default_per_km_rate: 12.0,
            default_per_min_rate: 2.0,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "could not be parsed"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.location_batch_size, 100);
        assert_eq!(config.location_batch_interval, Duration::from_secs(10));
        assert_eq!(config.match_max_attempts, 3);
        assert_eq!(config.match_backoff, Duration::from_secs(5));
        assert_eq!(config.geo_staleness, Duration::from_secs(300));
    }
}
