// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

pub use vigil_core::config::ConfigError;

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Period of one LifecycleManager tick.
    pub tick_interval: Duration,
    /// Period of the builder/orderer poll.
    pub deployment_poll_interval: Duration,
    /// Configurations picked up per deployment poll.
    pub deployment_batch_size: i64,
    /// Age after which an in-progress configuration is forced back to
    /// `awaiting_deprovision`.
    pub deadlock_threshold: Duration,
    /// How long finished configurations are kept.
    pub retention: Duration,
    /// Notifications sent per batch to one monitoring system.
    pub poke_batch_size: usize,
    /// HTTP timeout per notification.
    pub poke_timeout: Duration,
    /// Callback path sent in every notification body.
    pub poke_path: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            deployment_poll_interval: Duration::from_secs(5),
            deployment_batch_size: 100,
            deadlock_threshold: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            poke_batch_size: 64,
            poke_timeout: Duration::from_millis(500),
            poke_path: "/api/v1/configuration".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &'static str,
    default: &str,
    message: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key, message))
}

impl LifecycleConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `VIGIL_LIFECYCLE_TICK_SECS` (30)
    /// - `VIGIL_DEPLOYMENT_POLL_SECS` (5)
    /// - `VIGIL_DEPLOYMENT_BATCH_SIZE` (100)
    /// - `VIGIL_DEADLOCK_THRESHOLD_SECS` (3600)
    /// - `VIGIL_RETENTION_DAYS` (7)
    /// - `VIGIL_POKE_BATCH_SIZE` (64)
    /// - `VIGIL_POKE_TIMEOUT_MS` (500)
    /// - `VIGIL_POKE_PATH` (`/api/v1/configuration`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let tick_secs: u64 = parse_var(
            "VIGIL_LIFECYCLE_TICK_SECS",
            "30",
            "must be a number of seconds",
        )?;
        let poll_secs: u64 = parse_var(
            "VIGIL_DEPLOYMENT_POLL_SECS",
            "5",
            "must be a number of seconds",
        )?;
        let deployment_batch_size: i64 = parse_var(
            "VIGIL_DEPLOYMENT_BATCH_SIZE",
            "100",
            "must be a positive integer",
        )?;
        let deadlock_secs: u64 = parse_var(
            "VIGIL_DEADLOCK_THRESHOLD_SECS",
            "3600",
            "must be a number of seconds",
        )?;
        let retention_days: u64 =
            parse_var("VIGIL_RETENTION_DAYS", "7", "must be a number of days")?;
        let poke_batch_size: usize =
            parse_var("VIGIL_POKE_BATCH_SIZE", "64", "must be a positive integer")?;
        let poke_timeout_ms: u64 = parse_var(
            "VIGIL_POKE_TIMEOUT_MS",
            "500",
            "must be a number of milliseconds",
        )?;
        let poke_path =
            std::env::var("VIGIL_POKE_PATH").unwrap_or_else(|_| "/api/v1/configuration".into());

        if tick_secs == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_LIFECYCLE_TICK_SECS",
                "must be greater than zero",
            ));
        }
        if poll_secs == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_DEPLOYMENT_POLL_SECS",
                "must be greater than zero",
            ));
        }
        if deployment_batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_DEPLOYMENT_BATCH_SIZE",
                "must be greater than zero",
            ));
        }
        if poke_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_POKE_BATCH_SIZE",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            tick_interval: Duration::from_secs(tick_secs),
            deployment_poll_interval: Duration::from_secs(poll_secs),
            deployment_batch_size,
            deadlock_threshold: Duration::from_secs(deadlock_secs),
            retention: Duration::from_secs(retention_days * 24 * 3600),
            poke_batch_size,
            poke_timeout: Duration::from_millis(poke_timeout_ms),
            poke_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 8] = [
        "VIGIL_LIFECYCLE_TICK_SECS",
        "VIGIL_DEPLOYMENT_POLL_SECS",
        "VIGIL_DEPLOYMENT_BATCH_SIZE",
        "VIGIL_DEADLOCK_THRESHOLD_SECS",
        "VIGIL_RETENTION_DAYS",
        "VIGIL_POKE_BATCH_SIZE",
        "VIGIL_POKE_TIMEOUT_MS",
        "VIGIL_POKE_PATH",
    ];

    fn clear() {
        for key in VARS {
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn test_defaults_match_default_impl() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();

        let config = LifecycleConfig::from_env().unwrap();
        let default = LifecycleConfig::default();

        assert_eq!(config.tick_interval, default.tick_interval);
        assert_eq!(config.retention, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.poke_timeout, Duration::from_millis(500));
        assert_eq!(config.poke_path, "/api/v1/configuration");
        assert_eq!(config.poke_batch_size, 64);
    }

    #[test]
    fn test_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        // SAFETY: Tests are serialized via ENV_MUTEX
        unsafe {
            env::set_var("VIGIL_DEADLOCK_THRESHOLD_SECS", "60");
            env::set_var("VIGIL_POKE_PATH", "/hooks/vigil");
        }

        let config = LifecycleConfig::from_env().unwrap();
        clear();

        assert_eq!(config.deadlock_threshold, Duration::from_secs(60));
        assert_eq!(config.poke_path, "/hooks/vigil");
    }

    #[test]
    fn test_zero_batch_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear();
        // SAFETY: Tests are serialized via ENV_MUTEX
        unsafe { env::set_var("VIGIL_POKE_BATCH_SIZE", "0") };

        let err = LifecycleConfig::from_env().unwrap_err();
        clear();

        assert!(matches!(err, ConfigError::Invalid("VIGIL_POKE_BATCH_SIZE", _)));
    }
}
