// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Tuning shared by every repository worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bound of each tree output queue (Action and Error).
    pub queue_capacity: usize,
    /// Bound of each worker mailbox.
    pub mailbox_capacity: usize,
    /// Stalled passes before group ordering during load gives up.
    pub group_order_stall_limit: usize,
    /// Period of the health log line emitted by a broken worker.
    pub health_log_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
            mailbox_capacity: 1024,
            group_order_stall_limit: 3,
            health_log_interval: Duration::from_secs(60),
        }
    }
}

/// Vigil core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Connection pool size
    pub db_max_connections: u32,
    /// Per-statement timeout
    pub statement_timeout: Duration,
    /// Worker tuning
    pub worker: WorkerConfig,
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

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `VIGIL_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `VIGIL_DB_MAX_CONNECTIONS` (10)
    /// - `VIGIL_STATEMENT_TIMEOUT_MS` (30000)
    /// - `VIGIL_QUEUE_CAPACITY` (65536)
    /// - `VIGIL_MAILBOX_CAPACITY` (1024)
    /// - `VIGIL_GROUP_ORDER_STALL_LIMIT` (3)
    /// - `VIGIL_HEALTH_LOG_INTERVAL_SECS` (60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("VIGIL_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("VIGIL_DATABASE_URL"))?;

        let db_max_connections: u32 = parse_var(
            "VIGIL_DB_MAX_CONNECTIONS",
            "10",
            "must be a positive integer",
        )?;
        let statement_timeout_ms: u64 = parse_var(
            "VIGIL_STATEMENT_TIMEOUT_MS",
            "30000",
            "must be a number of milliseconds",
        )?;
        let queue_capacity: usize =
            parse_var("VIGIL_QUEUE_CAPACITY", "65536", "must be a positive integer")?;
        let mailbox_capacity: usize =
            parse_var("VIGIL_MAILBOX_CAPACITY", "1024", "must be a positive integer")?;
        let group_order_stall_limit: usize = parse_var(
            "VIGIL_GROUP_ORDER_STALL_LIMIT",
            "3",
            "must be a positive integer",
        )?;
        let health_secs: u64 = parse_var(
            "VIGIL_HEALTH_LOG_INTERVAL_SECS",
            "60",
            "must be a number of seconds",
        )?;

        if queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_QUEUE_CAPACITY",
                "must be greater than zero",
            ));
        }
        if mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "VIGIL_MAILBOX_CAPACITY",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            database_url,
            db_max_connections,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            worker: WorkerConfig {
                queue_capacity,
                mailbox_capacity,
                group_order_stall_limit,
                health_log_interval: Duration::from_secs(health_secs),
            },
        })
    }
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
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const OPTIONAL: [&str; 6] = [
        "VIGIL_DB_MAX_CONNECTIONS",
        "VIGIL_STATEMENT_TIMEOUT_MS",
        "VIGIL_QUEUE_CAPACITY",
        "VIGIL_MAILBOX_CAPACITY",
        "VIGIL_GROUP_ORDER_STALL_LIMIT",
        "VIGIL_HEALTH_LOG_INTERVAL_SECS",
    ];

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/vigil");
        for key in OPTIONAL {
            guard.remove(key);
        }

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/vigil");
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.worker.queue_capacity, 65_536);
        assert_eq!(config.worker.mailbox_capacity, 1024);
        assert_eq!(config.worker.group_order_stall_limit, 3);
        assert_eq!(config.worker.health_log_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("VIGIL_DATABASE_URL", "postgres://db/vigil");
        guard.set("VIGIL_STATEMENT_TIMEOUT_MS", "500");
        guard.set("VIGIL_GROUP_ORDER_STALL_LIMIT", "7");
        guard.remove("VIGIL_QUEUE_CAPACITY");
        guard.remove("VIGIL_MAILBOX_CAPACITY");

        let config = Config::from_env().unwrap();

        assert_eq!(config.statement_timeout, Duration::from_millis(500));
        assert_eq!(config.worker.group_order_stall_limit, 7);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("VIGIL_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VIGIL_DATABASE_URL")));
    }

    #[test]
    fn test_config_zero_queue_capacity_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/vigil");
        guard.set("VIGIL_QUEUE_CAPACITY", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("VIGIL_QUEUE_CAPACITY", _)));
    }

    #[test]
    fn test_config_invalid_number() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("VIGIL_DATABASE_URL", "postgres://localhost/vigil");
        guard.remove("VIGIL_QUEUE_CAPACITY");
        guard.set("VIGIL_MAILBOX_CAPACITY", "lots");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("VIGIL_MAILBOX_CAPACITY", _)));
        assert!(err.to_string().contains("VIGIL_MAILBOX_CAPACITY"));
    }
}
