//! Environment-sourced configuration.
//!
//! Every value is read once at startup. A missing or unparsable variable
//! falls back to a fixed default; the fallback is recorded in
//! [`EngineConfig::warnings`] so it can be logged once tracing is up.

pub mod profiles;
pub mod ranges;

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use profiles::{get_profile, ScenarioTuning, PROFILE_NAMES};
pub use ranges::{DurationRange, IdRange};

use crate::scenarios;

/// Connection target.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// `DATABASE_URL`, which wins over the individual fields when set
    pub url_override: Option<String>,
}

impl DatabaseConfig {
    /// Human-readable target for logs, never including the password.
    pub fn display_target(&self) -> String {
        match &self.url_override {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!(
                "{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("url_override", &self.url_override.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Connection pool limits. The pool is the only resource shared by the
/// generators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum open connections
    pub max_open: u32,
    /// Connections kept warm when the pool is otherwise idle
    pub max_idle: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
    /// How long a caller queues for a connection before giving up
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 50,
            max_idle: 10,
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

/// Row counts the bootstrap step seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedConfig {
    pub users: i32,
    pub large_rows: i64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            users: 1000,
            large_rows: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
        }
    }
}

/// Restart policy for generator tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Restarts allowed per generator after a panic before giving up
    pub max_restarts: u32,
    pub restart_backoff: Duration,
    /// How long shutdown waits for generators before aborting them
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_backoff: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the binary needs, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub seed: SeedConfig,
    pub logging: LoggingConfig,
    pub metrics_addr: SocketAddr,
    pub report_interval: Duration,
    pub profile: String,
    pub enabled_scenarios: Vec<&'static str>,
    pub tuning: ScenarioTuning,
    pub supervisor: SupervisorConfig,
    /// Fallbacks taken while reading the environment
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_METRICS_ADDR: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 8080));

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);

        let database = DatabaseConfig {
            host: env.string("DB_HOST", "postgres"),
            port: env.parse("DB_PORT", 5432),
            user: env.string("DB_USER", "postgres"),
            password: env.string("DB_PASSWORD", "mysecretpassword"),
            database: env.string("DB_NAME", "postgres"),
            url_override: env.optional("DATABASE_URL"),
        };

        let pool_defaults = PoolConfig::default();
        let max_open = env.at_least("DB_MAX_OPEN_CONNS", pool_defaults.max_open, 1);
        let mut max_idle = env.parse("DB_MAX_IDLE_CONNS", pool_defaults.max_idle);
        if max_idle > max_open {
            env.warn(format!(
                "DB_MAX_IDLE_CONNS ({max_idle}) exceeds DB_MAX_OPEN_CONNS ({max_open}), using {max_open}"
            ));
            max_idle = max_open;
        }
        let pool = PoolConfig {
            max_open,
            max_idle,
            max_lifetime: env.secs("DB_CONN_MAX_LIFETIME_SECS", pool_defaults.max_lifetime),
            idle_timeout: env.secs("DB_CONN_IDLE_TIMEOUT_SECS", pool_defaults.idle_timeout),
            acquire_timeout: env.secs("DB_ACQUIRE_TIMEOUT_SECS", pool_defaults.acquire_timeout),
        };

        let seed_defaults = SeedConfig::default();
        let seed = SeedConfig {
            users: env.at_least("SEED_USERS", seed_defaults.users, 1),
            large_rows: env.at_least("SEED_LARGE_ROWS", seed_defaults.large_rows, 0),
        };

        let logging = LoggingConfig {
            format: env.parse("LOG_FORMAT", LogFormat::Pretty),
        };

        let metrics_addr = env.parse("METRICS_ADDR", DEFAULT_METRICS_ADDR);
        let report_interval = env.secs("REPORT_INTERVAL_SECS", Duration::from_secs(30));

        let supervisor_defaults = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            max_restarts: env.parse("SUPERVISOR_MAX_RESTARTS", supervisor_defaults.max_restarts),
            restart_backoff: env.secs(
                "SUPERVISOR_RESTART_BACKOFF_SECS",
                supervisor_defaults.restart_backoff,
            ),
            stop_timeout: env.secs("SHUTDOWN_TIMEOUT_SECS", supervisor_defaults.stop_timeout),
        };

        let requested_profile = env.string("CONTENTION_PROFILE", "default");
        let (profile, base_tuning) = match get_profile(&requested_profile) {
            Some(tuning) => (requested_profile, tuning),
            None => {
                env.warn(format!(
                    "Unknown profile '{}', using 'default' (known: {})",
                    requested_profile,
                    PROFILE_NAMES.join(", ")
                ));
                ("default".to_string(), profiles::default_profile())
            }
        };

        let tuning = match env.optional("TUNING_FILE") {
            Some(path) => match load_tuning_overrides(Path::new(&path), &base_tuning) {
                Ok(tuning) => tuning,
                Err(reason) => {
                    env.warn(format!(
                        "Ignoring TUNING_FILE {path}: {reason}; using '{profile}' profile"
                    ));
                    base_tuning
                }
            },
            None => base_tuning,
        };

        let enabled_scenarios = match env.optional("SCENARIOS") {
            Some(list) => parse_scenario_list(&list, &mut env),
            None => scenarios::ALL_NAMES.to_vec(),
        };

        EngineConfig {
            database,
            pool,
            seed,
            logging,
            metrics_addr,
            report_interval,
            profile,
            enabled_scenarios,
            tuning,
            supervisor,
            warnings: env.into_warnings(),
        }
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// Numeric settings never fail here; they fall back while loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_scenarios.is_empty() {
            return Err(ConfigError::Invalid(
                "SCENARIOS selects no known scenario".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_enabled(&self, scenario: &str) -> bool {
        self.enabled_scenarios.iter().any(|name| *name == scenario)
    }
}

fn parse_scenario_list<F>(list: &str, env: &mut EnvReader<F>) -> Vec<&'static str>
where
    F: Fn(&str) -> Option<String>,
{
    let mut selected = Vec::new();
    for requested in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if requested.eq_ignore_ascii_case("all") {
            return scenarios::ALL_NAMES.to_vec();
        }
        match scenarios::ALL_NAMES
            .iter()
            .find(|name| name.eq_ignore_ascii_case(requested))
        {
            Some(name) if !selected.contains(name) => selected.push(*name),
            Some(_) => {}
            None => env.warn(format!("Ignoring unknown scenario '{requested}' in SCENARIOS")),
        }
    }
    selected
}

/// Overlay a JSON tuning file on top of a profile.
///
/// Fields missing from the file keep the profile's values.
pub fn load_tuning_overrides(path: &Path, base: &ScenarioTuning) -> Result<ScenarioTuning, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let overrides: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    let mut merged = serde_json::to_value(base).map_err(|e| e.to_string())?;
    merge_json(&mut merged, overrides);
    serde_json::from_value(merged).map_err(|e| e.to_string())
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

struct EnvReader<F> {
    lookup: F,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            warnings: Vec::new(),
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Debug,
    {
        self.parse_where(key, default, |_| true)
    }

    /// Like [`parse`](Self::parse), but values below `min` also fall back.
    fn at_least<T>(&mut self, key: &str, default: T, min: T) -> T
    where
        T: FromStr + fmt::Debug + PartialOrd,
    {
        self.parse_where(key, default, |value| *value >= min)
    }

    fn parse_where<T>(&mut self, key: &str, default: T, accept: impl Fn(&T) -> bool) -> T
    where
        T: FromStr + fmt::Debug,
    {
        match self.optional(key) {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(value) if accept(&value) => value,
                _ => {
                    self.warn(format!("Invalid {key}={raw:?}, using default {default:?}"));
                    default
                }
            },
            None => default,
        }
    }

    fn secs(&mut self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.database.host, "postgres");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.password, "mysecretpassword");
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.seed, SeedConfig::default());
        assert_eq!(config.metrics_addr.port(), 8080);
        assert_eq!(config.profile, "default");
        assert_eq!(config.enabled_scenarios.len(), 7);
        assert!(config.warnings.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("DB_PORT", "not-a-port"),
            ("DB_MAX_OPEN_CONNS", "-3"),
            ("LOG_FORMAT", "xml"),
            ("DB_HOST", "db.internal"),
        ]);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.pool.max_open, 50);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.warnings.len(), 3);
    }

    #[test]
    fn test_pool_overrides_are_applied() {
        let config = config_from(&[
            ("DB_MAX_OPEN_CONNS", "8"),
            ("DB_MAX_IDLE_CONNS", "2"),
            ("DB_CONN_MAX_LIFETIME_SECS", "90"),
        ]);
        assert_eq!(config.pool.max_open, 8);
        assert_eq!(config.pool.max_idle, 2);
        assert_eq!(config.pool.max_lifetime, Duration::from_secs(90));
    }

    #[test]
    fn test_idle_connections_are_clamped_to_open_limit() {
        let config = config_from(&[("DB_MAX_OPEN_CONNS", "5")]);
        assert_eq!(config.pool.max_open, 5);
        assert_eq!(config.pool.max_idle, 5);
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("DB_MAX_IDLE_CONNS"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_fall_back_to_defaults() {
        let config = config_from(&[
            ("DB_MAX_OPEN_CONNS", "0"),
            ("SEED_USERS", "0"),
            ("SEED_LARGE_ROWS", "-1"),
        ]);
        assert_eq!(config.pool.max_open, 50);
        assert_eq!(config.pool.max_idle, 10);
        assert_eq!(config.seed, SeedConfig::default());
        assert_eq!(config.warnings.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scenario_list_filters_unknown_names() {
        let config = config_from(&[("SCENARIOS", "deadlock_induction, nope,LOCK_CONTENTION")]);
        assert_eq!(
            config.enabled_scenarios,
            vec!["deadlock_induction", "lock_contention"]
        );
        assert_eq!(config.warnings.len(), 1);
        assert!(config.is_enabled("lock_contention"));
        assert!(!config.is_enabled("heavy_write"));
    }

    #[test]
    fn test_empty_scenario_selection_is_rejected() {
        let config = config_from(&[("SCENARIOS", "nothing-real")]);
        assert!(config.enabled_scenarios.is_empty());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_profile_falls_back_to_default() {
        let config = config_from(&[("CONTENTION_PROFILE", "turbo")]);
        assert_eq!(config.profile, "default");
        assert_eq!(config.tuning, profiles::default_profile());
        assert_eq!(config.warnings.len(), 1);
    }

    #[test]
    fn test_tuning_file_overlays_selected_profile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "deadlock": {{ "hold_ms": 4000 }}, "pool_exhaustion": {{ "workers": 7 }} }}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = config_from(&[("CONTENTION_PROFILE", "smoke"), ("TUNING_FILE", path.as_str())]);

        let smoke = profiles::smoke_profile();
        assert_eq!(config.tuning.deadlock.hold, Duration::from_secs(4));
        assert_eq!(config.tuning.pool_exhaustion.workers, 7);
        // untouched fields keep the smoke values
        assert_eq!(config.tuning.heavy_write, smoke.heavy_write);
        assert_eq!(config.tuning.deadlock.start_offset, smoke.deadlock.start_offset);
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn test_unreadable_tuning_file_is_ignored() {
        let config = config_from(&[("TUNING_FILE", "/definitely/not/here.json")]);
        assert_eq!(config.tuning, profiles::default_profile());
        assert_eq!(config.warnings.len(), 1);
    }

    #[test]
    fn test_password_is_redacted_in_debug_output() {
        let config = config_from(&[("DB_PASSWORD", "hunter2")]);
        let rendered = format!("{:?}", config.database);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(config.database.display_target(), "postgres@postgres:5432/postgres");
    }
}
