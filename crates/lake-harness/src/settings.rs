//! Harness settings.
//!
//! Every ambient default (broker address, store endpoints, executable paths,
//! timing budgets) is read here, once, at the test entry point. Components
//! receive a `&HarnessSettings` and never consult the process environment.

use crate::poll::{Backoff, PollPolicy};
use crate::process::ServiceRole;
use common::config::{KafkaInputConfig, PostgresConfig, VictoriaMetricsConfig};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
pub const DEFAULT_VICTORIA_METRICS_URL: &str = "http://127.0.0.1:8428";
pub const DEFAULT_COMPOSE_PROJECT: &str = "cdl-tests";
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;
pub const DEFAULT_READINESS_DELAY_MS: u64 = 1000;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 3000;

/// Variables copied from the harness into every child process.
///
/// Children otherwise start from an empty environment.
const PASSTHROUGH_VARS: [&str; 3] = ["PATH", "HOME", "RUST_LOG"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

/// Configuration for one harness run.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub kafka_brokers: String,
    pub postgres: PostgresConfig,
    pub victoria_metrics_url: String,
    pub executables: HashMap<ServiceRole, PathBuf>,
    /// Compose file started before and stopped after each environment.
    pub compose_file: Option<PathBuf>,
    pub compose_project: String,
    pub fixtures_dir: PathBuf,
    /// Attempt budget for every infra readiness check.
    pub readiness: PollPolicy,
    /// Bound on a single broker acknowledgment.
    pub publish_timeout: Duration,
    pub log_filter: Option<String>,
    pub passthrough_env: Vec<(String, String)>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            kafka_brokers: DEFAULT_KAFKA_BROKERS.to_string(),
            postgres: PostgresConfig::default(),
            victoria_metrics_url: DEFAULT_VICTORIA_METRICS_URL.to_string(),
            executables: HashMap::new(),
            compose_file: None,
            compose_project: DEFAULT_COMPOSE_PROJECT.to_string(),
            fixtures_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/data")),
            readiness: PollPolicy::new(
                DEFAULT_READINESS_ATTEMPTS,
                Backoff::Fixed(Duration::from_millis(DEFAULT_READINESS_DELAY_MS)),
            ),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            log_filter: None,
            passthrough_env: Vec::new(),
        }
    }
}

impl HarnessSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load settings from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let default_pg = PostgresConfig::default();

        let postgres = PostgresConfig {
            host: string_var(vars, "POSTGRES_HOST", default_pg.host),
            port: parse_var(vars, "POSTGRES_PORT", default_pg.port)?,
            username: string_var(vars, "POSTGRES_USERNAME", default_pg.username),
            password: vars
                .get("POSTGRES_PASSWORD")
                .map(|p| SecretString::from(p.as_str()))
                .unwrap_or(default_pg.password),
            dbname: string_var(vars, "POSTGRES_DBNAME", default_pg.dbname),
            schema: string_var(vars, "POSTGRES_SCHEMA", default_pg.schema),
        };

        let executables = ServiceRole::ALL
            .iter()
            .filter_map(|role| {
                vars.get(&format!("{}_EXE", role.env_prefix()))
                    .map(|path| (*role, PathBuf::from(path)))
            })
            .collect();

        let readiness_attempts: u32 = parse_var(
            vars,
            "HARNESS_READINESS_ATTEMPTS",
            DEFAULT_READINESS_ATTEMPTS,
        )?;
        if readiness_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "HARNESS_READINESS_ATTEMPTS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let readiness_delay_ms: u64 =
            parse_var(vars, "HARNESS_READINESS_DELAY_MS", DEFAULT_READINESS_DELAY_MS)?;
        let publish_timeout_ms: u64 =
            parse_var(vars, "HARNESS_PUBLISH_TIMEOUT_MS", DEFAULT_PUBLISH_TIMEOUT_MS)?;

        let passthrough_env = PASSTHROUGH_VARS
            .iter()
            .filter_map(|name| vars.get(*name).map(|v| (name.to_string(), v.clone())))
            .collect();

        Ok(Self {
            kafka_brokers: string_var(vars, "KAFKA_BROKERS", defaults.kafka_brokers),
            postgres,
            victoria_metrics_url: string_var(
                vars,
                "VICTORIA_METRICS_URL",
                defaults.victoria_metrics_url,
            ),
            executables,
            compose_file: vars.get("HARNESS_COMPOSE_FILE").map(PathBuf::from),
            compose_project: string_var(vars, "HARNESS_COMPOSE_PROJECT", defaults.compose_project),
            fixtures_dir: vars
                .get("HARNESS_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.fixtures_dir),
            readiness: PollPolicy::new(
                readiness_attempts,
                Backoff::Fixed(Duration::from_millis(readiness_delay_ms)),
            ),
            publish_timeout: Duration::from_millis(publish_timeout_ms),
            log_filter: vars.get("RUST_LOG").cloned(),
            passthrough_env,
        })
    }

    /// Path of the executable for a service role.
    ///
    /// Falls back to the role's binary name, resolved through `PATH`.
    pub fn executable(&self, role: ServiceRole) -> PathBuf {
        self.executables
            .get(&role)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(role.executable_name()))
    }

    /// Kafka input fragment for `topic` on the configured brokers.
    pub fn kafka_input(&self, topic: &str) -> KafkaInputConfig {
        KafkaInputConfig::new(self.kafka_brokers.as_str(), topic)
    }

    /// Series store fragment for the configured URL.
    pub fn victoria_metrics(&self) -> VictoriaMetricsConfig {
        VictoriaMetricsConfig::new(self.victoria_metrics_url.as_str())
    }
}

fn string_var(vars: &HashMap<String, String>, name: &str, default: String) -> String {
    vars.get(name).cloned().unwrap_or(default)
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
