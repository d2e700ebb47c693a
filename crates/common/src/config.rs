//! Service configuration fragments and launch environment rendering.
//!
//! Every managed service reads its configuration from environment variables
//! named `<PREFIX>_<SECTION>__<KEY>`, where `PREFIX` identifies the service
//! role and `SECTION` identifies one concern (input, report, storage,
//! observability). A fragment owns exactly one section, so fragments rendered
//! under the same prefix cannot collide. Collisions that do happen (for
//! example the same fragment rendered twice) are rejected by [`LaunchEnv`].
//!
//! # Example
//!
//! ```rust
//! use common::config::{ConfigFragment, KafkaInputConfig, LaunchEnv};
//!
//! let input = KafkaInputConfig::new("localhost:9092", "cdl.document.input");
//!
//! let mut env = LaunchEnv::new();
//! env.merge(input.render("COMMAND_SERVICE").unwrap()).unwrap();
//!
//! assert_eq!(env.get("COMMAND_SERVICE_KAFKA__BROKERS"), Some("localhost:9092"));
//! ```

use crate::error::{EnvError, Result};
use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Consumer group used when a test does not name one.
pub const DEFAULT_GROUP_ID: &str = "cdl-integration-tests";

/// Key fragments whose values are never printed by `Debug`.
const SENSITIVE_KEY_MARKERS: [&str; 2] = ["PASSWORD", "SECRET"];

const REDACTED: &str = "[REDACTED]";

/// Ordered set of environment variables handed to a child process.
///
/// Keys are unique: inserting an existing key is an error instead of an
/// overwrite, which is how fragment collisions surface before a spawn.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    vars: BTreeMap<String, String>,
}

impl LaunchEnv {
    /// Create an empty launch environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single variable.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::DuplicateKey`] if `key` is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.vars.contains_key(&key) {
            return Err(EnvError::DuplicateKey { key });
        }
        self.vars.insert(key, value.into());
        Ok(())
    }

    /// Merge another environment into this one.
    ///
    /// The merge is all-or-nothing: on a collision `self` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::DuplicateKey`] naming the first colliding key.
    pub fn merge(&mut self, other: LaunchEnv) -> Result<()> {
        if let Some(key) = other.vars.keys().find(|key| self.vars.contains_key(*key)) {
            return Err(EnvError::DuplicateKey { key: key.clone() });
        }
        self.vars.extend(other.vars);
        Ok(())
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether a variable is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterate over variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl fmt::Debug for LaunchEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.vars {
            if SENSITIVE_KEY_MARKERS.iter().any(|marker| key.contains(marker)) {
                map.entry(key, &REDACTED);
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl IntoIterator for LaunchEnv {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

/// Check that a prefix can be used as the leading part of a variable name.
///
/// # Errors
///
/// Returns [`EnvError::InvalidPrefix`] for empty names or names containing
/// anything other than uppercase ASCII letters, digits and underscores.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let valid = !prefix.is_empty()
        && !prefix.starts_with(|c: char| c.is_ascii_digit())
        && prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(EnvError::InvalidPrefix(prefix.to_string()))
    }
}

/// A piece of service configuration owning one environment section.
pub trait ConfigFragment {
    /// Section name the fragment's keys are namespaced under.
    fn section(&self) -> &'static str;

    /// Unprefixed keys and their rendered values.
    fn entries(&self) -> Vec<(&'static str, String)>;

    /// Render the fragment as `<prefix>_<SECTION>__<KEY>` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or the fragment repeats a key.
    fn render(&self, prefix: &str) -> Result<LaunchEnv> {
        validate_prefix(prefix)?;

        let mut env = LaunchEnv::new();
        for (key, value) in self.entries() {
            env.insert(format!("{prefix}_{}__{key}", self.section()), value)?;
        }
        Ok(env)
    }
}

/// Kafka input: where a service consumes its records from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KafkaInputConfig {
    pub brokers: String,
    pub group_id: String,
    pub topic: String,
}

impl KafkaInputConfig {
    /// Input configuration using the default consumer group.
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            topic: topic.into(),
        }
    }

    /// Override the consumer group.
    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }
}

impl ConfigFragment for KafkaInputConfig {
    fn section(&self) -> &'static str {
        "KAFKA"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("BROKERS", self.brokers.clone()),
            ("GROUP_ID", self.group_id.clone()),
            ("INGEST_TOPIC", self.topic.clone()),
        ]
    }
}

/// Report destination: where a service publishes processing notifications.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KafkaReportConfig {
    pub destination: String,
    pub enabled: bool,
}

impl KafkaReportConfig {
    /// Enabled reporting to `destination`.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            enabled: true,
        }
    }

    /// Reporting switched off. Services still expect the section to exist.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            destination: String::new(),
            enabled: false,
        }
    }
}

impl ConfigFragment for KafkaReportConfig {
    fn section(&self) -> &'static str {
        "NOTIFICATIONS"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DESTINATION", self.destination.clone()),
            ("ENABLED", self.enabled.to_string()),
        ]
    }
}

/// Relational store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub dbname: String,
    pub schema: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: SecretString::from("1234"),
            dbname: "postgres".to_string(),
            schema: "cdlgrpc".to_string(),
        }
    }
}

impl ConfigFragment for PostgresConfig {
    fn section(&self) -> &'static str {
        "POSTGRES"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("HOST", self.host.clone()),
            ("PORT", self.port.to_string()),
            ("USERNAME", self.username.clone()),
            ("PASSWORD", self.password.expose_secret().to_string()),
            ("DBNAME", self.dbname.clone()),
            ("SCHEMA", self.schema.clone()),
        ]
    }
}

/// Series store (VictoriaMetrics) settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VictoriaMetricsConfig {
    pub url: String,
}

impl VictoriaMetricsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ConfigFragment for VictoriaMetricsConfig {
    fn section(&self) -> &'static str {
        "VICTORIA_METRICS"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![("URL", self.url.clone())]
    }
}

/// Druid output: the ingestion topic Druid reads from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DruidConfig {
    pub topic: String,
}

impl ConfigFragment for DruidConfig {
    fn section(&self) -> &'static str {
        "DRUID"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![("TOPIC", self.topic.clone())]
    }
}

/// Observability settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitoringConfig {
    pub otel_service_name: String,
    pub metrics_port: u16,
    pub status_port: u16,
}

impl MonitoringConfig {
    /// Monitoring for `service_name` on the services' default ports.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            otel_service_name: service_name.into(),
            metrics_port: 58105,
            status_port: 3000,
        }
    }
}

impl ConfigFragment for MonitoringConfig {
    fn section(&self) -> &'static str {
        "MONITORING"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("OTEL_SERVICE_NAME", self.otel_service_name.clone()),
            ("METRICS_PORT", self.metrics_port.to_string()),
            ("STATUS_PORT", self.status_port.to_string()),
        ]
    }
}

/// Storage backends a service can persist into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Postgres,
    VictoriaMetrics,
    Druid,
}

impl BackendKind {
    /// Name of the plugin passed as the service's positional argument.
    #[must_use]
    pub fn plugin_name(self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::VictoriaMetrics => "victoria-metrics",
            BackendKind::Druid => "druid",
        }
    }

    /// Value of the `REPOSITORY_KIND` variable.
    #[must_use]
    pub fn repository_kind(self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::VictoriaMetrics => "victoria_metrics",
            BackendKind::Druid => "druid",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plugin_name())
    }
}

/// Storage configuration tagged with its backend.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres(PostgresConfig),
    VictoriaMetrics(VictoriaMetricsConfig),
    Druid(DruidConfig),
}

impl StorageConfig {
    /// Which backend this configuration targets.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            StorageConfig::Postgres(_) => BackendKind::Postgres,
            StorageConfig::VictoriaMetrics(_) => BackendKind::VictoriaMetrics,
            StorageConfig::Druid(_) => BackendKind::Druid,
        }
    }

    /// The backend's own fragment.
    #[must_use]
    pub fn fragment(&self) -> &dyn ConfigFragment {
        match self {
            StorageConfig::Postgres(config) => config,
            StorageConfig::VictoriaMetrics(config) => config,
            StorageConfig::Druid(config) => config,
        }
    }
}

impl From<PostgresConfig> for StorageConfig {
    fn from(config: PostgresConfig) -> Self {
        StorageConfig::Postgres(config)
    }
}

impl From<VictoriaMetricsConfig> for StorageConfig {
    fn from(config: VictoriaMetricsConfig) -> Self {
        StorageConfig::VictoriaMetrics(config)
    }
}

impl From<DruidConfig> for StorageConfig {
    fn from(config: DruidConfig) -> Self {
        StorageConfig::Druid(config)
    }
}
