//! Test environment provisioning and teardown.
//!
//! An [`Environment`] owns the infrastructure one test case depends on: the
//! event log broker, the relational store and the series store, optionally
//! started through `docker compose`. Each declared dependency is ensured
//! idempotently and polled until reachable before `start` returns, so the
//! system under test never races its own infrastructure.
//!
//! `stop` tears down everything `start` managed to set up, including after a
//! partial start, and never fails: problems are logged and suppressed.

use crate::cleanup::CleanupStack;
use crate::fixtures::postgres::{RelationalStore, RelationalStoreError};
use crate::fixtures::victoria::{SeriesStore, SeriesStoreError};
use crate::kafka::{KafkaAdmin, KafkaAdminError};
use crate::poll::{retrieve, PollOutcome};
use crate::settings::HarnessSettings;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Connect timeout for a single TCP reachability probe.
const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("{resource} not ready after {attempts} attempts: {last_error}")]
    NotReady {
        resource: String,
        attempts: u32,
        last_error: String,
    },

    #[error("docker compose {action} failed: {message}")]
    Compose {
        action: &'static str,
        message: String,
    },

    #[error("Event log admin error: {0}")]
    Kafka(#[from] KafkaAdminError),

    #[error("Relational store error: {0}")]
    Relational(#[from] RelationalStoreError),

    #[error("Series store error: {0}")]
    Series(#[from] SeriesStoreError),
}

/// Infrastructure a test case depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredResources {
    pub topics: Vec<String>,
    pub postgres: bool,
    pub series_store: bool,
    /// Also empty the relation tables at teardown.
    pub clear_relations: bool,
}

impl RequiredResources {
    /// No infrastructure at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn topic(mut self, name: impl Into<String>) -> Self {
        self.topics.push(name.into());
        self
    }

    pub fn postgres(mut self) -> Self {
        self.postgres = true;
        self
    }

    pub fn series_store(mut self) -> Self {
        self.series_store = true;
        self
    }

    pub fn clear_relations(mut self) -> Self {
        self.postgres = true;
        self.clear_relations = true;
        self
    }
}

/// An ensured event log topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicHandle {
    pub name: String,
    /// Whether this environment created the topic. Every ensured topic is
    /// deleted on stop either way.
    pub created: bool,
}

/// The ensured `<schema>.data` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub schema: String,
}

impl TableHandle {
    pub fn qualified_name(&self) -> String {
        format!("{}.data", self.schema)
    }
}

/// The ensured series store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesHandle {
    pub url: String,
}

/// A `docker compose` project.
#[derive(Debug, Clone)]
struct ComposeProject {
    file: PathBuf,
    project: String,
}

impl ComposeProject {
    async fn run(&self, action: &'static str, extra: &[&str]) -> Result<(), ProvisioningError> {
        let output = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&self.file)
            .args(["-p", &self.project])
            .args(extra)
            .output()
            .await
            .map_err(|e| ProvisioningError::Compose {
                action,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisioningError::Compose {
                action,
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(())
    }

    async fn up(&self) -> Result<(), ProvisioningError> {
        info!(target: "lake.env", file = %self.file.display(), project = %self.project, "Starting compose project");
        self.run("up", &["up", "-d"]).await
    }

    async fn down(&self) -> Result<(), ProvisioningError> {
        info!(target: "lake.env", project = %self.project, "Stopping compose project");
        self.run("down", &["down", "-v"]).await
    }
}

/// Turn a readiness poll into a value or [`ProvisioningError::NotReady`].
fn ready<T, E: Display>(
    resource: &str,
    outcome: PollOutcome<T, E>,
) -> Result<T, ProvisioningError> {
    let (attempts, last_error) = match outcome {
        PollOutcome::Satisfied { value, attempts } => {
            debug!(target: "lake.env", resource, attempts, "Resource ready");
            return Ok(value);
        }
        PollOutcome::Exhausted { attempts, .. } => (attempts, "condition not met".to_string()),
        PollOutcome::Failed {
            error, attempts, ..
        } => (attempts, error.to_string()),
        PollOutcome::Cancelled { attempts, .. } => (attempts, "cancelled".to_string()),
    };

    Err(ProvisioningError::NotReady {
        resource: resource.to_string(),
        attempts,
        last_error,
    })
}

/// Whether `addr` (`host:port`) accepts TCP connections.
async fn check_tcp(addr: &str) -> Result<(), std::io::Error> {
    match tokio::time::timeout(TCP_PROBE_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out"),
        )),
    }
}

/// Infrastructure for one test run.
pub struct Environment {
    settings: HarnessSettings,
    required: RequiredResources,
    compose: Option<ComposeProject>,
    compose_started: bool,
    kafka: Option<KafkaAdmin>,
    relational: Option<RelationalStore>,
    series: Option<SeriesStore>,
    topics: Vec<TopicHandle>,
    table: Option<TableHandle>,
    series_handle: Option<SeriesHandle>,
    stopped: bool,
}

impl Environment {
    fn new(settings: &HarnessSettings, required: RequiredResources) -> Self {
        let compose = settings.compose_file.as_ref().map(|file| ComposeProject {
            file: file.clone(),
            project: settings.compose_project.clone(),
        });

        Self {
            settings: settings.clone(),
            required,
            compose,
            compose_started: false,
            kafka: None,
            relational: None,
            series: None,
            topics: Vec::new(),
            table: None,
            series_handle: None,
            stopped: false,
        }
    }

    /// Provision `required` and wait until every piece is reachable.
    ///
    /// On failure, whatever was already provisioned is torn down before the
    /// error is returned.
    pub async fn start(
        settings: &HarnessSettings,
        required: RequiredResources,
    ) -> Result<Self, ProvisioningError> {
        let mut env = Self::new(settings, required);

        match env.provision().await {
            Ok(()) => {
                info!(
                    target: "lake.env",
                    topics = env.topics.len(),
                    postgres = env.table.is_some(),
                    series_store = env.series_handle.is_some(),
                    "Environment ready"
                );
                Ok(env)
            }
            Err(e) => {
                warn!(target: "lake.env", error = %e, "Environment start failed, tearing down");
                env.stop().await;
                Err(e)
            }
        }
    }

    async fn provision(&mut self) -> Result<(), ProvisioningError> {
        if let Some(compose) = &self.compose {
            // Set before the call so a half-started project is still taken down.
            self.compose_started = true;
            compose.up().await?;
        }

        let required = self.required.clone();
        for topic in &required.topics {
            self.ensure_topic_exists(topic).await?;
        }
        if required.postgres {
            self.ensure_table_exists().await?;
        }
        if required.series_store {
            self.ensure_series_store_exists().await?;
        }

        Ok(())
    }

    /// Wait until the first configured broker accepts TCP connections.
    pub async fn wait_for_broker(&self) -> Result<(), ProvisioningError> {
        let broker = self
            .settings
            .kafka_brokers
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        let outcome = retrieve(
            || check_tcp(&broker),
            |_| true,
            &self.settings.readiness,
        )
        .await;

        ready("event log broker", outcome)
    }

    fn kafka_admin(&mut self) -> Result<KafkaAdmin, ProvisioningError> {
        if let Some(admin) = &self.kafka {
            return Ok(admin.clone());
        }
        let admin = KafkaAdmin::new(&self.settings.kafka_brokers)?;
        self.kafka = Some(admin.clone());
        Ok(admin)
    }

    /// Create `topic` unless it exists. Idempotent.
    pub async fn ensure_topic_exists(&mut self, topic: &str) -> Result<&TopicHandle, ProvisioningError> {
        if let Some(index) = self.topics.iter().position(|t| t.name == topic) {
            return Ok(&self.topics[index]);
        }

        self.wait_for_broker().await?;
        let admin = self.kafka_admin()?;

        let outcome = retrieve(
            || {
                let admin = admin.clone();
                let topic = topic.to_string();
                async move { admin.create_topic_if_absent(&topic).await }
            },
            |_| true,
            &self.settings.readiness,
        )
        .await;

        let created = ready(&format!("topic {topic}"), outcome)?;
        self.topics.push(TopicHandle {
            name: topic.to_string(),
            created,
        });

        Ok(&self.topics[self.topics.len() - 1])
    }

    /// Connect to the relational store and create the data table. Idempotent.
    pub async fn ensure_table_exists(&mut self) -> Result<&TableHandle, ProvisioningError> {
        if self.table.is_none() {
            let postgres = self.settings.postgres.clone();
            let outcome = retrieve(
                || RelationalStore::connect(&postgres),
                |_| true,
                &self.settings.readiness,
            )
            .await;
            let store = ready("relational store", outcome)?;

            // Record the store before creating the table so teardown can close it.
            self.relational = Some(store.clone());
            store.ensure_data_table().await?;

            self.table = Some(TableHandle {
                schema: store.schema().to_string(),
            });
        }

        self.table
            .as_ref()
            .ok_or_else(|| ProvisioningError::NotReady {
                resource: "relational store".to_string(),
                attempts: 0,
                last_error: "table handle missing".to_string(),
            })
    }

    /// Wait for the series store's health endpoint. Idempotent.
    pub async fn ensure_series_store_exists(&mut self) -> Result<&SeriesHandle, ProvisioningError> {
        if self.series_handle.is_none() {
            let store = SeriesStore::new(self.settings.victoria_metrics_url.as_str())?;
            let outcome = retrieve(|| store.health(), |_| true, &self.settings.readiness).await;
            ready("series store", outcome)?;

            self.series_handle = Some(SeriesHandle {
                url: store.base_url().to_string(),
            });
            self.series = Some(store);
        }

        self.series_handle
            .as_ref()
            .ok_or_else(|| ProvisioningError::NotReady {
                resource: "series store".to_string(),
                attempts: 0,
                last_error: "series handle missing".to_string(),
            })
    }

    /// Empty every ensured store without tearing the environment down.
    ///
    /// For suites that share one environment across cases.
    pub async fn reset(&self) -> Result<(), ProvisioningError> {
        if let Some(store) = &self.series {
            store.delete_all().await?;
        }
        if let Some(store) = &self.relational {
            store.clear_data().await?;
            if self.required.clear_relations {
                store.clear_relations().await?;
            }
        }
        Ok(())
    }

    /// Tear down everything this environment set up.
    ///
    /// Idempotent; failures are logged and suppressed.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let mut cleanup = CleanupStack::new();

        // Registered in reverse of the order they run.
        if self.compose_started {
            if let Some(compose) = self.compose.clone() {
                cleanup.push("compose down", async move { compose.down().await });
            }
        }

        if let Some(admin) = self.kafka.take() {
            for topic in self.topics.drain(..) {
                let admin = admin.clone();
                cleanup.push(format!("delete topic {}", topic.name), async move {
                    admin.delete_topic(&topic.name).await
                });
            }
        }
        self.topics.clear();

        if let Some(store) = self.relational.take() {
            let clear_relations = self.required.clear_relations;
            cleanup.push("clear relational store", async move {
                let result = async {
                    store.clear_data().await?;
                    if clear_relations {
                        store.clear_relations().await?;
                    }
                    Ok::<_, RelationalStoreError>(())
                }
                .await;
                store.close().await;
                result
            });
        }
        self.table = None;

        if let Some(store) = self.series.take() {
            cleanup.push("delete series", async move { store.delete_all().await });
        }
        self.series_handle = None;

        let failures = cleanup.run().await;
        if failures == 0 {
            info!(target: "lake.env", "Environment stopped");
        } else {
            warn!(target: "lake.env", failures, "Environment stopped with teardown failures");
        }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn topics(&self) -> &[TopicHandle] {
        &self.topics
    }

    pub fn table(&self) -> Option<&TableHandle> {
        self.table.as_ref()
    }

    pub fn series(&self) -> Option<&SeriesHandle> {
        self.series_handle.as_ref()
    }

    pub fn relational_store(&self) -> Option<&RelationalStore> {
        self.relational.as_ref()
    }

    pub fn series_store(&self) -> Option<&SeriesStore> {
        self.series.as_ref()
    }

    /// Number of ensured resources still held.
    pub fn resource_count(&self) -> usize {
        self.topics.len()
            + usize::from(self.table.is_some())
            + usize::from(self.series_handle.is_some())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("topics", &self.topics)
            .field("table", &self.table)
            .field("series", &self.series_handle)
            .field("compose_started", &self.compose_started)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if !self.stopped {
            warn!(
                target: "lake.env",
                resources = self.resource_count(),
                "Environment dropped without stop(); resources were not cleared"
            );
        }
    }
}
