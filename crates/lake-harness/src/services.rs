//! Launch descriptions for each service role.
//!
//! Each type owns the configuration fragments for one role and implements
//! [`ServiceLaunch`]; the manager does the rendering and spawning.

use crate::process::{ServiceLaunch, ServiceRole};
use common::config::{
    ConfigFragment, KafkaInputConfig, KafkaReportConfig, MonitoringConfig, StorageConfig,
};

pub const DEFAULT_ASYNC_TASK_LIMIT: usize = 32;
pub const DEFAULT_SCHEMA_REGISTRY_PORT: u16 = 50101;
pub const DEFAULT_QUERY_ROUTER_PORT: u16 = 50103;
pub const DEFAULT_OBJECT_BUILDER_PORT: u16 = 50107;
pub const DEFAULT_EDGE_REGISTRY_PORT: u16 = 50110;

const COMMUNICATION_METHOD: (&str, &str) = ("COMMUNICATION_METHOD", "kafka");

/// Which listener list the command service's input topic goes on.
///
/// Ordered sources are processed one record at a time per key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListenerConfig {
    topic: String,
    ordered: bool,
}

impl ConfigFragment for ListenerConfig {
    fn section(&self) -> &'static str {
        "LISTENER"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        let (ordered, unordered) = if self.ordered {
            (self.topic.clone(), String::new())
        } else {
            (String::new(), self.topic.clone())
        };
        vec![("ORDERED_SOURCES", ordered), ("UNORDERED_SOURCES", unordered)]
    }
}

/// Addresses of other services a role calls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServicesConfig {
    schema_registry_url: String,
}

impl ConfigFragment for ServicesConfig {
    fn section(&self) -> &'static str {
        "SERVICES"
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![("SCHEMA_REGISTRY_URL", self.schema_registry_url.clone())]
    }
}

/// Ingestion: consumes the input topic and writes into one storage backend.
///
/// The backend's plugin name is passed as the positional argument.
#[derive(Debug, Clone)]
pub struct CommandService {
    input: KafkaInputConfig,
    listener: ListenerConfig,
    report: KafkaReportConfig,
    storage: StorageConfig,
    monitoring: MonitoringConfig,
    async_task_limit: usize,
}

impl CommandService {
    pub fn new(input: KafkaInputConfig, storage: impl Into<StorageConfig>) -> Self {
        let listener = ListenerConfig {
            topic: input.topic.clone(),
            ordered: true,
        };

        Self {
            input,
            listener,
            report: KafkaReportConfig::disabled(),
            storage: storage.into(),
            monitoring: MonitoringConfig::new(ServiceRole::CommandService.executable_name()),
            async_task_limit: DEFAULT_ASYNC_TASK_LIMIT,
        }
    }

    pub fn with_report(mut self, report: KafkaReportConfig) -> Self {
        self.report = report;
        self
    }

    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.monitoring = monitoring;
        self
    }

    pub fn with_async_task_limit(mut self, limit: usize) -> Self {
        self.async_task_limit = limit;
        self
    }

    /// Consume the input topic without per-key ordering.
    pub fn unordered(mut self) -> Self {
        self.listener.ordered = false;
        self
    }
}

impl ServiceLaunch for CommandService {
    fn role(&self) -> ServiceRole {
        ServiceRole::CommandService
    }

    fn storage(&self) -> Option<&StorageConfig> {
        Some(&self.storage)
    }

    fn plugin_argument(&self) -> bool {
        true
    }

    fn fragments(&self) -> Vec<&dyn ConfigFragment> {
        vec![
            &self.input,
            &self.listener,
            &self.report,
            &self.monitoring,
        ]
    }

    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            (COMMUNICATION_METHOD.0, COMMUNICATION_METHOD.1.to_string()),
            (
                "REPOSITORY_KIND",
                self.storage.kind().repository_kind().to_string(),
            ),
            ("ASYNC_TASK_LIMIT", self.async_task_limit.to_string()),
        ]
    }
}

/// Relation/edge store. Postgres only.
#[derive(Debug, Clone)]
pub struct EdgeRegistry {
    input: Option<KafkaInputConfig>,
    storage: StorageConfig,
    report: KafkaReportConfig,
    monitoring: MonitoringConfig,
    rpc_port: u16,
}

impl EdgeRegistry {
    pub fn new(storage: impl Into<StorageConfig>) -> Self {
        Self {
            input: None,
            storage: storage.into(),
            report: KafkaReportConfig::disabled(),
            monitoring: MonitoringConfig::new(ServiceRole::EdgeRegistry.executable_name()),
            rpc_port: DEFAULT_EDGE_REGISTRY_PORT,
        }
    }

    /// Also consume relation updates from a topic.
    pub fn with_input(mut self, input: KafkaInputConfig) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_report(mut self, report: KafkaReportConfig) -> Self {
        self.report = report;
        self
    }

    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }
}

impl ServiceLaunch for EdgeRegistry {
    fn role(&self) -> ServiceRole {
        ServiceRole::EdgeRegistry
    }

    fn storage(&self) -> Option<&StorageConfig> {
        Some(&self.storage)
    }

    fn fragments(&self) -> Vec<&dyn ConfigFragment> {
        let mut fragments: Vec<&dyn ConfigFragment> = vec![&self.report, &self.monitoring];
        if let Some(input) = &self.input {
            fragments.push(input);
        }
        fragments
    }

    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            (COMMUNICATION_METHOD.0, COMMUNICATION_METHOD.1.to_string()),
            ("INPUT_PORT", self.rpc_port.to_string()),
        ]
    }

    fn rpc_port(&self) -> Option<u16> {
        Some(self.rpc_port)
    }
}

/// Schema store. Postgres only; replicates over the event log.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    storage: StorageConfig,
    replication: KafkaInputConfig,
    monitoring: MonitoringConfig,
    rpc_port: u16,
}

impl SchemaRegistry {
    /// `replication` names the brokers and topic used for replication.
    pub fn new(storage: impl Into<StorageConfig>, replication: KafkaInputConfig) -> Self {
        Self {
            storage: storage.into(),
            replication,
            monitoring: MonitoringConfig::new(ServiceRole::SchemaRegistry.executable_name()),
            rpc_port: DEFAULT_SCHEMA_REGISTRY_PORT,
        }
    }

    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }
}

impl ServiceLaunch for SchemaRegistry {
    fn role(&self) -> ServiceRole {
        ServiceRole::SchemaRegistry
    }

    fn storage(&self) -> Option<&StorageConfig> {
        Some(&self.storage)
    }

    fn fragments(&self) -> Vec<&dyn ConfigFragment> {
        vec![&self.replication, &self.monitoring]
    }

    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            (COMMUNICATION_METHOD.0, COMMUNICATION_METHOD.1.to_string()),
            ("REPLICATION_ROLE", "master".to_string()),
            ("INPUT_PORT", self.rpc_port.to_string()),
        ]
    }

    fn rpc_port(&self) -> Option<u16> {
        Some(self.rpc_port)
    }
}

/// HTTP front for queries; resolves schemas through the schema registry.
#[derive(Debug, Clone)]
pub struct QueryRouter {
    schema_registry_addr: String,
    monitoring: MonitoringConfig,
    rpc_port: u16,
}

impl QueryRouter {
    pub fn new(schema_registry_addr: impl Into<String>) -> Self {
        Self {
            schema_registry_addr: schema_registry_addr.into(),
            monitoring: MonitoringConfig::new(ServiceRole::QueryRouter.executable_name()),
            rpc_port: DEFAULT_QUERY_ROUTER_PORT,
        }
    }

    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    /// Base URL for [`QueryRouterClient`](crate::fixtures::QueryRouterClient).
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }
}

impl ServiceLaunch for QueryRouter {
    fn role(&self) -> ServiceRole {
        ServiceRole::QueryRouter
    }

    fn fragments(&self) -> Vec<&dyn ConfigFragment> {
        vec![&self.monitoring]
    }

    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("SCHEMA_REGISTRY_ADDR", self.schema_registry_addr.clone()),
            ("INPUT_PORT", self.rpc_port.to_string()),
        ]
    }

    fn rpc_port(&self) -> Option<u16> {
        Some(self.rpc_port)
    }
}

/// Materialized view builder.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    input: KafkaInputConfig,
    services: ServicesConfig,
    monitoring: MonitoringConfig,
    rpc_port: u16,
}

impl ObjectBuilder {
    pub fn new(input: KafkaInputConfig, schema_registry_url: impl Into<String>) -> Self {
        Self {
            input,
            services: ServicesConfig {
                schema_registry_url: schema_registry_url.into(),
            },
            monitoring: MonitoringConfig::new(ServiceRole::ObjectBuilder.executable_name()),
            rpc_port: DEFAULT_OBJECT_BUILDER_PORT,
        }
    }

    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }
}

impl ServiceLaunch for ObjectBuilder {
    fn role(&self) -> ServiceRole {
        ServiceRole::ObjectBuilder
    }

    fn fragments(&self) -> Vec<&dyn ConfigFragment> {
        vec![&self.input, &self.services, &self.monitoring]
    }

    fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            (COMMUNICATION_METHOD.0, COMMUNICATION_METHOD.1.to_string()),
            ("INPUT_PORT", self.rpc_port.to_string()),
        ]
    }

    fn rpc_port(&self) -> Option<u16> {
        Some(self.rpc_port)
    }
}
