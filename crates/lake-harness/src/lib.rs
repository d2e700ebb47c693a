//! Data Lake Integration Test Harness
//!
//! This crate drives end-to-end tests of the data lake services: it
//! provisions the event log, relational store and series store, launches the
//! service executables with rendered configuration, publishes input events
//! and polls the stores until the eventually consistent results appear.
//!
//! # Features
//!
//! - `smoke`: Infra reachability and resource lifecycle (30s)
//! - `ingestion`: Command service into the relational and series stores
//! - `registry`: Edge and schema registry lifecycle, edge registry RPC
//! - `query`: Query router against a running schema registry
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. Kafka, Postgres and VictoriaMetrics reachable at the configured
//!    addresses, or `HARNESS_COMPOSE_FILE` naming a compose file that starts them
//! 2. Service executables on `PATH`, or located via `<ROLE_PREFIX>_EXE`
//!    (e.g. `COMMAND_SERVICE_EXE=target/debug/command-service`)
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs only unit tests (no default features)
//! cargo test
//!
//! # Smoke tests only (30s)
//! cargo test -p lake-harness --features smoke
//!
//! # Ingestion scenarios
//! cargo test -p lake-harness --features smoke,ingestion
//!
//! # Full suite
//! cargo test -p lake-harness --features all
//! ```

pub mod cleanup;
pub mod environment;
pub mod fixtures;
pub mod kafka;
pub mod logging;
pub mod poll;
pub mod process;
pub mod publisher;
pub mod scope;
pub mod services;
pub mod settings;

pub use environment::{Environment, ProvisioningError, RequiredResources};
pub use poll::{retrieve, ConsistencyCategory, PollOutcome, PollPolicy};
pub use process::{LaunchError, ServiceProcess, ServiceProcessManager, ServiceRole};
pub use publisher::{EventPublisher, PublishError};
pub use scope::{run_scoped, ScopeError, TestScope};
pub use settings::HarnessSettings;
