//! Managed service processes.
//!
//! Every service under test is an externally built executable configured
//! purely through environment variables (plus, for the command service, a
//! positional plugin argument). [`ServiceProcessManager`] turns a
//! [`ServiceLaunch`] description into a spawned child, and [`ServiceProcess`]
//! guarantees that child is killed and reaped exactly once.
//!
//! # Lifecycle
//!
//! ```text
//! Created --spawn--> Running --stop--> Stopped
//!    |                                    ^
//!    +--------------stop------------------+
//! ```
//!
//! `Stopped` is terminal. `stop()` is idempotent, and `Drop` kills a child
//! that was never stopped.

use crate::poll::{retrieve, PollPolicy};
use crate::settings::HarnessSettings;
use common::config::{BackendKind, ConfigFragment, LaunchEnv, StorageConfig};
use common::error::EnvError;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long `stop()` waits for a killed child to be reaped.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The services the harness knows how to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceRole {
    /// Ingestion: consumes the input topic and persists into a storage backend.
    CommandService,
    QueryRouter,
    EdgeRegistry,
    SchemaRegistry,
    ObjectBuilder,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 5] = [
        ServiceRole::CommandService,
        ServiceRole::QueryRouter,
        ServiceRole::EdgeRegistry,
        ServiceRole::SchemaRegistry,
        ServiceRole::ObjectBuilder,
    ];

    /// Prefix of every environment variable the service reads.
    pub fn env_prefix(self) -> &'static str {
        match self {
            ServiceRole::CommandService => "COMMAND_SERVICE",
            ServiceRole::QueryRouter => "QUERY_ROUTER",
            ServiceRole::EdgeRegistry => "EDGE_REGISTRY",
            ServiceRole::SchemaRegistry => "SCHEMA_REGISTRY",
            ServiceRole::ObjectBuilder => "OBJECT_BUILDER",
        }
    }

    /// Binary name, also used as the OTEL service name.
    pub fn executable_name(self) -> &'static str {
        match self {
            ServiceRole::CommandService => "command-service",
            ServiceRole::QueryRouter => "query-router",
            ServiceRole::EdgeRegistry => "edge-registry",
            ServiceRole::SchemaRegistry => "schema-registry",
            ServiceRole::ObjectBuilder => "object-builder",
        }
    }

    /// Storage backends the role can persist into. Empty for stateless roles.
    pub fn supported_backends(self) -> &'static [BackendKind] {
        match self {
            ServiceRole::CommandService => &[
                BackendKind::Postgres,
                BackendKind::VictoriaMetrics,
                BackendKind::Druid,
            ],
            ServiceRole::EdgeRegistry | ServiceRole::SchemaRegistry => &[BackendKind::Postgres],
            ServiceRole::QueryRouter | ServiceRole::ObjectBuilder => &[],
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable_name())
    }
}

/// Launch description for one service role.
///
/// Implementors supply configuration; rendering, backend checks and
/// spawning are shared in [`ServiceProcessManager`].
pub trait ServiceLaunch {
    fn role(&self) -> ServiceRole;

    /// Storage the service persists into, if any.
    fn storage(&self) -> Option<&StorageConfig> {
        None
    }

    /// Whether the storage backend's plugin name is passed as the first
    /// positional argument.
    fn plugin_argument(&self) -> bool {
        false
    }

    /// Fragments rendered under the role prefix, excluding storage.
    fn fragments(&self) -> Vec<&dyn ConfigFragment>;

    /// Top-level settings rendered as `<PREFIX>_<KEY>`.
    fn settings(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Local port the service accepts RPC/HTTP requests on.
    fn rpc_port(&self) -> Option<u16> {
        None
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{role} does not support the {backend} storage backend")]
    UnsupportedBackend {
        role: ServiceRole,
        backend: BackendKind,
    },

    #[error("Launch environment for {role} sets {key} twice")]
    DuplicateKey { role: ServiceRole, key: String },

    #[error("Invalid launch environment for {role}: {source}")]
    Environment {
        role: ServiceRole,
        #[source]
        source: EnvError,
    },

    #[error("Failed to spawn {role} from {}: {source}", .path.display())]
    Spawn {
        role: ServiceRole,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} has already been stopped")]
    AlreadyStopped { role: ServiceRole },

    #[error("{role} exited unexpectedly with {status}")]
    Exited { role: ServiceRole, status: ExitStatus },

    #[error("Failed to query {role} status: {source}")]
    Status {
        role: ServiceRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} has no RPC port configured")]
    NoRpcPort { role: ServiceRole },

    #[error("{role} not listening on {addr} after {attempts} attempts")]
    NotListening {
        role: ServiceRole,
        addr: SocketAddr,
        attempts: u32,
    },
}

impl LaunchError {
    fn from_env(role: ServiceRole, err: EnvError) -> Self {
        match err {
            EnvError::DuplicateKey { key } => LaunchError::DuplicateKey { role, key },
            other => LaunchError::Environment {
                role,
                source: other,
            },
        }
    }
}

/// Fully rendered launch: environment, arguments and RPC port.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub role: ServiceRole,
    pub env: LaunchEnv,
    pub args: Vec<String>,
    pub rpc_port: Option<u16>,
}

/// Render a launch description without spawning anything.
///
/// The storage backend is checked first, so an unsupported backend is
/// reported even if other fragments would also be invalid.
pub fn render_launch(launch: &dyn ServiceLaunch) -> Result<LaunchPlan, LaunchError> {
    let role = launch.role();
    let prefix = role.env_prefix();
    let to_launch_err = |e| LaunchError::from_env(role, e);

    let backend = match launch.storage() {
        Some(storage) => {
            let backend = storage.kind();
            if !role.supported_backends().contains(&backend) {
                return Err(LaunchError::UnsupportedBackend { role, backend });
            }
            Some(backend)
        }
        None => None,
    };

    let mut env = LaunchEnv::new();
    for fragment in launch.fragments() {
        env.merge(fragment.render(prefix).map_err(to_launch_err)?)
            .map_err(to_launch_err)?;
    }

    if let Some(storage) = launch.storage() {
        env.merge(storage.fragment().render(prefix).map_err(to_launch_err)?)
            .map_err(to_launch_err)?;
    }

    for (key, value) in launch.settings() {
        env.insert(format!("{prefix}_{key}"), value)
            .map_err(to_launch_err)?;
    }

    let args = match backend {
        Some(backend) if launch.plugin_argument() => vec![backend.plugin_name().to_string()],
        _ => Vec::new(),
    };

    Ok(LaunchPlan {
        role,
        env,
        args,
        rpc_port: launch.rpc_port(),
    })
}

/// Lifecycle state of a [`ServiceProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Stopped,
}

/// Spawns service executables resolved from [`HarnessSettings`].
#[derive(Debug, Clone)]
pub struct ServiceProcessManager {
    settings: HarnessSettings,
}

impl ServiceProcessManager {
    pub fn new(settings: &HarnessSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Override the executable for one role.
    pub fn with_executable(mut self, role: ServiceRole, path: impl Into<PathBuf>) -> Self {
        self.settings.executables.insert(role, path.into());
        self
    }

    pub fn executable(&self, role: ServiceRole) -> PathBuf {
        self.settings.executable(role)
    }

    /// Render and validate a launch, returning a process in `Created` state.
    ///
    /// Nothing is spawned.
    pub fn prepare(&self, launch: &dyn ServiceLaunch) -> Result<ServiceProcess, LaunchError> {
        let plan = render_launch(launch)?;
        let path = self.executable(plan.role);

        let mut command = Command::new(&path);
        command
            .args(&plan.args)
            .env_clear()
            .envs(self.settings.passthrough_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(plan.env.iter())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(
            target: "lake.process",
            role = %plan.role,
            path = %path.display(),
            env = ?plan.env,
            args = ?plan.args,
            "Prepared service launch"
        );

        Ok(ServiceProcess {
            role: plan.role,
            path,
            state: ProcessState::Created,
            command: Some(command),
            child: None,
            env: plan.env,
            args: plan.args,
            rpc_port: plan.rpc_port,
        })
    }

    /// Prepare and spawn a service.
    pub async fn start(&self, launch: &dyn ServiceLaunch) -> Result<ServiceProcess, LaunchError> {
        let mut process = self.prepare(launch)?;
        process.spawn()?;
        Ok(process)
    }
}

/// One managed child process.
pub struct ServiceProcess {
    role: ServiceRole,
    path: PathBuf,
    state: ProcessState,
    command: Option<Command>,
    child: Option<Child>,
    env: LaunchEnv,
    args: Vec<String>,
    rpc_port: Option<u16>,
}

impl ServiceProcess {
    pub fn role(&self) -> ServiceRole {
        self.role
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn executable(&self) -> &Path {
        &self.path
    }

    /// Environment the child receives on top of the pass-through variables.
    pub fn environment(&self) -> &LaunchEnv {
        &self.env
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// OS process id while running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Address clients use to reach the service's RPC port.
    pub fn rpc_address(&self) -> Option<SocketAddr> {
        self.rpc_port
            .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    /// Spawn the child. Only valid in `Created`; a no-op when `Running`.
    ///
    /// A failed spawn leaves the process `Stopped`.
    pub fn spawn(&mut self) -> Result<(), LaunchError> {
        match self.state {
            ProcessState::Running => return Ok(()),
            ProcessState::Stopped => return Err(LaunchError::AlreadyStopped { role: self.role }),
            ProcessState::Created => {}
        }

        let Some(mut command) = self.command.take() else {
            self.state = ProcessState::Stopped;
            return Err(LaunchError::AlreadyStopped { role: self.role });
        };

        match command.spawn() {
            Ok(child) => {
                info!(
                    target: "lake.process",
                    role = %self.role,
                    pid = ?child.id(),
                    args = ?self.args,
                    "Service started"
                );
                self.child = Some(child);
                self.state = ProcessState::Running;
                Ok(())
            }
            Err(source) => {
                self.state = ProcessState::Stopped;
                Err(LaunchError::Spawn {
                    role: self.role,
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Fail if the child has exited on its own.
    pub fn ensure_running(&mut self) -> Result<(), LaunchError> {
        let role = self.role;
        match (&self.state, self.child.as_mut()) {
            (ProcessState::Running, Some(child)) => match child.try_wait() {
                Ok(None) => Ok(()),
                Ok(Some(status)) => Err(LaunchError::Exited { role, status }),
                Err(source) => Err(LaunchError::Status { role, source }),
            },
            (ProcessState::Stopped, _) => Err(LaunchError::AlreadyStopped { role }),
            _ => Ok(()),
        }
    }

    /// Wait until the RPC port accepts TCP connections.
    ///
    /// If the port never opens and the child has died, the exit is reported
    /// instead of the timeout.
    pub async fn wait_until_listening(
        &mut self,
        policy: &PollPolicy,
    ) -> Result<SocketAddr, LaunchError> {
        let addr = self
            .rpc_address()
            .ok_or(LaunchError::NoRpcPort { role: self.role })?;

        let outcome = retrieve(
            || async move { tokio::net::TcpStream::connect(addr).await.map(|_| ()) },
            |_| true,
            policy,
        )
        .await;

        if outcome.is_satisfied() {
            debug!(target: "lake.process", role = %self.role, %addr, "Service listening");
            return Ok(addr);
        }

        self.ensure_running()?;
        Err(LaunchError::NotListening {
            role: self.role,
            addr,
            attempts: outcome.attempts(),
        })
    }

    /// Kill and reap the child.
    ///
    /// Idempotent: later calls, and calls after a failed spawn, do nothing.
    /// Problems are logged, never returned.
    pub async fn stop(&mut self) {
        if self.state == ProcessState::Stopped {
            return;
        }

        self.command = None;
        self.state = ProcessState::Stopped;

        let Some(mut child) = self.child.take() else {
            debug!(target: "lake.process", role = %self.role, "Stopped before spawn");
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            warn!(
                target: "lake.process",
                role = %self.role,
                %status,
                "Service had already exited"
            );
            return;
        }

        if let Err(e) = child.start_kill() {
            warn!(target: "lake.process", role = %self.role, error = %e, "Failed to signal service");
        }

        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                info!(target: "lake.process", role = %self.role, %status, "Service stopped");
            }
            Ok(Err(e)) => {
                warn!(target: "lake.process", role = %self.role, error = %e, "Failed to reap service");
            }
            Err(_) => {
                warn!(
                    target: "lake.process",
                    role = %self.role,
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "Service did not exit after kill"
                );
            }
        }
    }
}

impl fmt::Debug for ServiceProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProcess")
            .field("role", &self.role)
            .field("path", &self.path)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("args", &self.args)
            .field("env", &self.env)
            .finish()
    }
}

impl Drop for ServiceProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!(
                target: "lake.process",
                role = %self.role,
                "Service dropped without stop(), killing"
            );
            // Synchronous signal; the runtime reaps the orphan.
            let _ = child.start_kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use common::config::{
        DruidConfig, KafkaInputConfig, MonitoringConfig, PostgresConfig, VictoriaMetricsConfig,
    };
    use std::os::unix::fs::PermissionsExt;

    struct TestLaunch {
        role: ServiceRole,
        storage: Option<StorageConfig>,
        input: KafkaInputConfig,
        monitoring: MonitoringConfig,
        duplicate_input: bool,
        rpc_port: Option<u16>,
    }

    impl TestLaunch {
        fn new(role: ServiceRole, storage: Option<StorageConfig>) -> Self {
            Self {
                role,
                storage,
                input: KafkaInputConfig::new("localhost:9092", "cdl.test.input"),
                monitoring: MonitoringConfig::new(role.executable_name()),
                duplicate_input: false,
                rpc_port: None,
            }
        }
    }

    impl ServiceLaunch for TestLaunch {
        fn role(&self) -> ServiceRole {
            self.role
        }

        fn storage(&self) -> Option<&StorageConfig> {
            self.storage.as_ref()
        }

        fn plugin_argument(&self) -> bool {
            self.role == ServiceRole::CommandService
        }

        fn fragments(&self) -> Vec<&dyn ConfigFragment> {
            let mut fragments: Vec<&dyn ConfigFragment> = vec![&self.input, &self.monitoring];
            if self.duplicate_input {
                fragments.push(&self.input);
            }
            fragments
        }

        fn settings(&self) -> Vec<(&'static str, String)> {
            vec![("COMMUNICATION_METHOD", "kafka".to_string())]
        }

        fn rpc_port(&self) -> Option<u16> {
            self.rpc_port
        }
    }

    fn script(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lake-harness-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create script dir");
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    fn manager_with(role: ServiceRole, path: &Path) -> ServiceProcessManager {
        let vars: HashMap<String, String> = std::env::var("PATH")
            .map(|p| HashMap::from([("PATH".to_string(), p)]))
            .unwrap_or_default();
        let settings = HarnessSettings::from_vars(&vars).expect("settings load");
        ServiceProcessManager::new(&settings).with_executable(role, path)
    }

    #[test]
    fn test_manager_resolves_executables_like_settings() {
        let vars = HashMap::from([(
            "QUERY_ROUTER_EXE".to_string(),
            "/opt/cdl/bin/query-router".to_string(),
        )]);
        let settings = HarnessSettings::from_vars(&vars).expect("settings load");

        let manager = ServiceProcessManager::new(&settings)
            .with_executable(ServiceRole::EdgeRegistry, "/tmp/edge-registry");

        for role in ServiceRole::ALL {
            if role != ServiceRole::EdgeRegistry {
                assert_eq!(manager.executable(role), settings.executable(role));
            }
        }
        assert_eq!(
            manager.executable(ServiceRole::QueryRouter),
            PathBuf::from("/opt/cdl/bin/query-router")
        );
        assert_eq!(
            manager.executable(ServiceRole::EdgeRegistry),
            PathBuf::from("/tmp/edge-registry")
        );
        assert_eq!(
            manager.executable(ServiceRole::ObjectBuilder),
            PathBuf::from(ServiceRole::ObjectBuilder.executable_name())
        );
        // The manager's override does not leak into the caller's settings.
        assert_eq!(
            settings.executable(ServiceRole::EdgeRegistry),
            PathBuf::from("edge-registry")
        );
    }

    #[test]
    fn test_render_command_service_postgres() {
        let launch = TestLaunch::new(
            ServiceRole::CommandService,
            Some(PostgresConfig::default().into()),
        );

        let plan = render_launch(&launch).expect("launch renders");

        assert_eq!(plan.args, vec!["postgres".to_string()]);
        assert_eq!(
            plan.env.get("COMMAND_SERVICE_KAFKA__INGEST_TOPIC"),
            Some("cdl.test.input")
        );
        assert_eq!(plan.env.get("COMMAND_SERVICE_POSTGRES__SCHEMA"), Some("cdlgrpc"));
        assert_eq!(
            plan.env.get("COMMAND_SERVICE_COMMUNICATION_METHOD"),
            Some("kafka")
        );
        assert_eq!(
            plan.env.get("COMMAND_SERVICE_MONITORING__OTEL_SERVICE_NAME"),
            Some("command-service")
        );
        assert!(plan.env.iter().all(|(k, _)| k.starts_with("COMMAND_SERVICE_")));
    }

    #[test]
    fn test_plugin_selected_from_storage_variant() {
        let cases: [(StorageConfig, &str); 3] = [
            (PostgresConfig::default().into(), "postgres"),
            (VictoriaMetricsConfig::new("http://vm:8428").into(), "victoria-metrics"),
            (
                DruidConfig {
                    topic: "cdl.druid".to_string(),
                }
                .into(),
                "druid",
            ),
        ];

        for (storage, plugin) in cases {
            let launch = TestLaunch::new(ServiceRole::CommandService, Some(storage));
            let plan = render_launch(&launch).expect("launch renders");
            assert_eq!(plan.args, vec![plugin.to_string()]);
        }
    }

    #[test]
    fn test_duplicate_fragment_is_rejected() {
        let mut launch = TestLaunch::new(ServiceRole::QueryRouter, None);
        launch.duplicate_input = true;

        let err = render_launch(&launch).expect_err("duplicate should fail");
        assert!(matches!(
            err,
            LaunchError::DuplicateKey { role: ServiceRole::QueryRouter, ref key } if key.starts_with("QUERY_ROUTER_KAFKA__")
        ));
    }

    #[tokio::test]
    async fn test_unsupported_backend_spawns_nothing() {
        let marker = std::env::temp_dir().join(format!("lake-harness-marker-{}", uuid::Uuid::new_v4()));
        let path = script(
            "edge-registry",
            &format!("touch {}\nexec sleep 30", marker.display()),
        );
        let manager = manager_with(ServiceRole::EdgeRegistry, &path);
        let launch = TestLaunch::new(
            ServiceRole::EdgeRegistry,
            Some(VictoriaMetricsConfig::new("http://vm:8428").into()),
        );

        let err = manager.start(&launch).await.expect_err("should be rejected");

        assert!(matches!(
            err,
            LaunchError::UnsupportedBackend {
                role: ServiceRole::EdgeRegistry,
                backend: BackendKind::VictoriaMetrics
            }
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists(), "no process should have been spawned");
    }

    #[tokio::test]
    async fn test_start_then_stop_twice() {
        let path = script("command-service", "exec sleep 30");
        let manager = manager_with(ServiceRole::CommandService, &path);
        let launch = TestLaunch::new(
            ServiceRole::CommandService,
            Some(PostgresConfig::default().into()),
        );

        let mut process = manager.start(&launch).await.expect("service starts");
        assert_eq!(process.state(), ProcessState::Running);
        assert!(process.pid().is_some());
        process.ensure_running().expect("still running");

        process.stop().await;
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(process.pid().is_none());

        process.stop().await;
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_child_receives_rendered_environment_only() {
        let out = std::env::temp_dir().join(format!("lake-harness-env-{}", uuid::Uuid::new_v4()));
        let path = script(
            "query-router",
            &format!(
                "env > {0}.tmp && mv {0}.tmp {0}\nexec sleep 30",
                out.display()
            ),
        );
        let manager = manager_with(ServiceRole::QueryRouter, &path);
        let launch = TestLaunch::new(ServiceRole::QueryRouter, None);

        let mut process = manager.start(&launch).await.expect("service starts");

        let mut dumped = String::new();
        for _ in 0..50 {
            dumped = std::fs::read_to_string(&out).unwrap_or_default();
            if !dumped.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        process.stop().await;

        assert!(dumped.contains("QUERY_ROUTER_KAFKA__BROKERS=localhost:9092"));
        assert!(!dumped.contains("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_stopped() {
        let manager = manager_with(
            ServiceRole::ObjectBuilder,
            Path::new("/nonexistent/object-builder"),
        );
        let launch = TestLaunch::new(ServiceRole::ObjectBuilder, None);

        let mut process = manager.prepare(&launch).expect("launch prepares");
        assert_eq!(process.state(), ProcessState::Created);

        let err = process.spawn().expect_err("spawn should fail");
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert_eq!(process.state(), ProcessState::Stopped);

        process.stop().await;
        assert!(matches!(
            process.spawn(),
            Err(LaunchError::AlreadyStopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_spawn() {
        let manager = manager_with(ServiceRole::ObjectBuilder, Path::new("/bin/true"));
        let mut process = manager
            .prepare(&TestLaunch::new(ServiceRole::ObjectBuilder, None))
            .expect("launch prepares");

        process.stop().await;

        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_exited_child_is_reported() {
        let path = script("schema-registry", "exit 3");
        let manager = manager_with(ServiceRole::SchemaRegistry, &path);
        let mut launch = TestLaunch::new(ServiceRole::SchemaRegistry, None);
        launch.rpc_port = Some(1);

        let mut process = manager.start(&launch).await.expect("service starts");
        let policy = PollPolicy::fixed(5, Duration::from_millis(50));

        let err = process
            .wait_until_listening(&policy)
            .await
            .expect_err("port 1 never opens");

        assert!(matches!(err, LaunchError::Exited { role: ServiceRole::SchemaRegistry, .. }));
        process.stop().await;
    }

    #[test]
    fn test_rpc_address_is_localhost() {
        let manager = ServiceProcessManager::new(&HarnessSettings::default());
        let mut launch = TestLaunch::new(ServiceRole::QueryRouter, None);
        launch.rpc_port = Some(50103);

        let process = manager.prepare(&launch).expect("launch prepares");

        assert_eq!(
            process.rpc_address(),
            Some(SocketAddr::from(([127, 0, 0, 1], 50103)))
        );
    }
}
