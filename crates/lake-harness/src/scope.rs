//! Per-case scope guard pairing every start with a stop.
//!
//! A [`TestScope`] owns the case's [`Environment`], the services launched
//! against it and any extra teardown the test registers. [`run_scoped`]
//! guarantees the whole lot is torn down whether the test body returns,
//! fails or panics.

use crate::cleanup::CleanupStack;
use crate::environment::{Environment, ProvisioningError, RequiredResources};
use crate::process::{LaunchError, ServiceLaunch, ServiceProcess, ServiceProcessManager};
use crate::settings::HarnessSettings;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tracing::{info, warn};

/// Failure of a scoped test run.
#[derive(Debug, Error)]
pub enum ScopeError<E> {
    #[error("Environment provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Test body failed: {0}")]
    Body(E),
}

/// Resources owned by one test case.
pub struct TestScope {
    environment: Environment,
    processes: Vec<ServiceProcess>,
    cleanup: CleanupStack,
    finished: bool,
}

impl TestScope {
    pub async fn start(
        settings: &HarnessSettings,
        required: RequiredResources,
    ) -> Result<Self, ProvisioningError> {
        let environment = Environment::start(settings, required).await?;
        Ok(Self {
            environment,
            processes: Vec::new(),
            cleanup: CleanupStack::new(),
            finished: false,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    /// Launch a service and register it for teardown.
    ///
    /// The process is registered before spawning, so a failed spawn is
    /// still stopped (as a no-op) at finish.
    pub fn start_service(
        &mut self,
        manager: &ServiceProcessManager,
        launch: &dyn ServiceLaunch,
    ) -> Result<&mut ServiceProcess, LaunchError> {
        let process = manager.prepare(launch)?;
        let process = self.launch(process);
        process.spawn()?;
        Ok(process)
    }

    /// Register an already prepared or started process.
    pub fn launch(&mut self, process: ServiceProcess) -> &mut ServiceProcess {
        self.processes.push(process);
        let last = self.processes.len() - 1;
        &mut self.processes[last]
    }

    /// Register an extra teardown step, run after services stop and before
    /// the environment does.
    pub fn defer<F, E>(&mut self, name: impl Into<String>, step: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.cleanup.push(name, step);
    }

    pub fn processes(&self) -> &[ServiceProcess] {
        &self.processes
    }

    /// Stop services newest first, run deferred steps, then stop the
    /// environment. Idempotent.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        while let Some(mut process) = self.processes.pop() {
            process.stop().await;
        }

        let failures = self.cleanup.run().await;
        if failures > 0 {
            warn!(target: "lake.env", failures, "Deferred teardown steps failed");
        }

        self.environment.stop().await;
        info!(target: "lake.env", "Test scope finished");
    }
}

impl std::fmt::Debug for TestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestScope")
            .field("environment", &self.environment)
            .field("processes", &self.processes)
            .field("deferred", &self.cleanup.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                target: "lake.env",
                processes = self.processes.len(),
                deferred = self.cleanup.len(),
                "Test scope dropped without finish()"
            );
        }
    }
}

/// Run `body` inside a fresh [`TestScope`] and always finish it.
///
/// A panic in `body`, while building its future or while polling it, is
/// resumed after teardown completes.
///
/// ```ignore
/// let rows = run_scoped(&settings, RequiredResources::none().postgres(), |scope| {
///     async move {
///         let store = scope.environment().relational_store().cloned();
///         // ...
///         Ok::<_, anyhow::Error>(store)
///     }
///     .boxed()
/// })
/// .await?;
/// ```
pub async fn run_scoped<T, E, F>(
    settings: &HarnessSettings,
    required: RequiredResources,
    body: F,
) -> Result<T, ScopeError<E>>
where
    F: for<'a> FnOnce(&'a mut TestScope) -> BoxFuture<'a, Result<T, E>>,
{
    let mut scope = TestScope::start(settings, required).await?;

    let scope_ref = &mut scope;
    let outcome = AssertUnwindSafe(async move { body(scope_ref).await })
        .catch_unwind()
        .await;
    scope.finish().await;

    match outcome {
        Ok(result) => result.map_err(ScopeError::Body),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
