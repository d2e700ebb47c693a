//! Ordered teardown steps.
//!
//! Steps run last-registered-first, and every step runs even if an earlier
//! one failed. Failures are logged and counted, never returned, so teardown
//! can not mask the error that ended the test.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

type Step = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

#[derive(Default)]
pub struct CleanupStack {
    steps: Vec<(String, Step)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. It runs before every step registered earlier.
    pub fn push<F, E>(&mut self, name: impl Into<String>, step: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let step: Step = Box::pin(async move { step.await.map_err(|e| e.to_string()) });
        self.steps.push((name.into(), step));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run all steps in reverse registration order.
    ///
    /// Returns the number of failed steps.
    pub async fn run(&mut self) -> usize {
        let mut failures = 0;

        while let Some((name, step)) = self.steps.pop() {
            match step.await {
                Ok(()) => debug!(target: "lake.env", step = %name, "Cleanup step done"),
                Err(error) => {
                    failures += 1;
                    warn!(target: "lake.env", step = %name, error = %error, "Cleanup step failed");
                }
            }
        }

        failures
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(name, _)| name))
            .finish()
    }
}
