//! Bounded polling for eventually consistent state.
//!
//! The system under test processes records asynchronously, so a write made
//! through the event log only becomes visible in a store after some delay.
//! [`retrieve`] turns "eventually visible" into a terminal [`PollOutcome`]
//! within a fixed attempt budget.
//!
//! # Example
//!
//! ```no_run
//! use lake_harness::poll::{retrieve_count, ConsistencyCategory, PollPolicy};
//!
//! # async fn fetch_rows() -> Result<Vec<u32>, std::io::Error> { Ok(vec![]) }
//! # async fn run() {
//! let policy = PollPolicy::for_category(ConsistencyCategory::RelationalWrite);
//! let rows = retrieve_count(fetch_rows, 3, &policy)
//!     .await
//!     .into_result()
//!     .expect("three rows should become visible");
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial * factor^n`, capped at `max`.
    Exponential {
        initial: Duration,
        factor: u32,
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait after the given (1-based) unsatisfied attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = factor.checked_pow(exponent).unwrap_or(u32::MAX);
                initial.saturating_mul(multiplier).min(max)
            }
        }
    }
}

/// Attempt budget for one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl PollPolicy {
    /// A policy with at least one attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self::new(
            max_attempts,
            Backoff::Exponential {
                initial,
                factor: 2,
                max,
            },
        )
    }

    /// Policy sized for a consistency category.
    pub fn for_category(category: ConsistencyCategory) -> Self {
        match category {
            ConsistencyCategory::RelationalWrite => {
                Self::fixed(20, Duration::from_millis(500))
            }
            ConsistencyCategory::SeriesIngest => Self::fixed(40, Duration::from_secs(1)),
            ConsistencyCategory::ServiceStartup => {
                Self::exponential(30, Duration::from_millis(100), Duration::from_secs(2))
            }
            ConsistencyCategory::InfraReadiness => Self::fixed(60, Duration::from_secs(1)),
        }
    }

    /// Sum of all sleeps a fully exhausted retrieval performs.
    ///
    /// There is no sleep after the final attempt.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Categories of eventual consistency observed against the lake services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyCategory {
    /// Command service consuming a record and committing it to Postgres (~10s)
    RelationalWrite,

    /// Series store ingest plus its in-memory buffer flush (~40s)
    SeriesIngest,

    /// A spawned service binding its listener
    ServiceStartup,

    /// Broker and stores accepting connections after compose up (~60s)
    InfraReadiness,
}

/// Terminal result of a bounded retrieval.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T, E> {
    /// The predicate held. `attempts` is the number of fetches performed.
    Satisfied { value: T, attempts: u32 },
    /// Every attempt fetched a value and none satisfied the predicate.
    Exhausted { last: Option<T>, attempts: u32 },
    /// The final attempt's fetch failed.
    Failed {
        error: E,
        last: Option<T>,
        attempts: u32,
    },
    /// The cancellation token fired between attempts.
    Cancelled { last: Option<T>, attempts: u32 },
}

impl<T, E> PollOutcome<T, E> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Satisfied { attempts, .. }
            | PollOutcome::Exhausted { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Split into the last-seen value and an error, if the retrieval fell short.
    ///
    /// This is the shape of the `(actual, error)` pair test bodies usually
    /// assert on: the actual value is reported even when polling timed out.
    pub fn into_pair(self) -> (Option<T>, Option<PollError<E>>) {
        match self {
            PollOutcome::Satisfied { value, .. } => (Some(value), None),
            PollOutcome::Exhausted { last, attempts } => {
                (last, Some(PollError::Timeout { attempts }))
            }
            PollOutcome::Failed {
                error,
                last,
                attempts,
            } => (last, Some(PollError::Fetch { attempts, error })),
            PollOutcome::Cancelled { last, attempts } => {
                (last, Some(PollError::Cancelled { attempts }))
            }
        }
    }

    pub fn into_result(self) -> Result<T, PollError<E>> {
        match self {
            PollOutcome::Satisfied { value, .. } => Ok(value),
            PollOutcome::Exhausted { attempts, .. } => Err(PollError::Timeout { attempts }),
            PollOutcome::Failed {
                error, attempts, ..
            } => Err(PollError::Fetch { attempts, error }),
            PollOutcome::Cancelled { attempts, .. } => Err(PollError::Cancelled { attempts }),
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("Condition not met after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Fetch failed on final attempt {attempts}: {error}")]
    Fetch { attempts: u32, error: E },

    #[error("Polling cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Poll `fetch` until `satisfied` holds or the policy's attempts run out.
///
/// A fetch error counts as an unsatisfied attempt and polling continues. If
/// the final attempt's fetch failed, the outcome is [`PollOutcome::Failed`];
/// otherwise an exhausted budget yields [`PollOutcome::Exhausted`].
pub async fn retrieve<T, E, F, Fut, P>(fetch: F, satisfied: P, policy: &PollPolicy) -> PollOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
    E: fmt::Display,
{
    retrieve_until_cancelled(fetch, satisfied, policy, &CancellationToken::new()).await
}

/// Like [`retrieve`], but stops early once `cancel` fires.
///
/// The token is observed while sleeping between attempts, never in the
/// middle of a fetch.
pub async fn retrieve_until_cancelled<T, E, F, Fut, P>(
    mut fetch: F,
    mut satisfied: P,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> PollOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last: Option<T> = None;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(target: "lake.poll", attempts = attempt, "Polling cancelled");
            return PollOutcome::Cancelled {
                last,
                attempts: attempt,
            };
        }

        attempt += 1;

        let final_error = match fetch().await {
            Ok(value) if satisfied(&value) => {
                debug!(target: "lake.poll", attempts = attempt, "Condition satisfied");
                return PollOutcome::Satisfied {
                    value,
                    attempts: attempt,
                };
            }
            Ok(value) => {
                last = Some(value);
                None
            }
            Err(error) => {
                debug!(
                    target: "lake.poll",
                    attempt = attempt,
                    error = %error,
                    "Fetch failed, will retry"
                );
                Some(error)
            }
        };

        if attempt >= max_attempts {
            return match final_error {
                Some(error) => {
                    warn!(
                        target: "lake.poll",
                        attempts = attempt,
                        error = %error,
                        "Polling failed on final attempt"
                    );
                    PollOutcome::Failed {
                        error,
                        last,
                        attempts: attempt,
                    }
                }
                None => {
                    warn!(target: "lake.poll", attempts = attempt, "Polling exhausted");
                    PollOutcome::Exhausted {
                        last,
                        attempts: attempt,
                    }
                }
            };
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "lake.poll", attempts = attempt, "Polling cancelled");
                return PollOutcome::Cancelled { last, attempts: attempt };
            }
            _ = sleep(policy.backoff.delay_after(attempt)) => {}
        }
    }
}

/// Poll a collection until it holds at least `expected_len` items.
pub async fn retrieve_count<T, E, F, Fut>(
    fetch: F,
    expected_len: usize,
    policy: &PollPolicy,
) -> PollOutcome<Vec<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
    E: fmt::Display,
{
    retrieve(fetch, |items: &Vec<T>| items.len() >= expected_len, policy).await
}
