//! Retry policy and the execute/fallback loop shared by single and batch nodes.

use std::{fmt, time::Duration};

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{FlowError, Result};

/// How many times execute is attempted and how long to pause in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    wait: Duration,
}

impl RetryPolicy {
    /// `max_retries` counts total attempts and is clamped to at least one.
    pub fn new(max_retries: usize, wait: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            wait,
        }
    }

    /// A single attempt, no wait.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Phases of a single node visit.
///
/// `Prepared -> Executing -> (Succeeded | Retrying -> Executing | Fallback) -> Finalized`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPhase {
    Prepared,
    Executing,
    Succeeded,
    Retrying,
    Fallback,
    Finalized,
}

impl fmt::Display for VisitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            VisitPhase::Prepared => "prepared",
            VisitPhase::Executing => "executing",
            VisitPhase::Succeeded => "succeeded",
            VisitPhase::Retrying => "retrying",
            VisitPhase::Fallback => "fallback",
            VisitPhase::Finalized => "finalized",
        };
        f.write_str(phase)
    }
}

/// Run `attempt` until it succeeds or the policy is used up, then hand the
/// last error to `fallback`.
///
/// A fallback error is reported as [`FlowError::Exhausted`].
pub(crate) async fn execute_with_retry<'a, T, A, F>(
    node: &str,
    policy: &RetryPolicy,
    mut attempt: A,
    fallback: F,
) -> Result<T>
where
    A: FnMut(usize) -> BoxFuture<'a, Result<T>>,
    F: FnOnce(FlowError) -> BoxFuture<'a, Result<T>>,
{
    let max = policy.max_retries();
    let mut current = 0;

    loop {
        current += 1;
        debug!(node, attempt = current, max, phase = %VisitPhase::Executing);

        match attempt(current).await {
            Ok(output) => {
                debug!(node, attempt = current, phase = %VisitPhase::Succeeded);
                return Ok(output);
            }
            Err(error) if current < max => {
                warn!(
                    node,
                    attempt = current,
                    max,
                    %error,
                    phase = %VisitPhase::Retrying,
                    "execute failed, retrying"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("tutorflow_execute_retries_total", "node" => node.to_string())
                    .increment(1);
                if !policy.wait().is_zero() {
                    sleep(policy.wait()).await;
                }
            }
            Err(error) => {
                warn!(
                    node,
                    attempts = max,
                    %error,
                    phase = %VisitPhase::Fallback,
                    "retries exhausted"
                );
                #[cfg(feature = "metrics")]
                metrics::counter!("tutorflow_execute_fallbacks_total", "node" => node.to_string())
                    .increment(1);
                return fallback(error)
                    .await
                    .map_err(|source| FlowError::exhausted(node, max, source));
            }
        }
    }
}
