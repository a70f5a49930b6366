//! Deterministic release of build-time resources.
//!
//! Every resource created while building the router registers a teardown step here. Steps
//! run in registration order, each bounded by a timeout, and failures are collected rather
//! than stopping the remaining steps. Running a chain drains it, so no step runs twice.
use std::{fmt, future::Future, time::Duration};

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::ports::problem::BoxError;

/// Per-step bound used by [`TeardownChain::new`].
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

type Step = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Failures collected while running a teardown chain.
#[derive(Error, Debug)]
#[error("{}", format_failures(.failures))]
pub struct TeardownError {
    pub failures: Vec<(String, BoxError)>,
}

fn format_failures(failures: &[(String, BoxError)]) -> String {
    failures
        .iter()
        .map(|(label, err)| format!("teardown {label}: {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl TeardownError {
    /// Merge several optional failures into one.
    pub fn join(errors: impl IntoIterator<Item = TeardownError>) -> Option<TeardownError> {
        let failures: Vec<_> = errors.into_iter().flat_map(|e| e.failures).collect();
        (!failures.is_empty()).then_some(TeardownError { failures })
    }
}

#[derive(Error, Debug)]
#[error("timed out after {0:?}")]
struct StepTimeout(Duration);

pub struct TeardownChain {
    steps: Vec<(String, Step)>,
    step_timeout: Duration,
}

impl TeardownChain {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_STEP_TIMEOUT)
    }

    pub fn with_timeout(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    /// Register a step.
    pub fn add<F, Fut>(&mut self, label: impl Into<String>, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let step: Step = Box::new(move || -> BoxFuture<'static, _> { Box::pin(f()) });
        self.steps.push((label.into(), step));
    }

    /// Move every step of `other` to the end of this chain.
    pub fn append(&mut self, mut other: TeardownChain) {
        self.steps.append(&mut other.steps);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run and drain every registered step.
    pub async fn run(&mut self) -> Result<(), TeardownError> {
        let mut failures = Vec::new();

        for (label, step) in self.steps.drain(..) {
            tracing::debug!("Running teardown step {}", label);
            let outcome = match tokio::time::timeout(self.step_timeout, step()).await {
                Ok(result) => result,
                Err(_) => Err(Box::new(StepTimeout(self.step_timeout)) as BoxError),
            };
            if let Err(err) = outcome {
                tracing::warn!("Teardown step {} failed: {}", label, err);
                failures.push((label, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}

impl Default for TeardownChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TeardownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(label, _)| label))
            .finish()
    }
}
