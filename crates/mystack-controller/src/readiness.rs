// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness waits for setup jobs and gated deployments.
//!
//! A wait moves through a small state machine:
//!
//! ```text
//!              poll
//!   ┌─────────┐───────► Ready
//!   │ PENDING │───────► Failed     (jobs only)
//!   └─────────┘───────► TimedOut   (elapsed >= timeout after a sleep)
//!     ▲     │  ───────► Cancelled  (cancel token set)
//!     └─────┘ sleep(period)
//! ```
//!
//! Backend fetch errors end the wait immediately; there is no retry.
//! Orchestration code depends only on [`ReadinessWaiter`], so a backend with
//! push notifications can supply its own waiter.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::backend::{BackendError, ClusterBackend, DeploymentStatus, JobStatus};
use crate::cluster::{Deployment, ResourceKind, SetupJob};
use crate::stack::{DEFAULT_PERIOD_SECONDS, DEFAULT_TIMEOUT_SECONDS};

/// Cancellation token for stopping a wait.
pub type CancelToken = Arc<AtomicBool>;

/// Errors ending a readiness wait.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadinessError {
    /// The setup job reported a failed pod.
    #[error("failed to run setup job '{name}': {reason}")]
    JobFailed {
        /// Job name.
        name: String,
        /// Failure reason reported by the backend.
        reason: String,
    },

    /// The deadline passed before the resource became ready.
    #[error("{kind} '{name}' did not become ready due to timeout after {}s", .timeout.as_secs())]
    Timeout {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name.
        name: String,
        /// Configured deadline.
        timeout: Duration,
        /// Number of status fetches made.
        polls: u32,
    },

    /// Fetching the status failed.
    #[error("failed to fetch {kind} '{name}': {source}")]
    Backend {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name.
        name: String,
        /// Backend failure.
        source: BackendError,
    },

    /// The wait was cancelled by the caller.
    #[error("wait for {kind} '{name}' cancelled")]
    Cancelled {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name.
        name: String,
    },
}

impl ReadinessError {
    /// True for [`ReadinessError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Outcome of a single status observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    /// Not ready yet.
    Pending,
    /// Success criterion met.
    Ready,
    /// The resource failed and will not become ready.
    Failed(String),
}

impl From<JobStatus> for ReadinessState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Self::Pending,
            JobStatus::Succeeded => Self::Ready,
            JobStatus::Failed(reason) => Self::Failed(reason),
        }
    }
}

impl From<DeploymentStatus> for ReadinessState {
    fn from(status: DeploymentStatus) -> Self {
        match status {
            DeploymentStatus::Ready => Self::Ready,
            DeploymentStatus::Pending { .. } => Self::Pending,
        }
    }
}

/// What to wait for and how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTarget {
    /// [`ResourceKind::Job`] or [`ResourceKind::Deployment`].
    pub kind: ResourceKind,
    /// Namespace.
    pub namespace: String,
    /// Resource name.
    pub name: String,
    /// Sleep between polls.
    pub period: Duration,
    /// Deadline measured from the start of the wait.
    pub timeout: Duration,
}

impl WaitTarget {
    /// Wait on a setup job using its configured timing.
    pub fn job(job: &SetupJob) -> Self {
        Self {
            kind: ResourceKind::Job,
            namespace: job.namespace.clone(),
            name: job.name.clone(),
            period: job.period,
            timeout: job.timeout,
        }
    }

    /// Wait on a deployment using its probe timing, or the defaults.
    pub fn deployment(deployment: &Deployment) -> Self {
        let (period, timeout) = match &deployment.readiness_probe {
            Some(probe) => (probe.period(), probe.timeout()),
            None => default_timing(),
        };
        Self {
            kind: ResourceKind::Deployment,
            namespace: deployment.namespace.clone(),
            name: deployment.name.clone(),
            period,
            timeout,
        }
    }

    /// Wait on a deployment by name with default timing.
    pub fn deployment_named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let (period, timeout) = default_timing();
        Self {
            kind: ResourceKind::Deployment,
            namespace: namespace.into(),
            name: name.into(),
            period,
            timeout,
        }
    }

    /// Override the timing.
    pub fn with_timing(mut self, period: Duration, timeout: Duration) -> Self {
        self.period = period;
        self.timeout = timeout;
        self
    }

    fn cancelled(&self) -> ReadinessError {
        ReadinessError::Cancelled {
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

fn default_timing() -> (Duration, Duration) {
    (
        Duration::from_secs(DEFAULT_PERIOD_SECONDS),
        Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
    )
}

/// Fetch the current readiness of `target` once.
pub async fn observe(
    backend: &dyn ClusterBackend,
    target: &WaitTarget,
) -> Result<ReadinessState, ReadinessError> {
    let fetched = match target.kind {
        ResourceKind::Job => backend
            .get_job(&target.namespace, &target.name)
            .await
            .map(ReadinessState::from),
        ResourceKind::Deployment => backend
            .get_deployment(&target.namespace, &target.name)
            .await
            .map(ReadinessState::from),
        other => Err(BackendError::Api(format!(
            "readiness is not tracked for {}",
            other
        ))),
    };
    fetched.map_err(|source| ReadinessError::Backend {
        kind: target.kind,
        name: target.name.clone(),
        source,
    })
}

/// Blocks until a resource is ready.
#[async_trait]
pub trait ReadinessWaiter: Send + Sync {
    /// Wait for `target`, honouring `cancel` if given.
    async fn wait(
        &self,
        backend: &dyn ClusterBackend,
        target: &WaitTarget,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ReadinessError>;
}

/// Waiter that polls the backend every `period` until `timeout`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingWaiter;

#[async_trait]
impl ReadinessWaiter for PollingWaiter {
    #[instrument(skip_all, fields(kind = %target.kind, name = %target.name, namespace = %target.namespace))]
    async fn wait(
        &self,
        backend: &dyn ClusterBackend,
        target: &WaitTarget,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ReadinessError> {
        let is_cancelled = || cancel.is_some_and(|token| token.load(Ordering::SeqCst));
        let start = Instant::now();
        let mut polls: u32 = 0;

        info!(
            period_secs = target.period.as_secs(),
            timeout_secs = target.timeout.as_secs(),
            "Waiting for readiness"
        );

        loop {
            if is_cancelled() {
                return Err(target.cancelled());
            }

            polls += 1;
            match observe(backend, target).await? {
                ReadinessState::Ready => {
                    info!(polls, elapsed_ms = start.elapsed().as_millis() as u64, "Ready");
                    return Ok(());
                }
                ReadinessState::Failed(reason) => {
                    return Err(ReadinessError::JobFailed {
                        name: target.name.clone(),
                        reason,
                    });
                }
                ReadinessState::Pending => debug!(polls, "Not ready yet"),
            }

            tokio::time::sleep(target.period).await;

            if is_cancelled() {
                return Err(target.cancelled());
            }
            if start.elapsed() >= target.timeout {
                return Err(ReadinessError::Timeout {
                    kind: target.kind,
                    name: target.name.clone(),
                    timeout: target.timeout,
                    polls,
                });
            }
        }
    }
}

/// Wait for `target` with the polling waiter and no cancellation.
///
/// Usable on its own to re-check readiness of an existing stack.
pub async fn wait_for_completion(
    backend: &dyn ClusterBackend,
    target: &WaitTarget,
) -> Result<(), ReadinessError> {
    PollingWaiter.wait(backend, target, None).await
}
