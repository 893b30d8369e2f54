// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster backend trait definitions.
//!
//! Defines the abstract interface to the orchestration platform that runs
//! a stack's containers.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::cluster::{Deployment, NamespaceSpec, Service, SetupJob, VolumeClaim};

/// Errors from backend operations.
///
/// Backends that only report free-form messages should go through
/// [`BackendError::from_message`] so that conflicts and missing resources
/// are still told apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The resource (or its namespace) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Any other API failure.
    #[error("backend error: {0}")]
    Api(String),
}

impl BackendError {
    /// Classify a backend message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("already exists") {
            Self::AlreadyExists(message)
        } else if lower.contains("not found") {
            Self::NotFound(message)
        } else if lower.contains("connection refused") || lower.contains("timed out") {
            Self::Unavailable(message)
        } else {
            Self::Api(message)
        }
    }

    /// True for [`BackendError::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True for [`BackendError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Observed state of a setup job.
///
/// Serializes as `"pending"`, `"succeeded"` or `{"failed": "<reason>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Neither succeeded nor failed yet.
    Pending,
    /// At least one pod completed successfully.
    Succeeded,
    /// At least one pod failed.
    Failed(String),
}

impl JobStatus {
    /// Derive the status from pod counts. Success takes precedence.
    pub fn from_counts(succeeded: i32, failed: i32, reason: Option<String>) -> Self {
        if succeeded >= 1 {
            Self::Succeeded
        } else if failed >= 1 {
            Self::Failed(reason.unwrap_or_else(|| format!("{} pod(s) failed", failed)))
        } else {
            Self::Pending
        }
    }
}

/// Observed state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Fewer replicas available than desired.
    Pending {
        /// Available replicas.
        available: i32,
        /// Desired replicas.
        desired: i32,
    },
    /// Every desired replica is available.
    Ready,
}

impl DeploymentStatus {
    /// Derive the status from replica counts.
    pub fn from_replicas(available: i32, desired: i32) -> Self {
        if available >= desired {
            Self::Ready
        } else {
            Self::Pending { available, desired }
        }
    }

    /// True for [`DeploymentStatus::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Trait for cluster backends.
///
/// Backends are pure resource APIs: they create, fetch and delete single
/// resources and never sequence them. Ordering, readiness gating and
/// rollback belong to the orchestrator.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Backend type identifier (e.g., "kubernetes", "mock")
    fn backend_type(&self) -> &'static str;

    /// Create a namespace. Fails with `AlreadyExists` if present.
    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<()>;

    /// Check whether a namespace exists.
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Delete a namespace and everything in it.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Create a persistent volume claim.
    async fn create_pvc(&self, claim: &VolumeClaim) -> Result<()>;

    /// Delete a persistent volume claim.
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a setup job.
    async fn create_job(&self, job: &SetupJob) -> Result<()>;

    /// Fetch the current status of a job.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<JobStatus>;

    /// Delete a job and its pods.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a deployment.
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Fetch the current status of a deployment.
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentStatus>;

    /// Delete a deployment.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a service.
    async fn create_service(&self, service: &Service) -> Result<()>;

    /// Delete a service.
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}
