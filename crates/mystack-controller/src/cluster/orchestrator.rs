// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle orchestration for one user's stack.
//!
//! Create runs strictly in order and stops at the first failure:
//!
//! ```text
//! namespace → volume claims → setup job (wait) → services (wait per probed
//! service) → apps
//! ```
//!
//! Every resource created during the call is pushed onto a compensation
//! stack. When creation aborts and rollback is enabled, the stack is unwound
//! in reverse order before the original error is returned.
//!
//! Delete is best-effort: services, then deployments, then the namespace,
//! continuing past individual failures.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{error, info, instrument, warn};

use super::model::{Cluster, Deployment, ResourceKind};
use crate::backend::{BackendError, ClusterBackend, DeploymentStatus, JobStatus};
use crate::config::Config;
use crate::error::{Action, Error, Result, Stage};
use crate::readiness::{CancelToken, PollingWaiter, ReadinessWaiter, WaitTarget};

/// Options for [`Cluster::create_with`].
#[derive(Clone)]
pub struct CreateOptions {
    /// Delete resources created by this call if it fails.
    pub rollback: bool,
    /// Waiter used for the setup job and gated services.
    pub waiter: Arc<dyn ReadinessWaiter>,
    /// Stops any in-progress readiness wait when set.
    pub cancel: Option<CancelToken>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            rollback: true,
            waiter: Arc::new(PollingWaiter),
            cancel: None,
        }
    }
}

impl fmt::Debug for CreateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateOptions")
            .field("rollback", &self.rollback)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl CreateOptions {
    /// Options derived from controller configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            rollback: config.rollback_on_failure,
            ..Self::default()
        }
    }

    /// Disable rollback; partially created resources are left in place.
    pub fn without_rollback(mut self) -> Self {
        self.rollback = false;
        self
    }

    /// Use a different readiness waiter.
    pub fn with_waiter(mut self, waiter: Arc<dyn ReadinessWaiter>) -> Self {
        self.waiter = waiter;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A resource created during the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Created {
    kind: ResourceKind,
    namespace: String,
    name: String,
}

/// Resources to undo if creation aborts, most recent last.
#[derive(Debug, Default)]
struct Compensation {
    created: Vec<Created>,
}

impl Compensation {
    fn push(&mut self, kind: ResourceKind, namespace: &str, name: &str) {
        self.created.push(Created {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn len(&self) -> usize {
        self.created.len()
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// Delete everything in reverse creation order. Returns the failure count.
    async fn unwind(mut self, backend: &dyn ClusterBackend) -> usize {
        warn!(resources = self.created.len(), "Rolling back partially created stack");
        let mut failures = 0;
        while let Some(resource) = self.created.pop() {
            let result = delete_resource(backend, resource.kind, &resource.namespace, &resource.name).await;
            match result {
                Ok(()) => {}
                // Already gone, e.g. reclaimed with its namespace.
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    failures += 1;
                    warn!(
                        kind = %resource.kind,
                        name = %resource.name,
                        error = %e,
                        "Failed to delete resource during rollback"
                    );
                }
            }
        }
        failures
    }
}

async fn delete_resource(
    backend: &dyn ClusterBackend,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
) -> std::result::Result<(), BackendError> {
    match kind {
        ResourceKind::Namespace => backend.delete_namespace(name).await,
        ResourceKind::PersistentVolumeClaim => backend.delete_pvc(namespace, name).await,
        ResourceKind::Job => backend.delete_job(namespace, name).await,
        ResourceKind::Deployment => backend.delete_deployment(namespace, name).await,
        ResourceKind::Service => backend.delete_service(namespace, name).await,
    }
}

/// Point-in-time view of a stack on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackStatus {
    /// Namespace name.
    pub namespace: String,
    /// Whether the namespace exists at all.
    pub exists: bool,
    /// Setup job status, if the stack has a setup stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatus>,
    /// Status of each deployment, services first.
    #[serde(serialize_with = "deployments_as_map")]
    pub deployments: Vec<(String, DeploymentStatus)>,
}

fn deployments_as_map<S: Serializer>(
    deployments: &[(String, DeploymentStatus)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(deployments.iter().map(|(name, status)| (name, status)))
}

impl StackStatus {
    /// True when the setup succeeded and every deployment is ready.
    pub fn is_ready(&self) -> bool {
        self.exists
            && self
                .job
                .as_ref()
                .is_none_or(|job| *job == JobStatus::Succeeded)
            && self.deployments.iter().all(|(_, status)| status.is_ready())
    }
}

impl Cluster {
    /// Create the stack with default options.
    pub async fn create(&self, backend: &dyn ClusterBackend) -> Result<()> {
        self.create_with(backend, &CreateOptions::default()).await
    }

    /// Create the stack.
    ///
    /// Returns the first failure, annotated with the stage and resource.
    /// A namespace that already existed is never touched by rollback.
    #[instrument(skip_all, fields(namespace = %self.namespace.name, owner = %self.username))]
    pub async fn create_with(
        &self,
        backend: &dyn ClusterBackend,
        options: &CreateOptions,
    ) -> Result<()> {
        info!(
            backend = backend.backend_type(),
            resources = self.resource_count(),
            "Creating stack"
        );

        let mut compensation = Compensation::default();
        match self.create_all(backend, options, &mut compensation).await {
            Ok(()) => {
                info!(resources = compensation.len(), "Stack created");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, created = compensation.len(), "Stack creation failed");
                if compensation.is_empty() {
                    return Err(err);
                }
                if options.rollback {
                    let failures = compensation.unwind(backend).await;
                    if failures > 0 {
                        warn!(failures, "Rollback left resources behind");
                    }
                } else {
                    warn!(
                        created = compensation.len(),
                        "Rollback disabled, leaving partially created resources"
                    );
                }
                Err(err)
            }
        }
    }

    async fn create_all(
        &self,
        backend: &dyn ClusterBackend,
        options: &CreateOptions,
        compensation: &mut Compensation,
    ) -> Result<()> {
        let ns = self.namespace.name.as_str();

        match backend.create_namespace(&self.namespace).await {
            Ok(()) => compensation.push(ResourceKind::Namespace, ns, ns),
            Err(e) if e.is_already_exists() => return Err(Error::NamespaceExists(ns.to_string())),
            Err(e) => {
                return Err(Error::backend(
                    Stage::Namespace,
                    Action::Create,
                    ResourceKind::Namespace,
                    ns,
                    e,
                ));
            }
        }
        info!("Namespace created");

        for claim in &self.volume_claims {
            backend.create_pvc(claim).await.map_err(|e| {
                Error::backend(
                    Stage::Volumes,
                    Action::Create,
                    ResourceKind::PersistentVolumeClaim,
                    &claim.name,
                    e,
                )
            })?;
            compensation.push(ResourceKind::PersistentVolumeClaim, ns, &claim.name);
        }

        if let Some(job) = &self.job {
            backend.create_job(job).await.map_err(|e| {
                Error::backend(Stage::Setup, Action::Create, ResourceKind::Job, &job.name, e)
            })?;
            compensation.push(ResourceKind::Job, ns, &job.name);

            options
                .waiter
                .wait(backend, &WaitTarget::job(job), options.cancel.as_ref())
                .await
                .map_err(|source| Error::Readiness {
                    stage: Stage::Setup,
                    source,
                })?;
            info!("Setup job completed");
        }

        for deployment in &self.service_deployments {
            self.create_workload(backend, deployment, Stage::Services, compensation)
                .await?;
            if deployment.is_gated() {
                options
                    .waiter
                    .wait(
                        backend,
                        &WaitTarget::deployment(deployment),
                        options.cancel.as_ref(),
                    )
                    .await
                    .map_err(|source| Error::Readiness {
                        stage: Stage::Services,
                        source,
                    })?;
                info!(service = %deployment.name, "Service ready");
            }
        }

        for deployment in &self.app_deployments {
            self.create_workload(backend, deployment, Stage::Apps, compensation)
                .await?;
        }

        Ok(())
    }

    async fn create_workload(
        &self,
        backend: &dyn ClusterBackend,
        deployment: &Deployment,
        stage: Stage,
        compensation: &mut Compensation,
    ) -> Result<()> {
        backend.create_deployment(deployment).await.map_err(|e| {
            Error::backend(stage, Action::Create, ResourceKind::Deployment, &deployment.name, e)
        })?;
        compensation.push(
            ResourceKind::Deployment,
            &deployment.namespace,
            &deployment.name,
        );

        if let Some(service) = self.service_for(deployment) {
            backend.create_service(service).await.map_err(|e| {
                Error::backend(stage, Action::Create, ResourceKind::Service, &service.name, e)
            })?;
            compensation.push(ResourceKind::Service, &service.namespace, &service.name);
        }

        info!(
            stage = %stage,
            name = %deployment.name,
            image = %deployment.image,
            "Workload created"
        );
        Ok(())
    }

    /// Tear the stack down.
    ///
    /// Deletes every service, then every deployment, then the namespace,
    /// which reclaims the job and volume claims. All deletions are attempted
    /// even if some fail; the first failure is returned inside
    /// [`Error::TeardownIncomplete`].
    #[instrument(skip_all, fields(namespace = %self.namespace.name, owner = %self.username))]
    pub async fn delete(&self, backend: &dyn ClusterBackend) -> Result<()> {
        let ns = self.namespace.name.as_str();

        let exists = backend.namespace_exists(ns).await.map_err(|e| {
            Error::backend(Stage::Teardown, Action::Get, ResourceKind::Namespace, ns, e)
        })?;
        if !exists {
            return Err(Error::NamespaceNotFound(ns.to_string()));
        }

        info!("Deleting stack");

        let mut planned: Vec<(ResourceKind, &str)> = Vec::new();
        planned.extend(
            self.deployments()
                .filter_map(|d| self.service_for(d))
                .map(|s| (ResourceKind::Service, s.name.as_str())),
        );
        planned.extend(
            self.deployments()
                .map(|d| (ResourceKind::Deployment, d.name.as_str())),
        );
        planned.push((ResourceKind::Namespace, ns));

        let attempted = planned.len();
        let mut failed = 0;
        let mut first: Option<Error> = None;

        for (kind, name) in planned {
            if let Err(e) = delete_resource(backend, kind, ns, name).await {
                warn!(kind = %kind, name = %name, error = %e, "Failed to delete resource");
                failed += 1;
                first.get_or_insert(Error::backend(Stage::Teardown, Action::Delete, kind, name, e));
            }
        }

        match first {
            None => {
                info!(deleted = attempted, "Stack deleted");
                Ok(())
            }
            Some(first) => Err(Error::TeardownIncomplete {
                attempted,
                failed,
                first: Box::new(first),
            }),
        }
    }

    /// Inspect the stack without waiting.
    pub async fn status(&self, backend: &dyn ClusterBackend) -> Result<StackStatus> {
        let ns = self.namespace.name.as_str();
        let get_failed = |kind, name: &str, e| Error::backend(Stage::Status, Action::Get, kind, name, e);

        let exists = backend
            .namespace_exists(ns)
            .await
            .map_err(|e| get_failed(ResourceKind::Namespace, ns, e))?;
        if !exists {
            return Ok(StackStatus {
                namespace: ns.to_string(),
                exists,
                job: None,
                deployments: Vec::new(),
            });
        }

        let job = match &self.job {
            Some(job) => Some(
                backend
                    .get_job(ns, &job.name)
                    .await
                    .map_err(|e| get_failed(ResourceKind::Job, &job.name, e))?,
            ),
            None => None,
        };

        let mut deployments = Vec::new();
        for deployment in self.deployments() {
            let status = backend
                .get_deployment(ns, &deployment.name)
                .await
                .map_err(|e| get_failed(ResourceKind::Deployment, &deployment.name, e))?;
            deployments.push((deployment.name.clone(), status));
        }

        Ok(StackStatus {
            namespace: ns.to_string(),
            exists,
            job,
            deployments,
        })
    }
}
