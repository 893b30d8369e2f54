// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock backend for testing.
//!
//! An in-memory backend that keeps resources in maps, records every call,
//! and lets tests script job/deployment status sequences and inject
//! failures.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::Mutex;

use super::traits::*;
use crate::cluster::{Deployment, NamespaceSpec, ResourceKind, Service, SetupJob, VolumeClaim};

/// Kind of backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `create_*`
    Create,
    /// `get_*` / `namespace_exists`
    Get,
    /// `delete_*`
    Delete,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    /// Operation.
    pub op: Operation,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Namespace (the namespace's own name for namespace calls).
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    op: Operation,
    kind: ResourceKind,
    name: Option<String>,
    error: BackendError,
}

type Key = (String, String);

#[derive(Debug, Default)]
struct MockState {
    namespaces: BTreeSet<String>,
    pvcs: BTreeMap<Key, VolumeClaim>,
    jobs: BTreeMap<Key, SetupJob>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    calls: Vec<BackendCall>,
    job_statuses: HashMap<String, VecDeque<JobStatus>>,
    deployment_statuses: HashMap<String, VecDeque<DeploymentStatus>>,
    failures: Vec<InjectedFailure>,
}

impl MockState {
    fn record(&mut self, op: Operation, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.calls.push(BackendCall {
            op,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        let injected = self.failures.iter().find(|f| {
            f.op == op && f.kind == kind && f.name.as_deref().is_none_or(|n| n == name)
        });
        match injected {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(()),
        }
    }

    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(BackendError::NotFound(format!(
                "namespaces \"{}\" not found",
                namespace
            )))
        }
    }
}

/// Next scripted status; the last entry repeats forever.
fn next_status<T: Clone>(queue: Option<&mut VecDeque<T>>, default: T) -> T {
    match queue {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(default),
        Some(queue) => queue.front().cloned().unwrap_or(default),
        None => default,
    }
}

fn insert_new<T>(map: &mut BTreeMap<Key, T>, kind: ResourceKind, key: Key, value: T) -> Result<()> {
    if map.contains_key(&key) {
        return Err(BackendError::AlreadyExists(format!(
            "{} \"{}\" already exists",
            kind, key.1
        )));
    }
    map.insert(key, value);
    Ok(())
}

fn remove_existing<T>(map: &mut BTreeMap<Key, T>, kind: ResourceKind, key: Key) -> Result<()> {
    match map.remove(&key) {
        Some(_) => Ok(()),
        None => Err(BackendError::NotFound(format!(
            "{} \"{}\" not found",
            kind, key.1
        ))),
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Mock backend for testing.
///
/// Jobs succeed and deployments are ready on the first poll unless a status
/// sequence has been scripted for them.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Create an empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a namespace.
    pub fn with_namespace(mut self, name: impl Into<String>) -> Self {
        self.state.get_mut().namespaces.insert(name.into());
        self
    }

    /// Script the statuses returned by successive `get_job` calls for `name`.
    pub fn with_job_statuses(
        mut self,
        name: impl Into<String>,
        statuses: impl IntoIterator<Item = JobStatus>,
    ) -> Self {
        self.state
            .get_mut()
            .job_statuses
            .insert(name.into(), statuses.into_iter().collect());
        self
    }

    /// Script the statuses returned by successive `get_deployment` calls for `name`.
    pub fn with_deployment_statuses(
        mut self,
        name: impl Into<String>,
        statuses: impl IntoIterator<Item = DeploymentStatus>,
    ) -> Self {
        self.state
            .get_mut()
            .deployment_statuses
            .insert(name.into(), statuses.into_iter().collect());
        self
    }

    /// Fail every `op` on `kind` named `name` with `error`.
    pub fn failing_on(
        mut self,
        op: Operation,
        kind: ResourceKind,
        name: impl Into<String>,
        error: BackendError,
    ) -> Self {
        self.state.get_mut().failures.push(InjectedFailure {
            op,
            kind,
            name: Some(name.into()),
            error,
        });
        self
    }

    /// Fail every `op` on any resource of `kind` with `error`.
    pub fn failing_on_kind(mut self, op: Operation, kind: ResourceKind, error: BackendError) -> Self {
        self.state.get_mut().failures.push(InjectedFailure {
            op,
            kind,
            name: None,
            error,
        });
        self
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of `op` calls on `kind`.
    pub async fn call_count(&self, op: Operation, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op && c.kind == kind)
            .count()
    }

    /// Live namespaces.
    pub async fn namespaces(&self) -> Vec<String> {
        self.state.lock().await.namespaces.iter().cloned().collect()
    }

    /// Number of live resources of `kind` in `namespace`.
    pub async fn count(&self, kind: ResourceKind, namespace: &str) -> usize {
        let state = self.state.lock().await;
        match kind {
            ResourceKind::Namespace => usize::from(state.namespaces.contains(namespace)),
            ResourceKind::PersistentVolumeClaim => {
                state.pvcs.keys().filter(|(ns, _)| ns == namespace).count()
            }
            ResourceKind::Job => state.jobs.keys().filter(|(ns, _)| ns == namespace).count(),
            ResourceKind::Deployment => state
                .deployments
                .keys()
                .filter(|(ns, _)| ns == namespace)
                .count(),
            ResourceKind::Service => state.services.keys().filter(|(ns, _)| ns == namespace).count(),
        }
    }

    /// A live service by name.
    pub async fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .await
            .services
            .get(&key(namespace, name))
            .cloned()
    }

    /// A live deployment by name.
    pub async fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state
            .lock()
            .await
            .deployments
            .get(&key(namespace, name))
            .cloned()
    }
}

#[async_trait]
impl ClusterBackend for MockBackend {
    fn backend_type(&self) -> &'static str {
        "mock"
    }

    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(
            Operation::Create,
            ResourceKind::Namespace,
            &namespace.name,
            &namespace.name,
        )?;
        if !state.namespaces.insert(namespace.name.clone()) {
            return Err(BackendError::AlreadyExists(format!(
                "namespaces \"{}\" already exists",
                namespace.name
            )));
        }
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(Operation::Get, ResourceKind::Namespace, name, name)?;
        Ok(state.namespaces.contains(name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::Delete, ResourceKind::Namespace, name, name)?;
        state.require_namespace(name)?;
        state.namespaces.remove(name);
        // Namespace deletion reclaims everything inside it.
        state.pvcs.retain(|(ns, _), _| ns != name);
        state.jobs.retain(|(ns, _), _| ns != name);
        state.deployments.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn create_pvc(&self, claim: &VolumeClaim) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::PersistentVolumeClaim;
        state.record(Operation::Create, kind, &claim.namespace, &claim.name)?;
        state.require_namespace(&claim.namespace)?;
        insert_new(&mut state.pvcs, kind, key(&claim.namespace, &claim.name), claim.clone())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::PersistentVolumeClaim;
        state.record(Operation::Delete, kind, namespace, name)?;
        remove_existing(&mut state.pvcs, kind, key(namespace, name))
    }

    async fn create_job(&self, job: &SetupJob) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::Create, ResourceKind::Job, &job.namespace, &job.name)?;
        state.require_namespace(&job.namespace)?;
        insert_new(&mut state.jobs, ResourceKind::Job, key(&job.namespace, &job.name), job.clone())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<JobStatus> {
        let mut state = self.state.lock().await;
        state.record(Operation::Get, ResourceKind::Job, namespace, name)?;
        if !state.jobs.contains_key(&key(namespace, name)) {
            return Err(BackendError::NotFound(format!("jobs \"{}\" not found", name)));
        }
        Ok(next_status(state.job_statuses.get_mut(name), JobStatus::Succeeded))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::Delete, ResourceKind::Job, namespace, name)?;
        remove_existing(&mut state.jobs, ResourceKind::Job, key(namespace, name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::Deployment;
        state.record(Operation::Create, kind, &deployment.namespace, &deployment.name)?;
        state.require_namespace(&deployment.namespace)?;
        insert_new(
            &mut state.deployments,
            kind,
            key(&deployment.namespace, &deployment.name),
            deployment.clone(),
        )
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentStatus> {
        let mut state = self.state.lock().await;
        state.record(Operation::Get, ResourceKind::Deployment, namespace, name)?;
        if !state.deployments.contains_key(&key(namespace, name)) {
            return Err(BackendError::NotFound(format!(
                "deployments.apps \"{}\" not found",
                name
            )));
        }
        Ok(next_status(
            state.deployment_statuses.get_mut(name),
            DeploymentStatus::Ready,
        ))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::Deployment;
        state.record(Operation::Delete, kind, namespace, name)?;
        remove_existing(&mut state.deployments, kind, key(namespace, name))
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::Service;
        state.record(Operation::Create, kind, &service.namespace, &service.name)?;
        state.require_namespace(&service.namespace)?;
        insert_new(
            &mut state.services,
            kind,
            key(&service.namespace, &service.name),
            service.clone(),
        )
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let kind = ResourceKind::Service;
        state.record(Operation::Delete, kind, namespace, name)?;
        remove_existing(&mut state.services, kind, key(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Labels;

    fn namespace(name: &str) -> NamespaceSpec {
        NamespaceSpec {
            name: name.to_string(),
            owner: "test".to_string(),
            labels: Labels::new(),
        }
    }

    fn job(namespace: &str) -> SetupJob {
        SetupJob {
            name: "setup".to_string(),
            namespace: namespace.to_string(),
            owner: "test".to_string(),
            image: "init".to_string(),
            period: std::time::Duration::from_secs(1),
            timeout: std::time::Duration::from_secs(5),
            labels: Labels::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_namespace_conflict() {
        let backend = MockBackend::new();
        backend.create_namespace(&namespace("ns")).await.unwrap();
        let err = backend.create_namespace(&namespace("ns")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_mock_requires_namespace() {
        let backend = MockBackend::new();
        let err = backend.create_job(&job("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_scripted_job_statuses() {
        let backend = MockBackend::new()
            .with_namespace("ns")
            .with_job_statuses("setup", [JobStatus::Pending, JobStatus::Succeeded]);
        backend.create_job(&job("ns")).await.unwrap();

        assert_eq!(backend.get_job("ns", "setup").await.unwrap(), JobStatus::Pending);
        assert_eq!(backend.get_job("ns", "setup").await.unwrap(), JobStatus::Succeeded);
        // Last status repeats.
        assert_eq!(backend.get_job("ns", "setup").await.unwrap(), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_mock_namespace_delete_reclaims_contents() {
        let backend = MockBackend::new().with_namespace("ns");
        backend.create_job(&job("ns")).await.unwrap();
        assert_eq!(backend.count(ResourceKind::Job, "ns").await, 1);

        backend.delete_namespace("ns").await.unwrap();
        assert_eq!(backend.count(ResourceKind::Job, "ns").await, 0);
        assert!(backend.namespaces().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_injected_failure_is_recorded() {
        let backend = MockBackend::new().failing_on(
            Operation::Create,
            ResourceKind::Namespace,
            "ns",
            BackendError::Api("quota exceeded".into()),
        );
        let err = backend.create_namespace(&namespace("ns")).await.unwrap_err();
        assert_eq!(err, BackendError::Api("quota exceeded".into()));
        assert_eq!(backend.call_count(Operation::Create, ResourceKind::Namespace).await, 1);
        assert!(backend.namespaces().await.is_empty());
    }
}
