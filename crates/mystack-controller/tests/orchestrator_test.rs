// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack lifecycle tests against the in-memory backend.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::*;
use mystack_controller::backend::{
    BackendError, ClusterBackend, DeploymentStatus, JobStatus, MockBackend, Operation,
};
use mystack_controller::cluster::{CreateOptions, ROUTABLE_LABEL, ResourceKind};
use mystack_controller::config::Config;
use mystack_controller::error::{Error, ErrorKind, Stage};
use mystack_controller::readiness::{CancelToken, ReadinessError, ReadinessWaiter, WaitTarget};

fn pending() -> DeploymentStatus {
    DeploymentStatus::Pending {
        available: 0,
        desired: 1,
    }
}

#[tokio::test]
async fn test_basic_stack_creates_one_of_each() {
    let backend = MockBackend::new();
    cluster(BASIC).create(&backend).await.unwrap();

    assert_eq!(backend.namespaces().await, [NAMESPACE]);
    assert_eq!(backend.count(ResourceKind::PersistentVolumeClaim, NAMESPACE).await, 0);
    assert_eq!(backend.count(ResourceKind::Job, NAMESPACE).await, 0);
    assert_eq!(backend.count(ResourceKind::Deployment, NAMESPACE).await, 2);
    assert_eq!(backend.count(ResourceKind::Service, NAMESPACE).await, 2);

    let svc1 = backend.service(NAMESPACE, "svc1").await.unwrap();
    let app1 = backend.service(NAMESPACE, "app1").await.unwrap();
    assert!(!svc1.routable);
    assert!(app1.routable);
    assert_eq!(app1.ports[0].external, 80);
    assert_eq!(app1.ports[0].target, 5000);

    let svc1_deployment = backend.deployment(NAMESPACE, "svc1").await.unwrap();
    assert_eq!(svc1_deployment.ports[0].target, 5000);
    assert_eq!(svc1_deployment.labels[ROUTABLE_LABEL], "false");
    assert!(backend.deployment(NAMESPACE, "missing").await.is_none());

    // Without setup no job is ever touched.
    let job_calls = backend
        .calls()
        .await
        .into_iter()
        .filter(|c| c.kind == ResourceKind::Job)
        .count();
    assert_eq!(job_calls, 0);
    // svc1 has no probe, so nothing is polled.
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Deployment).await, 0);
}

#[tokio::test]
async fn test_full_stack_creation_order() {
    let backend = MockBackend::new();
    cluster(FULL).create(&backend).await.unwrap();

    let created: Vec<(ResourceKind, String)> = calls_of(&backend, Operation::Create).await;
    let expected = [
        (ResourceKind::Namespace, NAMESPACE),
        (ResourceKind::PersistentVolumeClaim, "data"),
        (ResourceKind::Job, "setup"),
        (ResourceKind::Deployment, "db"),
        (ResourceKind::Service, "db"),
        (ResourceKind::Deployment, "cache"),
        (ResourceKind::Service, "cache"),
        (ResourceKind::Deployment, "web"),
        (ResourceKind::Service, "web"),
    ];
    let expected: Vec<(ResourceKind, String)> = expected
        .iter()
        .map(|(kind, name)| (*kind, name.to_string()))
        .collect();
    assert_eq!(created, expected);

    let calls = backend.calls().await;
    assert!(
        position(&calls, Operation::Get, ResourceKind::Job, "setup")
            < position(&calls, Operation::Create, ResourceKind::Deployment, "db")
    );
}

#[tokio::test(start_paused = true)]
async fn test_probed_service_gates_next_service() {
    let backend = MockBackend::new().with_deployment_statuses("db", [pending(), DeploymentStatus::Ready]);
    cluster(FULL).create(&backend).await.unwrap();

    let calls = backend.calls().await;
    let cache_created = position(&calls, Operation::Create, ResourceKind::Deployment, "cache");
    let db_polls: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.op == Operation::Get && c.kind == ResourceKind::Deployment && c.name == "db")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(db_polls.len(), 2);
    assert!(db_polls.iter().all(|&i| i < cache_created));

    // cache has no probe and web is an app: neither is polled.
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Deployment).await, 2);
}

#[tokio::test]
async fn test_app_probe_never_gates() {
    let yaml = r#"
apps:
  web:
    image: nginx
    readinessProbe:
      command: ["true"]
"#;
    let backend = MockBackend::new().with_deployment_statuses("web", [pending()]);
    cluster(yaml).create(&backend).await.unwrap();
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Deployment).await, 0);
}

#[tokio::test]
async fn test_setup_failure_aborts_and_rolls_back() {
    let backend = MockBackend::new().with_job_statuses(
        "setup",
        [JobStatus::Failed("BackoffLimitExceeded".to_string())],
    );
    let err = cluster(FULL).create(&backend).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Setup));
    assert!(matches!(
        err,
        Error::Readiness {
            source: ReadinessError::JobFailed { .. },
            ..
        }
    ));
    assert!(err.to_string().contains("BackoffLimitExceeded"));
    assert_eq!(backend.call_count(Operation::Create, ResourceKind::Deployment).await, 0);

    let deleted = calls_of(&backend, Operation::Delete).await;
    assert_eq!(
        deleted,
        [
            (ResourceKind::Job, "setup".to_string()),
            (ResourceKind::PersistentVolumeClaim, "data".to_string()),
            (ResourceKind::Namespace, NAMESPACE.to_string()),
        ]
    );
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_rollback_disabled_leaves_resources() {
    let backend = MockBackend::new().with_job_statuses(
        "setup",
        [JobStatus::Failed("BackoffLimitExceeded".to_string())],
    );
    let options = CreateOptions::default().without_rollback();
    cluster(FULL).create_with(&backend, &options).await.unwrap_err();

    assert!(calls_of(&backend, Operation::Delete).await.is_empty());
    assert_eq!(backend.namespaces().await, [NAMESPACE]);
    assert_eq!(backend.count(ResourceKind::Job, NAMESPACE).await, 1);
    assert_eq!(backend.count(ResourceKind::PersistentVolumeClaim, NAMESPACE).await, 1);
}

#[tokio::test]
async fn test_rollback_follows_reverse_creation_order() {
    let backend = MockBackend::new().failing_on(
        Operation::Create,
        ResourceKind::Deployment,
        "web",
        BackendError::Api("exceeded quota".to_string()),
    );
    let err = cluster(FULL).create(&backend).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Apps));
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(
        err.to_string(),
        "apps stage: failed to create deployment 'web': backend error: exceeded quota"
    );

    let deleted = calls_of(&backend, Operation::Delete).await;
    let expected: Vec<(ResourceKind, String)> = [
        (ResourceKind::Service, "cache"),
        (ResourceKind::Deployment, "cache"),
        (ResourceKind::Service, "db"),
        (ResourceKind::Deployment, "db"),
        (ResourceKind::Job, "setup"),
        (ResourceKind::PersistentVolumeClaim, "data"),
        (ResourceKind::Namespace, NAMESPACE),
    ]
    .iter()
    .map(|(kind, name)| (*kind, name.to_string()))
    .collect();
    assert_eq!(deleted, expected);
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_volume_failure_aborts_before_setup() {
    let backend = MockBackend::new().failing_on_kind(
        Operation::Create,
        ResourceKind::PersistentVolumeClaim,
        BackendError::Api("storage class not found".to_string()),
    );
    let err = cluster(FULL).create(&backend).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Volumes));
    assert_eq!(
        err.to_string(),
        "volumes stage: failed to create persistentvolumeclaim 'data': backend error: storage class not found"
    );

    let calls = backend.calls().await;
    assert!(!calls.iter().any(|c| c.kind == ResourceKind::Job));
    assert!(!calls.iter().any(|c| c.kind == ResourceKind::Deployment));

    // The claim was never created, so only the namespace is undone.
    assert_eq!(
        calls_of(&backend, Operation::Delete).await,
        [(ResourceKind::Namespace, NAMESPACE.to_string())]
    );
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_service_failure_removes_its_deployment() {
    let backend = MockBackend::new().failing_on(
        Operation::Create,
        ResourceKind::Service,
        "db",
        BackendError::Api("port already allocated".to_string()),
    );
    let err = cluster(FULL).create(&backend).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Services));
    assert_eq!(err.error_code(), "BACKEND_ERROR");
    assert_eq!(backend.call_count(Operation::Create, ResourceKind::Deployment).await, 1);

    let deleted = calls_of(&backend, Operation::Delete).await;
    let expected: Vec<(ResourceKind, String)> = [
        (ResourceKind::Deployment, "db"),
        (ResourceKind::Job, "setup"),
        (ResourceKind::PersistentVolumeClaim, "data"),
        (ResourceKind::Namespace, NAMESPACE),
    ]
    .iter()
    .map(|(kind, name)| (*kind, name.to_string()))
    .collect();
    assert_eq!(deleted, expected);
    assert!(backend.deployment(NAMESPACE, "db").await.is_none());
}

#[tokio::test]
async fn test_namespace_backend_error_is_not_a_conflict() {
    let backend = MockBackend::new().failing_on(
        Operation::Create,
        ResourceKind::Namespace,
        NAMESPACE,
        BackendError::Unavailable("connection refused".to_string()),
    );
    let err = cluster(BASIC).create(&backend).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Backend {
            stage: Stage::Namespace,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(err.error_code(), "BACKEND_ERROR");

    // Nothing was created, so there is nothing to roll back.
    assert!(calls_of(&backend, Operation::Delete).await.is_empty());
    assert!(backend.namespaces().await.is_empty());
    assert_eq!(backend.call_count(Operation::Create, ResourceKind::PersistentVolumeClaim).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_gated_service_timeout() {
    let backend = MockBackend::new().with_deployment_statuses("db", [pending()]);
    let err = cluster(FULL).create(&backend).await.unwrap_err();

    assert_eq!(err.error_code(), "READINESS_TIMEOUT");
    assert_eq!(err.stage(), Some(Stage::Services));
    assert!(err.to_string().contains("deployment 'db' did not become ready due to timeout after 5s"));
    // cache is never reached.
    assert_eq!(backend.call_count(Operation::Create, ResourceKind::Deployment).await, 1);
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_existing_namespace_is_a_conflict() {
    let backend = MockBackend::new().with_namespace(NAMESPACE);
    let err = cluster(BASIC).create(&backend).await.unwrap_err();

    assert!(matches!(&err, Error::NamespaceExists(ns) if ns == NAMESPACE));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.error_code(), "STACK_ALREADY_EXISTS");

    // The pre-existing namespace is not ours to roll back.
    assert!(calls_of(&backend, Operation::Delete).await.is_empty());
    assert_eq!(backend.namespaces().await, [NAMESPACE]);
    assert_eq!(backend.call_count(Operation::Create, ResourceKind::Deployment).await, 0);
}

#[tokio::test]
async fn test_cancelled_before_setup_wait() {
    let cancel: CancelToken = Arc::new(AtomicBool::new(true));
    let options = CreateOptions::default().with_cancel(cancel);
    let backend = MockBackend::new();

    let err = cluster(FULL).create_with(&backend, &options).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Readiness {
            stage: Stage::Setup,
            source: ReadinessError::Cancelled { .. },
        }
    ));
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Job).await, 0);
}

#[derive(Default)]
struct RecordingWaiter {
    targets: Mutex<Vec<String>>,
}

#[async_trait]
impl ReadinessWaiter for RecordingWaiter {
    async fn wait(
        &self,
        _backend: &dyn ClusterBackend,
        target: &WaitTarget,
        _cancel: Option<&CancelToken>,
    ) -> Result<(), ReadinessError> {
        self.targets.lock().unwrap().push(target.name.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_custom_waiter_sees_gated_targets() {
    let waiter = Arc::new(RecordingWaiter::default());
    let options = CreateOptions::default().with_waiter(waiter.clone());
    let backend = MockBackend::new();

    cluster(FULL).create_with(&backend, &options).await.unwrap();

    assert_eq!(*waiter.targets.lock().unwrap(), ["setup", "db"]);
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Job).await, 0);
    assert_eq!(backend.call_count(Operation::Get, ResourceKind::Deployment).await, 0);
}

#[tokio::test]
async fn test_delete_removes_services_then_deployments_then_namespace() {
    let backend = MockBackend::new();
    let cluster = cluster(BASIC);
    cluster.create(&backend).await.unwrap();
    cluster.delete(&backend).await.unwrap();

    let deleted = calls_of(&backend, Operation::Delete).await;
    let expected: Vec<(ResourceKind, String)> = [
        (ResourceKind::Service, "svc1"),
        (ResourceKind::Service, "app1"),
        (ResourceKind::Deployment, "svc1"),
        (ResourceKind::Deployment, "app1"),
        (ResourceKind::Namespace, NAMESPACE),
    ]
    .iter()
    .map(|(kind, name)| (*kind, name.to_string()))
    .collect();
    assert_eq!(deleted, expected);
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_delete_continues_past_failures() {
    let backend = MockBackend::new().failing_on(
        Operation::Delete,
        ResourceKind::Service,
        "svc1",
        BackendError::Unavailable("connection refused".to_string()),
    );
    let cluster = cluster(BASIC);
    cluster.create(&backend).await.unwrap();

    let err = cluster.delete(&backend).await.unwrap_err();
    match &err {
        Error::TeardownIncomplete {
            attempted,
            failed,
            first,
        } => {
            assert_eq!(*attempted, 5);
            assert_eq!(*failed, 1);
            assert!(first.to_string().contains("service 'svc1'"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.error_code(), "TEARDOWN_INCOMPLETE");

    assert_eq!(backend.call_count(Operation::Delete, ResourceKind::Deployment).await, 2);
    assert!(backend.namespaces().await.is_empty());
}

#[tokio::test]
async fn test_delete_missing_stack() {
    let backend = MockBackend::new();
    let err = cluster(BASIC).delete(&backend).await.unwrap_err();

    assert!(matches!(&err, Error::NamespaceNotFound(ns) if ns == NAMESPACE));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(calls_of(&backend, Operation::Delete).await.is_empty());
}

#[tokio::test]
async fn test_status_reports_readiness() {
    let backend = MockBackend::new();
    let cluster = cluster(FULL);

    let missing = cluster.status(&backend).await.unwrap();
    assert!(!missing.exists);
    assert!(!missing.is_ready());

    cluster.create(&backend).await.unwrap();
    let status = cluster.status(&backend).await.unwrap();
    assert!(status.exists);
    assert_eq!(status.job, Some(JobStatus::Succeeded));
    let names: Vec<&str> = status.deployments.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["db", "cache", "web"]);
    assert!(status.is_ready());

    assert_eq!(
        serde_json::to_value(&status).unwrap(),
        serde_json::json!({
            "namespace": NAMESPACE,
            "exists": true,
            "job": "succeeded",
            "deployments": {
                "db": {"state": "ready"},
                "cache": {"state": "ready"},
                "web": {"state": "ready"},
            },
        })
    );
}

#[tokio::test]
async fn test_status_not_ready_while_app_pending() {
    let backend = MockBackend::new().with_deployment_statuses("app1", [pending()]);
    let cluster = cluster(BASIC);
    cluster.create(&backend).await.unwrap();

    let status = cluster.status(&backend).await.unwrap();
    assert!(!status.is_ready());
    assert_eq!(status.deployments[1], ("app1".to_string(), pending()));
}

#[test]
fn test_build_is_deterministic() {
    assert_eq!(cluster(FULL), cluster(FULL));
}

#[test]
fn test_create_options_from_config() {
    let config = Config {
        rollback_on_failure: false,
        ..Config::default()
    };
    assert!(!CreateOptions::from_config(&config).rollback);
    assert!(CreateOptions::default().rollback);
}
