// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes backend.
//!
//! Translates resource descriptors into typed `k8s-openapi` objects and
//! drives them through the API server with `kube`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    Deployment as K8sDeployment, DeploymentSpec as K8sDeploymentSpec,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar as K8sEnvVar, ExecAction, Namespace,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, Probe, Service as K8sService, ServicePort,
    ServiceSpec as K8sServiceSpec, Volume, VolumeMount as K8sVolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Resource};
use tracing::debug;

use super::traits::*;
use crate::cluster::{Deployment, NamespaceSpec, Service, SetupJob, VolumeClaim};
use crate::config::Config;

/// Backend talking to a Kubernetes API server.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    field_manager: String,
}

impl KubeBackend {
    /// Wrap an existing client.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Connect using the kubeconfig from `config`, or in-cluster/default
    /// discovery when none is set.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = create_client(config.kubeconfig.as_deref()).await?;
        Ok(Self::new(client, config.field_manager.clone()))
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        }
    }

    async fn create<K>(&self, api: Api<K>, object: &K) -> Result<()>
    where
        K: Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
    {
        api.create(&self.post_params(), object)
            .await
            .map(|_| ())
            .map_err(map_kube_error)
    }

    async fn delete<K>(&self, api: Api<K>, name: &str) -> Result<()>
    where
        K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        api.delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(map_kube_error)
    }
}

impl std::fmt::Debug for KubeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeBackend")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

/// Create a kube client from an optional kubeconfig path.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                BackendError::Unavailable(format!("failed to read kubeconfig: {}", e))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    BackendError::Unavailable(format!("failed to load kubeconfig: {}", e))
                })?
        }
        None => kube::Config::infer().await.map_err(|e| {
            BackendError::Unavailable(format!("failed to infer config: {}", e))
        })?,
    };
    Client::try_from(config)
        .map_err(|e| BackendError::Unavailable(format!("failed to create client: {}", e)))
}

fn map_kube_error(err: kube::Error) -> BackendError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => BackendError::AlreadyExists(ae.message),
        kube::Error::Api(ae) if ae.code == 404 => BackendError::NotFound(ae.message),
        kube::Error::Api(ae) => BackendError::Api(ae.message),
        other => BackendError::from_message(other.to_string()),
    }
}

fn meta(name: &str, namespace: Option<&str>, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels.clone()),
        ..ObjectMeta::default()
    }
}

fn seconds(duration: std::time::Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

fn namespace_object(spec: &NamespaceSpec) -> Namespace {
    Namespace {
        metadata: meta(&spec.name, None, &spec.labels),
        ..Namespace::default()
    }
}

fn pvc_object(claim: &VolumeClaim) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: meta(&claim.name, Some(&claim.namespace), &claim.labels),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.storage.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

fn job_object(job: &SetupJob) -> Job {
    Job {
        metadata: meta(&job.name, Some(&job.namespace), &job.labels),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(i64::from(seconds(job.timeout))),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(job.labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: job.name.clone(),
                        image: Some(job.image.clone()),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

fn deployment_object(deployment: &Deployment) -> K8sDeployment {
    let ports: Vec<ContainerPort> = deployment
        .container_ports()
        .into_iter()
        .map(|port| ContainerPort {
            container_port: i32::from(port),
            ..ContainerPort::default()
        })
        .collect();

    let env: Vec<K8sEnvVar> = deployment
        .env
        .iter()
        .map(|var| K8sEnvVar {
            name: var.name.clone(),
            value: Some(var.value.clone()),
            ..K8sEnvVar::default()
        })
        .collect();

    let readiness_probe = deployment.readiness_probe.as_ref().map(|probe| Probe {
        exec: Some(ExecAction {
            command: Some(probe.command.clone()),
        }),
        period_seconds: Some(seconds(probe.period())),
        ..Probe::default()
    });

    let (volumes, volume_mounts) = match &deployment.volume_mount {
        Some(mount) => (
            Some(vec![Volume {
                name: mount.name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: mount.name.clone(),
                    ..PersistentVolumeClaimVolumeSource::default()
                }),
                ..Volume::default()
            }]),
            Some(vec![K8sVolumeMount {
                name: mount.name.clone(),
                mount_path: mount.mount_path.clone(),
                ..K8sVolumeMount::default()
            }]),
        ),
        None => (None, None),
    };

    let selector = BTreeMap::from([(
        crate::cluster::APP_LABEL.to_string(),
        deployment.name.clone(),
    )]);

    K8sDeployment {
        metadata: meta(&deployment.name, Some(&deployment.namespace), &deployment.labels),
        spec: Some(K8sDeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(deployment.labels.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: deployment.name.clone(),
                        image: Some(deployment.image.clone()),
                        env: (!env.is_empty()).then_some(env),
                        ports: (!ports.is_empty()).then_some(ports),
                        readiness_probe,
                        volume_mounts,
                        ..Container::default()
                    }],
                    volumes,
                    ..PodSpec::default()
                }),
            },
            ..K8sDeploymentSpec::default()
        }),
        ..K8sDeployment::default()
    }
}

fn service_object(service: &Service) -> K8sService {
    let ports: Vec<ServicePort> = service
        .ports
        .iter()
        .map(|mapping| ServicePort {
            name: Some(format!("port-{}", mapping.external)),
            port: i32::from(mapping.external),
            target_port: Some(IntOrString::Int(i32::from(mapping.target))),
            ..ServicePort::default()
        })
        .collect();

    // A service without ports is only valid as a headless service.
    let cluster_ip = ports.is_empty().then(|| "None".to_string());

    K8sService {
        metadata: meta(&service.name, Some(&service.namespace), &service.labels),
        spec: Some(K8sServiceSpec {
            selector: Some(service.selector.clone()),
            ports: (!ports.is_empty()).then_some(ports),
            cluster_ip,
            ..K8sServiceSpec::default()
        }),
        ..K8sService::default()
    }
}

fn job_status(job: &Job) -> JobStatus {
    let Some(status) = &job.status else {
        return JobStatus::Pending;
    };
    let reason = status.conditions.as_ref().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
            .map(|c| match (&c.reason, &c.message) {
                (Some(reason), Some(message)) => format!("{}: {}", reason, message),
                (Some(reason), None) => reason.clone(),
                (None, Some(message)) => message.clone(),
                (None, None) => "job failed".to_string(),
            })
    });
    JobStatus::from_counts(
        status.succeeded.unwrap_or(0),
        status.failed.unwrap_or(0),
        reason,
    )
}

fn deployment_status(deployment: &K8sDeployment) -> DeploymentStatus {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    DeploymentStatus::from_replicas(available, desired)
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    fn backend_type(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_namespace(&self, namespace: &NamespaceSpec) -> Result<()> {
        debug!(namespace = %namespace.name, "Creating namespace");
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.create(api, &namespace_object(namespace)).await
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map(|ns| ns.is_some())
            .map_err(map_kube_error)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        debug!(namespace = %name, "Deleting namespace");
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.delete(api, name).await
    }

    async fn create_pvc(&self, claim: &VolumeClaim) -> Result<()> {
        debug!(namespace = %claim.namespace, name = %claim.name, "Creating volume claim");
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &claim.namespace);
        self.create(api, &pvc_object(claim)).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        self.delete(api, name).await
    }

    async fn create_job(&self, job: &SetupJob) -> Result<()> {
        debug!(namespace = %job.namespace, image = %job.image, "Creating setup job");
        let api: Api<Job> = Api::namespaced(self.client.clone(), &job.namespace);
        self.create(api, &job_object(job)).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<JobStatus> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = api.get(name).await.map_err(map_kube_error)?;
        Ok(job_status(&job))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        self.delete(api, name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        debug!(
            namespace = %deployment.namespace,
            name = %deployment.name,
            image = %deployment.image,
            "Creating deployment"
        );
        let api: Api<K8sDeployment> = Api::namespaced(self.client.clone(), &deployment.namespace);
        self.create(api, &deployment_object(deployment)).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentStatus> {
        let api: Api<K8sDeployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(name).await.map_err(map_kube_error)?;
        Ok(deployment_status(&deployment))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K8sDeployment> = Api::namespaced(self.client.clone(), namespace);
        self.delete(api, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        debug!(namespace = %service.namespace, name = %service.name, "Creating service");
        let api: Api<K8sService> = Api::namespaced(self.client.clone(), &service.namespace);
        self.create(api, &service_object(service)).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K8sService> = Api::namespaced(self.client.clone(), namespace);
        self.delete(api, name).await
    }
}
