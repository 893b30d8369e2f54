// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concrete resource descriptors for one user's stack.
//!
//! Descriptors are plain values: they carry everything a backend needs to
//! materialize the resource and nothing about its live state.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::stack::{EnvVar, PortMapping, ReadinessProbe, VolumeMount};

/// Label carrying the sanitized owner username.
pub const OWNER_LABEL: &str = "mystack.io/owner";

/// Label marking whether a workload is externally routable.
pub const ROUTABLE_LABEL: &str = "mystack.io/routable";

/// Label used as the pod selector.
pub const APP_LABEL: &str = "app";

/// Name of the setup job inside a stack namespace.
pub const SETUP_JOB_NAME: &str = "setup";

/// Prefix prepended to the sanitized username to form the namespace.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "mystack-";

/// Label set attached to a resource.
pub type Labels = BTreeMap<String, String>;

/// Kinds of resources a stack is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Per-user namespace.
    Namespace,
    /// Persistent volume claim.
    PersistentVolumeClaim,
    /// Setup job.
    Job,
    /// Deployment for a service or app.
    Deployment,
    /// Network identity for a deployment.
    Service,
}

impl ResourceKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::PersistentVolumeClaim => "persistentvolumeclaim",
            Self::Job => "job",
            Self::Deployment => "deployment",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which configuration section a deployment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// `services` section: internal, health-gated.
    Service,
    /// `apps` section: externally routable, never gated.
    App,
}

/// Namespace descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSpec {
    /// Namespace name.
    pub name: String,
    /// Owner username.
    pub owner: String,
    /// Labels.
    pub labels: Labels,
}

/// Persistent volume claim descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaim {
    /// Claim name (the volume name).
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Owner username.
    pub owner: String,
    /// Storage request, e.g. `1Gi`.
    pub storage: String,
    /// Labels.
    pub labels: Labels,
}

/// Setup job descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupJob {
    /// Job name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Owner username.
    pub owner: String,
    /// Container image.
    pub image: String,
    /// Completion poll period.
    pub period: Duration,
    /// Completion deadline.
    pub timeout: Duration,
    /// Labels.
    pub labels: Labels,
}

/// Deployment descriptor for a service or app entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Deployment name (the entry name).
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Owner username.
    pub owner: String,
    /// Section the entry came from.
    pub origin: Origin,
    /// Container image.
    pub image: String,
    /// Environment, in declaration order.
    pub env: Vec<EnvVar>,
    /// Port mappings; the container listens on each `target`.
    pub ports: Vec<PortMapping>,
    /// Readiness probe, if declared.
    pub readiness_probe: Option<ReadinessProbe>,
    /// Volume mount, if declared.
    pub volume_mount: Option<VolumeMount>,
    /// Labels, also used as the pod template labels.
    pub labels: Labels,
}

impl Deployment {
    /// Whether creation must block on this deployment becoming ready.
    pub fn is_gated(&self) -> bool {
        self.origin == Origin::Service && self.readiness_probe.is_some()
    }

    /// Distinct container ports, in declaration order.
    pub fn container_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::with_capacity(self.ports.len());
        for mapping in &self.ports {
            if !ports.contains(&mapping.target) {
                ports.push(mapping.target);
            }
        }
        ports
    }
}

/// Service descriptor exposing one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Service name (same as its deployment).
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Owner username.
    pub owner: String,
    /// Whether the service is reachable from outside the stack.
    pub routable: bool,
    /// Exposed `external -> target` ports.
    pub ports: Vec<PortMapping>,
    /// Pod selector.
    pub selector: Labels,
    /// Labels.
    pub labels: Labels,
}

/// One user's stack as a set of resources, in creation order.
///
/// A `Cluster` is rebuilt from configuration on every operation and is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Owner username, as given.
    pub username: String,
    /// Namespace holding every other resource.
    pub namespace: NamespaceSpec,
    /// Volume claims.
    pub volume_claims: Vec<VolumeClaim>,
    /// Setup job, if the stack has one.
    pub job: Option<SetupJob>,
    /// Deployments from the `services` section, in declaration order.
    pub service_deployments: Vec<Deployment>,
    /// Deployments from the `apps` section, in declaration order.
    pub app_deployments: Vec<Deployment>,
    /// Service for each deployment, keyed by deployment name.
    pub services: BTreeMap<String, Service>,
}

impl Cluster {
    /// All deployments: services first, then apps.
    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.service_deployments
            .iter()
            .chain(self.app_deployments.iter())
    }

    /// The service exposing `deployment`.
    pub fn service_for(&self, deployment: &Deployment) -> Option<&Service> {
        self.services.get(&deployment.name)
    }

    /// Services reachable from outside the stack, in creation order.
    pub fn routable_services(&self) -> impl Iterator<Item = &Service> {
        self.deployments()
            .filter_map(|d| self.service_for(d))
            .filter(|s| s.routable)
    }

    /// Number of resources a full create issues.
    pub fn resource_count(&self) -> usize {
        1 + self.volume_claims.len()
            + usize::from(self.job.is_some())
            + self.service_deployments.len()
            + self.app_deployments.len()
            + self.services.len()
    }
}
