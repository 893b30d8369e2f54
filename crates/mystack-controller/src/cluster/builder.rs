// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builds a [`Cluster`] from a compiled [`StackConfig`].
//!
//! Building is pure: the same configuration and username always produce an
//! equal `Cluster`.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use super::model::*;
use crate::error::{Error, Result};
use crate::stack::{NamedApp, StackConfig};

/// Builder for per-user clusters.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    namespace_prefix: String,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterBuilder {
    /// Create a builder using [`DEFAULT_NAMESPACE_PREFIX`].
    pub fn new() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
        }
    }

    /// Set the namespace prefix.
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Namespace name for `username`.
    pub fn namespace_for(&self, username: &str) -> String {
        format!("{}{}", self.namespace_prefix, sanitize(username))
    }

    /// Build the resource set for `username`.
    ///
    /// Fails with [`Error::Validation`] when the username is empty or when
    /// an entry name appears in both `services` and `apps`.
    pub fn build(&self, config: &StackConfig, username: &str) -> Result<Cluster> {
        if username.trim().is_empty() {
            return Err(Error::Validation("username must not be empty".to_string()));
        }

        let service_names: HashSet<&str> =
            config.services.iter().map(|s| s.name.as_str()).collect();
        if let Some(clash) = config
            .apps
            .iter()
            .find(|app| service_names.contains(app.name.as_str()))
        {
            return Err(Error::Validation(format!(
                "'{}' is declared in both services and apps",
                clash.name
            )));
        }

        let owner = sanitize(username);
        let namespace = self.namespace_for(username);
        // Every object carries both labels; only app workloads are routable.
        let base_labels = Labels::from([
            (OWNER_LABEL.to_string(), owner.clone()),
            (ROUTABLE_LABEL.to_string(), false.to_string()),
        ]);

        let mut volume_claims: Vec<VolumeClaim> = Vec::with_capacity(config.volumes.len());
        for volume in &config.volumes {
            // Duplicate names: the last declaration wins.
            if let Some(existing) = volume_claims.iter_mut().find(|c| c.name == volume.name) {
                existing.storage = volume.storage.clone();
                continue;
            }
            volume_claims.push(VolumeClaim {
                name: volume.name.clone(),
                namespace: namespace.clone(),
                owner: owner.clone(),
                storage: volume.storage.clone(),
                labels: base_labels.clone(),
            });
        }

        let job = config.setup.as_ref().map(|setup| SetupJob {
            name: SETUP_JOB_NAME.to_string(),
            namespace: namespace.clone(),
            owner: owner.clone(),
            image: setup.image.clone(),
            period: setup.period(),
            timeout: setup.timeout(),
            labels: base_labels.clone(),
        });

        let deployment = |entry: &NamedApp, origin: Origin| {
            if let Some(mount) = &entry.config.volume_mount
                && !volume_claims.iter().any(|c| c.name == mount.name)
            {
                warn!(
                    entry = %entry.name,
                    volume = %mount.name,
                    "Volume mount references an undeclared volume"
                );
            }

            let mut labels = base_labels.clone();
            labels.insert(APP_LABEL.to_string(), entry.name.clone());
            labels.insert(
                ROUTABLE_LABEL.to_string(),
                (origin == Origin::App).to_string(),
            );

            Deployment {
                name: entry.name.clone(),
                namespace: namespace.clone(),
                owner: owner.clone(),
                origin,
                image: entry.config.image.clone(),
                env: entry.config.env.clone(),
                ports: entry.config.ports.clone(),
                readiness_probe: entry.config.readiness_probe.clone(),
                volume_mount: entry.config.volume_mount.clone(),
                labels,
            }
        };

        let service_deployments: Vec<Deployment> = config
            .services
            .iter()
            .map(|entry| deployment(entry, Origin::Service))
            .collect();
        let app_deployments: Vec<Deployment> = config
            .apps
            .iter()
            .map(|entry| deployment(entry, Origin::App))
            .collect();

        let services: BTreeMap<String, Service> = service_deployments
            .iter()
            .chain(app_deployments.iter())
            .map(|d| (d.name.clone(), service_for(d)))
            .collect();

        Ok(Cluster {
            username: username.to_string(),
            namespace: NamespaceSpec {
                name: namespace,
                owner,
                labels: base_labels,
            },
            volume_claims,
            job,
            service_deployments,
            app_deployments,
            services,
        })
    }
}

fn service_for(deployment: &Deployment) -> Service {
    Service {
        name: deployment.name.clone(),
        namespace: deployment.namespace.clone(),
        owner: deployment.owner.clone(),
        routable: deployment.origin == Origin::App,
        ports: deployment.ports.clone(),
        selector: Labels::from([(APP_LABEL.to_string(), deployment.name.clone())]),
        labels: deployment.labels.clone(),
    }
}

fn sanitize(username: &str) -> String {
    username.replace('.', "-")
}

/// Namespace name for `username` using the default prefix.
pub fn namespace_for(username: &str) -> String {
    ClusterBuilder::new().namespace_for(username)
}

/// Build a cluster with the default builder.
pub fn build_cluster(config: &StackConfig, username: &str) -> Result<Cluster> {
    ClusterBuilder::new().build(config, username)
}
