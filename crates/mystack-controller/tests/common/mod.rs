// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for mystack-controller integration tests.

#![allow(dead_code)]

use mystack_controller::backend::{BackendCall, MockBackend, Operation};
use mystack_controller::cluster::{Cluster, ResourceKind, build_cluster};
use mystack_controller::stack::compile_config;

/// One internal service and one routable app, no setup or volumes.
pub const BASIC: &str = r#"
services:
  svc1:
    image: registry.local/svc1:1
    ports: ["5000"]
apps:
  app1:
    image: registry.local/app1:1
    ports: ["80:5000"]
"#;

/// Setup job, a volume, two services (the first probed) and one app.
pub const FULL: &str = r#"
setup:
  image: registry.local/migrate:1
  periodSeconds: 1
  timeoutSeconds: 10
volumes:
  - name: data
    storage: 1Gi
services:
  db:
    image: postgres:16
    ports: ["5432"]
    readinessProbe:
      command: ["pg_isready"]
      periodSeconds: 1
      timeoutSeconds: 5
    volumeMount:
      name: data
      mountPath: /var/lib/postgresql/data
  cache:
    image: redis:7
    ports: ["6379"]
apps:
  web:
    image: registry.local/web:2
    ports: ["80:8080"]
"#;

pub const USER: &str = "john.doe";
pub const NAMESPACE: &str = "mystack-john-doe";

/// Compile `yaml` and build it for [`USER`].
pub fn cluster(yaml: &str) -> Cluster {
    let config = compile_config(yaml).expect("fixture config compiles");
    build_cluster(&config, USER).expect("fixture cluster builds")
}

/// Recorded calls matching `op`, as `(kind, name)` pairs.
pub async fn calls_of(backend: &MockBackend, op: Operation) -> Vec<(ResourceKind, String)> {
    backend
        .calls()
        .await
        .into_iter()
        .filter(|c| c.op == op)
        .map(|c| (c.kind, c.name))
        .collect()
}

/// Position of the first call matching `op`, `kind` and `name`.
pub fn position(calls: &[BackendCall], op: Operation, kind: ResourceKind, name: &str) -> usize {
    calls
        .iter()
        .position(|c| c.op == op && c.kind == kind && c.name == name)
        .unwrap_or_else(|| panic!("no {:?} {} '{}' call recorded", op, kind, name))
}
