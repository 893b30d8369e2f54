// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! mystack-controller - per-user application stacks on a shared cluster
//!
//! A stack is described by a YAML document with four sections (`setup`,
//! `volumes`, `services`, `apps`). This crate compiles that document,
//! expands it into concrete resources inside a namespace owned by one
//! user, and creates or tears those resources down in order.
//!
//! # Architecture
//!
//! ```text
//!   YAML text
//!       │ compile_config
//!       ▼
//! ┌──────────────┐   build_cluster    ┌─────────────────────────────────────┐
//! │ StackConfig  │───────────────────►│ Cluster                             │
//! └──────────────┘   (+ username)     │ namespace, PVCs, job, deployments,  │
//!                                     │ services                            │
//!                                     └──────────────────┬──────────────────┘
//!                                                        │ create / delete / status
//!                                                        ▼
//!                        ┌──────────────────────────────────────────────┐
//!                        │ ClusterBackend (trait)                       │
//!                        │  ├─ KubeBackend  (Kubernetes API server)     │
//!                        │  └─ MockBackend  (in-memory, tests)          │
//!                        └──────────────────────────────────────────────┘
//!                                                        ▲
//!                                                        │ get_job / get_deployment
//!                                      ReadinessWaiter ──┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | [`compile_config`] | Parse and validate stack YAML, applying timing defaults |
//! | [`build_cluster`] | Derive the namespace and every resource descriptor for a user |
//! | [`Cluster::create`] | Namespace → volumes → setup (wait) → services (wait) → apps |
//! | [`Cluster::delete`] | Best-effort teardown: services, deployments, namespace |
//! | [`Cluster::status`] | Point-in-time readiness of the setup job and deployments |
//! | [`readiness::wait_for_completion`] | Poll one job or deployment until ready |
//!
//! If creation fails, resources created by that call are deleted in reverse
//! order unless rollback is disabled.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `MYSTACK_NAMESPACE_PREFIX` | No | `mystack-` | Prefix of per-user namespaces |
//! | `MYSTACK_ROLLBACK_ON_FAILURE` | No | `true` | Roll back partial stacks on create failure |
//! | `MYSTACK_FIELD_MANAGER` | No | `mystack-controller` | Field manager for Kubernetes writes |
//! | `KUBECONFIG` | No | - | Kubeconfig path; in-cluster discovery when unset |
//!
//! # Modules
//!
//! - [`stack`]: Stack configuration model and compiler
//! - [`cluster`]: Resource model, builder and lifecycle orchestration
//! - [`backend`]: Cluster backend trait with Kubernetes and mock implementations
//! - [`readiness`]: Polling readiness waits
//! - [`config`]: Controller configuration from environment variables
//! - [`error`]: Error types with error code mapping

#![deny(missing_docs)]

/// Cluster backends (Kubernetes, mock).
pub mod backend;

/// Per-user resource model, builder and orchestrator.
pub mod cluster;

/// Controller configuration loaded from environment variables.
pub mod config;

/// Error types with error code mapping.
pub mod error;

/// Readiness waits for setup jobs and gated deployments.
pub mod readiness;

/// Stack configuration types and compiler.
pub mod stack;

pub use backend::{BackendError, ClusterBackend, MockBackend};
pub use cluster::{Cluster, ClusterBuilder, CreateOptions, StackStatus, build_cluster};
pub use config::Config;
pub use error::{Error, ErrorKind, Result, Stage};
pub use readiness::{CancelToken, PollingWaiter, ReadinessError, ReadinessWaiter};
pub use stack::{CompileError, StackConfig, compile_config};
