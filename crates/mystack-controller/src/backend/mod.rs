// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster backends.
//!
//! - [`MockBackend`]: in-memory backend for tests
//! - [`KubeBackend`]: Kubernetes API server (requires the `kube` feature)

#[cfg(feature = "kube")]
pub mod kubernetes;
pub mod mock;
mod traits;

#[cfg(feature = "kube")]
pub use kubernetes::KubeBackend;
pub use mock::{BackendCall, MockBackend, Operation};
pub use traits::*;
