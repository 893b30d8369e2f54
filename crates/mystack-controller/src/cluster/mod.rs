// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-user stack resources and their lifecycle.

mod builder;
mod model;
mod orchestrator;

pub use builder::{ClusterBuilder, build_cluster, namespace_for};
pub use model::*;
pub use orchestrator::{CreateOptions, StackStatus};
