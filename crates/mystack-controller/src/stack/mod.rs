// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack configuration: document types and the YAML compiler.

mod compiler;
mod types;

pub use compiler::{CompileError, compile_config};
pub use types::*;
