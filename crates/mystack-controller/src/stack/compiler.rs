// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compiles stack configuration text into a [`StackConfig`].

use thiserror::Error;
use tracing::debug;

use super::types::StackConfig;

/// Errors produced while compiling stack configuration text.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// The configuration text was empty.
    #[error("invalid empty config")]
    Empty,

    /// The YAML was malformed or did not match the stack schema.
    #[error("{message}")]
    Syntax {
        /// 1-based line of the offending token, when the parser knows it.
        line: Option<usize>,
        /// 1-based column of the offending token, when the parser knows it.
        column: Option<usize>,
        /// Parser message.
        message: String,
    },

    /// Re-serializing a compiled config failed.
    #[error("failed to serialize stack config: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

impl CompileError {
    fn from_yaml(err: serde_yaml::Error) -> Self {
        let location = err.location();
        Self::Syntax {
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
            message: err.to_string(),
        }
    }

    /// Line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } => *line,
            _ => None,
        }
    }
}

/// Parse stack configuration text.
///
/// Parsing is strict: keys outside the four sections (`setup`, `volumes`,
/// `services`, `apps`) or outside an entry's known fields are rejected, so a
/// misspelled key fails here instead of being silently dropped.
///
/// Timing fields left at zero are filled with their defaults so that the
/// returned value is canonical. No existence checks are made for volume
/// references; that is left to the cluster builder.
pub fn compile_config(text: &str) -> Result<StackConfig, CompileError> {
    if text.trim().is_empty() {
        return Err(CompileError::Empty);
    }

    let mut config: StackConfig = serde_yaml::from_str(text).map_err(CompileError::from_yaml)?;
    config.apply_defaults();

    debug!(
        setup = config.setup.is_some(),
        volumes = config.volumes.len(),
        services = config.services.len(),
        apps = config.apps.len(),
        "Compiled stack config"
    );

    Ok(config)
}

impl StackConfig {
    /// Render back to YAML. `compile_config` of the output yields an equal value.
    pub fn to_yaml(&self) -> Result<String, CompileError> {
        serde_yaml::to_string(self).map_err(CompileError::Serialize)
    }
}
