// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for mystack-controller.

use std::fmt;
use thiserror::Error;

use crate::backend::BackendError;
use crate::cluster::ResourceKind;
use crate::readiness::ReadinessError;
use crate::stack::CompileError;

/// Stage of a stack operation an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Namespace creation.
    Namespace,
    /// Volume claim creation.
    Volumes,
    /// Setup job creation and wait.
    Setup,
    /// Services-section deployments.
    Services,
    /// Apps-section deployments.
    Apps,
    /// Stack deletion.
    Teardown,
    /// Status inspection.
    Status,
}

impl Stage {
    /// Returns the string representation of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Volumes => "volumes",
            Self::Setup => "setup",
            Self::Services => "services",
            Self::Apps => "apps",
            Self::Teardown => "teardown",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `create_*`
    Create,
    /// `get_*`
    Get,
    /// `delete_*`
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Delete => "delete",
        })
    }
}

/// Coarse error class for transports (HTTP status mapping and the like).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was malformed (400).
    InvalidInput,
    /// The stack already exists (409).
    Conflict,
    /// The stack does not exist (404).
    NotFound,
    /// The operation failed on the backend (500).
    Failed,
}

/// Controller errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Settings(#[from] crate::config::ConfigError),

    /// Stack configuration text could not be compiled.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The user's namespace already exists.
    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    /// The user's namespace does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// A backend call failed.
    #[error("{stage} stage: failed to {action} {kind} '{name}': {source}")]
    Backend {
        /// Stage the call belonged to.
        stage: Stage,
        /// Failed call.
        action: Action,
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name.
        name: String,
        /// Backend failure.
        source: BackendError,
    },

    /// A readiness wait did not succeed.
    #[error("{stage} stage: {source}")]
    Readiness {
        /// Stage the wait belonged to.
        stage: Stage,
        /// Wait failure.
        source: ReadinessError,
    },

    /// Teardown attempted every deletion but some failed.
    #[error("teardown incomplete: {failed} of {attempted} deletions failed; first: {first}")]
    TeardownIncomplete {
        /// Deletions attempted (all planned deletions).
        attempted: usize,
        /// Deletions that failed.
        failed: usize,
        /// First failure encountered.
        first: Box<Error>,
    },
}

impl Error {
    pub(crate) fn backend(
        stage: Stage,
        action: Action,
        kind: ResourceKind,
        name: &str,
        source: BackendError,
    ) -> Self {
        Self::Backend {
            stage,
            action,
            kind,
            name: name.to_string(),
            source,
        }
    }

    /// Stage the error happened in, if it is tied to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::NamespaceExists(_) => Some(Stage::Namespace),
            Self::NamespaceNotFound(_) | Self::TeardownIncomplete { .. } => Some(Stage::Teardown),
            Self::Backend { stage, .. } | Self::Readiness { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Coarse class of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compile(_) | Self::Validation(_) => ErrorKind::InvalidInput,
            Self::NamespaceExists(_) => ErrorKind::Conflict,
            Self::NamespaceNotFound(_) => ErrorKind::NotFound,
            Self::Backend { source, .. } if source.is_already_exists() => ErrorKind::Conflict,
            Self::Backend { source, .. } if source.is_not_found() => ErrorKind::NotFound,
            _ => ErrorKind::Failed,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Settings(_) => "SETTINGS_INVALID",
            Self::Compile(_) => "CONFIG_INVALID",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NamespaceExists(_) => "STACK_ALREADY_EXISTS",
            Self::NamespaceNotFound(_) => "STACK_NOT_FOUND",
            Self::Backend { .. } => "BACKEND_ERROR",
            Self::Readiness { source, .. } if source.is_timeout() => "READINESS_TIMEOUT",
            Self::Readiness { .. } => "READINESS_FAILED",
            Self::TeardownIncomplete { .. } => "TEARDOWN_INCOMPLETE",
        }
    }
}

/// Result type using the controller Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backend_error_message_names_stage_and_resource() {
        let err = Error::backend(
            Stage::Volumes,
            Action::Create,
            ResourceKind::PersistentVolumeClaim,
            "data",
            BackendError::Api("quota exceeded".into()),
        );
        assert_eq!(
            err.to_string(),
            "volumes stage: failed to create persistentvolumeclaim 'data': backend error: quota exceeded"
        );
        assert_eq!(err.stage(), Some(Stage::Volumes));
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NamespaceExists("ns".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::NamespaceNotFound("ns".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Compile(CompileError::Empty).kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_readiness_error_codes() {
        let timeout = Error::Readiness {
            stage: Stage::Setup,
            source: ReadinessError::Timeout {
                kind: ResourceKind::Job,
                name: "setup".into(),
                timeout: Duration::from_secs(1),
                polls: 1,
            },
        };
        assert_eq!(timeout.error_code(), "READINESS_TIMEOUT");
        assert!(timeout.to_string().starts_with("setup stage: job 'setup'"));

        let failed = Error::Readiness {
            stage: Stage::Setup,
            source: ReadinessError::JobFailed {
                name: "setup".into(),
                reason: "BackoffLimitExceeded".into(),
            },
        };
        assert_eq!(failed.error_code(), "READINESS_FAILED");
        assert!(failed.to_string().contains("failed to run setup job"));
    }
}
