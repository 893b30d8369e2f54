// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for mystack-controller.

use std::path::PathBuf;

use crate::cluster::DEFAULT_NAMESPACE_PREFIX;

/// Default field manager recorded on created Kubernetes objects.
pub const DEFAULT_FIELD_MANAGER: &str = "mystack-controller";

/// Controller configuration loaded from environment variables.
///
/// Loaded once at startup and passed explicitly to whatever needs it;
/// nothing reads the environment after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prefix for per-user namespaces
    pub namespace_prefix: String,
    /// Delete already-created resources when a create fails
    pub rollback_on_failure: bool,
    /// Field manager name for Kubernetes writes
    pub field_manager: String,
    /// Explicit kubeconfig; in-cluster or default discovery when unset
    pub kubeconfig: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            rollback_on_failure: true,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            kubeconfig: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let namespace_prefix = lookup("MYSTACK_NAMESPACE_PREFIX")
            .unwrap_or_else(|| DEFAULT_NAMESPACE_PREFIX.to_string());
        if !is_dns_label_prefix(&namespace_prefix) {
            return Err(ConfigError::InvalidNamespacePrefix(namespace_prefix));
        }

        let rollback_on_failure = match lookup("MYSTACK_ROLLBACK_ON_FAILURE") {
            None => true,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool {
                var: "MYSTACK_ROLLBACK_ON_FAILURE",
                value,
            })?,
        };

        let field_manager = lookup("MYSTACK_FIELD_MANAGER")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_FIELD_MANAGER.to_string());

        let kubeconfig = lookup("KUBECONFIG")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            namespace_prefix,
            rollback_on_failure,
            field_manager,
            kubeconfig,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn is_dns_label_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() < 63
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !prefix.starts_with('-')
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The namespace prefix is not usable in a DNS label.
    #[error("Invalid namespace prefix: {0:?}")]
    InvalidNamespacePrefix(String),
    /// A boolean variable has an unrecognised value.
    #[error("Invalid boolean for {var}: {value:?}")]
    InvalidBool {
        /// Variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },
}
