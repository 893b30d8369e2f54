// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stack configuration document types.
//!
//! These types mirror the YAML document a user submits. Section ordering is
//! preserved: `services` and `apps` are kept as ordered lists of named
//! entries rather than hash maps, because the orchestrator creates them in
//! declaration order.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default period between readiness polls, in seconds.
pub const DEFAULT_PERIOD_SECONDS: u64 = 5;

/// Default deadline for a readiness wait, in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// A parsed stack configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// One-shot job that must succeed before any service starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<Setup>,

    /// Persistent volumes claimed for the stack.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    /// Internal services, created first and health-gated in order.
    #[serde(default, with = "named_entries", skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<NamedApp>,

    /// User-facing apps, created after all services.
    #[serde(default, with = "named_entries", skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<NamedApp>,
}

impl StackConfig {
    /// Look up a service entry by name.
    pub fn service(&self, name: &str) -> Option<&AppConfig> {
        self.services
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.config)
    }

    /// Look up an app entry by name.
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.config)
    }

    /// Replace zero timing fields with their defaults.
    pub(crate) fn apply_defaults(&mut self) {
        if let Some(setup) = self.setup.as_mut() {
            setup.period_seconds = or_default(setup.period_seconds, DEFAULT_PERIOD_SECONDS);
            setup.timeout_seconds = or_default(setup.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        }
        for entry in self.services.iter_mut().chain(self.apps.iter_mut()) {
            if let Some(probe) = entry.config.readiness_probe.as_mut() {
                probe.period_seconds = or_default(probe.period_seconds, DEFAULT_PERIOD_SECONDS);
                probe.timeout_seconds = or_default(probe.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
            }
        }
    }
}

fn or_default(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

/// The setup stage: a job that gates everything after volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Setup {
    /// Container image to run to completion.
    pub image: String,
    /// Seconds between completion checks.
    #[serde(default)]
    pub period_seconds: u64,
    /// Seconds before the setup is considered failed.
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Setup {
    /// Poll period, falling back to the default when unset.
    pub fn period(&self) -> Duration {
        Duration::from_secs(or_default(self.period_seconds, DEFAULT_PERIOD_SECONDS))
    }

    /// Wait deadline, falling back to the default when unset.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(or_default(self.timeout_seconds, DEFAULT_TIMEOUT_SECONDS))
    }
}

/// A named volume and its requested size (e.g. `1Gi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSpec {
    /// Volume name, referenced by `volumeMount.name`.
    pub name: String,
    /// Storage request passed through verbatim.
    pub storage: String,
}

/// A service or app entry together with its declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedApp {
    /// Entry key from the configuration.
    pub name: String,
    /// Entry body.
    pub config: AppConfig,
}

/// Body of a service or app entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    /// Container image.
    pub image: String,

    /// Port mappings; empty means the entry is only reachable inside the stack.
    /// External ports are unique within an entry.
    #[serde(
        default,
        deserialize_with = "distinct_external_ports",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ports: Vec<PortMapping>,

    /// Environment variables, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Readiness criteria. Only services are gated on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbe>,

    /// Volume to mount into the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mount: Option<VolumeMount>,
}

/// A single environment variable. The value is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    #[serde(default)]
    pub value: String,
}

/// Exec readiness probe with wait timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadinessProbe {
    /// Command run inside the container; exit 0 means ready. Required and
    /// non-empty.
    #[serde(deserialize_with = "non_empty_command")]
    pub command: Vec<String>,
    /// Seconds between readiness checks.
    #[serde(default)]
    pub period_seconds: u64,
    /// Seconds before the entry is considered failed.
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl ReadinessProbe {
    /// Poll period, falling back to the default when unset.
    pub fn period(&self) -> Duration {
        Duration::from_secs(or_default(self.period_seconds, DEFAULT_PERIOD_SECONDS))
    }

    /// Wait deadline, falling back to the default when unset.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(or_default(self.timeout_seconds, DEFAULT_TIMEOUT_SECONDS))
    }
}

/// Reference to a stack volume and where to mount it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeMount {
    /// Name of a volume from the `volumes` section.
    pub name: String,
    /// Absolute path inside the container.
    pub mount_path: String,
}

/// Error parsing a port mapping string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid port mapping '{input}': {reason}")]
pub struct PortParseError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// An `external:target` port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortMapping {
    /// Port exposed by the Service.
    pub external: u16,
    /// Port the container listens on.
    pub target: u16,
}

impl PortMapping {
    /// Parse `"PORT"` or `"EXTERNAL:TARGET"`.
    pub fn parse(input: &str) -> Result<Self, PortParseError> {
        let err = |reason| PortParseError {
            input: input.to_string(),
            reason,
        };
        let parse_port = |s: &str| -> Result<u16, PortParseError> {
            let port: u16 = s.trim().parse().map_err(|_| err("not a port number"))?;
            if port == 0 {
                return Err(err("port must be between 1 and 65535"));
            }
            Ok(port)
        };

        match input.split_once(':') {
            None => {
                let port = parse_port(input)?;
                Ok(Self {
                    external: port,
                    target: port,
                })
            }
            Some((external, target)) => {
                if target.contains(':') {
                    return Err(err("expected PORT or EXTERNAL:TARGET"));
                }
                Ok(Self {
                    external: parse_port(external)?,
                    target: parse_port(target)?,
                })
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.external == self.target {
            write!(f, "{}", self.target)
        } else {
            write!(f, "{}:{}", self.external, self.target)
        }
    }
}

impl std::str::FromStr for PortMapping {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PortMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortVisitor;

        impl Visitor<'_> for PortVisitor {
            type Value = PortMapping;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a port string like \"8080\" or \"8080:80\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PortMapping, E> {
                PortMapping::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PortMapping, E> {
                PortMapping::parse(&v.to_string()).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PortMapping, E> {
                PortMapping::parse(&v.to_string()).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PortVisitor)
    }
}

fn non_empty_command<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let command = Vec::<String>::deserialize(deserializer)?;
    if command.is_empty() {
        return Err(de::Error::custom("readinessProbe command must not be empty"));
    }
    Ok(command)
}

fn distinct_external_ports<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<PortMapping>, D::Error> {
    let ports = Option::<Vec<PortMapping>>::deserialize(deserializer)?.unwrap_or_default();
    for (i, mapping) in ports.iter().enumerate() {
        if ports[..i].iter().any(|p| p.external == mapping.external) {
            return Err(de::Error::custom(format!(
                "duplicate external port {}",
                mapping.external
            )));
        }
    }
    Ok(ports)
}

/// (De)serializes `Vec<NamedApp>` as an ordered YAML mapping.
mod named_entries {
    use super::*;
    use std::collections::HashSet;

    pub fn serialize<S: Serializer>(entries: &[NamedApp], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for entry in entries {
            map.serialize_entry(&entry.name, &entry.config)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<NamedApp>, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Vec<NamedApp>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of entry names to app definitions")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Vec::new())
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Vec::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut seen = HashSet::new();
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(name) = access.next_key::<String>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format!("duplicate entry '{}'", name)));
                    }
                    let config = access.next_value::<AppConfig>()?;
                    entries.push(NamedApp { name, config });
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}
