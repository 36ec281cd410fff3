//! Operator configuration file
//!
//! The operator reads a single YAML file at startup and again whenever it
//! changes on disk. The `daemon` section plus the agent image is what gets
//! distributed to the per-node daemon through the
//! [`Notifier`](crate::notifier::Notifier).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Deserializer};

use crate::{Error, Result};

const DEFAULT_BUILD_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";
const DEFAULT_SIGN_IMAGE: &str = "quay.io/kmm/signimage:latest";
const DEFAULT_DAEMON_IMAGE: &str = "quay.io/kmm/worker:latest";

/// Per-node daemon settings
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Daemon {
    /// Host directory the daemon looks up firmware in
    #[serde(default)]
    pub firmware_lookup_path: Option<String>,

    /// Nodes the daemon runs on
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations of the daemon pods
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

/// Leader election settings
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LeaderElection {
    /// Whether leader election is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Name of the lease
    #[serde(default, rename = "resourceID")]
    pub resource_id: String,
}

/// Execution unit settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// How long a succeeded build/sign pod is kept before its finalizer is released
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub gc_delay: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            gc_delay: Duration::ZERO,
        }
    }
}

/// Images used by the operator's execution units
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Images {
    /// kaniko executor image running builds and signing
    #[serde(default = "default_build_image")]
    pub build: String,

    /// Image providing the `sign-file` tool
    #[serde(default = "default_sign_image")]
    pub sign: String,

    /// Per-node daemon image
    #[serde(default = "default_daemon_image")]
    pub daemon: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            build: default_build_image(),
            sign: default_sign_image(),
            daemon: default_daemon_image(),
        }
    }
}

fn default_build_image() -> String {
    DEFAULT_BUILD_IMAGE.to_string()
}

fn default_sign_image() -> String {
    DEFAULT_SIGN_IMAGE.to_string()
}

fn default_daemon_image() -> String {
    DEFAULT_DAEMON_IMAGE.to_string()
}

fn default_health_probe_addr() -> String {
    ":8081".to_string()
}

fn default_metrics_addr() -> String {
    ":8080".to_string()
}

fn default_webhook_port() -> u16 {
    9443
}

/// Top-level operator configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Per-node daemon settings
    #[serde(default)]
    pub daemon: Daemon,

    /// Health probe listen address
    #[serde(default = "default_health_probe_addr")]
    pub health_probe_bind_address: String,

    /// Metrics listen address
    #[serde(default = "default_metrics_addr")]
    pub metrics_bind_address: String,

    /// Leader election settings
    #[serde(default)]
    pub leader_election: LeaderElection,

    /// Admission webhook port
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Execution unit settings
    #[serde(default)]
    pub job: JobConfig,

    /// Images used by execution units
    #[serde(default)]
    pub images: Images,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: Daemon::default(),
            health_probe_bind_address: default_health_probe_addr(),
            metrics_bind_address: default_metrics_addr(),
            leader_election: LeaderElection::default(),
            webhook_port: default_webhook_port(),
            job: JobConfig::default(),
            images: Images::default(),
        }
    }
}

/// Configuration distributed to the per-node daemon
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DaemonConfig {
    /// Daemon settings from the configuration file
    pub daemon: Daemon,
    /// Daemon image
    pub image: String,
}

impl Config {
    /// Parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(&display, format!("could not open the configuration file: {e}"))
        })?;
        Self::from_yaml(&raw).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(display, message),
            other => other,
        })
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::config("<inline>", format!("could not decode configuration file: {e}"))
        })
    }

    /// The value handed to the daemon configuration channel
    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            daemon: self.daemon.clone(),
            image: self.images.daemon.clone(),
        }
    }
}

/// Parse a duration like `0s`, `90s`, `1h30m` or `250ms`.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if digits == 0 {
            return Err(format!("expected a number in duration {input:?}"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid number in duration {input:?}: {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let out_of_range = || format!("duration {input:?} out of range");
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(out_of_range)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(out_of_range)?),
            other => return Err(format!("unknown unit {other:?} in duration {input:?}")),
        };
        total = total.checked_add(part).ok_or_else(out_of_range)?;
        rest = &rest[unit_len..];
    }

    Ok(total)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
