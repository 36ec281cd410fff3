//! Module CRD types
//!
//! Defines `Module`, the desired state of one out-of-tree kernel module: a
//! default container image with optional build and sign instructions, and an
//! ordered list of kernel mappings that override them per kernel version.

use std::collections::BTreeMap;

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

// =============================================================================
// Shared references and options
// =============================================================================

/// Reference to an object in the Module's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Name of the referenced object
    pub name: String,
}

impl LocalObjectReference {
    /// Create a reference to `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// TLS options for talking to a registry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// Use plain HTTP
    #[serde(default)]
    pub insecure: bool,

    /// Use HTTPS without verifying the server certificate
    #[serde(default, rename = "insecureSkipTLSVerify")]
    pub insecure_skip_tls_verify: bool,
}

/// A single `--build-arg` passed to the image builder
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BuildArg {
    /// Argument name
    pub name: String,
    /// Argument value; may contain kernel placeholders
    pub value: String,
}

impl BuildArg {
    /// Create a build argument
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Build / Sign
// =============================================================================

/// Instructions for building the module image in-cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// Extra build arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<BuildArg>,

    /// ConfigMap holding the Dockerfile under the `dockerfile` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_config_map: Option<LocalObjectReference>,

    /// Secrets mounted into the build at `/run/secrets/<name>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<LocalObjectReference>,

    /// TLS options for pulling base images
    #[serde(default, rename = "baseImageRegistryTLS")]
    pub base_image_registry_tls: TlsOptions,
}

/// Instructions for signing the module files of an image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sign {
    /// Image containing the unsigned module files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_image: Option<String>,

    /// TLS options for pulling the unsigned image
    #[serde(default, rename = "unsignedImageRegistryTLS")]
    pub unsigned_image_registry_tls: TlsOptions,

    /// Secret holding the private signing key under the `key` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<LocalObjectReference>,

    /// Secret holding the public certificate under the `cert` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret: Option<LocalObjectReference>,

    /// Module files to sign; empty means every `.ko` under the modules dir
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_to_sign: Vec<String>,
}

// =============================================================================
// Kernel mappings
// =============================================================================

/// Per-kernel override of the module's defaults
///
/// Exactly one of `literal` and `regexp` is set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KernelMapping {
    /// Kernel version matched by string equality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,

    /// Regular expression matched against the kernel version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,

    /// Image overriding the module's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    /// Build instructions overlaid on the module's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,

    /// Sign instructions overlaid on the module's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<Sign>,

    /// Registry TLS options overriding the module's
    #[serde(default, rename = "registryTLS", skip_serializing_if = "Option::is_none")]
    pub registry_tls: Option<TlsOptions>,
}

impl KernelMapping {
    /// Mapping that matches one kernel version exactly
    pub fn literal(version: impl Into<String>) -> Self {
        Self {
            literal: Some(version.into()),
            ..Default::default()
        }
    }

    /// Mapping that matches kernel versions against a regular expression
    pub fn regexp(pattern: impl Into<String>) -> Self {
        Self {
            regexp: Some(pattern.into()),
            ..Default::default()
        }
    }
}

// =============================================================================
// CRD
// =============================================================================

/// Desired state of an out-of-tree kernel module
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kmm.sigs.x-k8s.io",
    version = "v1beta1",
    kind = "Module",
    plural = "modules",
    shortname = "mod",
    namespaced,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.containerImage"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// Default image holding the module; may contain kernel placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    /// Default build instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,

    /// Default sign instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<Sign>,

    /// Default TLS options for the module image registry
    #[serde(default, rename = "registryTLS")]
    pub registry_tls: TlsOptions,

    /// Pull/push secret for the module image registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repo_secret: Option<LocalObjectReference>,

    /// Nodes the module targets
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Ordered per-kernel overrides
    #[serde(default)]
    pub kernel_mappings: Vec<KernelMapping>,
}

impl ModuleSpec {
    /// Validate the spec
    ///
    /// Every mapping must set exactly one of `literal`/`regexp`, regexps must
    /// compile, and every mapping must end up with a container image either
    /// from itself or from the module default.
    pub fn validate(&self, module: &str) -> Result<(), Error> {
        if self.kernel_mappings.is_empty() {
            return Err(Error::validation_for_field(
                module,
                "spec.kernelMappings",
                "at least one kernel mapping is required",
            ));
        }

        for (i, mapping) in self.kernel_mappings.iter().enumerate() {
            let field = format!("spec.kernelMappings[{i}]");
            match (&mapping.literal, &mapping.regexp) {
                (Some(_), Some(_)) => {
                    return Err(Error::validation_for_field(
                        module,
                        field,
                        "literal and regexp are mutually exclusive",
                    ))
                }
                (None, None) => {
                    return Err(Error::validation_for_field(
                        module,
                        field,
                        "one of literal or regexp is required",
                    ))
                }
                (None, Some(pattern)) => {
                    Regex::new(pattern).map_err(|e| {
                        Error::validation_for_field(
                            module,
                            format!("{field}.regexp"),
                            format!("invalid regexp {pattern:?}: {e}"),
                        )
                    })?;
                }
                (Some(literal), None) if literal.is_empty() => {
                    return Err(Error::validation_for_field(
                        module,
                        format!("{field}.literal"),
                        "literal must not be empty",
                    ))
                }
                (Some(_), None) => {}
            }

            if mapping.container_image.is_none() && self.container_image.is_none() {
                return Err(Error::validation_for_field(
                    module,
                    format!("{field}.containerImage"),
                    "no container image set on the mapping or the module",
                ));
            }
        }

        Ok(())
    }
}
