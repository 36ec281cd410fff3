//! Resolved per-kernel configuration

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use kmm_common::crd::{Build, LocalObjectReference, Module, Sign, TlsOptions};
use kmm_common::{Error, Result, MODULE_API_VERSION};

/// Identity of the object owning execution units
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    /// API version of the owner
    pub api_version: String,
    /// Kind of the owner
    pub kind: String,
    /// Name of the owner
    pub name: String,
    /// UID of the owner
    pub uid: String,
}

impl Owner {
    /// Owner identity of a Module
    pub fn from_module(module: &Module) -> Result<Self> {
        let name = module.name_any();
        let uid = module
            .uid()
            .ok_or_else(|| Error::validation_for(&name, "Module has no UID"))?;
        Ok(Self {
            api_version: MODULE_API_VERSION.to_string(),
            kind: "Module".to_string(),
            name,
            uid,
        })
    }

    /// Controller owner reference for execution units
    pub fn to_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Whether `refs` contains a reference to this owner
    pub fn owns(&self, refs: Option<&[OwnerReference]>) -> bool {
        refs.unwrap_or_default().iter().any(|r| r.uid == self.uid)
    }
}

/// Fully resolved, kernel-specific task configuration
///
/// Created fresh per (module, kernel) pair by the resolver and never
/// mutated afterwards. `build`/`sign` being `None` means that phase is
/// skipped for this kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleLoaderData {
    /// Module name
    pub name: String,
    /// Module namespace
    pub namespace: String,
    /// Owner of the execution units
    pub owner: Owner,
    /// Kernel version the data was resolved for
    pub kernel_version: String,
    /// Final image holding the module for this kernel
    pub container_image: String,
    /// Effective build instructions
    pub build: Option<Build>,
    /// Effective sign instructions
    pub sign: Option<Sign>,
    /// Pull/push secret for the module image registry
    pub image_repo_secret: Option<LocalObjectReference>,
    /// Nodes the module targets
    pub selector: BTreeMap<String, String>,
    /// TLS options for the module image registry
    pub registry_tls: TlsOptions,
}

impl ModuleLoaderData {
    /// Image the build pushes unsigned modules to when a sign step follows.
    ///
    /// `quay.io/org/mod:5.14` in namespace `kmm` for module `mymod` becomes
    /// `quay.io/org/mod:kmm_mymod_kmm_unsigned`.
    pub fn intermediate_image(&self) -> String {
        let repo = strip_tag(&self.container_image);
        format!("{}:{}_{}_kmm_unsigned", repo, self.namespace, self.name)
    }

    /// Image the build step produces
    pub fn build_destination(&self) -> String {
        if self.sign.is_some() {
            self.intermediate_image()
        } else {
            self.container_image.clone()
        }
    }

    /// Image the sign step reads unsigned modules from
    ///
    /// An explicit `unsignedImage` wins; otherwise, when a build runs for
    /// this kernel, its intermediate image.
    pub fn unsigned_image(&self) -> Option<String> {
        let sign = self.sign.as_ref()?;
        match &sign.unsigned_image {
            Some(image) => Some(image.clone()),
            None if self.build.is_some() => Some(self.intermediate_image()),
            None => None,
        }
    }
}

/// Drop the tag or digest from an image reference, keeping registry ports
fn strip_tag(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(colon) => &image[..last_slash + colon],
        None => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mld() -> ModuleLoaderData {
        ModuleLoaderData {
            name: "mymod".to_string(),
            namespace: "kmm".to_string(),
            owner: Owner {
                api_version: MODULE_API_VERSION.to_string(),
                kind: "Module".to_string(),
                name: "mymod".to_string(),
                uid: "uid-1".to_string(),
            },
            kernel_version: "5.14.0-100".to_string(),
            container_image: "registry.local:5000/org/mymod:5.14.0-100".to_string(),
            build: None,
            sign: None,
            image_repo_secret: None,
            selector: BTreeMap::new(),
            registry_tls: TlsOptions::default(),
        }
    }

    #[test]
    fn strip_tag_keeps_registry_port() {
        assert_eq!(strip_tag("registry.local:5000/org/mod:1.0"), "registry.local:5000/org/mod");
        assert_eq!(strip_tag("registry.local:5000/org/mod"), "registry.local:5000/org/mod");
        assert_eq!(strip_tag("quay.io/org/mod@sha256:abcd"), "quay.io/org/mod");
        assert_eq!(strip_tag("mod:latest"), "mod");
    }

    #[test]
    fn intermediate_image_is_namespaced_tag() {
        assert_eq!(
            mld().intermediate_image(),
            "registry.local:5000/org/mymod:kmm_mymod_kmm_unsigned"
        );
    }

    #[test]
    fn build_pushes_final_image_without_sign() {
        let mut data = mld();
        data.build = Some(Build::default());
        assert_eq!(data.build_destination(), data.container_image);

        data.sign = Some(Sign::default());
        assert_eq!(data.build_destination(), data.intermediate_image());
    }

    #[test]
    fn unsigned_image_prefers_explicit_value() {
        let mut data = mld();
        assert_eq!(data.unsigned_image(), None);

        data.sign = Some(Sign::default());
        assert_eq!(data.unsigned_image(), None);

        data.build = Some(Build::default());
        assert_eq!(data.unsigned_image(), Some(data.intermediate_image()));

        data.sign = Some(Sign {
            unsigned_image: Some("quay.io/org/unsigned:1".to_string()),
            ..Default::default()
        });
        assert_eq!(data.unsigned_image().as_deref(), Some("quay.io/org/unsigned:1"));
    }

    #[test]
    fn owner_reference_is_controller() {
        let r = mld().owner.to_owner_reference();
        assert_eq!(r.kind, "Module");
        assert_eq!(r.uid, "uid-1");
        assert_eq!(r.controller, Some(true));
        assert_eq!(r.block_owner_deletion, Some(true));
    }

    #[test]
    fn owns_matches_by_uid() {
        let owner = mld().owner;
        let refs = vec![owner.to_owner_reference()];
        assert!(owner.owns(Some(&refs)));
        assert!(!owner.owns(None));

        let mut other = owner.to_owner_reference();
        other.uid = "uid-2".to_string();
        assert!(!owner.owns(Some(&[other])));
    }
}
