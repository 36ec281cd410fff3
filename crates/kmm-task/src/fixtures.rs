//! Shared test data

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kmm_common::crd::TlsOptions;
use kmm_common::{HASH_ANNOTATION, MODULE_API_VERSION};
use kmm_mapper::{ModuleLoaderData, Owner};

pub(crate) fn owner() -> Owner {
    Owner {
        api_version: MODULE_API_VERSION.to_string(),
        kind: "Module".to_string(),
        name: "mymod".to_string(),
        uid: "uid-1".to_string(),
    }
}

pub(crate) fn mld() -> ModuleLoaderData {
    ModuleLoaderData {
        name: "mymod".to_string(),
        namespace: "kmm".to_string(),
        owner: owner(),
        kernel_version: "5.14.0-100".to_string(),
        container_image: "quay.io/org/mymod:5.14.0-100".to_string(),
        build: None,
        sign: None,
        image_repo_secret: None,
        selector: BTreeMap::new(),
        registry_tls: TlsOptions::default(),
    }
}

/// A live pod as the backend would return it
pub(crate) fn live_pod(name: &str, phase: &str, hash: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("kmm".to_string());
    pod.metadata.annotations = Some(BTreeMap::from([(
        HASH_ANNOTATION.to_string(),
        hash.to_string(),
    )]));
    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        ..Default::default()
    });
    pod
}
