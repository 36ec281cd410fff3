//! Pod assembly shared by the build and sign makers
//!
//! Both flavors run kaniko against a generated Dockerfile. The Dockerfile is
//! stored in a pod annotation and projected into `/workspace/Dockerfile`
//! through a downward-API volume, so the pod needs nothing but itself.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, DownwardAPIVolumeFile, DownwardAPIVolumeSource, KeyToPath, ObjectFieldSelector,
    Pod, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[cfg(test)]
use mockall::automock;

use kmm_common::crd::{LocalObjectReference, TlsOptions};
use kmm_common::{
    CallContext, Result, DOCKERFILE_ANNOTATION, GC_DELAY_FINALIZER, HASH_ANNOTATION,
    MODULE_NAME_LABEL, TARGET_KERNEL_LABEL, TASK_TYPE_LABEL,
};
use kmm_mapper::{ModuleLoaderData, Owner};

use crate::hash::template_hash;
use crate::status::TaskKind;

const DOCKERFILE_VOLUME: &str = "dockerfile";
const WORKSPACE_DIR: &str = "/workspace";
const DOCKER_CONFIG_DIR: &str = "/kaniko/.docker";

/// Renders the execution unit of one task kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodMaker: Send + Sync {
    /// Task kind this maker renders
    fn kind(&self) -> TaskKind;

    /// Whether `mld` asks for this task at all
    fn applies(&self, mld: &ModuleLoaderData) -> bool;

    /// Render the pod for `mld`, labeled and hashed, owned by `owner`
    ///
    /// `push_image = false` renders a build that is never pushed.
    async fn make_pod(
        &self,
        ctx: &CallContext,
        mld: &ModuleLoaderData,
        owner: &Owner,
        push_image: bool,
    ) -> Result<Pod>;
}

/// Identity labels of a unit
pub fn task_labels(mld: &ModuleLoaderData, kind: TaskKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MODULE_NAME_LABEL.to_string(), mld.name.clone()),
        (TARGET_KERNEL_LABEL.to_string(), mld.kernel_version.clone()),
        (TASK_TYPE_LABEL.to_string(), kind.as_str().to_string()),
    ])
}

/// `--destination <image>` or `--no-push`
pub(crate) fn destination_args(image: &str, push_image: bool) -> Vec<String> {
    if push_image {
        vec!["--destination".to_string(), image.to_string()]
    } else {
        vec!["--no-push".to_string()]
    }
}

/// kaniko flags for the destination registry
pub(crate) fn push_tls_args(tls: &TlsOptions) -> Vec<String> {
    let mut args = Vec::new();
    if tls.insecure {
        args.push("--insecure".to_string());
    }
    if tls.insecure_skip_tls_verify {
        args.push("--skip-tls-verify".to_string());
    }
    args
}

/// kaniko flags for registries images are pulled from
pub(crate) fn pull_tls_args(tls: &TlsOptions) -> Vec<String> {
    let mut args = Vec::new();
    if tls.insecure {
        args.push("--insecure-pull".to_string());
    }
    if tls.insecure_skip_tls_verify {
        args.push("--skip-tls-verify-pull".to_string());
    }
    args
}

/// Volume plus mount for a secret
pub(crate) fn secret_volume(
    secret: &str,
    items: Option<Vec<KeyToPath>>,
    mount_path: &str,
) -> (Volume, VolumeMount) {
    let name = format!("secret-{secret}");
    let volume = Volume {
        name: name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            items,
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name,
        read_only: Some(true),
        mount_path: mount_path.to_string(),
        ..Default::default()
    };
    (volume, mount)
}

/// Single `key` of a secret projected as `path`
pub(crate) fn key_item(key: &str, path: &str) -> Option<Vec<KeyToPath>> {
    Some(vec![KeyToPath {
        key: key.to_string(),
        path: path.to_string(),
        ..Default::default()
    }])
}

fn dockerfile_volume() -> (Volume, VolumeMount) {
    let volume = Volume {
        name: DOCKERFILE_VOLUME.to_string(),
        downward_api: Some(DownwardAPIVolumeSource {
            items: Some(vec![DownwardAPIVolumeFile {
                path: "Dockerfile".to_string(),
                field_ref: Some(ObjectFieldSelector {
                    field_path: format!("metadata.annotations['{DOCKERFILE_ANNOTATION}']"),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mount = VolumeMount {
        name: DOCKERFILE_VOLUME.to_string(),
        read_only: Some(true),
        mount_path: WORKSPACE_DIR.to_string(),
        ..Default::default()
    };
    (volume, mount)
}

fn pull_secret_volume(secret: &LocalObjectReference) -> (Volume, VolumeMount) {
    secret_volume(
        &secret.name,
        key_item(".dockerconfigjson", "config.json"),
        DOCKER_CONFIG_DIR,
    )
}

/// Everything flavor-specific about a unit
pub(crate) struct PodRecipe<'a> {
    pub kind: TaskKind,
    pub image: &'a str,
    pub args: Vec<String>,
    pub dockerfile: String,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    /// Secret bytes embedded in the unit, hashed but never stored
    pub secrets: Vec<&'a [u8]>,
}

/// Assemble, hash and label the unit described by `recipe`
pub(crate) fn assemble(
    recipe: PodRecipe<'_>,
    mld: &ModuleLoaderData,
    owner: &Owner,
) -> Result<Pod> {
    let PodRecipe {
        kind,
        image,
        args,
        dockerfile,
        mut volumes,
        mut mounts,
        secrets,
    } = recipe;

    let (v, m) = dockerfile_volume();
    volumes.push(v);
    mounts.push(m);

    if let Some(secret) = &mld.image_repo_secret {
        let (v, m) = pull_secret_volume(secret);
        volumes.push(v);
        mounts.push(m);
    }

    let spec = PodSpec {
        containers: vec![Container {
            name: "kaniko".to_string(),
            image: Some(image.to_string()),
            args: Some(args),
            volume_mounts: Some(mounts),
            ..Default::default()
        }],
        node_selector: (!mld.selector.is_empty()).then(|| mld.selector.clone()),
        restart_policy: Some("Never".to_string()),
        volumes: Some(volumes),
        ..Default::default()
    };

    let mut annotations =
        BTreeMap::from([(DOCKERFILE_ANNOTATION.to_string(), dockerfile)]);

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            annotations: Some(annotations.clone()),
            ..Default::default()
        }),
        spec: Some(spec.clone()),
    };
    let hash = template_hash(&template, &secrets)?;
    annotations.insert(HASH_ANNOTATION.to_string(), hash.to_string());

    Ok(Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-{}-", mld.name, kind.as_str())),
            namespace: Some(mld.namespace.clone()),
            labels: Some(task_labels(mld, kind)),
            annotations: Some(annotations),
            owner_references: Some(vec![owner.to_owner_reference()]),
            finalizers: Some(vec![GC_DELAY_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
