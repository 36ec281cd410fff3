//! Build flavor: kaniko builds the module image from the user's Dockerfile

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use kmm_common::config::Images;
use kmm_common::crd::BuildArg;
use kmm_common::{CallContext, Error, Result};
use kmm_mapper::{ModuleLoaderData, Owner};

use crate::pod::{
    assemble, destination_args, pull_tls_args, push_tls_args, secret_volume, PodMaker, PodRecipe,
};
use crate::status::TaskKind;
use crate::store::ResourceStore;

/// ConfigMap key holding the Dockerfile
pub const DOCKERFILE_KEY: &str = "dockerfile";

/// Build args every build receives ahead of the user's
fn default_build_args(mld: &ModuleLoaderData) -> Vec<BuildArg> {
    vec![
        BuildArg::new("KERNEL_VERSION", &mld.kernel_version),
        BuildArg::new("KERNEL_FULL_VERSION", &mld.kernel_version),
        BuildArg::new("MOD_NAME", &mld.name),
        BuildArg::new("MOD_NAMESPACE", &mld.namespace),
    ]
}

/// Renders build pods
pub struct BuildMaker {
    store: Arc<dyn ResourceStore>,
    builder_image: String,
}

impl BuildMaker {
    /// Create a maker reading Dockerfiles through `store`
    pub fn new(store: Arc<dyn ResourceStore>, images: &Images) -> Self {
        Self {
            store,
            builder_image: images.build.clone(),
        }
    }
}

#[async_trait]
impl PodMaker for BuildMaker {
    fn kind(&self) -> TaskKind {
        TaskKind::Build
    }

    fn applies(&self, mld: &ModuleLoaderData) -> bool {
        mld.build.is_some()
    }

    async fn make_pod(
        &self,
        ctx: &CallContext,
        mld: &ModuleLoaderData,
        owner: &Owner,
        push_image: bool,
    ) -> Result<Pod> {
        let build = mld.build.as_ref().ok_or_else(|| {
            Error::render(
                "build",
                format!("{} has no build instructions for kernel {}", mld.name, mld.kernel_version),
            )
        })?;
        let config_map = build
            .dockerfile_config_map
            .as_ref()
            .ok_or_else(|| Error::render("build", "dockerfileConfigMap is not set"))?;

        let dockerfile = ctx
            .run(
                "get dockerfile",
                self.store
                    .config_map_value(&mld.namespace, &config_map.name, DOCKERFILE_KEY),
            )
            .await?;

        let destination = mld.build_destination();
        let mut args = destination_args(&destination, push_image);
        for arg in default_build_args(mld).iter().chain(&build.build_args) {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", arg.name, arg.value));
        }
        if push_image {
            args.extend(push_tls_args(&mld.registry_tls));
        }
        args.extend(pull_tls_args(&build.base_image_registry_tls));

        let (volumes, mounts): (Vec<_>, Vec<_>) = build
            .secrets
            .iter()
            .map(|s| secret_volume(&s.name, None, &format!("/run/secrets/{}", s.name)))
            .unzip();

        debug!(
            module = %mld.name,
            kernel = %mld.kernel_version,
            destination = %destination,
            push = push_image,
            "rendering build pod"
        );

        assemble(
            PodRecipe {
                kind: TaskKind::Build,
                image: &self.builder_image,
                args,
                dockerfile,
                volumes,
                mounts,
                secrets: vec![],
            },
            mld,
            owner,
        )
    }
}
