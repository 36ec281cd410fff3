//! Task managers: should-sync, sync and delayed garbage collection
//!
//! One [`TaskManager`] per task kind. Both kinds share the protocol and only
//! differ in the [`PodMaker`] that renders their units. Managers hold no
//! state between calls; every call re-reads the backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use kmm_common::{CallContext, Result, GC_DELAY_FINALIZER};
use kmm_mapper::{ModuleLoaderData, Owner};

use crate::backend::TaskBackend;
use crate::build::BuildMaker;
use crate::pod::PodMaker;
use crate::registry::Registry;
use crate::sign::SignMaker;
use crate::status::{is_pod_changed, pod_phase, pod_status, TaskKind, TaskStatus};

/// Contract shared by the build and sign managers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Manager: Send + Sync {
    /// Whether a task is needed for `mld`
    ///
    /// `false` when `mld` has no instructions for this kind or the target
    /// image already exists.
    async fn should_sync(&self, ctx: &CallContext, mld: &ModuleLoaderData) -> Result<bool>;

    /// Make sure a unit rendered from the current `mld` exists and report its status
    async fn sync(
        &self,
        ctx: &CallContext,
        mld: &ModuleLoaderData,
        push_image: bool,
        owner: &Owner,
    ) -> Result<TaskStatus>;

    /// Reclaim succeeded units of a module
    ///
    /// Returns the names of units whose deletion guard was released.
    async fn garbage_collect(
        &self,
        ctx: &CallContext,
        module: &str,
        namespace: &str,
        owner: &Owner,
        gc_delay: Duration,
    ) -> Result<Vec<String>>;
}

/// [`Manager`] backed by a [`PodMaker`] and a [`TaskBackend`]
pub struct TaskManager {
    maker: Arc<dyn PodMaker>,
    backend: Arc<dyn TaskBackend>,
    registry: Arc<dyn Registry>,
}

impl TaskManager {
    /// Create a manager for whatever kind `maker` renders
    pub fn new(
        maker: Arc<dyn PodMaker>,
        backend: Arc<dyn TaskBackend>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            maker,
            backend,
            registry,
        }
    }

    /// Build manager
    pub fn build(
        maker: BuildMaker,
        backend: Arc<dyn TaskBackend>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self::new(Arc::new(maker), backend, registry)
    }

    /// Sign manager
    pub fn sign(
        maker: SignMaker,
        backend: Arc<dyn TaskBackend>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self::new(Arc::new(maker), backend, registry)
    }

    /// Task kind this manager handles
    pub fn kind(&self) -> TaskKind {
        self.maker.kind()
    }
}

#[async_trait]
impl Manager for TaskManager {
    async fn should_sync(&self, ctx: &CallContext, mld: &ModuleLoaderData) -> Result<bool> {
        let kind = self.kind();
        if !self.maker.applies(mld) {
            debug!(module = %mld.name, kernel = %mld.kernel_version, %kind, "no instructions, skipping");
            return Ok(false);
        }

        let exists = ctx
            .run(
                "image exists",
                self.registry.image_exists(
                    &mld.container_image,
                    &mld.namespace,
                    mld.image_repo_secret.clone(),
                    &mld.registry_tls,
                ),
            )
            .await?;

        if exists {
            debug!(image = %mld.container_image, %kind, "image already exists");
        }
        Ok(!exists)
    }

    async fn sync(
        &self,
        ctx: &CallContext,
        mld: &ModuleLoaderData,
        push_image: bool,
        owner: &Owner,
    ) -> Result<TaskStatus> {
        ctx.check("sync")?;
        let kind = self.kind();
        let desired = self.maker.make_pod(ctx, mld, owner, push_image).await?;

        let existing = ctx
            .run(
                "get pod",
                self.backend.get_module_pod_by_kernel(
                    &mld.name,
                    &mld.namespace,
                    &mld.kernel_version,
                    kind,
                    owner,
                ),
            )
            .await?;

        let Some(existing) = existing else {
            ctx.run("create pod", self.backend.create_pod(&desired)).await?;
            info!(module = %mld.name, kernel = %mld.kernel_version, %kind, "created pod");
            return Ok(TaskStatus::Created);
        };

        if is_pod_changed(&existing, &desired) {
            let pod = existing.name_any();
            info!(
                module = %mld.name,
                kernel = %mld.kernel_version,
                %kind,
                pod = %pod,
                "pod template changed, deleting"
            );
            ctx.run(
                "remove finalizer",
                self.backend.remove_finalizer(&existing, GC_DELAY_FINALIZER),
            )
            .await?;
            ctx.run("delete pod", self.backend.delete_pod(&existing))
                .await?;
            return Ok(TaskStatus::InProgress);
        }

        let status = pod_status(&existing)?;
        debug!(
            module = %mld.name,
            kernel = %mld.kernel_version,
            %kind,
            pod = %existing.name_any(),
            %status,
            "pod unchanged"
        );
        Ok(status)
    }

    async fn garbage_collect(
        &self,
        ctx: &CallContext,
        module: &str,
        namespace: &str,
        owner: &Owner,
        gc_delay: Duration,
    ) -> Result<Vec<String>> {
        ctx.check("garbage collect")?;
        let kind = self.kind();
        let pods = ctx
            .run(
                "list pods",
                self.backend.get_module_pods(module, namespace, kind, owner),
            )
            .await?;

        // A delay past chrono's range never expires
        let delay = chrono::Duration::from_std(gc_delay).ok();

        let mut collected = Vec::new();
        for pod in pods {
            if pod_phase(&pod) != Some("Succeeded") {
                continue;
            }
            let name = pod.name_any();

            let deleted_at = match &pod.metadata.deletion_timestamp {
                Some(t) => Some(t.0),
                None => {
                    let ts = ctx
                        .run("delete pod", self.backend.delete_pod(&pod))
                        .await?;
                    debug!(module = %module, %kind, pod = %name, "marked pod for deletion");
                    ts
                }
            };

            let Some(deleted_at) = deleted_at else {
                // Gone without waiting on the finalizer
                collected.push(name);
                continue;
            };

            let release_at = delay.and_then(|d| deleted_at.checked_add_signed(d));
            if gc_delay.is_zero() || release_at.is_some_and(|t| Utc::now() >= t) {
                ctx.run(
                    "remove finalizer",
                    self.backend.remove_finalizer(&pod, GC_DELAY_FINALIZER),
                )
                .await?;
                info!(module = %module, %kind, pod = %name, "released gc delay finalizer");
                collected.push(name);
            }
        }

        Ok(collected)
    }
}
