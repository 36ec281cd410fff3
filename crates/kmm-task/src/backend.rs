//! Execution backend: pods in the Module's namespace
//!
//! Execution units are identified by the module-name, target-kernel and
//! job-type labels plus the owner reference to the Module, so two Modules
//! of the same name in different lifetimes never see each other's pods.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kmm_common::{
    Error, Result, FIELD_MANAGER, MODULE_NAME_LABEL, TARGET_KERNEL_LABEL, TASK_TYPE_LABEL,
};
use kmm_mapper::Owner;

use crate::status::TaskKind;

/// Label selector for a module's execution units of one kind
///
/// With `kernel` set the selector narrows to that kernel version.
pub fn task_selector(module: &str, kind: TaskKind, kernel: Option<&str>) -> String {
    let mut selector = format!(
        "{MODULE_NAME_LABEL}={module},{TASK_TYPE_LABEL}={}",
        kind.as_str()
    );
    if let Some(kernel) = kernel {
        selector.push_str(&format!(",{TARGET_KERNEL_LABEL}={kernel}"));
    }
    selector
}

/// Trait abstracting the operations on execution units
///
/// Allows mocking the cluster in manager tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// The live unit for (module, kernel, kind) owned by `owner`, if any
    async fn get_module_pod_by_kernel(
        &self,
        module: &str,
        namespace: &str,
        kernel: &str,
        kind: TaskKind,
        owner: &Owner,
    ) -> Result<Option<Pod>>;

    /// All units of a kind for a module owned by `owner`, across kernels
    async fn get_module_pods(
        &self,
        module: &str,
        namespace: &str,
        kind: TaskKind,
        owner: &Owner,
    ) -> Result<Vec<Pod>>;

    /// Submit a new unit
    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    /// Request deletion of a unit
    ///
    /// Returns the deletion timestamp when the unit is retained by a
    /// finalizer, `None` when it is already gone.
    async fn delete_pod(&self, pod: &Pod) -> Result<Option<DateTime<Utc>>>;

    /// Remove `finalizer` from a unit
    async fn remove_finalizer(&self, pod: &Pod, finalizer: &str) -> Result<()>;
}

/// Kubernetes implementation of [`TaskBackend`]
pub struct KubeTaskBackend {
    client: Client,
}

impl KubeTaskBackend {
    /// Create a backend wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn pod_namespace(pod: &Pod, operation: &str) -> Result<String> {
    pod.namespace()
        .ok_or_else(|| Error::backend(operation, format!("pod {} has no namespace", pod.name_any())))
}

#[async_trait]
impl TaskBackend for KubeTaskBackend {
    async fn get_module_pod_by_kernel(
        &self,
        module: &str,
        namespace: &str,
        kernel: &str,
        kind: TaskKind,
        owner: &Owner,
    ) -> Result<Option<Pod>> {
        let selector = task_selector(module, kind, Some(kernel));
        let pods = self
            .api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        let mut owned: Vec<Pod> = pods
            .items
            .into_iter()
            .filter(|p| owner.owns(p.metadata.owner_references.as_deref()))
            .collect();

        match owned.len() {
            0 => Ok(None),
            1 => Ok(owned.pop()),
            n => Err(Error::backend(
                "get",
                format!("expected at most one {kind} pod for {module} on kernel {kernel}, found {n}"),
            )),
        }
    }

    async fn get_module_pods(
        &self,
        module: &str,
        namespace: &str,
        kind: TaskKind,
        owner: &Owner,
    ) -> Result<Vec<Pod>> {
        let selector = task_selector(module, kind, None);
        let pods = self
            .api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        Ok(pods
            .items
            .into_iter()
            .filter(|p| owner.owns(p.metadata.owner_references.as_deref()))
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let namespace = pod_namespace(pod, "create")?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self.api(&namespace).create(&params, pod).await?;
        debug!(pod = %created.name_any(), namespace = %namespace, "created pod");
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<Option<DateTime<Utc>>> {
        let namespace = pod_namespace(pod, "delete")?;
        match self
            .api(&namespace)
            .delete(&pod.name_any(), &DeleteParams::background())
            .await
        {
            Ok(res) => Ok(res
                .left()
                .and_then(|p| p.metadata.deletion_timestamp)
                .map(|t| t.0)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_finalizer(&self, pod: &Pod, finalizer: &str) -> Result<()> {
        let namespace = pod_namespace(pod, "patch")?;
        let name = pod.name_any();
        let api = self.api(&namespace);

        let current = match api.get(&name).await {
            Ok(p) => p,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers: Vec<String> = current
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();
        if finalizers.len() == current.finalizers().len() {
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}
