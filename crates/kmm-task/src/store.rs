//! Secret and ConfigMap lookups for rendering

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use kmm_common::{Error, Result};

/// Trait abstracting reads of Secrets and ConfigMaps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Raw bytes stored under `key` in a Secret
    ///
    /// Any failure is a [`Error::SecretFetch`]. Callers must not log the value.
    async fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>>;

    /// String stored under `key` in a ConfigMap
    async fn config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<String>;
}

/// Kubernetes implementation of [`ResourceStore`]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| Error::secret_fetch(name, namespace, e.to_string()))?;

        secret
            .data
            .and_then(|mut d| d.remove(key))
            .map(|b| b.0)
            .ok_or_else(|| Error::secret_fetch(name, namespace, format!("key {key:?} not found")))
    }

    async fn config_map_value(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api.get(name).await?;

        cm.data.and_then(|mut d| d.remove(key)).ok_or_else(|| {
            Error::render(
                "build",
                format!("key {key:?} not found in ConfigMap {namespace}/{name}"),
            )
        })
    }
}
