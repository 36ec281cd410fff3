//! Container registry existence check
//!
//! Only the boolean contract is used here; the transport behind it lives
//! with the caller.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use kmm_common::crd::{LocalObjectReference, TlsOptions};
use kmm_common::Result;

/// Trait abstracting image existence queries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    /// Whether `image` exists in its registry
    ///
    /// `pull_secret` names a secret in `namespace` holding registry
    /// credentials. Failures are reported as [`kmm_common::Error::RegistryQuery`].
    async fn image_exists(
        &self,
        image: &str,
        namespace: &str,
        pull_secret: Option<LocalObjectReference>,
        tls: &TlsOptions,
    ) -> Result<bool>;
}
