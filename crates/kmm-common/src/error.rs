//! Error types for kernel module management
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the module, kernel, image or secret it concerns so a
//! reconciliation-failure event on the owning Module reads on its own.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for build/sign task orchestration
#[derive(Debug, Error)]
pub enum Error {
    /// No kernel mapping of the module matches the kernel version
    #[error("no kernel mapping of module {module} matches kernel {kernel}")]
    NoMatchingKernelMapping {
        /// Module being resolved
        module: String,
        /// Concrete kernel version that was looked up
        kernel: String,
    },

    /// Placeholder substitution failed
    #[error("template error in {field}: {message}")]
    Template {
        /// Field being substituted (e.g. "containerImage")
        field: String,
        /// Description of what failed
        message: String,
    },

    /// Signing key or certificate could not be retrieved
    #[error("could not fetch secret {namespace}/{secret}: {message}")]
    SecretFetch {
        /// Name of the secret
        secret: String,
        /// Namespace of the secret
        namespace: String,
        /// Description of what failed
        message: String,
    },

    /// Execution unit specification could not be rendered
    #[error("render error [{kind}]: {message}")]
    Render {
        /// Task kind being rendered ("build" or "sign")
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Registry existence check failed
    #[error("registry query for {image} failed: {message}")]
    RegistryQuery {
        /// Image reference that was checked
        image: String,
        /// Underlying registry error
        message: String,
    },

    /// Kubernetes API error from the execution backend
    #[error("kubernetes error: {source}")]
    Backend {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Execution backend failure that did not come from the Kubernetes client
    #[error("backend {operation} failed: {message}")]
    BackendOperation {
        /// Operation that failed (get, list, create, delete, patch)
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// The caller cancelled the call or its deadline expired
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// Validation error for Module specs
    #[error("validation error for {module}: {message}")]
    Validation {
        /// Name of the module with invalid configuration
        module: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.kernelMappings[0].regexp")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Operator configuration file error
    #[error("configuration error in {path}: {message}")]
    Config {
        /// Path of the configuration file
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "build-manager", "gc")
        context: String,
    },
}

impl Error {
    /// Create a no-matching-mapping error
    pub fn no_matching_mapping(module: impl Into<String>, kernel: impl Into<String>) -> Self {
        Self::NoMatchingKernelMapping {
            module: module.into(),
            kernel: kernel.into(),
        }
    }

    /// Create a template error for the given field
    pub fn template(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a secret fetch error
    pub fn secret_fetch(
        secret: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SecretFetch {
            secret: secret.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a render error for a task kind
    pub fn render(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a registry query error
    pub fn registry_query(image: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RegistryQuery {
            image: image.into(),
            message: msg.into(),
        }
    }

    /// Create a backend error that did not originate in kube-rs
    pub fn backend(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BackendOperation {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error for an operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without module context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            module: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with module context
    pub fn validation_for(module: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            module: module.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with module context and field path
    pub fn validation_for_field(
        module: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            module: module.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error for the given file
    pub fn config(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Errors caused by the Module spec itself (no mapping, bad template,
    /// bad instructions) need a spec change and are not retryable. Errors
    /// from the cluster, the registry or a cancelled call are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NoMatchingKernelMapping { .. } => false,
            Error::Template { .. } => false,
            Error::Render { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::SecretFetch { .. } => true,
            Error::RegistryQuery { .. } => true,
            Error::BackendOperation { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Check if this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Backend { source: kube::Error::Api(ae) } if ae.code == 404
        )
    }

    /// Get the module name if this error is associated with a specific module
    pub fn module(&self) -> Option<&str> {
        match self {
            Error::NoMatchingKernelMapping { module, .. } => Some(module),
            Error::Validation { module, .. } => Some(module),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
