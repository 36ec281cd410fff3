//! Common types for kernel module management: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod crd;
pub mod error;
pub mod notifier;
pub mod telemetry;
pub mod template;

pub use context::CallContext;
pub use error::Error;
pub use template::TemplateEngine;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carrying the name of the Module an execution unit belongs to
pub const MODULE_NAME_LABEL: &str = "kmm.node.kubernetes.io/module.name";

/// Label carrying the kernel version an execution unit was rendered for
pub const TARGET_KERNEL_LABEL: &str = "kmm.node.kubernetes.io/target-kernel";

/// Label distinguishing build units from sign units
pub const TASK_TYPE_LABEL: &str = "kmm.node.kubernetes.io/job-type";

/// Annotation holding the content hash of the rendered pod template
pub const HASH_ANNOTATION: &str = "kmm.node.kubernetes.io/last-hash";

/// Finalizer keeping finished execution units around for the GC delay
pub const GC_DELAY_FINALIZER: &str = "kmm.node.k8s.io/gc-delay";

/// Pod annotation carrying the generated Dockerfile
pub const DOCKERFILE_ANNOTATION: &str = "dockerfile";

/// Field manager used for patches issued by the operator
pub const FIELD_MANAGER: &str = "kmm-operator";

/// API version of the Module CRD, used in owner references
pub const MODULE_API_VERSION: &str = "kmm.sigs.x-k8s.io/v1beta1";
