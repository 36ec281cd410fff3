//! Build/sign task orchestration for kernel module management
//!
//! For each (module, kernel, kind) the managers here decide whether a task
//! is needed, keep exactly one up-to-date execution unit alive, and reclaim
//! finished units after a grace period.
//!
//! Execution units are kaniko pods. Idempotency comes from a content hash
//! of the rendered pod stored as an annotation: a live pod with a different
//! hash is deleted and recreated on a later pass.

#![deny(missing_docs)]

pub mod backend;
pub mod build;
pub mod hash;
pub mod manager;
pub mod pod;
pub mod registry;
pub mod sign;
pub mod status;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use backend::{KubeTaskBackend, TaskBackend};
pub use build::BuildMaker;
pub use manager::{Manager, TaskManager};
pub use pod::PodMaker;
pub use registry::Registry;
pub use sign::SignMaker;
pub use status::{TaskKind, TaskStatus};
pub use store::{KubeResourceStore, ResourceStore};
