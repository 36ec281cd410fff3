//! Kernel mapping resolution for kernel module management
//!
//! Turns a generic `Module` plus one concrete kernel version into a
//! [`ModuleLoaderData`]: the effective image, build and sign instructions
//! for that kernel, with every kernel placeholder expanded.
//! - literal mappings win over regexp mappings regardless of list order
//! - mapping-level build/sign fields overlay the module's field by field
//! - placeholders are expanded once, after the merge

#![deny(missing_docs)]

mod data;
mod mapper;
mod template;

pub use data::{ModuleLoaderData, Owner};
pub use mapper::{find_mapping, KernelMapper, KernelResolver};
pub use template::{substitute, KernelVariables};
