//! Custom Resource Definitions for kernel module management
//!
//! Only the subset of the Module schema that feeds kernel resolution and
//! build/sign task execution lives here.

mod module;

pub use module::{
    Build, BuildArg, KernelMapping, LocalObjectReference, Module, ModuleSpec, Sign, TlsOptions,
};
