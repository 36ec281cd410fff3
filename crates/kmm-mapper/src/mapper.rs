//! Kernel Mapping Resolver
//!
//! Turns a Module plus one concrete kernel version into [`ModuleLoaderData`].
//! Literal mappings are tried to exhaustion before any regexp mapping, then
//! the module defaults and the chosen mapping are merged field by field and
//! placeholders are expanded once per field.

use kube::ResourceExt;
use regex::Regex;
use tracing::debug;

use kmm_common::crd::{Build, BuildArg, KernelMapping, Module, Sign, TlsOptions};
use kmm_common::{Error, Result};

use crate::data::{ModuleLoaderData, Owner};
use crate::template::{substitute, KernelVariables};

/// Resolves a module's configuration for one kernel version
pub trait KernelResolver: Send + Sync {
    /// Resolve `module` for `kernel_version`
    fn resolve(&self, module: &Module, kernel_version: &str) -> Result<ModuleLoaderData>;
}

/// Default [`KernelResolver`] backed by the Module's kernel mappings
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelMapper;

impl KernelMapper {
    /// Create a mapper
    pub fn new() -> Self {
        Self
    }
}

impl KernelResolver for KernelMapper {
    fn resolve(&self, module: &Module, kernel_version: &str) -> Result<ModuleLoaderData> {
        let name = module.name_any();
        if kernel_version.is_empty() {
            return Err(Error::validation_for(&name, "kernel version must not be empty"));
        }
        let namespace = module
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "Module has no namespace"))?;
        let owner = Owner::from_module(module)?;
        let spec = &module.spec;

        let mapping = find_mapping(&name, &spec.kernel_mappings, kernel_version)?
            .ok_or_else(|| Error::no_matching_mapping(&name, kernel_version))?;

        let vars = KernelVariables::new(kernel_version, &name, &namespace);

        let image = mapping
            .container_image
            .as_deref()
            .or(spec.container_image.as_deref())
            .ok_or_else(|| {
                Error::validation_for_field(
                    &name,
                    "spec.containerImage",
                    format!("no container image for kernel {kernel_version}"),
                )
            })?;
        let container_image = substitute("containerImage", image, &vars)?;

        let build = merge_build(spec.build.as_ref(), mapping.build.as_ref())
            .map(|b| expand_build(b, &vars))
            .transpose()?;
        let sign = merge_sign(spec.sign.as_ref(), mapping.sign.as_ref())
            .map(|s| expand_sign(s, &vars))
            .transpose()?;

        let registry_tls = match &mapping.registry_tls {
            Some(tls) => merge_tls(&spec.registry_tls, tls),
            None => spec.registry_tls.clone(),
        };

        debug!(
            module = %name,
            kernel = %kernel_version,
            image = %container_image,
            build = build.is_some(),
            sign = sign.is_some(),
            "resolved kernel mapping"
        );

        Ok(ModuleLoaderData {
            name,
            namespace,
            owner,
            kernel_version: kernel_version.to_string(),
            container_image,
            build,
            sign,
            image_repo_secret: spec.image_repo_secret.clone(),
            selector: spec.selector.clone(),
            registry_tls,
        })
    }
}

/// Pick the mapping for `kernel_version`.
///
/// Any literal match wins regardless of position; otherwise the first
/// regexp that matches in list order. `Ok(None)` means nothing matched.
pub fn find_mapping<'a>(
    module: &str,
    mappings: &'a [KernelMapping],
    kernel_version: &str,
) -> Result<Option<&'a KernelMapping>> {
    if let Some(m) = mappings
        .iter()
        .find(|m| m.literal.as_deref() == Some(kernel_version))
    {
        return Ok(Some(m));
    }

    for (i, mapping) in mappings.iter().enumerate() {
        let Some(pattern) = &mapping.regexp else {
            continue;
        };
        let re = Regex::new(pattern).map_err(|e| {
            Error::validation_for_field(
                module,
                format!("spec.kernelMappings[{i}].regexp"),
                format!("invalid regexp {pattern:?}: {e}"),
            )
        })?;
        if re.is_match(kernel_version) {
            return Ok(Some(mapping));
        }
    }

    Ok(None)
}

fn overlay_vec<T: Clone>(base: &[T], overlay: &[T]) -> Vec<T> {
    if overlay.is_empty() {
        base.to_vec()
    } else {
        overlay.to_vec()
    }
}

fn merge_tls(base: &TlsOptions, overlay: &TlsOptions) -> TlsOptions {
    TlsOptions {
        insecure: base.insecure || overlay.insecure,
        insecure_skip_tls_verify: base.insecure_skip_tls_verify
            || overlay.insecure_skip_tls_verify,
    }
}

fn merge_build(base: Option<&Build>, overlay: Option<&Build>) -> Option<Build> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(b), Some(o)) => Some(Build {
            build_args: overlay_vec(&b.build_args, &o.build_args),
            dockerfile_config_map: o
                .dockerfile_config_map
                .clone()
                .or_else(|| b.dockerfile_config_map.clone()),
            secrets: overlay_vec(&b.secrets, &o.secrets),
            base_image_registry_tls: merge_tls(
                &b.base_image_registry_tls,
                &o.base_image_registry_tls,
            ),
        }),
    }
}

fn merge_sign(base: Option<&Sign>, overlay: Option<&Sign>) -> Option<Sign> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(b), Some(o)) => Some(Sign {
            unsigned_image: o.unsigned_image.clone().or_else(|| b.unsigned_image.clone()),
            unsigned_image_registry_tls: merge_tls(
                &b.unsigned_image_registry_tls,
                &o.unsigned_image_registry_tls,
            ),
            key_secret: o.key_secret.clone().or_else(|| b.key_secret.clone()),
            cert_secret: o.cert_secret.clone().or_else(|| b.cert_secret.clone()),
            files_to_sign: overlay_vec(&b.files_to_sign, &o.files_to_sign),
        }),
    }
}

fn expand_build(mut build: Build, vars: &KernelVariables) -> Result<Build> {
    build.build_args = build
        .build_args
        .into_iter()
        .enumerate()
        .map(|(i, arg)| {
            let value = substitute(&format!("build.buildArgs[{i}].value"), &arg.value, vars)?;
            Ok(BuildArg::new(arg.name, value))
        })
        .collect::<Result<_>>()?;
    Ok(build)
}

fn expand_sign(mut sign: Sign, vars: &KernelVariables) -> Result<Sign> {
    sign.unsigned_image = sign
        .unsigned_image
        .map(|image| substitute("sign.unsignedImage", &image, vars))
        .transpose()?;
    sign.files_to_sign = sign
        .files_to_sign
        .iter()
        .enumerate()
        .map(|(i, f)| substitute(&format!("sign.filesToSign[{i}]"), f, vars))
        .collect::<Result<_>>()?;
    Ok(sign)
}
