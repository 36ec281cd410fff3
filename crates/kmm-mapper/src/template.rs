//! Kernel placeholder substitution
//!
//! Image names and file paths may carry `${VARIABLE}` placeholders that are
//! expanded for the concrete kernel a task runs for. Rendering goes through
//! the shared [`TemplateEngine`], so an unknown or unterminated placeholder
//! fails instead of passing through.

use std::collections::BTreeMap;

use kmm_common::{Result, TemplateEngine};

/// Values available to placeholders for one (module, kernel) pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelVariables {
    full_version: String,
    components: Option<[String; 3]>,
    module_name: String,
    module_namespace: String,
}

impl KernelVariables {
    /// Variables for `kernel_version` of the given module
    pub fn new(
        kernel_version: impl Into<String>,
        module_name: impl Into<String>,
        module_namespace: impl Into<String>,
    ) -> Self {
        let full_version = kernel_version.into();
        let components = numeric_components(&full_version);
        Self {
            full_version,
            components,
            module_name: module_name.into(),
            module_namespace: module_namespace.into(),
        }
    }

    /// Template context; the X/Y/Z variables exist only for numeric versions
    fn context(&self) -> BTreeMap<&'static str, String> {
        let mut ctx = BTreeMap::from([
            ("KERNEL_FULL_VERSION", self.full_version.clone()),
            ("KERNEL_VERSION", self.full_version.clone()),
            ("MOD_NAME", self.module_name.clone()),
            ("MOD_NAMESPACE", self.module_namespace.clone()),
        ]);
        if let Some([x, y, z]) = &self.components {
            ctx.insert("KERNEL_XYZ", format!("{x}.{y}.{z}"));
            ctx.insert("KERNEL_X", x.clone());
            ctx.insert("KERNEL_Y", y.clone());
            ctx.insert("KERNEL_Z", z.clone());
        }
        ctx
    }
}

/// Leading `X.Y.Z` of a kernel version such as `5.14.0-284.el9.x86_64`
fn numeric_components(version: &str) -> Option<[String; 3]> {
    let mut parts = version.split(|c: char| c == '.' || c == '-' || c == '+');
    let mut next_number = || {
        parts
            .next()
            .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    };
    Some([next_number()?, next_number()?, next_number()?])
}

/// Expand every placeholder in `input`.
///
/// `field` names the value being expanded and is reported in errors.
pub fn substitute(field: &str, input: &str, vars: &KernelVariables) -> Result<String> {
    if !input.contains("${") {
        return Ok(input.to_string());
    }
    TemplateEngine::shared()?.render(field, input, vars.context())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vars() -> KernelVariables {
        KernelVariables::new("5.14.0-284.el9.x86_64", "mymod", "kmm")
    }

    #[rstest]
    #[case("quay.io/org/mod:${KERNEL_FULL_VERSION}", "quay.io/org/mod:5.14.0-284.el9.x86_64")]
    #[case("quay.io/org/mod:${KERNEL_VERSION}", "quay.io/org/mod:5.14.0-284.el9.x86_64")]
    #[case("quay.io/org/mod:${KERNEL_XYZ}", "quay.io/org/mod:5.14.0")]
    #[case("v${KERNEL_X}-${KERNEL_Y}-${KERNEL_Z}", "v5-14-0")]
    #[case("/opt/lib/modules/${KERNEL_FULL_VERSION}/${MOD_NAME}.ko", "/opt/lib/modules/5.14.0-284.el9.x86_64/mymod.ko")]
    #[case("${MOD_NAMESPACE}", "kmm")]
    #[case("no placeholders", "no placeholders")]
    #[case("price $5", "price $5")]
    fn expands_known_variables(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute("containerImage", input, &vars()).unwrap(), expected);
    }

    #[test]
    fn unknown_variable_is_a_template_error() {
        let err = substitute("containerImage", "img:${KERNEL_FOO}", &vars()).unwrap_err();
        match err {
            kmm_common::Error::Template { field, message } => {
                assert_eq!(field, "containerImage");
                assert!(message.contains("KERNEL_FOO"));
            }
            other => panic!("Expected Template, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_placeholder_is_a_template_error() {
        let err = substitute("sign.filesToSign[0]", "/x/${KERNEL_X", &vars()).unwrap_err();
        assert!(matches!(err, kmm_common::Error::Template { .. }));
    }

    #[test]
    fn component_variables_need_numeric_version() {
        let odd = KernelVariables::new("custom-kernel", "mymod", "kmm");
        assert_eq!(
            substitute("f", "${KERNEL_FULL_VERSION}", &odd).unwrap(),
            "custom-kernel"
        );
        assert!(substitute("f", "${KERNEL_XYZ}", &odd).is_err());
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let weird = KernelVariables::new("${KERNEL_X}", "mymod", "kmm");
        assert_eq!(
            substitute("f", "${KERNEL_FULL_VERSION}", &weird).unwrap(),
            "${KERNEL_X}"
        );
    }
}
