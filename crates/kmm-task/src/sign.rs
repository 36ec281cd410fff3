//! Sign flavor: re-layer an image with signed copies of its module files
//!
//! The generated Dockerfile has three stages. `source` is the unsigned
//! image, `signimage` provides `/sign-file` and signs copies of the module
//! files under `/signroot`, and the final stage is `source` with the signed
//! files copied back over the originals.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::debug;

use kmm_common::config::Images;
use kmm_common::{CallContext, Error, Result, TemplateEngine};
use kmm_mapper::{ModuleLoaderData, Owner};

use crate::pod::{
    assemble, destination_args, key_item, pull_tls_args, push_tls_args, secret_volume, PodMaker,
    PodRecipe,
};
use crate::status::TaskKind;
use crate::store::ResourceStore;

/// Secret key holding the private signing key
pub const PRIVATE_KEY_KEY: &str = "key";
/// Secret key holding the public certificate
pub const CERT_KEY: &str = "cert";

const KEY_DIR: &str = "/run/secrets/key";
const CERT_DIR: &str = "/run/secrets/cert";
const SIGN_ROOT: &str = "/signroot";
const MODULES_DIR: &str = "/opt/lib/modules";

const SIGN_DOCKERFILE: &str = r#"FROM ${unsigned_image} as source

FROM ${signer_image} AS signimage

USER 0

RUN ["mkdir", "${sign_root}"]

{% if files %}
{% for f in files %}
COPY --from=source ${f.source} ${f.target}
RUN ${sign_cmd} ${f.target}
{% endfor %}
{% else %}
COPY --from=source ${modules_dir} ${modules_root}
RUN find ${modules_root} -name '*.ko' -exec ${sign_cmd} {} \;
{% endif %}

FROM source

{% if files %}
{% for f in files %}
COPY --from=signimage ${f.target} ${f.source}
{% endfor %}
{% else %}
COPY --from=signimage ${modules_root} ${modules_dir}
{% endif %}
"#;

#[derive(Serialize)]
struct SignedFile<'a> {
    source: &'a str,
    target: String,
}

#[derive(Serialize)]
struct SignDockerfile<'a> {
    unsigned_image: &'a str,
    signer_image: &'a str,
    sign_root: &'a str,
    sign_cmd: String,
    modules_dir: &'a str,
    modules_root: String,
    files: Vec<SignedFile<'a>>,
}

fn sign_path(file: &str) -> String {
    if file.starts_with('/') {
        format!("{SIGN_ROOT}{file}")
    } else {
        format!("{SIGN_ROOT}/{file}")
    }
}

/// Dockerfile signing `files` of `unsigned_image`
///
/// An empty list signs every `.ko` under `/opt/lib/modules`.
pub fn sign_dockerfile(
    unsigned_image: &str,
    signer_image: &str,
    files: &[String],
) -> Result<String> {
    let ctx = SignDockerfile {
        unsigned_image,
        signer_image,
        sign_root: SIGN_ROOT,
        sign_cmd: format!("/sign-file sha256 {KEY_DIR}/key.pem {CERT_DIR}/cert.pem"),
        modules_dir: MODULES_DIR,
        modules_root: sign_path(MODULES_DIR),
        files: files
            .iter()
            .map(|f| SignedFile {
                source: f,
                target: sign_path(f),
            })
            .collect(),
    };
    TemplateEngine::shared()?.render("sign Dockerfile", SIGN_DOCKERFILE, ctx)
}

/// Renders sign pods
pub struct SignMaker {
    store: Arc<dyn ResourceStore>,
    builder_image: String,
    signer_image: String,
}

impl SignMaker {
    /// Create a maker fetching signing material through `store`
    pub fn new(store: Arc<dyn ResourceStore>, images: &Images) -> Self {
        Self {
            store,
            builder_image: images.build.clone(),
            signer_image: images.sign.clone(),
        }
    }
}

#[async_trait]
impl PodMaker for SignMaker {
    fn kind(&self) -> TaskKind {
        TaskKind::Sign
    }

    fn applies(&self, mld: &ModuleLoaderData) -> bool {
        mld.sign.is_some()
    }

    async fn make_pod(
        &self,
        ctx: &CallContext,
        mld: &ModuleLoaderData,
        owner: &Owner,
        push_image: bool,
    ) -> Result<Pod> {
        let sign = mld.sign.as_ref().ok_or_else(|| {
            Error::render(
                "sign",
                format!("{} has no sign instructions for kernel {}", mld.name, mld.kernel_version),
            )
        })?;
        let unsigned_image = mld.unsigned_image().ok_or_else(|| {
            Error::render("sign", "no unsigned image: set unsignedImage or a build")
        })?;
        let key_secret = sign
            .key_secret
            .as_ref()
            .ok_or_else(|| Error::render("sign", "keySecret is not set"))?;
        let cert_secret = sign
            .cert_secret
            .as_ref()
            .ok_or_else(|| Error::render("sign", "certSecret is not set"))?;

        let private_key = ctx
            .run(
                "get signing key",
                self.store
                    .secret_value(&mld.namespace, &key_secret.name, PRIVATE_KEY_KEY),
            )
            .await?;
        let cert = ctx
            .run(
                "get signing certificate",
                self.store
                    .secret_value(&mld.namespace, &cert_secret.name, CERT_KEY),
            )
            .await?;

        let dockerfile =
            sign_dockerfile(&unsigned_image, &self.signer_image, &sign.files_to_sign)?;

        let mut args = destination_args(&mld.container_image, push_image);
        if push_image {
            args.extend(push_tls_args(&mld.registry_tls));
        }
        args.extend(pull_tls_args(&sign.unsigned_image_registry_tls));

        let (key_volume, key_mount) = secret_volume(
            &key_secret.name,
            key_item(PRIVATE_KEY_KEY, "key.pem"),
            KEY_DIR,
        );
        let (cert_volume, cert_mount) =
            secret_volume(&cert_secret.name, key_item(CERT_KEY, "cert.pem"), CERT_DIR);

        debug!(
            module = %mld.name,
            kernel = %mld.kernel_version,
            unsigned = %unsigned_image,
            key_secret = %key_secret.name,
            cert_secret = %cert_secret.name,
            files = sign.files_to_sign.len(),
            "rendering sign pod"
        );

        assemble(
            PodRecipe {
                kind: TaskKind::Sign,
                image: &self.builder_image,
                args,
                dockerfile,
                volumes: vec![key_volume, cert_volume],
                mounts: vec![key_mount, cert_mount],
                secrets: vec![cert.as_slice(), private_key.as_slice()],
            },
            mld,
            owner,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::mld;
    use crate::status::pod_hash;
    use crate::store::MockResourceStore;
    use kmm_common::crd::{Build, LocalObjectReference, Sign, TlsOptions};
    use rstest::rstest;

    const UNSIGNED: &str = "my.registry/my/image";

    fn sign_mld(files: &[&str]) -> ModuleLoaderData {
        let mut data = mld();
        data.sign = Some(Sign {
            unsigned_image: Some(UNSIGNED.to_string()),
            key_secret: Some(LocalObjectReference::new("securebootkey")),
            cert_secret: Some(LocalObjectReference::new("securebootcert")),
            files_to_sign: files.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        });
        data
    }

    fn store(key: &'static [u8], cert: &'static [u8]) -> Arc<dyn ResourceStore> {
        let mut store = MockResourceStore::new();
        store
            .expect_secret_value()
            .withf(|ns, name, k| ns == "kmm" && name == "securebootkey" && k == "key")
            .returning(move |_, _, _| Ok(key.to_vec()));
        store
            .expect_secret_value()
            .withf(|ns, name, k| ns == "kmm" && name == "securebootcert" && k == "cert")
            .returning(move |_, _, _| Ok(cert.to_vec()));
        Arc::new(store)
    }

    async fn render_with(
        data: &ModuleLoaderData,
        push: bool,
        key: &'static [u8],
        cert: &'static [u8],
    ) -> Result<Pod> {
        let images = Images {
            sign: "some-sign-image:some-tag".to_string(),
            ..Default::default()
        };
        SignMaker::new(store(key, cert), &images)
            .make_pod(&CallContext::background(), data, &data.owner, push)
            .await
    }

    async fn render(data: &ModuleLoaderData, push: bool) -> Pod {
        render_with(data, push, b"private", b"public").await.unwrap()
    }

    fn args(pod: &Pod) -> Vec<String> {
        pod.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap_or_default()
    }

    #[test]
    fn dockerfile_for_listed_files() {
        let files = vec![
            "/modules/simple-kmod.ko".to_string(),
            "/modules/simple-procfs-kmod.ko".to_string(),
        ];
        let expected = r#"FROM my.registry/my/image as source

FROM some-sign-image:some-tag AS signimage

USER 0

RUN ["mkdir", "/signroot"]

COPY --from=source /modules/simple-kmod.ko /signroot/modules/simple-kmod.ko
RUN /sign-file sha256 /run/secrets/key/key.pem /run/secrets/cert/cert.pem /signroot/modules/simple-kmod.ko
COPY --from=source /modules/simple-procfs-kmod.ko /signroot/modules/simple-procfs-kmod.ko
RUN /sign-file sha256 /run/secrets/key/key.pem /run/secrets/cert/cert.pem /signroot/modules/simple-procfs-kmod.ko

FROM source

COPY --from=signimage /signroot/modules/simple-kmod.ko /modules/simple-kmod.ko
COPY --from=signimage /signroot/modules/simple-procfs-kmod.ko /modules/simple-procfs-kmod.ko
"#;
        assert_eq!(
            sign_dockerfile(UNSIGNED, "some-sign-image:some-tag", &files).unwrap(),
            expected
        );
    }

    #[test]
    fn dockerfile_without_files_signs_every_module() {
        let expected = r#"FROM my.registry/my/image as source

FROM signer AS signimage

USER 0

RUN ["mkdir", "/signroot"]

COPY --from=source /opt/lib/modules /signroot/opt/lib/modules
RUN find /signroot/opt/lib/modules -name '*.ko' -exec /sign-file sha256 /run/secrets/key/key.pem /run/secrets/cert/cert.pem {} \;

FROM source

COPY --from=signimage /signroot/opt/lib/modules /opt/lib/modules
"#;
        assert_eq!(sign_dockerfile(UNSIGNED, "signer", &[]).unwrap(), expected);
    }

    /// Story: the signing key and certificate are mounted, never inlined
    #[tokio::test]
    async fn story_key_material_is_mounted_not_embedded() {
        let pod = render(&sign_mld(&["/modules/a.ko"]), true).await;

        let serialized = serde_json::to_string(&pod).unwrap();
        assert!(!serialized.contains("private"));
        assert!(!serialized.contains("public"));

        let spec = pod.spec.unwrap();
        let volumes = spec.volumes.unwrap();
        let key = volumes[0].secret.as_ref().unwrap();
        assert_eq!(key.secret_name.as_deref(), Some("securebootkey"));
        assert_eq!(key.items.as_ref().unwrap()[0].path, "key.pem");
        let cert = volumes[1].secret.as_ref().unwrap();
        assert_eq!(cert.secret_name.as_deref(), Some("securebootcert"));

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/run/secrets/key");
        assert_eq!(mounts[1].mount_path, "/run/secrets/cert");
        assert_eq!(mounts[2].mount_path, "/workspace");
    }

    #[rstest]
    #[case(&["simple-kmod", "complicated-kmod"], true)]
    #[case(&["simple-kmod", "complicated-kmod"], false)]
    #[case(&[], true)]
    #[case(&[], false)]
    #[tokio::test]
    async fn push_flag(#[case] files: &[&str], #[case] push: bool) {
        let a = args(&render(&sign_mld(files), push).await);
        if push {
            assert_eq!(a[..2], ["--destination", "quay.io/org/mymod:5.14.0-100"]);
        } else {
            assert!(a.contains(&"--no-push".to_string()));
        }
    }

    #[rstest]
    #[case(TlsOptions { insecure: true, ..Default::default() }, TlsOptions::default(), "--insecure")]
    #[case(TlsOptions { insecure_skip_tls_verify: true, ..Default::default() }, TlsOptions::default(), "--skip-tls-verify")]
    #[case(TlsOptions::default(), TlsOptions { insecure: true, ..Default::default() }, "--insecure-pull")]
    #[case(TlsOptions::default(), TlsOptions { insecure_skip_tls_verify: true, ..Default::default() }, "--skip-tls-verify-pull")]
    #[tokio::test]
    async fn tls_flags(
        #[case] registry_tls: TlsOptions,
        #[case] unsigned_tls: TlsOptions,
        #[case] expected: &str,
    ) {
        let mut data = sign_mld(&[]);
        data.registry_tls = registry_tls;
        if let Some(sign) = data.sign.as_mut() {
            sign.unsigned_image_registry_tls = unsigned_tls;
        }
        let a = args(&render(&data, true).await);
        assert!(a.contains(&expected.to_string()), "{a:?}");
    }

    #[tokio::test]
    async fn unpushed_sign_skips_destination_tls_flags() {
        let mut data = sign_mld(&["/modules/a.ko"]);
        data.registry_tls = TlsOptions {
            insecure: true,
            insecure_skip_tls_verify: true,
        };
        let a = args(&render(&data, false).await);
        assert_eq!(a, vec!["--no-push"]);
    }

    #[tokio::test]
    async fn rotated_key_changes_the_hash() {
        let data = sign_mld(&["/modules/a.ko"]);
        let a = render_with(&data, true, b"key-1", b"cert").await.unwrap();
        let b = render_with(&data, true, b"key-2", b"cert").await.unwrap();
        assert_ne!(pod_hash(&a), pod_hash(&b));
    }

    #[tokio::test]
    async fn added_file_changes_the_hash() {
        let a = render(&sign_mld(&["/modules/a.ko"]), true).await;
        let b = render(&sign_mld(&["/modules/a.ko", "/modules/b.ko"]), true).await;
        assert_ne!(pod_hash(&a), pod_hash(&b));
    }

    #[tokio::test]
    async fn signs_intermediate_image_after_build() {
        let mut data = sign_mld(&[]);
        data.build = Some(Build::default());
        if let Some(sign) = data.sign.as_mut() {
            sign.unsigned_image = None;
        }
        let pod = render(&data, true).await;
        let df = &pod.metadata.annotations.unwrap()[kmm_common::DOCKERFILE_ANNOTATION];
        assert!(df.starts_with("FROM quay.io/org/mymod:kmm_mymod_kmm_unsigned as source"));
    }

    #[tokio::test]
    async fn secret_fetch_failure_propagates() {
        let mut store = MockResourceStore::new();
        store
            .expect_secret_value()
            .returning(|ns, name, _| Err(Error::secret_fetch(name, ns, "not found")));
        let data = sign_mld(&[]);
        let err = SignMaker::new(Arc::new(store), &Images::default())
            .make_pod(&CallContext::background(), &data, &data.owner, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecretFetch { ref secret, .. } if secret == "securebootkey"));
    }

    #[tokio::test]
    async fn missing_key_secret_is_a_render_error() {
        let mut data = sign_mld(&[]);
        if let Some(sign) = data.sign.as_mut() {
            sign.key_secret = None;
        }
        let err = SignMaker::new(Arc::new(MockResourceStore::new()), &Images::default())
            .make_pod(&CallContext::background(), &data, &data.owner, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Render { ref kind, .. } if kind == "sign"));
    }

    #[tokio::test]
    async fn no_unsigned_source_is_a_render_error() {
        let mut data = sign_mld(&[]);
        if let Some(sign) = data.sign.as_mut() {
            sign.unsigned_image = None;
        }
        let err = SignMaker::new(Arc::new(MockResourceStore::new()), &Images::default())
            .make_pod(&CallContext::background(), &data, &data.owner, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }
}
