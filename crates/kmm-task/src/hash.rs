//! Content hash of rendered execution units
//!
//! The hash is an idempotency fingerprint stored on the pod, not an
//! integrity guarantee. Objects are serialized to JSON with every map key
//! sorted, then fed to SHA-256 together with any secret bytes the unit
//! embeds, and the first 8 bytes of the digest are kept.

use aws_lc_rs::digest;
use serde::Serialize;
use serde_json::Value;

use kmm_common::Result;

/// Digest `template` plus `secrets` into a stable `u64`.
///
/// Secrets are length-prefixed so that moving bytes between two adjacent
/// secrets changes the result.
pub fn template_hash<T: Serialize + ?Sized>(template: &T, secrets: &[&[u8]]) -> Result<u64> {
    let canonical = canonicalize(serde_json::to_value(template)?);
    let bytes = serde_json::to_vec(&canonical)?;

    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(&bytes);
    for secret in secrets {
        ctx.update(&(secret.len() as u64).to_be_bytes());
        ctx.update(secret);
    }
    let digest = ctx.finish();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_ref()[..8]);
    Ok(u64::from_be_bytes(head))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
