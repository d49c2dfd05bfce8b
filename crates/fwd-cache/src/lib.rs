#![forbid(unsafe_code)]

use fwd_core::{CompatibilityMode, Jaxpr, Transform};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Everything that can change the result of a transformed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInput<'a> {
    pub mode: CompatibilityMode,
    pub transform: Transform,
    pub jaxpr: &'a Jaxpr,
    /// Transform options such as `argnums` and `has_aux`, already rendered.
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub namespace: &'static str,
    pub digest_hex: String,
}

impl CacheKey {
    #[must_use]
    pub fn as_string(&self) -> String {
        format!("{}-{}", self.namespace, self.digest_hex)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.namespace, self.digest_hex)
    }
}

#[must_use]
pub fn build_cache_key(input: &CacheKeyInput<'_>) -> CacheKey {
    let payload = canonical_payload(input);
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();

    CacheKey {
        namespace: "fwdx",
        digest_hex: bytes_to_hex(&digest),
    }
}

fn canonical_payload(input: &CacheKeyInput<'_>) -> String {
    let options = input
        .options
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "mode={:?}|transform={}|options={}|jaxpr={}",
        input.mode,
        input.transform.as_str(),
        options,
        input.jaxpr.canonical_fingerprint(),
    )
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{:02x}", byte));
    }
    out
}
