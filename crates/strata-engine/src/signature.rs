//! Content-addressed node signatures.
//!
//! A signature fingerprints one node's planned execution: the method chain,
//! the predicted implementation for each chain entry, the literal
//! parameters, and the signatures of every upstream step. Equal plans hash
//! equal; any difference in any component changes the digest. Component
//! digests are kept alongside the full digest so a mismatch can name what
//! changed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::Value;

/// Hex length for all digests: 128 bits of BLAKE3.
const DIGEST_LEN: usize = 32;

fn digest(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..DIGEST_LEN].to_string()
}

/// A computed node signature with per-component digests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    pub digest: String,
    pub methods: String,
    pub implementations: String,
    pub parameters: String,
    pub upstream: String,
    pub recorded_at: DateTime<Utc>,
}

impl NodeSignature {
    /// Computes the signature from its four components.
    ///
    /// * `methods` — the chain, in order.
    /// * `impl_parts` — one `method@engine:version:priority` fragment per
    ///   chain entry, from signature prediction (never from a committed
    ///   resolve).
    /// * `literals` — the step's literal parameters.
    /// * `upstream` — upstream step name -> that step's signature digest.
    pub fn compute(
        methods: &[String],
        impl_parts: &[String],
        literals: &BTreeMap<String, Value>,
        upstream: &BTreeMap<String, String>,
    ) -> Self {
        let methods_str = methods.join("|");
        let impls_str = impl_parts.join(";");
        let params_str = literals
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.fingerprint()))
            .collect::<Vec<_>>()
            .join(",");
        let upstream_str = upstream
            .iter()
            .map(|(step, sig)| format!("{}:{}", step, sig))
            .collect::<Vec<_>>()
            .join("|");

        let full = format!(
            "{}#{}#{}#{}",
            methods_str, impls_str, params_str, upstream_str
        );
        Self {
            digest: digest(&full),
            methods: digest(&methods_str),
            implementations: digest(&impls_str),
            parameters: digest(&params_str),
            upstream: digest(&upstream_str),
            recorded_at: Utc::now(),
        }
    }

    /// Names the components that differ, for cache-miss logging.
    pub fn diff_reason(&self, other: &NodeSignature) -> String {
        let mut reasons = Vec::new();
        if self.methods != other.methods {
            reasons.push("methods");
        }
        if self.implementations != other.implementations {
            reasons.push("implementations");
        }
        if self.parameters != other.parameters {
            reasons.push("parameters");
        }
        if self.upstream != other.upstream {
            reasons.push("upstream");
        }
        if reasons.is_empty() {
            "unknown".to_string()
        } else {
            reasons.join("+")
        }
    }
}
