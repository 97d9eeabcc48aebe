//! Request fingerprints.
//!
//! A fingerprint identifies a (capability, prompt, parameters) request and
//! keys both the response cache and the call ledger. It is a SHA-256 over
//! canonical JSON, so it is stable across processes and key order.

use plotscout_core::hashing::hash_json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;

use crate::providers::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(capability: &str, messages: &[ChatMessage], params: &JsonValue) -> Self {
        let prompt: Vec<JsonValue> = messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        Self(hash_json(&json!({
            "capability": capability,
            "prompt": prompt,
            "params": params,
        })))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
