//! Provider call ledger.
//!
//! One [`ProviderCallRecord`] per request fingerprint for the lifetime of a
//! run. A second call with the same fingerprint reuses the existing record.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::providers::TokenUsage;
use crate::router::AttemptFailure;

/// What happened when a request was served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    pub fingerprint: Fingerprint,

    pub capability: String,

    /// Stage that issued the call, when known
    #[serde(default)]
    pub stage: Option<String>,

    /// Adapter that produced the reply; `None` when every adapter failed
    pub provider: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Provider invocations made for this request
    pub attempts: u32,

    pub latency_ms: u64,

    pub success: bool,

    pub served_from_cache: bool,

    /// Cache key holding the reply
    #[serde(default)]
    pub cache_key: Option<Fingerprint>,

    #[serde(default)]
    pub usage: TokenUsage,

    pub called_at: DateTime<Utc>,

    /// Failed attempts, in order
    #[serde(default)]
    pub failures: Vec<AttemptFailure>,
}

impl ProviderCallRecord {
    /// Record for a reply answered from the cache without any invocation.
    pub fn cache_hit(
        fingerprint: Fingerprint,
        capability: &str,
        stage: Option<String>,
        provider: &str,
        model: &str,
    ) -> Self {
        Self {
            cache_key: Some(fingerprint.clone()),
            fingerprint,
            capability: capability.to_string(),
            stage,
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            attempts: 0,
            latency_ms: 0,
            success: true,
            served_from_cache: true,
            usage: TokenUsage::default(),
            called_at: Utc::now(),
            failures: Vec::new(),
        }
    }
}

/// Fingerprint-unique call records, in first-seen order.
#[derive(Debug, Default)]
pub struct CallLedger {
    records: Mutex<IndexMap<Fingerprint, ProviderCallRecord>>,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-filled with records from an earlier run.
    pub fn seeded(records: impl IntoIterator<Item = ProviderCallRecord>) -> Self {
        let ledger = Self::new();
        ledger.seed(records);
        ledger
    }

    pub fn seed(&self, records: impl IntoIterator<Item = ProviderCallRecord>) {
        let mut map = self.records.lock();
        for record in records {
            map.entry(record.fingerprint.clone()).or_insert(record);
        }
    }

    /// Insert or replace the record for its fingerprint. The original
    /// position is kept on replace.
    pub fn upsert(&self, record: ProviderCallRecord) {
        self.records.lock().insert(record.fingerprint.clone(), record);
    }

    /// Existing record for `fingerprint`, or the one built by `make`.
    pub fn get_or_insert_with(
        &self,
        fingerprint: &Fingerprint,
        make: impl FnOnce() -> ProviderCallRecord,
    ) -> ProviderCallRecord {
        self.records
            .lock()
            .entry(fingerprint.clone())
            .or_insert_with(make)
            .clone()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ProviderCallRecord> {
        self.records.lock().get(fingerprint).cloned()
    }

    pub fn records(&self) -> Vec<ProviderCallRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::compute("reasoning", &[], &json!({ "k": s }))
    }

    #[test]
    fn test_fingerprint_unique() {
        let ledger = CallLedger::new();
        let first = ledger.get_or_insert_with(&fp("a"), || {
            ProviderCallRecord::cache_hit(fp("a"), "reasoning", None, "primary", "scripted")
        });
        let second = ledger.get_or_insert_with(&fp("a"), || {
            ProviderCallRecord::cache_hit(fp("a"), "reasoning", None, "other", "scripted")
        });
        assert_eq!(ledger.len(), 1);
        assert_eq!(first, second);
        assert_eq!(second.provider.as_deref(), Some("primary"));
    }

    #[test]
    fn test_upsert_keeps_order() {
        let ledger = CallLedger::new();
        for key in ["a", "b"] {
            ledger.upsert(ProviderCallRecord::cache_hit(fp(key), "reasoning", None, "p", "scripted"));
        }
        let mut replaced = ProviderCallRecord::cache_hit(fp("a"), "reasoning", None, "q", "scripted");
        replaced.served_from_cache = false;
        ledger.upsert(replaced);

        let records = ledger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fingerprint, fp("a"));
        assert_eq!(records[0].provider.as_deref(), Some("q"));
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let ledger = CallLedger::new();
        ledger.upsert(ProviderCallRecord::cache_hit(fp("a"), "reasoning", None, "live", "scripted"));
        ledger.seed(vec![
            ProviderCallRecord::cache_hit(fp("a"), "reasoning", None, "old", "scripted"),
            ProviderCallRecord::cache_hit(fp("b"), "reasoning", None, "old", "scripted"),
        ]);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(&fp("a")).unwrap().provider.as_deref(), Some("live"));
    }
}
