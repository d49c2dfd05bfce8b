#![forbid(unsafe_code)]

use fwd_core::{CompatibilityMode, Transform};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSignal {
    pub signal_name: String,
    pub value: f64,
    pub detail: String,
}

impl EvidenceSignal {
    #[must_use]
    pub fn count(signal_name: &str, value: usize) -> Self {
        Self {
            signal_name: signal_name.to_owned(),
            value: value as f64,
            detail: format!("{signal_name}={value}"),
        }
    }

    #[must_use]
    pub fn flag(signal_name: &str, value: bool) -> Self {
        Self {
            signal_name: signal_name.to_owned(),
            value: if value { 1.0 } else { 0.0 },
            detail: format!("{signal_name}={value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub transform: Transform,
    pub mode: CompatibilityMode,
    pub timestamp_unix_ms: u128,
}

impl CallRecord {
    #[must_use]
    pub fn now(transform: Transform, mode: CompatibilityMode) -> Self {
        Self {
            transform,
            mode,
            timestamp_unix_ms: now_unix_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Cache key of the call this entry describes.
    pub decision_id: String,
    pub record: CallRecord,
    pub signals: Vec<EvidenceSignal>,
}

impl LedgerEntry {
    #[must_use]
    pub fn signal(&self, signal_name: &str) -> Option<&EvidenceSignal> {
        self.signals
            .iter()
            .find(|signal| signal.signal_name == signal_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    entries: Vec<LedgerEntry>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
