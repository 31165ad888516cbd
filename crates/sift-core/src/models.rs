use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Named string attributes extracted from a document.
///
/// Ordered so that serialized results are stable across runs.
pub type FieldMap = BTreeMap<String, String>;

/// One entry discovered on a listing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingItem {
    /// Link or identifier of the item's detail document, if the listing exposes one.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub summary_fields: FieldMap,
}

impl ListingItem {
    pub fn new(reference: Option<String>, summary_fields: FieldMap) -> Self {
        Self {
            reference,
            summary_fields,
        }
    }
}

/// Everything an extractor pulls out of a listing document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub header_fields: FieldMap,
    #[serde(default)]
    pub items: Vec<ListingItem>,
}

/// Outcome of resolving one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Summary and detail fields are both present.
    Complete,
    /// Only summary fields survived; the detail fetch failed, timed out or was impossible.
    Partial,
    /// Reserved for a request that failed as a whole.
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Complete => "complete",
            ItemStatus::Partial => "partial",
            ItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listing item merged with whatever its detail document yielded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailResult {
    pub reference: Option<String>,
    pub summary_fields: FieldMap,
    pub detail_fields: FieldMap,
    pub status: ItemStatus,
    /// Why the item is not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetailResult {
    pub fn complete(
        reference: Option<String>,
        summary_fields: FieldMap,
        detail_fields: FieldMap,
    ) -> Self {
        Self {
            reference,
            summary_fields,
            detail_fields,
            status: ItemStatus::Complete,
            error: None,
        }
    }

    /// Summary-only result, detail fields left empty.
    pub fn partial(item: ListingItem, reason: impl Into<String>) -> Self {
        Self {
            reference: item.reference,
            summary_fields: item.summary_fields,
            detail_fields: FieldMap::new(),
            status: ItemStatus::Partial,
            error: Some(reason.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ItemStatus::Complete
    }
}

/// The composite answer for one listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Normalized listing URL this result was built from (also the cache key).
    pub source_url: String,
    pub header_fields: FieldMap,
    /// Items in listing order.
    pub items: Vec<DetailResult>,
    pub fetched_at: DateTime<Utc>,
}

impl AggregateResult {
    pub fn complete_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_complete()).count()
    }

    pub fn partial_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Partial)
            .count()
    }

    /// SHA-256 of the JSON encoding, usable as an entity tag.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        Ok(compute_hash(&serde_json::to_string(self)?))
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
