//! Vector index abstraction.
//!
//! The rules, glossary and tournament-rules texts live in an external
//! embeddings index split into namespaces. [`VectorIndex`] is the seam the
//! retrieval code talks to:
//!
//! - **[`UpstashIndex`]**: Upstash Vector REST API; the index embeds text
//!   server side, so callers send and receive plain strings.
//! - **[`MemoryIndex`]**: in-process index scored by query-term coverage,
//!   for tests and for library users without a hosted index.
//! - **[`UnconfiguredIndex`]**: returned by [`open_index`] when no URL or
//!   token is available; every call fails with the reason.

pub mod memory;
pub mod upstash;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::VectorIndexConfig;

pub use memory::MemoryIndex;
pub use upstash::UpstashIndex;

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Similarity in `[0, 1]`, higher is closer.
    pub score: f64,
    #[serde(default)]
    pub data: Option<String>,
}

/// A text record to embed and store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub data: String,
}

/// Index-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    #[serde(default)]
    pub vector_count: u64,
    #[serde(default)]
    pub pending_vector_count: u64,
    #[serde(default)]
    pub index_size: u64,
    #[serde(default)]
    pub dimension: u64,
    #[serde(default)]
    pub similarity_function: Option<String>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceInfo {
    #[serde(default)]
    pub vector_count: u64,
    #[serde(default)]
    pub pending_vector_count: u64,
}

/// A namespaced text similarity index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top `top_k` records in `namespace` closest to `text`, best first.
    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Insert or replace records by id.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    async fn info(&self) -> Result<IndexInfo>;
}

/// Placeholder used when the index credentials are missing.
pub struct UnconfiguredIndex {
    reason: String,
}

impl UnconfiguredIndex {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl VectorIndex for UnconfiguredIndex {
    async fn query(&self, _namespace: &str, _text: &str, _top_k: usize) -> Result<Vec<VectorMatch>> {
        bail!("vector index unavailable: {}", self.reason)
    }

    async fn upsert(&self, _namespace: &str, _records: &[VectorRecord]) -> Result<()> {
        bail!("vector index unavailable: {}", self.reason)
    }

    async fn info(&self) -> Result<IndexInfo> {
        bail!("vector index unavailable: {}", self.reason)
    }
}

/// Build the configured index, or an [`UnconfiguredIndex`] if credentials
/// are missing so that card lookups keep working.
pub fn open_index(config: &VectorIndexConfig) -> Arc<dyn VectorIndex> {
    match UpstashIndex::from_config(config) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            warn!(error = %e, "vector index not configured");
            Arc::new(UnconfiguredIndex::new(e.to_string()))
        }
    }
}
