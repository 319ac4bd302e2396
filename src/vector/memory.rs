//! In-memory [`VectorIndex`].
//!
//! Scores a record by the fraction of distinct query terms it contains, so
//! a record containing every query word scores 1.0. This keeps threshold
//! behaviour predictable without an embedding model.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use super::{IndexInfo, NamespaceInfo, VectorIndex, VectorMatch, VectorRecord};

#[derive(Default)]
pub struct MemoryIndex {
    namespaces: RwLock<BTreeMap<String, Vec<VectorRecord>>>,
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of distinct query terms present in `data`.
pub fn term_coverage(query: &str, data: &str) -> f64 {
    let wanted = terms(query);
    if wanted.is_empty() {
        return 0.0;
    }
    let have = terms(data);
    wanted.iter().filter(|t| have.contains(*t)).count() as f64 / wanted.len() as f64
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty namespace so it shows up in [`VectorIndex::info`].
    pub fn create_namespace(&self, namespace: &str) {
        if let Ok(mut map) = self.namespaces.write() {
            map.entry(namespace.to_string()).or_default();
        }
    }

    /// Number of records in `namespace` (0 if absent).
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|map| map.get(namespace).map_or(0, |v| v.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let map = self
            .namespaces
            .read()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;
        let Some(records) = map.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: term_coverage(text, &r.data),
                data: Some(r.data.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let mut map = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;
        let stored = map.entry(namespace.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => existing.data = record.data.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn info(&self) -> Result<IndexInfo> {
        let map = self
            .namespaces
            .read()
            .map_err(|_| anyhow::anyhow!("memory index lock poisoned"))?;
        let namespaces: BTreeMap<String, NamespaceInfo> = map
            .iter()
            .map(|(ns, records)| {
                (
                    ns.clone(),
                    NamespaceInfo {
                        vector_count: records.len() as u64,
                        pending_vector_count: 0,
                    },
                )
            })
            .collect();
        Ok(IndexInfo {
            vector_count: namespaces.values().map(|n| n.vector_count).sum(),
            similarity_function: Some("TERM_COVERAGE".to_string()),
            namespaces,
            ..Default::default()
        })
    }
}
