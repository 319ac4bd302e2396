//! Rules text lookup across the vector index partitions.
//!
//! One query is run against every configured partition (tournament rules,
//! comprehensive rules, glossary by default). Only hits scoring strictly
//! above the confidence threshold are kept; a partition with none yields
//! [`NO_HIGH_CONFIDENCE_MATCH`] so the model knows to rephrase instead of
//! guessing.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{Config, PartitionConfig, VectorIndexConfig};
use crate::vector::{self, VectorIndex};

/// Returned in place of texts when nothing clears the threshold.
pub const NO_HIGH_CONFIDENCE_MATCH: &str = "No high quality vectors found. Refine search query.";

#[derive(Debug, Clone)]
pub struct RulesLookupOptions {
    pub top_k: usize,
    pub confidence_threshold: f64,
    pub partitions: Vec<PartitionConfig>,
}

impl From<&VectorIndexConfig> for RulesLookupOptions {
    fn from(cfg: &VectorIndexConfig) -> Self {
        Self {
            top_k: cfg.top_k,
            confidence_threshold: cfg.confidence_threshold,
            partitions: cfg.partitions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionHits {
    /// Texts above the threshold, best first.
    Matches(Vec<String>),
    NoConfidentMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionResult {
    pub namespace: String,
    pub label: String,
    pub hits: PartitionHits,
}

impl PartitionResult {
    /// Texts as handed to the model, with the sentinel for empty partitions.
    pub fn texts(&self) -> Vec<String> {
        match &self.hits {
            PartitionHits::Matches(texts) => texts.clone(),
            PartitionHits::NoConfidentMatch => vec![NO_HIGH_CONFIDENCE_MATCH.to_string()],
        }
    }
}

/// Query each partition in order and apply the confidence filter.
pub async fn query_partitions(
    index: &dyn VectorIndex,
    query: &str,
    opts: &RulesLookupOptions,
) -> Result<Vec<PartitionResult>> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let mut results = Vec::with_capacity(opts.partitions.len());
    for partition in &opts.partitions {
        let matches = index.query(&partition.namespace, query, opts.top_k).await?;
        let total = matches.len();
        let texts: Vec<String> = matches
            .into_iter()
            .filter(|m| m.score > opts.confidence_threshold)
            .filter_map(|m| m.data)
            .collect();

        debug!(
            namespace = %partition.namespace,
            total,
            kept = texts.len(),
            threshold = opts.confidence_threshold,
            "partition filtered"
        );

        let hits = if texts.is_empty() {
            PartitionHits::NoConfidentMatch
        } else {
            PartitionHits::Matches(texts)
        };
        results.push(PartitionResult {
            namespace: partition.namespace.clone(),
            label: partition.label.clone(),
            hits,
        });
    }

    Ok(results)
}

/// Runs [`query_partitions`] with the options from `config`.
pub async fn fetch_vector_db(
    config: &Config,
    index: &dyn VectorIndex,
    query: &str,
) -> Result<Vec<PartitionResult>> {
    query_partitions(index, query, &RulesLookupOptions::from(&config.vector_index)).await
}

/// Tool output shape: `{ "<label>": ["text", ...], ... }`.
pub fn to_tool_output(results: &[PartitionResult]) -> Value {
    let mut map = Map::new();
    for r in results {
        map.insert(
            r.label.clone(),
            Value::Array(r.texts().into_iter().map(Value::String).collect()),
        );
    }
    Value::Object(map)
}

/// CLI entry point for `mtg rules`.
pub async fn run_rules(config: &Config, query: &str, json: bool) -> Result<()> {
    let index = vector::open_index(&config.vector_index);
    let results = fetch_vector_db(config, index.as_ref(), query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_tool_output(&results))?);
        return Ok(());
    }

    for r in &results {
        match &r.hits {
            PartitionHits::Matches(texts) => {
                println!("== {} ({} items) ==", r.label, texts.len());
                for (i, text) in texts.iter().enumerate() {
                    println!("{}. {}", i + 1, text);
                    println!();
                }
            }
            PartitionHits::NoConfidentMatch => {
                println!("== {} (0 items) ==", r.label);
                println!("{}", NO_HIGH_CONFIDENCE_MATCH);
                println!();
            }
        }
    }

    Ok(())
}
