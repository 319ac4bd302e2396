//! Loaders for both data stores.
//!
//! - **Cards**: Scryfall `oracle_cards` and `rulings` bulk files, read from
//!   disk or downloaded via the bulk-data endpoint, written to SQLite in one
//!   transaction. Cards are upserted by `oracle_id`; rulings are replaced
//!   wholesale since the bulk file is always complete.
//! - **Rules**: the Comprehensive Rules text, parsed by [`comp_rules`] and
//!   upserted into the `cr` (rule groups) and `gls` (glossary) namespaces.
//! - **Text**: any plain document, chunked by [`chunk_text`] into a chosen
//!   namespace (the tournament rules go to `mtr`).
//!
//! Vector ids are derived from namespace and text, so loading the same file
//! twice overwrites rather than duplicates.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::comp_rules;
use crate::config::{Config, COMPREHENSIVE_RULES_NS, GLOSSARY_NS};
use crate::db;
use crate::http;
use crate::models::{OracleCard, Ruling};
use crate::vector::{self, VectorIndex, VectorRecord};

const SCRYFALL: &str = "Scryfall";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardLoadSummary {
    pub cards_upserted: usize,
    /// Cards without a top-level `oracle_id` (reversible cards).
    pub cards_skipped: usize,
    pub rulings_written: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesLoadSummary {
    pub rule_groups: usize,
    pub glossary_entries: usize,
}

/// Where `load-cards` gets its bulk files from.
#[derive(Debug, Clone)]
pub enum CardSource<'a> {
    Files { cards: &'a Path, rulings: &'a Path },
    Download,
}

fn validate_bulk(cards: &[OracleCard], rulings: &[Ruling]) -> Result<()> {
    if let Some(c) = cards.iter().find(|c| c.object != "card") {
        bail!(
            "expected object \"card\" in oracle cards file, got \"{}\" ({})",
            c.object,
            c.name
        );
    }
    if let Some(r) = rulings.iter().find(|r| r.object != "ruling") {
        bail!(
            "expected object \"ruling\" in rulings file, got \"{}\" (oracle_id {})",
            r.object,
            r.oracle_id
        );
    }
    Ok(())
}

fn json_column<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

/// Write cards and rulings in a single transaction.
pub async fn store_bulk(
    pool: &SqlitePool,
    cards: &[OracleCard],
    rulings: &[Ruling],
) -> Result<CardLoadSummary> {
    validate_bulk(cards, rulings)?;

    let mut summary = CardLoadSummary::default();
    let mut tx = pool.begin().await?;

    for card in cards {
        let Some(ref oracle_id) = card.oracle_id else {
            summary.cards_skipped += 1;
            continue;
        };

        let existing_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM oracle_card WHERE oracle_id = ?")
                .bind(oracle_id)
                .fetch_optional(&mut *tx)
                .await?;
        let card_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO oracle_card (id, oracle_id, name, released_at, scryfall_uri, layout, image_uris, mana_cost, cmc, type_line, card_faces, oracle_text, power, toughness, colors, keywords, games, edhrec_rank)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(oracle_id) DO UPDATE SET
                name = excluded.name,
                released_at = excluded.released_at,
                scryfall_uri = excluded.scryfall_uri,
                layout = excluded.layout,
                image_uris = excluded.image_uris,
                mana_cost = excluded.mana_cost,
                cmc = excluded.cmc,
                type_line = excluded.type_line,
                card_faces = excluded.card_faces,
                oracle_text = excluded.oracle_text,
                power = excluded.power,
                toughness = excluded.toughness,
                colors = excluded.colors,
                keywords = excluded.keywords,
                games = excluded.games,
                edhrec_rank = excluded.edhrec_rank
            "#,
        )
        .bind(&card_id)
        .bind(oracle_id)
        .bind(&card.name)
        .bind(card.released_at.to_string())
        .bind(&card.scryfall_uri)
        .bind(&card.layout)
        .bind(json_column(&card.image_uris)?)
        .bind(&card.mana_cost)
        .bind(card.cmc)
        .bind(&card.type_line)
        .bind(json_column(&card.card_faces)?)
        .bind(&card.oracle_text)
        .bind(&card.power)
        .bind(&card.toughness)
        .bind(json_column(&card.colors)?)
        .bind(json_column(&card.keywords)?)
        .bind(json_column(&card.games)?)
        .bind(card.edhrec_rank)
        .execute(&mut *tx)
        .await?;

        // Refresh the trigram index row
        sqlx::query("DELETE FROM oracle_card_fts WHERE card_id = ?")
            .bind(&card_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO oracle_card_fts (card_id, name) VALUES (?, ?)")
            .bind(&card_id)
            .bind(&card.name)
            .execute(&mut *tx)
            .await?;

        summary.cards_upserted += 1;
    }

    sqlx::query("DELETE FROM ruling").execute(&mut *tx).await?;
    for ruling in rulings {
        sqlx::query(
            "INSERT INTO ruling (id, oracle_id, source, published_at, comment) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&ruling.oracle_id)
        .bind(&ruling.source)
        .bind(ruling.published_at.to_string())
        .bind(&ruling.comment)
        .execute(&mut *tx)
        .await?;
        summary.rulings_written += 1;
    }

    tx.commit().await?;

    if summary.cards_skipped > 0 {
        warn!(
            skipped = summary.cards_skipped,
            "cards without a top-level oracle_id were skipped"
        );
    }
    Ok(summary)
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[derive(Deserialize)]
struct BulkDataList {
    data: Vec<BulkDataEntry>,
}

#[derive(Deserialize)]
struct BulkDataEntry {
    #[serde(rename = "type")]
    kind: String,
    download_uri: String,
}

/// Download URIs for the `oracle_cards` and `rulings` bulk files.
pub async fn bulk_download_uris(
    client: &reqwest::Client,
    api_url: &str,
    max_retries: u32,
) -> Result<(String, String)> {
    let url = format!("{}/bulk-data", api_url.trim_end_matches('/'));
    let response = http::send_with_retry(SCRYFALL, max_retries, || client.get(&url)).await?;
    let list: BulkDataList = http::ensure_success(SCRYFALL, response).await?.json().await?;

    let find = |kind: &str| {
        list.data
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.download_uri.clone())
    };
    let Some(cards_uri) = find("oracle_cards") else {
        bail!("Could not find download URI for oracle_cards");
    };
    let Some(rulings_uri) = find("rulings") else {
        bail!("Could not find download URI for rulings");
    };
    Ok((cards_uri, rulings_uri))
}

async fn download_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    max_retries: u32,
) -> Result<T> {
    info!(%url, "downloading bulk file");
    let response = http::send_with_retry(SCRYFALL, max_retries, || client.get(url)).await?;
    Ok(http::ensure_success(SCRYFALL, response).await?.json().await?)
}

/// Load cards and rulings into the database named in `config`.
pub async fn load_cards(config: &Config, source: CardSource<'_>) -> Result<CardLoadSummary> {
    let pool = db::connect(config).await?;
    let result = async {
        db::require_schema(&pool).await?;

        let (cards, rulings): (Vec<OracleCard>, Vec<Ruling>) = match source {
            CardSource::Files { cards, rulings } => {
                (read_json_file(cards)?, read_json_file(rulings)?)
            }
            CardSource::Download => {
                let sf = &config.scryfall;
                // Bulk files are large; allow far longer than a search page
                let client = http::client(sf.timeout_secs.max(600))?;
                let (cards_uri, rulings_uri) =
                    bulk_download_uris(&client, &sf.api_url, sf.max_retries).await?;
                (
                    download_json(&client, &cards_uri, sf.max_retries).await?,
                    download_json(&client, &rulings_uri, sf.max_retries).await?,
                )
            }
        };
        info!(cards = cards.len(), rulings = rulings.len(), "bulk data read");

        store_bulk(&pool, &cards, &rulings).await
    }
    .await;
    pool.close().await;
    result
}

/// Stable id for a text record in a namespace.
pub fn record_id(namespace: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Upsert `texts` into `namespace` in batches; returns the record count.
pub async fn upsert_texts(
    index: &dyn VectorIndex,
    namespace: &str,
    texts: &[String],
    batch_size: usize,
) -> Result<usize> {
    let records: Vec<VectorRecord> = texts
        .iter()
        .map(|text| VectorRecord {
            id: record_id(namespace, text),
            data: text.clone(),
        })
        .collect();

    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    for (i, batch) in records.chunks(batch_size).enumerate() {
        index.upsert(namespace, batch).await?;
        info!(%namespace, batch = i + 1, total_batches, "indexed batch");
    }
    Ok(records.len())
}

/// Parse a Comprehensive Rules document and index it.
pub async fn load_rules(
    index: &dyn VectorIndex,
    content: &str,
    batch_size: usize,
) -> Result<RulesLoadSummary> {
    let doc = comp_rules::parse(content)?;
    let rule_groups =
        upsert_texts(index, COMPREHENSIVE_RULES_NS, &doc.rule_groups, batch_size).await?;
    let glossary_entries = upsert_texts(index, GLOSSARY_NS, &doc.glossary, batch_size).await?;
    Ok(RulesLoadSummary {
        rule_groups,
        glossary_entries,
    })
}

/// Chunk a plain-text document and index it into `namespace`.
pub async fn load_text(
    index: &dyn VectorIndex,
    namespace: &str,
    content: &str,
    max_tokens: usize,
    batch_size: usize,
) -> Result<usize> {
    if namespace.trim().is_empty() {
        bail!("namespace must not be empty");
    }
    let chunks = chunk_text(content, max_tokens);
    if chunks.is_empty() {
        bail!("document has no text to index");
    }
    upsert_texts(index, namespace, &chunks, batch_size).await
}

/// CLI entry point for `mtg load-cards`.
pub async fn run_load_cards(config: &Config, source: CardSource<'_>) -> Result<()> {
    let summary = load_cards(config, source).await?;
    println!("load-cards");
    println!("  cards upserted: {}", summary.cards_upserted);
    println!("  cards skipped:  {}", summary.cards_skipped);
    println!("  rulings:        {}", summary.rulings_written);
    println!("ok");
    Ok(())
}

/// CLI entry point for `mtg load-rules`.
pub async fn run_load_rules(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let index = vector::open_index(&config.vector_index);
    let summary = load_rules(
        index.as_ref(),
        &content,
        config.vector_index.upsert_batch_size,
    )
    .await?;
    println!("load-rules {}", path.display());
    println!("  rule groups ({}): {}", COMPREHENSIVE_RULES_NS, summary.rule_groups);
    println!("  glossary ({}):    {}", GLOSSARY_NS, summary.glossary_entries);
    println!("ok");
    Ok(())
}

/// CLI entry point for `mtg load-text`.
pub async fn run_load_text(config: &Config, namespace: &str, path: &Path) -> Result<()> {
    if !config
        .vector_index
        .partitions
        .iter()
        .any(|p| p.namespace == namespace)
    {
        warn!(%namespace, "namespace is not a configured partition; lookups will not query it");
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let index = vector::open_index(&config.vector_index);
    let count = load_text(
        index.as_ref(),
        namespace,
        &content,
        config.chunking.max_tokens,
        config.vector_index.upsert_batch_size,
    )
    .await?;
    println!("load-text {} -> {}", path.display(), namespace);
    println!("  chunks: {}", count);
    println!("ok");
    Ok(())
}
