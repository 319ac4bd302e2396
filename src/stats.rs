//! Consistency check across the card database and the vector index.
//!
//! Gathers row counts from SQLite and per-namespace vector counts from the
//! index, then checks that every configured partition exists and is not
//! empty. Problems are collected into the report rather than raised, so
//! callers (`mtg stats`, `GET /api/db-stats`) can show everything that is
//! wrong at once.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt::{self, Write};
use std::path::Path;
use tracing::warn;

use crate::config::{Config, PartitionConfig};
use crate::db;
use crate::vector::{self, IndexInfo, VectorIndex};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub oracle_card_count: i64,
    pub ruling_count: i64,
    /// Latest `released_at` among oracle cards.
    pub recent_oracle_card_date: Option<String>,
    /// Rulings whose oracle id has no card row.
    pub orphan_ruling_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Ok,
    Missing,
    Empty,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    pub namespace: String,
    pub label: String,
    pub vector_count: u64,
    pub state: PartitionState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub db_stats: DbStats,
    /// `None` when the index could not be reached.
    pub vector_stats: Option<IndexInfo>,
    pub partitions: Vec<PartitionStatus>,
    pub problems: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

pub async fn db_stats(pool: &SqlitePool) -> Result<DbStats> {
    let oracle_card_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oracle_card")
        .fetch_one(pool)
        .await?;

    let ruling_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ruling")
        .fetch_one(pool)
        .await?;

    let recent_oracle_card_date: Option<String> =
        sqlx::query_scalar("SELECT MAX(released_at) FROM oracle_card")
            .fetch_one(pool)
            .await?;

    let orphan_ruling_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM ruling r
        LEFT JOIN oracle_card c ON c.oracle_id = r.oracle_id
        WHERE c.id IS NULL
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(DbStats {
        oracle_card_count,
        ruling_count,
        recent_oracle_card_date,
        orphan_ruling_count,
    })
}

/// Build the report. Only database errors are returned as `Err`; an
/// unreachable index or a missing/empty partition becomes a problem entry.
pub async fn check_consistency(
    pool: &SqlitePool,
    index: &dyn VectorIndex,
    partitions: &[PartitionConfig],
) -> Result<ConsistencyReport> {
    let db_stats = db_stats(pool).await?;
    let mut problems = Vec::new();

    if db_stats.oracle_card_count == 0 {
        warn!("card database has no oracle cards");
        problems.push("no oracle cards loaded".to_string());
    }

    let vector_stats = match index.info().await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "vector index info failed");
            problems.push(e.to_string());
            None
        }
    };

    let mut statuses = Vec::with_capacity(partitions.len());
    for p in partitions {
        let (vector_count, state) = match &vector_stats {
            None => (0, PartitionState::Unavailable),
            Some(info) => match info.namespaces.get(&p.namespace) {
                None => {
                    warn!(namespace = %p.namespace, "namespace missing, counting as zero");
                    problems.push(format!("Namespace \"{}\" is missing", p.namespace));
                    (0, PartitionState::Missing)
                }
                Some(ns) if ns.vector_count == 0 => {
                    warn!(namespace = %p.namespace, "namespace empty");
                    problems.push(format!("Namespace \"{}\" is empty or has no data", p.namespace));
                    (0, PartitionState::Empty)
                }
                Some(ns) => (ns.vector_count, PartitionState::Ok),
            },
        };
        statuses.push(PartitionStatus {
            namespace: p.namespace.clone(),
            label: p.label.clone(),
            vector_count,
            state,
        });
    }

    Ok(ConsistencyReport {
        db_stats,
        vector_stats,
        partitions: statuses,
        problems,
    })
}

/// CLI entry point for `mtg stats`. Fails (exit code 1) when unhealthy.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = vector::open_index(&config.vector_index);
    let report = check_consistency(&pool, index.as_ref(), &config.vector_index.partitions).await;
    pool.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(config, &report)?;
    }

    if !report.is_healthy() {
        bail!("consistency check failed: {}", report.problems.join("; "));
    }
    Ok(())
}

fn print_report(config: &Config, report: &ConsistencyReport) -> Result<()> {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let mut out = String::new();
    write_report(&mut out, &config.db.path, db_size, report)?;
    print!("{}", out);
    Ok(())
}

fn write_report(
    out: &mut String,
    db_path: &Path,
    db_size: u64,
    report: &ConsistencyReport,
) -> fmt::Result {
    let s = &report.db_stats;

    writeln!(out, "MTG RAG Data Store Stats")?;
    writeln!(out, "========================")?;
    writeln!(out)?;
    writeln!(out, "  Database:      {}", db_path.display())?;
    writeln!(out, "  Size:          {}", format_bytes(db_size))?;
    writeln!(out)?;
    writeln!(out, "  Oracle cards:  {}", s.oracle_card_count)?;
    writeln!(out, "  Rulings:       {}", s.ruling_count)?;
    writeln!(out, "  Orphans:       {}", s.orphan_ruling_count)?;
    writeln!(
        out,
        "  Latest card:   {}",
        s.recent_oracle_card_date.as_deref().unwrap_or("-")
    )?;
    writeln!(out)?;

    if let Some(ref info) = report.vector_stats {
        writeln!(
            out,
            "  Vectors:       {} ({} pending)",
            info.vector_count, info.pending_vector_count
        )?;
    }
    writeln!(out, "  {:<12} {:<32} {:>8}   {}", "NAMESPACE", "LABEL", "VECTORS", "STATE")?;
    writeln!(out, "  {}", "-".repeat(68))?;
    for p in &report.partitions {
        writeln!(
            out,
            "  {:<12} {:<32} {:>8}   {:?}",
            p.namespace, p.label, p.vector_count, p.state
        )?;
    }
    writeln!(out)?;

    if report.is_healthy() {
        writeln!(out, "ok")?;
    } else {
        for problem in &report.problems {
            writeln!(out, "  problem: {}", problem)?;
        }
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorIndexConfig;
    use crate::ingest::store_bulk;
    use crate::migrate::apply_schema;
    use crate::models::{OracleCard, Ruling};
    use crate::vector::{MemoryIndex, UnconfiguredIndex, VectorRecord};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn pool() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stats.sqlite");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    fn card(oracle_id: &str, released: (i32, u32, u32)) -> OracleCard {
        serde_json::from_value(serde_json::json!({
            "object": "card",
            "oracle_id": oracle_id,
            "name": format!("Card {}", oracle_id),
            "released_at": NaiveDate::from_ymd_opt(released.0, released.1, released.2).unwrap(),
            "scryfall_uri": "https://scryfall.com/card/x",
            "layout": "normal"
        }))
        .unwrap()
    }

    fn ruling(oracle_id: &str) -> Ruling {
        Ruling {
            object: "ruling".into(),
            oracle_id: oracle_id.into(),
            source: "wotc".into(),
            published_at: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            comment: "c".into(),
        }
    }

    async fn full_index() -> MemoryIndex {
        let index = MemoryIndex::new();
        for ns in ["mtr", "cr", "gls"] {
            index
                .upsert(
                    ns,
                    &[VectorRecord {
                        id: format!("{}-1", ns),
                        data: "text".into(),
                    }],
                )
                .await
                .unwrap();
        }
        index
    }

    fn partitions() -> Vec<PartitionConfig> {
        VectorIndexConfig::default().partitions
    }

    #[tokio::test]
    async fn test_db_stats_counts() {
        let (_tmp, pool) = pool().await;
        store_bulk(
            &pool,
            &[card("a", (2019, 5, 1)), card("b", (2024, 2, 9))],
            &[ruling("a"), ruling("a"), ruling("ghost")],
        )
        .await
        .unwrap();
        let s = db_stats(&pool).await.unwrap();
        assert_eq!(s.oracle_card_count, 2);
        assert_eq!(s.ruling_count, 3);
        assert_eq!(s.orphan_ruling_count, 1);
        assert_eq!(s.recent_oracle_card_date.as_deref(), Some("2024-02-09"));
    }

    #[tokio::test]
    async fn test_empty_db_has_no_recent_date() {
        let (_tmp, pool) = pool().await;
        let s = db_stats(&pool).await.unwrap();
        assert_eq!(s.oracle_card_count, 0);
        assert!(s.recent_oracle_card_date.is_none());
    }

    #[tokio::test]
    async fn test_healthy_report() {
        let (_tmp, pool) = pool().await;
        store_bulk(&pool, &[card("a", (2020, 1, 1))], &[]).await.unwrap();
        let index = full_index().await;
        let report = check_consistency(&pool, &index, &partitions()).await.unwrap();
        assert!(report.is_healthy(), "{:?}", report.problems);
        assert!(report.partitions.iter().all(|p| p.state == PartitionState::Ok));
    }

    #[tokio::test]
    async fn test_missing_and_empty_partitions_reported() {
        let (_tmp, pool) = pool().await;
        store_bulk(&pool, &[card("a", (2020, 1, 1))], &[]).await.unwrap();
        let index = MemoryIndex::new();
        index.create_namespace("cr");
        index
            .upsert(
                "gls",
                &[VectorRecord {
                    id: "g".into(),
                    data: "x".into(),
                }],
            )
            .await
            .unwrap();

        let report = check_consistency(&pool, &index, &partitions()).await.unwrap();
        assert!(!report.is_healthy());
        let states: Vec<PartitionState> = report.partitions.iter().map(|p| p.state).collect();
        assert_eq!(
            states,
            vec![PartitionState::Missing, PartitionState::Empty, PartitionState::Ok]
        );
        assert_eq!(report.partitions[0].vector_count, 0);
        assert!(report.problems.iter().any(|p| p.contains("\"mtr\" is missing")));
        assert!(report.problems.iter().any(|p| p.contains("\"cr\" is empty")));
    }

    #[tokio::test]
    async fn test_unreachable_index_does_not_error() {
        let (_tmp, pool) = pool().await;
        let index = UnconfiguredIndex::new("no url");
        let report = check_consistency(&pool, &index, &partitions()).await.unwrap();
        assert!(report.vector_stats.is_none());
        assert!(report
            .partitions
            .iter()
            .all(|p| p.state == PartitionState::Unavailable));
        assert!(report.problems.iter().any(|p| p.contains("no url")));
        assert!(report.problems.iter().any(|p| p.contains("no oracle cards")));
    }

    #[tokio::test]
    async fn test_text_report_columns_line_up() {
        let (_tmp, pool) = pool().await;
        store_bulk(&pool, &[card("a", (2020, 1, 1))], &[ruling("a"), ruling("ghost")])
            .await
            .unwrap();
        let index = full_index().await;
        let report = check_consistency(&pool, &index, &partitions()).await.unwrap();

        let mut out = String::new();
        write_report(&mut out, Path::new("/tmp/cards.sqlite"), 2048, &report).unwrap();

        assert!(out.contains("  Orphans:       1\n"), "{}", out);
        for label in ["Database:", "Size:", "Oracle cards:", "Rulings:", "Orphans:", "Latest card:"] {
            let line = out
                .lines()
                .find(|l| l.trim_start().starts_with(label))
                .unwrap();
            let value_at = line.len() - line[2 + label.len()..].trim_start().len();
            assert_eq!(value_at, 17, "{:?}", line);
        }
        assert!(out.ends_with("ok\n"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
