use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Oracle cards, one row per oracle_id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oracle_card (
            id TEXT PRIMARY KEY,
            oracle_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            released_at TEXT NOT NULL,
            scryfall_uri TEXT NOT NULL,
            layout TEXT NOT NULL,
            image_uris TEXT,
            mana_cost TEXT,
            cmc REAL,
            type_line TEXT,
            card_faces TEXT,
            oracle_text TEXT,
            power TEXT,
            toughness TEXT,
            colors TEXT,
            keywords TEXT,
            games TEXT,
            edhrec_rank INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rulings, keyed loosely by oracle_id (bulk data may reference unknown cards)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ruling (
            id TEXT PRIMARY KEY,
            oracle_id TEXT,
            source TEXT NOT NULL,
            published_at TEXT NOT NULL,
            comment TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='oracle_card_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE oracle_card_fts USING fts5(
                card_id UNINDEXED,
                name,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ruling_oracle_id ON ruling(oracle_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_oracle_card_name ON oracle_card(name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_oracle_card_released_at ON oracle_card(released_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
