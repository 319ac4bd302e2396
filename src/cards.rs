//! Fuzzy card lookup with rulings.
//!
//! For each requested name the single closest oracle card is returned along
//! with its rulings, oldest first. Closeness is trigram similarity (see
//! [`crate::trigram`]); candidates come from the `oracle_card_fts` trigram
//! index and are re-scored in Rust.
//!
//! Multi-faced cards and the layouts listed in `[cards].excluded_layouts`
//! (art series and tokens by default) never match. A name with no match maps
//! to an empty list; it is not an error.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{CardsConfig, Config};
use crate::db;
use crate::models::{CardWithRulings, RulingEntry};
use crate::trigram;

/// Input name → zero or one matching card.
pub type CardMatches = BTreeMap<String, Vec<CardWithRulings>>;

#[derive(Debug, Clone)]
pub struct CardLookupOptions {
    pub similarity_threshold: f64,
    pub candidate_k: i64,
    pub excluded_layouts: Vec<String>,
}

impl From<&CardsConfig> for CardLookupOptions {
    fn from(cfg: &CardsConfig) -> Self {
        Self {
            similarity_threshold: cfg.similarity_threshold,
            candidate_k: cfg.candidate_k,
            excluded_layouts: cfg.excluded_layouts.clone(),
        }
    }
}

impl Default for CardLookupOptions {
    fn default() -> Self {
        Self::from(&CardsConfig::default())
    }
}

struct Candidate {
    id: String,
    oracle_id: String,
    name: String,
    scryfall_uri: String,
    mana_cost: Option<String>,
    type_line: Option<String>,
    oracle_text: Option<String>,
    power: Option<String>,
    toughness: Option<String>,
    score: f64,
}

/// Look up every name in `names` against an open card database.
pub async fn lookup_cards(
    pool: &SqlitePool,
    names: &[String],
    opts: &CardLookupOptions,
) -> Result<CardMatches> {
    let mut matches = CardMatches::new();

    for name in names {
        if matches.contains_key(name) {
            continue;
        }
        let found = match best_match(pool, name, opts).await? {
            Some(candidate) => {
                let rulings = fetch_rulings(pool, &candidate.oracle_id).await?;
                debug!(query = %name, card = %candidate.name, score = candidate.score, "card matched");
                vec![CardWithRulings {
                    scryfall_uri: candidate.scryfall_uri,
                    name: candidate.name,
                    mana_cost: candidate.mana_cost,
                    type_line: candidate.type_line,
                    oracle_text: candidate.oracle_text,
                    power: candidate.power,
                    toughness: candidate.toughness,
                    rulings,
                }]
            }
            None => {
                debug!(query = %name, "no card matched");
                Vec::new()
            }
        };
        matches.insert(name.clone(), found);
    }

    Ok(matches)
}

/// Connects using `config` and runs [`lookup_cards`].
pub async fn fetch_card_details(config: &Config, names: &[String]) -> Result<CardMatches> {
    let pool = db::connect(config).await?;
    let result = lookup_cards(&pool, names, &CardLookupOptions::from(&config.cards)).await;
    pool.close().await;
    result
}

async fn best_match(
    pool: &SqlitePool,
    name: &str,
    opts: &CardLookupOptions,
) -> Result<Option<Candidate>> {
    if name.trim().is_empty() {
        return Ok(None);
    }

    let mut candidates = fetch_candidates(pool, name, opts).await?;
    for c in &mut candidates {
        c.score = trigram::similarity(&c.name, name);
    }
    candidates.retain(|c| c.score > opts.similarity_threshold);

    // Best score first; name and id keep ties deterministic
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(candidates.into_iter().next())
}

async fn fetch_candidates(
    pool: &SqlitePool,
    name: &str,
    opts: &CardLookupOptions,
) -> Result<Vec<Candidate>> {
    let layout_clause = if opts.excluded_layouts.is_empty() {
        String::new()
    } else {
        let placeholders = vec!["?"; opts.excluded_layouts.len()].join(", ");
        format!("AND c.layout NOT IN ({})", placeholders)
    };

    let grams = trigram::search_trigrams(name);

    let rows = if grams.is_empty() {
        // Nothing long enough for the trigram index; substring scan instead
        let sql = format!(
            r#"
            SELECT c.id, c.oracle_id, c.name, c.scryfall_uri, c.mana_cost, c.type_line,
                   c.oracle_text, c.power, c.toughness
            FROM oracle_card c
            WHERE c.name LIKE ? ESCAPE '\'
              AND c.card_faces IS NULL
              {}
            LIMIT ?
            "#,
            layout_clause
        );
        let mut query = sqlx::query(&sql).bind(like_pattern(name.trim()));
        for layout in &opts.excluded_layouts {
            query = query.bind(layout);
        }
        query.bind(opts.candidate_k).fetch_all(pool).await?
    } else {
        let match_expr = grams
            .iter()
            .map(|g| format!("\"{}\"", g))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            r#"
            SELECT c.id, c.oracle_id, c.name, c.scryfall_uri, c.mana_cost, c.type_line,
                   c.oracle_text, c.power, c.toughness
            FROM oracle_card_fts
            JOIN oracle_card c ON c.id = oracle_card_fts.card_id
            WHERE oracle_card_fts MATCH ?
              AND c.card_faces IS NULL
              {}
            ORDER BY oracle_card_fts.rank
            LIMIT ?
            "#,
            layout_clause
        );
        // Exclusions apply before the limit so skipped layouts never use up candidate_k
        let mut query = sqlx::query(&sql).bind(match_expr);
        for layout in &opts.excluded_layouts {
            query = query.bind(layout);
        }
        query.bind(opts.candidate_k).fetch_all(pool).await?
    };

    Ok(rows
        .iter()
        .map(|row| Candidate {
            id: row.get("id"),
            oracle_id: row.get("oracle_id"),
            name: row.get("name"),
            scryfall_uri: row.get("scryfall_uri"),
            mana_cost: row.get("mana_cost"),
            type_line: row.get("type_line"),
            oracle_text: row.get("oracle_text"),
            power: row.get("power"),
            toughness: row.get("toughness"),
            score: 0.0,
        })
        .collect())
}

fn like_pattern(name: &str) -> String {
    let escaped = name
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn fetch_rulings(pool: &SqlitePool, oracle_id: &str) -> Result<Vec<RulingEntry>> {
    let rows = sqlx::query(
        "SELECT comment, published_at FROM ruling WHERE oracle_id = ? ORDER BY published_at ASC, rowid ASC",
    )
    .bind(oracle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RulingEntry {
            comment: row.get("comment"),
            published_at: row.get("published_at"),
        })
        .collect())
}

#[derive(Serialize)]
struct CardsOutput<'a> {
    matches: &'a CardMatches,
}

/// CLI entry point for `mtg cards`.
pub async fn run_cards(config: &Config, names: &[String], json: bool) -> Result<()> {
    let matches = fetch_card_details(config, names).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&CardsOutput { matches: &matches })?
        );
        return Ok(());
    }

    for (query, cards) in &matches {
        println!("--- {} ---", query);
        let Some(card) = cards.first() else {
            println!("(no match)");
            println!();
            continue;
        };
        println!("name:      {}", card.name);
        if let Some(ref cost) = card.mana_cost {
            println!("mana cost: {}", cost);
        }
        if let Some(ref type_line) = card.type_line {
            println!("type:      {}", type_line);
        }
        if let (Some(p), Some(t)) = (&card.power, &card.toughness) {
            println!("p/t:       {}/{}", p, t);
        }
        println!("uri:       {}", card.scryfall_uri);
        if let Some(ref text) = card.oracle_text {
            println!();
            println!("{}", text);
        }
        if !card.rulings.is_empty() {
            println!();
            println!("rulings ({}):", card.rulings.len());
            for ruling in &card.rulings {
                println!("  [{}] {}", ruling.published_at, ruling.comment);
            }
        }
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store_bulk;
    use crate::migrate::apply_schema;
    use crate::models::{OracleCard, Ruling};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_pool() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cards.sqlite");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    fn card(oracle_id: &str, name: &str, layout: &str) -> OracleCard {
        OracleCard {
            object: "card".into(),
            oracle_id: Some(oracle_id.into()),
            name: name.into(),
            released_at: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            scryfall_uri: format!("https://scryfall.com/card/{}", oracle_id),
            layout: layout.into(),
            image_uris: None,
            mana_cost: Some("{R}".into()),
            cmc: Some(1.0),
            type_line: Some("Instant".into()),
            card_faces: None,
            oracle_text: Some(format!("{} text", name)),
            power: None,
            toughness: None,
            colors: Some(vec!["R".into()]),
            keywords: None,
            games: None,
            edhrec_rank: None,
        }
    }

    fn ruling(oracle_id: &str, date: (i32, u32, u32), comment: &str) -> Ruling {
        Ruling {
            object: "ruling".into(),
            oracle_id: oracle_id.into(),
            source: "wotc".into(),
            published_at: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            comment: comment.into(),
        }
    }

    async fn seeded_pool() -> (TempDir, SqlitePool) {
        let (tmp, pool) = test_pool().await;
        let mut dfc = card("o-dfc", "Delver of Secrets", "transform");
        dfc.card_faces = Some(vec![serde_json::json!({"name": "Delver of Secrets"})]);
        let cards = vec![
            card("o-bolt", "Lightning Bolt", "normal"),
            card("o-helix", "Lightning Helix", "normal"),
            card("o-counter", "Counterspell", "normal"),
            card("o-token", "Goblin Token", "token"),
            card("o-art", "Sol Ring Art", "art_series"),
            dfc,
        ];
        let rulings = vec![
            ruling("o-bolt", (2021, 6, 1), "second"),
            ruling("o-bolt", (2004, 10, 4), "first"),
            ruling("o-bolt", (2023, 2, 2), "third"),
            ruling("o-counter", (2010, 1, 1), "counter ruling"),
        ];
        store_bulk(&pool, &cards, &rulings).await.unwrap();
        (tmp, pool)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exact_match_with_sorted_rulings() {
        let (_tmp, pool) = seeded_pool().await;
        let result = lookup_cards(&pool, &names(&["Lightning Bolt"]), &CardLookupOptions::default())
            .await
            .unwrap();
        let cards = &result["Lightning Bolt"];
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "Lightning Bolt");
        let comments: Vec<&str> = cards[0].rulings.iter().map(|r| r.comment.as_str()).collect();
        assert_eq!(comments, vec!["first", "second", "third"]);
        assert_eq!(cards[0].rulings[0].published_at, "2004-10-04");
    }

    #[tokio::test]
    async fn test_excluded_layouts_do_not_crowd_out_candidates() {
        let (_tmp, pool) = test_pool().await;
        let mut cards: Vec<OracleCard> = (0..250)
            .map(|i| card(&format!("o-tok-{}", i), "Goblin", "token"))
            .collect();
        cards.push(card("o-guide", "Goblin Guide", "normal"));
        store_bulk(&pool, &cards, &[]).await.unwrap();

        let opts = CardLookupOptions::default();
        assert!(cards.len() as i64 > opts.candidate_k);
        let result = lookup_cards(&pool, &names(&["Goblin"]), &opts).await.unwrap();
        let matches = &result["Goblin"];
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Goblin Guide");
    }

    #[tokio::test]
    async fn test_typo_matches_best_candidate() {
        let (_tmp, pool) = seeded_pool().await;
        let result = lookup_cards(&pool, &names(&["lightnig bolt"]), &CardLookupOptions::default())
            .await
            .unwrap();
        assert_eq!(result["lightnig bolt"][0].name, "Lightning Bolt");
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let (_tmp, pool) = seeded_pool().await;
        let result = lookup_cards(
            &pool,
            &names(&["Zzyzx Qwerty", "", "   "]),
            &CardLookupOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.values().all(|v| v.is_empty()));
    }

    #[tokio::test]
    async fn test_excluded_layouts_and_faces_never_match() {
        let (_tmp, pool) = seeded_pool().await;
        let result = lookup_cards(
            &pool,
            &names(&["Goblin Token", "Sol Ring Art", "Delver of Secrets"]),
            &CardLookupOptions::default(),
        )
        .await
        .unwrap();
        assert!(result.values().all(|v| v.is_empty()), "{:?}", result);
    }

    #[tokio::test]
    async fn test_card_without_rulings() {
        let (_tmp, pool) = seeded_pool().await;
        let result = lookup_cards(&pool, &names(&["Lightning Helix"]), &CardLookupOptions::default())
            .await
            .unwrap();
        let cards = &result["Lightning Helix"];
        assert_eq!(cards[0].name, "Lightning Helix");
        assert!(cards[0].rulings.is_empty());
    }

    #[tokio::test]
    async fn test_short_name_uses_substring_fallback() {
        let (tmp, pool) = test_pool().await;
        store_bulk(&pool, &[card("o-ow", "Ow", "normal")], &[]).await.unwrap();
        let result = lookup_cards(&pool, &names(&["ow"]), &CardLookupOptions::default())
            .await
            .unwrap();
        assert_eq!(result["ow"][0].name, "Ow");
        drop(tmp);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let (_tmp, pool) = seeded_pool().await;
        let opts = CardLookupOptions {
            similarity_threshold: 1.0,
            ..Default::default()
        };
        let result = lookup_cards(&pool, &names(&["Lightning Bolt"]), &opts).await.unwrap();
        assert!(result["Lightning Bolt"].is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
