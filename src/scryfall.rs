//! Scryfall card search.
//!
//! Runs a query in Scryfall's search syntax (`c:red pow>5`, `t:creature
//! o:flying`) against `GET /cards/search`, following `has_more` page by page
//! until `max_cards` cards have been collected. Scryfall asks clients to
//! keep 50–100 ms between requests, so pages are spaced by
//! `[scryfall].request_delay_ms`. A 404 from Scryfall means the query
//! matched nothing.

use anyhow::Result;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, ScryfallConfig};
use crate::http;

const SERVICE: &str = "Scryfall";

pub const NO_CARDS_FOUND: &str = "No cards found matching the query.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScryfallCard {
    pub scryfall_uri: String,
    pub name: String,
    pub mana_cost: Option<String>,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub power: Option<String>,
    pub toughness: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScryfallSearch {
    /// Total matches reported by Scryfall, which may exceed `fetched_cards`.
    pub total_cards: u64,
    pub fetched_cards: usize,
    pub cards: Vec<ScryfallCard>,
    pub query: String,
    pub message: String,
}

impl ScryfallSearch {
    fn empty(query: &str) -> Self {
        Self {
            total_cards: 0,
            fetched_cards: 0,
            cards: Vec::new(),
            query: query.to_string(),
            message: NO_CARDS_FOUND.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    total_cards: u64,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    data: Vec<RawCard>,
}

#[derive(Deserialize)]
struct RawCard {
    #[serde(default)]
    scryfall_uri: String,
    #[serde(default)]
    name: String,
    mana_cost: Option<String>,
    type_line: Option<String>,
    oracle_text: Option<String>,
    power: Option<String>,
    toughness: Option<String>,
}

/// Scryfall sends `""` for fields such as the mana cost of a land.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<RawCard> for ScryfallCard {
    fn from(raw: RawCard) -> Self {
        Self {
            scryfall_uri: raw.scryfall_uri,
            name: raw.name,
            mana_cost: non_empty(raw.mana_cost),
            type_line: non_empty(raw.type_line),
            oracle_text: non_empty(raw.oracle_text),
            power: non_empty(raw.power),
            toughness: non_empty(raw.toughness),
        }
    }
}

pub struct ScryfallClient {
    client: reqwest::Client,
    api_url: String,
    request_delay: Duration,
    max_retries: u32,
    default_max_cards: usize,
}

impl ScryfallClient {
    pub fn from_config(cfg: &ScryfallConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(cfg.timeout_secs)?,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            request_delay: Duration::from_millis(cfg.request_delay_ms),
            max_retries: cfg.max_retries,
            default_max_cards: cfg.max_cards,
        })
    }

    /// Search, collecting at most `max_cards` (config default when `None`).
    pub async fn search(&self, query: &str, max_cards: Option<usize>) -> Result<ScryfallSearch> {
        let max_cards = max_cards.unwrap_or(self.default_max_cards);
        let url = format!("{}/cards/search", self.api_url);

        let mut cards: Vec<ScryfallCard> = Vec::new();
        let mut total_cards = 0u64;
        let mut page = 1u32;
        let mut has_more = true;

        while has_more && cards.len() < max_cards {
            if page > 1 {
                tokio::time::sleep(self.request_delay).await;
            }

            let page_param = page.to_string();
            let response = http::send_with_retry(SERVICE, self.max_retries, || {
                self.client
                    .get(&url)
                    .query(&[("q", query), ("page", page_param.as_str())])
            })
            .await?;

            if response.status() == StatusCode::NOT_FOUND {
                debug!(%query, page, "no cards found");
                return Ok(ScryfallSearch::empty(query));
            }

            let body: SearchPage = http::ensure_success(SERVICE, response).await?.json().await?;
            total_cards = body.total_cards;
            has_more = body.has_more;

            let room = max_cards - cards.len();
            cards.extend(body.data.into_iter().take(room).map(ScryfallCard::from));
            debug!(%query, page, fetched = cards.len(), total_cards, "scryfall page");

            page += 1;
        }

        Ok(ScryfallSearch {
            total_cards,
            fetched_cards: cards.len(),
            message: format!(
                "Found {} total cards. Displaying {} cards.",
                total_cards,
                cards.len()
            ),
            cards,
            query: query.to_string(),
        })
    }
}

/// CLI entry point for `mtg scryfall`.
pub async fn run_scryfall(
    config: &Config,
    query: &str,
    max_cards: Option<usize>,
    json: bool,
) -> Result<()> {
    let client = ScryfallClient::from_config(&config.scryfall)?;
    let result = client.search(query, max_cards).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.message);
    for card in &result.cards {
        let cost = card.mana_cost.as_deref().unwrap_or("");
        let type_line = card.type_line.as_deref().unwrap_or("");
        println!("  {:<40} {:<12} {}", card.name, cost, type_line);
    }
    Ok(())
}
