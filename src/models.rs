//! Card and ruling data models.
//!
//! [`OracleCard`] and [`Ruling`] mirror the objects in Scryfall's
//! `oracle_cards` and `rulings` bulk files. [`CardWithRulings`] is the
//! trimmed view returned by the card lookup tool.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One oracle card as published in the Scryfall bulk data.
///
/// `oracle_id` is optional because reversible cards carry it per face
/// instead of at the top level; the loader skips those.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleCard {
    pub object: String,
    #[serde(default)]
    pub oracle_id: Option<String>,
    pub name: String,
    pub released_at: NaiveDate,
    pub scryfall_uri: String,
    pub layout: String,
    #[serde(default)]
    pub image_uris: Option<serde_json::Value>,
    #[serde(default)]
    pub mana_cost: Option<String>,
    #[serde(default)]
    pub cmc: Option<f64>,
    #[serde(default)]
    pub type_line: Option<String>,
    #[serde(default)]
    pub card_faces: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub oracle_text: Option<String>,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub toughness: Option<String>,
    #[serde(default)]
    pub colors: Option<Vec<String>>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub games: Option<Vec<String>>,
    #[serde(default)]
    pub edhrec_rank: Option<i64>,
}

/// An official ruling tied to an oracle card.
#[derive(Debug, Clone, Deserialize)]
pub struct Ruling {
    pub object: String,
    pub oracle_id: String,
    pub source: String,
    pub published_at: NaiveDate,
    pub comment: String,
}

/// Card lookup result: the rules-relevant card fields plus its rulings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardWithRulings {
    pub scryfall_uri: String,
    pub name: String,
    pub mana_cost: Option<String>,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub power: Option<String>,
    pub toughness: Option<String>,
    /// Oldest first.
    pub rulings: Vec<RulingEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulingEntry {
    pub comment: String,
    pub published_at: String,
}
