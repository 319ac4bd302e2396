//! # MTG RAG
//!
//! Retrieval layer for a Magic: The Gathering rules assistant.
//!
//! Three tools feed the language model: a fuzzy card lookup over a local
//! copy of Scryfall's oracle cards and rulings, a vector search over the
//! Tournament Rules, Comprehensive Rules and glossary, and a pass-through
//! to Scryfall's card search. A consistency check compares the card
//! database against the vector index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Scryfall   │──▶│   ingest     │──▶│ SQLite+FTS5  │  cards, rulings
//! │  bulk data   │   │              │   └──────┬───────┘
//! └──────────────┘   │  comp_rules  │   ┌──────┴───────┐
//! ┌──────────────┐   │  chunk       │──▶│ Upstash Vec  │  mtr / cr / gls
//! │  rules text  │──▶│              │   └──────┬───────┘
//! └──────────────┘   └──────────────┘          │
//!                        ┌─────────────────────┤
//!                        ▼                     ▼
//!                   ┌──────────┐         ┌───────────┐
//!                   │   CLI    │         │ HTTP, MCP │
//!                   │  (mtg)   │         │  + chat   │
//!                   └──────────┘         └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Card and ruling types |
//! | [`db`], [`migrate`] | SQLite connection and schema |
//! | [`trigram`] | Trigram similarity for card names |
//! | [`cards`] | Fuzzy card lookup with rulings |
//! | [`vector`] | Vector index abstraction (Upstash, in-memory) |
//! | [`rules`] | Partitioned rules lookup with confidence threshold |
//! | [`scryfall`] | Scryfall card search |
//! | [`stats`] | Database / index consistency check |
//! | [`comp_rules`], [`chunk`] | Rules document parsing and text chunking |
//! | [`ingest`] | Loading cards and rules |
//! | [`traits`] | Tool trait and registry |
//! | [`chat`] | Tool-calling chat loop |
//! | [`server`], [`mcp`] | HTTP and MCP server |

pub mod cards;
pub mod chat;
pub mod chunk;
pub mod comp_rules;
pub mod config;
pub mod db;
pub mod http;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod rules;
pub mod scryfall;
pub mod server;
pub mod stats;
pub mod traits;
pub mod trigram;
pub mod vector;
