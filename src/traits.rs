//! Tool trait and registry.
//!
//! Every retrieval capability the chat model can call is a [`Tool`]. The
//! same [`ToolRegistry`] backs the HTTP tool endpoints, the MCP bridge and
//! the `ask` loop, so a tool behaves identically wherever it is invoked.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  fetch_card_details  fetch_vector_db  search │
//! │       (SQLite)        (vector index)  _scry… │
//! └───────┬──────────────────┬──────────────┬────┘
//!         ▼                  ▼              ▼
//!   POST /tools/{name}      /mcp        mtg ask
//! ```
//!
//! Custom tools can be added with [`ToolRegistry::register`]:
//!
//! ```rust
//! use mtg_rag::traits::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins();
//! assert_eq!(tools.len(), 3);
//! // let mut tools = tools; tools.register(Box::new(MyTool::new()));
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cards::{self, CardMatches};
use crate::config::Config;
use crate::rules::{self, PartitionResult};
use crate::scryfall::{ScryfallClient, ScryfallSearch};
use crate::vector::{self, VectorIndex};

/// A tool that the model (or any HTTP/MCP client) can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores; also the route path
    /// (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Whether this tool ships with the crate.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema for the parameters (`type: "object"`).
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What tools get to work with: the config and the vector index.
#[derive(Clone)]
pub struct ToolContext {
    config: Arc<Config>,
    index: Arc<dyn VectorIndex>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, index: Arc<dyn VectorIndex>) -> Self {
        Self { config, index }
    }

    /// Context with the index described by `config.vector_index`.
    pub fn from_config(config: Arc<Config>) -> Self {
        let index = vector::open_index(&config.vector_index);
        Self { config, index }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub async fn fetch_card_details(&self, names: &[String]) -> Result<CardMatches> {
        cards::fetch_card_details(&self.config, names).await
    }

    pub async fn fetch_vector_db(&self, query: &str) -> Result<Vec<PartitionResult>> {
        rules::fetch_vector_db(&self.config, self.index.as_ref(), query).await
    }

    pub async fn search_scryfall(
        &self,
        query: &str,
        max_cards: Option<usize>,
    ) -> Result<ScryfallSearch> {
        ScryfallClient::from_config(&self.config.scryfall)?
            .search(query, max_cards)
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in tools
// ═══════════════════════════════════════════════════════════════════════

pub struct FetchCardDetailsTool;

#[async_trait]
impl Tool for FetchCardDetailsTool {
    fn name(&self) -> &str {
        "fetch_card_details"
    }

    fn description(&self) -> &str {
        "Fetch card details and official rulings from the card database by fuzzy matching card names"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "card_names": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Card names to be fuzzy matched"
                }
            },
            "required": ["card_names"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let names: Vec<String> = serde_json::from_value(params["card_names"].clone())?;
        let matches = ctx.fetch_card_details(&names).await?;
        Ok(serde_json::to_value(matches)?)
    }
}

pub struct FetchVectorDbTool;

#[async_trait]
impl Tool for FetchVectorDbTool {
    fn name(&self) -> &str {
        "fetch_vector_db"
    }

    fn description(&self) -> &str {
        "Query the tournament rules, comprehensive rules and glossary for passages relevant to a rules question; only high-confidence matches are returned"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to run against the rules index"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        let results = ctx.fetch_vector_db(query).await?;
        Ok(rules::to_tool_output(&results))
    }
}

pub struct SearchScryfallTool;

#[async_trait]
impl Tool for SearchScryfallTool {
    fn name(&self) -> &str {
        "search_scryfall"
    }

    fn description(&self) -> &str {
        "Search for cards using Scryfall query syntax. Useful for filtering cards by attributes like color, type, power/toughness or set"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Scryfall search query (e.g. \"c:red pow>5\", \"t:creature o:flying\", \"is:commander\")"
                },
                "max_cards": {
                    "type": "integer",
                    "description": "Maximum number of cards to fetch"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let max_cards = params["max_cards"].as_u64().map(|n| n as usize);
        let result = ctx.search_scryfall(query, max_cards).await?;
        Ok(serde_json::to_value(result)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Serializable tool description for `/tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with `fetch_card_details`, `fetch_vector_db` and
    /// `search_scryfall`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FetchCardDetailsTool));
        registry.register(Box::new(FetchVectorDbTool));
        registry.register(Box::new(SearchScryfallTool));
        registry
    }

    /// Register a tool. Names should be unique; [`find`](Self::find)
    /// returns the first match.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                builtin: t.is_builtin(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Look up, validate and run a tool.
    pub async fn call(&self, name: &str, params: &Value, ctx: &ToolContext) -> Result<Value> {
        let Some(tool) = self.find(name) else {
            bail!("no tool registered with name: {}", name);
        };
        let params = validate_params(&tool.parameters_schema(), params)?;
        tool.execute(params, ctx).await
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool's JSON Schema.
///
/// Verifies required fields, top-level property types (and the item type
/// of arrays) and `enum` membership, and fills in `default` values for
/// absent properties. Returns the params with defaults applied.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
            if !type_matches(expected_type, value) {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected_type,
                    json_type_name(value)
                );
            }
        }

        if let (Some(items), Some(item_type)) = (
            value.as_array(),
            prop_schema
                .get("items")
                .and_then(|i| i.get("type"))
                .and_then(|t| t.as_str()),
        ) {
            if let Some(bad) = items.iter().find(|v| !type_matches(item_type, v)) {
                bail!(
                    "parameter '{}' must contain only '{}' items, got {}",
                    prop_name,
                    item_type,
                    json_type_name(bad)
                );
            }
        }

        if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !enum_values.contains(value) {
                let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    prop_name,
                    allowed.join(", "),
                    value
                );
            }
        }
    }

    Ok(Value::Object(result))
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{MemoryIndex, VectorRecord};
    use serde_json::json;

    fn ctx_with(index: MemoryIndex) -> ToolContext {
        ToolContext::new(Arc::new(Config::minimal()), Arc::new(index))
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.infos().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["fetch_card_details", "fetch_vector_db", "search_scryfall"]
        );
        assert!(registry.tools().iter().all(|t| t.is_builtin()));
    }

    #[test]
    fn test_validate_missing_required() {
        let schema = FetchVectorDbTool.parameters_schema();
        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: query"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let schema = FetchVectorDbTool.parameters_schema();
        let err = validate_params(&schema, &json!({"query": 5})).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));
    }

    #[test]
    fn test_validate_array_items() {
        let schema = FetchCardDetailsTool.parameters_schema();
        let err = validate_params(&schema, &json!({"card_names": ["Opt", 3]})).unwrap_err();
        assert!(err.to_string().contains("'string' items"));
        assert!(validate_params(&schema, &json!({"card_names": []})).is_ok());
    }

    #[test]
    fn test_validate_enum_and_default() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["a", "b"], "default": "a"}
            }
        });
        let out = validate_params(&schema, &json!({})).unwrap();
        assert_eq!(out["mode"], "a");
        assert!(validate_params(&schema, &json!({"mode": "c"})).is_err());
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let schema = FetchVectorDbTool.parameters_schema();
        let err = validate_params(&schema, &json!(["q"])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[tokio::test]
    async fn test_call_fetch_vector_db() {
        let index = MemoryIndex::new();
        index
            .upsert(
                "gls",
                &[VectorRecord {
                    id: "1".into(),
                    data: "Mulligan To take a mulligan is to shuffle".into(),
                }],
            )
            .await
            .unwrap();
        let registry = ToolRegistry::with_builtins();
        let out = registry
            .call("fetch_vector_db", &json!({"query": "mulligan"}), &ctx_with(index))
            .await
            .unwrap();
        assert_eq!(
            out["Magic Comprehensive Glossary"][0],
            "Mulligan To take a mulligan is to shuffle"
        );
        assert_eq!(
            out["Magic Tournament Rules"][0],
            rules::NO_HIGH_CONFIDENCE_MATCH
        );
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .call("nope", &json!({}), &ctx_with(MemoryIndex::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no tool registered"));
    }

    #[tokio::test]
    async fn test_scryfall_tool_rejects_blank_query() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .call("search_scryfall", &json!({"query": " "}), &ctx_with(MemoryIndex::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
