//! Chat models and the tool-calling answer loop.
//!
//! Three model ids are exposed to clients, each mapped to a provider model
//! in `[chat.models]`:
//!
//! | Id | Name | Tools |
//! |----|------|-------|
//! | `chat-model-small` | Fast | none, answers from model knowledge |
//! | `chat-model-large` | Balanced | card lookup, rules lookup, Scryfall |
//! | `chat-model-reasoning` | Reasoning | same as large |
//!
//! [`ask`] talks to any OpenAI-compatible `POST /chat/completions` endpoint.
//! While the model asks for tool calls, they are run through the
//! [`ToolRegistry`] and the results appended to the conversation; after
//! `[chat].max_steps` rounds a final answer is requested with tools
//! disabled.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, ChatModelsConfig, Config};
use crate::http;
use crate::traits::{ToolContext, ToolRegistry};

const SERVICE: &str = "Chat provider";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatModel {
    Small,
    Large,
    Reasoning,
}

impl ChatModel {
    pub const ALL: [ChatModel; 3] = [ChatModel::Small, ChatModel::Large, ChatModel::Reasoning];

    pub fn id(self) -> &'static str {
        match self {
            ChatModel::Small => "chat-model-small",
            ChatModel::Large => "chat-model-large",
            ChatModel::Reasoning => "chat-model-reasoning",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChatModel::Small => "Fast",
            ChatModel::Large => "Balanced",
            ChatModel::Reasoning => "Reasoning",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ChatModel::Small => "No sources, quick responses",
            ChatModel::Large => "Cites sources, balanced speed",
            ChatModel::Reasoning => "In-depth reasoning, slower responses",
        }
    }

    pub fn uses_tools(self) -> bool {
        !matches!(self, ChatModel::Small)
    }

    pub fn provider_model(self, models: &ChatModelsConfig) -> &str {
        match self {
            ChatModel::Small => &models.small,
            ChatModel::Large => &models.large,
            ChatModel::Reasoning => &models.reasoning,
        }
    }

    pub fn system_prompt(self) -> String {
        if self.uses_tools() {
            format!("{}\n\n{}", REGULAR_PROMPT, TOOLS_PROMPT)
        } else {
            format!("{}\n\n{}", SMALL_PROMPT, REGULAR_PROMPT)
        }
    }
}

const REGULAR_PROMPT: &str = "\
You are a Magic: The Gathering rules assistant. Answer rules questions \
accurately and concisely. When a question involves specific cards, explain \
how their text interacts step by step, naming the rules that apply. If the \
answer depends on information you do not have, say so.";

const TOOLS_PROMPT: &str = "\
Retrieval:
- Call fetch_card_details with every card name mentioned in the question \
before reasoning about a card. Use the returned oracle text and rulings, \
not memory.
- Call fetch_vector_db with a focused query to find relevant passages from \
the Comprehensive Rules, the glossary and the Tournament Rules. A result of \
\"No high quality vectors found. Refine search query.\" means nothing \
relevant matched; rephrase the query before giving up.
- Call search_scryfall when the user asks which cards match some criteria.
Cite rule numbers and card rulings that support the answer.";

const SMALL_PROMPT: &str = "\
Use only as many tokens as necessary and rely only on what you already \
know. No retrieval tools are available.";

// ═══════════════════════════════════════════════════════════════════════
// Wire types (OpenAI chat completions)
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    pub fn tool(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::text("tool", content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as sent by the provider.
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// A chat completions backend.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Return the assistant message for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage>;
}

/// OpenAI-compatible HTTP backend.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn from_config(cfg: &ChatConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(cfg.timeout_secs)?,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.resolved_api_key()?,
            max_retries: cfg.max_retries,
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatMessage> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = http::send_with_retry(SERVICE, self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
        })
        .await?;
        let body: CompletionResponse = http::ensure_success(SERVICE, response).await?.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow!("{} returned no choices", SERVICE))
    }
}

/// Stand-in used by the server when no API key is configured; every
/// completion fails with the reason.
pub struct UnconfiguredChat {
    reason: String,
}

impl UnconfiguredChat {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatCompletion for UnconfiguredChat {
    async fn complete(&self, _request: &CompletionRequest) -> Result<ChatMessage> {
        bail!("chat provider unavailable: {}", self.reason)
    }
}

/// Build the configured backend, or an [`UnconfiguredChat`] if the API key
/// is missing.
pub fn open_chat(config: &ChatConfig) -> Arc<dyn ChatCompletion> {
    match OpenAiChat::from_config(config) {
        Ok(chat) => Arc::new(chat),
        Err(e) => {
            warn!(error = %e, "chat provider not configured");
            Arc::new(UnconfiguredChat::new(e.to_string()))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Answer loop
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub model: String,
    pub answer: String,
    pub tool_invocations: Vec<ToolInvocation>,
    /// Completion requests made, including the final one.
    pub steps: usize,
}

fn tool_definitions(registry: &ToolRegistry) -> Vec<Value> {
    registry
        .infos()
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

async fn run_tool_call(registry: &ToolRegistry, ctx: &ToolContext, call: &ToolCall) -> ToolInvocation {
    let name = call.function.name.clone();
    let arguments: Value = match serde_json::from_str(&call.function.arguments) {
        Ok(v) => v,
        Err(e) => {
            warn!(tool = %name, error = %e, "tool arguments are not valid JSON");
            return ToolInvocation {
                name,
                arguments: Value::String(call.function.arguments.clone()),
                result: serde_json::json!({ "error": format!("invalid arguments: {}", e) }),
            };
        }
    };

    let result = match registry.call(&name, &arguments, ctx).await {
        Ok(v) => v,
        Err(e) => {
            warn!(tool = %name, error = %e, "tool call failed");
            serde_json::json!({ "error": e.to_string() })
        }
    };

    ToolInvocation {
        name,
        arguments,
        result,
    }
}

/// Answer the last user message of `conversation`.
pub async fn ask(
    config: &ChatConfig,
    backend: &dyn ChatCompletion,
    registry: &ToolRegistry,
    ctx: &ToolContext,
    model: ChatModel,
    conversation: Vec<ChatMessage>,
) -> Result<ChatAnswer> {
    match conversation.last() {
        Some(m) if m.role == "user" => {}
        _ => bail!("conversation must end with a user message"),
    }

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::system(model.system_prompt()));
    messages.extend(conversation);

    let tools = if model.uses_tools() {
        tool_definitions(registry)
    } else {
        Vec::new()
    };
    let provider_model = model.provider_model(&config.models).to_string();
    let mut invocations = Vec::new();
    let mut steps = 0;

    while steps < config.max_steps {
        steps += 1;
        let request = CompletionRequest {
            model: provider_model.clone(),
            messages: messages.clone(),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            tools: tools.clone(),
        };
        let reply = backend.complete(&request).await?;

        if reply.tool_calls.is_empty() {
            info!(model = model.id(), steps, tools_called = invocations.len(), "answered");
            return Ok(ChatAnswer {
                model: model.id().to_string(),
                answer: reply.content.unwrap_or_default(),
                tool_invocations: invocations,
                steps,
            });
        }

        let calls = reply.tool_calls.clone();
        messages.push(reply);
        for call in &calls {
            debug!(tool = %call.function.name, step = steps, "tool call");
            let invocation = run_tool_call(registry, ctx, call).await;
            messages.push(ChatMessage::tool(&call.id, invocation.result.to_string()));
            invocations.push(invocation);
        }
    }

    // Out of steps: force a plain answer
    steps += 1;
    let request = CompletionRequest {
        model: provider_model,
        messages,
        tool_choice: Some("none".to_string()),
        tools,
    };
    let reply = backend.complete(&request).await?;
    info!(model = model.id(), steps, tools_called = invocations.len(), "answered after step limit");

    Ok(ChatAnswer {
        model: model.id().to_string(),
        answer: reply.content.unwrap_or_default(),
        tool_invocations: invocations,
        steps,
    })
}

/// Resolve a model id, falling back to `[chat].default_model`.
pub fn resolve_model(config: &ChatConfig, id: Option<&str>) -> Result<ChatModel> {
    let id = id.unwrap_or(config.default_model.as_str());
    ChatModel::from_id(id).ok_or_else(|| {
        anyhow!(
            "invalid model '{}'. Must be one of: {}",
            id,
            ChatModel::ALL
                .iter()
                .map(|m| m.id())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

/// CLI entry point for `mtg ask`.
pub async fn run_ask(config: &Config, question: &str, model: Option<&str>, json: bool) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let model = resolve_model(&config.chat, model)?;
    let backend = OpenAiChat::from_config(&config.chat)?;
    let registry = ToolRegistry::with_builtins();
    let ctx = ToolContext::from_config(Arc::new(config.clone()));

    let answer = ask(
        &config.chat,
        &backend,
        &registry,
        &ctx,
        model,
        vec![ChatMessage::user(question)],
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    for inv in &answer.tool_invocations {
        println!("[{}] {}", inv.name, inv.arguments);
    }
    if !answer.tool_invocations.is_empty() {
        println!();
    }
    println!("{}", answer.answer);
    Ok(())
}
