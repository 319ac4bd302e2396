//! Upstash Vector REST client.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | query     | `POST {url}/query-data/{namespace}` |
//! | upsert    | `POST {url}/upsert-data/{namespace}` |
//! | info      | `GET {url}/info` |
//!
//! Every response is wrapped as `{ "result": ... }` or `{ "error": "..." }`.
//! The default namespace (`""`) drops the path suffix.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{IndexInfo, VectorIndex, VectorMatch, VectorRecord};
use crate::config::VectorIndexConfig;
use crate::http;

const SERVICE: &str = "Upstash Vector";

pub struct UpstashIndex {
    client: reqwest::Client,
    url: String,
    token: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashIndex {
    pub fn new(url: &str, token: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries,
        })
    }

    /// Uses `[vector_index]` with the `UPSTASH_VECTOR_REST_*` fallbacks.
    pub fn from_config(cfg: &VectorIndexConfig) -> Result<Self> {
        let url = cfg.resolved_url()?;
        let token = cfg.resolved_token()?;
        Self::new(&url, &token, cfg.timeout_secs, cfg.max_retries)
    }

    fn endpoint(&self, operation: &str, namespace: &str) -> String {
        if namespace.is_empty() {
            format!("{}/{}", self.url, operation)
        } else {
            format!("{}/{}/{}", self.url, operation, namespace)
        }
    }

    async fn post<T: DeserializeOwned>(&self, url: String, body: serde_json::Value) -> Result<T> {
        let response = http::send_with_retry(SERVICE, self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
        })
        .await?;
        unwrap_envelope(http::ensure_success(SERVICE, response).await?).await
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let envelope: Envelope<T> = response.json().await?;
    match (envelope.result, envelope.error) {
        (_, Some(err)) => Err(anyhow!("{} error: {}", SERVICE, err)),
        (Some(result), None) => Ok(result),
        (None, None) => Err(anyhow!("{} returned an empty result", SERVICE)),
    }
}

#[async_trait]
impl VectorIndex for UpstashIndex {
    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> Result<Vec<VectorMatch>> {
        let body = serde_json::json!({
            "data": text,
            "topK": top_k,
            "includeData": true,
            "includeMetadata": false,
            "includeVectors": false,
        });
        let matches: Vec<VectorMatch> = self.post(self.endpoint("query-data", namespace), body).await?;
        debug!(%namespace, hits = matches.len(), "vector query");
        Ok(matches)
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(records)?;
        let _: serde_json::Value = self.post(self.endpoint("upsert-data", namespace), body).await?;
        debug!(%namespace, count = records.len(), "vector upsert");
        Ok(())
    }

    async fn info(&self) -> Result<IndexInfo> {
        let url = format!("{}/info", self.url);
        let response = http::send_with_retry(SERVICE, self.max_retries, || {
            self.client.get(&url).bearer_auth(&self.token)
        })
        .await?;
        unwrap_envelope(http::ensure_success(SERVICE, response).await?).await
    }
}
