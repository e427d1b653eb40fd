//! Embedding provider backends
//!
//! A provider maps a batch of strings to a batch of equal-length float
//! vectors over HTTP, and declares its batching limits. Two wire shapes
//! cover the configured identifiers: the OpenAI embeddings API (used by
//! `openai` and any `openai-compatible` endpoint) and the Text
//! Embeddings Inference `/embed` API (`tei`).

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::EmbeddingSettings;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Rate limited by provider")]
    RateLimited {
        /// Seconds from a Retry-After header, when the provider sent one
        retry_after: Option<u64>,
    },
    #[error("Provider returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Provider returned an empty embedding response")]
    EmptyResponse,
    #[error("Provider returned {got} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Limits a provider declares for the batching layer
#[derive(Debug, Clone, Copy)]
pub struct ProviderLimits {
    /// Maximum texts per request
    pub max_batch_size: usize,
    /// Token budget per request (estimated client-side)
    pub max_batch_tokens: usize,
}

/// A configured embedding backend.
pub enum EmbeddingProvider {
    OpenAi(OpenAiProvider),
    Tei(TeiProvider),
}

impl EmbeddingProvider {
    /// Build a provider from the embedding config section.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        match settings.provider.as_str() {
            "openai" | "openai-compatible" => {
                let base_url = settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                if settings.provider == "openai" && settings.api_key.is_none() {
                    return Err(EmbedError::Config(
                        "embedding.api_key is required for the openai provider".into(),
                    ));
                }
                Ok(EmbeddingProvider::OpenAi(OpenAiProvider {
                    client,
                    name: if settings.provider == "openai" {
                        "openai"
                    } else {
                        "openai-compatible"
                    },
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key: settings.api_key.clone(),
                    model: settings.model.clone(),
                    limits: ProviderLimits {
                        max_batch_size: settings.batch_size,
                        max_batch_tokens: settings.max_batch_tokens,
                    },
                }))
            }
            "tei" | "bge-in-icl" => {
                let base_url = settings.base_url.clone().ok_or_else(|| {
                    EmbedError::Config(format!(
                        "embedding.base_url is required for the {} provider",
                        settings.provider
                    ))
                })?;
                Ok(EmbeddingProvider::Tei(TeiProvider {
                    client,
                    name: if settings.provider == "tei" { "tei" } else { "bge-in-icl" },
                    base_url: base_url.trim_end_matches('/').to_string(),
                    model: settings.model.clone(),
                    limits: ProviderLimits {
                        max_batch_size: settings.batch_size,
                        max_batch_tokens: settings.max_batch_tokens,
                    },
                }))
            }
            other => Err(EmbedError::Config(format!(
                "Unknown embedding provider '{other}'. Supported: openai, openai-compatible, tei, bge-in-icl"
            ))),
        }
    }

    /// Provider identifier as stored with each embedding row
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi(p) => p.name,
            EmbeddingProvider::Tei(p) => p.name,
        }
    }

    /// Model identifier as stored with each embedding row
    pub fn model(&self) -> &str {
        match self {
            EmbeddingProvider::OpenAi(p) => &p.model,
            EmbeddingProvider::Tei(p) => &p.model,
        }
    }

    pub fn limits(&self) -> ProviderLimits {
        match self {
            EmbeddingProvider::OpenAi(p) => p.limits,
            EmbeddingProvider::Tei(p) => p.limits,
        }
    }

    /// Embed one batch of texts. Returns one vector per input, in order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vectors = match self {
            EmbeddingProvider::OpenAi(p) => p.embed(texts).await?,
            EmbeddingProvider::Tei(p) => p.embed(texts).await?,
        };
        if vectors.is_empty() && !texts.is_empty() {
            return Err(EmbedError::EmptyResponse);
        }
        if vectors.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

// ===== OpenAI-compatible =====

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    model: String,
    limits: ProviderLimits,
}

impl OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EmbedError::RateLimited {
                retry_after: retry_after_secs(&response),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message: truncate_message(&message),
            });
        }

        let body: OpenAiResponse = response.json().await?;
        // The API documents `data` in input order, but `index` is
        // authoritative
        let mut data = body.data;
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

// ===== Text Embeddings Inference =====

pub struct TeiProvider {
    client: reqwest::Client,
    name: &'static str,
    base_url: String,
    model: String,
    limits: ProviderLimits,
}

impl TeiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "inputs": texts,
                "truncate": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EmbedError::RateLimited {
                retry_after: retry_after_secs(&response),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message: truncate_message(&message),
            });
        }

        let vectors: Vec<Vec<f32>> = response.json().await?;
        Ok(vectors)
    }
}

/// Keep provider error bodies log-sized
fn truncate_message(message: &str) -> String {
    const MAX: usize = 500;
    if message.len() > MAX {
        let truncated: String = message.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        message.to_string()
    }
}
