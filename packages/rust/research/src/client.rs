//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use prospector_shared::{AppConfig, ProspectorError, ResearchConfig, Result, research_api_key};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::parse::parse_response;
use crate::prompt::{SYSTEM_PROMPT, user_prompt};
use crate::{ResearchClient, ResearchRequest, ResearchResponse};

/// User-Agent string for research requests.
const USER_AGENT: &str = concat!("Prospector/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Research client backed by a chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatResearchClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ChatResearchClient {
    /// Build a client from the `[research]` config section and an API key.
    pub fn new(config: &ResearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProspectorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Build a client reading the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = research_api_key(config)?;
        Self::new(&config.research, api_key)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProspectorError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(MAX_ERROR_BODY).collect();
            warn!(%status, "research engine returned an error");
            return Err(ProspectorError::Research(format!("HTTP {status}: {excerpt}")));
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProspectorError::Research(format!("malformed chat response: {e}")))?;

        envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProspectorError::Research("chat response has no message content".into()))
    }
}

#[async_trait]
impl ResearchClient for ChatResearchClient {
    #[instrument(skip_all, fields(sub_region = %request.sub_region, region = %request.region))]
    async fn research(&self, request: &ResearchRequest) -> Result<ResearchResponse> {
        let prompt = user_prompt(request);
        debug!(model = %self.model, "calling research engine");

        let content = self.complete(&prompt).await?;
        let response = parse_response(&content, request.max_results as usize);

        match &response {
            ResearchResponse::Structured { candidates, .. } => {
                info!(candidates = candidates.len(), "research complete");
            }
            ResearchResponse::Fallback {
                candidates, reason, ..
            } => {
                warn!(candidates = candidates.len(), %reason, "research answer was not structured");
            }
        }
        Ok(response)
    }
}
