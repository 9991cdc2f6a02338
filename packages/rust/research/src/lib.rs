//! Research client: asks an external knowledge engine which organizations
//! match a query in one sub-region.
//!
//! The orchestrator only sees the [`ResearchClient`] trait. The production
//! implementation, [`ChatResearchClient`], talks to any OpenAI-compatible
//! chat-completions endpoint (xAI's Grok by default).
//!
//! Clients never retry and never invent data: fields the engine could not
//! substantiate come back as `None`.

mod client;
pub mod parse;
pub mod prompt;

use async_trait::async_trait;
use prospector_shared::{Candidate, Result};
use serde::{Deserialize, Serialize};

pub use client::ChatResearchClient;
pub use parse::parse_response;

/// One research call: a single sub-region of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub sub_region: String,
    pub region: String,
    pub query: String,
    pub max_results: u32,
}

/// What the engine returned, tagged by how it was understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchResponse {
    /// The engine answered in the requested JSON shape.
    Structured {
        candidates: Vec<Candidate>,
        summary: Option<String>,
        raw: String,
    },
    /// The answer did not conform; candidates were extracted best-effort.
    Fallback {
        candidates: Vec<Candidate>,
        summary: Option<String>,
        reason: String,
        raw: String,
    },
}

impl ResearchResponse {
    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Structured { candidates, .. } | Self::Fallback { candidates, .. } => candidates,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Structured { summary, .. } | Self::Fallback { summary, .. } => summary.as_deref(),
        }
    }

    /// The assistant message exactly as received.
    pub fn raw(&self) -> &str {
        match self {
            Self::Structured { raw, .. } | Self::Fallback { raw, .. } => raw,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// A stateless adapter to a knowledge engine.
///
/// Implementations return `Err` only for hard failures (transport, non-success
/// status, unreadable envelope). Unexpected message text is a
/// [`ResearchResponse::Fallback`], not an error.
#[async_trait]
pub trait ResearchClient: Send + Sync {
    async fn research(&self, request: &ResearchRequest) -> Result<ResearchResponse>;
}
