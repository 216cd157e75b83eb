//! Two-tier vision-model HTTP client
//!
//! Builds the `generateContent` payload (prompt text plus inline base64
//! image), walks the tier's model chain in order, and parses the generated
//! text into the tier's result shape. The model chains are configuration
//! data: an ordered, swappable list, not health-based routing. If every
//! candidate fails, the tier fails with the last encountered error.

use std::time::Duration;

use common::Secret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::extract::extract_json;
use crate::model::{AnalysisResult, ImagePayload, Tier1Verdict};
use crate::prompt::{TIER1_PROMPT, TIER2_PROMPT};

/// Candidate models for the cheap tier-1 pre-filter, in preference order.
pub const DEFAULT_TIER1_MODELS: &[&str] = &["gemini-flash-lite-latest", "gemini-1.5-flash-8b"];

/// Candidate models for the tier-2 detailed analysis, in preference order.
pub const DEFAULT_TIER2_MODELS: &[&str] =
    &["gemini-1.5-flash-latest", "gemini-1.5-pro-latest", "gemini-pro"];

/// Per-attempt upper bound; expiry surfaces as a network error.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An ordered list of candidate model identifiers for one tier.
#[derive(Debug, Clone)]
pub struct ModelChain(Vec<String>);

impl ModelChain {
    pub fn new(models: Vec<String>) -> Self {
        Self(models)
    }

    pub fn from_names(names: &[&str]) -> Self {
        Self(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(serde::Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(serde::Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

/// Client for the upstream vision-model provider.
///
/// The base URL is injectable so tests can point the client at a fake
/// endpoint; production uses the provider's public API root.
pub struct VisionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
    tier1_models: ModelChain,
    tier2_models: ModelChain,
    timeout: Duration,
}

impl VisionClient {
    /// Create a client with the default model chains and timeout.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Secret<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
            tier1_models: ModelChain::from_names(DEFAULT_TIER1_MODELS),
            tier2_models: ModelChain::from_names(DEFAULT_TIER2_MODELS),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace both tier model chains.
    pub fn with_models(mut self, tier1: ModelChain, tier2: ModelChain) -> Self {
        self.tier1_models = tier1;
        self.tier2_models = tier2;
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tier 1: minimal-cost "is this food?" classification.
    pub async fn classify_food(&self, image: &ImagePayload) -> Result<Tier1Verdict> {
        let text = self.generate(&self.tier1_models, TIER1_PROMPT, image).await?;
        parse_payload(&text)
    }

    /// Tier 2: full meal analysis. Callers are expected to gate this behind
    /// a positive tier-1 verdict.
    pub async fn analyze_meal(&self, image: &ImagePayload) -> Result<AnalysisResult> {
        let text = self.generate(&self.tier2_models, TIER2_PROMPT, image).await?;
        parse_payload(&text)
    }

    /// Walk the chain until a model returns a success status; return its
    /// generated text. All failures fall through to the next candidate and
    /// the last error wins.
    async fn generate(
        &self,
        chain: &ModelChain,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<String> {
        if chain.is_empty() {
            return Err(Error::Provider("no candidate models configured".into()));
        }

        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: &image.data,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let mut last_err = Error::Provider("no candidate models configured".into());

        for model in chain.iter() {
            let url = format!(
                "{}/models/{model}:generateContent?key={}",
                self.base_url.trim_end_matches('/'),
                self.api_key.expose()
            );

            match self
                .http
                .post(&url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: GenerateResponse = resp
                            .json()
                            .await
                            .map_err(|e| Error::Parse(format!("reading provider envelope: {e}")))?;
                        let text = parsed
                            .candidates
                            .into_iter()
                            .next()
                            .and_then(|c| c.content.parts.into_iter().next())
                            .map(|p| p.text)
                            .ok_or_else(|| {
                                Error::Parse("provider envelope contained no generated text".into())
                            })?;
                        debug!(model, "model responded");
                        return Ok(text);
                    }

                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        model,
                        status = status.as_u16(),
                        "model returned error status, trying next candidate"
                    );
                    last_err = Error::Status {
                        status: status.as_u16(),
                        body,
                    };
                }
                Err(e) => {
                    warn!(model, error = %e, "request failed, trying next candidate");
                    last_err = Error::Network(e.to_string());
                }
            }
        }

        Err(last_err)
    }
}

/// Extract the first balanced JSON object from generated text and parse it.
fn parse_payload<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json(text)
        .ok_or_else(|| Error::Parse("no JSON object in generated text".into()))?;
    serde_json::from_str(json).map_err(|e| Error::Parse(format!("malformed analysis JSON: {e}")))
}
