//! Transport seam between the orchestrator and the upstream pipeline
//!
//! The same two-tier pipeline is deployed in two places: directly against
//! the provider (client-managed key) and behind the authenticated relay
//! (server-managed key, server-side rate limiting). `AnalysisBackend`
//! decouples the orchestrator from which deployment is in use; the retry
//! and quota policy is identical either way.

use std::time::Duration;

use common::Secret;
use serde::Serialize;
use tracing::debug;
use vision::{AnalysisResult, Confidence, ImagePayload, VisionClient};

/// What one backend invocation produced.
///
/// A negative tier-1 verdict is a valid classification, not an error — it
/// must not count as an upstream failure.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Meal(AnalysisResult),
    NotFood { confidence: Confidence },
}

/// One full analysis round-trip against some deployment of the pipeline.
pub trait AnalysisBackend: Send + Sync {
    fn analyze(
        &self,
        image: &ImagePayload,
    ) -> impl Future<Output = vision::Result<AnalysisOutcome>> + Send;
}

/// Direct provider transport: the client runs both tiers itself.
pub struct DirectBackend {
    client: VisionClient,
}

impl DirectBackend {
    pub fn new(client: VisionClient) -> Self {
        Self { client }
    }
}

impl AnalysisBackend for DirectBackend {
    async fn analyze(&self, image: &ImagePayload) -> vision::Result<AnalysisOutcome> {
        let verdict = self.client.classify_food(image).await?;
        if !verdict.is_food {
            debug!(confidence = ?verdict.confidence, "tier-1 rejected image as not food");
            return Ok(AnalysisOutcome::NotFood {
                confidence: verdict.confidence,
            });
        }

        let result = self.client.analyze_meal(image).await?;
        Ok(AnalysisOutcome::Meal(result))
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    #[serde(rename = "imageBase64")]
    image_base64: &'a str,
    #[serde(rename = "deviceId")]
    device_id: &'a str,
}

/// Relay transport: POSTs the image to the authenticated relay, which runs
/// the tiers server-side.
///
/// Relay 429s (device rate limit or duplicate image) surface as status
/// errors and classify as quota exhaustion, matching the local quota's user
/// messaging.
pub struct RelayBackend {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Secret<String>,
    device_id: String,
    timeout: Duration,
}

impl RelayBackend {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        auth_token: Secret<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            auth_token,
            device_id: device_id.into(),
            timeout: vision::client::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AnalysisBackend for RelayBackend {
    async fn analyze(&self, image: &ImagePayload) -> vision::Result<AnalysisOutcome> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.auth_token.expose())
            .timeout(self.timeout)
            .json(&RelayRequest {
                image_base64: &image.data,
                device_id: &self.device_id,
            })
            .send()
            .await
            .map_err(|e| vision::Error::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let result: AnalysisResult = resp
                .json()
                .await
                .map_err(|e| vision::Error::Parse(format!("reading relay response: {e}")))?;
            return Ok(AnalysisOutcome::Meal(result));
        }

        let body = resp.text().await.unwrap_or_default();
        if status.as_u16() == 400
            && let Some(confidence) = parse_not_food(&body)
        {
            debug!("relay rejected image as not food");
            return Ok(AnalysisOutcome::NotFood { confidence });
        }

        Err(vision::Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Detect the relay's tier-1 rejection body; other 400s stay errors.
fn parse_not_food(body: &str) -> Option<Confidence> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if value["error"]["type"] != "not_food" {
        return None;
    }
    serde_json::from_value(value["error"]["confidence"].clone())
        .ok()
        .or(Some(Confidence::Low))
}
