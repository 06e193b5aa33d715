//! Cloud identification client.
//!
//! Wraps the Gemini `generateContent` endpoint for two jobs: whole-frame
//! item identification and single-item enrichment. Identification is
//! throttled client-side and keeps at most one request in flight; a call
//! that lands inside the interval or while a request is out is a no-op,
//! not an error. There is no internal retry. The next throttled cycle is
//! the retry.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ilens_models::{EnrichmentReply, Frame, RawDetection};

use crate::error::{VisionError, VisionResult};
use crate::parse;

/// Configuration for the cloud identification client.
#[derive(Debug, Clone)]
pub struct GeminiVisionConfig {
    /// Model name, e.g. "gemini-2.0-flash"
    pub model: String,
    /// API base URL. Overridable for tests.
    pub base_url: String,
    /// Minimum gap between identification dispatches.
    pub min_call_interval: Duration,
    /// Per-request timeout for identification calls.
    pub detection_timeout: Duration,
    /// Per-request timeout for enrichment calls.
    pub enrichment_timeout: Duration,
    /// JPEG quality for uploaded frames (1-100)
    pub jpeg_quality: u8,
    /// Maximum occurrences of the same item name in one response.
    pub max_name_repeats: usize,
}

impl Default for GeminiVisionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            min_call_interval: Duration::from_secs(3),
            detection_timeout: Duration::from_secs(10),
            enrichment_timeout: Duration::from_secs(15),
            jpeg_quality: 80,
            max_name_repeats: 3,
        }
    }
}

impl GeminiVisionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            min_call_interval: std::env::var("ILENS_CLOUD_MIN_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_call_interval),
            detection_timeout: std::env::var("ILENS_DETECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.detection_timeout),
            enrichment_timeout: std::env::var("ILENS_ENRICH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.enrichment_timeout),
            jpeg_quality: defaults.jpeg_quality,
            max_name_repeats: defaults.max_name_repeats,
        }
    }
}

/// Identification request wire format.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }

    fn jpeg(data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/jpeg".to_string(),
                data,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

/// Identification response wire format.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Throttle and single-flight state, shared by all clones of the call
/// path through `&self`.
#[derive(Debug, Default)]
struct CallGate {
    in_flight: bool,
    last_dispatch: Option<Instant>,
}

/// Clears the in-flight flag when the identification future completes
/// or is dropped. A caller that abandons the future mid-flight must not
/// wedge the gate shut.
struct InFlightGuard<'a> {
    gate: &'a Mutex<CallGate>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut gate) = self.gate.lock() {
            gate.in_flight = false;
        }
    }
}

/// Cloud identification client.
pub struct GeminiVision {
    api_key: String,
    client: Client,
    config: GeminiVisionConfig,
    gate: Mutex<CallGate>,
    last_error: Mutex<Option<String>>,
}

impl GeminiVision {
    /// Create a client reading `GEMINI_API_KEY` from the environment.
    pub fn new(config: GeminiVisionConfig) -> VisionResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| VisionError::MissingApiKey)?;
        Ok(Self::with_api_key(api_key, config))
    }

    /// Create a client with an explicit key. Used by tests and callers
    /// that manage credentials themselves.
    pub fn with_api_key(api_key: impl Into<String>, config: GeminiVisionConfig) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            config,
            gate: Mutex::new(CallGate::default()),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GeminiVisionConfig {
        &self.config
    }

    /// The most recent failure message, if the last dispatch failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Identify items in a frame.
    ///
    /// Returns `Ok(None)` without touching the network when the minimum
    /// interval has not elapsed since the previous dispatch or another
    /// identification call is still in flight. Returns `Ok(Some(items))`
    /// for a completed round trip (possibly empty) and `Err` for
    /// transport or API failures, which also sets `last_error`.
    pub async fn analyze(&self, frame: &Frame) -> VisionResult<Option<Vec<RawDetection>>> {
        {
            let mut gate = self
                .gate
                .lock()
                .map_err(|_| VisionError::internal("call gate poisoned"))?;
            if gate.in_flight {
                debug!("identification skipped, request already in flight");
                return Ok(None);
            }
            if let Some(last) = gate.last_dispatch {
                if last.elapsed() < self.config.min_call_interval {
                    debug!("identification skipped, inside min call interval");
                    return Ok(None);
                }
            }
            gate.in_flight = true;
            gate.last_dispatch = Some(Instant::now());
        }
        let _in_flight = InFlightGuard { gate: &self.gate };

        let result = self.run_identification(frame).await;

        match result {
            Ok(items) => {
                if let Ok(mut last) = self.last_error.lock() {
                    *last = None;
                }
                Ok(Some(items))
            }
            Err(e) => {
                if let Ok(mut last) = self.last_error.lock() {
                    *last = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn run_identification(&self, frame: &Frame) -> VisionResult<Vec<RawDetection>> {
        let jpeg = ilens_media::frame_to_jpeg(frame, self.config.jpeg_quality)
            .map_err(|e| VisionError::invalid_frame(e.to_string()))?;

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part::text(identification_prompt()),
                    Part::jpeg(BASE64.encode(&jpeg)),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let text = self
            .call_generate(&request, self.config.detection_timeout)
            .await?;
        let items = parse::parse_detection_response(&text, self.config.max_name_repeats);
        info!(count = items.len(), "identification response parsed");
        Ok(items)
    }

    /// Request attributes for one item using its full source frame.
    ///
    /// `Ok(None)` means the model answered but the reply was unusable;
    /// callers drop the job either way.
    pub async fn enrich_item(
        &self,
        frame: &Frame,
        name: &str,
    ) -> VisionResult<Option<EnrichmentReply>> {
        let jpeg = ilens_media::frame_to_jpeg(frame, self.config.jpeg_quality)
            .map_err(|e| VisionError::invalid_frame(e.to_string()))?;
        self.enrich_jpeg(&jpeg, enrichment_item_prompt(name)).await
    }

    /// Request attributes for a cropped item image. The interim label
    /// is a hint only; the reply may correct the name.
    pub async fn enrich_crop(
        &self,
        jpeg: &[u8],
        label: &str,
    ) -> VisionResult<Option<EnrichmentReply>> {
        self.enrich_jpeg(jpeg, enrichment_crop_prompt(label)).await
    }

    async fn enrich_jpeg(
        &self,
        jpeg: &[u8],
        prompt: String,
    ) -> VisionResult<Option<EnrichmentReply>> {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part::text(prompt), Part::jpeg(BASE64.encode(jpeg))],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };
        let text = self
            .call_generate(&request, self.config.enrichment_timeout)
            .await?;
        Ok(parse::parse_enrichment(&text))
    }

    async fn call_generate(
        &self,
        request: &GeminiRequest,
        timeout: Duration,
    ) -> VisionResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.api_key
        );

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout(timeout.as_secs())
                } else {
                    VisionError::Network(e)
                }
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(rate_limited = true, "vision API rate limited");
            return Err(VisionError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::request_failed(status, body));
        }

        let parsed: GeminiResponse = response.json().await.map_err(VisionError::Network)?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .filter(|t| !t.is_empty())
            .ok_or(VisionError::EmptyResponse)?;

        Ok(text)
    }
}

fn identification_prompt() -> String {
    r#"You are an inventory assistant. Identify every distinct physical item in this photo.

IMPORTANT: You must strictly follow this output format.
Return ONLY a JSON array where each element has this schema:
{
  "name": "specific item name, include brand or model if visible",
  "box_2d": [y_min, x_min, y_max, x_max]
}

Rules:
- box_2d coordinates are integers scaled to 0-1000 in the upright image.
- One element per physical item. Do not merge multiple items.
- Ignore walls, floors, ceilings, people, and reflections.
- If you cannot localize an item, omit box_2d but keep the name.
- Return ONLY the JSON array and nothing else."#
        .to_string()
}

fn enrichment_item_prompt(name: &str) -> String {
    format!(
        r#"This photo contains an item identified as "{name}".

Return ONLY a single JSON object with this schema:
{{
  "name": "corrected or confirmed item name",
  "brand": "brand if identifiable",
  "color": "dominant color",
  "size": "approximate size if judgeable",
  "category": "one-word category"
}}

Use null for any field you cannot determine. Return ONLY the JSON object."#
    )
}

fn enrichment_crop_prompt(label: &str) -> String {
    format!(
        r#"This is a cropped photo of a single item, provisionally labeled "{label}".

Return ONLY a single JSON object with this schema:
{{
  "name": "specific item name, correcting the provisional label if needed",
  "brand": "brand if identifiable",
  "color": "dominant color",
  "size": "approximate size if judgeable",
  "category": "one-word category"
}}

Use null for any field you cannot determine. Return ONLY the JSON object."#
    )
}
