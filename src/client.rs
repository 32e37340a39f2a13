//! Gemini REST client covering every generation capability.
//!
//! Each public call runs one HTTP exchange through [`with_retry`]; failures
//! are normalized into [`StudioError`] right here, so nothing above this
//! layer inspects raw response bodies.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::audio::{AudioBuffer, DEFAULT_SPEECH_SAMPLE_RATE, decode_pcm16, is_raw_linear_pcm, parse_sample_rate};
use crate::config::StudioConfig;
use crate::error::{ApiFailure, ErrorKind, StudioError, StudioResult};
use crate::retry::with_retry;
use crate::sanitize::parse_structured;
use crate::video::{ProgressReporter, VideoBackend, VideoOperation, VideoPoller, VideoRequest, VideoResult, VideoSubmission};

/// Prebuilt TTS voices and their character.
pub const AVAILABLE_VOICES: &[(&str, &str)] = &[
    ("Zephyr", "Bright"),
    ("Puck", "Upbeat"),
    ("Charon", "Informative"),
    ("Kore", "Firm"),
    ("Fenrir", "Excitable"),
    ("Leda", "Youthful"),
    ("Orus", "Firm"),
    ("Aoede", "Breezy"),
    ("Callirrhoe", "Easy-going"),
    ("Autonoe", "Bright"),
    ("Enceladus", "Breathy"),
    ("Iapetus", "Clear"),
    ("Umbriel", "Easy-going"),
    ("Algieba", "Smooth"),
    ("Despina", "Smooth"),
    ("Erinome", "Clear"),
    ("Algenib", "Gravelly"),
    ("Rasalgethi", "Informative"),
    ("Laomedeia", "Upbeat"),
    ("Achernar", "Soft"),
    ("Alnilam", "Firm"),
    ("Schedar", "Even"),
    ("Gacrux", "Mature"),
    ("Pulcherrima", "Forward"),
    ("Achird", "Friendly"),
    ("Zubenelgenubi", "Casual"),
    ("Vindemiatrix", "Gentle"),
    ("Sadachbia", "Lively"),
    ("Sadaltager", "Knowledgeable"),
    ("Sulafat", "Warm"),
];

pub fn is_known_voice(name: &str) -> bool {
    AVAILABLE_VOICES.iter().any(|(v, _)| v.eq_ignore_ascii_case(name))
}

/// Everything the studio can ask the backend for.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Text { prompt: String },
    Structured { prompt: String, schema: Value },
    Image { prompt: String, aspect_ratio: String, count: u32 },
    Speech { text: String, voice: String },
    Video(VideoRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    Text(String),
    Json(Value),
    Images(Vec<GeneratedImage>),
    Speech(AudioBuffer),
    Video(VideoResult),
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: StudioConfig,
}

impl GeminiClient {
    pub fn new(config: StudioConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("studio-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url, model, method, self.config.api_key
        )
    }

    /// Runs any request through the matching capability.
    pub async fn generate(&self, request: &GenerationRequest, progress: &ProgressReporter) -> StudioResult<GenerationOutput> {
        match request {
            GenerationRequest::Text { prompt } => self.generate_text(prompt).await.map(GenerationOutput::Text),
            GenerationRequest::Structured { prompt, schema } => {
                self.generate_structured::<Value>(prompt, schema).await.map(GenerationOutput::Json)
            }
            GenerationRequest::Image {
                prompt,
                aspect_ratio,
                count,
            } => self
                .generate_images(prompt, aspect_ratio, *count)
                .await
                .map(GenerationOutput::Images),
            GenerationRequest::Speech { text, voice } => {
                self.generate_speech(text, voice).await.map(GenerationOutput::Speech)
            }
            GenerationRequest::Video(req) => self.generate_video(req, progress).await.map(GenerationOutput::Video),
        }
    }

    pub async fn generate_text(&self, prompt: &str) -> StudioResult<String> {
        let url = self.model_url(&self.config.models.text, "generateContent");
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": prompt } ] } ]
        });
        let parsed = with_retry(self.config.retry, "text", || self.post_json(&url, &body)).await?;
        check_blocked(&parsed)?;
        extract_first_text(&parsed)
            .map(str::to_string)
            .ok_or_else(|| StudioError::malformed("no text in generateContent response"))
    }

    /// Asks for JSON matching `schema`, then sanitizes and parses the reply.
    pub async fn generate_structured<T: DeserializeOwned>(&self, prompt: &str, schema: &Value) -> StudioResult<T> {
        let url = self.model_url(&self.config.models.text, "generateContent");
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": prompt } ] } ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema
            }
        });
        let parsed = with_retry(self.config.retry, "structured", || self.post_json(&url, &body)).await?;
        check_blocked(&parsed)?;
        let text = extract_first_text(&parsed)
            .ok_or_else(|| StudioError::malformed("no text in structured response"))?;
        parse_structured(text)
    }

    pub async fn generate_images(&self, prompt: &str, aspect_ratio: &str, count: u32) -> StudioResult<Vec<GeneratedImage>> {
        let url = self.model_url(&self.config.models.image, "predict");
        let body = json!({
            "instances": [ { "prompt": prompt } ],
            "parameters": { "sampleCount": count.max(1), "aspectRatio": aspect_ratio }
        });
        let parsed = with_retry(self.config.retry, "image", || self.post_json(&url, &body)).await?;

        let mut images = Vec::new();
        for p in parsed.get("predictions").and_then(Value::as_array).into_iter().flatten() {
            let Some(data) = p.get("bytesBase64Encoded").and_then(Value::as_str) else {
                continue;
            };
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| StudioError::malformed(format!("image payload was not base64: {e}")))?;
            let mime_type = p
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            images.push(GeneratedImage { bytes, mime_type });
        }
        if images.is_empty() {
            // Imagen drops filtered images silently
            return Err(StudioError::new(
                ErrorKind::ContentPolicyRejected,
                "no images returned; the prompt was probably blocked by safety filters",
            ));
        }
        Ok(images)
    }

    /// Synthesizes speech and decodes the raw PCM reply.
    pub async fn generate_speech(&self, text: &str, voice: &str) -> StudioResult<AudioBuffer> {
        let url = self.model_url(&self.config.models.speech, "generateContent");
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": text } ] } ],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });
        let parsed = with_retry(self.config.retry, "speech", || self.post_json(&url, &body)).await?;
        check_blocked(&parsed)?;

        let (data_b64, mime) = extract_inline_data(&parsed)
            .ok_or_else(|| StudioError::malformed("speech response carried no audio"))?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| StudioError::malformed(format!("audio payload was not base64: {e}")))?;
        if !is_raw_linear_pcm(mime) {
            return Err(StudioError::malformed(format!("unexpected audio format {mime}")));
        }
        let rate = parse_sample_rate(mime).unwrap_or(DEFAULT_SPEECH_SAMPLE_RATE);
        tracing::debug!(bytes = raw.len(), rate, mime, "decoding speech PCM");
        decode_pcm16(&raw, rate, 1).map_err(|e| StudioError::malformed(e.to_string()))
    }

    pub async fn generate_video(&self, request: &VideoRequest, progress: &ProgressReporter) -> StudioResult<VideoResult> {
        let submission = request.plan(&self.config.models);
        VideoPoller::new(self.config.retry, self.config.poll)
            .run(self, &submission, progress)
            .await
    }

    /// Fetches a generated media file.
    pub async fn download(&self, uri: &str) -> StudioResult<Vec<u8>> {
        with_retry(self.config.retry, "download", || self.fetch_bytes(uri)).await
    }

    async fn fetch_bytes(&self, uri: &str) -> StudioResult<Vec<u8>> {
        let resp = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(network_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiFailure::from_response(status.as_u16(), &text).into_error());
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(network_error)
    }

    async fn post_json(&self, url: &str, body: &Value) -> StudioResult<Value> {
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await;
        self.read_json(resp).await
    }

    async fn get_json(&self, url: &str) -> StudioResult<Value> {
        let resp = self.http.get(url).send().await;
        self.read_json(resp).await
    }

    async fn read_json(&self, resp: reqwest::Result<reqwest::Response>) -> StudioResult<Value> {
        let resp = resp.map_err(network_error)?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Value>()
                .await
                .map_err(|e| StudioError::malformed(format!("response body was not JSON: {}", e.without_url())));
        }
        let text = resp.text().await.unwrap_or_default();
        let err = ApiFailure::from_response(status.as_u16(), &text).into_error();
        tracing::debug!(status = status.as_u16(), kind = %err.kind, "request failed");
        Err(err)
    }
}

#[async_trait]
impl VideoBackend for GeminiClient {
    async fn submit(&self, submission: &VideoSubmission) -> StudioResult<VideoOperation> {
        let url = self.model_url(&submission.model, "predictLongRunning");
        let v = self.post_json(&url, &submission.body).await?;
        Ok(VideoOperation::from_json(&v))
    }

    async fn poll(&self, operation: &VideoOperation) -> StudioResult<VideoOperation> {
        let name = operation
            .name
            .as_deref()
            .ok_or_else(|| StudioError::new(ErrorKind::EntityNotFound, "operation has no name"))?;
        let url = format!("{}/{}?key={}", self.config.base_url, name, self.config.api_key);
        let v = self.get_json(&url).await?;
        Ok(VideoOperation::from_json(&v))
    }

    fn resolve_media_uri(&self, uri: &str) -> String {
        append_key(uri, &self.config.api_key)
    }
}

/// Drops the request URL, which carries the API key.
fn network_error(e: reqwest::Error) -> StudioError {
    ApiFailure::network(e.without_url().to_string()).into_error()
}

fn append_key(uri: &str, key: &str) -> String {
    if uri.contains("key=") {
        uri.to_string()
    } else if uri.contains('?') {
        format!("{uri}&key={key}")
    } else {
        format!("{uri}?key={key}")
    }
}

/// Turns prompt-level or candidate-level safety blocks into errors.
fn check_blocked(v: &Value) -> StudioResult<()> {
    if let Some(reason) = v
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(StudioError::new(
            ErrorKind::ContentPolicyRejected,
            format!("prompt blocked: {reason}"),
        ));
    }
    let finish = v
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str);
    match finish {
        Some(r @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII")) => Err(StudioError::new(
            ErrorKind::ContentPolicyRejected,
            format!("response blocked: {r}"),
        )),
        _ => Ok(()),
    }
}

fn parts(v: &Value) -> impl Iterator<Item = &Value> {
    v.get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("content")?.get("parts")?.as_array())
        .flatten()
}

fn extract_first_text(v: &Value) -> Option<&str> {
    parts(v)
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .find(|t| !t.is_empty())
}

fn extract_inline_data(v: &Value) -> Option<(&str, &str)> {
    parts(v).find_map(|p| {
        let (inline, mime_key) = match (p.get("inlineData"), p.get("inline_data")) {
            (Some(i), _) => (i, "mimeType"),
            (None, Some(i)) => (i, "mime_type"),
            _ => return None,
        };
        let data = inline.get("data")?.as_str()?;
        let mime = inline
            .get(mime_key)
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream");
        Some((data, mime))
    })
}
