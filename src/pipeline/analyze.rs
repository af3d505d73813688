//! Document analysis: send the encoded document to a multimodal model and
//! get a [`ConversionResult`] back.
//!
//! The pipeline only sees the [`Analyzer`] trait. Two implementations ship
//! with the crate:
//!
//! * [`GeminiAnalyzer`] talks to the Gemini `generateContent` REST API
//!   directly. PDFs and images go in as `inline_data`, and the response is
//!   constrained with `responseSchema`, so the answer is bare JSON.
//! * [`ProviderAnalyzer`] wraps any `edgequake-llm` provider (OpenAI,
//!   Anthropic, Ollama, ...). Those APIs have no common structured-output
//!   switch, so the schema is spelled out in the instruction text and the
//!   lenient parser in [`crate::pipeline::response`] does the rest.
//!
//! No retries: a failed call ends the attempt and the user decides whether
//! to try again.

use crate::config::{ConversionConfig, API_KEY_VARS};
use crate::error::Pdf2CsvError;
use crate::model::{ConversionResult, TokenUsage};
use crate::pipeline::encode::InlineDocument;
use crate::pipeline::input::PDF_MIME;
use crate::pipeline::response::parse_response;
use crate::prompts::{instructions_with_inline_schema, response_schema};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A successful analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub result: ConversionResult,
    pub usage: TokenUsage,
}

/// A multimodal service that turns a document into labelled grids.
///
/// Implementations must return [`Pdf2CsvError::EmptyResult`] rather than a
/// result without sections.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short name for logs, e.g. `"gemini"`.
    fn name(&self) -> &str;

    /// Analyze one document with the given instruction text.
    async fn analyze(
        &self,
        document: &InlineDocument,
        instructions: &str,
    ) -> Result<Analysis, Pdf2CsvError>;
}

/// Pick the analyzer for `config`, from most to least specific:
///
/// 1. a pre-built `config.analyzer`;
/// 2. a named `edgequake-llm` provider (`config.provider_name`), which reads
///    its own API key variable (`OPENAI_API_KEY`, ...);
/// 3. the Gemini REST API with the key from `config.api_key` or the
///    environment.
///
/// Fails fast without touching the network when no credential is available.
pub fn resolve_analyzer(config: &ConversionConfig) -> Result<Arc<dyn Analyzer>, Pdf2CsvError> {
    if let Some(ref analyzer) = config.analyzer {
        return Ok(Arc::clone(analyzer));
    }

    if let Some(ref name) = config.provider_name {
        let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            Pdf2CsvError::ProviderNotConfigured {
                provider: name.clone(),
                hint: format!("{e}"),
            }
        })?;
        info!("Using LLM provider '{}' with model {}", name, config.model);
        return Ok(Arc::new(ProviderAnalyzer::new(name.clone(), provider, config)));
    }

    let api_key = config
        .resolve_api_key()
        .ok_or(Pdf2CsvError::MissingApiKey {
            var: API_KEY_VARS[0],
        })?;
    info!("Using Gemini model {}", config.model);
    Ok(Arc::new(GeminiAnalyzer::new(api_key, config)?))
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Analyzer backed by the Gemini `generateContent` endpoint.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl std::fmt::Debug for GeminiAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAnalyzer")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>, config: &ConversionConfig) -> Result<Self, Pdf2CsvError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Pdf2CsvError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn analyze(
        &self,
        document: &InlineDocument,
        instructions: &str,
    ) -> Result<Analysis, Pdf2CsvError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &document.mime_type,
                            data: &document.data,
                        },
                    },
                    Part::Text { text: instructions },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };

        debug!("POST {} ({})", self.url(), document.mime_type);
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Pdf2CsvError::AnalysisFailed {
                reason: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Pdf2CsvError::AuthError {
                provider: self.name().to_string(),
                detail: format!("HTTP {status}: {}", excerpt(&body)),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(Pdf2CsvError::RateLimitExceeded {
                provider: self.name().to_string(),
                retry_after_secs,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Pdf2CsvError::AnalysisFailed {
                reason: format!("HTTP {status}: {}", excerpt(&body)),
            });
        }

        let body: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| Pdf2CsvError::MalformedResponse {
                    detail: format!("response body: {e}"),
                })?;

        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Pdf2CsvError::AnalysisFailed {
                reason: format!("prompt blocked: {reason}"),
            });
        }

        let usage = body
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Pdf2CsvError::MalformedResponse {
                detail: "no candidates".into(),
            })?;

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                warn!("Gemini finished with reason {}", reason);
            }
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(Pdf2CsvError::MalformedResponse {
                detail: "candidate has no text".into(),
            });
        }

        debug!(
            "Gemini: {} input tokens, {} output tokens",
            usage.input_tokens, usage.output_tokens
        );
        Ok(Analysis {
            result: parse_response(&text)?,
            usage,
        })
    }
}

/// First part of an error body, for diagnostics.
fn excerpt(body: &str) -> String {
    const MAX: usize = 300;
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}…", &body[..i]),
        None => body.to_string(),
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Analyzer backed by an `edgequake-llm` chat provider.
pub struct ProviderAnalyzer {
    name: String,
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderAnalyzer {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LLMProvider>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_output_tokens as usize),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Analyzer for ProviderAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        document: &InlineDocument,
        instructions: &str,
    ) -> Result<Analysis, Pdf2CsvError> {
        let mut attachment = ImageData::new(document.data.clone(), document.mime_type.clone());
        if document.mime_type != PDF_MIME {
            attachment = attachment.with_detail("high");
        }

        let messages = vec![
            ChatMessage::system(instructions_with_inline_schema(instructions)),
            ChatMessage::user_with_images("", vec![attachment]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| Pdf2CsvError::AnalysisFailed {
                reason: format!("{}: {e}", self.name),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(Analysis {
            result: parse_response(&response.content)?,
            usage: TokenUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf",
                            data: "JVBERi0=",
                        },
                    },
                    Part::Text { text: "Convert." },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 1024,
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };
        let v = serde_json::to_value(&request).unwrap();
        let parts = &v["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[0]["inline_data"]["data"], "JVBERi0=");
        assert_eq!(parts[1]["text"], "Convert.");
        let gen = &v["generationConfig"];
        assert_eq!(gen["maxOutputTokens"], 1024);
        assert_eq!(gen["responseMimeType"], "application/json");
        assert_eq!(gen["responseSchema"]["required"][0], "sections");
    }

    #[test]
    fn response_body_parses() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "{\"sections\":"}, {"text": "[]}"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 3}
        }"#;
        let r: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(r.candidates.len(), 1);
        assert_eq!(r.usage_metadata.unwrap().candidates_token_count, 3);
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let e = excerpt(&long);
        assert!(e.chars().count() <= 301);
        assert!(e.ends_with('…'));
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn missing_key_fails_fast() {
        // a blank explicit key is not replaced by the environment
        let config = ConversionConfig::builder().api_key("  ").build().unwrap();
        let err = resolve_analyzer(&config).err().unwrap();
        assert!(matches!(err, Pdf2CsvError::MissingApiKey { .. }));
    }

    #[test]
    fn explicit_key_builds_gemini_analyzer() {
        let config = ConversionConfig::builder()
            .api_key("test-key")
            .endpoint("http://localhost:1/v1beta/")
            .build()
            .unwrap();
        let analyzer = resolve_analyzer(&config).unwrap();
        assert_eq!(analyzer.name(), "gemini");
    }
}
