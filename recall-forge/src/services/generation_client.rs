//! Generation adapter: card generation and text embeddings
//!
//! `GeminiClient` talks to the Gemini REST API. Responses are treated as
//! untrusted: anything that does not parse into candidate cards is
//! `MalformedOutput`, and embedding lengths are checked against the
//! dimension declared at construction.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::models::CandidateCard;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GENERATION_MODEL: &str = "gemini-1.5-flash";
const EMBEDDING_MODEL: &str = "text-embedding-004";
const USER_AGENT: &str = concat!("RecallForge/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;
const REQUESTS_PER_SECOND: u32 = 5;
const DEFAULT_TARGET_COUNT: usize = 10;

/// Files larger than this are rejected before upload (inline data limit)
const MAX_INLINE_FILE_BYTES: u64 = 20 * 1024 * 1024;

/// Generation adapter errors
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No credentials, service down, timeout
    #[error("Generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Response did not parse into candidate cards
    #[error("Malformed generation output: {0}")]
    MalformedOutput(String),

    /// File could not be read or is not a supported type
    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Produces candidate cards and embeddings
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Candidate cards from extracted text
    async fn generate_cards(
        &self,
        text: &str,
        target_count: Option<usize>,
    ) -> Result<Vec<CandidateCard>, GenerationError>;

    /// Candidate cards from a file read directly by the model
    async fn generate_cards_from_file(
        &self,
        path: &Path,
    ) -> Result<Vec<CandidateCard>, GenerationError>;

    /// Embedding vector of exactly `embedding_dimension()` values
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError>;

    fn embedding_dimension(&self) -> usize;
}

/// Gemini REST client
pub struct GeminiClient {
    http_client: reqwest::Client,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_key: Option<String>,
    embedding_dimension: usize,
    base_url: String,
}

impl GeminiClient {
    /// Create a client; without an API key every call fails as unavailable
    pub fn new(api_key: Option<String>, embedding_dimension: usize) -> Result<Self, GenerationError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GenerationError::GenerationUnavailable(e.to_string()))?;

        let quota = governor::Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN),
        );

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!("Gemini API key not configured; generation and embedding calls will fail");
        }

        Ok(Self {
            http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
            api_key,
            embedding_dimension,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root (proxies, local fakes)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "Gemini API key not configured".to_string())?;

        self.rate_limiter.until_ready().await;

        let url = format!("{}/models/{}", self.base_url, endpoint);
        let response = self
            .http_client
            .post(&url)
            .query(&[("key", api_key)])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request timed out after {}s", REQUEST_TIMEOUT_SECS)
                } else {
                    format!("network error: {}", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("API error {}: {}", status.as_u16(), error_text));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid response body: {}", e))
    }

    async fn generate(&self, parts: Vec<Value>) -> Result<Vec<CandidateCard>, GenerationError> {
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .post_json(&format!("{}:generateContent", GENERATION_MODEL), &body)
            .await
            .map_err(GenerationError::GenerationUnavailable)?;

        let text = response_text(&response)?;
        let candidates = parse_candidates(&text)?;

        tracing::debug!(candidates = candidates.len(), "Gemini returned candidate cards");
        Ok(candidates)
    }
}

#[async_trait]
impl GenerationAdapter for GeminiClient {
    async fn generate_cards(
        &self,
        text: &str,
        target_count: Option<usize>,
    ) -> Result<Vec<CandidateCard>, GenerationError> {
        let prompt = card_prompt(target_count.unwrap_or(DEFAULT_TARGET_COUNT));
        self.generate(vec![
            json!({ "text": prompt }),
            json!({ "text": text }),
        ])
        .await
    }

    async fn generate_cards_from_file(
        &self,
        path: &Path,
    ) -> Result<Vec<CandidateCard>, GenerationError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| GenerationError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        if metadata.len() > MAX_INLINE_FILE_BYTES {
            return Err(GenerationError::SourceUnreadable(format!(
                "{}: {} bytes exceeds inline limit",
                path.display(),
                metadata.len()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| GenerationError::SourceUnreadable(format!("{}: {}", path.display(), e)))?;
        let mime_type = detect_mime(path, &bytes).ok_or_else(|| {
            GenerationError::SourceUnreadable(format!("{}: unsupported file type", path.display()))
        })?;

        tracing::debug!(path = %path.display(), mime_type, bytes = bytes.len(), "Sending file to Gemini");

        let prompt = card_prompt(DEFAULT_TARGET_COUNT);
        self.generate(vec![
            json!({ "text": prompt }),
            json!({
                "inline_data": {
                    "mime_type": mime_type,
                    "data": general_purpose::STANDARD.encode(&bytes),
                }
            }),
        ])
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        let body = json!({
            "model": format!("models/{}", EMBEDDING_MODEL),
            "content": { "parts": [{ "text": text }] }
        });

        let response = self
            .post_json(&format!("{}:embedContent", EMBEDDING_MODEL), &body)
            .await
            .map_err(GenerationError::EmbeddingUnavailable)?;

        let parsed: EmbedResponse = serde_json::from_value(response)
            .map_err(|e| GenerationError::EmbeddingUnavailable(format!("unexpected response: {}", e)))?;

        check_dimension(self.embedding_dimension, parsed.embedding.values)
    }

    fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

fn card_prompt(target_count: usize) -> String {
    format!(
        "Create up to {} flashcards from the study material. Respond with a JSON array. \
         Each element has \"front\" (question), \"back\" (answer), and optionally \"hint\", \
         \"difficulty\" (basic, intermediate or advanced), \"tags\" (array of strings) and \
         \"visual_payload\" (SVG markup or a diagram object) when a diagram helps.",
        target_count
    )
}

/// Concatenated text parts of the first candidate
fn response_text(response: &Value) -> Result<String, GenerationError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::MalformedOutput("response has no content parts".into()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(GenerationError::MalformedOutput("response text is empty".into()));
    }
    Ok(text)
}

/// Parse model output into candidate cards
///
/// Accepts a bare JSON array or an object with a `cards` array, optionally
/// wrapped in a Markdown code fence.
pub fn parse_candidates(raw: &str) -> Result<Vec<CandidateCard>, GenerationError> {
    let body = strip_code_fence(raw);

    let value: Value = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedOutput(format!("invalid JSON: {}", e)))?;

    let cards = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("cards") {
            Some(cards @ Value::Array(_)) => cards,
            _ => {
                return Err(GenerationError::MalformedOutput(
                    "expected an array of cards".into(),
                ))
            }
        },
        _ => {
            return Err(GenerationError::MalformedOutput(
                "expected an array of cards".into(),
            ))
        }
    };

    let Value::Array(elements) = cards else {
        return Err(GenerationError::MalformedOutput(
            "expected an array of cards".into(),
        ));
    };

    // A mistyped element becomes an empty candidate so validation drops it
    // without discarding its siblings
    Ok(elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            serde_json::from_value(element).unwrap_or_else(|e| {
                tracing::warn!(index, error = %e, "Candidate card has the wrong shape");
                CandidateCard::default()
            })
        })
        .collect())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag line ("```json")
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn check_dimension(expected: usize, values: Vec<f32>) -> Result<Vec<f32>, GenerationError> {
    if values.len() != expected {
        return Err(GenerationError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}

/// MIME type by content sniffing, falling back to the file extension
fn detect_mime(path: &Path, bytes: &[u8]) -> Option<&'static str> {
    if let Some(kind) = infer::get(bytes) {
        return match kind.mime_type() {
            mime @ ("application/pdf" | "image/png" | "image/jpeg" | "image/webp" | "image/gif") => {
                Some(mime)
            }
            _ => None,
        };
    }

    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "txt" | "md" => Some("text/plain"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_parse_bare_array() {
        let cards = parse_candidates(r#"[{"front": "Q1", "back": "A1"}, {"front": "Q2"}]"#).unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].front.as_deref(), Some("Q1"));
        assert!(cards[1].back.is_none());
    }

    #[test]
    fn test_parse_fenced_object() {
        let raw = "```json\n{\"cards\": [{\"front\": \"Q\", \"back\": \"A\", \"tags\": [\"t\"]}]}\n```";
        let cards = parse_candidates(raw).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].tags.as_ref().unwrap(), &vec!["t".to_string()]);
    }

    #[test]
    fn test_non_json_is_malformed() {
        assert!(matches!(
            parse_candidates("Sure! Here are your cards:"),
            Err(GenerationError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_candidates(r#"{"answer": 42}"#),
            Err(GenerationError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_mistyped_candidate_does_not_poison_batch() {
        let raw = r#"[
            {"front": "Q1", "back": "A1"},
            {"front": "Q2", "back": "A2", "tags": "biology"},
            {"front": "Q3", "back": 42},
            "just a string",
            {"front": "Q5", "back": "A5"}
        ]"#;
        let cards = parse_candidates(raw).unwrap();
        assert_eq!(cards.len(), 5);

        let accepted: Vec<String> = cards
            .into_iter()
            .filter_map(|c| c.validate())
            .map(|c| c.front)
            .collect();
        assert_eq!(accepted, vec!["Q1".to_string(), "Q5".to_string()]);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "[{\"front\":" }, { "text": "\"Q\",\"back\":\"A\"}]" }] } }]
        });
        let text = response_text(&response).unwrap();
        assert_eq!(parse_candidates(&text).unwrap().len(), 1);

        assert!(response_text(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_dimension_checked() {
        assert!(check_dimension(3, vec![0.1, 0.2, 0.3]).is_ok());
        assert!(matches!(
            check_dimension(768, vec![0.0; 384]),
            Err(GenerationError::DimensionMismatch { expected: 768, actual: 384 })
        ));
    }

    #[test]
    fn test_detect_mime() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime(Path::new("scan.bin"), &png_header), Some("image/png"));
        assert_eq!(detect_mime(Path::new("notes.txt"), b"plain words"), Some("text/plain"));
        assert_eq!(detect_mime(Path::new("archive.xyz"), b"????"), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let client = GeminiClient::new(None, 768).unwrap();
        assert!(matches!(
            client.generate_cards("text", None).await,
            Err(GenerationError::GenerationUnavailable(_))
        ));
        assert!(matches!(
            client.embed("text").await,
            Err(GenerationError::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let client = GeminiClient::new(Some("key".into()), 768).unwrap();
        let result = client
            .generate_cards_from_file(Path::new("/nonexistent/recall/notes.pdf"))
            .await;
        assert!(matches!(result, Err(GenerationError::SourceUnreadable(_))));

        let mut file = Builder::new().suffix(".xyz").tempfile().unwrap();
        file.write_all(b"\x00\x01\x02 opaque").unwrap();
        let result = client.generate_cards_from_file(file.path()).await;
        assert!(matches!(result, Err(GenerationError::SourceUnreadable(_))));
    }
}
