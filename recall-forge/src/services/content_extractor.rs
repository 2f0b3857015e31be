//! Content extraction for URL sources
//!
//! Fetches a web page or plain-text document and normalizes it into plain
//! text for the generation stage. YouTube URLs are routed to the transcript
//! extractor. File sources never come through here; the generator reads
//! them directly.

use async_trait::async_trait;
use std::sync::Arc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

use super::youtube::is_youtube_url;

const USER_AGENT: &str = concat!("RecallForge/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Pages beyond this size are truncated before conversion
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Content extractor errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0} fetching {1}")]
    HttpStatus(u16, String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("No readable text at {0}")]
    EmptyContent(String),

    #[error("YouTube: {0}")]
    Youtube(String),
}

/// Turns a URL into plain text
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<String, ExtractionError>;
}

/// HTTP extractor for HTML pages and plain-text documents
pub struct WebExtractor {
    http_client: reqwest::Client,
}

impl WebExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl ContentExtractor for WebExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractionError> {
        tracing::debug!(url = %url, "Fetching source URL");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::HttpStatus(status.as_u16(), url.to_string()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();

        let kind = ContentKind::from_content_type(&content_type)
            .ok_or_else(|| ExtractionError::UnsupportedContent(content_type.clone()))?;

        let body = response
            .text()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;
        let body = truncate_at_char_boundary(&body, MAX_BODY_BYTES);

        let text = match kind {
            ContentKind::Html => html_to_text(body),
            ContentKind::Plain => collapse_whitespace(body),
        };

        if text.is_empty() {
            return Err(ExtractionError::EmptyContent(url.to_string()));
        }

        tracing::info!(url = %url, chars = text.len(), "Extracted source text");
        Ok(text)
    }
}

/// Sends YouTube URLs to the transcript extractor and everything else to
/// the web extractor
pub struct RoutingExtractor {
    youtube: Arc<dyn ContentExtractor>,
    web: Arc<dyn ContentExtractor>,
}

impl RoutingExtractor {
    pub fn new(youtube: Arc<dyn ContentExtractor>, web: Arc<dyn ContentExtractor>) -> Self {
        Self { youtube, web }
    }
}

#[async_trait]
impl ContentExtractor for RoutingExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractionError> {
        if is_youtube_url(url) {
            tracing::debug!(url = %url, "Routing source to YouTube extractor");
            self.youtube.extract(url).await
        } else {
            self.web.extract(url).await
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Plain,
}

impl ContentKind {
    fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or("").trim();
        match mime {
            "text/html" | "application/xhtml+xml" => Some(ContentKind::Html),
            "text/plain" | "text/markdown" | "text/x-markdown" | "text/csv" => {
                Some(ContentKind::Plain)
            }
            _ => None,
        }
    }
}

static DROPPED_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "noscript", "template", "svg", "head"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("static regex")
        })
        .collect()
});
static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static BLOCK_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|td|th|table|section|article|blockquote|pre)\b[^>]*>")
        .expect("static regex")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#([xX][0-9a-fA-F]+|[0-9]+);").expect("static regex"));

/// Strip markup from an HTML document
///
/// Script-like blocks and comments are removed entirely, block-level tags
/// become line breaks, entities are decoded and whitespace is collapsed.
pub fn html_to_text(html: &str) -> String {
    let mut without_blocks = html.to_string();
    for block in DROPPED_BLOCKS.iter() {
        without_blocks = block.replace_all(&without_blocks, " ").into_owned();
    }
    let without_comments = COMMENTS.replace_all(&without_blocks, " ");
    let with_breaks = BLOCK_BREAKS.replace_all(&without_comments, "\n");
    let without_tags = TAGS.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&without_tags);
    collapse_whitespace(&decoded)
}

pub(crate) fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures<'_>| {
        let raw = &caps[1];
        let code = if let Some(hex) = raw.strip_prefix(['x', 'X']) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            raw.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&mdash;", "\u{2014}")
        .replace("&ndash;", "\u{2013}")
        .replace("&hellip;", "\u{2026}")
        // Last, so "&amp;lt;" decodes to "&lt;" and not "<"
        .replace("&amp;", "&")
}

/// Collapse runs of spaces within lines and drop blank lines
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
