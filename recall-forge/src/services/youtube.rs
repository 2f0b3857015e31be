//! YouTube sources
//!
//! A video URL is turned into its title, description and caption transcript.
//! Captions come from the track list embedded in the watch page; an English
//! auto-generated track is preferred, then a manual English one, then the
//! first track listed. When no transcript can be fetched the video metadata
//! is still returned with a note saying why.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::content_extractor::{decode_entities, ContentExtractor, ExtractionError};

const YOUTUBE_BASE_URL: &str = "https://www.youtube.com";
const USER_AGENT: &str = concat!("RecallForge/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT_SECS: u64 = 30;
const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse = ";

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?:v=|/)([0-9A-Za-z_-]{11})", r"youtu\.be/([0-9A-Za-z_-]{11})"]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
});
static TIMEDTEXT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<text\b[^>]*>(.*?)</text>").expect("static regex"));
static INNER_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Whether `url` points at a YouTube host
pub fn is_youtube_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| YOUTUBE_HOSTS.contains(&host.as_str()))
}

/// The 11-character video id of a YouTube URL
pub fn video_id(url: &str) -> Option<String> {
    if !is_youtube_url(url) {
        return None;
    }
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .map(|caps| caps[1].to_string())
}

/// One caption track listed on the watch page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// "asr" for auto-generated tracks
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }

    fn is_english(&self) -> bool {
        self.language_code == "en" || self.language_code.starts_with("en-")
    }
}

/// What the watch page tells us about a video
#[derive(Debug, Clone, Default)]
pub struct VideoPage {
    pub title: String,
    pub description: String,
    pub tracks: Vec<CaptionTrack>,
}

/// Pull the embedded player response out of a watch page
pub fn parse_watch_page(html: &str) -> Result<VideoPage, ExtractionError> {
    let start = html
        .find(PLAYER_RESPONSE_MARKER)
        .map(|i| i + PLAYER_RESPONSE_MARKER.len())
        .ok_or_else(|| ExtractionError::Youtube("watch page has no player data".into()))?;

    // The JSON object is followed by more script; parse only the first value
    let player: Value = serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| ExtractionError::Youtube("player data is empty".into()))?
        .map_err(|e| ExtractionError::Youtube(format!("player data: {}", e)))?;

    let details = player.get("videoDetails");
    let text_of = |key: &str| {
        details
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let tracks = player
        .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
        .cloned()
        .map(serde_json::from_value::<Vec<CaptionTrack>>)
        .transpose()
        .map_err(|e| ExtractionError::Youtube(format!("caption list: {}", e)))?
        .unwrap_or_default();

    Ok(VideoPage {
        title: text_of("title"),
        description: text_of("shortDescription"),
        tracks,
    })
}

/// English generated, then English manual, then whatever comes first
pub fn pick_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks
        .iter()
        .find(|t| t.is_english() && t.is_generated())
        .or_else(|| tracks.iter().find(|t| t.is_english()))
        .or_else(|| tracks.first())
}

/// Caption lines of a timedtext XML document, one per line
pub fn parse_timedtext(xml: &str) -> String {
    TIMEDTEXT_LINE
        .captures_iter(xml)
        .map(|caps| {
            // Caption text arrives escaped twice
            let once = decode_entities(&caps[1]);
            let text = decode_entities(&once);
            INNER_TAGS
                .replace_all(&text, "")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_video_text(page: &VideoPage, transcript: Result<String, ExtractionError>) -> String {
    match transcript {
        Ok(text) => format!(
            "Title: {}\nDescription: {}\n\nTranscript:\n{}",
            page.title, page.description, text
        ),
        Err(e) => format!(
            "Title: {}\nDescription: {}\n\n(Transcript unavailable: {})",
            page.title, page.description, e
        ),
    }
}

/// Extractor for YouTube video URLs
pub struct YoutubeExtractor {
    http_client: reqwest::Client,
    base_url: String,
}

impl YoutubeExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: YOUTUBE_BASE_URL.to_string(),
        })
    }

    /// Point the extractor at a different site root (local fakes)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ExtractionError> {
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::HttpStatus(status.as_u16(), url.to_string()));
        }
        response
            .text()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))
    }

    async fn fetch_transcript(&self, page: &VideoPage) -> Result<String, ExtractionError> {
        let track = pick_track(&page.tracks)
            .ok_or_else(|| ExtractionError::Youtube("video has no caption tracks".into()))?;
        tracing::debug!(
            language = %track.language_code,
            generated = track.is_generated(),
            "Fetching caption track"
        );

        let transcript = parse_timedtext(&self.fetch_text(&track.base_url).await?);
        if transcript.is_empty() {
            return Err(ExtractionError::Youtube("caption track is empty".into()));
        }
        Ok(transcript)
    }
}

#[async_trait]
impl ContentExtractor for YoutubeExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractionError> {
        let id = video_id(url).ok_or_else(|| {
            ExtractionError::Youtube(format!("not a video URL: {}", url))
        })?;

        let watch_url = format!("{}/watch?v={}", self.base_url, id);
        let page = parse_watch_page(&self.fetch_text(&watch_url).await?)?;

        let transcript = self.fetch_transcript(&page).await;
        if let Err(e) = &transcript {
            tracing::warn!(video_id = %id, error = %e, "Transcript unavailable, using metadata only");
        }

        let text = format_video_text(&page, transcript);
        tracing::info!(video_id = %id, chars = text.len(), "Extracted YouTube source");
        Ok(text)
    }
}
