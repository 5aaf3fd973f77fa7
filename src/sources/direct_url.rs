use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{MusicSource, StreamHandle, TrackInfo};
use crate::error::ResolutionError;

const AUDIO_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus", ".aac"];
const PLAYLIST_EXTENSIONS: [&str; 2] = [".m3u", ".m3u8"];

/// Plain HTTP(S) audio files and M3U playlists of them.
pub struct DirectUrlClient {
    client: reqwest::Client,
}

impl DirectUrlClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn unavailable(e: reqwest::Error) -> ResolutionError {
        ResolutionError::SourceUnavailable(e.to_string())
    }
}

#[async_trait]
impl MusicSource for DirectUrlClient {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        // nothing to search on a bare URL source
        Ok(Vec::new())
    }

    async fn get_track(&self, url: &str) -> Result<TrackInfo, ResolutionError> {
        debug!("🔗 Probing direct URL: {}", url);

        let response = self.client.head(url).send().await.map_err(Self::unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::FORBIDDEN => {
                return Err(ResolutionError::NotFound)
            }
            status if !status.is_success() => {
                return Err(ResolutionError::SourceUnavailable(format!("HTTP {}", status)))
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        if !is_audio_content(&content_type) && !has_extension(url, &AUDIO_EXTENSIONS) {
            debug!("Rejecting {} with content type '{}'", url, content_type);
            return Err(ResolutionError::NotFound);
        }

        Ok(TrackInfo::new(title_from_url(url), url, StreamHandle::Http(url.to_string())))
    }

    async fn get_playlist(&self, url: &str, limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        info!("📋 Fetching M3U playlist: {}", url);

        let response = self.client.get(url).send().await.map_err(Self::unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ResolutionError::NotFound);
        }
        let body = response
            .error_for_status()
            .map_err(Self::unavailable)?
            .text()
            .await
            .map_err(Self::unavailable)?;

        Ok(parse_m3u(&body, limit))
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        has_extension(url, &PLAYLIST_EXTENSIONS)
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}

fn is_audio_content(content_type: &str) -> bool {
    content_type.starts_with("audio/") || content_type == "application/ogg"
}

fn has_extension(url: &str, extensions: &[&str]) -> bool {
    let path = Url::parse(url)
        .map(|parsed| parsed.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    extensions.iter().any(|ext| path.ends_with(ext))
}

/// Last path segment, or the host when the path is empty.
fn title_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|segment| !segment.is_empty())
        .or_else(|| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn parse_m3u(body: &str, limit: usize) -> Vec<TrackInfo> {
    let mut pending_title: Option<String> = None;
    let mut tracks = Vec::new();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(extinf) = line.strip_prefix("#EXTINF:") {
            // "#EXTINF:<seconds>,<title>"
            pending_title = extinf.split_once(',').map(|(_, title)| title.trim().to_string());
            continue;
        }
        if line.starts_with('#') || !line.starts_with("http") {
            continue;
        }

        let title = pending_title.take().unwrap_or_else(|| title_from_url(line));
        tracks.push(TrackInfo::new(title, line, StreamHandle::Http(line.to_string())));
        if tracks.len() >= limit {
            break;
        }
    }

    tracks
}
