use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MusicSource, StreamHandle, TrackInfo};
use crate::error::ResolutionError;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/|playlist\?)|youtu\.be/|music\.youtube\.com/)")
        .expect("youtube url pattern is valid")
});

static YOUTUBE_PLAYLIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]list=[\w-]+").expect("playlist pattern is valid"));

/// yt-dlp backed source for YouTube searches, videos and playlists.
pub struct YouTubeClient {
    // yt-dlp processes are heavy; cap how many run at once
    rate_limiter: Semaphore,
}

/// Subset of yt-dlp's `--dump-json` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
}

impl YouTubeClient {
    pub fn new() -> Self {
        Self {
            rate_limiter: Semaphore::new(3),
        }
    }

    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.is_match(url)
    }

    /// Runs yt-dlp and returns its stdout, classifying failures.
    async fn run_ytdlp(&self, args: &[&str]) -> Result<String, ResolutionError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolutionError::SourceUnavailable(e.to_string()))?;

        debug!("🔧 yt-dlp {}", args.join(" "));

        let output = child_command("yt-dlp", args)
            .output()
            .await
            .map_err(|e| ResolutionError::SourceUnavailable(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp failed: {}", stderr.trim());
            return Err(classify_failure(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A command whose process is killed when the handle is dropped, so a
/// cancelled or timed-out resolution does not leave yt-dlp running.
fn child_command(program: &str, args: &[&str]) -> Command {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    command
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MusicSource for YouTubeClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        info!("🔍 Searching YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let stdout = self
            .run_ytdlp(&[
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        Ok(parse_entries(&stdout))
    }

    async fn get_track(&self, url: &str) -> Result<TrackInfo, ResolutionError> {
        debug!("📊 Fetching info for: {}", url);

        let stdout = self
            .run_ytdlp(&["--no-playlist", "--dump-json", "--no-warnings", url])
            .await?;

        parse_entries(&stdout)
            .into_iter()
            .next()
            .ok_or(ResolutionError::NotFound)
    }

    async fn get_playlist(&self, url: &str, limit: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
        info!("📋 Fetching playlist: {}", url);

        let end = limit.to_string();
        let stdout = self
            .run_ytdlp(&[
                "--flat-playlist",
                "--dump-json",
                "--playlist-end",
                &end,
                "--no-warnings",
                url,
            ])
            .await?;

        Ok(parse_entries(&stdout))
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn is_playlist_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url) && (YOUTUBE_PLAYLIST.is_match(url) || url.contains("/playlist"))
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}

/// Parses one JSON object per line, skipping lines yt-dlp could not describe.
fn parse_entries(stdout: &str) -> Vec<TrackInfo> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<YtDlpInfo>(line) {
            Ok(info) => info_to_track(info),
            Err(e) => {
                debug!("Skipping unparsable yt-dlp line: {}", e);
                None
            }
        })
        .collect()
}

fn info_to_track(info: YtDlpInfo) -> Option<TrackInfo> {
    let uri = info
        .webpage_url
        .or_else(|| info.url.filter(|u| u.starts_with("http")))
        .or_else(|| info.id.as_ref().map(|id| format!("https://www.youtube.com/watch?v={}", id)))?;

    let title = info.title.unwrap_or_else(|| uri.clone());
    let mut track = TrackInfo::new(title, uri.clone(), StreamHandle::YtDlp(uri));

    if let Some(artist) = info.uploader.or(info.channel) {
        track = track.with_artist(artist);
    }
    // live streams report no meaningful duration
    if !info.is_live.unwrap_or(false) {
        if let Some(duration) = info.duration.filter(|d| d.is_finite() && *d > 0.0) {
            track = track.with_duration(Duration::from_secs_f64(duration));
        }
    }
    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }

    Some(track)
}

fn classify_failure(stderr: &str) -> ResolutionError {
    let lower = stderr.to_lowercase();
    let missing = [
        "video unavailable",
        "is not available",
        "does not exist",
        "private video",
        "no video formats found",
        "unsupported url",
    ];

    if missing.iter().any(|needle| lower.contains(needle)) {
        ResolutionError::NotFound
    } else {
        ResolutionError::SourceUnavailable(stderr.lines().last().unwrap_or("yt-dlp error").trim().to_string())
    }
}
