use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use super::{MusicSource, Track, TrackInfo};
use crate::{
    cache::{CachedResolution, ResolutionCache},
    error::ResolutionError,
};

/// Result of resolving one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Single(Track),
    Playlist(Vec<Track>),
}

impl Resolution {
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Resolution::Single(track) => vec![track],
            Resolution::Playlist(tracks) => tracks,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Resolution::Single(_) => 1,
            Resolution::Playlist(tracks) => tracks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Limits applied to every resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolverLimits {
    pub timeout: Duration,
    pub max_playlist_size: usize,
    pub search_limit: usize,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_playlist_size: 100,
            search_limit: 5,
        }
    }
}

/// Front door for turning user queries into tracks.
///
/// Sources are consulted in registration order: the first one accepting a URL
/// handles it, and searches fall through until a source returns a match. The
/// resolver never retries; retry policy belongs to the caller.
pub struct TrackResolver {
    sources: Vec<Arc<dyn MusicSource>>,
    cache: ResolutionCache,
    limits: ResolverLimits,
}

impl TrackResolver {
    pub fn new(sources: Vec<Arc<dyn MusicSource>>, cache: ResolutionCache, limits: ResolverLimits) -> Self {
        Self { sources, cache, limits }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Resolves a query into one or more tracks requested by `requester`.
    pub async fn resolve(&self, query: &str, requester: UserId) -> Result<Resolution, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NotFound);
        }

        let key = cache_key(query);
        if let Some(cached) = self.cache.get(&key) {
            debug!("💾 Cache hit for '{}'", query);
            return Ok(stamp(cached, requester));
        }

        let resolved = if is_direct_uri(query) {
            self.resolve_direct(query).await?
        } else {
            CachedResolution::Single(self.resolve_search(query).await?)
        };

        self.cache.insert(key, resolved.clone());
        Ok(stamp(resolved, requester))
    }

    /// Ranked candidates for a chooser; never consults the cache.
    pub async fn search(&self, query: &str, limit: usize, requester: UserId) -> Result<Vec<Track>, ResolutionError> {
        let mut last_error = None;

        for source in &self.sources {
            match self.bounded(source.search(query, limit)).await {
                Ok(found) if !found.is_empty() => {
                    return Ok(found
                        .into_iter()
                        .take(limit)
                        .map(|info| Track::new(info, requester))
                        .collect())
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("⚠️ {} search failed: {}", source.source_name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ResolutionError::NotFound))
    }

    async fn resolve_direct(&self, url: &str) -> Result<CachedResolution, ResolutionError> {
        let source = self
            .sources
            .iter()
            .find(|source| source.is_valid_url(url))
            .ok_or(ResolutionError::NotFound)?;

        info!("🔗 Resolving {} via {}", url, source.source_name());

        if source.is_playlist_url(url) {
            let entries = self
                .bounded(source.get_playlist(url, self.limits.max_playlist_size))
                .await?;
            if entries.is_empty() {
                return Err(ResolutionError::NotFound);
            }
            let entries = entries.into_iter().take(self.limits.max_playlist_size).collect();
            Ok(CachedResolution::Playlist(entries))
        } else {
            Ok(CachedResolution::Single(self.bounded(source.get_track(url)).await?))
        }
    }

    async fn resolve_search(&self, query: &str) -> Result<TrackInfo, ResolutionError> {
        let mut last_error = None;

        for source in &self.sources {
            match self.bounded(source.search(query, self.limits.search_limit)).await {
                Ok(found) => {
                    if let Some(best) = found.into_iter().next() {
                        debug!("🎯 Best match from {}: {}", source.source_name(), best.title);
                        return Ok(best);
                    }
                }
                Err(e) => {
                    warn!("⚠️ {} search failed: {}", source.source_name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ResolutionError::NotFound))
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ResolutionError>>,
    ) -> Result<T, ResolutionError> {
        timeout(self.limits.timeout, call)
            .await
            .map_err(|_| ResolutionError::SourceUnavailable("source timed out".to_string()))?
    }
}

/// A query is direct when it parses as an absolute http(s) URL.
pub fn is_direct_uri(query: &str) -> bool {
    !query.contains(char::is_whitespace)
        && Url::parse(query)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
            .unwrap_or(false)
}

fn cache_key(query: &str) -> String {
    if is_direct_uri(query) {
        query.to_string()
    } else {
        query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }
}

fn stamp(resolved: CachedResolution, requester: UserId) -> Resolution {
    match resolved {
        CachedResolution::Single(info) => Resolution::Single(Track::new(info, requester)),
        CachedResolution::Playlist(entries) => {
            Resolution::Playlist(entries.into_iter().map(|info| Track::new(info, requester)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockMusicSource, StreamHandle};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    fn info(title: &str) -> TrackInfo {
        let uri = format!("https://media.example/{}", title);
        TrackInfo::new(title, uri.clone(), StreamHandle::Http(uri))
    }

    fn resolver(sources: Vec<Arc<dyn MusicSource>>) -> TrackResolver {
        TrackResolver::new(sources, ResolutionCache::new(16, None), ResolverLimits::default())
    }

    fn requester() -> UserId {
        UserId::new(42)
    }

    #[test]
    fn direct_uri_heuristic() {
        assert!(is_direct_uri("https://www.youtube.com/watch?v=abc"));
        assert!(is_direct_uri("http://radio.example/stream.mp3"));
        assert!(!is_direct_uri("never gonna give you up"));
        assert!(!is_direct_uri("spotify:track:123"));
        assert!(!is_direct_uri("https://example.com/a b"));
    }

    #[tokio::test]
    async fn search_returns_first_match_and_caches_it() {
        let mut source = MockMusicSource::new();
        source.expect_search()
            .with(eq("daft punk"), eq(5))
            .times(1)
            .returning(|_, _| Ok(vec![info("one-more-time"), info("aerodynamic")]));
        source.expect_source_name().return_const("mock");

        let resolver = resolver(vec![Arc::new(source)]);

        let first = resolver.resolve("daft punk", requester()).await.unwrap();
        // different whitespace and case hit the same cache entry
        let second = resolver.resolve("  Daft   Punk ", UserId::new(7)).await.unwrap();

        match (first, second) {
            (Resolution::Single(a), Resolution::Single(b)) => {
                assert_eq!(a.title(), "one-more-time");
                assert_eq!(a.requested_by(), requester());
                assert_eq!(b.title(), "one-more-time");
                assert_eq!(b.requested_by(), UserId::new(7));
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_search_is_not_found() {
        let mut source = MockMusicSource::new();
        source.expect_search().returning(|_, _| Ok(Vec::new()));
        source.expect_source_name().return_const("mock");

        let err = resolver(vec![Arc::new(source)])
            .resolve("nothing here", requester())
            .await
            .unwrap_err();

        assert_eq!(err, ResolutionError::NotFound);
    }

    #[tokio::test]
    async fn search_falls_through_to_next_source_and_reports_backend_failure() {
        let mut broken = MockMusicSource::new();
        broken.expect_search()
            .returning(|_, _| Err(ResolutionError::SourceUnavailable("down".into())));
        broken.expect_source_name().return_const("broken");

        let mut empty = MockMusicSource::new();
        empty.expect_search().returning(|_, _| Ok(Vec::new()));
        empty.expect_source_name().return_const("empty");

        let err = resolver(vec![Arc::new(broken), Arc::new(empty)])
            .resolve("song", requester())
            .await
            .unwrap_err();

        assert_eq!(err, ResolutionError::SourceUnavailable("down".into()));
    }

    #[tokio::test]
    async fn playlist_urls_expand_and_truncate() {
        let url = "https://www.youtube.com/playlist?list=PL1";
        let mut source = MockMusicSource::new();
        source.expect_is_valid_url().return_const(true);
        source.expect_is_playlist_url().return_const(true);
        source.expect_source_name().return_const("mock");
        source.expect_get_playlist()
            .with(eq(url), eq(2))
            .returning(|_, _| Ok(vec![info("a"), info("b"), info("c")]));

        let limits = ResolverLimits { max_playlist_size: 2, ..ResolverLimits::default() };
        let resolver = TrackResolver::new(vec![Arc::new(source)], ResolutionCache::new(4, None), limits);

        let resolution = resolver.resolve(url, requester()).await.unwrap();
        let titles: Vec<_> = resolution.into_tracks().iter().map(|t| t.title().to_string()).collect();

        assert_eq!(titles, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unsupported_url_is_not_found() {
        let mut source = MockMusicSource::new();
        source.expect_is_valid_url().return_const(false);

        let err = resolver(vec![Arc::new(source)])
            .resolve("https://unknown.example/page", requester())
            .await
            .unwrap_err();

        assert_eq!(err, ResolutionError::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sources_time_out_as_unavailable() {
        struct Stalled;

        #[async_trait::async_trait]
        impl MusicSource for Stalled {
            async fn search(&self, _: &str, _: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            async fn get_track(&self, _: &str) -> Result<TrackInfo, ResolutionError> {
                Err(ResolutionError::NotFound)
            }
            async fn get_playlist(&self, _: &str, _: usize) -> Result<Vec<TrackInfo>, ResolutionError> {
                Err(ResolutionError::NotFound)
            }
            fn is_valid_url(&self, _: &str) -> bool {
                false
            }
            fn is_playlist_url(&self, _: &str) -> bool {
                false
            }
            fn source_name(&self) -> &'static str {
                "stalled"
            }
        }

        let err = resolver(vec![Arc::new(Stalled)])
            .resolve("anything", requester())
            .await
            .unwrap_err();

        assert!(matches!(err, ResolutionError::SourceUnavailable(_)));
    }
}
