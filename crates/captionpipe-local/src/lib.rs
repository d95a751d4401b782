use captionpipe_core::{
    extract_video_id, CachePolicy, Error, EscalationPolicy, FetchSource, MetadataSource,
    Orchestrator, PipelineStatus, Result, TranscriptResult, VideoId,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub mod classify;
pub mod config;
pub mod http;
pub mod shellout;
pub mod watch_page;
pub mod ytdlp;

pub use config::{CacheConfig, HttpConfig, PipelineConfig, ProxyConfig, ToolConfig};

const CACHE_SCHEMA_VERSION: u32 = 1;

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Persisted cache record. `payload` is the flat transcript record.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    schema_version: u32,
    video_id: VideoId,
    written_at_epoch_s: u64,
    payload: TranscriptResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
    pub root: String,
}

/// One JSON file per video under `root/ab/cd/<sha256>.json`.
///
/// Expired entries read as absent and are left on disk; there is no eviction.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
    ttl: Duration,
}

impl FsCache {
    pub fn new(root: PathBuf, ttl: Duration) -> Self {
        Self { root, ttl }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(video_id: &VideoId) -> String {
        let mut h = Sha256::new();
        h.update(b"video:");
        h.update(video_id.as_str().as_bytes());
        hex::encode(h.finalize())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{key}.json"))
    }

    pub fn get(&self, video_id: &VideoId) -> Result<Option<TranscriptResult>> {
        self.get_at(video_id, now_epoch_s())
    }

    /// Lookup as of `now_s` (seconds since the epoch).
    pub fn get_at(&self, video_id: &VideoId, now_s: u64) -> Result<Option<TranscriptResult>> {
        let p = self.path(&Self::key_for(video_id));
        let bytes = match fs::read(&p) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Cache(e.to_string())),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| Error::Cache(e.to_string()))?;
        if entry.schema_version != CACHE_SCHEMA_VERSION || &entry.video_id != video_id {
            debug!(video_id = %video_id, "cache entry ignored (schema or key mismatch)");
            return Ok(None);
        }
        if now_s.saturating_sub(entry.written_at_epoch_s) >= self.ttl.as_secs() {
            debug!(video_id = %video_id, "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry.payload))
    }

    pub fn put(&self, video_id: &VideoId, transcript: &TranscriptResult) -> Result<()> {
        self.put_at(video_id, transcript, now_epoch_s())
    }

    /// Write-then-rename, so concurrent readers see either the old or the new entry.
    pub fn put_at(
        &self,
        video_id: &VideoId,
        transcript: &TranscriptResult,
        now_s: u64,
    ) -> Result<()> {
        let p = self.path(&Self::key_for(video_id));
        let dir = p
            .parent()
            .ok_or_else(|| Error::Cache("cache path has no parent".to_string()))?;
        fs::create_dir_all(dir).map_err(|e| Error::Cache(e.to_string()))?;

        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            video_id: video_id.clone(),
            written_at_epoch_s: now_s,
            payload: transcript.clone(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| Error::Cache(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Cache(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| Error::Cache(e.to_string()))?;
        tmp.persist(&p)
            .map_err(|e| Error::Cache(e.error.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        fn walk(dir: &Path, stats: &mut CacheStats) -> std::io::Result<()> {
            for ent in fs::read_dir(dir)? {
                let ent = ent?;
                let ty = ent.file_type()?;
                let p = ent.path();
                if ty.is_dir() {
                    walk(&p, stats)?;
                } else if p.extension().and_then(|s| s.to_str()) == Some("json") {
                    stats.entries += 1;
                    stats.bytes += ent.metadata()?.len();
                }
            }
            Ok(())
        }

        let mut stats = CacheStats {
            entries: 0,
            bytes: 0,
            root: self.root.display().to_string(),
        };
        match walk(&self.root, &mut stats) {
            Ok(()) => Ok(stats),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(stats),
            Err(e) => Err(Error::Cache(e.to_string())),
        }
    }
}

/// A transcript plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched {
    pub transcript: TranscriptResult,
    pub source: FetchSource,
    /// Strategy that produced it; `None` for cache hits.
    pub strategy: Option<&'static str>,
}

/// The pipeline behind `fetch` / `status`.
#[derive(Debug, Clone)]
pub struct TranscriptService {
    orchestrator: Orchestrator,
    cache: Option<FsCache>,
    proxy: Option<ProxyConfig>,
    default_cookies: Option<String>,
}

impl TranscriptService {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let transport = Arc::new(http::HttpTransport::new(
            &config.http,
            config.proxy.as_ref(),
        )?);
        let page = Arc::new(watch_page::WatchPageSource::new(
            transport.clone(),
            &config.http.watch_base_url,
        )?);
        let content = Arc::new(http::HttpTrackFetcher::new(transport));
        let tool = Arc::new(ytdlp::YtDlpSource::new(
            &config.tool,
            config.proxy.clone(),
            &config.http.watch_base_url,
        )) as Arc<dyn MetadataSource>;

        let escalation = EscalationPolicy {
            egress_configured: config.proxy.is_some(),
            force_proxied: config.force_proxied,
        };
        let orchestrator = Orchestrator::new(page, content, Some(tool), escalation, config.tracks);
        let cache = config
            .cache
            .dir
            .map(|dir| FsCache::new(dir, config.cache.ttl));

        let masked = config
            .proxy
            .as_ref()
            .map(ProxyConfig::masked)
            .unwrap_or_else(|| "none".to_string());
        info!(
            alternate_egress = %masked,
            force_proxied = config.force_proxied,
            tool_enabled = config.tool.enabled,
            cache = cache.is_some(),
            "transcript service configured"
        );

        Ok(Self {
            orchestrator,
            cache,
            proxy: config.proxy,
            default_cookies: config.cookies,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(PipelineConfig::from_env()?)
    }

    /// Resolve `video_or_url` and return its transcript, from cache when fresh.
    pub async fn fetch(
        &self,
        video_or_url: &str,
        cookies: Option<&str>,
    ) -> Result<TranscriptResult> {
        Ok(self
            .fetch_detailed(video_or_url, cookies, CachePolicy::default())
            .await?
            .transcript)
    }

    pub async fn fetch_detailed(
        &self,
        video_or_url: &str,
        cookies: Option<&str>,
        cache_policy: CachePolicy,
    ) -> Result<Fetched> {
        let video_id = extract_video_id(video_or_url)?;

        if cache_policy.read {
            if let Some(hit) = self.cache_get(&video_id).await {
                debug!(video_id = %video_id, "cache hit");
                return Ok(Fetched {
                    transcript: hit,
                    source: FetchSource::Cache,
                    strategy: None,
                });
            }
            debug!(video_id = %video_id, "cache miss");
        }

        let cookies = cookies
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or(self.default_cookies.as_deref());
        let t0 = Instant::now();
        let acquired = self.orchestrator.run(&video_id, cookies).await?;
        info!(
            video_id = %video_id,
            strategy = acquired.strategy,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "transcript fetched"
        );

        if cache_policy.write {
            self.cache_put(&video_id, &acquired.transcript).await;
        }

        Ok(Fetched {
            transcript: acquired.transcript,
            source: FetchSource::Network,
            strategy: Some(acquired.strategy),
        })
    }

    /// Cache failures degrade to a miss.
    async fn cache_get(&self, video_id: &VideoId) -> Option<TranscriptResult> {
        let cache = self.cache.clone()?;
        let id = video_id.clone();
        match tokio::task::spawn_blocking(move || cache.get(&id)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(video_id = %video_id, error = %e, "cache read failed; treating as miss");
                None
            }
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "cache read task failed");
                None
            }
        }
    }

    /// The transcript is already in hand; a failed write is logged, not returned.
    async fn cache_put(&self, video_id: &VideoId, transcript: &TranscriptResult) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let id = video_id.clone();
        let r = transcript.clone();
        match tokio::task::spawn_blocking(move || cache.put(&id, &r)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(video_id = %video_id, error = %e, "cache write failed"),
            Err(e) => warn!(video_id = %video_id, error = %e, "cache write task failed"),
        }
    }

    /// Configuration and tool presence. Performs no network calls.
    pub fn status(&self) -> PipelineStatus {
        let escalation = self.orchestrator.escalation();
        PipelineStatus {
            alternate_egress_configured: escalation.egress_configured,
            tool_available: self.orchestrator.tool_available(),
            alternate_egress: self.proxy.as_ref().map(ProxyConfig::masked),
            force_proxied: escalation.force_proxied,
            cache_enabled: self.cache.is_some(),
        }
    }

    /// `None` when the cache is disabled.
    pub async fn cache_stats(&self) -> Result<Option<CacheStats>> {
        let Some(cache) = self.cache.clone() else {
            return Ok(None);
        };
        tokio::task::spawn_blocking(move || cache.stats())
            .await
            .map_err(|e| Error::Cache(format!("cache stats join failed: {e}")))?
            .map(Some)
    }
}
