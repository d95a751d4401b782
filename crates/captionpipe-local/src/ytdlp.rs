//! yt-dlp metadata source.
//!
//! yt-dlp already tracks YouTube's moving target, so the last strategy asks it for the
//! info JSON (`--dump-json --skip-download`) and takes the caption maps from there. The
//! content itself is fetched by the shared track fetcher, not by yt-dlp.
//!
//! Neither cookies nor proxy credentials go on the command line, since argv is visible to
//! other processes. The alternate egress reaches yt-dlp through the proxy environment
//! variables of the child only.

use crate::classify::classify_message;
use crate::config::{ProxyConfig, ToolConfig};
use crate::shellout;
use captionpipe_core::{
    Attempt, CaptionTrack, Egress, Error, MetadataSource, Result, TrackFormat, TrackOrigin,
    TrackSet, VideoMetadata,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Info JSON for one video is typically well under this.
const MAX_INFO_JSON_BYTES: usize = 64 * 1024 * 1024;

const PROXY_ENV: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

#[derive(Debug, Clone)]
pub struct YtDlpSource {
    enabled: bool,
    binary: String,
    timeout: Duration,
    proxy: Option<ProxyConfig>,
    watch_base_url: String,
}

impl YtDlpSource {
    pub fn new(tool: &ToolConfig, proxy: Option<ProxyConfig>, watch_base_url: &str) -> Self {
        Self {
            enabled: tool.enabled,
            binary: tool.binary.clone(),
            timeout: tool.timeout,
            proxy,
            watch_base_url: watch_base_url.to_string(),
        }
    }

    fn command(&self, attempt: &Attempt) -> Result<tokio::process::Command> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--dump-json",
            "--no-playlist",
            "--skip-download",
            "--no-warnings",
        ]);
        match attempt.egress {
            Egress::Alternate => {
                let p = self
                    .proxy
                    .as_ref()
                    .ok_or_else(|| Error::NotConfigured("alternate egress point".to_string()))?;
                for k in PROXY_ENV {
                    cmd.env(k, p.url());
                }
            }
            // An empty proxy disables any proxy yt-dlp would pick up from the environment.
            Egress::Direct => {
                for k in PROXY_ENV {
                    cmd.env_remove(k);
                }
                cmd.args(["--proxy", ""]);
            }
        }
        cmd.arg(attempt.video_id.watch_url(&self.watch_base_url));
        Ok(cmd)
    }

    fn scrub(&self, text: &str) -> String {
        match &self.proxy {
            Some(p) => p.redact(text),
            None => text.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl MetadataSource for YtDlpSource {
    fn name(&self) -> &'static str {
        "yt_dlp"
    }

    fn available(&self) -> bool {
        self.enabled && shellout::has(&self.binary)
    }

    async fn metadata(&self, attempt: &Attempt) -> Result<VideoMetadata> {
        if !self.enabled {
            return Err(Error::ToolUnavailable("yt-dlp is disabled".to_string()));
        }
        let cmd = self.command(attempt)?;
        let out = shellout::run_captured(cmd, self.timeout, MAX_INFO_JSON_BYTES)
            .await
            .map_err(|code| match code {
                "shellout_tool_not_found" => {
                    Error::ToolUnavailable(format!("{} not found", self.binary))
                }
                "shellout_timeout" => Error::Upstream(format!(
                    "yt-dlp timed out after {}ms",
                    self.timeout.as_millis()
                )),
                other => Error::Upstream(format!("yt-dlp: {other}")),
            })?;

        if !out.success {
            debug!(
                video_id = %attempt.video_id,
                exit_code = ?out.exit_code,
                "yt-dlp exited unsuccessfully"
            );
            return Err(classify_message(&self.scrub(&out.stderr)));
        }
        parse_info_json(&out.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    duration: Option<f64>,
    subtitles: Option<BTreeMap<String, Vec<InfoSub>>>,
    automatic_captions: Option<BTreeMap<String, Vec<InfoSub>>>,
}

#[derive(Debug, Deserialize)]
struct InfoSub {
    ext: Option<String>,
    url: Option<String>,
    name: Option<String>,
    protocol: Option<String>,
}

fn parse_info_json(stdout: &[u8]) -> Result<VideoMetadata> {
    let info: InfoJson = serde_json::from_slice(stdout)
        .map_err(|e| Error::Upstream(format!("yt-dlp info json: {e}")))?;

    let mut tracks = TrackSet::default();
    for (origin, map) in [
        (TrackOrigin::Manual, info.subtitles),
        (TrackOrigin::Automatic, info.automatic_captions),
    ] {
        for (lang, subs) in map.unwrap_or_default() {
            // Live chat replay is not a caption track.
            if lang == "live_chat" {
                continue;
            }
            for sub in subs {
                let Some(url) = sub.url.filter(|u| !u.trim().is_empty()) else {
                    continue;
                };
                tracks.insert(CaptionTrack {
                    language_code: lang.clone(),
                    origin,
                    format: TrackFormat::from_ext(sub.ext.as_deref().unwrap_or("")),
                    protocol: sub.protocol.unwrap_or_else(|| "https".to_string()),
                    url,
                    name: sub.name.unwrap_or_default(),
                });
            }
        }
    }

    Ok(VideoMetadata {
        title: info.title.filter(|t| !t.trim().is_empty()),
        duration_seconds: info.duration.filter(|d| d.is_finite() && *d >= 0.0),
        tracks,
    })
}
