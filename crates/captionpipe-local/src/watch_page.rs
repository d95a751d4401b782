//! Watch-page metadata source.
//!
//! Fetches the public watch page and reads the player response embedded in it
//! (`ytInitialPlayerResponse = {...};`). Caption track URLs from the page are rewritten to
//! request the cue-block format.

use crate::classify::classify_message;
use crate::http::{HttpBody, HttpTransport};
use captionpipe_core::{
    Attempt, CaptionTrack, Error, MetadataSource, Result, TrackFormat, TrackOrigin, TrackSet,
    VideoMetadata,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";

#[derive(Debug, Clone)]
pub struct WatchPageSource {
    transport: Arc<HttpTransport>,
    base: url::Url,
}

impl WatchPageSource {
    pub fn new(transport: Arc<HttpTransport>, watch_base_url: &str) -> Result<Self> {
        let base = url::Url::parse(watch_base_url)
            .map_err(|e| Error::NotConfigured(format!("invalid watch base url: {e}")))?;
        Ok(Self { transport, base })
    }
}

#[async_trait::async_trait]
impl MetadataSource for WatchPageSource {
    fn name(&self) -> &'static str {
        "watch_page"
    }

    async fn metadata(&self, attempt: &Attempt) -> Result<VideoMetadata> {
        let url = attempt.video_id.watch_url(self.base.as_str());
        let body = self
            .transport
            .get(&url, attempt.egress, attempt.cookies.as_deref())
            .await?;
        classify_page(&body)?;
        let pr = extract_player_response(&body.text)?;
        check_playability(&pr)?;
        Ok(to_metadata(pr, &self.base))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    captions: Option<Captions>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    title: Option<String>,
    /// Seconds, as a decimal string.
    length_seconds: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Captions {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    tracklist: Option<Tracklist>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tracklist {
    #[serde(default)]
    caption_tracks: Vec<PageTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageTrack {
    base_url: String,
    language_code: String,
    /// `"asr"` marks automatic speech recognition tracks.
    kind: Option<String>,
    name: Option<TrackName>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackName {
    simple_text: Option<String>,
    #[serde(default)]
    runs: Vec<TextRun>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    text: String,
}

/// Page-level signals that precede any parsing.
fn classify_page(body: &HttpBody) -> Result<()> {
    if body.status == 429 {
        return Err(Error::RateLimited("watch page returned HTTP 429".to_string()));
    }

    let final_host = url::Url::parse(&body.final_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();
    if final_host.starts_with("consent.") || body.text.contains("action=\"https://consent.") {
        return Err(Error::ConsentRequired(
            "watch page redirected to a consent form".to_string(),
        ));
    }

    let text = body.text.as_str();
    if body.final_url.contains("/sorry/")
        || text.contains("confirm you’re not a bot")
        || text.contains("confirm you're not a bot")
        || text.contains("g-recaptcha")
    {
        return Err(Error::BotChallenge(
            "watch page served a verification challenge".to_string(),
        ));
    }
    if body.status == 403 {
        return Err(Error::BotChallenge("watch page returned HTTP 403".to_string()));
    }
    if !body.is_success() {
        return Err(Error::Upstream(format!(
            "watch page returned HTTP {}",
            body.status
        )));
    }
    Ok(())
}

pub(crate) fn extract_player_response(html: &str) -> Result<PlayerResponse> {
    for (idx, _) in html.match_indices(PLAYER_RESPONSE_MARKER) {
        // Handles `var ytInitialPlayerResponse = {` and `window["ytInitialPlayerResponse"] = {`.
        let rest = html[idx + PLAYER_RESPONSE_MARKER.len()..]
            .trim_start_matches(|c: char| c == '"' || c == ']' || c.is_whitespace());
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        if !rest.starts_with('{') {
            continue;
        }
        // An object is self-delimiting, so the trailing script text is never read.
        match serde_json::Deserializer::from_str(rest)
            .into_iter::<PlayerResponse>()
            .next()
        {
            Some(Ok(pr)) => return Ok(pr),
            Some(Err(e)) => debug!(error = %e, "player response candidate did not parse"),
            None => {}
        }
    }
    Err(Error::Upstream(
        "player response not found in watch page".to_string(),
    ))
}

fn check_playability(pr: &PlayerResponse) -> Result<()> {
    let Some(ps) = pr.playability_status.as_ref() else {
        return Ok(());
    };
    let reason = ps.reason.clone().unwrap_or_default();
    match ps.status.as_deref().unwrap_or("OK") {
        "OK" => Ok(()),
        "ERROR" | "UNPLAYABLE" | "LIVE_STREAM_OFFLINE" => Err(Error::VideoUnavailable(
            if reason.is_empty() {
                "video unavailable".to_string()
            } else {
                reason
            },
        )),
        "AGE_CHECK_REQUIRED" | "CONTENT_CHECK_REQUIRED" => Err(Error::ConsentRequired(reason)),
        // Covers bot checks, private videos and age gates alike.
        "LOGIN_REQUIRED" => Err(match classify_message(&reason) {
            Error::Upstream(_) | Error::NoCaptionsAvailable => Error::ConsentRequired(reason),
            other => other,
        }),
        other => Err(Error::Upstream(format!(
            "unexpected playability status {other}: {reason}"
        ))),
    }
}

fn to_metadata(pr: PlayerResponse, base: &url::Url) -> VideoMetadata {
    let (title, duration_seconds) = match pr.video_details {
        Some(d) => (
            d.title.filter(|t| !t.trim().is_empty()),
            d.length_seconds
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|n| n.is_finite() && *n >= 0.0),
        ),
        None => (None, None),
    };

    let mut tracks = TrackSet::default();
    let raw = pr
        .captions
        .and_then(|c| c.tracklist)
        .map(|t| t.caption_tracks)
        .unwrap_or_default();
    for t in raw {
        let Some(url) = cue_block_url(base, &t.base_url) else {
            debug!(language = %t.language_code, "caption track url did not parse; skipped");
            continue;
        };
        let origin = if t.kind.as_deref() == Some("asr") {
            TrackOrigin::Automatic
        } else {
            TrackOrigin::Manual
        };
        let name = t
            .name
            .map(|n| {
                n.simple_text
                    .unwrap_or_else(|| n.runs.into_iter().map(|r| r.text).collect())
            })
            .unwrap_or_default();
        tracks.insert(CaptionTrack {
            language_code: t.language_code,
            origin,
            format: TrackFormat::Vtt,
            protocol: "https".to_string(),
            url,
            name,
        });
    }

    VideoMetadata {
        title,
        duration_seconds,
        tracks,
    }
}

/// Resolve `raw` against `base` and force `fmt=vtt`.
fn cue_block_url(base: &url::Url, raw: &str) -> Option<String> {
    let mut u = base.join(raw.trim()).ok()?;
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| k != "fmt")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    u.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("fmt", "vtt");
    Some(u.to_string())
}
