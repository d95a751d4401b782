//! Video identifier extraction.
//!
//! An identifier is an 11-character token over `[A-Za-z0-9_-]`. It is never validated
//! against the network here: an identifier that looks right but names nothing surfaces
//! later as "video unavailable" / "no captions".

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const VIDEO_ID_LEN: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    /// Accept a bare token only.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if is_token(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidIdentifier(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public watch page URL under `base` (e.g. `https://www.youtube.com`).
    pub fn watch_url(&self, base: &str) -> String {
        format!("{}/watch?v={}", base.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VideoId> for String {
    fn from(v: VideoId) -> Self {
        v.0
    }
}

fn is_token(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn is_youtube_host(host: &str) -> bool {
    let h = host.to_ascii_lowercase();
    h == "youtube.com"
        || h == "youtu.be"
        || h == "youtube-nocookie.com"
        || h.ends_with(".youtube.com")
        || h.ends_with(".youtube-nocookie.com")
}

/// Resolve a bare identifier or any supported URL shape to a `VideoId`.
///
/// Supported: `watch?v=<id>`, `youtu.be/<id>`, `/embed/<id>`, `/shorts/<id>` (and the
/// legacy `/v/<id>`). Scheme-less inputs like `youtu.be/<id>` are accepted.
pub fn extract_video_id(input: &str) -> Result<VideoId> {
    let s = input.trim();
    if is_token(s) {
        return Ok(VideoId(s.to_string()));
    }
    let parsed = url::Url::parse(s).or_else(|_| url::Url::parse(&format!("https://{s}")));
    let Ok(u) = parsed else {
        return Err(Error::InvalidIdentifier(s.to_string()));
    };
    from_url(&u).ok_or_else(|| Error::InvalidIdentifier(s.to_string()))
}

fn from_url(u: &url::Url) -> Option<VideoId> {
    let host = u.host_str()?;
    if !is_youtube_host(host) {
        return None;
    }

    // youtu.be/<id>
    if host.eq_ignore_ascii_case("youtu.be") {
        let seg = u.path_segments()?.next()?.trim();
        return is_token(seg).then(|| VideoId(seg.to_string()));
    }

    // youtube.com/watch?v=<id>
    if u.path().starts_with("/watch") {
        return u
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| is_token(v))
            .map(VideoId);
    }

    // youtube.com/shorts/<id>, /embed/<id>, /v/<id>
    let mut segs = u.path_segments()?;
    let a = segs.next().unwrap_or("");
    let b = segs.next().unwrap_or("").trim();
    if matches!(a, "shorts" | "embed" | "v") && is_token(b) {
        return Some(VideoId(b.to_string()));
    }

    None
}
