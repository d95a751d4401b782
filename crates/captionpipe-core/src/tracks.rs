//! Caption track selection.
//!
//! First match wins:
//! 1. manual tracks, by explicit language priority;
//! 2. manual tracks, any other code with the regional prefix (e.g. `en-`);
//! 3. automatic tracks, by their own priority (which leads with the original-language
//!    pseudo-code such as `en-orig`).
//!
//! Within the chosen language, cue-block format beats line-numbered format, and tracks
//! delivered in chunks (HLS/DASH) are never chosen.

use crate::{CaptionTrack, Error, Result, TrackFormat, TrackSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPolicy {
    pub manual_languages: Vec<String>,
    pub automatic_languages: Vec<String>,
    pub regional_prefix: String,
}

impl Default for TrackPolicy {
    fn default() -> Self {
        Self {
            manual_languages: to_strings(&["en-US", "en-GB", "en-CA", "en"]),
            automatic_languages: to_strings(&["en-orig", "en-US", "en-GB", "en-CA", "en"]),
            regional_prefix: "en-".to_string(),
        }
    }
}

fn to_strings(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

impl TrackPolicy {
    /// Build a policy from an ordered language list such as `["de-DE", "de"]`.
    ///
    /// The first generic code (no region) supplies the regional prefix and the
    /// `<code>-orig` pseudo-code that leads the automatic list. Returns the default
    /// policy for an empty list.
    pub fn for_languages(langs: &[String]) -> Self {
        let langs: Vec<String> = langs
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if langs.is_empty() {
            return Self::default();
        }
        let base = langs
            .iter()
            .find(|l| !l.contains('-'))
            .cloned()
            .unwrap_or_else(|| {
                langs[0]
                    .split('-')
                    .next()
                    .unwrap_or(&langs[0])
                    .to_string()
            });
        let mut automatic = vec![format!("{base}-orig")];
        automatic.extend(langs.iter().cloned());
        Self {
            manual_languages: langs,
            automatic_languages: automatic,
            regional_prefix: format!("{base}-"),
        }
    }
}

pub fn select_track<'a>(tracks: &'a TrackSet, policy: &TrackPolicy) -> Result<&'a CaptionTrack> {
    let candidates = pick_language(tracks, policy).ok_or(Error::NoCompatibleTrack)?;
    pick_format(candidates).ok_or(Error::NoCompatibleTrack)
}

fn pick_language<'a>(tracks: &'a TrackSet, policy: &TrackPolicy) -> Option<&'a [CaptionTrack]> {
    let non_empty = |v: &'a Vec<CaptionTrack>| (!v.is_empty()).then_some(v.as_slice());

    for lang in &policy.manual_languages {
        if let Some(v) = tracks.manual.get(lang).and_then(non_empty) {
            return Some(v);
        }
    }

    for (code, v) in &tracks.manual {
        if code.starts_with(&policy.regional_prefix) && !policy.manual_languages.contains(code) {
            if let Some(v) = non_empty(v) {
                return Some(v);
            }
        }
    }

    for lang in &policy.automatic_languages {
        if let Some(v) = tracks.automatic.get(lang).and_then(non_empty) {
            return Some(v);
        }
    }

    None
}

fn pick_format(candidates: &[CaptionTrack]) -> Option<&CaptionTrack> {
    for fmt in [TrackFormat::Vtt, TrackFormat::Srt] {
        if let Some(t) = candidates
            .iter()
            .find(|t| !t.is_chunked() && t.format == fmt)
        {
            return Some(t);
        }
    }
    candidates.iter().find(|t| !t.is_chunked())
}
