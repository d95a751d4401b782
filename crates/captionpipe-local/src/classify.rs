//! Free-text failure messages to the closed error taxonomy.
//!
//! Only used at boundaries whose own errors are unstructured text: yt-dlp stderr and the
//! `playabilityStatus.reason` strings of the watch page. Everything past this point
//! matches on `Error` variants.

use captionpipe_core::Error;

const MAX_MESSAGE_CHARS: usize = 300;

pub fn classify_message(msg: &str) -> Error {
    let summary = summarize(msg);
    let m = msg.to_lowercase();

    // Age checks also start with "Sign in to confirm", so they go first.
    if m.contains("consent")
        || m.contains("age-restricted")
        || m.contains("confirm your age")
        || m.contains("inappropriate for some users")
    {
        Error::ConsentRequired(summary)
    } else if m.contains("not a bot") || m.contains("sign in to confirm") || m.contains("captcha") {
        Error::BotChallenge(summary)
    } else if m.contains("http error 429") || m.contains("too many requests") {
        Error::RateLimited(summary)
    } else if m.contains("video unavailable")
        || m.contains("private video")
        || m.contains("video is private")
        || m.contains("has been removed")
        || m.contains("is not available")
        || m.contains("does not exist")
    {
        Error::VideoUnavailable(summary)
    } else if m.contains("no captions") || m.contains("no subtitles") {
        Error::NoCaptionsAvailable
    } else {
        Error::Upstream(summary)
    }
}

/// Last meaningful line (yt-dlp prints its `ERROR:` line last), bounded in length.
fn summarize(msg: &str) -> String {
    let line = msg
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| msg.lines().rev().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("");
    let line = line.strip_prefix("ERROR:").unwrap_or(line).trim();
    if line.chars().count() > MAX_MESSAGE_CHARS {
        let mut s: String = line.chars().take(MAX_MESSAGE_CHARS).collect();
        s.push('…');
        s
    } else {
        line.to_string()
    }
}
