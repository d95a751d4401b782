use captionpipe_core::ErrorCode;
use serde::Serialize;

pub(crate) const SCHEMA_VERSION: u64 = 1;

pub(crate) fn error_hint(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::InvalidIdentifier => {
            "Pass an 11-character video id or a watch / youtu.be / shorts / embed URL."
        }
        ErrorCode::BotChallenge => {
            "The upstream asked for human verification. Configure an alternate egress point (CAPTIONPIPE_PROXY_URL) and retry."
        }
        ErrorCode::ConsentRequired => {
            "The upstream requires session consent or sign-in (age-restricted videos included). Supply a signed-in session cookie (--cookies or CAPTIONPIPE_COOKIES)."
        }
        ErrorCode::RateLimited => {
            "The upstream throttled this egress point. Retry later or configure an alternate egress point."
        }
        ErrorCode::VideoUnavailable => "The video is private, removed or otherwise unplayable.",
        ErrorCode::NoCaptions => "This video has no caption tracks.",
        ErrorCode::NoCompatibleTrack => {
            "Caption tracks exist but none match the language priorities (CAPTIONPIPE_LANGS) in a fetchable format."
        }
        ErrorCode::NoCuesParsed => "Caption content was fetched but contained no usable cues.",
        ErrorCode::MalformedTimestamp => "Caption content had malformed timing lines.",
        ErrorCode::ToolUnavailable => {
            "yt-dlp is not installed or disabled (CAPTIONPIPE_YTDLP / CAPTIONPIPE_YTDLP_BIN)."
        }
        ErrorCode::Exhausted => "Every acquisition strategy failed; see message for the last failure.",
        ErrorCode::CacheError => "The transcript cache could not be read or written (CAPTIONPIPE_CACHE_DIR).",
        ErrorCode::NotConfigured => "Check the CAPTIONPIPE_* configuration.",
        ErrorCode::UpstreamError => "The upstream request failed; retrying may help.",
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}

pub(crate) fn error_obj(code: ErrorCode, message: impl ToString) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: &'static str,
        retryable: bool,
        http_status: u16,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: message.to_string(),
        hint: error_hint(code),
        retryable: code.retryable(),
        http_status: code.http_status(),
    };
    match serde_json::to_value(e) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": error_hint(code),
            "retryable": code.retryable(),
            "http_status": code.http_status(),
        }),
    }
}

/// `{ok: false, error: {...}}` for a pipeline failure, using its effective code.
pub(crate) fn failure(err: &captionpipe_core::Error) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "error": error_obj(err.effective_code(), err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use captionpipe_core::Error;

    #[test]
    fn exhausted_bot_challenge_surfaces_as_verification_required() {
        let err = Error::Exhausted {
            last: Box::new(Error::BotChallenge("Sign in to confirm".to_string())),
        };
        let v = failure(&err);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "bot_challenge");
        assert_eq!(v["error"]["http_status"], 503);
        assert_eq!(v["error"]["retryable"], true);
        assert!(v["error"]["hint"]
            .as_str()
            .unwrap()
            .contains("CAPTIONPIPE_PROXY_URL"));
        assert!(v["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Sign in to confirm"));
    }

    #[test]
    fn age_gate_surfaces_as_consent_with_cookie_hint() {
        let v = failure(&Error::ConsentRequired(
            "Sign in to confirm your age".to_string(),
        ));
        assert_eq!(v["error"]["code"], "consent_required");
        assert_eq!(v["error"]["http_status"], 403);
        let hint = v["error"]["hint"].as_str().unwrap();
        assert!(hint.contains("age-restricted"));
        assert!(hint.contains("--cookies"));
    }

    #[test]
    fn envelope_fields_are_added() {
        let mut v = serde_json::json!({"ok": true});
        add_envelope_fields(&mut v, "status", 7);
        assert_eq!(v["schema_version"], SCHEMA_VERSION);
        assert_eq!(v["kind"], "status");
        assert_eq!(v["elapsed_ms"], 7);
    }
}
