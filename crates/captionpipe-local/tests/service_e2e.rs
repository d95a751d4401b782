use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use captionpipe_core::{CachePolicy, Error, ErrorCode, FetchSource};
use captionpipe_local::{CacheConfig, HttpConfig, PipelineConfig, ProxyConfig, ToolConfig, TranscriptService};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ID: &str = "dQw4w9WgXcQ";

const VTT: &str = "WEBVTT\nKind: captions\nLanguage: en\n\n00:00:00.000 --> 00:00:05.000\nNever gonna &amp; give\n\n00:00:05.000 --> 00:00:10.000 align:start\n<c>you</c> up\n\n00:00:10.000 --> 00:00:12.000\n<c>you</c> up\n";

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    Bot,
    ConsentUnlessCookie,
}

#[derive(Clone)]
struct Fixture {
    mode: Mode,
    /// Absolute base the page advertises for caption URLs.
    caption_base: String,
    watch_hits: Arc<AtomicUsize>,
    proxy_auth_seen: Arc<AtomicUsize>,
}

fn player_response(caption_base: &str) -> String {
    serde_json::json!({
        "playabilityStatus": {"status": "OK"},
        "videoDetails": {"videoId": ID, "title": "Fixture video", "lengthSeconds": "12"},
        "captions": {"playerCaptionsTracklistRenderer": {"captionTracks": [
            {
                "baseUrl": format!("{caption_base}/api/timedtext?v={ID}&lang=en&kind=asr"),
                "name": {"simpleText": "English (auto-generated)"},
                "languageCode": "en",
                "kind": "asr"
            },
            {
                "baseUrl": format!("{caption_base}/api/timedtext?v={ID}&lang=en-US"),
                "name": {"simpleText": "English (United States)"},
                "languageCode": "en-US"
            }
        ]}}
    })
    .to_string()
}

async fn watch(
    State(f): State<Fixture>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    f.watch_hits.fetch_add(1, Ordering::SeqCst);
    if headers.contains_key(header::PROXY_AUTHORIZATION) {
        f.proxy_auth_seen.fetch_add(1, Ordering::SeqCst);
    }
    if q.get("v").map(String::as_str) != Some(ID) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let has_consent = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains("CONSENT=YES"));
    let html = match f.mode {
        Mode::Bot => "<html><body>Sign in to confirm you’re not a bot</body></html>".to_string(),
        Mode::ConsentUnlessCookie if !has_consent => {
            "<html><form action=\"https://consent.youtube.com/save\" method=\"POST\"></form></html>"
                .to_string()
        }
        _ => format!(
            "<html><script>var ytInitialPlayerResponse = {};var meta = 1;</script></html>",
            player_response(&f.caption_base)
        ),
    };
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
}

async fn timedtext(Query(q): Query<HashMap<String, String>>) -> Response {
    if q.get("fmt").map(String::as_str) != Some("vtt") {
        return (StatusCode::BAD_REQUEST, "fmt=vtt expected").into_response();
    }
    match q.get("lang").map(String::as_str) {
        Some("en-US") => ([(header::CONTENT_TYPE, "text/vtt")], VTT).into_response(),
        _ => (StatusCode::NOT_FOUND, "").into_response(),
    }
}

async fn serve(mode: Mode, caption_base: Option<&str>) -> (SocketAddr, Fixture) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fixture = Fixture {
        mode,
        caption_base: caption_base
            .map(str::to_string)
            .unwrap_or_else(|| format!("http://{addr}")),
        watch_hits: Arc::new(AtomicUsize::new(0)),
        proxy_auth_seen: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/watch", get(watch))
        .route("/api/timedtext", get(timedtext))
        .with_state(fixture.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, fixture)
}

fn config(watch_base: &str, cache_dir: Option<std::path::PathBuf>) -> PipelineConfig {
    PipelineConfig {
        tool: ToolConfig {
            enabled: false,
            ..ToolConfig::default()
        },
        http: HttpConfig {
            watch_base_url: watch_base.to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..HttpConfig::default()
        },
        cache: CacheConfig {
            dir: cache_dir,
            ttl: Duration::from_secs(3600),
        },
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn direct_fetch_then_cache_hit() {
    let (addr, fixture) = serve(Mode::Normal, None).await;
    let tmp = tempfile::tempdir().unwrap();
    let svc = TranscriptService::new(config(
        &format!("http://{addr}"),
        Some(tmp.path().to_path_buf()),
    ))
    .unwrap();

    let url = format!("https://www.youtube.com/watch?v={ID}");
    let first = svc
        .fetch_detailed(&url, None, CachePolicy::default())
        .await
        .unwrap();
    assert_eq!(first.source, FetchSource::Network);
    assert_eq!(first.strategy, Some("direct"));

    let t = &first.transcript;
    assert_eq!(t.video_id.as_str(), ID);
    assert_eq!(t.title.as_deref(), Some("Fixture video"));
    assert_eq!(t.duration_seconds, Some(12.0));
    // Manual en-US beats automatic en.
    assert_eq!(t.language, "en-US");
    // Markup stripped, entities decoded, consecutive duplicate collapsed.
    let texts: Vec<&str> = t.segments.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, ["Never gonna & give", "you up"]);
    assert_eq!(t.segments[1].start_seconds, 5.0);
    assert_eq!(t.segments[1].duration_seconds, 5.0);

    let second = svc.fetch(ID, None).await.unwrap();
    assert_eq!(&second, t);
    let third = svc
        .fetch_detailed(ID, None, CachePolicy::default())
        .await
        .unwrap();
    assert_eq!(third.source, FetchSource::Cache);
    assert_eq!(fixture.watch_hits.load(Ordering::SeqCst), 1);

    let stats = svc.cache_stats().await.unwrap().unwrap();
    assert_eq!(stats.entries, 1);
    assert!(stats.bytes > 0);
}

#[tokio::test]
async fn bot_challenge_without_egress_is_exhausted_verification_required() {
    let (addr, fixture) = serve(Mode::Bot, None).await;
    let svc = TranscriptService::new(config(&format!("http://{addr}"), None)).unwrap();

    let err = svc.fetch(ID, None).await.unwrap_err();
    assert!(matches!(err, Error::Exhausted { .. }));
    assert!(matches!(err.root_cause(), Error::BotChallenge(_)));
    assert_eq!(err.effective_code(), ErrorCode::BotChallenge);
    assert_eq!(err.effective_code().http_status(), 503);
    // Only the primary strategy ran.
    assert_eq!(fixture.watch_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn consent_wall_is_lifted_by_request_cookies() {
    let (addr, _fixture) = serve(Mode::ConsentUnlessCookie, None).await;
    let svc = TranscriptService::new(config(&format!("http://{addr}"), None)).unwrap();

    let err = svc.fetch(ID, None).await.unwrap_err();
    assert_eq!(err.effective_code(), ErrorCode::ConsentRequired);

    let ok = svc.fetch(ID, Some("CONSENT=YES+cb")).await.unwrap();
    assert_eq!(ok.segments.len(), 2);
}

#[tokio::test]
async fn configured_default_cookies_are_used() {
    let (addr, _fixture) = serve(Mode::ConsentUnlessCookie, None).await;
    let mut cfg = config(&format!("http://{addr}"), None);
    cfg.cookies = Some("CONSENT=YES+cb".to_string());
    let svc = TranscriptService::new(cfg).unwrap();
    assert!(svc.fetch(ID, None).await.is_ok());
}

#[tokio::test]
async fn direct_failure_escalates_through_the_alternate_egress() {
    // The direct path points at a closed port; the proxy is the fixture, which serves
    // absolute-form requests by path.
    let dead = "http://127.0.0.1:1";
    let (addr, fixture) = serve(Mode::Normal, Some(dead)).await;
    let mut cfg = config(dead, None);
    cfg.proxy = Some(ProxyConfig::parse(&format!("http://user:pw@{addr}")).unwrap());
    let svc = TranscriptService::new(cfg).unwrap();

    let got = svc
        .fetch_detailed(ID, None, CachePolicy::default())
        .await
        .unwrap();
    assert_eq!(got.strategy, Some("direct_proxied"));
    assert_eq!(got.transcript.language, "en-US");
    assert_eq!(fixture.watch_hits.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.proxy_auth_seen.load(Ordering::SeqCst), 1);

    let status = svc.status();
    assert!(status.alternate_egress_configured);
    assert_eq!(
        status.alternate_egress,
        Some(format!("http://***:***@{addr}"))
    );
}

#[tokio::test]
async fn force_proxied_skips_the_direct_attempt() {
    let (direct_addr, direct) = serve(Mode::Normal, None).await;
    let (proxy_addr, proxy) = serve(Mode::Normal, Some(&format!("http://{direct_addr}"))).await;
    let mut cfg = config(&format!("http://{direct_addr}"), None);
    cfg.proxy = Some(ProxyConfig::parse(&format!("http://{proxy_addr}")).unwrap());
    cfg.force_proxied = true;
    let svc = TranscriptService::new(cfg).unwrap();

    let got = svc
        .fetch_detailed(ID, None, CachePolicy::default())
        .await
        .unwrap();
    assert_eq!(got.strategy, Some("direct_proxied"));
    assert_eq!(direct.watch_hits.load(Ordering::SeqCst), 0);
    assert_eq!(proxy.watch_hits.load(Ordering::SeqCst), 1);
}
