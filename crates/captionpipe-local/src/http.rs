//! HTTP transport shared by the watch-page source and the track fetcher.
//!
//! Two clients: one that never uses a proxy (not even a system one) and, when an
//! alternate egress point is configured, one that routes everything through it.

use crate::config::{HttpConfig, ProxyConfig};
use captionpipe_core::video_id::is_youtube_host;
use captionpipe_core::{Attempt, CaptionTrack, Egress, Error, Result, TrackFetcher};
use futures_util::StreamExt;
use reqwest::header;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpBody {
    pub final_url: String,
    pub status: u16,
    pub text: String,
    pub truncated: bool,
}

impl HttpBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    direct: reqwest::Client,
    proxied: Option<reqwest::Client>,
    accept_language: String,
    max_bytes: usize,
    /// Host of the watch page base URL; cookies may go there as well as to YouTube hosts.
    cookie_host: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &HttpConfig, proxy: Option<&ProxyConfig>) -> Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(cfg.user_agent.clone())
                .redirect(reqwest::redirect::Policy::limited(10))
                .connect_timeout(cfg.connect_timeout)
                .timeout(cfg.timeout)
        };

        let direct = builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::NotConfigured(format!("http client: {e}")))?;

        let proxied = match proxy {
            Some(p) => {
                // The reqwest error would carry the URL; report only the masked form.
                let proxy = reqwest::Proxy::all(p.url()).map_err(|_| {
                    Error::NotConfigured(format!("invalid proxy url: {}", p.masked()))
                })?;
                Some(
                    builder()
                        .proxy(proxy)
                        .build()
                        .map_err(|e| Error::NotConfigured(format!("http client: {e}")))?,
                )
            }
            None => None,
        };

        let cookie_host = url::Url::parse(&cfg.watch_base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));

        Ok(Self {
            direct,
            proxied,
            accept_language: cfg.accept_language.clone(),
            max_bytes: cfg.max_bytes,
            cookie_host,
        })
    }

    pub fn client(&self, egress: Egress) -> Result<&reqwest::Client> {
        match egress {
            Egress::Direct => Ok(&self.direct),
            Egress::Alternate => self
                .proxied
                .as_ref()
                .ok_or_else(|| Error::NotConfigured("alternate egress point".to_string())),
        }
    }

    fn cookie_allowed(&self, u: &url::Url) -> bool {
        let Some(host) = u.host_str() else {
            return false;
        };
        is_youtube_host(host)
            || self
                .cookie_host
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(host))
    }

    /// GET `url` through `egress`, reading at most `max_bytes` of body.
    ///
    /// Non-success statuses are returned, not mapped; callers classify them.
    pub async fn get(&self, url: &str, egress: Egress, cookies: Option<&str>) -> Result<HttpBody> {
        let parsed =
            url::Url::parse(url).map_err(|e| Error::Upstream(format!("bad request url: {e}")))?;
        let cookie = cookies.filter(|_| self.cookie_allowed(&parsed));
        let host = parsed.host_str().unwrap_or("").to_string();

        let mut rb = self
            .client(egress)?
            .get(parsed)
            .header(header::ACCEPT_LANGUAGE, self.accept_language.as_str());
        if let Some(c) = cookie {
            match header::HeaderValue::from_str(c) {
                Ok(mut v) => {
                    v.set_sensitive(true);
                    rb = rb.header(header::COOKIE, v);
                }
                Err(_) => warn!(host = %host, "cookie value is not a valid header; not sent"),
            }
        }

        let resp = rb.send().await.map_err(transport_error)?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();

        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport_error)?;
            if bytes.len().saturating_add(chunk.len()) > self.max_bytes {
                let can_take = self.max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(
            host = %host,
            egress = egress.as_str(),
            status,
            bytes = bytes.len(),
            truncated,
            "http get"
        );
        Ok(HttpBody {
            final_url,
            status,
            text: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
        })
    }
}

/// Request URLs can carry signed tokens; keep them out of error text.
fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Upstream("request timed out".to_string());
    }
    Error::Upstream(e.without_url().to_string())
}

/// Fetches raw caption content for a selected track.
#[derive(Debug, Clone)]
pub struct HttpTrackFetcher {
    transport: Arc<HttpTransport>,
}

impl HttpTrackFetcher {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl TrackFetcher for HttpTrackFetcher {
    async fn fetch_track(&self, track: &CaptionTrack, attempt: &Attempt) -> Result<String> {
        let body = self
            .transport
            .get(&track.url, attempt.egress, attempt.cookies.as_deref())
            .await?;
        if body.status == 429 {
            return Err(Error::RateLimited(
                "caption host returned HTTP 429".to_string(),
            ));
        }
        if !body.is_success() {
            return Err(Error::Upstream(format!(
                "caption host returned HTTP {}",
                body.status
            )));
        }
        if body.truncated {
            return Err(Error::Upstream(
                "caption track exceeded the response size limit".to_string(),
            ));
        }
        Ok(body.text)
    }
}
