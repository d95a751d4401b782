//! Strategy runner and fallback orchestration.
//!
//! Every strategy has the same shape, `{metadata source, track fetcher, egress}`, and
//! runs the same sequence: metadata -> track selection -> content -> parse. A failed
//! step ends that strategy only; the orchestrator then decides where to go next.
//!
//! Stages run strictly in order, cheapest and most exposed first:
//! `TryPrimary -> TryDirectProxied -> TryToolProxied -> Exhausted`.
//! Stages that need the alternate egress point or the external tool are skipped when
//! those are missing, never attempted.

use crate::cues::{parse_cues, Grammar};
use crate::tracks::{select_track, TrackPolicy};
use crate::{
    Attempt, Egress, Error, MetadataSource, Result, TrackFetcher, TranscriptResult, VideoId,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Strategy {
    name: &'static str,
    metadata: Arc<dyn MetadataSource>,
    content: Arc<dyn TrackFetcher>,
    egress: Egress,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("metadata", &self.metadata.name())
            .field("egress", &self.egress)
            .finish()
    }
}

impl Strategy {
    pub fn new(
        name: &'static str,
        metadata: Arc<dyn MetadataSource>,
        content: Arc<dyn TrackFetcher>,
        egress: Egress,
    ) -> Self {
        Self {
            name,
            metadata,
            content,
            egress,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn egress(&self) -> Egress {
        self.egress
    }

    pub fn available(&self) -> bool {
        self.metadata.available()
    }

    pub async fn run(
        &self,
        video_id: &VideoId,
        cookies: Option<&str>,
        policy: &TrackPolicy,
    ) -> Result<TranscriptResult> {
        let attempt = Attempt {
            video_id: video_id.clone(),
            egress: self.egress,
            cookies: cookies.map(str::to_string),
        };

        let meta = self.metadata.metadata(&attempt).await?;
        if meta.tracks.is_empty() {
            return Err(Error::NoCaptionsAvailable);
        }
        debug!(
            video_id = %video_id,
            strategy = self.name,
            manual = ?meta.tracks.manual.keys().collect::<Vec<_>>(),
            automatic = meta.tracks.automatic.len(),
            "caption tracks enumerated"
        );

        let track = select_track(&meta.tracks, policy)?;
        info!(
            video_id = %video_id,
            strategy = self.name,
            language = %track.language_code,
            origin = ?track.origin,
            format = track.format.as_str(),
            "caption track selected"
        );

        let raw = self.content.fetch_track(track, &attempt).await?;
        let segments = parse_cues(&raw, Grammar::for_format(&track.format, &raw))?;

        Ok(TranscriptResult {
            video_id: video_id.clone(),
            title: meta.title,
            duration_seconds: meta.duration_seconds,
            language: track.language_code.clone(),
            segments,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TryPrimary,
    TryDirectProxied,
    TryToolProxied,
    Exhausted,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TryPrimary => "try_primary",
            Self::TryDirectProxied => "try_direct_proxied",
            Self::TryToolProxied => "try_tool_proxied",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationPolicy {
    pub egress_configured: bool,
    /// Skip the unproxied primary attempt entirely.
    pub force_proxied: bool,
}

impl EscalationPolicy {
    pub fn initial(&self) -> Stage {
        if self.force_proxied {
            Stage::TryDirectProxied
        } else {
            Stage::TryPrimary
        }
    }

    /// Stage after `stage` failed or was skipped.
    pub fn next(&self, stage: Stage) -> Stage {
        match stage {
            Stage::TryPrimary if self.egress_configured => Stage::TryDirectProxied,
            Stage::TryPrimary | Stage::TryDirectProxied => Stage::TryToolProxied,
            Stage::TryToolProxied | Stage::Exhausted => Stage::Exhausted,
        }
    }
}

/// A successful acquisition and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquired {
    pub transcript: TranscriptResult,
    pub strategy: &'static str,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    primary: Strategy,
    direct_proxied: Strategy,
    tool_proxied: Option<Strategy>,
    escalation: EscalationPolicy,
    tracks: TrackPolicy,
}

impl Orchestrator {
    /// Wire the three strategies from shared sources.
    ///
    /// The page source and track fetcher back both direct strategies (with and without
    /// the alternate egress); the optional tool source backs the last one.
    pub fn new(
        page: Arc<dyn MetadataSource>,
        content: Arc<dyn TrackFetcher>,
        tool: Option<Arc<dyn MetadataSource>>,
        escalation: EscalationPolicy,
        tracks: TrackPolicy,
    ) -> Self {
        Self {
            primary: Strategy::new("direct", page.clone(), content.clone(), Egress::Direct),
            direct_proxied: Strategy::new(
                "direct_proxied",
                page,
                content.clone(),
                Egress::Alternate,
            ),
            tool_proxied: tool
                .map(|t| Strategy::new("tool_proxied", t, content, Egress::Alternate)),
            escalation,
            tracks,
        }
    }

    pub fn escalation(&self) -> EscalationPolicy {
        self.escalation
    }

    pub fn tool_available(&self) -> bool {
        self.tool_proxied.as_ref().is_some_and(Strategy::available)
    }

    /// The strategy for `stage`, or why it cannot run.
    fn runnable(&self, stage: Stage) -> Result<&Strategy> {
        match stage {
            Stage::TryPrimary => Ok(&self.primary),
            Stage::TryDirectProxied => {
                if self.escalation.egress_configured {
                    Ok(&self.direct_proxied)
                } else {
                    Err(Error::NotConfigured("alternate egress point".to_string()))
                }
            }
            Stage::TryToolProxied => {
                let Some(tool) = self.tool_proxied.as_ref() else {
                    return Err(Error::ToolUnavailable("no external tool configured".to_string()));
                };
                if !tool.available() {
                    return Err(Error::ToolUnavailable(format!(
                        "{} is disabled or not installed",
                        tool.metadata.name()
                    )));
                }
                if !self.escalation.egress_configured {
                    return Err(Error::NotConfigured("alternate egress point".to_string()));
                }
                Ok(tool)
            }
            Stage::Exhausted => Err(Error::NotConfigured("no stage left".to_string())),
        }
    }

    pub async fn run(&self, video_id: &VideoId, cookies: Option<&str>) -> Result<Acquired> {
        let mut stage = self.escalation.initial();
        let mut last: Option<Error> = None;
        let mut no_caption_reports = 0usize;

        while stage != Stage::Exhausted {
            let strategy = match self.runnable(stage) {
                Ok(s) => s,
                Err(reason) => {
                    debug!(video_id = %video_id, stage = stage.as_str(), reason = %reason, "stage skipped");
                    if last.is_none() {
                        last = Some(reason);
                    }
                    stage = self.escalation.next(stage);
                    continue;
                }
            };

            let t0 = Instant::now();
            match strategy.run(video_id, cookies, &self.tracks).await {
                Ok(transcript) => {
                    info!(
                        video_id = %video_id,
                        strategy = strategy.name(),
                        segments = transcript.segments.len(),
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "transcript acquired"
                    );
                    return Ok(Acquired {
                        transcript,
                        strategy: strategy.name(),
                    });
                }
                Err(e) => {
                    warn!(
                        video_id = %video_id,
                        strategy = strategy.name(),
                        code = e.code().as_str(),
                        error = %e,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "strategy failed"
                    );
                    let terminal = match &e {
                        Error::InvalidIdentifier(_) => true,
                        // Confirmed by a second, differently-enumerating strategy.
                        Error::NoCaptionsAvailable => {
                            no_caption_reports += 1;
                            no_caption_reports >= 2
                        }
                        _ => false,
                    };
                    if e.is_block() {
                        info!(video_id = %video_id, "upstream looks blocked; escalating");
                    }
                    last = Some(e);
                    stage = if terminal {
                        Stage::Exhausted
                    } else {
                        self.escalation.next(stage)
                    };
                }
            }
        }

        let last = last.unwrap_or_else(|| Error::NotConfigured("no strategy could run".to_string()));
        warn!(video_id = %video_id, code = last.code().as_str(), "all strategies exhausted");
        Err(Error::Exhausted {
            last: Box::new(last),
        })
    }
}
