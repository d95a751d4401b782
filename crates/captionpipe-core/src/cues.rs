//! Caption content to normalized cues.
//!
//! Two grammars share one output shape:
//! - cue-block (WebVTT): timing lines open cues; text lines accumulate until a blank line.
//! - block style (SubRip): blank-line separated blocks of `index / timing / text...`.
//!
//! Parsing is best-effort. Upstream caption files are not schema-validated and vary by
//! platform revision, so malformed timing lines and misshapen blocks are skipped rather
//! than failing the whole file. Only an empty final result is an error.

use crate::timestamp::parse_timing_line;
use crate::{Cue, Error, Result, TrackFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    CueBlock,
    Numbered,
}

impl Grammar {
    /// Grammar for a track's declared format, sniffing the content for unknown formats.
    pub fn for_format(format: &TrackFormat, content: &str) -> Self {
        match format {
            TrackFormat::Vtt => Self::CueBlock,
            TrackFormat::Srt => Self::Numbered,
            TrackFormat::Other(_) => Self::sniff(content),
        }
    }

    pub fn sniff(content: &str) -> Self {
        if strip_bom(content).trim_start().starts_with("WEBVTT") {
            Self::CueBlock
        } else {
            Self::Numbered
        }
    }
}

pub fn parse_cues(content: &str, grammar: Grammar) -> Result<Vec<Cue>> {
    let content = strip_bom(content);
    let cues = match grammar {
        Grammar::CueBlock => parse_cue_blocks(content),
        Grammar::Numbered => parse_numbered_blocks(content),
    };
    if cues.is_empty() {
        return Err(Error::NoCuesParsed);
    }
    Ok(cues)
}

fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

/// Remove `<...>` markup, decode entities and collapse whitespace.
fn clean_text(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = html_escape::decode_html_entities(&out);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Append `cue` unless its text repeats the previous cue (rolling auto-caption redraws).
fn push_dedup(out: &mut Vec<Cue>, start: f64, end: f64, lines: &[String]) {
    let text = lines.join(" ").trim().to_string();
    if text.is_empty() {
        return;
    }
    if out.last().is_some_and(|prev| prev.text == text) {
        return;
    }
    out.push(Cue {
        text,
        start_seconds: start.max(0.0),
        duration_seconds: (end - start).max(0.0),
    });
}

struct OpenCue {
    start: f64,
    end: f64,
    lines: Vec<String>,
    accepting: bool,
}

fn parse_cue_blocks(content: &str) -> Vec<Cue> {
    let mut out = Vec::new();
    let mut open: Option<OpenCue> = None;
    // NOTE / STYLE / REGION blocks run until the next blank line.
    let mut skipping_block = false;

    for raw in content.lines() {
        let line = raw.trim();

        if line.is_empty() {
            skipping_block = false;
            if let Some(cue) = open.as_mut() {
                cue.accepting = false;
            }
            continue;
        }
        if skipping_block {
            continue;
        }

        if let Some(timing) = parse_timing_line(line) {
            if let Some(cue) = open.take() {
                push_dedup(&mut out, cue.start, cue.end, &cue.lines);
            }
            match timing {
                Ok((start, end)) => {
                    open = Some(OpenCue {
                        start,
                        end,
                        lines: Vec::new(),
                        accepting: true,
                    });
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping cue with malformed timing line");
                }
            }
            continue;
        }

        if line.starts_with("WEBVTT") {
            continue;
        }
        if open.is_none()
            && (line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION"))
        {
            skipping_block = true;
            continue;
        }

        if let Some(cue) = open.as_mut().filter(|c| c.accepting) {
            let text = clean_text(line);
            if !text.is_empty() {
                cue.lines.push(text);
            }
        }
    }

    if let Some(cue) = open.take() {
        push_dedup(&mut out, cue.start, cue.end, &cue.lines);
    }
    out
}

fn parse_numbered_blocks(content: &str) -> Vec<Cue> {
    fn flush(block: &mut Vec<&str>, out: &mut Vec<Cue>) {
        if block.len() >= 3 {
            match parse_timing_line(block[1]) {
                Some(Ok((start, end))) => {
                    let lines: Vec<String> = block[2..]
                        .iter()
                        .map(|l| clean_text(l))
                        .filter(|l| !l.is_empty())
                        .collect();
                    push_dedup(out, start, end, &lines);
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "skipping block with malformed timing line");
                }
                None => {}
            }
        }
        block.clear();
    }

    let mut out = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut block, &mut out);
        } else {
            block.push(line);
        }
    }
    flush(&mut block, &mut out);
    out
}
