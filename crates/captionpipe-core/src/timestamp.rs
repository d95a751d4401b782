//! Caption clock values to seconds.

use crate::{Error, Result};

/// Parse `HH:MM:SS.mmm` or `MM:SS.mmm` into seconds.
///
/// Both `.` and `,` are accepted as the decimal separator. Only the seconds group may
/// carry a fraction.
pub fn parse_timestamp(s: &str) -> Result<f64> {
    let raw = s.trim();
    let norm = raw.replace(',', ".");
    let groups: Vec<&str> = norm.split(':').collect();
    let malformed = || Error::MalformedTimestamp(raw.to_string());

    let (whole, secs) = match groups.as_slice() {
        [h, m, s] => (vec![*h, *m], *s),
        [m, s] => (vec![*m], *s),
        _ => return Err(malformed()),
    };

    let mut total = 0.0;
    for g in whole {
        if g.is_empty() || !g.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let n: u64 = g.parse().map_err(|_| malformed())?;
        total = total * 60.0 + n as f64;
    }

    if secs.is_empty()
        || secs.starts_with('.')
        || secs.matches('.').count() > 1
        || !secs.bytes().all(|b| b.is_ascii_digit() || b == b'.')
    {
        return Err(malformed());
    }
    let secs: f64 = secs.parse().map_err(|_| malformed())?;
    let value = total * 60.0 + secs;
    if !value.is_finite() {
        return Err(malformed());
    }
    Ok(value)
}

/// Parse a `start --> end [settings]` timing line.
///
/// Returns `None` when the line is not a timing line at all: no arrow, or an arrow with
/// no clock value on either side (caption text such as `step one --> step two`).
pub(crate) fn parse_timing_line(line: &str) -> Option<Result<(f64, f64)>> {
    let (left, right) = line.split_once("-->")?;
    let end = right.split_whitespace().next().unwrap_or("");
    match (parse_timestamp(left), parse_timestamp(end)) {
        (Ok(start), Ok(end)) => Some(Ok((start, end))),
        (Err(_), Err(_)) => None,
        (Err(e), _) | (_, Err(e)) => Some(Err(e)),
    }
}
