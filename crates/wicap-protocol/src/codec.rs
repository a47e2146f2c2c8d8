//! Status encoding and request query parsing.
//!
//! Query pairs arrive already URL-decoded. Numbers follow C `strtol` conventions for numbers: leading
//! whitespace and a sign are accepted, parsing stops at the first non-digit,
//! and a value with no digits at all is ignored.

use thiserror::Error;
use wicap_core::{ParamId, ParamKind, ParamTable};

use crate::messages::StatusReport;

/// Errors that can occur while encoding a response.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize status: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// Encode the status report as `{"state":1,"nsamp":1000,...}`.
pub fn encode_status(report: &StatusReport) -> Result<String, CodecError> {
    serde_json::to_string(report).map_err(CodecError::from)
}

/// Parse a base-10 integer prefix. Returns `None` if no digits are present.
pub fn strtol(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .collect::<Vec<_>>();
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits.iter().fold(0i64, |acc, d| {
        acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

/// First non-empty value for `name`. Later repeats of a key are ignored.
fn query_var<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

/// Apply decoded query pairs to the parameter table.
///
/// Only value and command parameters are updated; unknown keys and
/// non-numeric values are ignored. Returns the command code if `cmd` was
/// present with a number.
pub fn parse_query(pairs: &[(String, String)], params: &mut ParamTable) -> Option<i64> {
    let mut command = None;
    for id in ParamId::ALL {
        let kind = id.kind();
        if !matches!(kind, ParamKind::Value | ParamKind::Command) {
            continue;
        }
        let Some(value) = query_var(pairs, id.name()).and_then(strtol) else {
            continue;
        };
        params.set_value(id, value);
        if kind == ParamKind::Command {
            command = Some(value);
        }
    }
    command
}
