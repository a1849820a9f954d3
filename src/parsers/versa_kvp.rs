//! Versa Networks KVP log format parser (spec.md §4.3 S1).
//!
//! Messages look like:
//! `2024-01-23T18:23:17+0000 accessLog, applianceName=Branch1, flowId=1113856942, action=allow`
//!
//! The leading `TIMESTAMP LOGTYPE` segment (whitespace-separated, ending at
//! the first comma) seeds `@timestamp` / `_log_type` / `versa_log_type`;
//! everything after is comma-separated `key=value` pairs, where a value may
//! be double-quoted and itself contain commas and escaped quotes.

use super::{Parser, ParseContext, META_PARSED_AT, META_PARSER};
use crate::error::ParseError;
use crate::event::{Event, Value};
use crate::model::ParseMode;

/// `flowId` coerces to an integer; any field ending in one of these suffixes
/// also coerces to an integer (spec.md §4.3: "flowId, *Port, *Octets,
/// *Packets, etc. -> integer").
const INTEGER_SUFFIXES: &[&str] = &["Port", "Octets", "Packets"];
const INTEGER_EXACT: &[&str] = &["flowId"];
/// `latency, jitter, loss -> float`.
const FLOAT_EXACT: &[&str] = &["latency", "jitter", "loss"];

pub struct VersaKvpParser;

impl Parser for VersaKvpParser {
    fn name(&self) -> &'static str {
        "parse_versa_kvp"
    }

    fn parse(&self, event: &mut Event, ctx: ParseContext) -> Result<(), ParseError> {
        let raw = event.raw().to_string();

        if let Some((timestamp, log_type)) = split_header(&raw) {
            event.set("@timestamp", timestamp.clone());
            event.set("_log_type", log_type.clone());
            event.set("versa_log_type", log_type);
        }

        let body = raw.splitn(2, ',').nth(1).unwrap_or("");
        let segments = split_respecting_quotes(body);

        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match parse_segment(segment) {
                Ok((key, value)) => {
                    let coerced = coerce(&key, &value);
                    event.set(key, coerced);
                }
                Err(err) => {
                    if ctx.mode == ParseMode::Strict {
                        return Err(err);
                    }
                    // Lenient: skip this segment, keep going.
                }
            }
        }

        event.set(META_PARSER, "versa_kvp");
        event.set(META_PARSED_AT, ctx.now.to_rfc3339());
        Ok(())
    }
}

/// Split the leading `TIMESTAMP LOGTYPE` header off a raw Versa line. The
/// header ends at the first comma; within it, the timestamp is the first
/// whitespace-delimited token and the log type is everything after.
fn split_header(raw: &str) -> Option<(String, String)> {
    let header = raw.split(',').next()?.trim();
    let (ts, log_type) = header.split_once(char::is_whitespace)?;
    let log_type = log_type.trim();
    if ts.is_empty() || log_type.is_empty() {
        return None;
    }
    Some((ts.to_string(), log_type.to_string()))
}

/// Parse one `key=value` segment, unquoting and unescaping a double-quoted
/// value. Returns an error (malformed segment) if there's no `=` or the
/// quoted value is unterminated.
fn parse_segment(segment: &str) -> Result<(String, String), ParseError> {
    let eq = segment
        .find('=')
        .ok_or_else(|| ParseError::MalformedSegment {
            offset: 0,
            message: format!("no '=' in segment {segment:?}"),
        })?;
    let key = segment[..eq].trim().to_string();
    let raw_value = segment[eq + 1..].trim();

    let value = if let Some(inner) = raw_value.strip_prefix('"') {
        let inner = inner.strip_suffix('"').ok_or_else(|| ParseError::MalformedSegment {
            offset: eq,
            message: format!("unterminated quoted value for key {key:?}"),
        })?;
        unescape(inner)
    } else {
        raw_value.to_string()
    };

    if key.is_empty() {
        return Err(ParseError::MalformedSegment {
            offset: 0,
            message: "empty key".to_string(),
        });
    }
    Ok((key, value))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split `body` on commas that are outside double-quoted spans, honoring
/// `\"` escapes inside quotes so a quoted value may itself contain commas.
fn split_respecting_quotes(body: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in body.chars() {
        if in_quotes {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_quotes = false;
            }
        } else if c == '"' {
            in_quotes = true;
            current.push(c);
        } else if c == ',' {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() || !segments.is_empty() {
        segments.push(current);
    }
    segments
}

fn coerce(key: &str, raw_value: &str) -> Value {
    let is_int = INTEGER_EXACT.contains(&key) || INTEGER_SUFFIXES.iter().any(|suf| key.ends_with(suf));
    if is_int {
        if let Ok(i) = raw_value.parse::<i64>() {
            return Value::Int(i);
        }
    }
    if FLOAT_EXACT.contains(&key) {
        if let Ok(f) = raw_value.parse::<f64>() {
            return Value::Float(f);
        }
    }
    Value::String(raw_value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx(mode: ParseMode) -> ParseContext {
        ParseContext { mode, now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() }
    }

    const S1_RAW: &str = "2024-01-23T18:23:17+0000 accessLog, applianceName=Branch1, flowId=1113856942, action=allow, sourceIPv4Address=10.43.199.110, destinationTransportPort=8443";

    #[test]
    fn s1_versa_scenario_parses_expected_fields() {
        let mut event = Event::from_raw(S1_RAW);
        VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient)).unwrap();
        assert_eq!(event.raw(), S1_RAW);
        assert_eq!(event.get("_parser").and_then(Value::as_str), Some("versa_kvp"));
        assert_eq!(event.get("versa_log_type").and_then(Value::as_str), Some("accessLog"));
        assert_eq!(event.get("applianceName").and_then(Value::as_str), Some("Branch1"));
        assert_eq!(event.get("flowId"), Some(&Value::Int(1113856942)));
        assert_eq!(event.get("action").and_then(Value::as_str), Some("allow"));
        assert_eq!(event.get("sourceIPv4Address").and_then(Value::as_str), Some("10.43.199.110"));
        assert_eq!(event.get("destinationTransportPort"), Some(&Value::Int(8443)));
        assert_eq!(event.get("@timestamp").and_then(Value::as_str), Some("2024-01-23T18:23:17+0000"));
    }

    #[test]
    fn quoted_value_may_contain_commas_and_escaped_quotes() {
        let raw = r#"2024-01-01T00:00:00Z sysLog, msg="hello, \"world\"", action=allow"#;
        let mut event = Event::from_raw(raw);
        VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient)).unwrap();
        assert_eq!(event.get("msg").and_then(Value::as_str), Some(r#"hello, "world""#));
        assert_eq!(event.get("action").and_then(Value::as_str), Some("allow"));
    }

    #[test]
    fn preserves_raw_unconditionally() {
        let raw = "2024-01-01T00:00:00Z sysLog, broken";
        let mut event = Event::from_raw(raw);
        let _ = VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient));
        assert_eq!(event.raw(), raw);
    }

    #[test]
    fn lenient_skips_malformed_segment() {
        let raw = "2024-01-01T00:00:00Z sysLog, noequalssign, action=allow";
        let mut event = Event::from_raw(raw);
        VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient)).unwrap();
        assert_eq!(event.get("action").and_then(Value::as_str), Some("allow"));
    }

    #[test]
    fn strict_fails_on_first_malformed_segment_but_keeps_raw() {
        let raw = "2024-01-01T00:00:00Z sysLog, noequalssign, action=allow";
        let mut event = Event::from_raw(raw);
        let result = VersaKvpParser.parse(&mut event, ctx(ParseMode::Strict));
        assert!(result.is_err());
        assert_eq!(event.raw(), raw);
        // The segment after the malformed one was never reached.
        assert!(event.get("action").is_none());
    }

    #[test]
    fn idempotent_on_repeated_parse() {
        let mut event = Event::from_raw(S1_RAW);
        VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient)).unwrap();
        let first = event.clone();
        VersaKvpParser.parse(&mut event, ctx(ParseMode::Lenient)).unwrap();
        assert_eq!(event, first);
    }
}
