//! PII redaction (spec.md §4.7 `redact_pii` stage).
//!
//! Applies pattern-based replacement over every string value in an event,
//! recursively through nested maps. `_raw` is never touched — redaction
//! operates only on structured fields so the original message stays
//! available for audit, mirroring the parsers' `_raw`-preservation
//! invariant.

use crate::event::{Event, Value};
use regex::Regex;
use std::sync::OnceLock;

/// One recognizable PII pattern and the typed token used to replace it when
/// `typed_tokens` is enabled.
struct PiiPattern {
    regex: &'static Regex,
    typed_token: &'static str,
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static regex")
    })
}

fn credit_card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d[ -]?){13,16}\b").expect("static regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b").expect("static regex")
    })
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("static regex"))
}

fn ipv6_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{0,4}\b").expect("static regex"))
}

fn patterns() -> [PiiPattern; 6] {
    [
        PiiPattern { regex: ssn_re(), typed_token: "[SSN]" },
        PiiPattern { regex: email_re(), typed_token: "[EMAIL]" },
        PiiPattern { regex: credit_card_re(), typed_token: "[CREDIT_CARD]" },
        PiiPattern { regex: phone_re(), typed_token: "[PHONE]" },
        PiiPattern { regex: ipv6_re(), typed_token: "[IPV6]" },
        PiiPattern { regex: ipv4_re(), typed_token: "[IPV4]" },
    ]
}

/// Redact every string value reachable from `event`'s structured fields
/// (never `_raw`). `token` is the replacement used when `typed_tokens` is
/// false; otherwise each pattern uses its own typed token (`[SSN]`, `[EMAIL]`, ...).
pub fn redact_event(event: &mut Event, token: &str, typed_tokens: bool) {
    let keys: Vec<String> = event.iter().map(|(k, _)| k.clone()).collect();
    for key in keys {
        if key == crate::event::RAW_FIELD {
            continue;
        }
        if let Some(value) = event.get_mut(&key) {
            redact_value(value, token, typed_tokens);
        }
    }
}

fn redact_value(value: &mut Value, token: &str, typed_tokens: bool) {
    match value {
        Value::String(s) => *s = redact_string(s, token, typed_tokens),
        Value::Map(map) => {
            for v in map.values_mut() {
                redact_value(v, token, typed_tokens);
            }
        }
        _ => {}
    }
}

fn redact_string(input: &str, token: &str, typed_tokens: bool) -> String {
    let mut out = input.to_string();
    for pattern in patterns() {
        let replacement = if typed_tokens { pattern.typed_token } else { token };
        out = pattern.regex.replace_all(&out, replacement).into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_ssn_email_and_ip_with_default_token() {
        let mut event = Event::from_raw("raw, never touched: 123-45-6789");
        event.set("message", "ssn 123-45-6789 email a@b.com ip 10.0.0.1");
        redact_event(&mut event, "[REDACTED]", false);
        let message = event.get("message").and_then(Value::as_str).unwrap();
        assert!(!message.contains("123-45-6789"));
        assert!(!message.contains("a@b.com"));
        assert!(!message.contains("10.0.0.1"));
        assert!(message.contains("[REDACTED]"));
        assert_eq!(event.raw(), "raw, never touched: 123-45-6789");
    }

    #[test]
    fn typed_tokens_distinguish_pattern_kind() {
        let mut event = Event::from_raw("raw");
        event.set("message", "contact a@b.com");
        redact_event(&mut event, "[REDACTED]", true);
        let message = event.get("message").and_then(Value::as_str).unwrap();
        assert_eq!(message, "contact [EMAIL]");
    }

    #[test]
    fn redacts_recursively_through_nested_maps() {
        let mut event = Event::from_raw("raw");
        let mut nested = std::collections::BTreeMap::new();
        nested.insert("email".to_string(), Value::String("a@b.com".to_string()));
        event.set("geo", Value::Map(nested));
        redact_event(&mut event, "[REDACTED]", false);
        let geo = event.get("geo").and_then(Value::as_map).unwrap();
        assert_eq!(geo.get("email").and_then(Value::as_str), Some("[REDACTED]"));
    }

    #[test]
    fn idempotent_on_repeated_redaction() {
        let mut event = Event::from_raw("raw");
        event.set("message", "ssn 123-45-6789");
        redact_event(&mut event, "[REDACTED]", false);
        let first = event.clone();
        redact_event(&mut event, "[REDACTED]", false);
        assert_eq!(event, first);
    }
}
