//! Tolerant parser for `unrealircd.org/json-log` message tags.
//!
//! Server notices carrying this tag embed a JSON object describing the log
//! event. Servers occasionally emit values that are not quite valid JSON,
//! so parsing falls back in three steps and never fails: strict JSON, JSON
//! after cleanup, then extraction of a few well-known string fields.

use serde_json::{Map, Value};
use tracing::debug;

pub const JSON_LOG_TAG: &str = "unrealircd.org/json-log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseQuality {
    Strict,
    Cleaned,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonLog {
    pub level: Option<String>,
    pub subsystem: Option<String>,
    pub event_id: Option<String>,
    pub msg: Option<String>,
    pub fields: Map<String, Value>,
    pub quality: ParseQuality,
}

const KNOWN_FIELDS: &[&str] = &["level", "subsystem", "event_id", "msg", "timestamp"];

pub fn parse(raw: &str) -> JsonLog {
    if let Some(obj) = parse_object(raw) {
        return from_object(obj, ParseQuality::Strict);
    }
    let cleaned = clean(raw);
    if let Some(obj) = parse_object(&cleaned) {
        debug!("json-log tag parsed after cleanup");
        return from_object(obj, ParseQuality::Cleaned);
    }
    debug!("json-log tag fell back to field extraction");
    let mut fields = Map::new();
    for key in KNOWN_FIELDS {
        if let Some(v) = extract_string_field(&cleaned, key) {
            fields.insert(key.to_string(), Value::String(v));
        }
    }
    from_object(fields, ParseQuality::Partial)
}

fn parse_object(s: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn from_object(fields: Map<String, Value>, quality: ParseQuality) -> JsonLog {
    let get = |k: &str| fields.get(k).and_then(Value::as_str).map(str::to_string);
    JsonLog {
        level: get("level"),
        subsystem: get("subsystem"),
        event_id: get("event_id"),
        msg: get("msg"),
        quality,
        fields,
    }
}

/// Undo tag-escaping that leaked through, drop control characters and
/// trailing commas, and trim anything outside the outermost braces.
fn clean(raw: &str) -> String {
    let unescaped = raw.replace("\\s", " ").replace("\\:", ";");
    let no_ctrl: String = unescaped
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect();
    let trimmed = match (no_ctrl.find('{'), no_ctrl.rfind('}')) {
        (Some(start), Some(end)) if start < end => no_ctrl[start..=end].to_string(),
        _ => no_ctrl,
    };

    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' {
            let mut lookahead = chars.clone();
            while matches!(lookahead.peek(), Some(w) if w.is_whitespace()) {
                lookahead.next();
            }
            if matches!(lookahead.peek(), Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Find `"key":"value"` and return the unescaped value.
fn extract_string_field(s: &str, key: &str) -> Option<String> {
    let needle = format!("\"{}\"", key);
    let after_key = &s[s.find(&needle)? + needle.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?.trim_start();
    let body = after_colon.strip_prefix('"')?;

    let mut value = String::new();
    let mut escaped = false;
    for c in body.chars() {
        match (escaped, c) {
            (true, 'n') => {
                value.push('\n');
                escaped = false;
            }
            (true, c) => {
                value.push(c);
                escaped = false;
            }
            (false, '\\') => escaped = true,
            (false, '"') => return Some(value),
            (false, c) => value.push(c),
        }
    }
    Some(value)
}
