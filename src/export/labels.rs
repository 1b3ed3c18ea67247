// Group member label extraction from a room's ext-buffer
//
// The blob format is undocumented. Labels are recovered heuristically:
// every `wxid_...` identifier is followed, within a short window, by the
// label the member set for themselves in the group. A small state machine
// skips leading framing bytes and collects the first run of printable text.

use base64::Engine;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};

/// member identifier (lowercase) -> label
pub type LabelMap = HashMap<String, String>;

/// Characters examined after each identifier
pub const SCAN_WINDOW: usize = 100;

/// Longer runs are framing noise, not labels
pub const MAX_LABEL_CHARS: usize = 50;

pub const CJK_IDEOGRAPHS: RangeInclusive<char> = '\u{4E00}'..='\u{9FFF}';
pub const CJK_PUNCTUATION: RangeInclusive<char> = '\u{3000}'..='\u{303F}';
pub const FULLWIDTH_FORMS: RangeInclusive<char> = '\u{FF00}'..='\u{FFEF}';
pub const PRINTABLE_ASCII: RangeInclusive<char> = '\u{0020}'..='\u{007E}';

/// Framing bytes around each label: \x01 opens it, \x18 closes it
pub const STOP_MARKERS: [char; 2] = ['\u{01}', '\u{18}'];

lazy_static::lazy_static! {
    static ref MEMBER_ID_RE: Regex = Regex::new(r"(?i)wxid_[a-z0-9_]+").unwrap();
}

fn is_label_char(c: char) -> bool {
    if STOP_MARKERS.contains(&c) {
        return false;
    }
    CJK_IDEOGRAPHS.contains(&c)
        || CJK_PUNCTUATION.contains(&c)
        || FULLWIDTH_FORMS.contains(&c)
        || PRINTABLE_ASCII.contains(&c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// No label character seen yet; framing bytes are skipped
    Seeking,
    /// Inside a label; the first non-label character ends it
    Collecting,
}

/// Label following one identifier, if any
fn scan_label(window: &str) -> Option<String> {
    let mut state = ScanState::Seeking;
    let mut label = String::new();

    for c in window.chars().take(SCAN_WINDOW) {
        match (state, is_label_char(c)) {
            (ScanState::Seeking, false) => continue,
            (ScanState::Seeking, true) => {
                state = ScanState::Collecting;
                label.push(c);
            }
            (ScanState::Collecting, true) => label.push(c),
            (ScanState::Collecting, false) => break,
        }
    }

    let trimmed = label.trim_matches(|c: char| c.is_whitespace() || c.is_control());
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_LABEL_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

fn scan(blob: &[u8]) -> LabelMap {
    let text = String::from_utf8_lossy(blob);
    let mut labels = LabelMap::new();

    for m in MEMBER_ID_RE.find_iter(&text) {
        if let Some(label) = scan_label(&text[m.end()..]) {
            labels.insert(m.as_str().to_lowercase(), label);
        }
    }

    labels
}

/// Extract member labels from a raw ext-buffer. Never fails: any problem
/// yields an empty map.
pub fn scan_member_labels(blob: &[u8]) -> LabelMap {
    if blob.is_empty() {
        return LabelMap::new();
    }

    match panic::catch_unwind(AssertUnwindSafe(|| scan(blob))) {
        Ok(labels) => {
            tracing::debug!("[Labels] {} labels from {} bytes", labels.len(), blob.len());
            labels
        }
        Err(_) => {
            tracing::warn!("[Labels] scanner failed on {} byte blob", blob.len());
            LabelMap::new()
        }
    }
}

/// Raw bytes from a data store cell: hex text, base64 text, a JSON byte
/// array, a `{"type":"Buffer","data":[..]}` object or plain text.
pub fn decode_blob(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => decode_blob_text(s),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_u64())
            .filter_map(|n| u8::try_from(n).ok())
            .collect(),
        Value::Object(map) => match map.get("data") {
            Some(data @ Value::Array(_)) => decode_blob(data),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn decode_blob_text(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    let hex_body = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if hex_body.len() % 2 == 0 && hex_body.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(hex_body) {
            return bytes;
        }
    }

    let looks_base64 = s.len() % 4 == 0
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=');
    if looks_base64 {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(s) {
            return bytes;
        }
    }

    s.as_bytes().to_vec()
}
