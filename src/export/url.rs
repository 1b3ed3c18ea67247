// URL normalization for timeline media
//
// Applied in order:
// 1) http:// -> https://
// 2) trailing /150 size segment -> /0 (full-size image)
// 3) append token=<t>&idx=1 unless a token parameter is already present

use regex::Regex;

lazy_static::lazy_static! {
    static ref SIZE_SEGMENT_RE: Regex = Regex::new(r"^([^?#]*)/150((?:[?#].*)?)$").unwrap();
    static ref TOKEN_PARAM_RE: Regex = Regex::new(r"[?&]token=").unwrap();
}

/// Upgrade a plain-http URL to https; anything else is returned as is
pub fn secure_url(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

/// Normalize a media URL. Empty input is returned unchanged.
pub fn fix_url(url: &str, token: Option<&str>) -> String {
    if url.is_empty() {
        return String::new();
    }

    let mut fixed = secure_url(url);

    if let Some(caps) = SIZE_SEGMENT_RE.captures(&fixed) {
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let tail = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        fixed = format!("{}/0{}", path, tail);
    }

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        if !TOKEN_PARAM_RE.is_match(&fixed) {
            let sep = if fixed.contains('?') { '&' } else { '?' };
            fixed = format!("{}{}token={}&idx=1", fixed, sep, token);
        }
    }

    fixed
}
