// Error types for the media proxy and export pipeline

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExportError {
    /// Connection refused, DNS failure, reset while reading the body
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with something other than 200
    #[error("HTTP {0}")]
    HttpStatus(u16),

    /// gzip/deflate/br stream could not be decoded
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// Native decryption module could not be bound
    #[error("Decryption capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Key is empty, negative or not a number
    #[error("Invalid decryption key: {0}")]
    InvalidKey(String),

    /// Data store RPC answered with `success: false`
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Malformed payload from the data store
    #[error("Parse error: {0}")]
    Parse(String),

    /// File write failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Unknown error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::HttpStatus(status.as_u16());
        }
        Self::Network(e.to_string())
    }
}

// Data store envelopes only carry a message string (see Envelope::take)
impl From<String> for ExportError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("dns")
        {
            return Self::Network(s);
        }

        if let Some(code) = lower
            .strip_prefix("http ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|c| c.parse::<u16>().ok())
        {
            return Self::HttpStatus(code);
        }

        if lower.contains("gzip") || lower.contains("deflate") || lower.contains("brotli") {
            return Self::Decompress(s);
        }

        if lower.contains("parse") || lower.contains("json") || lower.contains("invalid") {
            return Self::Parse(s);
        }

        if lower.contains("no such file") || lower.contains("permission denied") {
            return Self::Io(s);
        }

        Self::Unknown(s)
    }
}
