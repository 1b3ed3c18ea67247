// Media proxy: fetch, undo Content-Encoding, decrypt, sniff, data URI, cache
//
// NOTE: fetches carry no timeout. A stalled upstream holds its caller until
// the connection drops.

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use super::cache::{cache_key, MediaCache, MemoryCache};
use super::config::ExportConfig;
use super::decrypt::{global_capability, DecryptionCapability};
use super::errors::ExportError;
use super::mime::{sniff_mime, DEFAULT_MIME};
use super::models::{KeyRepr, ProxyOutcome};
use super::url::secure_url;

/// Headers sent with every media request
pub const BROWSER_HEADERS: [(&str, &str); 4] = [
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/120.0.0.0 Safari/537.36",
    ),
    ("Accept", "image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
];

/// Buffered HTTP response. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(&name.to_ascii_lowercase()).map(String::as_str)
}

/// Network seam for the media proxy
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Single GET. Redirects are not followed; the body is fully buffered
    /// and still content-encoded.
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, ExportError>;
}

/// reqwest-backed transport. Automatic decompression is off (no gzip/brotli
/// features) so Content-Encoding reaches the pipeline untouched, and a 3xx
/// comes back as-is.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>) -> Result<Self, ExportError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ExportError::Network(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ExportError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, ExportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// Undo transport-level compression. Unknown or absent encodings pass through.
pub fn decode_body(encoding: Option<&str>, raw: Vec<u8>) -> Result<Vec<u8>, ExportError> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    let mut out = Vec::new();

    match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            flate2::read::GzDecoder::new(raw.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| ExportError::Decompress(format!("gzip: {}", e)))?;
        }
        Some("deflate") => {
            // zlib-wrapped per RFC 9110; some servers send a raw stream
            if flate2::read::ZlibDecoder::new(raw.as_slice())
                .read_to_end(&mut out)
                .is_err()
            {
                out.clear();
                flate2::read::DeflateDecoder::new(raw.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| ExportError::Decompress(format!("deflate: {}", e)))?;
            }
        }
        Some("br") => {
            brotli::Decompressor::new(raw.as_slice(), 4096)
                .read_to_end(&mut out)
                .map_err(|e| ExportError::Decompress(format!("brotli: {}", e)))?;
        }
        _ => return Ok(raw),
    }

    Ok(out)
}

/// `x-enc` header value that marks an encrypted body
fn is_encrypted(flag: Option<&str>) -> bool {
    match flag.map(str::trim) {
        None | Some("") | Some("0") => false,
        Some(v) => !v.eq_ignore_ascii_case("false"),
    }
}

/// `data:<mime>;base64,<payload>`
pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime, b64)
}

pub struct MediaFetchCache {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn MediaCache>,
    capability: Arc<DecryptionCapability>,
}

impl MediaFetchCache {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn MediaCache>,
        capability: Arc<DecryptionCapability>,
    ) -> Self {
        Self {
            transport,
            cache,
            capability,
        }
    }

    /// reqwest transport, in-memory cache and the process-wide capability
    pub fn from_config(config: &ExportConfig) -> Result<Self, ExportError> {
        let transport = ReqwestTransport::new(config.proxy.as_deref())?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(MemoryCache::new(config.eviction_policy())),
            global_capability(),
        ))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Resolve `url` into a data URI, reporting failures in the envelope
    pub async fn proxy(&self, url: &str, key: Option<&KeyRepr>) -> ProxyOutcome {
        match self.resolve(url, key).await {
            Ok(data_url) => ProxyOutcome::ok(data_url),
            Err(e) => {
                tracing::warn!("[MediaProxy] ✗ {}: {}", url, e);
                ProxyOutcome::err(e)
            }
        }
    }

    pub async fn resolve(&self, url: &str, key: Option<&KeyRepr>) -> Result<String, ExportError> {
        let url = secure_url(url);
        let url = url.as_str();
        if !url.starts_with("https://") {
            return Err(ExportError::Network(format!("refusing non-https URL {}", url)));
        }

        let fragment = key.map(KeyRepr::cache_fragment);
        let ck = cache_key(url, fragment.as_deref());

        if let Some(hit) = self.cache.get(&ck) {
            tracing::debug!("[MediaProxy] cache hit {}", ck);
            return Ok(hit);
        }

        tracing::debug!("[MediaProxy] fetching {}", url);
        let RawResponse {
            status,
            headers,
            body,
        } = self.transport.get(url, &BROWSER_HEADERS).await?;

        if status != 200 {
            return Err(ExportError::HttpStatus(status));
        }

        let body = decode_body(header(&headers, "content-encoding"), body)?;

        let bytes = match (is_encrypted(header(&headers, "x-enc")), key.and_then(KeyRepr::parse)) {
            (true, Some(k)) => self.capability.decrypt_with(&body, k),
            _ => body,
        };

        let declared = header(&headers, "content-type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_MIME);
        let mime = sniff_mime(&bytes, declared);

        let data_url = to_data_url(mime, &bytes);
        tracing::debug!("[MediaProxy] ✓ {} ({}, {} bytes)", url, mime, bytes.len());
        self.cache.insert(ck, data_url.clone());
        Ok(data_url)
    }
}
