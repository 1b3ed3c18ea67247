// Common data models for timeline media and member export

use serde::{Deserialize, Serialize};

use super::errors::ExportError;
use super::url::fix_url;

/// Decryption key as it arrives from upstream rows: either a JSON number or a
/// decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyRepr {
    Number(f64),
    Text(String),
}

impl KeyRepr {
    /// Integer token passed to the native routine.
    ///
    /// Numbers are truncated toward zero. Empty, negative, non-numeric and
    /// non-finite values are rejected.
    pub fn to_key(&self) -> Result<u64, ExportError> {
        match self {
            Self::Number(n) => {
                let t = n.trunc();
                if !n.is_finite() || t < 0.0 || t > u64::MAX as f64 {
                    return Err(ExportError::InvalidKey(n.to_string()));
                }
                Ok(t as u64)
            }
            Self::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| ExportError::InvalidKey(format!("{:?}", s))),
        }
    }

    /// `None` means "do not decrypt"
    pub fn parse(&self) -> Option<u64> {
        self.to_key().ok()
    }

    /// Fragment used in the composite cache key. Keys that decrypt alike
    /// share a fragment.
    pub fn cache_fragment(&self) -> String {
        match (self.parse(), self) {
            (Some(k), _) => k.to_string(),
            (None, Self::Number(n)) => n.to_string(),
            (None, Self::Text(s)) => s.trim().to_string(),
        }
    }
}

impl From<u64> for KeyRepr {
    fn from(k: u64) -> Self {
        Self::Text(k.to_string())
    }
}

impl From<&str> for KeyRepr {
    fn from(k: &str) -> Self {
        Self::Text(k.to_string())
    }
}

/// One displayable asset attached to a timeline post
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReference {
    pub url: String,
    #[serde(default)]
    pub thumb_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyRepr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_idx: Option<String>,
    /// Companion video of a live photo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_photo: Option<Box<MediaReference>>,
}

impl MediaReference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<KeyRepr>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Normalize `url`, `thumb_url` and the nested live photo in place.
    ///
    /// `token_override` wins over the reference's own token. Idempotent.
    pub fn normalize(&mut self, token_override: Option<&str>) {
        let token = token_override
            .map(str::to_string)
            .or_else(|| self.token.clone());
        let token = token.as_deref().filter(|t| !t.is_empty());

        self.url = fix_url(&self.url, token);
        self.thumb_url = fix_url(&self.thumb_url, token);

        if let Some(live) = self.live_photo.as_mut() {
            live.normalize(token_override);
        }
    }
}

/// A timeline post as decoded by the data store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Result envelope of a media proxy call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyOutcome {
    pub fn ok(data_url: String) -> Self {
        Self {
            success: true,
            data_url: Some(data_url),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data_url: None,
            error: Some(error.to_string()),
        }
    }
}

/// One row of the member table export
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub wxid: String,
    pub nickname: String,
    pub remark: String,
    /// Label the member set for themselves inside this group
    pub group_nickname: String,
    pub avatar_url: String,
    pub message_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parsing() {
        assert_eq!(KeyRepr::Text("12345".into()).parse(), Some(12345));
        assert_eq!(KeyRepr::Text(" 42 ".into()).parse(), Some(42));
        assert_eq!(KeyRepr::Number(7.9).parse(), Some(7));
        assert_eq!(KeyRepr::Text("".into()).parse(), None);
        assert_eq!(KeyRepr::Text("abc".into()).parse(), None);
        assert_eq!(KeyRepr::Text("-3".into()).parse(), None);
        assert_eq!(KeyRepr::Number(-1.0).parse(), None);
        assert_eq!(KeyRepr::Number(f64::NAN).parse(), None);
    }

    #[test]
    fn test_invalid_key_error() {
        assert_eq!(KeyRepr::Number(42.0).to_key(), Ok(42));
        assert!(matches!(
            KeyRepr::Text("abc".into()).to_key(),
            Err(ExportError::InvalidKey(_))
        ));
        assert!(matches!(
            KeyRepr::Number(f64::INFINITY).to_key(),
            Err(ExportError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_equivalent_keys_share_cache_fragment() {
        let fragments = [
            KeyRepr::Text(" 42 ".into()).cache_fragment(),
            KeyRepr::Text("42".into()).cache_fragment(),
            KeyRepr::Number(42.0).cache_fragment(),
        ];
        assert!(fragments.iter().all(|f| f == "42"));

        assert_ne!(
            KeyRepr::Text("abc".into()).cache_fragment(),
            KeyRepr::Text("42".into()).cache_fragment()
        );
    }

    #[test]
    fn test_key_deserializes_from_number_or_string() {
        let media: MediaReference =
            serde_json::from_str(r#"{"url":"u","key":"99"}"#).unwrap();
        assert_eq!(media.key.unwrap().parse(), Some(99));

        let media: MediaReference = serde_json::from_str(r#"{"url":"u","key":99}"#).unwrap();
        assert_eq!(media.key.unwrap().parse(), Some(99));
    }

    #[test]
    fn test_normalize_recurses_into_live_photo() {
        let mut media = MediaReference::new("http://img.example/a/150").with_token("T");
        media.live_photo = Some(Box::new(MediaReference::new("http://vid.example/v")));
        media.normalize(None);

        assert_eq!(media.url, "https://img.example/a/0?token=T&idx=1");
        let live = media.live_photo.as_ref().unwrap();
        assert_eq!(live.url, "https://vid.example/v");

        let snapshot = media.clone();
        media.normalize(None);
        assert_eq!(media, snapshot);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ProxyOutcome::err("HTTP 404")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "HTTP 404");
        assert!(json.get("dataUrl").is_none());
    }
}
