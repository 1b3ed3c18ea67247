// Data store boundary consumed by the exporter
//
// The store itself (opening databases, running queries) lives outside this
// crate. Adapters implement DataSource; RPC-style adapters can use Envelope
// to unwrap `{ success, ...payload }` / `{ success: false, error }` replies.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

use super::errors::ExportError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub display_name: String,
    pub summary: String,
    pub last_timestamp: i64,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Contact {
    pub username: String,
    pub nick_name: String,
    pub remark: String,
    pub alias: String,
}

/// Inclusive time range in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsWindow {
    pub start: i64,
    pub end: i64,
}

impl StatsWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn between(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self::new(start.unix_timestamp(), end.unix_timestamp())
    }

    /// The `days` days up to `now`
    pub fn last_days(now: OffsetDateTime, days: i64) -> Self {
        Self::between(now - Duration::days(days), now)
    }

    /// Everything ever recorded
    pub fn all_time() -> Self {
        Self::new(0, i64::MAX)
    }
}

/// Per-room message statistics for one window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomStats {
    /// sender username -> message count
    pub sender_counts: HashMap<String, u64>,
    /// 24 buckets, local hour of day
    pub hourly: Vec<u64>,
    /// message type label -> count
    pub type_counts: HashMap<String, u64>,
}

pub type Row = Map<String, Value>;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn sessions(&self) -> Result<Vec<Session>, ExportError>;

    async fn display_name(&self, username: &str) -> Result<Option<String>, ExportError>;

    async fn avatar_url(&self, username: &str) -> Result<Option<String>, ExportError>;

    async fn member_count(&self, room: &str) -> Result<u64, ExportError>;

    async fn members(&self, room: &str) -> Result<Vec<String>, ExportError>;

    async fn room_stats(&self, room: &str, window: StatsWindow) -> Result<RoomStats, ExportError>;

    async fn contact(&self, username: &str) -> Result<Option<Contact>, ExportError>;

    /// Raw SQL against a named logical database
    async fn exec_query(&self, db: &str, sql: &str) -> Result<Vec<Row>, ExportError>;
}

/// Reply envelope of the data store RPC
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn parse(value: Value) -> Result<Self, ExportError> {
        serde_json::from_value(value).map_err(|e| ExportError::Parse(format!("Invalid envelope: {}", e)))
    }

    /// Payload field `field`, or the envelope's error
    pub fn take<T: DeserializeOwned>(mut self, field: &str) -> Result<T, ExportError> {
        if !self.success {
            let message = self.error.unwrap_or_else(|| "request failed".to_string());
            // transport-shaped messages keep their class, the rest is the store's
            return Err(match ExportError::from(message) {
                ExportError::Unknown(message) => ExportError::Upstream(message),
                classified => classified,
            });
        }

        let value = self
            .payload
            .remove(field)
            .ok_or_else(|| ExportError::Parse(format!("missing field {}", field)))?;
        serde_json::from_value(value).map_err(|e| ExportError::Parse(format!("field {}: {}", field, e)))
    }
}

/// Quote a literal for interpolation into SQL
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
