// Export assembler - merges media, labels and data store lookups into rows
//
// Per-member and per-author lookups go through map_bounded so a large group
// never fans out more than `concurrency` requests at once. A failed lookup
// blanks its field; it never aborts the batch.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

use super::config::ExportConfig;
use super::csv::{default_export_file_name, write_members_csv};
use super::errors::ExportError;
use super::fetch::MediaFetchCache;
use super::labels::{decode_blob, scan_member_labels, LabelMap};
use super::models::{MediaReference, MemberRow, Post, ProxyOutcome};
use super::pool::map_bounded;
use super::upstream::{sql_quote, DataSource, RoomStats, StatsWindow};

/// Logical database holding chat room rows
pub const CONTACT_DB: &str = "contact";

/// Aggregate view of one room
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room: String,
    pub member_count: u64,
    pub hourly: Vec<u64>,
    pub type_counts: HashMap<String, u64>,
}

/// Result envelope of a file export
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ExportAssembler {
    source: Arc<dyn DataSource>,
    media: Arc<MediaFetchCache>,
    concurrency: usize,
}

impl ExportAssembler {
    pub fn new(source: Arc<dyn DataSource>, media: Arc<MediaFetchCache>, concurrency: usize) -> Self {
        Self {
            source,
            media,
            concurrency: concurrency.max(1),
        }
    }

    /// Media proxy and lookup fan-out taken from `config`
    pub fn from_config(source: Arc<dyn DataSource>, config: &ExportConfig) -> Result<Self, ExportError> {
        let media = MediaFetchCache::from_config(config)?;
        Ok(Self::new(source, Arc::new(media), config.concurrency))
    }

    /// Normalize media URLs and attach author names/avatars
    pub async fn enrich_posts(&self, mut posts: Vec<Post>) -> Vec<Post> {
        for post in posts.iter_mut() {
            for media in post.media.iter_mut() {
                media.normalize(None);
            }
        }

        let mut seen = HashSet::new();
        let authors: Vec<String> = posts
            .iter()
            .filter(|p| !p.username.is_empty() && seen.insert(p.username.clone()))
            .map(|p| p.username.clone())
            .collect();

        let source = &self.source;
        let profiles = map_bounded(authors, self.concurrency, move |username| async move {
            let name = source.display_name(&username).await.unwrap_or_else(|e| {
                tracing::debug!("[Export] display name for {} failed: {}", username, e);
                None
            });
            let avatar = source.avatar_url(&username).await.unwrap_or_else(|e| {
                tracing::debug!("[Export] avatar for {} failed: {}", username, e);
                None
            });
            Ok::<_, Infallible>((username, name, avatar))
        })
        .await
        .unwrap_or_else(|never| match never {});

        let profiles: HashMap<String, (Option<String>, Option<String>)> = profiles
            .into_iter()
            .map(|(username, name, avatar)| (username, (name, avatar)))
            .collect();

        for post in posts.iter_mut() {
            if let Some((name, avatar)) = profiles.get(&post.username) {
                if post.display_name.is_none() {
                    post.display_name = name.clone();
                }
                if post.avatar_url.is_none() {
                    post.avatar_url = avatar.clone();
                }
            }
        }

        posts
    }

    /// Fetch one asset on demand (not part of batch export)
    pub async fn resolve_asset(&self, media: &MediaReference) -> ProxyOutcome {
        if media.url.is_empty() {
            return ProxyOutcome::err("media has no url");
        }
        self.media.proxy(&media.url, media.key.as_ref()).await
    }

    /// Labels members set for themselves in `room`. Empty on any failure.
    pub async fn group_labels(&self, room: &str) -> LabelMap {
        let sql = format!(
            "SELECT ext_buffer FROM chat_room WHERE username = {}",
            sql_quote(room)
        );

        let rows = match self.source.exec_query(CONTACT_DB, &sql).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("[Export] ext_buffer query for {} failed: {}", room, e);
                return LabelMap::new();
            }
        };

        let blob = rows
            .first()
            .and_then(|row| row.get("ext_buffer"))
            .map(decode_blob)
            .unwrap_or_default();
        scan_member_labels(&blob)
    }

    pub async fn member_rows(&self, room: &str, window: StatsWindow) -> Result<Vec<MemberRow>, ExportError> {
        let members = self.source.members(room).await?;
        tracing::info!("[Export] {} members in {}", members.len(), room);

        let labels = self.group_labels(room).await;
        let stats = self.source.room_stats(room, window).await.unwrap_or_else(|e| {
            tracing::warn!("[Export] stats for {} failed: {}", room, e);
            RoomStats::default()
        });

        let source = &self.source;
        let (labels, stats) = (&labels, &stats);
        let rows = map_bounded(members, self.concurrency, move |wxid| async move {
            let contact = source.contact(&wxid).await.unwrap_or_else(|e| {
                tracing::debug!("[Export] contact {} failed: {}", wxid, e);
                None
            });
            let avatar = source.avatar_url(&wxid).await.ok().flatten().unwrap_or_default();

            let (nickname, remark) = match contact {
                Some(c) => (c.nick_name, c.remark),
                None => {
                    let name = source.display_name(&wxid).await.ok().flatten();
                    (name.unwrap_or_default(), String::new())
                }
            };

            let group_nickname = labels.get(&wxid.to_lowercase()).cloned().unwrap_or_default();
            let message_count = stats.sender_counts.get(&wxid).copied().unwrap_or(0);

            Ok::<_, Infallible>(MemberRow {
                wxid,
                nickname,
                remark,
                group_nickname,
                avatar_url: avatar,
                message_count,
            })
        })
        .await
        .unwrap_or_else(|never| match never {});

        Ok(rows)
    }

    pub async fn room_summary(&self, room: &str, window: StatsWindow) -> Result<RoomSummary, ExportError> {
        let member_count = self.source.member_count(room).await?;
        let stats = self.source.room_stats(room, window).await?;

        Ok(RoomSummary {
            room: room.to_string(),
            member_count,
            hourly: stats.hourly,
            type_counts: stats.type_counts,
        })
    }

    /// Build the member table for `room` and write it to `path`
    pub async fn export_members_csv(&self, room: &str, window: StatsWindow, path: &Path) -> ExportOutcome {
        let result = async {
            let rows = self.member_rows(room, window).await?;
            write_members_csv(path, &rows).await?;
            Ok::<_, ExportError>(rows.len())
        }
        .await;

        match result {
            Ok(count) => ExportOutcome {
                success: true,
                path: Some(path.display().to_string()),
                count,
                error: None,
            },
            Err(e) => {
                tracing::warn!("[Export] ✗ {} export failed: {}", room, e);
                ExportOutcome {
                    success: false,
                    path: None,
                    count: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Like `export_members_csv`, into `dir` under a timestamped file name
    pub async fn export_members_csv_in(&self, room: &str, window: StatsWindow, dir: &Path) -> ExportOutcome {
        let prefix: String = room
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let name = default_export_file_name(&format!("{}_members", prefix), OffsetDateTime::now_utc());
        self.export_members_csv(room, window, &dir.join(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::cache::MemoryCache;
    use crate::export::decrypt::{DecryptionCapability, ModuleLocator, OffsetResolver, RetryPolicy};
    use crate::export::fetch::{HttpTransport, RawResponse};
    use crate::export::upstream::{Contact, Row, Session};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_send<T: Send>(_: &T) {}

    #[derive(Default)]
    struct MemorySource {
        names: HashMap<String, String>,
        avatars: HashMap<String, String>,
        contacts: HashMap<String, Contact>,
        members: Vec<String>,
        ext_buffer: Option<serde_json::Value>,
        stats: RoomStats,
        failing: HashSet<String>,
        contact_calls: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for MemorySource {
        async fn sessions(&self) -> Result<Vec<Session>, ExportError> {
            Ok(Vec::new())
        }

        async fn display_name(&self, username: &str) -> Result<Option<String>, ExportError> {
            if self.failing.contains(username) {
                return Err(ExportError::Upstream("lookup failed".into()));
            }
            Ok(self.names.get(username).cloned())
        }

        async fn avatar_url(&self, username: &str) -> Result<Option<String>, ExportError> {
            if self.failing.contains(username) {
                return Err(ExportError::Upstream("lookup failed".into()));
            }
            Ok(self.avatars.get(username).cloned())
        }

        async fn member_count(&self, _room: &str) -> Result<u64, ExportError> {
            Ok(self.members.len() as u64)
        }

        async fn members(&self, _room: &str) -> Result<Vec<String>, ExportError> {
            Ok(self.members.clone())
        }

        async fn room_stats(&self, _room: &str, _window: StatsWindow) -> Result<RoomStats, ExportError> {
            Ok(self.stats.clone())
        }

        async fn contact(&self, username: &str) -> Result<Option<Contact>, ExportError> {
            self.contact_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(username) {
                return Err(ExportError::Upstream("lookup failed".into()));
            }
            Ok(self.contacts.get(username).cloned())
        }

        async fn exec_query(&self, db: &str, sql: &str) -> Result<Vec<Row>, ExportError> {
            assert_eq!(db, CONTACT_DB);
            assert!(sql.contains("'team@chatroom'"));
            match &self.ext_buffer {
                Some(value) => {
                    let mut row = Row::new();
                    row.insert("ext_buffer".to_string(), value.clone());
                    Ok(vec![row])
                }
                None => Err(ExportError::Upstream("no such table".into())),
            }
        }
    }

    struct NoNetwork;

    #[async_trait]
    impl HttpTransport for NoNetwork {
        async fn get(&self, _url: &str, _headers: &[(&str, &str)]) -> Result<RawResponse, ExportError> {
            Err(ExportError::Network("offline".into()))
        }
    }

    fn media_cache() -> Arc<MediaFetchCache> {
        let capability = DecryptionCapability::new(
            ModuleLocator::new(None).with_module_name("no-such-provider.dll"),
            Box::new(OffsetResolver::new("no-such-provider.dll", 0)),
            RetryPolicy::Never,
        );
        Arc::new(MediaFetchCache::new(
            Arc::new(NoNetwork),
            Arc::new(MemoryCache::default()),
            Arc::new(capability),
        ))
    }

    fn team_source() -> MemorySource {
        let blob = "\x0awxid_ann\x12\x03小安\x18\x0awxid_bob\x12\x03Bobby\x18";
        let mut source = MemorySource {
            members: vec!["wxid_ann".into(), "wxid_bob".into(), "wxid_cat".into()],
            ext_buffer: Some(json!(hex::encode(blob.as_bytes()))),
            ..Default::default()
        };
        source.contacts.insert(
            "wxid_ann".into(),
            Contact {
                username: "wxid_ann".into(),
                nick_name: "Ann".into(),
                remark: "Sister".into(),
                alias: String::new(),
            },
        );
        source.names.insert("wxid_bob".into(), "Bob".into());
        source.avatars.insert("wxid_ann".into(), "https://a/ann".into());
        source.stats.sender_counts.insert("wxid_ann".into(), 12);
        source.stats.sender_counts.insert("wxid_bob".into(), 3);
        source.stats.hourly = vec![0; 24];
        source.failing.insert("wxid_cat".into());
        source
    }

    #[tokio::test]
    async fn test_member_rows_merge_and_degrade() {
        let source = Arc::new(team_source());
        let assembler = ExportAssembler::new(source.clone(), media_cache(), 2);

        let rows = assembler
            .member_rows("team@chatroom", StatsWindow::all_time())
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].wxid, "wxid_ann");
        assert_eq!(rows[0].nickname, "Ann");
        assert_eq!(rows[0].remark, "Sister");
        assert_eq!(rows[0].group_nickname, "小安");
        assert_eq!(rows[0].avatar_url, "https://a/ann");
        assert_eq!(rows[0].message_count, 12);

        assert_eq!(rows[1].nickname, "Bob");
        assert_eq!(rows[1].group_nickname, "Bobby");
        assert_eq!(rows[1].message_count, 3);

        // every lookup for wxid_cat fails
        assert_eq!(rows[2].wxid, "wxid_cat");
        assert_eq!(rows[2].nickname, "");
        assert_eq!(rows[2].group_nickname, "");
        assert_eq!(rows[2].message_count, 0);

        assert_eq!(source.contact_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_group_labels_survive_query_failure() {
        let source = MemorySource::default();
        let assembler = ExportAssembler::new(Arc::new(source), media_cache(), 4);
        assert!(assembler.group_labels("team@chatroom").await.is_empty());
    }

    #[tokio::test]
    async fn test_enrich_posts() {
        let mut source = MemorySource::default();
        source.names.insert("wxid_ann".into(), "Ann".into());
        source.avatars.insert("wxid_ann".into(), "https://a/ann".into());
        source.failing.insert("wxid_cat".into());
        let assembler = ExportAssembler::new(Arc::new(source), media_cache(), 4);

        let posts = vec![
            Post {
                id: "1".into(),
                username: "wxid_ann".into(),
                media: vec![MediaReference::new("http://img/x/150").with_token("T")],
                ..Default::default()
            },
            Post {
                id: "2".into(),
                username: "wxid_cat".into(),
                ..Default::default()
            },
        ];

        let posts = assembler.enrich_posts(posts).await;
        assert_eq!(posts[0].display_name.as_deref(), Some("Ann"));
        assert_eq!(posts[0].avatar_url.as_deref(), Some("https://a/ann"));
        assert_eq!(posts[0].media[0].url, "https://img/x/0?token=T&idx=1");
        assert_eq!(posts[1].display_name, None);
    }

    #[tokio::test]
    async fn test_resolve_asset_reports_failure() {
        let assembler = ExportAssembler::new(Arc::new(MemorySource::default()), media_cache(), 1);

        let outcome = assembler.resolve_asset(&MediaReference::new("https://img/x")).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("offline"));

        let outcome = assembler.resolve_asset(&MediaReference::default()).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_room_summary() {
        let assembler = ExportAssembler::new(Arc::new(team_source()), media_cache(), 1);
        let summary = assembler
            .room_summary("team@chatroom", StatsWindow::all_time())
            .await
            .unwrap();
        assert_eq!(summary.member_count, 3);
        assert_eq!(summary.hourly.len(), 24);
    }

    #[tokio::test]
    async fn test_export_members_csv() {
        let assembler = ExportAssembler::new(Arc::new(team_source()), media_cache(), 2);
        let path = std::env::temp_dir().join(format!("moments-export-{}.csv", std::process::id()));

        let outcome = assembler
            .export_members_csv("team@chatroom", StatsWindow::all_time(), &path)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.count, 3);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("wxid_ann,Ann,Sister,小安,12"));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_export_into_directory() {
        let assembler = ExportAssembler::new(Arc::new(team_source()), media_cache(), 2);
        let dir = std::env::temp_dir().join(format!("moments-export-dir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let outcome = assembler
            .export_members_csv_in("team@chatroom", StatsWindow::all_time(), &dir)
            .await;
        assert!(outcome.success);

        let path = std::path::PathBuf::from(outcome.path.unwrap());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("team_chatroom_members_"));
        assert!(name.ends_with(".csv"));
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_from_config_uses_concurrency() {
        let config = ExportConfig {
            concurrency: 3,
            ..Default::default()
        };
        let assembler = ExportAssembler::from_config(Arc::new(MemorySource::default()), &config).unwrap();
        assert_eq!(assembler.concurrency, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_futures_are_send() {
        let assembler = Arc::new(ExportAssembler::new(Arc::new(team_source()), media_cache(), 2));

        let rows = assembler.member_rows("team@chatroom", StatsWindow::all_time());
        assert_send(&rows);
        assert_send(&assembler.enrich_posts(Vec::new()));
        assert_send(&assembler.export_members_csv("team@chatroom", StatsWindow::all_time(), Path::new("unused.csv")));
        drop(rows);

        let spawned = Arc::clone(&assembler);
        let rows = tokio::spawn(async move {
            spawned
                .member_rows("team@chatroom", StatsWindow::all_time())
                .await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(rows.len(), 3);
    }
}
