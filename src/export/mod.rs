// Export module - timeline media proxy and group member export

pub mod assembler;
pub mod cache;
pub mod config;
pub mod csv;
pub mod decrypt;
pub mod errors;
pub mod fetch;
pub mod labels;
pub mod mime;
pub mod models;
pub mod pool;
pub mod upstream;
pub mod url;

pub use assembler::{ExportAssembler, ExportOutcome, RoomSummary};
pub use cache::{EvictionPolicy, MediaCache, MemoryCache};
pub use config::ExportConfig;
pub use decrypt::{global_capability, CapabilityState, DecryptionCapability, RetryPolicy};
pub use errors::ExportError;
pub use fetch::{HttpTransport, MediaFetchCache, RawResponse, ReqwestTransport};
pub use labels::{decode_blob, scan_member_labels, LabelMap};
pub use mime::sniff_mime;
pub use models::{KeyRepr, MediaReference, MemberRow, Post, ProxyOutcome};
pub use pool::map_bounded;
pub use upstream::{Contact, DataSource, Envelope, RoomStats, Session, StatsWindow};
pub use url::fix_url;
