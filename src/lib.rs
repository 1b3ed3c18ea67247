pub mod export;

pub use export::{
    decode_blob, fix_url, map_bounded, scan_member_labels, sniff_mime, DataSource,
    DecryptionCapability, ExportAssembler, ExportConfig, ExportError, KeyRepr, MediaFetchCache,
    MediaReference, MemberRow, Post, ProxyOutcome,
};

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber honoring `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
