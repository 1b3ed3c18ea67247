// Runtime configuration with environment overrides

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::cache::EvictionPolicy;
use super::decrypt::{RetryPolicy, DEFAULT_ROUTINE_OFFSET};

pub const ENV_DECRYPT_MODULE: &str = "MOMENTS_DECRYPT_MODULE";
pub const ENV_DECRYPT_OFFSET: &str = "MOMENTS_DECRYPT_OFFSET";
pub const ENV_PROXY: &str = "MOMENTS_PROXY";
pub const ENV_CONCURRENCY: &str = "MOMENTS_CONCURRENCY";
pub const ENV_CACHE_CAPACITY: &str = "MOMENTS_CACHE_CAPACITY";
pub const ENV_CACHE_TTL_SECS: &str = "MOMENTS_CACHE_TTL_SECS";
pub const ENV_CAPABILITY_RETRY_SECS: &str = "MOMENTS_CAPABILITY_RETRY_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportConfig {
    /// Explicit path to the decryption provider module (probed first)
    pub decrypt_module: Option<PathBuf>,
    /// Routine offset from the provider module base
    pub routine_offset: usize,
    /// HTTP/SOCKS5 proxy URL for media downloads
    pub proxy: Option<String>,
    /// Max per-member lookups in flight
    pub concurrency: usize,
    /// Max cached data URIs, 0 = unbounded
    pub cache_capacity: usize,
    pub cache_ttl_secs: Option<u64>,
    /// Re-probe an unavailable capability after this many seconds
    pub capability_retry_secs: Option<u64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            decrypt_module: None,
            routine_offset: DEFAULT_ROUTINE_OFFSET,
            proxy: None,
            concurrency: 8,
            cache_capacity: 0,
            cache_ttl_secs: None,
            capability_retry_secs: None,
        }
    }
}

impl ExportConfig {
    /// Defaults overlaid with `MOMENTS_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any key/value source. Unparseable values are
    /// ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get(ENV_DECRYPT_MODULE) {
            self.decrypt_module = Some(PathBuf::from(path));
        }
        if let Some(raw) = get(ENV_DECRYPT_OFFSET) {
            match parse_offset(&raw) {
                Some(offset) => self.routine_offset = offset,
                None => tracing::warn!("[Config] ignoring {}={}", ENV_DECRYPT_OFFSET, raw),
            }
        }
        if let Some(proxy) = get(ENV_PROXY) {
            self.proxy = Some(proxy);
        }
        if let Some(raw) = get(ENV_CONCURRENCY) {
            match raw.parse::<usize>() {
                Ok(n) => self.concurrency = n.max(1),
                Err(_) => tracing::warn!("[Config] ignoring {}={}", ENV_CONCURRENCY, raw),
            }
        }
        if let Some(raw) = get(ENV_CACHE_CAPACITY) {
            match raw.parse::<usize>() {
                Ok(n) => self.cache_capacity = n,
                Err(_) => tracing::warn!("[Config] ignoring {}={}", ENV_CACHE_CAPACITY, raw),
            }
        }
        if let Some(raw) = get(ENV_CACHE_TTL_SECS) {
            match raw.parse::<u64>() {
                Ok(n) => self.cache_ttl_secs = Some(n),
                Err(_) => tracing::warn!("[Config] ignoring {}={}", ENV_CACHE_TTL_SECS, raw),
            }
        }
        if let Some(raw) = get(ENV_CAPABILITY_RETRY_SECS) {
            match raw.parse::<u64>() {
                Ok(n) => self.capability_retry_secs = Some(n),
                Err(_) => tracing::warn!("[Config] ignoring {}={}", ENV_CAPABILITY_RETRY_SECS, raw),
            }
        }

        self
    }

    pub fn capability_retry(&self) -> RetryPolicy {
        match self.capability_retry_secs {
            Some(secs) => RetryPolicy::After(Duration::from_secs(secs)),
            None => RetryPolicy::Never,
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        let ttl = self.cache_ttl_secs.map(Duration::from_secs);
        match (self.cache_capacity, ttl) {
            (0, None) => EvictionPolicy::Unbounded,
            (0, Some(d)) => EvictionPolicy::Ttl(d),
            (n, None) => EvictionPolicy::Capacity(n),
            (n, Some(d)) => EvictionPolicy::CapacityTtl(n, d),
        }
    }
}

/// `0x`-prefixed hex or plain decimal
fn parse_offset(raw: &str) -> Option<usize> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> ExportConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExportConfig::default().with_overrides(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.eviction_policy(), EvictionPolicy::Unbounded);
        assert_eq!(config.capability_retry(), RetryPolicy::Never);
    }

    #[test]
    fn test_env_overrides() {
        let config = overrides(&[
            (ENV_DECRYPT_OFFSET, "0x1000"),
            (ENV_CONCURRENCY, "0"),
            (ENV_CACHE_CAPACITY, "64"),
            (ENV_CACHE_TTL_SECS, "300"),
            (ENV_CAPABILITY_RETRY_SECS, "600"),
            (ENV_DECRYPT_MODULE, "C:\\wx\\Weixin.dll"),
        ]);

        assert_eq!(config.routine_offset, 0x1000);
        assert_eq!(config.concurrency, 1);
        assert_eq!(
            config.eviction_policy(),
            EvictionPolicy::CapacityTtl(64, Duration::from_secs(300))
        );
        assert_eq!(
            config.capability_retry(),
            RetryPolicy::After(Duration::from_secs(600))
        );
        assert_eq!(config.decrypt_module, Some(PathBuf::from("C:\\wx\\Weixin.dll")));
    }

    #[test]
    fn test_bad_values_ignored() {
        let config = overrides(&[(ENV_DECRYPT_OFFSET, "zz"), (ENV_CONCURRENCY, "many")]);
        assert_eq!(config, ExportConfig::default());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: ExportConfig = serde_json::from_str(r#"{"concurrency": 3}"#).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.routine_offset, DEFAULT_ROUTINE_OFFSET);
    }
}
