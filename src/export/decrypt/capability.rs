// Lazily-resolved decryption capability with fail-soft decrypt

use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::locator::ModuleLocator;
use super::resolvers::OffsetResolver;
use super::traits::{AddressResolver, CapabilityState, RetryPolicy, Transform};
use crate::export::config::ExportConfig;
use crate::export::errors::ExportError;
use crate::export::models::KeyRepr;

/// Snapshot of the capability for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatus {
    pub state: String,
    pub reason: Option<String>,
    pub module_path: Option<String>,
    pub resolver: &'static str,
}

struct Inner {
    state: CapabilityState,
    routine: Option<Arc<dyn Transform>>,
    reason: Option<String>,
    module_path: Option<PathBuf>,
    failed_at: Option<Instant>,
}

pub struct DecryptionCapability {
    locator: ModuleLocator,
    resolver: Box<dyn AddressResolver>,
    retry: RetryPolicy,
    inner: Mutex<Inner>,
}

impl DecryptionCapability {
    pub fn new(
        locator: ModuleLocator,
        resolver: Box<dyn AddressResolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            locator,
            resolver,
            retry,
            inner: Mutex::new(Inner {
                state: CapabilityState::Unresolved,
                routine: None,
                reason: None,
                module_path: None,
                failed_at: None,
            }),
        }
    }

    /// Offset-based resolution configured from `config`
    pub fn from_config(config: &ExportConfig) -> Self {
        let locator = ModuleLocator::new(config.decrypt_module.clone());
        let resolver = OffsetResolver::new(locator.module_name().to_string(), config.routine_offset);
        Self::new(locator, Box::new(resolver), config.capability_retry())
    }

    /// Resolve on first use. Later calls are memoized unless the retry policy
    /// says an `Unavailable` result is stale.
    pub fn available(&self) -> bool {
        self.ensure_resolved().is_some()
    }

    pub fn state(&self) -> CapabilityState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CapabilityStatus {
        let inner = self.inner.lock();
        CapabilityStatus {
            state: inner.state.to_string(),
            reason: inner.reason.clone(),
            module_path: inner.module_path.as_ref().map(|p| p.display().to_string()),
            resolver: self.resolver.name(),
        }
    }

    /// Forget the previous outcome; the next use probes again
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CapabilityState::Unresolved;
        inner.routine = None;
        inner.reason = None;
        inner.module_path = None;
        inner.failed_at = None;
    }

    /// Decrypt with a key as it arrives from upstream data.
    ///
    /// Returns `data` unchanged when the key does not parse or anything about
    /// the native call fails.
    pub fn decrypt(&self, data: &[u8], key: &KeyRepr) -> Vec<u8> {
        match key.to_key() {
            Ok(k) => self.decrypt_with(data, k),
            Err(e) => {
                tracing::debug!("[Decrypt] {}, passing bytes through", e);
                data.to_vec()
            }
        }
    }

    pub fn decrypt_with(&self, data: &[u8], key: u64) -> Vec<u8> {
        match self.try_decrypt(data, key) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::debug!("[Decrypt] falling back to ciphertext: {}", e);
                data.to_vec()
            }
        }
    }

    fn try_decrypt(&self, data: &[u8], key: u64) -> Result<Vec<u8>, ExportError> {
        let routine = self.ensure_resolved().ok_or_else(|| {
            ExportError::CapabilityUnavailable(
                self.inner
                    .lock()
                    .reason
                    .clone()
                    .unwrap_or_else(|| "not resolved".to_string()),
            )
        })?;

        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = vec![0u8; data.len()];
        routine.apply(data, &mut out, key)?;
        Ok(out)
    }

    /// Resolution runs under the lock so concurrent first uses load the
    /// module once.
    fn ensure_resolved(&self) -> Option<Arc<dyn Transform>> {
        let mut inner = self.inner.lock();

        match inner.state {
            CapabilityState::Ready => return inner.routine.clone(),
            CapabilityState::Unavailable => {
                let due = match (self.retry, inner.failed_at) {
                    (RetryPolicy::After(wait), Some(at)) => at.elapsed() >= wait,
                    _ => false,
                };
                if !due {
                    return None;
                }
                tracing::info!("[Decrypt] retrying capability resolution");
            }
            CapabilityState::Unresolved => {}
        }

        match self.resolve() {
            Ok((path, routine)) => {
                tracing::info!(
                    "[Decrypt] ✓ capability ready via {} ({})",
                    self.resolver.name(),
                    path.display()
                );
                inner.state = CapabilityState::Ready;
                inner.routine = Some(Arc::clone(&routine));
                inner.reason = None;
                inner.module_path = Some(path);
                inner.failed_at = None;
                Some(routine)
            }
            Err((path, e)) => {
                tracing::warn!("[Decrypt] ✗ capability unavailable: {}", e);
                inner.state = CapabilityState::Unavailable;
                inner.routine = None;
                inner.reason = Some(e.to_string());
                inner.module_path = path;
                inner.failed_at = Some(Instant::now());
                None
            }
        }
    }

    fn resolve(&self) -> Result<(PathBuf, Arc<dyn Transform>), (Option<PathBuf>, ExportError)> {
        let path = self.locator.locate().ok_or_else(|| {
            (
                None,
                ExportError::CapabilityUnavailable(format!(
                    "{} not found in {} candidate locations",
                    self.locator.module_name(),
                    self.locator.candidates().len()
                )),
            )
        })?;

        let routine = self
            .resolver
            .resolve(&path)
            .map_err(|e| (Some(path.clone()), e))?;

        Ok((path, Arc::from(routine)))
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL: Arc<DecryptionCapability> =
        Arc::new(DecryptionCapability::from_config(&ExportConfig::from_env()));
}

/// Process-wide capability configured from the environment
pub fn global_capability() -> Arc<DecryptionCapability> {
    Arc::clone(&GLOBAL)
}
