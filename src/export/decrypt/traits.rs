// Strategy traits for binding the native transformation routine

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::export::errors::ExportError;

/// Native signature: `(src, len, dst, key) -> written`.
/// A zero return means the routine failed.
pub type RoutineFn = unsafe extern "C" fn(*const u8, u64, *mut u8, u64) -> u64;

/// A bound, callable transformation
pub trait Transform: Send + Sync {
    /// Write the transformed `src` into `dst` (same length). Returns the
    /// routine's raw result, which must be non-zero on success.
    fn apply(&self, src: &[u8], dst: &mut [u8], key: u64) -> Result<u64, ExportError>;
}

/// Turns a located provider module into a bound [`Transform`].
///
/// Implementations decide how the routine address is found: a fixed offset
/// from the module base, a named export, or a stub in tests.
pub trait AddressResolver: Send + Sync {
    /// Name of the strategy (for logging)
    fn name(&self) -> &'static str;

    fn resolve(&self, module: &Path) -> Result<Box<dyn Transform>, ExportError>;
}

/// Lifecycle of the capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityState {
    Unresolved,
    Ready,
    Unavailable,
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Ready => write!(f, "ready"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Whether an `Unavailable` capability is ever probed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Failure is permanent until an explicit `reset()`
    #[default]
    Never,
    /// Re-probe on the first use after this much time has passed
    After(Duration),
}
