// Optional native decryption capability
//
// The provider module is located on disk, loaded, and the transformation
// routine is bound through a pluggable AddressResolver. Every failure is
// absorbed: decrypt() hands back the ciphertext when the routine is missing.

mod capability;
mod locator;
mod resolvers;
mod traits;

pub use capability::{global_capability, CapabilityStatus, DecryptionCapability};
pub use locator::{ModuleLocator, PROVIDER_MODULE_NAME};
pub use resolvers::{ExportSymbolResolver, OffsetResolver, DEFAULT_ROUTINE_OFFSET};
pub use traits::{AddressResolver, CapabilityState, RetryPolicy, RoutineFn, Transform};
