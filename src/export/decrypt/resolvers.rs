// Address resolution strategies for the native routine

use libloading::Library;
use std::path::Path;

use super::traits::{AddressResolver, RoutineFn, Transform};
use crate::export::errors::ExportError;

/// Offset of the routine from the module base for the supported provider build
pub const DEFAULT_ROUTINE_OFFSET: usize = 0x0289_F6C0;

/// Routine bound to a loaded library. The library stays loaded as long as
/// this value lives.
struct NativeRoutine {
    func: RoutineFn,
    _library: Library,
}

impl Transform for NativeRoutine {
    fn apply(&self, src: &[u8], dst: &mut [u8], key: u64) -> Result<u64, ExportError> {
        if dst.len() != src.len() {
            return Err(ExportError::Unknown(format!(
                "output buffer is {} bytes, input is {}",
                dst.len(),
                src.len()
            )));
        }

        let written = unsafe { (self.func)(src.as_ptr(), src.len() as u64, dst.as_mut_ptr(), key) };
        if written == 0 {
            return Err(ExportError::Unknown("routine returned 0".to_string()));
        }
        Ok(written)
    }
}

fn load_library(module: &Path) -> Result<Library, ExportError> {
    unsafe { Library::new(module) }.map_err(|e| {
        ExportError::CapabilityUnavailable(format!("failed to load {}: {}", module.display(), e))
    })
}

/// Base address + fixed offset
pub struct OffsetResolver {
    offset: usize,
    module_name: String,
}

impl OffsetResolver {
    pub fn new(module_name: impl Into<String>, offset: usize) -> Self {
        Self {
            offset,
            module_name: module_name.into(),
        }
    }
}

impl AddressResolver for OffsetResolver {
    fn name(&self) -> &'static str {
        "module-offset"
    }

    fn resolve(&self, module: &Path) -> Result<Box<dyn Transform>, ExportError> {
        let library = load_library(module)?;
        let base = module_base(&self.module_name, module)?;

        let addr = base.checked_add(self.offset).ok_or_else(|| {
            ExportError::CapabilityUnavailable(format!(
                "offset {:#x} overflows base {:#x}",
                self.offset, base
            ))
        })?;

        tracing::debug!(
            "[Decrypt] {} base={:#x} offset={:#x} routine={:#x}",
            self.module_name,
            base,
            self.offset,
            addr
        );

        let func = unsafe { std::mem::transmute::<usize, RoutineFn>(addr) };
        Ok(Box::new(NativeRoutine {
            func,
            _library: library,
        }))
    }
}

/// Canonical module name first, then the file basename
#[cfg(windows)]
fn module_base(canonical: &str, module: &Path) -> Result<usize, ExportError> {
    use libloading::os::windows::Library as WinLibrary;
    use std::ffi::OsString;

    let mut names = vec![OsString::from(canonical)];
    if let Some(basename) = module.file_name() {
        if basename != names[0].as_os_str() {
            names.push(basename.to_os_string());
        }
    }

    for name in &names {
        if let Ok(handle) = unsafe { WinLibrary::open_already_loaded(name) } {
            let base = handle.into_raw() as usize;
            if base != 0 {
                return Ok(base);
            }
        }
    }

    Err(ExportError::CapabilityUnavailable(format!(
        "module handle not found for {:?}",
        names
    )))
}

#[cfg(not(windows))]
fn module_base(canonical: &str, _module: &Path) -> Result<usize, ExportError> {
    Err(ExportError::CapabilityUnavailable(format!(
        "module handle lookup for {} is only supported on Windows",
        canonical
    )))
}

/// Named export lookup, for provider builds that export the routine
pub struct ExportSymbolResolver {
    symbol: String,
}

impl ExportSymbolResolver {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl AddressResolver for ExportSymbolResolver {
    fn name(&self) -> &'static str {
        "export-symbol"
    }

    fn resolve(&self, module: &Path) -> Result<Box<dyn Transform>, ExportError> {
        let library = load_library(module)?;

        let func: RoutineFn = {
            let symbol = unsafe { library.get::<RoutineFn>(self.symbol.as_bytes()) }.map_err(|e| {
                ExportError::CapabilityUnavailable(format!("symbol {} not found: {}", self.symbol, e))
            })?;
            *symbol
        };

        Ok(Box::new(NativeRoutine {
            func,
            _library: library,
        }))
    }
}
