// Provider module discovery
//
// Candidates are checked in order, the first existing file wins:
// 1. explicit override path
// 2. installation directories derived from the environment
// 3. fixed well-known paths

use std::path::{Path, PathBuf};

/// Canonical module name used for the in-memory handle lookup
pub const PROVIDER_MODULE_NAME: &str = "Weixin.dll";

const INSTALL_SUBDIRS: [&str; 2] = ["Tencent\\Weixin", "Tencent/Weixin"];

#[derive(Debug, Clone)]
pub struct ModuleLocator {
    override_path: Option<PathBuf>,
    module_name: String,
}

impl ModuleLocator {
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self {
            override_path,
            module_name: PROVIDER_MODULE_NAME.to_string(),
        }
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// All candidate paths in probe order
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(path) = &self.override_path {
            paths.push(path.clone());
        }

        for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
            if let Ok(dir) = std::env::var(var) {
                for sub in INSTALL_SUBDIRS {
                    paths.push(Path::new(&dir).join(sub).join(&self.module_name));
                }
            }
        }

        if let Some(local) = dirs::data_local_dir() {
            paths.push(
                local
                    .join("Programs")
                    .join("Tencent")
                    .join("Weixin")
                    .join(&self.module_name),
            );
        }

        for dir in [
            "C:\\Program Files\\Tencent\\Weixin",
            "C:\\Program Files (x86)\\Tencent\\Weixin",
            "D:\\Program Files\\Tencent\\Weixin",
        ] {
            paths.push(Path::new(dir).join(&self.module_name));
        }

        paths
    }

    /// First candidate that exists on disk
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|p| p.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_is_first_candidate() {
        let locator = ModuleLocator::new(Some(PathBuf::from("/opt/provider/custom.dll")));
        assert_eq!(
            locator.candidates()[0],
            PathBuf::from("/opt/provider/custom.dll")
        );
    }

    #[test]
    fn test_locate_existing_override() {
        let path = std::env::temp_dir().join(format!("moments-provider-{}.dll", std::process::id()));
        std::fs::write(&path, b"MZ").unwrap();

        let locator = ModuleLocator::new(Some(path.clone()));
        assert_eq!(locator.locate(), Some(path.clone()));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_override_is_skipped() {
        let locator = ModuleLocator::new(Some(PathBuf::from("/definitely/not/here.dll")))
            .with_module_name("not-a-real-module-name.dll");
        assert_eq!(locator.locate(), None);
    }
}
