//! Locating the PlatformIO core installation and its packages.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use log::debug;

use crate::python::PYTHON;

pub const VAR_CORE_DIR: &str = "PLATFORMIO_CORE_DIR";

/// A PlatformIO core directory (`~/.platformio` unless overridden).
#[derive(Clone, Debug)]
pub struct PioCore {
    pub core_dir: PathBuf,
}

impl PioCore {
    pub fn new(core_dir: impl Into<PathBuf>) -> Self {
        Self {
            core_dir: core_dir.into(),
        }
    }

    /// `$PLATFORMIO_CORE_DIR`, falling back to `~/.platformio`.
    pub fn locate() -> Result<Self> {
        let core_dir = match env::var_os(VAR_CORE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => home::home_dir()
                .ok_or_else(|| anyhow!("Cannot determine the home directory"))?
                .join(".platformio"),
        };

        debug!("Using PlatformIO core directory {}", core_dir.display());

        Ok(Self::new(core_dir))
    }

    /// The install directory of a platform package such as `tool-esptoolpy`.
    pub fn package_dir(&self, package: &str) -> Option<PathBuf> {
        let dir = self.core_dir.join("packages").join(package);

        if dir.is_dir() {
            Some(dir)
        } else {
            debug!("PlatformIO package '{}' not installed in {}", package, dir.display());
            None
        }
    }

    /// The python interpreter of PlatformIO's virtual environment, or the system
    /// python when the core has no `penv`.
    pub fn python(&self) -> PathBuf {
        let penv_python = if cfg!(windows) {
            self.core_dir.join("penv").join("Scripts").join("python.exe")
        } else {
            self.core_dir.join("penv").join("bin").join("python")
        };

        if penv_python.is_file() {
            penv_python
        } else {
            PathBuf::from(PYTHON)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_package_dir() {
        let core = tempfile::tempdir().unwrap();
        fs::create_dir_all(core.path().join("packages").join("tool-esptoolpy")).unwrap();

        let pio = PioCore::new(core.path());
        assert!(pio.package_dir("tool-esptoolpy").is_some());
        assert!(pio.package_dir("tool-mkspiffs").is_none());
        assert_eq!(pio.python(), PathBuf::from(PYTHON));
    }
}
