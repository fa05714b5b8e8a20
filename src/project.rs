//! The CYD project tree and the PlatformIO build variables seen by the hooks.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use log::debug;

use crate::path_buf;
use crate::utils::PathExt;

pub const VAR_BUILD_ACTIVE: &str = "CYD_BUILD_ACTIVE";
pub const VAR_BUILD_PROJECT_DIR: &str = "CYD_BUILD_PROJECT_DIR";
pub const VAR_BUILD_LIBDEPS_DIR: &str = "CYD_BUILD_LIBDEPS_DIR";
pub const VAR_BUILD_ENV: &str = "CYD_BUILD_ENV";
pub const VAR_BUILD_DIR: &str = "CYD_BUILD_DIR";
pub const VAR_BUILD_PROGNAME: &str = "CYD_BUILD_PROGNAME";

pub const PLATFORMIO_INI: &str = "platformio.ini";
pub const TEMPLATE_DIR: &str = "NECESSARY TEMPLATE FILES";
pub const DEFAULT_ENV: &str = "cyd";
pub const DEFAULT_PROGNAME: &str = "firmware";

/// The PlatformIO/SCons variables a build hook works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildEnv {
    /// `$PROJECT_DIR`
    pub project_dir: PathBuf,
    /// `$PROJECT_LIBDEPS_DIR`
    pub libdeps_dir: PathBuf,
    /// `$PIOENV`
    pub env_name: String,
    /// `$BUILD_DIR`
    pub build_dir: PathBuf,
    /// `$PROGNAME`
    pub prog_name: String,
}

impl BuildEnv {
    /// Build variables with the defaults PlatformIO uses for `env_name`.
    pub fn new(project_dir: impl AsRef<Path>, env_name: impl Into<String>) -> Self {
        let project_dir = project_dir.as_ref().to_owned();
        let env_name = env_name.into();

        Self {
            libdeps_dir: path_buf![&project_dir, ".pio", "libdeps"],
            build_dir: path_buf![&project_dir, ".pio", "build", &env_name],
            project_dir,
            env_name,
            prog_name: DEFAULT_PROGNAME.into(),
        }
    }

    /// The variables exported by the `cyd_pre.py`/`cyd_post.py` hooks, if a
    /// PlatformIO build is driving this process.
    pub fn from_hook() -> Option<Self> {
        env::var_os(VAR_BUILD_ACTIVE)?;

        let project_dir = PathBuf::from(env::var_os(VAR_BUILD_PROJECT_DIR)?);
        let env_name = env::var(VAR_BUILD_ENV).ok()?;

        let mut build_env = Self::new(&project_dir, env_name);

        if let Some(libdeps_dir) = env::var_os(VAR_BUILD_LIBDEPS_DIR) {
            build_env.libdeps_dir = PathBuf::from(libdeps_dir).abspath_relative_to(&project_dir);
        }
        if let Some(build_dir) = env::var_os(VAR_BUILD_DIR) {
            build_env.build_dir = PathBuf::from(build_dir).abspath_relative_to(&project_dir);
        }
        if let Ok(prog_name) = env::var(VAR_BUILD_PROGNAME) {
            build_env.prog_name = prog_name;
        }

        debug!("Build variables from PlatformIO hook: {:?}", build_env);

        Some(build_env)
    }

    /// `$PROJECT_LIBDEPS_DIR/$PIOENV`
    pub fn env_libdeps_dir(&self) -> PathBuf {
        self.libdeps_dir.join(&self.env_name)
    }

    /// The application image, `$BUILD_DIR/$PROGNAME.bin`.
    pub fn firmware_bin(&self) -> PathBuf {
        self.build_dir.join(format!("{}.bin", self.prog_name))
    }

    pub fn bootloader_bin(&self) -> PathBuf {
        self.build_dir.join("bootloader.bin")
    }

    pub fn partitions_bin(&self) -> PathBuf {
        self.build_dir.join("partitions.bin")
    }

    /// The merged factory image, e.g. `.pio/build/cyd/cyd_fw_combo.bin`.
    pub fn factory_bin(&self) -> PathBuf {
        self.build_dir.join(format!("{}_fw_combo.bin", self.env_name))
    }
}

/// Fixed locations inside the firmware project tree.
#[derive(Clone, Debug)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the first directory holding a `platformio.ini`.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref().abspath()?;

        match start.ancestors().find(|dir| dir.join(PLATFORMIO_INI).is_file()) {
            Some(root) => {
                debug!("Found project root {}", root.display());
                Ok(Self::new(root))
            }
            None => bail!(
                "No '{}' found in '{}' or any of its parents",
                PLATFORMIO_INI,
                start.display()
            ),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platformio_ini(&self) -> PathBuf {
        self.root.join(PLATFORMIO_INI)
    }

    pub fn template_dir(&self) -> PathBuf {
        self.root.join(TEMPLATE_DIR)
    }

    /// The EEZ Studio flow source that carries the extra-argument bug.
    pub fn eez_flow_source(&self) -> PathBuf {
        path_buf![&self.root, "src", "ui", "eez-flow.cpp"]
    }

    /// The vendored Meshtastic-arduino sources.
    pub fn meshtastic_lib(&self) -> PathBuf {
        path_buf![&self.root, "lib", "meshtastic-arduino_src"]
    }

    pub fn customizations_dir(&self) -> PathBuf {
        path_buf![&self.root, "lib", "meshtastic_customizations"]
    }

    pub fn overrides_dir(&self) -> PathBuf {
        self.customizations_dir().join("esp32_overrides")
    }

    pub fn update_scripts_dir(&self) -> PathBuf {
        self.customizations_dir().join("update_scripts")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.customizations_dir().join("upstream_backup")
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.customizations_dir().join("patches")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_build_env_defaults() {
        let env = BuildEnv::new("/work/cyd", "cyd");

        assert_eq!(env.env_libdeps_dir(), Path::new("/work/cyd/.pio/libdeps/cyd"));
        assert_eq!(env.firmware_bin(), Path::new("/work/cyd/.pio/build/cyd/firmware.bin"));
        assert_eq!(env.factory_bin(), Path::new("/work/cyd/.pio/build/cyd/cyd_fw_combo.bin"));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("src").join("ui");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(PLATFORMIO_INI), "[env:cyd]\n").unwrap();

        let layout = ProjectLayout::discover(&nested).unwrap();
        assert_eq!(layout.root(), dir.path());
        assert_eq!(
            layout.meshtastic_lib(),
            dir.path().join("lib").join("meshtastic-arduino_src")
        );
    }
}
