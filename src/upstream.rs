//! Refreshing the vendored Meshtastic-arduino library from upstream while keeping
//! the ESP32 customizations in place.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use crate::fs::{copy_dir_all, replace_dir};
use crate::patches;
use crate::project::ProjectLayout;

pub const MESHTASTIC_REPO: &str = "https://github.com/meshtastic/Meshtastic-arduino";
pub const DEFAULT_BRANCH: &str = "master";

/// Upstream files copied over the vendored ones; everything else stays local.
pub const UPSTREAM_FILES: &[&str] = &[
    "*.pb.h",
    "*.pb.c",
    "pb.h",
    "pb_*.h",
    "pb_*.c",
    "mt_internals.h",
    "mt_protocol.cpp",
    "Meshtastic.h",
];

/// Protobuf subdirectory that is replaced wholesale.
pub const PROTOBUF_DIR: &str = "meshtastic";

/// Active library file and the master copy in `esp32_overrides/` it comes from.
pub const ESP32_OVERRIDES: &[(&str, &str)] = &[
    ("mt_serial.cpp", "mt_serial_esp32.cpp"),
    ("mt_wifi.cpp", "mt_wifi_esp32.cpp"),
];

/// Strings that identify an ESP32-customized transport file.
pub const ESP32_MARKERS: &[&str] = &["HardwareSerial(2)", "ESP32"];

/// Where the new upstream sources come from.
pub trait UpstreamSource {
    /// Make the upstream `src` directory available, using `workdir` for scratch
    /// files, and return its path.
    fn fetch(&self, workdir: &Path) -> Result<PathBuf>;
}

/// An upstream `src` directory that is already on disk.
#[derive(Clone, Debug)]
pub struct LocalSource(pub PathBuf);

impl UpstreamSource for LocalSource {
    fn fetch(&self, _workdir: &Path) -> Result<PathBuf> {
        if !self.0.is_dir() {
            bail!("Upstream source directory '{}' not found", self.0.display());
        }

        Ok(self.0.clone())
    }
}

/// The branch archive GitHub serves for a repository.
#[cfg(feature = "download")]
#[derive(Clone, Debug)]
pub struct GithubArchive {
    pub repo: String,
    pub branch: String,
}

#[cfg(feature = "download")]
impl Default for GithubArchive {
    fn default() -> Self {
        Self {
            repo: MESHTASTIC_REPO.into(),
            branch: DEFAULT_BRANCH.into(),
        }
    }
}

#[cfg(feature = "download")]
impl GithubArchive {
    pub fn url(&self) -> String {
        format!("{}/archive/refs/heads/{}.zip", self.repo, self.branch)
    }

    /// The top-level folder inside the archive, `<repo name>-<branch>`.
    fn archive_root(&self) -> String {
        let name = self.repo.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        format!("{}-{}", name, self.branch)
    }
}

#[cfg(feature = "download")]
impl UpstreamSource for GithubArchive {
    fn fetch(&self, workdir: &Path) -> Result<PathBuf> {
        let url = self.url();
        info!("Downloading {}", url);

        let mut archive = tempfile::tempfile_in(workdir)?;
        crate::utils::download_file_to(&url, &mut archive)?;

        self.extract(archive, workdir)
            .with_context(|| format!("Bad archive downloaded from {}", url))
    }
}

#[cfg(feature = "download")]
impl GithubArchive {
    /// Unpack a branch archive into `workdir` and return its `src` folder.
    pub fn extract<R>(&self, archive: R, workdir: &Path) -> Result<PathBuf>
    where
        R: std::io::Read + std::io::Seek,
    {
        zip::ZipArchive::new(archive)
            .and_then(|mut zip| zip.extract(workdir))
            .context("Failed to extract the archive")?;

        let src = workdir.join(self.archive_root()).join("src");
        if !src.is_dir() {
            bail!("Could not find src folder '{}' in the archive", src.display());
        }

        Ok(src)
    }
}

#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// File names refreshed from upstream.
    pub updated: Vec<String>,
    pub protobuf_dir_replaced: bool,
    /// Library files rewritten from `esp32_overrides/`.
    pub overrides_applied: Vec<String>,
    pub overrides_missing: Vec<PathBuf>,
    pub patches: Option<patches::PatchReport>,
}

pub struct Updater {
    layout: ProjectLayout,
    apply_patches: bool,
}

impl Updater {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            apply_patches: false,
        }
    }

    /// Re-apply [`patches::ALL_PATCHES`] after a successful update.
    pub fn apply_patches(&mut self, apply: bool) -> &mut Self {
        self.apply_patches = apply;
        self
    }

    /// Back up the library, update it from `source`, and restore the backup
    /// when anything goes wrong.
    pub fn run(&self, source: &dyn UpstreamSource) -> Result<UpdateSummary> {
        let lib_dir = self.layout.meshtastic_lib();
        if !lib_dir.is_dir() {
            bail!("Meshtastic library not found: {}", lib_dir.display());
        }

        info!("Starting Meshtastic update");

        self.backup()?;

        match self.update(source) {
            Ok(mut summary) => {
                self.check_platformio_ini();

                if self.apply_patches {
                    summary.patches = Some(patches::apply_all(
                        &lib_dir,
                        self.layout.patches_dir(),
                        patches::ALL_PATCHES,
                    )?);
                }

                info!("Meshtastic update completed successfully");
                info!("Backup available in {}", self.layout.backup_dir().display());

                Ok(summary)
            }
            Err(err) => {
                warn!("Update failed: {:#}", err);
                info!("Restoring from backup...");

                replace_dir(self.layout.backup_dir(), &lib_dir)
                    .context("Failed to restore the library from its backup")?;
                info!("Backup restored");

                Err(err)
            }
        }
    }

    /// Copy the current library to `upstream_backup/`, replacing an older backup.
    pub fn backup(&self) -> Result<()> {
        let backup_dir = self.layout.backup_dir();

        info!("Backing up current Meshtastic library...");

        replace_dir(self.layout.meshtastic_lib(), &backup_dir)?;

        info!("Backup created at {}", backup_dir.display());
        Ok(())
    }

    fn update(&self, source: &dyn UpstreamSource) -> Result<UpdateSummary> {
        let workdir = tempfile::tempdir()?;
        let src_dir = source.fetch(workdir.path())?;

        let mut summary = self.update_files(&src_dir)?;
        self.apply_overrides(&mut summary)?;
        self.verify_customizations()?;

        Ok(summary)
    }

    fn update_files(&self, src_dir: &Path) -> Result<UpdateSummary> {
        let lib_dir = self.layout.meshtastic_lib();
        let mut summary = UpdateSummary::default();

        info!("Updating protobuf definitions...");

        let walker = globwalk::GlobWalkerBuilder::from_patterns(src_dir, UPSTREAM_FILES)
            .max_depth(1)
            .file_type(globwalk::FileType::FILE)
            .build()?;

        for entry in walker {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();

            fs::copy(entry.path(), lib_dir.join(&name))
                .with_context(|| format!("Failed to update {}", name))?;

            debug!("Updated {}", name);
            summary.updated.push(name);
        }

        summary.updated.sort();
        info!("Updated {} file(s) from upstream", summary.updated.len());

        let protobuf_src = src_dir.join(PROTOBUF_DIR);
        if protobuf_src.is_dir() {
            let protobuf_dest = lib_dir.join(PROTOBUF_DIR);
            if protobuf_dest.exists() {
                fs::remove_dir_all(&protobuf_dest)?;
            }
            copy_dir_all(&protobuf_src, &protobuf_dest)?;

            info!("Updated {} protobuf directory", PROTOBUF_DIR);
            summary.protobuf_dir_replaced = true;
        }

        Ok(summary)
    }

    fn apply_overrides(&self, summary: &mut UpdateSummary) -> Result<()> {
        let lib_dir = self.layout.meshtastic_lib();
        let overrides_dir = self.layout.overrides_dir();

        for (active, master) in ESP32_OVERRIDES {
            let master = overrides_dir.join(master);

            if master.is_file() {
                fs::copy(&master, lib_dir.join(active))
                    .with_context(|| format!("Failed to apply {}", master.display()))?;

                info!("Applied ESP32 customization: {}", active);
                summary.overrides_applied.push((*active).to_owned());
            } else {
                warn!("ESP32 customization not found: {}", master.display());
                summary.overrides_missing.push(master);
            }
        }

        Ok(())
    }

    /// Both transport files must exist in the library after an update.
    pub fn verify_customizations(&self) -> Result<()> {
        let lib_dir = self.layout.meshtastic_lib();

        info!("Verifying customizations...");

        for (active, _) in ESP32_OVERRIDES {
            let path = lib_dir.join(active);

            if !path.is_file() {
                bail!("Missing customization: {}", active);
            }

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read customization {}", path.display()))?;

            if ESP32_MARKERS.iter().any(|m| content.contains(m)) {
                info!("Found ESP32 customization: {}", active);
            } else {
                warn!("{} exists but may not be ESP32 customized", active);
            }
        }

        Ok(())
    }

    fn check_platformio_ini(&self) {
        match fs::read_to_string(self.layout.platformio_ini()) {
            Ok(content) if content.contains("lib/meshtastic_customizations") => {
                info!("platformio.ini already configured")
            }
            Ok(_) => info!(
                "Consider adding 'lib/meshtastic_customizations/esp32_overrides' to lib_extra_dirs"
            ),
            Err(_) => debug!("No platformio.ini to check"),
        }
    }
}
