//! Copying the customized LVGL and TFT_eSPI configuration headers into
//! PlatformIO's library dependency folders.
//!
//! Library updates overwrite `lv_conf.h` and `TFT_eSPI/User_Setup.h` with their
//! defaults. The copy only happens while `<libdeps>/<env>/lv_conf.h` is absent,
//! so delete that file to force a fresh copy on the next build.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::fs::copy_file_if_different;
use crate::project::BuildEnv;

pub const LV_CONF_H: &str = "lv_conf.h";
pub const USER_SETUP_H: &str = "User_Setup.h";
pub const TFT_ESPI_DIR: &str = "TFT_eSPI";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("template directory not found: {0}")]
    TemplateDirMissing(PathBuf),
    #[error("template file not found: {0}")]
    SourceMissing(PathBuf),
    #[error("failed to copy '{0}' to '{1}'")]
    Copy(PathBuf, PathBuf, #[source] anyhow::Error),
    #[error("failed to create '{0}'")]
    CreateDir(PathBuf, #[source] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// `lv_conf.h` was already in place; nothing was written.
    Skipped,
    /// The listed destination files were written.
    Copied(Vec<PathBuf>),
}

/// A source header and where it goes.
#[derive(Clone, Debug)]
pub struct ConfigFile {
    pub src: PathBuf,
    pub dest: PathBuf,
}

/// The two headers for `env`, `lv_conf.h` first.
pub fn config_files(env: &BuildEnv, template_dir: &Path) -> [ConfigFile; 2] {
    let env_libdeps = env.env_libdeps_dir();

    [
        ConfigFile {
            src: template_dir.join(LV_CONF_H),
            dest: env_libdeps.join(LV_CONF_H),
        },
        ConfigFile {
            src: template_dir.join(USER_SETUP_H),
            dest: env_libdeps.join(TFT_ESPI_DIR).join(USER_SETUP_H),
        },
    ]
}

/// Copy the headers unless `lv_conf.h` already exists at its destination.
pub fn copy_configs(env: &BuildEnv, template_dir: &Path) -> Result<CopyOutcome, ConfigError> {
    let files = prepare(env, template_dir)?;

    if files[0].dest.exists() {
        info!("CYD files not copied - {} already exists", LV_CONF_H);
        return Ok(CopyOutcome::Skipped);
    }

    // Both sources must exist, otherwise a lone lv_conf.h would block later copies.
    if let Some(missing) = files.iter().find(|file| !file.src.is_file()) {
        return Err(ConfigError::SourceMissing(missing.src.clone()));
    }

    let mut copied = Vec::new();

    for file in &files {
        fs::copy(&file.src, &file.dest)
            .map_err(|e| ConfigError::Copy(file.src.clone(), file.dest.clone(), e.into()))?;

        info!("Copied {} to {}", file.src.display(), file.dest.display());
        copied.push(file.dest.clone());
    }

    info!("CYD configuration files copied successfully");

    Ok(CopyOutcome::Copied(copied))
}

/// Copy every header whose destination is missing or differs from the template,
/// ignoring the `lv_conf.h` guard.
pub fn force_copy_configs(env: &BuildEnv, template_dir: &Path) -> Result<CopyOutcome, ConfigError> {
    let files = prepare(env, template_dir)?;

    let mut copied = Vec::new();

    for file in &files {
        if !file.src.is_file() {
            return Err(ConfigError::SourceMissing(file.src.clone()));
        }

        let changed = copy_file_if_different(&file.src, &file.dest)
            .map_err(|e| ConfigError::Copy(file.src.clone(), file.dest.clone(), e))?;

        if changed {
            info!("Copied {} to {}", file.src.display(), file.dest.display());
            copied.push(file.dest.clone());
        } else {
            debug!("{} is up to date", file.dest.display());
        }
    }

    Ok(CopyOutcome::Copied(copied))
}

fn prepare(env: &BuildEnv, template_dir: &Path) -> Result<[ConfigFile; 2], ConfigError> {
    info!("Copying CYD configuration files...");

    if !template_dir.is_dir() {
        return Err(ConfigError::TemplateDirMissing(template_dir.to_owned()));
    }

    let files = config_files(env, template_dir);

    for file in &files {
        if let Some(parent) = file.dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::CreateDir(parent.to_owned(), e))?;
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LV_CONF: &str = "#define LV_COLOR_DEPTH 16\n";
    const USER_SETUP: &str = "#define ILI9341_2_DRIVER\n#define TFT_WIDTH 240\n";

    fn project() -> (tempfile::TempDir, BuildEnv, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let template_dir = dir.path().join(crate::project::TEMPLATE_DIR);

        fs::create_dir_all(&template_dir).unwrap();
        fs::write(template_dir.join(LV_CONF_H), LV_CONF).unwrap();
        fs::write(template_dir.join(USER_SETUP_H), USER_SETUP).unwrap();

        let env = BuildEnv::new(dir.path(), "cyd");
        (dir, env, template_dir)
    }

    #[test]
    fn test_copies_both_headers() {
        let (_dir, env, template_dir) = project();

        let outcome = copy_configs(&env, &template_dir).unwrap();

        let lv_conf = env.env_libdeps_dir().join(LV_CONF_H);
        let user_setup = env.env_libdeps_dir().join(TFT_ESPI_DIR).join(USER_SETUP_H);
        assert_eq!(outcome, CopyOutcome::Copied(vec![lv_conf.clone(), user_setup.clone()]));
        assert_eq!(fs::read_to_string(lv_conf).unwrap(), LV_CONF);
        assert_eq!(fs::read_to_string(user_setup).unwrap(), USER_SETUP);
    }

    #[test]
    fn test_existing_lv_conf_is_left_alone() {
        let (_dir, env, template_dir) = project();

        let lv_conf = env.env_libdeps_dir().join(LV_CONF_H);
        fs::create_dir_all(lv_conf.parent().unwrap()).unwrap();
        fs::write(&lv_conf, "/* tuned by hand */\n").unwrap();

        assert_eq!(copy_configs(&env, &template_dir).unwrap(), CopyOutcome::Skipped);
        assert_eq!(fs::read_to_string(&lv_conf).unwrap(), "/* tuned by hand */\n");
        assert!(!env.env_libdeps_dir().join(TFT_ESPI_DIR).join(USER_SETUP_H).exists());
    }

    #[test]
    fn test_missing_template_dir() {
        let (dir, env, _) = project();

        let err = copy_configs(&env, &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateDirMissing(_)));
    }

    #[test]
    fn test_missing_template_file() {
        let (_dir, env, template_dir) = project();
        fs::remove_file(template_dir.join(USER_SETUP_H)).unwrap();

        let err = copy_configs(&env, &template_dir).unwrap_err();
        assert!(matches!(err, ConfigError::SourceMissing(_)));
        assert!(!env.env_libdeps_dir().join(LV_CONF_H).exists());
    }

    #[test]
    fn test_force_copy_only_rewrites_changed() {
        let (_dir, env, template_dir) = project();
        copy_configs(&env, &template_dir).unwrap();

        let lv_conf = env.env_libdeps_dir().join(LV_CONF_H);
        fs::write(&lv_conf, "#define LV_COLOR_DEPTH 32\n").unwrap();

        let outcome = force_copy_configs(&env, &template_dir).unwrap();
        assert_eq!(outcome, CopyOutcome::Copied(vec![lv_conf.clone()]));
        assert_eq!(fs::read_to_string(lv_conf).unwrap(), LV_CONF);
    }
}
