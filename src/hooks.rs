//! PlatformIO `extra_scripts` that run `cargo-cyd` before and after a build.
//!
//! The scripts export the SCons variables as `CYD_BUILD_*` environment variables,
//! which [`BuildEnv::from_hook`](crate::project::BuildEnv::from_hook) picks up.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

pub const PRE_SCRIPT: &str = "cyd_pre.py";
pub const POST_SCRIPT: &str = "cyd_post.py";

const CYD_PRE_PY: &[u8] = include_bytes!("resources/cyd_pre.py.resource");
const CYD_POST_PY: &[u8] = include_bytes!("resources/cyd_post.py.resource");

/// The `platformio.ini` line that activates the hooks.
pub fn extra_scripts_line() -> String {
    format!("extra_scripts = pre:{} post:{}", PRE_SCRIPT, POST_SCRIPT)
}

/// Write both hook scripts into `project_dir` and return their paths.
pub fn install_hooks(project_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let project_dir = project_dir.as_ref();

    let mut written = Vec::new();
    for (name, data) in [(PRE_SCRIPT, CYD_PRE_PY), (POST_SCRIPT, CYD_POST_PY)] {
        let dest_file = project_dir.join(name);

        debug!("Creating/updating {}", dest_file.display());
        fs::write(&dest_file, data)
            .with_context(|| format!("Failed to write '{}'", dest_file.display()))?;

        written.push(dest_file);
    }

    if hooks_enabled(project_dir) {
        info!("Hooks already enabled in platformio.ini");
    } else {
        info!("Add this line to the [env] section of platformio.ini:");
        info!("  {}", extra_scripts_line());
    }

    Ok(written)
}

/// Whether `platformio.ini` already lists both hook scripts.
pub fn hooks_enabled(project_dir: &Path) -> bool {
    fs::read_to_string(project_dir.join(crate::project::PLATFORMIO_INI))
        .map(|ini| ini.contains(PRE_SCRIPT) && ini.contains(POST_SCRIPT))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_hooks() {
        let dir = tempfile::tempdir().unwrap();

        let written = install_hooks(dir.path()).unwrap();
        assert_eq!(written, [dir.path().join(PRE_SCRIPT), dir.path().join(POST_SCRIPT)]);

        let pre = fs::read_to_string(dir.path().join(PRE_SCRIPT)).unwrap();
        assert!(pre.contains("\"copy-configs\""));
        assert!(pre.contains(crate::project::VAR_BUILD_PROJECT_DIR));

        let post = fs::read_to_string(dir.path().join(POST_SCRIPT)).unwrap();
        assert!(post.contains("AddPostAction(\"$BUILD_DIR/${PROGNAME}.bin\""));
        assert!(post.contains("\"merge-image\""));

        assert!(!hooks_enabled(dir.path()));
        fs::write(
            dir.path().join("platformio.ini"),
            format!("[env:cyd]\n{}\n", extra_scripts_line()),
        )
        .unwrap();
        assert!(hooks_enabled(dir.path()));
    }
}
