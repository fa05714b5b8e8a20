use anyhow::{anyhow, Context, Result};

use crate::cmd;

#[cfg(windows)]
pub const PYTHON: &str = "python"; // No 'python3.exe' on Windows
#[cfg(not(windows))]
pub const PYTHON: &str = "python3";

/// Check that python is at least `major.minor`.
pub fn check_python_at_least(major: u32, minor: u32) -> Result<()> {
    let version_str = cmd!(PYTHON, "--version")
        .stdout()
        .context("Failed to locate python. Is python installed and in your $PATH?")?;

    check_version(&version_str, major, minor)
        .with_context(|| format!("When running '{} --version'", PYTHON))
}

fn check_version(version_str: &str, major: u32, minor: u32) -> Result<()> {
    let base_err = || anyhow!("Unexpected output from {}", PYTHON);

    let version_str = version_str
        .strip_prefix("Python ")
        .ok_or_else(|| base_err().context("Expected a version string starting with 'Python '"))?;

    let mut version = version_str.split('.').map(|s| s.parse::<u32>().ok());

    let (python_major, python_minor) = match (version.next().flatten(), version.next().flatten()) {
        (Some(major), Some(minor)) => (major, minor),
        _ => {
            return Err(base_err()
                .context("Expected a version string of type '<number>.<number>[.remainder]'"))
        }
    };

    if (python_major, python_minor) < (major, minor) {
        Err(anyhow!(
            "Invalid python version '{}'; expected at least {}.{}",
            version_str,
            major,
            minor
        ))
    } else {
        Ok(())
    }
}
