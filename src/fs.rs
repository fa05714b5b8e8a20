//! Filesystem utilities.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::debug;

/// Copy `src_file` to `dest_file` if `src_file` is different or the destination
/// file doesn't exist. Returns whether a copy took place.
pub fn copy_file_if_different(src_file: impl AsRef<Path>, dest_file: impl AsRef<Path>) -> Result<bool> {
    let src_file = src_file.as_ref();
    let dest_file = dest_file.as_ref();

    if !src_file.is_file() {
        bail!("'{}' is not a file", src_file.display());
    }

    if dest_file.is_file() {
        let same = is_file_eq(&File::open(src_file)?, &File::open(dest_file)?)?;
        if same {
            debug!("'{}' is up to date", dest_file.display());
            return Ok(false);
        }
    }

    fs::copy(src_file, dest_file).with_context(|| {
        format!(
            "Failed to copy '{}' to '{}'",
            src_file.display(),
            dest_file.display()
        )
    })?;

    Ok(true)
}

/// Whether the file type and contents of `file` are equal to `other`.
pub fn is_file_eq(file: &File, other: &File) -> Result<bool> {
    let file_meta = file.metadata()?;
    let other_meta = other.metadata()?;

    if file_meta.file_type() == other_meta.file_type() && file_meta.len() == other_meta.len() {
        let mut file_bytes = io::BufReader::new(file).bytes();
        let mut other_bytes = io::BufReader::new(other).bytes();

        loop {
            match (file_bytes.next(), other_bytes.next()) {
                (Some(Ok(b0)), Some(Ok(b1))) => {
                    if b0 != b1 {
                        break Ok(false);
                    }
                }
                (None, None) => break Ok(true),
                (None, Some(_)) | (Some(_), None) => break Ok(false),
                (Some(Err(e)), _) | (_, Some(Err(e))) => return Err(e.into()),
            }
        }
    } else {
        Ok(false)
    }
}

/// Recursively copy the directory `src` into `dest`, creating `dest` if needed.
pub fn copy_dir_all(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read '{}'", src.display()))? {
        let entry = entry?;
        let target = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Replace the directory `dest` with a recursive copy of `src`.
///
/// Whatever was at `dest` before is removed first.
pub fn replace_dir(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    if !src.is_dir() {
        bail!("'{}' is not a directory", src.display());
    }

    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to remove '{}'", dest.display()))?;
    }

    copy_dir_all(src, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_file_if_different() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.h");
        let dest = dir.path().join("b.h");

        fs::write(&src, "#define A 1\n").unwrap();

        assert!(copy_file_if_different(&src, &dest).unwrap());
        assert!(!copy_file_if_different(&src, &dest).unwrap());

        fs::write(&dest, "#define A 2\n").unwrap();
        assert!(copy_file_if_different(&src, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"#define A 1\n");
    }

    #[test]
    fn test_replace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");

        fs::create_dir_all(src.join("meshtastic")).unwrap();
        fs::write(src.join("meshtastic").join("mesh.pb.h"), "new").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.cpp"), "old").unwrap();

        replace_dir(&src, &dest).unwrap();

        assert!(!dest.join("stale.cpp").exists());
        assert_eq!(
            fs::read_to_string(dest.join("meshtastic").join("mesh.pb.h")).unwrap(),
            "new"
        );
    }
}
