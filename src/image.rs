//! Writing a factory image without esptool.
//!
//! Parts are laid out at their flash offsets with erased-flash (`0xFF`) padding in
//! between, starting from offset `0x0`. Images are written verbatim, so the
//! bootloader must already carry the flash mode/frequency/size of the target.

use std::cmp;
use std::fs::{self, File};
use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use log::{debug, info};

use crate::esptool::{factory_image, FactoryImage, MergeBin};

const ERASED: u8 = 0xFF;

/// Sort `(offset, data)` parts by offset and check that none overlap.
///
/// Returns the image size, i.e. the end of the last part.
pub fn check_layout(parts: &mut [(u32, Vec<u8>)]) -> Result<u64> {
    parts.sort_by_key(|(offset, _)| *offset);

    let mut end: u64 = 0;
    for (offset, data) in parts.iter() {
        let offset = *offset as u64;

        if end > offset {
            bail!(
                "Image part at {:#x} overlaps the previous part ending at {:#x}",
                offset,
                end
            );
        }

        end = offset + data.len() as u64;
    }

    Ok(end)
}

/// Write `(offset, data)` parts in offset order, padding the gaps.
///
/// Returns the number of bytes written, i.e. the end of the last part.
pub fn write<W: Write>(parts: &mut [(u32, Vec<u8>)], output: &mut W) -> Result<u64> {
    check_layout(parts)?;

    let buf = [ERASED; 4096];
    let mut position: u64 = 0;

    for (offset, data) in parts.iter() {
        let offset = *offset as u64;

        while position < offset {
            let delta = cmp::min(buf.len() as u64, offset - position) as usize;
            output.write_all(&buf[..delta])?;
            position += delta as u64;
        }

        output.write_all(data)?;
        position += data.len() as u64;
    }

    Ok(position)
}

/// The native counterpart of `esptool merge_bin` for `merge`.
///
/// An existing image at the output path is only replaced once the parts are
/// known to fit.
pub fn merge(merge: &MergeBin) -> Result<FactoryImage> {
    info!("Generating combined factory binary (native)");

    let mut parts = Vec::new();
    for (offset, file) in merge.parts() {
        let data = fs::read(file)
            .with_context(|| format!("Failed to read image part '{}'", file.display()))?;

        debug!("{:#08x}: {} ({} bytes)", offset, file.display(), data.len());
        parts.push((offset, data));
    }

    check_layout(&mut parts)?;

    let mut output = BufWriter::new(
        File::create(&merge.output)
            .with_context(|| format!("Failed to create '{}'", merge.output.display()))?,
    );
    write(&mut parts, &mut output)?;
    output.flush()?;
    drop(output);

    Ok(factory_image(&merge.output)?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::esptool::FlashLayout;
    use crate::project::BuildEnv;

    /// The part at `offset` with length `len` of a merged image on disk.
    fn read_part(image: impl AsRef<Path>, offset: u32, len: usize) -> Vec<u8> {
        let data = fs::read(image.as_ref()).unwrap();
        let start = offset as usize;

        data[start..start + len].to_vec()
    }

    #[test]
    fn test_factory_image_layout() {
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnv::new(dir.path(), "cyd");
        fs::create_dir_all(&env.build_dir).unwrap();

        let bootloader = vec![0xE9u8; 26_000];
        let partitions = vec![0xAAu8; 3_072];
        let firmware = vec![0x55u8; 1_234_567];
        fs::write(env.bootloader_bin(), &bootloader).unwrap();
        fs::write(env.partitions_bin(), &partitions).unwrap();
        fs::write(env.firmware_bin(), &firmware).unwrap();

        let layout = FlashLayout::default();
        let image = merge(&MergeBin::for_build(&env, layout.clone())).unwrap();

        let padding = layout.bootloader_offset as u64
            + (layout.partitions_offset as u64 - layout.bootloader_offset as u64 - bootloader.len() as u64)
            + (layout.app_offset as u64 - layout.partitions_offset as u64 - partitions.len() as u64);
        let parts = (bootloader.len() + partitions.len() + firmware.len()) as u64;

        assert_eq!(image.size, parts + padding);
        assert_eq!(image.size, layout.app_offset as u64 + firmware.len() as u64);

        let merged = fs::read(&image.path).unwrap();
        assert!(merged[..0x1000].iter().all(|b| *b == ERASED));
        assert_eq!(read_part(&image.path, 0x1000, bootloader.len()), bootloader);
        assert_eq!(read_part(&image.path, 0x8000, partitions.len()), partitions);
        assert_eq!(read_part(&image.path, 0x10000, firmware.len()), firmware);
    }

    #[test]
    fn test_overlapping_parts() {
        let mut parts: Vec<(u32, Vec<u8>)> = vec![(0x1000, vec![0; 0x8000]), (0x8000, vec![1; 16])];

        assert!(write(&mut parts, &mut Vec::<u8>::new()).is_err());
    }

    #[test]
    fn test_failed_merge_keeps_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnv::new(dir.path(), "cyd");
        fs::create_dir_all(&env.build_dir).unwrap();

        let previous = vec![0x42u8; 100_000];
        fs::write(env.factory_bin(), &previous).unwrap();

        // Runs from 0x1000 past the partition table at 0x8000.
        fs::write(env.bootloader_bin(), vec![0xE9u8; 0x8000]).unwrap();
        fs::write(env.partitions_bin(), [0xAAu8; 3072]).unwrap();
        fs::write(env.firmware_bin(), [0x55u8; 4000]).unwrap();

        let err = merge(&MergeBin::for_build(&env, FlashLayout::default())).unwrap_err();

        assert!(err.to_string().contains("overlaps"));
        assert_eq!(fs::read(env.factory_bin()).unwrap(), previous);
    }
}
