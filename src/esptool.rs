//! Merging bootloader, partition table and application into one factory image
//! with esptool's `merge_bin`.
//!
//! The factory image is flashed at offset `0x0`.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::cmd::{Cmd, CmdError};
use crate::project::BuildEnv;

pub const ESPTOOL_PACKAGE: &str = "tool-esptoolpy";
pub const ESPTOOL_SCRIPT: &str = "esptool.py";

#[derive(Debug, thiserror::Error)]
pub enum EsptoolError {
    #[error("esptool not found; install the PlatformIO '{}' package or put esptool on $PATH", ESPTOOL_PACKAGE)]
    NotFound,
    #[error("no usable python to run {}", ESPTOOL_SCRIPT)]
    Python(#[source] anyhow::Error),
    #[error("image part not found: {0}")]
    MissingInput(PathBuf),
    #[error("esptool merge_bin failed")]
    Merge(#[from] CmdError),
    #[error("failed to read the factory image {0}")]
    Output(PathBuf, #[source] std::io::Error),
}

/// Chip, flash settings and the offsets of the three image parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlashLayout {
    pub chip: String,
    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,
    pub bootloader_offset: u32,
    pub partitions_offset: u32,
    pub app_offset: u32,
}

impl Default for FlashLayout {
    /// The CYD's ESP32-WROOM-32 with 4MB of DIO flash.
    fn default() -> Self {
        Self {
            chip: "esp32".into(),
            flash_mode: "dio".into(),
            flash_freq: "40m".into(),
            flash_size: "4MB".into(),
            bootloader_offset: 0x1000,
            partitions_offset: 0x8000,
            app_offset: 0x10000,
        }
    }
}

/// One `merge_bin` invocation.
#[derive(Clone, Debug)]
pub struct MergeBin {
    pub layout: FlashLayout,
    pub output: PathBuf,
    pub bootloader: PathBuf,
    pub partitions: PathBuf,
    pub app: PathBuf,
}

impl MergeBin {
    /// `merge_bin` for the binaries of a PlatformIO build.
    pub fn for_build(env: &BuildEnv, layout: FlashLayout) -> Self {
        Self {
            layout,
            output: env.factory_bin(),
            bootloader: env.bootloader_bin(),
            partitions: env.partitions_bin(),
            app: env.firmware_bin(),
        }
    }

    /// The parts in flash order.
    pub fn parts(&self) -> [(u32, &Path); 3] {
        [
            (self.layout.bootloader_offset, self.bootloader.as_path()),
            (self.layout.partitions_offset, self.partitions.as_path()),
            (self.layout.app_offset, self.app.as_path()),
        ]
    }

    /// esptool arguments, `--chip` through the last address/file pair.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--chip".into(),
            self.layout.chip.clone().into(),
            "merge_bin".into(),
            "-o".into(),
            self.output.clone().into(),
            "--flash_mode".into(),
            self.layout.flash_mode.clone().into(),
            "--flash_freq".into(),
            self.layout.flash_freq.clone().into(),
            "--flash_size".into(),
            self.layout.flash_size.clone().into(),
        ];

        for (offset, file) in self.parts() {
            args.push(format!("{:#x}", offset).into());
            args.push(file.into());
        }

        args
    }

    fn check_inputs(&self) -> Result<(), EsptoolError> {
        match self.parts().iter().find(|(_, file)| !file.is_file()) {
            Some((_, file)) => Err(EsptoolError::MissingInput(file.to_path_buf())),
            None => Ok(()),
        }
    }
}

/// How to launch esptool: a program plus leading arguments (the script path when
/// esptool.py runs through python).
#[derive(Clone, Debug)]
pub struct Esptool {
    pub program: PathBuf,
    pub prefix_args: Vec<OsString>,
}

impl Esptool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Run `script` with the given python interpreter.
    pub fn script(python: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        let script: PathBuf = script.into();

        Self {
            program: python.into(),
            prefix_args: vec![script.into_os_string()],
        }
    }

    /// PlatformIO's `tool-esptoolpy` package, else `esptool.py` or `esptool` from `$PATH`.
    #[cfg(feature = "pio")]
    pub fn locate(pio: &crate::pio::PioCore) -> Result<Self, EsptoolError> {
        if let Some(script) = pio
            .package_dir(ESPTOOL_PACKAGE)
            .map(|dir| dir.join(ESPTOOL_SCRIPT))
            .filter(|script| script.is_file())
        {
            info!("esptool found at: {}", script.display());

            let python = pio.python();
            if python == Path::new(crate::python::PYTHON) {
                crate::python::check_python_at_least(3, 7).map_err(EsptoolError::Python)?;
            }

            return Ok(Self::script(python, script));
        }

        for name in [ESPTOOL_SCRIPT, "esptool"] {
            if let Ok(program) = which::which(name) {
                info!("esptool found on $PATH: {}", program.display());
                return Ok(Self::new(program));
            }
        }

        Err(EsptoolError::NotFound)
    }

    pub fn command(&self) -> Cmd {
        let mut cmd = Cmd::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

/// The merged image and its size in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryImage {
    pub path: PathBuf,
    pub size: u64,
}

impl fmt::Display for FactoryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {:.2} MB)",
            self.path.display(),
            self.size,
            self.size as f64 / 1024.0 / 1024.0
        )
    }
}

/// Run `merge_bin` and report the resulting image.
pub fn merge_factory_image(esptool: &Esptool, merge: &MergeBin) -> Result<FactoryImage, EsptoolError> {
    info!("Generating combined factory binary");
    debug!("Parts: {:?}", merge.parts());

    merge.check_inputs()?;

    let mut cmd = esptool.command();
    cmd.args(merge.args());

    debug!("Running {:?}", cmd.cmd);
    cmd.run()?;

    factory_image(&merge.output)
}

pub(crate) fn factory_image(path: &Path) -> Result<FactoryImage, EsptoolError> {
    let size = fs::metadata(path)
        .map_err(|e| EsptoolError::Output(path.to_owned(), e))?
        .len();

    let image = FactoryImage {
        path: path.to_owned(),
        size,
    };

    info!("Successfully created factory image: {}", image);
    info!("Use offset 0x0 when flashing");

    Ok(image)
}
