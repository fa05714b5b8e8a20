//! Sanity checks of the Meshtastic library layout, to run after an update or
//! when the firmware stops compiling.

use std::fmt;
use std::fs;

use log::{error, info, warn};

use crate::project::ProjectLayout;
use crate::upstream::ESP32_OVERRIDES;

/// Functions each active transport file has to provide.
pub const REQUIRED_FUNCTIONS: &[(&str, &[&str])] = &[
    (
        "mt_serial.cpp",
        &["mt_serial_init", "mt_serial_send_radio", "mt_serial_check_radio"],
    ),
    (
        "mt_wifi.cpp",
        &["mt_wifi_init", "mt_wifi_send_radio", "mt_wifi_check_radio"],
    ),
];

/// Leftovers of the pre-override migration.
const OLD_MODIFIED_FILES: &[&str] = &["mt_serial_ys_modified.cpp", "mt_wifi_ys_modified.cpp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pass => "ok",
            Status::Warn => "warning",
            Status::Fail => "FAILED",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Check {
    pub group: &'static str,
    pub status: Status,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checks: Vec<Check>,
}

impl VerifyReport {
    /// True unless some check failed; warnings do not count.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != Status::Fail)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.status == Status::Fail)
    }

    fn push(&mut self, group: &'static str, status: Status, message: impl Into<String>) {
        let message = message.into();

        match status {
            Status::Pass => info!("  [{}] {}", status, message),
            Status::Warn => warn!("  [{}] {}", status, message),
            Status::Fail => error!("  [{}] {}", status, message),
        }

        self.checks.push(Check {
            group,
            status,
            message,
        });
    }
}

pub struct Verifier<'a> {
    layout: &'a ProjectLayout,
    env_name: &'a str,
}

impl<'a> Verifier<'a> {
    /// `env_name` is the PlatformIO environment `platformio.ini` must define.
    pub fn new(layout: &'a ProjectLayout, env_name: &'a str) -> Self {
        Self { layout, env_name }
    }

    pub fn run(&self) -> VerifyReport {
        let mut report = VerifyReport::default();

        info!("Verifying Meshtastic structure configuration");

        self.directory_structure(&mut report);
        self.platformio_config(&mut report);
        self.esp32_implementations(&mut report);
        self.old_backups(&mut report);

        if report.passed() {
            info!("All verification checks passed");
        } else {
            error!("Some checks failed, see above");
        }

        report
    }

    fn directory_structure(&self, report: &mut VerifyReport) {
        const GROUP: &str = "directories";

        info!("Testing directory structure...");

        for dir in [
            self.layout.overrides_dir(),
            self.layout.update_scripts_dir(),
            self.layout.backup_dir(),
        ] {
            if dir.is_dir() {
                report.push(GROUP, Status::Pass, format!("directory exists: {}", dir.display()));
            } else {
                report.push(GROUP, Status::Fail, format!("missing directory: {}", dir.display()));
            }
        }
    }

    fn platformio_config(&self, report: &mut VerifyReport) {
        const GROUP: &str = "platformio.ini";

        info!("Testing platformio.ini configuration...");

        let content = match fs::read_to_string(self.layout.platformio_ini()) {
            Ok(content) => content,
            Err(_) => {
                report.push(GROUP, Status::Fail, "platformio.ini not found");
                return;
            }
        };

        if content.contains("lib_extra_dirs")
            && content.contains("lib/meshtastic_customizations/esp32_overrides")
        {
            report.push(
                GROUP,
                Status::Warn,
                "old lib_extra_dirs configuration found; overrides are now copied into the library",
            );
        }

        if !content.contains("lib_deps") {
            report.push(GROUP, Status::Fail, "lib_deps section not found");
        }

        let env_section = format!("[env:{}]", self.env_name);
        if !content.contains(&env_section) {
            report.push(GROUP, Status::Fail, format!("{} section not found", env_section));
        }

        if content.contains("lib_deps") && content.contains(&env_section) {
            report.push(GROUP, Status::Pass, "platformio.ini has required sections");
        }
    }

    fn esp32_implementations(&self, report: &mut VerifyReport) {
        const GROUP: &str = "esp32 overrides";

        info!("Testing ESP32 implementation files...");

        let overrides_dir = self.layout.overrides_dir();
        for (_, master) in ESP32_OVERRIDES {
            if overrides_dir.join(master).is_file() {
                report.push(GROUP, Status::Pass, format!("master file exists: {}", master));
            } else {
                report.push(GROUP, Status::Fail, format!("missing master file: {}", master));
            }
        }

        let lib_dir = self.layout.meshtastic_lib();
        for (file, functions) in REQUIRED_FUNCTIONS {
            let content = match fs::read_to_string(lib_dir.join(file)) {
                Ok(content) => content,
                Err(_) => {
                    report.push(GROUP, Status::Fail, format!("missing active implementation: {}", file));
                    continue;
                }
            };

            if !content.contains("ESP32") && !content.contains("HardwareSerial(2)") {
                report.push(GROUP, Status::Warn, format!("{} may not be ESP32 customized", file));
            }

            let missing = functions
                .iter()
                .filter(|f| !content.contains(*f))
                .copied()
                .collect::<Vec<_>>();

            if missing.is_empty() {
                report.push(GROUP, Status::Pass, format!("active implementation correct: {}", file));
            } else {
                report.push(
                    GROUP,
                    Status::Fail,
                    format!("missing functions in {}: {}", file, missing.join(", ")),
                );
            }
        }
    }

    /// Informational only, never fails.
    fn old_backups(&self, report: &mut VerifyReport) {
        const GROUP: &str = "old backups";

        info!("Checking backup file status...");

        let lib_dir = self.layout.meshtastic_lib();

        let mut backup_found = false;
        for file in OLD_MODIFIED_FILES {
            let backup = format!("{}.backup", file);
            if lib_dir.join(&backup).is_file() {
                report.push(GROUP, Status::Pass, format!("backup preserved: {}", backup));
                backup_found = true;
            }
        }

        if !backup_found {
            info!("  No backup files found - likely cleaned up after migration");
        }

        for file in OLD_MODIFIED_FILES {
            if lib_dir.join(file).exists() {
                report.push(
                    GROUP,
                    Status::Warn,
                    format!("old active file still exists: {} (consider removing)", file),
                );
            }
        }
    }
}
