use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cydbuild::configs::{self, CopyOutcome};
use cydbuild::esptool::{self, Esptool, FlashLayout, MergeBin};
use cydbuild::patches;
use cydbuild::pio::PioCore;
use cydbuild::project::{BuildEnv, ProjectLayout, DEFAULT_ENV};
use cydbuild::upstream::{self, GithubArchive, LocalSource, UpstreamSource, Updater};
use cydbuild::utils::PathExt;
use cydbuild::verify::Verifier;
use cydbuild::{dropdown, hooks, image};
use log::*;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    author,
    about = "Build hooks and maintenance tasks for the CYD Meshtastic firmware",
    setting = structopt::clap::AppSettings::DeriveDisplayOrder
)]
struct Opt {
    /// Prints verbose output
    #[structopt(short, long)]
    verbose: bool,
    /// Stay quiet, only print warnings and errors
    #[structopt(short, long)]
    quiet: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Copies lv_conf.h and User_Setup.h from the template folder into the library dependencies
    ///
    /// Nothing is copied while <libdeps>/<env>/lv_conf.h exists; delete it to force a copy
    CopyConfigs {
        #[structopt(flatten)]
        build: BuildArgs,

        /// Folder holding the customized headers. Defaults to '<project>/NECESSARY TEMPLATE FILES'
        #[structopt(long, parse(from_os_str))]
        template_dir: Option<PathBuf>,

        /// Copy every header that differs from its template, even if lv_conf.h exists
        #[structopt(long)]
        force: bool,
    },
    /// Rewrites three-argument lv_dropdown_set_selected calls generated by EEZ Studio
    FixDropdown {
        #[structopt(flatten)]
        project: ProjectArgs,

        /// Source file to patch. Defaults to '<project>/src/ui/eez-flow.cpp'
        #[structopt(parse(from_os_str))]
        file: Option<PathBuf>,
    },
    /// Applies the bug fixes to the vendored Meshtastic library
    ApplyPatches {
        #[structopt(flatten)]
        project: ProjectArgs,

        /// Library directory. Defaults to '<project>/lib/meshtastic-arduino_src'
        #[structopt(long, parse(from_os_str))]
        lib_dir: Option<PathBuf>,

        /// Fail when a patch no longer matches the upstream code
        #[structopt(long)]
        strict: bool,
    },
    /// Updates the vendored Meshtastic library from upstream, keeping the ESP32 overrides
    Update {
        #[structopt(flatten)]
        project: ProjectArgs,

        /// Use an upstream 'src' directory on disk instead of downloading
        #[structopt(long, parse(from_os_str))]
        from: Option<PathBuf>,

        /// Upstream repository
        #[structopt(long, default_value = upstream::MESHTASTIC_REPO)]
        repo: String,

        /// Upstream branch
        #[structopt(long, default_value = upstream::DEFAULT_BRANCH)]
        branch: String,

        /// Re-apply the library bug fixes after updating
        #[structopt(long)]
        patch: bool,
    },
    /// Verifies the Meshtastic library structure and platformio.ini
    Verify {
        #[structopt(flatten)]
        project: ProjectArgs,

        /// PlatformIO environment that platformio.ini must define
        #[structopt(short, long, default_value = DEFAULT_ENV)]
        environment: String,
    },
    /// Merges bootloader, partition table and firmware into <build>/<env>_fw_combo.bin
    MergeImage {
        #[structopt(flatten)]
        build: BuildArgs,

        #[structopt(flatten)]
        flash: FlashArgs,

        /// Path to esptool or esptool.py. Defaults to PlatformIO's tool-esptoolpy package
        #[structopt(long, parse(from_os_str))]
        esptool: Option<PathBuf>,

        /// Write the image without esptool
        #[structopt(long, conflicts_with = "esptool")]
        native: bool,
    },
    /// Writes the PlatformIO pre/post build scripts that call this tool
    InstallHooks {
        #[structopt(flatten)]
        project: ProjectArgs,
    },
}

#[derive(Debug, StructOpt)]
struct ProjectArgs {
    /// Project directory. Defaults to the closest parent directory with a platformio.ini
    #[structopt(short = "d", long, parse(from_os_str))]
    project_dir: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
struct BuildArgs {
    #[structopt(flatten)]
    project: ProjectArgs,

    /// PlatformIO environment
    #[structopt(short, long, env = "PIOENV")]
    environment: Option<String>,

    /// Library dependency directory. Defaults to '<project>/.pio/libdeps'
    #[structopt(long, parse(from_os_str))]
    libdeps_dir: Option<PathBuf>,

    /// Build directory. Defaults to '<project>/.pio/build/<env>'
    #[structopt(long, parse(from_os_str))]
    build_dir: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
struct FlashArgs {
    /// Target chip
    #[structopt(long)]
    chip: Option<String>,
    /// Flash mode
    #[structopt(long)]
    flash_mode: Option<String>,
    /// Flash frequency
    #[structopt(long)]
    flash_freq: Option<String>,
    /// Flash size
    #[structopt(long)]
    flash_size: Option<String>,
}

impl ProjectArgs {
    fn layout(&self) -> Result<ProjectLayout> {
        match &self.project_dir {
            Some(dir) => Ok(ProjectLayout::new(dir.abspath()?)),
            None => ProjectLayout::discover(env::current_dir()?),
        }
    }
}

impl BuildArgs {
    /// The variables of a running PlatformIO hook win over the command line.
    fn build_env(&self) -> Result<BuildEnv> {
        if let Some(build_env) = BuildEnv::from_hook() {
            return Ok(build_env);
        }

        let layout = self.project.layout()?;
        let mut build_env = BuildEnv::new(
            layout.root(),
            self.environment.as_deref().unwrap_or(DEFAULT_ENV),
        );

        if let Some(libdeps_dir) = &self.libdeps_dir {
            build_env.libdeps_dir = libdeps_dir.abspath_relative_to(layout.root());
        }
        if let Some(build_dir) = &self.build_dir {
            build_env.build_dir = build_dir.abspath_relative_to(layout.root());
        }

        Ok(build_env)
    }
}

impl FlashArgs {
    fn layout(self) -> FlashLayout {
        let mut layout = FlashLayout::default();

        if let Some(chip) = self.chip {
            layout.chip = chip;
        }
        if let Some(flash_mode) = self.flash_mode {
            layout.flash_mode = flash_mode;
        }
        if let Some(flash_freq) = self.flash_freq {
            layout.flash_freq = flash_freq;
        }
        if let Some(flash_size) = self.flash_size {
            layout.flash_size = flash_size;
        }

        layout
    }
}

fn main() -> Result<()> {
    let as_plugin = env::args().nth(1).iter().any(|s| s == "cyd");

    let args = env::args_os().skip(as_plugin as usize);
    let opt = Opt::from_iter(args);

    env_logger::Builder::from_env(
        env_logger::Env::new()
            .write_style_or("CARGO_CYD_LOG_STYLE", "Auto")
            .filter_or(
                "CARGO_CYD_LOG",
                (if opt.quiet {
                    LevelFilter::Warn
                } else if opt.verbose {
                    LevelFilter::Debug
                } else {
                    LevelFilter::Info
                })
                .to_string(),
            ),
    )
    .target(env_logger::Target::Stderr)
    .format_level(false)
    .format_indent(None)
    .format_module_path(false)
    .format_timestamp(None)
    .init();

    match opt.cmd {
        Command::CopyConfigs {
            build,
            template_dir,
            force,
        } => {
            let build_env = build.build_env()?;
            let template_dir = template_dir
                .unwrap_or_else(|| ProjectLayout::new(&build_env.project_dir).template_dir());

            let outcome = if force {
                configs::force_copy_configs(&build_env, &template_dir)?
            } else {
                configs::copy_configs(&build_env, &template_dir)?
            };

            if let CopyOutcome::Copied(files) = outcome {
                debug!("Copied {} file(s)", files.len());
            }

            Ok(())
        }
        Command::FixDropdown { project, file } => {
            let file = match file {
                Some(file) => file,
                None => project.layout()?.eez_flow_source(),
            };

            dropdown::fix_dropdown_file(&file)?;
            Ok(())
        }
        Command::ApplyPatches {
            project,
            lib_dir,
            strict,
        } => {
            let layout = project.layout()?;
            let lib_dir = lib_dir.unwrap_or_else(|| layout.meshtastic_lib());

            let report = patches::apply_all(&lib_dir, layout.patches_dir(), patches::ALL_PATCHES)?;

            if !report.missing.is_empty() {
                bail!("{} patch target(s) not found", report.missing.len());
            }
            if strict && !report.success() {
                bail!(
                    "Some patches could not be applied; check {} for manual patch files",
                    layout.patches_dir().display()
                );
            }

            Ok(())
        }
        Command::Update {
            project,
            from,
            repo,
            branch,
            patch,
        } => {
            let layout = project.layout()?;

            let source: Box<dyn UpstreamSource> = match from {
                Some(dir) => Box::new(LocalSource(dir)),
                None => Box::new(GithubArchive { repo, branch }),
            };

            let summary = Updater::new(layout)
                .apply_patches(patch)
                .run(source.as_ref())
                .context("Meshtastic update failed")?;

            info!("Summary:");
            info!("  - {} upstream file(s) updated", summary.updated.len());
            info!("  - ESP32 customizations applied: {}", summary.overrides_applied.join(", "));
            info!("Next: compile the project and test Meshtastic communication");

            if let Some(report) = summary.patches {
                if !report.success() {
                    bail!("Library updated, but some patches could not be applied");
                }
            }

            Ok(())
        }
        Command::Verify {
            project,
            environment,
        } => {
            let layout = project.layout()?;
            let report = Verifier::new(&layout, &environment).run();

            if !report.passed() {
                bail!(
                    "{} verification check(s) failed",
                    report.failures().count()
                );
            }

            Ok(())
        }
        Command::MergeImage {
            build,
            flash,
            esptool: esptool_path,
            native,
        } => {
            let build_env = build.build_env()?;
            let merge = MergeBin::for_build(&build_env, flash.layout());

            info!("Build dir: {}", build_env.build_dir.display());
            info!("Firmware path: {}", merge.app.display());
            info!("Factory bin path: {}", merge.output.display());

            if native {
                image::merge(&merge)?;
            } else {
                let esptool = match esptool_path {
                    Some(path) if path.extension().map_or(false, |e| e == "py") => {
                        Esptool::script(PioCore::locate()?.python(), path)
                    }
                    Some(path) => Esptool::new(path),
                    None => Esptool::locate(&PioCore::locate()?)?,
                };

                esptool::merge_factory_image(&esptool, &merge)?;
            }

            Ok(())
        }
        Command::InstallHooks { project } => {
            let layout = project.layout()?;
            hooks::install_hooks(layout.root())?;

            Ok(())
        }
    }
}
