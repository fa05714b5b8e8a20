//! Running external tools (python, esptool).

use std::ffi::OsStr;
use std::io;
use std::process::{self, Command};

/// Error when trying to execute a command.
#[derive(Debug, thiserror::Error)]
pub enum CmdError {
    /// The command failed to start.
    #[error("command '{0}' failed to start")]
    NoRun(String, #[source] io::Error),
    /// The command exited unsucessfully (with non-zero exit status).
    #[error("command '{0}' exited with non-zero status code {1}")]
    Unsuccessful(String, i32, #[source] Option<anyhow::Error>),
    /// The command was terminated unexpectedly.
    #[error("command '{0}' was terminated unexpectedly")]
    Terminated(String),
}

impl CmdError {
    /// Create a [`CmdError::NoRun`].
    pub fn no_run(cmd: &process::Command, error: io::Error) -> Self {
        CmdError::NoRun(format!("{:?}", cmd), error)
    }

    /// Convert a [`process::ExitStatus`] into a `Result<(), CmdError>`.
    pub fn status_into_result(
        status: process::ExitStatus,
        cmd: &process::Command,
        cmd_output: impl FnOnce() -> Option<String>,
    ) -> Result<(), Self> {
        if status.success() {
            Ok(())
        } else if let Some(code) = status.code() {
            Err(CmdError::Unsuccessful(
                format!("{:?}", cmd),
                code,
                cmd_output().map(anyhow::Error::msg),
            ))
        } else {
            Err(CmdError::Terminated(format!("{:?}", cmd)))
        }
    }
}

/// A [`std::process::Command`] whose failures are reported as [`CmdError`]s.
#[derive(Debug)]
pub struct Cmd {
    /// The actual [`std::process::Command`] wrapped.
    pub cmd: std::process::Command,
}

impl std::ops::Deref for Cmd {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.cmd
    }
}

impl std::ops::DerefMut for Cmd {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.cmd
    }
}

impl Cmd {
    /// Construct a new [`Cmd`] for launching `program`.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            cmd: Command::new(program),
        }
    }

    /// Run the command to completion with inherited stdio.
    ///
    /// A program that failed to start or exited with an error returns [`Err`].
    pub fn run(&mut self) -> Result<(), CmdError> {
        self.cmd
            .status()
            .map_err(|e| CmdError::no_run(&self.cmd, e))
            .and_then(|v| CmdError::status_into_result(v, &self.cmd, || None))
    }

    /// Run the command to completion and get its stdout output.
    ///
    /// On failure the captured stderr is attached to the returned
    /// [`CmdError::Unsuccessful`].
    pub fn stdout(&mut self) -> Result<String, CmdError> {
        let output = self
            .cmd
            .output()
            .map_err(|e| CmdError::no_run(&self.cmd, e))?;

        CmdError::status_into_result(output.status, &self.cmd, || {
            Some(
                String::from_utf8_lossy(&output.stderr[..])
                    .trim_end()
                    .to_string(),
            )
        })?;

        Ok(String::from_utf8_lossy(&output.stdout[..])
            .trim_end()
            .to_string())
    }
}

/// Add arguments to an existing [`Cmd`] and return it.
///
/// Every comma seperated argument is added to the command's arguments. Arguments
/// after an `@`-sign are collections (`impl IntoIterator<Item = impl AsRef<OsStr>>`).
/// The optional `key=value` pairs after a semicolon call `Command::<key>` with
/// `value` as its arguments.
#[macro_export]
macro_rules! cmd_build {
    ($builder:ident $(, $(@$cmdargs:expr,)* $cmdarg:expr)* $(; $($k:ident = $v:tt),*)?) => {{
        $(
            $($builder .args($cmdargs);)*
            $builder .arg($cmdarg);
        )*
        $($($builder . $k $v;)*)?

        $builder
    }}
}

/// Create a new [`Cmd`] instance.
///
/// The first argument is the program, the rest follow the rules of [`cmd_build!`].
///
/// # Examples
/// ```
/// # use cydbuild::cmd;
/// let parts = ["0x1000", "bootloader.bin"];
/// let cmd = cmd!("esptool.py", "merge_bin", @parts, "0x8000"; env=("LC_ALL", "C"));
/// assert_eq!(cmd.get_args().count(), 4);
/// ```
#[macro_export]
macro_rules! cmd {
    ($cmd:expr $(, $(@$cmdargs:expr,)* $cmdarg:expr)* $(; $($k:ident = $v:tt),*)?) => {{
        let mut cmd = $crate::cmd::Cmd::new($cmd);
        $crate::cmd_build!(cmd $(, $(@$cmdargs,)* $cmdarg)* $(; $($k = $v),* )?)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_macro_collects_args() {
        let extra = ["--flash_mode", "dio"];
        let cmd = cmd!("esptool", "merge_bin", @extra, "-o", "out.bin");

        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(args, ["merge_bin", "--flash_mode", "dio", "-o", "out.bin"]);
    }

    #[test]
    fn test_missing_program_is_no_run() {
        let err = Cmd::new("cydbuild-definitely-not-a-program").run().unwrap_err();
        assert!(matches!(err, CmdError::NoRun(..)));
    }
}
