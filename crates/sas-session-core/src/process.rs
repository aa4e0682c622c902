//! External tool invocation.
//!
//! Every child process the pipeline starts (the mirroring tool, gpg and the
//! two calibration programs) goes through [`CommandRunner`], so the pipeline
//! can be driven by scripted tools in tests.

use crate::error::{Result, SessionError};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// A fully described child process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child; inherits the caller's when `None`.
    pub current_dir: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Text written to the child's stdin, followed by a newline.
    pub stdin: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for log messages. Never includes stdin.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status of a finished tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolStatus {
    pub code: Option<i32>,
}

impl ToolStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external tools to completion.
pub trait CommandRunner {
    /// Run `command` and wait for it. An `Err` means the tool could not be
    /// started at all; a non-zero exit is reported through [`ToolStatus`].
    fn run(&self, command: &ToolCommand) -> Result<ToolStatus>;
}

/// Runs tools as real child processes with inherited stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolStatus> {
        debug!("Running {}", command.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).envs(&command.env);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }
        if command.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| SessionError::ToolLaunch {
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        if let Some(input) = &command.stdin {
            // A child that exits without reading its input closes the pipe
            // early; its exit status still decides the outcome.
            if let Some(mut pipe) = child.stdin.take() {
                if let Err(e) = writeln!(pipe, "{input}") {
                    warn!("Failed to write stdin of {}: {}", command.program, e);
                }
            }
        }

        let status = child.wait().map_err(|e| SessionError::ToolLaunch {
            program: command.program.clone(),
            message: e.to_string(),
        })?;

        debug!("{} exited with {:?}", command.program, status.code());
        Ok(ToolStatus {
            code: status.code(),
        })
    }
}

/// Split a free-form option string into arguments on whitespace.
pub fn split_options(options: Option<&str>) -> Vec<String> {
    options
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

/// Check if a command exists in the system PATH.
pub fn command_exists(cmd: &str) -> bool {
    #[cfg(unix)]
    {
        Command::new("which")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        Command::new("where")
            .arg(cmd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// `path` as an owned string for command arguments.
pub(crate) fn arg_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_options() {
        assert_eq!(
            split_options(Some("withccfpath=yes  analysisdate=now")),
            vec!["withccfpath=yes", "analysisdate=now"]
        );
        assert!(split_options(None).is_empty());
        assert!(split_options(Some("   ")).is_empty());
    }

    #[test]
    fn test_display_command() {
        let cmd = ToolCommand::new("gpg")
            .args(["--batch", "-d", "file.gpg"])
            .stdin("secret");
        assert_eq!(cmd.display(), "gpg --batch -d file.gpg");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_exit_code() {
        let runner = SystemRunner;
        let ok = runner.run(&ToolCommand::new("sh").args(["-c", "exit 0"])).unwrap();
        assert!(ok.success());
        let failed = runner.run(&ToolCommand::new("sh").args(["-c", "exit 3"])).unwrap();
        assert_eq!(failed.code, Some(3));
        assert!(!failed.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_passes_stdin_and_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out.txt");
        let script = format!("read line; printf '%s-%s' \"$line\" \"$MARK\" > '{}'", out.display());
        let status = SystemRunner
            .run(
                &ToolCommand::new("sh")
                    .args(["-c", script.as_str()])
                    .env("MARK", "m")
                    .stdin("key"),
            )
            .unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(out).unwrap(), "key-m");
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_stdin_still_reports_exit_code() {
        let input = "k".repeat(1024 * 1024);
        let status = SystemRunner
            .run(
                &ToolCommand::new("sh")
                    .args(["-c", "exec 0<&-; exit 5"])
                    .stdin(input),
            )
            .unwrap();
        assert_eq!(status.code, Some(5));
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let err = SystemRunner
            .run(&ToolCommand::new("definitely-not-a-real-tool-xyz"))
            .unwrap_err();
        assert!(matches!(err, SessionError::ToolLaunch { .. }));
    }
}
