//! Running the `cryptsetup` binary.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::channel::SecretChannel;
use crate::error::ToolError;

/// Which step of an operation a cryptsetup invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Bootstrap,
    Dump,
    Enroll,
    RemoveBootstrap,
    Unlock,
    Passthrough,
    Help,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Bootstrap => "format with temporary key",
            Step::Dump => "luksDump",
            Step::Enroll => "device key enrollment",
            Step::RemoveBootstrap => "temporary key removal",
            Step::Unlock => "unlock",
            Step::Passthrough => "passthrough",
            Step::Help => "--help",
        })
    }
}

/// Where the child's standard input comes from.
#[derive(Debug)]
pub enum Stdin {
    /// The operator's terminal. cryptsetup may prompt, so stderr is
    /// inherited too.
    Inherit,
    Null,
    /// A derived key, written once and then closed.
    Secret(SecretChannel),
}

pub trait EncryptionTool {
    fn run(&mut self, step: Step, args: &[String], stdin: Stdin) -> Result<(), ToolError>;

    /// Captured `luksDump` output for `device_path`.
    fn dump(&mut self, device_path: &str) -> Result<String, ToolError>;
}

pub struct Cryptsetup {
    binary: PathBuf,
}

impl Cryptsetup {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Show cryptsetup's own usage screen below ours.
    pub fn help(&mut self) -> Result<(), ToolError> {
        self.run(Step::Help, &["--help".to_string()], Stdin::Null)
    }

    fn spawn_error(&self, source: std::io::Error) -> ToolError {
        ToolError::Spawn {
            binary: self.binary.clone(),
            source,
        }
    }
}

impl EncryptionTool for Cryptsetup {
    fn run(&mut self, step: Step, args: &[String], stdin: Stdin) -> Result<(), ToolError> {
        log::info!("Running: {} {}", self.binary.display(), args.join(" "));

        let mut command = Command::new(&self.binary);
        command.args(args).stdout(Stdio::inherit());

        let mut secret = None;
        match stdin {
            Stdin::Inherit => {
                command.stdin(Stdio::inherit()).stderr(Stdio::inherit());
            }
            Stdin::Null => {
                command.stdin(Stdio::null()).stderr(Stdio::piped());
            }
            Stdin::Secret(channel) => {
                command.stdin(Stdio::piped()).stderr(Stdio::piped());
                secret = Some(channel);
            }
        }

        let mut child = command.spawn().map_err(|err| self.spawn_error(err))?;

        let mut delivered = Ok(());
        if let (Some(channel), Some(mut pipe)) = (secret.as_mut(), child.stdin.take()) {
            delivered = channel.deliver(&mut pipe);
            // dropping the pipe closes it, so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .map_err(|source| ToolError::Io { step, source })?;

        if !output.stderr.is_empty() {
            // cryptsetup's own messages still reach the operator
            let _ = std::io::stderr().write_all(&output.stderr);
        }

        if !output.status.success() {
            return Err(ToolError::ExitStatus {
                step,
                code: output.status.code(),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        delivered.map_err(|source| ToolError::Io { step, source })
    }

    fn dump(&mut self, device_path: &str) -> Result<String, ToolError> {
        log::debug!("Running: {} luksDump {device_path}", self.binary.display());

        let output = Command::new(&self.binary)
            .args(["luksDump", device_path])
            .stdin(Stdio::null())
            .output()
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostics = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                stderr.into_owned()
            };
            return Err(ToolError::ExitStatus {
                step: Step::Dump,
                code: output.status.code(),
                diagnostics,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
