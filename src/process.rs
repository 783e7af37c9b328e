//! Small builder around `std::process::Command` for the external tools the
//! bootloader hooks call.
//!
//! ```rust,ignore
//! use kernel_cleaner::process::Cmd;
//!
//! Cmd::new("grub2-mkconfig")
//!     .args(["-o", "/boot/grub/grub.cfg"])
//!     .error_msg("grub2-mkconfig failed")
//!     .run_interactive()?;
//! ```

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Message used as the error summary when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn failure_summary(&self) -> String {
        self.error_msg
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.program.to_string_lossy()))
    }

    /// Run with the terminal inherited so the user sees the tool's output.
    pub fn run_interactive(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .with_context(|| format!("spawning '{}'", self.display()))?;

        if !status.success() {
            bail!("{} (status {})", self.failure_summary(), status);
        }
        Ok(())
    }
}
