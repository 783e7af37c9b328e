//! Typed failures raised by the kernel primitives.
//!
//! Orchestration code wraps these in `anyhow` with extra context; the
//! primitives themselves never log or print.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias for the kernel primitives.
pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    /// The file does not look like a bootable kernel image.
    #[error("invalid kernel image {}: {detail}", path.display())]
    InvalidFormat { path: PathBuf, detail: String },

    /// A part of a kernel cannot be removed by this process.
    #[error("{} not writable, refusing to proceed", path.display())]
    WriteAccess { path: PathBuf },

    #[error("{action} '{}'", path.display())]
    Io {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
    },
}

impl KernelError {
    pub(crate) fn io(path: &Path, action: &'static str, source: io::Error) -> Self {
        KernelError::Io {
            path: path.to_path_buf(),
            action,
            source,
        }
    }

    /// The path the failure is about.
    pub fn path(&self) -> &Path {
        match self {
            KernelError::InvalidFormat { path, .. }
            | KernelError::WriteAccess { path }
            | KernelError::Io { path, .. } => path,
        }
    }

    /// End-user explanation of what went wrong and how to fix it, for the
    /// failures where the one-line message is not enough.
    pub fn remediation(&self) -> Option<String> {
        match self {
            KernelError::WriteAccess { path } => Some(format!(
                "The following file is not writable:\n  {}\n\n\
                 This usually indicates that you have insufficient permissions to run\n\
                 kernel-cleaner. The program needs to be able to remove all the files\n\
                 associated with removed kernels. Lack of write access to some of them\n\
                 would result in orphan files and therefore the program refuses\n\
                 to proceed.",
                path.display()
            )),
            _ => None,
        }
    }
}
