//! Removing kernel builds.
//!
//! Removal is all-or-nothing at the precondition level: every file of every
//! selected kernel must pass the writability check before the first file is
//! touched. Nothing protects against the filesystem changing between the
//! check and the removal.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::bootloader::PostCleanup;
use crate::kernel::Kernel;
use crate::preflight::check_all_writable;

#[derive(Debug, Clone, Default)]
pub struct RemovalOptions {
    /// Check and report, but delete nothing and run no hooks.
    pub pretend: bool,
    /// Exclusive lock held for the duration of the removal.
    pub lock_file: Option<PathBuf>,
}

/// What was (or in pretend mode, would have been) removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: Vec<(String, Vec<PathBuf>)>,
    pub pretend: bool,
}

impl RemovalReport {
    pub fn file_count(&self) -> usize {
        self.removed.iter().map(|(_, files)| files.len()).sum()
    }
}

/// Remove every file of each kernel in `kernels`, then run `post_cleanup`.
///
/// A failing post-cleanup hook does not undo anything; it is returned as
/// the second element so the caller can warn about it.
pub fn remove_kernels(
    kernels: &[&Kernel],
    post_cleanup: &PostCleanup,
    options: &RemovalOptions,
) -> Result<(RemovalReport, Option<anyhow::Error>)> {
    check_all_writable(kernels.iter().copied())?;
    if !options.pretend {
        post_cleanup
            .preflight()
            .context("bootloader post-cleanup hook cannot run, not removing anything")?;
    }

    let mut report = RemovalReport {
        removed: Vec::new(),
        pretend: options.pretend,
    };

    if options.pretend {
        for kernel in kernels {
            report.removed.push((
                kernel.version().to_string(),
                kernel.all_files().map(Path::to_path_buf).collect(),
            ));
        }
        return Ok((report, None));
    }

    let _lock = match &options.lock_file {
        Some(path) => acquire_lock(path)?,
        None => None,
    };

    for kernel in kernels {
        let mut removed = Vec::new();
        for path in kernel.all_files() {
            if remove_path(path)? {
                tracing::debug!(version = kernel.version(), path = %path.display(), "removed");
                removed.push(path.to_path_buf());
            }
        }
        tracing::info!("removed kernel {} ({} files)", kernel.version(), removed.len());
        report.removed.push((kernel.version().to_string(), removed));
    }

    let hook_error = post_cleanup.run().err();
    Ok((report, hook_error))
}

/// Remove a file, symlink or directory tree; `false` if it was already gone.
fn remove_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("inspecting '{}'", path.display())),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("removing directory '{}'", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("removing '{}'", path.display()))?;
    }
    Ok(true)
}

/// Take the removal lock; `None` when the lock directory does not exist.
fn acquire_lock(path: &Path) -> Result<Option<File>> {
    if !path.parent().is_some_and(Path::is_dir) {
        tracing::debug!(lock = %path.display(), "lock directory missing, running unlocked");
        return Ok(None);
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("opening lock file '{}'", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "another kernel-cleaner run holds '{}', refusing to proceed",
            path.display()
        )
    })?;
    Ok(Some(file))
}
