//! Preflight checks run before anything is removed.
//!
//! Every file of every kernel about to be removed must be writable by this
//! process, and the tools the bootloader hooks call must be on `PATH`.
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_cleaner::preflight::{check_all_writable, check_required_tools};
//!
//! check_all_writable(&selected)?;
//! check_required_tools(&[("grub2-mkconfig", "grub")])?;
//! ```

use anyhow::{bail, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::KernelError;
use crate::kernel::Kernel;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name).
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Ask the kernel whether the calling process may write `path`.
///
/// Uses access(2), so ACLs, read-only mounts and the real uid are all taken
/// into account. A path that does not exist is not writable.
pub fn is_writable(path: &Path) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the whole call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

impl Kernel {
    /// Fail on the first part (in canonical order) this process cannot write.
    pub fn check_writable(&self) -> Result<(), KernelError> {
        match self.all_files().find(|path| !is_writable(path)) {
            Some(path) => Err(KernelError::WriteAccess {
                path: path.to_path_buf(),
            }),
            None => Ok(()),
        }
    }
}

/// Check every kernel, stopping at the first unwritable file.
pub fn check_all_writable<'a, I>(kernels: I) -> Result<(), KernelError>
where
    I: IntoIterator<Item = &'a Kernel>,
{
    kernels
        .into_iter()
        .try_for_each(|kernel| kernel.check_writable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{GenericFile, PartKind};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // Missing paths stand in for unwritable ones: access(2) grants W_OK to
    // root regardless of mode bits, but never for a path that is not there.
    fn writable_file(temp: &TempDir, name: &str) -> PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, "x").unwrap();
        path
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[("nonexistent_command_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        assert!(err.to_string().contains("fake-package"));
    }

    #[test]
    fn test_check_writable_all_parts_writable() {
        let temp = TempDir::new().unwrap();
        let mut kernel = Kernel::new("6.1.0");
        kernel.set_part(GenericFile::new(writable_file(&temp, "vmlinuz-6.1.0"), PartKind::Vmlinuz));
        kernel.set_part(GenericFile::new(writable_file(&temp, "config-6.1.0"), PartKind::Config));
        kernel.set_part(GenericFile::new(temp.path(), PartKind::Modules));

        assert!(kernel.check_writable().is_ok());
    }

    #[test]
    fn test_check_writable_empty_kernel() {
        assert!(Kernel::new("6.1.0").check_writable().is_ok());
    }

    #[test]
    fn test_check_writable_reports_first_in_canonical_order() {
        let temp = TempDir::new().unwrap();
        let missing_build = temp.path().join("missing-build");
        let missing_config = temp.path().join("missing-config");

        // Build is assigned first but config comes earlier in canonical order
        let mut kernel = Kernel::new("6.1.0");
        kernel.set_part(GenericFile::new(&missing_build, PartKind::Build));
        kernel.set_part(GenericFile::new(writable_file(&temp, "vmlinuz-6.1.0"), PartKind::Vmlinuz));
        kernel.set_part(GenericFile::new(&missing_config, PartKind::Config));

        match kernel.check_writable() {
            Err(KernelError::WriteAccess { path }) => assert_eq!(path, missing_config),
            other => panic!("expected WriteAccess, got {other:?}"),
        }
    }

    #[test]
    fn test_check_writable_single_bad_part_any_position() {
        let temp = TempDir::new().unwrap();
        for bad in PartKind::CANONICAL {
            let mut kernel = Kernel::new("6.1.0");
            let mut bad_path = None;
            for kind in PartKind::CANONICAL {
                let path = if kind == bad {
                    let p = temp.path().join(format!("missing-{kind}"));
                    bad_path = Some(p.clone());
                    p
                } else {
                    writable_file(&temp, kind.as_str())
                };
                kernel.set_part(GenericFile::new(path, kind));
            }

            let err = kernel.check_writable().unwrap_err();
            assert_eq!(err.path(), bad_path.unwrap().as_path());
        }
    }

    #[test]
    fn test_check_writable_read_only_mode() {
        // Mode bits only matter for unprivileged users
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = writable_file(&temp, "System.map-6.1.0");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        let mut kernel = Kernel::new("6.1.0");
        kernel.set_part(GenericFile::new(&path, PartKind::Systemmap));
        assert!(matches!(
            kernel.check_writable(),
            Err(KernelError::WriteAccess { .. })
        ));
    }

    #[test]
    fn test_check_all_writable_stops_at_first_kernel() {
        let temp = TempDir::new().unwrap();
        let mut good = Kernel::new("6.1.0");
        good.set_part(GenericFile::new(writable_file(&temp, "vmlinuz-6.1.0"), PartKind::Vmlinuz));
        let mut bad = Kernel::new("5.15.0");
        bad.set_part(GenericFile::new(temp.path().join("gone"), PartKind::Vmlinuz));
        let mut also_bad = Kernel::new("5.10.0");
        also_bad.set_part(GenericFile::new(temp.path().join("gone-too"), PartKind::Vmlinuz));

        let err = check_all_writable([&good, &bad, &also_bad]).unwrap_err();
        assert_eq!(err.path(), temp.path().join("gone"));
    }
}
