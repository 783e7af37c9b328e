//! The kernel build model.
//!
//! A [`Kernel`] groups every file belonging to one installed kernel version:
//! the image, system map, config, initramfs, module tree and build directory.
//! Parts are attached while scanning and any subset may be present.
//!
//! # Example
//!
//! ```rust
//! use kernel_cleaner::kernel::{GenericFile, Kernel, PartKind};
//!
//! let mut kernel = Kernel::new("6.1.0");
//! kernel.set_part(GenericFile::new("/boot/vmlinuz-6.1.0", PartKind::Vmlinuz));
//! assert_eq!(kernel.flags(), "V     ");
//! ```

pub mod header;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{KernelError, Result};

/// The kind of file a part of a kernel build is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartKind {
    Vmlinuz,
    Systemmap,
    Config,
    Initramfs,
    Modules,
    Build,
}

impl PartKind {
    /// Canonical part order, used for file listings, flags and `mtime`.
    pub const CANONICAL: [PartKind; 6] = [
        PartKind::Vmlinuz,
        PartKind::Systemmap,
        PartKind::Config,
        PartKind::Initramfs,
        PartKind::Modules,
        PartKind::Build,
    ];

    /// One-letter flag shown in diagnostic output.
    pub fn flag(self) -> char {
        match self {
            PartKind::Vmlinuz => 'V',
            PartKind::Systemmap => 'S',
            PartKind::Config => 'C',
            PartKind::Initramfs => 'I',
            PartKind::Modules => 'M',
            PartKind::Build => 'B',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartKind::Vmlinuz => "vmlinuz",
            PartKind::Systemmap => "systemmap",
            PartKind::Config => "config",
            PartKind::Initramfs => "initramfs",
            PartKind::Modules => "modules",
            PartKind::Build => "build",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFile {
    pub path: PathBuf,
    pub kind: PartKind,
}

impl GenericFile {
    pub fn new(path: impl Into<PathBuf>, kind: PartKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// One logical kernel build, keyed by the version found in file names.
///
/// The version is not necessarily what the image reports about itself;
/// see [`Kernel::real_kv`].
#[derive(Clone, PartialEq, Eq)]
pub struct Kernel {
    version: String,
    pub vmlinuz: Option<GenericFile>,
    pub systemmap: Option<GenericFile>,
    pub config: Option<GenericFile>,
    pub modules: Option<GenericFile>,
    pub build: Option<GenericFile>,
    pub initramfs: Option<GenericFile>,
}

impl Kernel {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            vmlinuz: None,
            systemmap: None,
            config: None,
            modules: None,
            build: None,
            initramfs: None,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn part(&self, kind: PartKind) -> Option<&GenericFile> {
        match kind {
            PartKind::Vmlinuz => self.vmlinuz.as_ref(),
            PartKind::Systemmap => self.systemmap.as_ref(),
            PartKind::Config => self.config.as_ref(),
            PartKind::Initramfs => self.initramfs.as_ref(),
            PartKind::Modules => self.modules.as_ref(),
            PartKind::Build => self.build.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: PartKind) -> &mut Option<GenericFile> {
        match kind {
            PartKind::Vmlinuz => &mut self.vmlinuz,
            PartKind::Systemmap => &mut self.systemmap,
            PartKind::Config => &mut self.config,
            PartKind::Initramfs => &mut self.initramfs,
            PartKind::Modules => &mut self.modules,
            PartKind::Build => &mut self.build,
        }
    }

    /// Attach a file in the slot named by its kind, returning whatever was
    /// there before.
    pub fn set_part(&mut self, file: GenericFile) -> Option<GenericFile> {
        self.slot_mut(file.kind).replace(file)
    }

    /// Populated parts in canonical order.
    pub fn parts(&self) -> impl Iterator<Item = &GenericFile> + '_ {
        PartKind::CANONICAL
            .into_iter()
            .filter_map(move |kind| self.part(kind))
    }

    /// Paths of every populated part, in canonical order.
    pub fn all_files(&self) -> impl Iterator<Item = &Path> + '_ {
        self.parts().map(|f| f.path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.parts().next().is_none()
    }

    /// Presence flags in canonical order, a space for each missing part.
    pub fn flags(&self) -> String {
        PartKind::CANONICAL
            .into_iter()
            .map(|kind| match self.part(kind) {
                Some(_) => kind.flag(),
                None => ' ',
            })
            .collect()
    }

    /// Modification time of the first populated part in canonical order.
    // XXX: first populated part wins; maybe max() or min() is wanted instead?
    pub fn mtime(&self) -> Result<Option<SystemTime>> {
        let Some(file) = self.parts().next() else {
            return Ok(None);
        };
        let modified = fs::metadata(&file.path)
            .and_then(|m| m.modified())
            .map_err(|e| KernelError::io(&file.path, "reading mtime of", e))?;
        Ok(Some(modified))
    }

    /// Version reported by the kernel image itself, `None` without an image.
    pub fn real_kv(&self) -> Result<Option<String>> {
        match &self.vmlinuz {
            Some(file) => header::read_real_kv(&file.path).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kernel({:?}, '{}')", self.version, self.flags())
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// Release of the running kernel, as `uname -r` prints it.
pub fn running_release() -> Option<String> {
    match fs::read_to_string(OSRELEASE_PATH) {
        Ok(release) => Some(release.trim_end().to_string()).filter(|r| !r.is_empty()),
        Err(e) => {
            tracing::debug!(path = OSRELEASE_PATH, "cannot read running kernel release: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn kernel_with(parts: &[(PartKind, &str)]) -> Kernel {
        let mut kernel = Kernel::new("5.10.0");
        for (kind, path) in parts {
            kernel.set_part(GenericFile::new(*path, *kind));
        }
        kernel
    }

    #[test]
    fn test_all_files_canonical_order() {
        // Assigned deliberately out of canonical order
        let kernel = kernel_with(&[
            (PartKind::Build, "/usr/src/linux-5.10.0"),
            (PartKind::Initramfs, "/boot/initramfs-5.10.0.img"),
            (PartKind::Vmlinuz, "/boot/vmlinuz-5.10.0"),
            (PartKind::Modules, "/lib/modules/5.10.0"),
            (PartKind::Config, "/boot/config-5.10.0"),
        ]);

        let files: Vec<_> = kernel.all_files().collect();
        assert_eq!(
            files,
            vec![
                Path::new("/boot/vmlinuz-5.10.0"),
                Path::new("/boot/config-5.10.0"),
                Path::new("/boot/initramfs-5.10.0.img"),
                Path::new("/lib/modules/5.10.0"),
                Path::new("/usr/src/linux-5.10.0"),
            ]
        );
    }

    #[test]
    fn test_all_files_empty_kernel() {
        let kernel = Kernel::new("5.10.0");
        assert_eq!(kernel.all_files().count(), 0);
        assert!(kernel.is_empty());
    }

    #[test]
    fn test_all_files_reflects_current_state() {
        let mut kernel = kernel_with(&[(PartKind::Modules, "/lib/modules/5.10.0")]);
        assert_eq!(kernel.all_files().count(), 1);

        kernel.set_part(GenericFile::new("/boot/System.map-5.10.0", PartKind::Systemmap));
        let files: Vec<_> = kernel.all_files().collect();
        assert_eq!(
            files,
            vec![
                Path::new("/boot/System.map-5.10.0"),
                Path::new("/lib/modules/5.10.0"),
            ]
        );

        kernel.modules = None;
        assert_eq!(kernel.all_files().count(), 1);
    }

    #[test]
    fn test_debug_format_vmlinuz_only() {
        let kernel = kernel_with(&[(PartKind::Vmlinuz, "/boot/vmlinuz-5.10.0")]);
        let repr = format!("{:?}", kernel);
        assert_eq!(repr, "Kernel(\"5.10.0\", 'V     ')");
        assert!(repr.contains("5.10.0"));
    }

    #[test]
    fn test_flags_all_parts() {
        let kernel = kernel_with(&[
            (PartKind::Vmlinuz, "a"),
            (PartKind::Systemmap, "b"),
            (PartKind::Config, "c"),
            (PartKind::Initramfs, "d"),
            (PartKind::Modules, "e"),
            (PartKind::Build, "f"),
        ]);
        assert_eq!(kernel.flags(), "VSCIMB");

        let partial = kernel_with(&[(PartKind::Config, "c"), (PartKind::Modules, "e")]);
        assert_eq!(partial.flags(), "  C M ");
    }

    #[test]
    fn test_set_part_returns_previous() {
        let mut kernel = kernel_with(&[(PartKind::Vmlinuz, "/boot/vmlinuz-5.10.0")]);
        let old = kernel.set_part(GenericFile::new("/boot/kernel-5.10.0", PartKind::Vmlinuz));
        assert_eq!(old.unwrap().path, PathBuf::from("/boot/vmlinuz-5.10.0"));
    }

    #[test]
    fn test_mtime_uses_first_part_in_canonical_order() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config-5.10.0");
        let modules = temp.path().join("modules");
        fs::write(&config, "CONFIG_X=y\n").unwrap();
        fs::create_dir(&modules).unwrap();

        let kernel = kernel_with(&[
            (PartKind::Modules, modules.to_str().unwrap()),
            (PartKind::Config, config.to_str().unwrap()),
        ]);
        let expected = fs::metadata(&config).unwrap().modified().unwrap();
        assert_eq!(kernel.mtime().unwrap(), Some(expected));
    }

    #[test]
    fn test_mtime_without_parts() {
        assert_eq!(Kernel::new("1.0").mtime().unwrap(), None);
    }

    #[test]
    fn test_mtime_missing_file_is_io_error() {
        let kernel = kernel_with(&[(PartKind::Vmlinuz, "/nonexistent/vmlinuz-5.10.0")]);
        assert!(matches!(kernel.mtime(), Err(KernelError::Io { .. })));
    }

    #[test]
    fn test_running_release() {
        let release = running_release().unwrap();
        assert!(!release.is_empty());
        assert!(!release.ends_with('\n'));
    }

    /// Minimal bzImage: setup header magic plus a version pointer.
    fn write_image(dir: &Path, name: &str, magic: &[u8; 4], version: &[u8]) -> PathBuf {
        let pointer: u16 = 0x100;
        let mut image = vec![0u8; 0x300 + version.len() + 16];
        image[0x202..0x206].copy_from_slice(magic);
        image[0x20e..0x210].copy_from_slice(&pointer.to_le_bytes());
        image[0x300..0x300 + version.len()].copy_from_slice(version);
        let path = dir.join(name);
        fs::write(&path, image).unwrap();
        path
    }

    #[test]
    fn test_real_kv_reads_image_header() {
        let temp = TempDir::new().unwrap();
        let version = b"6.1.0-gentoo (root@b) #1\0";
        let image = write_image(temp.path(), "vmlinuz-6.1.0", b"HdrS", version);
        let mut kernel = Kernel::new("6.1.0");
        kernel.set_part(GenericFile::new(image, PartKind::Vmlinuz));

        assert_eq!(kernel.real_kv().unwrap().as_deref(), Some("6.1.0-gentoo"));
    }

    #[test]
    fn test_real_kv_bad_magic_is_invalid_format() {
        let temp = TempDir::new().unwrap();
        let image = write_image(temp.path(), "vmlinuz-6.1.0", b"\x7fELF", b"6.1.0 x");
        let mut kernel = Kernel::new("6.1.0");
        kernel.set_part(GenericFile::new(&image, PartKind::Vmlinuz));

        match kernel.real_kv() {
            Err(KernelError::InvalidFormat { path, .. }) => assert_eq!(path, image),
            other => panic!("expected InvalidFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_real_kv_without_vmlinuz() {
        let kernel = kernel_with(&[(PartKind::Modules, "/lib/modules/5.10.0")]);
        assert_eq!(kernel.real_kv().unwrap(), None);
    }
}
