//! Reading bootloader configuration to learn which kernels are in use.
//!
//! Each supported dialect knows where its configuration lives, how a kernel
//! image line looks, and what has to happen after kernels are removed.
//! Loading a config yields a [`LoadedConfig`]: the referenced image paths plus
//! the [`PostCleanup`] action to run once removal is done.

pub mod grub2;

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::kernel::Kernel;
use crate::preflight::check_required_tools;
use crate::process::Cmd;

const SYSCONF_DIR: &str = "/etc";

/// Supported bootloader configuration dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootloader {
    Grub2,
    SystemdBoot,
    Grub,
    Lilo,
}

impl Bootloader {
    /// Detection order used when no bootloader is configured.
    pub const ALL: [Bootloader; 4] = [
        Bootloader::Grub2,
        Bootloader::SystemdBoot,
        Bootloader::Grub,
        Bootloader::Lilo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bootloader::Grub2 => "grub2",
            Bootloader::SystemdBoot => "systemd-boot",
            Bootloader::Grub => "grub",
            Bootloader::Lilo => "lilo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Where this dialect's configuration usually lives.
    pub fn default_config_paths(self, boot_dir: &Path) -> Vec<PathBuf> {
        self.config_paths_in(boot_dir, Path::new(SYSCONF_DIR))
    }

    /// Like [`Bootloader::default_config_paths`], with files that normally
    /// live in `/etc` looked up under `sysconf_dir` instead.
    pub fn config_paths_in(self, boot_dir: &Path, sysconf_dir: &Path) -> Vec<PathBuf> {
        match self {
            Bootloader::Grub2 => vec![
                boot_dir.join("grub/grub.cfg"),
                boot_dir.join("grub2/grub.cfg"),
            ],
            Bootloader::SystemdBoot => vec![boot_dir.join("loader/entries")],
            Bootloader::Grub => vec![
                boot_dir.join("grub/grub.conf"),
                boot_dir.join("grub/menu.lst"),
            ],
            Bootloader::Lilo => vec![sysconf_dir.join("lilo.conf")],
        }
    }

    /// One image path per matching line; blanks never span a newline.
    fn kernel_pattern(self) -> &'static str {
        match self {
            Bootloader::Grub2 => r"(?m)^[ \t]*linux(?:16|efi)?[ \t]+(?:\([^)]+\))?(?P<path>\S+)",
            Bootloader::SystemdBoot => r"(?m)^[ \t]*linux[ \t]+(?P<path>\S+)",
            Bootloader::Grub => r"(?m)^[ \t]*kernel[ \t]+(?:\([^)]+\))?(?P<path>\S+)",
            Bootloader::Lilo => r"(?m)^[ \t]*image[ \t]*=[ \t]*(?P<path>\S+)",
        }
    }

    fn default_post_cleanup(self) -> PostCleanup {
        match self {
            // The map file has to be rewritten whenever an image goes away
            Bootloader::Lilo => PostCleanup::Command {
                program: "lilo".to_string(),
                args: Vec::new(),
            },
            _ => PostCleanup::Nothing,
        }
    }

    /// First dialect whose configuration exists under `boot_dir`.
    pub fn detect(boot_dir: &Path) -> Option<(Bootloader, PathBuf)> {
        Self::detect_in(boot_dir, Path::new(SYSCONF_DIR))
    }

    pub fn detect_in(boot_dir: &Path, sysconf_dir: &Path) -> Option<(Bootloader, PathBuf)> {
        Self::ALL.into_iter().find_map(|bootloader| {
            bootloader
                .config_paths_in(boot_dir, sysconf_dir)
                .into_iter()
                .find(|path| path.exists())
                .map(|path| (bootloader, path))
        })
    }

    /// Read the configuration at `path` and interpret it.
    pub fn load(self, path: &Path) -> Result<LoadedConfig> {
        let content = if self == Bootloader::SystemdBoot && path.is_dir() {
            read_entries_dir(path)?
        } else {
            fs::read_to_string(path)
                .with_context(|| format!("reading {} config '{}'", self.name(), path.display()))?
        };
        self.parse(path, &content)
    }

    /// Interpret already-loaded configuration text.
    pub fn parse(self, path: &Path, content: &str) -> Result<LoadedConfig> {
        if self == Bootloader::Grub2 {
            if let Some(generator) = grub2::detect_generator(content) {
                tracing::debug!(
                    config = %path.display(),
                    generator,
                    "config is autogenerated, not parsing kernel entries"
                );
                return Ok(LoadedConfig {
                    bootloader: self,
                    path: path.to_path_buf(),
                    autogenerated: true,
                    referenced: BTreeSet::new(),
                    post_cleanup: grub2::regenerate(generator, path),
                });
            }
        }

        let pattern = Regex::new(self.kernel_pattern())
            .with_context(|| format!("compiling {} kernel pattern", self.name()))?;
        let referenced: BTreeSet<PathBuf> = pattern
            .captures_iter(content)
            .filter_map(|caps| caps.name("path"))
            .map(|m| PathBuf::from(m.as_str().trim_matches('"')))
            .collect();
        tracing::debug!(
            config = %path.display(),
            count = referenced.len(),
            "kernel images referenced by {}",
            self.name()
        );

        Ok(LoadedConfig {
            bootloader: self,
            path: path.to_path_buf(),
            autogenerated: false,
            referenced,
            post_cleanup: self.default_post_cleanup(),
        })
    }
}

impl fmt::Display for Bootloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn read_entries_dir(dir: &Path) -> Result<String> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("reading boot entries '{}'", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "conf") && path.is_file() {
            entries.push(path);
        }
    }
    entries.sort();

    let mut content = String::new();
    for path in entries {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading boot entry '{}'", path.display()))?;
        content.push_str(&text);
        content.push('\n');
    }
    Ok(content)
}

/// What has to happen after kernels were removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCleanup {
    Nothing,
    /// Run an external tool (blocking).
    Command { program: String, args: Vec<String> },
}

impl PostCleanup {
    /// Fail early when the hook's tool is not installed.
    pub fn preflight(&self) -> Result<()> {
        match self {
            PostCleanup::Nothing => Ok(()),
            PostCleanup::Command { program, .. } => {
                check_required_tools(&[(program.as_str(), "bootloader")])
            }
        }
    }

    pub fn run(&self) -> Result<()> {
        match self {
            PostCleanup::Nothing => Ok(()),
            PostCleanup::Command { program, args } => {
                tracing::info!("running {} {}", program, args.join(" "));
                Cmd::new(program)
                    .args(args)
                    .error_msg(format!("{} failed", program))
                    .run_interactive()
            }
        }
    }
}

/// A parsed bootloader configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub bootloader: Bootloader,
    pub path: PathBuf,
    /// The config is generated and was not parsed.
    pub autogenerated: bool,
    pub referenced: BTreeSet<PathBuf>,
    pub post_cleanup: PostCleanup,
}

impl LoadedConfig {
    /// Whether `kernel`'s image is one of the referenced paths, taken either
    /// literally or relative to `boot_dir` (the boot partition root).
    pub fn references(&self, kernel: &Kernel, boot_dir: &Path) -> bool {
        let Some(image) = &kernel.vmlinuz else {
            return false;
        };
        let image = canonical_or_raw(&image.path);

        self.referenced.iter().any(|reference| {
            let relative = reference.strip_prefix("/").unwrap_or(reference.as_path());
            [reference.clone(), boot_dir.join(relative)]
                .iter()
                .any(|candidate| canonical_or_raw(candidate) == image)
        })
    }
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{GenericFile, PartKind};
    use tempfile::TempDir;

    const GRUB2_AUTOGEN: &str = "#\n\
        # DO NOT EDIT THIS FILE\n\
        #\n\
        # It is automatically generated by grub2-mkconfig using templates\n\
        # from /etc/grub.d and settings from /etc/default/grub\n\
        #\n\
        menuentry 'Gentoo' {\n\
        \tlinux /vmlinuz-6.1.0 root=/dev/sda2 ro\n\
        }\n";

    #[test]
    fn test_grub2_autogen_defers_to_generator() {
        let path = Path::new("/boot/grub/grub.cfg");
        let loaded = Bootloader::Grub2.parse(path, GRUB2_AUTOGEN).unwrap();

        assert!(loaded.autogenerated);
        assert!(loaded.referenced.is_empty());
        assert_eq!(
            loaded.post_cleanup,
            PostCleanup::Command {
                program: "grub2-mkconfig".into(),
                args: vec!["-o".into(), "/boot/grub/grub.cfg".into()],
            }
        );
    }

    #[test]
    fn test_grub2_manual_config_parsed() {
        let content = "set timeout=5\n\
            menuentry 'new' {\n\
            \tlinux /vmlinuz-5.10.0 root=/dev/sda2\n\
            \tinitrd /initramfs-5.10.0.img\n\
            }\n\
            menuentry 'old' {\n\
            \tlinux (hd0,1)/vmlinuz-5.4.0 ro\n\
            }\n\
            menuentry 'legacy bios' {\n\
            \tlinux16 /vmlinuz-4.19.0\n\
            }\n";
        let loaded = Bootloader::Grub2
            .parse(Path::new("/boot/grub/grub.cfg"), content)
            .unwrap();

        assert!(!loaded.autogenerated);
        assert_eq!(loaded.post_cleanup, PostCleanup::Nothing);
        let refs: Vec<_> = loaded.referenced.iter().map(|p| p.to_str().unwrap()).collect();
        assert_eq!(refs, vec!["/vmlinuz-4.19.0", "/vmlinuz-5.10.0", "/vmlinuz-5.4.0"]);
    }

    #[test]
    fn test_grub_legacy_kernel_lines() {
        let content = "title Gentoo\nroot (hd0,0)\nkernel (hd0,0)/boot/kernel-6.1.0 root=/dev/sda3\n";
        let loaded = Bootloader::Grub
            .parse(Path::new("/boot/grub/grub.conf"), content)
            .unwrap();
        assert!(loaded.referenced.contains(Path::new("/boot/kernel-6.1.0")));
    }

    #[test]
    fn test_lilo_image_lines_and_rerun() {
        let content = "boot=/dev/sda\nimage = /boot/vmlinuz-6.1.0\n  label=gentoo\nimage=\"/boot/vmlinuz-5.15.0\"\n";
        let loaded = Bootloader::Lilo
            .parse(Path::new("/etc/lilo.conf"), content)
            .unwrap();
        assert_eq!(loaded.referenced.len(), 2);
        assert!(loaded.referenced.contains(Path::new("/boot/vmlinuz-5.15.0")));
        assert!(matches!(loaded.post_cleanup, PostCleanup::Command { ref program, .. } if program == "lilo"));
    }

    #[test]
    fn test_systemd_boot_entries_dir() {
        let temp = TempDir::new().unwrap();
        let entries = temp.path().join("loader/entries");
        fs::create_dir_all(&entries).unwrap();
        fs::write(entries.join("a.conf"), "title A\nlinux /vmlinuz-6.1.0\n").unwrap();
        fs::write(entries.join("b.conf"), "title B\nlinux /abc/6.2.0/linux\n").unwrap();
        fs::write(entries.join("notes.txt"), "linux /ignored\n").unwrap();

        let (bootloader, path) = Bootloader::detect(temp.path()).unwrap();
        assert_eq!(bootloader, Bootloader::SystemdBoot);
        let loaded = bootloader.load(&path).unwrap();
        assert_eq!(loaded.referenced.len(), 2);
        assert!(!loaded.referenced.contains(Path::new("/ignored")));
    }

    #[test]
    fn test_detect_prefers_grub2() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("grub")).unwrap();
        fs::create_dir_all(temp.path().join("loader/entries")).unwrap();
        fs::write(temp.path().join("grub/grub.cfg"), "").unwrap();

        let (bootloader, path) = Bootloader::detect(temp.path()).unwrap();
        assert_eq!(bootloader, Bootloader::Grub2);
        assert_eq!(path, temp.path().join("grub/grub.cfg"));
    }

    #[test]
    fn test_detect_nothing() {
        let temp = TempDir::new().unwrap();
        let etc = temp.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        assert_eq!(Bootloader::detect_in(temp.path(), &etc), None);
    }

    #[test]
    fn test_detect_lilo_in_sysconf_dir() {
        let temp = TempDir::new().unwrap();
        let etc = temp.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        fs::write(etc.join("lilo.conf"), "image=/boot/vmlinuz-6.1.0\n").unwrap();

        let (bootloader, path) = Bootloader::detect_in(temp.path(), &etc).unwrap();
        assert_eq!(bootloader, Bootloader::Lilo);
        assert_eq!(path, etc.join("lilo.conf"));
        assert_eq!(
            Bootloader::Lilo.default_config_paths(temp.path()),
            vec![PathBuf::from("/etc/lilo.conf")]
        );
    }

    #[test]
    fn test_bare_keyword_does_not_take_next_line() {
        let content = "menuentry 'x' {\n\tlinux\n\tinitrd /initramfs-6.1.0.img\n}\n";
        let loaded = Bootloader::Grub2.parse(Path::new("grub.cfg"), content).unwrap();
        assert!(loaded.referenced.is_empty(), "{:?}", loaded.referenced);

        let loaded = Bootloader::Grub
            .parse(Path::new("menu.lst"), "kernel\nroot (hd0,0)\n")
            .unwrap();
        assert!(loaded.referenced.is_empty());

        let loaded = Bootloader::SystemdBoot
            .parse(Path::new("a.conf"), "linux\noptions quiet\n")
            .unwrap();
        assert!(loaded.referenced.is_empty());

        let loaded = Bootloader::Lilo
            .parse(Path::new("lilo.conf"), "image =\n  label=gentoo\n")
            .unwrap();
        assert!(loaded.referenced.is_empty());
    }

    #[test]
    fn test_references_relative_to_boot_dir() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("vmlinuz-5.10.0");
        fs::write(&image, "").unwrap();

        let loaded = Bootloader::Grub2
            .parse(Path::new("grub.cfg"), "linux /vmlinuz-5.10.0 ro\n")
            .unwrap();

        let mut used = Kernel::new("5.10.0");
        used.set_part(GenericFile::new(&image, PartKind::Vmlinuz));
        let mut unused = Kernel::new("5.4.0");
        unused.set_part(GenericFile::new(temp.path().join("vmlinuz-5.4.0"), PartKind::Vmlinuz));
        let modules_only = Kernel::new("5.10.0");

        assert!(loaded.references(&used, temp.path()));
        assert!(!loaded.references(&unused, temp.path()));
        assert!(!loaded.references(&modules_only, temp.path()));
    }

    #[test]
    fn test_post_cleanup_runs_command() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("regenerated");
        let hook = PostCleanup::Command {
            program: "touch".into(),
            args: vec![marker.to_string_lossy().into_owned()],
        };
        hook.preflight().unwrap();
        hook.run().unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_post_cleanup_missing_tool() {
        let hook = PostCleanup::Command {
            program: "definitely_not_a_real_command_12345".into(),
            args: Vec::new(),
        };
        assert!(hook.preflight().is_err());
        assert!(hook.run().is_err());
        assert!(PostCleanup::Nothing.run().is_ok());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Bootloader::from_name("systemd-boot"), Some(Bootloader::SystemdBoot));
        assert_eq!(Bootloader::from_name("yaboot"), None);
    }
}
