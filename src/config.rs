//! Configuration file handling.
//!
//! ```toml
//! boot_dir = "/boot"
//! modules_dir = "/lib/modules"
//! bootloader = "grub2"
//!
//! [[rules]]
//! part = "vmlinuz"
//! root = "boot"
//! prefix = "rescue-"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootloader::{Bootloader, LoadedConfig};
use crate::kernel::PartKind;
use crate::layout::{default_rules, Layout, Root, Rule, RuleClassifier};

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/kernel-cleaner.toml";

/// Lock held while files are being removed.
pub const DEFAULT_LOCK_FILE: &str = "/run/lock/kernel-cleaner.lock";

/// Which bootloader configuration to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderChoice {
    Auto,
    Disabled,
    Fixed(Bootloader),
}

/// Effective configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub boot_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub bootloader: BootloaderChoice,
    pub bootloader_config: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub rules: Vec<Rule>,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            boot_dir: PathBuf::from("/boot"),
            modules_dir: PathBuf::from("/lib/modules"),
            bootloader: BootloaderChoice::Auto,
            bootloader_config: None,
            lock_file: Some(PathBuf::from(DEFAULT_LOCK_FILE)),
            rules: default_rules(),
            source: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    boot_dir: Option<PathBuf>,
    modules_dir: Option<PathBuf>,
    bootloader: Option<String>,
    bootloader_config: Option<PathBuf>,
    lock_file: Option<String>,
    replace_default_rules: Option<bool>,
    #[serde(default)]
    rules: Vec<RuleToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleToml {
    part: PartKind,
    root: Root,
    prefix: Option<String>,
    suffix: Option<String>,
    version_dir: Option<bool>,
    name: Option<String>,
    depth: Option<usize>,
    resolve_link: Option<bool>,
}

impl Config {
    /// Load from `explicit` if given, else the first of the user and system
    /// config files that exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let user = dirs::config_dir().map(|dir| dir.join("kernel-cleaner/config.toml"));
        let candidates = user
            .into_iter()
            .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)));
        for candidate in candidates {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }

        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let mut config = Self::from_toml(&text, path)?;
        config.source = Some(path.to_path_buf());
        tracing::debug!(config = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration text; `path` is only used in error messages.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        let parsed: ConfigToml = toml::from_str(text)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        let defaults = Self::default();
        let bootloader = match parsed.bootloader.as_deref() {
            Some(raw) => parse_bootloader_choice(raw)
                .with_context(|| format!("invalid config '{}'", path.display()))?,
            None => defaults.bootloader,
        };
        if bootloader == BootloaderChoice::Auto && parsed.bootloader_config.is_some() {
            bail!(
                "invalid config '{}': bootloader_config requires an explicit bootloader",
                path.display()
            );
        }

        let lock_file = match parsed.lock_file {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw)),
            None => defaults.lock_file,
        };

        let extra = parsed
            .rules
            .into_iter()
            .enumerate()
            .map(|(idx, rule)| parse_rule(rule, idx, path))
            .collect::<Result<Vec<_>>>()?;
        let rules = if parsed.replace_default_rules.unwrap_or(false) {
            if extra.is_empty() {
                bail!(
                    "invalid config '{}': replace_default_rules set but no rules given",
                    path.display()
                );
            }
            extra
        } else {
            RuleClassifier::new(defaults.rules)
                .with_leading(extra)
                .rules()
                .to_vec()
        };

        Ok(Self {
            boot_dir: parsed.boot_dir.unwrap_or(defaults.boot_dir),
            modules_dir: parsed.modules_dir.unwrap_or(defaults.modules_dir),
            bootloader,
            bootloader_config: parsed.bootloader_config,
            lock_file,
            rules,
            source: None,
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::new(
            &self.boot_dir,
            &self.modules_dir,
            Box::new(RuleClassifier::new(self.rules.clone())),
        )
    }

    /// Load the configured (or detected) bootloader configuration.
    pub fn load_bootloader(&self) -> Result<Option<LoadedConfig>> {
        match self.bootloader {
            BootloaderChoice::Disabled => Ok(None),
            BootloaderChoice::Auto => match Bootloader::detect(&self.boot_dir) {
                Some((bootloader, path)) => {
                    tracing::debug!(%bootloader, config = %path.display(), "bootloader detected");
                    bootloader.load(&path).map(Some)
                }
                None => {
                    tracing::debug!(boot_dir = %self.boot_dir.display(), "no bootloader configuration found");
                    Ok(None)
                }
            },
            BootloaderChoice::Fixed(bootloader) => {
                let searched = bootloader.default_config_paths(&self.boot_dir);
                let path = match &self.bootloader_config {
                    Some(path) => path.clone(),
                    None => searched.iter().find(|p| p.exists()).cloned().ok_or_else(|| {
                        anyhow!(
                            "no {} configuration found; searched:\n{}",
                            bootloader,
                            searched
                                .iter()
                                .map(|p| format!("  - {}", p.display()))
                                .collect::<Vec<_>>()
                                .join("\n")
                        )
                    })?,
                };
                bootloader.load(&path).map(Some)
            }
        }
    }
}

/// Parse a bootloader name as accepted in the config file and on the
/// command line.
pub fn parse_bootloader_choice(raw: &str) -> Result<BootloaderChoice> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(BootloaderChoice::Auto),
        "none" => Ok(BootloaderChoice::Disabled),
        other => Bootloader::from_name(other)
            .map(BootloaderChoice::Fixed)
            .ok_or_else(|| {
                anyhow!(
                    "unsupported bootloader '{}' (expected auto, none, {})",
                    other,
                    Bootloader::ALL
                        .iter()
                        .map(|b| b.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }),
    }
}

fn parse_rule(raw: RuleToml, idx: usize, config_path: &Path) -> Result<Rule> {
    let invalid = |msg: &str| {
        anyhow!(
            "invalid config '{}': rules[{}]: {}",
            config_path.display(),
            idx,
            msg
        )
    };

    let version_dir = raw.version_dir.unwrap_or(false);
    let rule = match (raw.prefix, version_dir, raw.name) {
        (Some(prefix), false, None) => {
            if raw.depth.is_some() {
                return Err(invalid("depth only applies to name rules"));
            }
            if prefix.is_empty() {
                return Err(invalid("prefix must not be empty"));
            }
            Rule::prefix(raw.part, raw.root, &prefix, raw.suffix.as_deref().unwrap_or(""))
        }
        (None, true, None) => {
            if raw.suffix.is_some() || raw.depth.is_some() {
                return Err(invalid("version_dir rules take no suffix or depth"));
            }
            Rule::version_dir(raw.part, raw.root)
        }
        (None, false, Some(name)) => {
            if raw.suffix.is_some() {
                return Err(invalid("name rules take no suffix"));
            }
            let depth = raw.depth.unwrap_or(2);
            if depth < 2 {
                return Err(invalid("depth must be at least 2 for name rules"));
            }
            Rule::in_version_dir(raw.part, raw.root, &name, depth)
        }
        _ => {
            return Err(invalid(
                "exactly one of prefix, version_dir = true or name must be given",
            ))
        }
    };

    Ok(if raw.resolve_link.unwrap_or(false) {
        rule.resolving_links()
    } else {
        rule
    })
}
