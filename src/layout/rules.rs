//! Data-driven file classification.

use std::fs;

use super::{Classified, Classifier, EntryType, Root, ScanEntry};
use crate::kernel::{GenericFile, PartKind};

/// How an entry's name encodes the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `<prefix><version><suffix>` directly under the root.
    Prefix { prefix: String, suffix: String },
    /// A directory directly under the root named after the version.
    VersionDir,
    /// An entry called `name` at exactly `depth`, inside a directory named
    /// after the version.
    InVersionDir { name: String, depth: usize },
}

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub part: PartKind,
    pub root: Root,
    pub pattern: Pattern,
    /// Accept symlinks, recording the resolved target as the part's path.
    pub resolve_link: bool,
}

impl Rule {
    pub fn prefix(part: PartKind, root: Root, prefix: &str, suffix: &str) -> Self {
        Self {
            part,
            root,
            pattern: Pattern::Prefix {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            },
            resolve_link: false,
        }
    }

    pub fn version_dir(part: PartKind, root: Root) -> Self {
        Self {
            part,
            root,
            pattern: Pattern::VersionDir,
            resolve_link: false,
        }
    }

    pub fn in_version_dir(part: PartKind, root: Root, name: &str, depth: usize) -> Self {
        Self {
            part,
            root,
            pattern: Pattern::InVersionDir {
                name: name.to_string(),
                depth,
            },
            resolve_link: false,
        }
    }

    pub fn resolving_links(mut self) -> Self {
        self.resolve_link = true;
        self
    }

    fn depth(&self) -> usize {
        match &self.pattern {
            Pattern::Prefix { .. } | Pattern::VersionDir => 1,
            Pattern::InVersionDir { depth, .. } => *depth,
        }
    }

    /// Try this rule against one entry.
    pub fn apply(&self, entry: &ScanEntry) -> Option<Classified> {
        if entry.root != self.root || entry.depth != self.depth() {
            return None;
        }

        let (path, is_dir) = match entry.entry_type {
            EntryType::Symlink if !self.resolve_link => return None,
            EntryType::Symlink => {
                let target = fs::canonicalize(&entry.path).ok()?;
                let is_dir = target.is_dir();
                (target, is_dir)
            }
            EntryType::Dir => (entry.path.clone(), true),
            EntryType::File => (entry.path.clone(), false),
        };

        let name = entry.file_name()?;
        let version = match &self.pattern {
            Pattern::Prefix { prefix, suffix } => {
                if is_dir {
                    return None;
                }
                name.strip_prefix(prefix.as_str())?
                    .strip_suffix(suffix.as_str())?
            }
            Pattern::VersionDir => {
                if !is_dir {
                    return None;
                }
                name
            }
            Pattern::InVersionDir { name: wanted, .. } => {
                if name != wanted {
                    return None;
                }
                entry.path.parent()?.file_name()?.to_str()?
            }
        };

        if version.is_empty() {
            return None;
        }
        Some(Classified {
            version: version.to_string(),
            file: GenericFile::new(path, self.part),
        })
    }
}

/// Stock rules for the usual `/boot` + `/lib/modules` layout, including
/// Boot Loader Specification trees (`<boot>/<machine-id>/<version>/linux`).
pub fn default_rules() -> Vec<Rule> {
    use PartKind::*;
    const BOOT: Root = Root::Boot;
    const MODS: Root = Root::Modules;

    vec![
        Rule::prefix(Vmlinuz, BOOT, "vmlinuz-", ""),
        Rule::prefix(Vmlinuz, BOOT, "vmlinux-", ""),
        Rule::prefix(Vmlinuz, BOOT, "kernel-", ""),
        Rule::prefix(Vmlinuz, BOOT, "bzImage-", ""),
        Rule::prefix(Systemmap, BOOT, "System.map-", ""),
        Rule::prefix(Config, BOOT, "config-", ""),
        Rule::prefix(Initramfs, BOOT, "initramfs-", ".img"),
        Rule::prefix(Initramfs, BOOT, "initrd-", ".img"),
        Rule::prefix(Initramfs, BOOT, "initrd.img-", ""),
        Rule::prefix(Initramfs, BOOT, "initramfs-", ""),
        Rule::in_version_dir(Vmlinuz, BOOT, "linux", 3),
        Rule::in_version_dir(Initramfs, BOOT, "initrd", 3),
        Rule::version_dir(Modules, MODS),
        Rule::in_version_dir(Build, MODS, "build", 2).resolving_links(),
    ]
}

/// Classifier that tries an ordered rule list, first match wins.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules tried before the existing ones.
    pub fn with_leading(mut self, rules: Vec<Rule>) -> Self {
        let existing = std::mem::replace(&mut self.rules, rules);
        self.rules.extend(existing);
        self
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, entry: &ScanEntry) -> Option<Classified> {
        self.rules.iter().find_map(|rule| rule.apply(entry))
    }

    fn max_depth(&self, root: Root) -> usize {
        self.rules
            .iter()
            .filter(|rule| rule.root == root)
            .map(Rule::depth)
            .max()
            .unwrap_or(0)
    }
}
