//! Discovering kernel builds on disk.
//!
//! A [`Layout`] walks the boot and module directories, asks its
//! [`Classifier`] what each entry is, and groups the hits into [`Kernel`]s
//! by version. Naming conventions differ between distributions, so the
//! classifier is a trait and the stock [`RuleClassifier`] is plain data
//! that configuration can extend.

pub mod rules;

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::kernel::{GenericFile, Kernel};

pub use rules::{default_rules, Pattern, Rule, RuleClassifier};

/// Which scan root an entry was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Root {
    Boot,
    Modules,
}

/// What kind of filesystem object an entry is (symlinks are not followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Symlink,
}

/// One filesystem entry offered to a classifier.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub root: Root,
    pub path: PathBuf,
    /// Depth below the scan root, direct children are 1.
    pub depth: usize,
    pub entry_type: EntryType,
}

impl ScanEntry {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// A classified entry: which version it belongs to and what part it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub version: String,
    pub file: GenericFile,
}

/// Maps filesystem entries to kernel parts.
pub trait Classifier {
    /// Classify one entry, `None` for anything unrecognised.
    fn classify(&self, entry: &ScanEntry) -> Option<Classified>;

    /// How deep below `root` the scan must descend; 0 skips the root.
    fn max_depth(&self, root: Root) -> usize;
}

/// Where to look and how to recognise what is found there.
pub struct Layout {
    pub boot_dir: PathBuf,
    pub modules_dir: PathBuf,
    classifier: Box<dyn Classifier>,
}

impl Layout {
    pub fn new(
        boot_dir: impl Into<PathBuf>,
        modules_dir: impl Into<PathBuf>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        Self {
            boot_dir: boot_dir.into(),
            modules_dir: modules_dir.into(),
            classifier,
        }
    }

    /// Standard layout over the stock rules.
    pub fn standard(boot_dir: impl Into<PathBuf>, modules_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            boot_dir,
            modules_dir,
            Box::new(RuleClassifier::new(default_rules())),
        )
    }

    pub fn root_dir(&self, root: Root) -> &Path {
        match root {
            Root::Boot => &self.boot_dir,
            Root::Modules => &self.modules_dir,
        }
    }

    /// Scan both roots and return the discovered kernels sorted by version.
    pub fn scan(&self) -> Result<Vec<Kernel>> {
        let mut kernels: BTreeMap<String, Kernel> = BTreeMap::new();

        for root in [Root::Boot, Root::Modules] {
            for entry in self.walk(root)? {
                let Some(hit) = self.classifier.classify(&entry) else {
                    continue;
                };

                let kernel = kernels
                    .entry(hit.version.clone())
                    .or_insert_with(|| Kernel::new(hit.version.clone()));
                if let Some(first) = kernel.set_part(hit.file) {
                    // Keep the first claimant of the slot
                    if let Some(dup) = kernel.set_part(first) {
                        tracing::debug!(
                            version = %hit.version,
                            part = %dup.kind,
                            ignored = %dup.path.display(),
                            "duplicate part, keeping the first one found"
                        );
                    }
                }
            }
        }

        let mut result: Vec<Kernel> = kernels.into_values().collect();
        result.sort_by(|a, b| version_cmp(a.version(), b.version()));
        tracing::debug!(count = result.len(), "kernel scan finished");
        Ok(result)
    }

    fn walk(&self, root: Root) -> Result<Vec<ScanEntry>> {
        let dir = self.root_dir(root);
        let max_depth = self.classifier.max_depth(root);
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "scan root missing, skipping");
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut walk_errors = 0;
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| format!("scanning '{}'", dir.display()));
                }
                Err(e) => {
                    walk_errors += 1;
                    tracing::warn!("error reading entry under {}: {}", dir.display(), e);
                    continue;
                }
            };

            let ft = entry.file_type();
            let entry_type = if ft.is_symlink() {
                EntryType::Symlink
            } else if ft.is_dir() {
                EntryType::Dir
            } else {
                EntryType::File
            };
            entries.push(ScanEntry {
                root,
                depth: entry.depth(),
                path: entry.into_path(),
                entry_type,
            });
        }

        if walk_errors > 0 {
            tracing::warn!(
                "{} errors while scanning {} (results may be incomplete)",
                walk_errors,
                dir.display()
            );
        }
        Ok(entries)
    }
}

/// Order version strings the way humans expect: digit runs compare
/// numerically, everything else compares bytewise.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let mut a = chunks(a);
    let mut b = chunks(b);
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny).then_with(|| x.len().cmp(&y.len())),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}
