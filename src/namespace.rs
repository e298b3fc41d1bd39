//! Detection of implicit namespace packages.
//!
//! A directory below `site-packages` that lacks `__init__.py` but holds
//! Python modules, or packages of its own, is importable only as an implicit
//! namespace package. When implicit namespace packages are not enabled such
//! directories get an empty `__init__.py` so they behave as regular packages.

use anyhow::Result;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

pub const INIT_FILE: &str = "__init__.py";

const MODULE_EXTENSIONS: [&str; 4] = ["py", "pyc", "so", "pyd"];

/// Files and subdirectories held directly by one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: BTreeSet<String>,
    pub dirs: BTreeSet<String>,
}

/// Directory tree keyed by path relative to the scanned root. The root
/// itself is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    dirs: BTreeMap<PathBuf, DirListing>,
}

fn is_ignored_dir(name: &str) -> bool {
    name == "__pycache__" || name.ends_with(".dist-info") || name.ends_with(".data")
}

fn is_module(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext))
}

impl TreeSnapshot {
    /// Walk `root` through `runtime`. Ignored subtrees are not descended into.
    #[tracing::instrument(skip(runtime))]
    pub fn scan<R: Runtime + ?Sized>(runtime: &R, root: &Path) -> Result<Self> {
        let mut snapshot = TreeSnapshot::default();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative) = pending.pop() {
            let mut listing = DirListing::default();
            for child in runtime.read_dir(&root.join(&relative))? {
                let Some(name) = child.file_name().map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                if runtime.is_dir(&child) {
                    if !is_ignored_dir(&name) {
                        pending.push(relative.join(&name));
                    }
                    listing.dirs.insert(name);
                } else {
                    listing.files.insert(name);
                }
            }
            snapshot.dirs.insert(relative, listing);
        }

        debug!("Scanned {} directories below {:?}", snapshot.dirs.len(), root);
        Ok(snapshot)
    }

    /// Build a snapshot from relative file paths. Directories are implied by
    /// the paths; a trailing `/` records an empty directory.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snapshot = TreeSnapshot::default();
        snapshot.dirs.insert(PathBuf::new(), DirListing::default());

        for path in paths {
            let path = path.as_ref();
            let is_dir = path.ends_with('/');
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let mut current = PathBuf::new();

            for (i, segment) in segments.iter().enumerate() {
                let last = i + 1 == segments.len();
                let listing = snapshot.dirs.entry(current.clone()).or_default();
                if last && !is_dir {
                    listing.files.insert(segment.to_string());
                } else {
                    listing.dirs.insert(segment.to_string());
                    current.push(segment);
                    snapshot.dirs.entry(current.clone()).or_default();
                }
            }
        }

        snapshot
    }

    pub fn listing(&self, relative: &Path) -> Option<&DirListing> {
        self.dirs.get(relative)
    }
}

/// Initializer files to create, relative to the snapshot root, ordered by
/// directory path. Empty when implicit namespace packages are enabled.
pub fn plan(snapshot: &TreeSnapshot, enable_implicit_namespace_pkgs: bool) -> Vec<PathBuf> {
    if enable_implicit_namespace_pkgs {
        return Vec::new();
    }

    let mut markers = BTreeSet::new();
    visit(snapshot, Path::new(""), &mut markers);
    markers.into_iter().map(|dir| dir.join(INIT_FILE)).collect()
}

/// Returns whether `dir` is a package once the plan is applied.
fn visit(snapshot: &TreeSnapshot, dir: &Path, markers: &mut BTreeSet<PathBuf>) -> bool {
    let Some(listing) = snapshot.listing(dir) else {
        return false;
    };

    let mut has_child_package = false;
    for name in listing.dirs.iter().filter(|name| !is_ignored_dir(name)) {
        // Every child is visited so nested namespace directories are found.
        if visit(snapshot, &dir.join(name), markers) {
            has_child_package = true;
        }
    }

    let is_root = dir.as_os_str().is_empty();
    if listing.files.contains(INIT_FILE) {
        return !is_root;
    }

    let has_module = listing.files.iter().any(|name| is_module(name));
    if !is_root && (has_module || has_child_package) {
        markers.insert(dir.to_path_buf());
        return true;
    }
    false
}

/// Make implicit namespace packages below `root` explicit. Returns the
/// created files. Existing files are never touched, so a second run is a
/// no-op.
#[tracing::instrument(skip(runtime))]
pub fn normalize<R: Runtime + ?Sized>(
    runtime: &R,
    root: &Path,
    enable_implicit_namespace_pkgs: bool,
) -> Result<Vec<PathBuf>> {
    if enable_implicit_namespace_pkgs {
        debug!("Implicit namespace packages enabled, leaving {:?} as is", root);
        return Ok(Vec::new());
    }

    let snapshot = TreeSnapshot::scan(runtime, root)?;
    let mut created = Vec::new();
    for relative in plan(&snapshot, false) {
        let path = root.join(&relative);
        runtime.write(&path, b"")?;
        debug!("Created namespace package initializer {:?}", path);
        created.push(path);
    }

    if !created.is_empty() {
        info!(
            "Converted {} namespace package(s) below {:?}",
            created.len(),
            root
        );
    }
    Ok(created)
}
