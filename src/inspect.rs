//! Read-only report about a wheel, without installing it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::archive::{PackageArchive, WheelFilename};
use crate::metadata::{self, EntryPoint};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WheelReport {
    pub name: String,
    pub version: String,
    pub requires_python: Option<String>,
    pub wheel_format: String,
    /// Python/ABI/platform tags from the file name, when it follows the convention.
    pub tags: Option<String>,
    pub entry_count: usize,
    pub entry_points: Vec<EntryPoint>,
}

#[tracing::instrument]
pub fn inspect(path: &Path) -> Result<WheelReport> {
    let archive = PackageArchive::open(path)?;
    let distribution = metadata::read_distribution(&archive)
        .with_context(|| format!("Failed to read metadata from {:?}", path))?;
    let entry_points = metadata::read_entry_points(&archive)
        .with_context(|| format!("Failed to read entry points from {:?}", path))?;

    let tags = WheelFilename::from_path(path)
        .map(|f| format!("{}-{}-{}", f.python_tag, f.abi_tag, f.platform_tag));

    Ok(WheelReport {
        name: distribution.name,
        version: distribution.version,
        requires_python: distribution.requires_python,
        wheel_format: archive.format().to_string(),
        tags,
        entry_count: archive.len(),
        entry_points,
    })
}
