//! Extraction of archive entries into `site-packages`.
//!
//! Planning is pure and runs before anything is written: every recorded path
//! is sanitized and destinations are checked for collisions. The copy runs
//! over a dedicated rayon pool; each worker streams through its own
//! [`EntryReader`](crate::archive::EntryReader).

use anyhow::anyhow;
use log::debug;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::archive::{ArchiveEntry, CopyError, PackageArchive};
use crate::error::{ArchiveError, InstallError, StepError};
use crate::runtime::Runtime;
use crate::sanitize;

/// Mode for extracted files whose entry carries no unix permissions.
pub const DEFAULT_FILE_MODE: u32 = 0o444;

#[derive(Debug, Default)]
pub struct ExtractionPlan {
    /// Directories to create, parents before children.
    pub dirs: BTreeSet<PathBuf>,
    /// File entries and their destinations, in stored order.
    pub files: Vec<(ArchiveEntry, PathBuf)>,
}

impl ExtractionPlan {
    /// Sanitize every entry below `site_packages`.
    pub fn build(archive: &PackageArchive, site_packages: &Path) -> Result<Self, InstallError> {
        let mut plan = ExtractionPlan::default();
        let mut destinations: HashMap<PathBuf, &str> = HashMap::with_capacity(archive.len());

        for entry in archive.entries() {
            let resolved = sanitize::resolve(&entry.recorded_path, site_packages)?;

            if let Some(previous) =
                destinations.insert(resolved.destination.clone(), &entry.recorded_path)
            {
                return Err(ArchiveError::Corrupt {
                    path: archive.path().to_path_buf(),
                    reason: format!(
                        "entries {:?} and {:?} map to the same destination",
                        previous, entry.recorded_path
                    ),
                }
                .into());
            }

            let mut parent = resolved.destination.parent();
            while let Some(dir) = parent {
                if dir == site_packages {
                    break;
                }
                plan.dirs.insert(dir.to_path_buf());
                parent = dir.parent();
            }

            if entry.is_dir {
                plan.dirs.insert(resolved.destination);
            } else {
                plan.files.push((entry.clone(), resolved.destination));
            }
        }

        // A file may not sit where another entry needs a directory
        if let Some((entry, _)) = plan.files.iter().find(|(_, dest)| plan.dirs.contains(dest)) {
            return Err(ArchiveError::Corrupt {
                path: archive.path().to_path_buf(),
                reason: format!(
                    "entry {:?} is a file but other entries need it as a directory",
                    entry.recorded_path
                ),
            }
            .into());
        }

        Ok(plan)
    }
}

fn file_mode(entry: &ArchiveEntry) -> u32 {
    entry
        .unix_mode
        .map(|mode| mode & 0o777)
        .unwrap_or(DEFAULT_FILE_MODE)
}

/// Create the planned tree and stream every file into place. Returns the
/// number of bytes written.
#[tracing::instrument(skip_all, fields(files = plan.files.len(), jobs = jobs))]
pub fn extract<R: Runtime + ?Sized>(
    runtime: &R,
    archive: &PackageArchive,
    plan: &ExtractionPlan,
    site_packages: &Path,
    jobs: usize,
    cancelled: &AtomicBool,
) -> Result<u64, StepError> {
    runtime.create_dir_all(site_packages)?;
    for dir in &plan.dirs {
        runtime.create_dir_all(dir)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("whlinst-extract-{}", i))
        .build()
        .map_err(|e| anyhow!("Failed to start extraction workers: {}", e))?;

    let written = pool.install(|| {
        plan.files
            .par_iter()
            .map_init(
                || archive.reader(),
                |reader, (entry, destination)| {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(StepError::Filesystem(anyhow!("installation cancelled")));
                    }
                    let reader = reader.as_mut().map_err(|e| e.clone())?;
                    let mut stream = reader.read(entry)?;

                    let mut writer = runtime.create_file(destination)?;
                    let bytes = stream.copy_into(writer.as_mut()).map_err(|e| match e {
                        CopyError::Archive(e) => StepError::Archive(e),
                        CopyError::Write(e) => StepError::Filesystem(
                            anyhow::Error::new(e)
                                .context(format!("Failed to write {:?}", destination)),
                        ),
                    })?;
                    drop(writer);

                    runtime.set_permissions(destination, file_mode(entry))?;
                    Ok(bytes)
                },
            )
            .try_reduce(|| 0, |a, b| Ok(a + b))
    })?;

    debug!(
        "Extracted {} files ({} bytes) into {:?}",
        plan.files.len(),
        written,
        site_packages
    );
    Ok(written)
}
