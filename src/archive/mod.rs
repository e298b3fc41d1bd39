//! Read-only access to wheel archives.
//!
//! [`PackageArchive::open`] validates the container signature, parses the
//! full entry index up front and recognizes the wheel format version from the
//! `WHEEL` member. Content is streamed through [`EntryReader`] handles, one
//! per worker, so no cursor state is shared.

mod filename;
mod zip;

use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;
use crate::metadata::headers::Headers;

pub use filename::{WheelFilename, normalize_dist_info_name};
pub use self::zip::{CopyError, EntryReader, EntryStream};

use filename::same_dist_info;
use self::zip::ZipIndex;

/// One member of the archive index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Position in the zip central directory
    pub index: usize,
    pub recorded_path: String,
    pub size: u64,
    pub is_dir: bool,
    pub unix_mode: Option<u32>,
}

/// Recognized wheel format versions. Anything else fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelFormat {
    V1 { minor: u32 },
}

impl WheelFormat {
    fn from_version(version: &str) -> Option<Self> {
        let (major, minor) = version.trim().split_once('.')?;
        let major: u32 = major.parse().ok()?;
        let minor: u32 = minor.parse().ok()?;
        match major {
            1 => Some(WheelFormat::V1 { minor }),
            _ => None,
        }
    }
}

impl fmt::Display for WheelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WheelFormat::V1 { minor } => write!(f, "1.{}", minor),
        }
    }
}

#[derive(Debug)]
pub struct PackageArchive {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
    by_name: HashMap<String, usize>,
    dist_info: String,
    format: WheelFormat,
}

impl PackageArchive {
    #[tracing::instrument]
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut index = ZipIndex::parse(path)?;

        let by_name = index
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.recorded_path.clone(), pos))
            .collect::<HashMap<_, _>>();

        let dist_info = find_dist_info(path, &index.entries)?;
        let wheel_member = format!("{}/WHEEL", dist_info);
        let wheel_entry = by_name
            .get(&wheel_member)
            .map(|&pos| index.entries[pos].clone())
            .ok_or_else(|| unsupported(path, format!("missing {}", wheel_member)))?;

        let text = index.read_text(&wheel_entry)?;
        let headers = Headers::parse(&wheel_member, &text).map_err(|e| unsupported(path, e))?;
        let version = headers
            .get("Wheel-Version")
            .ok_or_else(|| unsupported(path, format!("{} has no Wheel-Version", wheel_member)))?;
        let format = WheelFormat::from_version(version).ok_or_else(|| {
            unsupported(path, format!("Wheel-Version {} is not supported", version))
        })?;

        debug!(
            "Opened {:?}: {} entries, {}, wheel format {}",
            path,
            index.entries.len(),
            dist_info,
            format
        );

        Ok(PackageArchive {
            path: path.to_path_buf(),
            entries: index.entries,
            by_name,
            dist_info,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the archive, used when retaining a copy for provenance.
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or(self.path.as_os_str())
    }

    /// Entries in stored order. Can be called any number of times.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &ArchiveEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, recorded_path: &str) -> Option<&ArchiveEntry> {
        self.by_name.get(recorded_path).map(|&pos| &self.entries[pos])
    }

    /// Name of the `*.dist-info` directory, without trailing slash.
    pub fn dist_info_dir(&self) -> &str {
        &self.dist_info
    }

    pub fn format(&self) -> WheelFormat {
        self.format
    }

    /// Open an independent handle for streaming entry content.
    pub fn reader(&self) -> Result<EntryReader, ArchiveError> {
        EntryReader::open(&self.path)
    }

    /// Read a small text member, `Ok(None)` when the archive lacks it.
    pub fn read_to_string(&self, recorded_path: &str) -> Result<Option<String>, ArchiveError> {
        let Some(entry) = self.entry(recorded_path) else {
            return Ok(None);
        };
        let mut reader = self.reader()?;
        let text = reader.read(entry)?.read_text()?;
        Ok(Some(text))
    }
}

fn unsupported(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Unsupported {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Pick the single top-level `*.dist-info` directory. When a wheel carries
/// several, the one matching the file name wins.
fn find_dist_info(path: &Path, entries: &[ArchiveEntry]) -> Result<String, ArchiveError> {
    let candidates: BTreeSet<&str> = entries
        .iter()
        .filter_map(|e| {
            let (top, rest) = e.recorded_path.split_once('/')?;
            (top.ends_with(".dist-info") && (!rest.is_empty() || e.is_dir)).then_some(top)
        })
        .collect();

    match candidates.len() {
        0 => Err(unsupported(path, "no .dist-info directory")),
        1 => Ok(candidates.into_iter().next().map(str::to_string).unwrap_or_default()),
        _ => {
            let expected = WheelFilename::from_path(path)
                .map(|name| name.dist_info_dir())
                .ok_or_else(|| unsupported(path, "multiple .dist-info directories"))?;
            candidates
                .into_iter()
                .find(|c| same_dist_info(c, &expected))
                .map(str::to_string)
                .ok_or_else(|| {
                    unsupported(
                        path,
                        format!("multiple .dist-info directories and none is {}", expected),
                    )
                })
        }
    }
}
