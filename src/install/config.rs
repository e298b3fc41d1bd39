use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::ArchiveError;

/// Name of the directory below the installation root that mirrors the
/// archive content.
pub const SITE_PACKAGES: &str = "site-packages";

/// Everything one installation needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub archive: PathBuf,
    pub installation_dir: PathBuf,
    pub enable_implicit_namespace_pkgs: bool,
    pub overwrite: bool,
    /// Recorded verbatim as `python_version` in the summary.
    pub runtime_version: String,
    /// Extraction workers; 0 lets the pool pick one per CPU.
    pub jobs: usize,
}

impl InstallRequest {
    pub fn new(
        archive: impl Into<PathBuf>,
        installation_dir: impl Into<PathBuf>,
        runtime_version: impl Into<String>,
    ) -> Self {
        Self {
            archive: archive.into(),
            installation_dir: installation_dir.into(),
            enable_implicit_namespace_pkgs: false,
            overwrite: false,
            runtime_version: runtime_version.into(),
            jobs: 0,
        }
    }

    pub fn enable_implicit_namespace_pkgs(mut self, enable: bool) -> Self {
        self.enable_implicit_namespace_pkgs = enable;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn site_packages(&self) -> PathBuf {
        self.installation_dir.join(SITE_PACKAGES)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.installation_dir.join(crate::metadata::SUMMARY_FILE)
    }

    pub(crate) fn summary_temp_path(&self) -> PathBuf {
        self.installation_dir
            .join(format!("{}.tmp", crate::metadata::SUMMARY_FILE))
    }

    /// File name of the archive. It must end in `.whl`, which keeps the
    /// retained copy clear of `site-packages` and `metadata.json`.
    pub fn archive_file_name(&self) -> Result<&OsStr, ArchiveError> {
        let unsupported = |reason: &str| ArchiveError::Unsupported {
            path: self.archive.clone(),
            reason: reason.to_string(),
        };
        let name = self
            .archive
            .file_name()
            .ok_or_else(|| unsupported("path has no file name"))?;
        let is_wheel = Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("whl"));
        if !is_wheel {
            return Err(unsupported("file name does not end in .whl"));
        }
        Ok(name)
    }

    /// Where the archive is retained inside the installation root.
    pub fn retained_archive_path(&self) -> Result<PathBuf, ArchiveError> {
        Ok(self.installation_dir.join(self.archive_file_name()?))
    }
}
