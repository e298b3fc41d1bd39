//! Error taxonomy for wheel installation.
//!
//! Each component reports through its own enum. The orchestrator surfaces
//! errors from opening and planning verbatim, and wraps anything that happens
//! after the first filesystem write in [`InstallError::PartialFailure`] so a
//! caller knows a partial tree may be left behind.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while opening or streaming a wheel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("cannot read archive {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("archive {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("entry {entry} is truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        entry: String,
        expected: u64,
        actual: u64,
    },

    #[error("unsupported wheel {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },
}

/// Failures while mapping a recorded entry path to a destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("entry {recorded:?} escapes the installation root: {reason}")]
    Escape {
        recorded: String,
        reason: &'static str,
    },
}

/// Failures while reading distribution metadata from the dist-info directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("required metadata member {member} is missing")]
    Missing { member: String },

    #[error("{member}:{line}: {reason}")]
    Malformed {
        member: String,
        line: usize,
        reason: String,
    },
}

/// Pipeline steps that run after the installation root has been touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Extract,
    Provenance,
    Normalize,
    Metadata,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStep::Extract => "extract",
            InstallStep::Provenance => "provenance",
            InstallStep::Normalize => "normalize",
            InstallStep::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// The underlying cause of a [`InstallError::PartialFailure`].
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Filesystem(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("installation target {} exists and is not empty", path.display())]
    TargetExists { path: PathBuf },

    #[error("cannot prepare installation target {}: {source}", path.display())]
    Target {
        path: PathBuf,
        #[source]
        source: StepError,
    },

    #[error("installation did not finish within {after:?}")]
    Timeout { after: Duration },

    #[error("installation task ended before finishing: {source}")]
    Aborted {
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("installation failed during the {step} step: {source}")]
    PartialFailure {
        step: InstallStep,
        #[source]
        source: StepError,
    },
}

impl InstallError {
    pub(crate) fn partial(step: InstallStep, source: impl Into<StepError>) -> Self {
        InstallError::PartialFailure {
            step,
            source: source.into(),
        }
    }

    /// The step that failed, if the installation got past its preconditions.
    pub fn failed_step(&self) -> Option<InstallStep> {
        match self {
            InstallError::PartialFailure { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// True when the installation root may hold a partial tree.
    pub fn left_partial_tree(&self) -> bool {
        matches!(
            self,
            InstallError::PartialFailure { .. }
                | InstallError::Timeout { .. }
                | InstallError::Aborted { .. }
        )
    }
}
