//! Distribution metadata and the installation summary.

mod entry_points;
pub mod headers;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::archive::PackageArchive;
use crate::error::{ArchiveError, MetadataError, StepError};
use headers::Headers;

pub use entry_points::{CONSOLE_SCRIPTS, EntryPoint, parse_console_scripts};

/// File name of the summary written at the installation root.
pub const SUMMARY_FILE: &str = "metadata.json";

/// The summary consumed by downstream build rules. Key names and order are
/// part of the file format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetadataSummary {
    pub entry_points: Vec<EntryPoint>,
    #[serde(rename = "python_version")]
    pub runtime_version: String,
}

impl MetadataSummary {
    /// Serialized form: pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Name and version information from `METADATA`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub name: String,
    pub version: String,
    pub requires_python: Option<String>,
}

/// Errors from reading metadata members out of an archive.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl From<ExtractError> for StepError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Archive(e) => StepError::Archive(e),
            ExtractError::Metadata(e) => StepError::Metadata(e),
        }
    }
}

fn member(archive: &PackageArchive, file: &str) -> String {
    format!("{}/{}", archive.dist_info_dir(), file)
}

/// Read `METADATA`. Its absence is fatal.
pub fn read_distribution(archive: &PackageArchive) -> Result<Distribution, ExtractError> {
    let name = member(archive, "METADATA");
    let text = archive
        .read_to_string(&name)?
        .ok_or_else(|| MetadataError::Missing {
            member: name.clone(),
        })?;
    let headers = Headers::parse(&name, &text)?;

    let required = |key: &str| {
        headers
            .get(key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MetadataError::Malformed {
                member: name.clone(),
                line: 0,
                reason: format!("missing {} header", key),
            })
    };

    Ok(Distribution {
        name: required("Name")?,
        version: required("Version")?,
        requires_python: headers.get("Requires-Python").map(str::to_string),
    })
}

/// Read the declared console scripts; an absent `entry_points.txt` means none.
pub fn read_entry_points(archive: &PackageArchive) -> Result<Vec<EntryPoint>, ExtractError> {
    let name = member(archive, "entry_points.txt");
    match archive.read_to_string(&name)? {
        Some(text) => Ok(parse_console_scripts(&name, &text)?),
        None => Ok(Vec::new()),
    }
}

/// Build the summary for `archive`, recording `runtime_version` verbatim.
#[tracing::instrument(skip(archive), fields(archive = ?archive.path()))]
pub fn extract(
    archive: &PackageArchive,
    runtime_version: &str,
) -> Result<MetadataSummary, ExtractError> {
    let distribution = read_distribution(archive)?;
    let entry_points = read_entry_points(archive)?;

    debug!(
        "{} {} declares {} console script(s), requires-python {:?}",
        distribution.name,
        distribution.version,
        entry_points.len(),
        distribution.requires_python
    );

    Ok(MetadataSummary {
        entry_points,
        runtime_version: runtime_version.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::*;
    use tempfile::tempdir;

    fn open_with(extra: &[(&str, &str)]) -> (tempfile::TempDir, PackageArchive) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MINIMAL_WHEEL);
        let mut members = minimal_members();
        members.extend(extra.iter().map(|(n, c)| (n.to_string(), c.to_string())));
        write_members(&path, &members);
        let archive = PackageArchive::open(&path).unwrap();
        (dir, archive)
    }

    #[test]
    fn test_extract_without_entry_points() {
        let (_dir, archive) = open_with(&[]);
        let summary = extract(&archive, "3.11.11").unwrap();
        assert_eq!(
            summary,
            MetadataSummary {
                entry_points: vec![],
                runtime_version: "3.11.11".into(),
            }
        );
    }

    #[test]
    fn test_extract_with_entry_points() {
        let ep = format!("{}/entry_points.txt", MINIMAL_DIST_INFO);
        let (_dir, archive) = open_with(&[(
            ep.as_str(),
            "[console_scripts]\nminimal = example_minimal_package:main\n",
        )]);

        let summary = extract(&archive, "3.12.1").unwrap();
        assert_eq!(summary.entry_points.len(), 1);
        assert_eq!(summary.entry_points[0].name, "minimal");
        assert_eq!(summary.entry_points[0].module, "example_minimal_package");
        assert_eq!(summary.entry_points[0].attribute, "main");
    }

    #[test]
    fn test_extract_malformed_entry_points_is_fatal() {
        let ep = format!("{}/entry_points.txt", MINIMAL_DIST_INFO);
        let (_dir, archive) = open_with(&[(ep.as_str(), "[console_scripts]\nbroken\n")]);

        assert!(matches!(
            extract(&archive, "3.11.11"),
            Err(ExtractError::Metadata(MetadataError::Malformed { line: 2, .. }))
        ));
    }

    #[test]
    fn test_missing_metadata_member() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(
            &path,
            &[("demo/__init__.py", ""), ("demo-1.0.dist-info/WHEEL", WHEEL_V1)],
        );
        let archive = PackageArchive::open(&path).unwrap();

        match extract(&archive, "3.11.11") {
            Err(ExtractError::Metadata(MetadataError::Missing { member })) => {
                assert_eq!(member, "demo-1.0.dist-info/METADATA")
            }
            other => panic!("expected missing METADATA, got {:?}", other),
        }
    }

    #[test]
    fn test_read_distribution() {
        let (_dir, archive) = open_with(&[]);
        let dist = read_distribution(&archive).unwrap();
        assert_eq!(dist.name, "example_minimal_package");
        assert_eq!(dist.version, "0.0.1");
        assert_eq!(dist.requires_python.as_deref(), Some(">=3.8"));
    }

    #[test]
    fn test_read_distribution_requires_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(
            &path,
            &[
                ("demo-1.0.dist-info/WHEEL", WHEEL_V1),
                ("demo-1.0.dist-info/METADATA", "Metadata-Version: 2.1\nVersion: 1.0\n"),
            ],
        );
        let archive = PackageArchive::open(&path).unwrap();
        assert!(matches!(
            read_distribution(&archive),
            Err(ExtractError::Metadata(MetadataError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_summary_json_layout() {
        let summary = MetadataSummary {
            entry_points: vec![EntryPoint {
                name: "demo".into(),
                module: "demo.cli".into(),
                attribute: "main".into(),
            }],
            runtime_version: "3.11.11".into(),
        };
        let json = summary.to_json().unwrap();
        assert!(json.ends_with("}\n"));

        let entry_points_at = json.find("\"entry_points\"").unwrap();
        let python_version_at = json.find("\"python_version\"").unwrap();
        assert!(entry_points_at < python_version_at);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "entry_points": [{"name": "demo", "module": "demo.cli", "attribute": "main"}],
                "python_version": "3.11.11",
            })
        );
    }

    #[test]
    fn test_empty_summary_keeps_entry_points_field() {
        let summary = MetadataSummary {
            entry_points: vec![],
            runtime_version: "3.11.11".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(value["entry_points"], serde_json::json!([]));
    }
}
