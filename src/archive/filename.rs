//! Wheel file names (`{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`).

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl WheelFilename {
    /// Parse the file name component of `path`. Returns `None` for names that
    /// do not follow the wheel naming convention.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::parse(path.file_name()?.to_str()?)
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".whl")?;
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        let (name, version, build, tags) = match parts.as_slice() {
            [name, version, py, abi, plat] => (*name, *version, None, [*py, *abi, *plat]),
            [name, version, build, py, abi, plat] => {
                // Build tags must start with a digit
                if !build.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                (*name, *version, Some(build.to_string()), [*py, *abi, *plat])
            }
            _ => return None,
        };

        Some(WheelFilename {
            name: name.to_string(),
            version: version.to_string(),
            build,
            python_tag: tags[0].to_string(),
            abi_tag: tags[1].to_string(),
            platform_tag: tags[2].to_string(),
        })
    }

    /// The dist-info directory this wheel is expected to carry.
    pub fn dist_info_dir(&self) -> String {
        format!(
            "{}-{}.dist-info",
            normalize_dist_info_name(&self.name),
            self.version
        )
    }
}

impl fmt::Display for WheelFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)?;
        if let Some(build) = &self.build {
            write!(f, "-{}", build)?;
        }
        write!(
            f,
            "-{}-{}-{}.whl",
            self.python_tag, self.abi_tag, self.platform_tag
        )
    }
}

/// Collapse runs of `-`, `_` and `.` into a single underscore, as used in
/// dist-info directory names.
pub fn normalize_dist_info_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                result.push('_');
                in_separator = true;
            }
        } else {
            result.push(c);
            in_separator = false;
        }
    }

    result
}

/// Compare two dist-info directory names the way installers do: separators
/// collapsed and case folded.
pub(crate) fn same_dist_info(a: &str, b: &str) -> bool {
    normalize_dist_info_name(a).eq_ignore_ascii_case(&normalize_dist_info_name(b))
}
