//! Determining the runtime version string recorded in the summary.

use anyhow::{Context, Result, bail};
use log::debug;

use crate::runtime::Runtime;

/// Printed by the interpreter to report its exact version.
pub const VERSION_PROBE: &str = "import platform; print(platform.python_version())";

/// Ask `python` for its version.
#[tracing::instrument(skip(runtime))]
pub fn probe_version<R: Runtime + ?Sized>(runtime: &R, python: &str) -> Result<String> {
    let args = ["-c".to_string(), VERSION_PROBE.to_string()];
    let output = runtime
        .command_output(python, &args)
        .with_context(|| format!("Failed to query the version of {}", python))?;

    let version = output.lines().last().unwrap_or_default().trim().to_string();
    if !looks_like_version(&version) {
        bail!("{} reported an unexpected version {:?}", python, version);
    }
    debug!("{} reports version {}", python, version);
    Ok(version)
}

/// An explicit version wins and is used verbatim; otherwise the interpreter
/// is asked.
pub fn resolve_runtime_version<R: Runtime + ?Sized>(
    runtime: &R,
    explicit: Option<&str>,
    python: Option<&str>,
) -> Result<String> {
    match (explicit, python) {
        (Some(version), _) if !version.trim().is_empty() => Ok(version.to_string()),
        (_, Some(python)) => probe_version(runtime, python),
        _ => bail!("A Python version is required: pass --python-version or --python"),
    }
}

fn looks_like_version(s: &str) -> bool {
    let mut parts = s.split('.');
    let leading_numeric = |p: Option<&str>| {
        p.is_some_and(|p| p.chars().next().is_some_and(|c| c.is_ascii_digit()))
    };
    leading_numeric(parts.next()) && leading_numeric(parts.next())
}
