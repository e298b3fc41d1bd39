use anyhow::Result;
use clap::Parser;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

use whlinst::cleanup::{self, SharedCleanupContext};
use whlinst::interpreter::resolve_runtime_version;
use whlinst::runtime::RealRuntime;
use whlinst::{InstallRequest, Installer, MetadataSummary, namespace};

/// whlinst - Python wheel installer
///
/// Unpacks a wheel into a self-contained directory holding an importable
/// `site-packages` tree, the original archive and a `metadata.json` summary.
///
/// Examples:
///   whlinst install demo-1.0-py3-none-any.whl --installation-dir out --python-version 3.11.11
///   whlinst inspect demo-1.0-py3-none-any.whl
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a wheel into a directory
    Install(InstallArgs),

    /// Print what a wheel declares, without installing it
    Inspect(InspectArgs),

    /// Add `__init__.py` to implicit namespace packages in an existing tree
    Normalize(NormalizeArgs),
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Path to the wheel
    #[arg(value_name = "WHEEL")]
    pub wheel: PathBuf,

    /// Directory to install into
    #[arg(long = "installation-dir", value_name = "DIR")]
    pub installation_dir: PathBuf,

    /// Leave implicit namespace packages as they are
    #[arg(long)]
    pub enable_implicit_namespace_pkgs: bool,

    /// Replace the content of a non-empty installation directory
    #[arg(long)]
    pub overwrite: bool,

    /// Python version recorded in metadata.json (also via WHLINST_PYTHON_VERSION)
    #[arg(long, env = "WHLINST_PYTHON_VERSION", value_name = "VERSION")]
    pub python_version: Option<String>,

    /// Interpreter to ask for its version when --python-version is not given
    #[arg(long, value_name = "INTERPRETER")]
    pub python: Option<String>,

    /// Extraction workers, 0 for one per CPU (also via WHLINST_JOBS)
    #[arg(long, short = 'j', env = "WHLINST_JOBS", default_value_t = 0)]
    pub jobs: usize,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Remove whatever the installation created if it fails
    #[arg(long)]
    pub clean_on_failure: bool,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Path to the wheel
    #[arg(value_name = "WHEEL")]
    pub wheel: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct NormalizeArgs {
    /// The site-packages directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Treat implicit namespace packages as valid, which makes this a no-op
    #[arg(long)]
    pub enable_implicit_namespace_pkgs: bool,
}

async fn install(runtime: RealRuntime, args: InstallArgs) -> Result<MetadataSummary> {
    let version = resolve_runtime_version(
        &runtime,
        args.python_version.as_deref(),
        args.python.as_deref(),
    )?;
    let request = InstallRequest::new(args.wheel, args.installation_dir, version)
        .enable_implicit_namespace_pkgs(args.enable_implicit_namespace_pkgs)
        .overwrite(args.overwrite)
        .jobs(args.jobs);

    let ctx: Option<SharedCleanupContext> = args.clean_on_failure.then(cleanup::new_shared);
    let installer = Installer::new(runtime);

    let result = match (args.timeout, &ctx) {
        (Some(secs), _) => {
            installer
                .install_with_timeout(request, Duration::from_secs(secs), ctx.clone())
                .await
        }
        (None, Some(ctx)) => installer.install_with_cleanup(&request, ctx),
        (None, None) => installer.install(&request),
    };

    if result.is_err() {
        if let Some(ctx) = &ctx {
            let removed = cleanup::lock(ctx).cleanup();
            warn!("Removed {} path(s) left by the failed installation", removed);
        }
    }
    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    match cli.command {
        Commands::Install(args) => {
            let summary = install(runtime, args).await?;
            print!("{}", summary.to_json()?);
        }
        Commands::Inspect(args) => {
            let report = whlinst::inspect::inspect(&args.wheel)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Normalize(args) => {
            let created =
                namespace::normalize(&runtime, &args.dir, args.enable_implicit_namespace_pkgs)?;
            for path in created {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from([
            "whlinst",
            "install",
            "demo-1.0-py3-none-any.whl",
            "--installation-dir",
            "out",
            "--python-version",
            "3.11.11",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.wheel, PathBuf::from("demo-1.0-py3-none-any.whl"));
                assert_eq!(args.installation_dir, PathBuf::from("out"));
                assert_eq!(args.python_version.as_deref(), Some("3.11.11"));
                assert!(!args.enable_implicit_namespace_pkgs);
                assert!(!args.overwrite);
                assert!(!args.clean_on_failure);
                assert_eq!(args.timeout, None);
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_install_flags() {
        let cli = Cli::try_parse_from([
            "whlinst",
            "install",
            "demo.whl",
            "--installation-dir",
            "out",
            "--python",
            "python3",
            "--enable-implicit-namespace-pkgs",
            "--overwrite",
            "-j",
            "4",
            "--timeout",
            "30",
            "--clean-on-failure",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.python.as_deref(), Some("python3"));
                assert!(args.enable_implicit_namespace_pkgs);
                assert!(args.overwrite);
                assert_eq!(args.jobs, 4);
                assert_eq!(args.timeout, Some(30));
                assert!(args.clean_on_failure);
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_install_requires_installation_dir() {
        let result = Cli::try_parse_from(["whlinst", "install", "demo.whl"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_inspect_parsing() {
        let cli = Cli::try_parse_from(["whlinst", "inspect", "demo.whl"]).unwrap();
        match cli.command {
            Commands::Inspect(args) => assert_eq!(args.wheel, PathBuf::from("demo.whl")),
            _ => panic!("Expected Inspect command"),
        }
    }

    #[test]
    fn test_cli_normalize_parsing() {
        let cli = Cli::try_parse_from(["whlinst", "normalize", "site-packages"]).unwrap();
        match cli.command {
            Commands::Normalize(args) => {
                assert_eq!(args.dir, PathBuf::from("site-packages"));
                assert!(!args.enable_implicit_namespace_pkgs);
            }
            _ => panic!("Expected Normalize command"),
        }
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["whlinst", "demo.whl"]);
        assert!(result.is_err());
    }
}
