//! Installation of a wheel into a self-contained directory.
//!
//! The pipeline is sequential:
//!
//! 1. open the archive and sanitize every entry (nothing is written yet)
//! 2. prepare the installation root
//! 3. extract entries into `site-packages`
//! 4. retain a copy of the archive
//! 5. normalize namespace packages
//! 6. write `metadata.json`, always last
//!
//! Failures after step 2 surface as [`InstallError::PartialFailure`] and are
//! not rolled back. Callers that want a rollback pass a
//! [`SharedCleanupContext`] and clean up themselves.

use anyhow::{Context, anyhow};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::archive::PackageArchive;
use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::error::{InstallError, InstallStep, StepError};
use crate::metadata::{self, MetadataSummary};
use crate::namespace;
use crate::runtime::Runtime;

pub mod config;
mod extract;

pub use config::{InstallRequest, SITE_PACKAGES};
pub use extract::{DEFAULT_FILE_MODE, ExtractionPlan};

pub struct Installer<R: Runtime> {
    runtime: R,
    cancelled: Arc<AtomicBool>,
}

/// Registers created paths with an optional cleanup context.
struct Tracker<'a> {
    ctx: Option<&'a SharedCleanupContext>,
    guards: Vec<CleanupGuard>,
}

impl<'a> Tracker<'a> {
    fn new(ctx: Option<&'a SharedCleanupContext>) -> Self {
        Self {
            ctx,
            guards: Vec::new(),
        }
    }

    fn track(&mut self, path: PathBuf) {
        if let Some(ctx) = self.ctx {
            self.guards.push(CleanupGuard::new(Arc::clone(ctx), path));
        }
    }

    fn commit(self) {
        for guard in self.guards {
            guard.success();
        }
    }
}

impl<R: Runtime> Installer<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Install `request.archive` and return the summary that was written.
    pub fn install(&self, request: &InstallRequest) -> Result<MetadataSummary, InstallError> {
        self.run(request, None)
    }

    /// Like [`Installer::install`], registering every path it creates with
    /// `ctx`. Registrations are dropped again when the installation succeeds.
    pub fn install_with_cleanup(
        &self,
        request: &InstallRequest,
        ctx: &SharedCleanupContext,
    ) -> Result<MetadataSummary, InstallError> {
        self.run(request, Some(ctx))
    }

    fn check_cancelled(&self, step: InstallStep) -> Result<(), InstallError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(InstallError::partial(step, anyhow!("installation cancelled")));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, cleanup), fields(archive = ?request.archive, root = ?request.installation_dir))]
    fn run(
        &self,
        request: &InstallRequest,
        cleanup: Option<&SharedCleanupContext>,
    ) -> Result<MetadataSummary, InstallError> {
        let root = &request.installation_dir;
        let site_packages = request.site_packages();
        let mut tracker = Tracker::new(cleanup);

        // Step 1
        request.archive_file_name()?;
        let archive = PackageArchive::open(&request.archive)?;
        let plan = ExtractionPlan::build(&archive, &site_packages)?;
        debug!(
            "Planned {} files and {} directories",
            plan.files.len(),
            plan.dirs.len()
        );

        // Step 2
        self.prepare_target(request, &mut tracker)?;

        // Step 3
        self.check_cancelled(InstallStep::Extract)?;
        tracker.track(site_packages.clone());
        extract::extract(
            &self.runtime,
            &archive,
            &plan,
            &site_packages,
            request.jobs,
            &self.cancelled,
        )
        .map_err(|e| InstallError::partial(InstallStep::Extract, e))?;

        // Step 4
        self.check_cancelled(InstallStep::Provenance)?;
        self.retain_archive(request, &mut tracker)
            .map_err(|e| InstallError::partial(InstallStep::Provenance, e))?;

        // Step 5
        self.check_cancelled(InstallStep::Normalize)?;
        namespace::normalize(
            &self.runtime,
            &site_packages,
            request.enable_implicit_namespace_pkgs,
        )
        .map_err(|e| InstallError::partial(InstallStep::Normalize, e))?;

        // Step 6
        self.check_cancelled(InstallStep::Metadata)?;
        let summary = metadata::extract(&archive, &request.runtime_version)
            .map_err(|e| InstallError::partial(InstallStep::Metadata, e))?;
        self.write_summary(request, &summary, &mut tracker)
            .map_err(|e| InstallError::partial(InstallStep::Metadata, e))?;

        tracker.commit();
        info!(
            "Installed {:?} into {:?} ({} console script(s))",
            archive.file_name(),
            root,
            summary.entry_points.len()
        );
        Ok(summary)
    }

    /// Canonical location of the source archive, for recognizing it inside
    /// the root.
    fn source_identity(&self, request: &InstallRequest) -> Option<PathBuf> {
        self.runtime.canonicalize(&request.archive).ok()
    }

    fn is_source_archive(&self, path: &Path, source: Option<&Path>) -> bool {
        match source {
            Some(source) => self
                .runtime
                .canonicalize(path)
                .map(|p| p == source)
                .unwrap_or(false),
            None => false,
        }
    }

    #[tracing::instrument(skip(self, request, tracker))]
    fn prepare_target(
        &self,
        request: &InstallRequest,
        tracker: &mut Tracker<'_>,
    ) -> Result<(), InstallError> {
        let root = &request.installation_dir;
        let target_error = |source: anyhow::Error| InstallError::Target {
            path: root.clone(),
            source: StepError::Filesystem(source),
        };

        if !self.runtime.exists(root) {
            debug!("Creating installation root {:?}", root);
            self.runtime.create_dir_all(root).map_err(target_error)?;
            tracker.track(root.clone());
            return Ok(());
        }
        if !self.runtime.is_dir(root) {
            return Err(target_error(anyhow!("{:?} is not a directory", root)));
        }

        let source = self.source_identity(request);
        let existing: Vec<PathBuf> = self
            .runtime
            .read_dir(root)
            .map_err(target_error)?
            .into_iter()
            .filter(|p| !self.is_source_archive(p, source.as_deref()))
            .collect();

        if existing.is_empty() {
            return Ok(());
        }
        if !request.overwrite {
            return Err(InstallError::TargetExists { path: root.clone() });
        }

        info!(
            "Overwriting {} existing entries in {:?}",
            existing.len(),
            root
        );
        // The summary goes first so a half-cleared root never looks complete.
        let summary_path = request.summary_path();
        if existing.contains(&summary_path) {
            self.runtime
                .remove_file(&summary_path)
                .map_err(target_error)?;
        }
        for path in existing.iter().filter(|p| **p != summary_path) {
            let removed = if self.runtime.is_dir(path) {
                self.runtime.remove_dir_all(path)
            } else {
                self.runtime.remove_file(path)
            };
            removed.map_err(target_error)?;
        }
        Ok(())
    }

    fn retain_archive(
        &self,
        request: &InstallRequest,
        tracker: &mut Tracker<'_>,
    ) -> anyhow::Result<()> {
        let destination = request.retained_archive_path()?;
        let source = self.source_identity(request);
        if self.is_source_archive(&destination, source.as_deref()) {
            debug!("Archive already lives in {:?}", request.installation_dir);
            return Ok(());
        }

        tracker.track(destination.clone());
        let bytes = self
            .runtime
            .copy(&request.archive, &destination)
            .with_context(|| format!("Failed to retain {:?}", request.archive))?;
        debug!("Retained archive as {:?} ({} bytes)", destination, bytes);
        Ok(())
    }

    fn write_summary(
        &self,
        request: &InstallRequest,
        summary: &MetadataSummary,
        tracker: &mut Tracker<'_>,
    ) -> anyhow::Result<()> {
        let json = summary
            .to_json()
            .context("Failed to serialize the metadata summary")?;
        let temp = request.summary_temp_path();
        let path = request.summary_path();

        tracker.track(temp.clone());
        self.runtime.write(&temp, json.as_bytes())?;
        self.runtime.rename(&temp, &path)?;
        tracker.track(path.clone());
        debug!("Wrote {:?}", path);
        Ok(())
    }
}

impl<R: Runtime + 'static> Installer<R> {
    /// Run the installation on a blocking task and give up after `after`.
    ///
    /// On expiry the running installation is asked to stop at its next
    /// checkpoint and this waits for it before returning
    /// [`InstallError::Timeout`]. The root may hold a partial tree. A task
    /// that ends without a result for any other reason is
    /// [`InstallError::Aborted`].
    pub async fn install_with_timeout(
        self,
        request: InstallRequest,
        after: Duration,
        cleanup: Option<SharedCleanupContext>,
    ) -> Result<MetadataSummary, InstallError> {
        let cancelled = Arc::clone(&self.cancelled);
        let mut handle = tokio::task::spawn_blocking(move || match &cleanup {
            Some(ctx) => self.install_with_cleanup(&request, ctx),
            None => self.install(&request),
        });

        match tokio::time::timeout(after, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(join_failure(join_error)),
            Err(_) => {
                info!("Installation exceeded {:?}, stopping", after);
                cancelled.store(true, Ordering::Relaxed);
                let _ = handle.await;
                Err(InstallError::Timeout { after })
            }
        }
    }
}

/// A blocking task that ended without a result. Panics propagate.
fn join_failure(join_error: tokio::task::JoinError) -> InstallError {
    if join_error.is_panic() {
        std::panic::resume_unwind(join_error.into_panic());
    }
    InstallError::Aborted { source: join_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::*;
    use crate::cleanup::{self, new_shared};
    use crate::error::{ArchiveError, MetadataError, PathError};
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::tempdir;

    fn top_level(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test_log::test]
    fn test_install_minimal_wheel() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());
        let root = dir.path().join("out");

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        let summary = Installer::new(RealRuntime).install(&request).unwrap();

        assert!(summary.entry_points.is_empty());
        assert_eq!(summary.runtime_version, "3.11.11");
        assert_eq!(
            top_level(&root),
            [MINIMAL_WHEEL, "metadata.json", "site-packages"]
        );
        assert!(
            root.join("site-packages/example_minimal_package/__init__.py")
                .is_file()
        );

        let written: MetadataSummary =
            serde_json::from_str(&fs::read_to_string(root.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(written, summary);
    }

    #[test]
    fn test_install_into_directory_holding_the_archive() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("out");
        fs::create_dir_all(&root).unwrap();
        let wheel = minimal_wheel(&root);

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        Installer::new(RealRuntime).install(&request).unwrap();

        assert_eq!(
            top_level(&root),
            [MINIMAL_WHEEL, "metadata.json", "site-packages"]
        );
    }

    #[test]
    fn test_install_refuses_non_empty_target() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());
        let root = dir.path().join("out");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("stale.txt"), "old").unwrap();

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        let err = Installer::new(RealRuntime).install(&request).unwrap_err();
        assert!(matches!(err, InstallError::TargetExists { .. }));
        assert_eq!(top_level(&root), ["stale.txt"]);
    }

    #[test]
    fn test_install_overwrite_replaces_previous_tree() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());
        let root = dir.path().join("out");
        fs::create_dir_all(root.join("site-packages/old_pkg")).unwrap();
        fs::write(root.join("site-packages/old_pkg/__init__.py"), "").unwrap();
        fs::write(root.join("metadata.json"), "{}").unwrap();

        let request = InstallRequest::new(&wheel, &root, "3.12.0").overwrite(true);
        let summary = Installer::new(RealRuntime).install(&request).unwrap();

        assert_eq!(summary.runtime_version, "3.12.0");
        assert!(!root.join("site-packages/old_pkg").exists());
        assert_eq!(
            top_level(&root),
            [MINIMAL_WHEEL, "metadata.json", "site-packages"]
        );
    }

    #[test]
    fn test_install_rejects_escaping_entry_before_writing() {
        let dir = tempdir().unwrap();
        let wheel = dir.path().join("evil-1.0-py3-none-any.whl");
        write_wheel(
            &wheel,
            &[
                ("evil-1.0.dist-info/WHEEL", WHEEL_V1),
                ("evil-1.0.dist-info/METADATA", "Name: evil\nVersion: 1.0\n"),
                ("../../etc/passwd", "root:x:0:0"),
            ],
        );
        let root = dir.path().join("out");

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        let err = Installer::new(RealRuntime).install(&request).unwrap_err();

        assert!(matches!(err, InstallError::Path(PathError::Escape { .. })));
        assert!(!root.exists());
    }

    #[test]
    fn test_install_unreadable_archive_touches_nothing() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("out");
        let request = InstallRequest::new(dir.path().join("missing.whl"), &root, "3.11.11");

        let err = Installer::new(RealRuntime).install(&request).unwrap_err();
        assert!(matches!(
            err,
            InstallError::Archive(ArchiveError::Unreadable { .. })
        ));
        assert!(!root.exists());
    }

    #[test_log::test]
    fn test_install_missing_metadata_is_partial_failure() {
        let dir = tempdir().unwrap();
        let wheel = dir.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(
            &wheel,
            &[("demo/__init__.py", ""), ("demo-1.0.dist-info/WHEEL", WHEEL_V1)],
        );
        let root = dir.path().join("out");

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        let err = Installer::new(RealRuntime).install(&request).unwrap_err();

        match err {
            InstallError::PartialFailure {
                step: InstallStep::Metadata,
                source: StepError::Metadata(MetadataError::Missing { .. }),
            } => {}
            other => panic!("expected metadata failure, got {:?}", other),
        }
        assert!(!root.join("metadata.json").exists());
        assert!(root.join("site-packages/demo/__init__.py").exists());
    }

    #[test_log::test]
    fn test_install_namespace_flag() {
        let dir = tempdir().unwrap();
        let wheel = dir.path().join("ns_demo-1.0-py3-none-any.whl");
        write_wheel(
            &wheel,
            &[
                ("ns_demo-1.0.dist-info/WHEEL", WHEEL_V1),
                ("ns_demo-1.0.dist-info/METADATA", "Name: ns-demo\nVersion: 1.0\n"),
                ("nspkg/sub/mod.py", "x = 1\n"),
            ],
        );

        let implicit = dir.path().join("implicit");
        Installer::new(RealRuntime)
            .install(
                &InstallRequest::new(&wheel, &implicit, "3.11.11")
                    .enable_implicit_namespace_pkgs(true),
            )
            .unwrap();
        assert!(!implicit.join("site-packages/nspkg/__init__.py").exists());
        assert!(!implicit.join("site-packages/nspkg/sub/__init__.py").exists());

        let explicit = dir.path().join("explicit");
        Installer::new(RealRuntime)
            .install(&InstallRequest::new(&wheel, &explicit, "3.11.11"))
            .unwrap();
        assert_eq!(
            fs::read(explicit.join("site-packages/nspkg/__init__.py")).unwrap(),
            b""
        );
        assert!(explicit.join("site-packages/nspkg/sub/__init__.py").exists());
    }

    #[test]
    fn test_install_with_cleanup_commits_on_success() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());
        let root = dir.path().join("out");
        let ctx = new_shared();

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        Installer::new(RealRuntime)
            .install_with_cleanup(&request, &ctx)
            .unwrap();
        assert!(cleanup::lock(&ctx).is_empty());
    }

    #[test]
    fn test_install_with_cleanup_keeps_created_paths_on_failure() {
        let dir = tempdir().unwrap();
        let wheel = dir.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(
            &wheel,
            &[("demo/__init__.py", ""), ("demo-1.0.dist-info/WHEEL", WHEEL_V1)],
        );
        let root = dir.path().join("out");
        let ctx = new_shared();

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        assert!(
            Installer::new(RealRuntime)
                .install_with_cleanup(&request, &ctx)
                .is_err()
        );

        let mut guard = cleanup::lock(&ctx);
        assert_eq!(guard.paths()[0], root);
        guard.cleanup();
        assert!(!root.exists());
    }

    #[test]
    fn test_prepare_target_failure_is_not_partial() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());

        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        runtime
            .expect_create_dir_all()
            .returning(|p| Err(anyhow!("Failed to create directory {:?}", p)));

        let request = InstallRequest::new(&wheel, "/readonly/out", "3.11.11");
        let err = Installer::new(runtime).install(&request).unwrap_err();
        assert!(matches!(err, InstallError::Target { .. }));
        assert!(!err.left_partial_tree());
    }

    #[tokio::test]
    async fn test_install_with_timeout_completes() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());
        let root = dir.path().join("out");

        let summary = Installer::new(RealRuntime)
            .install_with_timeout(
                InstallRequest::new(&wheel, &root, "3.11.11"),
                Duration::from_secs(60),
                None,
            )
            .await
            .unwrap();
        assert_eq!(summary.runtime_version, "3.11.11");
    }

    #[tokio::test]
    async fn test_install_with_timeout_expires() {
        let dir = tempdir().unwrap();
        let wheel = minimal_wheel(dir.path());

        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| {
            std::thread::sleep(Duration::from_millis(300));
            false
        });
        runtime.expect_create_dir_all().returning(|_| Ok(()));

        let err = Installer::new(runtime)
            .install_with_timeout(
                InstallRequest::new(&wheel, "/slow/out", "3.11.11"),
                Duration::from_millis(10),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Timeout { .. }));
    }

    #[test]
    fn test_install_rejects_archive_named_like_layout_entry() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("metadata.json");
        write_members(&archive, &minimal_members());
        let root = dir.path().join("out");

        let request = InstallRequest::new(&archive, &root, "3.11.11");
        let err = Installer::new(RealRuntime).install(&request).unwrap_err();
        assert!(matches!(
            err,
            InstallError::Archive(ArchiveError::Unsupported { .. })
        ));
        assert!(!root.exists());
    }

    #[test]
    fn test_install_rejects_file_shadowing_package_before_writing() {
        let dir = tempdir().unwrap();
        let wheel = dir.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(
            &wheel,
            &[
                ("demo-1.0.dist-info/WHEEL", WHEEL_V1),
                ("demo-1.0.dist-info/METADATA", "Name: demo\nVersion: 1.0\n"),
                ("pkg", "x"),
                ("pkg/mod.py", ""),
            ],
        );
        let root = dir.path().join("out");

        let request = InstallRequest::new(&wheel, &root, "3.11.11");
        let err = Installer::new(RealRuntime).install(&request).unwrap_err();
        assert!(matches!(
            err,
            InstallError::Archive(ArchiveError::Corrupt { .. })
        ));
        assert!(!err.left_partial_tree());
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_cancelled_task_is_aborted_not_timeout() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let join_error = handle.await.unwrap_err();

        let err = join_failure(join_error);
        assert!(matches!(err, InstallError::Aborted { .. }));
        assert!(err.left_partial_tree());
        assert_eq!(err.failed_step(), None);
    }
}
