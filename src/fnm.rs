// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stale FNM multishell link cleanup.
//!
//! Fast Node Manager creates one symlink per shell session under its
//! multishells directory, and never removes them. A link is stale when its
//! target is gone, or when the link itself and its target have both been idle
//! for longer than a threshold. Meant to run periodically from cron or a
//! systemd timer.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{debug, error, info, instrument};

/// Default idle time after which a link is considered stale.
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of sweeping the multishells directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Links that were removed, or would be in dry-run mode.
    pub removed: Vec<PathBuf>,

    /// Links that are still considered fresh.
    pub kept: Vec<PathBuf>,

    /// Links that could not be inspected or removed.
    pub failed: Vec<PathBuf>,
}

/// Multishell link sweeper.
#[derive(Debug, Clone)]
pub struct StaleLinkSweeper {
    directory: PathBuf,
    threshold: Duration,
    now: SystemTime,
    dry_run: bool,
}

impl StaleLinkSweeper {
    /// Construct new sweeper over target directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            threshold: DEFAULT_THRESHOLD,
            now: SystemTime::now(),
            dry_run: false,
        }
    }

    /// Set idle time after which a link is considered stale.
    pub fn threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set point in time that idle time is measured from.
    pub fn now(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }

    /// Only report what would be removed.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Remove stale links.
    ///
    /// A missing directory means there is nothing to clean up. Failures on
    /// individual links are logged and recorded, and do not stop the sweep.
    ///
    /// # Errors
    ///
    /// - Return [`FnmError::ReadDir`] if directory exists but cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if !self.directory.is_dir() {
            debug!("no multishells directory at {:?}", self.directory.display());
            return Ok(report);
        }

        let read_err = |err| FnmError::ReadDir {
            source: err,
            path: self.directory.clone(),
        };

        let mut links = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if entry.file_type().is_ok_and(|kind| kind.is_symlink()) {
                links.push(entry.path());
            }
        }
        links.sort();

        for link in links {
            match self.is_stale(&link) {
                Ok(false) => report.kept.push(link),
                Ok(true) => match self.remove(&link) {
                    Ok(()) => report.removed.push(link),
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => {
                        error!("error removing {:?}: {err}", link.display());
                        report.failed.push(link);
                    }
                },
                // INVARIANT: Link vanished mid-sweep, e.g., shell exited.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    error!("error processing {:?}: {err}", link.display());
                    report.failed.push(link);
                }
            }
        }
        info!(
            "removed {} stale links, kept {}",
            report.removed.len(),
            report.kept.len()
        );

        Ok(report)
    }

    fn is_stale(&self, link: &Path) -> std::io::Result<bool> {
        let link_meta = fs::symlink_metadata(link)?;
        let target_meta = match fs::metadata(link) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{:?} is dangling", link.display());
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        let link_age = self.age(link_meta.modified()?);
        let target_idle = self.age(target_meta.accessed()?);

        Ok(link_age > self.threshold && target_idle > self.threshold)
    }

    fn age(&self, then: SystemTime) -> Duration {
        self.now.duration_since(then).unwrap_or(Duration::ZERO)
    }

    fn remove(&self, link: &Path) -> std::io::Result<()> {
        if self.dry_run {
            info!("would remove stale link {:?}", link.display());
            return Ok(());
        }

        debug!("removing stale link {:?}", link.display());
        fs::remove_file(link)
    }
}

/// FNM cleanup error types.
#[derive(Debug, thiserror::Error)]
pub enum FnmError {
    /// Multishells directory cannot be listed.
    #[error("failed to read multishells directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FnmError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn multishells() -> anyhow::Result<(TempDir, PathBuf)> {
        let dir = TempDir::new()?;
        let node = dir.path().join("node-v22");
        fs::create_dir_all(&node)?;
        let shells = dir.path().join("fnm_multishells");
        fs::create_dir_all(&shells)?;
        symlink(&node, shells.join("1234_1700000000000"))?;
        symlink(dir.path().join("gone"), shells.join("5678_1700000000000"))?;
        fs::write(shells.join("not-a-link"), "")?;
        Ok((dir, shells))
    }

    #[test]
    fn sweep_removes_only_dangling_links_when_fresh() -> anyhow::Result<()> {
        let (_dir, shells) = multishells()?;

        let report = StaleLinkSweeper::new(&shells).sweep()?;

        assert_eq!(report.removed, vec![shells.join("5678_1700000000000")]);
        assert_eq!(report.kept, vec![shells.join("1234_1700000000000")]);
        assert!(shells.join("not-a-link").exists());

        Ok(())
    }

    #[test]
    fn sweep_removes_idle_links() -> anyhow::Result<()> {
        let (_dir, shells) = multishells()?;

        let later = SystemTime::now() + Duration::from_secs(2 * 24 * 60 * 60);
        let report = StaleLinkSweeper::new(&shells).now(later).sweep()?;

        assert_eq!(report.removed.len(), 2);
        assert!(report.kept.is_empty());
        assert!(fs::symlink_metadata(shells.join("1234_1700000000000")).is_err());

        Ok(())
    }

    fn link_with_target_accessed_at(accessed: SystemTime) -> anyhow::Result<(TempDir, PathBuf)> {
        let dir = TempDir::new()?;
        let target = dir.path().join("node");
        fs::write(&target, "")?;
        fs::File::options()
            .write(true)
            .open(&target)?
            .set_times(fs::FileTimes::new().set_accessed(accessed))?;
        let shells = dir.path().join("fnm_multishells");
        fs::create_dir_all(&shells)?;
        symlink(&target, shells.join("1234_1700000000000"))?;
        Ok((dir, shells))
    }

    #[test]
    fn sweep_keeps_fresh_link_to_idle_target() -> anyhow::Result<()> {
        let two_days = Duration::from_secs(2 * 24 * 60 * 60);
        let (_dir, shells) = link_with_target_accessed_at(SystemTime::now() - two_days)?;

        let report = StaleLinkSweeper::new(&shells).sweep()?;

        assert_eq!(report.kept, vec![shells.join("1234_1700000000000")]);
        assert!(report.removed.is_empty());

        Ok(())
    }

    #[test]
    fn sweep_keeps_idle_link_to_recently_used_target() -> anyhow::Result<()> {
        let later = SystemTime::now() + Duration::from_secs(2 * 24 * 60 * 60);
        let (_dir, shells) = link_with_target_accessed_at(later)?;

        let report = StaleLinkSweeper::new(&shells).now(later).sweep()?;

        assert_eq!(report.kept, vec![shells.join("1234_1700000000000")]);
        assert!(report.removed.is_empty());

        Ok(())
    }

    #[test]
    fn sweep_dry_run_keeps_links() -> anyhow::Result<()> {
        let (_dir, shells) = multishells()?;

        let report = StaleLinkSweeper::new(&shells).dry_run(true).sweep()?;

        assert_eq!(report.removed.len(), 1);
        assert!(fs::symlink_metadata(shells.join("5678_1700000000000")).is_ok());

        Ok(())
    }

    #[test]
    fn sweep_missing_directory_is_noop() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let report = StaleLinkSweeper::new(dir.path().join("absent")).sweep()?;
        assert_eq!(report, SweepReport::default());

        Ok(())
    }
}
