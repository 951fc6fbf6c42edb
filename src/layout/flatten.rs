// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Convert stow layout into flat layout.
//!
//! Every non-hidden directory at the top of the stow tree is a package. The
//! configuration payload of package `P` is found by looking for the deepest
//! directory inside it that is also named `P`. This covers the common
//! `P/.config/P` shape as well as odd ones like `P/Library/Application
//! Support/P`. Packages without such a directory are taken as-is.

use crate::{
    files::{self, copy_tree, SymlinkMode},
    layout::{package_dirs, package_name, LayoutReport, PackageOutcome, PackageStatus},
};

use ignore::WalkBuilder;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};

/// Flattening behaviour switches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlattenOptions {
    /// Replace destination packages that already exist.
    pub force: bool,

    /// Only report what would be done.
    pub dry_run: bool,
}

/// Stow layout to flat layout converter.
#[derive(Debug, Clone)]
pub struct Flattener {
    source: PathBuf,
    destination: PathBuf,
    options: FlattenOptions,
}

impl Flattener {
    /// Construct new flattener.
    ///
    /// # Errors
    ///
    /// - Return [`FlattenError::SourceMissing`] if source is not a directory.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        options: FlattenOptions,
    ) -> Result<Self> {
        let source = source.into();
        if !source.is_dir() {
            return Err(FlattenError::SourceMissing { path: source });
        }

        Ok(Self {
            source,
            destination: destination.into(),
            options,
        })
    }

    /// Flatten every package in source into destination.
    ///
    /// Failure to copy one package is recorded in the report, and does not
    /// stop the others from being processed.
    ///
    /// # Errors
    ///
    /// - Return [`FlattenError::CreateDestination`] if destination cannot be
    ///   created.
    /// - Return [`FlattenError::ReadSource`] if source cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<LayoutReport> {
        info!(
            "flatten stow layout {:?} into {:?}",
            self.source.display(),
            self.destination.display()
        );
        if self.options.dry_run {
            warn!("running in dry-run mode, nothing will be copied");
        } else {
            fs::create_dir_all(&self.destination).map_err(|err| {
                FlattenError::CreateDestination {
                    source: err,
                    path: self.destination.clone(),
                }
            })?;
        }

        let packages = package_dirs(&self.source, true).map_err(|err| FlattenError::ReadSource {
            source: err,
            path: self.source.clone(),
        })?;

        let mut report = LayoutReport::default();
        for package in packages {
            report.outcomes.push(self.flatten_package(&package));
        }

        Ok(report)
    }

    fn flatten_package(&self, package: &Path) -> PackageOutcome {
        let name = package_name(package);
        let destination = self.destination.join(&name);
        info!("processing {name:?}");

        let outcome = |status| PackageOutcome {
            name: name.clone(),
            destination: destination.clone(),
            status,
        };

        // INVARIANT: Never merge into an existing package unless forced to.
        if files::path_occupied(&destination) {
            if !self.options.force {
                error!(
                    "destination {:?} already exists, use --force to overwrite",
                    destination.display()
                );
                return outcome(PackageStatus::Conflict);
            }

            warn!(
                "destination {:?} exists and will be overwritten",
                destination.display()
            );
            if !self.options.dry_run {
                if let Err(err) = files::remove_path(&destination) {
                    error!("cannot remove {:?}: {err}", destination.display());
                    return outcome(PackageStatus::Failed(err.to_string()));
                }
            }
        }

        let payload = payload_root(package);
        let shown = self
            .source
            .parent()
            .and_then(|parent| payload.strip_prefix(parent).ok())
            .unwrap_or(&payload);
        info!("found configuration content in {:?}", shown.display());
        info!("copying contents to {:?}", destination.display());

        if self.options.dry_run {
            return outcome(PackageStatus::Planned);
        }

        match copy_tree(&payload, &destination, SymlinkMode::Preserve) {
            Ok(files) => outcome(PackageStatus::Copied { files }),
            Err(err) => {
                error!("cannot copy {name:?}: {err}");
                outcome(PackageStatus::Failed(err.to_string()))
            }
        }
    }
}

/// Locate configuration payload inside stow package.
///
/// Picks the deepest directory below `package` that shares its name, where
/// deepest means longest path. Ties go to the first path in sorted order.
/// Falls back to `package` itself if nothing matches.
pub fn payload_root(package: impl AsRef<Path>) -> PathBuf {
    let package = package.as_ref();
    let name = package.file_name();

    let walker = WalkBuilder::new(package)
        .standard_filters(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let mut best: Option<PathBuf> = None;
    for entry in walker.flatten() {
        if entry.depth() == 0 || !entry.file_type().is_some_and(|kind| kind.is_dir()) {
            continue;
        }

        if entry.path().file_name() != name {
            continue;
        }

        let longer = best
            .as_ref()
            .is_none_or(|best| entry.path().as_os_str().len() > best.as_os_str().len());
        if longer {
            best = Some(entry.into_path());
        }
    }

    best.unwrap_or_else(|| package.to_path_buf())
}

/// Flattening error types.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    /// Source stow tree is not a directory.
    #[error("source directory {:?} does not exist", path.display())]
    SourceMissing { path: PathBuf },

    /// Source stow tree cannot be listed.
    #[error("failed to read source directory {:?}", path.display())]
    ReadSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Destination directory cannot be created.
    #[error("failed to create destination directory {:?}", path.display())]
    CreateDestination {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FlattenError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn payload_root_prefers_deepest_match() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let package = root.path().join("fastfetch");
        fs::create_dir_all(package.join(".config").join("fastfetch").join("fastfetch"))?;

        assert_eq!(
            payload_root(&package),
            package.join(".config").join("fastfetch").join("fastfetch")
        );

        Ok(())
    }

    #[test]
    fn payload_root_ignores_files_with_package_name() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let package = root.path().join("git");
        fs::create_dir_all(package.join(".config").join("misc"))?;
        fs::write(package.join(".config").join("misc").join("git"), "")?;

        assert_eq!(payload_root(&package), package);

        Ok(())
    }

    #[test]
    fn flatten_skips_conflicts_without_force() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let destination = TempDir::new()?;
        fs::create_dir_all(source.path().join("kitty").join(".config").join("kitty"))?;
        fs::write(
            source.path().join("kitty/.config/kitty/kitty.conf"),
            "font_size 12",
        )?;
        fs::create_dir_all(destination.path().join("kitty"))?;

        let report = Flattener::new(source.path(), destination.path(), FlattenOptions::default())?
            .run()?;

        assert_eq!(report.get("kitty").unwrap().status, PackageStatus::Conflict);
        assert!(!destination.path().join("kitty/kitty.conf").exists());

        Ok(())
    }

    #[test]
    fn flatten_force_replaces_existing_package() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let destination = TempDir::new()?;
        fs::create_dir_all(source.path().join("kitty/.config/kitty"))?;
        fs::write(source.path().join("kitty/.config/kitty/kitty.conf"), "new")?;
        fs::create_dir_all(destination.path().join("kitty"))?;
        fs::write(destination.path().join("kitty/stale.conf"), "old")?;

        let options = FlattenOptions {
            force: true,
            dry_run: false,
        };
        let report = Flattener::new(source.path(), destination.path(), options)?.run()?;

        assert_eq!(
            report.get("kitty").unwrap().status,
            PackageStatus::Copied { files: 1 }
        );
        assert_eq!(
            fs::read_to_string(destination.path().join("kitty/kitty.conf"))?,
            "new"
        );
        assert!(!destination.path().join("kitty/stale.conf").exists());

        Ok(())
    }

    #[test]
    fn flatten_dry_run_leaves_disk_untouched() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let root = TempDir::new()?;
        let destination = root.path().join("flat");
        fs::create_dir_all(source.path().join("nvim/.config/nvim"))?;
        fs::write(source.path().join("nvim/.config/nvim/init.lua"), "")?;
        fs::create_dir_all(source.path().join("kitty/.config/kitty"))?;
        fs::create_dir_all(destination.join("kitty"))?;
        fs::write(destination.join("kitty/kept.conf"), "kept")?;

        let options = FlattenOptions {
            force: true,
            dry_run: true,
        };
        let report = Flattener::new(source.path(), &destination, options)?.run()?;

        assert_eq!(report.get("nvim").unwrap().status, PackageStatus::Planned);
        assert_eq!(report.get("kitty").unwrap().status, PackageStatus::Planned);
        assert!(!destination.join("nvim").exists());
        assert_eq!(fs::read_to_string(destination.join("kitty/kept.conf"))?, "kept");

        Ok(())
    }

    #[test]
    fn flatten_missing_source_is_error() {
        let result = Flattener::new("/definitely/not/here", "/tmp", FlattenOptions::default());
        assert!(matches!(result, Err(FlattenError::SourceMissing { .. })));
    }
}
