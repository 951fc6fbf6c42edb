// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build stow packages out of a flat config directory.
//!
//! Each subdirectory `P` of the source becomes the stow package
//! `target/P/.config/P`, so that running `stow P` from the target directory
//! links it back into `~/.config/P`.

use crate::{
    files::{self, copy_tree, SymlinkMode},
    layout::{
        package_dirs, package_name, ConflictPrompt, LayoutReport, PackageOutcome, PackageStatus,
    },
};

use inquire::InquireError;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};

/// Stow package builder.
#[derive(Debug, Clone)]
pub struct StowBuilder {
    source: PathBuf,
    target: PathBuf,
    exclude: HashSet<String>,
    dry_run: bool,
}

impl StowBuilder {
    /// Construct new stow package builder.
    ///
    /// # Errors
    ///
    /// - Return [`StowError::SourceMissing`] if source is not a directory.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        if !source.is_dir() {
            return Err(StowError::SourceMissing { path: source });
        }

        Ok(Self {
            source,
            target: target.into(),
            exclude: HashSet::new(),
            dry_run: false,
        })
    }

    /// Skip source directories with these names.
    pub fn exclude(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    /// Only report what would be done.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Create stow package for every eligible source directory.
    ///
    /// Existing packages in the target are only replaced when `prompt`
    /// agrees to it. In dry-run mode the prompt is never consulted.
    ///
    /// # Errors
    ///
    /// - Return [`StowError::ReadSource`] if source cannot be listed.
    /// - Return [`StowError::Prompt`] if the user aborts a prompt.
    #[instrument(skip(self, prompt), level = "debug")]
    pub fn run(&self, prompt: &mut impl ConflictPrompt) -> Result<LayoutReport> {
        info!(
            "create stow packages from {:?} in {:?}",
            self.source.display(),
            self.target.display()
        );
        if self.dry_run {
            warn!("running in dry-run mode, nothing will be created");
        }

        let packages = package_dirs(&self.source, false).map_err(|err| StowError::ReadSource {
            source: err,
            path: self.source.clone(),
        })?;

        let mut report = LayoutReport::default();
        for package in packages {
            report.outcomes.push(self.stow_package(&package, prompt)?);
        }

        Ok(report)
    }

    fn stow_package(
        &self,
        package: &Path,
        prompt: &mut impl ConflictPrompt,
    ) -> Result<PackageOutcome> {
        let name = package_name(package);
        let package_root = self.target.join(&name);
        let destination = package_root.join(".config").join(&name);

        let outcome = |status| PackageOutcome {
            name: name.clone(),
            destination: destination.clone(),
            status,
        };

        if self.exclude.contains(&name) {
            warn!("skipped (excluded): {name}");
            return Ok(outcome(PackageStatus::Excluded));
        }
        info!("processing {name:?}");

        if files::path_occupied(&package_root) {
            warn!("target {:?} already exists", package_root.display());
            if self.dry_run {
                info!("dry-run: would ask for overwrite confirmation");
                return Ok(outcome(PackageStatus::Conflict));
            }

            if !prompt.confirm_overwrite(&package_root)? {
                info!("skipped by user");
                return Ok(outcome(PackageStatus::Declined));
            }

            info!("removing old version");
            if let Err(err) = files::remove_path(&package_root) {
                error!("cannot remove {:?}: {err}", package_root.display());
                return Ok(outcome(PackageStatus::Failed(err.to_string())));
            }
        }

        let shown = destination.strip_prefix(&self.target).unwrap_or(&destination);
        info!("creating structure in {:?}", shown.display());
        if self.dry_run {
            return Ok(outcome(PackageStatus::Planned));
        }

        let copied = fs::create_dir_all(&destination)
            .map_err(|err| err.to_string())
            .and_then(|_| {
                copy_tree(package, &destination, SymlinkMode::Follow).map_err(|err| err.to_string())
            });

        match copied {
            Ok(files) => {
                info!("created stow package {name:?}");
                Ok(outcome(PackageStatus::Copied { files }))
            }
            Err(reason) => {
                error!("cannot create {name:?}: {reason}");
                Ok(outcome(PackageStatus::Failed(reason)))
            }
        }
    }
}

/// Stow package creation error types.
#[derive(Debug, thiserror::Error)]
pub enum StowError {
    /// Source directory is not a directory.
    #[error("source directory {:?} does not exist", path.display())]
    SourceMissing { path: PathBuf },

    /// Source directory cannot be listed.
    #[error("failed to read source directory {:?}", path.display())]
    ReadSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Overwrite prompt was aborted.
    #[error("operation interrupted by user")]
    Prompt(#[from] InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = StowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedAnswer;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Interrupted;

    impl ConflictPrompt for Interrupted {
        fn confirm_overwrite(&mut self, _target: &Path) -> Result<bool, InquireError> {
            Err(InquireError::OperationInterrupted)
        }
    }

    fn config_tree() -> anyhow::Result<TempDir> {
        let source = TempDir::new()?;
        fs::create_dir_all(source.path().join("nvim").join("lua"))?;
        fs::write(source.path().join("nvim/init.lua"), "require('core')")?;
        fs::write(source.path().join("nvim/lua/core.lua"), "return {}")?;
        fs::create_dir_all(source.path().join("gh"))?;
        fs::write(source.path().join("gh/hosts.yml"), "secret")?;
        fs::write(source.path().join("stray.txt"), "not a package")?;
        Ok(source)
    }

    #[test]
    fn stow_creates_packages_and_skips_excluded() -> anyhow::Result<()> {
        let source = config_tree()?;
        let target = TempDir::new()?;

        let report = StowBuilder::new(source.path(), target.path())?
            .exclude(["gh"])
            .run(&mut FixedAnswer(false))?;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.get("gh").unwrap().status, PackageStatus::Excluded);
        assert_eq!(
            report.get("nvim").unwrap().status,
            PackageStatus::Copied { files: 2 }
        );
        assert_eq!(
            fs::read_to_string(target.path().join("nvim/.config/nvim/lua/core.lua"))?,
            "return {}"
        );
        assert!(!target.path().join("gh").exists());

        Ok(())
    }

    #[test]
    fn stow_respects_declined_overwrite() -> anyhow::Result<()> {
        let source = config_tree()?;
        let target = TempDir::new()?;
        fs::create_dir_all(target.path().join("nvim"))?;
        fs::write(target.path().join("nvim/old"), "old")?;

        let report = StowBuilder::new(source.path(), target.path())?
            .exclude(["gh"])
            .run(&mut FixedAnswer(false))?;

        assert_eq!(report.get("nvim").unwrap().status, PackageStatus::Declined);
        assert!(target.path().join("nvim/old").exists());

        Ok(())
    }

    #[test]
    fn stow_replaces_accepted_overwrite() -> anyhow::Result<()> {
        let source = config_tree()?;
        let target = TempDir::new()?;
        fs::create_dir_all(target.path().join("nvim"))?;
        fs::write(target.path().join("nvim/old"), "old")?;

        let report = StowBuilder::new(source.path(), target.path())?
            .exclude(["gh"])
            .run(&mut FixedAnswer(true))?;

        assert_eq!(
            report.get("nvim").unwrap().status,
            PackageStatus::Copied { files: 2 }
        );
        assert!(!target.path().join("nvim/old").exists());

        Ok(())
    }

    #[test]
    fn stow_dry_run_never_prompts() -> anyhow::Result<()> {
        let source = config_tree()?;
        let target = TempDir::new()?;
        fs::create_dir_all(target.path().join("nvim"))?;

        let report = StowBuilder::new(source.path(), target.path())?
            .dry_run(true)
            .run(&mut Interrupted)?;

        assert_eq!(report.get("nvim").unwrap().status, PackageStatus::Conflict);
        assert_eq!(report.get("gh").unwrap().status, PackageStatus::Planned);
        assert!(!target.path().join("gh").exists());

        Ok(())
    }

    #[test]
    fn stow_interrupted_prompt_aborts() -> anyhow::Result<()> {
        let source = config_tree()?;
        let target = TempDir::new()?;
        fs::create_dir_all(target.path().join("nvim"))?;

        let result = StowBuilder::new(source.path(), target.path())?.run(&mut Interrupted);
        assert!(matches!(result, Err(StowError::Prompt(_))));

        Ok(())
    }
}
