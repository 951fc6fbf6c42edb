// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile layout conversion.
//!
//! Dotfiles tend to live in one of two layouts. The __stow layout__ groups
//! each program's configuration into a __stow package__ that mirrors where
//! the files eventually land in the user's home directory:
//!
//! ```text
//! Dotfiles/
//! └── fastfetch/
//!     └── .config/
//!         └── fastfetch/
//!             └── config.jsonc
//! ```
//!
//! The __flat layout__ drops the mirroring and keeps one directory per
//! program holding only the configuration payload. Configuration management
//! tools like Ansible prefer this one:
//!
//! ```text
//! roles/files/
//! └── fastfetch/
//!     └── config.jsonc
//! ```
//!
//! The [`flatten`] module converts stow layout into flat layout, and the
//! [`stow`] module builds stow packages out of a flat config directory like
//! `~/.config`.
//!
//! # See Also
//!
//! 1. [GNU Stow](https://www.gnu.org/software/stow/manual/stow.html)

pub mod flatten;
pub mod stow;

use inquire::{Confirm, InquireError};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};

/// What happened to a single package during layout conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageStatus {
    /// Package content was copied.
    Copied {
        /// Number of non-directory entries copied.
        files: usize,
    },

    /// Dry-run only: package would have been copied.
    Planned,

    /// Destination already exists, and was left alone.
    Conflict,

    /// User refused to overwrite existing destination.
    Declined,

    /// Package name is listed in the exclusion set.
    Excluded,

    /// Copying failed part way.
    Failed(String),
}

impl Display for PackageStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Copied { files } => write!(fmt, "copied ({files} files)"),
            Self::Planned => fmt.write_str("planned"),
            Self::Conflict => fmt.write_str("conflict"),
            Self::Declined => fmt.write_str("declined"),
            Self::Excluded => fmt.write_str("excluded"),
            Self::Failed(reason) => write!(fmt, "failed: {reason}"),
        }
    }
}

/// Outcome of layout conversion for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutcome {
    /// Name of package.
    pub name: String,

    /// Where package content went, or would have gone.
    pub destination: PathBuf,

    /// What happened.
    pub status: PackageStatus,
}

/// Outcomes for every package visited by a layout conversion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LayoutReport {
    pub outcomes: Vec<PackageOutcome>,
}

impl LayoutReport {
    /// Lookup outcome of package by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&PackageOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name.as_ref())
    }

    /// Check if any package failed to copy.
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| matches!(outcome.status, PackageStatus::Failed(_)))
    }
}

/// Decide what to do about a destination that already exists.
pub trait ConflictPrompt {
    /// Ask whether `target` should be removed and replaced.
    ///
    /// # Errors
    ///
    /// - Return [`InquireError`] if the question cannot be answered, e.g., the
    ///   user interrupted the prompt.
    fn confirm_overwrite(&mut self, target: &Path) -> Result<bool, InquireError>;
}

/// Ask the user on the terminal.
#[derive(Debug, Default, Clone)]
pub struct InquirePrompt;

impl ConflictPrompt for InquirePrompt {
    fn confirm_overwrite(&mut self, target: &Path) -> Result<bool, InquireError> {
        Confirm::new(&format!(
            "{:?} already exists. Do you want to overwrite it?",
            target.display()
        ))
        .with_default(false)
        .prompt()
    }
}

/// Answer every conflict the same way without asking.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl ConflictPrompt for FixedAnswer {
    fn confirm_overwrite(&mut self, _target: &Path) -> Result<bool, InquireError> {
        Ok(self.0)
    }
}

/// List package directories inside a layout root, sorted by name.
///
/// Only direct subdirectories count. Hidden entries are skipped when
/// `skip_hidden` is set.
pub(crate) fn package_dirs(root: &Path, skip_hidden: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if skip_hidden && entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        packages.push(path);
    }
    packages.sort();

    Ok(packages)
}

pub(crate) fn package_name(package: &Path) -> String {
    package
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
