// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! SHA-256 manifest of Markdown files.
//!
//! The manifest is a plain text file with one `path<TAB>sha256hex` entry per
//! line. Tools that rewrite Markdown in place consult it to skip files whose
//! content has not changed since the manifest was last written.

use crate::{
    files::{self, FsError},
    progress,
};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Manifest file name used when none is given.
pub const DEFAULT_MANIFEST: &str = ".file_hashes";

/// Mapping of Markdown file paths to their SHA-256 digest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HashManifest {
    entries: BTreeMap<PathBuf, String>,
}

impl HashManifest {
    /// Load manifest from file.
    ///
    /// A missing file yields an empty manifest. Relative entries are resolved
    /// against the directory holding the manifest, so the result does not
    /// depend on the current directory.
    ///
    /// # Errors
    ///
    /// - Return [`HashError::Read`] if existing file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = base.canonicalize().unwrap_or(base);

        match fs::read_to_string(path) {
            Ok(data) => Ok(data.parse::<Self>()?.resolve_against(&base)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no manifest at {:?}, starting empty", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(HashError::Read {
                source: err,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Make every relative entry absolute by joining it onto `base`.
    pub fn resolve_against(self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let entries = self
            .entries
            .into_iter()
            .map(|(path, digest)| {
                if path.is_absolute() {
                    (path, digest)
                } else {
                    (base.join(path), digest)
                }
            })
            .collect();

        Self { entries }
    }

    /// Write manifest to file atomically.
    ///
    /// # Errors
    ///
    /// - Return [`HashError::Fs`] if file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        files::write_atomic(path, self.to_string())?;
        Ok(())
    }

    /// Hash every Markdown file under directory, recursively.
    ///
    /// Directory is canonicalized first, so recorded paths are absolute.
    ///
    /// # Errors
    ///
    /// - Return [`HashError::Canonicalize`] if directory cannot be resolved.
    /// - Return [`HashError::Fs`] if directory cannot be walked, or a file
    ///   cannot be hashed.
    #[instrument(skip(directory), level = "debug")]
    pub fn scan(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let root = directory
            .canonicalize()
            .map_err(|err| HashError::Canonicalize {
                source: err,
                path: directory.to_path_buf(),
            })?;

        let markdown = files::markdown_files(&root)?;
        let bar = progress::bar(markdown.len(), "hashing markdown files")?;

        let mut manifest = Self::default();
        for path in markdown {
            let digest = files::sha256_file(&path)?;
            manifest.entries.insert(path, digest);
            bar.inc(1);
        }
        bar.finish_and_clear();

        Ok(manifest)
    }

    /// Lookup stored digest of path.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.entries.get(path.as_ref()).map(String::as_str)
    }

    /// Record digest of path.
    pub fn insert(&mut self, path: impl Into<PathBuf>, digest: impl Into<String>) {
        self.entries.insert(path.into(), digest.into());
    }

    /// Check if path's current content matches the stored digest.
    ///
    /// # Errors
    ///
    /// - Return [`HashError::Fs`] if file cannot be hashed.
    pub fn is_unchanged(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        match self.get(path) {
            Some(stored) => Ok(files::sha256_file(path)? == stored),
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.entries
            .iter()
            .map(|(path, digest)| (path.as_path(), digest.as_str()))
    }

    /// Compare this newer manifest against an older one.
    pub fn diff(&self, older: &Self) -> HashDiff {
        let mut diff = HashDiff::default();
        for (path, digest) in &self.entries {
            match older.entries.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old != digest => diff.modified.push(path.clone()),
                Some(_) => diff.unchanged.push(path.clone()),
            }
        }

        diff.removed = older
            .entries
            .keys()
            .filter(|path| !self.entries.contains_key(*path))
            .cloned()
            .collect();

        diff
    }
}

impl FromStr for HashManifest {
    type Err = HashError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest = Self::default();
        for (number, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match line.rsplit_once('\t') {
                Some((path, digest)) if !path.is_empty() && !digest.trim().is_empty() => {
                    manifest.insert(path, digest.trim());
                }
                _ => warn!("skipping malformed manifest line {}: {line:?}", number + 1),
            }
        }

        Ok(manifest)
    }
}

impl Display for HashManifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (path, digest) in &self.entries {
            writeln!(fmt, "{}\t{digest}", path.display())?;
        }

        Ok(())
    }
}

/// Difference between two manifests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HashDiff {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

/// Rescan directory and refresh manifest file.
///
/// Entries of files that no longer exist are dropped, since the new manifest
/// is exactly the scan result. Returns what changed relative to the previous
/// manifest.
///
/// # Errors
///
/// - Return [`HashError`] if the previous manifest cannot be read, the
///   directory cannot be scanned, or the new manifest cannot be written.
#[instrument(skip(manifest_path, directory), level = "debug")]
pub fn update(manifest_path: impl AsRef<Path>, directory: impl AsRef<Path>) -> Result<HashDiff> {
    let manifest_path = manifest_path.as_ref();
    let previous = HashManifest::load(manifest_path)?;
    let current = HashManifest::scan(directory)?;
    let diff = current.diff(&previous);

    current.save(manifest_path)?;
    info!(
        "hashed {} files into {:?}",
        current.len(),
        manifest_path.display()
    );

    Ok(diff)
}

/// Hash manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Manifest file cannot be read.
    #[error("failed to read hash manifest {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory to scan cannot be resolved.
    #[error("failed to resolve directory {:?}", path.display())]
    Canonicalize {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Progress(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = HashError> = std::result::Result<T, E>;
