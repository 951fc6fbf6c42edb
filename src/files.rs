// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Filesystem helpers shared by every tool.
//!
//! Tree copying, atomic rewrites, backups, and content hashing. All of these
//! report failures with the offending path attached so that the caller can
//! log something useful without extra bookkeeping.

use chrono::Local;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Symlink handling for [`copy_tree`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SymlinkMode {
    /// Recreate symlinks at the destination as symlinks.
    #[default]
    Preserve,

    /// Copy whatever symlinks point to.
    Follow,
}

/// Copy the contents of `source` into `destination`.
///
/// The destination directory is created if needed, and merged into if it
/// already exists. Existing files are overwritten. Returns number of
/// non-directory entries copied.
///
/// # Errors
///
/// - Return [`FsError::Walk`] if the source tree cannot be traversed.
/// - Return [`FsError::Copy`] if any entry cannot be copied.
#[instrument(skip(source, destination), level = "debug")]
pub fn copy_tree(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    mode: SymlinkMode,
) -> Result<usize> {
    let source = source.as_ref();
    let destination = destination.as_ref();
    debug!("copy {:?} to {:?}", source.display(), destination.display());

    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(mode == SymlinkMode::Follow)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|err| FsError::Walk {
            source: err,
            path: source.to_path_buf(),
        })?;

        // INVARIANT: Walker only yields paths under the source root.
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = destination.join(relative);
        let copy_err = |err| FsError::Copy {
            source: err,
            from: entry.path().to_path_buf(),
            to: target.clone(),
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(copy_err)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(copy_err)?;
        }

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(copy_err)?;
            remove_path(&target).map_err(copy_err)?;
            symlink(&link, &target).map_err(copy_err)?;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_err)?;
        }
        copied += 1;
    }

    Ok(copied)
}

/// Remove whatever lives at `path`.
///
/// Directories are removed recursively, while files and symlinks are
/// unlinked. Symlinked directories are unlinked, never traversed. A missing
/// path is not an error.
///
/// # Errors
///
/// - Return [`std::io::Error`] if removal fails.
pub fn remove_path(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Check if anything lives at `path`, dangling symlinks included.
pub fn path_occupied(path: impl AsRef<Path>) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Write content to file atomically.
///
/// Content goes into a temporary file next to the target, is synced to disk,
/// and then renamed over the target. Readers either see the old content or
/// the new content, never a partial write.
///
/// A symlinked target is resolved first, so the link survives and the file
/// it points at gets the new content. Permissions of an existing target are
/// carried over to the replacement.
///
/// # Errors
///
/// - Return [`FsError::Write`] if any step fails. The temporary file is
///   removed on failure.
pub fn write_atomic(path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let write_err = |err| FsError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    let is_link = fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink());
    let target = if is_link {
        fs::canonicalize(path).map_err(write_err)?
    } else {
        path.to_path_buf()
    };

    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
    temp.write_all(content.as_ref()).map_err(write_err)?;
    if let Ok(meta) = fs::metadata(&target) {
        temp.as_file()
            .set_permissions(meta.permissions())
            .map_err(write_err)?;
    }
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(&target).map_err(|err| write_err(err.error))?;
    debug!("atomically wrote {:?}", target.display());

    Ok(())
}

/// Copy file into backup directory under a timestamped name.
///
/// Backup is named `<file name>_<YYYYmmdd_HHMMSS>.backup`. The backup
/// directory is created if missing. Returns path of the new backup.
///
/// # Errors
///
/// - Return [`FsError::Backup`] if backup cannot be created.
pub fn backup_timestamped(
    path: impl AsRef<Path>,
    backup_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup = backup_dir.as_ref().join(format!("{name}_{stamp}.backup"));

    backup_to(path, &backup)?;
    Ok(backup)
}

/// Copy file to exact backup location, creating parent directories.
///
/// # Errors
///
/// - Return [`FsError::Backup`] if backup cannot be created.
pub fn backup_to(path: impl AsRef<Path>, backup: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let backup = backup.as_ref();
    let backup_err = |err| FsError::Backup {
        source: err,
        path: path.to_path_buf(),
        backup: backup.to_path_buf(),
    };

    if let Some(parent) = backup.parent() {
        mkdirp::mkdirp(parent).map_err(backup_err)?;
    }
    fs::copy(path, backup).map_err(backup_err)?;
    debug!("created backup {:?}", backup.display());

    Ok(())
}

/// Calculate SHA-256 digest of file content as lowercase hex.
///
/// File is streamed in 64 KiB blocks.
///
/// # Errors
///
/// - Return [`FsError::Hash`] if file cannot be read.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let hash_err = |err| FsError::Hash {
        source: err,
        path: path.to_path_buf(),
    };

    let mut file = File::open(path).map_err(hash_err)?;
    let mut hasher = Sha256::new();
    let mut block = vec![0; 64 * 1024];
    loop {
        let read = file.read(&mut block).map_err(hash_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Check if path names a Markdown file by extension.
pub fn is_markdown(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

/// Recursively list Markdown files under directory, hidden ones included.
///
/// Returned paths are sorted.
///
/// # Errors
///
/// - Return [`FsError::Walk`] if directory cannot be traversed.
pub fn markdown_files(directory: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in WalkBuilder::new(directory).standard_filters(false).build() {
        let entry = entry.map_err(|err| FsError::Walk {
            source: err,
            path: directory.to_path_buf(),
        })?;

        if entry.file_type().is_some_and(|kind| kind.is_file()) && is_markdown(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();

    Ok(files)
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    if original.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

/// Filesystem helper error types.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Directory tree cannot be traversed.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Entry cannot be copied.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// File cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backup cannot be created.
    #[error("failed to back up {:?} to {:?}", path.display(), backup.display())]
    Backup {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        backup: PathBuf,
    },

    /// File cannot be hashed.
    #[error("failed to hash {:?}", path.display())]
    Hash {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FsError> = std::result::Result<T, E>;
