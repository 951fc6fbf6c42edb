// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Directory size reporting.
//!
//! Measure disk usage of every direct child of a directory, and page through
//! the results largest first. Disk usage is reported in KiB, matching what
//! `du -sk` prints for the same entry.
//!
//! Pages are rendered through Nushell's table view when `nu` is available,
//! and as a plain text table otherwise.

use futures::{stream, StreamExt};
use inquire::{Confirm, InquireError};
use serde::Serialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument, warn};

/// Environment variable a page of entries is handed to Nushell through.
pub const NU_DATA_ENV: &str = "DIRSIZE_DATA";

/// Kind of measured entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

impl Display for EntryKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Dir => fmt.write_str("dir"),
            Self::File => fmt.write_str("file"),
        }
    }
}

/// Directory entry with its disk usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedEntry {
    /// File name of entry.
    pub name: String,

    /// Whether entry is a directory.
    pub kind: EntryKind,

    /// Disk usage in KiB.
    pub size_kib: u64,
}

/// Format KiB count into human readable size, e.g., `1.5M`.
pub fn format_size(size_kib: u64) -> String {
    let mut size = size_kib as f64 * 1024.0;
    for unit in ["B", "K", "M", "G", "T", "P"] {
        if size < 1024.0 {
            return format!("{size:.1}{unit}");
        }
        size /= 1024.0;
    }

    format!("{size:.1}E")
}

/// List entries of directory that should be measured.
///
/// Directories are always listed. Regular files and symlinks are only listed
/// when `include_files` is set. Anything else is ignored.
///
/// # Errors
///
/// - Return [`DirsizeError::NotADirectory`] if directory is not one.
/// - Return [`DirsizeError::ReadDir`] if directory cannot be listed.
pub fn collect_entries(directory: impl AsRef<Path>, include_files: bool) -> Result<Vec<PathBuf>> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
        return Err(DirsizeError::NotADirectory {
            path: directory.to_path_buf(),
        });
    }

    let read_err = |err| DirsizeError::ReadDir {
        source: err,
        path: directory.to_path_buf(),
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(directory).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let kind = entry.file_type().map_err(read_err)?;
        let keep = kind.is_dir() || (include_files && (kind.is_file() || kind.is_symlink()));
        if keep {
            entries.push(entry.path());
        }
    }

    Ok(entries)
}

/// Measure disk usage of path in KiB without following symlinks.
///
/// On Unix, allocated blocks are summed and hardlinked inodes are counted
/// once. Elsewhere, apparent file lengths are summed. Entries that vanish
/// mid-walk are ignored.
///
/// # Errors
///
/// - Return [`std::io::Error`] if the top-level path cannot be inspected.
pub fn disk_usage(path: impl AsRef<Path>) -> std::io::Result<u64> {
    let path = path.as_ref();
    let root = fs::symlink_metadata(path)?;
    let mut usage = Usage::default();
    usage.add(&root);

    if root.is_dir() {
        let walker = ignore::WalkBuilder::new(path)
            .standard_filters(false)
            .follow_links(false)
            .build();
        for entry in walker.flatten() {
            if entry.depth() == 0 {
                continue;
            }

            match entry.metadata() {
                Ok(meta) => usage.add(&meta),
                Err(err) => debug!("skip {:?}: {err}", entry.path().display()),
            }
        }
    }

    Ok(usage.kib())
}

#[derive(Debug, Default)]
struct Usage {
    bytes: u64,
    #[cfg(unix)]
    seen: std::collections::HashSet<(u64, u64)>,
}

impl Usage {
    #[cfg(unix)]
    fn add(&mut self, meta: &fs::Metadata) {
        use std::os::unix::fs::MetadataExt;

        // INVARIANT: Count hardlinked inodes once, like du(1).
        if meta.nlink() > 1 && !meta.is_dir() && !self.seen.insert((meta.dev(), meta.ino())) {
            return;
        }
        self.bytes += meta.blocks() * 512;
    }

    #[cfg(not(unix))]
    fn add(&mut self, meta: &fs::Metadata) {
        self.bytes += meta.len();
    }

    fn kib(&self) -> u64 {
        self.bytes.div_ceil(1024)
    }
}

/// Classify path without following symlinks, so a link to a directory is a
/// file.
fn entry_kind(path: &Path) -> std::io::Result<EntryKind> {
    if fs::symlink_metadata(path)?.is_dir() {
        Ok(EntryKind::Dir)
    } else {
        Ok(EntryKind::File)
    }
}

/// Measure disk usage of every path concurrently.
///
/// At most `concurrency` paths are measured at the same time on tokio's
/// blocking thread pool. Paths that cannot be measured are logged and
/// dropped. Result is sorted largest first, and by name on ties.
#[instrument(skip(paths), level = "debug")]
pub async fn measure(paths: Vec<PathBuf>, concurrency: usize) -> Vec<SizedEntry> {
    let mut entries: Vec<SizedEntry> = stream::iter(paths)
        .map(|path| async move {
            let target = path.clone();
            let measured = tokio::task::spawn_blocking(move || {
                let kind = entry_kind(&target)?;
                disk_usage(&target).map(|size| (kind, size))
            })
            .await;
            (path, measured)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(path, measured)| async move {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match measured {
                Ok(Ok((kind, size_kib))) => Some(SizedEntry {
                    name,
                    kind,
                    size_kib,
                }),
                Ok(Err(err)) => {
                    warn!("cannot measure {:?}: {err}", path.display());
                    None
                }
                Err(err) => {
                    warn!("measurement of {:?} panicked: {err}", path.display());
                    None
                }
            }
        })
        .collect()
        .await;

    entries.sort_by(|a, b| b.size_kib.cmp(&a.size_kib).then_with(|| a.name.cmp(&b.name)));
    entries
}

/// Render one page of entries.
pub trait PageRenderer {
    /// Show entries to the user.
    ///
    /// # Errors
    ///
    /// - Return [`DirsizeError`] if rendering fails.
    fn render(&mut self, page: &[SizedEntry]) -> Result<()>;
}

/// Plain text table renderer.
#[derive(Debug)]
pub struct TextRenderer<W: Write> {
    out: W,
}

impl<W: Write> TextRenderer<W> {
    /// Construct new text renderer writing into `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consume renderer, returning its writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PageRenderer for TextRenderer<W> {
    fn render(&mut self, page: &[SizedEntry]) -> Result<()> {
        writeln!(self.out, "{:<10} {:<6} Name", "Size", "Type")?;
        writeln!(self.out, "{}", "─".repeat(50))?;
        for entry in page {
            writeln!(
                self.out,
                "{:<10} {:<6} {}",
                format_size(entry.size_kib),
                entry.kind.to_string(),
                entry.name
            )?;
        }

        Ok(())
    }
}

/// Nushell table renderer that falls back to text when `nu` misbehaves.
///
/// Once Nushell fails to render a page, every later page goes straight to
/// the fallback renderer.
#[derive(Debug)]
pub struct NushellRenderer<R: PageRenderer> {
    nu: Option<PathBuf>,
    fallback: R,
}

#[derive(Serialize)]
struct NuRow<'a> {
    size: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    name: &'a str,
}

impl<R: PageRenderer> NushellRenderer<R> {
    /// Construct new renderer using `nu` from `PATH` if it exists.
    pub fn detect(fallback: R) -> Self {
        let nu = which::which("nu").ok();
        debug!("nushell renderer available: {}", nu.is_some());
        Self { nu, fallback }
    }

    fn render_nu(&self, nu: &Path, page: &[SizedEntry]) -> Result<()> {
        let rows = page
            .iter()
            .map(|entry| NuRow {
                size: format_size(entry.size_kib),
                kind: entry.kind,
                name: entry.name.as_str(),
            })
            .collect::<Vec<_>>();
        let data = serde_json::to_string(&rows)?;

        let status = Command::new(nu)
            .args(["-c", "$env.DIRSIZE_DATA | from json | table --width 100"])
            .env(NU_DATA_ENV, data)
            .status()?;
        if !status.success() {
            return Err(DirsizeError::Nushell(status.to_string()));
        }

        Ok(())
    }
}

impl<R: PageRenderer> PageRenderer for NushellRenderer<R> {
    fn render(&mut self, page: &[SizedEntry]) -> Result<()> {
        if let Some(nu) = self.nu.clone() {
            match self.render_nu(&nu, page) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!("error rendering with nushell, falling back to text: {err}");
                    self.nu = None;
                }
            }
        }

        self.fallback.render(page)
    }
}

/// Decide whether to keep paging.
pub trait PagePrompt {
    /// Ask whether the next `limit` entries should be shown.
    fn show_next(&mut self, limit: usize) -> bool;
}

/// Ask the user on the terminal. Interrupts count as "no".
#[derive(Debug, Default, Clone)]
pub struct InquirePager;

impl PagePrompt for InquirePager {
    fn show_next(&mut self, limit: usize) -> bool {
        match Confirm::new(&format!("Show next {limit}?"))
            .with_default(false)
            .prompt()
        {
            Ok(answer) => answer,
            Err(InquireError::OperationInterrupted | InquireError::OperationCanceled) => false,
            Err(err) => {
                warn!("cannot prompt: {err}");
                false
            }
        }
    }
}

/// Page through entries `limit` at a time.
///
/// Status lines go to `out`. Returns number of entries displayed.
///
/// # Errors
///
/// - Return [`DirsizeError`] if rendering or writing fails.
pub fn paginate(
    entries: &[SizedEntry],
    limit: usize,
    renderer: &mut impl PageRenderer,
    prompt: &mut impl PagePrompt,
    out: &mut impl Write,
) -> Result<usize> {
    let limit = limit.max(1);
    let total = entries.len();
    if total == 0 {
        writeln!(out, "No items found in directory.")?;
        return Ok(0);
    }

    let mut shown = 0;
    for page in entries.chunks(limit) {
        renderer.render(page)?;
        shown += page.len();

        if shown < total {
            writeln!(out)?;
            if !prompt.show_next(limit) {
                writeln!(out, "\nStopped at {shown}/{total} items.")?;
                break;
            }
            writeln!(out)?;
        }
    }
    writeln!(out, "\nTotal items displayed: {shown}/{total}")?;

    Ok(shown)
}

/// Directory size reporting error types.
#[derive(Debug, thiserror::Error)]
pub enum DirsizeError {
    /// Target is not a directory.
    #[error("directory {:?} not found", path.display())]
    NotADirectory { path: PathBuf },

    /// Target directory cannot be listed.
    #[error("failed to read directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Page data cannot be encoded for Nushell.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Nushell exited unsuccessfully.
    #[error("nushell failed with {0}")]
    Nushell(String),

    /// Output cannot be written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = DirsizeError> = std::result::Result<T, E>;
