// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! LaTeX-style math to KaTeX-friendly Markdown.
//!
//! Notes pasted out of chat assistants and PDFs tend to carry math as
//! `\[ ... \]`, `\( ... \)`, bare `[ ... ]` lines, or loose `(\alpha)`
//! groups. Hugo's KaTeX setup only understands `$...$` and `$$...$$`, so the
//! [`MathConverter`] rewrites the former into the latter.
//!
//! Fenced code blocks, inline code spans, and math that is already delimited
//! by `$` are never touched.

use crate::{
    files::{self, FsError},
    progress,
};

use glob::Pattern;
use ignore::WalkBuilder;
use regex::{Captures, Regex};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::{debug, error, info, instrument, warn};

macro_rules! pattern {
    ($name:ident, $regex:literal) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new($regex).expect("valid regex")
        });
    };
}

pattern!(INLINE_CODE, r"``[^`]*``|`[^`\n]*`");
pattern!(EXISTING_MATH, r"(?s)\$\$.+?\$\$|\$[^$\n]+\$");
pattern!(ESCAPED_DISPLAY, r"(?s)\\\[(.+?)\\\]");
pattern!(ESCAPED_INLINE, r"(?s)\\\((.+?)\\\)");
pattern!(PARENTHESIZED, r"\(([^()\n]+)\)");
pattern!(LATEX_COMMAND, r"\\[A-Za-z]+");
pattern!(WINDOWS_PATH, r"[A-Za-z]:\\");
pattern!(
    OPERATOR_SUBSCRIPT,
    r"\b(argmin|argmax|min|max|sup|inf|lim)_(\{[^{}\n]*\}|[A-Za-z0-9])"
);
pattern!(PLACEHOLDER, r"\x{E000}(\d+)\x{E001}");

const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

/// Counts of each conversion performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStats {
    /// `\[ ... \]` turned into `$$ ... $$`.
    pub escaped_display: usize,

    /// `\( ... \)` turned into `$ ... $`.
    pub escaped_inline: usize,

    /// Bare `[ ... ]` lines or blocks turned into `$$ ... $$`.
    pub bare_bracket_lines: usize,

    /// `( ... \command ... )` turned into `$ ... $`.
    pub parenthesized_latex: usize,

    /// `min_i` and friends turned into `$\min_i$`.
    pub operator_subscripts: usize,
}

impl ConversionStats {
    pub fn total(&self) -> usize {
        self.escaped_display
            + self.escaped_inline
            + self.bare_bracket_lines
            + self.parenthesized_latex
            + self.operator_subscripts
    }

    /// Add counts of another run into this one.
    pub fn merge(&mut self, other: &Self) {
        self.escaped_display += other.escaped_display;
        self.escaped_inline += other.escaped_inline;
        self.bare_bracket_lines += other.bare_bracket_lines;
        self.parenthesized_latex += other.parenthesized_latex;
        self.operator_subscripts += other.operator_subscripts;
    }
}

impl Display for ConversionStats {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "Total conversions: {}", self.total())?;
        writeln!(fmt, "  escaped display  \\[...\\] : {}", self.escaped_display)?;
        writeln!(fmt, "  escaped inline   \\(...\\) : {}", self.escaped_inline)?;
        writeln!(fmt, "  bare [math] lines        : {}", self.bare_bracket_lines)?;
        writeln!(fmt, "  parenthesized LaTeX (...): {}", self.parenthesized_latex)?;
        write!(fmt, "  operator subscripts      : {}", self.operator_subscripts)
    }
}

/// Markdown math delimiter converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathConverter {
    /// Also convert operator subscripts such as `min_i`.
    pub operator_subscripts: bool,
}

impl Default for MathConverter {
    fn default() -> Self {
        Self {
            operator_subscripts: true,
        }
    }
}

impl MathConverter {
    pub fn new(operator_subscripts: bool) -> Self {
        Self {
            operator_subscripts,
        }
    }

    /// Convert math delimiters in Markdown text.
    pub fn convert(&self, text: &str) -> (String, ConversionStats) {
        let mut stats = ConversionStats::default();
        let mut converted = String::with_capacity(text.len());
        let mut prose = String::new();
        let mut fence: Option<(char, usize)> = None;

        for line in text.split_inclusive('\n') {
            match fence {
                Some((marker, len)) => {
                    converted.push_str(line);
                    if closes_fence(line, marker, len) {
                        fence = None;
                    }
                }
                None => match opens_fence(line) {
                    Some(opened) => {
                        converted.push_str(&self.convert_prose(&prose, &mut stats));
                        prose.clear();
                        converted.push_str(line);
                        fence = Some(opened);
                    }
                    None => prose.push_str(line),
                },
            }
        }
        converted.push_str(&self.convert_prose(&prose, &mut stats));

        (converted, stats)
    }

    fn convert_prose(&self, prose: &str, stats: &mut ConversionStats) -> String {
        if prose.is_empty() {
            return String::new();
        }

        let mut masks = Masks::default();
        let text = masks.hide_all(&INLINE_CODE, prose);
        let text = masks.hide_all(&EXISTING_MATH, &text);

        let text = bare_brackets(&text, &mut masks, stats);

        let text = replace_with(&ESCAPED_DISPLAY, &text, |caps, _, _| {
            let inner = &caps[1];
            stats.escaped_display += 1;
            if inner.contains('\n') {
                Some(masks.hide(format!("$$\n{}\n$$", inner.trim_matches(['\n', '\r']))))
            } else {
                Some(masks.hide(format!("$${}$$", inner.trim())))
            }
        });

        let text = replace_with(&ESCAPED_INLINE, &text, |caps, _, _| {
            stats.escaped_inline += 1;
            Some(masks.hide(format!("${}$", caps[1].trim())))
        });

        let text = replace_with(&PARENTHESIZED, &text, |caps, before, _| {
            let inner = &caps[1];
            let after_link = before.ends_with(']') || before.ends_with('\\');
            if after_link || !LATEX_COMMAND.is_match(inner) || WINDOWS_PATH.is_match(inner) {
                return None;
            }
            stats.parenthesized_latex += 1;
            Some(masks.hide(format!("${}$", inner.trim())))
        });

        let text = if self.operator_subscripts {
            replace_with(&OPERATOR_SUBSCRIPT, &text, |caps, before, after| {
                let escaped = before.ends_with('\\');
                let glued = after
                    .chars()
                    .next()
                    .is_some_and(|ch| ch.is_alphanumeric() || ch == '_');
                if escaped || glued {
                    return None;
                }

                let operator = match &caps[1] {
                    "argmin" => r"\arg\min".to_string(),
                    "argmax" => r"\arg\max".to_string(),
                    other => format!(r"\{other}"),
                };
                stats.operator_subscripts += 1;
                Some(masks.hide(format!("${operator}_{}$", &caps[2])))
            })
        } else {
            text
        };

        masks.restore(&text)
    }
}

/// Stash of protected spans, replaced by private-use placeholders.
#[derive(Debug, Default)]
struct Masks {
    spans: Vec<String>,
}

impl Masks {
    fn hide(&mut self, span: String) -> String {
        let index = self.spans.len();
        self.spans.push(span);
        format!("{MASK_OPEN}{index}{MASK_CLOSE}")
    }

    fn hide_all(&mut self, pattern: &Regex, text: &str) -> String {
        replace_with(pattern, text, |caps, _, _| Some(self.hide(caps[0].to_string())))
    }

    fn restore(&self, text: &str) -> String {
        let mut restored = text.to_string();

        // INVARIANT: Spans may nest placeholders, but never deeper than the
        // number of spans.
        for _ in 0..=self.spans.len() {
            if !restored.contains(MASK_OPEN) {
                break;
            }

            restored = PLACEHOLDER
                .replace_all(&restored, |caps: &Captures<'_>| {
                    caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| self.spans.get(index))
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
        }

        restored
    }
}

/// Replace regex matches through a callback that sees surrounding text.
///
/// Callback receives captures, text before the match, and text after it.
/// Returning `None` keeps the match as-is.
fn replace_with(
    pattern: &Regex,
    text: &str,
    mut replace: impl FnMut(&Captures<'_>, &str, &str) -> Option<String>,
) -> String {
    let mut replaced = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        replaced.push_str(&text[last..whole.start()]);
        match replace(&caps, &text[..whole.start()], &text[whole.end()..]) {
            Some(replacement) => replaced.push_str(&replacement),
            None => replaced.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    replaced.push_str(&text[last..]);

    replaced
}

fn looks_like_latex(text: &str) -> bool {
    LATEX_COMMAND.is_match(text) || text.contains(['^', '_', '='])
}

fn split_ending(line: &str) -> (&str, &str) {
    let body = line.trim_end_matches(['\n', '\r']);
    (body, &line[body.len()..])
}

fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

fn bare_brackets(text: &str, masks: &mut Masks, stats: &mut ConversionStats) -> String {
    let lines = text.split_inclusive('\n').collect::<Vec<_>>();
    let mut converted = String::with_capacity(text.len());
    let mut index = 0;

    while index < lines.len() {
        let (body, ending) = split_ending(lines[index]);
        let trimmed = body.trim();
        let indent = indentation(body);

        if trimmed == "[" {
            let close = (index + 1..lines.len()).find(|&at| split_ending(lines[at]).0.trim() == "]");
            if let Some(close) = close {
                let inner = lines[index + 1..close].concat();
                let inner = inner.trim_end_matches(['\n', '\r']);
                if !inner.trim().is_empty() && looks_like_latex(inner) {
                    let block = format!("{indent}$$\n{inner}\n{indent}$$");
                    converted.push_str(&masks.hide(block));
                    converted.push_str(split_ending(lines[close]).1);
                    stats.bare_bracket_lines += 1;
                    index = close + 1;
                    continue;
                }
            }
        } else if let Some(inner) = bracketed(trimmed) {
            if looks_like_latex(inner) {
                converted.push_str(indent);
                converted.push_str(&masks.hide(format!("$${inner}$$")));
                converted.push_str(ending);
                stats.bare_bracket_lines += 1;
                index += 1;
                continue;
            }
        }

        converted.push_str(lines[index]);
        index += 1;
    }

    converted
}

fn bracketed(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;

    // INVARIANT: Obsidian wiki links `[[note]]` are not math.
    if inner.starts_with('[') || inner.ends_with(']') {
        return None;
    }

    let inner = inner.trim();
    (!inner.is_empty()).then_some(inner)
}

fn opens_fence(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|ch| *ch == '`' || *ch == '~')?;
    let len = trimmed.chars().take_while(|ch| *ch == marker).count();
    (len >= 3).then_some((marker, len))
}

fn closes_fence(line: &str, marker: char, len: usize) -> bool {
    let trimmed = line.trim();
    trimmed.chars().take_while(|ch| *ch == marker).count() >= len
        && trimmed.chars().all(|ch| ch == marker)
}

/// Conversion of one file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConversion {
    pub original: String,
    pub converted: String,
    pub stats: ConversionStats,
}

impl FileConversion {
    pub fn changed(&self) -> bool {
        self.original != self.converted
    }
}

/// Read and convert file without writing anything.
///
/// # Errors
///
/// - Return [`MathError::Read`] if file cannot be read.
pub fn convert_file(path: impl AsRef<Path>, converter: &MathConverter) -> Result<FileConversion> {
    let path = path.as_ref();
    let original = fs::read_to_string(path).map_err(|err| MathError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;
    let (converted, stats) = converter.convert(&original);

    Ok(FileConversion {
        original,
        converted,
        stats,
    })
}

/// Single file conversion switches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    /// Only report what would change.
    pub dry_run: bool,

    /// Copy original to `<file>.bak` before writing.
    pub backup: bool,
}

/// Outcome of converting a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub file: PathBuf,
    pub conversion: FileConversion,

    /// File was rewritten on disk.
    pub written: bool,

    /// Where the original was copied to, if anywhere.
    pub backup: Option<PathBuf>,
}

/// Convert math delimiters of a single file in place.
///
/// # Errors
///
/// - Return [`MathError::NotAFile`] if path is not a regular file.
/// - Return [`MathError::Read`] if file cannot be read.
/// - Return [`MathError::Fs`] if backup or write fails.
#[instrument(skip(path, converter), level = "debug")]
pub fn fix_file(
    path: impl AsRef<Path>,
    converter: &MathConverter,
    options: FixOptions,
) -> Result<FixOutcome> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MathError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let conversion = convert_file(path, converter)?;
    let mut outcome = FixOutcome {
        file: path.to_path_buf(),
        conversion,
        written: false,
        backup: None,
    };

    if !outcome.conversion.changed() {
        info!("no changes needed for {:?}", path.display());
        return Ok(outcome);
    }

    if options.dry_run {
        info!("dry-run: {:?} not modified", path.display());
        return Ok(outcome);
    }

    if options.backup {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);
        files::backup_to(path, &backup)?;
        outcome.backup = Some(backup);
    }

    files::write_atomic(path, &outcome.conversion.converted)?;
    outcome.written = true;
    info!("updated {:?}", path.display());

    Ok(outcome)
}

/// Batch conversion switches.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Descend into subdirectories.
    pub recursive: bool,

    /// Glob matched against file names.
    pub pattern: Pattern,

    /// Only report what would change.
    pub dry_run: bool,

    /// Mirror originals into this directory before writing.
    pub backup_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            pattern: Pattern::new("*.md").unwrap_or_default(),
            dry_run: false,
            backup_dir: None,
        }
    }
}

/// What happened to one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Modified,
    WouldModify,
    Unchanged,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,

    /// Number of conversions applied to file.
    pub changes: usize,
}

/// Aggregate report of a batch conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub directory: PathBuf,
    pub dry_run: bool,
    pub results: Vec<FileResult>,
    pub aggregate: ConversionStats,
}

impl BatchReport {
    /// Files that were, or would be, modified.
    pub fn changed(&self) -> impl Iterator<Item = &FileResult> {
        self.results
            .iter()
            .filter(|result| matches!(result.status, FileStatus::Modified | FileStatus::WouldModify))
    }

    pub fn errors(&self) -> impl Iterator<Item = &FileResult> {
        self.results
            .iter()
            .filter(|result| matches!(result.status, FileStatus::Error(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == FileStatus::Unchanged)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Convert math delimiters in every matching file under directory.
///
/// Failures on individual files are recorded in the report, and do not stop
/// the batch.
///
/// # Errors
///
/// - Return [`MathError::NotADirectory`] if directory is invalid.
/// - Return [`MathError::Walk`] if directory cannot be traversed.
#[instrument(skip(directory, converter, options), level = "debug")]
pub fn batch(
    directory: impl AsRef<Path>,
    converter: &MathConverter,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let directory = directory.as_ref();
    let root = directory
        .canonicalize()
        .ok()
        .filter(|root| root.is_dir())
        .ok_or_else(|| MathError::NotADirectory {
            path: directory.to_path_buf(),
        })?;

    let targets = target_files(&root, options)?;
    info!("found {} files matching {}", targets.len(), options.pattern);
    if options.dry_run {
        warn!("running in dry-run mode, nothing will be written");
    }

    let bar = progress::bar(targets.len(), "converting math syntax")?;
    let mut report = BatchReport {
        directory: root.clone(),
        dry_run: options.dry_run,
        results: Vec::with_capacity(targets.len()),
        aggregate: ConversionStats::default(),
    };

    for file in targets {
        let result = match batch_file(&root, &file, converter, options, &mut report.aggregate) {
            Ok((status, changes)) => FileResult {
                file,
                status,
                changes,
            },
            Err(err) => {
                error!("failed to convert {:?}: {err}", file.display());
                FileResult {
                    file,
                    status: FileStatus::Error(err.to_string()),
                    changes: 0,
                }
            }
        };
        report.results.push(result);
        bar.inc(1);
    }
    bar.finish_and_clear();

    Ok(report)
}

fn batch_file(
    root: &Path,
    file: &Path,
    converter: &MathConverter,
    options: &BatchOptions,
    aggregate: &mut ConversionStats,
) -> Result<(FileStatus, usize)> {
    let conversion = convert_file(file, converter)?;
    aggregate.merge(&conversion.stats);
    let changes = conversion.stats.total();

    if !conversion.changed() {
        debug!("unchanged {:?}", file.display());
        return Ok((FileStatus::Unchanged, 0));
    }

    if options.dry_run {
        return Ok((FileStatus::WouldModify, changes));
    }

    if let Some(backup_dir) = &options.backup_dir {
        let relative = file.strip_prefix(root).unwrap_or(file);
        files::backup_to(file, backup_dir.join(relative))?;
    }
    files::write_atomic(file, &conversion.converted)?;

    Ok((FileStatus::Modified, changes))
}

fn target_files(root: &Path, options: &BatchOptions) -> Result<Vec<PathBuf>> {
    let mut walker = WalkBuilder::new(root);
    walker.standard_filters(false);
    if !options.recursive {
        walker.max_depth(Some(1));
    }

    let mut targets = Vec::new();
    for entry in walker.build() {
        let entry = entry.map_err(|err| MathError::Walk {
            source: err,
            path: root.to_path_buf(),
        })?;

        let matched = entry
            .path()
            .file_name()
            .is_some_and(|name| options.pattern.matches(&name.to_string_lossy()));
        if matched && entry.file_type().is_some_and(|kind| kind.is_file()) {
            targets.push(entry.into_path());
        }
    }
    targets.sort();

    Ok(targets)
}

/// Math conversion error types.
#[derive(Debug, thiserror::Error)]
pub enum MathError {
    /// Target is not a regular file.
    #[error("not a file: {:?}", path.display())]
    NotAFile { path: PathBuf },

    /// Target is not a directory.
    #[error("not a directory: {:?}", path.display())]
    NotADirectory { path: PathBuf },

    /// File cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be traversed.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Progress(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = MathError> = std::result::Result<T, E>;
