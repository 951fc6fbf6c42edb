// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hugo frontmatter normalization.
//!
//! Every post needs a `title`, a `date`, and a non-empty list of
//! `categories`. Posts that lack a frontmatter block get one, and posts that
//! have one get their missing or broken fields filled in. Everything else in
//! the block is kept in its original order.

use crate::{
    files::{self, FsError},
    hashes::{HashError, HashManifest},
};

use chrono::{DateTime, Utc};
use git2::{Repository, Status, StatusOptions};
use serde_yaml::{Mapping, Value};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

/// Category assigned to posts that have none.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Split document into frontmatter text and body.
///
/// Frontmatter exists when the document starts with `---`, and ends at the
/// next line that is exactly `---`. The body starts right after the closing
/// delimiter, so it usually begins with a newline. A document that opens a
/// block without closing it is treated as having no frontmatter.
pub fn split(content: &str) -> (Option<&str>, &str) {
    if !content.starts_with("---") {
        return (None, content);
    }

    let Some(first_end) = content.find('\n') else {
        warn!("frontmatter block is never closed");
        return (None, content);
    };

    let start = first_end + 1;
    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let bare = line.trim_end_matches('\n').trim_end_matches('\r');
        if bare == "---" {
            return (Some(&content[start..offset]), &content[offset + 3..]);
        }
        offset += line.len();
    }

    warn!("frontmatter block is never closed");
    (None, content)
}

/// Uppercase letters that follow a non-letter, lowercase all others.
pub fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut after_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if after_letter {
                titled.extend(ch.to_lowercase());
            } else {
                titled.extend(ch.to_uppercase());
            }
            after_letter = true;
        } else {
            titled.push(ch);
            after_letter = false;
        }
    }

    titled
}

/// Derive post title from its file name.
pub fn default_title(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    title_case(&name.replace(".md", "").replace(['_', '-'], " "))
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Sequence(items)) => items.is_empty(),
        Some(Value::Mapping(map)) => map.is_empty(),
        Some(Value::Number(number)) => number.as_f64() == Some(0.0),
        Some(Value::Bool(true) | Value::Tagged(_)) => false,
    }
}

/// Fill in missing fields of existing frontmatter.
///
/// Returns whether anything was changed.
pub fn normalize(data: &mut Mapping, path: &Path, now: DateTime<Utc>) -> bool {
    let mut modified = false;

    if is_falsy(data.get("title")) {
        let title = default_title(path);
        info!("added title to {:?}: {title}", path.display());
        data.insert("title".into(), title.into());
        modified = true;
    }

    if is_falsy(data.get("date")) {
        let date = rfc3339(now);
        info!("added date to {:?}: {date}", path.display());
        data.insert("date".into(), date.into());
        modified = true;
    }

    if let Some(categories) = data.get("categories").cloned() {
        match categories {
            Value::Sequence(items) => {
                let cleaned = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|category| !category.is_empty())
                    .map(|category| Value::String(category.to_string()))
                    .collect::<Vec<_>>();

                if cleaned.is_empty() {
                    info!("removed empty categories from {:?}", path.display());
                    data.remove("categories");
                    modified = true;
                } else if cleaned != items {
                    info!("updated categories for {:?}", path.display());
                    data.insert("categories".into(), Value::Sequence(cleaned));
                    modified = true;
                }
            }
            _ => {
                info!("removed invalid categories from {:?}", path.display());
                data.remove("categories");
                modified = true;
            }
        }
    }

    if !data.contains_key("categories") {
        info!(
            "added default category to {:?}: {DEFAULT_CATEGORY}",
            path.display()
        );
        data.insert(
            "categories".into(),
            Value::Sequence(vec![DEFAULT_CATEGORY.into()]),
        );
        modified = true;
    }

    modified
}

/// Build frontmatter for a post that has none.
pub fn fresh(path: &Path, now: DateTime<Utc>) -> Mapping {
    let mut data = Mapping::new();
    data.insert("title".into(), default_title(path).into());
    data.insert("date".into(), rfc3339(now).into());
    data.insert(
        "categories".into(),
        Value::Sequence(vec![DEFAULT_CATEGORY.into()]),
    );

    data
}

/// Render frontmatter and body back into a document.
///
/// # Errors
///
/// - Return [`serde_yaml::Error`] if frontmatter cannot be serialized.
pub fn render(data: &Mapping, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(data)?;
    let yaml = yaml.trim_end();
    if body.starts_with('\n') {
        Ok(format!("---\n{yaml}\n---{body}"))
    } else {
        Ok(format!("---\n{yaml}\n---\n{body}"))
    }
}

fn rfc3339(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// What happened to a single post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Existing frontmatter was updated.
    Updated,

    /// Frontmatter block was added.
    Created,

    /// Frontmatter was already complete.
    Untouched,

    /// Content matches stored hash, so it was not even parsed.
    Unchanged,
}

/// Summary of a frontmatter run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrontmatterReport {
    /// Posts that were modified.
    pub processed: Vec<PathBuf>,

    /// Posts that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,

    /// Number of posts visited.
    pub total: usize,
}

impl FrontmatterReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Frontmatter normalizer over a directory of posts.
#[derive(Debug)]
pub struct FrontmatterProcessor {
    backup_dir: PathBuf,
    hashes: Option<HashManifest>,
    git_changed: bool,
    now: DateTime<Utc>,
}

impl FrontmatterProcessor {
    /// Construct new processor that backs up posts into `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            hashes: None,
            git_changed: false,
            now: Utc::now(),
        }
    }

    /// Skip posts whose content matches this manifest.
    pub fn hashes(mut self, hashes: HashManifest) -> Self {
        self.hashes = Some(hashes);
        self
    }

    /// Only visit posts Git reports as new or modified.
    pub fn git_changed(mut self, git_changed: bool) -> Self {
        self.git_changed = git_changed;
        self
    }

    /// Timestamp used for missing dates.
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Normalize frontmatter of every post under directory.
    ///
    /// Failures on individual posts are logged and recorded in the report.
    ///
    /// # Errors
    ///
    /// - Return [`FrontmatterError::NotADirectory`] if directory is invalid.
    /// - Return [`FrontmatterError::Fs`] if directory cannot be walked.
    /// - Return [`FrontmatterError::Git2`] if Git status cannot be obtained.
    #[instrument(skip(self, directory), level = "debug")]
    pub fn run(&self, directory: impl AsRef<Path>) -> Result<FrontmatterReport> {
        let directory = directory.as_ref();
        let root = directory
            .canonicalize()
            .ok()
            .filter(|root| root.is_dir())
            .ok_or_else(|| FrontmatterError::NotADirectory {
                path: directory.to_path_buf(),
            })?;
        info!("processing directory {:?}", root.display());

        let mut posts = files::markdown_files(&root)?;
        if self.git_changed {
            let changed = changed_markdown(&root)?;
            posts.retain(|post| changed.contains(post));
            info!("git reports {} changed markdown files", posts.len());
        }

        if posts.is_empty() {
            warn!("no markdown files found in {:?}", root.display());
        }

        let mut report = FrontmatterReport {
            total: posts.len(),
            ..Default::default()
        };
        for post in posts {
            match self.process_file(&post) {
                Ok(FileOutcome::Updated | FileOutcome::Created) => report.processed.push(post),
                Ok(_) => {}
                Err(err) => {
                    error!("failed to process {:?}: {err}", post.display());
                    report.failed.push((post, err.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Normalize frontmatter of a single post.
    ///
    /// # Errors
    ///
    /// - Return [`FrontmatterError`] if post cannot be read, parsed, backed
    ///   up, or written.
    pub fn process_file(&self, path: &Path) -> Result<FileOutcome> {
        if let Some(hashes) = &self.hashes {
            if hashes.is_unchanged(path)? {
                debug!("unchanged, skipping {:?}", path.display());
                return Ok(FileOutcome::Unchanged);
            }
        }

        info!("processing {:?}", path.display());
        let content = fs::read_to_string(path).map_err(|err| FrontmatterError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

        let (data, body, outcome) = match split(&content) {
            (Some(text), body) => {
                let mut data = parse(text, path)?;
                if !normalize(&mut data, path, self.now) {
                    debug!("no changes needed for {:?}", path.display());
                    return Ok(FileOutcome::Untouched);
                }
                (data, body, FileOutcome::Updated)
            }
            (None, body) => (fresh(path, self.now), body, FileOutcome::Created),
        };

        let rendered = render(&data, body).map_err(|err| FrontmatterError::Yaml {
            source: err,
            path: path.to_path_buf(),
        })?;
        files::backup_timestamped(path, &self.backup_dir)?;
        files::write_atomic(path, rendered)?;
        info!("updated frontmatter for {:?}", path.display());

        Ok(outcome)
    }
}

fn parse(text: &str, path: &Path) -> Result<Mapping> {
    let value: Value = serde_yaml::from_str(text).map_err(|err| FrontmatterError::Yaml {
        source: err,
        path: path.to_path_buf(),
    })?;

    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(data) => Ok(data),
        _ => Err(FrontmatterError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// List Markdown files Git reports as new, modified, or renamed.
///
/// Uses the repository containing `directory`. Deleted entries are ignored.
/// Returned paths are absolute.
///
/// # Errors
///
/// - Return [`FrontmatterError::Git2`] if repository cannot be opened or
///   queried.
/// - Return [`FrontmatterError::BareRepository`] if repository has no
///   working tree.
pub fn changed_markdown(directory: impl AsRef<Path>) -> Result<HashSet<PathBuf>> {
    let repo = Repository::discover(directory.as_ref())?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| FrontmatterError::BareRepository {
            path: repo.path().to_path_buf(),
        })?;
    let workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());

    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .renames_head_to_index(true)
        .renames_index_to_workdir(true);

    let wanted = Status::WT_NEW
        | Status::WT_MODIFIED
        | Status::WT_RENAMED
        | Status::INDEX_NEW
        | Status::INDEX_MODIFIED
        | Status::INDEX_RENAMED;

    let mut changed = HashSet::new();
    for entry in repo.statuses(Some(&mut opts))?.iter() {
        if !entry.status().intersects(wanted) {
            continue;
        }

        // INVARIANT: Renamed entries must be tracked by their new name.
        let path = entry
            .index_to_workdir()
            .and_then(|delta| delta.new_file().path().map(Path::to_path_buf))
            .or_else(|| {
                entry
                    .head_to_index()
                    .and_then(|delta| delta.new_file().path().map(Path::to_path_buf))
            })
            .or_else(|| entry.path().map(PathBuf::from));

        if let Some(path) = path.filter(|path| files::is_markdown(path)) {
            changed.insert(workdir.join(path));
        }
    }

    Ok(changed)
}

/// Frontmatter processing error types.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    /// Target directory does not exist.
    #[error("target directory {:?} does not exist", path.display())]
    NotADirectory { path: PathBuf },

    /// Post cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Frontmatter is not valid YAML.
    #[error("failed to parse YAML frontmatter in {:?}", path.display())]
    Yaml {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Frontmatter is valid YAML, but not a mapping.
    #[error("frontmatter in {:?} is not a mapping", path.display())]
    NotAMapping { path: PathBuf },

    /// Repository has no working tree to diff against.
    #[error("repository {:?} is bare", path.display())]
    BareRepository { path: PathBuf },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = FrontmatterError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use git2::{IndexAddOption, Signature};
    use indoc::indoc;
    use simple_test_case::test_case;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).single().unwrap()
    }

    #[test_case("hello_world.md", "Hello World"; "underscores")]
    #[test_case("my-first-POST.md", "My First Post"; "dashes and caps")]
    #[test_case("c++ notes.md", "C++ Notes"; "symbols")]
    #[test_case("it's2024.md", "It'S2024"; "apostrophe and digits")]
    #[test]
    fn default_title_from_file_name(name: &str, expect: &str) {
        pretty_assertions::assert_eq!(default_title(name), expect);
    }

    #[test]
    fn split_finds_closing_delimiter_line() {
        let content = indoc! {"
            ---
            title: A --- B
            ---
            Body text
        "};

        let (frontmatter, body) = split(content);
        pretty_assertions::assert_eq!(frontmatter, Some("title: A --- B\n"));
        pretty_assertions::assert_eq!(body, "\nBody text\n");
    }

    #[test]
    fn split_unclosed_block_has_no_frontmatter() {
        let content = "---\ntitle: Nope\nBody";
        pretty_assertions::assert_eq!(split(content), (None, content));
    }

    #[test]
    fn normalize_cleans_categories() -> anyhow::Result<()> {
        let mut data: Mapping = serde_yaml::from_str(indoc! {r#"
            title: Kept
            date: 2024-01-01
            tags: [rust]
            categories: ["  Rust ", "", 3]
        "#})?;

        assert!(normalize(&mut data, Path::new("x.md"), fixed_now()));

        let expect: Mapping = serde_yaml::from_str(indoc! {r#"
            title: Kept
            date: 2024-01-01
            tags: [rust]
            categories: [Rust]
        "#})?;
        pretty_assertions::assert_eq!(data, expect);

        Ok(())
    }

    #[test]
    fn normalize_replaces_invalid_categories() -> anyhow::Result<()> {
        let mut data: Mapping = serde_yaml::from_str(indoc! {r#"
            title: ""
            date: 2024-01-01
            categories: not-a-list
        "#})?;

        assert!(normalize(&mut data, Path::new("/blog/rust_tips.md"), fixed_now()));
        pretty_assertions::assert_eq!(data.get("title"), Some(&Value::from("Rust Tips")));
        pretty_assertions::assert_eq!(
            data.get("categories"),
            Some(&Value::Sequence(vec![DEFAULT_CATEGORY.into()]))
        );

        Ok(())
    }

    #[test]
    fn normalize_complete_frontmatter_is_noop() -> anyhow::Result<()> {
        let mut data: Mapping = serde_yaml::from_str(indoc! {r#"
            title: Done
            date: 2024-01-01
            categories: [Rust]
        "#})?;

        assert!(!normalize(&mut data, Path::new("x.md"), fixed_now()));

        Ok(())
    }

    #[test]
    fn process_file_adds_missing_frontmatter() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let backups = dir.path().join("backups");
        let post = dir.path().join("rust-ownership.md");
        fs::write(&post, "# Ownership\n")?;

        let processor = FrontmatterProcessor::new(&backups).now(fixed_now());
        pretty_assertions::assert_eq!(processor.process_file(&post)?, FileOutcome::Created);

        let content = fs::read_to_string(&post)?;
        let (frontmatter, body) = split(&content);
        pretty_assertions::assert_eq!(body, "\n# Ownership\n");

        let data: Mapping = serde_yaml::from_str(frontmatter.unwrap_or_default())?;
        pretty_assertions::assert_eq!(data.get("title"), Some(&Value::from("Rust Ownership")));
        pretty_assertions::assert_eq!(data.get("date"), Some(&Value::from("2025-03-14T15:09:26Z")));
        pretty_assertions::assert_eq!(fs::read_dir(&backups)?.count(), 1);

        Ok(())
    }

    #[test]
    fn process_file_rejects_non_mapping() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let post = dir.path().join("list.md");
        fs::write(&post, "---\n- a\n- b\n---\nBody\n")?;

        let result = FrontmatterProcessor::new(dir.path().join("backups")).process_file(&post);
        assert!(matches!(result, Err(FrontmatterError::NotAMapping { .. })));

        Ok(())
    }

    #[test]
    fn run_skips_posts_matching_hashes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(&posts)?;
        fs::write(posts.join("old.md"), "old")?;
        fs::write(posts.join("new.md"), "new")?;

        let mut hashes = HashManifest::default();
        let old = posts.canonicalize()?.join("old.md");
        hashes.insert(&old, files::sha256_file(&old)?);

        let report = FrontmatterProcessor::new(dir.path().join("backups"))
            .hashes(hashes)
            .run(&posts)?;

        pretty_assertions::assert_eq!(report.total, 2);
        pretty_assertions::assert_eq!(report.processed, vec![posts.canonicalize()?.join("new.md")]);
        pretty_assertions::assert_eq!(fs::read_to_string(&old)?, "old");

        Ok(())
    }

    fn commit_all(repo: &Repository) -> anyhow::Result<()> {
        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now("John Doe", "john@doe.com")?;
        repo.commit(Some("HEAD"), &signature, &signature, "chore: add posts", &tree, &[])?;

        Ok(())
    }

    #[test]
    fn changed_markdown_follows_renames_and_ignores_deletions() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let repo = Repository::init(dir.path())?;
        let posts = dir.path().join("posts");
        fs::create_dir_all(&posts)?;
        fs::write(posts.join("staged-old.md"), "renamed in the index\n")?;
        fs::write(posts.join("moved-old.md"), "renamed in the working tree\n")?;
        fs::write(posts.join("doomed.md"), "deleted\n")?;
        fs::write(posts.join("stable.md"), "stable\n")?;
        commit_all(&repo)?;

        fs::rename(posts.join("staged-old.md"), posts.join("staged-new.md"))?;
        let mut index = repo.index()?;
        index.remove_path(Path::new("posts/staged-old.md"))?;
        index.add_path(Path::new("posts/staged-new.md"))?;
        index.write()?;
        fs::rename(posts.join("moved-old.md"), posts.join("moved-new.md"))?;
        fs::remove_file(posts.join("doomed.md"))?;

        let root = dir.path().canonicalize()?;
        let expect = HashSet::from([
            root.join("posts/staged-new.md"),
            root.join("posts/moved-new.md"),
        ]);
        pretty_assertions::assert_eq!(changed_markdown(&posts)?, expect);

        Ok(())
    }
}
