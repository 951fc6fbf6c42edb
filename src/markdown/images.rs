// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Obsidian image embeds to Hugo static image links.
//!
//! Obsidian embeds attachments as `[[diagram.png]]`. Hugo needs the image in
//! its `static/images` directory, and a regular Markdown image link pointing
//! at `/images/diagram.png`. Every top-level post in the blog's posts
//! directory is rewritten this way, copying each referenced attachment over.

use crate::{
    config::BlogSettings,
    files::{self, FsError},
};

use regex::Regex;
use std::{
    collections::HashSet,
    fs,
    path::{Component, Path, PathBuf},
    sync::LazyLock,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, instrument, warn};

/// Image extensions Obsidian embeds are recognized for.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "webp", "svg"];

const MAX_NAME_LEN: usize = 255;

static EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\[([\w\s.-]+\.(?:png|jpg|jpeg|gif|bmp|webp|svg))\]\]")
        .expect("valid regex")
});

static IMAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)!\[.*?\]\(/images/([^)]+)\)")
        .expect("valid regex")
});

/// Validated blog directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlogDirs {
    pub posts_dir: PathBuf,
    pub attachments_dir: PathBuf,
    pub static_images_dir: PathBuf,
}

impl BlogDirs {
    /// Validate blog directory settings.
    ///
    /// Every directory must be set, absolute, and free of `..` components.
    /// Posts and attachments must exist. The static image directory is
    /// created if missing.
    ///
    /// # Errors
    ///
    /// - Return [`ImageError::Unset`] if a directory is not configured.
    /// - Return [`ImageError::InvalidDir`] if a directory is not absolute or
    ///   contains `..`.
    /// - Return [`ImageError::MissingDir`] if posts or attachments do not
    ///   exist.
    /// - Return [`ImageError::CreateDir`] if static image directory cannot be
    ///   created.
    pub fn from_settings(settings: &BlogSettings) -> Result<Self> {
        let posts_dir = checked("posts_dir", settings.posts_dir.as_ref().map(|p| p.as_path()))?;
        let attachments_dir = checked(
            "attachments_dir",
            settings.attachments_dir.as_ref().map(|p| p.as_path()),
        )?;
        let static_images_dir = checked(
            "static_images_dir",
            settings.static_images_dir.as_ref().map(|p| p.as_path()),
        )?;

        for (key, dir) in [("posts_dir", &posts_dir), ("attachments_dir", &attachments_dir)] {
            if !dir.is_dir() {
                return Err(ImageError::MissingDir {
                    key,
                    path: dir.clone(),
                });
            }
        }

        mkdirp::mkdirp(&static_images_dir).map_err(|err| ImageError::CreateDir {
            source: err,
            path: static_images_dir.clone(),
        })?;
        info!("blog directories validated");

        Ok(Self {
            posts_dir,
            attachments_dir,
            static_images_dir,
        })
    }
}

fn checked(key: &'static str, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => return Err(ImageError::Unset { key }),
    };

    let traverses = path.components().any(|part| part == Component::ParentDir);
    if !path.is_absolute() || traverses {
        return Err(ImageError::InvalidDir {
            key,
            path: path.to_path_buf(),
        });
    }

    Ok(path.to_path_buf())
}

/// Check image name for traversal tricks, bad extensions, and excess length.
pub fn is_valid_image_name(name: &str) -> bool {
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        warn!("suspicious image name: {name}");
        return false;
    }

    let extension = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());
    if !extension.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str())) {
        warn!("invalid image extension: {name}");
        return false;
    }

    if name.chars().count() > MAX_NAME_LEN {
        warn!("image name too long: {name}");
        return false;
    }

    true
}

/// Percent-encode text, leaving ASCII alphanumerics and `_.-~` alone.
pub fn percent_encode(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }

    encoded
}

/// Decode `%XX` escapes. Malformed escapes are kept as-is.
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' && index + 2 < bytes.len() {
            let high = (bytes[index + 1] as char).to_digit(16);
            let low = (bytes[index + 2] as char).to_digit(16);
            if let (Some(high), Some(low)) = (high, low) {
                decoded.push((high * 16 + low) as u8);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

/// Summary of an image conversion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageReport {
    /// Posts that were rewritten.
    pub processed: Vec<PathBuf>,

    /// Image names copied into the static directory.
    pub copied: Vec<String>,

    /// Image names not found among the attachments.
    pub missing: Vec<String>,

    /// Posts that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,

    /// Wall time spent.
    pub elapsed: Duration,
}

impl ImageReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Obsidian to Hugo image link converter.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    dirs: BlogDirs,
    backup_dir: PathBuf,
    dry_run: bool,
}

impl ImageProcessor {
    /// Construct new image processor that backs posts up into `backup_dir`.
    pub fn new(dirs: BlogDirs, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            dirs,
            backup_dir: backup_dir.into(),
            dry_run: false,
        }
    }

    /// Only report what would be done.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Convert image embeds in every top-level post.
    ///
    /// # Errors
    ///
    /// - Return [`ImageError::ReadDir`] if posts directory cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<ImageReport> {
        let started = Instant::now();
        let posts = self.top_level_posts()?;
        info!("found {} markdown files to scan", posts.len());

        let mut report = ImageReport::default();
        for post in posts {
            match self.process_file(&post, &mut report) {
                Ok(true) => report.processed.push(post),
                Ok(false) => {}
                Err(err) => {
                    error!("failed to process {:?}: {err}", post.display());
                    report.failed.push((post, err.to_string()));
                }
            }
        }
        report.elapsed = started.elapsed();

        Ok(report)
    }

    /// Convert image embeds in one post.
    ///
    /// Returns whether the post was rewritten, or would be in dry-run mode.
    ///
    /// # Errors
    ///
    /// - Return [`ImageError::Read`] if post cannot be read.
    /// - Return [`ImageError::Fs`] if post cannot be backed up or written.
    pub fn process_file(&self, path: &Path, report: &mut ImageReport) -> Result<bool> {
        let content = fs::read_to_string(path).map_err(|err| ImageError::Read {
            source: err,
            path: path.to_path_buf(),
        })?;

        let mut seen = HashSet::new();
        let names = EMBED
            .captures_iter(&content)
            .filter_map(|caps| caps.get(1).map(|name| name.as_str().to_string()))
            .filter(|name| seen.insert(name.clone()))
            .collect::<Vec<_>>();

        if names.is_empty() {
            debug!("no images found in {:?}", path.display());
            return Ok(false);
        }
        info!("processing {} images in {:?}", names.len(), path.display());

        let mut updated = content.clone();
        let mut linked = 0;
        for name in &names {
            let (replacement, ok) = self.link_image(name, report);
            if ok {
                linked += 1;
            }
            updated = updated.replace(&format!("[[{name}]]"), &replacement);
        }

        if updated == content {
            return Ok(false);
        }

        if self.dry_run {
            info!("would update {:?}", path.display());
            return Ok(true);
        }

        files::backup_timestamped(path, &self.backup_dir)?;
        files::write_atomic(path, updated)?;
        info!(
            "updated {:?}: {linked}/{} images linked",
            path.display(),
            names.len()
        );

        Ok(true)
    }

    fn link_image(&self, name: &str, report: &mut ImageReport) -> (String, bool) {
        if !is_valid_image_name(name) {
            return (format!("![Image Description - Invalid: {name}]"), false);
        }

        let source = self.dirs.attachments_dir.join(name);
        let destination = self.dirs.static_images_dir.join(name);
        if !source.is_file() {
            warn!("image not found: {:?}", source.display());
            report.missing.push(name.to_string());
            return (format!("![Image Description - Missing: {name}]"), false);
        }

        if self.dry_run {
            debug!("would copy {:?}", source.display());
        } else if let Err(err) = fs::copy(&source, &destination) {
            error!(
                "failed to copy {:?} to {:?}: {err}",
                source.display(),
                destination.display()
            );
            return (format!("![Image Description - Copy Failed: {name}]"), false);
        }
        report.copied.push(name.to_string());

        (
            format!("![Image Description](/images/{})", percent_encode(name)),
            true,
        )
    }

    /// Remove images from the static directory that no post links to.
    ///
    /// Links are collected from every post under the posts directory,
    /// recursively. Returns removed image paths, or the ones that would be
    /// removed in dry-run mode.
    ///
    /// # Errors
    ///
    /// - Return [`ImageError::Fs`] if posts cannot be listed.
    /// - Return [`ImageError::Read`] if a post cannot be read.
    /// - Return [`ImageError::ReadDir`] if static directory cannot be listed.
    #[instrument(skip(self), level = "debug")]
    pub fn prune_orphans(&self) -> Result<Vec<PathBuf>> {
        let mut referenced = HashSet::new();
        for post in files::markdown_files(&self.dirs.posts_dir)? {
            let content = fs::read_to_string(&post).map_err(|err| ImageError::Read {
                source: err,
                path: post.clone(),
            })?;
            referenced.extend(
                IMAGE_LINK
                    .captures_iter(&content)
                    .filter_map(|caps| caps.get(1))
                    .map(|name| percent_decode(name.as_str())),
            );
        }

        let static_dir = &self.dirs.static_images_dir;
        let read_err = |err| ImageError::ReadDir {
            source: err,
            path: static_dir.clone(),
        };

        let mut orphans = Vec::new();
        for entry in fs::read_dir(static_dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if !referenced.contains(&name) {
                orphans.push(entry.path());
            }
        }
        orphans.sort();

        for orphan in &orphans {
            if self.dry_run {
                info!("would remove orphaned image {:?}", orphan.display());
            } else if let Err(err) = fs::remove_file(orphan) {
                error!("failed to remove {:?}: {err}", orphan.display());
            } else {
                info!("removed orphaned image {:?}", orphan.display());
            }
        }

        Ok(orphans)
    }

    fn top_level_posts(&self) -> Result<Vec<PathBuf>> {
        let posts_dir = &self.dirs.posts_dir;
        let read_err = |err| ImageError::ReadDir {
            source: err,
            path: posts_dir.clone(),
        };

        let mut posts = Vec::new();
        for entry in fs::read_dir(posts_dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && files::is_markdown(&path) {
                posts.push(path);
            }
        }
        posts.sort();

        Ok(posts)
    }
}

/// Image conversion error types.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Blog directory is not configured.
    #[error("blog directory {key} is not set")]
    Unset { key: &'static str },

    /// Blog directory is relative or escapes upwards.
    #[error("invalid path for {key}: {:?}", path.display())]
    InvalidDir { key: &'static str, path: PathBuf },

    /// Blog directory that must exist does not.
    #[error("{key} directory {:?} does not exist", path.display())]
    MissingDir { key: &'static str, path: PathBuf },

    /// Static image directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be listed.
    #[error("failed to read directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Post cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Friendly result alias :3
pub type Result<T, E = ImageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPath;
    use indoc::indoc;
    use simple_test_case::test_case;
    use tempfile::TempDir;

    struct Blog {
        _root: TempDir,
        dirs: BlogDirs,
        backups: PathBuf,
    }

    fn blog() -> anyhow::Result<Blog> {
        let root = TempDir::new()?;
        let posts = root.path().join("content/posts");
        let attachments = root.path().join("vault/images");
        fs::create_dir_all(posts.join("drafts"))?;
        fs::create_dir_all(&attachments)?;
        fs::write(attachments.join("my diagram.png"), "png")?;

        let settings = BlogSettings {
            posts_dir: Some(ConfigPath::new(&posts)),
            attachments_dir: Some(ConfigPath::new(&attachments)),
            static_images_dir: Some(ConfigPath::new(root.path().join("static/images"))),
        };
        let dirs = BlogDirs::from_settings(&settings)?;
        let backups = root.path().join("backups");

        Ok(Blog {
            _root: root,
            dirs,
            backups,
        })
    }

    #[test_case("diagram.png", true; "plain")]
    #[test_case("Photo.JPEG", true; "uppercase extension")]
    #[test_case("../etc.png", false; "traversal")]
    #[test_case("notes.txt", false; "bad extension")]
    #[test]
    fn image_name_validation(name: &str, expect: bool) {
        pretty_assertions::assert_eq!(is_valid_image_name(name), expect);
    }

    #[test]
    fn percent_encoding_keeps_unreserved() {
        pretty_assertions::assert_eq!(percent_encode("my diagram_v1.2-~.png"), "my%20diagram_v1.2-~.png");
        pretty_assertions::assert_eq!(percent_encode("café.png"), "caf%C3%A9.png");
        pretty_assertions::assert_eq!(percent_decode("caf%C3%A9%20x.png"), "café x.png");
        pretty_assertions::assert_eq!(percent_decode("100%.png"), "100%.png");
    }

    #[test]
    fn relative_blog_dir_is_rejected() {
        let settings = BlogSettings {
            posts_dir: Some(ConfigPath::new("content/posts")),
            ..Default::default()
        };
        let result = BlogDirs::from_settings(&settings);
        assert!(matches!(result, Err(ImageError::InvalidDir { key: "posts_dir", .. })));
    }

    #[test]
    fn unset_blog_dir_is_rejected() {
        let result = BlogDirs::from_settings(&BlogSettings::default());
        assert!(matches!(result, Err(ImageError::Unset { key: "posts_dir" })));
    }

    #[test]
    fn run_rewrites_top_level_posts() -> anyhow::Result<()> {
        let blog = blog()?;
        let post = blog.dirs.posts_dir.join("post.md");
        fs::write(
            &post,
            indoc! {"
                See [[my diagram.png]] and again [[my diagram.png]].
                Lost: [[ghost.gif]]
            "},
        )?;
        let nested = blog.dirs.posts_dir.join("drafts/nested.md");
        fs::write(&nested, "[[my diagram.png]]")?;

        let report = ImageProcessor::new(blog.dirs.clone(), &blog.backups).run()?;

        pretty_assertions::assert_eq!(report.processed, vec![post.clone()]);
        pretty_assertions::assert_eq!(report.copied, vec!["my diagram.png".to_string()]);
        pretty_assertions::assert_eq!(report.missing, vec!["ghost.gif".to_string()]);
        pretty_assertions::assert_eq!(
            fs::read_to_string(&post)?,
            indoc! {"
                See ![Image Description](/images/my%20diagram.png) and again ![Image Description](/images/my%20diagram.png).
                Lost: ![Image Description - Missing: ghost.gif]
            "}
        );
        assert!(blog.dirs.static_images_dir.join("my diagram.png").is_file());
        pretty_assertions::assert_eq!(fs::read_to_string(&nested)?, "[[my diagram.png]]");
        pretty_assertions::assert_eq!(fs::read_dir(&blog.backups)?.count(), 1);

        Ok(())
    }

    #[test]
    fn dry_run_changes_nothing() -> anyhow::Result<()> {
        let blog = blog()?;
        let post = blog.dirs.posts_dir.join("post.md");
        fs::write(&post, "[[my diagram.png]]")?;

        let report = ImageProcessor::new(blog.dirs.clone(), &blog.backups)
            .dry_run(true)
            .run()?;

        pretty_assertions::assert_eq!(report.processed, vec![post.clone()]);
        pretty_assertions::assert_eq!(fs::read_to_string(&post)?, "[[my diagram.png]]");
        assert!(!blog.dirs.static_images_dir.join("my diagram.png").exists());

        Ok(())
    }

    #[test]
    fn prune_orphans_keeps_linked_images() -> anyhow::Result<()> {
        let blog = blog()?;
        let images = &blog.dirs.static_images_dir;
        fs::write(images.join("used one.png"), "")?;
        fs::write(images.join("stale.png"), "")?;
        fs::write(
            blog.dirs.posts_dir.join("drafts/post.md"),
            "![x](/images/used%20one.png)",
        )?;

        let processor = ImageProcessor::new(blog.dirs.clone(), &blog.backups);
        let orphans = processor.prune_orphans()?;

        pretty_assertions::assert_eq!(orphans, vec![images.join("stale.png")]);
        assert!(images.join("used one.png").exists());
        assert!(!images.join("stale.png").exists());

        Ok(())
    }
}
