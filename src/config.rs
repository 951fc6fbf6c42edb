// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional configuration file that dotkit reads
//! from `$XDG_CONFIG_HOME/dotkit/config.toml`. Every section is optional, and
//! every missing field falls back to a sensible default.
//!
//! # General Layout
//!
//! ```toml
//! [stow]
//! source = "~/.config"
//! exclude = ["gh", "zsh"]
//!
//! [blog]
//! posts_dir = "~/Blog/content/posts"
//! attachments_dir = "~/Vault/Blog/images"
//! static_images_dir = "~/Blog/static/images"
//!
//! [backup]
//! dir = "~/.local/share/dotkit/backups"
//!
//! [dirsize]
//! page_size = 25
//! concurrency = 8
//!
//! [fnm]
//! multishells_dir = "~/.local/state/fnm_multishells"
//! stale_after_hours = 24
//!
//! [history]
//! claude_dir = "~/.claude"
//! ```
//!
//! All path fields undergo shell expansion, so `~` and `$VARIABLE` forms
//! are allowed anywhere. Expansion happens per section when a command asks
//! for that section, so a bad variable only affects the commands reading it.

use crate::path::{self, NoWayHome};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Directories under `~/.config` that never become stow packages.
pub const DEFAULT_STOW_EXCLUDES: &[&str] = &[
    ".android",
    ".vscode",
    "crossnote",
    "emacs",
    "fzf-git",
    "gh",
    "github-copilot",
    "gtk-2.0",
    "jgit",
    "Microsoft",
    "raycast",
    "thefuck",
    "wireshark",
    "xbuild",
    "zsh",
];

/// Environment variable overriding [`BlogSettings::posts_dir`].
pub const POSTS_DIR_ENV: &str = "BLOG_POSTS_DIR";

/// Environment variable overriding [`BlogSettings::attachments_dir`].
pub const ATTACHMENTS_DIR_ENV: &str = "OBSIDIAN_ATTACHMENTS_DIR";

/// Environment variable overriding [`BlogSettings::static_images_dir`].
pub const STATIC_IMAGES_DIR_ENV: &str = "BLOG_STATIC_IMAGES_DIR";

/// Top-level configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Stow package creation settings.
    pub stow: StowSettings,

    /// Blog directories used by the Markdown tools.
    pub blog: BlogSettings,

    /// Backup location for tools that rewrite files in place.
    pub backup: BackupSettings,

    /// Directory size reporter settings.
    pub dirsize: DirsizeSettings,

    /// FNM multishell cleanup settings.
    pub fnm: FnmSettings,

    /// Claude Code history settings.
    pub history: HistorySettings,
}

impl Config {
    /// Load configuration from target file, or from the default location.
    ///
    /// A missing configuration file is not an error: the defaults are used
    /// instead. Blog directories are overridden by their environment
    /// variables when set.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoWayHome`] if default location cannot be
    ///   determined.
    /// - Return [`ConfigError::Read`] if existing file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is malformed.
    #[instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => path::default_config_file()?,
        };

        let mut config: Config = if path.exists() {
            debug!("load configuration from {:?}", path.display());
            read_to_string(&path)
                .map_err(|err| ConfigError::Read {
                    source: err,
                    path: path.clone(),
                })?
                .parse()?
        } else {
            debug!("no configuration at {:?}, using defaults", path.display());
            "".parse()?
        };
        config.blog.apply_env_overrides();

        Ok(config)
    }

    /// Stow settings with shell expansion performed.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if source cannot be expanded.
    pub fn stow(&self) -> Result<StowSettings> {
        Ok(StowSettings {
            source: self.stow.source.expand()?,
            exclude: self.stow.exclude.clone(),
        })
    }

    /// Blog directories with shell expansion performed.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a directory cannot be
    ///   expanded.
    pub fn blog(&self) -> Result<BlogSettings> {
        Ok(BlogSettings {
            posts_dir: expand_optional(self.blog.posts_dir.as_ref())?,
            attachments_dir: expand_optional(self.blog.attachments_dir.as_ref())?,
            static_images_dir: expand_optional(self.blog.static_images_dir.as_ref())?,
        })
    }

    /// FNM settings with shell expansion performed.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if multishell directory cannot
    ///   be expanded.
    pub fn fnm(&self) -> Result<FnmSettings> {
        Ok(FnmSettings {
            multishells_dir: self.fnm.multishells_dir.expand()?,
            stale_after_hours: self.fnm.stale_after_hours,
        })
    }

    /// Claude Code history settings with shell expansion performed.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if data directory cannot be
    ///   expanded.
    pub fn history(&self) -> Result<HistorySettings> {
        Ok(HistorySettings {
            claude_dir: self.history.claude_dir.expand()?,
        })
    }

    /// Determine backup directory, falling back to the XDG default.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if directory cannot be
    ///   expanded.
    /// - Return [`ConfigError::NoWayHome`] if default cannot be determined.
    pub fn backup_dir(&self) -> Result<PathBuf> {
        match &self.backup.dir {
            Some(dir) => Ok(dir.expand()?.to_path_buf()),
            None => Ok(path::default_backup_dir()?),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        // INVARIANT: Path fields stay unexpanded until their section is used.
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Stow package creation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StowSettings {
    /// Directory whose subdirectories become stow packages.
    pub source: ConfigPath,

    /// Subdirectory names to skip.
    pub exclude: Vec<String>,
}

impl Default for StowSettings {
    fn default() -> Self {
        Self {
            source: ConfigPath::new("~/.config"),
            exclude: DEFAULT_STOW_EXCLUDES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Blog directories used by the Markdown tools.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlogSettings {
    /// Directory holding the blog's Markdown posts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts_dir: Option<ConfigPath>,

    /// Obsidian attachment directory that images are copied from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments_dir: Option<ConfigPath>,

    /// Static site directory that images are copied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_images_dir: Option<ConfigPath>,
}

impl BlogSettings {
    fn apply_env_overrides(&mut self) {
        for (var, field) in [
            (POSTS_DIR_ENV, &mut self.posts_dir),
            (ATTACHMENTS_DIR_ENV, &mut self.attachments_dir),
            (STATIC_IMAGES_DIR_ENV, &mut self.static_images_dir),
        ] {
            if let Ok(value) = std::env::var(var) {
                debug!("override blog directory from ${var}");
                *field = Some(ConfigPath::new(value));
            }
        }
    }
}

/// Backup location settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Root directory for backups, `$XDG_DATA_HOME/dotkit/backups` if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<ConfigPath>,
}

/// Directory size reporter settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirsizeSettings {
    /// Number of entries shown per page.
    pub page_size: usize,

    /// Number of entries measured at the same time.
    pub concurrency: usize,
}

impl Default for DirsizeSettings {
    fn default() -> Self {
        Self {
            page_size: 25,
            concurrency: 8,
        }
    }
}

/// FNM multishell cleanup settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FnmSettings {
    /// Directory FNM keeps its per-shell symlinks in.
    pub multishells_dir: ConfigPath,

    /// Idle time after which a link is considered stale.
    pub stale_after_hours: u64,
}

impl Default for FnmSettings {
    fn default() -> Self {
        Self {
            multishells_dir: ConfigPath::new("~/.local/state/fnm_multishells"),
            stale_after_hours: 24,
        }
    }
}

/// Claude Code history settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Claude Code data directory holding `history.jsonl` and `projects/`.
    pub claude_dir: ConfigPath,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            claude_dir: ConfigPath::new("~/.claude"),
        }
    }
}

/// Path field of configuration file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ConfigPath(PathBuf);

impl ConfigPath {
    /// Construct new configuration path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat configuration path as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Clone configuration path into owned [`PathBuf`].
    pub fn to_path_buf(&self) -> PathBuf {
        self.0.clone()
    }

    /// Perform shell expansion on configuration path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a variable is undefined.
    pub fn expand(&self) -> Result<Self> {
        let expanded = shellexpand::full(self.to_string().as_str())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned();

        Ok(Self::new(expanded))
    }
}

impl Display for ConfigPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

fn expand_optional(path: Option<&ConfigPath>) -> Result<Option<ConfigPath>> {
    path.map(|path| path.expand()).transpose()
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Default configuration location cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
