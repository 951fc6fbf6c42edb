// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repair corrupted Claude Code conversation titles.
//!
//! Claude Code keeps one JSON record per prompt in `history.jsonl`, whose
//! `display` field doubles as the conversation title. When a session dies on
//! an auth or billing error, that error message becomes the title. The real
//! conversation lives under `projects/<mangled project path>/<session>.jsonl`,
//! so a better title can be generated from its first meaningful user message.

use crate::files::{self, FsError};

use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Error messages and placeholders that end up used as titles.
pub const CORRUPTED_TITLES: [&str; 5] = [
    "OAuth token revoked",
    "Credit balance is too low",
    "Please run/login",
    "Login and exit commands",
    "Empty conversation",
];

const GREETINGS: [&str; 5] = [
    "Claude! ",
    "Claude, ",
    "Ehi Claude! ",
    "Ciao Claude! ",
    "Hey Claude! ",
];

const MAX_MESSAGE_CHARS: usize = 300;
const MAX_TITLE_CHARS: usize = 60;
const MIN_MESSAGE_CHARS: usize = 10;

/// Check if title is actually an error message.
pub fn is_corrupted_title(title: &str) -> bool {
    CORRUPTED_TITLES.iter().any(|corrupt| title.contains(corrupt))
}

/// Generate concise title from message text.
///
/// Greetings are stripped, then the first sentence is kept. Sentences longer
/// than 60 characters are cut and marked with `...`.
pub fn generate_title(message: &str) -> String {
    let mut text = message.trim();
    for greeting in GREETINGS {
        text = text.strip_prefix(greeting).unwrap_or(text);
    }

    let sentence = text.split('.').next().unwrap_or_default().trim();
    if sentence.chars().count() > MAX_TITLE_CHARS {
        let cut = sentence.chars().take(MAX_TITLE_CHARS).collect::<String>();
        format!("{}...", cut.trim())
    } else {
        sentence.to_string()
    }
}

/// Find first meaningful user message in a conversation file.
///
/// Lines that are not valid JSON are skipped. An unreadable file is logged
/// and treated as having no message.
pub fn extract_first_message(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("could not read {:?}: {err}", path.display());
            return None;
        }
    };

    content
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|record| record.get("type").and_then(Value::as_str) == Some("user"))
        .find_map(|record| user_text(&record))
}

fn user_text(record: &Value) -> Option<String> {
    let content = record.get("message")?.get("content")?;
    match content {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .find(|text| {
                !text.starts_with("<ide_")
                    && !text.starts_with("<system")
                    && !text.starts_with("Caveat:")
                    && text.trim().chars().count() > MIN_MESSAGE_CHARS
            })
            .map(truncate_message),
        Value::String(text) => {
            let meaningful =
                !text.starts_with('<') && text.trim().chars().count() > MIN_MESSAGE_CHARS;
            meaningful.then(|| truncate_message(text))
        }
        _ => None,
    }
}

fn truncate_message(text: &str) -> String {
    text.trim().chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Planned title replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleUpdate {
    pub session_id: String,
    pub old: String,
    pub new: String,

    /// Start of the message the new title came from.
    pub preview: String,
}

/// Why a corrupted title could not be fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FileNotFound,
    NoValidMessage,
}

impl Display for SkipReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::FileNotFound => fmt.write_str("file not found"),
            Self::NoValidMessage => fmt.write_str("no valid message"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSkip {
    pub session_id: String,
    pub old: String,
    pub reason: SkipReason,
}

/// Title repairs found by a scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TitlePlan {
    pub updates: Vec<TitleUpdate>,
    pub skips: Vec<TitleSkip>,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,

    #[serde(default)]
    display: String,

    #[serde(default)]
    project: String,
}

/// Claude Code data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeDir {
    root: PathBuf,
}

impl ClaudeDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// Locate conversation file of session in project.
    ///
    /// Claude Code mangles the project path into a directory name. Several
    /// manglings are tried, and the first one holding `<session>.jsonl` wins.
    pub fn find_conversation_file(&self, session_id: &str, project: &str) -> Option<PathBuf> {
        if project.is_empty() {
            return None;
        }

        let dashed = project.replace('/', "-");
        let stripped = dashed.strip_prefix('-').unwrap_or(&dashed).to_string();
        let candidates = [
            stripped.clone(),
            format!("-{stripped}"),
            project
                .chars()
                .map(|ch| if ch.is_alphanumeric() { ch } else { '-' })
                .collect::<String>(),
        ];

        let projects = self.projects_dir();
        candidates
            .iter()
            .map(|name| projects.join(name).join(format!("{session_id}.jsonl")))
            .find(|file| file.is_file())
    }

    /// Find corrupted titles and plan their replacement.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Read`] if history file cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn scan(&self) -> Result<TitlePlan> {
        let history = self.history_file();
        info!("reading history from {:?}", history.display());
        let content = fs::read_to_string(&history).map_err(|err| HistoryError::Read {
            source: err,
            path: history.clone(),
        })?;

        let mut plan = TitlePlan::default();
        for line in content.lines() {
            let Ok(record) = serde_json::from_str::<HistoryRecord>(line) else {
                continue;
            };

            let Some(session_id) = record.session_id.filter(|id| !id.is_empty()) else {
                continue;
            };
            if !is_corrupted_title(&record.display) {
                continue;
            }

            let skip = |reason| TitleSkip {
                session_id: session_id.clone(),
                old: record.display.clone(),
                reason,
            };

            let Some(conversation) = self.find_conversation_file(&session_id, &record.project)
            else {
                debug!("no conversation file for session {session_id}");
                plan.skips.push(skip(SkipReason::FileNotFound));
                continue;
            };

            let Some(message) = extract_first_message(&conversation) else {
                debug!("no usable message in {:?}", conversation.display());
                plan.skips.push(skip(SkipReason::NoValidMessage));
                continue;
            };

            plan.updates.push(TitleUpdate {
                new: generate_title(&message),
                preview: message.chars().take(100).collect(),
                old: record.display,
                session_id,
            });
        }

        Ok(plan)
    }

    /// Rewrite history file with new titles.
    ///
    /// Every record of an updated session gets its `display` replaced. Key
    /// order is kept, and lines that are not valid JSON are copied verbatim.
    /// Returns number of records changed.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Read`] if history file cannot be read.
    /// - Return [`HistoryError::Json`] if a record cannot be serialized.
    /// - Return [`HistoryError::Fs`] if history file cannot be written.
    #[instrument(skip(self, plan), level = "debug")]
    pub fn apply(&self, plan: &TitlePlan) -> Result<usize> {
        if plan.updates.is_empty() {
            return Ok(0);
        }

        let titles = plan
            .updates
            .iter()
            .map(|update| (update.session_id.as_str(), update.new.as_str()))
            .collect::<HashMap<_, _>>();

        let history = self.history_file();
        let content = fs::read_to_string(&history).map_err(|err| HistoryError::Read {
            source: err,
            path: history.clone(),
        })?;

        let mut rewritten = String::with_capacity(content.len());
        let mut updated = 0;
        for line in content.split_inclusive('\n') {
            let Ok(mut record) = serde_json::from_str::<Value>(line) else {
                rewritten.push_str(line);
                continue;
            };

            let title = record
                .get("sessionId")
                .and_then(Value::as_str)
                .and_then(|id| titles.get(id).copied());

            match (title, record.as_object_mut()) {
                (Some(title), Some(object)) => {
                    object.insert("display".into(), title.into());
                    updated += 1;
                    rewritten.push_str(&serde_json::to_string(&record)?);
                    rewritten.push('\n');
                }
                _ => rewritten.push_str(line),
            }
        }

        files::write_atomic(&history, rewritten)?;
        info!("updated {updated} conversation titles in {:?}", history.display());

        Ok(updated)
    }
}

/// History title fixer error types.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// History file cannot be read.
    #[error("failed to read history file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Friendly result alias :3
pub type Result<T, E = HistoryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;
    use tempfile::TempDir;

    #[test_case("Hey Claude! Fix the build. Then test.", "Fix the build"; "greeting")]
    #[test_case("Claude, Ciao Claude! explain lifetimes", "explain lifetimes"; "greetings in order")]
    #[test_case(
        "Write a parser for the configuration format that supports comments and includes",
        "Write a parser for the configuration format that supports co...";
        "long sentence"
    )]
    #[test]
    fn title_generation(message: &str, expect: &str) {
        pretty_assertions::assert_eq!(generate_title(message), expect);
    }

    #[test]
    fn corrupted_titles_are_detected() {
        assert!(is_corrupted_title("API Error: OAuth token revoked · Please run /login"));
        assert!(!is_corrupted_title("Refactor the parser"));
    }

    fn claude_dir() -> anyhow::Result<(TempDir, ClaudeDir)> {
        let root = TempDir::new()?;
        let dir = ClaudeDir::new(root.path());

        let project = dir.projects_dir().join("-home-me-my-app");
        fs::create_dir_all(&project)?;
        fs::write(
            project.join("abc.jsonl"),
            indoc! {r#"
                not json
                {"type":"assistant","message":{"content":"Hello there friend"}}
                {"type":"user","message":{"content":[{"type":"text","text":"<ide_opened_file>x</ide_opened_file>"},{"type":"text","text":"Hey Claude! Port the tab bar to Rust. Keep colors."}]}}
            "#},
        )?;
        fs::write(
            project.join("def.jsonl"),
            r#"{"type":"user","message":{"content":"<command>short</command>"}}"#,
        )?;

        fs::write(
            dir.history_file(),
            indoc! {r#"
                {"display":"OAuth token revoked","pastedContents":{},"timestamp":1,"project":"/home/me/my.app","sessionId":"abc"}
                {"display":"Credit balance is too low","project":"/home/me/my.app","sessionId":"def"}
                {"display":"Empty conversation","project":"/elsewhere","sessionId":"ghi"}
                {"display":"Fine title","project":"/home/me/my.app","sessionId":"jkl"}
                garbage
            "#},
        )?;

        Ok((root, dir))
    }

    #[test]
    fn find_conversation_file_tries_manglings() -> anyhow::Result<()> {
        let (_root, dir) = claude_dir()?;
        pretty_assertions::assert_eq!(
            dir.find_conversation_file("abc", "/home/me/my.app"),
            Some(dir.projects_dir().join("-home-me-my-app/abc.jsonl"))
        );
        pretty_assertions::assert_eq!(dir.find_conversation_file("abc", ""), None);

        Ok(())
    }

    #[test]
    fn scan_plans_updates_and_skips() -> anyhow::Result<()> {
        let (_root, dir) = claude_dir()?;
        let plan = dir.scan()?;

        pretty_assertions::assert_eq!(
            plan.updates,
            vec![TitleUpdate {
                session_id: "abc".into(),
                old: "OAuth token revoked".into(),
                new: "Port the tab bar to Rust".into(),
                preview: "Hey Claude! Port the tab bar to Rust. Keep colors.".into(),
            }]
        );
        pretty_assertions::assert_eq!(
            plan.skips
                .iter()
                .map(|skip| (skip.session_id.as_str(), skip.reason))
                .collect::<Vec<_>>(),
            vec![
                ("def", SkipReason::NoValidMessage),
                ("ghi", SkipReason::FileNotFound)
            ]
        );

        Ok(())
    }

    #[test]
    fn apply_rewrites_display_and_keeps_order() -> anyhow::Result<()> {
        let (_root, dir) = claude_dir()?;
        let plan = dir.scan()?;

        pretty_assertions::assert_eq!(dir.apply(&plan)?, 1);

        let history = fs::read_to_string(dir.history_file())?;
        let lines = history.lines().collect::<Vec<_>>();
        pretty_assertions::assert_eq!(
            lines[0],
            r#"{"display":"Port the tab bar to Rust","pastedContents":{},"timestamp":1,"project":"/home/me/my.app","sessionId":"abc"}"#
        );
        pretty_assertions::assert_eq!(
            lines[1],
            r#"{"display":"Credit balance is too low","project":"/home/me/my.app","sessionId":"def"}"#
        );
        pretty_assertions::assert_eq!(lines[4], "garbage");

        Ok(())
    }
}
