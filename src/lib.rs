// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Personal dotfile and Markdown maintenance toolkit.
//!
//! Dotkit gathers a set of small, independent tools behind one library and
//! one `dotkit` binary:
//!
//! - [`layout`] converts dotfiles between the GNU Stow layout and a flat
//!   per-program layout.
//! - [`dirsize`] reports the largest entries of a directory, page by page.
//! - [`fnm`] sweeps stale Fast Node Manager multishell symlinks.
//! - [`hashes`] keeps a SHA-256 manifest of Markdown files.
//! - [`markdown`] normalizes Hugo frontmatter, rewrites Obsidian image
//!   embeds, and fixes math delimiters.
//! - [`history`] repairs corrupted Claude Code conversation titles.
//!
//! The tools share nothing but the ambient plumbing: [`config`], [`path`],
//! [`files`], and [`progress`].

pub mod config;
pub mod dirsize;
pub mod files;
pub mod fnm;
pub mod hashes;
pub mod history;
pub mod layout;
pub mod markdown;
pub mod path;
pub mod progress;
