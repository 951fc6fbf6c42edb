// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Markdown maintenance for a Hugo blog written in Obsidian.
//!
//! - [`frontmatter`] normalizes the YAML metadata block Hugo expects.
//! - [`images`] turns Obsidian image embeds into Hugo static image links.
//! - [`math`] rewrites LaTeX-style delimiters into KaTeX-friendly `$` math.

pub mod frontmatter;
pub mod images;
pub mod math;
