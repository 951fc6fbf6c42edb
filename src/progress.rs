// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Progress reporting for batch operations.

use indicatif::{style::TemplateError, ProgressBar, ProgressStyle};

/// Construct progress bar for `len` units of work.
///
/// Progress bar draws to stderr, and hides itself when stderr is not a
/// terminal.
///
/// # Errors
///
/// - Return [`TemplateError`] if style template is invalid.
pub fn bar(len: usize, message: impl Into<String>) -> Result<ProgressBar, TemplateError> {
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    )?
    .progress_chars("-Cco.");

    let bar = ProgressBar::new(len as u64);
    bar.set_style(style);
    bar.set_message(message.into());

    Ok(bar)
}
