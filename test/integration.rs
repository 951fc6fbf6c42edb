// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use dotkit::{
    hashes::{self, HashManifest},
    history::ClaudeDir,
    layout::{
        flatten::{FlattenOptions, Flattener},
        stow::StowBuilder,
        FixedAnswer, PackageStatus,
    },
    markdown::{
        frontmatter::FrontmatterProcessor,
        images::{BlogDirs, ImageProcessor},
        math::{self, BatchOptions, FileStatus, MathConverter},
    },
};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

#[test]
fn stow_then_flatten_restores_flat_layout() -> Result<()> {
    let root = TempDir::new()?;
    let flat = root.path().join("config");
    let stowed = root.path().join("dotfiles");
    let restored = root.path().join("restored");
    fs::create_dir_all(flat.join("nvim/lua"))?;
    fs::create_dir_all(flat.join("kitty"))?;
    fs::create_dir_all(flat.join("gcloud"))?;
    fs::write(flat.join("nvim/init.lua"), "require('core')")?;
    fs::write(flat.join("nvim/lua/core.lua"), "return {}")?;
    fs::write(flat.join("kitty/kitty.conf"), "font_size 12")?;
    fs::write(flat.join("gcloud/credentials"), "secret")?;

    let report = StowBuilder::new(&flat, &stowed)?
        .exclude(["gcloud"])
        .run(&mut FixedAnswer(false))?;
    assert_eq!(
        report.get("gcloud").map(|outcome| &outcome.status),
        Some(&PackageStatus::Excluded)
    );
    assert!(stowed.join("nvim/.config/nvim/lua/core.lua").is_file());
    assert!(!stowed.join("gcloud").exists());

    let options = FlattenOptions {
        force: false,
        dry_run: false,
    };
    let report = Flattener::new(&stowed, &restored, options)?.run()?;
    assert!(!report.has_failures());
    assert_eq!(
        report.get("nvim").map(|outcome| &outcome.status),
        Some(&PackageStatus::Copied { files: 2 })
    );
    assert_eq!(
        fs::read_to_string(restored.join("nvim/init.lua"))?,
        "require('core')"
    );
    assert_eq!(
        fs::read_to_string(restored.join("kitty/kitty.conf"))?,
        "font_size 12"
    );

    // INVARIANT: Existing packages are left alone without force.
    let report = Flattener::new(&stowed, &restored, options)?.run()?;
    assert_eq!(
        report.get("kitty").map(|outcome| &outcome.status),
        Some(&PackageStatus::Conflict)
    );

    Ok(())
}

#[test]
fn frontmatter_only_touches_git_changed_posts() -> Result<()> {
    let repo_dir = TempDir::new()?;
    let backups = TempDir::new()?;
    let repo = RepoFixture::new(repo_dir.path())?;
    repo.write_and_commit("posts/stable.md", "No frontmatter, but committed.\n")?;
    repo.write_and_commit("posts/edited.md", "Before edit.\n")?;
    repo.write("posts/edited.md", "After edit.\n")?;
    repo.write("posts/brand-new.md", "Fresh post.\n")?;

    let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let report = FrontmatterProcessor::new(backups.path())
        .git_changed(true)
        .now(now)
        .run(repo_dir.path().join("posts"))?;

    let posts = repo_dir.path().join("posts").canonicalize()?;
    let mut processed = report.processed.clone();
    processed.sort();
    assert_eq!(
        processed,
        vec![posts.join("brand-new.md"), posts.join("edited.md")]
    );
    assert!(report.is_success());

    let created = fs::read_to_string(posts.join("brand-new.md"))?;
    assert!(created.starts_with("---\ntitle: Brand New\n"));
    assert!(created.contains("2025-03-01T12:00:00Z"));
    assert!(created.contains("categories:\n- Uncategorized\n"));
    assert!(created.ends_with("---\nFresh post.\n"));
    assert_eq!(
        fs::read_to_string(posts.join("stable.md"))?,
        "No frontmatter, but committed.\n"
    );

    Ok(())
}

#[test]
fn frontmatter_skips_posts_recorded_in_manifest() -> Result<()> {
    let dir = TempDir::new()?;
    let backups = TempDir::new()?;
    let posts = dir.path().join("posts");
    let manifest = dir.path().join("hashes.txt");
    fs::create_dir_all(&posts)?;
    fs::write(posts.join("old.md"), "Old post.\n")?;

    let diff = hashes::update(&manifest, &posts)?;
    assert_eq!(diff.added.len(), 1);
    fs::write(posts.join("new.md"), "New post.\n")?;

    let report = FrontmatterProcessor::new(backups.path())
        .hashes(HashManifest::load(&manifest)?)
        .run(&posts)?;

    assert_eq!(report.processed, vec![posts.canonicalize()?.join("new.md")]);
    assert_eq!(fs::read_to_string(posts.join("old.md"))?, "Old post.\n");

    Ok(())
}

#[test]
fn images_copy_attachments_and_rewrite_posts() -> Result<()> {
    let root = TempDir::new()?;
    let dirs = BlogDirs {
        posts_dir: root.path().join("posts"),
        attachments_dir: root.path().join("attachments"),
        static_images_dir: root.path().join("static/images"),
    };
    fs::create_dir_all(&dirs.posts_dir)?;
    fs::create_dir_all(&dirs.attachments_dir)?;
    fs::create_dir_all(&dirs.static_images_dir)?;
    fs::write(dirs.attachments_dir.join("my diagram.png"), b"png")?;
    fs::write(dirs.static_images_dir.join("stale.png"), b"old")?;
    fs::write(
        dirs.posts_dir.join("post.md"),
        "Look: [[my diagram.png]] and [[gone.png]]\n",
    )?;
    fs::write(dirs.posts_dir.join("plain.md"), "No images here.\n")?;

    let processor = ImageProcessor::new(dirs.clone(), root.path().join("backup"));
    let report = processor.run()?;

    assert!(report.is_success());
    assert_eq!(report.processed, vec![dirs.posts_dir.join("post.md")]);
    assert_eq!(report.copied, vec!["my diagram.png".to_string()]);
    assert_eq!(report.missing, vec!["gone.png".to_string()]);
    assert!(dirs.static_images_dir.join("my diagram.png").is_file());
    assert_eq!(
        fs::read_to_string(dirs.posts_dir.join("post.md"))?,
        "Look: ![Image Description](/images/my%20diagram.png) and \
         ![Image Description - Missing: gone.png]\n"
    );

    let pruned = processor.prune_orphans()?;
    assert_eq!(pruned, vec![dirs.static_images_dir.join("stale.png")]);
    assert!(!dirs.static_images_dir.join("stale.png").exists());
    assert!(dirs.static_images_dir.join("my diagram.png").exists());

    Ok(())
}

#[test]
fn math_batch_converts_matching_files_with_backups() -> Result<()> {
    let notes = TempDir::new()?;
    let backups = TempDir::new()?;
    fs::create_dir_all(notes.path().join("nested"))?;
    fs::write(notes.path().join("a.md"), "Energy \\(E = mc^2\\) rocks.\n")?;
    fs::write(notes.path().join("nested/b.md"), "Nothing to do.\n")?;
    fs::write(notes.path().join("c.txt"), "\\(x\\)\n")?;

    let options = BatchOptions {
        backup_dir: Some(backups.path().to_path_buf()),
        ..Default::default()
    };
    let report = math::batch(notes.path(), &MathConverter::default(), &options)?;
    let root = notes.path().canonicalize()?;

    assert!(!report.has_errors());
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.unchanged(), 1);
    let changed = report.changed().collect::<Vec<_>>();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].file, root.join("a.md"));
    assert_eq!(changed[0].status, FileStatus::Modified);

    assert_eq!(
        fs::read_to_string(notes.path().join("a.md"))?,
        "Energy $E = mc^2$ rocks.\n"
    );
    assert_eq!(
        fs::read_to_string(backups.path().join("a.md"))?,
        "Energy \\(E = mc^2\\) rocks.\n"
    );
    assert_eq!(fs::read_to_string(notes.path().join("c.txt"))?, "\\(x\\)\n");

    Ok(())
}

#[test]
fn titles_are_repaired_from_conversation_files() -> Result<()> {
    let claude = TempDir::new()?;
    let project = claude.path().join("projects/home-me-code");
    fs::create_dir_all(&project)?;
    fs::write(
        project.join("abc12345-session.jsonl"),
        indoc! {r#"
            {"type":"summary","summary":"ignored"}
            {"type":"user","message":{"role":"user","content":"Help me refactor the config loader. It is slow."}}
        "#},
    )?;

    let history = indoc! {r#"
        {"display":"OAuth token revoked","sessionId":"abc12345-session","project":"/home/me/code"}
        {"display":"Keep me","sessionId":"def","project":"/home/me/code"}
        {"display":"Credit balance is too low","sessionId":"missing","project":"/home/me/other"}
        not json at all
    "#};
    fs::write(claude.path().join("history.jsonl"), history)?;

    let claude = ClaudeDir::new(claude.path());
    let plan = claude.scan()?;
    assert_eq!(plan.updates.len(), 1);
    assert_eq!(plan.updates[0].new, "Help me refactor the config loader");
    assert_eq!(plan.skips.len(), 1);
    assert_eq!(plan.skips[0].session_id, "missing");

    assert_eq!(claude.apply(&plan)?, 1);
    let rewritten = fs::read_to_string(claude.history_file())?;
    let expect = indoc! {r#"
        {"display":"Help me refactor the config loader","sessionId":"abc12345-session","project":"/home/me/code"}
        {"display":"Keep me","sessionId":"def","project":"/home/me/code"}
        {"display":"Credit balance is too low","sessionId":"missing","project":"/home/me/other"}
        not json at all
    "#};
    assert_eq!(rewritten, expect);

    Ok(())
}
