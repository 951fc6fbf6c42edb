// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotkit::{
    config::Config,
    dirsize::{self, InquirePager, NushellRenderer, TextRenderer},
    fnm::StaleLinkSweeper,
    hashes::{self, HashManifest, DEFAULT_MANIFEST},
    history::ClaudeDir,
    layout::{
        flatten::{FlattenOptions, Flattener},
        stow::StowBuilder,
        FixedAnswer, InquirePrompt, LayoutReport,
    },
    markdown::{
        frontmatter::FrontmatterProcessor,
        images::{BlogDirs, ImageProcessor},
        math::{self, BatchOptions, BatchReport, FixOptions, MathConverter},
    },
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glob::Pattern;
use std::{
    env,
    io::{stdout, Write},
    path::PathBuf,
    process::exit,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotkit [options] <dotkit-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Use this configuration file instead of the default one.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        // INVARIANT: Only commands that read configuration may fail on it.
        let load = || Config::load(self.config.as_deref());
        match self.command {
            Command::Flatten(opts) => run_flatten(opts),
            Command::Stow(opts) => run_stow(opts, &load()?),
            Command::Dirsize(opts) => run_dirsize(opts, &load()?).await,
            Command::FnmCleanup(opts) => run_fnm_cleanup(opts, &load()?),
            Command::Hashes(opts) => run_hashes(opts),
            Command::Frontmatter(opts) => run_frontmatter(opts, &load()?),
            Command::Images(opts) => run_images(opts, &load()?),
            Command::Math(opts) => run_math(opts),
            Command::Titles(opts) => run_titles(opts, &load()?),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Convert stow layout into flat per-program layout.
    #[command(override_usage = "dotkit flatten [options] <source> <destination>")]
    Flatten(FlattenCliOptions),

    /// Create stow packages from a flat config directory.
    #[command(override_usage = "dotkit stow [options]")]
    Stow(StowOptions),

    /// Show largest entries of a directory.
    #[command(override_usage = "dotkit dirsize [options] [<directory>]")]
    Dirsize(DirsizeOptions),

    /// Remove stale FNM multishell symlinks.
    #[command(override_usage = "dotkit fnm-cleanup [options]")]
    FnmCleanup(FnmCleanupOptions),

    /// Refresh SHA-256 manifest of Markdown files.
    #[command(override_usage = "dotkit hashes [options] <directory>")]
    Hashes(HashesOptions),

    /// Normalize Hugo frontmatter of Markdown posts.
    #[command(override_usage = "dotkit frontmatter [options] <directory> [<hash_file>]")]
    Frontmatter(FrontmatterOptions),

    /// Turn Obsidian image embeds into Hugo image links.
    #[command(override_usage = "dotkit images [options]")]
    Images(ImagesOptions),

    /// Convert LaTeX-style math into KaTeX-friendly Markdown.
    #[command(override_usage = "dotkit math <fix|batch> [options] <path>")]
    Math(MathOptions),

    /// Repair corrupted Claude Code conversation titles.
    #[command(override_usage = "dotkit titles [options]")]
    Titles(TitlesOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FlattenCliOptions {
    /// Stow tree to read packages from.
    #[arg(required = true, value_name = "source")]
    pub source: PathBuf,

    /// Directory to write flat packages into.
    #[arg(required = true, value_name = "destination")]
    pub destination: PathBuf,

    /// Overwrite packages that already exist in destination.
    #[arg(short, long)]
    pub force: bool,

    /// Show what would be done without copying anything.
    #[arg(short, long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StowOptions {
    /// Directory whose subdirectories become stow packages.
    #[arg(short, long, value_name = "dir")]
    pub source: Option<PathBuf>,

    /// Directory to create stow packages in, current directory by default.
    #[arg(short, long, value_name = "dir")]
    pub target: Option<PathBuf>,

    /// Show what would be done without creating anything.
    #[arg(short, long)]
    pub dry_run: bool,

    /// Overwrite existing packages without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DirsizeOptions {
    /// Directory to inspect.
    #[arg(default_value = ".", value_name = "directory")]
    pub directory: PathBuf,

    /// Number of entries per page.
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,

    /// Include regular files, not just directories.
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FnmCleanupOptions {
    /// Show stale links without removing them.
    #[arg(short, long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct HashesOptions {
    /// Directory holding Markdown files.
    #[arg(required = true, value_name = "directory")]
    pub directory: PathBuf,

    /// Manifest file to refresh.
    #[arg(short, long, default_value = DEFAULT_MANIFEST, value_name = "file")]
    pub manifest: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct FrontmatterOptions {
    /// Directory holding Markdown posts.
    #[arg(required = true, value_name = "directory")]
    pub directory: PathBuf,

    /// Hash manifest used to skip unchanged posts.
    #[arg(value_name = "hash_file")]
    pub hash_file: Option<PathBuf>,

    /// Only process posts Git reports as new or modified.
    #[arg(short, long)]
    pub git_changed: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ImagesOptions {
    /// Show what would be done without copying or writing.
    #[arg(short, long)]
    pub dry_run: bool,

    /// Remove static images that no post links to.
    #[arg(short, long)]
    pub prune_orphans: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MathOptions {
    #[command(subcommand)]
    pub command: MathCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum MathCommand {
    /// Convert a single Markdown file.
    #[command(override_usage = "dotkit math fix [options] <file>")]
    Fix(MathFixOptions),

    /// Convert every matching file under a directory.
    #[command(override_usage = "dotkit math batch [options] <dir>")]
    Batch(MathBatchOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MathFixOptions {
    /// Markdown file to convert.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,

    /// Show conversion stats without modifying the file.
    #[arg(long)]
    pub dry_run: bool,

    /// Copy original to `<file>.bak` before writing.
    #[arg(long)]
    pub backup: bool,

    /// Do not convert operator subscripts such as `min_i`.
    #[arg(long)]
    pub no_operator_subscripts: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MathBatchOptions {
    /// Root directory holding Markdown files.
    #[arg(required = true, value_name = "dir")]
    pub directory: PathBuf,

    /// Only process files directly inside directory.
    #[arg(long)]
    pub no_recursive: bool,

    /// Glob matched against file names.
    #[arg(short, long, default_value = "*.md", value_name = "PATTERN")]
    pub pattern: String,

    /// Show what would change without writing files.
    #[arg(short, long)]
    pub dry_run: bool,

    /// Mirror originals into this directory before writing.
    #[arg(long, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Do not convert operator subscripts such as `min_i`.
    #[arg(long)]
    pub no_operator_subscripts: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TitlesOptions {
    /// Show planned title changes without modifying history.
    #[arg(short, long)]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn print_layout(report: &LayoutReport) -> Result<()> {
    let mut out = stdout().lock();
    for outcome in &report.outcomes {
        writeln!(out, "{:<24} {}", outcome.name, outcome.status)?;
    }

    if report.has_failures() {
        bail!("some packages could not be copied");
    }

    Ok(())
}

fn run_flatten(opts: FlattenCliOptions) -> Result<()> {
    let options = FlattenOptions {
        force: opts.force,
        dry_run: opts.dry_run,
    };
    let report = Flattener::new(opts.source, opts.destination, options)?.run()?;
    print_layout(&report)
}

fn run_stow(opts: StowOptions, config: &Config) -> Result<()> {
    let source = match opts.source {
        Some(source) => source,
        None => config.stow()?.source.to_path_buf(),
    };
    let target = match opts.target {
        Some(target) => target,
        None => env::current_dir().context("cannot determine current directory")?,
    };

    let builder = StowBuilder::new(source, target)?
        .exclude(config.stow.exclude.iter().cloned())
        .dry_run(opts.dry_run);
    let report = if opts.yes {
        builder.run(&mut FixedAnswer(true))?
    } else {
        builder.run(&mut InquirePrompt)?
    };

    print_layout(&report)
}

async fn run_dirsize(opts: DirsizeOptions, config: &Config) -> Result<()> {
    let directory = opts
        .directory
        .canonicalize()
        .with_context(|| format!("directory {:?} does not exist", opts.directory.display()))?;
    let limit = opts.limit.unwrap_or(config.dirsize.page_size);

    let paths = dirsize::collect_entries(&directory, opts.all)?;
    let entries = dirsize::measure(paths, config.dirsize.concurrency).await;

    let mut renderer = NushellRenderer::detect(TextRenderer::new(stdout()));
    dirsize::paginate(
        &entries,
        limit,
        &mut renderer,
        &mut InquirePager,
        &mut stdout(),
    )?;

    Ok(())
}

fn run_fnm_cleanup(opts: FnmCleanupOptions, config: &Config) -> Result<()> {
    let fnm = config.fnm()?;
    let threshold = Duration::from_secs(fnm.stale_after_hours * 60 * 60);
    let report = StaleLinkSweeper::new(fnm.multishells_dir.to_path_buf())
        .threshold(threshold)
        .dry_run(opts.dry_run)
        .sweep()?;

    let verb = if opts.dry_run { "would remove" } else { "removed" };
    let mut out = stdout().lock();
    for link in &report.removed {
        writeln!(out, "{verb}: {}", link.display())?;
    }
    writeln!(
        out,
        "{} stale, {} kept, {} failed",
        report.removed.len(),
        report.kept.len(),
        report.failed.len()
    )?;

    Ok(())
}

fn run_hashes(opts: HashesOptions) -> Result<()> {
    let diff = hashes::update(&opts.manifest, &opts.directory)?;

    let mut out = stdout().lock();
    for (label, paths) in [
        ("added", &diff.added),
        ("modified", &diff.modified),
        ("removed", &diff.removed),
    ] {
        for path in paths {
            writeln!(out, "{label:<9} {}", path.display())?;
        }
    }
    writeln!(
        out,
        "{} added, {} modified, {} removed, {} unchanged",
        diff.added.len(),
        diff.modified.len(),
        diff.removed.len(),
        diff.unchanged.len()
    )?;

    Ok(())
}

fn run_frontmatter(opts: FrontmatterOptions, config: &Config) -> Result<()> {
    let mut processor = FrontmatterProcessor::new(config.backup_dir()?.join("frontmatter"))
        .git_changed(opts.git_changed);
    if let Some(hash_file) = opts.hash_file {
        if hash_file.exists() {
            let hashes = HashManifest::load(&hash_file)?;
            info!("skipping posts unchanged since {:?}", hash_file.display());
            processor = processor.hashes(hashes);
        } else {
            warn!("hash file {:?} not found, processing all posts", hash_file.display());
        }
    }

    let report = processor.run(&opts.directory)?;

    let mut out = stdout().lock();
    writeln!(out, "=== Processing Summary ===")?;
    writeln!(out, "Successfully processed: {} files", report.processed.len())?;
    for path in &report.processed {
        writeln!(out, "  - {}", path.display())?;
    }
    if !report.is_success() {
        writeln!(out, "Failed to process: {} files", report.failed.len())?;
        for (path, reason) in &report.failed {
            writeln!(out, "  - {}: {reason}", path.display())?;
        }
        bail!(
            "processing completed with errors: {}/{} failed",
            report.failed.len(),
            report.total
        );
    }

    Ok(())
}

fn run_images(opts: ImagesOptions, config: &Config) -> Result<()> {
    let dirs = BlogDirs::from_settings(&config.blog()?)?;
    let processor =
        ImageProcessor::new(dirs, config.backup_dir()?.join("images")).dry_run(opts.dry_run);
    let report = processor.run()?;

    let mut out = stdout().lock();
    writeln!(out, "=== Image Processing Summary ===")?;
    writeln!(out, "Processed files: {}", report.processed.len())?;
    writeln!(out, "Copied images:   {}", report.copied.len())?;
    writeln!(out, "Missing images:  {}", report.missing.len())?;
    for name in &report.missing {
        writeln!(out, "  - {name}")?;
    }
    writeln!(out, "Failed files:    {}", report.failed.len())?;
    for (path, reason) in &report.failed {
        writeln!(out, "  - {}: {reason}", path.display())?;
    }
    writeln!(out, "Elapsed:         {:.2}s", report.elapsed.as_secs_f64())?;

    if opts.prune_orphans {
        let orphans = processor.prune_orphans()?;
        let verb = if opts.dry_run { "would remove" } else { "removed" };
        for orphan in &orphans {
            writeln!(out, "{verb} orphan: {}", orphan.display())?;
        }
    }

    if !report.is_success() {
        bail!("{} files failed to process", report.failed.len());
    }

    Ok(())
}

fn run_math(opts: MathOptions) -> Result<()> {
    match opts.command {
        MathCommand::Fix(opts) => run_math_fix(opts),
        MathCommand::Batch(opts) => run_math_batch(opts),
    }
}

fn run_math_fix(opts: MathFixOptions) -> Result<()> {
    let converter = MathConverter::new(!opts.no_operator_subscripts);
    let options = FixOptions {
        dry_run: opts.dry_run,
        backup: opts.backup,
    };
    let outcome = math::fix_file(&opts.file, &converter, options)?;
    let changed = outcome.conversion.changed();

    let mut out = stdout().lock();
    writeln!(out, "{}", "=".repeat(64))?;
    writeln!(out, "File: {}", outcome.file.display())?;
    writeln!(out, "Changed: {}", if changed { "yes" } else { "no" })?;
    writeln!(out, "{}", outcome.conversion.stats)?;
    writeln!(out, "{}", "=".repeat(64))?;

    if !changed {
        writeln!(out, "No changes needed.")?;
    } else if !outcome.written {
        writeln!(out, "[DRY-RUN] No file was modified.")?;
    } else {
        if let Some(backup) = &outcome.backup {
            writeln!(out, "Backup written to: {}", backup.display())?;
        }
        writeln!(out, "Updated: {}", outcome.file.display())?;
    }

    Ok(())
}

fn run_math_batch(opts: MathBatchOptions) -> Result<()> {
    let converter = MathConverter::new(!opts.no_operator_subscripts);
    let options = BatchOptions {
        recursive: !opts.no_recursive,
        pattern: Pattern::new(&opts.pattern)
            .with_context(|| format!("invalid pattern {:?}", opts.pattern))?,
        dry_run: opts.dry_run,
        backup_dir: opts.backup_dir,
    };
    let report = math::batch(&opts.directory, &converter, &options)?;
    print_batch(&report)?;

    if report.has_errors() {
        bail!("math conversion finished with errors");
    }

    Ok(())
}

fn print_batch(report: &BatchReport) -> Result<()> {
    let changed = report.changed().collect::<Vec<_>>();
    let errors = report.errors().collect::<Vec<_>>();

    let mut out = stdout().lock();
    writeln!(out, "{}", "=".repeat(72))?;
    writeln!(out, "BATCH MATH CONVERSION REPORT")?;
    writeln!(out, "{}", "=".repeat(72))?;
    writeln!(out, "Directory:   {}", report.directory.display())?;
    writeln!(out, "Mode:        {}", if report.dry_run { "dry-run" } else { "write" })?;
    writeln!(out, "Files seen:  {}", report.results.len())?;
    writeln!(out, "Modified:    {}", changed.len())?;
    writeln!(out, "Unchanged:   {}", report.unchanged())?;
    writeln!(out, "Errors:      {}", errors.len())?;
    writeln!(out, "{}", "-".repeat(72))?;
    writeln!(out, "{}", report.aggregate)?;
    writeln!(out, "{}", "=".repeat(72))?;

    if !changed.is_empty() {
        writeln!(out, "\nChanged files:")?;
        let marker = if report.dry_run { "would modify" } else { "modified" };
        for result in changed {
            writeln!(
                out,
                "  - {} ({} conversions, {marker})",
                result.file.display(),
                result.changes
            )?;
        }
    }

    if !errors.is_empty() {
        writeln!(out, "\nErrors:")?;
        for result in errors {
            if let math::FileStatus::Error(reason) = &result.status {
                writeln!(out, "  - {}: {reason}", result.file.display())?;
            }
        }
    }

    Ok(())
}

fn run_titles(opts: TitlesOptions, config: &Config) -> Result<()> {
    let claude = ClaudeDir::new(config.history()?.claude_dir.to_path_buf());
    if !claude.history_file().exists() {
        bail!(
            "history file not found at {:?}",
            claude.history_file().display()
        );
    }

    let plan = claude.scan()?;
    let mut out = stdout().lock();
    if opts.dry_run {
        writeln!(out, "DRY RUN MODE - No files will be modified")?;
        for skip in &plan.skips {
            writeln!(out, "\n[SKIP] {}... - {}", short_id(&skip.session_id), skip.reason)?;
            writeln!(out, "  Old: {}", skip.old)?;
        }
    }

    for update in &plan.updates {
        if opts.dry_run {
            writeln!(out, "\n[UPDATE] {}...", short_id(&update.session_id))?;
            writeln!(out, "  Old: {}", update.old)?;
            writeln!(out, "  New: {}", update.new)?;
            writeln!(out, "  Preview: {}", update.preview)?;
        } else {
            writeln!(out, "✓ {}...: '{}'", short_id(&update.session_id), update.new)?;
        }
    }

    if !opts.dry_run {
        let updated = claude.apply(&plan)?;
        writeln!(out, "\nUpdated {updated} conversation titles in history file")?;
    }

    let verb = if opts.dry_run { "Would process" } else { "Processed" };
    writeln!(out, "\n{verb}: {} conversations", plan.updates.len())?;
    if !plan.skips.is_empty() {
        writeln!(
            out,
            "Skipped: {} conversations (file not found or no valid message)",
            plan.skips.len()
        )?;
    }

    Ok(())
}

fn short_id(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}
