//! Index command implementation.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::cli::context::{AppContext, confirm};
use crate::cli::output::{IndexStats, get_formatter};
use crate::error::IngestionError;
use crate::models::{ChunkingStrategy, Config, Document, OutputFormat, Source};
use crate::sources::LocalSource;

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// Add files or directories to the index
    Add {
        /// Path to directory or file to index
        #[arg(required = true)]
        path: PathBuf,

        /// Target collection
        #[arg(long, short = 'c')]
        collection: Option<String>,

        /// Chunking strategy: lexical, semantic or hybrid
        #[arg(long, short = 's')]
        strategy: Option<ChunkingStrategy>,

        /// File patterns to exclude (can be specified multiple times)
        #[arg(long, short = 'e')]
        exclude: Vec<String>,

        /// Show what would be indexed without actually indexing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete indexed documents by path
    Delete {
        /// Path to file or directory to remove from the index
        #[arg(required = true)]
        path: PathBuf,

        #[arg(long, short = 'c')]
        collection: Option<String>,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },

    /// Drop a whole collection
    Clear {
        #[arg(long, short = 'c')]
        collection: Option<String>,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },
}

pub async fn handle_index(cmd: IndexCommand, format: OutputFormat, verbose: bool) -> Result<()> {
    match cmd {
        IndexCommand::Add {
            path,
            collection,
            strategy,
            exclude,
            dry_run,
        } => handle_add(path, collection, strategy, exclude, dry_run, format, verbose).await,
        IndexCommand::Delete {
            path,
            collection,
            force,
        } => handle_delete(path, collection, force, format).await,
        IndexCommand::Clear { collection, force } => handle_clear(collection, force, format).await,
    }
}

async fn handle_add(
    path: PathBuf,
    collection: Option<String>,
    strategy: Option<ChunkingStrategy>,
    exclude: Vec<String>,
    dry_run: bool,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let mut config = Config::load()?.config;
    if let Some(strategy) = strategy {
        config.chunking.strategy = strategy;
    }
    let collection = collection.unwrap_or_else(|| config.vector_store.collection.clone());
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let path = path.canonicalize().context("invalid path")?;
    let patterns: Vec<String> = config
        .chunking
        .exclude_patterns
        .iter()
        .chain(&exclude)
        .cloned()
        .collect();
    let source = LocalSource::new(&path, &patterns, config.chunking.max_file_size)?;
    let files = source.collect_files()?;

    if files.is_empty() {
        print!("{}", formatter.format_message("No files found to index."));
        return Ok(());
    }

    if verbose {
        eprintln!("Found {} files to process", files.len());
    }

    if dry_run {
        print!(
            "{}",
            formatter.format_message(&format!(
                "Dry run: would index {} files into '{collection}' ({})",
                files.len(),
                config.chunking.strategy
            ))
        );
        for file in &files {
            println!("  {}", file.display());
        }
        return Ok(());
    }

    let ctx = AppContext::open(config, &collection).await?;
    let ingestor = ctx.ingestor();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut stats = IndexStats {
        collection: collection.clone(),
        files_scanned: files.len() as u64,
        ..Default::default()
    };

    for file in &files {
        pb.inc(1);

        let document = match source.read_document(file) {
            Ok(doc) if doc.text.trim().is_empty() => continue,
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "skipping unreadable file");
                stats.files_failed += 1;
                continue;
            }
        };

        match ingestor.ingest(&collection, &document).await {
            Ok(report) if report.skipped => stats.files_unchanged += 1,
            Ok(report) => {
                stats.files_indexed += 1;
                stats.chunks_created += report.chunks as u64;
                stats.fallback_chunks += report.fallback_chunks as u64;
            }
            Err(e) => {
                // Backend and dimension errors abort the run.
                if matches!(
                    e,
                    IngestionError::BackendUnavailable(_) | IngestionError::DimensionMismatch { .. }
                ) {
                    pb.finish_and_clear();
                    ctx.persist(&collection).await?;
                    return Err(e).with_context(|| format!("failed to index {}", file.display()));
                }
                if verbose {
                    pb.println(format!("Skipping {}: {e}", file.display()));
                }
                stats.files_failed += 1;
            }
        }
    }

    pb.finish_and_clear();
    ctx.persist(&collection).await?;
    stats.duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_index_stats(&stats));

    Ok(())
}

async fn handle_delete(
    path: PathBuf,
    collection: Option<String>,
    force: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = Config::load()?.config;
    let collection = collection.unwrap_or_else(|| config.vector_store.collection.clone());
    let formatter = get_formatter(format);

    let path = path.canonicalize().context("invalid path")?;
    let source = LocalSource::new(&path, &[], u64::MAX)?;
    let files = source.collect_files()?;
    if files.is_empty() {
        print!("{}", formatter.format_message("No documents to delete."));
        return Ok(());
    }

    if !force
        && !confirm(&format!(
            "This will remove {} document(s) under '{}' from '{collection}'. Continue?",
            files.len(),
            path.display()
        ))?
    {
        print!("{}", formatter.format_message("Cancelled."));
        return Ok(());
    }

    let ctx = AppContext::open(config, &collection).await?;
    let ingestor = ctx.ingestor();
    let mut removed = 0;
    for file in &files {
        let id = Document::generate_id(&Source::text(file.to_string_lossy()));
        removed += ingestor.delete_document(&collection, &id).await?;
    }
    ctx.persist(&collection).await?;

    print!(
        "{}",
        formatter.format_message(&format!(
            "Deleted {} document(s), {removed} lexical chunk(s) from '{collection}'",
            files.len()
        ))
    );
    Ok(())
}

async fn handle_clear(collection: Option<String>, force: bool, format: OutputFormat) -> Result<()> {
    let config = Config::load()?.config;
    let collection = collection.unwrap_or_else(|| config.vector_store.collection.clone());
    let formatter = get_formatter(format);

    if !force && !confirm(&format!("This will drop collection '{collection}'. Continue?"))? {
        print!("{}", formatter.format_message("Cancelled."));
        return Ok(());
    }

    let ctx = AppContext::open(config, &collection).await?;
    ctx.ingestor().drop_collection(&collection).await?;
    ctx.persist(&collection).await?;

    print!(
        "{}",
        formatter.format_message(&format!("Collection '{collection}' has been cleared."))
    );
    Ok(())
}
