pub mod commands;
pub mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::SortOrder;
use crate::cache::ArchiveCache;
use crate::config::CacheConfig;
use crate::documents::ArchiveDocuments;
use crate::providers::{ContainerProvider, FsProvider};

/// Browse zip containers under a directory as a document tree
#[derive(Debug, Parser)]
#[command(name = "zipdocs", version, about)]
pub struct Cli {
    /// Directory holding the containers
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Maximum number of archives kept open
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Bytes per extraction chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Concurrent extractions per archive
    #[arg(long)]
    pub workers: Option<usize>,

    /// Copy containers to temporary storage instead of reading them in place
    #[arg(long)]
    pub streaming: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// List the children of a directory document, e.g. `photos.zip#2019/`
    Ls {
        document: String,
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
        /// Sort rows, e.g. `size:desc` or `display_name`
        #[arg(long)]
        sort: Option<SortOrder>,
    },
    /// Describe a single document
    Stat {
        document: String,
        #[arg(long)]
        json: bool,
    },
    /// Write a file document's content to stdout
    Cat { document: String },
    /// Extract an image's embedded thumbnail (or the full image)
    Thumb {
        document: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Requested size, e.g. `256x256`
        #[arg(long, value_parser = parse_size_hint)]
        size: Option<(u32, u32)>,
    },
}

impl Cli {
    pub fn config(&self) -> CacheConfig {
        let mut config = CacheConfig::from_env();
        if let Some(capacity) = self.capacity {
            config = config.with_capacity(capacity);
        }
        if let Some(chunk_size) = self.chunk_size {
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers_per_archive(workers);
        }
        config
    }

    pub async fn run(self) -> Result<()> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot open root directory {}", self.root.display()))?;
        let provider: Arc<dyn ContainerProvider> = if self.streaming {
            Arc::new(FsProvider::streaming(root))
        } else {
            Arc::new(FsProvider::new(root))
        };
        let documents = ArchiveDocuments::new(ArchiveCache::new(provider, self.config()));

        let result = match &self.command {
            CliCommand::Ls {
                document,
                json,
                sort,
            } => commands::ls::run(&documents, document, *json, *sort).await,
            CliCommand::Stat { document, json } => {
                commands::stat::run(&documents, document, *json).await
            }
            CliCommand::Cat { document } => commands::cat::run(&documents, document).await,
            CliCommand::Thumb {
                document,
                output,
                size,
            } => commands::thumb::run(&documents, document, output.as_deref(), *size).await,
        };

        documents.close().await.context("closing archives")?;
        match result {
            Err(err) if output::is_broken_pipe(&err) => Ok(()),
            other => other,
        }
    }
}

fn parse_size_hint(raw: &str) -> std::result::Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid dimension {value:?}: {e}"))
    };
    Ok((parse(width)?, parse(height)?))
}
