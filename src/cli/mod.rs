//! Command-line interface
//!
//! Two subcommands: `index` for a one-shot full index of a tree, and
//! `mcp` to launch the MCP server (stdio by default, HTTP with
//! `--http`). Exit codes: 0 success, 1 usage/config error, 2 runtime
//! failure.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;

use crate::config::{Config, Transport};
use crate::discovery::{discover_files, DiscoveryCache, FileFilter};
use crate::embed::{EmbeddingProvider, EmbeddingService};
use crate::indexer::{IndexCoordinator, ProcessStatus};
use crate::mcp::transports::{serve_http, serve_stdio};
use crate::mcp::McpServer;
use crate::parser::FileParser;
use crate::store::Store;

#[derive(Parser)]
#[command(
    name = "chunkhound",
    version,
    about = "Local-first code search for AI assistants over MCP"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (stderr)
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// One-shot full index of a source tree
    Index {
        /// Base directory (default: current directory)
        path: Option<PathBuf>,
        /// Skip embedding generation
        #[arg(long)]
        no_embeddings: bool,
    },
    /// Launch the MCP server
    Mcp {
        /// Base directory (default: current directory)
        path: Option<PathBuf>,
        /// Use the HTTP transport instead of stdio
        #[arg(long)]
        http: bool,
        /// HTTP bind host (loopback unless you know what you are doing)
        #[arg(long)]
        host: Option<String>,
        /// HTTP bind port
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Run the parsed CLI, mapping error classes to exit codes.
pub fn run_with(cli: Cli) -> i32 {
    let (path, runtime_main) = match cli.command {
        Command::Index {
            ref path,
            no_embeddings,
        } => (path.clone(), MainAction::Index { no_embeddings }),
        Command::Mcp {
            ref path,
            http,
            ref host,
            port,
        } => (
            path.clone(),
            MainAction::Mcp {
                http,
                host: host.clone(),
                port,
            },
        ),
    };

    let base_dir = match resolve_base_dir(path) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let mut config = match Config::load(&base_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return 2;
        }
    };

    let result = match runtime_main {
        MainAction::Index { no_embeddings } => {
            runtime.block_on(cmd_index(&config, &base_dir, no_embeddings))
        }
        MainAction::Mcp { http, host, port } => {
            if http {
                config.mcp.transport = Some("http".into());
            }
            if let Some(host) = host {
                config.mcp.host = Some(host);
            }
            if let Some(port) = port {
                config.mcp.port = Some(port);
            }
            runtime.block_on(cmd_mcp(config, base_dir))
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    }
}

enum MainAction {
    Index { no_embeddings: bool },
    Mcp {
        http: bool,
        host: Option<String>,
        port: Option<u16>,
    },
}

fn resolve_base_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    let raw = match path {
        Some(p) => p,
        None => std::env::current_dir().context("reading current directory")?,
    };
    dunce::canonicalize(&raw).with_context(|| format!("resolving {}", raw.display()))
}

async fn cmd_index(config: &Config, base_dir: &PathBuf, no_embeddings: bool) -> Result<()> {
    let started = Instant::now();
    let indexing = config.indexing();

    let store = Arc::new(Store::new(config.database_path(base_dir))?);
    store.connect().await?;

    let parser = Arc::new(FileParser::new());
    let coordinator = Arc::new(IndexCoordinator::new(
        Arc::clone(&store),
        parser,
        base_dir.clone(),
        indexing.db_batch_size,
    ));

    let filter = FileFilter::new(&indexing.include, &indexing.exclude)?;
    let base = base_dir.clone();
    let max_size = indexing.max_file_size;
    let files =
        tokio::task::spawn_blocking(move || discover_files(&base, &filter, max_size)).await?;

    // The discovery cache skips parsing files untouched since the last
    // run; an empty store means the cache is stale (e.g. deleted db)
    let mut cache = DiscoveryCache::load(base_dir);
    if store.get_stats().await?.files == 0 {
        cache.clear();
    }

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut indexed = 0usize;
    let mut skipped = 0usize;
    let mut fresh = 0usize;
    let mut chunks = 0usize;
    let mut seen = HashSet::new();

    // Bounded fan-out: parse runs on blocking threads inside
    // process_file, storage serializes through the gate
    type IndexOutcome = (String, i64, u64, Result<crate::indexer::ProcessSummary, crate::indexer::IndexError>);
    let mut join_set: JoinSet<IndexOutcome> = JoinSet::new();
    let mut pending = files.into_iter();
    loop {
        while join_set.len() < indexing.max_concurrent {
            let Some(file) = pending.next() else { break };
            let rel = file
                .path
                .strip_prefix(base_dir)
                .unwrap_or(&file.path)
                .to_string_lossy()
                .replace('\\', "/");
            seen.insert(rel.clone());
            if cache.is_fresh(&rel, file.mtime, file.size) {
                fresh += 1;
                progress.inc(1);
                continue;
            }
            let coordinator = Arc::clone(&coordinator);
            join_set.spawn(async move {
                let result = coordinator.process_file(&file.path).await;
                (rel, file.mtime, file.size, result)
            });
        }
        let Some(joined) = join_set.join_next().await else {
            break;
        };
        progress.inc(1);
        match joined {
            Ok((rel, mtime, size, Ok(summary))) => match summary.status {
                ProcessStatus::Indexed => {
                    indexed += 1;
                    chunks += summary.chunks;
                    cache.record(rel, mtime, size);
                }
                ProcessStatus::Skipped(_) => skipped += 1,
            },
            Ok((_, _, _, Err(e))) => {
                skipped += 1;
                tracing::warn!(error = %e, "Indexing failed for one file");
            }
            Err(e) => {
                skipped += 1;
                tracing::error!(error = %e, "Indexing task panicked");
            }
        }
    }
    progress.finish_and_clear();

    cache.retain_paths(&seen);
    if let Err(e) = cache.save(base_dir) {
        tracing::warn!(error = %e, "Failed to persist discovery cache");
    }

    let mut embedded = 0usize;
    if !no_embeddings {
        if let Some(settings) = config.embedding() {
            let provider = EmbeddingProvider::from_settings(&settings)
                .context("configuring embedding provider")?;
            let service = EmbeddingService::new(
                provider,
                Arc::clone(&store),
                settings.max_concurrent_batches,
                settings.max_retries,
            );
            let report = service
                .generate_missing(None)
                .await
                .context("generating embeddings")?;
            embedded = report.embedded;
            if report.skipped > 0 {
                eprintln!("warning: {} chunks left without embeddings", report.skipped);
            }
        }
    }

    let stats = store.get_stats().await?;
    println!(
        "Indexed {indexed} files ({chunks} chunks, {fresh} unchanged, {skipped} skipped, {embedded} embedded) in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    println!(
        "Index now holds {} files / {} chunks / {} embeddings",
        stats.files, stats.chunks, stats.embeddings
    );

    store.close().await?;
    Ok(())
}

async fn cmd_mcp(config: Config, base_dir: PathBuf) -> Result<()> {
    let settings = config.mcp();
    let server = McpServer::new(config, base_dir)?;
    match settings.transport {
        Transport::Stdio => serve_stdio(server).await,
        Transport::Http => serve_http(server, &settings.host, settings.port).await,
    }
}
