//! # cursor-docs CLI
//!
//! Thin command-line front end over [`cursor_docs::DocsService`].
//!
//! ## Usage
//!
//! ```bash
//! cursor-docs --config ./config/cursor-docs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the SQLite database and run schema migrations |
//! | `add <url>` | Index a documentation URL |
//! | `refresh <id>` | Re-scrape a source |
//! | `remove <id>` | Delete a source and its chunks |
//! | `list` | List indexed sources |
//! | `search "<query>"` | Search indexed chunks |
//! | `status` | Show storage backends and counts |
//! | `cursor list` | Show docs Cursor knows about |
//! | `cursor sync` | Index every doc Cursor knows about |
//! | `serve` | Run the watcher and resume background work until Ctrl-C |
//!
//! When the config file does not exist, built-in defaults are used.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use cursor_docs::config::{self, Config};
use cursor_docs::indexer::{AddOptions, AddOutcome, AddReport};
use cursor_docs::logging::{init_tracing, Verbosity};
use cursor_docs::models::SearchMode;
use cursor_docs::search::SearchOptions;
use cursor_docs::{db, DocsService};

/// cursor-docs: index Cursor's @Docs URLs locally and search them.
#[derive(Parser)]
#[command(name = "cursor-docs", version, about)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cursor-docs.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a documentation URL.
    Add {
        url: String,

        /// Display name; derived from the host when omitted.
        #[arg(long)]
        name: Option<String>,

        /// Upper bound on pages indexed for this source, root included.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Follow same-host links from the root page.
        #[arg(long)]
        follow_links: bool,
    },

    /// Re-scrape a source from scratch.
    Refresh { id: String },

    /// Remove a source with its chunks and vectors.
    Remove { id: String },

    /// List indexed sources.
    List,

    /// Search indexed documentation.
    Search {
        query: String,

        /// `auto`, `keyword`, `semantic`, or `hybrid`.
        #[arg(long, default_value = "auto")]
        mode: String,

        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to a source id. Repeatable.
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Show storage backends, capabilities, and counts.
    Status,

    /// Read documentation entries from Cursor's databases.
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Run background work (watcher, resumed link-following) until Ctrl-C.
    Serve,
}

#[derive(Subcommand)]
enum CursorAction {
    /// List docs Cursor tracks, without indexing.
    List,
    /// Index every doc Cursor tracks.
    Sync,
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(Verbosity::from_flags(cli.verbose, cli.quiet));

    let cfg = load(&cli.config)?;

    if let Commands::Init = cli.command {
        let pools = db::connect(&cfg.db.path)
            .await
            .with_context(|| format!("Failed to open database {}", cfg.db.path.display()))?;
        pools.close().await;
        println!("Database initialized at {}", cfg.db.path.display());
        return Ok(());
    }

    let service = DocsService::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Add {
            url,
            name,
            max_pages,
            follow_links,
        } => {
            let opts = AddOptions {
                name,
                max_pages,
                follow_links: follow_links.then_some(true),
            };
            let report = service.add(&url, opts).await?;
            print_add(report).await;
        }
        Commands::Refresh { id } => {
            let report = service.refresh(&id).await?;
            print_add(report).await;
        }
        Commands::Remove { id } => {
            service.remove(&id).await?;
            println!("Removed {}", id);
        }
        Commands::List => {
            let sources = service.list().await?;
            if sources.is_empty() {
                println!("No sources indexed.");
            }
            for s in sources {
                println!(
                    "{}  {:<9} {:>4} pages {:>6} chunks  {}  {}",
                    s.id, s.status, s.pages_count, s.chunks_count, s.name, s.url
                );
            }
        }
        Commands::Search {
            query,
            mode,
            limit,
            sources,
        } => {
            let mode: SearchMode = mode.parse()?;
            let opts = SearchOptions {
                mode,
                limit,
                sources: (!sources.is_empty()).then_some(sources),
            };
            let resp = service.search(&query, opts).await?;
            if let Some(warning) = &resp.warning {
                eprintln!("warning: {}", warning);
            }
            if resp.results.is_empty() {
                println!("No results.");
            }
            for (i, r) in resp.results.iter().enumerate() {
                println!(
                    "{}. [{:.3} {:?}] {}\n   {}\n   {}",
                    i + 1,
                    r.score,
                    r.match_type,
                    r.title,
                    r.url,
                    snippet(&r.content, 200)
                );
            }
        }
        Commands::Status => {
            let st = service.storage_status().await?;
            println!("Primary backend:  {}", st.primary_backend);
            println!(
                "Vector backend:   {} ({})",
                st.vector_backend.as_deref().unwrap_or("none"),
                if st.vector_available { "available" } else { "unavailable" }
            );
            println!(
                "Embeddings:       {} ({})",
                st.embedding_model,
                if st.embeddings_available { "available" } else { "unavailable" }
            );
            println!("Semantic search:  {}", if st.semantic_ready { "ready" } else { "off" });
            println!("Sources:          {}", st.sources);
            println!("Chunks:           {}", st.chunks);
            if let Some(v) = st.vectors {
                println!("Vectors:          {}", v);
            }
            println!("Queued links:     {}", st.queued_jobs);
        }
        Commands::Cursor { action } => match action {
            CursorAction::List => {
                let docs = service.list_cursor_docs().await;
                if docs.is_empty() {
                    println!("No Cursor docs found.");
                }
                for d in docs {
                    println!(
                        "{}  {}  {}",
                        d.url,
                        d.name,
                        d.status.as_deref().unwrap_or("-")
                    );
                }
            }
            CursorAction::Sync => {
                let report = service.sync_from_cursor().await;
                println!(
                    "Discovered {}, added {}, skipped {}, failed {}",
                    report.discovered, report.added, report.skipped, report.failed
                );
                for e in &report.errors {
                    eprintln!("  {}", e);
                }
            }
        },
        Commands::Serve => {
            service.serve().await?;
            return Ok(());
        }
    }

    service.shutdown().await;
    Ok(())
}

async fn print_add(report: AddReport) {
    let AddReport {
        source,
        outcome,
        chunks,
        follow,
    } = report;
    match outcome {
        AddOutcome::Skipped => println!("Skipped {} (unchanged or in progress)", source.url),
        AddOutcome::Indexed => println!(
            "Indexed {} as {} ({} chunks)",
            source.url, source.id, chunks
        ),
    }
    if let Some(handle) = follow {
        match handle.await {
            Ok(r) => println!(
                "Followed links: {} pages indexed, {} failed, {} chunks",
                r.pages_indexed, r.pages_failed, r.chunks
            ),
            Err(e) => eprintln!("link-following task failed: {}", e),
        }
    }
}

fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}
