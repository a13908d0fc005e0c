//! # Colloquy CLI (`cq`)
//!
//! The `cq` binary is the primary interface for Colloquy. It provides
//! commands for serving the HTTP API, scanning and searching the knowledge
//! base, listing engine models, asking one-shot questions, and training
//! derived models.
//!
//! ## Usage
//!
//! ```bash
//! cq --config ./config/colloquy.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cq serve` | Start the HTTP server for the web UI |
//! | `cq scan` | Rescan the knowledge base and report counts |
//! | `cq search "<query>"` | Rank knowledge-base sections against a query |
//! | `cq models` | List engine models with classification |
//! | `cq ask "<question>"` | Ask one question and print the answer |
//! | `cq train <base-model>` | Build a fine-tuning package and register it |
//!
//! ## Examples
//!
//! ```bash
//! # Start the server
//! cq serve --config ./config/colloquy.toml
//!
//! # Search without asking a model
//! cq search "deployment checklist"
//!
//! # Ask with the knowledge base included
//! cq ask "when was my last note added?"
//!
//! # Fine-tune llama3.2:3b on the QA folder
//! cq train llama3.2:3b --file QA --suffix qa
//! ```

mod app;
mod behavior;
mod config;
mod engine;
mod error;
mod intent;
mod lifecycle;
mod models;
mod orchestrator;
mod rank;
mod registry;
mod server;
mod store;
mod tools;
mod trainer;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::orchestrator::QueryRequest;
use crate::trainer::TrainRequest;

/// Colloquy — a local-first knowledge-base assistant over Ollama.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/colloquy.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cq",
    about = "Colloquy — ask questions against your personal knowledge base through a local model runtime",
    version,
    long_about = "Colloquy scans a markdown knowledge base, ranks sections against questions, \
    manages Ollama models (start/stop/select/train), and streams answers grounded in your \
    own documents."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/colloquy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// model, training, and streaming-query endpoints.
    Serve,

    /// Rescan the knowledge base and report document counts.
    Scan,

    /// Rank knowledge-base sections against a query.
    ///
    /// Prints the ranked sources without calling a model. Useful for
    /// checking what context a question would retrieve.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List engine models with running/trained classification.
    Models,

    /// Ask one question and print the collected answer.
    Ask {
        /// The question to ask.
        question: String,

        /// Model to use; defaults to the selected or first available model.
        #[arg(long)]
        model: Option<String>,

        /// Skip knowledge-base retrieval entirely.
        #[arg(long)]
        no_files: bool,
    },

    /// Build a fine-tuning package and register the derived model.
    ///
    /// Re-training the same base model and suffix updates the existing
    /// package in place instead of creating a duplicate.
    Train {
        /// Base model to derive from (e.g. `llama3.2:3b`).
        base_model: String,

        /// File or folder to include, relative to the knowledge-base root.
        /// Repeatable; omit to train on the whole knowledge base.
        #[arg(long = "file")]
        files: Vec<String>,

        /// Name suffix for the derived model (default from config).
        #[arg(long)]
        suffix: Option<String>,

        /// Behavior profile file to train with.
        #[arg(long)]
        behavior: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let app = App::new(cfg)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(app).await?;
        }
        Commands::Scan => {
            let units = app.store.reload()?;
            println!(
                "Scanned {} — {} sections across {} files.",
                app.config.knowledge_base.root.display(),
                units,
                app.store.file_count()
            );
        }
        Commands::Search { query, limit } => {
            let snapshot = app.store.snapshot();
            let top_k = limit.unwrap_or(app.config.retrieval.top_k);
            let results = rank::search(&query, &snapshot, top_k);
            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                let header = result.unit.section_header.as_deref().unwrap_or("(no header)");
                println!(
                    "{}. [{:.1}] {} / {}",
                    i + 1,
                    result.relevance_score,
                    result.unit.filename,
                    header
                );
                println!("    excerpt: \"{}\"", result.content_preview.replace('\n', " "));
            }
        }
        Commands::Models => {
            let listing = app.registry.list_models().await?;
            if listing.stale {
                println!("(engine unreachable — listing may be stale)");
            }
            for model in &listing.models {
                let mut flags = Vec::new();
                if model.is_running {
                    flags.push("running");
                }
                if model.is_trained {
                    flags.push("trained");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                println!(
                    "{}{} — {} ({:.1} GB)",
                    model.name,
                    flags,
                    model.description,
                    model.size_bytes as f64 / (1024.0_f64.powi(3))
                );
            }
        }
        Commands::Ask {
            question,
            model,
            no_files,
        } => {
            let answer = app
                .orchestrator
                .answer(QueryRequest {
                    question,
                    model_name: model,
                    include_files: !no_files,
                })
                .await?;
            println!("{}", answer.answer.trim());
            if !answer.sources.is_empty() {
                println!();
                println!("Sources ({}):", answer.model_used);
                for source in &answer.sources {
                    println!(
                        "  [{:.1}] {} / {}",
                        source.relevance_score,
                        source.unit.filename,
                        source.unit.section_header.as_deref().unwrap_or("(no header)")
                    );
                }
            }
        }
        Commands::Train {
            base_model,
            files,
            suffix,
            behavior,
        } => {
            let report = app
                .train(TrainRequest {
                    base_model,
                    selected_paths: files,
                    custom_suffix: suffix,
                    behavior_filename: behavior,
                })
                .await?;
            println!(
                "{:?} {} from {} examples (modelfile: {}).",
                report.outcome,
                report.artifact.trained_model_name,
                report.training_examples,
                report.artifact.modelfile_path.display()
            );
            if report.used_fallback_profile {
                println!("Note: requested behavior profile was missing; used the current one.");
            }
        }
    }

    Ok(())
}
