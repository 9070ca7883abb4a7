//! # Docent CLI (`docent`)
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the SQLite database and run schema migrations |
//! | `docent serve` | Start the HTTP server |
//! | `docent ingest <file>` | Ingest a file and wait for it to become ready |
//! | `docent status <id>` | Show a document's ingestion status |
//! | `docent retry <id>` | Re-run a failed document |
//! | `docent delete <id>` | Delete a document with its chunks |
//! | `docent link <conversation> <id>` | Make a document searchable from a conversation |
//! | `docent ask <conversation> "<text>"` | Send one message and print the answer |
//! | `docent history <conversation>` | Print a conversation's turns |
//! | `docent tools` | List protocol methods served on `/acp` |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use docent::app::App;
use docent::config;
use docent::extract::{content_type_for_path, extract_text};
use docent::logging::{self, LogFormat};
use docent::migrate;
use docent::server;

/// Docent: retrieval-augmented conversations over your documents.
#[derive(Parser)]
#[command(name = "docent", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    /// Log output format: `pretty` or `json`. Overrides `[logging].format`.
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest a file (text, Markdown, PDF, or DOCX).
    ///
    /// Waits until the document is ready or failed.
    Ingest {
        file: PathBuf,

        /// Link the document to this conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },

    /// Show a document's ingestion status.
    Status { id: String },

    /// Re-run a failed document from its stored content.
    Retry {
        id: String,

        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },

    /// Delete a document, its chunks, and its conversation links.
    Delete { id: String },

    /// Link an existing document to a conversation.
    Link { conversation: String, id: String },

    /// Send one message to a conversation and print the answer.
    Ask {
        conversation: String,
        text: String,

        /// Also print citations and token accounting.
        #[arg(long)]
        verbose: bool,
    },

    /// Print a conversation's turns, oldest first.
    History { conversation: String },

    /// List protocol methods with their descriptions.
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let format = cli
        .log_format
        .as_deref()
        .unwrap_or(cfg.logging.format.as_str());
    logging::init(LogFormat::parse(format)?);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let app = App::open(cfg).await?;
            server::run_server(app).await?;
        }
        Commands::Ingest {
            file,
            conversation,
            wait_secs,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let text = extract_text(&bytes, content_type_for_path(&file))
                .with_context(|| format!("Failed to extract text from {}", file.display()))?;
            let app = App::open(cfg).await?;
            let id = app
                .ingest
                .submit_document(&text, &file.display().to_string(), conversation.as_deref())
                .await?;
            println!("document {} queued", id);
            let progress = app
                .ingest
                .wait_for_terminal(&id, Duration::from_secs(wait_secs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::Status { id } => {
            let app = App::open(cfg).await?;
            let progress = app.ingest.get_document_status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
            println!("total chunks: {}", app.ingest.total_chunks().await?);
        }
        Commands::Retry { id, wait_secs } => {
            let app = App::open(cfg).await?;
            app.ingest.retry_document(&id).await?;
            let progress = app
                .ingest
                .wait_for_terminal(&id, Duration::from_secs(wait_secs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Commands::Delete { id } => {
            let app = App::open(cfg).await?;
            app.ingest.delete_document(&id).await?;
            println!("document {} deleted", id);
        }
        Commands::Link { conversation, id } => {
            let app = App::open(cfg).await?;
            app.conversations.link_document(&conversation, &id).await?;
            println!("document {} linked to {}", id, conversation);
        }
        Commands::Ask {
            conversation,
            text,
            verbose,
        } => {
            let app = App::open(cfg).await?;
            let reply = app.conversations.handle_message(&conversation, &text).await?;
            println!("{}", reply.text);
            if verbose {
                println!();
                for c in &reply.citations {
                    println!(
                        "  [{}] {} #{} (score {:.3}{})",
                        c.rank,
                        c.origin,
                        c.ordinal,
                        c.score,
                        if c.truncated { ", truncated" } else { "" }
                    );
                }
                println!("{}", serde_json::to_string_pretty(&reply.accounting)?);
            }
        }
        Commands::History { conversation } => {
            let app = App::open(cfg).await?;
            for turn in app.conversations.history(&conversation).await? {
                println!("{:>4} {:<9} {}", turn.sequence, turn.role.as_str(), turn.text);
            }
        }
        Commands::Tools => {
            let app = App::open(cfg).await?;
            for method in app.responder.registry().list() {
                println!("{:<20} {}", method.name, method.description);
            }
        }
    }

    Ok(())
}
