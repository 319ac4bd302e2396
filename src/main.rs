//! # MTG RAG CLI (`mtg`)
//!
//! The `mtg` binary loads card and rules data, runs the retrieval tools
//! directly, checks that the stores are consistent, and starts the HTTP
//! server that the chat frontend talks to.
//!
//! ## Usage
//!
//! ```bash
//! mtg --config ./config/mtg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mtg init` | Create the SQLite card database |
//! | `mtg load-cards` | Import Scryfall oracle cards and rulings |
//! | `mtg load-rules <file>` | Parse the Comprehensive Rules into the vector index |
//! | `mtg load-text <ns> <file>` | Chunk a plain document (e.g. tournament rules) into a namespace |
//! | `mtg cards <name>...` | Fuzzy card lookup with rulings |
//! | `mtg rules "<query>"` | Rules passages above the confidence threshold |
//! | `mtg scryfall "<query>"` | Card search through the Scryfall API |
//! | `mtg stats` | Card database and vector index consistency check |
//! | `mtg ask "<question>"` | Answer a question with the tool-calling chat loop |
//! | `mtg serve` | Start the HTTP + MCP server |
//!
//! ## Examples
//!
//! ```bash
//! mtg init
//! mtg load-cards --cards-file oracle-cards.json --rulings-file rulings.json
//! mtg load-rules MagicCompRules.txt
//! mtg load-text mtr MagicTournamentRules.txt
//! mtg cards "lightning bolt" "Ragavan"
//! mtg rules "what happens when a creature has deathtouch and trample"
//! mtg serve
//! ```

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use mtg_rag::ingest::CardSource;
use mtg_rag::{cards, chat, config, ingest, migrate, rules, scryfall, server, stats};

/// Retrieval tools and chat backend for Magic: The Gathering rules questions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mtg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mtg",
    about = "Retrieval tools and chat backend for Magic: The Gathering rules questions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mtg.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the card database schema.
    ///
    /// Idempotent; running it on an existing database leaves data in place.
    Init,

    /// Import oracle cards and rulings.
    ///
    /// Without file arguments the current bulk files are downloaded from
    /// Scryfall.
    LoadCards {
        /// Local oracle-cards bulk JSON.
        #[arg(long, requires = "rulings_file")]
        cards_file: Option<PathBuf>,

        /// Local rulings bulk JSON.
        #[arg(long, requires = "cards_file")]
        rulings_file: Option<PathBuf>,
    },

    /// Parse a Comprehensive Rules text file into the `cr` and `gls` namespaces.
    LoadRules {
        file: PathBuf,
    },

    /// Chunk a plain text document into a vector index namespace.
    LoadText {
        namespace: String,
        file: PathBuf,
    },

    /// Look up cards by approximate name.
    Cards {
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Query every rules partition of the vector index.
    Rules {
        query: String,

        #[arg(long)]
        json: bool,
    },

    /// Search cards with Scryfall query syntax.
    Scryfall {
        query: String,

        /// Stop after this many cards (default from `[scryfall].max_cards`).
        #[arg(long)]
        max_cards: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Report row counts and check the vector index partitions.
    ///
    /// Exits non-zero when the stores are inconsistent.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Ask a single question.
    Ask {
        question: String,

        /// `chat-model-small`, `chat-model-large` or `chat-model-reasoning`.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server (REST tools, chat, MCP).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::LoadCards {
            cards_file,
            rulings_file,
        } => {
            let source = match (&cards_file, &rulings_file) {
                (Some(cards), Some(rulings)) => CardSource::Files { cards, rulings },
                _ => CardSource::Download,
            };
            ingest::run_load_cards(&cfg, source).await?;
        }
        Commands::LoadRules { file } => {
            ingest::run_load_rules(&cfg, &file).await?;
        }
        Commands::LoadText { namespace, file } => {
            ingest::run_load_text(&cfg, &namespace, &file).await?;
        }
        Commands::Cards { names, json } => {
            cards::run_cards(&cfg, &names, json).await?;
        }
        Commands::Rules { query, json } => {
            rules::run_rules(&cfg, &query, json).await?;
        }
        Commands::Scryfall {
            query,
            max_cards,
            json,
        } => {
            scryfall::run_scryfall(&cfg, &query, max_cards, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Ask {
            question,
            model,
            json,
        } => {
            chat::run_ask(&cfg, &question, model.as_deref(), json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
