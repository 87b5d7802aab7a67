//! Mynd CLI: the main entry point.
//!
//! Commands:
//! - `init`    : Create the data directory, config and signing key
//! - `serve`   : Start the HTTP gateway
//! - `status`  : Show store, index, token and audit counts
//! - `query`   : Retrieve a context bundle for a question
//! - `remember`: Store a semantic event by hand
//! - `demo`    : Load a few sample events
//! - `token`   : Issue or revoke capability tokens
//! - `audit`   : Export or verify the audit log

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "mynd",
    about = "Mynd: private, local context memory for AI assistants",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results and logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ~/.mynd/config.toml
    #[arg(long, global = true, env = "MYND_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and configuration
    Init,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show system status
    Status,

    /// Query your context memory
    Query {
        /// The question to find context for
        text: String,

        /// Token budget for the bundle
        #[arg(long, default_value_t = 4000)]
        max_tokens: usize,

        /// Only these source types (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Store a semantic event
    Remember {
        /// One-line summary of what happened
        summary: String,

        /// Source type: browser, file, code, clipboard or manual
        #[arg(long, default_value = "manual")]
        source: String,

        /// URL or file path the event came from
        #[arg(long, default_value = "")]
        path: String,

        /// Comma-separated concept tags
        #[arg(long, value_delimiter = ',')]
        concepts: Vec<String>,

        /// Why a decision was made
        #[arg(long)]
        decision: Option<String>,
    },

    /// Load sample events for trying Mynd out
    Demo,

    /// Manage capability tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Issue a token for an AI client
    Issue {
        /// Client identifier recorded in the audit log
        client_id: String,

        /// Grant: read, stats, audit, admin or source:<type> (repeatable)
        #[arg(long = "scope", default_values_t = vec!["read".to_string()])]
        scopes: Vec<String>,

        /// Largest budget a single query may use
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Lifetime in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Revoke a token by id
    Revoke {
        token_id: String,
    },
}

#[derive(Subcommand)]
enum AuditAction {
    /// Print records as JSON lines, or write them to a file
    Export {
        #[arg(long, default_value_t = 1)]
        from: u64,

        #[arg(long, default_value_t = u64::MAX)]
        to: u64,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recompute hashes and links
    Verify {
        #[arg(long, default_value_t = 1)]
        from: u64,

        #[arg(long, default_value_t = u64::MAX)]
        to: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output on stdout stays parseable.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let ctx = commands::Context::new(cli.config, cli.data_dir, cli.json);

    match cli.command {
        Commands::Init => commands::init::run(&ctx).await?,
        Commands::Serve { port } => commands::serve::run(&ctx, port).await?,
        Commands::Status => commands::status::run(&ctx).await?,
        Commands::Query {
            text,
            max_tokens,
            sources,
        } => commands::query::run(&ctx, &text, max_tokens, &sources).await?,
        Commands::Remember {
            summary,
            source,
            path,
            concepts,
            decision,
        } => {
            let entry = commands::remember::Entry {
                summary,
                source,
                path,
                concepts,
                decision,
            };
            commands::remember::run(&ctx, entry).await?
        }
        Commands::Demo => commands::remember::demo(&ctx).await?,
        Commands::Token { action } => match action {
            TokenAction::Issue {
                client_id,
                scopes,
                max_tokens,
                ttl,
            } => commands::token::issue(&ctx, &client_id, &scopes, max_tokens, ttl).await?,
            TokenAction::Revoke { token_id } => commands::token::revoke(&ctx, &token_id).await?,
        },
        Commands::Audit { action } => match action {
            AuditAction::Export { from, to, output } => {
                commands::audit::export(&ctx, from, to, output.as_deref()).await?
            }
            AuditAction::Verify { from, to } => commands::audit::verify(&ctx, from, to).await?,
        },
    }

    Ok(())
}
