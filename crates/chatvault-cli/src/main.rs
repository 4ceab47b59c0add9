//! chatvault CLI.
//!
//! Operates on a local profile: the namespaced tiered store, the
//! identity resolver, and the offline mutation queue.

mod commands;
mod config;
mod output;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::ResolvedConfig;
use crate::session::Session;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// chatvault: namespaced client storage with an offline write queue.
#[derive(Parser)]
#[command(name = "chatvault", version, about)]
struct Cli {
    /// Output in JSON format (no colors, machine-readable).
    #[arg(long, global = true)]
    json: bool,

    /// Profile directory holding the stores.
    #[arg(long, global = true)]
    profile_dir: Option<PathBuf>,

    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Treat the network as unreachable; queued writes stay pending.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active namespace.
    Whoami,
    /// Store a credential token and switch to its user namespace.
    Login {
        token: String,
    },
    /// Drop the credential token.
    Logout,
    /// Store a JSON value under a key.
    Set {
        key: String,
        /// JSON-encoded value.
        value: String,
    },
    /// Print the value stored under a key.
    Get {
        key: String,
    },
    /// Remove a key.
    Remove {
        key: String,
    },
    /// Remove every record of a namespace kind (`user`, `anonymous`),
    /// or of the active namespace with `current`.
    Clear {
        namespace: String,
    },
    /// Queue a network write.
    Enqueue {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE).
        method: String,
        url: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Request header as NAME:VALUE. Repeatable.
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
    },
    /// Replay pending writes now.
    Drain,
    /// Show pending count and oldest entry.
    Stats,
    /// List writes abandoned after repeated failures.
    DeadLetters {
        /// Forget them instead of listing.
        #[arg(long)]
        clear: bool,
    },
    /// Discard every pending write.
    ResetQueue,
}

// ---------------------------------------------------------------------------
// Global options passed to every command handler
// ---------------------------------------------------------------------------

/// Shared options threaded into command handlers.
pub struct GlobalOpts {
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let opts = GlobalOpts { json: cli.json };

    let result = run(cli, &opts).await;

    if let Err(e) = result {
        output::print_error(&e, opts.json);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, opts: &GlobalOpts) -> std::result::Result<(), String> {
    let resolved = ResolvedConfig::resolve(cli.config.as_deref(), cli.profile_dir)?;
    let session = Session::open(&resolved, !cli.offline)?;

    let result = dispatch(&session, opts, cli.command).await;
    session.close()?;
    result
}

async fn dispatch(
    session: &Session,
    opts: &GlobalOpts,
    cmd: Commands,
) -> std::result::Result<(), String> {
    match cmd {
        Commands::Whoami => commands::identity::whoami(session, opts),
        Commands::Login { token } => commands::identity::login(session, opts, &token),
        Commands::Logout => commands::identity::logout(session, opts),
        Commands::Set { key, value } => commands::data::set(session, opts, &key, &value),
        Commands::Get { key } => commands::data::get(session, opts, &key),
        Commands::Remove { key } => commands::data::remove(session, opts, &key),
        Commands::Clear { namespace } => commands::data::clear(session, opts, &namespace),
        Commands::Enqueue {
            method,
            url,
            body,
            headers,
        } => {
            commands::queue::enqueue(session, opts, &method, &url, body.as_deref(), &headers).await
        }
        Commands::Drain => commands::queue::drain(session, opts).await,
        Commands::Stats => commands::queue::stats(session, opts),
        Commands::DeadLetters { clear } => commands::queue::dead_letters(session, opts, clear),
        Commands::ResetQueue => commands::queue::reset(session, opts),
    }
}
