//! Command-line interface for strictly_session.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use strictly_session::PreferredRole;

/// Strictly Session - authoritative chess sessions with optimistic clients
#[derive(Parser, Debug)]
#[command(name = "strictly_session")]
#[command(about = "Chess session server and synchronizing client", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every client command.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Session server URL (overrides config and STRICTLY_SERVER_URL)
    #[arg(long)]
    pub server_url: Option<String>,

    /// Client config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// File holding this client's identity (created if missing)
    #[arg(long)]
    pub identity: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the session server
    Serve {
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Server config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Join a session, creating it if it does not exist
    Join {
        /// Session to join; a fresh one is created if omitted
        game_id: Option<String>,

        /// Role to ask for (firstSide, secondSide, any)
        #[arg(long, default_value = "any")]
        preferred: PreferredRole,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Play a move in coordinate notation, e.g. e2e4 or e7e8q
    Move {
        /// Session to play in
        game_id: String,

        /// The move
        #[arg(value_name = "MOVE")]
        mv: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Resign the side you play
    Resign {
        /// Session to resign from
        game_id: String,

        #[command(flatten)]
        client: ClientArgs,
    },

    /// Print every state the session pushes
    Watch {
        /// Session to watch
        game_id: String,

        #[command(flatten)]
        client: ClientArgs,
    },
}
