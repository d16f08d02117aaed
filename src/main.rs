//! Strictly Session - Unified CLI
//!
//! Runs the authoritative session server, or acts as a synchronizing client
//! against one.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, ClientArgs, Command};
use futures::StreamExt;
use std::sync::Arc;
use strictly_chess::Move;
use strictly_session::{
    ClientConfig, HttpTransport, ParticipantId, PreferredRole, Rules, ServerConfig, SessionId,
    SessionManager, SessionState, SessionTransport, StandardChess, SyncController, identity,
    server,
};
use tracing::{info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,strictly_session=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, host, config } => run_server(config, host, port).await,
        Command::Join {
            game_id,
            preferred,
            client,
        } => run_join(game_id, preferred, client).await,
        Command::Move { game_id, mv, client } => run_move(game_id, mv, client).await,
        Command::Resign { game_id, client } => run_resign(game_id, client).await,
        Command::Watch { game_id, client } => run_watch(game_id, client).await,
    }
}

/// Run the HTTP session server
#[instrument(skip_all)]
async fn run_server(
    config_path: Option<std::path::PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    }
    .with_env()?;
    if let Some(host) = host {
        config = config.with_host(host);
    }
    if let Some(port) = port {
        config = config.with_port(port);
    }

    let rules = match config.starting_fen() {
        Some(fen) => StandardChess::from_fen(fen).context("Invalid starting FEN")?,
        None => StandardChess::new(),
    };
    info!(start = %rules.initial_position(), "Starting Strictly Session server");

    let sessions = SessionManager::with_capacity(Arc::new(rules), *config.push_capacity());
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Server ready at http://{}/", config.bind_address());

    server::serve(listener, sessions).await?;
    Ok(())
}

/// Resolved client settings.
struct ClientContext {
    config: ClientConfig,
    participant: ParticipantId,
}

#[instrument(skip_all)]
fn client_context(args: ClientArgs) -> Result<ClientContext> {
    let mut config = match args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    }
    .with_env();
    if let Some(url) = args.server_url {
        config = config.with_server_url(url);
    }
    let identity_path = args
        .identity
        .unwrap_or_else(|| config.identity_path().clone());
    let participant = identity::load_or_create(&identity_path)?;
    info!(participant = %participant, server_url = %config.server_url(), "Client ready");
    Ok(ClientContext {
        config,
        participant,
    })
}

async fn attach(
    ctx: &ClientContext,
    session_id: SessionId,
    preferred: PreferredRole,
) -> Result<SyncController> {
    let transport = HttpTransport::new(ctx.config.server_url().clone(), session_id);
    let controller = SyncController::attach(
        Arc::new(transport),
        Arc::new(StandardChess::new()),
        ctx.participant.clone(),
        preferred,
        ctx.config.move_timeout(),
    )
    .await?;
    Ok(controller)
}

fn print_state(state: &SessionState) {
    println!(
        "{}\nsession {} | version {} | status {} | {} to move",
        state.position.display(),
        state.session_id,
        state.version,
        state.status,
        state.side_to_move()
    );
}

/// Join a session and print the assigned role
async fn run_join(
    game_id: Option<String>,
    preferred: PreferredRole,
    args: ClientArgs,
) -> Result<()> {
    let ctx = client_context(args)?;
    let session_id = match game_id {
        Some(id) => SessionId::new(id)?,
        None => SessionId::generate(),
    };

    let mut controller = attach(&ctx, session_id.clone(), preferred).await?;
    let mirror = controller.mirror().context("Mirror missing after attach")?;
    println!("Joined {} as {}", session_id, mirror.role);
    println!("{}", mirror.position.display());
    controller.detach();
    Ok(())
}

/// Play one move and report whether the session accepted it
async fn run_move(game_id: String, mv: String, args: ClientArgs) -> Result<()> {
    let ctx = client_context(args)?;
    let mv = Move::parse(&mv).with_context(|| format!("Not a coordinate move: {}", mv))?;
    let session_id = SessionId::new(game_id)?;

    let mut controller = attach(&ctx, session_id, PreferredRole::Any).await?;
    let before = controller.mirror().context("Mirror missing after attach")?;

    if !controller.attempt_local_move(mv) {
        controller.detach();
        bail!(
            "Move {} cannot be played now (role {}, status {}, {} to move)",
            mv,
            before.role,
            before.status,
            before.position.side_to_move()
        );
    }

    let view = tokio::time::timeout(ctx.config.move_timeout() * 2, controller.settled())
        .await
        .unwrap_or_else(|_| controller.view());
    let after = view.mirror.context("Mirror missing after move")?;
    controller.detach();

    if after.version > before.version && after.position != before.position {
        println!("Move {} accepted", mv);
        println!(
            "{}\nversion {} | status {}",
            after.position.display(),
            after.version,
            after.status
        );
        Ok(())
    } else {
        warn!(version = after.version, pending = ?view.pending, "Move not confirmed");
        bail!("Move {} was not accepted; board shows version {}", mv, after.version)
    }
}

/// Resign the local side
async fn run_resign(game_id: String, args: ClientArgs) -> Result<()> {
    let ctx = client_context(args)?;
    let session_id = SessionId::new(game_id)?;

    let mut controller = attach(&ctx, session_id, PreferredRole::Any).await?;
    let outcome = controller.resign().await?;
    controller.detach();

    match outcome.reason() {
        None => {
            println!("Resigned");
            print_state(outcome.state());
            Ok(())
        }
        Some(reason) => bail!("Resignation refused: {}", reason),
    }
}

/// Print every pushed state until the server closes the stream
async fn run_watch(game_id: String, args: ClientArgs) -> Result<()> {
    let ctx = client_context(args)?;
    let session_id = SessionId::new(game_id)?;
    let transport = HttpTransport::new(ctx.config.server_url().clone(), session_id);

    let mut pushes = transport.subscribe().await?;
    while let Some(state) = pushes.next().await {
        print_state(&state);
        if state.status.is_terminal() {
            info!(status = %state.status, "Game over");
        }
    }
    info!("Push stream closed");
    Ok(())
}
