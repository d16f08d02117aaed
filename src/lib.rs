//! Strictly Session - authoritative chess sessions with optimistic clients
//!
//! One session agent per game owns the canonical position and decides, one
//! proposal at a time, which moves are committed. Clients keep a mirror of
//! that state, show their own moves immediately, and reconcile against the
//! agent's answers and pushes.
//!
//! # Architecture
//!
//! - **Session**: the authoritative agent and the per-game arena
//! - **Client**: mirror, reconciliation and the synchronization controller
//! - **Server**: HTTP routes plus a Server-Sent-Events push channel
//! - **Rules**: the seam to the `strictly_chess` legality engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strictly_session::{
//!     LocalTransport, ParticipantId, PreferredRole, SessionId, SessionManager, StandardChess,
//!     SyncController, DEFAULT_MOVE_TIMEOUT,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let rules = Arc::new(StandardChess::new());
//! let sessions = SessionManager::new(rules.clone());
//! let transport = LocalTransport::new(sessions, SessionId::new("game-1")?);
//!
//! let controller = SyncController::attach(
//!     Arc::new(transport),
//!     rules,
//!     ParticipantId::new("alice")?,
//!     PreferredRole::FirstSide,
//!     DEFAULT_MOVE_TIMEOUT,
//! )
//! .await?;
//! controller.attempt_local_move(strictly_chess::Move::parse("e2e4").unwrap());
//! controller.settled().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod client;
mod config;
mod rules;
mod session;
mod state;

pub mod identity;
pub mod server;

// Crate-level exports - Client synchronization
pub use client::{
    ClientMirror, ClientView, DEFAULT_MOVE_TIMEOUT, HttpTransport, LocalTransport, Pending,
    Reconciled, SessionTransport, SseDecoder, SyncController, TransportError, reconcile,
};

// Crate-level exports - Configuration
pub use config::{ClientConfig, ConfigError, HOST_ENV, PORT_ENV, SERVER_URL_ENV, ServerConfig};

// Crate-level exports - Rules
pub use rules::{Rules, StandardChess};

// Crate-level exports - Session agent
pub use session::{DEFAULT_PUSH_CAPACITY, GameSession, SessionError, SessionManager};

// Crate-level exports - Shared state model
pub use state::{
    GameStatus, IdentifierError, JoinRequest, JoinResponse, MAX_IDENTIFIER_LEN, MoveOutcome,
    MoveProposal, MoveRequest, MoveResponse, ParticipantId, ParticipantRequest, PreferredRole,
    RejectReason, Role, SessionId, SessionState,
};
