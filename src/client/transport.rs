//! How a client reaches its session.

use crate::session::{SessionError, SessionManager};
use crate::state::{
    JoinResponse, MoveOutcome, ParticipantId, PreferredRole, SessionId, SessionState,
};
use futures::stream::{self, BoxStream, StreamExt};
use strictly_chess::{Move, Position};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// Failure to get an answer from the session agent.
///
/// Every variant means the outcome of the call is unknown to the client.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum TransportError {
    /// The session agent refused to address the session.
    #[display("{}", _0)]
    Session(SessionError),

    /// The request could not be sent or the connection failed.
    #[display("Connection failed: {}", _0)]
    Connection(String),

    /// The server answered with a non-success status.
    #[display("HTTP {}: {}", status, body)]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response could not be decoded.
    #[display("Malformed response: {}", _0)]
    Decode(String),

    /// No answer arrived in time.
    #[display("Timed out waiting for the session")]
    Timeout,
}

impl std::error::Error for TransportError {}

impl From<SessionError> for TransportError {
    fn from(err: SessionError) -> Self {
        TransportError::Session(err)
    }
}

/// Calls a client can make against one session.
#[async_trait::async_trait]
pub trait SessionTransport: Send + Sync {
    /// Joins the session.
    async fn join(
        &self,
        participant: &ParticipantId,
        preferred: PreferredRole,
    ) -> Result<JoinResponse, TransportError>;

    /// Proposes a move based on `claimed_base`.
    async fn propose_move(
        &self,
        participant: &ParticipantId,
        mv: Move,
        claimed_base: Position,
    ) -> Result<MoveOutcome, TransportError>;

    /// Resigns the participant's side.
    async fn resign(&self, participant: &ParticipantId) -> Result<MoveOutcome, TransportError>;

    /// Fetches the current authoritative state.
    async fn fetch_state(&self) -> Result<SessionState, TransportError>;

    /// Opens the push channel. The stream yields every committed state,
    /// starting with the current one, and ends when the channel closes.
    async fn subscribe(&self) -> Result<BoxStream<'static, SessionState>, TransportError>;
}

/// Transport to a [`SessionManager`] in the same process.
#[derive(Debug, Clone, derive_new::new)]
pub struct LocalTransport {
    sessions: SessionManager,
    session_id: SessionId,
}

/// Turns a push receiver into a stream, skipping over lag.
pub(crate) fn push_stream(
    first: SessionState,
    receiver: broadcast::Receiver<SessionState>,
) -> BoxStream<'static, SessionState> {
    let rest = stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(state) => return Some((state, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Push receiver lagged, continuing with newer states");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Push channel closed");
                    return None;
                }
            }
        }
    });
    stream::once(async move { first }).chain(rest).boxed()
}

#[async_trait::async_trait]
impl SessionTransport for LocalTransport {
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn join(
        &self,
        participant: &ParticipantId,
        preferred: PreferredRole,
    ) -> Result<JoinResponse, TransportError> {
        Ok(self
            .sessions
            .join(&self.session_id, participant.clone(), preferred)
            .await)
    }

    #[instrument(skip(self, claimed_base), fields(session_id = %self.session_id))]
    async fn propose_move(
        &self,
        participant: &ParticipantId,
        mv: Move,
        claimed_base: Position,
    ) -> Result<MoveOutcome, TransportError> {
        Ok(self
            .sessions
            .propose_move(&self.session_id, participant, &mv, &claimed_base)
            .await?)
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn resign(&self, participant: &ParticipantId) -> Result<MoveOutcome, TransportError> {
        Ok(self.sessions.resign(&self.session_id, participant).await?)
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn fetch_state(&self) -> Result<SessionState, TransportError> {
        Ok(self.sessions.snapshot(&self.session_id).await?)
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn subscribe(&self) -> Result<BoxStream<'static, SessionState>, TransportError> {
        let (current, receiver) = self.sessions.subscribe(&self.session_id).await?;
        Ok(push_stream(current, receiver))
    }
}
