//! HTTP surface of the session agent.
//!
//! JSON request/response calls for join, move, resign and abandon, plus a
//! Server-Sent-Events stream per session that carries every committed state.

use crate::session::{SessionError, SessionManager};
use crate::state::{
    IdentifierError, JoinRequest, JoinResponse, MoveRequest, MoveResponse, ParticipantRequest,
    SessionId, SessionState,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

/// Error returned by an HTTP handler.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ApiError {
    /// The request was malformed.
    #[display("Bad request: {}", _0)]
    BadRequest(String),

    /// The addressed session does not exist.
    #[display("{}", _0)]
    NotFound(SessionError),
}

impl std::error::Error for ApiError {}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::NotFound(err)
    }
}

impl From<IdentifierError> for ApiError {
    fn from(err: IdentifierError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        warn!(%status, error = %self, "Request failed");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Builds the router over a shared session manager.
#[instrument(skip(sessions))]
pub fn router(sessions: SessionManager) -> Router {
    info!("Building session API router");
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_state))
        .route("/api/sessions/{id}/join", post(join))
        .route("/api/sessions/{id}/move", post(propose_move))
        .route("/api/sessions/{id}/resign", post(resign))
        .route("/api/sessions/{id}/abandon", post(abandon))
        .route("/api/sessions/{id}/events", get(events))
        .with_state(sessions)
}

/// Serves the router on `listener` until the server fails.
pub async fn serve(
    listener: tokio::net::TcpListener,
    sessions: SessionManager,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Session server listening");
    }
    axum::serve(listener, router(sessions)).await
}

async fn list_sessions(State(sessions): State<SessionManager>) -> Json<Vec<SessionId>> {
    Json(sessions.list().await)
}

#[instrument(skip(sessions))]
async fn get_state(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
) -> Result<Json<SessionState>, ApiError> {
    let id = SessionId::new(id)?;
    Ok(Json(sessions.snapshot(&id).await?))
}

#[instrument(skip(sessions, payload))]
async fn join(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<JoinResponse>, ApiError> {
    let id = SessionId::new(id)?;
    let Json(request) = payload?;
    info!(
        session_id = %id,
        participant = %request.participant_identity,
        preferred = %request.preferred_role,
        "Join request"
    );
    let response = sessions
        .join(&id, request.participant_identity, request.preferred_role)
        .await;
    Ok(Json(response))
}

#[instrument(skip(sessions, payload))]
async fn propose_move(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<MoveResponse>, ApiError> {
    let id = SessionId::new(id)?;
    let Json(request) = payload?;
    debug!(
        session_id = %id,
        participant = %request.participant_identity,
        mv = %request.proposal.mv,
        "Move request"
    );
    let outcome = sessions
        .propose_move(
            &id,
            &request.participant_identity,
            &request.proposal.mv,
            &request.proposal.claimed_base_position,
        )
        .await?;
    Ok(Json(outcome.into()))
}

#[instrument(skip(sessions, payload))]
async fn resign(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
    payload: Result<Json<ParticipantRequest>, JsonRejection>,
) -> Result<Json<MoveResponse>, ApiError> {
    let id = SessionId::new(id)?;
    let Json(request) = payload?;
    let outcome = sessions.resign(&id, &request.participant_identity).await?;
    Ok(Json(outcome.into()))
}

#[instrument(skip(sessions, payload))]
async fn abandon(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
    payload: Result<Json<ParticipantRequest>, JsonRejection>,
) -> Result<Json<MoveResponse>, ApiError> {
    let id = SessionId::new(id)?;
    let Json(request) = payload?;
    let outcome = sessions.abandon(&id, &request.participant_identity).await?;
    Ok(Json(outcome.into()))
}

#[instrument(skip(sessions))]
async fn events(
    State(sessions): State<SessionManager>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let id = SessionId::new(id)?;
    let (current, receiver) = sessions.subscribe(&id).await?;
    info!(session_id = %id, version = current.version, "Push stream attached");

    let stream = crate::client::push_stream(current, receiver)
        .map(|state| Event::default().event("state").json_data(&state));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
