//! HTTP transport: JSON calls plus a Server-Sent-Events push stream.

use super::transport::{SessionTransport, TransportError};
use crate::state::{
    JoinRequest, JoinResponse, MoveOutcome, MoveProposal, MoveRequest, MoveResponse,
    ParticipantId, ParticipantRequest, PreferredRole, SessionId, SessionState,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use strictly_chess::{Move, Position};
use tracing::{debug, instrument, warn};

/// Transport to a session served by `strictly_session serve`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    session_id: SessionId,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for one session on the server at `base_url`.
    pub fn new(base_url: impl Into<String>, session_id: SessionId) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            session_id,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/api/sessions/{}{}", self.base_url, self.session_id, suffix)
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        suffix: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let response = self
            .client
            .post(self.url(suffix))
            .json(body)
            .send()
            .await
            .map_err(connection_error)?;
        Self::decode(response).await
    }

    async fn post_outcome<B: Serialize + Sync>(
        &self,
        suffix: &str,
        body: &B,
    ) -> Result<MoveOutcome, TransportError> {
        let response: MoveResponse = self.post(suffix, body).await?;
        MoveOutcome::try_from(response).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn connection_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait::async_trait]
impl SessionTransport for HttpTransport {
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn join(
        &self,
        participant: &ParticipantId,
        preferred: PreferredRole,
    ) -> Result<JoinResponse, TransportError> {
        let request = JoinRequest {
            participant_identity: participant.clone(),
            preferred_role: preferred,
        };
        self.post("/join", &request).await
    }

    #[instrument(skip(self, claimed_base), fields(session_id = %self.session_id))]
    async fn propose_move(
        &self,
        participant: &ParticipantId,
        mv: Move,
        claimed_base: Position,
    ) -> Result<MoveOutcome, TransportError> {
        let request = MoveRequest {
            participant_identity: participant.clone(),
            proposal: MoveProposal {
                mv,
                claimed_base_position: claimed_base,
            },
        };
        self.post_outcome("/move", &request).await
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn resign(&self, participant: &ParticipantId) -> Result<MoveOutcome, TransportError> {
        let request = ParticipantRequest {
            participant_identity: participant.clone(),
        };
        self.post_outcome("/resign", &request).await
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn fetch_state(&self) -> Result<SessionState, TransportError> {
        let response = self
            .client
            .get(self.url(""))
            .send()
            .await
            .map_err(connection_error)?;
        Self::decode(response).await
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn subscribe(&self) -> Result<BoxStream<'static, SessionState>, TransportError> {
        let response = self
            .client
            .get(self.url("/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Push stream opened");

        let bytes = response.bytes_stream().boxed();
        let states = stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new()),
            |(mut bytes, mut decoder, mut ready)| async move {
                loop {
                    if let Some(state) = ready.pop_front() {
                        return Some((state, (bytes, decoder, ready)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for data in decoder.push(&chunk) {
                                match serde_json::from_str::<SessionState>(&data) {
                                    Ok(state) => ready.push_back(state),
                                    Err(e) => warn!(error = %e, "Skipping malformed push"),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Push stream failed");
                            return None;
                        }
                        None => {
                            debug!("Push stream ended");
                            return None;
                        }
                    }
                }
            },
        );
        Ok(states.boxed())
    }
}

/// Incremental Server-Sent-Events decoder yielding each event's data.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds a chunk and returns the data of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block);
            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}
