//! Client synchronization controller.
//!
//! Owns the client mirror, applies the local player's moves optimistically,
//! and folds every authoritative word from the session (move responses,
//! pushes, re-fetches) back into the mirror through [`reconcile`].

use super::mirror::{ClientMirror, Reconciled, reconcile};
use super::transport::{SessionTransport, TransportError};
use crate::rules::Rules;
use crate::state::{MoveOutcome, ParticipantId, PreferredRole, SessionState};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use strictly_chess::Move;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

/// Default time to wait for a move response before treating it as lost.
pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// First delay between re-fetch or resubscribe attempts; doubles up to
/// [`MAX_RETRY_BACKOFF`].
const BASE_RETRY_BACKOFF: Duration = Duration::from_millis(150);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_RETRY_BACKOFF)
}

/// Progress of the local player's outstanding move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pending {
    /// No move outstanding.
    #[default]
    Idle,
    /// A proposal based on `base_version` awaits its response.
    InFlight {
        /// Version the proposal was based on.
        base_version: u64,
    },
    /// The response was lost; waiting for a push or re-fetch to tell.
    Unresolved {
        /// Version the proposal was based on.
        base_version: u64,
    },
}

/// What a rendering layer observes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientView {
    /// Current mirror, `None` when detached.
    pub mirror: Option<ClientMirror>,
    /// Outstanding-move state.
    pub pending: Pending,
    /// Whether the push stream is open. False while detached or while the
    /// listener is reconnecting, when the mirror may fall behind.
    pub pushes_attached: bool,
}

/// Folds authoritative state into the view and, if `settles` is still the
/// pending token, clears it. Returns whether anything changed.
fn fold(v: &mut ClientView, state: &SessionState, settles: Option<Pending>) -> bool {
    let mut changed = false;
    if let Some(mirror) = v.mirror.as_ref() {
        match reconcile(mirror, state) {
            Reconciled::Replace(next) => {
                debug!(version = next.version, "Mirror replaced by authoritative state");
                v.mirror = Some(next);
                changed = true;
            }
            Reconciled::Unchanged => {}
            Reconciled::Stale => {
                debug!(version = state.version, "Ignoring stale state");
            }
        }
    }
    if settles.is_some_and(|token| token == v.pending) {
        v.pending = Pending::Idle;
        changed = true;
    }
    changed
}

fn adopt(view: &watch::Sender<ClientView>, state: &SessionState, settles: Option<Pending>) {
    view.send_if_modified(|v| fold(v, state, settles));
}

/// Applies a pushed state.
///
/// While a move is pending, pushes no newer than its base cannot tell
/// anything about it and are not allowed to undo the speculation. A push
/// newer than an unresolved move's base resolves it.
fn apply_push(view: &watch::Sender<ClientView>, state: &SessionState) {
    view.send_if_modified(|v| {
        let settles = match v.pending {
            Pending::InFlight { base_version } | Pending::Unresolved { base_version }
                if state.version <= base_version =>
            {
                debug!(version = state.version, "Push predates pending move");
                return false;
            }
            token @ Pending::Unresolved { .. } => Some(token),
            _ => None,
        };
        fold(v, state, settles)
    });
}

fn set_pushes_attached(view: &watch::Sender<ClientView>, attached: bool) {
    view.send_if_modified(|v| {
        // A detached controller has no mirror and stays detached.
        if v.mirror.is_none() || v.pushes_attached == attached {
            return false;
        }
        v.pushes_attached = attached;
        true
    });
}

/// Feeds pushes into the view, resubscribing with backoff whenever the
/// stream ends. Runs until aborted.
async fn listen(
    view: Arc<watch::Sender<ClientView>>,
    transport: Arc<dyn SessionTransport>,
    first: BoxStream<'static, SessionState>,
) {
    let mut pushes = Some(first);
    let mut backoff = BASE_RETRY_BACKOFF;
    loop {
        if let Some(mut stream) = pushes.take() {
            set_pushes_attached(&view, true);
            while let Some(state) = stream.next().await {
                backoff = BASE_RETRY_BACKOFF;
                apply_push(&view, &state);
            }
            warn!("Push stream ended, resubscribing");
            set_pushes_attached(&view, false);
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
        match transport.subscribe().await {
            Ok(stream) => {
                info!("Resubscribed to pushes");
                pushes = Some(stream);
            }
            Err(e) => warn!(error = %e, "Resubscribe failed"),
        }
    }
}

/// Re-fetches until a state settles the unresolved proposal, or until
/// something else (a push, a detach) has already done so.
async fn resolve(
    view: Arc<watch::Sender<ClientView>>,
    transport: Arc<dyn SessionTransport>,
    unresolved: Pending,
    timeout: Duration,
) {
    let mut backoff = BASE_RETRY_BACKOFF;
    while view.borrow().pending == unresolved {
        match tokio::time::timeout(timeout, transport.fetch_state()).await {
            Ok(Ok(state)) => {
                adopt(&view, &state, Some(unresolved));
                return;
            }
            Ok(Err(e)) => warn!(error = %e, ?backoff, "Re-fetch failed, retrying"),
            Err(_) => warn!(?backoff, "Re-fetch timed out, retrying"),
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
    debug!("Unresolved move settled elsewhere");
}

/// Keeps one client's mirror in step with its session.
pub struct SyncController {
    participant: ParticipantId,
    transport: Arc<dyn SessionTransport>,
    rules: Arc<dyn Rules>,
    view: Arc<watch::Sender<ClientView>>,
    runtime: tokio::runtime::Handle,
    push_task: Option<JoinHandle<()>>,
    move_timeout: Duration,
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("participant", &self.participant)
            .field("view", &*self.view.borrow())
            .field("move_timeout", &self.move_timeout)
            .finish()
    }
}

impl SyncController {
    /// Joins the session and starts listening for pushes.
    ///
    /// Must be called from within a tokio runtime; proposals are later
    /// sent on that runtime.
    #[instrument(skip(transport, rules))]
    pub async fn attach(
        transport: Arc<dyn SessionTransport>,
        rules: Arc<dyn Rules>,
        participant: ParticipantId,
        preferred: PreferredRole,
        move_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let joined = transport.join(&participant, preferred).await?;
        info!(role = %joined.role, version = joined.state.version, "Joined session");

        let (view, _) = watch::channel(ClientView {
            mirror: Some(ClientMirror::from_state(&joined.state, joined.role)),
            pending: Pending::Idle,
            pushes_attached: true,
        });
        let view = Arc::new(view);

        let pushes = transport.subscribe().await?;
        let push_task = tokio::spawn(
            listen(Arc::clone(&view), Arc::clone(&transport), pushes)
                .instrument(info_span!("push_listener", participant = %participant)),
        );

        Ok(Self {
            participant,
            transport,
            rules,
            view,
            runtime: tokio::runtime::Handle::current(),
            push_task: Some(push_task),
            move_timeout,
        })
    }

    /// Local participant.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Current mirror, `None` once detached.
    pub fn mirror(&self) -> Option<ClientMirror> {
        self.view.borrow().mirror.clone()
    }

    /// Snapshot of the mirror and pending state.
    pub fn view(&self) -> ClientView {
        self.view.borrow().clone()
    }

    /// Outstanding-move state.
    pub fn pending(&self) -> Pending {
        self.view.borrow().pending
    }

    /// Receiver notified on every mirror or pending change.
    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.view.subscribe()
    }

    /// Waits until no move is pending and returns the view.
    ///
    /// An unresolved move only settles once a push or re-fetch arrives, so
    /// callers facing an unreachable server should bound this with a timeout.
    pub async fn settled(&self) -> ClientView {
        let mut rx = self.view.subscribe();
        match rx.wait_for(|v| v.pending == Pending::Idle).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        }
    }

    /// Tries to play a move locally and, if it is playable, proposes it.
    ///
    /// Returns `true` as soon as the mirror shows the move; the proposal
    /// is resolved in the background.
    #[instrument(skip(self, mv), fields(participant = %self.participant, mv = %mv))]
    pub fn attempt_local_move(&self, mv: Move) -> bool {
        let mut proposal = None;
        self.view.send_if_modified(|v| {
            if v.pending != Pending::Idle {
                debug!(pending = ?v.pending, "Refused: a move is already pending");
                return false;
            }
            let Some(mirror) = v.mirror.as_mut() else {
                debug!("Refused: not attached");
                return false;
            };
            let Some(side) = mirror.role.side() else {
                debug!("Refused: observers cannot move");
                return false;
            };
            if mirror.status.is_terminal() {
                debug!(status = %mirror.status, "Refused: game is over");
                return false;
            }
            if self.rules.side_to_move(&mirror.position) != side {
                debug!("Refused: not our turn");
                return false;
            }
            if mirror.position.piece_at(mv.from).map(|p| p.color) != Some(side) {
                debug!("Refused: no own piece on origin square");
                return false;
            }
            let next = match self.rules.apply(&mirror.position, &mv) {
                Ok(next) => next,
                Err(e) => {
                    debug!(error = %e, "Refused: illegal locally");
                    return false;
                }
            };

            mirror.status = self.rules.status(&next).into();
            let base = std::mem::replace(&mut mirror.position, next);
            v.pending = Pending::InFlight {
                base_version: mirror.version,
            };
            proposal = Some((base, v.pending));
            true
        });

        let Some((base, token)) = proposal else {
            return false;
        };

        let transport = Arc::clone(&self.transport);
        let view = Arc::clone(&self.view);
        let participant = self.participant.clone();
        let timeout = self.move_timeout;
        let span = info_span!("propose_move", participant = %self.participant, mv = %mv);
        self.runtime.spawn(
            async move {
                let sent = tokio::time::timeout(
                    timeout,
                    transport.propose_move(&participant, mv, base),
                )
                .await
                .unwrap_or(Err(TransportError::Timeout));

                match sent {
                    Ok(outcome) => {
                        match &outcome {
                            MoveOutcome::Committed(state) => {
                                info!(version = state.version, "Move confirmed")
                            }
                            MoveOutcome::Rejected { reason, .. } => {
                                info!(%reason, "Move rejected, rolling back")
                            }
                        }
                        adopt(&view, outcome.state(), Some(token));
                    }
                    Err(e) => {
                        warn!(error = %e, "Move outcome unknown, re-fetching state");
                        let Pending::InFlight { base_version } = token else {
                            return;
                        };
                        let unresolved = Pending::Unresolved { base_version };
                        view.send_if_modified(|v| {
                            if v.pending != token {
                                return false;
                            }
                            // A push past the base may already have landed.
                            let superseded = v
                                .mirror
                                .as_ref()
                                .is_some_and(|m| m.version > base_version);
                            v.pending = if superseded { Pending::Idle } else { unresolved };
                            true
                        });
                        resolve(view, transport, unresolved, timeout).await;
                    }
                }
            }
            .instrument(span),
        );

        true
    }

    /// Folds a pushed state into the mirror.
    pub fn on_push(&self, state: &SessionState) {
        apply_push(&self.view, state);
    }

    /// Re-fetches authoritative state. Resolves an unresolved proposal.
    #[instrument(skip(self), fields(participant = %self.participant))]
    pub async fn refresh(&self) -> Result<(), TransportError> {
        let state = self.transport.fetch_state().await?;
        let unresolved = match self.pending() {
            token @ Pending::Unresolved { .. } => Some(token),
            _ => None,
        };
        adopt(&self.view, &state, unresolved);
        Ok(())
    }

    /// Resigns the local side.
    #[instrument(skip(self), fields(participant = %self.participant))]
    pub async fn resign(&self) -> Result<MoveOutcome, TransportError> {
        let outcome = self.transport.resign(&self.participant).await?;
        adopt(&self.view, outcome.state(), None);
        Ok(outcome)
    }

    /// Stops listening and discards the mirror.
    #[instrument(skip(self), fields(participant = %self.participant))]
    pub fn detach(&mut self) {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        self.view.send_replace(ClientView::default());
        info!("Detached from session");
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        // Ends any re-fetch loop still waiting on an unresolved move.
        self.view.send_replace(ClientView::default());
    }
}
