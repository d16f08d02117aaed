//! Authoritative game sessions.
//!
//! A [`GameSession`] owns the canonical position, the role assignment and
//! the status of one game. [`SessionManager`] keeps one session per
//! identifier, each behind its own lock, so operations on one game are
//! totally ordered while unrelated games never contend.

use crate::rules::Rules;
use crate::state::{
    GameStatus, JoinResponse, MoveOutcome, ParticipantId, PreferredRole, RejectReason, Role,
    SessionId, SessionState,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strictly_chess::{Color, Move, Position};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};

/// Default capacity of each session's push channel.
pub const DEFAULT_PUSH_CAPACITY: usize = 64;

/// Error addressing a session.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SessionError {
    /// No session with this identifier has been created.
    #[display("Session {} not found", _0)]
    NotFound(SessionId),
}

impl std::error::Error for SessionError {}

/// State of a single game session.
#[derive(Debug, Clone)]
pub struct GameSession {
    id: SessionId,
    position: Position,
    roles: BTreeMap<ParticipantId, Role>,
    status: GameStatus,
    resigned: Option<Color>,
    version: u64,
}

impl GameSession {
    /// Creates a session at the rules' initial position.
    #[instrument(skip(rules))]
    pub fn new(id: SessionId, rules: &dyn Rules) -> Self {
        let position = rules.initial_position();
        let status = rules.status(&position).into();
        info!(session_id = %id, fen = %position, "Creating new game session");
        Self {
            id,
            position,
            roles: BTreeMap::new(),
            status,
            resigned: None,
            version: 0,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Role held by a participant, if they have joined.
    pub fn role_of(&self, participant: &ParticipantId) -> Option<Role> {
        self.roles.get(participant).copied()
    }

    fn is_taken(&self, role: Role) -> bool {
        self.roles.values().any(|r| *r == role)
    }

    /// Snapshot of the authoritative state.
    pub fn state(&self) -> SessionState {
        SessionState {
            session_id: self.id.clone(),
            position: self.position.clone(),
            roles: self.roles.clone(),
            status: self.status,
            resigned: self.resigned,
            version: self.version,
        }
    }

    /// Assigns (or recovers) a participant's role.
    ///
    /// A participant who already holds a role keeps it. Otherwise the
    /// preferred side is granted if free, then any free side, then Observer.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn join(&mut self, participant: ParticipantId, preferred: PreferredRole) -> Role {
        if let Some(role) = self.role_of(&participant) {
            debug!(participant = %participant, %role, "Rejoin recovers existing role");
            return role;
        }

        let role = preferred
            .role()
            .filter(|r| !self.is_taken(*r))
            .or_else(|| {
                [Role::FirstSide, Role::SecondSide]
                    .into_iter()
                    .find(|r| !self.is_taken(*r))
            })
            .unwrap_or(Role::Observer);

        info!(participant = %participant, %role, ?preferred, "Assigned role");
        self.roles.insert(participant, role);
        role
    }

    fn reject(&self, reason: RejectReason, detail: Option<String>) -> MoveOutcome {
        MoveOutcome::Rejected {
            reason,
            detail,
            authoritative_state: self.state(),
        }
    }

    /// Validates a proposal against authoritative state and commits it if valid.
    ///
    /// Checks run in order: game over, turn, staleness, legality. Nothing is
    /// mutated unless every check passes.
    #[instrument(
        skip(self, rules, claimed_base),
        fields(session_id = %self.id, version = self.version)
    )]
    pub fn propose_move(
        &mut self,
        rules: &dyn Rules,
        participant: &ParticipantId,
        mv: &Move,
        claimed_base: &Position,
    ) -> MoveOutcome {
        if self.status.is_terminal() {
            debug!(status = %self.status, "Proposal after game end");
            return self.reject(RejectReason::GameOver, None);
        }

        let to_move = rules.side_to_move(&self.position);
        let side = self.role_of(participant).and_then(Role::side);
        if side != Some(to_move) {
            warn!(participant = %participant, ?side, %to_move, "Proposal out of turn");
            return self.reject(RejectReason::NotYourTurn, None);
        }

        if *claimed_base != self.position {
            warn!(
                participant = %participant,
                claimed = %claimed_base,
                actual = %self.position,
                "Proposal based on stale position"
            );
            return self.reject(RejectReason::StaleState, None);
        }

        let next = match rules.apply(&self.position, mv) {
            Ok(next) => next,
            Err(e) => {
                warn!(participant = %participant, mv = %mv, error = %e, "Illegal move");
                return self.reject(RejectReason::IllegalMove, Some(e.to_string()));
            }
        };

        self.status = rules.status(&next).into();
        self.position = next;
        self.version += 1;

        info!(
            participant = %participant,
            mv = %mv,
            status = %self.status,
            version = self.version,
            "Move committed"
        );
        MoveOutcome::Committed(self.state())
    }

    fn seated_side(&self, participant: &ParticipantId) -> Result<Color, MoveOutcome> {
        if self.status.is_terminal() {
            return Err(self.reject(RejectReason::GameOver, None));
        }
        self.role_of(participant)
            .and_then(Role::side)
            .ok_or_else(|| self.reject(RejectReason::NotSeated, None))
    }

    /// A seated player concedes the game.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn resign(&mut self, participant: &ParticipantId) -> MoveOutcome {
        let side = match self.seated_side(participant) {
            Ok(side) => side,
            Err(rejection) => return rejection,
        };
        self.status = GameStatus::Resigned;
        self.resigned = Some(side);
        self.version += 1;
        info!(participant = %participant, %side, version = self.version, "Player resigned");
        MoveOutcome::Committed(self.state())
    }

    /// A seated player ends the game without a result.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn abandon(&mut self, participant: &ParticipantId) -> MoveOutcome {
        if let Err(rejection) = self.seated_side(participant) {
            return rejection;
        }
        self.status = GameStatus::Abandoned;
        self.version += 1;
        info!(participant = %participant, version = self.version, "Game abandoned");
        MoveOutcome::Committed(self.state())
    }
}

/// One session plus the channel its commits are pushed on.
#[derive(Debug)]
struct SessionHandle {
    session: Mutex<GameSession>,
    pushes: broadcast::Sender<SessionState>,
}

impl SessionHandle {
    fn new(session: GameSession, capacity: usize) -> Self {
        let (pushes, _) = broadcast::channel(capacity.max(1));
        Self {
            session: Mutex::new(session),
            pushes,
        }
    }

    /// Sends a committed state to every subscriber. Called with the session
    /// lock held so subscribers observe commits in commit order.
    fn publish(&self, outcome: &MoveOutcome) {
        if let MoveOutcome::Committed(state) = outcome {
            match self.pushes.send(state.clone()) {
                Ok(receivers) => debug!(receivers, version = state.version, "Pushed state"),
                Err(_) => debug!(version = state.version, "No attached clients to push to"),
            }
        }
    }
}

/// Manages all game sessions.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionHandle>>>>,
    rules: Arc<dyn Rules>,
    push_capacity: usize,
}

impl SessionManager {
    /// Creates a session manager using the given rules.
    #[instrument]
    pub fn new(rules: Arc<dyn Rules>) -> Self {
        Self::with_capacity(rules, DEFAULT_PUSH_CAPACITY)
    }

    /// Creates a session manager with a custom push channel capacity.
    #[instrument]
    pub fn with_capacity(rules: Arc<dyn Rules>, push_capacity: usize) -> Self {
        info!(push_capacity, "Creating session manager");
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            rules,
            push_capacity,
        }
    }

    async fn get(&self, id: &SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    async fn get_or_create(&self, id: &SessionId) -> Arc<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions.entry(id.clone()).or_insert_with(|| {
            Arc::new(SessionHandle::new(
                GameSession::new(id.clone(), self.rules.as_ref()),
                self.push_capacity,
            ))
        });
        Arc::clone(handle)
    }

    /// Joins a session, creating it if the identifier is new.
    #[instrument(skip(self))]
    pub async fn join(
        &self,
        id: &SessionId,
        participant: ParticipantId,
        preferred: PreferredRole,
    ) -> JoinResponse {
        let handle = self.get_or_create(id).await;
        let mut session = handle.session.lock().await;
        let role = session.join(participant, preferred);
        JoinResponse {
            role,
            state: session.state(),
        }
    }

    /// Proposes a move in a session.
    #[instrument(skip(self, claimed_base))]
    pub async fn propose_move(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
        mv: &Move,
        claimed_base: &Position,
    ) -> Result<MoveOutcome, SessionError> {
        let handle = self.get(id).await?;
        let mut session = handle.session.lock().await;
        let outcome = session.propose_move(self.rules.as_ref(), participant, mv, claimed_base);
        handle.publish(&outcome);
        Ok(outcome)
    }

    /// Resigns on behalf of a seated participant.
    #[instrument(skip(self))]
    pub async fn resign(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<MoveOutcome, SessionError> {
        let handle = self.get(id).await?;
        let mut session = handle.session.lock().await;
        let outcome = session.resign(participant);
        handle.publish(&outcome);
        Ok(outcome)
    }

    /// Abandons the game on behalf of a seated participant.
    #[instrument(skip(self))]
    pub async fn abandon(
        &self,
        id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<MoveOutcome, SessionError> {
        let handle = self.get(id).await?;
        let mut session = handle.session.lock().await;
        let outcome = session.abandon(participant);
        handle.publish(&outcome);
        Ok(outcome)
    }

    /// Current authoritative state of a session.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, id: &SessionId) -> Result<SessionState, SessionError> {
        let handle = self.get(id).await?;
        let session = handle.session.lock().await;
        Ok(session.state())
    }

    /// Attaches to a session's push channel.
    ///
    /// Returns the current state together with a receiver of every later
    /// commit; both are taken under the session lock so nothing falls
    /// between them.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        id: &SessionId,
    ) -> Result<(SessionState, broadcast::Receiver<SessionState>), SessionError> {
        let handle = self.get(id).await?;
        let session = handle.session.lock().await;
        let receiver = handle.pushes.subscribe();
        debug!(attached = handle.pushes.receiver_count(), "Client attached");
        Ok((session.state(), receiver))
    }

    /// Lists all session identifiers.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Vec<SessionId> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<_> = sessions.keys().cloned().collect();
        ids.sort();
        info!(count = ids.len(), "Listed sessions");
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::StandardChess;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    fn session() -> GameSession {
        GameSession::new(SessionId::new("g1").unwrap(), &StandardChess::new())
    }

    #[test]
    fn test_preferred_side_granted_when_free() {
        let mut s = session();
        assert_eq!(s.join(pid("a"), PreferredRole::SecondSide), Role::SecondSide);
        assert_eq!(s.join(pid("b"), PreferredRole::SecondSide), Role::FirstSide);
        assert_eq!(s.join(pid("c"), PreferredRole::FirstSide), Role::Observer);
    }

    #[test]
    fn test_join_does_not_bump_version() {
        let mut s = session();
        s.join(pid("a"), PreferredRole::Any);
        assert_eq!(s.state().version, 0);
    }

    #[test]
    fn test_rejected_move_leaves_state_untouched() {
        let rules = StandardChess::new();
        let mut s = session();
        s.join(pid("a"), PreferredRole::Any);
        let before = s.state();
        let outcome = s.propose_move(
            &rules,
            &pid("a"),
            &Move::parse("e2e5").unwrap(),
            &Position::starting(),
        );
        assert_eq!(outcome.reason(), Some(RejectReason::IllegalMove));
        assert_eq!(s.state(), before);
    }

    #[test]
    fn test_unknown_participant_is_not_on_turn() {
        let rules = StandardChess::new();
        let mut s = session();
        let outcome = s.propose_move(
            &rules,
            &pid("stranger"),
            &Move::parse("e2e4").unwrap(),
            &Position::starting(),
        );
        assert_eq!(outcome.reason(), Some(RejectReason::NotYourTurn));
    }

    #[test]
    fn test_turn_is_checked_before_staleness() {
        let rules = StandardChess::new();
        let mut s = session();
        s.join(pid("a"), PreferredRole::Any);
        s.join(pid("b"), PreferredRole::Any);
        let e4 = Move::parse("e2e4").unwrap();
        assert!(s.propose_move(&rules, &pid("a"), &e4, &Position::starting()).is_ok());

        let again = Move::parse("d2d4").unwrap();
        let outcome = s.propose_move(&rules, &pid("a"), &again, &Position::starting());
        assert_eq!(outcome.reason(), Some(RejectReason::NotYourTurn));
        assert_eq!(outcome.state().version, 1);
    }

    #[test]
    fn test_observer_cannot_resign() {
        let mut s = session();
        s.join(pid("a"), PreferredRole::Any);
        s.join(pid("b"), PreferredRole::Any);
        s.join(pid("c"), PreferredRole::Any);
        assert_eq!(s.resign(&pid("c")).reason(), Some(RejectReason::NotSeated));
        let outcome = s.resign(&pid("b"));
        assert!(outcome.is_ok());
        assert_eq!(outcome.state().resigned, Some(Color::Black));
        assert_eq!(s.abandon(&pid("a")).reason(), Some(RejectReason::GameOver));
    }
}
