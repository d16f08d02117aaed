//! Shared state model for the session protocol.
//!
//! Everything that crosses the wire between a client and the session
//! agent lives here: identifiers, roles, the authoritative session state,
//! and the request/response shapes of the join and move calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strictly_chess::{Color, Move, Outcome, Position};

/// Longest identifier accepted at the boundary, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Rejected identifier.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum IdentifierError {
    /// Identifier is empty or only whitespace.
    #[display("{} must not be empty", _0)]
    Empty(&'static str),

    /// Identifier exceeds [`MAX_IDENTIFIER_LEN`].
    #[display("{} exceeds {} bytes", _0, MAX_IDENTIFIER_LEN)]
    TooLong(&'static str),

    /// Identifier contains whitespace or control characters.
    #[display("{} contains whitespace or control characters", _0)]
    InvalidCharacter(&'static str),
}

impl std::error::Error for IdentifierError {}

fn validate(kind: &'static str, raw: String) -> Result<String, IdentifierError> {
    if raw.trim().is_empty() {
        return Err(IdentifierError::Empty(kind));
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong(kind));
    }
    if raw.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(IdentifierError::InvalidCharacter(kind));
    }
    Ok(raw)
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps a raw identifier.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
                validate($kind, raw.into()).map(Self)
            }

            /// Generates a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

identifier!(
    /// Opaque identifier of a game session, chosen by whoever starts the game.
    SessionId,
    "session id"
);

identifier!(
    /// Stable identifier a client chooses for itself and keeps across reconnects.
    ParticipantId,
    "participant identity"
);

/// Role a participant holds in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Role {
    /// Plays the side that moves first (White).
    FirstSide,
    /// Plays the side that moves second (Black).
    SecondSide,
    /// Watches without moving.
    Observer,
}

impl Role {
    /// The board side this role plays, if any.
    pub fn side(self) -> Option<Color> {
        match self {
            Role::FirstSide => Some(Color::White),
            Role::SecondSide => Some(Color::Black),
            Role::Observer => None,
        }
    }
}

/// Role a participant asks for when joining.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum PreferredRole {
    /// Ask for the first side.
    FirstSide,
    /// Ask for the second side.
    SecondSide,
    /// Take whichever side is free.
    #[default]
    Any,
}

impl PreferredRole {
    /// The specific role asked for, if not `Any`.
    pub fn role(self) -> Option<Role> {
        match self {
            PreferredRole::FirstSide => Some(Role::FirstSide),
            PreferredRole::SecondSide => Some(Role::SecondSide),
            PreferredRole::Any => None,
        }
    }
}

/// Status of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GameStatus {
    /// Play continues.
    InProgress,
    /// Play continues; the side to move is in check.
    Check,
    /// The side to move is checkmated.
    Checkmate,
    /// The side to move has no legal move and is not in check.
    Stalemate,
    /// Drawn by rule.
    Draw,
    /// A player conceded.
    Resigned,
    /// A player ended the game without a result.
    Abandoned,
}

impl GameStatus {
    /// Whether no further moves will be accepted.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::InProgress | GameStatus::Check)
    }
}

impl From<Outcome> for GameStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::InProgress => GameStatus::InProgress,
            Outcome::Check => GameStatus::Check,
            Outcome::Checkmate => GameStatus::Checkmate,
            Outcome::Stalemate => GameStatus::Stalemate,
            Outcome::Draw => GameStatus::Draw,
        }
    }
}

/// Authoritative state of one session.
///
/// `version` starts at 0 and increases by one with every committed change,
/// so any two states of the same session are ordered by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Session this state belongs to.
    pub session_id: SessionId,
    /// Canonical board position.
    pub position: Position,
    /// Role of every participant that has joined.
    pub roles: BTreeMap<ParticipantId, Role>,
    /// Game status, derived from `position` and any resignation or abandonment.
    pub status: GameStatus,
    /// Side that resigned, when `status` is `Resigned`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resigned: Option<Color>,
    /// Commit counter.
    pub version: u64,
}

impl SessionState {
    /// Side to move in the authoritative position.
    pub fn side_to_move(&self) -> Color {
        self.position.side_to_move()
    }
}

/// Why a proposal was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum RejectReason {
    /// The proposer does not play the side to move (or only observes).
    NotYourTurn,
    /// The claimed base position is not the authoritative one.
    StaleState,
    /// The rules do not allow the move.
    IllegalMove,
    /// The game has already ended.
    GameOver,
    /// Only a seated player may resign or abandon.
    NotSeated,
}

/// A move together with the position the proposer believed was current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveProposal {
    /// The move itself.
    #[serde(rename = "move")]
    pub mv: Move,
    /// Optimistic-concurrency token: the proposer's view of the current position.
    pub claimed_base_position: Position,
}

/// Result of a proposal (or a resignation/abandonment) as seen by the proposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The change was committed; carries the new state.
    Committed(SessionState),
    /// The change was refused; carries the current authoritative state.
    Rejected {
        /// Why it was refused.
        reason: RejectReason,
        /// Human-readable detail, e.g. the rules engine's message.
        detail: Option<String>,
        /// Authoritative state at the time of refusal.
        authoritative_state: SessionState,
    },
}

impl MoveOutcome {
    /// Whether the change was committed.
    pub fn is_ok(&self) -> bool {
        matches!(self, MoveOutcome::Committed(_))
    }

    /// The state the proposer should adopt.
    pub fn state(&self) -> &SessionState {
        match self {
            MoveOutcome::Committed(state) => state,
            MoveOutcome::Rejected {
                authoritative_state,
                ..
            } => authoritative_state,
        }
    }

    /// Rejection reason, if refused.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            MoveOutcome::Committed(_) => None,
            MoveOutcome::Rejected { reason, .. } => Some(*reason),
        }
    }
}

/// Join call request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Who is joining.
    pub participant_identity: ParticipantId,
    /// Role asked for.
    #[serde(default)]
    pub preferred_role: PreferredRole,
}

/// Join call response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Role assigned (or recovered on rejoin).
    pub role: Role,
    /// Current authoritative state.
    pub state: SessionState,
}

/// Move call request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Who is proposing.
    pub participant_identity: ParticipantId,
    /// The proposal.
    #[serde(flatten)]
    pub proposal: MoveProposal,
}

/// Request body naming only the caller (resign, abandon).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRequest {
    /// Who is calling.
    pub participant_identity: ParticipantId,
}

/// Move call response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    /// Whether the change was committed.
    pub ok: bool,
    /// New state, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<SessionState>,
    /// Authoritative state, on refusal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authoritative_state: Option<SessionState>,
    /// Refusal reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Refusal detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<MoveOutcome> for MoveResponse {
    fn from(outcome: MoveOutcome) -> Self {
        match outcome {
            MoveOutcome::Committed(state) => Self {
                ok: true,
                new_state: Some(state),
                authoritative_state: None,
                reason: None,
                detail: None,
            },
            MoveOutcome::Rejected {
                reason,
                detail,
                authoritative_state,
            } => Self {
                ok: false,
                new_state: None,
                authoritative_state: Some(authoritative_state),
                reason: Some(reason),
                detail,
            },
        }
    }
}

impl TryFrom<MoveResponse> for MoveOutcome {
    type Error = &'static str;

    fn try_from(response: MoveResponse) -> Result<Self, Self::Error> {
        if response.ok {
            let state = response.new_state.ok_or("ok response without newState")?;
            Ok(MoveOutcome::Committed(state))
        } else {
            Ok(MoveOutcome::Rejected {
                reason: response.reason.ok_or("rejection without reason")?,
                detail: response.detail,
                authoritative_state: response
                    .authoritative_state
                    .ok_or("rejection without authoritativeState")?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(ParticipantId::new("alice-42").is_ok());
        assert_eq!(
            ParticipantId::new("   "),
            Err(IdentifierError::Empty("participant identity"))
        );
        assert_eq!(
            SessionId::new("a b"),
            Err(IdentifierError::InvalidCharacter("session id"))
        );
        assert_eq!(
            SessionId::new("x".repeat(MAX_IDENTIFIER_LEN + 1)),
            Err(IdentifierError::TooLong("session id"))
        );
    }

    #[test]
    fn test_identifier_rejected_during_deserialization() {
        let result: Result<JoinRequest, _> =
            serde_json::from_str(r#"{"participantIdentity":"","preferredRole":"any"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_preferred_role_wire_names() {
        let req: JoinRequest =
            serde_json::from_str(r#"{"participantIdentity":"p1","preferredRole":"secondSide"}"#)
                .unwrap();
        assert_eq!(req.preferred_role, PreferredRole::SecondSide);
        assert_eq!("firstSide".parse::<PreferredRole>().unwrap(), PreferredRole::FirstSide);
    }

    #[test]
    fn test_move_request_wire_shape() {
        let json = serde_json::json!({
            "participantIdentity": "p1",
            "move": {"from": "e2", "to": "e4"},
            "claimedBasePosition": strictly_chess::STARTING_FEN,
        });
        let req: MoveRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.proposal.claimed_base_position, Position::starting());
        assert_eq!(req.proposal.mv, Move::parse("e2e4").unwrap());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!GameStatus::InProgress.is_terminal());
        assert!(!GameStatus::Check.is_terminal());
        assert!(GameStatus::Checkmate.is_terminal());
        assert!(GameStatus::Resigned.is_terminal());
        assert!(GameStatus::Abandoned.is_terminal());
    }

    #[test]
    fn test_reject_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RejectReason::StaleState).unwrap(),
            "\"StaleState\""
        );
    }
}
