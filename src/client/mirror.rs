//! Client-local mirror of a session and its reconciliation rule.

use crate::state::{GameStatus, Role, SessionState};
use serde::{Deserialize, Serialize};
use strictly_chess::Position;

/// A client's possibly-stale copy of the session.
///
/// `version` is the version of the last authoritative state adopted. A
/// mirror whose position differs from the authoritative position at that
/// version holds an unconfirmed local move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMirror {
    /// Position shown to the user.
    pub position: Position,
    /// Local participant's role.
    pub role: Role,
    /// Status shown to the user.
    pub status: GameStatus,
    /// Version of the last adopted authoritative state.
    pub version: u64,
}

impl ClientMirror {
    /// Builds a mirror from authoritative state.
    pub fn from_state(state: &SessionState, role: Role) -> Self {
        Self {
            position: state.position.clone(),
            role,
            status: state.status,
            version: state.version,
        }
    }
}

/// What to do with an incoming authoritative state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Adopt this mirror wholesale.
    Replace(ClientMirror),
    /// The mirror already shows this state.
    Unchanged,
    /// The incoming state is older than the mirror's; drop it.
    Stale,
}

/// Decides whether `incoming` supersedes `mirror`.
///
/// A higher version always wins. At equal versions the server's word
/// replaces any local speculation, and identical content is a no-op, which
/// makes applying the same state twice equivalent to applying it once.
pub fn reconcile(mirror: &ClientMirror, incoming: &SessionState) -> Reconciled {
    let adopt = || Reconciled::Replace(ClientMirror::from_state(incoming, mirror.role));

    if incoming.version > mirror.version {
        adopt()
    } else if incoming.version < mirror.version {
        Reconciled::Stale
    } else if incoming.position != mirror.position || incoming.status != mirror.status {
        adopt()
    } else {
        Reconciled::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ParticipantId, SessionId};
    use std::collections::BTreeMap;
    use strictly_chess::{Move, apply};

    fn state(position: Position, version: u64) -> SessionState {
        SessionState {
            session_id: SessionId::new("g").unwrap(),
            position,
            roles: BTreeMap::from([(ParticipantId::new("a").unwrap(), Role::FirstSide)]),
            status: GameStatus::InProgress,
            resigned: None,
            version,
        }
    }

    fn after(mv: &str) -> Position {
        apply(&Position::starting(), &Move::parse(mv).unwrap()).unwrap()
    }

    #[test]
    fn test_newer_version_replaces() {
        let mirror = ClientMirror::from_state(&state(Position::starting(), 0), Role::FirstSide);
        let incoming = state(after("e2e4"), 1);
        match reconcile(&mirror, &incoming) {
            Reconciled::Replace(m) => {
                assert_eq!(m.version, 1);
                assert_eq!(m.role, Role::FirstSide);
            }
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn test_older_version_is_stale() {
        let mirror = ClientMirror::from_state(&state(after("e2e4"), 3), Role::SecondSide);
        assert_eq!(
            reconcile(&mirror, &state(Position::starting(), 2)),
            Reconciled::Stale
        );
    }

    #[test]
    fn test_same_version_rolls_back_speculation() {
        let mut mirror = ClientMirror::from_state(&state(Position::starting(), 0), Role::FirstSide);
        mirror.position = after("d2d4");
        match reconcile(&mirror, &state(Position::starting(), 0)) {
            Reconciled::Replace(m) => assert_eq!(m.position, Position::starting()),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_state_is_unchanged() {
        let s = state(after("e2e4"), 1);
        let mirror = ClientMirror::from_state(&s, Role::FirstSide);
        assert_eq!(reconcile(&mirror, &s), Reconciled::Unchanged);
    }
}
