//! Game-ending rules for chess.
//!
//! Pure functions that classify a position. Everything here is a function
//! of the position alone; histories (and therefore repetition draws) are
//! not consulted.

pub mod draw;

pub use draw::{fifty_move_rule, insufficient_material};

use super::movegen::{is_in_check, legal_moves};
use super::position::Position;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Classification of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Play continues and the side to move is not in check.
    InProgress,
    /// Play continues and the side to move is in check.
    Check,
    /// The side to move is checkmated.
    Checkmate,
    /// The side to move has no legal move and is not in check.
    Stalemate,
    /// Drawn by the fifty-move rule or insufficient material.
    Draw,
}

impl Outcome {
    /// Whether no further moves can be played.
    pub fn is_terminal(self) -> bool {
        matches!(self, Outcome::Checkmate | Outcome::Stalemate | Outcome::Draw)
    }
}

/// Classifies a position.
#[instrument(level = "debug", skip(position), fields(fen = %position))]
pub fn outcome(position: &Position) -> Outcome {
    let in_check = is_in_check(position, position.side_to_move());

    if legal_moves(position).is_empty() {
        return if in_check {
            Outcome::Checkmate
        } else {
            Outcome::Stalemate
        };
    }

    if fifty_move_rule(position) || insufficient_material(position) {
        return Outcome::Draw;
    }

    if in_check {
        Outcome::Check
    } else {
        Outcome::InProgress
    }
}
