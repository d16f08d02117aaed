//! Seam between session logic and the legality engine.

use strictly_chess::{Color, FenError, IllegalMove, Move, Outcome, Position};
use tracing::instrument;

/// A deterministic, side-effect-free rules engine.
pub trait Rules: Send + Sync + std::fmt::Debug {
    /// Position every new session starts from.
    fn initial_position(&self) -> Position;

    /// Position after `mv`, or why it is illegal.
    fn apply(&self, position: &Position, mv: &Move) -> Result<Position, IllegalMove>;

    /// Side whose turn it is.
    fn side_to_move(&self, position: &Position) -> Color;

    /// Whether play continues, and if not, how it ended.
    fn status(&self, position: &Position) -> Outcome;
}

/// Standard chess, optionally from a custom starting position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardChess {
    start: Position,
}

impl StandardChess {
    /// Standard chess from the usual starting position.
    pub fn new() -> Self {
        Self {
            start: Position::starting(),
        }
    }

    /// Standard chess from a FEN starting position.
    #[instrument]
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        Ok(Self {
            start: Position::from_fen(fen)?,
        })
    }
}

impl Default for StandardChess {
    fn default() -> Self {
        Self::new()
    }
}

impl Rules for StandardChess {
    fn initial_position(&self) -> Position {
        self.start.clone()
    }

    fn apply(&self, position: &Position, mv: &Move) -> Result<Position, IllegalMove> {
        strictly_chess::apply(position, mv)
    }

    fn side_to_move(&self, position: &Position) -> Color {
        position.side_to_move()
    }

    fn status(&self, position: &Position) -> Outcome {
        strictly_chess::outcome(position)
    }
}
