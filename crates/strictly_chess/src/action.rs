//! First-class move types for chess.
//!
//! A move is the player's intent (`from`, `to`, optional promotion choice).
//! It can be serialized, sent over the wire and validated against any
//! position independently of execution.

use super::types::{PieceKind, Square};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Piece a pawn may promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Promotion {
    /// Queen.
    #[serde(alias = "q")]
    Queen,
    /// Rook.
    #[serde(alias = "r")]
    Rook,
    /// Bishop.
    #[serde(alias = "b")]
    Bishop,
    /// Knight.
    #[serde(alias = "n")]
    Knight,
}

impl Promotion {
    /// The piece kind the pawn becomes.
    pub fn kind(self) -> PieceKind {
        match self {
            Promotion::Queen => PieceKind::Queen,
            Promotion::Rook => PieceKind::Rook,
            Promotion::Bishop => PieceKind::Bishop,
            Promotion::Knight => PieceKind::Knight,
        }
    }
}

/// A proposed move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// Origin square.
    pub from: Square,
    /// Destination square.
    pub to: Square,
    /// Promotion choice, required when a pawn reaches the last rank.
    #[serde(default, alias = "promotionChoice", skip_serializing_if = "Option::is_none")]
    pub promotion: Option<Promotion>,
}

impl Move {
    /// Creates a non-promoting move.
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    /// Creates a move with a promotion choice.
    pub fn with_promotion(from: Square, to: Square, promotion: Promotion) -> Self {
        Self {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    /// Parses coordinate notation such as `e2e4` or `e7e8q`.
    pub fn parse(s: &str) -> Option<Self> {
        if !s.is_ascii() || !(4..=5).contains(&s.len()) {
            return None;
        }
        let from = Square::parse(&s[0..2])?;
        let to = Square::parse(&s[2..4])?;
        let promotion = match s.get(4..5) {
            None => None,
            Some("q") => Some(Promotion::Queen),
            Some("r") => Some(Promotion::Rook),
            Some("b") => Some(Promotion::Bishop),
            Some("n") => Some(Promotion::Knight),
            Some(_) => return None,
        };
        Some(Self {
            from,
            to,
            promotion,
        })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.kind().letter())?;
        }
        Ok(())
    }
}

/// Why a move cannot be applied to a position.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum IllegalMove {
    /// There is no piece on the origin square.
    #[display("No piece on {}", _0)]
    EmptySquare(Square),

    /// The piece on the origin square belongs to the side not to move.
    #[display("Piece on {} does not belong to the side to move", _0)]
    WrongSide(Square),

    /// A pawn reached the last rank without a promotion choice.
    #[display("Move {} requires a promotion choice", _0)]
    MissingPromotion(Move),

    /// The piece cannot move there (blocked, wrong pattern, or leaves the king in check).
    #[display("Move {} is not legal", _0)]
    NotLegal(Move),
}

impl std::error::Error for IllegalMove {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coordinate_notation() {
        let mv = Move::parse("e7e8q").unwrap();
        assert_eq!(mv.from, Square::parse("e7").unwrap());
        assert_eq!(mv.to, Square::parse("e8").unwrap());
        assert_eq!(mv.promotion, Some(Promotion::Queen));
        assert_eq!(mv.to_string(), "e7e8q");
        assert_eq!(Move::parse("e7e8k"), None);
        assert_eq!(Move::parse("e2"), None);
    }

    #[test]
    fn test_move_json_shape() {
        let mv: Move = serde_json::from_str(r#"{"from":"e7","to":"e8","promotion":"q"}"#).unwrap();
        assert_eq!(mv.promotion, Some(Promotion::Queen));
        let plain = serde_json::to_value(Move::parse("e2e4").unwrap()).unwrap();
        assert_eq!(plain, serde_json::json!({"from": "e2", "to": "e4"}));
    }
}
