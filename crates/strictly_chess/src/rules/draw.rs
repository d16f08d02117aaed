//! Draw detection for chess.

use super::super::position::Position;
use super::super::types::PieceKind;
use tracing::instrument;

/// Half-move clock value at which the fifty-move rule draws the game.
pub const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Whether fifty full moves have passed without a capture or pawn move.
pub fn fifty_move_rule(position: &Position) -> bool {
    position.halfmove_clock() >= FIFTY_MOVE_HALFMOVES
}

/// Whether neither side can possibly deliver mate.
///
/// Covers bare kings, a single minor piece, and any number of bishops
/// that all stand on squares of one color.
#[instrument(level = "trace", skip(position))]
pub fn insufficient_material(position: &Position) -> bool {
    let extras: Vec<_> = position
        .pieces()
        .filter(|(_, p)| p.kind != PieceKind::King)
        .collect();

    if extras
        .iter()
        .any(|(_, p)| matches!(p.kind, PieceKind::Pawn | PieceKind::Rook | PieceKind::Queen))
    {
        return false;
    }

    match extras.as_slice() {
        [] | [_] => true,
        [(first, _), ..] => extras
            .iter()
            .all(|(sq, p)| p.kind == PieceKind::Bishop && sq.is_light() == first.is_light()),
    }
}
