//! Legal move generation and move application.

use super::action::{IllegalMove, Move, Promotion};
use super::position::Position;
use super::types::{Color, Piece, PieceKind, Square};
use tracing::instrument;

const KNIGHT_STEPS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

const KING_STEPS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// Whether `square` is attacked by any piece of side `by`.
pub fn is_square_attacked(position: &Position, square: Square, by: Color) -> bool {
    let holds = |sq: Option<Square>, kinds: &[PieceKind]| {
        sq.and_then(|s| position.piece_at(s))
            .is_some_and(|p| p.color == by && kinds.contains(&p.kind))
    };

    // A pawn of `by` attacks diagonally forward, so look one rank behind.
    let back = -by.forward();
    if holds(square.offset(-1, back), &[PieceKind::Pawn])
        || holds(square.offset(1, back), &[PieceKind::Pawn])
    {
        return true;
    }

    if KNIGHT_STEPS
        .iter()
        .any(|&(df, dr)| holds(square.offset(df, dr), &[PieceKind::Knight]))
    {
        return true;
    }

    if KING_STEPS
        .iter()
        .any(|&(df, dr)| holds(square.offset(df, dr), &[PieceKind::King]))
    {
        return true;
    }

    let ray_hits = |dirs: &[(i8, i8)], kinds: &[PieceKind]| {
        dirs.iter().any(|&(df, dr)| {
            let mut cur = square.offset(df, dr);
            while let Some(sq) = cur {
                if let Some(p) = position.piece_at(sq) {
                    return p.color == by && kinds.contains(&p.kind);
                }
                cur = sq.offset(df, dr);
            }
            false
        })
    };

    ray_hits(&ROOK_DIRS, &[PieceKind::Rook, PieceKind::Queen])
        || ray_hits(&BISHOP_DIRS, &[PieceKind::Bishop, PieceKind::Queen])
}

/// Whether the given side's king is attacked.
pub fn is_in_check(position: &Position, color: Color) -> bool {
    position
        .king_square(color)
        .is_some_and(|king| is_square_attacked(position, king, color.opponent()))
}

/// All legal moves for the side to move.
#[instrument(level = "trace", skip(position), fields(fen = %position))]
pub fn legal_moves(position: &Position) -> Vec<Move> {
    let us = position.side_to_move();
    pseudo_legal_moves(position)
        .into_iter()
        .filter(|mv| !is_in_check(&make_unchecked(position, mv), us))
        .collect()
}

/// Applies a move, returning the resulting position.
///
/// The input position is never modified. A promotion choice on a move
/// that does not promote is ignored.
///
/// # Errors
///
/// Returns [`IllegalMove`] if the move is not among the legal moves.
#[instrument(level = "debug", skip(position), fields(fen = %position, mv = %mv))]
pub fn apply(position: &Position, mv: &Move) -> Result<Position, IllegalMove> {
    let piece = position
        .piece_at(mv.from)
        .ok_or(IllegalMove::EmptySquare(mv.from))?;
    if piece.color != position.side_to_move() {
        return Err(IllegalMove::WrongSide(mv.from));
    }

    let candidates: Vec<Move> = legal_moves(position)
        .into_iter()
        .filter(|m| m.from == mv.from && m.to == mv.to)
        .collect();

    let chosen = match candidates.first() {
        None => return Err(IllegalMove::NotLegal(*mv)),
        Some(first) if first.promotion.is_none() => *first,
        Some(_) => {
            let wanted = mv.promotion.ok_or(IllegalMove::MissingPromotion(*mv))?;
            candidates
                .into_iter()
                .find(|m| m.promotion == Some(wanted))
                .ok_or(IllegalMove::NotLegal(*mv))?
        }
    };

    Ok(make_unchecked(position, &chosen))
}

/// Plays a pseudo-legal move without checking king safety.
pub(crate) fn make_unchecked(position: &Position, mv: &Move) -> Position {
    let mut next = position.clone();
    let Some(piece) = position.piece_at(mv.from) else {
        return next;
    };
    let us = piece.color;
    let captured = position.piece_at(mv.to);

    next.board[mv.from.index()] = None;

    let is_en_passant = piece.kind == PieceKind::Pawn
        && Some(mv.to) == position.en_passant()
        && mv.from.file() != mv.to.file()
        && captured.is_none();
    if is_en_passant {
        if let Some(victim) = Square::new(mv.to.file(), mv.from.rank()) {
            next.board[victim.index()] = None;
        }
    }

    let placed = match mv.promotion {
        Some(promo) if piece.kind == PieceKind::Pawn && mv.to.rank() == us.promotion_rank() => {
            Piece::new(us, promo.kind())
        }
        _ => piece,
    };
    next.board[mv.to.index()] = Some(placed);

    if piece.kind == PieceKind::King {
        let rank = mv.from.rank();
        let shift = mv.to.file() as i8 - mv.from.file() as i8;
        let rook_hop = match shift {
            2 => Square::new(7, rank).zip(Square::new(5, rank)),
            -2 => Square::new(0, rank).zip(Square::new(3, rank)),
            _ => None,
        };
        if let Some((rook_from, rook_to)) = rook_hop {
            next.board[rook_to.index()] = next.board[rook_from.index()].take();
        }
        next.castling.clear_side(us);
    }
    next.castling.touch(mv.from);
    next.castling.touch(mv.to);

    next.en_passant = None;
    if piece.kind == PieceKind::Pawn && (mv.to.rank() as i8 - mv.from.rank() as i8).abs() == 2 {
        next.en_passant = Square::new(mv.from.file(), (mv.from.rank() + mv.to.rank()) / 2);
    }

    if piece.kind == PieceKind::Pawn || captured.is_some() || is_en_passant {
        next.halfmove_clock = 0;
    } else {
        next.halfmove_clock += 1;
    }
    if us == Color::Black {
        next.fullmove_number += 1;
    }
    next.side_to_move = us.opponent();

    next
}

fn pseudo_legal_moves(position: &Position) -> Vec<Move> {
    let us = position.side_to_move();
    let mut moves = Vec::with_capacity(48);

    for (from, piece) in position.pieces().filter(|(_, p)| p.color == us) {
        match piece.kind {
            PieceKind::Pawn => pawn_moves(position, from, us, &mut moves),
            PieceKind::Knight => step_moves(position, from, us, &KNIGHT_STEPS, &mut moves),
            PieceKind::Bishop => slide_moves(position, from, us, &BISHOP_DIRS, &mut moves),
            PieceKind::Rook => slide_moves(position, from, us, &ROOK_DIRS, &mut moves),
            PieceKind::Queen => {
                slide_moves(position, from, us, &ROOK_DIRS, &mut moves);
                slide_moves(position, from, us, &BISHOP_DIRS, &mut moves);
            }
            PieceKind::King => {
                step_moves(position, from, us, &KING_STEPS, &mut moves);
                castle_moves(position, from, us, &mut moves);
            }
        }
    }

    moves
}

fn push_pawn_move(from: Square, to: Square, us: Color, moves: &mut Vec<Move>) {
    if to.rank() == us.promotion_rank() {
        for promo in [
            Promotion::Queen,
            Promotion::Rook,
            Promotion::Bishop,
            Promotion::Knight,
        ] {
            moves.push(Move::with_promotion(from, to, promo));
        }
    } else {
        moves.push(Move::new(from, to));
    }
}

fn pawn_moves(position: &Position, from: Square, us: Color, moves: &mut Vec<Move>) {
    let dir = us.forward();

    if let Some(one) = from.offset(0, dir)
        && position.piece_at(one).is_none()
    {
        push_pawn_move(from, one, us, moves);
        if from.rank() == us.pawn_rank()
            && let Some(two) = one.offset(0, dir)
            && position.piece_at(two).is_none()
        {
            moves.push(Move::new(from, two));
        }
    }

    for df in [-1, 1] {
        let Some(target) = from.offset(df, dir) else {
            continue;
        };
        match position.piece_at(target) {
            Some(p) if p.color != us => push_pawn_move(from, target, us, moves),
            None if position.en_passant() == Some(target) => moves.push(Move::new(from, target)),
            _ => {}
        }
    }
}

fn step_moves(
    position: &Position,
    from: Square,
    us: Color,
    steps: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in steps {
        if let Some(to) = from.offset(df, dr)
            && position.piece_at(to).is_none_or(|p| p.color != us)
        {
            moves.push(Move::new(from, to));
        }
    }
}

fn slide_moves(
    position: &Position,
    from: Square,
    us: Color,
    dirs: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in dirs {
        let mut cur = from.offset(df, dr);
        while let Some(to) = cur {
            match position.piece_at(to) {
                None => moves.push(Move::new(from, to)),
                Some(p) => {
                    if p.color != us {
                        moves.push(Move::new(from, to));
                    }
                    break;
                }
            }
            cur = to.offset(df, dr);
        }
    }
}

fn castle_moves(position: &Position, from: Square, us: Color, moves: &mut Vec<Move>) {
    let rank = us.back_rank();
    if from.rank() != rank || from.file() != 4 {
        return;
    }
    let them = us.opponent();
    if is_square_attacked(position, from, them) {
        return;
    }

    let rook = Some(Piece::new(us, PieceKind::Rook));
    let empty = |files: &[u8]| {
        files
            .iter()
            .filter_map(|&f| Square::new(f, rank))
            .all(|sq| position.piece_at(sq).is_none())
    };
    let safe = |files: &[u8]| {
        files
            .iter()
            .filter_map(|&f| Square::new(f, rank))
            .all(|sq| !is_square_attacked(position, sq, them))
    };
    let rook_on = |file: u8| Square::new(file, rank).and_then(|sq| position.piece_at(sq)) == rook;

    if position.castling().kingside(us) && rook_on(7) && empty(&[5, 6]) && safe(&[5, 6])
        && let Some(to) = Square::new(6, rank)
    {
        moves.push(Move::new(from, to));
    }
    if position.castling().queenside(us) && rook_on(0) && empty(&[1, 2, 3]) && safe(&[2, 3])
        && let Some(to) = Square::new(2, rank)
    {
        moves.push(Move::new(from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perft(position: &Position, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        legal_moves(position)
            .iter()
            .map(|mv| perft(&make_unchecked(position, mv), depth - 1))
            .sum()
    }

    fn sq(s: &str) -> Square {
        Square::parse(s).unwrap()
    }

    #[test]
    fn test_perft_starting_position() {
        let pos = Position::starting();
        assert_eq!(perft(&pos, 1), 20);
        assert_eq!(perft(&pos, 2), 400);
        assert_eq!(perft(&pos, 3), 8902);
    }

    #[test]
    fn test_perft_kiwipete() {
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(perft(&pos, 1), 48);
        assert_eq!(perft(&pos, 2), 2039);
    }

    #[test]
    fn test_perft_en_passant_pins() {
        let pos = Position::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
        assert_eq!(perft(&pos, 1), 14);
        assert_eq!(perft(&pos, 2), 191);
        assert_eq!(perft(&pos, 3), 2812);
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let pos = Position::starting();
        let next = apply(&pos, &Move::new(sq("e2"), sq("e4"))).unwrap();
        assert_eq!(pos, Position::starting());
        assert_eq!(
            next.to_fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"
        );
    }

    #[test]
    fn test_apply_rejects_wrong_side_and_empty() {
        let pos = Position::starting();
        assert_eq!(
            apply(&pos, &Move::new(sq("e7"), sq("e5"))),
            Err(IllegalMove::WrongSide(sq("e7")))
        );
        assert_eq!(
            apply(&pos, &Move::new(sq("e4"), sq("e5"))),
            Err(IllegalMove::EmptySquare(sq("e4")))
        );
    }

    #[test]
    fn test_apply_rejects_blocked_path() {
        let pos = Position::starting();
        let mv = Move::new(sq("a1"), sq("a3"));
        assert_eq!(apply(&pos, &mv), Err(IllegalMove::NotLegal(mv)));
    }

    #[test]
    fn test_promotion_requires_choice() {
        let pos = Position::from_fen("7k/4P3/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let bare = Move::new(sq("e7"), sq("e8"));
        assert_eq!(apply(&pos, &bare), Err(IllegalMove::MissingPromotion(bare)));

        let knight = Move::with_promotion(sq("e7"), sq("e8"), Promotion::Knight);
        let next = apply(&pos, &knight).unwrap();
        assert_eq!(
            next.piece_at(sq("e8")),
            Some(Piece::new(Color::White, PieceKind::Knight))
        );
    }

    #[test]
    fn test_promotion_choice_ignored_on_ordinary_move() {
        let pos = Position::starting();
        let queen = Move::with_promotion(sq("g1"), sq("f3"), Promotion::Queen);
        let with = apply(&pos, &queen).unwrap();
        let without = apply(&pos, &Move::new(sq("g1"), sq("f3"))).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_castling_moves_rook_and_clears_rights() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let next = apply(&pos, &Move::new(sq("e1"), sq("g1"))).unwrap();
        assert_eq!(
            next.piece_at(sq("f1")),
            Some(Piece::new(Color::White, PieceKind::Rook))
        );
        assert_eq!(next.piece_at(sq("h1")), None);
        assert_eq!(next.castling().to_fen(), "kq");
    }

    #[test]
    fn test_cannot_castle_through_check() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/5r2/R3K2R w KQ - 0 1").unwrap();
        let mv = Move::new(sq("e1"), sq("g1"));
        assert_eq!(apply(&pos, &mv), Err(IllegalMove::NotLegal(mv)));
    }

    #[test]
    fn test_en_passant_capture_removes_pawn() {
        let pos = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 2").unwrap();
        let next = apply(&pos, &Move::new(sq("e5"), sq("d6"))).unwrap();
        assert_eq!(next.piece_at(sq("d5")), None);
        assert_eq!(
            next.piece_at(sq("d6")),
            Some(Piece::new(Color::White, PieceKind::Pawn))
        );
    }

    #[test]
    fn test_move_leaving_king_in_check_is_illegal() {
        // The e2 bishop is pinned against the king by the e8 rook.
        let pos = Position::from_fen("4r1k1/8/8/8/8/8/4B3/4K3 w - - 0 1").unwrap();
        let mv = Move::new(sq("e2"), sq("d3"));
        assert_eq!(apply(&pos, &mv), Err(IllegalMove::NotLegal(mv)));
    }
}
