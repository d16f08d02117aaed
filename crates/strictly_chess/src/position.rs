//! Immutable board positions and their FEN encoding.

use super::types::{CastlingRights, Color, Piece, PieceKind, Square};
use serde::{Deserialize, Serialize};
use std::fmt;

/// FEN of the standard starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Error parsing a FEN string.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum FenError {
    /// Fewer than four space-separated fields.
    #[display("FEN needs at least 4 fields, got {}", _0)]
    MissingFields(usize),

    /// The placement field is malformed.
    #[display("Invalid piece placement: {}", _0)]
    Placement(String),

    /// Side to move is neither `w` nor `b`.
    #[display("Invalid side to move: {}", _0)]
    SideToMove(String),

    /// Castling field contains unexpected characters.
    #[display("Invalid castling rights: {}", _0)]
    Castling(String),

    /// En-passant field is not `-` or a square.
    #[display("Invalid en passant square: {}", _0)]
    EnPassant(String),

    /// A move counter is not a number.
    #[display("Invalid move counter: {}", _0)]
    Counter(String),

    /// Each side must have exactly one king.
    #[display("Each side must have exactly one king")]
    Kings,
}

impl std::error::Error for FenError {}

/// A complete chess position.
///
/// Positions are values: applying a move produces a new `Position`
/// and never mutates the old one. Two positions are equal exactly when
/// their FEN encodings are equal.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position {
    pub(crate) board: [Option<Piece>; 64],
    pub(crate) side_to_move: Color,
    pub(crate) castling: CastlingRights,
    pub(crate) en_passant: Option<Square>,
    pub(crate) halfmove_clock: u32,
    pub(crate) fullmove_number: u32,
}

impl Position {
    /// The standard starting position.
    pub fn starting() -> Self {
        let mut board = [None; 64];
        let back = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        for (file, kind) in back.into_iter().enumerate() {
            board[file] = Some(Piece::new(Color::White, kind));
            board[8 + file] = Some(Piece::new(Color::White, PieceKind::Pawn));
            board[48 + file] = Some(Piece::new(Color::Black, PieceKind::Pawn));
            board[56 + file] = Some(Piece::new(Color::Black, kind));
        }
        Self {
            board,
            side_to_move: Color::White,
            castling: CastlingRights::all(),
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    /// Parses a position from FEN. The two move counters may be omitted.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(FenError::MissingFields(fields.len()));
        }

        let board = parse_placement(fields[0])?;

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::SideToMove(other.to_string())),
        };

        let mut castling = CastlingRights::default();
        if fields[2] != "-" {
            for c in fields[2].chars() {
                match c {
                    'K' => castling.white_kingside = true,
                    'Q' => castling.white_queenside = true,
                    'k' => castling.black_kingside = true,
                    'q' => castling.black_queenside = true,
                    _ => return Err(FenError::Castling(fields[2].to_string())),
                }
            }
        }

        let en_passant = match fields[3] {
            "-" => None,
            sq => Some(Square::parse(sq).ok_or_else(|| FenError::EnPassant(sq.to_string()))?),
        };

        let halfmove_clock = match fields.get(4) {
            Some(s) => s.parse().map_err(|_| FenError::Counter(s.to_string()))?,
            None => 0,
        };
        let fullmove_number = match fields.get(5) {
            Some(s) => s.parse().map_err(|_| FenError::Counter(s.to_string()))?,
            None => 1,
        };

        for color in [Color::White, Color::Black] {
            let kings = board
                .iter()
                .filter(|p| **p == Some(Piece::new(color, PieceKind::King)))
                .count();
            if kings != 1 {
                return Err(FenError::Kings);
            }
        }

        Ok(Self {
            board,
            side_to_move,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        })
    }

    /// Encodes the position as FEN.
    pub fn to_fen(&self) -> String {
        let mut placement = String::new();
        for rank in (0..8).rev() {
            let mut empty = 0;
            for file in 0..8 {
                match self.board[rank * 8 + file] {
                    Some(piece) => {
                        if empty > 0 {
                            placement.push_str(&empty.to_string());
                            empty = 0;
                        }
                        placement.push(piece.to_fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                placement.push_str(&empty.to_string());
            }
            if rank > 0 {
                placement.push('/');
            }
        }

        let side = match self.side_to_move {
            Color::White => "w",
            Color::Black => "b",
        };
        let ep = self
            .en_passant
            .map(|sq| sq.to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{} {} {} {} {} {}",
            placement,
            side,
            self.castling.to_fen(),
            ep,
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    /// Piece on a square, if any.
    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.board[square.index()]
    }

    /// Side to move.
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    /// Remaining castling rights.
    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    /// En-passant target square, if the last move was a double pawn push.
    pub fn en_passant(&self) -> Option<Square> {
        self.en_passant
    }

    /// Half-moves since the last capture or pawn move.
    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    /// Full move number, starting at 1 and incremented after Black moves.
    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Square of the given side's king.
    pub fn king_square(&self, color: Color) -> Option<Square> {
        Square::all().find(|sq| self.board[sq.index()] == Some(Piece::new(color, PieceKind::King)))
    }

    /// Occupied squares with their pieces.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(|sq| self.board[sq.index()].map(|p| (sq, p)))
    }

    /// Text diagram of the board from White's side, rank 8 on top.
    pub fn display(&self) -> String {
        let mut result = String::new();
        for rank in (0..8u8).rev() {
            result.push(char::from(b'1' + rank));
            result.push(' ');
            for file in 0..8u8 {
                let symbol = Square::new(file, rank)
                    .and_then(|sq| self.piece_at(sq))
                    .map_or('.', Piece::to_fen_char);
                result.push(symbol);
                if file < 7 {
                    result.push(' ');
                }
            }
            result.push('\n');
        }
        result.push_str("  a b c d e f g h");
        result
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::starting()
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Position").field(&self.to_fen()).finish()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fen())
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.to_fen()
    }
}

impl TryFrom<String> for Position {
    type Error = FenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Position::from_fen(&value)
    }
}

fn parse_placement(field: &str) -> Result<[Option<Piece>; 64], FenError> {
    let ranks: Vec<&str> = field.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::Placement(field.to_string()));
    }

    let mut board = [None; 64];
    for (i, rank_str) in ranks.iter().enumerate() {
        let rank = 7 - i;
        let mut file = 0usize;
        for c in rank_str.chars() {
            if let Some(skip) = c.to_digit(10) {
                if !(1..=8).contains(&skip) {
                    return Err(FenError::Placement(field.to_string()));
                }
                file += skip as usize;
            } else {
                let piece =
                    Piece::from_fen_char(c).ok_or_else(|| FenError::Placement(field.to_string()))?;
                if file >= 8 {
                    return Err(FenError::Placement(field.to_string()));
                }
                board[rank * 8 + file] = Some(piece);
                file += 1;
            }
            if file > 8 {
                return Err(FenError::Placement(field.to_string()));
            }
        }
        if file != 8 {
            return Err(FenError::Placement(field.to_string()));
        }
    }
    Ok(board)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_position_fen() {
        assert_eq!(Position::starting().to_fen(), STARTING_FEN);
        assert_eq!(Position::from_fen(STARTING_FEN).unwrap(), Position::starting());
    }

    #[test]
    fn test_fen_counters_default() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - -").unwrap();
        assert_eq!(pos.halfmove_clock(), 0);
        assert_eq!(pos.fullmove_number(), 1);
    }

    #[test]
    fn test_fen_rejects_bad_placement() {
        assert!(matches!(
            Position::from_fen("rnbqkbnr/ppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"),
            Err(FenError::Placement(_))
        ));
    }

    #[test]
    fn test_fen_requires_kings() {
        assert_eq!(
            Position::from_fen("8/8/8/8/8/8/8/4K3 w - - 0 1"),
            Err(FenError::Kings)
        );
    }

    #[test]
    fn test_serde_uses_fen_string() {
        let json = serde_json::to_string(&Position::starting()).unwrap();
        assert_eq!(json, format!("\"{}\"", STARTING_FEN));
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Position::starting());
    }

    #[test]
    fn test_display_diagram() {
        let diagram = Position::starting().display();
        let lines: Vec<&str> = diagram.lines().collect();
        assert_eq!(lines[0], "8 r n b q k b n r");
        assert_eq!(lines[4], "4 . . . . . . . .");
        assert_eq!(lines[7], "1 R N B Q K B N R");
        assert_eq!(lines[8], "  a b c d e f g h");
    }
}
