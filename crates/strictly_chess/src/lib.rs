//! Pure chess rules.
//!
//! Positions are immutable values with a canonical FEN encoding. The crate
//! answers three questions about them and nothing else:
//!
//! - [`apply`]: what position results from a move, or why the move is illegal
//! - [`Position::side_to_move`]: whose turn it is
//! - [`outcome`]: whether play continues, and if not, how it ended
//!
//! # Example
//!
//! ```
//! use strictly_chess::{Move, Outcome, Position, apply, outcome};
//!
//! let start = Position::starting();
//! let next = apply(&start, &Move::parse("e2e4").unwrap()).unwrap();
//! assert_eq!(outcome(&next), Outcome::InProgress);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod action;
mod movegen;
mod position;
pub mod rules;
mod types;

pub use action::{IllegalMove, Move, Promotion};
pub use movegen::{apply, is_in_check, is_square_attacked, legal_moves};
pub use position::{FenError, Position, STARTING_FEN};
pub use rules::{Outcome, outcome};
pub use types::{CastlingRights, Color, Piece, PieceKind, Square};
