//! A single chess position and its search-facing accessors.

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position as _};
use thiserror::Error;

/// FEN of the standard starting position.
pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid FEN \"{fen}\": {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("illegal move \"{0}\" in current position")]
    IllegalMove(String),
}

/// A chess position as seen by the search.
///
/// Wraps a `shakmaty::Chess` and precomputes the fingerprint used as the
/// evaluation cache key. The fingerprint mixes the Zobrist hash with the
/// no-progress counter so that positions differing only in rule-50 state
/// do not share cache entries.
#[derive(Debug, Clone)]
pub struct Position {
    inner: Chess,
    fingerprint: u64,
}

impl Position {
    pub fn startpos() -> Self {
        Self::from_inner(Chess::default())
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let parsed: Fen = fen.parse().map_err(|e| PositionError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })?;
        // Standard castling first; Chess960 setups (inner-file rooks) only
        // parse in Chess960 mode.
        let inner = parsed
            .clone()
            .into_position::<Chess>(CastlingMode::Standard)
            .or_else(|_| parsed.into_position::<Chess>(CastlingMode::Chess960))
            .map_err(|e| PositionError::InvalidFen {
                fen: fen.to_string(),
                reason: format!("{e}"),
            })?;
        Ok(Self::from_inner(inner))
    }

    fn from_inner(inner: Chess) -> Self {
        let zobrist: Zobrist64 = inner.zobrist_hash(EnPassantMode::Legal);
        // Mix in the no-progress counter with a 64-bit odd multiplier.
        let fingerprint = zobrist
            .0
            .wrapping_add((inner.halfmoves() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self { inner, fingerprint }
    }

    /// The cache key for this position. Equal fingerprints imply
    /// equivalent evaluation inputs.
    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Zobrist hash without the rule-50 mix, used for repetition detection.
    #[inline]
    pub fn repetition_hash(&self) -> u64 {
        let z: Zobrist64 = self.inner.zobrist_hash(EnPassantMode::Legal);
        z.0
    }

    #[inline]
    pub fn legal_moves(&self) -> MoveList {
        self.inner.legal_moves()
    }

    /// Apply a move, returning the successor position. The move must be
    /// legal in this position.
    pub fn play(&self, mv: &Move) -> Position {
        let mut next = self.inner.clone();
        next.play_unchecked(mv);
        Self::from_inner(next)
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.inner.turn()
    }

    #[inline]
    pub fn is_check(&self) -> bool {
        self.inner.is_check()
    }

    #[inline]
    pub fn is_checkmate(&self) -> bool {
        self.inner.is_checkmate()
    }

    #[inline]
    pub fn is_stalemate(&self) -> bool {
        self.inner.is_stalemate()
    }

    #[inline]
    pub fn is_insufficient_material(&self) -> bool {
        self.inner.is_insufficient_material()
    }

    /// Halfmove clock (moves since the last capture or pawn push).
    #[inline]
    pub fn rule50_ply(&self) -> u32 {
        self.inner.halfmoves()
    }

    /// Ply count derived from the fullmove number.
    #[inline]
    pub fn game_ply(&self) -> u32 {
        let full = u32::from(self.inner.fullmoves());
        (full - 1) * 2 + if self.inner.turn() == Color::Black { 1 } else { 0 }
    }

    /// Total men on the board, for tablebase gating.
    #[inline]
    pub fn piece_count(&self) -> usize {
        self.inner.board().occupied().count()
    }

    /// Whether any castling rights remain (tablebases assume none).
    #[inline]
    pub fn has_castling_rights(&self) -> bool {
        self.inner.castles().any()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.inner.clone(), EnPassantMode::Legal).to_string()
    }

    /// Access to the wrapped shakmaty position for encoding and probing.
    #[inline]
    pub fn inner(&self) -> &Chess {
        &self.inner
    }
}

/// Parse a long-algebraic move string against a position. Accepts both the
/// legacy castling form (`e1g1`) and the king-takes-rook form (`e1h1`).
pub fn parse_move(pos: &Position, s: &str) -> Result<Move, PositionError> {
    let uci: UciMove = s
        .parse()
        .map_err(|_| PositionError::IllegalMove(s.to_string()))?;
    uci.to_move(pos.inner())
        .map_err(|_| PositionError::IllegalMove(s.to_string()))
}

/// Render a move in long algebraic notation. With `chess960` false the
/// legacy castling encoding (`e1g1`) is used, otherwise king-takes-rook.
pub fn format_move(mv: &Move, chess960: bool) -> String {
    let mode = if chess960 {
        CastlingMode::Chess960
    } else {
        CastlingMode::Standard
    };
    mv.to_uci(mode).to_string()
}
