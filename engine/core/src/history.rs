//! Position history: the path of positions from a pinned root.
//!
//! The search never stores positions inside tree nodes; a descent carries a
//! `PositionHistory` and extends it move by move. The history is also what
//! decides adjudicated outcomes (repetition, rule 50), which need more
//! context than a single position.

use crate::position::{Position, PositionError};
use shakmaty::Move;

/// Outcome of a finished game, from the perspective of the side to move
/// in the final position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Undecided,
    /// Side to move has been checkmated.
    Lost,
    Drawn,
    /// Only reachable through tablebase knowledge; no chess rule awards a
    /// win to the side to move.
    Won,
}

/// A sequence of positions starting at some pinned ancestor.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    positions: Vec<Position>,
}

impl PositionHistory {
    pub fn starting_from(root: Position) -> Self {
        Self {
            positions: vec![root],
        }
    }

    pub fn from_fen_and_moves(fen: &str, moves: &[Move]) -> Result<Self, PositionError> {
        let mut history = Self::starting_from(Position::from_fen(fen)?);
        for mv in moves {
            history.append(mv);
        }
        Ok(history)
    }

    #[inline]
    pub fn last(&self) -> &Position {
        self.positions.last().expect("history is never empty")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn append(&mut self, mv: &Move) {
        let next = self.last().play(mv);
        self.positions.push(next);
    }

    pub fn pop(&mut self) {
        debug_assert!(self.positions.len() > 1);
        self.positions.pop();
    }

    /// Drop all but the pinned root, replacing it with `root`.
    pub fn reset(&mut self, root: Position) {
        self.positions.clear();
        self.positions.push(root);
    }

    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len >= 1);
        self.positions.truncate(len);
    }

    /// Number of earlier positions equal to the last one, scanning only as
    /// far back as the rule-50 window allows.
    pub fn repetitions(&self) -> usize {
        let last = self.last();
        let hash = last.repetition_hash();
        let window = last.rule50_ply() as usize;
        self.positions
            .iter()
            .rev()
            .skip(1)
            .take(window)
            .filter(|p| p.repetition_hash() == hash)
            .count()
    }

    /// Adjudicate the last position. Threefold repetition and the 50-move
    /// rule are treated as immediate draws, matching how the search scores
    /// them.
    pub fn compute_game_result(&self) -> GameResult {
        let pos = self.last();
        if pos.is_checkmate() {
            return GameResult::Lost;
        }
        if pos.is_stalemate() || pos.is_insufficient_material() {
            return GameResult::Drawn;
        }
        if pos.rule50_ply() >= 100 {
            return GameResult::Drawn;
        }
        if self.repetitions() >= 2 {
            return GameResult::Drawn;
        }
        GameResult::Undecided
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::parse_move;

    fn play(history: &mut PositionHistory, moves: &[&str]) {
        for s in moves {
            let mv = parse_move(history.last(), s).unwrap();
            history.append(&mv);
        }
    }

    #[test]
    fn fresh_game_is_undecided() {
        let history = PositionHistory::starting_from(Position::startpos());
        assert_eq!(history.compute_game_result(), GameResult::Undecided);
    }

    #[test]
    fn fools_mate_is_lost_for_side_to_move() {
        let mut history = PositionHistory::starting_from(Position::startpos());
        play(&mut history, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(history.compute_game_result(), GameResult::Lost);
    }

    #[test]
    fn stalemate_is_drawn() {
        let history = PositionHistory::starting_from(
            Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap(),
        );
        assert_eq!(history.compute_game_result(), GameResult::Drawn);
    }

    #[test]
    fn kvk_is_drawn_by_insufficient_material() {
        let history = PositionHistory::starting_from(
            Position::from_fen("7k/8/8/8/8/8/8/K7 w - - 0 1").unwrap(),
        );
        assert_eq!(history.compute_game_result(), GameResult::Drawn);
    }

    #[test]
    fn threefold_repetition_is_drawn() {
        let mut history = PositionHistory::starting_from(Position::startpos());
        play(
            &mut history,
            &[
                "g1f3", "g8f6", "f3g1", "f6g8", // second occurrence of startpos
                "g1f3", "g8f6", "f3g1", "f6g8", // third occurrence
            ],
        );
        assert_eq!(history.repetitions(), 2);
        assert_eq!(history.compute_game_result(), GameResult::Drawn);
    }

    #[test]
    fn rule50_draw_counts_from_fen() {
        let mut history = PositionHistory::starting_from(
            Position::from_fen("8/8/8/4k3/8/4K3/8/4R3 w - - 99 80").unwrap(),
        );
        assert_eq!(history.compute_game_result(), GameResult::Undecided);
        let mv = parse_move(history.last(), "e1d1").unwrap();
        history.append(&mv);
        assert_eq!(history.compute_game_result(), GameResult::Drawn);
    }

    #[test]
    fn from_fen_and_moves_builds_the_full_path() {
        let pos = Position::startpos();
        let mv = parse_move(&pos, "e2e4").unwrap();
        let history =
            PositionHistory::from_fen_and_moves(crate::position::STARTPOS_FEN, &[mv]).unwrap();
        assert_eq!(history.len(), 2);
    }
}
