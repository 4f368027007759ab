//! Encoding of a position history into neural network input planes.
//!
//! The format is a fixed stack of 64-bit occupancy masks with a scalar
//! value each: twelve piece planes plus one repetition plane for each of
//! the last `HISTORY_STEPS` positions, followed by auxiliary planes for
//! castling rights, side to move and the no-progress counter. Everything
//! is oriented from the side to move's perspective (the board is flipped
//! when black is to move).

use crate::history::PositionHistory;
use crate::position::Position;
use shakmaty::{Color, Position as _, Role};

/// Number of history steps encoded.
pub const HISTORY_STEPS: usize = 4;

/// Planes per history step: six roles for each colour plus a repetition
/// indicator.
pub const PLANES_PER_STEP: usize = 13;

/// Index of the first auxiliary plane.
pub const AUX_PLANE_BASE: usize = HISTORY_STEPS * PLANES_PER_STEP;

/// Total planes per sample.
pub const NUM_PLANES: usize = AUX_PLANE_BASE + 6;

const ROLES: [Role; 6] = [
    Role::Pawn,
    Role::Knight,
    Role::Bishop,
    Role::Rook,
    Role::Queen,
    Role::King,
];

/// One input plane: an occupancy mask and a fill value. Mask planes carry
/// `value == 1.0`; scalar planes carry an all-ones mask and the scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub mask: u64,
    pub value: f32,
}

impl Plane {
    fn empty() -> Self {
        Plane {
            mask: 0,
            value: 1.0,
        }
    }

    fn scalar(value: f32) -> Self {
        Plane {
            mask: u64::MAX,
            value,
        }
    }
}

/// A full input sample for one position.
pub type InputPlanes = Vec<Plane>;

fn piece_mask(pos: &Position, color: Color, role: Role, flip: bool) -> u64 {
    let board = pos.inner().board();
    let bb = board.by_color(color) & board.by_role(role);
    let bb = if flip { bb.flip_vertical() } else { bb };
    bb.0
}

/// Encode the last positions of `history` into input planes.
///
/// The most recent position occupies the first 13 planes; older positions
/// follow. When the history is shorter than `HISTORY_STEPS` the missing
/// steps are zero planes, matching how the search evaluates positions near
/// the root of a fresh game.
pub fn encode_planes(history: &PositionHistory) -> InputPlanes {
    let mut planes = Vec::with_capacity(NUM_PLANES);
    let positions = history.positions();
    let current = history.last();
    let us = current.side_to_move();
    let flip = us == Color::Black;

    for step in 0..HISTORY_STEPS {
        if step >= positions.len() {
            for _ in 0..PLANES_PER_STEP {
                planes.push(Plane::empty());
            }
            continue;
        }
        let pos = &positions[positions.len() - 1 - step];
        for role in ROLES {
            planes.push(Plane {
                mask: piece_mask(pos, us, role, flip),
                value: 1.0,
            });
        }
        for role in ROLES {
            planes.push(Plane {
                mask: piece_mask(pos, us.other(), role, flip),
                value: 1.0,
            });
        }
        let repeated = step == 0 && history.repetitions() >= 1;
        planes.push(if repeated {
            Plane::scalar(1.0)
        } else {
            Plane::empty()
        });
    }

    let castles = current.inner().castles();
    let (short_us, long_us, short_them, long_them) = {
        let has = |color: Color, side: shakmaty::CastlingSide| {
            castles.rook(color, side).is_some()
        };
        (
            has(us, shakmaty::CastlingSide::KingSide),
            has(us, shakmaty::CastlingSide::QueenSide),
            has(us.other(), shakmaty::CastlingSide::KingSide),
            has(us.other(), shakmaty::CastlingSide::QueenSide),
        )
    };
    planes.push(Plane::scalar(short_us as u8 as f32));
    planes.push(Plane::scalar(long_us as u8 as f32));
    planes.push(Plane::scalar(short_them as u8 as f32));
    planes.push(Plane::scalar(long_them as u8 as f32));
    planes.push(Plane::scalar(if flip { 1.0 } else { 0.0 }));
    planes.push(Plane::scalar(current.rule50_ply() as f32 / 100.0));

    debug_assert_eq!(planes.len(), NUM_PLANES);
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::parse_move;

    #[test]
    fn startpos_encodes_full_stack() {
        let history = PositionHistory::starting_from(Position::startpos());
        let planes = encode_planes(&history);
        assert_eq!(planes.len(), NUM_PLANES);
        // Eight white pawns on the second rank.
        assert_eq!(planes[0].mask.count_ones(), 8);
        // One king each.
        assert_eq!(planes[5].mask.count_ones(), 1);
        assert_eq!(planes[11].mask.count_ones(), 1);
    }

    #[test]
    fn encoding_is_flipped_for_black() {
        let mut history = PositionHistory::starting_from(Position::startpos());
        let mv = parse_move(history.last(), "e2e4").unwrap();
        history.append(&mv);
        let planes = encode_planes(&history);
        // "Our" pawns are black's, flipped onto the low ranks.
        assert_eq!(planes[0].mask.count_ones(), 8);
        assert!(planes[0].mask & 0xff00 == 0xff00);
        // Side-to-move plane set for black.
        assert_eq!(planes[AUX_PLANE_BASE + 4].value, 1.0);
    }

    #[test]
    fn short_history_pads_with_zero_planes() {
        let history = PositionHistory::starting_from(Position::startpos());
        let planes = encode_planes(&history);
        // Second history step is all-zero masks.
        for plane in &planes[PLANES_PER_STEP..2 * PLANES_PER_STEP] {
            assert_eq!(plane.mask, 0);
        }
    }

    #[test]
    fn rule50_plane_scales() {
        let history = PositionHistory::starting_from(
            Position::from_fen("8/8/8/4k3/8/4K3/8/4R3 w - - 50 1").unwrap(),
        );
        let planes = encode_planes(&history);
        assert!((planes[AUX_PLANE_BASE + 5].value - 0.5).abs() < 1e-6);
    }
}
