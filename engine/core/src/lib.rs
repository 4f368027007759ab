//! Chess position model for the quartz engine.
//!
//! This crate wraps `shakmaty` into the small surface the search core
//! consumes: legal move generation, move application, repetition and
//! rule-50 tracking, a cache fingerprint, and the encoding of a position
//! history into neural network input planes.

pub mod encoder;
pub mod history;
pub mod position;

pub use encoder::{encode_planes, InputPlanes, Plane, AUX_PLANE_BASE, HISTORY_STEPS, NUM_PLANES};
pub use history::{GameResult, PositionHistory};
pub use position::{format_move, parse_move, Position, PositionError, STARTPOS_FEN};

// Convenient re-exports so downstream crates don't need a direct
// shakmaty dependency for the common types.
pub use shakmaty::{CastlingMode, Color, Move, MoveList, Role, Square};
