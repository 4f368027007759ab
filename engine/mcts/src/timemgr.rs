//! Per-move time budgeting.
//!
//! Turns the UCI clock state into a configured stopper chain. Unspent
//! budget is banked across moves and drawn down when a later move runs
//! long; the bank is capped and zeroed on `reset_game`. This is the
//! bank-and-draw model; the cap keeps one fast move from funding a
//! minute-long think later.

use crate::params::SearchParams;
use crate::stoppers::{KldGainStopper, MoveTimeStopper, SearchStopper, TimeBank};
use engine_core::{Color, Position};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Everything a UCI `go` can carry.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    pub wtime: Option<i64>,
    pub btime: Option<i64>,
    pub winc: Option<i64>,
    pub binc: Option<i64>,
    pub movestogo: Option<i64>,
    pub movetime: Option<i64>,
    pub nodes: Option<i64>,
    pub depth: Option<i64>,
    pub infinite: bool,
    pub ponder: bool,
    pub searchmoves: Vec<String>,
}

/// Fraction of the remaining clock a single move may consume.
const MAX_TIME_FRACTION: f64 = 0.95;

pub struct TimeManager {
    bank: TimeBank,
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeManager {
    pub fn new() -> Self {
        Self {
            bank: Arc::new(Mutex::new(0)),
        }
    }

    /// Zero the spared-time bank. Called on `ucinewgame` and whenever the
    /// tree decides the position is not a continuation of the same game.
    pub fn reset_game(&self) {
        *self.bank.lock() = 0;
    }

    #[cfg(test)]
    pub fn banked_ms(&self) -> i64 {
        *self.bank.lock()
    }

    fn bank_cap_ms(&self, params: &SearchParams) -> i64 {
        10 * params.move_overhead_ms + 1000
    }

    /// When no `movestogo` is given, guess how many moves remain from the
    /// game ply: long at the start, never below a dozen.
    fn moves_left_estimate(position: &Position) -> i64 {
        (50 - position.game_ply() as i64 / 2).clamp(12, 50)
    }

    /// Build the stopper chain for one `go`.
    pub fn get_stopper(
        &self,
        params: &SearchParams,
        go: &GoParams,
        position: &Position,
    ) -> SearchStopper {
        let mut children = Vec::new();

        // Pondering behaves as infinite; the ponderhit re-issues `go`
        // with the real clock.
        let timed = !go.infinite && !go.ponder;

        if timed {
            if let Some(movetime) = go.movetime {
                let budget = (movetime - params.move_overhead_ms).max(0);
                children.push(SearchStopper::MoveTime(MoveTimeStopper::new(
                    budget, None, 0,
                )));
            }

            let (remaining, increment) = match position.side_to_move() {
                Color::White => (go.wtime, go.winc.unwrap_or(0)),
                Color::Black => (go.btime, go.binc.unwrap_or(0)),
            };
            if let Some(remaining) = remaining {
                let moves_to_go = go
                    .movestogo
                    .filter(|&m| m > 0)
                    .unwrap_or_else(|| Self::moves_left_estimate(position));
                let base = remaining as f64 / moves_to_go as f64 + increment as f64;
                let grant = base * params.slowmover as f64;
                let cap = remaining as f64 * MAX_TIME_FRACTION;

                // Draw the whole bank; whatever goes unspent is banked
                // again when the stopper completes.
                let draw = std::mem::take(&mut *self.bank.lock());
                let budget =
                    ((grant + draw as f64).min(cap) as i64 - params.move_overhead_ms).max(0);
                debug!(
                    remaining,
                    moves_to_go, draw, budget, "time budget assigned"
                );
                children.push(SearchStopper::MoveTime(MoveTimeStopper::new(
                    budget,
                    Some(Arc::clone(&self.bank)),
                    self.bank_cap_ms(params),
                )));
            }

            if params.smart_pruning_factor > 0.0 {
                children.push(SearchStopper::SmartPruning {
                    factor: params.smart_pruning_factor as f64,
                });
            }
        }

        if let Some(nodes) = go.nodes {
            children.push(SearchStopper::Visits { limit: nodes });
        }
        if let Some(depth) = go.depth {
            children.push(SearchStopper::Depth {
                limit: depth as f64,
            });
        }
        if params.kld_gain_threshold > 0.0 {
            children.push(SearchStopper::KldGain(KldGainStopper::new(
                params.kld_gain_threshold as f64,
            )));
        }

        SearchStopper::chain(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stoppers::{IterationStats, StopperHints};

    fn params() -> SearchParams {
        SearchParams {
            move_overhead_ms: 100,
            smart_pruning_factor: 0.0,
            ..SearchParams::default()
        }
    }

    fn go_with_clock(wtime: i64) -> GoParams {
        GoParams {
            wtime: Some(wtime),
            ..GoParams::default()
        }
    }

    fn fire_time(stopper: &mut SearchStopper, elapsed_ms: i64) -> bool {
        let stats = IterationStats {
            time_since_movestart_ms: elapsed_ms,
            nodes_since_movestart: 1,
            ..IterationStats::default()
        };
        stopper.should_stop(&stats, &mut StopperHints::default())
    }

    #[test]
    fn movetime_budget_subtracts_overhead() {
        let tm = TimeManager::new();
        let go = GoParams {
            movetime: Some(1000),
            ..GoParams::default()
        };
        let mut stopper = tm.get_stopper(&params(), &go, &Position::startpos());
        assert!(!fire_time(&mut stopper, 899));
        assert!(fire_time(&mut stopper, 900));
    }

    #[test]
    fn clock_budget_uses_moves_left_estimate() {
        let tm = TimeManager::new();
        // 50s on the clock at the startpos: estimate 50 moves left,
        // base 1000ms, minus overhead.
        let mut stopper = tm.get_stopper(&params(), &go_with_clock(50_000), &Position::startpos());
        assert!(!fire_time(&mut stopper, 899));
        assert!(fire_time(&mut stopper, 900));
    }

    #[test]
    fn movestogo_overrides_estimate() {
        let tm = TimeManager::new();
        let go = GoParams {
            wtime: Some(10_000),
            movestogo: Some(10),
            ..GoParams::default()
        };
        let mut stopper = tm.get_stopper(&params(), &go, &Position::startpos());
        // base 1000ms - 100 overhead.
        assert!(!fire_time(&mut stopper, 899));
        assert!(fire_time(&mut stopper, 900));
    }

    #[test]
    fn unspent_time_is_banked_and_drawn() {
        let tm = TimeManager::new();
        let p = params();
        let mut stopper = tm.get_stopper(&p, &go_with_clock(50_000), &Position::startpos());
        // Budget 900ms, stopped after 200ms: 700ms spared.
        let early = IterationStats {
            time_since_movestart_ms: 200,
            ..IterationStats::default()
        };
        stopper.on_search_done(&early);
        assert_eq!(tm.banked_ms(), 700);

        // Next move draws the bank: budget 900 + 700.
        let mut next = tm.get_stopper(&p, &go_with_clock(50_000), &Position::startpos());
        assert_eq!(tm.banked_ms(), 0);
        assert!(!fire_time(&mut next, 1599));
        assert!(fire_time(&mut next, 1600));
    }

    #[test]
    fn bank_is_capped() {
        let tm = TimeManager::new();
        let p = params();
        let stopper_budget = 900; // as above
        for _ in 0..10 {
            let mut stopper = tm.get_stopper(&p, &go_with_clock(50_000), &Position::startpos());
            let instant_stop = IterationStats::default();
            let _ = fire_time(&mut stopper, stopper_budget);
            stopper.on_search_done(&instant_stop);
        }
        assert!(tm.banked_ms() <= 10 * p.move_overhead_ms + 1000);
    }

    #[test]
    fn reset_game_zeroes_the_bank() {
        let tm = TimeManager::new();
        let p = params();
        let stopper = tm.get_stopper(&p, &go_with_clock(50_000), &Position::startpos());
        drop(stopper);
        let mut s = tm.get_stopper(&p, &go_with_clock(50_000), &Position::startpos());
        s.on_search_done(&IterationStats::default());
        assert!(tm.banked_ms() > 0);
        tm.reset_game();
        assert_eq!(tm.banked_ms(), 0);
    }

    #[test]
    fn infinite_and_ponder_get_no_time_stoppers() {
        let tm = TimeManager::new();
        let go = GoParams {
            wtime: Some(1000),
            infinite: true,
            ..GoParams::default()
        };
        let mut stopper = tm.get_stopper(&params(), &go, &Position::startpos());
        assert!(!fire_time(&mut stopper, i64::MAX / 2));

        let go = GoParams {
            wtime: Some(1000),
            ponder: true,
            ..GoParams::default()
        };
        let mut stopper = tm.get_stopper(&params(), &go, &Position::startpos());
        assert!(!fire_time(&mut stopper, i64::MAX / 2));
    }

    #[test]
    fn cap_limits_single_move_spend() {
        let tm = TimeManager::new();
        let go = GoParams {
            wtime: Some(1000),
            movestogo: Some(1),
            ..GoParams::default()
        };
        // base would be 1000ms but the cap holds back 5%.
        let mut stopper = tm.get_stopper(&params(), &go, &Position::startpos());
        assert!(fire_time(&mut stopper, 851));
    }
}
