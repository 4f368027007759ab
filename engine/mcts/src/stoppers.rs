//! Search termination predicates.
//!
//! A stopper answers "should the search end now?" from a feed of
//! iteration statistics. Stoppers compose as a flat list of concrete
//! variants rather than trait objects; `Chain` fires when any child
//! fires and routes the completion hook to the child that triggered.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Sampled view of a running search, produced by the reporter thread.
#[derive(Debug, Clone, Default)]
pub struct IterationStats {
    pub time_since_movestart_ms: i64,
    /// Visits at the root, including those inherited from tree reuse.
    pub total_nodes: i64,
    /// Visits added since this `go`.
    pub nodes_since_movestart: i64,
    pub average_depth: f64,
    /// Visit count per root edge, in edge order.
    pub edge_n: Vec<u32>,
}

/// Running lower bounds shared by the stoppers of one search. Each
/// update keeps the minimum, so several stoppers tighten the estimates
/// without clobbering each other.
#[derive(Debug, Clone)]
pub struct StopperHints {
    remaining_time_ms: i64,
    remaining_playouts: i64,
}

impl Default for StopperHints {
    fn default() -> Self {
        Self {
            remaining_time_ms: i64::MAX,
            remaining_playouts: i64::MAX,
        }
    }
}

impl StopperHints {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update_estimated_remaining_time_ms(&mut self, v: i64) {
        self.remaining_time_ms = self.remaining_time_ms.min(v);
    }

    pub fn estimated_remaining_time_ms(&self) -> i64 {
        self.remaining_time_ms
    }

    pub fn update_estimated_remaining_playouts(&mut self, v: i64) {
        self.remaining_playouts = self.remaining_playouts.min(v);
    }

    pub fn estimated_remaining_playouts(&self) -> i64 {
        self.remaining_playouts
    }
}

/// Bank of unspent time carried across moves. Shared between the time
/// manager and the move-time stoppers it hands out.
pub type TimeBank = Arc<Mutex<i64>>;

/// Time-budget stopper. Knows the full budget it was allotted so the
/// completion hook can return unspent time to the bank.
#[derive(Debug)]
pub struct MoveTimeStopper {
    pub budget_ms: i64,
    bank: Option<TimeBank>,
    bank_cap_ms: i64,
}

impl MoveTimeStopper {
    pub fn new(budget_ms: i64, bank: Option<TimeBank>, bank_cap_ms: i64) -> Self {
        Self {
            budget_ms,
            bank,
            bank_cap_ms,
        }
    }
}

/// KLD-gain stopper state: the root visit distribution at the previous
/// sampling point.
#[derive(Debug)]
pub struct KldGainStopper {
    threshold: f64,
    sample_interval: i64,
    prev_edge_n: Option<Vec<u32>>,
    prev_total: i64,
}

impl KldGainStopper {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            sample_interval: 100,
            prev_edge_n: None,
            prev_total: 0,
        }
    }
}

/// A search termination predicate.
#[derive(Debug)]
pub enum SearchStopper {
    /// Stop once the root has seen this many visits in total.
    Visits { limit: i64 },
    /// Stop once this many visits were added since movestart.
    Playouts { limit: i64 },
    /// Stop once the average descent depth reaches the limit.
    Depth { limit: f64 },
    /// Stop at a wall-clock budget.
    MoveTime(MoveTimeStopper),
    /// Stop when no other root move can catch up with the best one
    /// within the estimated remaining playouts.
    SmartPruning { factor: f64 },
    /// Stop when the visit distribution has stopped moving.
    KldGain(KldGainStopper),
    /// Stop when any child stops.
    Chain {
        children: Vec<SearchStopper>,
        fired: Option<usize>,
    },
}

impl SearchStopper {
    pub fn chain(children: Vec<SearchStopper>) -> SearchStopper {
        SearchStopper::Chain {
            children,
            fired: None,
        }
    }

    pub fn should_stop(&mut self, stats: &IterationStats, hints: &mut StopperHints) -> bool {
        match self {
            SearchStopper::Visits { limit } => {
                hints.update_estimated_remaining_playouts(*limit - stats.total_nodes);
                stats.total_nodes >= *limit
            }
            SearchStopper::Playouts { limit } => {
                hints.update_estimated_remaining_playouts(*limit - stats.nodes_since_movestart);
                stats.nodes_since_movestart >= *limit
            }
            SearchStopper::Depth { limit } => stats.average_depth >= *limit,
            SearchStopper::MoveTime(inner) => {
                let remaining = inner.budget_ms - stats.time_since_movestart_ms;
                hints.update_estimated_remaining_time_ms(remaining);
                if stats.time_since_movestart_ms > 0 && stats.nodes_since_movestart > 0 {
                    let nps = stats.nodes_since_movestart as f64
                        / stats.time_since_movestart_ms as f64;
                    hints.update_estimated_remaining_playouts(
                        (remaining.max(0) as f64 * nps) as i64,
                    );
                }
                remaining <= 0
            }
            SearchStopper::SmartPruning { factor } => {
                if *factor <= 0.0 || stats.edge_n.len() < 2 {
                    return false;
                }
                let remaining = hints.estimated_remaining_playouts();
                if remaining == i64::MAX {
                    return false;
                }
                let mut best = 0i64;
                let mut second = 0i64;
                for &n in &stats.edge_n {
                    let n = n as i64;
                    if n > best {
                        second = best;
                        best = n;
                    } else if n > second {
                        second = n;
                    }
                }
                // The factor discounts how many of the remaining playouts
                // the runner-up can realistically claim.
                if (best - second) as f64 > remaining as f64 / *factor {
                    debug!(best, second, remaining, "smart pruning: best move can't be caught");
                    return true;
                }
                false
            }
            SearchStopper::KldGain(inner) => {
                let total = stats.nodes_since_movestart;
                if total - inner.prev_total < inner.sample_interval {
                    return false;
                }
                let result = match &inner.prev_edge_n {
                    Some(prev) if prev.len() == stats.edge_n.len() && !prev.is_empty() => {
                        let old_sum: f64 =
                            prev.iter().map(|&n| n as f64 + 0.5).sum();
                        let new_sum: f64 =
                            stats.edge_n.iter().map(|&n| n as f64 + 0.5).sum();
                        let mut kld = 0.0f64;
                        for (&old, &new) in prev.iter().zip(stats.edge_n.iter()) {
                            let p = (new as f64 + 0.5) / new_sum;
                            let q = (old as f64 + 0.5) / old_sum;
                            kld += p * (p / q).ln();
                        }
                        let gain = kld / (total - inner.prev_total) as f64;
                        gain < inner.threshold
                    }
                    _ => false,
                };
                inner.prev_edge_n = Some(stats.edge_n.clone());
                inner.prev_total = total;
                result
            }
            SearchStopper::Chain { children, fired } => {
                for (i, child) in children.iter_mut().enumerate() {
                    if child.should_stop(stats, hints) {
                        if fired.is_none() {
                            *fired = Some(i);
                        }
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Completion hook, called once on the stopper that triggered.
    pub fn on_search_done(&mut self, stats: &IterationStats) {
        match self {
            SearchStopper::MoveTime(inner) => {
                if let Some(bank) = &inner.bank {
                    let spared = inner.budget_ms - stats.time_since_movestart_ms;
                    let mut bank = bank.lock();
                    *bank = (*bank + spared).clamp(0, inner.bank_cap_ms);
                    debug!(spared, bank = *bank, "time bank updated");
                }
            }
            SearchStopper::Chain { children, fired } => {
                if let Some(i) = *fired {
                    children[i].on_search_done(stats);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: i64, since: i64, time_ms: i64) -> IterationStats {
        IterationStats {
            time_since_movestart_ms: time_ms,
            total_nodes: total,
            nodes_since_movestart: since,
            average_depth: 0.0,
            edge_n: Vec::new(),
        }
    }

    #[test]
    fn visits_limit_fires_at_total() {
        let mut stopper = SearchStopper::Visits { limit: 100 };
        let mut hints = StopperHints::default();
        assert!(!stopper.should_stop(&stats(99, 10, 0), &mut hints));
        assert!(stopper.should_stop(&stats(100, 10, 0), &mut hints));
        assert_eq!(hints.estimated_remaining_playouts(), 0);
    }

    #[test]
    fn playouts_limit_ignores_reused_visits() {
        let mut stopper = SearchStopper::Playouts { limit: 50 };
        let mut hints = StopperHints::default();
        assert!(!stopper.should_stop(&stats(1000, 49, 0), &mut hints));
        assert!(stopper.should_stop(&stats(1000, 50, 0), &mut hints));
    }

    #[test]
    fn depth_limit() {
        let mut stopper = SearchStopper::Depth { limit: 8.0 };
        let mut hints = StopperHints::default();
        let mut s = stats(0, 0, 0);
        s.average_depth = 7.9;
        assert!(!stopper.should_stop(&s, &mut hints));
        s.average_depth = 8.0;
        assert!(stopper.should_stop(&s, &mut hints));
    }

    #[test]
    fn movetime_fires_and_updates_hints() {
        let mut stopper =
            SearchStopper::MoveTime(MoveTimeStopper::new(1000, None, 0));
        let mut hints = StopperHints::default();
        assert!(!stopper.should_stop(&stats(0, 500, 500), &mut hints));
        assert_eq!(hints.estimated_remaining_time_ms(), 500);
        // nps is 1 node/ms, so ~500 playouts remain.
        assert_eq!(hints.estimated_remaining_playouts(), 500);
        assert!(stopper.should_stop(&stats(0, 1000, 1000), &mut hints));
    }

    #[test]
    fn hints_combine_by_minimum() {
        let mut hints = StopperHints::default();
        hints.update_estimated_remaining_time_ms(800);
        hints.update_estimated_remaining_time_ms(1200);
        assert_eq!(hints.estimated_remaining_time_ms(), 800);
    }

    #[test]
    fn smart_pruning_stops_unassailable_lead() {
        let mut stopper = SearchStopper::SmartPruning { factor: 1.0 };
        let mut hints = StopperHints::default();
        let mut s = stats(0, 0, 0);
        s.edge_n = vec![900, 50, 10];
        // No playout estimate yet: never fires.
        assert!(!stopper.should_stop(&s, &mut hints));
        hints.update_estimated_remaining_playouts(100);
        assert!(stopper.should_stop(&s, &mut hints));
        // A catchable lead keeps searching.
        hints.reset();
        hints.update_estimated_remaining_playouts(10_000);
        assert!(!stopper.should_stop(&s, &mut hints));
    }

    #[test]
    fn kld_gain_stops_when_distribution_settles() {
        let mut stopper = SearchStopper::KldGain(KldGainStopper::new(1e-5));
        let mut hints = StopperHints::default();
        let mut s = stats(0, 100, 0);
        s.edge_n = vec![60, 40];
        // First sample only records.
        assert!(!stopper.should_stop(&s, &mut hints));
        // Distribution unchanged after 200 more playouts: gain ~ 0.
        let mut s2 = stats(0, 300, 0);
        s2.edge_n = vec![180, 120];
        assert!(stopper.should_stop(&s2, &mut hints));
    }

    #[test]
    fn kld_gain_keeps_going_while_moving() {
        let mut stopper = SearchStopper::KldGain(KldGainStopper::new(1e-5));
        let mut hints = StopperHints::default();
        let mut s = stats(0, 100, 0);
        s.edge_n = vec![60, 40];
        assert!(!stopper.should_stop(&s, &mut hints));
        let mut s2 = stats(0, 300, 0);
        s2.edge_n = vec![100, 200]; // lead flipped; still learning
        assert!(!stopper.should_stop(&s2, &mut hints));
    }

    #[test]
    fn chain_fires_on_any_child_and_routes_done() {
        let bank: TimeBank = Arc::new(Mutex::new(0));
        let mut stopper = SearchStopper::chain(vec![
            SearchStopper::Visits { limit: 1_000_000 },
            SearchStopper::MoveTime(MoveTimeStopper::new(100, Some(Arc::clone(&bank)), 5000)),
        ]);
        let mut hints = StopperHints::default();
        let s = stats(10, 10, 40);
        assert!(!stopper.should_stop(&s, &mut hints));
        assert!(stopper.should_stop(&stats(10, 10, 100), &mut hints));
        // Done hook reaches the move-time child: 0 ms spared.
        stopper.on_search_done(&stats(10, 10, 100));
        assert_eq!(*bank.lock(), 0);

        // A faster stop banks the unspent budget.
        let bank2: TimeBank = Arc::new(Mutex::new(0));
        let mut quick = SearchStopper::chain(vec![SearchStopper::MoveTime(
            MoveTimeStopper::new(100, Some(Arc::clone(&bank2)), 5000),
        )]);
        let early = stats(10, 10, 30);
        assert!(!quick.should_stop(&early, &mut hints));
        quick.on_search_done(&early);
        assert_eq!(*bank2.lock(), 70);
    }
}
