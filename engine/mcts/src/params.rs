//! Search parameters.
//!
//! Every knob the search core reads, with the defaults and clamped ranges
//! advertised over UCI. The UCI layer owns the option registry; this
//! struct is the already-validated snapshot a `Search` is constructed
//! with.

/// Tuning parameters for one search. Constructed once per `go` from the
/// current option values; never mutated while workers run.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Exploration constant at `N == 0`; grows logarithmically with the
    /// parent visit count.
    pub cpuct_init: f32,
    /// Visit count scale of the exploration growth term.
    pub cpuct_base: f32,
    /// First-play urgency: how far below the parent's running value an
    /// unvisited child is assumed to sit, scaled by the explored prior
    /// mass.
    pub fpu_reduction: f32,
    /// Softmax temperature applied to raw policy logits at expansion.
    pub policy_softmax_temp: f32,
    /// Move-selection temperature at the root. Zero picks the most
    /// visited move.
    pub temperature: f32,
    /// Leaves gathered per worker before a network computation is
    /// submitted.
    pub minibatch_size: usize,
    /// Expansion collisions tolerated per gathering pass before the
    /// worker submits what it has.
    pub max_collision_events: u32,
    /// Early-stop factor: how aggressively to abandon a search whose
    /// best move can no longer be overtaken. Zero disables.
    pub smart_pruning_factor: f32,
    /// Minimum KL-divergence gain per node between stopper samples.
    /// Zero disables.
    pub kld_gain_threshold: f32,
    /// Slack subtracted from every time budget to absorb polling and
    /// I/O latency.
    pub move_overhead_ms: i64,
    /// Scale on the per-move time budget.
    pub slowmover: f32,
    /// Worker thread count.
    pub threads: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            cpuct_init: 1.745,
            cpuct_base: 38739.0,
            fpu_reduction: 0.330,
            policy_softmax_temp: 1.359,
            temperature: 0.0,
            minibatch_size: 32,
            max_collision_events: 32,
            smart_pruning_factor: 1.33,
            kld_gain_threshold: 0.0,
            move_overhead_ms: 100,
            slowmover: 1.0,
            threads: 2,
        }
    }
}

impl SearchParams {
    /// Exploration coefficient for a node with `n` visits:
    /// `c_init + ln((n + c_base + 1) / c_base)`.
    #[inline]
    pub fn cpuct(&self, n: u32) -> f32 {
        self.cpuct_init + ((n as f32 + self.cpuct_base + 1.0) / self.cpuct_base).ln()
    }

    /// Clamp everything to its advertised range. The UCI layer clamps
    /// spins on assignment already; this is the backstop for values
    /// arriving through config files.
    pub fn clamped(mut self) -> Self {
        self.cpuct_init = self.cpuct_init.clamp(0.0, 100.0);
        self.cpuct_base = self.cpuct_base.clamp(1.0, 1e9);
        self.fpu_reduction = self.fpu_reduction.clamp(-100.0, 100.0);
        self.policy_softmax_temp = self.policy_softmax_temp.clamp(0.1, 10.0);
        self.temperature = self.temperature.clamp(0.0, 100.0);
        self.minibatch_size = self.minibatch_size.clamp(1, 1024);
        self.max_collision_events = self.max_collision_events.clamp(1, 65536);
        self.smart_pruning_factor = self.smart_pruning_factor.clamp(0.0, 10.0);
        self.kld_gain_threshold = self.kld_gain_threshold.clamp(0.0, 1.0);
        self.move_overhead_ms = self.move_overhead_ms.clamp(0, 100_000);
        self.slowmover = self.slowmover.clamp(0.0, 100.0);
        self.threads = self.threads.clamp(1, 128);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpuct_grows_with_visits() {
        let params = SearchParams::default();
        let at_zero = params.cpuct(0);
        let at_many = params.cpuct(1_000_000);
        assert!(at_many > at_zero);
        assert!((at_zero - params.cpuct_init).abs() < 1e-3);
    }

    #[test]
    fn clamped_restores_out_of_range_values() {
        let params = SearchParams {
            threads: 0,
            minibatch_size: 1_000_000,
            temperature: -1.0,
            ..SearchParams::default()
        }
        .clamped();
        assert_eq!(params.threads, 1);
        assert_eq!(params.minibatch_size, 1024);
        assert_eq!(params.temperature, 0.0);
    }
}
