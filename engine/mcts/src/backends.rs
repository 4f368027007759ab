//! Built-in CPU backends.
//!
//! Neither is a real network: `RandomBackend` produces deterministic
//! pseudo-random evaluations seeded from the input planes (useful for
//! reproducibility tests and smoke runs), and `MaterialBackend` counts
//! material so the engine plays plausible chess without weights.

use crate::network::{BackendError, Computation, Network, NetworkOutput};
use engine_core::InputPlanes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHasher;
use std::hash::Hasher;

fn planes_seed(planes: &InputPlanes) -> u64 {
    let mut hasher = FxHasher::default();
    for plane in planes {
        hasher.write_u64(plane.mask);
        hasher.write_u32(plane.value.to_bits());
    }
    hasher.finish()
}

fn uniform_policy(num_moves: usize) -> Box<[f32]> {
    let p = if num_moves == 0 {
        0.0
    } else {
        1.0 / num_moves as f32
    };
    vec![p; num_moves].into_boxed_slice()
}

struct Pending {
    planes: InputPlanes,
    num_moves: usize,
}

// ---------------------------------------------------------------------
// Random backend
// ---------------------------------------------------------------------

/// Deterministic noise: the same position always evaluates the same way,
/// so single-threaded searches are exactly reproducible.
pub struct RandomBackend;

struct RandomComputation {
    pending: Vec<Pending>,
    outputs: Vec<NetworkOutput>,
}

impl Network for RandomBackend {
    fn name(&self) -> &'static str {
        "random"
    }

    fn new_computation(&self) -> Box<dyn Computation> {
        Box::new(RandomComputation {
            pending: Vec::new(),
            outputs: Vec::new(),
        })
    }
}

impl Computation for RandomComputation {
    fn add_input(&mut self, planes: InputPlanes, num_moves: usize) {
        self.pending.push(Pending { planes, num_moves });
    }

    fn batch_size(&self) -> usize {
        self.pending.len()
    }

    fn compute_blocking(&mut self) -> Result<(), BackendError> {
        self.outputs = self
            .pending
            .drain(..)
            .map(|sample| {
                let mut rng = ChaCha8Rng::seed_from_u64(planes_seed(&sample.planes));
                let q: f32 = rng.gen_range(-0.2..0.2);
                let d: f32 = rng.gen_range(0.0..0.6);
                let m: f32 = rng.gen_range(10.0..80.0);
                let mut policy: Vec<f32> =
                    (0..sample.num_moves).map(|_| rng.gen_range(0.1..1.0)).collect();
                let sum: f32 = policy.iter().sum();
                if sum > 0.0 {
                    for p in policy.iter_mut() {
                        *p /= sum;
                    }
                }
                NetworkOutput {
                    q,
                    d,
                    m,
                    policy: policy.into_boxed_slice(),
                }
            })
            .collect();
        Ok(())
    }

    fn output(&self, idx: usize) -> &NetworkOutput {
        &self.outputs[idx]
    }
}

// ---------------------------------------------------------------------
// Material backend
// ---------------------------------------------------------------------

/// Pawn-unit values for the first five roles of each colour block; kings
/// carry no material.
const ROLE_VALUES: [f32; 6] = [1.0, 3.0, 3.0, 5.0, 9.0, 0.0];

/// Evaluates material balance from the occupancy planes of the current
/// position, with a uniform policy.
pub struct MaterialBackend;

struct MaterialComputation {
    pending: Vec<Pending>,
    outputs: Vec<NetworkOutput>,
}

impl Network for MaterialBackend {
    fn name(&self) -> &'static str {
        "material"
    }

    fn new_computation(&self) -> Box<dyn Computation> {
        Box::new(MaterialComputation {
            pending: Vec::new(),
            outputs: Vec::new(),
        })
    }
}

impl Computation for MaterialComputation {
    fn add_input(&mut self, planes: InputPlanes, num_moves: usize) {
        self.pending.push(Pending { planes, num_moves });
    }

    fn batch_size(&self) -> usize {
        self.pending.len()
    }

    fn compute_blocking(&mut self) -> Result<(), BackendError> {
        self.outputs = self
            .pending
            .drain(..)
            .map(|sample| {
                let mut ours = 0.0f32;
                let mut theirs = 0.0f32;
                let mut men = 0u32;
                for (role, &value) in ROLE_VALUES.iter().enumerate() {
                    let us = sample.planes[role].mask.count_ones();
                    let them = sample.planes[role + 6].mask.count_ones();
                    ours += value * us as f32;
                    theirs += value * them as f32;
                    men += us + them;
                }
                let q = ((ours - theirs) * 0.3).tanh();
                let d = (1.0 - q.abs()) * 0.4;
                let m = 10.0 + men as f32 * 2.0;
                NetworkOutput {
                    q,
                    d,
                    m,
                    policy: uniform_policy(sample.num_moves),
                }
            })
            .collect();
        Ok(())
    }

    fn output(&self, idx: usize) -> &NetworkOutput {
        &self.outputs[idx]
    }
}

/// Look a backend up by its UCI option value.
pub fn create_backend(name: &str) -> Option<Box<dyn Network>> {
    match name {
        "random" => Some(Box::new(RandomBackend)),
        "material" => Some(Box::new(MaterialBackend)),
        _ => None,
    }
}
