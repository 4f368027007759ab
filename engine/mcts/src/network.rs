//! The neural network interface consumed by the search.
//!
//! A `Network` hands out `Computation`s; workers push input planes for
//! every leaf in their minibatch, call `compute_blocking`, and read the
//! per-sample outputs back. Policy vectors are indexed by legal-move
//! ordinal, matching the order of `Position::legal_moves`.

use engine_core::InputPlanes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("batch evaluation failed: {0}")]
    Eval(String),
}

/// Output for one sample of a batch.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// Expected value in [-1, 1] from the side to move.
    pub q: f32,
    /// Draw probability in [0, 1].
    pub d: f32,
    /// Moves-left estimate in plies.
    pub m: f32,
    /// Prior probability per legal-move ordinal; sums to 1.
    pub policy: Box<[f32]>,
}

/// One batched evaluation in flight.
pub trait Computation: Send {
    /// Queue a sample. `num_moves` is the number of legal moves whose
    /// priors the backend must produce.
    fn add_input(&mut self, planes: InputPlanes, num_moves: usize);

    /// Number of queued samples.
    fn batch_size(&self) -> usize;

    /// Run the batch. Blocks until every queued sample has an output.
    fn compute_blocking(&mut self) -> Result<(), BackendError>;

    /// Output for sample `idx`. Only valid after `compute_blocking`
    /// returned `Ok`.
    fn output(&self, idx: usize) -> &NetworkOutput;
}

/// A loaded network backend. Implementations control their own internal
/// parallelism; the search only ever blocks inside `compute_blocking`.
pub trait Network: Send + Sync {
    fn name(&self) -> &'static str;
    fn new_computation(&self) -> Box<dyn Computation>;
}
