//! Concurrent Monte-Carlo tree search for the quartz chess engine.
//!
//! The crate owns everything between a `go` request and a `bestmove`
//! answer: the shared node tree, PUCT selection with virtual loss, the
//! batched network evaluation pipeline with its hash-keyed cache, the
//! stopper framework, and per-move time budgeting. Chess itself comes
//! from `engine-core`; network backends implement the traits in
//! [`network`].

pub mod backends;
pub mod cache;
pub mod network;
pub mod node;
pub mod params;
pub mod search;
pub mod stoppers;
pub mod timemgr;
pub mod tree;

pub use backends::{create_backend, MaterialBackend, RandomBackend};
pub use cache::{CachedEval, NNCache};
pub use network::{BackendError, Computation, Network, NetworkOutput};
pub use node::{Bound, Edge, Node, Proof, TerminalKind};
pub use params::SearchParams;
pub use search::{
    apply_root_noise, BestMoveCallback, BestMoveInfo, InfoCallback, InfoMessage, Score, Search,
    SearchError, SearchSpec, ThinkingInfo,
};
pub use stoppers::{IterationStats, SearchStopper, StopperHints, TimeBank};
pub use timemgr::{GoParams, TimeManager};
pub use tree::NodeTree;
