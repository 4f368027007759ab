//! The search: PUCT descent, batched evaluation, backup and reporting.
//!
//! Worker threads repeatedly descend the shared tree to collect a
//! minibatch of leaves, evaluate the batch in one blocking network call,
//! then expand and back up every leaf. Virtual loss steers concurrent
//! descents apart; a reporter thread polls the stopper chain and emits
//! `info` output. There is no global work queue: workers coordinate only
//! through the tree's atomics and the cache's shard locks.

use crate::cache::{CachedEval, NNCache};
use crate::node::{Bound, Edge, Node, TerminalKind};
use crate::params::SearchParams;
use crate::stoppers::{IterationStats, SearchStopper, StopperHints};
use crate::tree::NodeTree;
use crate::network::{Computation, Network};
use engine_core::{encode_planes, format_move, GameResult, Move, MoveList, PositionHistory};
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use smallvec::{smallvec, SmallVec};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tablebase::{SyzygyTablebase, WdlOutcome};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// How often the reporter samples the stoppers. Time stoppers are
/// polled, not interrupt-driven, so this bounds the stop latency on top
/// of the move-overhead slack.
const REPORT_CADENCE: Duration = Duration::from_millis(100);

/// Minimum interval between consecutive `info` lines.
const INFO_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("network backend failed twice in a row: {0}")]
    BackendBroken(String),
}

/// Evaluation of the root, as printed in `info score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

#[derive(Debug, Clone)]
pub struct BestMoveInfo {
    pub best: Option<Move>,
    pub ponder: Option<Move>,
}

#[derive(Debug, Clone)]
pub struct ThinkingInfo {
    pub depth: u32,
    pub seldepth: u32,
    pub time_ms: i64,
    pub nodes: i64,
    pub nps: i64,
    pub hashfull: u32,
    pub tb_hits: u64,
    pub score: Score,
    pub pv: Vec<Move>,
}

/// Messages from the reporter thread.
#[derive(Debug, Clone)]
pub enum InfoMessage {
    Stats(ThinkingInfo),
    String(String),
}

pub type BestMoveCallback = Box<dyn Fn(BestMoveInfo) + Send + Sync>;
pub type InfoCallback = Box<dyn Fn(InfoMessage) + Send + Sync>;

/// Per-search counters, all updated with relaxed atomics.
#[derive(Default)]
struct SearchCounters {
    backups: AtomicU64,
    depth_sum: AtomicU64,
    seldepth: AtomicU32,
    collisions: AtomicU64,
    batches: AtomicU64,
    tb_hits: AtomicU64,
}

/// Everything workers need, shared behind one `Arc`.
struct SearchContext {
    tree: Arc<NodeTree>,
    root: u32,
    root_history: PositionHistory,
    network: Arc<dyn Network>,
    cache: Arc<NNCache>,
    syzygy: Option<Arc<SyzygyTablebase>>,
    params: SearchParams,
    /// Legal root moves the search is restricted to, normalised to the
    /// legacy encoding. Empty means unrestricted.
    root_move_filter: Vec<String>,
    infinite: bool,
    stop: AtomicBool,
    emit_bestmove: AtomicBool,
    start_time: Instant,
    initial_visits: i64,
    stopper: Mutex<SearchStopper>,
    hints: Mutex<StopperHints>,
    counters: SearchCounters,
    active_workers: AtomicUsize,
    fatal: Mutex<Option<SearchError>>,
    best_move_cb: BestMoveCallback,
    info_cb: InfoCallback,
}

/// A leaf waiting for network evaluation.
struct LeafTask {
    node: u32,
    path: SmallVec<[u32; 64]>,
    history: PositionHistory,
    moves: MoveList,
    fingerprint: u64,
}

enum Gather {
    /// A leaf was queued for evaluation.
    Collected,
    /// The descent finished inline (terminal, tablebase or cache hit).
    BackedUp,
    /// Another worker holds the expansion ticket for the chosen leaf.
    Collision,
    /// The root's value is proven; there is nothing left to search.
    RootDone,
}

/// One search from `go` to `bestmove`.
pub struct Search {
    ctx: Arc<SearchContext>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Construction arguments that would otherwise drown the signature.
pub struct SearchSpec {
    pub tree: Arc<NodeTree>,
    pub network: Arc<dyn Network>,
    pub cache: Arc<NNCache>,
    pub syzygy: Option<Arc<SyzygyTablebase>>,
    pub params: SearchParams,
    pub stopper: SearchStopper,
    pub searchmoves: Vec<String>,
    /// `go infinite` or `go ponder`: only an external stop ends the
    /// search.
    pub infinite: bool,
    pub start_time: Instant,
    pub best_move_cb: BestMoveCallback,
    pub info_cb: InfoCallback,
}

impl Search {
    pub fn new(spec: SearchSpec) -> Self {
        let (root, root_history) = spec.tree.head();
        let initial_visits = {
            let arena = spec.tree.arena().read();
            arena[root as usize].n() as i64
        };
        // Normalise the root filter so comparisons don't depend on the
        // castling encoding the GUI used.
        let root_move_filter = spec
            .searchmoves
            .iter()
            .filter_map(|s| {
                engine_core::parse_move(root_history.last(), s)
                    .ok()
                    .map(|m| format_move(&m, false))
            })
            .collect();
        Self {
            ctx: Arc::new(SearchContext {
                tree: spec.tree,
                root,
                root_history,
                network: spec.network,
                cache: spec.cache,
                syzygy: spec.syzygy,
                params: spec.params,
                root_move_filter,
                infinite: spec.infinite,
                stop: AtomicBool::new(false),
                emit_bestmove: AtomicBool::new(true),
                start_time: spec.start_time,
                initial_visits,
                stopper: Mutex::new(spec.stopper),
                hints: Mutex::new(StopperHints::default()),
                counters: SearchCounters::default(),
                active_workers: AtomicUsize::new(0),
                fatal: Mutex::new(None),
                best_move_cb: spec.best_move_cb,
                info_cb: spec.info_cb,
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch `n` workers plus the reporter.
    pub fn start_threads(&self, n: usize) {
        let n = n.max(1);
        self.ctx.active_workers.store(n, Ordering::SeqCst);
        let mut handles = self.handles.lock();
        for id in 0..n {
            let ctx = Arc::clone(&self.ctx);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("search-worker-{id}"))
                    .spawn(move || worker_loop(&ctx))
                    .expect("spawning a worker thread"),
            );
        }
        let ctx = Arc::clone(&self.ctx);
        handles.push(
            std::thread::Builder::new()
                .name("search-reporter".into())
                .spawn(move || reporter_loop(&ctx))
                .expect("spawning the reporter thread"),
        );
    }

    /// Ask the search to finish and report its best move.
    pub fn stop(&self) {
        self.ctx.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the search to finish without reporting a best move. Used when
    /// the controller replaces the search (new `go`, ponderhit).
    pub fn abort(&self) {
        self.ctx.emit_bestmove.store(false, Ordering::SeqCst);
        self.ctx.stop.store(true, Ordering::SeqCst);
    }

    /// Block until every thread has drained.
    pub fn wait(&self) {
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Fatal error raised by the workers, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.ctx.fatal.lock().as_ref().map(|e| e.to_string())
    }

    /// Visits currently at the root (for tests and the self-play driver).
    pub fn root_visits(&self) -> i64 {
        let arena = self.ctx.tree.arena().read();
        arena[self.ctx.root as usize].n() as i64
    }

    /// Best root move once the search has drained.
    pub fn current_best_move(&self) -> Option<Move> {
        let arena = self.ctx.tree.arena().read();
        pick_root_move(&self.ctx, &arena)
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.abort();
        self.wait();
    }
}

// ---------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------

fn worker_loop(ctx: &SearchContext) {
    let mut backend_failed_once = false;
    while !ctx.stop.load(Ordering::Acquire) {
        match run_one_batch(ctx, &mut backend_failed_once) {
            BatchOutcome::Progress => {
                // Checking the stoppers here, not just in the reporter,
                // keeps node-limited searches deterministic at one
                // thread: the limit lands on a batch boundary instead of
                // a poll tick.
                maybe_trigger_stop(ctx);
            }
            BatchOutcome::RootDone => {
                // Nothing left to prove or expand; let the reporter
                // commit the move.
                ctx.stop.store(true, Ordering::SeqCst);
                break;
            }
            BatchOutcome::Fatal => break,
        }
    }
    ctx.active_workers.fetch_sub(1, Ordering::SeqCst);
}

fn maybe_trigger_stop(ctx: &SearchContext) {
    if ctx.infinite || ctx.stop.load(Ordering::Acquire) {
        return;
    }
    let stats = collect_stats(ctx);
    let mut stopper = ctx.stopper.lock();
    let mut hints = ctx.hints.lock();
    if stopper.should_stop(&stats, &mut hints) {
        debug!("stopper fired, stopping search");
        ctx.stop.store(true, Ordering::SeqCst);
    }
}

enum BatchOutcome {
    Progress,
    RootDone,
    Fatal,
}

fn run_one_batch(ctx: &SearchContext, backend_failed_once: &mut bool) -> BatchOutcome {
    let mut batch: Vec<LeafTask> = Vec::with_capacity(ctx.params.minibatch_size);
    let mut collisions = 0u32;
    let mut inline_backups = 0u32;

    // Bound the pass so a subtree of terminals cannot trap us here
    // between stop checks.
    let max_descents = ctx.params.minibatch_size * 4;
    for _ in 0..max_descents {
        if batch.len() >= ctx.params.minibatch_size || ctx.stop.load(Ordering::Acquire) {
            break;
        }
        match gather_one(ctx, &mut batch) {
            Gather::Collected => {}
            Gather::BackedUp => inline_backups += 1,
            Gather::Collision => {
                collisions += 1;
                ctx.counters.collisions.fetch_add(1, Ordering::Relaxed);
                if collisions >= ctx.params.max_collision_events {
                    break;
                }
            }
            Gather::RootDone => {
                if batch.is_empty() && inline_backups == 0 {
                    return BatchOutcome::RootDone;
                }
                break;
            }
        }
    }

    if batch.is_empty() {
        if inline_backups == 0 {
            // Only collisions this pass; give the expanding workers a
            // moment.
            std::thread::yield_now();
        }
        return BatchOutcome::Progress;
    }

    // The in-flight computation is never abandoned, even when the stop
    // flag went up mid-gather: the reserved visits must resolve.
    let mut computation = ctx.network.new_computation();
    for task in &batch {
        computation.add_input(encode_planes(&task.history), task.moves.len());
    }
    match computation.compute_blocking() {
        Ok(()) => {
            *backend_failed_once = false;
            apply_batch(ctx, &batch, computation.as_ref());
            ctx.counters.batches.fetch_add(1, Ordering::Relaxed);
            BatchOutcome::Progress
        }
        Err(e) => {
            // Drop the batch and release its reservations; the leaves
            // re-queue naturally on the next pass. A second consecutive
            // failure is fatal.
            let arena = ctx.tree.arena().read();
            for task in &batch {
                for &idx in &task.path {
                    arena[idx as usize].revert_virtual_loss();
                }
                arena[task.node as usize].cancel_expansion();
            }
            if *backend_failed_once {
                warn!(error = %e, "backend failed twice, stopping search");
                *ctx.fatal.lock() = Some(SearchError::BackendBroken(e.to_string()));
                ctx.stop.store(true, Ordering::SeqCst);
                BatchOutcome::Fatal
            } else {
                warn!(error = %e, "backend failed, batch dropped and requeued");
                *backend_failed_once = true;
                BatchOutcome::Progress
            }
        }
    }
}

/// One descent from the root. Returns how it ended.
fn gather_one(ctx: &SearchContext, batch: &mut Vec<LeafTask>) -> Gather {
    let mut arena = ctx.tree.arena().read();
    let mut history = ctx.root_history.clone();
    let mut path: SmallVec<[u32; 64]> = smallvec![ctx.root];
    let mut idx = ctx.root;
    arena[idx as usize].add_virtual_loss();

    loop {
        enum Step {
            Known,
            ExpandMine,
            Collision,
            Descend { edge_i: usize, child: Option<u32> },
            Starved,
        }

        let step = {
            let node = &arena[idx as usize];
            if node.is_value_known() {
                Step::Known
            } else {
                match node.edges() {
                    None => {
                        if node.try_begin_expansion() {
                            Step::ExpandMine
                        } else {
                            Step::Collision
                        }
                    }
                    Some(edges) => {
                        let filter = if idx == ctx.root && !ctx.root_move_filter.is_empty() {
                            Some(ctx.root_move_filter.as_slice())
                        } else {
                            None
                        };
                        match select_edge(&arena, node, edges, &ctx.params, filter) {
                            Some(edge_i) => Step::Descend {
                                edge_i,
                                child: edges[edge_i].child(),
                            },
                            None => Step::Starved,
                        }
                    }
                }
            }
        };

        match step {
            Step::Known => {
                if path.len() == 1 {
                    arena[idx as usize].revert_virtual_loss();
                    return Gather::RootDone;
                }
                let (v, d, m) = arena[idx as usize].known_value();
                backup(ctx, &arena, &path, v, d, m);
                propagate_bounds(&arena, &path);
                return Gather::BackedUp;
            }
            Step::ExpandMine => {
                return expand_leaf(ctx, &arena, idx, path, history, batch);
            }
            Step::Collision => {
                for &n in &path {
                    arena[n as usize].revert_virtual_loss();
                }
                return Gather::Collision;
            }
            Step::Starved => {
                // A restricted root whose allowed subtree is fully
                // proven behaves like a done root.
                for &n in &path {
                    arena[n as usize].revert_virtual_loss();
                }
                return Gather::RootDone;
            }
            Step::Descend { edge_i, child } => {
                let mv = {
                    let edges = arena[idx as usize].edges().expect("selected from edges");
                    edges[edge_i].mv().clone()
                };
                let child = match child {
                    Some(c) => c,
                    None => {
                        // Materialising needs the write lock; release our
                        // read guard around it.
                        drop(arena);
                        let c = ctx.tree.materialize_child(idx, edge_i);
                        arena = ctx.tree.arena().read();
                        c
                    }
                };
                history.append(&mv);
                arena[child as usize].add_virtual_loss();
                path.push(child);
                idx = child;
            }
        }
    }
}

/// Classify a freshly reached leaf. The caller holds the expansion
/// ticket for `idx`.
fn expand_leaf(
    ctx: &SearchContext,
    arena: &[Node],
    idx: u32,
    path: SmallVec<[u32; 64]>,
    history: PositionHistory,
    batch: &mut Vec<LeafTask>,
) -> Gather {
    let node = &arena[idx as usize];
    let position = history.last();

    // 1. The game may simply be over here.
    let result = history.compute_game_result();
    if result != GameResult::Undecided {
        let bound = match result {
            GameResult::Lost => Bound::Loss,
            GameResult::Won => Bound::Win,
            _ => Bound::Draw,
        };
        node.make_terminal(TerminalKind::EndOfGame, bound, 0);
        let (v, d, m) = node.known_value();
        backup(ctx, arena, &path, v, d, m);
        propagate_bounds(arena, &path);
        return Gather::BackedUp;
    }

    // 2. Tablebase knowledge turns the node into a proven leaf.
    if let Some(tb) = &ctx.syzygy {
        if let Some(outcome) = tb.probe_wdl(position) {
            let bound = match outcome {
                WdlOutcome::Win => Bound::Win,
                WdlOutcome::Loss => Bound::Loss,
                WdlOutcome::Draw => Bound::Draw,
            };
            node.make_terminal(TerminalKind::Tablebase, bound, 0);
            ctx.counters.tb_hits.fetch_add(1, Ordering::Relaxed);
            let (v, d, m) = node.known_value();
            backup(ctx, arena, &path, v, d, m);
            propagate_bounds(arena, &path);
            return Gather::BackedUp;
        }
    }

    let moves = position.legal_moves();
    let fingerprint = position.fingerprint();

    // 3. A cached evaluation expands the node without touching the
    // network.
    if let Some(hit) = ctx.cache.probe(fingerprint) {
        if hit.policy.len() == moves.len() {
            let edges = build_edges(ctx, idx, &moves, &hit.policy);
            node.publish_edges(edges);
            backup(ctx, arena, &path, hit.q as f64, hit.d as f64, hit.m as f64);
            return Gather::BackedUp;
        }
        // A fingerprint collision with a different move count; fall
        // through to a fresh evaluation.
        trace!(fingerprint, "cache entry shape mismatch, ignoring");
    }

    // 4. Queue for the network. The expansion ticket stays with us until
    // the batch resolves.
    batch.push(LeafTask {
        node: idx,
        path,
        history,
        moves,
        fingerprint,
    });
    Gather::Collected
}

/// Expand every leaf of a computed batch and back the values up.
fn apply_batch(ctx: &SearchContext, batch: &[LeafTask], computation: &dyn Computation) {
    let arena = ctx.tree.arena().read();
    for (i, task) in batch.iter().enumerate() {
        let output = computation.output(i);
        let node = &arena[task.node as usize];

        // Temper and renormalise the raw priors over legal moves.
        let mut priors: Vec<f32> = output
            .policy
            .iter()
            .map(|&p| p.max(1e-9).powf(1.0 / ctx.params.policy_softmax_temp))
            .collect();
        let sum: f32 = priors.iter().sum();
        for p in priors.iter_mut() {
            *p /= sum;
        }

        let edges = build_edges(ctx, task.node, &task.moves, &priors);
        let cacheable = edges.len() == task.moves.len();
        node.publish_edges(edges);

        if cacheable {
            ctx.cache.insert(
                task.fingerprint,
                CachedEval {
                    q: output.q,
                    d: output.d,
                    m: output.m,
                    policy: priors.into_boxed_slice(),
                },
            );
        }

        backup(
            ctx,
            &arena,
            &task.path,
            output.q as f64,
            output.d as f64,
            output.m as f64,
        );
    }
}

/// Build the edge array for a node, restricting the root to the
/// `searchmoves` filter when one is active.
fn build_edges(ctx: &SearchContext, idx: u32, moves: &MoveList, priors: &[f32]) -> Box<[Edge]> {
    let filtered: Vec<(usize, &Move)> = if idx == ctx.root && !ctx.root_move_filter.is_empty() {
        moves
            .iter()
            .enumerate()
            .filter(|(_, m)| ctx.root_move_filter.contains(&format_move(m, false)))
            .collect()
    } else {
        moves.iter().enumerate().collect()
    };
    let prior_sum: f32 = filtered.iter().map(|(i, _)| priors[*i]).sum();
    let count = filtered.len().max(1);
    filtered
        .into_iter()
        .map(|(i, m)| {
            let p = if prior_sum > 0.0 {
                priors[i] / prior_sum
            } else {
                1.0 / count as f32
            };
            Edge::new(m.clone(), p)
        })
        .collect::<Vec<_>>()
        .into_boxed_slice()
}

/// PUCT over a node's edges. Returns the winning edge index, or `None`
/// when the filter leaves nothing selectable.
fn select_edge(
    arena: &[Node],
    node: &Node,
    edges: &[Edge],
    params: &SearchParams,
    filter: Option<&[String]>,
) -> Option<usize> {
    let n = node.n();
    let cpuct = params.cpuct(n);
    let sqrt_n = (n as f32).sqrt().max(1.0);
    let parent_q = node.q() as f32;

    // First-play urgency: unvisited children inherit the parent's view,
    // docked by how much prior mass is already explored.
    let visited_prior: f32 = edges
        .iter()
        .filter(|e| {
            e.child()
                .map(|c| arena[c as usize].n() > 0)
                .unwrap_or(false)
        })
        .map(|e| e.prior())
        .sum();
    let fpu = parent_q - params.fpu_reduction * visited_prior.sqrt();

    let mut best: Option<(usize, f32)> = None;
    for (i, edge) in edges.iter().enumerate() {
        if let Some(filter) = filter {
            if !filter.contains(&format_move(edge.mv(), false)) {
                continue;
            }
        }
        let (q, effective_n) = match edge.child() {
            Some(c) => {
                let child = &arena[c as usize];
                let n_c = child.n();
                let in_flight = child.n_in_flight();
                let q = if let Some(bound) = child.proof().settled() {
                    -bound.value() as f32
                } else if n_c > 0 {
                    -child.q() as f32
                } else {
                    fpu
                };
                (q, n_c + in_flight)
            }
            None => (fpu, 0),
        };
        let u = cpuct * edge.prior() * sqrt_n / (1.0 + effective_n as f32);
        let score = q + u;
        // Strict comparison keeps ties on the earliest edge.
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Bottom-up statistics update. `v` is from the leaf's side to move and
/// flips sign every ply; the moves-left estimate grows by one per ply.
fn backup(ctx: &SearchContext, arena: &[Node], path: &[u32], mut v: f64, d: f64, mut m: f64) {
    for &idx in path.iter().rev() {
        arena[idx as usize].apply_backup(v, d, m);
        v = -v;
        m += 1.0;
    }
    ctx.counters.backups.fetch_add(1, Ordering::Relaxed);
    ctx.counters
        .depth_sum
        .fetch_add(path.len() as u64, Ordering::Relaxed);
    ctx.counters
        .seldepth
        .fetch_max(path.len() as u32 - 1, Ordering::Relaxed);
}

/// After a proven leaf, tighten bounds up the path. A node's bounds are
/// the best over its edges of the flipped child bounds; propagation
/// stops at the first node whose bounds don't move.
fn propagate_bounds(arena: &[Node], path: &[u32]) {
    for i in (0..path.len().saturating_sub(1)).rev() {
        let node = &arena[path[i] as usize];
        let Some(edges) = node.edges() else {
            break;
        };
        let mut lower = Bound::Loss;
        let mut upper = Bound::Loss;
        let mut win_plies: u16 = u16::MAX;
        let mut loss_plies: u16 = 0;
        let mut all_settled = true;
        for edge in edges {
            let proof = match edge.child() {
                Some(c) => arena[c as usize].proof(),
                None => crate::node::Proof::UNKNOWN,
            };
            lower = lower.max(proof.upper.flip());
            upper = upper.max(proof.lower.flip());
            match proof.settled() {
                Some(Bound::Loss) => {
                    win_plies = win_plies.min(proof.plies.saturating_add(1));
                    loss_plies = loss_plies.max(proof.plies.saturating_add(1));
                }
                Some(_) => {
                    loss_plies = loss_plies.max(proof.plies.saturating_add(1));
                }
                None => all_settled = false,
            }
        }
        let plies = if lower == Bound::Win {
            win_plies
        } else if all_settled {
            loss_plies
        } else {
            0
        };
        if !node.tighten_bounds(lower, upper, plies) {
            break;
        }
    }
}

// ---------------------------------------------------------------------
// Reporter side
// ---------------------------------------------------------------------

fn reporter_loop(ctx: &SearchContext) {
    let mut last_info: Option<Instant> = None;

    loop {
        std::thread::sleep(REPORT_CADENCE);
        maybe_trigger_stop(ctx);

        let now = Instant::now();
        if last_info.map_or(true, |t| now.duration_since(t) >= INFO_INTERVAL) {
            emit_info(ctx);
            last_info = Some(now);
        }

        if ctx.stop.load(Ordering::Acquire) {
            break;
        }
    }

    // Drain: workers finish their in-flight batches, restoring the
    // quiescent invariant before the move is committed.
    while ctx.active_workers.load(Ordering::SeqCst) > 0 {
        std::thread::sleep(Duration::from_millis(1));
    }

    let stats = collect_stats(ctx);
    ctx.stopper.lock().on_search_done(&stats);

    if let Some(error) = ctx.fatal.lock().as_ref() {
        (ctx.info_cb)(InfoMessage::String(error.to_string()));
    }

    if ctx.emit_bestmove.load(Ordering::SeqCst) {
        emit_info(ctx);
        let arena = ctx.tree.arena().read();
        let best = pick_root_move(ctx, &arena);
        let ponder = best
            .as_ref()
            .and_then(|b| ponder_move(ctx, &arena, b));
        info!(
            best = best.as_ref().map(|m| format_move(m, false)),
            nodes = stats.total_nodes,
            "search finished"
        );
        (ctx.best_move_cb)(BestMoveInfo { best, ponder });
    }
}

fn collect_stats(ctx: &SearchContext) -> IterationStats {
    let arena = ctx.tree.arena().read();
    let root = &arena[ctx.root as usize];
    let total = root.n() as i64;
    let backups = ctx.counters.backups.load(Ordering::Relaxed).max(1);
    let edge_n = root
        .edges()
        .map(|edges| {
            edges
                .iter()
                .map(|e| {
                    e.child()
                        .map(|c| arena[c as usize].n())
                        .unwrap_or(0)
                })
                .collect()
        })
        .unwrap_or_default();
    IterationStats {
        time_since_movestart_ms: ctx.start_time.elapsed().as_millis() as i64,
        total_nodes: total,
        nodes_since_movestart: total - ctx.initial_visits,
        average_depth: ctx.counters.depth_sum.load(Ordering::Relaxed) as f64 / backups as f64,
        edge_n,
    }
}

fn emit_info(ctx: &SearchContext) {
    let arena = ctx.tree.arena().read();
    let root = &arena[ctx.root as usize];
    let nodes = root.n() as i64;
    let elapsed_ms = ctx.start_time.elapsed().as_millis() as i64;
    let since_start = nodes - ctx.initial_visits;
    let nps = if elapsed_ms > 0 {
        since_start * 1000 / elapsed_ms
    } else {
        0
    };
    let backups = ctx.counters.backups.load(Ordering::Relaxed).max(1);
    let depth = (ctx.counters.depth_sum.load(Ordering::Relaxed) / backups).max(1) as u32;
    (ctx.info_cb)(InfoMessage::Stats(ThinkingInfo {
        depth,
        seldepth: ctx.counters.seldepth.load(Ordering::Relaxed),
        time_ms: elapsed_ms,
        nodes,
        nps,
        hashfull: ctx.cache.hashfull(),
        tb_hits: ctx.counters.tb_hits.load(Ordering::Relaxed),
        score: root_score(root),
        pv: principal_variation(ctx, &arena),
    }));
}

/// Convert the root value into a UCI score. Proven results with a known
/// distance render as mate; everything else maps Q onto centipawns.
fn root_score(root: &Node) -> Score {
    let proof = root.proof();
    match proof.settled() {
        Some(Bound::Win) if proof.plies > 0 => Score::Mate((proof.plies as i32 + 1) / 2),
        Some(Bound::Loss) if proof.plies > 0 => Score::Mate(-((proof.plies as i32 + 1) / 2)),
        Some(Bound::Win) => Score::Cp(12_800),
        Some(Bound::Loss) => Score::Cp(-12_800),
        Some(Bound::Draw) => Score::Cp(0),
        None => {
            let q = root.q();
            let cp = (90.0 * (1.563_754 * q).tan()) as i32;
            Score::Cp(cp.clamp(-12_799, 12_799))
        }
    }
}

/// Walk the most visited children from the root.
fn principal_variation(ctx: &SearchContext, arena: &[Node]) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut idx = ctx.root;
    loop {
        let node = &arena[idx as usize];
        let Some(edges) = node.edges() else { break };
        let mut best: Option<(u32, usize)> = None;
        for (i, edge) in edges.iter().enumerate() {
            let n = edge
                .child()
                .map(|c| arena[c as usize].n())
                .unwrap_or(0);
            if n > 0 && best.map_or(true, |(bn, _)| n > bn) {
                best = Some((n, i));
            }
        }
        let Some((_, i)) = best else { break };
        pv.push(edges[i].mv().clone());
        match edges[i].child() {
            Some(c) => idx = c,
            None => break,
        }
        if pv.len() >= 60 {
            break;
        }
    }
    pv
}

/// The move to commit: a proven win if one exists, otherwise most
/// visits, or a temperature-weighted sample when the root temperature is
/// positive.
fn pick_root_move(ctx: &SearchContext, arena: &[Node]) -> Option<Move> {
    let root = &arena[ctx.root as usize];
    let edges = root.edges()?;

    // A child proven lost (for the opponent) is a proven win for us;
    // prefer the shortest proof regardless of visit counts.
    let mut proven: Option<(u16, &Edge)> = None;
    for edge in edges {
        if let Some(c) = edge.child() {
            let proof = arena[c as usize].proof();
            if proof.settled() == Some(Bound::Loss)
                && proven.map_or(true, |(p, _)| proof.plies < p)
            {
                proven = Some((proof.plies, edge));
            }
        }
    }
    if let Some((_, edge)) = proven {
        return Some(edge.mv().clone());
    }

    let visits: Vec<u32> = edges
        .iter()
        .map(|e| e.child().map(|c| arena[c as usize].n()).unwrap_or(0))
        .collect();
    if visits.iter().all(|&n| n == 0) {
        // Committed before any playout finished; fall back to priors.
        return edges
            .iter()
            .max_by(|a, b| a.prior().total_cmp(&b.prior()))
            .map(|e| e.mv().clone());
    }
    if ctx.params.temperature > 0.0 {
        let weights: Vec<f64> = visits
            .iter()
            .map(|&n| (n as f64).powf(1.0 / ctx.params.temperature as f64))
            .collect();
        if let Ok(dist) = WeightedIndex::new(&weights) {
            let seed = ctx.root_history.last().fingerprint() ^ root.n() as u64;
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let i = dist.sample(&mut rng);
            return Some(edges[i].mv().clone());
        }
    }
    visits
        .iter()
        .enumerate()
        .max_by_key(|(_, &n)| n)
        .map(|(i, _)| edges[i].mv().clone())
}

/// Mix Dirichlet noise into the root priors for self-play exploration.
/// The root must already be expanded; no descent may be in progress.
pub fn apply_root_noise(tree: &NodeTree, alpha: f64, epsilon: f32, seed: u64) {
    use rand_distr::{Distribution as _, Gamma};
    if alpha <= 0.0 || epsilon <= 0.0 {
        return;
    }
    let (root, _) = tree.head();
    let arena = tree.arena().read();
    let Some(edges) = arena[root as usize].edges() else {
        return;
    };
    let Ok(gamma) = Gamma::new(alpha, 1.0) else {
        return;
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut noise: Vec<f64> = edges.iter().map(|_| gamma.sample(&mut rng)).collect();
    let sum: f64 = noise.iter().sum();
    if sum <= 0.0 {
        return;
    }
    for n in noise.iter_mut() {
        *n /= sum;
    }
    for (edge, n) in edges.iter().zip(noise) {
        edge.set_prior((1.0 - epsilon) * edge.prior() + epsilon * n as f32);
    }
}

/// The ponder move is the reply the PV expects after the best move.
fn ponder_move(ctx: &SearchContext, arena: &[Node], best: &Move) -> Option<Move> {
    let root = &arena[ctx.root as usize];
    let edges = root.edges()?;
    let best_str = format_move(best, false);
    let edge = edges
        .iter()
        .find(|e| format_move(e.mv(), false) == best_str)?;
    let child = edge.child()?;
    let child_edges = arena[child as usize].edges()?;
    let mut best_reply: Option<(u32, &Edge)> = None;
    for e in child_edges {
        let n = e.child().map(|c| arena[c as usize].n()).unwrap_or(0);
        if n > 0 && best_reply.map_or(true, |(bn, _)| n > bn) {
            best_reply = Some((n, e));
        }
    }
    best_reply.map(|(_, e)| e.mv().clone())
}
