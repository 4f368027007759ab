//! End-to-end properties of the search: quiescence invariants, proving,
//! determinism, cache interaction and root restriction.

use engine_core::{format_move, STARTPOS_FEN};
use mcts::{
    Bound, MaterialBackend, NNCache, Network, NodeTree, RandomBackend, Search, SearchParams,
    SearchSpec, SearchStopper, BestMoveInfo,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Fixture {
    tree: Arc<NodeTree>,
    cache: Arc<NNCache>,
    network: Arc<dyn Network>,
    params: SearchParams,
    searchmoves: Vec<String>,
    infinite: bool,
}

impl Fixture {
    fn new(fen: &str) -> Self {
        let tree = Arc::new(NodeTree::new());
        tree.reset_to_position(fen, &[]).unwrap();
        Self {
            tree,
            cache: Arc::new(NNCache::new(100_000)),
            network: Arc::new(MaterialBackend),
            params: SearchParams {
                threads: 2,
                ..SearchParams::default()
            },
            searchmoves: Vec::new(),
            infinite: false,
        }
    }

    fn run(&self, stopper: SearchStopper) -> BestMoveInfo {
        let (search, rx) = self.launch(stopper);
        let best = rx
            .recv_timeout(Duration::from_secs(120))
            .expect("search must commit a best move");
        search.wait();
        best
    }

    fn launch(&self, stopper: SearchStopper) -> (Search, mpsc::Receiver<BestMoveInfo>) {
        let (tx, rx) = mpsc::channel();
        let search = Search::new(SearchSpec {
            tree: Arc::clone(&self.tree),
            network: Arc::clone(&self.network),
            cache: Arc::clone(&self.cache),
            syzygy: None,
            params: self.params.clone(),
            stopper,
            searchmoves: self.searchmoves.clone(),
            infinite: self.infinite,
            start_time: Instant::now(),
            best_move_cb: Box::new(move |bm| {
                let _ = tx.send(bm);
            }),
            info_cb: Box::new(|_| {}),
        });
        search.start_threads(self.params.threads);
        (search, rx)
    }
}

fn visit_limit(n: i64) -> SearchStopper {
    SearchStopper::chain(vec![SearchStopper::Visits { limit: n }])
}

/// Walk the whole arena checking the statistics invariants that must
/// hold once the search has drained.
fn assert_quiescent(tree: &NodeTree) {
    let arena = tree.arena().read();
    for (idx, node) in arena.iter().enumerate() {
        let n = node.n() as f64;
        assert_eq!(node.n_in_flight(), 0, "node {idx}: reserved visits leaked");
        assert!(node.w().abs() <= n + 1e-6, "node {idx}: |W| > N");
        assert!(
            node.d_avg() >= -1e-9 && node.d_avg() <= 1.0 + 1e-9,
            "node {idx}: D out of range"
        );
        if let Some(edges) = node.edges() {
            if !node.is_value_known() && node.n() > 0 {
                let child_sum: u32 = edges
                    .iter()
                    .filter_map(|e| e.child())
                    .map(|c| arena[c as usize].n())
                    .sum();
                assert_eq!(
                    node.n() - 1,
                    child_sum,
                    "node {idx}: child visits don't account for N"
                );
            }
        }
    }
}

#[test]
fn search_reaches_quiescence_with_invariants() {
    let fx = Fixture::new(STARTPOS_FEN);
    let best = fx.run(visit_limit(600));
    assert!(best.best.is_some());
    assert_quiescent(&fx.tree);

    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    assert!(arena[root as usize].n() >= 600);
}

#[test]
fn visit_limit_overshoot_is_bounded_by_batches() {
    let fx = Fixture::new(STARTPOS_FEN);
    fx.run(visit_limit(500));
    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    let n = arena[root as usize].n() as usize;
    // Each worker can finish one gathering pass (up to 4x the minibatch
    // in inline backups) after the limit lands.
    let slack = fx.params.minibatch_size * fx.params.threads * 8;
    assert!(n >= 500, "limit not reached: {n}");
    assert!(n <= 500 + slack, "overshoot too large: {n}");
}

#[test]
fn single_thread_search_is_deterministic() {
    let run = || {
        let mut fx = Fixture::new(STARTPOS_FEN);
        fx.network = Arc::new(RandomBackend);
        fx.params.threads = 1;
        fx.cache = Arc::new(NNCache::new(100_000));
        fx.run(visit_limit(300));
        let (root, _) = fx.tree.head();
        let arena = fx.tree.arena().read();
        let edges = arena[root as usize].edges().unwrap();
        edges
            .iter()
            .map(|e| {
                (
                    format_move(e.mv(), false),
                    e.child().map(|c| arena[c as usize].n()).unwrap_or(0),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn terminal_root_takes_exactly_one_visit() {
    // Bare kings: an immediate draw by insufficient material.
    let fx = Fixture::new("7k/8/8/8/8/8/8/K7 w - - 0 1");
    let best = fx.run(visit_limit(100));
    assert!(best.best.is_none());

    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    let root = &arena[root as usize];
    assert_eq!(root.n(), 1);
    assert!(root.w().abs() < 1e-9);
    assert!((root.d_avg() - 1.0).abs() < 1e-9);
    assert_eq!(root.proof().settled(), Some(Bound::Draw));
}

#[test]
fn mate_in_one_is_proven_and_played() {
    let fx = Fixture::new("k7/8/1K6/8/8/8/8/7R w - - 0 1");
    let best = fx.run(visit_limit(5_000));
    assert_eq!(format_move(&best.best.unwrap(), false), "h1h8");

    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    let proof = arena[root as usize].proof();
    assert_eq!(proof.settled(), Some(Bound::Win));
    assert_eq!(proof.plies, 1);
}

#[test]
fn mate_in_two_is_proven() {
    // 1. Kb6 (only 1...Kb8) 2. Rh8# -- the search must prove the win
    // and report a short mate.
    let fx = Fixture::new("k7/8/2K5/8/8/8/8/7R w - - 0 1");
    let best = fx.run(visit_limit(60_000));

    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    let proof = arena[root as usize].proof();
    assert_eq!(proof.settled(), Some(Bound::Win), "win must be proven");
    let mate_in = (proof.plies as i32 + 1) / 2;
    assert!(mate_in <= 2, "mate distance {mate_in} should be at most 2");
    assert_eq!(format_move(&best.best.unwrap(), false), "c6b6");
}

#[test]
fn searchmoves_restricts_root_expansion() {
    let mut fx = Fixture::new(STARTPOS_FEN);
    fx.searchmoves = vec!["e2e4".to_string(), "d2d4".to_string()];
    fx.run(visit_limit(300));

    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    let edges = arena[root as usize].edges().unwrap();
    assert_eq!(edges.len(), 2, "root must only expand the searchmoves");
    let names: Vec<String> = edges.iter().map(|e| format_move(e.mv(), false)).collect();
    assert!(names.contains(&"e2e4".to_string()));
    assert!(names.contains(&"d2d4".to_string()));
    for edge in edges {
        assert!(edge.child().map(|c| arena[c as usize].n()).unwrap_or(0) > 0);
    }
}

#[test]
fn second_search_of_same_position_hits_the_cache() {
    let fx = Fixture::new(STARTPOS_FEN);
    fx.run(visit_limit(200));
    let hits_before = fx.cache.hits();

    // Fresh tree, same cache: the same positions come back.
    let fx2 = Fixture {
        tree: Arc::new(NodeTree::new()),
        cache: Arc::clone(&fx.cache),
        network: Arc::clone(&fx.network),
        params: fx.params.clone(),
        searchmoves: Vec::new(),
        infinite: false,
    };
    fx2.tree.reset_to_position(STARTPOS_FEN, &[]).unwrap();
    fx2.run(visit_limit(200));
    assert!(
        fx2.cache.hits() > hits_before,
        "repeat positions must be served from cache"
    );
}

#[test]
fn zero_cache_capacity_still_searches() {
    let mut fx = Fixture::new(STARTPOS_FEN);
    fx.cache = Arc::new(NNCache::new(0));
    let best = fx.run(visit_limit(200));
    assert!(best.best.is_some());
    assert_eq!(fx.cache.len(), 0);
    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    assert!(arena[root as usize].n() >= 200);
}

#[test]
fn infinite_search_stops_on_demand() {
    let mut fx = Fixture::new(STARTPOS_FEN);
    fx.infinite = true;
    let (search, rx) = fx.launch(SearchStopper::chain(Vec::new()));
    // Nothing should arrive while the search runs.
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    search.stop();
    let best = rx
        .recv_timeout(Duration::from_secs(30))
        .expect("stop must produce a bestmove");
    assert!(best.best.is_some());
    search.wait();
    assert_quiescent(&fx.tree);
}

#[test]
fn statistics_survive_tree_reuse() {
    let fx = Fixture::new(STARTPOS_FEN);
    let best = fx.run(visit_limit(400));
    let played = format_move(&best.best.unwrap(), false);

    // Advance the game along the played move; the reused subtree keeps
    // its visits.
    let same = fx
        .tree
        .reset_to_position(STARTPOS_FEN, &[played])
        .unwrap();
    assert!(same);
    let (root, _) = fx.tree.head();
    let arena = fx.tree.arena().read();
    assert!(arena[root as usize].n() > 0, "reused subtree lost its visits");
}
