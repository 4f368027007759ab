//! Fixed-position benchmark: searches a small suite with a visit budget
//! and reports aggregate nodes per second.

use anyhow::bail;
use mcts::{
    create_backend, NNCache, Network, NodeTree, Search, SearchSpec, SearchParams, SearchStopper,
};
use std::sync::{mpsc, Arc};
use std::time::Instant;

const BENCH_POSITIONS: &[&str] = &[
    // Startpos, a tactical middlegame, a rook endgame, and a fortress.
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r1bq1rk1/pp3ppp/2nbpn2/3p4/2PP4/2N1PN2/PP2BPPP/R1BQ1RK1 w - - 4 9",
    "8/5pk1/6p1/R4p1p/5P2/6PP/r5K1/8 w - - 0 40",
    "8/8/4kpp1/3p1b2/p6P/2B5/6P1/6K1 b - - 2 47",
];

pub struct BenchmarkConfig {
    pub visits: i64,
    pub threads: usize,
    pub backend: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            visits: 5_000,
            threads: 2,
            backend: "material".to_string(),
        }
    }
}

pub fn run(config: &BenchmarkConfig) -> anyhow::Result<()> {
    let Some(network) = create_backend(&config.backend) else {
        bail!("unknown backend \"{}\"", config.backend);
    };
    let network: Arc<dyn Network> = Arc::from(network);
    let params = SearchParams {
        threads: config.threads,
        ..SearchParams::default()
    };

    let mut total_nodes = 0i64;
    let start = Instant::now();
    for fen in BENCH_POSITIONS {
        let tree = Arc::new(NodeTree::new());
        tree.reset_to_position(fen, &[])?;
        let cache = Arc::new(NNCache::new(200_000));
        let (tx, rx) = mpsc::channel();
        let search = Search::new(SearchSpec {
            tree: Arc::clone(&tree),
            network: Arc::clone(&network),
            cache,
            syzygy: None,
            params: params.clone(),
            stopper: SearchStopper::chain(vec![SearchStopper::Visits {
                limit: config.visits,
            }]),
            searchmoves: Vec::new(),
            infinite: false,
            start_time: Instant::now(),
            best_move_cb: Box::new(move |best| {
                let _ = tx.send(best);
            }),
            info_cb: Box::new(|_| {}),
        });
        search.start_threads(config.threads);
        let best = rx.recv()?;
        search.wait();
        let visits = search.root_visits();
        total_nodes += visits;
        println!(
            "bench {fen}: {} nodes, best {}",
            visits,
            best.best
                .map(|m| engine_core::format_move(&m, false))
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
    let elapsed = start.elapsed().as_secs_f64();
    let nps = (total_nodes as f64 / elapsed) as i64;
    println!("bench total: {total_nodes} nodes in {elapsed:.2}s, {nps} nps");
    Ok(())
}
