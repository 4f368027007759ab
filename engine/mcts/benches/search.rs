//! Search throughput benchmark: fixed-visit searches from the start
//! position with the material backend.

use criterion::{criterion_group, criterion_main, Criterion};
use engine_core::STARTPOS_FEN;
use mcts::{
    MaterialBackend, NNCache, NodeTree, Search, SearchParams, SearchSpec, SearchStopper,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

fn run_fixed_visits(visits: i64, threads: usize) {
    let tree = Arc::new(NodeTree::new());
    tree.reset_to_position(STARTPOS_FEN, &[]).unwrap();
    let (tx, rx) = mpsc::channel();
    let params = SearchParams {
        threads,
        ..SearchParams::default()
    };
    let search = Search::new(SearchSpec {
        tree,
        network: Arc::new(MaterialBackend),
        cache: Arc::new(NNCache::new(100_000)),
        syzygy: None,
        params,
        stopper: SearchStopper::chain(vec![SearchStopper::Visits { limit: visits }]),
        searchmoves: Vec::new(),
        infinite: false,
        start_time: Instant::now(),
        best_move_cb: Box::new(move |bm| {
            let _ = tx.send(bm);
        }),
        info_cb: Box::new(|_| {}),
    });
    search.start_threads(threads);
    rx.recv().expect("bestmove");
    search.wait();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(10);
    group.bench_function("startpos_1000_visits_1_thread", |b| {
        b.iter(|| run_fixed_visits(1000, 1))
    });
    group.bench_function("startpos_1000_visits_2_threads", |b| {
        b.iter(|| run_fixed_visits(1000, 2))
    });
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
