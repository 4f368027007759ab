//! A minimal self-play driver: the engine plays both sides of a game
//! with a fixed visit budget per move, sharing one tree so each move
//! reuses the previous search's subtree.

use anyhow::{bail, Context};
use engine_core::{format_move, GameResult, Position, PositionHistory, STARTPOS_FEN};
use mcts::{
    apply_root_noise, create_backend, NNCache, Network, NodeTree, Search, SearchParams,
    SearchSpec, SearchStopper,
};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use tracing::{debug, info};

pub struct SelfplayConfig {
    pub games: u32,
    pub visits: i64,
    /// Move-selection temperature for the opening plies.
    pub temperature: f32,
    /// Plies played with temperature before switching to greedy.
    pub temperature_plies: u32,
    /// Mix Dirichlet noise into the root priors of every move.
    pub noise: bool,
    pub backend: String,
    pub max_game_plies: u32,
}

impl Default for SelfplayConfig {
    fn default() -> Self {
        Self {
            games: 1,
            visits: 400,
            temperature: 1.0,
            temperature_plies: 30,
            noise: true,
            backend: "material".to_string(),
            max_game_plies: 450,
        }
    }
}

#[derive(Debug, Default)]
pub struct SelfplayTally {
    pub white_wins: u32,
    pub black_wins: u32,
    pub draws: u32,
}

/// Run one fixed-visit search over `tree` and return the committed move.
fn search_move(
    tree: &Arc<NodeTree>,
    network: &Arc<dyn Network>,
    cache: &Arc<NNCache>,
    params: &SearchParams,
    visits: i64,
) -> anyhow::Result<Option<engine_core::Move>> {
    let (tx, rx) = mpsc::channel();
    let search = Search::new(SearchSpec {
        tree: Arc::clone(tree),
        network: Arc::clone(network),
        cache: Arc::clone(cache),
        syzygy: None,
        params: params.clone(),
        stopper: SearchStopper::chain(vec![SearchStopper::Visits { limit: visits }]),
        searchmoves: Vec::new(),
        infinite: false,
        start_time: Instant::now(),
        best_move_cb: Box::new(move |best| {
            let _ = tx.send(best);
        }),
        info_cb: Box::new(|_| {}),
    });
    search.start_threads(params.threads);
    let best = rx.recv().context("search ended without a best move")?;
    search.wait();
    Ok(best.best)
}

pub fn run(config: &SelfplayConfig) -> anyhow::Result<SelfplayTally> {
    let Some(network) = create_backend(&config.backend) else {
        bail!("unknown backend \"{}\"", config.backend);
    };
    let network: Arc<dyn Network> = Arc::from(network);
    let cache = Arc::new(NNCache::new(200_000));
    let mut tally = SelfplayTally::default();

    for game in 0..config.games {
        let tree = Arc::new(NodeTree::new());
        let mut moves: Vec<String> = Vec::new();
        let mut history = PositionHistory::starting_from(Position::startpos());
        let start = Instant::now();

        let result = loop {
            let result = history.compute_game_result();
            if result != GameResult::Undecided {
                break Some(result);
            }
            if moves.len() as u32 >= config.max_game_plies {
                break None;
            }

            tree.reset_to_position(STARTPOS_FEN, &moves)?;

            let in_opening = (moves.len() as u32) < config.temperature_plies;
            let params = SearchParams {
                temperature: if in_opening { config.temperature } else { 0.0 },
                ..SearchParams::default()
            };

            if config.noise {
                // Expand the root cheaply first so there are priors to
                // perturb, then run the real budget over the same tree.
                search_move(&tree, &network, &cache, &params, 2)?;
                tree.reset_to_position(STARTPOS_FEN, &moves)?;
                let seed = (game as u64) << 32 | moves.len() as u64;
                apply_root_noise(&tree, 0.3, 0.25, seed);
            }

            let Some(mv) = search_move(&tree, &network, &cache, &params, config.visits)?
            else {
                break Some(history.compute_game_result());
            };
            debug!(game, ply = moves.len(), mv = %format_move(&mv, false), "selfplay move");
            moves.push(format_move(&mv, false));
            history.append(&mv);
        };

        // Results are reported from the final side to move.
        let white_to_move = history.last().side_to_move() == engine_core::Color::White;
        match result {
            Some(GameResult::Lost) if white_to_move => tally.black_wins += 1,
            Some(GameResult::Lost) => tally.white_wins += 1,
            Some(GameResult::Won) if white_to_move => tally.white_wins += 1,
            Some(GameResult::Won) => tally.black_wins += 1,
            _ => tally.draws += 1,
        }
        info!(
            game,
            plies = moves.len(),
            seconds = start.elapsed().as_secs(),
            "selfplay game finished"
        );
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_tiny_game_completes() {
        let config = SelfplayConfig {
            games: 1,
            visits: 30,
            temperature: 1.0,
            temperature_plies: 4,
            noise: false,
            backend: "random".to_string(),
            max_game_plies: 12,
        };
        let tally = run(&config).unwrap();
        assert_eq!(tally.white_wins + tally.black_wins + tally.draws, 1);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = SelfplayConfig {
            backend: "cuda".to_string(),
            ..SelfplayConfig::default()
        };
        assert!(run(&config).is_err());
    }
}
