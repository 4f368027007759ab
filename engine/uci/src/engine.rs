//! The engine controller: glue between the UCI loop and the search core.
//!
//! Owns the long-lived state (tree, cache, network, tablebases, time
//! manager) and drives one `Search` at a time through the
//! `Idle -> Running -> Stopping -> Idle` cycle.

use crate::options::{names, Options};
use crate::protocol::{format_bestmove, format_id, format_info, UciCommand};
use engine_core::STARTPOS_FEN;
use mcts::{
    create_backend, GoParams, InfoMessage, NNCache, Network, NodeTree, Search, SearchSpec,
    TimeManager,
};
use std::sync::Arc;
use std::time::Instant;
use tablebase::SyzygyTablebase;
use tracing::{info, warn};

pub const ENGINE_NAME: &str = "quartz";
pub const ENGINE_AUTHOR: &str = "The quartz authors";

/// Sink for engine-to-GUI lines. Search threads write through it too,
/// so it must be shareable and thread-safe.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

struct CurrentPosition {
    fen: String,
    moves: Vec<String>,
}

pub struct EngineController {
    options: Options,
    out: OutputSink,
    tree: Arc<NodeTree>,
    cache: Arc<NNCache>,
    network: Option<Arc<dyn Network>>,
    backend_name: String,
    syzygy: Option<Arc<SyzygyTablebase>>,
    syzygy_paths: String,
    time_manager: TimeManager,
    search: Option<Search>,
    current_position: Option<CurrentPosition>,
    go_params: GoParams,
    move_start_time: Instant,
    /// Called when the LogFile option changes so the binary can re-route
    /// its subscriber.
    log_file_hook: Option<Box<dyn Fn(&str) + Send>>,
}

impl EngineController {
    pub fn new(out: OutputSink) -> Self {
        let options = Options::new();
        let cache = Arc::new(NNCache::new(
            options.get_int(names::NN_CACHE_SIZE) as usize
        ));
        Self {
            options,
            out,
            tree: Arc::new(NodeTree::new()),
            cache,
            network: None,
            backend_name: String::new(),
            syzygy: None,
            syzygy_paths: String::new(),
            time_manager: TimeManager::new(),
            search: None,
            current_position: None,
            go_params: GoParams::default(),
            move_start_time: Instant::now(),
            log_file_hook: None,
        }
    }

    pub fn set_log_file_hook(&mut self, hook: Box<dyn Fn(&str) + Send>) {
        self.log_file_hook = Some(hook);
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Handle one command. Returns `false` when the engine should exit.
    pub fn handle(&mut self, command: UciCommand) -> bool {
        match command {
            UciCommand::Uci => {
                for line in format_id(ENGINE_NAME, ENGINE_AUTHOR) {
                    (self.out)(line);
                }
                for line in self.options.uci_option_lines() {
                    (self.out)(line);
                }
                (self.out)("uciok".to_string());
            }
            UciCommand::IsReady => {
                self.ensure_ready();
                (self.out)("readyok".to_string());
            }
            UciCommand::UciNewGame => self.new_game(),
            UciCommand::SetOption { name, value } => self.set_option(&name, &value),
            UciCommand::Position { fen, moves } => self.set_position(fen, moves),
            UciCommand::Go(params) => self.go(params),
            UciCommand::Stop => self.stop(),
            UciCommand::PonderHit => self.ponder_hit(),
            UciCommand::Quit => {
                self.abandon_search();
                return false;
            }
        }
        true
    }

    /// A fatal search error, if the last search raised one. The binary
    /// exits non-zero on it.
    pub fn fatal_error(&self) -> Option<String> {
        self.search.as_ref().and_then(|s| s.fatal_error())
    }

    fn ensure_ready(&mut self) {
        // A UCI host waiting on readyok hasn't started our clock yet.
        self.move_start_time = Instant::now();
    }

    fn new_game(&mut self) {
        self.move_start_time = Instant::now();
        self.abandon_search();
        self.cache.clear();
        self.tree.clear();
        self.time_manager.reset_game();
        self.current_position = None;
        self.update_from_options();
    }

    fn set_option(&mut self, name: &str, value: &str) {
        match self.options.set(name, value) {
            Ok(()) => {
                if name.eq_ignore_ascii_case(names::LOG_FILE) {
                    if let Some(hook) = &self.log_file_hook {
                        hook(value);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "setoption rejected");
                (self.out)(format!("info string {e}"));
            }
        }
    }

    fn set_position(&mut self, fen: String, moves: Vec<String>) {
        // Some hosts start the clock on `position` already.
        self.move_start_time = Instant::now();
        self.abandon_search();
        self.current_position = Some(CurrentPosition { fen, moves });
    }

    /// Apply pending option changes to the long-lived collaborators.
    fn update_from_options(&mut self) {
        let backend = self.options.get_str(names::BACKEND);
        if self.network.is_none() || backend != self.backend_name {
            match create_backend(&backend) {
                Some(network) => {
                    info!(backend, "network backend loaded");
                    self.network = Some(Arc::from(network));
                    self.backend_name = backend;
                }
                None => {
                    warn!(backend, "unknown backend, keeping previous");
                    (self.out)(format!("info string unknown backend {backend}"));
                }
            }
        }

        let paths = self.options.get_str(names::SYZYGY_PATH);
        if paths != self.syzygy_paths {
            if paths.is_empty() {
                self.syzygy = None;
            } else {
                match SyzygyTablebase::init(&paths) {
                    Ok(tb) => {
                        info!(paths, max_pieces = tb.max_pieces(), "Syzygy loaded");
                        self.syzygy = Some(Arc::new(tb));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to load Syzygy tablebases");
                        (self.out)(format!("info string {e}"));
                        self.syzygy = None;
                    }
                }
            }
            self.syzygy_paths = paths;
        }

        self.cache
            .set_capacity(self.options.get_int(names::NN_CACHE_SIZE) as usize);
    }

    /// Point the tree at a position, resetting the time bank when the
    /// game changed.
    fn setup_position(&mut self, fen: &str, moves: &[String]) -> bool {
        self.abandon_search();
        self.update_from_options();
        match self.tree.reset_to_position(fen, moves) {
            Ok(same_game) => {
                if !same_game {
                    self.time_manager.reset_game();
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "bad position");
                (self.out)(format!("info string {e}"));
                false
            }
        }
    }

    fn go(&mut self, params: GoParams) {
        self.go_params = params.clone();

        let (fen, mut moves) = match &self.current_position {
            Some(current) => (current.fen.clone(), current.moves.clone()),
            None => (STARTPOS_FEN.to_string(), Vec::new()),
        };

        // Pondering searches the position before the expected reply;
        // ponderhit replays the full move list and reuses the subtree.
        // (With `searchmoves` this means the restriction applies to the
        // popped position, an inherited quirk.)
        if params.ponder && !moves.is_empty() {
            moves.pop();
        }

        if !self.setup_position(&fen, &moves) {
            return;
        }
        let Some(network) = self.network.clone() else {
            (self.out)("info string no network backend loaded".to_string());
            return;
        };

        let search_params = self.options.search_params();
        let stopper =
            self.time_manager
                .get_stopper(&search_params, &params, &self.tree.head_position());

        let chess960 = self.options.get_bool(names::CHESS960);
        let out = Arc::clone(&self.out);
        let best_move_cb: mcts::BestMoveCallback = Box::new(move |best| {
            out(format_bestmove(&best, chess960));
        });
        let out = Arc::clone(&self.out);
        let info_cb: mcts::InfoCallback = Box::new(move |message| match message {
            InfoMessage::Stats(stats) => out(format_info(&stats, chess960)),
            InfoMessage::String(s) => out(format!("info string {s}")),
        });

        let threads = search_params.threads;
        let search = Search::new(SearchSpec {
            tree: Arc::clone(&self.tree),
            network,
            cache: Arc::clone(&self.cache),
            syzygy: self.syzygy.clone(),
            params: search_params,
            stopper,
            searchmoves: params.searchmoves.clone(),
            infinite: params.infinite || params.ponder,
            start_time: self.move_start_time,
            best_move_cb,
            info_cb,
        });
        search.start_threads(threads);
        self.search = Some(search);
    }

    fn ponder_hit(&mut self) {
        // The opponent played the expected move: restart the clock and
        // re-issue the same go with the ponder flag cleared. Tree reuse
        // keeps every visit gathered while pondering.
        self.move_start_time = Instant::now();
        self.go_params.ponder = false;
        let params = self.go_params.clone();
        self.go(params);
    }

    fn stop(&mut self) {
        if let Some(search) = &self.search {
            search.stop();
        }
    }

    /// Tear down any running search without emitting a bestmove.
    fn abandon_search(&mut self) {
        if let Some(search) = self.search.take() {
            search.abort();
            search.wait();
        }
    }
}

/// Blocking stdin loop. Returns the process exit code.
pub fn run_stdin_loop(controller: &mut EngineController) -> i32 {
    use std::io::BufRead;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match crate::protocol::parse_line(&line) {
            Ok(command) => {
                if !controller.handle(command) {
                    break;
                }
                if let Some(error) = controller.fatal_error() {
                    warn!(error, "fatal search error");
                    return 1;
                }
            }
            Err(e) => {
                // Malformed lines are logged and skipped.
                warn!(error = %e, "ignoring UCI line");
            }
        }
    }
    0
}
