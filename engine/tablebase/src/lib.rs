//! Syzygy endgame tablebase probing.
//!
//! Wraps `shakmaty-syzygy` behind the narrow interface the search core
//! consumes: a WDL probe for interior nodes and a root filter that keeps
//! only outcome-preserving moves. Probe results go through a small
//! fixed-size cache that is deliberately separate from the NN evaluation
//! cache.

use engine_core::{Move, Position};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use shakmaty::Chess;
use shakmaty_syzygy::{Tablebase, Wdl};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Entries kept in the probe cache. Fixed size; the NN cache capacity
/// option does not apply here.
const PROBE_CACHE_ENTRIES: usize = 65_536;

#[derive(Debug, Error)]
pub enum TablebaseError {
    #[error("no Syzygy tables found under \"{0}\"")]
    NoTables(String),

    #[error("failed to open tablebase directory {path}: {source}")]
    BadDirectory {
        path: String,
        source: std::io::Error,
    },
}

/// Definite WDL outcome from the probed side's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdlOutcome {
    Loss,
    Draw,
    Win,
}

struct ProbeCache {
    map: FxHashMap<u64, Option<WdlOutcome>>,
    stamp: u64,
    stamps: FxHashMap<u64, u64>,
}

impl ProbeCache {
    fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            stamp: 0,
            stamps: FxHashMap::default(),
        }
    }

    fn get(&mut self, key: u64) -> Option<Option<WdlOutcome>> {
        if let Some(v) = self.map.get(&key) {
            self.stamp += 1;
            self.stamps.insert(key, self.stamp);
            Some(*v)
        } else {
            None
        }
    }

    fn put(&mut self, key: u64, value: Option<WdlOutcome>) {
        if self.map.len() >= PROBE_CACHE_ENTRIES {
            // Evict the stalest entry.
            if let Some((&old, _)) = self.stamps.iter().min_by_key(|(_, &s)| s) {
                self.map.remove(&old);
                self.stamps.remove(&old);
            }
        }
        self.stamp += 1;
        self.map.insert(key, value);
        self.stamps.insert(key, self.stamp);
    }
}

/// A loaded set of Syzygy tables.
pub struct SyzygyTablebase {
    inner: Tablebase<Chess>,
    max_pieces: usize,
    cache: Mutex<ProbeCache>,
}

impl SyzygyTablebase {
    /// Load tables from a colon- or semicolon-separated directory list.
    pub fn init(paths: &str) -> Result<Self, TablebaseError> {
        let mut inner = Tablebase::new();
        let mut total = 0usize;
        for dir in paths.split([':', ';']).filter(|d| !d.is_empty()) {
            match inner.add_directory(dir) {
                Ok(n) => {
                    debug!(dir, tables = n, "loaded Syzygy directory");
                    total += n;
                }
                Err(source) => {
                    return Err(TablebaseError::BadDirectory {
                        path: dir.to_string(),
                        source,
                    })
                }
            }
        }
        if total == 0 {
            return Err(TablebaseError::NoTables(paths.to_string()));
        }
        let max_pieces = inner.max_pieces();
        info!(tables = total, max_pieces, "Syzygy tablebases ready");
        Ok(Self {
            inner,
            max_pieces,
            cache: Mutex::new(ProbeCache::new()),
        })
    }

    /// Largest piece count covered by the loaded tables.
    pub fn max_pieces(&self) -> usize {
        self.max_pieces
    }

    /// Whether `pos` is inside probe scope. Tables assume no castling
    /// rights and are only exact straight after a zeroing move.
    pub fn in_scope(&self, pos: &Position) -> bool {
        pos.piece_count() <= self.max_pieces
            && !pos.has_castling_rights()
            && pos.rule50_ply() == 0
    }

    /// WDL probe from the side to move's perspective. Out-of-scope
    /// positions and probe failures both yield `None`; per the error
    /// policy a failed probe only costs us tablebase knowledge for that
    /// position.
    pub fn probe_wdl(&self, pos: &Position) -> Option<WdlOutcome> {
        if !self.in_scope(pos) {
            return None;
        }
        let key = pos.fingerprint();
        if let Some(cached) = self.cache.lock().get(key) {
            return cached;
        }
        let outcome = match self.inner.probe_wdl_after_zeroing(pos.inner()) {
            Ok(Wdl::Win) => Some(WdlOutcome::Win),
            Ok(Wdl::Loss) => Some(WdlOutcome::Loss),
            // Cursed wins and blessed losses are draws under the 50-move
            // rule, which is how the search scores them.
            Ok(Wdl::Draw) | Ok(Wdl::CursedWin) | Ok(Wdl::BlessedLoss) => Some(WdlOutcome::Draw),
            Err(e) => {
                warn!(fen = %pos.fen(), error = %e, "tablebase probe failed");
                None
            }
        };
        self.cache.lock().put(key, outcome);
        outcome
    }

    /// At the root, keep only moves that preserve the best available WDL
    /// outcome. Returns `None` when the root is out of scope or any child
    /// probe fails, in which case the caller searches all moves.
    pub fn root_moves(&self, pos: &Position) -> Option<Vec<Move>> {
        if pos.piece_count() > self.max_pieces || pos.has_castling_rights() {
            return None;
        }
        let legal = pos.legal_moves();
        let mut scored: Vec<(Move, i32)> = Vec::with_capacity(legal.len());
        for mv in &legal {
            let child = pos.play(mv);
            // Child outcome is from the opponent's perspective.
            let child_outcome = if child.rule50_ply() == 0 {
                self.probe_wdl(&child)?
            } else {
                match self.inner.probe_wdl_after_zeroing(child.inner()) {
                    Ok(Wdl::Win) => WdlOutcome::Win,
                    Ok(Wdl::Loss) => WdlOutcome::Loss,
                    Ok(_) => WdlOutcome::Draw,
                    Err(_) => return None,
                }
            };
            let ours = match child_outcome {
                WdlOutcome::Win => -1,
                WdlOutcome::Draw => 0,
                WdlOutcome::Loss => 1,
            };
            scored.push((mv.clone(), ours));
        }
        let best = scored.iter().map(|(_, s)| *s).max()?;
        Some(
            scored
                .into_iter()
                .filter(|(_, s)| *s == best)
                .map(|(m, _)| m)
                .collect(),
        )
    }
}
