//! Tree nodes and edges.
//!
//! A node carries aggregate statistics over every simulation that passed
//! through it. All statistics are atomics: workers update them without
//! any lock while they descend and back up. The edge array is written
//! exactly once, at expansion, and published with a release store; child
//! node slots start empty and are filled on first visit through the edge.

use engine_core::Move;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Sentinel for an empty child slot.
pub const NO_NODE: u32 = u32::MAX;

/// Atomic f64 built on bit-cast compare-and-swap. Counters tolerate the
/// CAS loop; they are only contended when many descents share a prefix.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn fetch_add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return f64::from_bits(current),
                Err(observed) => current = observed,
            }
        }
    }
}

/// Game-theoretic value bound, from the node's side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bound {
    Loss = 0,
    Draw = 1,
    Win = 2,
}

impl Bound {
    fn from_bits(bits: u32) -> Bound {
        match bits & 0b11 {
            0 => Bound::Loss,
            1 => Bound::Draw,
            _ => Bound::Win,
        }
    }

    /// The same bound seen from the other side of the edge.
    #[inline]
    pub fn flip(self) -> Bound {
        match self {
            Bound::Loss => Bound::Win,
            Bound::Draw => Bound::Draw,
            Bound::Win => Bound::Loss,
        }
    }

    #[inline]
    pub fn value(self) -> f64 {
        match self {
            Bound::Loss => -1.0,
            Bound::Draw => 0.0,
            Bound::Win => 1.0,
        }
    }
}

/// Proven bounds plus the plies-to-end of the proof, packed into one
/// atomic word: `lower(2) | upper(2) | plies(16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proof {
    pub lower: Bound,
    pub upper: Bound,
    pub plies: u16,
}

impl Proof {
    pub const UNKNOWN: Proof = Proof {
        lower: Bound::Loss,
        upper: Bound::Win,
        plies: 0,
    };

    fn from_bits(bits: u32) -> Proof {
        Proof {
            lower: Bound::from_bits(bits),
            upper: Bound::from_bits(bits >> 2),
            plies: (bits >> 4) as u16,
        }
    }

    fn to_bits(self) -> u32 {
        self.lower as u32 | (self.upper as u32) << 2 | (self.plies as u32) << 4
    }

    /// Exactly proven value, if the bounds have met.
    #[inline]
    pub fn settled(&self) -> Option<Bound> {
        (self.lower == self.upper).then_some(self.lower)
    }
}

/// How a node became a leaf with a known value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Not a terminal node.
    None,
    /// Checkmate, stalemate or an adjudicated draw on the board.
    EndOfGame,
    /// A definite tablebase WDL probe.
    Tablebase,
}

const EXPAND_NONE: u8 = 0;
const EXPAND_IN_PROGRESS: u8 = 1;
const EXPAND_DONE: u8 = 2;

/// A move out of a node together with its prior probability. The move is
/// immutable once the edge array is published; the prior only changes
/// when root exploration noise is mixed in, and the child slot is filled
/// on first visit.
#[derive(Debug)]
pub struct Edge {
    mv: Move,
    p: AtomicU32,
    child: AtomicU32,
}

impl Edge {
    pub fn new(mv: Move, p: f32) -> Self {
        Self {
            mv,
            p: AtomicU32::new(p.to_bits()),
            child: AtomicU32::new(NO_NODE),
        }
    }

    #[inline]
    pub fn mv(&self) -> &Move {
        &self.mv
    }

    #[inline]
    pub fn prior(&self) -> f32 {
        f32::from_bits(self.p.load(Ordering::Relaxed))
    }

    /// Overwrite the prior. Only used for root exploration noise while no
    /// descent is in progress.
    #[inline]
    pub fn set_prior(&self, p: f32) {
        self.p.store(p.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn child(&self) -> Option<u32> {
        let idx = self.child.load(Ordering::Acquire);
        (idx != NO_NODE).then_some(idx)
    }

    /// Install a child index. First writer wins; returns the index that
    /// ended up in the slot.
    pub fn set_child(&self, idx: u32) -> u32 {
        match self
            .child
            .compare_exchange(NO_NODE, idx, Ordering::Release, Ordering::Acquire)
        {
            Ok(_) => idx,
            Err(existing) => existing,
        }
    }

    /// Rewrite the child slot during tree compaction. Only safe while no
    /// search is running.
    pub fn remap_child(&self, idx: u32) {
        self.child.store(idx, Ordering::Relaxed);
    }
}

/// A tree node. See the module docs for the mutation protocol.
#[derive(Debug)]
pub struct Node {
    n: AtomicU32,
    n_in_flight: AtomicU32,
    w: AtomicF64,
    d: AtomicF64,
    m: AtomicF64,
    proof: AtomicU32,
    terminal: AtomicU8,
    expand_state: AtomicU8,
    edges: OnceCell<Box<[Edge]>>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            n: AtomicU32::new(0),
            n_in_flight: AtomicU32::new(0),
            w: AtomicF64::new(0.0),
            d: AtomicF64::new(0.0),
            m: AtomicF64::new(0.0),
            proof: AtomicU32::new(Proof::UNKNOWN.to_bits()),
            terminal: AtomicU8::new(TerminalKind::None as u8),
            expand_state: AtomicU8::new(EXPAND_NONE),
            edges: OnceCell::new(),
        }
    }
}

impl Node {
    #[inline]
    pub fn n(&self) -> u32 {
        self.n.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn n_in_flight(&self) -> u32 {
        self.n_in_flight.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn w(&self) -> f64 {
        self.w.load()
    }

    /// Mean value from this node's side to move. Zero before the first
    /// backup.
    #[inline]
    pub fn q(&self) -> f64 {
        let n = self.n();
        if n == 0 {
            0.0
        } else {
            self.w.load() / n as f64
        }
    }

    #[inline]
    pub fn d_avg(&self) -> f64 {
        let n = self.n();
        if n == 0 {
            0.0
        } else {
            self.d.load() / n as f64
        }
    }

    #[inline]
    pub fn m_avg(&self) -> f64 {
        let n = self.n();
        if n == 0 {
            0.0
        } else {
            self.m.load() / n as f64
        }
    }

    #[inline]
    pub fn add_virtual_loss(&self) {
        self.n_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn revert_virtual_loss(&self) {
        let prev = self.n_in_flight.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0);
    }

    /// One finished simulation: bump the counters and release the
    /// reserved visit.
    pub fn apply_backup(&self, v: f64, d: f64, m: f64) {
        self.n.fetch_add(1, Ordering::Relaxed);
        self.w.fetch_add(v);
        self.d.fetch_add(d);
        self.m.fetch_add(m);
        self.revert_virtual_loss();
    }

    #[inline]
    pub fn proof(&self) -> Proof {
        Proof::from_bits(self.proof.load(Ordering::Relaxed))
    }

    /// Monotonically tighten the proven bounds. The lower bound never
    /// decreases and the upper bound never increases; a violation is a
    /// caller bug and is dropped. Returns whether anything changed.
    pub fn tighten_bounds(&self, lower: Bound, upper: Bound, plies: u16) -> bool {
        let mut changed = false;
        let _ = self
            .proof
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = Proof::from_bits(bits);
                let next = Proof {
                    lower: current.lower.max(lower),
                    upper: current.upper.min(upper),
                    plies: if current.settled().is_some() {
                        current.plies
                    } else {
                        plies
                    },
                };
                if next == current {
                    changed = false;
                    None
                } else {
                    changed = true;
                    Some(next.to_bits())
                }
            });
        changed
    }

    #[inline]
    pub fn terminal_kind(&self) -> TerminalKind {
        match self.terminal.load(Ordering::Relaxed) {
            1 => TerminalKind::EndOfGame,
            2 => TerminalKind::Tablebase,
            _ => TerminalKind::None,
        }
    }

    /// Convert this node into a terminal leaf with an exact value.
    pub fn make_terminal(&self, kind: TerminalKind, result: Bound, plies: u16) {
        debug_assert!(kind != TerminalKind::None);
        self.tighten_bounds(result, result, plies);
        self.terminal.store(kind as u8, Ordering::Relaxed);
        // A terminal node never expands.
        self.expand_state.store(EXPAND_DONE, Ordering::Release);
    }

    /// Whether the exact value of this node is known, either because the
    /// game ends here or because the bounds have met.
    #[inline]
    pub fn is_value_known(&self) -> bool {
        self.terminal_kind() != TerminalKind::None || self.proof().settled().is_some()
    }

    /// The known (value, draw, moves-left) tuple. Only meaningful when
    /// `is_value_known()`.
    pub fn known_value(&self) -> (f64, f64, f64) {
        let proof = self.proof();
        let bound = proof.settled().unwrap_or(Bound::Draw);
        let d = if bound == Bound::Draw { 1.0 } else { 0.0 };
        (bound.value(), d, proof.plies as f64)
    }

    /// Race to become the expanding worker. Exactly one caller wins per
    /// node lifetime.
    pub fn try_begin_expansion(&self) -> bool {
        self.expand_state
            .compare_exchange(
                EXPAND_NONE,
                EXPAND_IN_PROGRESS,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Abandon an expansion whose evaluation failed, so another worker
    /// can retry.
    pub fn cancel_expansion(&self) {
        self.expand_state.store(EXPAND_NONE, Ordering::Release);
    }

    /// Publish the edge array. Caller must hold the expansion ticket.
    pub fn publish_edges(&self, edges: Box<[Edge]>) {
        let installed = self.edges.set(edges).is_ok();
        debug_assert!(installed, "edges published twice");
        self.expand_state.store(EXPAND_DONE, Ordering::Release);
    }

    /// The edge array, if expansion has completed. The release/acquire
    /// pair guarantees a reader that sees the array also sees every
    /// prior written during expansion.
    #[inline]
    pub fn edges(&self) -> Option<&[Edge]> {
        if self.expand_state.load(Ordering::Acquire) == EXPAND_DONE {
            self.edges.get().map(|e| e.as_ref())
        } else {
            None
        }
    }

    /// Edge count without the publication gate, for accounting only.
    pub fn num_edges(&self) -> usize {
        self.edges.get().map_or(0, |e| e.len())
    }

    /// Edge access without the publication gate. Used by tree maintenance
    /// while no search is running.
    pub fn raw_edges(&self) -> Option<&[Edge]> {
        self.edges.get().map(|e| e.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::Position;

    fn any_move() -> Move {
        Position::startpos().legal_moves()[0].clone()
    }

    #[test]
    fn atomic_f64_accumulates() {
        let x = AtomicF64::new(1.5);
        x.fetch_add(2.25);
        x.fetch_add(-0.75);
        assert!((x.load() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn backup_updates_all_statistics() {
        let node = Node::default();
        node.add_virtual_loss();
        node.apply_backup(0.5, 0.25, 10.0);
        assert_eq!(node.n(), 1);
        assert_eq!(node.n_in_flight(), 0);
        assert!((node.q() - 0.5).abs() < 1e-12);
        assert!((node.d_avg() - 0.25).abs() < 1e-12);
        assert!((node.m_avg() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn expansion_ticket_is_exclusive() {
        let node = Node::default();
        assert!(node.try_begin_expansion());
        assert!(!node.try_begin_expansion());
        node.cancel_expansion();
        assert!(node.try_begin_expansion());
    }

    #[test]
    fn edges_invisible_until_published() {
        let node = Node::default();
        assert!(node.try_begin_expansion());
        assert!(node.edges().is_none());
        node.publish_edges(vec![Edge::new(any_move(), 1.0)].into_boxed_slice());
        let edges = node.edges().expect("published");
        assert_eq!(edges.len(), 1);
        assert!((edges[0].prior() - 1.0).abs() < 1e-6);
        assert!(edges[0].child().is_none());
    }

    #[test]
    fn child_slot_first_writer_wins() {
        let edge = Edge::new(any_move(), 0.5);
        assert_eq!(edge.set_child(7), 7);
        assert_eq!(edge.set_child(9), 7);
        assert_eq!(edge.child(), Some(7));
    }

    #[test]
    fn bounds_are_monotone() {
        let node = Node::default();
        assert!(node.tighten_bounds(Bound::Draw, Bound::Win, 0));
        // Attempting to relax back to Loss is dropped.
        assert!(!node.tighten_bounds(Bound::Loss, Bound::Win, 0));
        let proof = node.proof();
        assert_eq!(proof.lower, Bound::Draw);
        assert_eq!(proof.upper, Bound::Win);
    }

    #[test]
    fn settled_bounds_make_value_known() {
        let node = Node::default();
        node.make_terminal(TerminalKind::EndOfGame, Bound::Loss, 0);
        assert!(node.is_value_known());
        let (v, d, m) = node.known_value();
        assert_eq!(v, -1.0);
        assert_eq!(d, 0.0);
        assert_eq!(m, 0.0);
        assert_eq!(node.terminal_kind(), TerminalKind::EndOfGame);
    }

    #[test]
    fn proof_packing_round_trips() {
        let proof = Proof {
            lower: Bound::Draw,
            upper: Bound::Win,
            plies: 1234,
        };
        assert_eq!(Proof::from_bits(proof.to_bits()), proof);
    }
}
